//! A scripted Web Connector client.
//!
//! Speaks SOAP to an in-process [`SyncServer`] the way the real Web
//! Connector does over HTTP, and records every exchange.

use crate::fixtures::{QuickBooksDouble, TEST_CLIENT_VERSION};
use qbsync_protocol::{
    parse_envelope, Action, ActionRequest, ActionResult, AuthenticateResult, CodecError,
    CodecResult, Phase, QueryPayload, QBWC_NS,
};
use qbsync_server::SyncServer;

/// One request/response pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// What the client sent.
    pub request: ActionRequest,
    /// What the server answered.
    pub result: ActionResult,
}

/// Summary of a full sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRun {
    /// Ticket issued by `authenticate`, if any.
    pub ticket: Option<String>,
    /// `clientVersion` result.
    pub version_notice: String,
    /// Phases queried, in order.
    pub phases: Vec<Phase>,
    /// `receiveResponseXML` results, in order.
    pub progress: Vec<i32>,
    /// `closeConnection` result, if the run got that far.
    pub close_ack: Option<String>,
}

impl SyncRun {
    /// Returns true if every phase ran and the last one reported 100.
    pub fn completed(&self) -> bool {
        self.phases == Phase::ALL && self.progress.last() == Some(&100)
    }
}

/// Drives a [`SyncServer`] through SOAP envelopes.
pub struct ScriptedClient<'a> {
    server: &'a SyncServer,
    transcript: Vec<Exchange>,
}

impl<'a> ScriptedClient<'a> {
    /// Creates a client talking to `server`.
    pub fn new(server: &'a SyncServer) -> Self {
        Self {
            server,
            transcript: Vec::new(),
        }
    }

    /// Returns every exchange so far.
    pub fn transcript(&self) -> &[Exchange] {
        &self.transcript
    }

    /// Sends one request with a `SOAPAction` header, as the Web Connector does.
    pub async fn call(&mut self, request: ActionRequest) -> CodecResult<ActionResult> {
        let action = request.action();
        let header = format!("\"{QBWC_NS}{action}\"");
        let reply = self
            .server
            .handle_soap(Some(&header), &request.to_envelope()?)
            .await;
        if reply.status != 200 {
            return Err(CodecError::invalid_structure(format!(
                "HTTP {} for {action}",
                reply.status
            )));
        }
        let payload = parse_envelope(&reply.body)?;
        let result = ActionResult::from_payload(action, &payload)?;
        self.transcript.push(Exchange {
            request,
            result: result.clone(),
        });
        Ok(result)
    }

    fn unexpected(action: Action, result: ActionResult) -> CodecError {
        CodecError::invalid_structure(format!("unexpected {action} result {result:?}"))
    }

    /// `serverVersion`
    pub async fn server_version(&mut self) -> CodecResult<String> {
        match self.call(ActionRequest::ServerVersion).await? {
            ActionResult::ServerVersion(v) => Ok(v),
            other => Err(Self::unexpected(Action::ServerVersion, other)),
        }
    }

    /// `clientVersion`
    pub async fn client_version(&mut self, version: &str) -> CodecResult<String> {
        let request = ActionRequest::ClientVersion {
            version: version.to_string(),
        };
        match self.call(request).await? {
            ActionResult::ClientVersion(v) => Ok(v),
            other => Err(Self::unexpected(Action::ClientVersion, other)),
        }
    }

    /// `authenticate`
    pub async fn authenticate(
        &mut self,
        username: &str,
        password: &str,
    ) -> CodecResult<AuthenticateResult> {
        let request = ActionRequest::Authenticate {
            username: username.to_string(),
            password: password.to_string(),
        };
        match self.call(request).await? {
            ActionResult::Authenticate(auth) => Ok(auth),
            other => Err(Self::unexpected(Action::Authenticate, other)),
        }
    }

    /// `sendRequestXML`
    pub async fn send_request_xml(&mut self, ticket: &str, company_file: &str) -> CodecResult<String> {
        let request = ActionRequest::SendRequestXml {
            ticket: ticket.to_string(),
            hcp_response: String::new(),
            company_file: company_file.to_string(),
        };
        match self.call(request).await? {
            ActionResult::SendRequestXml(xml) => Ok(xml),
            other => Err(Self::unexpected(Action::SendRequestXml, other)),
        }
    }

    /// `receiveResponseXML`
    pub async fn receive_response_xml(
        &mut self,
        ticket: &str,
        response: &str,
        hresult: Option<&str>,
        message: &str,
    ) -> CodecResult<i32> {
        let request = ActionRequest::ReceiveResponseXml {
            ticket: ticket.to_string(),
            response: response.to_string(),
            hresult: hresult.map(str::to_string),
            message: message.to_string(),
        };
        match self.call(request).await? {
            ActionResult::ReceiveResponseXml(code) => Ok(code),
            other => Err(Self::unexpected(Action::ReceiveResponseXml, other)),
        }
    }

    /// `connectionError`
    pub async fn connection_error(
        &mut self,
        ticket: &str,
        hresult: &str,
        message: &str,
    ) -> CodecResult<String> {
        let request = ActionRequest::ConnectionError {
            ticket: ticket.to_string(),
            hresult: hresult.to_string(),
            message: message.to_string(),
        };
        match self.call(request).await? {
            ActionResult::ConnectionError(ack) => Ok(ack),
            other => Err(Self::unexpected(Action::ConnectionError, other)),
        }
    }

    /// `closeConnection`
    pub async fn close_connection(&mut self, ticket: &str) -> CodecResult<String> {
        let request = ActionRequest::CloseConnection {
            ticket: ticket.to_string(),
        };
        match self.call(request).await? {
            ActionResult::CloseConnection(ack) => Ok(ack),
            other => Err(Self::unexpected(Action::CloseConnection, other)),
        }
    }

    /// Runs a whole update cycle against `quickbooks`.
    ///
    /// Stops early on an invalid login or an abort code; the session is
    /// closed whenever a ticket was issued.
    pub async fn run_sync(
        &mut self,
        quickbooks: &QuickBooksDouble,
        username: &str,
        password: &str,
        company_file: &str,
    ) -> CodecResult<SyncRun> {
        let mut run = SyncRun::default();
        self.server_version().await?;
        run.version_notice = self.client_version(TEST_CLIENT_VERSION).await?;

        let ticket = match self.authenticate(username, password).await? {
            AuthenticateResult::Ticket { ticket, .. } => ticket,
            AuthenticateResult::InvalidUser | AuthenticateResult::Busy => return Ok(run),
        };
        run.ticket = Some(ticket.clone());

        // One round per phase, plus the empty request that ends the cycle.
        for _ in 0..=Phase::ALL.len() {
            let query = self.send_request_xml(&ticket, company_file).await?;
            if query.is_empty() {
                break;
            }
            run.phases.push(QueryPayload::from_qbxml(&query)?.phase());
            let response = quickbooks.respond(&query)?;
            let code = self
                .receive_response_xml(&ticket, &response, None, "")
                .await?;
            run.progress.push(code);
            if code < 0 {
                break;
            }
        }

        run.close_ack = Some(self.close_connection(&ticket).await?);
        Ok(run)
    }
}
