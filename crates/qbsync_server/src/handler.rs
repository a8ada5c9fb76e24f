//! Action handlers for the Web Connector protocol.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::event_log::{EventKind, EventMetadata, EventRecord, EventStore, SyncEventLog};
use crate::planner::{next_phase, percent_complete, SyncPlanner};
use crate::processor::PhaseProcessor;
use crate::session::{PendingRequest, SessionManager, SessionState, SessionStore, Ticket};
use chrono::Utc;
use qbsync_protocol::{
    build_phase_query, compare_versions, extract_error, parse_qbxml_response, ActionRequest,
    ActionResult, AuthenticateResult, Phase, QbxmlResponse, ABORT_SESSION, CLOSE_CONNECTION_ACK,
    CONNECTION_ERROR_ACK,
};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Shared state of all handlers.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Session tickets and pending requests.
    pub sessions: SessionManager,
    /// Sync event log.
    pub events: SyncEventLog,
    /// Next-phase planner over `events`.
    pub planner: SyncPlanner,
    /// Consumer of successful responses.
    pub processor: Arc<dyn PhaseProcessor>,
}

impl HandlerContext {
    /// Creates a handler context over the given stores.
    pub fn new(
        config: ServerConfig,
        session_store: Arc<dyn SessionStore>,
        event_store: Arc<dyn EventStore>,
        processor: Arc<dyn PhaseProcessor>,
    ) -> Self {
        let sessions = SessionManager::new(
            session_store,
            config.credentials.clone(),
            config.session_ttl,
            config.store_timeout,
        );
        let events = SyncEventLog::new(event_store, config.store_timeout);
        let planner = SyncPlanner::new(events.clone());
        Self {
            config,
            sessions,
            events,
            planner,
            processor,
        }
    }
}

/// Handler for Web Connector actions.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Routes a decoded request to its handler.
    pub async fn dispatch(&self, request: ActionRequest) -> ServerResult<ActionResult> {
        Ok(match request {
            ActionRequest::ServerVersion => ActionResult::ServerVersion(self.handle_server_version()),
            ActionRequest::ClientVersion { version } => {
                ActionResult::ClientVersion(self.handle_client_version(&version))
            }
            ActionRequest::Authenticate { username, password } => {
                ActionResult::Authenticate(self.handle_authenticate(&username, &password).await)
            }
            ActionRequest::SendRequestXml {
                ticket,
                company_file,
                ..
            } => ActionResult::SendRequestXml(
                self.handle_send_request_xml(&Ticket::from(ticket), &company_file)
                    .await?,
            ),
            ActionRequest::ReceiveResponseXml {
                ticket,
                response,
                hresult,
                message,
            } => ActionResult::ReceiveResponseXml(
                self.handle_receive_response_xml(
                    &Ticket::from(ticket),
                    &response,
                    hresult.as_deref(),
                    &message,
                )
                .await,
            ),
            ActionRequest::ConnectionError {
                ticket,
                hresult,
                message,
            } => ActionResult::ConnectionError(
                self.handle_connection_error(&Ticket::from(ticket), &hresult, &message)
                    .await,
            ),
            ActionRequest::CloseConnection { ticket } => {
                ActionResult::CloseConnection(self.handle_close_connection(&Ticket::from(ticket)).await)
            }
        })
    }

    /// Returns the configured server version.
    pub fn handle_server_version(&self) -> String {
        self.context.config.server_version.clone()
    }

    /// Checks the client version against the configured minimum.
    ///
    /// Older clients get a `W:` warning; the handshake goes on regardless.
    pub fn handle_client_version(&self, version: &str) -> String {
        let minimum = &self.context.config.min_client_version;
        info!(client_version = version, "client version announced");
        match compare_versions(version, minimum) {
            Ordering::Less => {
                warn!(client_version = version, %minimum, "client below minimum version");
                format!("W:Upgrade required. Minimum version is {minimum}")
            }
            _ => String::new(),
        }
    }

    /// Authenticates the client.
    pub async fn handle_authenticate(&self, username: &str, password: &str) -> AuthenticateResult {
        let company_file = self.context.config.company_file.clone();
        match self.context.sessions.authenticate(username, password).await {
            Ok(session) => {
                self.context
                    .events
                    .record(EventRecord::success(
                        session.ticket.clone(),
                        EventKind::Authentication,
                        EventMetadata::default()
                            .with_username(username)
                            .with_company_file(company_file.as_str()),
                    ))
                    .await;
                AuthenticateResult::Ticket {
                    ticket: session.ticket.to_string(),
                    company_file,
                }
            }
            Err(ServerError::InvalidCredentials) => {
                self.context
                    .events
                    .record(EventRecord::error(
                        Ticket::from(""),
                        EventKind::Authentication,
                        EventMetadata::default()
                            .with_username(username)
                            .with_error("nvu", "invalid credentials"),
                    ))
                    .await;
                AuthenticateResult::InvalidUser
            }
            Err(err) => {
                warn!(username, error = %err, "could not open session");
                AuthenticateResult::Busy
            }
        }
    }

    /// Issues the next phase query, or `""` when there is nothing to ask.
    ///
    /// Unknown tickets and a request already in flight both answer `""`.
    pub async fn handle_send_request_xml(
        &self,
        ticket: &Ticket,
        company_file: &str,
    ) -> ServerResult<String> {
        let ctx = &self.context;
        let session = match ctx.sessions.lookup(ticket).await {
            Ok(session) => session,
            Err(err) => {
                info!(%ticket, error = %err, "sendRequestXML rejected");
                return Ok(String::new());
            }
        };
        let bound_file = if company_file.is_empty() {
            session.company_file.clone().unwrap_or_default()
        } else {
            match ctx.sessions.bind_company_file(ticket, company_file).await {
                Ok(session) => session.company_file.unwrap_or_default(),
                Err(err) => {
                    warn!(%ticket, error = %err, "company file not bound");
                    company_file.to_string()
                }
            }
        };

        let Some(phase) = ctx.planner.plan(ticket).await else {
            info!(%ticket, "all phases complete, nothing to request");
            self.set_state(ticket, SessionState::Finished).await;
            return Ok(String::new());
        };

        let cursor = match phase {
            Phase::Sales => ctx
                .events
                .last_completion(Phase::Sales)
                .await
                .map(|at| at.date_naive()),
            _ => None,
        };
        let query = build_phase_query(phase, cursor, &ctx.config.query);
        let request_id = query.request_id().clone();
        let query_xml = match query.to_qbxml(&ctx.config.query.qbxml_version) {
            Ok(xml) => xml,
            Err(err) => {
                error!(%ticket, %phase, error = %err, "failed to encode phase query");
                ctx.events
                    .record(EventRecord::error(
                        ticket.clone(),
                        EventKind::SendRequest,
                        EventMetadata::default()
                            .with_phase(phase)
                            .with_error("encode", err.to_string()),
                    ))
                    .await;
                return Err(err.into());
            }
        };

        let pending = PendingRequest {
            ticket: ticket.clone(),
            phase,
            request_id: request_id.clone(),
            query_xml: query_xml.clone(),
            issued_at: Utc::now(),
        };
        if let Err(err) = ctx.sessions.begin_request(pending).await {
            warn!(%ticket, %phase, error = %err, "request already pending, not reissuing");
            return Ok(String::new());
        }
        self.set_state(ticket, SessionState::AwaitingResponse(phase))
            .await;

        ctx.events
            .record(EventRecord::success(
                ticket.clone(),
                EventKind::SendRequest,
                EventMetadata::default()
                    .with_phase(phase)
                    .with_request_id(request_id.as_str())
                    .with_company_file(bound_file),
            ))
            .await;
        info!(%ticket, %phase, request_id = %request_id, "phase query issued");
        Ok(query_xml)
    }

    /// Consumes the response to the pending request.
    ///
    /// Returns the pipeline percentage on success and [`ABORT_SESSION`] on
    /// any failure, including an unknown ticket or nothing pending.
    pub async fn handle_receive_response_xml(
        &self,
        ticket: &Ticket,
        response: &str,
        hresult: Option<&str>,
        message: &str,
    ) -> i32 {
        let ctx = &self.context;
        if let Err(err) = ctx.sessions.lookup(ticket).await {
            info!(%ticket, error = %err, "receiveResponseXML rejected");
            return ABORT_SESSION;
        }
        let pending = match ctx.sessions.complete_request(ticket).await {
            Ok(pending) => pending,
            Err(err) => {
                warn!(%ticket, error = %err, "response without a pending request");
                return ABORT_SESSION;
            }
        };
        let phase = pending.phase;
        let metadata = EventMetadata::default()
            .with_phase(phase)
            .with_request_id(pending.request_id.as_str());

        if let Some(code) = hresult.filter(|h| *h != "0") {
            warn!(%ticket, %phase, hresult = code, message, "client reported an error");
            self.fail_phase(ticket, metadata.with_error(code, message)).await;
            return ABORT_SESSION;
        }

        let outcome = match evaluate_response(response) {
            Ok(parsed) => ctx.processor.process(ticket, phase, &parsed).await,
            Err(err) => Err(err),
        };
        let batch = match outcome {
            Ok(batch) => batch,
            Err(err) => {
                warn!(%ticket, %phase, error = %err, "phase response rejected");
                let (code, text) = match &err {
                    ServerError::Domain(info) => (info.code.clone(), info.message.clone()),
                    other => ("error".to_string(), other.to_string()),
                };
                self.fail_phase(ticket, metadata.with_error(code, text)).await;
                return ABORT_SESSION;
            }
        };

        let mut metadata = metadata.with_records(batch.records);
        if let Some(sales_type) = batch.sales_type {
            metadata = metadata.with_sales_type(sales_type);
        }
        ctx.events
            .record(EventRecord::success(
                ticket.clone(),
                EventKind::ReceiveResponse,
                metadata,
            ))
            .await;

        let state = match next_phase(Some(phase)) {
            Some(_) => SessionState::PhaseComplete(phase),
            None => SessionState::Finished,
        };
        self.set_state(ticket, state).await;
        info!(%ticket, %phase, records = batch.records, "phase complete");
        percent_complete(phase)
    }

    /// Acknowledges a client-side connection failure.
    ///
    /// The pending request is dropped so a retry can reissue it; the
    /// session itself stays open. Unknown tickets are logged all the same.
    pub async fn handle_connection_error(
        &self,
        ticket: &Ticket,
        hresult: &str,
        message: &str,
    ) -> String {
        warn!(%ticket, hresult, message, "client connection error");
        self.context.sessions.abandon_request(ticket).await;
        self.context
            .events
            .record(EventRecord::error(
                ticket.clone(),
                EventKind::ConnectionError,
                EventMetadata::default().with_error(hresult, message),
            ))
            .await;
        CONNECTION_ERROR_ACK.to_string()
    }

    /// Closes the session; always succeeds.
    pub async fn handle_close_connection(&self, ticket: &Ticket) -> String {
        self.context.sessions.close(ticket).await;
        self.context
            .events
            .record(EventRecord::success(
                ticket.clone(),
                EventKind::Close,
                EventMetadata::default(),
            ))
            .await;
        info!(%ticket, "session closed");
        CLOSE_CONNECTION_ACK.to_string()
    }

    async fn fail_phase(&self, ticket: &Ticket, metadata: EventMetadata) {
        self.context
            .events
            .record(EventRecord::error(
                ticket.clone(),
                EventKind::ReceiveResponse,
                metadata,
            ))
            .await;
        self.set_state(ticket, SessionState::Failed).await;
    }

    async fn set_state(&self, ticket: &Ticket, state: SessionState) {
        if let Err(err) = self.context.sessions.set_state(ticket, state).await {
            debug!(%ticket, error = %err, "session state not updated");
        }
    }
}

/// Parses a qbXML response and surfaces its embedded status error.
fn evaluate_response(raw: &str) -> ServerResult<QbxmlResponse> {
    let parsed = parse_qbxml_response(raw)?;
    match extract_error(&parsed) {
        Some(info) => Err(ServerError::Domain(info)),
        None => Ok(parsed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::event_log::{MemoryEventLog, Outcome};
    use crate::processor::RecordCountingProcessor;
    use crate::session::MemorySessionStore;

    const COMPANY_OK: &str = r#"<QBXML><QBXMLMsgsRs>
        <CompanyQueryRs requestID="r" statusCode="0" statusSeverity="Info" statusMessage="Status OK">
          <CompanyRet><CompanyName>Tile Shop</CompanyName></CompanyRet>
        </CompanyQueryRs>
    </QBXMLMsgsRs></QBXML>"#;

    const COMPANY_FAILED: &str = r#"<QBXML><QBXMLMsgsRs>
        <CompanyQueryRs requestID="r" statusCode="3100" statusSeverity="Error" statusMessage="Name in use"/>
    </QBXMLMsgsRs></QBXML>"#;

    struct Fixture {
        handler: RequestHandler,
        events: Arc<MemoryEventLog>,
    }

    fn fixture() -> Fixture {
        let config = ServerConfig::new(Credentials::new("qb_user", "correct"))
            .with_company_file("Tile.qbw");
        let events = Arc::new(MemoryEventLog::new());
        let context = HandlerContext::new(
            config,
            Arc::new(MemorySessionStore::new()),
            events.clone(),
            Arc::new(RecordCountingProcessor),
        );
        Fixture {
            handler: RequestHandler::new(Arc::new(context)),
            events,
        }
    }

    async fn login(handler: &RequestHandler) -> Ticket {
        match handler.handle_authenticate("qb_user", "correct").await {
            AuthenticateResult::Ticket { ticket, .. } => Ticket::from(ticket),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn client_version_warns_below_minimum() {
        let f = fixture();
        assert_eq!(f.handler.handle_client_version("2.0.0.0"), "");
        assert_eq!(f.handler.handle_client_version("2.1"), "");
        assert!(f.handler.handle_client_version("1.9.9.9").starts_with("W:"));
        assert_eq!(f.handler.handle_server_version(), "1.0.0");
    }

    #[tokio::test]
    async fn authenticate_returns_configured_company_file() {
        let f = fixture();
        match f.handler.handle_authenticate("qb_user", "correct").await {
            AuthenticateResult::Ticket { company_file, .. } => assert_eq!(company_file, "Tile.qbw"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            f.handler.handle_authenticate("qb_user", "nope").await,
            AuthenticateResult::InvalidUser
        );
        assert_eq!(f.events.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_send_while_pending_is_empty() {
        let f = fixture();
        let ticket = login(&f.handler).await;
        let first = f
            .handler
            .handle_send_request_xml(&ticket, "Tile.qbw")
            .await
            .unwrap();
        assert!(first.contains("CompanyQueryRq"));
        let second = f
            .handler
            .handle_send_request_xml(&ticket, "Tile.qbw")
            .await
            .unwrap();
        assert_eq!(second, "");
    }

    #[tokio::test]
    async fn receive_without_pending_aborts() {
        let f = fixture();
        let ticket = login(&f.handler).await;
        let code = f
            .handler
            .handle_receive_response_xml(&ticket, COMPANY_OK, Some("0"), "")
            .await;
        assert_eq!(code, ABORT_SESSION);
    }

    #[tokio::test]
    async fn status_error_fails_the_phase() {
        let f = fixture();
        let ticket = login(&f.handler).await;
        f.handler
            .handle_send_request_xml(&ticket, "Tile.qbw")
            .await
            .unwrap();
        let code = f
            .handler
            .handle_receive_response_xml(&ticket, COMPANY_FAILED, None, "")
            .await;
        assert_eq!(code, ABORT_SESSION);

        let history = f.events.events_for(&ticket).await.unwrap();
        let last = history.last().unwrap();
        assert_eq!(last.kind, EventKind::ReceiveResponse);
        assert_eq!(last.outcome, Outcome::Error);
        assert_eq!(last.metadata.code.as_deref(), Some("3100"));
        assert_eq!(last.metadata.error.as_deref(), Some("Name in use"));

        // The failed phase is retried.
        let retry = f
            .handler
            .handle_send_request_xml(&ticket, "Tile.qbw")
            .await
            .unwrap();
        assert!(retry.contains("CompanyQueryRq"));
    }

    #[tokio::test]
    async fn hresult_error_aborts() {
        let f = fixture();
        let ticket = login(&f.handler).await;
        f.handler
            .handle_send_request_xml(&ticket, "")
            .await
            .unwrap();
        let code = f
            .handler
            .handle_receive_response_xml(&ticket, "", Some("0x80040400"), "QuickBooks not running")
            .await;
        assert_eq!(code, ABORT_SESSION);
    }

    #[tokio::test]
    async fn empty_response_completes_the_phase() {
        let f = fixture();
        let ticket = login(&f.handler).await;
        f.handler
            .handle_send_request_xml(&ticket, "Tile.qbw")
            .await
            .unwrap();
        let code = f
            .handler
            .handle_receive_response_xml(&ticket, "", None, "")
            .await;
        assert_eq!(code, 25);
        let next = f
            .handler
            .handle_send_request_xml(&ticket, "Tile.qbw")
            .await
            .unwrap();
        assert!(next.contains("ItemQueryRq"));
    }

    #[tokio::test]
    async fn connection_error_clears_pending() {
        let f = fixture();
        let ticket = login(&f.handler).await;
        f.handler
            .handle_send_request_xml(&ticket, "Tile.qbw")
            .await
            .unwrap();
        let ack = f
            .handler
            .handle_connection_error(&ticket, "0x80040408", "could not start QuickBooks")
            .await;
        assert_eq!(ack, CONNECTION_ERROR_ACK);

        let reissued = f
            .handler
            .handle_send_request_xml(&ticket, "Tile.qbw")
            .await
            .unwrap();
        assert!(reissued.contains("CompanyQueryRq"));
    }

    #[tokio::test]
    async fn dispatch_covers_every_action() {
        let f = fixture();
        let result = f.handler.dispatch(ActionRequest::ServerVersion).await.unwrap();
        assert_eq!(result, ActionResult::ServerVersion("1.0.0".into()));

        let result = f
            .handler
            .dispatch(ActionRequest::CloseConnection {
                ticket: "unknown".into(),
            })
            .await
            .unwrap();
        assert_eq!(result, ActionResult::CloseConnection(CLOSE_CONNECTION_ACK.into()));

        let result = f
            .handler
            .dispatch(ActionRequest::ReceiveResponseXml {
                ticket: "unknown".into(),
                response: String::new(),
                hresult: None,
                message: String::new(),
            })
            .await
            .unwrap();
        assert_eq!(result, ActionResult::ReceiveResponseXml(ABORT_SESSION));
    }
}
