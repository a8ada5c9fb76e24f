//! Main sync server.

use crate::config::ServerConfig;
use crate::event_log::{EventStore, MemoryEventLog};
use crate::handler::{HandlerContext, RequestHandler};
use crate::processor::{PhaseProcessor, RecordCountingProcessor};
use crate::session::{MemorySessionStore, SessionStore};
use chrono::{DateTime, Utc};
use qbsync_protocol::{
    build_fault, parse_envelope, resolve_action_name, Action, ActionRequest, FAULT_CLIENT_PARSE,
    FAULT_CLIENT_UNKNOWN_ACTION, FAULT_SERVER,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Name reported by [`SyncServer::status`].
pub const SERVICE_NAME: &str = "qbsync";

/// An HTTP-level reply: status code and SOAP body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapResponse {
    /// HTTP status; 200 unless even the envelope could not be built.
    pub status: u16,
    /// SOAP envelope (possibly a fault).
    pub body: String,
}

impl SoapResponse {
    fn ok(body: String) -> Self {
        Self { status: 200, body }
    }

    fn fault(code: &str, message: &str) -> Self {
        Self::ok(build_fault(code, message))
    }
}

/// Health snapshot of the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    /// Service name.
    pub service: String,
    /// Server version.
    pub version: String,
    /// Always `operational` while the server answers.
    pub status: String,
    /// Sessions currently held.
    pub active_sessions: usize,
    /// Last time any session completed a phase.
    pub last_sync: Option<DateTime<Utc>>,
}

/// The Web Connector sync server.
///
/// Transport-agnostic: the HTTP layer hands over the `SOAPAction` header
/// and the request body, and sends back whatever [`SoapResponse`] says.
///
/// # Example
///
/// ```
/// use qbsync_server::{Credentials, ServerConfig, SyncServer};
///
/// # tokio_test_block(async {
/// let server = SyncServer::new(ServerConfig::new(Credentials::new("user", "secret")));
/// let reply = server.handle_soap(Some("serverVersion"), "").await;
/// assert_eq!(reply.status, 200);
/// assert!(reply.body.contains("serverVersionResult"));
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f);
/// # }
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a server with in-memory stores and the counting processor.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_stores(
            config,
            Arc::new(MemorySessionStore::new()),
            Arc::new(MemoryEventLog::new()),
            Arc::new(RecordCountingProcessor),
        )
    }

    /// Creates a server over explicit stores and processor.
    pub fn with_stores(
        config: ServerConfig,
        session_store: Arc<dyn SessionStore>,
        event_store: Arc<dyn EventStore>,
        processor: Arc<dyn PhaseProcessor>,
    ) -> Self {
        let context = Arc::new(HandlerContext::new(
            config,
            session_store,
            event_store,
            processor,
        ));
        let handler = RequestHandler::new(Arc::clone(&context));
        Self { handler, context }
    }

    /// Returns the request handler.
    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    /// Returns the shared handler context.
    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.context
    }

    /// Handles one SOAP call.
    ///
    /// Never fails: malformed input, unknown actions and handler errors
    /// all come back as fault envelopes with status 200. Only a failure
    /// to build the response envelope itself yields a 500.
    pub async fn handle_soap(&self, soap_action: Option<&str>, body: &str) -> SoapResponse {
        let payload = match parse_envelope(body) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, excerpt = %err.excerpt, "unparseable SOAP request");
                return SoapResponse::fault(FAULT_CLIENT_PARSE, &err.to_string());
            }
        };

        let name = resolve_action_name(soap_action, &payload);
        let Some(action) = name.as_deref().and_then(Action::from_name) else {
            let shown = name.unwrap_or_default();
            warn!(action = %shown, "unknown SOAP action");
            return SoapResponse::fault(
                FAULT_CLIENT_UNKNOWN_ACTION,
                &format!("Unknown SOAP action: {shown}"),
            );
        };
        debug!(%action, "dispatching");

        let request = ActionRequest::from_payload(action, &payload);
        let result = match self.handler.dispatch(request).await {
            Ok(result) => result,
            Err(err) => {
                error!(%action, error = %err, "handler failed");
                return SoapResponse::fault(FAULT_SERVER, &err.to_string());
            }
        };

        match result.to_envelope() {
            Ok(body) => SoapResponse::ok(body),
            Err(err) => {
                error!(%action, error = %err, "failed to build response envelope");
                SoapResponse {
                    status: 500,
                    body: build_fault(FAULT_SERVER, &err.to_string()),
                }
            }
        }
    }

    /// Returns a health snapshot.
    pub async fn status(&self) -> ServerStatus {
        ServerStatus {
            service: SERVICE_NAME.to_string(),
            version: self.context.config.server_version.clone(),
            status: "operational".to_string(),
            active_sessions: self.context.sessions.active_sessions().await,
            last_sync: self.context.events.last_sync().await,
        }
    }

    /// Evicts expired sessions; meant to be called periodically.
    pub async fn sweep(&self) -> usize {
        self.context.sessions.evict_expired().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use qbsync_protocol::{ActionResult, AuthenticateResult};

    fn server() -> SyncServer {
        SyncServer::new(ServerConfig::new(Credentials::new("qb_user", "correct")))
    }

    async fn call(server: &SyncServer, request: ActionRequest) -> ActionResult {
        let reply = server
            .handle_soap(None, &request.to_envelope().unwrap())
            .await;
        assert_eq!(reply.status, 200);
        let payload = parse_envelope(&reply.body).unwrap();
        ActionResult::from_payload(request.action(), &payload).unwrap()
    }

    #[tokio::test]
    async fn malformed_body_is_a_client_fault() {
        let reply = server().handle_soap(Some("authenticate"), "<soap:Envelope><oops>").await;
        assert_eq!(reply.status, 200);
        let fault = parse_envelope(&reply.body).unwrap().fault().unwrap();
        assert_eq!(fault.code, FAULT_CLIENT_PARSE);
    }

    #[tokio::test]
    async fn unknown_action_is_a_fault() {
        let server = server();
        let reply = server.handle_soap(Some("\"getInteractiveURL\""), "").await;
        assert_eq!(reply.status, 200);
        let fault = parse_envelope(&reply.body).unwrap().fault().unwrap();
        assert_eq!(fault.code, FAULT_CLIENT_UNKNOWN_ACTION);
        assert!(fault.message.contains("getInteractiveURL"));

        let reply = server.handle_soap(None, "").await;
        let fault = parse_envelope(&reply.body).unwrap().fault().unwrap();
        assert_eq!(fault.code, FAULT_CLIENT_UNKNOWN_ACTION);
    }

    #[tokio::test]
    async fn action_from_header_with_namespace() {
        let reply = server()
            .handle_soap(Some("\"http://developer.intuit.com/serverVersion\""), "")
            .await;
        let payload = parse_envelope(&reply.body).unwrap();
        assert_eq!(payload.name(), Some("serverVersionResponse"));
        assert_eq!(payload.field("serverVersionResult"), Some("1.0.0"));
    }

    #[tokio::test]
    async fn invalid_user_is_not_a_fault() {
        let result = call(
            &server(),
            ActionRequest::Authenticate {
                username: "qb_user".into(),
                password: "wrong".into(),
            },
        )
        .await;
        assert_eq!(result, ActionResult::Authenticate(AuthenticateResult::InvalidUser));
    }

    #[tokio::test]
    async fn status_reports_sessions() {
        let server = server();
        let status = server.status().await;
        assert_eq!(status.active_sessions, 0);
        assert_eq!(status.last_sync, None);

        call(
            &server,
            ActionRequest::Authenticate {
                username: "qb_user".into(),
                password: "correct".into(),
            },
        )
        .await;
        let status = server.status().await;
        assert_eq!(status.active_sessions, 1);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["service"], "qbsync");
        assert_eq!(json["status"], "operational");
    }
}
