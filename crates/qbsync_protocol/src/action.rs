//! Web Connector actions and their typed request/result payloads.

use crate::envelope::{build_envelope, build_request_envelope, ParsedPayload};
use crate::error::{CodecError, CodecResult};
use crate::xml::XmlElement;
use std::fmt;

/// Reserved `authenticate` result meaning "invalid user".
pub const INVALID_USER: &str = "nvu";

/// Reserved `authenticate` result asking the client to retry later.
pub const SERVER_BUSY: &str = "busy";

/// `receiveResponseXML` result asking the client to abort the session.
pub const ABORT_SESSION: i32 = -1;

/// `connectionError` result acknowledging the termination.
pub const CONNECTION_ERROR_ACK: &str = "done";

/// `closeConnection` result.
pub const CLOSE_CONNECTION_ACK: &str = "OK";

/// The closed set of operations a Web Connector may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// `serverVersion`
    ServerVersion,
    /// `clientVersion`
    ClientVersion,
    /// `authenticate`
    Authenticate,
    /// `sendRequestXML`
    SendRequestXml,
    /// `receiveResponseXML`
    ReceiveResponseXml,
    /// `connectionError`
    ConnectionError,
    /// `closeConnection`
    CloseConnection,
}

impl Action {
    /// Every action, in handshake order.
    pub const ALL: [Action; 7] = [
        Action::ServerVersion,
        Action::ClientVersion,
        Action::Authenticate,
        Action::SendRequestXml,
        Action::ReceiveResponseXml,
        Action::ConnectionError,
        Action::CloseConnection,
    ];

    /// Returns the wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ServerVersion => "serverVersion",
            Action::ClientVersion => "clientVersion",
            Action::Authenticate => "authenticate",
            Action::SendRequestXml => "sendRequestXML",
            Action::ReceiveResponseXml => "receiveResponseXML",
            Action::ConnectionError => "connectionError",
            Action::CloseConnection => "closeConnection",
        }
    }

    /// Looks up an action by its exact (case-sensitive) wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Action::ALL.into_iter().find(|a| a.as_str() == name)
    }

    /// Returns the name of the result element (`fooResult`).
    pub fn result_field(&self) -> String {
        format!("{}Result", self.as_str())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Determines the requested action name.
///
/// The `SOAPAction` header wins when present; quotes and any namespace URI
/// prefix are stripped (`"http://developer.intuit.com/authenticate"` is
/// `authenticate`). Otherwise the body's operation element names it.
pub fn resolve_action_name(soap_action: Option<&str>, payload: &ParsedPayload) -> Option<String> {
    let from_header = soap_action
        .map(|h| h.trim().trim_matches('"'))
        .map(|h| h.rsplit('/').next().unwrap_or(h).trim())
        .filter(|h| !h.is_empty());

    from_header
        .or_else(|| payload.name())
        .map(str::to_string)
}

/// A decoded inbound call.
///
/// Absent fields decode as empty strings: the Web Connector omits empty
/// elements, and an empty ticket is simply an unknown ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionRequest {
    /// Server version check.
    ServerVersion,
    /// Client announces its version.
    ClientVersion {
        /// Dotted client version.
        version: String,
    },
    /// Credential check.
    Authenticate {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// Client asks for the next qbXML request.
    SendRequestXml {
        /// Session ticket.
        ticket: String,
        /// Host/company/preferences response echo (ignored).
        hcp_response: String,
        /// Open company file path.
        company_file: String,
    },
    /// Client delivers the qbXML response.
    ReceiveResponseXml {
        /// Session ticket.
        ticket: String,
        /// qbXML response document (may be empty).
        response: String,
        /// Result code; absent or `"0"` means success.
        hresult: Option<String>,
        /// Error message accompanying a non-zero result.
        message: String,
    },
    /// Client could not reach QuickBooks.
    ConnectionError {
        /// Session ticket.
        ticket: String,
        /// Result code.
        hresult: String,
        /// Error message.
        message: String,
    },
    /// Client ends the session.
    CloseConnection {
        /// Session ticket.
        ticket: String,
    },
}

fn text(payload: &ParsedPayload, names: &[&str]) -> String {
    payload.first_field(names).unwrap_or_default().to_string()
}

impl ActionRequest {
    /// Decodes the inbound payload of `action`.
    pub fn from_payload(action: Action, payload: &ParsedPayload) -> Self {
        match action {
            Action::ServerVersion => ActionRequest::ServerVersion,
            Action::ClientVersion => ActionRequest::ClientVersion {
                version: text(payload, &["strVersion", "clientVersion"]),
            },
            Action::Authenticate => ActionRequest::Authenticate {
                username: text(payload, &["strUserName"]),
                password: text(payload, &["strPassword"]),
            },
            Action::SendRequestXml => ActionRequest::SendRequestXml {
                ticket: text(payload, &["ticket"]),
                hcp_response: text(payload, &["strHCPResponse", "hcpResponse"]),
                company_file: text(payload, &["strCompanyFileName", "companyFileName"]),
            },
            Action::ReceiveResponseXml => ActionRequest::ReceiveResponseXml {
                ticket: text(payload, &["ticket"]),
                response: text(payload, &["response"]),
                hresult: payload
                    .field("hresult")
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(str::to_string),
                message: text(payload, &["message"]),
            },
            Action::ConnectionError => ActionRequest::ConnectionError {
                ticket: text(payload, &["ticket"]),
                hresult: text(payload, &["hresult"]),
                message: text(payload, &["message"]),
            },
            Action::CloseConnection => ActionRequest::CloseConnection {
                ticket: text(payload, &["ticket"]),
            },
        }
    }

    /// Returns the action this request belongs to.
    pub fn action(&self) -> Action {
        match self {
            ActionRequest::ServerVersion => Action::ServerVersion,
            ActionRequest::ClientVersion { .. } => Action::ClientVersion,
            ActionRequest::Authenticate { .. } => Action::Authenticate,
            ActionRequest::SendRequestXml { .. } => Action::SendRequestXml,
            ActionRequest::ReceiveResponseXml { .. } => Action::ReceiveResponseXml,
            ActionRequest::ConnectionError { .. } => Action::ConnectionError,
            ActionRequest::CloseConnection { .. } => Action::CloseConnection,
        }
    }

    /// Encodes the request the way the Web Connector sends it.
    pub fn to_envelope(&self) -> CodecResult<String> {
        fn field(name: &str, value: &str) -> XmlElement {
            XmlElement::text_node(name, value)
        }
        let fields = match self {
            ActionRequest::ServerVersion => vec![],
            ActionRequest::ClientVersion { version } => vec![field("strVersion", version)],
            ActionRequest::Authenticate { username, password } => vec![
                field("strUserName", username),
                field("strPassword", password),
            ],
            ActionRequest::SendRequestXml {
                ticket,
                hcp_response,
                company_file,
            } => vec![
                field("ticket", ticket),
                field("strHCPResponse", hcp_response),
                field("strCompanyFileName", company_file),
                field("qbXMLCountry", "US"),
                field("qbXMLMajorVers", "13"),
                field("qbXMLMinorVers", "0"),
            ],
            ActionRequest::ReceiveResponseXml {
                ticket,
                response,
                hresult,
                message,
            } => vec![
                field("ticket", ticket),
                field("response", response),
                field("hresult", hresult.as_deref().unwrap_or_default()),
                field("message", message),
            ],
            ActionRequest::ConnectionError {
                ticket,
                hresult,
                message,
            } => vec![
                field("ticket", ticket),
                field("hresult", hresult),
                field("message", message),
            ],
            ActionRequest::CloseConnection { ticket } => vec![field("ticket", ticket)],
        };
        build_request_envelope(self.action().as_str(), fields)
    }
}

/// Outcome of `authenticate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticateResult {
    /// Credentials accepted.
    Ticket {
        /// The new session ticket.
        ticket: String,
        /// Company file to open; empty means "use the open file".
        company_file: String,
    },
    /// Credentials rejected; encoded with the [`INVALID_USER`] sentinel.
    InvalidUser,
    /// The session could not be opened right now; encoded with [`SERVER_BUSY`].
    Busy,
}

/// A typed outbound result, one variant per action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    /// Server version string.
    ServerVersion(String),
    /// Empty, or a `W:`/`E:` prefixed notice.
    ClientVersion(String),
    /// Ticket or invalid-user sentinel.
    Authenticate(AuthenticateResult),
    /// qbXML request, or empty when nothing is left to ask for.
    SendRequestXml(String),
    /// Percent complete (`0..=100`) or [`ABORT_SESSION`].
    ReceiveResponseXml(i32),
    /// Termination acknowledgement.
    ConnectionError(String),
    /// Close acknowledgement.
    CloseConnection(String),
}

impl ActionResult {
    /// Returns the action this result answers.
    pub fn action(&self) -> Action {
        match self {
            ActionResult::ServerVersion(_) => Action::ServerVersion,
            ActionResult::ClientVersion(_) => Action::ClientVersion,
            ActionResult::Authenticate(_) => Action::Authenticate,
            ActionResult::SendRequestXml(_) => Action::SendRequestXml,
            ActionResult::ReceiveResponseXml(_) => Action::ReceiveResponseXml,
            ActionResult::ConnectionError(_) => Action::ConnectionError,
            ActionResult::CloseConnection(_) => Action::CloseConnection,
        }
    }

    /// Encodes the result as a response envelope.
    pub fn to_envelope(&self) -> CodecResult<String> {
        let action = self.action();
        let name = action.result_field();
        let result = match self {
            ActionResult::Authenticate(auth) => {
                let (ticket, second) = match auth {
                    AuthenticateResult::Ticket {
                        ticket,
                        company_file,
                    } => (ticket.as_str(), company_file.as_str()),
                    AuthenticateResult::InvalidUser => ("", INVALID_USER),
                    AuthenticateResult::Busy => ("", SERVER_BUSY),
                };
                XmlElement::new(name)
                    .with_child(XmlElement::text_node("string", ticket))
                    .with_child(XmlElement::text_node("string", second))
            }
            ActionResult::ReceiveResponseXml(code) => XmlElement::text_node(name, code.to_string()),
            ActionResult::ServerVersion(s)
            | ActionResult::ClientVersion(s)
            | ActionResult::SendRequestXml(s)
            | ActionResult::ConnectionError(s)
            | ActionResult::CloseConnection(s) => XmlElement::text_node(name, s.as_str()),
        };
        build_envelope(action.as_str(), vec![result])
    }

    /// Decodes a response envelope payload for `action`, as a client would.
    pub fn from_payload(action: Action, payload: &ParsedPayload) -> CodecResult<Self> {
        let element = payload
            .element()
            .ok_or_else(|| CodecError::invalid_structure("empty response body"))?;
        if let Some(fault) = payload.fault() {
            return Err(CodecError::invalid_structure(format!(
                "fault {}: {}",
                fault.code, fault.message
            )));
        }
        let result_name = action.result_field();
        let result = element
            .child(&result_name)
            .ok_or_else(|| CodecError::missing_field(result_name.clone()))?;
        let text = result.text.clone();

        Ok(match action {
            Action::ServerVersion => ActionResult::ServerVersion(text),
            Action::ClientVersion => ActionResult::ClientVersion(text),
            Action::Authenticate => {
                let mut strings = result.children_named("string").map(|s| s.text.clone());
                let ticket = strings.next().unwrap_or_default();
                let second = strings.next().unwrap_or_default();
                ActionResult::Authenticate(match second.as_str() {
                    INVALID_USER => AuthenticateResult::InvalidUser,
                    SERVER_BUSY => AuthenticateResult::Busy,
                    _ => AuthenticateResult::Ticket {
                        ticket,
                        company_file: second,
                    },
                })
            }
            Action::SendRequestXml => ActionResult::SendRequestXml(text),
            Action::ReceiveResponseXml => {
                let code = text.trim().parse().map_err(|_| {
                    CodecError::invalid_structure(format!("non-numeric result {text:?}"))
                })?;
                ActionResult::ReceiveResponseXml(code)
            }
            Action::ConnectionError => ActionResult::ConnectionError(text),
            Action::CloseConnection => ActionResult::CloseConnection(text),
        })
    }
}
