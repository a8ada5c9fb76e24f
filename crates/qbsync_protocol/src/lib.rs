//! # qbsync protocol
//!
//! Wire types and codecs for the QuickBooks Web Connector (QBWC) protocol.
//!
//! This crate provides:
//! - A small owned XML tree over `quick-xml` ([`XmlElement`])
//! - SOAP envelope parsing and building, including faults
//! - Typed action requests and results ([`ActionRequest`], [`ActionResult`])
//! - qbXML phase queries ([`QueryPayload`]) and response parsing
//!   ([`QbxmlResponse`], [`extract_error`])
//! - Dotted version comparison for the `clientVersion` check
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Wire layering
//!
//! ```text
//! HTTP body ── SOAP Envelope ── Body ── <action> ── fields
//!                                                    └─ qbXML document (escaped text)
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod action;
mod envelope;
mod error;
mod phase;
mod qbxml;
mod version;
mod xml;

pub use action::{
    resolve_action_name, Action, ActionRequest, ActionResult, AuthenticateResult, ABORT_SESSION,
    CLOSE_CONNECTION_ACK, CONNECTION_ERROR_ACK, INVALID_USER, SERVER_BUSY,
};
pub use envelope::{
    build_envelope, build_fault, build_request_envelope, parse_envelope, response_element_name,
    Fault, ParsedPayload, FAULT_CLIENT_PARSE, FAULT_CLIENT_UNKNOWN_ACTION, FAULT_SERVER, QBWC_NS,
    SOAP_ENVELOPE_NS,
};
pub use error::{CodecError, CodecResult, ParseError};
pub use phase::Phase;
pub use qbxml::{
    build_phase_query, extract_error, format_qb_date, parse_qb_date, parse_qbxml_response,
    ErrorInfo, QbxmlResponse, QueryOptions, QueryPayload, RequestId, ResponseKind, ResponseSet,
    StatusInfo,
};
pub use version::compare_versions;
pub use xml::{local_name, parse_document, XmlElement};
