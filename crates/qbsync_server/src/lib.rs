//! # qbsync server
//!
//! Session orchestrator for the QuickBooks Web Connector (QBWC).
//!
//! This crate provides:
//! - Ticket-based sessions with a pluggable [`SessionStore`]
//! - An append-only sync event log behind a pluggable [`EventStore`]
//! - The phase planner (company, items, customers, sales)
//! - The protocol dispatcher, which maps every failure to a SOAP fault
//!   or a protocol sentinel
//!
//! # Architecture
//!
//! The HTTP binding stays outside this crate. [`SyncServer::handle_soap`]
//! takes the `SOAPAction` header and the request body and returns the
//! status and body to send back.
//!
//! All store calls are bounded by [`ServerConfig::store_timeout`]. A store
//! that fails or times out reads as "not found" or "empty": the client
//! sees "nothing to do this cycle", never a hang.
//!
//! # Protocol
//!
//! ```text
//! serverVersion -> clientVersion -> authenticate
//!     -> (sendRequestXML <-> receiveResponseXML)*
//!     -> closeConnection
//! ```
//!
//! `connectionError` may arrive at any point after `authenticate`; it
//! drops the pending request and leaves the session open.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod event_log;
mod handler;
mod planner;
mod processor;
mod server;
mod session;
mod store;

pub use config::{Credentials, ServerConfig, ENV_COMPANY_FILE, ENV_PASSWORD, ENV_USERNAME};
pub use error::{ServerError, ServerResult, SessionErrorKind, StoreError, StoreResult};
pub use event_log::{
    EventKind, EventMetadata, EventRecord, EventStore, MemoryEventLog, Outcome, SyncEvent,
    SyncEventLog,
};
pub use handler::{HandlerContext, RequestHandler};
pub use planner::{next_phase, percent_complete, ResumePoint, SyncPlanner};
pub use processor::{sales_type, PhaseProcessor, ProcessedBatch, RecordCountingProcessor};
pub use server::{ServerStatus, SoapResponse, SyncServer, SERVICE_NAME};
pub use session::{
    MemorySessionStore, PendingRequest, Session, SessionManager, SessionState, SessionStore,
    Ticket,
};
