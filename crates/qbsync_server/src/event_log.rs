//! Append-only sync event log.
//!
//! Every handshake step is recorded with its outcome. The most recent
//! successful `receive_response` event of a ticket is its resume point:
//! the phase it carries is the last completed one.

use crate::error::StoreResult;
use crate::session::Ticket;
use crate::store::bounded;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use qbsync_protocol::Phase;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// `authenticate`
    Authentication,
    /// `sendRequestXML`
    SendRequest,
    /// `receiveResponseXML`
    ReceiveResponse,
    /// `connectionError`
    ConnectionError,
    /// `closeConnection`
    Close,
}

impl EventKind {
    /// Returns the stored name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Authentication => "authentication",
            EventKind::SendRequest => "send_request",
            EventKind::ReceiveResponse => "receive_response",
            EventKind::ConnectionError => "connection_error",
            EventKind::Close => "close",
        }
    }
}

/// Success or failure of the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The step succeeded.
    Success,
    /// The step failed.
    Error,
}

/// Structured details of an event.
///
/// `phase` is kept as text: stores may hold values written by older
/// versions, which the planner has to cope with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Phase tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Records processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records: Option<usize>,
    /// `receipt`, `invoice`, or both comma-separated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sales_type: Option<String>,
    /// qbXML request identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Result or status code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Company file in use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_file: Option<String>,
    /// Authenticating user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl EventMetadata {
    /// Sets the phase.
    pub fn with_phase(mut self, phase: impl ToString) -> Self {
        self.phase = Some(phase.to_string());
        self
    }

    /// Sets the record count.
    pub fn with_records(mut self, records: usize) -> Self {
        self.records = Some(records);
        self
    }

    /// Sets the kind of sales documents pulled.
    pub fn with_sales_type(mut self, sales_type: impl Into<String>) -> Self {
        self.sales_type = Some(sales_type.into());
        self
    }

    /// Sets the qbXML request identifier.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Sets the error code and text.
    pub fn with_error(mut self, code: impl Into<String>, error: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self.error = Some(error.into());
        self
    }

    /// Sets the company file.
    pub fn with_company_file(mut self, company_file: impl Into<String>) -> Self {
        self.company_file = Some(company_file.into());
        self
    }

    /// Sets the user name.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

/// An event to append; the store stamps sequence and time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Ticket the event belongs to (may be unknown or empty).
    pub ticket: Ticket,
    /// What happened.
    pub kind: EventKind,
    /// How it went.
    pub outcome: Outcome,
    /// Details.
    pub metadata: EventMetadata,
}

impl EventRecord {
    /// A successful event.
    pub fn success(ticket: Ticket, kind: EventKind, metadata: EventMetadata) -> Self {
        Self {
            ticket,
            kind,
            outcome: Outcome::Success,
            metadata,
        }
    }

    /// A failed event.
    pub fn error(ticket: Ticket, kind: EventKind, metadata: EventMetadata) -> Self {
        Self {
            ticket,
            kind,
            outcome: Outcome::Error,
            metadata,
        }
    }

    /// Returns true if this event completes a data phase.
    pub fn is_data_sync(&self) -> bool {
        self.kind == EventKind::ReceiveResponse && self.outcome == Outcome::Success
    }
}

/// An immutable, stamped log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Position in the log; strictly increasing.
    pub sequence: u64,
    /// Ticket the event belongs to.
    pub ticket: Ticket,
    /// What happened.
    pub kind: EventKind,
    /// How it went.
    pub outcome: Outcome,
    /// Details.
    pub metadata: EventMetadata,
    /// When it was appended.
    pub created_at: DateTime<Utc>,
}

/// Backing store of the event log.
///
/// The "latest" queries must be answered from an index, never by
/// scanning the whole log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends an event.
    async fn append(&self, record: EventRecord) -> StoreResult<SyncEvent>;

    /// Returns the most recent successful data-sync event of a ticket.
    async fn latest_data_sync(&self, ticket: &Ticket) -> StoreResult<Option<SyncEvent>>;

    /// Returns the most recent successful data-sync event of any ticket.
    async fn latest_success(&self) -> StoreResult<Option<SyncEvent>>;

    /// Returns the most recent completion of `phase` by any ticket.
    async fn latest_completion(&self, phase: &str) -> StoreResult<Option<SyncEvent>>;

    /// Returns a ticket's events in log order.
    async fn events_for(&self, ticket: &Ticket) -> StoreResult<Vec<SyncEvent>>;
}

#[derive(Default)]
struct LogInner {
    events: Vec<SyncEvent>,
    by_ticket: HashMap<Ticket, Vec<usize>>,
    latest_data_sync: HashMap<Ticket, usize>,
    latest_by_phase: HashMap<String, usize>,
    latest_success: Option<usize>,
}

/// In-process event store.
#[derive(Default)]
pub struct MemoryEventLog {
    inner: RwLock<LogInner>,
}

impl MemoryEventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of events.
    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    /// Returns true if nothing was logged.
    pub fn is_empty(&self) -> bool {
        self.inner.read().events.is_empty()
    }

    /// Appends an event with an explicit phase string, bypassing typing.
    ///
    /// Lets tests and migrations plant legacy values.
    pub fn append_raw(&self, ticket: Ticket, phase: &str) -> SyncEvent {
        let record = EventRecord::success(
            ticket,
            EventKind::ReceiveResponse,
            EventMetadata {
                phase: Some(phase.to_string()),
                ..EventMetadata::default()
            },
        );
        self.insert(record)
    }

    fn insert(&self, record: EventRecord) -> SyncEvent {
        let mut inner = self.inner.write();
        let index = inner.events.len();
        let data_sync = record.is_data_sync();
        let event = SyncEvent {
            sequence: index as u64 + 1,
            ticket: record.ticket,
            kind: record.kind,
            outcome: record.outcome,
            metadata: record.metadata,
            created_at: Utc::now(),
        };

        inner
            .by_ticket
            .entry(event.ticket.clone())
            .or_default()
            .push(index);
        if data_sync {
            inner.latest_data_sync.insert(event.ticket.clone(), index);
            if let Some(phase) = &event.metadata.phase {
                inner.latest_by_phase.insert(phase.clone(), index);
            }
            inner.latest_success = Some(index);
        }
        inner.events.push(event.clone());
        event
    }
}

#[async_trait]
impl EventStore for MemoryEventLog {
    async fn append(&self, record: EventRecord) -> StoreResult<SyncEvent> {
        Ok(self.insert(record))
    }

    async fn latest_data_sync(&self, ticket: &Ticket) -> StoreResult<Option<SyncEvent>> {
        let inner = self.inner.read();
        Ok(inner
            .latest_data_sync
            .get(ticket)
            .and_then(|&i| inner.events.get(i))
            .cloned())
    }

    async fn latest_success(&self) -> StoreResult<Option<SyncEvent>> {
        let inner = self.inner.read();
        Ok(inner.latest_success.and_then(|i| inner.events.get(i)).cloned())
    }

    async fn latest_completion(&self, phase: &str) -> StoreResult<Option<SyncEvent>> {
        let inner = self.inner.read();
        Ok(inner
            .latest_by_phase
            .get(phase)
            .and_then(|&i| inner.events.get(i))
            .cloned())
    }

    async fn events_for(&self, ticket: &Ticket) -> StoreResult<Vec<SyncEvent>> {
        let inner = self.inner.read();
        Ok(inner
            .by_ticket
            .get(ticket)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|&i| inner.events.get(i))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Event log facade used by the dispatcher.
///
/// Logging never fails a protocol call: store errors and timeouts are
/// reported through `tracing` and read back as "nothing logged".
#[derive(Clone)]
pub struct SyncEventLog {
    store: Arc<dyn EventStore>,
    timeout: Duration,
}

impl SyncEventLog {
    /// Wraps a store, bounding each call by `timeout`.
    pub fn new(store: Arc<dyn EventStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Appends an event; returns it unless the store failed.
    pub async fn record(&self, record: EventRecord) -> Option<SyncEvent> {
        let kind = record.kind;
        let ticket = record.ticket.clone();
        match bounded(self.timeout, self.store.append(record)).await {
            Ok(event) => Some(event),
            Err(err) => {
                warn!(%ticket, kind = kind.as_str(), error = %err, "failed to record sync event");
                None
            }
        }
    }

    /// Returns the phase text of the ticket's latest completed phase.
    pub async fn last_completed_phase(&self, ticket: &Ticket) -> Option<String> {
        match bounded(self.timeout, self.store.latest_data_sync(ticket)).await {
            Ok(event) => event.and_then(|e| e.metadata.phase),
            Err(err) => {
                warn!(%ticket, error = %err, "resume point unavailable, treating as fresh");
                None
            }
        }
    }

    /// Returns when any ticket last completed a phase.
    pub async fn last_sync(&self) -> Option<DateTime<Utc>> {
        match bounded(self.timeout, self.store.latest_success()).await {
            Ok(event) => event.map(|e| e.created_at),
            Err(err) => {
                warn!(error = %err, "last sync time unavailable");
                None
            }
        }
    }

    /// Returns when `phase` last completed for any ticket.
    pub async fn last_completion(&self, phase: Phase) -> Option<DateTime<Utc>> {
        match bounded(self.timeout, self.store.latest_completion(phase.as_str())).await {
            Ok(event) => event.map(|e| e.created_at),
            Err(err) => {
                warn!(%phase, error = %err, "phase completion time unavailable");
                None
            }
        }
    }

    /// Returns a ticket's events, or nothing if the store failed.
    pub async fn history(&self, ticket: &Ticket) -> Vec<SyncEvent> {
        match bounded(self.timeout, self.store.events_for(ticket)).await {
            Ok(events) => events,
            Err(err) => {
                warn!(%ticket, error = %err, "event history unavailable");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    fn completed(ticket: &str, phase: Phase) -> EventRecord {
        EventRecord::success(
            Ticket::from(ticket),
            EventKind::ReceiveResponse,
            EventMetadata::default().with_phase(phase).with_records(3),
        )
    }

    struct BrokenStore;

    #[async_trait]
    impl EventStore for BrokenStore {
        async fn append(&self, _: EventRecord) -> StoreResult<SyncEvent> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn latest_data_sync(&self, _: &Ticket) -> StoreResult<Option<SyncEvent>> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn latest_success(&self) -> StoreResult<Option<SyncEvent>> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn latest_completion(&self, _: &str) -> StoreResult<Option<SyncEvent>> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn events_for(&self, _: &Ticket) -> StoreResult<Vec<SyncEvent>> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn sequences_increase() {
        let log = MemoryEventLog::new();
        let a = log.append(completed("t1", Phase::Company)).await.unwrap();
        let b = log.append(completed("t2", Phase::Company)).await.unwrap();
        let c = log.append(completed("t1", Phase::Items)).await.unwrap();
        assert!(a.sequence < b.sequence && b.sequence < c.sequence);
        assert_eq!(log.len(), 3);
    }

    #[tokio::test]
    async fn latest_data_sync_ignores_failures_and_other_kinds() {
        let log = MemoryEventLog::new();
        let ticket = Ticket::from("t1");
        log.append(completed("t1", Phase::Company)).await.unwrap();
        log.append(EventRecord::error(
            ticket.clone(),
            EventKind::ReceiveResponse,
            EventMetadata::default()
                .with_phase(Phase::Items)
                .with_error("3100", "bad"),
        ))
        .await
        .unwrap();
        log.append(EventRecord::success(
            ticket.clone(),
            EventKind::SendRequest,
            EventMetadata::default().with_phase(Phase::Items),
        ))
        .await
        .unwrap();

        let latest = log.latest_data_sync(&ticket).await.unwrap().unwrap();
        assert_eq!(latest.metadata.phase.as_deref(), Some("company"));
        assert_eq!(log.events_for(&ticket).await.unwrap().len(), 3);
        assert!(log
            .latest_data_sync(&Ticket::from("other"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn latest_is_the_most_recent() {
        let log = MemoryEventLog::new();
        for phase in Phase::ALL {
            log.append(completed("t1", phase)).await.unwrap();
        }
        let latest = log.latest_data_sync(&Ticket::from("t1")).await.unwrap().unwrap();
        assert_eq!(latest.metadata.phase.as_deref(), Some("sales"));
        assert_eq!(log.latest_success().await.unwrap(), Some(latest));

        let items = log.latest_completion("items").await.unwrap().unwrap();
        assert_eq!(items.sequence, 2);
        assert!(log.latest_completion("bogus").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn facade_swallows_store_failures() {
        let log = SyncEventLog::new(Arc::new(BrokenStore), Duration::from_secs(1));
        let ticket = Ticket::from("t1");
        assert!(log.record(completed("t1", Phase::Company)).await.is_none());
        assert!(log.last_completed_phase(&ticket).await.is_none());
        assert!(log.last_sync().await.is_none());
        assert!(log.last_completion(Phase::Sales).await.is_none());
        assert!(log.history(&ticket).await.is_empty());
    }

    #[test]
    fn metadata_omits_absent_fields() {
        let metadata = EventMetadata::default()
            .with_phase(Phase::Sales)
            .with_records(2)
            .with_sales_type("invoice");
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"phase": "sales", "records": 2, "sales_type": "invoice"})
        );
    }
}
