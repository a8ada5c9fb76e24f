//! Session tickets, pending requests and their store.
//!
//! A session is created by a successful `authenticate` and lives until
//! `closeConnection`, TTL eviction or a restart. Each ticket may have at
//! most one pending qbXML request; a second request before the first is
//! answered is a protocol violation.

use crate::config::Credentials;
use crate::error::{ServerError, ServerResult, SessionErrorKind, StoreResult};
use crate::store::bounded;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use qbsync_protocol::{Phase, RequestId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Opaque session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ticket(String);

impl Ticket {
    /// Generates a new unguessable ticket.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the ticket text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Ticket {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Ticket {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Where a session is in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "phase")]
pub enum SessionState {
    /// Authenticated, no query issued yet.
    Authenticated,
    /// A query for this phase is out with the client.
    AwaitingResponse(Phase),
    /// The response for this phase was processed.
    PhaseComplete(Phase),
    /// Every phase is done.
    Finished,
    /// The last response carried an error.
    Failed,
}

/// A Web Connector session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session ticket.
    pub ticket: Ticket,
    /// Authenticated user.
    pub username: String,
    /// Company file, bound by the first `sendRequestXML`.
    pub company_file: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Handshake position.
    pub state: SessionState,
}

impl Session {
    /// Creates a freshly authenticated session.
    pub fn new(ticket: Ticket, username: impl Into<String>) -> Self {
        Self {
            ticket,
            username: username.into(),
            company_file: None,
            created_at: Utc::now(),
            state: SessionState::Authenticated,
        }
    }

    /// Returns true if the session is older than `ttl` at `now`.
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        (now - self.created_at)
            .to_std()
            .map(|age| age > ttl)
            .unwrap_or(false)
    }
}

/// A qbXML request issued to the client and not yet answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Owning session.
    pub ticket: Ticket,
    /// Phase the request belongs to.
    pub phase: Phase,
    /// Request identifier inside the qbXML.
    pub request_id: RequestId,
    /// The qbXML document sent.
    pub query_xml: String,
    /// When it was issued.
    pub issued_at: DateTime<Utc>,
}

/// Keyed storage for sessions and pending requests.
///
/// Implementations must tolerate concurrent calls for unrelated tickets.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetches a session.
    async fn get(&self, ticket: &Ticket) -> StoreResult<Option<Session>>;

    /// Inserts or replaces a session.
    async fn put(&self, session: Session) -> StoreResult<()>;

    /// Replaces a session only if its ticket is still stored; returns
    /// whether it was replaced. A deleted ticket must stay deleted.
    async fn update(&self, session: Session) -> StoreResult<bool>;

    /// Removes a session and its pending request. Missing tickets are fine.
    async fn delete(&self, ticket: &Ticket) -> StoreResult<()>;

    /// Lists the stored tickets.
    async fn tickets(&self) -> StoreResult<Vec<Ticket>>;

    /// Stores a pending request; returns whether it was stored.
    ///
    /// Refused when one is already pending or the ticket has no session,
    /// checked atomically with respect to `delete`.
    async fn insert_pending(&self, pending: PendingRequest) -> StoreResult<bool>;

    /// Removes and returns the pending request.
    async fn take_pending(&self, ticket: &Ticket) -> StoreResult<Option<PendingRequest>>;
}

/// In-process session store for single-instance deployments.
///
/// Locks are always taken sessions first, then pending.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Ticket, Session>>,
    pending: RwLock<HashMap<Ticket, PendingRequest>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns true if no session is stored.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, ticket: &Ticket) -> StoreResult<Option<Session>> {
        Ok(self.sessions.read().get(ticket).cloned())
    }

    async fn put(&self, session: Session) -> StoreResult<()> {
        self.sessions.write().insert(session.ticket.clone(), session);
        Ok(())
    }

    async fn update(&self, session: Session) -> StoreResult<bool> {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(&session.ticket) {
            Some(stored) => {
                *stored = session;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, ticket: &Ticket) -> StoreResult<()> {
        let mut sessions = self.sessions.write();
        let mut pending = self.pending.write();
        sessions.remove(ticket);
        pending.remove(ticket);
        Ok(())
    }

    async fn tickets(&self) -> StoreResult<Vec<Ticket>> {
        Ok(self.sessions.read().keys().cloned().collect())
    }

    async fn insert_pending(&self, pending: PendingRequest) -> StoreResult<bool> {
        let sessions = self.sessions.read();
        let mut map = self.pending.write();
        if !sessions.contains_key(&pending.ticket) || map.contains_key(&pending.ticket) {
            return Ok(false);
        }
        map.insert(pending.ticket.clone(), pending);
        Ok(true)
    }

    async fn take_pending(&self, ticket: &Ticket) -> StoreResult<Option<PendingRequest>> {
        Ok(self.pending.write().remove(ticket))
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

/// Authenticates, issues and retires session tickets.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    credentials: Credentials,
    ttl: Duration,
    timeout: Duration,
}

impl SessionManager {
    /// Creates a session manager over `store`.
    pub fn new(
        store: Arc<dyn SessionStore>,
        credentials: Credentials,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            credentials,
            ttl,
            timeout,
        }
    }

    /// Checks credentials and opens a session.
    ///
    /// A mismatch is [`ServerError::InvalidCredentials`] and creates nothing.
    pub async fn authenticate(&self, username: &str, password: &str) -> ServerResult<Session> {
        // Compare fixed-size digests so the check does not short-circuit on length.
        let user_ok = digest(username) == digest(&self.credentials.username);
        let password_ok = digest(password) == digest(&self.credentials.password);
        if !(user_ok & password_ok) {
            info!(username, "authentication rejected");
            return Err(ServerError::InvalidCredentials);
        }

        let session = Session::new(Ticket::generate(), username);
        bounded(self.timeout, self.store.put(session.clone())).await?;
        info!(ticket = %session.ticket, username, "session opened");
        Ok(session)
    }

    /// Resolves a live session.
    ///
    /// Store failures are reported as [`SessionErrorKind::NotFound`];
    /// expired sessions are evicted on sight.
    pub async fn lookup(&self, ticket: &Ticket) -> ServerResult<Session> {
        let found = match bounded(self.timeout, self.store.get(ticket)).await {
            Ok(found) => found,
            Err(err) => {
                warn!(%ticket, error = %err, "session lookup failed, treating as unknown");
                None
            }
        };
        let session =
            found.ok_or_else(|| ServerError::session(SessionErrorKind::NotFound, ticket.as_str()))?;

        if session.is_expired(self.ttl, Utc::now()) {
            info!(%ticket, "session expired");
            self.close(ticket).await;
            return Err(ServerError::session(
                SessionErrorKind::Expired,
                ticket.as_str(),
            ));
        }
        Ok(session)
    }

    /// Persists a modified session.
    ///
    /// A ticket closed since it was looked up is [`SessionErrorKind::NotFound`]
    /// and is not brought back.
    pub async fn save(&self, session: Session) -> ServerResult<()> {
        let ticket = session.ticket.clone();
        if bounded(self.timeout, self.store.update(session)).await? {
            Ok(())
        } else {
            debug!(%ticket, "session closed before it could be saved");
            Err(ServerError::session(
                SessionErrorKind::NotFound,
                ticket.as_str(),
            ))
        }
    }

    /// Binds the company file on first use.
    ///
    /// The binding is immutable; a different name later is ignored.
    pub async fn bind_company_file(&self, ticket: &Ticket, file_name: &str) -> ServerResult<Session> {
        let mut session = self.lookup(ticket).await?;
        match &session.company_file {
            None => {
                debug!(%ticket, company_file = file_name, "company file bound");
                session.company_file = Some(file_name.to_string());
                self.save(session.clone()).await?;
            }
            Some(bound) if bound != file_name => {
                warn!(%ticket, bound = %bound, requested = file_name, "ignoring company file change");
            }
            Some(_) => {}
        }
        Ok(session)
    }

    /// Moves a session to a new handshake state.
    pub async fn set_state(&self, ticket: &Ticket, state: SessionState) -> ServerResult<()> {
        let mut session = self.lookup(ticket).await?;
        session.state = state;
        self.save(session).await
    }

    /// Registers the request about to be sent.
    ///
    /// Fails if a request is already pending or the session is gone.
    pub async fn begin_request(&self, pending: PendingRequest) -> ServerResult<()> {
        let ticket = pending.ticket.clone();
        if bounded(self.timeout, self.store.insert_pending(pending)).await? {
            Ok(())
        } else {
            Err(ServerError::session(
                SessionErrorKind::ProtocolViolation,
                ticket.as_str(),
            ))
        }
    }

    /// Claims the pending request answered by a response.
    pub async fn complete_request(&self, ticket: &Ticket) -> ServerResult<PendingRequest> {
        bounded(self.timeout, self.store.take_pending(ticket))
            .await?
            .ok_or_else(|| ServerError::session(SessionErrorKind::ProtocolViolation, ticket.as_str()))
    }

    /// Drops any pending request, e.g. after a connection error.
    pub async fn abandon_request(&self, ticket: &Ticket) {
        match bounded(self.timeout, self.store.take_pending(ticket)).await {
            Ok(Some(pending)) => debug!(%ticket, phase = %pending.phase, "pending request dropped"),
            Ok(None) => {}
            Err(err) => warn!(%ticket, error = %err, "failed to drop pending request"),
        }
    }

    /// Closes a session. Unknown or already closed tickets are a no-op.
    pub async fn close(&self, ticket: &Ticket) {
        if let Err(err) = bounded(self.timeout, self.store.delete(ticket)).await {
            warn!(%ticket, error = %err, "failed to delete session");
        }
    }

    /// Evicts every expired session; returns how many were removed.
    pub async fn evict_expired(&self) -> usize {
        let tickets = match bounded(self.timeout, self.store.tickets()).await {
            Ok(tickets) => tickets,
            Err(err) => {
                warn!(error = %err, "session sweep skipped");
                return 0;
            }
        };

        let now = Utc::now();
        let mut evicted = 0;
        for ticket in tickets {
            let expired = matches!(
                bounded(self.timeout, self.store.get(&ticket)).await,
                Ok(Some(session)) if session.is_expired(self.ttl, now)
            );
            if expired {
                self.close(&ticket).await;
                evicted += 1;
            }
        }
        if evicted > 0 {
            info!(evicted, "expired sessions evicted");
        }
        evicted
    }

    /// Counts stored sessions; store failures count as zero.
    pub async fn active_sessions(&self) -> usize {
        bounded(self.timeout, self.store.tickets())
            .await
            .map(|t| t.len())
            .unwrap_or(0)
    }
}
