//! Sync planner: decides which phase to request next.
//!
//! The pipeline is fixed (company, items, customers, sales). Progress is
//! read from the event log, so a client that reconnects with a new
//! ticket starts over while one that keeps its ticket resumes.

use crate::event_log::SyncEventLog;
use crate::session::Ticket;
use qbsync_protocol::Phase;
use tracing::warn;

/// Returns the phase following `last_completed`.
///
/// `None` in means nothing has completed yet; `None` out means the
/// pipeline is done.
pub fn next_phase(last_completed: Option<Phase>) -> Option<Phase> {
    match last_completed {
        None => Some(Phase::ALL[0]),
        Some(phase) => Phase::ALL.get(phase.position() + 1).copied(),
    }
}

/// Continuation percentage reported after `phase` completes.
pub fn percent_complete(phase: Phase) -> i32 {
    let done = phase.position() as i32 + 1;
    done * 100 / Phase::ALL.len() as i32
}

/// Where a ticket's pipeline stands according to the event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumePoint {
    /// No phase has completed.
    Fresh,
    /// `Phase` was the last to complete.
    After(Phase),
    /// The stored phase value is not a known phase.
    Unrecognized(String),
}

impl ResumePoint {
    /// Interprets the phase text of the latest completed event.
    pub fn from_stored(phase: Option<&str>) -> Self {
        match phase {
            None => ResumePoint::Fresh,
            Some(raw) => raw
                .parse::<Phase>()
                .map(ResumePoint::After)
                .unwrap_or_else(|_| ResumePoint::Unrecognized(raw.to_string())),
        }
    }

    /// Returns the next phase to request.
    ///
    /// An unrecognized value restarts the pipeline.
    pub fn next(&self) -> Option<Phase> {
        match self {
            ResumePoint::Fresh => next_phase(None),
            ResumePoint::After(phase) => next_phase(Some(*phase)),
            ResumePoint::Unrecognized(_) => next_phase(None),
        }
    }
}

/// Planner bound to an event log.
#[derive(Clone)]
pub struct SyncPlanner {
    events: SyncEventLog,
}

impl SyncPlanner {
    /// Creates a planner reading progress from `events`.
    pub fn new(events: SyncEventLog) -> Self {
        Self { events }
    }

    /// Reads the resume point of a ticket.
    pub async fn resume_point(&self, ticket: &Ticket) -> ResumePoint {
        let stored = self.events.last_completed_phase(ticket).await;
        ResumePoint::from_stored(stored.as_deref())
    }

    /// Returns the phase to request next for `ticket`, or `None` when done.
    pub async fn plan(&self, ticket: &Ticket) -> Option<Phase> {
        let resume = self.resume_point(ticket).await;
        if let ResumePoint::Unrecognized(raw) = &resume {
            warn!(%ticket, stored = %raw, "unrecognized phase in event log, restarting pipeline");
        }
        resume.next()
    }
}
