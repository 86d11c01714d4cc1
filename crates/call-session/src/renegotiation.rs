//! Renegotiation bookkeeping
//!
//! At most one local update is in flight per session. Local requests made
//! while the peer's renegotiation is awaiting its acknowledgement are queued
//! and started in order once it completes. A resume issued while the pause
//! that precedes it is still in flight is collapsed into that pause: when
//! the pause is confirmed the session moves on to resuming without ever
//! settling in Paused.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

use crate::config::SessionConfig;
use crate::offer_answer::MediaDescription;
use crate::params::{MediaParameters, ParamDelta};
use crate::reason::Reason;
use crate::types::CallState;

/// What asked for a renegotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum UpdateTrigger {
    LocalPause,
    LocalResume,
    LocalParamChange,
    /// Publish connectivity results selected after establishment
    ConnectivityReinvite,
}

/// A local update that has been sent and not yet answered
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub trigger: UpdateTrigger,
    pub offer: MediaDescription,
    /// Local preferences that become current once the update succeeds
    pub params: MediaParameters,
    /// Stable state restored when the update is rejected
    pub return_state: CallState,
    /// A resume arrived while this pause was in flight
    pub resume_requested: bool,
    pub cancel_requested: bool,
    /// Set after a 491; the offer is re-sent once this passes
    pub retry_at: Option<DateTime<Utc>>,
    pub attempts: u32,
}

/// Peer renegotiation answered with a 2xx, waiting for its ACK
#[derive(Debug, Clone)]
pub enum RemoteUpdate {
    /// We answered their offer
    Answered {
        offer: MediaDescription,
        answer: MediaDescription,
    },
    /// They sent no offer; ours went out in the 2xx and the answer comes in
    /// the ACK
    AwaitingAnswer {
        offer: MediaDescription,
        return_state: CallState,
    },
}

/// A local request deferred behind a peer renegotiation
#[derive(Debug, Clone)]
pub struct QueuedUpdate {
    pub trigger: UpdateTrigger,
    pub delta: ParamDelta,
}

/// Decision for a new local update request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Start,
    Queue,
    /// Folded into the in-flight update; nothing new is sent
    Collapse,
    Reject,
}

/// Result of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    AlreadyCompleted,
}

#[derive(Debug, Default)]
pub struct RenegotiationState {
    pending: Option<PendingUpdate>,
    remote: Option<RemoteUpdate>,
    queue: VecDeque<QueuedUpdate>,
    last_outcome: Option<Reason>,
}

impl RenegotiationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Option<&PendingUpdate> {
        self.pending.as_ref()
    }

    pub fn pending_mut(&mut self) -> Option<&mut PendingUpdate> {
        self.pending.as_mut()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn remote_pending(&self) -> bool {
        self.remote.is_some()
    }

    /// Outcome of the last failed renegotiation
    pub fn last_outcome(&self) -> Option<&Reason> {
        self.last_outcome.as_ref()
    }

    pub fn admit(&mut self, trigger: UpdateTrigger) -> Admission {
        if let Some(pending) = self.pending.as_mut() {
            return match (pending.trigger, trigger) {
                (UpdateTrigger::LocalPause, UpdateTrigger::LocalResume) => {
                    debug!("Resume requested while pause in flight, collapsing");
                    pending.resume_requested = true;
                    Admission::Collapse
                }
                (UpdateTrigger::LocalPause, UpdateTrigger::LocalPause) => {
                    if pending.resume_requested {
                        debug!("Pause requested again, dropping collapsed resume");
                        pending.resume_requested = false;
                    }
                    Admission::Collapse
                }
                (UpdateTrigger::LocalResume, UpdateTrigger::LocalResume) => Admission::Collapse,
                (_, UpdateTrigger::ConnectivityReinvite) => Admission::Queue,
                _ => Admission::Reject,
            };
        }
        if self.remote.is_some() {
            return Admission::Queue;
        }
        Admission::Start
    }

    pub fn enqueue(&mut self, trigger: UpdateTrigger, delta: ParamDelta) {
        debug!("Queueing {} behind renegotiation in progress", trigger);
        self.queue.push_back(QueuedUpdate { trigger, delta });
    }

    /// Next queued request, if nothing is in flight
    pub fn next_queued(&mut self) -> Option<QueuedUpdate> {
        if self.pending.is_some() || self.remote.is_some() {
            return None;
        }
        self.queue.pop_front()
    }

    pub fn begin(&mut self, pending: PendingUpdate) {
        self.pending = Some(pending);
    }

    pub fn take_pending(&mut self) -> Option<PendingUpdate> {
        self.pending.take()
    }

    pub fn begin_remote(&mut self, remote: RemoteUpdate) {
        self.remote = Some(remote);
    }

    pub fn take_remote(&mut self) -> Option<RemoteUpdate> {
        self.remote.take()
    }

    pub fn record_failure(&mut self, reason: Reason) {
        self.last_outcome = Some(reason);
    }

    /// Arm the glare back-off on the pending update
    pub fn schedule_retry(&mut self, now: DateTime<Utc>, config: &SessionConfig) -> Option<Duration> {
        let pending = self.pending.as_mut()?;
        let delay = glare_backoff(config);
        pending.retry_at = Some(now + chrono::Duration::milliseconds(delay.as_millis() as i64));
        pending.attempts += 1;
        Some(delay)
    }

    /// Pending update whose back-off has elapsed; clears the timer
    pub fn due_retry(&mut self, now: DateTime<Utc>) -> Option<&PendingUpdate> {
        let pending = self.pending.as_mut()?;
        match pending.retry_at {
            Some(at) if at <= now => {
                pending.retry_at = None;
                Some(pending)
            }
            _ => None,
        }
    }

    /// Drop everything; used when the session terminates
    pub fn clear(&mut self) {
        self.pending = None;
        self.remote = None;
        self.queue.clear();
    }
}

/// Random delay inside the configured glare window
pub fn glare_backoff(config: &SessionConfig) -> Duration {
    let ms = rand::thread_rng().gen_range(config.glare_retry_min_ms..=config.glare_retry_max_ms);
    Duration::from_millis(ms)
}
