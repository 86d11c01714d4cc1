//! Listener callback surface

use serde::{Deserialize, Serialize};

use super::DispatchContext;
use crate::adapters::StreamStats;
use crate::call_log::CallLogStatus;
use crate::reason::{Reason, ReasonKind};
use crate::session::SessionSnapshot;
use crate::types::{CallState, Headers};

/// Context passed to [`CallSessionListener`] callbacks
pub type ListenerContext<'a> = DispatchContext<'a, dyn CallSessionListener>;

/// Tone triggers; playback itself belongs to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToneEvent {
    RingtoneStarted,
    RingtoneStopped,
    RingbackStarted,
    RingbackStopped,
    /// Outgoing call failed before establishment
    ErrorTone(ReasonKind),
}

/// Details of an authentication challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeContext {
    pub code: u16,
    pub realm: Option<String>,
}

/// Application callbacks; every method defaults to doing nothing
pub trait CallSessionListener: Send + Sync {
    fn on_state_changed(
        &self,
        _ctx: &ListenerContext<'_>,
        _session: &SessionSnapshot,
        _state: CallState,
        _message: &str,
    ) {
    }

    /// Terminal outcome, or the transient outcome of a failed renegotiation
    fn on_outcome_available(
        &self,
        _ctx: &ListenerContext<'_>,
        _session: &SessionSnapshot,
        _reason: &Reason,
        _status: CallLogStatus,
    ) {
    }

    fn on_acknowledgement(
        &self,
        _ctx: &ListenerContext<'_>,
        _session: &SessionSnapshot,
        _headers: &Headers,
        _is_incoming: bool,
    ) {
    }

    fn on_credential_challenge(
        &self,
        _ctx: &ListenerContext<'_>,
        _session: &SessionSnapshot,
        _challenge: &ChallengeContext,
    ) {
    }

    fn on_tone(&self, _ctx: &ListenerContext<'_>, _session: &SessionSnapshot, _tone: ToneEvent) {}

    fn on_stats_updated(
        &self,
        _ctx: &ListenerContext<'_>,
        _session: &SessionSnapshot,
        _stats: &StreamStats,
    ) {
    }
}

/// One notification, delivered to every listener in a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionNotification {
    StateChanged { state: CallState, message: String },
    OutcomeAvailable { reason: Reason, status: CallLogStatus },
    Acknowledgement { headers: Headers, is_incoming: bool },
    CredentialChallenge(ChallengeContext),
    Tone(ToneEvent),
    Stats(StreamStats),
}

impl SessionNotification {
    pub fn deliver(
        &self,
        listener: &dyn CallSessionListener,
        ctx: &ListenerContext<'_>,
        session: &SessionSnapshot,
    ) {
        match self {
            SessionNotification::StateChanged { state, message } => {
                listener.on_state_changed(ctx, session, *state, message)
            }
            SessionNotification::OutcomeAvailable { reason, status } => {
                listener.on_outcome_available(ctx, session, reason, *status)
            }
            SessionNotification::Acknowledgement {
                headers,
                is_incoming,
            } => listener.on_acknowledgement(ctx, session, headers, *is_incoming),
            SessionNotification::CredentialChallenge(challenge) => {
                listener.on_credential_challenge(ctx, session, challenge)
            }
            SessionNotification::Tone(tone) => listener.on_tone(ctx, session, *tone),
            SessionNotification::Stats(stats) => listener.on_stats_updated(ctx, session, stats),
        }
    }
}
