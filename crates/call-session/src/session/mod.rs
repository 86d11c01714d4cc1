//! Call session
//!
//! One [`CallSession`] per call attempt. A session owns its state, three
//! views of the media parameters (local preferences, what the peer
//! announced, what was last confirmed by both sides), the call log and a
//! listener set of its own. Every mutation goes through the
//! [`SessionRegistry`](crate::registry::SessionRegistry), which hands each
//! operation a [`SessionEnv`] carrying the collaborators.
//!
//! Applications observe sessions through a [`SessionHandle`], a read-only
//! view republished after every change.

mod incoming;
mod outgoing;
mod teardown;
pub mod state;
mod update;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::adapters::{MediaEngine, OutgoingRequest, SignalingTransport};
use crate::call_log::{CallLog, CallLogStatus, CallLogStore};
use crate::config::SessionConfig;
use crate::early_media::{EarlyMediaAction, EarlyMediaController};
use crate::errors::{MediaError, SessionError, SessionResult, TransportError};
use crate::events::{MediaEvent, SignalingEvent};
use crate::notify::{
    CallSessionListener, ChallengeContext, ListenerId, ListenerSet, SessionNotification,
};
use crate::offer_answer::{MediaDescription, Negotiator};
use crate::params::MediaParameters;
use crate::reason::{
    Leg, MappedOutcome, Reason, ReasonKind, TerminalOutcome, TerminalPath, map_outcome,
};
use crate::renegotiation::{RemoteUpdate, RenegotiationState};
use crate::types::{CallDirection, CallState, DialogId, ForkId, SessionId};

pub use crate::renegotiation::CancelOutcome;

/// Collaborators and clock for one engine step
pub struct SessionEnv<'a> {
    pub transport: &'a dyn SignalingTransport,
    pub media: &'a dyn MediaEngine,
    pub log_store: &'a dyn CallLogStore,
    pub config: &'a SessionConfig,
    pub negotiator: &'a Negotiator,
    /// Registry-wide listeners, notified after the session's own
    pub listeners: &'a ListenerSet<dyn CallSessionListener>,
    pub now: DateTime<Utc>,
}

/// Read-only view of a session at one point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub direction: CallDirection,
    pub dialog: Option<DialogId>,
    pub from: String,
    pub to: String,
    pub state: CallState,
    pub previous_state: CallState,
    pub reason: Option<Reason>,
    /// Outcome of the last failed renegotiation; never ends the session
    pub last_renegotiation_outcome: Option<Reason>,
    pub local_params: MediaParameters,
    pub remote_params: Option<MediaParameters>,
    pub current_params: Option<MediaParameters>,
    pub log: CallLog,
    pub microphone_muted: bool,
}

/// Application-facing handle on a session
///
/// Cheap to clone and valid after the session has been released; it then
/// shows the final snapshot.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    view: Arc<RwLock<SessionSnapshot>>,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.view.read().clone()
    }

    pub fn state(&self) -> CallState {
        self.view.read().state
    }

    pub fn reason(&self) -> Option<Reason> {
        self.view.read().reason.clone()
    }

    pub fn local_params(&self) -> MediaParameters {
        self.view.read().local_params.clone()
    }

    pub fn remote_params(&self) -> Option<MediaParameters> {
        self.view.read().remote_params.clone()
    }

    /// Parameters confirmed by both sides, `None` before the first round
    pub fn current_params(&self) -> Option<MediaParameters> {
        self.view.read().current_params.clone()
    }

    pub fn call_log(&self) -> CallLog {
        self.view.read().log.clone()
    }

    pub fn last_renegotiation_outcome(&self) -> Option<Reason> {
        self.view.read().last_renegotiation_outcome.clone()
    }
}

/// How a terminal outcome lands in the call log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogDisposition {
    /// Status for a session that never connected; connected ones keep Success
    Status(CallLogStatus),
    /// Forking outcome; replaces Success
    Elsewhere(CallLogStatus),
}

#[derive(Debug, Clone)]
pub(crate) struct Termination {
    reason: Reason,
    logged_kind: ReasonKind,
    disposition: LogDisposition,
    path: TerminalPath,
}

impl Termination {
    pub(crate) fn new(reason: Reason, disposition: LogDisposition, path: TerminalPath) -> Self {
        Self {
            logged_kind: reason.kind,
            reason,
            disposition,
            path,
        }
    }

    /// Local hang-up
    pub(crate) fn normal() -> Self {
        Self::new(
            Reason::normal("Call terminated"),
            LogDisposition::Status(CallLogStatus::Aborted),
            TerminalPath::End,
        )
    }
}

impl From<MappedOutcome> for Termination {
    fn from(mapped: MappedOutcome) -> Self {
        Self {
            reason: mapped.reason,
            logged_kind: mapped.logged_kind,
            disposition: LogDisposition::Status(mapped.log_status),
            path: mapped.path,
        }
    }
}

/// One call attempt
pub struct CallSession {
    id: SessionId,
    direction: CallDirection,
    dialog: Option<DialogId>,
    from: String,
    to: String,
    subject: Option<String>,
    state: CallState,
    previous_state: CallState,
    reason: Option<Reason>,

    local: MediaParameters,
    remote: Option<MediaParameters>,
    current: Option<MediaParameters>,
    /// Description this side sent in the last completed round
    local_description: Option<MediaDescription>,
    /// Description the peer sent in the last completed round
    remote_description: Option<MediaDescription>,
    /// Offer of the initial invitation, ours as caller, theirs as callee
    initial_offer: Option<MediaDescription>,
    /// Caller: answer carried by an early-media provisional
    early_answer: Option<MediaDescription>,
    media_started: bool,

    confirmed_fork: Option<ForkId>,
    provisional_received: bool,
    /// Terminate requested before any provisional; CANCEL goes out on the first one
    cancel_pending: bool,
    challenge: Option<ChallengeContext>,
    credentials_sent: bool,
    /// Callee: 2xx sent for the initial invitation, ACK outstanding
    awaiting_ack: bool,

    release_pending: bool,
    released: bool,
    created_at: DateTime<Utc>,
    last_media_activity: DateTime<Utc>,

    log: CallLog,
    early_media: EarlyMediaController,
    renegotiation: RenegotiationState,
    listeners: ListenerSet<dyn CallSessionListener>,
    view: Arc<RwLock<SessionSnapshot>>,
}

impl CallSession {
    fn base(
        direction: CallDirection,
        from: String,
        to: String,
        local: MediaParameters,
        config: &SessionConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let id = SessionId::new();
        let mut log = CallLog::new(direction, from.clone(), to.clone(), now);
        log.recording_path = local.recording_path();
        let view = Arc::new(RwLock::new(SessionSnapshot {
            id: id.clone(),
            direction,
            dialog: None,
            from: from.clone(),
            to: to.clone(),
            state: CallState::Idle,
            previous_state: CallState::Idle,
            reason: None,
            last_renegotiation_outcome: None,
            local_params: local.clone(),
            remote_params: None,
            current_params: None,
            log: log.clone(),
            microphone_muted: false,
        }));
        Self {
            id,
            direction,
            dialog: None,
            from,
            to,
            subject: None,
            state: CallState::Idle,
            previous_state: CallState::Idle,
            reason: None,
            local,
            remote: None,
            current: None,
            local_description: None,
            remote_description: None,
            initial_offer: None,
            early_answer: None,
            media_started: false,
            confirmed_fork: None,
            provisional_received: false,
            cancel_pending: false,
            challenge: None,
            credentials_sent: false,
            awaiting_ack: false,
            release_pending: false,
            released: false,
            created_at: now,
            last_media_activity: now,
            log,
            early_media: EarlyMediaController::new(config.mute_microphone_during_early_media),
            renegotiation: RenegotiationState::new(),
            listeners: ListenerSet::new(),
            view,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn dialog(&self) -> Option<DialogId> {
        self.dialog
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn reason(&self) -> Option<&Reason> {
        self.reason.as_ref()
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    pub fn local_params(&self) -> &MediaParameters {
        &self.local
    }

    pub fn remote_params(&self) -> Option<&MediaParameters> {
        self.remote.as_ref()
    }

    pub fn current_params(&self) -> Option<&MediaParameters> {
        self.current.as_ref()
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id.clone(),
            view: Arc::clone(&self.view),
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn is_release_pending(&self) -> bool {
        self.release_pending
    }

    pub fn add_listener(&self, listener: Arc<dyn CallSessionListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Attach an application reference key to the call log
    pub fn set_log_reference(&mut self, key: impl Into<String>) {
        self.log.ref_key = Some(key.into());
        self.publish();
    }

    fn leg(&self) -> Leg {
        match self.direction {
            CallDirection::Outgoing => Leg::Caller,
            CallDirection::Incoming => Leg::Callee,
        }
    }

    fn publish(&self) -> SessionSnapshot {
        let snapshot = SessionSnapshot {
            id: self.id.clone(),
            direction: self.direction,
            dialog: self.dialog,
            from: self.from.clone(),
            to: self.to.clone(),
            state: self.state,
            previous_state: self.previous_state,
            reason: self.reason.clone(),
            last_renegotiation_outcome: self.renegotiation.last_outcome().cloned(),
            local_params: self.local.clone(),
            remote_params: self.remote.clone(),
            current_params: self.current.clone(),
            log: self.log.clone(),
            microphone_muted: self.early_media.microphone_muted(),
        };
        *self.view.write() = snapshot.clone();
        snapshot
    }

    /// Session listeners first, then registry listeners
    fn notify(&self, env: &SessionEnv<'_>, notification: SessionNotification) {
        let snapshot = self.publish();
        self.listeners
            .dispatch(|listener, ctx| notification.deliver(listener, ctx, &snapshot));
        env.listeners
            .dispatch(|listener, ctx| notification.deliver(listener, ctx, &snapshot));
    }

    pub(crate) fn set_state(
        &mut self,
        env: &SessionEnv<'_>,
        new: CallState,
        message: &str,
    ) -> SessionResult<()> {
        if self.state == new && new != CallState::UpdatedByRemote {
            return Ok(());
        }
        if !state::is_allowed(self.state, new) {
            error!(
                "Session {}: illegal transition {} -> {}",
                self.id, self.state, new
            );
            debug_assert!(false, "illegal transition {} -> {}", self.state, new);
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: new,
            });
        }

        info!("Session {} {} -> {}: {}", self.id, self.state, new, message);
        self.previous_state = self.state;
        self.state = new;
        if new == CallState::Connected {
            self.log.mark_connected(env.now);
        }

        self.notify(
            env,
            SessionNotification::StateChanged {
                state: new,
                message: message.to_string(),
            },
        );
        for action in self.early_media.on_transition(new) {
            self.apply_early_media(env, action);
        }
        Ok(())
    }

    fn enter(&mut self, env: &SessionEnv<'_>, new: CallState) -> SessionResult<()> {
        self.set_state(env, new, state::message_for(new))
    }

    fn apply_early_media(&self, env: &SessionEnv<'_>, action: EarlyMediaAction) {
        match action {
            EarlyMediaAction::Tone(tone) => self.notify(env, SessionNotification::Tone(tone)),
            EarlyMediaAction::MuteMicrophone(muted) => {
                debug!("Session {} microphone muted: {}", self.id, muted);
                env.media.set_microphone_muted(&self.id, muted);
                self.publish();
            }
        }
    }

    pub(crate) fn send(
        &self,
        env: &SessionEnv<'_>,
        request: OutgoingRequest,
    ) -> Result<(), TransportError> {
        let Some(dialog) = self.dialog else {
            return Err(TransportError::send_failed(format!(
                "session {} has no dialog",
                self.id
            )));
        };
        debug!("Session {} sending {}", self.id, request.name());
        env.transport.send(&dialog, request)
    }

    /// Start streams, or update them if already running
    fn apply_media(
        &mut self,
        env: &SessionEnv<'_>,
        description: &MediaDescription,
        early: bool,
    ) -> Result<(), MediaError> {
        let result = if self.media_started {
            env.media.update_streams(&self.id, description)
        } else {
            env.media.start_streams(&self.id, description, early)
        };
        if result.is_ok() {
            self.media_started = true;
            self.last_media_activity = env.now;
        }
        result
    }

    /// Move to End or Error and finalize the log
    ///
    /// Error is only used before establishment; an established session that
    /// fails ends in End with the failure as reason.
    pub(crate) fn finish(
        &mut self,
        env: &SessionEnv<'_>,
        termination: Termination,
    ) -> SessionResult<()> {
        if self.state.is_terminal() {
            return self.refine_reason(env, termination);
        }
        let was_early = self.state.is_early();
        self.renegotiation.clear();
        self.cancel_pending = false;
        self.challenge = None;
        self.awaiting_ack = false;

        let Termination {
            reason,
            logged_kind,
            disposition,
            path,
        } = termination;
        match disposition {
            LogDisposition::Status(status) => {
                let status = if self.log.was_connected() {
                    CallLogStatus::Success
                } else {
                    status
                };
                self.log.finalize(status, &reason, logged_kind, env.now);
            }
            LogDisposition::Elsewhere(status) => {
                self.log.mark_elsewhere(status, &reason, env.now)
            }
        }
        self.reason = Some(reason.clone());

        let target = match path {
            TerminalPath::End => CallState::End,
            _ if was_early => CallState::Error,
            _ => CallState::End,
        };
        self.set_state(env, target, &reason.phrase)?;
        self.notify(
            env,
            SessionNotification::OutcomeAvailable {
                reason,
                status: self.log.status,
            },
        );

        if path == TerminalPath::ErrorReleasedImmediately {
            self.release(env);
        } else {
            self.release_pending = true;
        }
        Ok(())
    }

    /// Terminal outcome from a signaling or media failure
    /// A deferred outcome resolved after the session ended
    ///
    /// Only a provisional reason is replaced, and only before release. State
    /// and log status are kept.
    fn refine_reason(&mut self, env: &SessionEnv<'_>, termination: Termination) -> SessionResult<()> {
        let refinable = !self.released
            && !termination.reason.is_provisional()
            && self.reason.as_ref().is_some_and(Reason::is_provisional);
        if !refinable {
            debug!(
                "Session {} already {}, ignoring {}",
                self.id, self.state, termination.reason
            );
            return Ok(());
        }
        info!(
            "Session {}: outcome refined to {}",
            self.id, termination.reason
        );
        self.log.refine_reason(&termination.reason, termination.logged_kind);
        self.reason = Some(termination.reason.clone());
        self.publish();
        self.notify(
            env,
            SessionNotification::OutcomeAvailable {
                reason: termination.reason,
                status: self.log.status,
            },
        );
        Ok(())
    }

    pub(crate) fn fail(&mut self, env: &SessionEnv<'_>, outcome: TerminalOutcome) -> SessionResult<()> {
        let mapped = map_outcome(&outcome, self.leg());
        self.finish(env, mapped.into())
    }

    /// Transport failure while a dialog exists; always fatal
    fn lose_dialog(&mut self, env: &SessionEnv<'_>, err: &TransportError) -> SessionResult<()> {
        warn!("Session {} lost its dialog: {}", self.id, err);
        self.fail(env, TerminalOutcome::DialogLost)
    }

    /// Stop media, flush the log and enter Released
    pub(crate) fn release(&mut self, env: &SessionEnv<'_>) {
        if self.released {
            return;
        }
        if self.media_started {
            env.media.stop_streams(&self.id);
            self.media_started = false;
        }
        if let Err(e) = env.log_store.flush(&self.log) {
            warn!("Failed to flush call log for session {}: {}", self.id, e);
        }
        self.release_pending = false;
        self.released = true;
        if let Err(e) = self.enter(env, CallState::Released) {
            error!("Session {} could not be released: {}", self.id, e);
        }
    }

    pub(crate) fn handle_signaling(
        &mut self,
        env: &SessionEnv<'_>,
        event: SignalingEvent,
    ) -> SessionResult<()> {
        if self.released {
            debug!("Session {} released, dropping {}", self.id, event.name());
            return Ok(());
        }
        debug!(
            "Session {} in {} received {}",
            self.id,
            self.state,
            event.name()
        );
        match event {
            SignalingEvent::Invite { .. } => {
                warn!("Session {} received a second INVITE on its dialog", self.id);
                Ok(())
            }
            SignalingEvent::Provisional {
                fork,
                code,
                phrase,
                body,
            } => self.on_provisional(env, fork, code, &phrase, body),
            SignalingEvent::Final {
                fork,
                answers,
                response,
            } => self.on_final(env, fork, answers, response),
            SignalingEvent::UpdateRequest {
                method,
                offer,
                headers,
            } => self.on_update_request(env, method, offer, headers),
            SignalingEvent::Ack { headers, body } => self.on_ack(env, headers, body),
            SignalingEvent::Bye { reason } => self.on_bye(env, reason),
            SignalingEvent::Cancel { reason } => self.on_cancel(env, reason),
            SignalingEvent::TransactionTimeout => self.on_transaction_timeout(env),
            SignalingEvent::TransportFailure { message } => {
                self.lose_dialog(env, &TransportError::send_failed(message))
            }
            SignalingEvent::AckTimeout => self.on_ack_timeout(env),
        }
    }

    fn on_transaction_timeout(&mut self, env: &SessionEnv<'_>) -> SessionResult<()> {
        if self.state.is_terminal() {
            return Ok(());
        }
        if self.renegotiation.has_pending() || self.state.is_early() {
            warn!("Session {}: request timed out in {}", self.id, self.state);
            let early_outgoing = self.direction == CallDirection::Outgoing && self.state.is_early();
            self.fail(env, TerminalOutcome::TransactionTimeout)?;
            if early_outgoing {
                self.establishment_failed(env, ReasonKind::NoResponse);
            }
            return Ok(());
        }
        debug!("Session {}: ignoring timeout in {}", self.id, self.state);
        Ok(())
    }

    fn on_ack_timeout(&mut self, env: &SessionEnv<'_>) -> SessionResult<()> {
        if self.awaiting_ack {
            warn!("Session {}: 2xx never acknowledged", self.id);
            if let Err(e) = self.send(env, OutgoingRequest::Bye { fork: None, reason: None }) {
                warn!("Session {}: BYE after ACK timeout failed: {}", self.id, e);
            }
            return self.finish(
                env,
                Termination::new(
                    Reason::new(ReasonKind::NoResponse, 408, "ACK not received"),
                    LogDisposition::Status(CallLogStatus::Aborted),
                    TerminalPath::End,
                ),
            );
        }
        if let Some(remote) = self.renegotiation.take_remote() {
            warn!(
                "Session {}: renegotiation never acknowledged, keeping previous parameters",
                self.id
            );
            if let RemoteUpdate::AwaitingAnswer { return_state, .. } = remote {
                self.enter(env, return_state)?;
            }
            return self.run_queued(env);
        }
        Ok(())
    }

    /// Error tone for an outgoing call that never got established
    fn establishment_failed(&mut self, env: &SessionEnv<'_>, kind: ReasonKind) {
        if let Some(action) = self.early_media.on_establishment_failure(kind) {
            self.apply_early_media(env, action);
        }
    }

    pub(crate) fn handle_media(&mut self, env: &SessionEnv<'_>, event: MediaEvent) -> SessionResult<()> {
        if self.state.is_terminal() {
            return Ok(());
        }
        match event {
            MediaEvent::Activity => {
                self.last_media_activity = env.now;
                Ok(())
            }
            MediaEvent::StatsUpdated(stats) => {
                self.last_media_activity = env.now;
                self.notify(env, SessionNotification::Stats(stats));
                Ok(())
            }
            MediaEvent::ConnectivityCheckCompleted { reinvite_required } => {
                if reinvite_required {
                    self.connectivity_reinvite(env)
                } else {
                    Ok(())
                }
            }
            MediaEvent::StreamFailure { message } => {
                warn!("Session {} media failure: {}", self.id, message);
                if self.state.is_early() {
                    return self.finish(
                        env,
                        Termination::new(
                            Reason::new(ReasonKind::IOError, 0, message),
                            LogDisposition::Status(CallLogStatus::Aborted),
                            TerminalPath::End,
                        ),
                    );
                }
                self.media_failed(env, message)
            }
        }
    }

    /// Timer evaluation; called once per drive step
    pub(crate) fn on_tick(&mut self, env: &SessionEnv<'_>) -> SessionResult<()> {
        if self.state.is_terminal() {
            return Ok(());
        }

        if matches!(
            self.state,
            CallState::IncomingReceived | CallState::IncomingEarlyMedia
        ) {
            if let Some(timeout) = env.config.incoming_timeout() {
                if elapsed(self.created_at, env.now) >= timeout {
                    return self.incoming_timed_out(env);
                }
            }
        }

        if self.state.is_stable() {
            let on_hold = self.state != CallState::StreamsRunning;
            if let Some(timeout) = env.config.no_media_timeout(on_hold) {
                if elapsed(self.last_media_activity, env.now) >= timeout {
                    warn!(
                        "Session {}: no media for {:?}, terminating",
                        self.id, timeout
                    );
                    if let Err(e) = self.send(
                        env,
                        OutgoingRequest::Bye {
                            fork: self.confirmed_fork.clone(),
                            reason: None,
                        },
                    ) {
                        warn!("Session {}: BYE after media timeout failed: {}", self.id, e);
                    }
                    return self.fail(env, TerminalOutcome::NoMedia);
                }
            }
        }

        if let (Some(timeout), Some(connected_at)) =
            (env.config.in_call_timeout(), self.log.connected_at)
        {
            if !self.state.is_early() && elapsed(connected_at, env.now) >= timeout {
                info!("Session {}: maximum call duration reached", self.id);
                return self.terminate(env);
            }
        }

        self.retry_glare(env)
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> std::time::Duration {
    (now - since).to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_termination_from_mapped_keeps_logged_kind() {
        let mapped = map_outcome(&TerminalOutcome::rejection(404), Leg::Caller);
        let termination: Termination = mapped.into();
        assert_eq!(termination.reason.kind, ReasonKind::NotFound);
        assert_eq!(termination.logged_kind, ReasonKind::NoResponse);
        assert_eq!(termination.path, TerminalPath::Error);
    }

    #[test]
    fn test_normal_termination() {
        let termination = Termination::normal();
        assert_eq!(termination.reason.kind, ReasonKind::Success);
        assert_eq!(
            termination.disposition,
            LogDisposition::Status(CallLogStatus::Aborted)
        );
    }
}
