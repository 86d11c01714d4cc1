//! Mid-call renegotiation: hold, resume, parameter changes and peer updates

use tracing::{debug, info, warn};

use super::{CallSession, SessionEnv};
use crate::adapters::{FinalResponse, OutgoingRequest, UpdateMethod};
use crate::errors::{NegotiationError, SessionError, SessionResult};
use crate::notify::SessionNotification;
use crate::offer_answer::{MediaDescription, NegotiationRole, held_by_peer};
use crate::params::ParamDelta;
use crate::reason::{Reason, ReasonKind, TerminalOutcome, map_outcome};
use crate::renegotiation::{Admission, CancelOutcome, PendingUpdate, RemoteUpdate, UpdateTrigger};
use crate::types::{CallDirection, CallState, Headers};

impl CallSession {
    /// Established, or already renegotiating so the request can be queued
    /// or collapsed
    fn ensure_established(&self, operation: &'static str) -> SessionResult<()> {
        match self.state {
            CallState::Connected if self.awaiting_ack => {
                Err(SessionError::invalid_state(operation, self.state))
            }
            CallState::Connected
            | CallState::StreamsRunning
            | CallState::Paused
            | CallState::PausedByRemote
            | CallState::Pausing
            | CallState::Resuming
            | CallState::Updating
            | CallState::UpdatedByRemote => Ok(()),
            state => Err(SessionError::invalid_state(operation, state)),
        }
    }

    /// Put the peer on hold
    pub(crate) fn pause(&mut self, env: &SessionEnv<'_>) -> SessionResult<()> {
        self.ensure_established("pause")?;
        if self.state == CallState::Paused {
            return Err(SessionError::invalid_state("pause", self.state));
        }
        self.request_update(env, UpdateTrigger::LocalPause, ParamDelta::new())
    }

    /// Take the peer off hold; a second resume while one is in flight is a
    /// no-op
    pub(crate) fn resume(&mut self, env: &SessionEnv<'_>) -> SessionResult<()> {
        self.ensure_established("resume")?;
        if matches!(
            self.state,
            CallState::StreamsRunning | CallState::PausedByRemote | CallState::Connected
        ) {
            return Err(SessionError::invalid_state("resume", self.state));
        }
        self.request_update(env, UpdateTrigger::LocalResume, ParamDelta::new())
    }

    /// Change local media parameters and renegotiate
    ///
    /// Before establishment the change only affects what the next offer or
    /// answer carries. Changes that do not touch media are stored without
    /// signaling.
    pub(crate) fn update(&mut self, env: &SessionEnv<'_>, delta: ParamDelta) -> SessionResult<()> {
        if self.state.is_early() {
            let local = self.local.merge(&delta);
            local.validate()?;
            self.local = local;
            self.publish();
            return Ok(());
        }
        self.ensure_established("update")?;
        if !delta.affects_media() {
            debug!("Session {}: storing signaling-only change", self.id);
            self.local = self.local.merge(&delta);
            self.publish();
            return Ok(());
        }
        self.request_update(env, UpdateTrigger::LocalParamChange, delta)
    }

    /// Withdraw the local renegotiation in flight
    pub(crate) fn cancel_update(&mut self, env: &SessionEnv<'_>) -> SessionResult<CancelOutcome> {
        let (waiting_retry, already_cancelled) = match self.renegotiation.pending() {
            Some(pending) => (pending.retry_at.is_some(), pending.cancel_requested),
            None => return Ok(CancelOutcome::AlreadyCompleted),
        };
        if waiting_retry {
            if let Some(pending) = self.renegotiation.take_pending() {
                self.update_failed(env, pending, Reason::from_code(487))?;
            }
            return Ok(CancelOutcome::Cancelled);
        }
        if !already_cancelled {
            if let Some(pending) = self.renegotiation.pending_mut() {
                pending.cancel_requested = true;
            }
            info!("Session {}: cancelling renegotiation", self.id);
            if let Err(e) = self.send(env, OutgoingRequest::Cancel { reason: None }) {
                self.lose_dialog(env, &e)?;
                return Err(e.into());
            }
        }
        Ok(CancelOutcome::Cancelled)
    }

    pub(super) fn connectivity_reinvite(&mut self, env: &SessionEnv<'_>) -> SessionResult<()> {
        if self.state.is_early() || self.state.is_terminal() {
            debug!(
                "Session {}: connectivity results travel with the answer",
                self.id
            );
            return Ok(());
        }
        if self.awaiting_ack {
            self.renegotiation
                .enqueue(UpdateTrigger::ConnectivityReinvite, ParamDelta::new());
            return Ok(());
        }
        self.request_update(env, UpdateTrigger::ConnectivityReinvite, ParamDelta::new())
    }

    fn request_update(
        &mut self,
        env: &SessionEnv<'_>,
        trigger: UpdateTrigger,
        delta: ParamDelta,
    ) -> SessionResult<()> {
        match self.renegotiation.admit(trigger) {
            Admission::Start => self.start_update(env, trigger, delta),
            Admission::Queue => {
                self.renegotiation.enqueue(trigger, delta);
                Ok(())
            }
            Admission::Collapse => {
                self.publish();
                Ok(())
            }
            Admission::Reject => Err(SessionError::RenegotiationPending(self.id.clone())),
        }
    }

    /// Build and send the offer for a local update
    ///
    /// An offer that cannot be built leaves the session untouched.
    fn start_update(
        &mut self,
        env: &SessionEnv<'_>,
        trigger: UpdateTrigger,
        delta: ParamDelta,
    ) -> SessionResult<()> {
        let target = self.local.merge(&delta);
        let return_state = if self.state.is_stable() {
            self.state
        } else {
            CallState::StreamsRunning
        };
        let (offer_params, next, subject) = match trigger {
            UpdateTrigger::LocalPause => (
                target.held(self.state == CallState::PausedByRemote),
                CallState::Pausing,
                "Call on hold",
            ),
            UpdateTrigger::LocalResume => (target.clone(), CallState::Resuming, "Call resuming"),
            UpdateTrigger::LocalParamChange | UpdateTrigger::ConnectivityReinvite => {
                let params = if self.state == CallState::Paused {
                    target.held(false)
                } else {
                    target.clone()
                };
                (params, CallState::Updating, "Media change")
            }
        };

        let offer = env
            .negotiator
            .compute_offer(&offer_params, self.local_description.as_ref())?;
        let request = OutgoingRequest::Update {
            method: UpdateMethod::ReInvite,
            offer: Some(offer.clone()),
            headers: target.custom_headers(),
            subject: Some(subject.to_string()),
        };
        if let Err(e) = self.send(env, request) {
            self.lose_dialog(env, &e)?;
            return Err(e.into());
        }
        if trigger == UpdateTrigger::LocalPause {
            if let Err(e) = env.media.pause_streams(&self.id) {
                warn!("Session {}: pausing streams failed: {}", self.id, e);
            }
        }

        info!("Session {}: {} sent (offer v{})", self.id, trigger, offer.version);
        self.renegotiation.begin(PendingUpdate {
            trigger,
            offer,
            params: target,
            return_state,
            resume_requested: false,
            cancel_requested: false,
            retry_at: None,
            attempts: 0,
        });
        self.enter(env, next)
    }

    /// Final response to our renegotiation
    pub(super) fn on_update_response(
        &mut self,
        env: &SessionEnv<'_>,
        response: FinalResponse,
    ) -> SessionResult<()> {
        let Some(pending) = self.renegotiation.take_pending() else {
            return Ok(());
        };

        if response.is_success() {
            return self.update_accepted(env, pending, response);
        }
        match response.code {
            491 => {
                self.renegotiation.begin(pending);
                if let Some(delay) = self.renegotiation.schedule_retry(env.now, env.config) {
                    info!(
                        "Session {}: renegotiation glare, retrying in {:?}",
                        self.id, delay
                    );
                }
                Ok(())
            }
            481 | 408 => {
                warn!(
                    "Session {}: dialog gone ({}), terminating",
                    self.id, response.code
                );
                self.fail(env, TerminalOutcome::rejection(response.code))
            }
            code => {
                let outcome = TerminalOutcome::Rejection {
                    code,
                    phrase: Some(response.phrase),
                    retry_after: response.retry_after,
                    sub_reason: response.reason_header,
                };
                let reason = map_outcome(&outcome, self.leg()).reason;
                self.update_failed(env, pending, reason)
            }
        }
    }

    fn update_accepted(
        &mut self,
        env: &SessionEnv<'_>,
        pending: PendingUpdate,
        response: FinalResponse,
    ) -> SessionResult<()> {
        let headers = pending.params.custom_headers();
        let ack = OutgoingRequest::Ack {
            fork: self.confirmed_fork.clone(),
            answer: None,
            headers: headers.clone(),
        };
        if let Err(e) = self.send(env, ack) {
            return self.lose_dialog(env, &e);
        }
        self.notify(
            env,
            SessionNotification::Acknowledgement {
                headers: headers.clone(),
                is_incoming: false,
            },
        );

        let negotiated = match response.body {
            Some(answer) => {
                if let Err(e) = env.negotiator.validate_answer(&pending.offer, &answer) {
                    warn!("Session {}: unusable answer: {}", self.id, e);
                    return self.update_failed(
                        env,
                        pending,
                        Reason::from_kind(ReasonKind::NotAcceptable),
                    );
                }
                self.remote = Some(answer.to_parameters(&response.headers));
                let negotiated =
                    env.negotiator
                        .negotiated(&pending.offer, &answer, NegotiationRole::Offerer);
                self.remote_description = Some(answer);
                negotiated
            }
            None => {
                debug!(
                    "Session {}: 2xx without answer, adopting our offer",
                    self.id
                );
                pending.offer.clone()
            }
        };

        self.local_description = Some(pending.offer.clone());
        self.current = Some(negotiated.to_parameters(&headers));
        if matches!(
            pending.trigger,
            UpdateTrigger::LocalParamChange | UpdateTrigger::ConnectivityReinvite
        ) {
            self.log.recording_path = pending.params.recording_path();
            self.local = pending.params.clone();
        }
        if let Err(e) = self.apply_media(env, &negotiated, false) {
            warn!("Session {}: media update failed: {}", self.id, e);
            return self.media_failed(env, e.to_string());
        }
        if pending.trigger == UpdateTrigger::LocalResume {
            if let Err(e) = env.media.resume_streams(&self.id) {
                warn!("Session {}: resuming streams failed: {}", self.id, e);
            }
        }

        if pending.trigger == UpdateTrigger::LocalPause && pending.resume_requested {
            return self.resume_after_pause(env);
        }

        let next = match pending.trigger {
            UpdateTrigger::LocalPause => CallState::Paused,
            _ if held_by_peer(&negotiated, &pending.offer) => CallState::PausedByRemote,
            UpdateTrigger::LocalParamChange | UpdateTrigger::ConnectivityReinvite
                if pending.return_state == CallState::Paused =>
            {
                CallState::Paused
            }
            _ => CallState::StreamsRunning,
        };
        self.enter(env, next)?;
        self.run_queued(env)
    }

    /// The pause was confirmed after a resume had been requested
    ///
    /// The session goes from Pausing straight to Resuming; Paused is never
    /// entered. The peer is now on hold, so the resume is still signaled,
    /// and a rejected resume falls back to Paused.
    fn resume_after_pause(&mut self, env: &SessionEnv<'_>) -> SessionResult<()> {
        info!("Session {}: pause confirmed, issuing collapsed resume", self.id);
        match self.start_update(env, UpdateTrigger::LocalResume, ParamDelta::new()) {
            Ok(()) => {
                if let Some(resume) = self.renegotiation.pending_mut() {
                    resume.return_state = CallState::Paused;
                }
                Ok(())
            }
            Err(e) if self.state.is_terminal() => Err(e),
            Err(e) => {
                warn!("Session {}: collapsed resume not sent: {}", self.id, e);
                self.enter(env, CallState::Paused)?;
                self.run_queued(env)
            }
        }
    }

    /// Return to the previous stable state; `current` is unchanged
    fn update_failed(
        &mut self,
        env: &SessionEnv<'_>,
        pending: PendingUpdate,
        reason: Reason,
    ) -> SessionResult<()> {
        warn!(
            "Session {}: {} failed: {}",
            self.id, pending.trigger, reason
        );
        if pending.trigger == UpdateTrigger::LocalPause {
            if let Err(e) = env.media.resume_streams(&self.id) {
                warn!("Session {}: resuming streams failed: {}", self.id, e);
            }
        }
        self.renegotiation.record_failure(reason.clone());
        self.set_state(env, pending.return_state, &reason.phrase)?;
        self.notify(
            env,
            SessionNotification::OutcomeAvailable {
                reason,
                status: self.log.status,
            },
        );
        self.run_queued(env)
    }

    pub(super) fn retry_glare(&mut self, env: &SessionEnv<'_>) -> SessionResult<()> {
        let Some(pending) = self.renegotiation.due_retry(env.now).cloned() else {
            return Ok(());
        };
        info!(
            "Session {}: retrying {} (attempt {})",
            self.id,
            pending.trigger,
            pending.attempts + 1
        );
        let request = OutgoingRequest::Update {
            method: UpdateMethod::ReInvite,
            offer: Some(pending.offer),
            headers: pending.params.custom_headers(),
            subject: None,
        };
        if let Err(e) = self.send(env, request) {
            warn!("Session {}: renegotiation retry not sent: {}", self.id, e);
            if let Some(pending) = self.renegotiation.take_pending() {
                let reason = Reason::new(ReasonKind::IOError, 0, "Renegotiation retry not sent");
                return self.update_failed(env, pending, reason);
            }
        }
        Ok(())
    }

    /// Start local requests that were waiting for a renegotiation to finish
    pub(super) fn run_queued(&mut self, env: &SessionEnv<'_>) -> SessionResult<()> {
        while let Some(queued) = self.renegotiation.next_queued() {
            debug!("Session {}: starting queued {}", self.id, queued.trigger);
            let result = match queued.trigger {
                UpdateTrigger::LocalPause => self.pause(env),
                UpdateTrigger::LocalResume => self.resume(env),
                UpdateTrigger::LocalParamChange => self.update(env, queued.delta),
                UpdateTrigger::ConnectivityReinvite => self.connectivity_reinvite(env),
            };
            if let Err(e) = result {
                warn!(
                    "Session {}: queued {} dropped: {}",
                    self.id, queued.trigger, e
                );
            }
            if self.state.is_terminal() || self.renegotiation.has_pending() {
                break;
            }
        }
        Ok(())
    }

    /// Peer-initiated renegotiation
    pub(super) fn on_update_request(
        &mut self,
        env: &SessionEnv<'_>,
        method: UpdateMethod,
        offer: Option<MediaDescription>,
        headers: Headers,
    ) -> SessionResult<()> {
        if self.state.is_terminal() {
            return self.respond(env, FinalResponse::new(481, "Call/Transaction Does Not Exist"));
        }
        if self.state.is_early() {
            return self.on_early_update(env, offer, headers);
        }
        if self.renegotiation.has_pending() || self.renegotiation.remote_pending() || self.awaiting_ack
        {
            info!(
                "Session {}: renegotiation crossed ours, answering 491",
                self.id
            );
            return self.respond(
                env,
                FinalResponse::new(491, "Request Pending").with_retry_after(Some(1)),
            );
        }

        let return_state = if self.state.is_stable() {
            self.state
        } else {
            CallState::StreamsRunning
        };
        let answer_params = if return_state == CallState::Paused {
            self.local.held(false)
        } else {
            self.local.clone()
        };

        let Some(offer) = offer else {
            let offer = match env
                .negotiator
                .compute_offer(&answer_params, self.local_description.as_ref())
            {
                Ok(offer) => offer,
                Err(e) => return self.refuse_update(env, e),
            };
            self.enter(env, CallState::UpdatedByRemote)?;
            let response =
                FinalResponse::ok(Some(offer.clone())).with_headers(self.local.custom_headers());
            if let Err(e) = self.send(env, OutgoingRequest::Final(response)) {
                return self.lose_dialog(env, &e);
            }
            self.renegotiation
                .begin_remote(RemoteUpdate::AwaitingAnswer { offer, return_state });
            return Ok(());
        };

        if let Some(previous) = self.remote_description.as_ref() {
            if let Err(e) = env.negotiator.validate_reoffer(previous, &offer) {
                return self.refuse_update(env, e);
            }
        }
        let answer = match env.negotiator.compute_answer(
            &offer,
            &answer_params,
            self.local_description.as_ref(),
        ) {
            Ok(answer) => answer,
            Err(e) => return self.refuse_update(env, e),
        };

        self.enter(env, CallState::UpdatedByRemote)?;
        let response =
            FinalResponse::ok(Some(answer.clone())).with_headers(self.local.custom_headers());
        if let Err(e) = self.send(env, OutgoingRequest::Final(response)) {
            return self.lose_dialog(env, &e);
        }
        self.remote = Some(offer.to_parameters(&headers));

        let negotiated = env
            .negotiator
            .negotiated(&offer, &answer, NegotiationRole::Answerer);
        let next = if held_by_peer(&negotiated, &answer) {
            CallState::PausedByRemote
        } else if return_state == CallState::Paused {
            CallState::Paused
        } else {
            CallState::StreamsRunning
        };

        match method {
            UpdateMethod::Update => {
                self.apply_remote_round(env, &offer, &answer)?;
                if self.state.is_terminal() {
                    return Ok(());
                }
                self.enter(env, next)?;
                self.run_queued(env)
            }
            UpdateMethod::ReInvite => {
                self.renegotiation
                    .begin_remote(RemoteUpdate::Answered { offer, answer });
                self.enter(env, next)
            }
        }
    }

    /// ACK completing a peer renegotiation
    pub(super) fn on_update_ack(
        &mut self,
        env: &SessionEnv<'_>,
        headers: Headers,
        body: Option<MediaDescription>,
    ) -> SessionResult<()> {
        let Some(remote) = self.renegotiation.take_remote() else {
            return Ok(());
        };
        self.notify(
            env,
            SessionNotification::Acknowledgement {
                headers: headers.clone(),
                is_incoming: true,
            },
        );

        match remote {
            RemoteUpdate::Answered { offer, answer } => {
                self.apply_remote_round(env, &offer, &answer)?;
            }
            RemoteUpdate::AwaitingAnswer {
                offer,
                return_state,
            } => {
                let answer = body.filter(|answer| {
                    match env.negotiator.validate_answer(&offer, answer) {
                        Ok(()) => true,
                        Err(e) => {
                            warn!("Session {}: ignoring answer in ACK: {}", self.id, e);
                            false
                        }
                    }
                });
                let next = match answer {
                    Some(answer) => {
                        let negotiated =
                            env.negotiator
                                .negotiated(&offer, &answer, NegotiationRole::Offerer);
                        self.remote = Some(answer.to_parameters(&headers));
                        self.local_description = Some(offer.clone());
                        self.remote_description = Some(answer);
                        self.current =
                            Some(negotiated.to_parameters(&self.local.custom_headers()));
                        if let Err(e) = self.apply_media(env, &negotiated, false) {
                            warn!("Session {}: media update failed: {}", self.id, e);
                            return self.media_failed(env, e.to_string());
                        }
                        if held_by_peer(&negotiated, &offer) {
                            CallState::PausedByRemote
                        } else if return_state == CallState::Paused {
                            CallState::Paused
                        } else {
                            CallState::StreamsRunning
                        }
                    }
                    None => {
                        warn!(
                            "Session {}: offer in 2xx left unanswered, keeping parameters",
                            self.id
                        );
                        return_state
                    }
                };
                self.enter(env, next)?;
            }
        }
        if self.state.is_terminal() {
            return Ok(());
        }
        self.run_queued(env)
    }

    /// Commit a round where the peer offered and we answered
    fn apply_remote_round(
        &mut self,
        env: &SessionEnv<'_>,
        offer: &MediaDescription,
        answer: &MediaDescription,
    ) -> SessionResult<()> {
        let negotiated = env
            .negotiator
            .negotiated(offer, answer, NegotiationRole::Answerer);
        self.remote_description = Some(offer.clone());
        self.local_description = Some(answer.clone());
        self.current = Some(negotiated.to_parameters(&self.local.custom_headers()));
        if let Err(e) = self.apply_media(env, &negotiated, false) {
            warn!("Session {}: media update failed: {}", self.id, e);
            return self.media_failed(env, e.to_string());
        }
        self.publish();
        Ok(())
    }

    /// Offer during the early dialog, answered without leaving it
    fn on_early_update(
        &mut self,
        env: &SessionEnv<'_>,
        offer: Option<MediaDescription>,
        headers: Headers,
    ) -> SessionResult<()> {
        let Some(offer) = offer else {
            return self.respond(env, FinalResponse::ok(None));
        };
        if !super::state::is_allowed(self.state, CallState::EarlyUpdatedByRemote) {
            return self.respond(
                env,
                FinalResponse::new(491, "Request Pending").with_retry_after(Some(1)),
            );
        }
        let answer = match env.negotiator.compute_answer(
            &offer,
            &self.local,
            self.local_description.as_ref(),
        ) {
            Ok(answer) => answer,
            Err(e) => return self.refuse_update(env, e),
        };

        let resume_state = self.state;
        self.enter(env, CallState::EarlyUpdatedByRemote)?;
        let response = FinalResponse::ok(Some(answer.clone()));
        if let Err(e) = self.send(env, OutgoingRequest::Final(response)) {
            return self.lose_dialog(env, &e);
        }
        self.remote = Some(offer.to_parameters(&headers));
        if self.media_started {
            let negotiated = env
                .negotiator
                .negotiated(&offer, &answer, NegotiationRole::Answerer);
            if let Err(e) = env.media.update_streams(&self.id, &negotiated) {
                warn!("Session {}: early media update failed: {}", self.id, e);
            }
        }
        if self.direction == CallDirection::Incoming {
            self.initial_offer = Some(offer);
            self.local_description = Some(answer);
        }
        self.enter(env, resume_state)
    }

    fn refuse_update(&mut self, env: &SessionEnv<'_>, err: NegotiationError) -> SessionResult<()> {
        warn!("Session {}: refusing peer offer: {}", self.id, err);
        self.renegotiation
            .record_failure(Reason::from_kind(ReasonKind::NotAcceptable));
        self.respond(env, FinalResponse::new(488, "Not Acceptable Here"))?;
        self.publish();
        Ok(())
    }

    /// Final response to a peer request; a send failure loses the dialog
    fn respond(&mut self, env: &SessionEnv<'_>, response: FinalResponse) -> SessionResult<()> {
        if let Err(e) = self.send(env, OutgoingRequest::Final(response)) {
            if self.state.is_terminal() {
                debug!("Session {}: response not sent: {}", self.id, e);
                return Ok(());
            }
            return self.lose_dialog(env, &e);
        }
        Ok(())
    }
}
