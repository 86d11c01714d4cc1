//! Caller side of session establishment

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{CallSession, LogDisposition, SessionEnv, Termination};
use crate::adapters::{Credentials, FinalResponse, OutgoingRequest};
use crate::call_log::CallLogStatus;
use crate::config::SessionConfig;
use crate::errors::{NegotiationError, SessionError, SessionResult};
use crate::events::AnsweredRequest;
use crate::notify::{ChallengeContext, SessionNotification};
use crate::offer_answer::{NegotiationRole, held_by_peer};
use crate::params::MediaParameters;
use crate::reason::{
    Leg, Reason, ReasonKind, SubReason, TerminalOutcome, TerminalPath, map_outcome,
};
use crate::types::{CallDirection, CallState, ForkId};

impl CallSession {
    pub(crate) fn new_outgoing(
        from: impl Into<String>,
        to: impl Into<String>,
        local: MediaParameters,
        subject: Option<String>,
        config: &SessionConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let mut session = Self::base(
            CallDirection::Outgoing,
            from.into(),
            to.into(),
            local,
            config,
            now,
        );
        session.subject = subject;
        session
    }

    /// Build the offer, open a dialog and send the invitation
    ///
    /// Failures before anything reaches the wire end in Error and Released
    /// within this call.
    pub(crate) fn start_invite(&mut self, env: &SessionEnv<'_>) -> SessionResult<()> {
        self.enter(env, CallState::OutgoingInit)?;

        let offer = match env.negotiator.compute_offer(&self.local, None) {
            Ok(offer) => offer,
            Err(e) => {
                warn!("Session {}: cannot build offer: {}", self.id, e);
                return self.finish(
                    env,
                    Termination::new(
                        Reason::from_kind(ReasonKind::NotAcceptable),
                        LogDisposition::Status(CallLogStatus::Aborted),
                        TerminalPath::ErrorReleasedImmediately,
                    ),
                );
            }
        };

        let dialog = match env.transport.create_dialog(&self.from, &self.to) {
            Ok(dialog) => dialog,
            Err(e) => {
                warn!("Session {}: cannot create dialog: {}", self.id, e);
                return self.fail(env, TerminalOutcome::SendFailure);
            }
        };
        self.dialog = Some(dialog);

        let request = OutgoingRequest::Invite {
            from: self.from.clone(),
            to: self.to.clone(),
            offer: Some(offer.clone()),
            headers: self.local.custom_headers(),
            subject: self.subject.clone(),
            credentials: None,
        };
        self.initial_offer = Some(offer);
        if let Err(e) = self.send(env, request) {
            warn!("Session {}: INVITE could not be sent: {}", self.id, e);
            return self.fail(env, TerminalOutcome::SendFailure);
        }
        self.enter(env, CallState::OutgoingProgress)
    }

    pub(super) fn on_provisional(
        &mut self,
        env: &SessionEnv<'_>,
        fork: ForkId,
        code: u16,
        phrase: &str,
        body: Option<crate::offer_answer::MediaDescription>,
    ) -> SessionResult<()> {
        if !matches!(
            self.state,
            CallState::OutgoingProgress | CallState::OutgoingRinging | CallState::OutgoingEarlyMedia
        ) {
            debug!(
                "Session {}: ignoring {} {} in {}",
                self.id, code, phrase, self.state
            );
            return Ok(());
        }
        self.provisional_received = true;

        if self.cancel_pending {
            info!("Session {}: sending deferred CANCEL", self.id);
            self.cancel_pending = false;
            if let Err(e) = self.send(env, OutgoingRequest::Cancel { reason: None }) {
                warn!("Session {}: CANCEL failed: {}", self.id, e);
            }
            return self.finish(env, Termination::normal());
        }
        if code == 100 {
            return Ok(());
        }

        if let (Some(answer), Some(offer)) = (body, self.initial_offer.clone()) {
            match env.negotiator.validate_answer(&offer, &answer) {
                Ok(()) => {
                    debug!("Session {}: early media from fork {}", self.id, fork);
                    let negotiated = env
                        .negotiator
                        .negotiated(&offer, &answer, NegotiationRole::Offerer);
                    self.early_answer = Some(answer);
                    self.set_state(env, CallState::OutgoingEarlyMedia, phrase)?;
                    if let Err(e) = self.apply_media(env, &negotiated, true) {
                        warn!("Session {}: early media not started: {}", self.id, e);
                    }
                    return Ok(());
                }
                Err(e) => warn!("Session {}: ignoring invalid early answer: {}", self.id, e),
            }
        }

        if self.state == CallState::OutgoingEarlyMedia {
            return Ok(());
        }
        self.set_state(env, CallState::OutgoingRinging, phrase)
    }

    pub(super) fn on_final(
        &mut self,
        env: &SessionEnv<'_>,
        fork: ForkId,
        answers: AnsweredRequest,
        response: FinalResponse,
    ) -> SessionResult<()> {
        if answers == AnsweredRequest::Invite && response.is_success() {
            let lost_race = matches!(&self.confirmed_fork, Some(confirmed) if *confirmed != fork);
            if lost_race {
                return self.hang_up_fork(
                    env,
                    fork,
                    Some(SubReason::sip(200, "Call completed elsewhere")),
                );
            }
            if self.direction == CallDirection::Outgoing
                && self.confirmed_fork.is_none()
                && self.state.is_terminal()
            {
                debug!("Session {}: 2xx crossed our CANCEL", self.id);
                return self.hang_up_fork(env, fork, None);
            }
        }
        if self.state.is_terminal() {
            if answers == AnsweredRequest::Invite && !response.is_success() {
                // a late rejection may refine a provisional outcome
                return self.fail(
                    env,
                    TerminalOutcome::Rejection {
                        code: response.code,
                        phrase: Some(response.phrase),
                        retry_after: response.retry_after,
                        sub_reason: response.reason_header,
                    },
                );
            }
            debug!(
                "Session {}: ignoring {} in {}",
                self.id, response.code, self.state
            );
            return Ok(());
        }
        match (answers, self.state) {
            (AnsweredRequest::Renegotiation, _) if self.renegotiation.has_pending() => {
                self.on_update_response(env, response)
            }
            (
                AnsweredRequest::Invite,
                CallState::OutgoingProgress
                | CallState::OutgoingRinging
                | CallState::OutgoingEarlyMedia,
            ) => self.on_invite_response(env, fork, response),
            _ if response.is_success() => {
                debug!("Session {}: 2xx retransmission, re-sending ACK", self.id);
                if let Err(e) = self.send(
                    env,
                    OutgoingRequest::Ack {
                        fork: Some(fork),
                        answer: None,
                        headers: self.local.custom_headers(),
                    },
                ) {
                    warn!("Session {}: ACK failed: {}", self.id, e);
                }
                Ok(())
            }
            _ => {
                debug!(
                    "Session {}: ignoring {} in {}",
                    self.id, response.code, self.state
                );
                Ok(())
            }
        }
    }

    /// Acknowledge and immediately hang up a 2xx that lost a race
    fn hang_up_fork(
        &mut self,
        env: &SessionEnv<'_>,
        fork: ForkId,
        reason: Option<SubReason>,
    ) -> SessionResult<()> {
        info!("Session {}: releasing losing fork {}", self.id, fork);
        let ack = OutgoingRequest::Ack {
            fork: Some(fork.clone()),
            answer: None,
            headers: Default::default(),
        };
        if let Err(e) = self.send(env, ack) {
            warn!("Session {}: ACK to fork {} failed: {}", self.id, fork, e);
        }
        if let Err(e) = self.send(
            env,
            OutgoingRequest::Bye {
                fork: Some(fork.clone()),
                reason,
            },
        ) {
            warn!("Session {}: BYE to fork {} failed: {}", self.id, fork, e);
        }
        Ok(())
    }

    fn on_invite_response(
        &mut self,
        env: &SessionEnv<'_>,
        fork: ForkId,
        response: FinalResponse,
    ) -> SessionResult<()> {
        if response.is_success() {
            return self.on_invite_accepted(env, fork, response);
        }
        if response.is_challenge() && !self.credentials_sent {
            let challenge = ChallengeContext {
                code: response.code,
                realm: response.realm.clone(),
            };
            info!(
                "Session {}: {} challenge, awaiting credentials",
                self.id, response.code
            );
            self.challenge = Some(challenge.clone());
            self.notify(env, SessionNotification::CredentialChallenge(challenge));
            return Ok(());
        }

        let outcome = TerminalOutcome::Rejection {
            code: response.code,
            phrase: Some(response.phrase),
            retry_after: response.retry_after,
            sub_reason: response.reason_header,
        };
        let mapped = map_outcome(&outcome, Leg::Caller);
        let kind = mapped.reason.kind;
        self.finish(env, mapped.into())?;
        self.establishment_failed(env, kind);
        Ok(())
    }

    fn on_invite_accepted(
        &mut self,
        env: &SessionEnv<'_>,
        fork: ForkId,
        response: FinalResponse,
    ) -> SessionResult<()> {
        self.confirmed_fork = Some(fork.clone());
        self.challenge = None;
        let Some(offer) = self.initial_offer.clone() else {
            return Err(SessionError::internal(format!(
                "session {} accepted without an offer",
                self.id
            )));
        };

        if self.cancel_pending {
            info!("Session {}: 2xx arrived before deferred CANCEL", self.id);
            self.hang_up_fork(env, fork, None)?;
            return self.finish(env, Termination::normal());
        }

        let answer = match response.body.clone().or_else(|| self.early_answer.clone()) {
            Some(answer) => answer,
            None => {
                return self.reject_answer(env, fork, NegotiationError::NoAcceptableStream);
            }
        };
        if let Err(e) = env.negotiator.validate_answer(&offer, &answer) {
            return self.reject_answer(env, fork, e);
        }

        self.remote = Some(answer.to_parameters(&response.headers));
        self.enter(env, CallState::Connected)?;

        let headers = self.local.custom_headers();
        let ack = OutgoingRequest::Ack {
            fork: Some(fork),
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

        let negotiated = env
            .negotiator
            .negotiated(&offer, &answer, NegotiationRole::Offerer);
        self.current = Some(negotiated.to_parameters(&headers));
        self.local_description = Some(offer.clone());
        self.remote_description = Some(answer);
        if let Err(e) = self.apply_media(env, &negotiated, false) {
            warn!("Session {}: media start failed: {}", self.id, e);
            return self.media_failed(env, e.to_string());
        }

        let next = if held_by_peer(&negotiated, &offer) {
            CallState::PausedByRemote
        } else {
            CallState::StreamsRunning
        };
        self.enter(env, next)
    }

    /// The 2xx carried no usable answer; the dialog exists, so ACK and BYE
    fn reject_answer(
        &mut self,
        env: &SessionEnv<'_>,
        fork: ForkId,
        err: NegotiationError,
    ) -> SessionResult<()> {
        warn!("Session {}: unusable answer: {}", self.id, err);
        self.hang_up_fork(env, fork, None)?;
        self.finish(
            env,
            Termination::new(
                Reason::from_kind(ReasonKind::NotAcceptable),
                LogDisposition::Status(CallLogStatus::Aborted),
                TerminalPath::Error,
            ),
        )
    }

    /// Hang up after the media engine failed on an established dialog
    pub(super) fn media_failed(&mut self, env: &SessionEnv<'_>, message: String) -> SessionResult<()> {
        if let Err(e) = self.send(
            env,
            OutgoingRequest::Bye {
                fork: self.confirmed_fork.clone(),
                reason: None,
            },
        ) {
            warn!("Session {}: BYE failed: {}", self.id, e);
        }
        self.finish(
            env,
            Termination::new(
                Reason::new(ReasonKind::IOError, 0, message),
                LogDisposition::Status(CallLogStatus::Aborted),
                TerminalPath::End,
            ),
        )
    }

    /// Retry the invitation after a credential challenge
    pub(crate) fn authenticate(
        &mut self,
        env: &SessionEnv<'_>,
        credentials: Credentials,
    ) -> SessionResult<()> {
        let Some(challenge) = self.challenge.take() else {
            return Err(SessionError::invalid_state("authenticate", self.state));
        };
        info!(
            "Session {}: retrying INVITE with credentials for {:?}",
            self.id, challenge.realm
        );
        self.credentials_sent = true;
        self.provisional_received = false;
        let request = OutgoingRequest::Invite {
            from: self.from.clone(),
            to: self.to.clone(),
            offer: self.initial_offer.clone(),
            headers: self.local.custom_headers(),
            subject: self.subject.clone(),
            credentials: Some(credentials),
        };
        if let Err(e) = self.send(env, request) {
            warn!("Session {}: authenticated INVITE failed: {}", self.id, e);
            return self.fail(env, TerminalOutcome::SendFailure);
        }
        Ok(())
    }
}
