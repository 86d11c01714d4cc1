//! Callee side of session establishment

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{CallSession, LogDisposition, SessionEnv, Termination};
use crate::adapters::{FinalResponse, OutgoingRequest};
use crate::call_log::CallLogStatus;
use crate::config::SessionConfig;
use crate::errors::{SessionError, SessionResult};
use crate::notify::SessionNotification;
use crate::offer_answer::{MediaDescription, NegotiationRole, held_by_peer};
use crate::params::MediaParameters;
use crate::reason::{Leg, Reason, ReasonKind, SubReason, TerminalOutcome, TerminalPath, map_outcome};
use crate::types::{CallDirection, CallState, DialogId, Headers};

impl CallSession {
    pub(crate) fn new_incoming(
        dialog: DialogId,
        from: impl Into<String>,
        to: impl Into<String>,
        local: MediaParameters,
        subject: Option<String>,
        config: &SessionConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let mut session = Self::base(
            CallDirection::Incoming,
            from.into(),
            to.into(),
            local,
            config,
            now,
        );
        session.dialog = Some(dialog);
        session.subject = subject;
        session
    }

    /// Check the offer and start ringing
    ///
    /// An offer with nothing acceptable in it is refused with 488 before the
    /// application ever sees the call ring.
    pub(crate) fn receive_invite(
        &mut self,
        env: &SessionEnv<'_>,
        offer: Option<MediaDescription>,
        headers: &Headers,
    ) -> SessionResult<()> {
        self.remote = Some(match &offer {
            Some(offer) => offer.to_parameters(headers),
            None => MediaParameters::empty().with_custom_headers(headers.clone()),
        });
        if let Some(offer) = &offer {
            if let Err(e) = env.negotiator.compute_answer(offer, &self.local, None) {
                warn!("Session {}: incompatible offer: {}", self.id, e);
                return self.refuse_invite(env, 488);
            }
        }
        self.initial_offer = offer;
        self.enter(env, CallState::IncomingReceived)?;

        if env.config.auto_send_ringing {
            let ringing = OutgoingRequest::Provisional {
                code: 180,
                phrase: "Ringing".to_string(),
                answer: None,
            };
            if let Err(e) = self.send(env, ringing) {
                return self.lose_dialog(env, &e);
            }
        }
        Ok(())
    }

    /// Final rejection chosen by the engine rather than the application
    fn refuse_invite(&mut self, env: &SessionEnv<'_>, code: u16) -> SessionResult<()> {
        let reason = Reason::from_code(code);
        if let Err(e) = self.send(
            env,
            OutgoingRequest::Final(FinalResponse::new(code, reason.phrase.clone())),
        ) {
            warn!("Session {}: {} could not be sent: {}", self.id, code, e);
        }
        self.fail(env, TerminalOutcome::rejection(code))
    }

    fn ensure_ringing(&self, operation: &'static str) -> SessionResult<()> {
        match self.state {
            CallState::IncomingReceived | CallState::IncomingEarlyMedia => Ok(()),
            state => Err(SessionError::invalid_state(operation, state)),
        }
    }

    /// Answer the invitation, optionally with new local parameters
    pub(crate) fn accept(
        &mut self,
        env: &SessionEnv<'_>,
        params: Option<MediaParameters>,
    ) -> SessionResult<()> {
        self.ensure_ringing("accept")?;
        if let Some(params) = params {
            params.validate()?;
            self.log.recording_path = params.recording_path();
            self.local = params;
        }
        let headers = self.local.custom_headers();

        let body = match self.initial_offer.clone() {
            Some(offer) => {
                let answer = match env.negotiator.compute_answer(
                    &offer,
                    &self.local,
                    self.local_description.as_ref(),
                ) {
                    Ok(answer) => answer,
                    Err(e) => {
                        warn!("Session {}: cannot answer offer: {}", self.id, e);
                        return self.refuse_invite(env, 488);
                    }
                };
                self.remote_description = Some(offer);
                answer
            }
            None => match env.negotiator.compute_offer(&self.local, None) {
                Ok(offer) => offer,
                Err(e) => {
                    warn!("Session {}: cannot build offer: {}", self.id, e);
                    return self.refuse_invite(env, 488);
                }
            },
        };

        let response = FinalResponse::ok(Some(body.clone())).with_headers(headers);
        if let Err(e) = self.send(env, OutgoingRequest::Final(response)) {
            return self.lose_dialog(env, &e);
        }
        self.local_description = Some(body);
        self.awaiting_ack = true;
        self.enter(env, CallState::Connected)
    }

    /// Send a provisional answer and start early media
    pub(crate) fn accept_early_media(
        &mut self,
        env: &SessionEnv<'_>,
        params: Option<MediaParameters>,
    ) -> SessionResult<()> {
        if self.state != CallState::IncomingReceived {
            return Err(SessionError::invalid_state("accept early media", self.state));
        }
        let Some(offer) = self.initial_offer.clone() else {
            return Err(SessionError::invalid_state("accept early media", self.state));
        };
        if let Some(params) = params {
            params.validate()?;
            self.local = params;
        }

        let answer = match env.negotiator.compute_answer(&offer, &self.local, None) {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Session {}: cannot answer offer: {}", self.id, e);
                return self.refuse_invite(env, 488);
            }
        };
        let progress = OutgoingRequest::Provisional {
            code: 183,
            phrase: "Session Progress".to_string(),
            answer: Some(answer.clone()),
        };
        if let Err(e) = self.send(env, progress) {
            return self.lose_dialog(env, &e);
        }

        let negotiated = env
            .negotiator
            .negotiated(&offer, &answer, NegotiationRole::Answerer);
        self.local_description = Some(answer);
        self.enter(env, CallState::IncomingEarlyMedia)?;
        if let Err(e) = self.apply_media(env, &negotiated, true) {
            warn!("Session {}: early media not started: {}", self.id, e);
        }
        Ok(())
    }

    /// Reject the invitation with `reason`
    ///
    /// The code sent is the reason's own when it is a rejection code,
    /// otherwise the one its kind maps to.
    pub(crate) fn decline(&mut self, env: &SessionEnv<'_>, reason: Reason) -> SessionResult<()> {
        self.ensure_ringing("decline")?;
        let code = if reason.code >= 300 {
            reason.code
        } else {
            reason.kind.to_code()
        };
        let response = FinalResponse::new(code, reason.phrase.clone())
            .with_retry_after(reason.retry_after)
            .with_reason_header(reason.sub_reason.clone());
        info!("Session {}: declining with {}", self.id, reason);
        if let Err(e) = self.send(env, OutgoingRequest::Final(response)) {
            warn!("Session {}: decline could not be sent: {}", self.id, e);
        }

        let mapped = map_outcome(
            &TerminalOutcome::Rejection {
                code,
                phrase: Some(reason.phrase.clone()),
                retry_after: reason.retry_after,
                sub_reason: reason.sub_reason.clone(),
            },
            Leg::Callee,
        );
        let mut termination: Termination = mapped.into();
        termination.reason = Reason { code, ..reason };
        self.finish(env, termination)
    }

    pub(super) fn on_cancel(
        &mut self,
        env: &SessionEnv<'_>,
        reason: Option<SubReason>,
    ) -> SessionResult<()> {
        if self.ensure_ringing("cancel").is_err() {
            debug!("Session {}: CANCEL in {} has no effect", self.id, self.state);
            return Ok(());
        }
        if let Err(e) = self.send(
            env,
            OutgoingRequest::Final(FinalResponse::new(487, "Request Terminated")),
        ) {
            warn!("Session {}: 487 could not be sent: {}", self.id, e);
        }
        let termination = match reason {
            Some(sub) => elsewhere(sub.clone()).unwrap_or_else(|| {
                Termination::new(
                    Reason::new(ReasonKind::NotAnswered, 487, "Incoming call cancelled")
                        .with_sub_reason(sub),
                    LogDisposition::Status(CallLogStatus::Missed),
                    TerminalPath::End,
                )
            }),
            None => Termination::new(
                Reason::new(ReasonKind::NotAnswered, 487, "Incoming call cancelled"),
                LogDisposition::Status(CallLogStatus::Missed),
                TerminalPath::End,
            ),
        };
        self.finish(env, termination)
    }

    /// First ACK for our 2xx: the initial round is complete
    pub(super) fn on_initial_ack(
        &mut self,
        env: &SessionEnv<'_>,
        headers: Headers,
        body: Option<MediaDescription>,
    ) -> SessionResult<()> {
        self.awaiting_ack = false;
        self.notify(
            env,
            SessionNotification::Acknowledgement {
                headers: headers.clone(),
                is_incoming: true,
            },
        );
        let Some(sent) = self.local_description.clone() else {
            return Err(SessionError::internal(format!(
                "session {} acknowledged without a local description",
                self.id
            )));
        };

        let negotiated = match self.remote_description.clone() {
            Some(offer) => env
                .negotiator
                .negotiated(&offer, &sent, NegotiationRole::Answerer),
            None => {
                let answer = match body {
                    Some(answer) => answer,
                    None => return self.unanswered_offer(env, "ACK without answer"),
                };
                if let Err(e) = env.negotiator.validate_answer(&sent, &answer) {
                    return self.unanswered_offer(env, &e.to_string());
                }
                self.remote = Some(answer.to_parameters(&headers));
                self.remote_description = Some(answer.clone());
                env.negotiator
                    .negotiated(&sent, &answer, NegotiationRole::Offerer)
            }
        };

        self.current = Some(negotiated.to_parameters(&self.local.custom_headers()));
        if let Err(e) = self.apply_media(env, &negotiated, false) {
            warn!("Session {}: media start failed: {}", self.id, e);
            return self.media_failed(env, e.to_string());
        }
        let next = if held_by_peer(&negotiated, &sent) {
            CallState::PausedByRemote
        } else {
            CallState::StreamsRunning
        };
        self.enter(env, next)?;
        self.run_queued(env)
    }

    /// Our offer in the 2xx was never answered acceptably
    fn unanswered_offer(&mut self, env: &SessionEnv<'_>, details: &str) -> SessionResult<()> {
        warn!("Session {}: offer not answered: {}", self.id, details);
        if let Err(e) = self.send(env, OutgoingRequest::Bye { fork: None, reason: None }) {
            warn!("Session {}: BYE failed: {}", self.id, e);
        }
        self.finish(
            env,
            Termination::new(
                Reason::from_kind(ReasonKind::NotAcceptable),
                LogDisposition::Status(CallLogStatus::Aborted),
                TerminalPath::End,
            ),
        )
    }

    pub(super) fn incoming_timed_out(&mut self, env: &SessionEnv<'_>) -> SessionResult<()> {
        info!("Session {}: incoming call not answered in time", self.id);
        if let Err(e) = self.send(
            env,
            OutgoingRequest::Final(FinalResponse::new(486, "Busy Here")),
        ) {
            warn!("Session {}: 486 could not be sent: {}", self.id, e);
        }
        self.finish(
            env,
            Termination::new(
                Reason::new(ReasonKind::NotAnswered, 486, "Not answered"),
                LogDisposition::Status(CallLogStatus::Missed),
                TerminalPath::End,
            ),
        )
    }
}

/// Termination for a peer that reports the call was handled by another
/// device; `None` when the sub-reason is not a forking outcome
pub(super) fn elsewhere(sub: SubReason) -> Option<Termination> {
    match sub.code {
        200..=299 => Some(Termination::new(
            Reason::normal(sub.phrase.clone()).with_sub_reason(sub),
            LogDisposition::Elsewhere(CallLogStatus::AcceptedElsewhere),
            TerminalPath::End,
        )),
        600..=699 => Some(Termination::new(
            Reason::from_code(sub.code).with_sub_reason(sub),
            LogDisposition::Elsewhere(CallLogStatus::DeclinedElsewhere),
            TerminalPath::End,
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elsewhere_statuses() {
        let accepted = elsewhere(SubReason::sip(200, "Call completed elsewhere")).unwrap();
        assert_eq!(
            accepted.disposition,
            LogDisposition::Elsewhere(CallLogStatus::AcceptedElsewhere)
        );
        assert_eq!(accepted.reason.phrase, "Call completed elsewhere");
        assert_eq!(accepted.reason.kind, ReasonKind::Success);

        let declined = elsewhere(SubReason::sip(600, "Busy Everywhere")).unwrap();
        assert_eq!(
            declined.disposition,
            LogDisposition::Elsewhere(CallLogStatus::DeclinedElsewhere)
        );
        assert_eq!(declined.reason.kind, ReasonKind::DoNotDisturb);

        assert!(elsewhere(SubReason::sip(487, "Request Terminated")).is_none());
    }
}
