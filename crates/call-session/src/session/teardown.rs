//! Local and remote hang-up

use tracing::{debug, info, warn};

use super::incoming::elsewhere;
use super::{CallSession, LogDisposition, SessionEnv, Termination};
use crate::adapters::{FinalResponse, OutgoingRequest};
use crate::call_log::CallLogStatus;
use crate::errors::SessionResult;
use crate::offer_answer::MediaDescription;
use crate::reason::{Reason, ReasonKind, SubReason, TerminalPath};
use crate::types::{CallState, Headers};

impl CallSession {
    /// Hang up, whatever the state
    ///
    /// Ringing incoming calls are declined, outgoing attempts cancelled and
    /// established calls closed with BYE. Before the first provisional the
    /// CANCEL is deferred until one arrives. Terminating a session that has
    /// already ended does nothing.
    pub(crate) fn terminate(&mut self, env: &SessionEnv<'_>) -> SessionResult<()> {
        match self.state {
            state if state.is_terminal() => {
                debug!("Session {} already {}", self.id, state);
                Ok(())
            }
            CallState::Idle | CallState::OutgoingInit => self.finish(env, Termination::normal()),
            CallState::IncomingReceived | CallState::IncomingEarlyMedia => {
                self.decline(env, Reason::from_kind(ReasonKind::Declined))
            }
            _ if self.challenge.is_some() => self.finish(
                env,
                Termination::new(
                    Reason::from_kind(ReasonKind::Unauthorized),
                    LogDisposition::Status(CallLogStatus::Aborted),
                    TerminalPath::End,
                ),
            ),
            CallState::OutgoingProgress if !self.provisional_received => {
                info!(
                    "Session {}: no provisional yet, deferring CANCEL",
                    self.id
                );
                self.cancel_pending = true;
                Ok(())
            }
            CallState::OutgoingProgress
            | CallState::OutgoingRinging
            | CallState::OutgoingEarlyMedia
            | CallState::EarlyUpdatedByRemote => {
                if let Err(e) = self.send(env, OutgoingRequest::Cancel { reason: None }) {
                    warn!("Session {}: CANCEL failed: {}", self.id, e);
                }
                self.finish(env, Termination::normal())
            }
            _ => {
                let bye = OutgoingRequest::Bye {
                    fork: self.confirmed_fork.clone(),
                    reason: None,
                };
                if let Err(e) = self.send(env, bye) {
                    warn!("Session {}: BYE failed: {}", self.id, e);
                }
                self.finish(env, Termination::normal())
            }
        }
    }

    pub(super) fn on_bye(
        &mut self,
        env: &SessionEnv<'_>,
        reason: Option<SubReason>,
    ) -> SessionResult<()> {
        if self.state.is_terminal() {
            debug!("Session {}: BYE after {}", self.id, self.state);
            return Ok(());
        }
        if let Err(e) = self.send(env, OutgoingRequest::Final(FinalResponse::new(200, "OK"))) {
            debug!("Session {}: 200 to BYE not sent: {}", self.id, e);
        }
        let termination = match reason {
            Some(sub) => elsewhere(sub.clone()).unwrap_or_else(|| {
                Termination::new(
                    Reason::normal("Call terminated by remote").with_sub_reason(sub),
                    LogDisposition::Status(CallLogStatus::Aborted),
                    TerminalPath::End,
                )
            }),
            None => Termination::new(
                Reason::normal("Call terminated by remote"),
                LogDisposition::Status(CallLogStatus::Aborted),
                TerminalPath::End,
            ),
        };
        self.finish(env, termination)
    }

    pub(super) fn on_ack(
        &mut self,
        env: &SessionEnv<'_>,
        headers: Headers,
        body: Option<MediaDescription>,
    ) -> SessionResult<()> {
        if self.state.is_terminal() {
            return Ok(());
        }
        if self.awaiting_ack {
            return self.on_initial_ack(env, headers, body);
        }
        if self.renegotiation.remote_pending() {
            return self.on_update_ack(env, headers, body);
        }
        debug!("Session {}: ACK retransmission ignored", self.id);
        Ok(())
    }
}
