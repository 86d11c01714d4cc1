//! Session registry
//!
//! Owns every [`CallSession`], indexes them by dialog, and is the only way
//! to mutate one. Application operations run immediately; collaborator
//! events are queued on an unbounded channel and applied in order by
//! [`SessionRegistry::drive`], which also evaluates timers and performs
//! release processing.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::adapters::{Credentials, MediaEngine, SignalingTransport};
use crate::call_log::{CallLogRecord, CallLogStore, JsonLinesCallLogStore, MemoryCallLogStore};
use crate::config::SessionConfig;
use crate::errors::{SessionError, SessionResult};
use crate::events::{InboundEvent, SignalingEvent};
use crate::notify::{CallSessionListener, ListenerId, ListenerSet};
use crate::offer_answer::Negotiator;
use crate::params::{MediaParameters, ParamDelta};
use crate::reason::{Reason, ReasonKind};
use crate::session::{CallSession, CancelOutcome, SessionEnv, SessionHandle};
use crate::types::{DialogId, SessionId};

/// Everything a session needs besides itself
struct Collaborators {
    transport: Arc<dyn SignalingTransport>,
    media: Arc<dyn MediaEngine>,
    log_store: Arc<dyn CallLogStore>,
    config: SessionConfig,
    negotiator: Negotiator,
    listeners: ListenerSet<dyn CallSessionListener>,
}

impl Collaborators {
    fn env(&self, now: DateTime<Utc>) -> SessionEnv<'_> {
        SessionEnv {
            transport: self.transport.as_ref(),
            media: self.media.as_ref(),
            log_store: self.log_store.as_ref(),
            config: &self.config,
            negotiator: &self.negotiator,
            listeners: &self.listeners,
            now,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_created: usize,
    pub total_released: usize,
}

/// What one [`SessionRegistry::drive`] call did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DriveReport {
    pub events_processed: usize,
    pub released: Vec<SessionId>,
}

pub struct SessionRegistry {
    sessions: HashMap<SessionId, CallSession>,
    dialogs: HashMap<DialogId, SessionId>,
    collab: Collaborators,
    /// Local parameters for incoming sessions and invites without their own
    default_params: MediaParameters,
    inbox_tx: mpsc::UnboundedSender<InboundEvent>,
    inbox_rx: mpsc::UnboundedReceiver<InboundEvent>,
    /// Clock of the last drive; application operations are stamped with it
    now: DateTime<Utc>,
    stats: RegistryStats,
}

impl SessionRegistry {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn SignalingTransport>,
        media: Arc<dyn MediaEngine>,
        log_store: Arc<dyn CallLogStore>,
    ) -> SessionResult<Self> {
        config.validate()?;
        let negotiator = Negotiator::new(config.port_plan(), config.rejected_stream_keeps_direction);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Ok(Self {
            sessions: HashMap::new(),
            dialogs: HashMap::new(),
            collab: Collaborators {
                transport,
                media,
                log_store,
                config,
                negotiator,
                listeners: ListenerSet::new(),
            },
            default_params: MediaParameters::default(),
            inbox_tx,
            inbox_rx,
            now: Utc::now(),
            stats: RegistryStats::default(),
        })
    }

    /// Build a registry whose call-log store follows `config.call_log_path`
    pub fn from_config(
        config: SessionConfig,
        transport: Arc<dyn SignalingTransport>,
        media: Arc<dyn MediaEngine>,
    ) -> SessionResult<Self> {
        let log_store: Arc<dyn CallLogStore> = match &config.call_log_path {
            Some(path) => {
                info!("Persisting call logs to {}", path.display());
                Arc::new(JsonLinesCallLogStore::new(path))
            }
            None => Arc::new(MemoryCallLogStore::new()),
        };
        Self::new(config, transport, media, log_store)
    }

    pub fn with_default_params(mut self, params: MediaParameters) -> Self {
        self.default_params = params;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.collab.config
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats
    }

    /// Clock used for operations since the last drive
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Sender collaborators use to queue events for the next drive
    pub fn event_sender(&self) -> mpsc::UnboundedSender<InboundEvent> {
        self.inbox_tx.clone()
    }

    pub fn handle(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.get(id).map(CallSession::handle)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Session bound to a dialog
    pub fn session_for_dialog(&self, dialog: &DialogId) -> Option<SessionId> {
        self.dialogs.get(dialog).cloned()
    }

    /// Every flushed call log
    pub fn call_logs(&self) -> SessionResult<Vec<CallLogRecord>> {
        self.collab.log_store.load_all()
    }

    /// Listener for every session, notified after the session's own
    pub fn add_listener(&self, listener: Arc<dyn CallSessionListener>) -> ListenerId {
        self.collab.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.collab.listeners.remove(id)
    }

    pub fn add_session_listener(
        &self,
        id: &SessionId,
        listener: Arc<dyn CallSessionListener>,
    ) -> SessionResult<ListenerId> {
        let session = self
            .sessions
            .get(id)
            .ok_or_else(|| SessionError::SessionNotFound(id.clone()))?;
        Ok(session.add_listener(listener))
    }

    pub fn remove_session_listener(&self, id: &SessionId, listener: ListenerId) -> SessionResult<bool> {
        let session = self
            .sessions
            .get(id)
            .ok_or_else(|| SessionError::SessionNotFound(id.clone()))?;
        Ok(session.remove_listener(listener))
    }

    /// Place an outgoing call
    pub fn invite(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        params: Option<MediaParameters>,
        subject: Option<String>,
    ) -> SessionResult<SessionHandle> {
        let local = params.unwrap_or_else(|| self.default_params.clone());
        local.validate()?;
        let session = CallSession::new_outgoing(from, to, local, subject, &self.collab.config, self.now);
        let id = session.id().clone();
        let handle = session.handle();
        info!("Created outgoing session {}", id);
        self.sessions.insert(id.clone(), session);
        self.stats.total_created += 1;

        self.with_session(&id, |session, env| session.start_invite(env))?;
        Ok(handle)
    }

    pub fn accept(&mut self, id: &SessionId, params: Option<MediaParameters>) -> SessionResult<()> {
        self.with_session(id, |session, env| session.accept(env, params))
    }

    pub fn accept_early_media(
        &mut self,
        id: &SessionId,
        params: Option<MediaParameters>,
    ) -> SessionResult<()> {
        self.with_session(id, |session, env| session.accept_early_media(env, params))
    }

    /// Decline an incoming call with the code mapped from `kind`
    pub fn decline(&mut self, id: &SessionId, kind: ReasonKind) -> SessionResult<()> {
        self.with_session(id, |session, env| session.decline(env, Reason::from_kind(kind)))
    }

    /// Decline with a custom code, phrase, retry-after hint and chained cause
    pub fn decline_with_reason(&mut self, id: &SessionId, reason: Reason) -> SessionResult<()> {
        self.with_session(id, |session, env| session.decline(env, reason))
    }

    pub fn terminate(&mut self, id: &SessionId) -> SessionResult<()> {
        self.with_session(id, |session, env| session.terminate(env))
    }

    pub fn pause(&mut self, id: &SessionId) -> SessionResult<()> {
        self.with_session(id, |session, env| session.pause(env))
    }

    pub fn resume(&mut self, id: &SessionId) -> SessionResult<()> {
        self.with_session(id, |session, env| session.resume(env))
    }

    pub fn update(&mut self, id: &SessionId, delta: ParamDelta) -> SessionResult<()> {
        self.with_session(id, |session, env| session.update(env, delta))
    }

    pub fn cancel_update(&mut self, id: &SessionId) -> SessionResult<CancelOutcome> {
        self.with_session(id, |session, env| session.cancel_update(env))
    }

    pub fn authenticate(&mut self, id: &SessionId, credentials: Credentials) -> SessionResult<()> {
        self.with_session(id, |session, env| session.authenticate(env, credentials))
    }

    pub fn set_log_reference(&mut self, id: &SessionId, key: impl Into<String>) -> SessionResult<()> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::SessionNotFound(id.clone()))?;
        session.set_log_reference(key);
        Ok(())
    }

    /// Apply queued events, evaluate timers and release ended sessions
    pub fn drive(&mut self, now: DateTime<Utc>) -> DriveReport {
        self.now = now;
        let mut report = DriveReport::default();

        while let Ok(event) = self.inbox_rx.try_recv() {
            report.events_processed += 1;
            self.dispatch(event);
        }

        let ids = self.session_ids();
        for id in &ids {
            let result = self.with_session(id, |session, env| session.on_tick(env));
            if let Err(e) = result {
                warn!("Session {}: timer evaluation failed: {}", id, e);
            }
        }

        for id in ids {
            let Some(session) = self.sessions.get_mut(&id) else {
                continue;
            };
            if session.is_release_pending() {
                let env = self.collab.env(now);
                session.release(&env);
            }
        }
        report.released = self.reap();
        report
    }

    fn dispatch(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Signaling {
                dialog,
                event:
                    SignalingEvent::Invite {
                        from,
                        to,
                        offer,
                        headers,
                        subject,
                    },
            } if !self.dialogs.contains_key(&dialog) => {
                let session = CallSession::new_incoming(
                    dialog,
                    from,
                    to,
                    self.default_params.clone(),
                    subject,
                    &self.collab.config,
                    self.now,
                );
                let id = session.id().clone();
                info!("Created incoming session {} on dialog {}", id, dialog);
                self.dialogs.insert(dialog, id.clone());
                self.sessions.insert(id.clone(), session);
                self.stats.total_created += 1;
                if let Err(e) =
                    self.with_session(&id, |session, env| session.receive_invite(env, offer, &headers))
                {
                    warn!("Session {}: invitation not processed: {}", id, e);
                }
            }
            InboundEvent::Signaling { dialog, event } => {
                let Some(id) = self.dialogs.get(&dialog).cloned() else {
                    debug!("Dropping {} for unknown dialog {}", event.name(), dialog);
                    return;
                };
                let name = event.name();
                if let Err(e) = self.with_session(&id, |session, env| session.handle_signaling(env, event)) {
                    warn!("Session {}: {} not processed: {}", id, name, e);
                }
            }
            InboundEvent::Media { session, event } => {
                if !self.sessions.contains_key(&session) {
                    debug!("Dropping media event for unknown session {}", session);
                    return;
                }
                if let Err(e) = self.with_session(&session, |s, env| s.handle_media(env, event)) {
                    warn!("Session {}: media event not processed: {}", session, e);
                }
            }
        }
    }

    /// Run one operation on a session, then index its dialog and drop it if
    /// it was released
    fn with_session<T>(
        &mut self,
        id: &SessionId,
        op: impl FnOnce(&mut CallSession, &SessionEnv<'_>) -> SessionResult<T>,
    ) -> SessionResult<T> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::SessionNotFound(id.clone()))?;
        let env = self.collab.env(self.now);
        let result = op(session, &env);
        if let Some(dialog) = session.dialog() {
            self.dialogs.entry(dialog).or_insert_with(|| id.clone());
        }
        self.reap();
        result
    }

    fn reap(&mut self) -> Vec<SessionId> {
        let released: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.is_released())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &released {
            if let Some(session) = self.sessions.remove(id) {
                if let Some(dialog) = session.dialog() {
                    self.dialogs.remove(&dialog);
                }
                self.stats.total_released += 1;
                debug!("Removed session {}", id);
            }
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{OutgoingRequest, StreamStats};
    use crate::errors::{MediaError, TransportError};
    use crate::offer_answer::MediaDescription;
    use crate::types::CallState;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct NullTransport {
        sent: Mutex<Vec<OutgoingRequest>>,
    }

    impl SignalingTransport for NullTransport {
        fn create_dialog(&self, _from: &str, _to: &str) -> Result<DialogId, TransportError> {
            Ok(DialogId::new())
        }

        fn send(&self, _dialog: &DialogId, request: OutgoingRequest) -> Result<(), TransportError> {
            self.sent.lock().push(request);
            Ok(())
        }
    }

    struct NullMedia;

    impl MediaEngine for NullMedia {
        fn start_streams(&self, _: &SessionId, _: &MediaDescription, _: bool) -> Result<(), MediaError> {
            Ok(())
        }
        fn update_streams(&self, _: &SessionId, _: &MediaDescription) -> Result<(), MediaError> {
            Ok(())
        }
        fn pause_streams(&self, _: &SessionId) -> Result<(), MediaError> {
            Ok(())
        }
        fn resume_streams(&self, _: &SessionId) -> Result<(), MediaError> {
            Ok(())
        }
        fn stop_streams(&self, _: &SessionId) {}
        fn set_microphone_muted(&self, _: &SessionId, _: bool) {}
    }

    fn registry() -> (SessionRegistry, Arc<NullTransport>) {
        let transport = Arc::new(NullTransport::default());
        let registry =
            SessionRegistry::from_config(SessionConfig::default(), transport.clone(), Arc::new(NullMedia))
                .unwrap();
        (registry, transport)
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = SessionConfig {
            glare_retry_min_ms: 5000,
            ..SessionConfig::default()
        };
        let result = SessionRegistry::from_config(config, Arc::new(NullTransport::default()), Arc::new(NullMedia));
        assert!(matches!(result, Err(SessionError::Configuration { .. })));
    }

    #[test]
    fn test_invite_indexes_dialog() {
        let (mut registry, transport) = registry();
        let handle = registry.invite("sip:a@x", "sip:b@y", None, None).unwrap();
        assert_eq!(handle.state(), CallState::OutgoingProgress);
        let dialog = handle.snapshot().dialog.unwrap();
        assert_eq!(registry.session_for_dialog(&dialog), Some(handle.id().clone()));
        assert_eq!(transport.sent.lock()[0].name(), "INVITE");
        assert_eq!(registry.stats().total_created, 1);
    }

    #[test]
    fn test_unknown_session_operations_fail() {
        let (mut registry, _) = registry();
        let missing = SessionId("missing".into());
        assert!(matches!(
            registry.terminate(&missing),
            Err(SessionError::SessionNotFound(_))
        ));
        assert!(registry.handle(&missing).is_none());
    }

    #[test]
    fn test_terminated_session_released_on_drive() {
        let (mut registry, _) = registry();
        let handle = registry.invite("sip:a@x", "sip:b@y", None, None).unwrap();
        let id = handle.id().clone();
        let sender = registry.event_sender();
        let dialog = handle.snapshot().dialog.unwrap();
        sender
            .send(InboundEvent::Signaling {
                dialog,
                event: SignalingEvent::Provisional {
                    fork: crate::types::ForkId("f1".into()),
                    code: 180,
                    phrase: "Ringing".into(),
                    body: None,
                },
            })
            .unwrap();
        let report = registry.drive(registry.now());
        assert_eq!(report.events_processed, 1);
        assert_eq!(handle.state(), CallState::OutgoingRinging);

        registry.terminate(&id).unwrap();
        assert_eq!(handle.state(), CallState::End);
        assert_eq!(registry.session_ids(), vec![id.clone()]);

        let report = registry.drive(registry.now());
        assert_eq!(report.released, vec![id]);
        assert_eq!(handle.state(), CallState::Released);
        assert!(registry.session_ids().is_empty());
        assert!(registry.session_for_dialog(&dialog).is_none());
        assert_eq!(registry.call_logs().unwrap().len(), 1);
    }

    #[test]
    fn test_media_event_for_unknown_session_is_dropped() {
        let (mut registry, _) = registry();
        registry
            .event_sender()
            .send(InboundEvent::Media {
                session: SessionId("gone".into()),
                event: crate::events::MediaEvent::StatsUpdated(StreamStats {
                    stream: crate::types::StreamType::Audio,
                    packets_sent: 1,
                    packets_received: 1,
                    packet_loss: 0.0,
                    jitter_ms: 0.0,
                    round_trip_ms: None,
                }),
            })
            .unwrap();
        assert_eq!(registry.drive(registry.now()).events_processed, 1);
    }
}
