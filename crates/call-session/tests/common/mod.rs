//! Shared test harness
//!
//! An [`Endpoint`] is one registry with a recording transport, media engine
//! and listener. Endpoints created from a [`Network`] are wired together:
//! whatever one sends is delivered to the other as an inbound event. A
//! standalone endpoint only records what it sends; the test plays the peer
//! by injecting events.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::UnboundedSender;

use rvoip_call_session::{
    AnsweredRequest, CallLogStatus, CallSessionListener, CallState, ChallengeContext, DialogId, DriveReport,
    FinalResponse, ForkId, Headers, InboundEvent, ListenerContext, MediaDescription, MediaEngine,
    MediaError, MediaEvent, MediaParameters, MemoryCallLogStore, Negotiator, OutgoingRequest,
    PortPlan, Reason, SessionConfig, SessionHandle, SessionId, SessionRegistry, SessionSnapshot,
    SignalingEvent, SignalingTransport, StreamStats, ToneEvent, TransportError,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("rvoip_call_session=debug")
        .with_test_writer()
        .try_init();
}

/// Config for tests: every timer disabled unless a test turns it on
pub fn quiet_config() -> SessionConfig {
    SessionConfig {
        no_media_timeout_secs: 0,
        incoming_timeout_secs: 0,
        ..SessionConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Link {
    peer_uri: String,
    peer_dialog: DialogId,
    /// Fork id the peer sees on our responses
    tag: ForkId,
}

#[derive(Default)]
struct NetworkState {
    inboxes: HashMap<String, UnboundedSender<InboundEvent>>,
    links: HashMap<DialogId, Link>,
    /// Dialogs with an INVITE, re-INVITE or UPDATE awaiting its final response
    open_transactions: HashMap<DialogId, AnsweredRequest>,
}

/// In-memory signaling between endpoints, keyed by URI
#[derive(Default)]
pub struct Network {
    state: Mutex<NetworkState>,
}

impl Network {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn endpoint(self: &Arc<Self>, uri: &str, config: SessionConfig) -> Endpoint {
        let endpoint = Endpoint::build(uri, config, None, Some(Arc::clone(self)));
        self.state
            .lock()
            .inboxes
            .insert(uri.to_string(), endpoint.registry.event_sender());
        endpoint
    }

    fn open_dialog(&self, from: &str, to: &str) -> Result<DialogId, TransportError> {
        let mut state = self.state.lock();
        if !state.inboxes.contains_key(to) {
            return Err(TransportError::InvalidAddress {
                address: to.to_string(),
            });
        }
        let ours = DialogId::new();
        let theirs = DialogId::new();
        state.links.insert(
            ours,
            Link {
                peer_uri: to.to_string(),
                peer_dialog: theirs,
                tag: ForkId(format!("tag-{}", from)),
            },
        );
        state.links.insert(
            theirs,
            Link {
                peer_uri: from.to_string(),
                peer_dialog: ours,
                tag: ForkId(format!("tag-{}", to)),
            },
        );
        Ok(ours)
    }

    fn deliver(&self, dialog: &DialogId, request: OutgoingRequest) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let Some(link) = state.links.get(dialog).cloned() else {
            return Err(TransportError::DialogNotFound { dialog: *dialog });
        };
        let event = match request {
            OutgoingRequest::Invite {
                from,
                to,
                offer,
                headers,
                subject,
                ..
            } => {
                state.open_transactions.insert(*dialog, AnsweredRequest::Invite);
                SignalingEvent::Invite {
                    from,
                    to,
                    offer,
                    headers,
                    subject,
                }
            }
            OutgoingRequest::Provisional {
                code,
                phrase,
                answer,
            } => SignalingEvent::Provisional {
                fork: link.tag.clone(),
                code,
                phrase,
                body: answer,
            },
            OutgoingRequest::Final(response) => {
                let Some(answers) = state.open_transactions.remove(&link.peer_dialog) else {
                    // answers BYE or CANCEL; absorbed by the transaction layer
                    return Ok(());
                };
                SignalingEvent::Final {
                    fork: link.tag.clone(),
                    answers,
                    response,
                }
            }
            OutgoingRequest::Update {
                method,
                offer,
                headers,
                ..
            } => {
                state.open_transactions.insert(*dialog, AnsweredRequest::Renegotiation);
                SignalingEvent::UpdateRequest {
                    method,
                    offer,
                    headers,
                }
            }
            OutgoingRequest::Ack {
                answer, headers, ..
            } => SignalingEvent::Ack {
                headers,
                body: answer,
            },
            OutgoingRequest::Bye { reason, .. } => SignalingEvent::Bye { reason },
            OutgoingRequest::Cancel { reason } => SignalingEvent::Cancel { reason },
        };
        if let Some(inbox) = state.inboxes.get(&link.peer_uri) {
            let _ = inbox.send(InboundEvent::Signaling {
                dialog: link.peer_dialog,
                event,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

pub struct TestTransport {
    uri: String,
    network: Option<Arc<Network>>,
    sent: Mutex<Vec<(DialogId, OutgoingRequest)>>,
    pub fail_create: AtomicBool,
    pub fail_send: AtomicBool,
}

impl TestTransport {
    fn new(uri: &str, network: Option<Arc<Network>>) -> Self {
        Self {
            uri: uri.to_string(),
            network,
            sent: Mutex::new(Vec::new()),
            fail_create: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
        }
    }

    pub fn sent(&self) -> Vec<(DialogId, OutgoingRequest)> {
        self.sent.lock().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl SignalingTransport for TestTransport {
    fn create_dialog(&self, _from: &str, to: &str) -> Result<DialogId, TransportError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TransportError::send_failed("no route"));
        }
        match &self.network {
            Some(network) => network.open_dialog(&self.uri, to),
            None => Ok(DialogId::new()),
        }
    }

    fn send(&self, dialog: &DialogId, request: OutgoingRequest) -> Result<(), TransportError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(TransportError::send_failed("socket closed"));
        }
        self.sent.lock().push((*dialog, request.clone()));
        match &self.network {
            Some(network) => network.deliver(dialog, request),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Media engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum MediaCall {
    Start {
        session: SessionId,
        early: bool,
        description: MediaDescription,
    },
    Update {
        session: SessionId,
        description: MediaDescription,
    },
    Pause(SessionId),
    Resume(SessionId),
    Stop(SessionId),
    Mute(SessionId, bool),
}

#[derive(Default)]
pub struct RecordingMedia {
    calls: Mutex<Vec<MediaCall>>,
    pub fail_start: AtomicBool,
    pub fail_update: AtomicBool,
}

impl RecordingMedia {
    pub fn calls(&self) -> Vec<MediaCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, id: &SessionId) -> Vec<MediaCall> {
        self.calls()
            .into_iter()
            .filter(|call| match call {
                MediaCall::Start { session, .. } | MediaCall::Update { session, .. } => session == id,
                MediaCall::Pause(session)
                | MediaCall::Resume(session)
                | MediaCall::Stop(session)
                | MediaCall::Mute(session, _) => session == id,
            })
            .collect()
    }
}

impl MediaEngine for RecordingMedia {
    fn start_streams(
        &self,
        session: &SessionId,
        description: &MediaDescription,
        early: bool,
    ) -> Result<(), MediaError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(MediaError::start_failed("no audio device"));
        }
        self.calls.lock().push(MediaCall::Start {
            session: session.clone(),
            early,
            description: description.clone(),
        });
        Ok(())
    }

    fn update_streams(&self, session: &SessionId, description: &MediaDescription) -> Result<(), MediaError> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(MediaError::start_failed("codec switch failed"));
        }
        self.calls.lock().push(MediaCall::Update {
            session: session.clone(),
            description: description.clone(),
        });
        Ok(())
    }

    fn pause_streams(&self, session: &SessionId) -> Result<(), MediaError> {
        self.calls.lock().push(MediaCall::Pause(session.clone()));
        Ok(())
    }

    fn resume_streams(&self, session: &SessionId) -> Result<(), MediaError> {
        self.calls.lock().push(MediaCall::Resume(session.clone()));
        Ok(())
    }

    fn stop_streams(&self, session: &SessionId) {
        self.calls.lock().push(MediaCall::Stop(session.clone()));
    }

    fn set_microphone_muted(&self, session: &SessionId, muted: bool) {
        self.calls.lock().push(MediaCall::Mute(session.clone(), muted));
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    State {
        session: SessionId,
        state: CallState,
        message: String,
    },
    Outcome {
        session: SessionId,
        reason: Reason,
        status: CallLogStatus,
    },
    Ack {
        session: SessionId,
        headers: Headers,
        is_incoming: bool,
    },
    Challenge {
        session: SessionId,
        challenge: ChallengeContext,
    },
    Tone {
        session: SessionId,
        tone: ToneEvent,
    },
    Stats {
        session: SessionId,
    },
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().clone()
    }

    pub fn states(&self, id: &SessionId) -> Vec<CallState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::State { session, state, .. } if &session == id => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn outcomes(&self, id: &SessionId) -> Vec<(Reason, CallLogStatus)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Outcome {
                    session,
                    reason,
                    status,
                } if &session == id => Some((reason, status)),
                _ => None,
            })
            .collect()
    }

    pub fn tones(&self, id: &SessionId) -> Vec<ToneEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Tone { session, tone } if &session == id => Some(tone),
                _ => None,
            })
            .collect()
    }

    pub fn acks(&self, id: &SessionId) -> Vec<(Headers, bool)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Ack {
                    session,
                    headers,
                    is_incoming,
                } if &session == id => Some((headers, is_incoming)),
                _ => None,
            })
            .collect()
    }

    pub fn challenges(&self, id: &SessionId) -> Vec<ChallengeContext> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Challenge { session, challenge } if &session == id => Some(challenge),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Recorded) {
        self.events.lock().push(event);
    }
}

impl CallSessionListener for RecordingListener {
    fn on_state_changed(
        &self,
        _ctx: &ListenerContext<'_>,
        session: &SessionSnapshot,
        state: CallState,
        message: &str,
    ) {
        self.push(Recorded::State {
            session: session.id.clone(),
            state,
            message: message.to_string(),
        });
    }

    fn on_outcome_available(
        &self,
        _ctx: &ListenerContext<'_>,
        session: &SessionSnapshot,
        reason: &Reason,
        status: CallLogStatus,
    ) {
        self.push(Recorded::Outcome {
            session: session.id.clone(),
            reason: reason.clone(),
            status,
        });
    }

    fn on_acknowledgement(
        &self,
        _ctx: &ListenerContext<'_>,
        session: &SessionSnapshot,
        headers: &Headers,
        is_incoming: bool,
    ) {
        self.push(Recorded::Ack {
            session: session.id.clone(),
            headers: headers.clone(),
            is_incoming,
        });
    }

    fn on_credential_challenge(
        &self,
        _ctx: &ListenerContext<'_>,
        session: &SessionSnapshot,
        challenge: &ChallengeContext,
    ) {
        self.push(Recorded::Challenge {
            session: session.id.clone(),
            challenge: challenge.clone(),
        });
    }

    fn on_tone(&self, _ctx: &ListenerContext<'_>, session: &SessionSnapshot, tone: ToneEvent) {
        self.push(Recorded::Tone {
            session: session.id.clone(),
            tone,
        });
    }

    fn on_stats_updated(&self, _ctx: &ListenerContext<'_>, session: &SessionSnapshot, _stats: &StreamStats) {
        self.push(Recorded::Stats {
            session: session.id.clone(),
        });
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

pub struct Endpoint {
    pub uri: String,
    pub registry: SessionRegistry,
    pub transport: Arc<TestTransport>,
    pub media: Arc<RecordingMedia>,
    pub listener: Arc<RecordingListener>,
    pub now: DateTime<Utc>,
}

impl Endpoint {
    /// Endpoint whose peer is played by the test
    pub fn scripted(config: SessionConfig) -> Self {
        Self::build("sip:local@test", config, None, None)
    }

    pub fn scripted_with_params(config: SessionConfig, params: MediaParameters) -> Self {
        Self::build("sip:local@test", config, Some(params), None)
    }

    fn build(
        uri: &str,
        config: SessionConfig,
        params: Option<MediaParameters>,
        network: Option<Arc<Network>>,
    ) -> Self {
        init_tracing();
        let transport = Arc::new(TestTransport::new(uri, network));
        let media = Arc::new(RecordingMedia::default());
        let listener = Arc::new(RecordingListener::default());
        let registry = SessionRegistry::new(
            config,
            transport.clone(),
            media.clone(),
            Arc::new(MemoryCallLogStore::new()),
        )
        .expect("valid test config");
        let registry = match params {
            Some(params) => registry.with_default_params(params),
            None => registry,
        };
        registry.add_listener(listener.clone());
        let now = registry.now();
        Self {
            uri: uri.to_string(),
            registry,
            transport,
            media,
            listener,
            now,
        }
    }

    pub fn call(&mut self, to: &str) -> SessionHandle {
        let from = self.uri.clone();
        self.registry
            .invite(from, to, None, None)
            .expect("invite accepted")
    }

    pub fn step(&mut self) -> DriveReport {
        self.registry.drive(self.now)
    }

    pub fn advance(&mut self, seconds: i64) -> DriveReport {
        self.now += Duration::seconds(seconds);
        self.step()
    }

    pub fn advance_millis(&mut self, millis: i64) -> DriveReport {
        self.now += Duration::milliseconds(millis);
        self.step()
    }

    pub fn inject(&self, dialog: DialogId, event: SignalingEvent) {
        self.registry
            .event_sender()
            .send(InboundEvent::Signaling { dialog, event })
            .expect("inbox open");
    }

    pub fn inject_media(&self, session: &SessionId, event: MediaEvent) {
        self.registry
            .event_sender()
            .send(InboundEvent::Media {
                session: session.clone(),
                event,
            })
            .expect("inbox open");
    }

    /// Only session in the registry
    pub fn only_session(&self) -> SessionId {
        let ids = self.registry.session_ids();
        assert_eq!(ids.len(), 1, "expected exactly one session, found {:?}", ids);
        ids[0].clone()
    }

    pub fn handle(&self, id: &SessionId) -> SessionHandle {
        self.registry.handle(id).expect("session registered")
    }

    pub fn sent(&self) -> Vec<OutgoingRequest> {
        self.transport.sent().into_iter().map(|(_, r)| r).collect()
    }

    pub fn sent_names(&self) -> Vec<&'static str> {
        self.transport.sent().iter().map(|(_, r)| r.name()).collect()
    }

    pub fn last_sent(&self) -> OutgoingRequest {
        self.sent().pop().expect("something was sent")
    }

    /// Offer carried by the most recent INVITE or re-INVITE
    pub fn last_offer(&self) -> MediaDescription {
        self.sent()
            .into_iter()
            .rev()
            .find_map(|r| match r {
                OutgoingRequest::Invite { offer, .. } | OutgoingRequest::Update { offer, .. } => offer,
                _ => None,
            })
            .expect("an offer was sent")
    }

    /// Body of the most recent final response we sent
    pub fn last_final(&self) -> FinalResponse {
        self.sent()
            .into_iter()
            .rev()
            .find_map(|r| match r {
                OutgoingRequest::Final(response) => Some(response),
                _ => None,
            })
            .expect("a final response was sent")
    }
}

/// Drive every endpoint until no events are left in flight
pub fn settle(endpoints: &mut [&mut Endpoint]) {
    for _ in 0..32 {
        let mut processed = 0;
        for endpoint in endpoints.iter_mut() {
            processed += endpoint.step().events_processed;
        }
        if processed == 0 {
            return;
        }
    }
    panic!("endpoints did not settle");
}

// ---------------------------------------------------------------------------
// Scripted peer helpers
// ---------------------------------------------------------------------------

/// Negotiator standing in for the remote party
pub fn peer_negotiator() -> Negotiator {
    Negotiator::new(
        PortPlan {
            audio: 40000,
            video: 40002,
            text: 40004,
        },
        false,
    )
}

/// Answer a peer with default parameters would give
pub fn peer_answer(offer: &MediaDescription) -> MediaDescription {
    peer_negotiator()
        .compute_answer(offer, &MediaParameters::default(), None)
        .expect("peer can answer")
}

pub fn peer_answer_with(offer: &MediaDescription, params: &MediaParameters) -> MediaDescription {
    peer_negotiator()
        .compute_answer(offer, params, None)
        .expect("peer can answer")
}

pub fn peer_offer(params: &MediaParameters) -> MediaDescription {
    peer_negotiator()
        .compute_offer(params, None)
        .expect("peer can offer")
}

pub fn fork(tag: &str) -> ForkId {
    ForkId(tag.to_string())
}

pub fn ringing(fork_tag: &str) -> SignalingEvent {
    SignalingEvent::Provisional {
        fork: fork(fork_tag),
        code: 180,
        phrase: "Ringing".into(),
        body: None,
    }
}

/// Final response to the initial INVITE
pub fn final_response(fork_tag: &str, response: FinalResponse) -> SignalingEvent {
    SignalingEvent::Final {
        fork: fork(fork_tag),
        answers: AnsweredRequest::Invite,
        response,
    }
}

/// Final response to a re-INVITE or UPDATE
pub fn update_response(fork_tag: &str, response: FinalResponse) -> SignalingEvent {
    SignalingEvent::Final {
        fork: fork(fork_tag),
        answers: AnsweredRequest::Renegotiation,
        response,
    }
}

pub fn incoming_invite(offer: Option<MediaDescription>) -> SignalingEvent {
    SignalingEvent::Invite {
        from: "sip:remote@test".into(),
        to: "sip:local@test".into(),
        offer,
        headers: Headers::new(),
        subject: None,
    }
}

/// Scripted caller: place a call and bring it to StreamsRunning
pub fn established_outgoing(endpoint: &mut Endpoint) -> (SessionHandle, DialogId) {
    let handle = endpoint.call("sip:remote@test");
    let dialog = handle.snapshot().dialog.expect("dialog created");
    let offer = endpoint.last_offer();
    endpoint.inject(dialog, ringing("a"));
    endpoint.inject(
        dialog,
        final_response("a", FinalResponse::ok(Some(peer_answer(&offer)))),
    );
    endpoint.step();
    assert_eq!(handle.state(), CallState::StreamsRunning);
    (handle, dialog)
}

/// Scripted callee: receive a call, accept it and acknowledge
pub fn established_incoming(endpoint: &mut Endpoint) -> (SessionHandle, DialogId) {
    let dialog = DialogId::new();
    endpoint.inject(
        dialog,
        incoming_invite(Some(peer_offer(&MediaParameters::default()))),
    );
    endpoint.step();
    let id = endpoint.only_session();
    endpoint.registry.accept(&id, None).expect("accept");
    endpoint.inject(
        dialog,
        SignalingEvent::Ack {
            headers: Headers::new(),
            body: None,
        },
    );
    endpoint.step();
    let handle = endpoint.handle(&id);
    assert_eq!(handle.state(), CallState::StreamsRunning);
    (handle, dialog)
}
