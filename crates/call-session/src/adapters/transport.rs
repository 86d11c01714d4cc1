//! Signaling transport seam
//!
//! Thin translation layer between the engine and whatever owns SIP
//! transactions. The transport frames, retransmits and routes; the engine
//! only hands it structured requests.

use serde::{Deserialize, Serialize};

use crate::errors::TransportError;
use crate::offer_answer::MediaDescription;
use crate::reason::SubReason;
use crate::types::{DialogId, ForkId, Headers};

/// In-dialog method used for a renegotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateMethod {
    ReInvite,
    Update,
}

/// Credentials supplied after a challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub realm: String,
    pub secret: String,
}

/// Final response sent or received
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalResponse {
    pub code: u16,
    pub phrase: String,
    pub body: Option<MediaDescription>,
    pub headers: Headers,
    pub retry_after: Option<u32>,
    /// Chained cause carried in a Reason header
    pub reason_header: Option<SubReason>,
    /// Realm of a 401/407 challenge
    pub realm: Option<String>,
}

impl FinalResponse {
    pub fn new(code: u16, phrase: impl Into<String>) -> Self {
        Self {
            code,
            phrase: phrase.into(),
            body: None,
            headers: Headers::new(),
            retry_after: None,
            reason_header: None,
            realm: None,
        }
    }

    pub fn ok(body: Option<MediaDescription>) -> Self {
        Self {
            body,
            ..Self::new(200, "OK")
        }
    }

    pub fn with_body(mut self, body: MediaDescription) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_retry_after(mut self, seconds: Option<u32>) -> Self {
        self.retry_after = seconds;
        self
    }

    pub fn with_reason_header(mut self, reason: Option<SubReason>) -> Self {
        self.reason_header = reason;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_challenge(&self) -> bool {
        self.code == 401 || self.code == 407
    }
}

/// Requests and responses the engine asks the transport to send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutgoingRequest {
    Invite {
        from: String,
        to: String,
        offer: Option<MediaDescription>,
        headers: Headers,
        subject: Option<String>,
        credentials: Option<Credentials>,
    },
    Provisional {
        code: u16,
        phrase: String,
        answer: Option<MediaDescription>,
    },
    Final(FinalResponse),
    Update {
        method: UpdateMethod,
        offer: Option<MediaDescription>,
        headers: Headers,
        subject: Option<String>,
    },
    Ack {
        fork: Option<ForkId>,
        answer: Option<MediaDescription>,
        headers: Headers,
    },
    Bye {
        fork: Option<ForkId>,
        reason: Option<SubReason>,
    },
    Cancel {
        reason: Option<SubReason>,
    },
}

impl OutgoingRequest {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            OutgoingRequest::Invite { .. } => "INVITE",
            OutgoingRequest::Provisional { .. } => "provisional",
            OutgoingRequest::Final(_) => "final response",
            OutgoingRequest::Update {
                method: UpdateMethod::ReInvite,
                ..
            } => "re-INVITE",
            OutgoingRequest::Update {
                method: UpdateMethod::Update,
                ..
            } => "UPDATE",
            OutgoingRequest::Ack { .. } => "ACK",
            OutgoingRequest::Bye { .. } => "BYE",
            OutgoingRequest::Cancel { .. } => "CANCEL",
        }
    }
}

/// Outgoing side of the signaling transaction layer
pub trait SignalingTransport: Send + Sync {
    /// Allocate a dialog for a new outgoing invitation
    fn create_dialog(&self, from: &str, to: &str) -> Result<DialogId, TransportError>;

    /// Send a request or response within `dialog`
    fn send(&self, dialog: &DialogId, request: OutgoingRequest) -> Result<(), TransportError>;
}
