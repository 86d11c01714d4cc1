//! Inbound events
//!
//! Everything the collaborators report to the engine. Events are queued on
//! an unbounded channel and applied in order during
//! [`SessionRegistry::drive`](crate::registry::SessionRegistry::drive).

use serde::{Deserialize, Serialize};

use crate::adapters::{FinalResponse, StreamStats, UpdateMethod};
use crate::offer_answer::MediaDescription;
use crate::reason::SubReason;
use crate::types::{DialogId, ForkId, Headers, SessionId};

/// Parsed signaling event for one dialog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalingEvent {
    /// New incoming invitation (creates a session)
    Invite {
        from: String,
        to: String,
        offer: Option<MediaDescription>,
        headers: Headers,
        subject: Option<String>,
    },
    /// 1xx to our invitation
    Provisional {
        fork: ForkId,
        code: u16,
        phrase: String,
        body: Option<MediaDescription>,
    },
    /// Final response to our invitation or renegotiation
    Final {
        fork: ForkId,
        answers: AnsweredRequest,
        response: FinalResponse,
    },
    /// Peer-initiated renegotiation
    UpdateRequest {
        method: UpdateMethod,
        offer: Option<MediaDescription>,
        headers: Headers,
    },
    Ack {
        headers: Headers,
        body: Option<MediaDescription>,
    },
    Bye {
        reason: Option<SubReason>,
    },
    Cancel {
        reason: Option<SubReason>,
    },
    /// No response to our last request
    TransactionTimeout,
    /// Transport lost the dialog
    TransportFailure {
        message: String,
    },
    /// Our 2xx was never acknowledged
    AckTimeout,
}

/// Which of our requests a final response belongs to
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnsweredRequest {
    /// The dialog-creating INVITE, including retransmissions of its 2xx
    Invite,
    /// A re-INVITE or UPDATE sent on the established dialog
    Renegotiation,
}

impl SignalingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SignalingEvent::Invite { .. } => "INVITE",
            SignalingEvent::Provisional { .. } => "provisional",
            SignalingEvent::Final { .. } => "final",
            SignalingEvent::UpdateRequest { .. } => "update request",
            SignalingEvent::Ack { .. } => "ACK",
            SignalingEvent::Bye { .. } => "BYE",
            SignalingEvent::Cancel { .. } => "CANCEL",
            SignalingEvent::TransactionTimeout => "transaction timeout",
            SignalingEvent::TransportFailure { .. } => "transport failure",
            SignalingEvent::AckTimeout => "ACK timeout",
        }
    }
}

/// Report from the media engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MediaEvent {
    /// Traffic or keep-alive received
    Activity,
    StatsUpdated(StreamStats),
    /// Connectivity checks finished; a re-invite may be needed to publish
    /// the selected candidates
    ConnectivityCheckCompleted {
        reinvite_required: bool,
    },
    StreamFailure {
        message: String,
    },
}

/// Queued input for the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InboundEvent {
    Signaling {
        dialog: DialogId,
        event: SignalingEvent,
    },
    Media {
        session: SessionId,
        event: MediaEvent,
    },
}
