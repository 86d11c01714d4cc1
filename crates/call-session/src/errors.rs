//! Error types for the call session engine
//!
//! Protocol outcomes (rejections, timeouts, lost dialogs) are not errors here:
//! they travel as [`Reason`](crate::reason::Reason) values on the session.
//! `SessionError` covers API misuse and collaborator failures.

use thiserror::Error;

use crate::types::{CallState, DialogId, SessionId};

/// Result type for call session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors raised by the offer/answer reconciler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    /// No codec in common for a stream that cannot be dropped
    #[error("No common codec for mandatory {stream} stream")]
    NoCommonCodec { stream: String },

    /// No stream at all survived the negotiation
    #[error("No acceptable stream in offer")]
    NoAcceptableStream,

    /// The answer carries a stream that was never offered
    #[error("Answer introduces stream {index} ({stream}) that was not offered")]
    StreamIntroduced { index: usize, stream: String },

    /// The answer or re-offer dropped a stream without a 0-port placeholder
    #[error("Stream {index} removed without explicit rejection")]
    StreamRemoved { index: usize },

    /// Stream kind at an index changed between offer and answer
    #[error("Stream {index} changed kind from {expected} to {found}")]
    StreamKindMismatch {
        index: usize,
        expected: String,
        found: String,
    },

    /// A stream rejected in the offer was re-activated by the answer
    #[error("Stream {index} was re-activated by the answer")]
    StreamReactivated { index: usize },

    /// Answer direction is not a legal response to the offered direction
    #[error("Illegal direction on stream {index}: offered {offered}, answered {answered}")]
    IllegalDirection {
        index: usize,
        offered: String,
        answered: String,
    },

    /// Answer codec list is not a subset of the offered one
    #[error("Stream {index} answered with codec {codec} that was not offered")]
    CodecNotOffered { index: usize, codec: String },

    /// Encryption requirements could not be met
    #[error("Encryption mismatch: {details}")]
    Encryption { details: String },
}

/// Errors reported by the signaling transport collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request could not be sent at all
    #[error("Send failed: {message}")]
    SendFailed { message: String },

    /// The dialog is unknown to the transport
    #[error("Dialog not found: {dialog}")]
    DialogNotFound { dialog: DialogId },

    /// Address could not be used to create a dialog
    #[error("Invalid address: {address}")]
    InvalidAddress { address: String },
}

impl TransportError {
    /// Create a send failure
    pub fn send_failed(message: impl Into<String>) -> Self {
        Self::SendFailed {
            message: message.into(),
        }
    }
}

/// Errors reported by the media engine collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    /// Streams could not be started or updated
    #[error("Media start failed: {message}")]
    StartFailed { message: String },

    /// Operation on a session the engine does not know
    #[error("No media for session {session}")]
    UnknownSession { session: SessionId },

    /// Generic engine failure
    #[error("Media engine error: {message}")]
    Engine { message: String },
}

impl MediaError {
    /// Create a start failure
    pub fn start_failed(message: impl Into<String>) -> Self {
        Self::StartFailed {
            message: message.into(),
        }
    }
}

/// Errors that can occur in the call session engine
#[derive(Debug, Error)]
pub enum SessionError {
    /// Operation not legal in the current state
    #[error("Cannot {operation} in state {state}")]
    InvalidState {
        operation: &'static str,
        state: CallState,
    },

    /// Engine attempted a transition the state table forbids
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: CallState, to: CallState },

    /// Session not present in the registry
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Dialog not bound to any session
    #[error("Dialog not found: {0}")]
    DialogNotFound(DialogId),

    /// A renegotiation is already in flight
    #[error("Renegotiation already pending on session {0}")]
    RenegotiationPending(SessionId),

    /// Offer/answer failure
    #[error("Negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    /// Signaling transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Media engine failure
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Call log persistence error
    #[error("Call log error: {message}")]
    CallLog { message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SessionError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(operation: &'static str, state: CallState) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Create a call log error
    pub fn call_log(message: impl Into<String>) -> Self {
        Self::CallLog {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
