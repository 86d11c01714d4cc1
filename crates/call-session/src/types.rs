//! Core types for the call session engine
//!
//! Identifiers, call states and the small enums shared by every module.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use strum::{Display, EnumIter};

/// Custom signaling headers, ordered by name
pub type Headers = BTreeMap<String, String>;

/// Session ID type
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!("session-{}", uuid::Uuid::new_v4()))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque dialog handle owned by the signaling transport
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct DialogId(pub uuid::Uuid);

impl DialogId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one early dialog of a forked invitation (the remote tag)
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ForkId(pub String);

impl fmt::Display for ForkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side created the session
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize, Display)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// Session states
///
/// `Released` is the only terminal state; `End` and `Error` always lead to it.
#[derive(
    Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize, Display, EnumIter,
)]
pub enum CallState {
    Idle,
    OutgoingInit,
    OutgoingProgress,
    OutgoingRinging,
    OutgoingEarlyMedia,
    IncomingReceived,
    IncomingEarlyMedia,
    EarlyUpdatedByRemote,
    Connected,
    StreamsRunning,
    Pausing,
    Paused,
    PausedByRemote,
    Resuming,
    Updating,
    UpdatedByRemote,
    End,
    Error,
    Released,
}

impl CallState {
    /// States before the session has been accepted
    pub fn is_early(&self) -> bool {
        matches!(
            self,
            CallState::Idle
                | CallState::OutgoingInit
                | CallState::OutgoingProgress
                | CallState::OutgoingRinging
                | CallState::OutgoingEarlyMedia
                | CallState::IncomingReceived
                | CallState::IncomingEarlyMedia
                | CallState::EarlyUpdatedByRemote
        )
    }

    /// End, Error or Released
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::End | CallState::Error | CallState::Released)
    }

    /// States a failed renegotiation returns to
    pub fn is_stable(&self) -> bool {
        matches!(
            self,
            CallState::StreamsRunning | CallState::Paused | CallState::PausedByRemote
        )
    }

    /// A local renegotiation is in flight in these states
    pub fn is_local_update(&self) -> bool {
        matches!(
            self,
            CallState::Pausing | CallState::Resuming | CallState::Updating
        )
    }
}

/// Media direction for hold/resume
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize, Display)]
pub enum MediaDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl MediaDirection {
    pub fn sends(&self) -> bool {
        matches!(self, MediaDirection::SendRecv | MediaDirection::SendOnly)
    }

    pub fn receives(&self) -> bool {
        matches!(self, MediaDirection::SendRecv | MediaDirection::RecvOnly)
    }

    /// Direction as seen from the other end
    pub fn reversed(&self) -> Self {
        match self {
            MediaDirection::SendOnly => MediaDirection::RecvOnly,
            MediaDirection::RecvOnly => MediaDirection::SendOnly,
            other => *other,
        }
    }

    /// Keep only the flows both directions allow
    pub fn intersect(&self, other: MediaDirection) -> Self {
        Self::from_flags(
            self.sends() && other.sends(),
            self.receives() && other.receives(),
        )
    }

    pub fn from_flags(send: bool, recv: bool) -> Self {
        match (send, recv) {
            (true, true) => MediaDirection::SendRecv,
            (true, false) => MediaDirection::SendOnly,
            (false, true) => MediaDirection::RecvOnly,
            (false, false) => MediaDirection::Inactive,
        }
    }
}

/// Kind of media stream
#[derive(
    Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, Display, EnumIter,
)]
pub enum StreamType {
    Audio,
    Video,
    Text,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_answer_rules() {
        assert_eq!(MediaDirection::SendOnly.reversed(), MediaDirection::RecvOnly);
        assert_eq!(
            MediaDirection::SendRecv.intersect(MediaDirection::RecvOnly),
            MediaDirection::RecvOnly
        );
        assert_eq!(
            MediaDirection::SendOnly.intersect(MediaDirection::RecvOnly),
            MediaDirection::Inactive
        );
    }

    #[test]
    fn test_state_classes() {
        assert!(CallState::OutgoingRinging.is_early());
        assert!(!CallState::Connected.is_early());
        assert!(CallState::Error.is_terminal());
        assert!(CallState::PausedByRemote.is_stable());
        assert!(CallState::Resuming.is_local_update());
        assert_eq!(CallState::StreamsRunning.to_string(), "StreamsRunning");
    }
}
