//! Transition table
//!
//! Which state may follow which. End and Error lead only to Released, and
//! Released is entered only from them.

use crate::types::CallState;

/// Whether `from -> to` is a legal transition
pub fn is_allowed(from: CallState, to: CallState) -> bool {
    use CallState::*;
    match (from, to) {
        (Released, _) => false,
        (End | Error, Released) => true,
        (End | Error, _) => false,
        (_, Released) => false,
        (_, End | Error) => true,

        (Idle, OutgoingInit | IncomingReceived) => true,
        (OutgoingInit, OutgoingProgress) => true,
        (OutgoingProgress, OutgoingRinging | OutgoingEarlyMedia | Connected) => true,
        (OutgoingRinging, OutgoingEarlyMedia | Connected) => true,
        (OutgoingEarlyMedia, Connected) => true,
        (IncomingReceived, IncomingEarlyMedia | Connected) => true,
        (IncomingEarlyMedia, Connected) => true,
        (
            OutgoingProgress | OutgoingRinging | OutgoingEarlyMedia | IncomingReceived
            | IncomingEarlyMedia,
            EarlyUpdatedByRemote,
        ) => true,
        (
            EarlyUpdatedByRemote,
            OutgoingProgress | OutgoingRinging | OutgoingEarlyMedia | IncomingReceived
            | IncomingEarlyMedia,
        ) => true,

        (Connected, StreamsRunning | PausedByRemote | Pausing | Updating | UpdatedByRemote) => true,
        (StreamsRunning, Pausing | Updating | UpdatedByRemote | PausedByRemote) => true,
        (Pausing, Paused | Resuming | StreamsRunning | PausedByRemote) => true,
        (Paused, Resuming | Updating | UpdatedByRemote) => true,
        (PausedByRemote, Pausing | Updating | UpdatedByRemote | StreamsRunning) => true,
        (Resuming, StreamsRunning | PausedByRemote | Paused) => true,
        (Updating, StreamsRunning | Paused | PausedByRemote) => true,
        (UpdatedByRemote, StreamsRunning | Paused | PausedByRemote | UpdatedByRemote) => true,

        _ => false,
    }
}

/// Default human message for entering a state
pub fn message_for(state: CallState) -> &'static str {
    match state {
        CallState::Idle => "Idle",
        CallState::OutgoingInit => "Starting outgoing call",
        CallState::OutgoingProgress => "Outgoing call in progress",
        CallState::OutgoingRinging => "Remote ringing",
        CallState::OutgoingEarlyMedia => "Early media",
        CallState::IncomingReceived => "Incoming call",
        CallState::IncomingEarlyMedia => "Incoming call early media",
        CallState::EarlyUpdatedByRemote => "Early update by remote",
        CallState::Connected => "Connected",
        CallState::StreamsRunning => "Streams running",
        CallState::Pausing => "Pausing call",
        CallState::Paused => "Call paused",
        CallState::PausedByRemote => "Call paused by remote",
        CallState::Resuming => "Resuming",
        CallState::Updating => "Updating call",
        CallState::UpdatedByRemote => "Call updated by remote",
        CallState::End => "Call terminated",
        CallState::Error => "Call failed",
        CallState::Released => "Call released",
    }
}
