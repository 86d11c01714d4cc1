//! Collaborator seams
//!
//! The engine talks to the signaling transaction layer and the media engine
//! only through these traits.

pub mod media;
pub mod transport;

pub use media::{MediaEngine, StreamStats};
pub use transport::{Credentials, FinalResponse, OutgoingRequest, SignalingTransport, UpdateMethod};
