//! Media engine seam
//!
//! Stream setup, teardown and hold are delegated to the media engine; it
//! reports activity and statistics back through
//! [`MediaEvent`](crate::events::MediaEvent)s delivered on the drive cycle.

use serde::{Deserialize, Serialize};

use crate::errors::MediaError;
use crate::offer_answer::MediaDescription;
use crate::types::{SessionId, StreamType};

/// Periodic statistics for one stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    pub stream: StreamType,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packet_loss: f32,
    pub jitter_ms: f32,
    pub round_trip_ms: Option<f32>,
}

/// Media operations the engine needs
pub trait MediaEngine: Send + Sync {
    /// Start streams for a negotiated description; `early` during early media
    fn start_streams(
        &self,
        session: &SessionId,
        description: &MediaDescription,
        early: bool,
    ) -> Result<(), MediaError>;

    /// Apply a renegotiated description to running streams
    fn update_streams(&self, session: &SessionId, description: &MediaDescription) -> Result<(), MediaError>;

    fn pause_streams(&self, session: &SessionId) -> Result<(), MediaError>;

    fn resume_streams(&self, session: &SessionId) -> Result<(), MediaError>;

    fn stop_streams(&self, session: &SessionId);

    fn set_microphone_muted(&self, session: &SessionId, muted: bool);
}
