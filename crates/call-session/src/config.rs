//! Engine configuration
//!
//! Loaded from YAML or built in code; every field has a default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{SessionError, SessionResult};
use crate::offer_answer::PortPlan;

/// Call session engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Silence window before an active session is torn down, 0 disables
    pub no_media_timeout_secs: u64,
    /// Silence window while held, 0 disables
    pub no_media_on_hold_timeout_secs: u64,
    /// Unanswered incoming calls are declined after this long, 0 disables
    pub incoming_timeout_secs: u64,
    /// Maximum connected duration, 0 disables
    pub in_call_timeout_secs: u64,
    /// Mute the microphone while in an early-media state
    pub mute_microphone_during_early_media: bool,
    /// Keep the previous direction on 0-port streams instead of inactive
    pub rejected_stream_keeps_direction: bool,
    /// Answer incoming invitations with 180 automatically
    pub auto_send_ringing: bool,
    /// Back-off window for retrying a renegotiation rejected with 491
    pub glare_retry_min_ms: u64,
    pub glare_retry_max_ms: u64,
    pub audio_port: u16,
    pub video_port: u16,
    pub text_port: u16,
    /// JSON-lines call log file; logs stay in memory when unset
    pub call_log_path: Option<PathBuf>,
    /// Period of the async driver
    pub drive_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            no_media_timeout_secs: 30,
            no_media_on_hold_timeout_secs: 0,
            incoming_timeout_secs: 30,
            in_call_timeout_secs: 0,
            mute_microphone_during_early_media: true,
            rejected_stream_keeps_direction: false,
            auto_send_ringing: true,
            glare_retry_min_ms: 2100,
            glare_retry_max_ms: 4000,
            audio_port: 7078,
            video_port: 9078,
            text_port: 11078,
            call_log_path: None,
            drive_interval_ms: 20,
        }
    }
}

impl SessionConfig {
    /// Parse a YAML document
    pub fn from_yaml_str(yaml: &str) -> SessionResult<Self> {
        let config: SessionConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> SessionResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    pub fn validate(&self) -> SessionResult<()> {
        if self.glare_retry_min_ms > self.glare_retry_max_ms {
            return Err(SessionError::config(format!(
                "glare_retry_min_ms ({}) exceeds glare_retry_max_ms ({})",
                self.glare_retry_min_ms, self.glare_retry_max_ms
            )));
        }
        if self.drive_interval_ms == 0 {
            return Err(SessionError::config("drive_interval_ms must be positive"));
        }
        let ports = [self.audio_port, self.video_port, self.text_port];
        if ports.contains(&0) {
            return Err(SessionError::config("media ports must be non-zero"));
        }
        if ports[0] == ports[1] || ports[0] == ports[2] || ports[1] == ports[2] {
            return Err(SessionError::config("media ports must be distinct"));
        }
        Ok(())
    }

    pub fn port_plan(&self) -> PortPlan {
        PortPlan {
            audio: self.audio_port,
            video: self.video_port,
            text: self.text_port,
        }
    }

    /// No-media window for the given hold state, `None` when disabled
    pub fn no_media_timeout(&self, on_hold: bool) -> Option<Duration> {
        let secs = if on_hold {
            self.no_media_on_hold_timeout_secs
        } else {
            self.no_media_timeout_secs
        };
        (secs > 0).then(|| Duration::from_secs(secs))
    }

    pub fn incoming_timeout(&self) -> Option<Duration> {
        (self.incoming_timeout_secs > 0).then(|| Duration::from_secs(self.incoming_timeout_secs))
    }

    pub fn in_call_timeout(&self) -> Option<Duration> {
        (self.in_call_timeout_secs > 0).then(|| Duration::from_secs(self.in_call_timeout_secs))
    }

    pub fn drive_interval(&self) -> Duration {
        Duration::from_millis(self.drive_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_overrides_defaults() {
        let config = SessionConfig::from_yaml_str(
            "no_media_timeout_secs: 10\nno_media_on_hold_timeout_secs: 120\nauto_send_ringing: false\n",
        )
        .unwrap();
        assert_eq!(config.no_media_timeout(false), Some(Duration::from_secs(10)));
        assert_eq!(config.no_media_timeout(true), Some(Duration::from_secs(120)));
        assert!(!config.auto_send_ringing);
        assert_eq!(config.audio_port, 7078);
    }

    #[test]
    fn test_validation_rejects_inverted_retry_window() {
        let result = SessionConfig::from_yaml_str("glare_retry_min_ms: 500\nglare_retry_max_ms: 100\n");
        assert!(matches!(result, Err(SessionError::Configuration { .. })));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.yaml");
        std::fs::write(&path, "incoming_timeout_secs: 0\n").unwrap();
        let config = SessionConfig::from_file(&path).unwrap();
        assert_eq!(config.incoming_timeout(), None);
    }
}
