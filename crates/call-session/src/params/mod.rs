//! Media parameter model
//!
//! [`MediaParameters`] is an immutable snapshot of what a session requests,
//! was offered, answered, or is currently running. Every accessor hands out
//! an owned copy and every modification returns a new snapshot, so a value
//! held by one party never observes a change made through another.

pub mod delta;

pub use delta::{ParamChange, ParamDelta};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::errors::NegotiationError;
use crate::types::{Headers, MediaDirection, StreamType};

/// A codec as it appears in a preference list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Codec {
    pub name: String,
    pub clock_rate: u32,
    pub channels: u8,
    pub payload_type: u8,
}

impl Codec {
    pub fn new(name: impl Into<String>, clock_rate: u32, channels: u8, payload_type: u8) -> Self {
        Self {
            name: name.into(),
            clock_rate,
            channels,
            payload_type,
        }
    }

    /// Same codec, ignoring the payload number
    pub fn matches(&self, other: &Codec) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self.clock_rate == other.clock_rate
            && self.channels == other.channels
    }

    pub fn opus() -> Self {
        Self::new("opus", 48000, 2, 96)
    }

    pub fn pcmu() -> Self {
        Self::new("PCMU", 8000, 1, 0)
    }

    pub fn pcma() -> Self {
        Self::new("PCMA", 8000, 1, 8)
    }

    pub fn vp8() -> Self {
        Self::new("VP8", 90000, 1, 97)
    }

    pub fn h264() -> Self {
        Self::new("H264", 90000, 1, 98)
    }

    pub fn t140() -> Self {
        Self::new("t140", 1000, 1, 99)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.clock_rate)
    }
}

/// Value of a custom offer/answer attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// Property attribute with no value (`a=name`)
    Flag,
    Integer(i64),
    Text(String),
    /// Structured `key=value` list
    Pairs(Vec<(String, String)>),
}

impl AttributeValue {
    pub fn text(value: impl Into<String>) -> Self {
        AttributeValue::Text(value.into())
    }

    /// Textual form as written after the attribute name
    pub fn encode(&self) -> Option<String> {
        match self {
            AttributeValue::Flag => None,
            AttributeValue::Integer(v) => Some(v.to_string()),
            AttributeValue::Text(v) => Some(v.clone()),
            AttributeValue::Pairs(pairs) => Some(
                pairs
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join(";"),
            ),
        }
    }
}

/// Per-stream parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamParams {
    pub enabled: bool,
    pub direction: MediaDirection,
    pub codecs: Vec<Codec>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl StreamParams {
    pub fn new(enabled: bool, codecs: Vec<Codec>) -> Self {
        Self {
            enabled,
            direction: MediaDirection::SendRecv,
            codecs,
            attributes: BTreeMap::new(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            direction: MediaDirection::Inactive,
            codecs: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }
}

/// Privacy requested for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Privacy {
    Default,
    None,
    User,
    Header,
    Session,
    Id,
    Critical,
}

/// Media encryption scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaEncryption {
    None,
    Srtp,
    Zrtp,
    Dtls,
}

/// Immutable media parameter snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaParameters {
    audio: StreamParams,
    video: StreamParams,
    text: StreamParams,
    custom_headers: Headers,
    custom_sdp_attributes: BTreeMap<String, AttributeValue>,
    privacy: Privacy,
    encryption: MediaEncryption,
    encryption_mandatory: bool,
    recording_path: Option<PathBuf>,
}

impl Default for MediaParameters {
    fn default() -> Self {
        Self {
            audio: StreamParams::new(true, vec![Codec::opus(), Codec::pcmu(), Codec::pcma()]),
            video: StreamParams::new(false, vec![Codec::vp8(), Codec::h264()]),
            text: StreamParams::new(false, vec![Codec::t140()]),
            custom_headers: Headers::new(),
            custom_sdp_attributes: BTreeMap::new(),
            privacy: Privacy::Default,
            encryption: MediaEncryption::None,
            encryption_mandatory: false,
            recording_path: None,
        }
    }
}

impl MediaParameters {
    /// Parameters with no stream enabled and no codec, the starting point for
    /// snapshots built from received data
    pub fn empty() -> Self {
        Self {
            audio: StreamParams::disabled(),
            video: StreamParams::disabled(),
            text: StreamParams::disabled(),
            ..Self::default()
        }
    }

    fn stream_ref(&self, stream: StreamType) -> &StreamParams {
        match stream {
            StreamType::Audio => &self.audio,
            StreamType::Video => &self.video,
            StreamType::Text => &self.text,
        }
    }

    fn stream_mut(&mut self, stream: StreamType) -> &mut StreamParams {
        match stream {
            StreamType::Audio => &mut self.audio,
            StreamType::Video => &mut self.video,
            StreamType::Text => &mut self.text,
        }
    }

    pub fn stream(&self, stream: StreamType) -> StreamParams {
        self.stream_ref(stream).clone()
    }

    pub fn stream_enabled(&self, stream: StreamType) -> bool {
        self.stream_ref(stream).enabled
    }

    pub fn direction(&self, stream: StreamType) -> MediaDirection {
        self.stream_ref(stream).direction
    }

    pub fn codecs(&self, stream: StreamType) -> Vec<Codec> {
        self.stream_ref(stream).codecs.clone()
    }

    pub fn stream_attribute(&self, stream: StreamType, name: &str) -> Option<AttributeValue> {
        self.stream_ref(stream).attributes.get(name).cloned()
    }

    pub fn custom_header(&self, name: &str) -> Option<String> {
        self.custom_headers.get(name).cloned()
    }

    pub fn custom_headers(&self) -> Headers {
        self.custom_headers.clone()
    }

    pub fn custom_sdp_attribute(&self, name: &str) -> Option<AttributeValue> {
        self.custom_sdp_attributes.get(name).cloned()
    }

    pub fn custom_sdp_attributes(&self) -> BTreeMap<String, AttributeValue> {
        self.custom_sdp_attributes.clone()
    }

    pub fn privacy(&self) -> Privacy {
        self.privacy
    }

    pub fn encryption(&self) -> MediaEncryption {
        self.encryption
    }

    pub fn encryption_mandatory(&self) -> bool {
        self.encryption_mandatory
    }

    pub fn recording_path(&self) -> Option<PathBuf> {
        self.recording_path.clone()
    }

    /// Enabled streams in canonical order
    pub fn enabled_streams(&self) -> Vec<StreamType> {
        [StreamType::Audio, StreamType::Video, StreamType::Text]
            .into_iter()
            .filter(|s| self.stream_enabled(*s))
            .collect()
    }

    pub fn with_stream_enabled(&self, stream: StreamType, enabled: bool) -> Self {
        self.apply(&[ParamChange::StreamEnabled { stream, enabled }])
    }

    pub fn with_direction(&self, stream: StreamType, direction: MediaDirection) -> Self {
        self.apply(&[ParamChange::Direction { stream, direction }])
    }

    pub fn with_codecs(&self, stream: StreamType, codecs: Vec<Codec>) -> Self {
        self.apply(&[ParamChange::Codecs { stream, codecs }])
    }

    pub fn with_custom_header(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.apply(&[ParamChange::CustomHeader {
            name: name.into(),
            value: Some(value.into()),
        }])
    }

    pub fn with_custom_sdp_attribute(&self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.apply(&[ParamChange::CustomSdpAttribute {
            name: name.into(),
            value: Some(value),
        }])
    }

    pub fn with_stream_attribute(
        &self,
        stream: StreamType,
        name: impl Into<String>,
        value: AttributeValue,
    ) -> Self {
        self.apply(&[ParamChange::StreamAttribute {
            stream,
            name: name.into(),
            value: Some(value),
        }])
    }

    pub fn with_privacy(&self, privacy: Privacy) -> Self {
        self.apply(&[ParamChange::Privacy(privacy)])
    }

    pub fn with_encryption(&self, encryption: MediaEncryption, mandatory: bool) -> Self {
        self.apply(&[ParamChange::Encryption {
            encryption,
            mandatory,
        }])
    }

    pub fn with_recording_path(&self, path: Option<PathBuf>) -> Self {
        self.apply(&[ParamChange::RecordingPath(path)])
    }

    /// Replace every custom header at once (used for received headers)
    pub fn with_custom_headers(&self, headers: Headers) -> Self {
        let mut next = self.clone();
        next.custom_headers = headers;
        next
    }

    /// New snapshot with `changes` applied in order
    pub fn apply(&self, changes: &[ParamChange]) -> Self {
        let mut next = self.clone();
        for change in changes {
            match change {
                ParamChange::StreamEnabled { stream, enabled } => {
                    next.stream_mut(*stream).enabled = *enabled;
                }
                ParamChange::Direction { stream, direction } => {
                    next.stream_mut(*stream).direction = *direction;
                }
                ParamChange::Codecs { stream, codecs } => {
                    next.stream_mut(*stream).codecs = codecs.clone();
                }
                ParamChange::StreamAttribute {
                    stream,
                    name,
                    value,
                } => {
                    let attrs = &mut next.stream_mut(*stream).attributes;
                    match value {
                        Some(v) => {
                            attrs.insert(name.clone(), v.clone());
                        }
                        None => {
                            attrs.remove(name);
                        }
                    }
                }
                ParamChange::CustomHeader { name, value } => match value {
                    Some(v) => {
                        next.custom_headers.insert(name.clone(), v.clone());
                    }
                    None => {
                        next.custom_headers.remove(name);
                    }
                },
                ParamChange::CustomSdpAttribute { name, value } => match value {
                    Some(v) => {
                        next.custom_sdp_attributes.insert(name.clone(), v.clone());
                    }
                    None => {
                        next.custom_sdp_attributes.remove(name);
                    }
                },
                ParamChange::Privacy(privacy) => next.privacy = *privacy,
                ParamChange::Encryption {
                    encryption,
                    mandatory,
                } => {
                    next.encryption = *encryption;
                    next.encryption_mandatory = *mandatory;
                }
                ParamChange::RecordingPath(path) => next.recording_path = path.clone(),
            }
        }
        next
    }

    /// Apply a delta
    pub fn merge(&self, delta: &ParamDelta) -> Self {
        self.apply(delta.changes())
    }

    /// Changes that turn `self` into `other`
    pub fn diff(&self, other: &MediaParameters) -> ParamDelta {
        delta::diff(self, other)
    }

    /// Snapshot used to put every enabled stream on hold
    ///
    /// `remote_holding` selects inactive instead of send-only, for a session
    /// the peer already holds.
    pub fn held(&self, remote_holding: bool) -> Self {
        let direction = if remote_holding {
            MediaDirection::Inactive
        } else {
            MediaDirection::SendOnly
        };
        let changes: Vec<ParamChange> = self
            .enabled_streams()
            .into_iter()
            .map(|stream| ParamChange::Direction {
                stream,
                direction: self.direction(stream).intersect(direction),
            })
            .collect();
        self.apply(&changes)
    }

    /// Local consistency checks run before anything is offered
    pub fn validate(&self) -> Result<(), NegotiationError> {
        let enabled = self.enabled_streams();
        if enabled.is_empty() {
            return Err(NegotiationError::NoAcceptableStream);
        }
        for stream in enabled {
            if self.stream_ref(stream).codecs.is_empty() {
                return Err(NegotiationError::NoCommonCodec {
                    stream: stream.to_string(),
                });
            }
        }
        if self.encryption_mandatory && self.encryption == MediaEncryption::None {
            return Err(NegotiationError::Encryption {
                details: "mandatory encryption without a scheme".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_snapshots_are_independent() {
        let base = MediaParameters::default();
        let changed = base.with_custom_header("X-Tenant", "acme");
        assert_eq!(base.custom_header("X-Tenant"), None);
        assert_eq!(changed.custom_header("X-Tenant"), Some("acme".to_string()));

        let mut copy = changed.custom_headers();
        copy.insert("X-Other".into(), "1".into());
        assert_eq!(changed.custom_headers().len(), 1);
    }

    #[test]
    fn test_held_uses_sendonly_or_inactive() {
        let params = MediaParameters::default().with_stream_enabled(StreamType::Video, true);
        let held = params.held(false);
        assert_eq!(held.direction(StreamType::Audio), MediaDirection::SendOnly);
        assert_eq!(held.direction(StreamType::Video), MediaDirection::SendOnly);
        assert_eq!(held.direction(StreamType::Text), MediaDirection::SendRecv);
        assert_eq!(params.held(true).direction(StreamType::Audio), MediaDirection::Inactive);
    }

    #[test]
    fn test_validate_rejects_enabled_stream_without_codecs() {
        let params = MediaParameters::default().with_codecs(StreamType::Audio, vec![]);
        assert_eq!(
            params.validate(),
            Err(NegotiationError::NoCommonCodec {
                stream: "Audio".into()
            })
        );
        assert!(MediaParameters::default().validate().is_ok());
    }

    #[test]
    fn test_attribute_encoding() {
        assert_eq!(AttributeValue::Flag.encode(), None);
        assert_eq!(AttributeValue::Integer(5).encode(), Some("5".into()));
        let pairs = AttributeValue::Pairs(vec![("a".into(), "1".into()), ("b".into(), "2".into())]);
        assert_eq!(pairs.encode(), Some("a=1;b=2".into()));
    }
}
