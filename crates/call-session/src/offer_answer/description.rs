//! Structured media descriptions exchanged in offers and answers
//!
//! The transport collaborator owns the wire format; the engine only sees
//! these parsed values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::params::{AttributeValue, Codec, MediaEncryption, MediaParameters, ParamChange};
use crate::types::{Headers, MediaDirection, StreamType};

/// One media line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescription {
    pub kind: StreamType,
    /// 0 marks a rejected or removed stream
    pub port: u16,
    pub direction: MediaDirection,
    pub codecs: Vec<Codec>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl StreamDescription {
    pub fn is_rejected(&self) -> bool {
        self.port == 0
    }

    /// Accepted and flowing in at least one direction
    pub fn is_active(&self) -> bool {
        !self.is_rejected() && self.direction != MediaDirection::Inactive
    }
}

/// A complete offer or answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescription {
    /// Incremented on every new offer or answer from the same side
    pub version: u64,
    /// Index order is stable for the lifetime of the session
    pub streams: Vec<StreamDescription>,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub encryption: MediaEncryption,
}

impl MediaDescription {
    /// First stream of the given kind
    pub fn stream(&self, kind: StreamType) -> Option<&StreamDescription> {
        self.streams.iter().find(|s| s.kind == kind)
    }

    pub fn has_direction(&self, direction: MediaDirection) -> bool {
        self.streams
            .iter()
            .any(|s| !s.is_rejected() && s.direction == direction)
    }

    pub fn has_active_stream(&self) -> bool {
        self.streams.iter().any(StreamDescription::is_active)
    }

    /// Parameters as announced by whoever produced this description
    pub fn to_parameters(&self, headers: &Headers) -> MediaParameters {
        let mut changes = Vec::new();
        for kind in [StreamType::Audio, StreamType::Video, StreamType::Text] {
            let Some(stream) = self.stream(kind) else {
                continue;
            };
            changes.push(ParamChange::StreamEnabled {
                stream: kind,
                enabled: !stream.is_rejected(),
            });
            changes.push(ParamChange::Direction {
                stream: kind,
                direction: stream.direction,
            });
            changes.push(ParamChange::Codecs {
                stream: kind,
                codecs: stream.codecs.clone(),
            });
            for (name, value) in &stream.attributes {
                changes.push(ParamChange::StreamAttribute {
                    stream: kind,
                    name: name.clone(),
                    value: Some(value.clone()),
                });
            }
        }
        for (name, value) in &self.attributes {
            changes.push(ParamChange::CustomSdpAttribute {
                name: name.clone(),
                value: Some(value.clone()),
            });
        }
        changes.push(ParamChange::Encryption {
            encryption: self.encryption,
            mandatory: false,
        });
        MediaParameters::empty()
            .apply(&changes)
            .with_custom_headers(headers.clone())
    }
}
