//! Parameter changes
//!
//! A renegotiation names exactly the fields it changes; everything else is
//! carried over from the previous snapshot.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{AttributeValue, Codec, MediaEncryption, MediaParameters, Privacy};
use crate::types::{MediaDirection, StreamType};

/// One explicit change to a parameter snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamChange {
    StreamEnabled {
        stream: StreamType,
        enabled: bool,
    },
    Direction {
        stream: StreamType,
        direction: MediaDirection,
    },
    Codecs {
        stream: StreamType,
        codecs: Vec<Codec>,
    },
    /// `None` removes the attribute
    StreamAttribute {
        stream: StreamType,
        name: String,
        value: Option<AttributeValue>,
    },
    /// `None` removes the header
    CustomHeader {
        name: String,
        value: Option<String>,
    },
    CustomSdpAttribute {
        name: String,
        value: Option<AttributeValue>,
    },
    Privacy(Privacy),
    Encryption {
        encryption: MediaEncryption,
        mandatory: bool,
    },
    RecordingPath(Option<PathBuf>),
}

impl ParamChange {
    /// Whether the change alters what goes into an offer
    pub fn affects_media(&self) -> bool {
        !matches!(
            self,
            ParamChange::CustomHeader { .. } | ParamChange::Privacy(_) | ParamChange::RecordingPath(_)
        )
    }
}

/// Ordered set of changes requested for one renegotiation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDelta {
    changes: Vec<ParamChange>,
}

impl ParamDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, change: ParamChange) -> Self {
        self.changes.push(change);
        self
    }

    pub fn enable_stream(self, stream: StreamType, enabled: bool) -> Self {
        self.with(ParamChange::StreamEnabled { stream, enabled })
    }

    pub fn direction(self, stream: StreamType, direction: MediaDirection) -> Self {
        self.with(ParamChange::Direction { stream, direction })
    }

    pub fn codecs(self, stream: StreamType, codecs: Vec<Codec>) -> Self {
        self.with(ParamChange::Codecs { stream, codecs })
    }

    pub fn custom_header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(ParamChange::CustomHeader {
            name: name.into(),
            value: Some(value.into()),
        })
    }

    pub fn custom_sdp_attribute(self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.with(ParamChange::CustomSdpAttribute {
            name: name.into(),
            value: Some(value),
        })
    }

    pub fn changes(&self) -> &[ParamChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn affects_media(&self) -> bool {
        self.changes.iter().any(ParamChange::affects_media)
    }
}

impl From<Vec<ParamChange>> for ParamDelta {
    fn from(changes: Vec<ParamChange>) -> Self {
        Self { changes }
    }
}

pub(super) fn diff(from: &MediaParameters, to: &MediaParameters) -> ParamDelta {
    let mut changes = Vec::new();

    for stream in [StreamType::Audio, StreamType::Video, StreamType::Text] {
        let (a, b) = (from.stream_ref(stream), to.stream_ref(stream));
        if a.enabled != b.enabled {
            changes.push(ParamChange::StreamEnabled {
                stream,
                enabled: b.enabled,
            });
        }
        if a.direction != b.direction {
            changes.push(ParamChange::Direction {
                stream,
                direction: b.direction,
            });
        }
        if a.codecs != b.codecs {
            changes.push(ParamChange::Codecs {
                stream,
                codecs: b.codecs.clone(),
            });
        }
        for (name, value) in &b.attributes {
            if a.attributes.get(name) != Some(value) {
                changes.push(ParamChange::StreamAttribute {
                    stream,
                    name: name.clone(),
                    value: Some(value.clone()),
                });
            }
        }
        for name in a.attributes.keys().filter(|k| !b.attributes.contains_key(*k)) {
            changes.push(ParamChange::StreamAttribute {
                stream,
                name: name.clone(),
                value: None,
            });
        }
    }

    for (name, value) in &to.custom_headers {
        if from.custom_headers.get(name) != Some(value) {
            changes.push(ParamChange::CustomHeader {
                name: name.clone(),
                value: Some(value.clone()),
            });
        }
    }
    for name in from.custom_headers.keys().filter(|k| !to.custom_headers.contains_key(*k)) {
        changes.push(ParamChange::CustomHeader {
            name: name.clone(),
            value: None,
        });
    }

    for (name, value) in &to.custom_sdp_attributes {
        if from.custom_sdp_attributes.get(name) != Some(value) {
            changes.push(ParamChange::CustomSdpAttribute {
                name: name.clone(),
                value: Some(value.clone()),
            });
        }
    }
    for name in from
        .custom_sdp_attributes
        .keys()
        .filter(|k| !to.custom_sdp_attributes.contains_key(*k))
    {
        changes.push(ParamChange::CustomSdpAttribute {
            name: name.clone(),
            value: None,
        });
    }

    if from.privacy != to.privacy {
        changes.push(ParamChange::Privacy(to.privacy));
    }
    if from.encryption != to.encryption || from.encryption_mandatory != to.encryption_mandatory {
        changes.push(ParamChange::Encryption {
            encryption: to.encryption,
            mandatory: to.encryption_mandatory,
        });
    }
    if from.recording_path != to.recording_path {
        changes.push(ParamChange::RecordingPath(to.recording_path.clone()));
    }

    ParamDelta { changes }
}
