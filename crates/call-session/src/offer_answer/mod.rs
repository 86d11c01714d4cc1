//! Offer/answer reconciliation
//!
//! Computes outgoing offers from local parameters and the previously sent
//! description, computes answers to incoming offers, and enforces the
//! stream-count and direction rules both sides must respect:
//!
//! - an answer never introduces a media type that was not offered
//! - a stream the offer rejects (port 0) is never re-activated by the answer
//! - a stream leaves a session only through an explicit 0-port line
//! - no common codec on a mandatory stream fails the negotiation

pub mod description;

pub use description::{MediaDescription, StreamDescription};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::errors::NegotiationError;
use crate::params::{Codec, MediaParameters};
use crate::types::{MediaDirection, StreamType};

/// Local port used for each stream kind in fresh offers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortPlan {
    pub audio: u16,
    pub video: u16,
    pub text: u16,
}

impl PortPlan {
    pub fn port_for(&self, kind: StreamType) -> u16 {
        match kind {
            StreamType::Audio => self.audio,
            StreamType::Video => self.video,
            StreamType::Text => self.text,
        }
    }
}

impl Default for PortPlan {
    fn default() -> Self {
        Self {
            audio: 7078,
            video: 9078,
            text: 11078,
        }
    }
}

/// Which side produced the offer of a completed round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationRole {
    Offerer,
    Answerer,
}

/// Offer/answer engine configured with the local port plan and the
/// rejected-stream direction policy
#[derive(Debug, Clone, Default)]
pub struct Negotiator {
    ports: PortPlan,
    rejected_stream_keeps_direction: bool,
}

impl Negotiator {
    pub fn new(ports: PortPlan, rejected_stream_keeps_direction: bool) -> Self {
        Self {
            ports,
            rejected_stream_keeps_direction,
        }
    }

    /// Direction written on a 0-port stream
    fn rejected_direction(&self, previous: MediaDirection) -> MediaDirection {
        if self.rejected_stream_keeps_direction {
            previous
        } else {
            MediaDirection::Inactive
        }
    }

    /// Build an offer
    ///
    /// Without `previous` this is a projection of `local`. With it, stream
    /// indices, ports and payload numbers are kept and only the fields that
    /// differ from `local` are replaced.
    pub fn compute_offer(
        &self,
        local: &MediaParameters,
        previous: Option<&MediaDescription>,
    ) -> Result<MediaDescription, NegotiationError> {
        local.validate()?;

        let Some(previous) = previous else {
            let streams = local
                .enabled_streams()
                .into_iter()
                .map(|kind| {
                    let stream = local.stream(kind);
                    StreamDescription {
                        kind,
                        port: self.ports.port_for(kind),
                        direction: stream.direction,
                        codecs: stream.codecs,
                        attributes: stream.attributes,
                    }
                })
                .collect();
            return Ok(MediaDescription {
                version: 1,
                streams,
                attributes: local.custom_sdp_attributes(),
                encryption: local.encryption(),
            });
        };

        let mut streams = previous.streams.clone();
        let mut seen = Vec::new();
        for desc in streams.iter_mut() {
            if seen.contains(&desc.kind) {
                continue;
            }
            seen.push(desc.kind);
            let wanted = local.stream(desc.kind);
            if wanted.enabled {
                if desc.is_rejected() {
                    desc.port = self.ports.port_for(desc.kind);
                }
                if desc.direction != wanted.direction {
                    desc.direction = wanted.direction;
                }
                let codecs = keep_payload_numbers(&wanted.codecs, &desc.codecs);
                if desc.codecs != codecs {
                    desc.codecs = codecs;
                }
                if desc.attributes != wanted.attributes {
                    desc.attributes = wanted.attributes;
                }
            } else if !desc.is_rejected() {
                desc.port = 0;
                desc.direction = self.rejected_direction(desc.direction);
            }
        }
        for kind in local.enabled_streams() {
            if !seen.contains(&kind) {
                let stream = local.stream(kind);
                debug!("Adding {} stream at index {}", kind, streams.len());
                streams.push(StreamDescription {
                    kind,
                    port: self.ports.port_for(kind),
                    direction: stream.direction,
                    codecs: stream.codecs,
                    attributes: stream.attributes,
                });
            }
        }

        Ok(MediaDescription {
            version: previous.version + 1,
            streams,
            attributes: local.custom_sdp_attributes(),
            encryption: local.encryption(),
        })
    }

    /// Answer an incoming offer
    ///
    /// `previous` is the last description this side sent, used to keep ports
    /// stable across renegotiations.
    pub fn compute_answer(
        &self,
        offer: &MediaDescription,
        local: &MediaParameters,
        previous: Option<&MediaDescription>,
    ) -> Result<MediaDescription, NegotiationError> {
        if local.encryption_mandatory() && offer.encryption != local.encryption() {
            return Err(NegotiationError::Encryption {
                details: format!(
                    "offer uses {:?}, {:?} is mandatory",
                    offer.encryption,
                    local.encryption()
                ),
            });
        }

        let mut streams = Vec::with_capacity(offer.streams.len());
        for (index, offered) in offer.streams.iter().enumerate() {
            let wanted = local.stream(offered.kind);
            let rejected = StreamDescription {
                kind: offered.kind,
                port: 0,
                direction: self.rejected_direction(offered.direction.reversed()),
                codecs: offered.codecs.clone(),
                attributes: BTreeMap::new(),
            };

            if offered.is_rejected() || !wanted.enabled {
                streams.push(rejected);
                continue;
            }

            let codecs: Vec<Codec> = offered
                .codecs
                .iter()
                .filter(|c| wanted.codecs.iter().any(|w| w.matches(c)))
                .cloned()
                .collect();
            if codecs.is_empty() {
                if offered.kind == StreamType::Audio {
                    return Err(NegotiationError::NoCommonCodec {
                        stream: offered.kind.to_string(),
                    });
                }
                debug!("No common codec on {} stream {}, rejecting it", offered.kind, index);
                streams.push(rejected);
                continue;
            }

            let port = previous
                .and_then(|p| p.streams.get(index))
                .filter(|p| p.kind == offered.kind && !p.is_rejected())
                .map(|p| p.port)
                .unwrap_or_else(|| self.ports.port_for(offered.kind));

            streams.push(StreamDescription {
                kind: offered.kind,
                port,
                direction: offered.direction.reversed().intersect(wanted.direction),
                codecs,
                attributes: wanted.attributes,
            });
        }

        if streams.iter().all(StreamDescription::is_rejected) {
            return Err(NegotiationError::NoAcceptableStream);
        }

        Ok(MediaDescription {
            version: previous.map(|p| p.version + 1).unwrap_or(1),
            streams,
            attributes: local.custom_sdp_attributes(),
            encryption: offer.encryption,
        })
    }

    /// Check an answer against the offer it responds to
    pub fn validate_answer(
        &self,
        offer: &MediaDescription,
        answer: &MediaDescription,
    ) -> Result<(), NegotiationError> {
        if answer.streams.len() > offer.streams.len() {
            let index = offer.streams.len();
            return Err(NegotiationError::StreamIntroduced {
                index,
                stream: answer.streams[index].kind.to_string(),
            });
        }
        if answer.streams.len() < offer.streams.len() {
            return Err(NegotiationError::StreamRemoved {
                index: answer.streams.len(),
            });
        }

        for (index, (offered, answered)) in offer.streams.iter().zip(&answer.streams).enumerate() {
            if offered.kind != answered.kind {
                return Err(NegotiationError::StreamKindMismatch {
                    index,
                    expected: offered.kind.to_string(),
                    found: answered.kind.to_string(),
                });
            }
            if answered.is_rejected() {
                continue;
            }
            if offered.is_rejected() {
                return Err(NegotiationError::StreamReactivated { index });
            }
            let allowed = offered.direction.reversed();
            if answered.direction.intersect(allowed) != answered.direction {
                return Err(NegotiationError::IllegalDirection {
                    index,
                    offered: offered.direction.to_string(),
                    answered: answered.direction.to_string(),
                });
            }
            if let Some(codec) = answered
                .codecs
                .iter()
                .find(|c| !offered.codecs.iter().any(|o| o.matches(c)))
            {
                return Err(NegotiationError::CodecNotOffered {
                    index,
                    codec: codec.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Check that a new offer keeps every stream of the previous round
    pub fn validate_reoffer(
        &self,
        previous: &MediaDescription,
        offer: &MediaDescription,
    ) -> Result<(), NegotiationError> {
        if offer.streams.len() < previous.streams.len() {
            return Err(NegotiationError::StreamRemoved {
                index: offer.streams.len(),
            });
        }
        for (index, (before, now)) in previous.streams.iter().zip(&offer.streams).enumerate() {
            if before.kind != now.kind {
                return Err(NegotiationError::StreamKindMismatch {
                    index,
                    expected: before.kind.to_string(),
                    found: now.kind.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Outcome of a completed round, from this side's point of view
    ///
    /// Ports are the local ones; directions are what this side does.
    pub fn negotiated(
        &self,
        offer: &MediaDescription,
        answer: &MediaDescription,
        role: NegotiationRole,
    ) -> MediaDescription {
        let streams = offer
            .streams
            .iter()
            .zip(&answer.streams)
            .map(|(offered, answered)| {
                let (ours, direction) = match role {
                    NegotiationRole::Offerer => (offered, answered.direction.reversed()),
                    NegotiationRole::Answerer => (answered, answered.direction),
                };
                StreamDescription {
                    kind: answered.kind,
                    port: if answered.is_rejected() { 0 } else { ours.port },
                    direction: if answered.is_rejected() {
                        MediaDirection::Inactive
                    } else {
                        direction
                    },
                    codecs: answered.codecs.clone(),
                    attributes: ours.attributes.clone(),
                }
            })
            .collect();
        let ours = match role {
            NegotiationRole::Offerer => offer,
            NegotiationRole::Answerer => answer,
        };
        MediaDescription {
            version: ours.version,
            streams,
            attributes: ours.attributes.clone(),
            encryption: answer.encryption,
        }
    }
}

/// Whether the peer has put this side on hold
///
/// `negotiated` is the round outcome from this side's view, `sent` the
/// description this side put on the wire.
pub fn held_by_peer(negotiated: &MediaDescription, sent: &MediaDescription) -> bool {
    !sent.has_direction(MediaDirection::Inactive)
        && (negotiated.has_direction(MediaDirection::RecvOnly)
            || negotiated.has_direction(MediaDirection::Inactive))
}

/// Reuse payload numbers the previous round already assigned
fn keep_payload_numbers(wanted: &[Codec], previous: &[Codec]) -> Vec<Codec> {
    wanted
        .iter()
        .map(|codec| match previous.iter().find(|p| p.matches(codec)) {
            Some(prev) => Codec {
                payload_type: prev.payload_type,
                ..codec.clone()
            },
            None => codec.clone(),
        })
        .collect()
}
