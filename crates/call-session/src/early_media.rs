//! Early-media and ringing controller
//!
//! Tracks the sub-machine between invitation and establishment. Tone
//! triggers fire on sub-state entry and exit, once per visit. The microphone
//! is muted on entering early media and unmuted once, at Connected.

use tracing::debug;

use crate::notify::ToneEvent;
use crate::reason::ReasonKind;
use crate::types::CallState;

/// Side effect requested by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyMediaAction {
    Tone(ToneEvent),
    MuteMicrophone(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveTone {
    Ringtone,
    Ringback,
}

#[derive(Debug, Clone)]
pub struct EarlyMediaController {
    mute_during_early_media: bool,
    active_tone: Option<ActiveTone>,
    microphone_muted: bool,
    error_tone_sent: bool,
}

impl EarlyMediaController {
    pub fn new(mute_during_early_media: bool) -> Self {
        Self {
            mute_during_early_media,
            active_tone: None,
            microphone_muted: false,
            error_tone_sent: false,
        }
    }

    pub fn microphone_muted(&self) -> bool {
        self.microphone_muted
    }

    /// Actions for entering `to`
    pub fn on_transition(&mut self, to: CallState) -> Vec<EarlyMediaAction> {
        let mut actions = Vec::new();

        match (self.active_tone, to) {
            (Some(ActiveTone::Ringtone), CallState::IncomingReceived)
            | (Some(ActiveTone::Ringback), CallState::OutgoingRinging)
            | (Some(_), CallState::EarlyUpdatedByRemote) => {}
            (Some(ActiveTone::Ringtone), _) => {
                self.active_tone = None;
                actions.push(EarlyMediaAction::Tone(ToneEvent::RingtoneStopped));
            }
            (Some(ActiveTone::Ringback), _) => {
                self.active_tone = None;
                actions.push(EarlyMediaAction::Tone(ToneEvent::RingbackStopped));
            }
            (None, _) => {}
        }

        match to {
            CallState::IncomingReceived if self.active_tone.is_none() => {
                self.active_tone = Some(ActiveTone::Ringtone);
                actions.push(EarlyMediaAction::Tone(ToneEvent::RingtoneStarted));
            }
            CallState::OutgoingRinging if self.active_tone.is_none() => {
                self.active_tone = Some(ActiveTone::Ringback);
                actions.push(EarlyMediaAction::Tone(ToneEvent::RingbackStarted));
            }
            CallState::IncomingEarlyMedia | CallState::OutgoingEarlyMedia
                if self.mute_during_early_media && !self.microphone_muted =>
            {
                debug!("Muting microphone during early media");
                self.microphone_muted = true;
                actions.push(EarlyMediaAction::MuteMicrophone(true));
            }
            CallState::Connected if self.microphone_muted => {
                self.microphone_muted = false;
                actions.push(EarlyMediaAction::MuteMicrophone(false));
            }
            _ => {}
        }

        actions
    }

    /// Error tone for an outgoing call that failed before establishment
    pub fn on_establishment_failure(&mut self, kind: ReasonKind) -> Option<EarlyMediaAction> {
        if self.error_tone_sent {
            return None;
        }
        self.error_tone_sent = true;
        Some(EarlyMediaAction::Tone(ToneEvent::ErrorTone(kind)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tones(actions: &[EarlyMediaAction]) -> Vec<ToneEvent> {
        actions
            .iter()
            .filter_map(|a| match a {
                EarlyMediaAction::Tone(t) => Some(*t),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_ringback_once_per_visit() {
        let mut c = EarlyMediaController::new(true);
        assert!(c.on_transition(CallState::OutgoingProgress).is_empty());
        assert_eq!(tones(&c.on_transition(CallState::OutgoingRinging)), vec![ToneEvent::RingbackStarted]);
        assert!(c.on_transition(CallState::OutgoingRinging).is_empty());
        let actions = c.on_transition(CallState::OutgoingEarlyMedia);
        assert_eq!(
            actions,
            vec![
                EarlyMediaAction::Tone(ToneEvent::RingbackStopped),
                EarlyMediaAction::MuteMicrophone(true)
            ]
        );
        assert_eq!(c.on_transition(CallState::Connected), vec![EarlyMediaAction::MuteMicrophone(false)]);
        assert!(c.on_transition(CallState::StreamsRunning).is_empty());
    }

    #[test]
    fn test_ringtone_stops_on_end() {
        let mut c = EarlyMediaController::new(true);
        assert_eq!(tones(&c.on_transition(CallState::IncomingReceived)), vec![ToneEvent::RingtoneStarted]);
        assert_eq!(tones(&c.on_transition(CallState::End)), vec![ToneEvent::RingtoneStopped]);
        assert!(c.on_transition(CallState::Released).is_empty());
    }

    #[test]
    fn test_early_update_keeps_tone() {
        let mut c = EarlyMediaController::new(true);
        c.on_transition(CallState::IncomingReceived);
        assert!(c.on_transition(CallState::EarlyUpdatedByRemote).is_empty());
        assert!(c.on_transition(CallState::IncomingReceived).is_empty());
    }

    #[test]
    fn test_mute_policy_can_be_disabled() {
        let mut c = EarlyMediaController::new(false);
        c.on_transition(CallState::IncomingReceived);
        let actions = c.on_transition(CallState::IncomingEarlyMedia);
        assert_eq!(actions, vec![EarlyMediaAction::Tone(ToneEvent::RingtoneStopped)]);
        assert!(c.on_transition(CallState::Connected).is_empty());
    }

    #[test]
    fn test_error_tone_fires_once() {
        let mut c = EarlyMediaController::new(true);
        assert!(c.on_establishment_failure(ReasonKind::Busy).is_some());
        assert!(c.on_establishment_failure(ReasonKind::Busy).is_none());
    }
}
