use serde::{Deserialize, Serialize};

/// Meta event type carrying a time signature.
pub const TIME_SIGNATURE_META_TYPE: u8 = 0x58;

/// `data1` value of a channel message that marks a user marker.
pub const MARKER_TRIGGER: u8 = 20;

/// Ticks per quarter note of a sequence.
pub type TimeResolution = u32;

/// A marker position, in beats.
pub type MarkerTimestamp = f64;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct NoteEvent {
    pub channel: u8,
    pub pitch: u8,
    pub velocity: u8,
    #[serde(default)]
    pub release_velocity: u8,
    /// Length of the note in beats.
    pub duration: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMessage {
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

impl ChannelMessage {
    pub fn controller(channel: u8, controller: u8, value: u8) -> Self {
        Self {
            status: 0xB0 | (channel & 0x0F),
            data1: controller,
            data2: value,
        }
    }

    pub fn program_change(channel: u8, program: u8) -> Self {
        Self {
            status: 0xC0 | (channel & 0x0F),
            data1: program,
            data2: 0,
        }
    }

    pub fn channel(&self) -> u8 {
        self.status & 0x0F
    }

    pub fn kind(&self) -> u8 {
        self.status & 0xF0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MetaEvent {
    pub meta_type: u8,
    pub payload: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TempoEvent {
    pub bpm: f64,
}

/// A single decoded entry of a track's event stream.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum EventKind {
    Note(NoteEvent),
    Meta(MetaEvent),
    Channel(ChannelMessage),
    Tempo(TempoEvent),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Event {
    /// Position in beats from the start of the sequence.
    pub timestamp: f64,
    pub kind: EventKind,
}

/// A beat timestamp broken down into 1-based bar and beat plus the remaining sub-beat.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BarBeatTime {
    pub bar: i32,
    pub beat: u16,
    pub sub_beat: u16,
    pub sub_beat_divisor: u16,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TimeSignatureEvent {
    pub numerator: u8,
    /// Denominator as a power of two, so 2 means quarter notes.
    pub denominator_log: u8,
    pub timestamp: f64,
}

impl TimeSignatureEvent {
    /// Decodes a time signature meta payload, which needs at least numerator and denominator.
    pub fn from_payload(payload: &[u8], timestamp: f64) -> Option<Self> {
        match payload {
            [numerator, denominator_log, ..] => Some(Self {
                numerator: *numerator,
                denominator_log: *denominator_log,
                timestamp,
            }),
            _ => None,
        }
    }

    /// Length of one bar in quarter-note beats.
    pub fn bar_length(&self) -> f64 {
        self.numerator.max(1) as f64 * self.beat_length()
    }

    /// Length of one signature beat in quarter-note beats.
    pub fn beat_length(&self) -> f64 {
        4.0 / 2f64.powi(self.denominator_log.min(6) as i32)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TimedNote {
    pub note: NoteEvent,
    pub bar_beat: BarBeatTime,
    pub timestamp: f64,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn channel_message_helpers() {
        let bank = ChannelMessage::controller(0, 32, 0);
        assert_eq!(bank.status, 0xB0);
        assert_eq!(bank.data1, 32);

        let program = ChannelMessage::program_change(3, 41);
        assert_eq!(program.status, 0xC3);
        assert_eq!(program.kind(), 0xC0);
        assert_eq!(program.channel(), 3);
        assert_eq!(program.data1, 41);
    }

    #[test]
    fn time_signature_payload() {
        let sig = TimeSignatureEvent::from_payload(&[6, 3, 24, 8], 4.0).unwrap();
        assert_eq!(sig.numerator, 6);
        assert_eq!(sig.denominator_log, 3);
        assert_eq!(sig.beat_length(), 0.5);
        assert_eq!(sig.bar_length(), 3.0);

        assert!(TimeSignatureEvent::from_payload(&[4], 0.0).is_none());
        assert!(TimeSignatureEvent::from_payload(&[], 0.0).is_none());
    }
}
