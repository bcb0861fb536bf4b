use super::{Sequence, Track};
use crate::model::event::*;
use log::{debug, trace, warn};
use midly::num::{u4, u7, u14, u15, u24, u28};
use midly::{
    Format, Header, MetaMessage, MidiMessage, PitchBend, Smf, Timing, TrackEvent, TrackEventKind,
};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const MICROSECONDS_PER_MINUTE: f64 = 60_000_000.0;
const MAX_DELTA_TICKS: u64 = 0x0FFF_FFFF;
const MAX_MPQN: u32 = 0x00FF_FFFF;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read MIDI file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse MIDI: {0}")]
    Parse(#[from] midly::Error),

    #[error("SMPTE timecode midi timing is not currently supported..!")]
    UnsupportedTiming,
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("Failed to write MIDI file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode MIDI: {0}")]
    Encode(#[source] io::Error),

    #[error("Gap of {ticks} ticks before tick {at_tick} does not fit a MIDI delta time")]
    DeltaOverflow { ticks: u64, at_tick: u64 },
}

pub fn load_sequence<P: AsRef<Path>>(path: P) -> Result<Sequence, LoadError> {
    let bytes = fs::read(path.as_ref()).map_err(|source| LoadError::Io {
        path: path.as_ref().to_path_buf(),
        source,
    })?;

    Sequence::from_smf_bytes(&bytes)
}

pub fn save_sequence<P: AsRef<Path>>(sequence: &Sequence, path: P) -> Result<(), SaveError> {
    let bytes = sequence.to_smf_bytes()?;

    fs::write(path.as_ref(), bytes).map_err(|source| SaveError::Io {
        path: path.as_ref().to_path_buf(),
        source,
    })
}

impl Sequence {
    /// Decodes a Standard MIDI File. Tempo and time signature metas from every track land on
    /// the tempo track, and note on/off pairs are folded into single note events.
    pub fn from_smf_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        let smf = Smf::parse(bytes)?;

        let ticks_per_quarter = match smf.header.timing {
            Timing::Metrical(t) => t.as_int() as u32,
            Timing::Timecode(_fps, _subframe) => return Err(LoadError::UnsupportedTiming),
        };

        debug!("Ticks per quarter note: {}", ticks_per_quarter);
        debug!(
            "MIDI format: {:?}, tracks: {}",
            smf.header.format,
            smf.tracks.len()
        );

        let tpq = ticks_per_quarter.max(1) as f64;
        let to_beats = |tick: u64| tick as f64 / tpq;
        let mut sequence = Sequence::new(ticks_per_quarter);

        for (track_idx, smf_track) in smf.tracks.iter().enumerate() {
            let mut track = Track::new(ticks_per_quarter);
            let mut open_notes: HashMap<(u8, u8), Vec<(u64, u8)>> = HashMap::new();
            let mut has_channel_events = false;
            let mut abs_tick: u64 = 0;

            for event in smf_track.iter() {
                abs_tick = abs_tick.saturating_add(event.delta.as_int() as u64);
                let timestamp = to_beats(abs_tick);

                match &event.kind {
                    TrackEventKind::Meta(MetaMessage::Tempo(micro)) => {
                        let mpqn = micro.as_int().max(1);
                        sequence
                            .tempo_track
                            .new_tempo_event(timestamp, MICROSECONDS_PER_MINUTE / mpqn as f64);
                        debug!(
                            "Tempo change at tick {} -> {} us/qn (track {})",
                            abs_tick, mpqn, track_idx
                        );
                    }
                    TrackEventKind::Meta(MetaMessage::EndOfTrack) => {}
                    TrackEventKind::Meta(meta) => match meta_to_raw(meta) {
                        Some(raw) if raw.meta_type == TIME_SIGNATURE_META_TYPE => {
                            sequence.tempo_track.new_meta_event(timestamp, raw);
                        }
                        Some(raw) => track.new_meta_event(timestamp, raw),
                        None => trace!("Skipping meta event {:?} (track {})", meta, track_idx),
                    },
                    TrackEventKind::Midi { channel, message } => {
                        has_channel_events = true;
                        let ch = channel.as_int();

                        match *message {
                            MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                                open_notes
                                    .entry((ch, key.as_int()))
                                    .or_default()
                                    .push((abs_tick, vel.as_int()));
                            }
                            MidiMessage::NoteOn { key, .. } => {
                                close_note(
                                    &mut open_notes,
                                    &mut track,
                                    ch,
                                    key.as_int(),
                                    0,
                                    abs_tick,
                                    tpq,
                                );
                            }
                            MidiMessage::NoteOff { key, vel } => {
                                close_note(
                                    &mut open_notes,
                                    &mut track,
                                    ch,
                                    key.as_int(),
                                    vel.as_int(),
                                    abs_tick,
                                    tpq,
                                );
                            }
                            other => {
                                let message = midi_to_channel_message(ch, other);
                                track.new_channel_event(timestamp, message);
                            }
                        }
                    }
                    _ => trace!("Skipping system event at tick {} (track {})", abs_tick, track_idx),
                }
            }

            for ((ch, key), stack) in open_notes.into_iter() {
                for (start_tick, velocity) in stack {
                    let end_tick = if abs_tick > start_tick {
                        abs_tick
                    } else {
                        start_tick + ticks_per_quarter as u64
                    };

                    warn!(
                        "Unclosed NoteOn for {}, channel: {} at tick: {} auto-closing at: {}..!",
                        key, ch, start_tick, end_tick
                    );

                    track.new_note_event(
                        to_beats(start_tick),
                        NoteEvent {
                            channel: ch,
                            pitch: key,
                            velocity,
                            release_velocity: 0,
                            duration: (end_tick - start_tick) as f64 / tpq,
                        },
                    );
                }
            }

            if has_channel_events {
                sequence.tracks.push(track);
            } else {
                debug!(
                    "Track {} has no channel events, moving its {} meta event(s) to tempo track",
                    track_idx,
                    track.len()
                );
                for event in track.events {
                    if let EventKind::Meta(meta) = event.kind {
                        sequence.tempo_track.new_meta_event(event.timestamp, meta);
                    }
                }
            }
        }

        Ok(sequence)
    }

    /// Encodes the sequence as a format 1 Standard MIDI File with the tempo track first.
    pub fn to_smf_bytes(&self) -> Result<Vec<u8>, SaveError> {
        let tpq = self.time_resolution.clamp(1, 0x7FFF);

        let mut tracks = Vec::with_capacity(self.tracks.len() + 1);
        tracks.push(build_smf_track(&self.tempo_track, tpq)?);
        for track in self.tracks.iter() {
            tracks.push(build_smf_track(track, tpq)?);
        }

        let smf = Smf {
            header: Header::new(Format::Parallel, Timing::Metrical(u15::from(tpq as u16))),
            tracks,
        };

        let mut out = Vec::new();
        smf.write_std(&mut out).map_err(SaveError::Encode)?;

        Ok(out)
    }
}

fn close_note(
    open_notes: &mut HashMap<(u8, u8), Vec<(u64, u8)>>,
    track: &mut Track,
    ch: u8,
    key: u8,
    release_velocity: u8,
    abs_tick: u64,
    tpq: f64,
) {
    let Some((start_tick, velocity)) = open_notes.get_mut(&(ch, key)).and_then(|s| s.pop())
    else {
        debug!("Orphaned NoteOff for {} ch{} at tick {}..!", key, ch, abs_tick);
        return;
    };

    track.new_note_event(
        start_tick as f64 / tpq,
        NoteEvent {
            channel: ch,
            pitch: key,
            velocity,
            release_velocity,
            duration: (abs_tick - start_tick) as f64 / tpq,
        },
    );
}

/// Lowers a note field to a 7-bit data byte, warning when bits have to be dropped.
fn data_byte(value: u8, field: &str) -> u7 {
    if value > 0x7F {
        warn!(
            "Note {} {} does not fit a MIDI data byte, masking to {}..!",
            field,
            value,
            value & 0x7F
        );
    }
    u7::from(value & 0x7F)
}

fn build_smf_track(track: &Track, tpq: u32) -> Result<Vec<TrackEvent<'_>>, SaveError> {
    let to_tick = |beats: f64| (beats.max(0.0) * tpq as f64).round() as u64;

    // (tick, order, event): note-offs sort ahead of anything else sharing their tick
    let mut timed: Vec<(u64, u8, TrackEventKind<'_>)> = Vec::with_capacity(track.len() * 2);

    for event in track.events() {
        let tick = to_tick(event.timestamp);

        match &event.kind {
            EventKind::Note(note) => {
                if note.channel > 0x0F {
                    warn!("Note channel {} is out of range, masking..!", note.channel);
                }
                let channel = u4::from(note.channel & 0x0F);
                let key = data_byte(note.pitch, "pitch");
                let off_tick = to_tick(event.timestamp + note.duration.max(0.0));
                let off_order = if off_tick == tick { 2 } else { 0 };

                timed.push((
                    tick,
                    1,
                    TrackEventKind::Midi {
                        channel,
                        message: MidiMessage::NoteOn {
                            key,
                            vel: data_byte(note.velocity, "velocity"),
                        },
                    },
                ));
                timed.push((
                    off_tick,
                    off_order,
                    TrackEventKind::Midi {
                        channel,
                        message: MidiMessage::NoteOff {
                            key,
                            vel: data_byte(note.release_velocity, "release velocity"),
                        },
                    },
                ));
            }
            EventKind::Channel(message) => match channel_message_to_midi(message) {
                Some((channel, message)) => {
                    timed.push((tick, 1, TrackEventKind::Midi { channel, message }))
                }
                None => debug!("Skipping unencodable channel message {:?}", message),
            },
            EventKind::Tempo(tempo) => {
                if tempo.bpm <= 0.0 || !tempo.bpm.is_finite() {
                    warn!("Skipping tempo event with invalid bpm {}..!", tempo.bpm);
                    continue;
                }
                let mpqn = (MICROSECONDS_PER_MINUTE / tempo.bpm).round() as u32;
                let mpqn = u24::from(mpqn.clamp(1, MAX_MPQN));
                timed.push((tick, 1, TrackEventKind::Meta(MetaMessage::Tempo(mpqn))));
            }
            EventKind::Meta(meta) => match raw_to_meta(meta) {
                Some(message) => timed.push((tick, 1, TrackEventKind::Meta(message))),
                None => trace!("Dropping meta event of type {:#04x}", meta.meta_type),
            },
        }
    }

    timed.sort_by_key(|(tick, order, _)| (*tick, *order));

    let mut events = Vec::with_capacity(timed.len() + 1);
    let mut prev_tick = 0u64;
    for (tick, _, kind) in timed.into_iter() {
        let delta = tick - prev_tick;
        if delta > MAX_DELTA_TICKS {
            return Err(SaveError::DeltaOverflow {
                ticks: delta,
                at_tick: tick,
            });
        }
        events.push(TrackEvent {
            delta: u28::from(delta as u32),
            kind,
        });
        prev_tick = tick;
    }

    events.push(TrackEvent {
        delta: u28::from(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    Ok(events)
}

fn midi_to_channel_message(ch: u8, message: MidiMessage) -> ChannelMessage {
    let (kind, data1, data2) = match message {
        MidiMessage::NoteOff { key, vel } => (0x80, key.as_int(), vel.as_int()),
        MidiMessage::NoteOn { key, vel } => (0x90, key.as_int(), vel.as_int()),
        MidiMessage::Aftertouch { key, vel } => (0xA0, key.as_int(), vel.as_int()),
        MidiMessage::Controller { controller, value } => {
            (0xB0, controller.as_int(), value.as_int())
        }
        MidiMessage::ProgramChange { program } => (0xC0, program.as_int(), 0),
        MidiMessage::ChannelAftertouch { vel } => (0xD0, vel.as_int(), 0),
        MidiMessage::PitchBend { bend } => {
            let raw = bend.0.as_int();
            (0xE0, (raw & 0x7F) as u8, (raw >> 7) as u8)
        }
    };

    ChannelMessage {
        status: kind | (ch & 0x0F),
        data1,
        data2,
    }
}

fn channel_message_to_midi(message: &ChannelMessage) -> Option<(u4, MidiMessage)> {
    let channel = u4::from(message.channel());
    let data1 = u7::from(message.data1 & 0x7F);
    let data2 = u7::from(message.data2 & 0x7F);

    let midi = match message.kind() {
        0x80 => MidiMessage::NoteOff { key: data1, vel: data2 },
        0x90 => MidiMessage::NoteOn { key: data1, vel: data2 },
        0xA0 => MidiMessage::Aftertouch { key: data1, vel: data2 },
        0xB0 => MidiMessage::Controller {
            controller: data1,
            value: data2,
        },
        0xC0 => MidiMessage::ProgramChange { program: data1 },
        0xD0 => MidiMessage::ChannelAftertouch { vel: data1 },
        0xE0 => {
            let raw = ((data2.as_int() as u16) << 7) | data1.as_int() as u16;
            MidiMessage::PitchBend {
                bend: PitchBend(u14::from(raw)),
            }
        }
        _ => return None,
    };

    Some((channel, midi))
}

fn meta_to_raw(meta: &MetaMessage) -> Option<MetaEvent> {
    let (meta_type, payload) = match *meta {
        MetaMessage::TrackNumber(Some(number)) => (0x00, number.to_be_bytes().to_vec()),
        MetaMessage::TrackNumber(None) => (0x00, Vec::new()),
        MetaMessage::Text(bytes) => (0x01, bytes.to_vec()),
        MetaMessage::Copyright(bytes) => (0x02, bytes.to_vec()),
        MetaMessage::TrackName(bytes) => (0x03, bytes.to_vec()),
        MetaMessage::InstrumentName(bytes) => (0x04, bytes.to_vec()),
        MetaMessage::Lyric(bytes) => (0x05, bytes.to_vec()),
        MetaMessage::Marker(bytes) => (0x06, bytes.to_vec()),
        MetaMessage::CuePoint(bytes) => (0x07, bytes.to_vec()),
        MetaMessage::ProgramName(bytes) => (0x08, bytes.to_vec()),
        MetaMessage::DeviceName(bytes) => (0x09, bytes.to_vec()),
        MetaMessage::MidiChannel(ch) => (0x20, vec![ch.as_int()]),
        MetaMessage::MidiPort(port) => (0x21, vec![port.as_int()]),
        MetaMessage::TimeSignature(num, den, clocks, notes) => {
            (TIME_SIGNATURE_META_TYPE, vec![num, den, clocks, notes])
        }
        MetaMessage::KeySignature(sharps, minor) => (0x59, vec![sharps as u8, minor as u8]),
        MetaMessage::SequencerSpecific(bytes) => (0x7F, bytes.to_vec()),
        MetaMessage::Unknown(kind, bytes) => (kind, bytes.to_vec()),
        MetaMessage::EndOfTrack | MetaMessage::Tempo(_) | MetaMessage::SmpteOffset(_) => {
            return None;
        }
    };

    Some(MetaEvent { meta_type, payload })
}

fn raw_to_meta(meta: &MetaEvent) -> Option<MetaMessage<'_>> {
    let message = match (meta.meta_type, meta.payload.as_slice()) {
        (0x00, [hi, lo]) => MetaMessage::TrackNumber(Some(u16::from_be_bytes([*hi, *lo]))),
        (0x00, []) => MetaMessage::TrackNumber(None),
        (0x01, bytes) => MetaMessage::Text(bytes),
        (0x02, bytes) => MetaMessage::Copyright(bytes),
        (0x03, bytes) => MetaMessage::TrackName(bytes),
        (0x04, bytes) => MetaMessage::InstrumentName(bytes),
        (0x05, bytes) => MetaMessage::Lyric(bytes),
        (0x06, bytes) => MetaMessage::Marker(bytes),
        (0x07, bytes) => MetaMessage::CuePoint(bytes),
        (0x08, bytes) => MetaMessage::ProgramName(bytes),
        (0x09, bytes) => MetaMessage::DeviceName(bytes),
        (0x20, [ch]) => MetaMessage::MidiChannel(u4::from(ch & 0x0F)),
        (0x21, [port]) => MetaMessage::MidiPort(u7::from(port & 0x7F)),
        (0x2F, _) => return None,
        (0x51, [a, b, c]) => MetaMessage::Tempo(u24::from(u32::from_be_bytes([0, *a, *b, *c]))),
        (TIME_SIGNATURE_META_TYPE, [num, den, clocks, notes, ..]) => {
            MetaMessage::TimeSignature(*num, *den, *clocks, *notes)
        }
        (TIME_SIGNATURE_META_TYPE, [num, den, ..]) => {
            MetaMessage::TimeSignature(*num, *den, 24, 8)
        }
        (0x59, [sharps, minor, ..]) => MetaMessage::KeySignature(*sharps as i8, *minor != 0),
        (0x7F, bytes) => MetaMessage::SequencerSpecific(bytes),
        (0x00 | 0x20 | 0x21 | 0x51 | TIME_SIGNATURE_META_TYPE | 0x59, _) => return None,
        (kind, bytes) => MetaMessage::Unknown(kind, bytes),
    };

    Some(message)
}
