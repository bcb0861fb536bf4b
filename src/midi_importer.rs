use crate::model::event::*;
use crate::sequence::{BarBeatMap, LoadError, Sequence, Track, load_sequence};
use log::{debug, trace};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct TempoChange {
    pub timestamp: f64,
    pub bpm: f64,
}

/// What the tempo track held besides time signatures.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct TempoTrackSummary {
    pub tempo_changes: Vec<TempoChange>,
    pub event_count: usize,
}

/// Flat result of reading a sequence: every track's notes and markers merged in track order,
/// plus what the tempo track says about resolution and time signatures.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct ImportedSequence {
    pub tempo_track: TempoTrackSummary,
    pub notes: Vec<TimedNote>,
    pub time_resolution: TimeResolution,
    pub time_signatures: Vec<TimeSignatureEvent>,
    pub markers: Vec<MarkerTimestamp>,
}

pub fn import_midi_file<P: AsRef<Path>>(path: P) -> Result<ImportedSequence, LoadError> {
    let sequence = load_sequence(path.as_ref())?;
    Ok(import_sequence(&sequence))
}

/// Reads a loaded sequence. Events the translator has no use for are skipped, never rejected.
pub fn import_sequence(sequence: &Sequence) -> ImportedSequence {
    let time_resolution = sequence.tempo_track().time_resolution();
    debug!("Time resolution: {}", time_resolution);

    let (tempo_track, time_signatures) = parse_tempo_track(sequence.tempo_track());

    let bar_beat_map = BarBeatMap::new(&time_signatures);
    let mut notes: Vec<TimedNote> = Vec::new();
    let mut markers: Vec<MarkerTimestamp> = Vec::new();

    debug!("Parsing {} tracks", sequence.track_count());
    for index in 0..sequence.track_count() {
        if let Some(track) = sequence.track(index) {
            parse_track(&bar_beat_map, track, time_resolution, &mut notes, &mut markers);
        }
    }

    debug!(
        "Imported {} notes, {} markers, {} time signatures",
        notes.len(),
        markers.len(),
        time_signatures.len()
    );

    ImportedSequence {
        tempo_track,
        notes,
        time_resolution,
        time_signatures,
        markers,
    }
}

fn parse_tempo_track(track: &Track) -> (TempoTrackSummary, Vec<TimeSignatureEvent>) {
    let mut summary = TempoTrackSummary {
        event_count: track.len(),
        ..Default::default()
    };
    let mut time_signatures = Vec::new();

    let mut cursor = track.cursor();
    while let Some(event) = cursor.current() {
        match &event.kind {
            EventKind::Meta(meta) => {
                trace!(
                    "Meta event at beat {}: data length {}, type {:#04x}",
                    event.timestamp,
                    meta.payload.len(),
                    meta.meta_type
                );

                if meta.meta_type == TIME_SIGNATURE_META_TYPE {
                    match TimeSignatureEvent::from_payload(&meta.payload, event.timestamp) {
                        Some(signature) => time_signatures.push(signature),
                        None => debug!(
                            "Skipping truncated time signature at beat {}",
                            event.timestamp
                        ),
                    }
                }
            }
            EventKind::Tempo(tempo) => summary.tempo_changes.push(TempoChange {
                timestamp: event.timestamp,
                bpm: tempo.bpm,
            }),
            _ => {}
        }
        cursor.advance();
    }

    (summary, time_signatures)
}

fn parse_track(
    bar_beat_map: &BarBeatMap,
    track: &Track,
    time_resolution: TimeResolution,
    notes: &mut Vec<TimedNote>,
    markers: &mut Vec<MarkerTimestamp>,
) {
    let mut cursor = track.cursor();
    while let Some(event) = cursor.current() {
        match &event.kind {
            EventKind::Note(note) => notes.push(TimedNote {
                note: *note,
                bar_beat: bar_beat_map.bar_beat_time(event.timestamp, time_resolution),
                timestamp: event.timestamp,
            }),
            EventKind::Channel(message) => {
                trace!(
                    "Channel message at beat {}: status {:#04x}, data1 {}, data2 {}",
                    event.timestamp, message.status, message.data1, message.data2
                );
                if message.data1 == MARKER_TRIGGER {
                    markers.push(event.timestamp);
                }
            }
            _ => {}
        }
        cursor.advance();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn note(pitch: u8) -> NoteEvent {
        NoteEvent {
            channel: 0,
            pitch,
            velocity: 100,
            release_velocity: 0,
            duration: 1.0,
        }
    }

    fn meta(meta_type: u8, payload: &[u8]) -> MetaEvent {
        MetaEvent {
            meta_type,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn only_time_signature_metas_are_kept() {
        env_logger::try_init().unwrap_or(());

        let mut sequence = Sequence::new(480);
        let tempo = sequence.tempo_track_mut();
        tempo.new_meta_event(0.0, meta(0x03, b"title"));
        tempo.new_meta_event(0.0, meta(TIME_SIGNATURE_META_TYPE, &[3, 2, 24, 8]));
        tempo.new_meta_event(1.0, meta(0x59, &[2, 0]));
        tempo.new_meta_event(2.0, meta(0x7E, &[]));
        tempo.new_meta_event(3.0, meta(TIME_SIGNATURE_META_TYPE, &[1]));
        tempo.new_meta_event(6.0, meta(TIME_SIGNATURE_META_TYPE, &[4, 2, 24, 8]));
        tempo.new_tempo_event(0.0, 100.0);

        let imported = import_sequence(&sequence);
        assert_eq!(
            imported.time_signatures,
            vec![
                TimeSignatureEvent {
                    numerator: 3,
                    denominator_log: 2,
                    timestamp: 0.0
                },
                TimeSignatureEvent {
                    numerator: 4,
                    denominator_log: 2,
                    timestamp: 6.0
                },
            ]
        );
        assert_eq!(imported.tempo_track.event_count, 7);
        assert_eq!(
            imported.tempo_track.tempo_changes,
            vec![TempoChange {
                timestamp: 0.0,
                bpm: 100.0
            }]
        );
    }

    #[test]
    fn marker_gating() {
        let mut sequence = Sequence::new(480);
        let track = sequence.new_track();
        track.new_channel_event(1.5, ChannelMessage::controller(0, MARKER_TRIGGER, 127));
        track.new_channel_event(2.0, ChannelMessage::controller(0, 21, 127));
        track.new_channel_event(2.5, ChannelMessage::program_change(0, 5));
        track.new_channel_event(3.0, ChannelMessage::program_change(1, MARKER_TRIGGER));

        let imported = import_sequence(&sequence);
        assert_eq!(imported.markers, vec![1.5, 3.0]);
        assert!(imported.notes.is_empty());
    }

    #[test]
    fn notes_merge_in_track_order() {
        let mut sequence = Sequence::new(96);
        sequence.new_track().new_note_event(8.0, note(72));
        let second = sequence.new_track();
        second.new_note_event(0.0, note(48));
        second.new_note_event(4.5, note(50));

        let imported = import_sequence(&sequence);
        assert_eq!(imported.time_resolution, 96);

        let pitches: Vec<u8> = imported.notes.iter().map(|n| n.note.pitch).collect();
        assert_eq!(pitches, vec![72, 48, 50]);

        let last = &imported.notes[2];
        assert_eq!(last.timestamp, 4.5);
        assert_eq!((last.bar_beat.bar, last.bar_beat.beat), (2, 1));
        assert_eq!(last.bar_beat.sub_beat, 48);
        assert_eq!(last.bar_beat.sub_beat_divisor, 96);
    }

    #[test]
    fn far_away_note_does_not_abort_import() {
        let mut sequence = Sequence::new(480);
        sequence.new_track().new_note_event(1.0e10, note(60));

        let imported = import_sequence(&sequence);
        assert_eq!(imported.notes.len(), 1);
        assert_eq!(imported.notes[0].timestamp, 1.0e10);
        assert_eq!(imported.notes[0].bar_beat.bar, i32::MAX);
    }

    #[test]
    fn empty_sequence() {
        let imported = import_sequence(&Sequence::new(480));
        assert_eq!(imported.time_resolution, 480);
        assert!(imported.notes.is_empty());
        assert!(imported.markers.is_empty());
        assert!(imported.time_signatures.is_empty());
        assert_eq!(imported.tempo_track, TempoTrackSummary::default());
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let result = import_midi_file("./no/such/song.mid");
        assert!(matches!(result, Err(LoadError::Io { .. })));
    }
}
