use crate::model::composition::{Composition, Measure, Part};
use crate::model::event::{ChannelMessage, NoteEvent, TimeResolution};
use crate::sequence::{SaveError, Sequence, Track, save_sequence};
use crate::util::with_midi_extension;
use log::{debug, warn};
use std::path::{Path, PathBuf};

pub const DEFAULT_TIME_RESOLUTION: TimeResolution = 480;

const BANK_SELECT_MSB: u8 = 0;
const BANK_SELECT_LSB: u8 = 32;
const TRAILING_SILENCE_BEATS: f64 = 3.0;
const TRAILING_NOTE_DURATION: f64 = 2.0;

/// Which MIDI channel a part's bank select and program change events are sent on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SetupChannelPolicy {
    /// Program change on the channel matching the part index, bank select on channel 0.
    #[default]
    PartIndex,

    /// Bank select and program change both on the channel matching the part index.
    Uniform,

    /// Every setup event on one fixed channel.
    Fixed(u8),
}

impl SetupChannelPolicy {
    /// Channel used for the program change of the part at `part_index`.
    pub fn channel_for_part(&self, part_index: usize) -> u8 {
        match self {
            Self::PartIndex | Self::Uniform => (part_index % 16) as u8,
            Self::Fixed(channel) => channel & 0x0F,
        }
    }

    pub fn bank_select_channel(&self, part_index: usize) -> u8 {
        match self {
            Self::PartIndex => 0,
            _ => self.channel_for_part(part_index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    pub time_resolution: TimeResolution,
    pub setup_channels: SetupChannelPolicy,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            time_resolution: DEFAULT_TIME_RESOLUTION,
            setup_channels: SetupChannelPolicy::default(),
        }
    }
}

/// Flattens a composition into one tempo track plus one note track per part.
///
/// The first part's measures decide the tempo track. A composition without parts yields an
/// empty sequence.
pub fn export_composition(composition: &Composition, options: &ExportOptions) -> Sequence {
    let mut sequence = Sequence::new(options.time_resolution);

    let Some(tempo_part) = composition.parts().first() else {
        debug!("Composition '{}' has no parts, nothing to export", composition.name());
        return sequence;
    };

    write_tempo_track(sequence.tempo_track_mut(), &tempo_part.measures);

    for (part_index, part) in composition.parts().iter().enumerate() {
        write_part(sequence.new_track(), part, part_index, options.setup_channels);
    }

    debug!(
        "Exported '{}': {} tempo event(s), {} part track(s)",
        composition.name(),
        sequence.tempo_track().len(),
        sequence.track_count()
    );

    sequence
}

/// Exports and saves a composition, appending `.mid` to the path when missing. Returns the
/// path actually written.
pub fn export_midi_file<P: AsRef<Path>>(
    composition: &Composition,
    options: &ExportOptions,
    path: P,
) -> Result<PathBuf, SaveError> {
    let path = with_midi_extension(path.as_ref());
    let sequence = export_composition(composition, options);

    save_sequence(&sequence, &path)?;
    Ok(path)
}

// Tempo events only where the tempo changes.
fn write_tempo_track(track: &mut Track, measures: &[Measure]) {
    let Some(first) = measures.first() else {
        return;
    };

    let mut previous_tempo = first.tempo;
    track.new_tempo_event(0.0, previous_tempo);

    for measure in measures.iter().skip(1) {
        if measure.tempo != previous_tempo {
            track.new_tempo_event(measure.first_beat_timestamp, measure.tempo);
            previous_tempo = measure.tempo;
        }
    }
}

fn write_part(track: &mut Track, part: &Part, part_index: usize, policy: SetupChannelPolicy) {
    if part_index >= 16 && !matches!(policy, SetupChannelPolicy::Fixed(_)) {
        warn!(
            "Part {} has no channel of its own, sharing channel {}..!",
            part_index,
            policy.channel_for_part(part_index)
        );
    }

    let bank_channel = policy.bank_select_channel(part_index);
    track.new_channel_event(0.0, ChannelMessage::controller(bank_channel, BANK_SELECT_MSB, 0));
    track.new_channel_event(0.0, ChannelMessage::controller(bank_channel, BANK_SELECT_LSB, 0));
    track.new_channel_event(
        0.0,
        ChannelMessage::program_change(policy.channel_for_part(part_index), part.sound_preset),
    );

    for measure in part.measures.iter() {
        for note in measure.notes.iter() {
            let transposed = measure.transposed_pitch(note);
            if !(0..=127).contains(&transposed) {
                warn!(
                    "Skipping note at beat {} with transposed pitch {}..!",
                    note.timestamp, transposed
                );
                continue;
            }

            let pitch = transposed as u8;
            track.new_note_event(note.timestamp, NoteEvent { pitch, ..note.note });
        }
    }

    if let Some(last) = part.measures.last() {
        track.new_note_event(
            last.end_timestamp() + TRAILING_SILENCE_BEATS,
            NoteEvent {
                channel: 0,
                pitch: 0,
                velocity: 0,
                release_velocity: 0,
                duration: TRAILING_NOTE_DURATION,
            },
        );
    }
}
