use crate::model::event::NoteEvent;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompositionError {
    #[error("part {part} has no measures")]
    EmptyPart { part: usize },

    #[error("part {part}, measure {measure}: transposed pitch {pitch} is outside 0..=127")]
    PitchOutOfRange {
        part: usize,
        measure: usize,
        pitch: i32,
    },

    #[error("part {part}, measure {measure}: velocity {velocity} is outside 0..=127")]
    VelocityOutOfRange {
        part: usize,
        measure: usize,
        velocity: u8,
    },

    #[error("part {part}, measure {measure}: channel {channel} is outside 0..=15")]
    ChannelOutOfRange {
        part: usize,
        measure: usize,
        channel: u8,
    },

    #[error("no part at index {0}")]
    NoSuchPart(usize),

    #[error("part {part} has no measure at index {measure}")]
    NoSuchMeasure { part: usize, measure: usize },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    pub number_of_beats: u32,
    pub beat_length: u32,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            number_of_beats: 4,
            beat_length: 4,
        }
    }
}

/// A note stored in a measure. The timestamp is absolute within the sequence and the pitch
/// is written before the measure's key signature offset is applied.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct NoteInMeasure {
    pub note: NoteEvent,
    pub timestamp: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Measure {
    pub tempo: f64,
    pub first_beat_timestamp: f64,
    #[serde(default)]
    pub key_signature_offset: i32,
    #[serde(default)]
    pub time_signature: TimeSignature,
    #[serde(default)]
    pub chord: Option<String>,
    pub notes: Vec<NoteInMeasure>,
}

impl Measure {
    pub fn transposed_pitch(&self, note: &NoteInMeasure) -> i32 {
        note.note.pitch as i32 + self.key_signature_offset
    }

    /// Beat just after the last beat of this measure.
    pub fn end_timestamp(&self) -> f64 {
        self.first_beat_timestamp + self.time_signature.number_of_beats as f64
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Part {
    pub sound_preset: u8,
    #[serde(default)]
    pub min_note: u8,
    #[serde(default = "default_max_note")]
    pub max_note: u8,
    pub measures: Vec<Measure>,
}

fn default_max_note() -> u8 {
    127
}

impl Part {
    pub fn set_measure(&mut self, index: usize, measure: Measure) -> Option<Measure> {
        self.measures
            .get_mut(index)
            .map(|slot| std::mem::replace(slot, measure))
    }
}

#[derive(Deserialize)]
struct CompositionDocument {
    #[serde(default)]
    name: Option<String>,
    parts: Vec<Part>,
    #[serde(default)]
    number_of_measures: Option<usize>,
}

/// The structured form of a piece: parts made of measures made of notes.
///
/// Every part is guaranteed to hold at least one measure and every note's transposed pitch
/// fits a MIDI data byte, both checked whenever the parts change.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "CompositionDocument")]
pub struct Composition {
    name: String,
    parts: Vec<Part>,
    number_of_measures: usize,
}

impl TryFrom<CompositionDocument> for Composition {
    type Error = CompositionError;

    fn try_from(doc: CompositionDocument) -> Result<Self, Self::Error> {
        let number_of_measures = doc
            .number_of_measures
            .unwrap_or_else(|| doc.parts.first().map_or(0, |p| p.measures.len()));

        Composition::new(
            doc.name.unwrap_or_else(|| "New Composition".into()),
            doc.parts,
            number_of_measures,
        )
    }
}

impl Composition {
    pub fn new(
        name: impl Into<String>,
        parts: Vec<Part>,
        number_of_measures: usize,
    ) -> Result<Self, CompositionError> {
        for (index, part) in parts.iter().enumerate() {
            validate_part(index, part)?;
        }

        Ok(Self {
            name: name.into(),
            parts,
            number_of_measures,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn number_of_parts(&self) -> usize {
        self.parts.len()
    }

    pub fn number_of_measures(&self) -> usize {
        self.number_of_measures
    }

    /// Opening tempo of the first part, truncated to whole beats per minute.
    pub fn tempo(&self) -> i64 {
        self.parts
            .first()
            .and_then(|part| part.measures.first())
            .map_or(0, |measure| measure.tempo as i64)
    }

    /// Chord names of the first part's measures, e.g. `C ➝ G ➝ END`.
    pub fn chord_progression(&self) -> String {
        let Some(part) = self.parts.first() else {
            return String::new();
        };

        let mut progression = String::new();
        for measure in part.measures.iter() {
            progression.push_str(measure.chord.as_deref().unwrap_or("?"));
            progression.push_str(" ➝ ");
        }
        progression.push_str("END");
        progression
    }

    /// Replaces a whole part, returning the one it displaced.
    pub fn exchange_part(&mut self, index: usize, part: Part) -> Result<Part, CompositionError> {
        let Some(slot) = self.parts.get_mut(index) else {
            return Err(CompositionError::NoSuchPart(index));
        };
        validate_part(index, &part)?;

        Ok(std::mem::replace(slot, part))
    }

    /// Replaces one measure of a part, returning the one it displaced.
    pub fn exchange_measure(
        &mut self,
        part_index: usize,
        measure_index: usize,
        measure: Measure,
    ) -> Result<Measure, CompositionError> {
        let Some(part) = self.parts.get_mut(part_index) else {
            return Err(CompositionError::NoSuchPart(part_index));
        };
        validate_measure(part_index, measure_index, &measure)?;

        part.set_measure(measure_index, measure)
            .ok_or(CompositionError::NoSuchMeasure {
                part: part_index,
                measure: measure_index,
            })
    }
}

fn validate_part(index: usize, part: &Part) -> Result<(), CompositionError> {
    if part.measures.is_empty() {
        return Err(CompositionError::EmptyPart { part: index });
    }

    for (measure_index, measure) in part.measures.iter().enumerate() {
        validate_measure(index, measure_index, measure)?;
    }

    Ok(())
}

fn validate_measure(
    part: usize,
    measure_index: usize,
    measure: &Measure,
) -> Result<(), CompositionError> {
    for note in measure.notes.iter() {
        let pitch = measure.transposed_pitch(note);
        if !(0..=127).contains(&pitch) {
            return Err(CompositionError::PitchOutOfRange {
                part,
                measure: measure_index,
                pitch,
            });
        }

        for velocity in [note.note.velocity, note.note.release_velocity] {
            if velocity > 127 {
                return Err(CompositionError::VelocityOutOfRange {
                    part,
                    measure: measure_index,
                    velocity,
                });
            }
        }

        if note.note.channel > 15 {
            return Err(CompositionError::ChannelOutOfRange {
                part,
                measure: measure_index,
                channel: note.note.channel,
            });
        }
    }

    Ok(())
}
