use crate::model::event::*;

mod smf;

pub use smf::*;

const BEAT_EPSILON: f64 = 1e-9;

/// One stream of time-ordered events.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    events: Vec<Event>,
    time_resolution: TimeResolution,
}

impl Track {
    pub fn new(time_resolution: TimeResolution) -> Self {
        Self {
            events: Vec::new(),
            time_resolution,
        }
    }

    pub fn time_resolution(&self) -> TimeResolution {
        self.time_resolution
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn cursor(&self) -> EventCursor<'_> {
        EventCursor {
            events: &self.events,
            position: 0,
        }
    }

    pub fn new_note_event(&mut self, timestamp: f64, note: NoteEvent) {
        self.insert(timestamp, EventKind::Note(note));
    }

    pub fn new_channel_event(&mut self, timestamp: f64, message: ChannelMessage) {
        self.insert(timestamp, EventKind::Channel(message));
    }

    pub fn new_meta_event(&mut self, timestamp: f64, meta: MetaEvent) {
        self.insert(timestamp, EventKind::Meta(meta));
    }

    pub fn new_tempo_event(&mut self, timestamp: f64, bpm: f64) {
        self.insert(timestamp, EventKind::Tempo(TempoEvent { bpm }));
    }

    // Events at the same timestamp keep their insertion order.
    fn insert(&mut self, timestamp: f64, kind: EventKind) {
        let index = self.events.partition_point(|e| e.timestamp <= timestamp);
        self.events.insert(index, Event { timestamp, kind });
    }
}

/// A position in a track's event stream. Borrowing the track keeps it alive for the scan only.
#[derive(Debug)]
pub struct EventCursor<'a> {
    events: &'a [Event],
    position: usize,
}

impl<'a> EventCursor<'a> {
    pub fn has_current(&self) -> bool {
        self.position < self.events.len()
    }

    pub fn current(&self) -> Option<&'a Event> {
        self.events.get(self.position)
    }

    pub fn advance(&mut self) {
        if self.has_current() {
            self.position += 1;
        }
    }
}

/// A beat-timed sequence: one tempo track followed by any number of note tracks.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    tempo_track: Track,
    tracks: Vec<Track>,
    time_resolution: TimeResolution,
}

impl Sequence {
    pub fn new(time_resolution: TimeResolution) -> Self {
        Self {
            tempo_track: Track::new(time_resolution),
            tracks: Vec::new(),
            time_resolution,
        }
    }

    pub fn time_resolution(&self) -> TimeResolution {
        self.time_resolution
    }

    pub fn tempo_track(&self) -> &Track {
        &self.tempo_track
    }

    pub fn tempo_track_mut(&mut self) -> &mut Track {
        &mut self.tempo_track
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn new_track(&mut self) -> &mut Track {
        self.tracks.push(Track::new(self.time_resolution));
        let last = self.tracks.len() - 1;
        &mut self.tracks[last]
    }

    /// Well-formed time signatures found on the tempo track, in track order.
    pub fn time_signatures(&self) -> Vec<TimeSignatureEvent> {
        self.tempo_track
            .events()
            .iter()
            .filter_map(|event| match &event.kind {
                EventKind::Meta(meta) if meta.meta_type == TIME_SIGNATURE_META_TYPE => {
                    TimeSignatureEvent::from_payload(&meta.payload, event.timestamp)
                }
                _ => None,
            })
            .collect()
    }

    /// Bar/beat lookup table for this sequence's time signatures. Build it once per scan.
    pub fn bar_beat_map(&self) -> BarBeatMap {
        BarBeatMap::new(&self.time_signatures())
    }

    /// Splits a beat timestamp into bar, beat and sub-beat under the tempo track's time
    /// signatures. Sub-beats count in units of `1 / time_resolution` of a signature beat.
    pub fn beats_to_bar_beat_time(
        &self,
        timestamp: f64,
        time_resolution: TimeResolution,
    ) -> BarBeatTime {
        self.bar_beat_map().bar_beat_time(timestamp, time_resolution)
    }
}

/// Time signature segments, each paired with the number of whole bars before it.
#[derive(Debug, Clone, PartialEq)]
pub struct BarBeatMap {
    segments: Vec<(TimeSignatureEvent, i64)>,
}

impl BarBeatMap {
    /// `signatures` must be in time order, as a track yields them. 4/4 applies until the first.
    pub fn new(signatures: &[TimeSignatureEvent]) -> Self {
        let common_time = TimeSignatureEvent {
            numerator: 4,
            denominator_log: 2,
            timestamp: 0.0,
        };
        let mut segments = vec![(common_time, 0i64)];

        for signature in signatures {
            let (last, last_bars) = segments[segments.len() - 1];

            if signature.timestamp > last.timestamp {
                // a signature change mid-bar still starts a fresh bar
                let elapsed = signature.timestamp - last.timestamp;
                let bars = (elapsed / last.bar_length() - BEAT_EPSILON).ceil().max(0.0) as i64;
                segments.push((*signature, last_bars.saturating_add(bars)));
            } else if let Some(slot) = segments.last_mut() {
                *slot = (*signature, last_bars);
            }
        }

        Self { segments }
    }

    pub fn bar_beat_time(&self, timestamp: f64, time_resolution: TimeResolution) -> BarBeatTime {
        let index = self
            .segments
            .partition_point(|(signature, _)| signature.timestamp <= timestamp)
            .saturating_sub(1);
        let (current, bars_before) = self.segments[index];

        let offset = (timestamp - current.timestamp).max(0.0);
        let bar_length = current.bar_length();
        let beat_length = current.beat_length();

        let bar_in_segment = (offset / bar_length + BEAT_EPSILON).floor();
        let within_bar = (offset - bar_in_segment * bar_length).max(0.0);
        let beat = (within_bar / beat_length + BEAT_EPSILON).floor();
        let remainder = ((within_bar - beat * beat_length) / beat_length).max(0.0);

        let divisor = time_resolution.clamp(1, u16::MAX as u32) as u16;
        let sub_beat = ((remainder * divisor as f64).round() as u32).min(divisor as u32 - 1);

        let bar = bars_before
            .saturating_add(bar_in_segment as i64)
            .saturating_add(1)
            .min(i32::MAX as i64);

        BarBeatTime {
            bar: bar as i32,
            beat: (beat as u16).saturating_add(1),
            sub_beat: sub_beat as u16,
            sub_beat_divisor: divisor,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn time_signature(numerator: u8, denominator_log: u8) -> MetaEvent {
        MetaEvent {
            meta_type: TIME_SIGNATURE_META_TYPE,
            payload: vec![numerator, denominator_log, 24, 8],
        }
    }

    #[test]
    fn track_keeps_time_order() {
        let mut track = Track::new(480);
        track.new_tempo_event(4.0, 90.0);
        track.new_tempo_event(0.0, 120.0);
        track.new_channel_event(4.0, ChannelMessage::controller(0, 7, 100));

        let stamps: Vec<f64> = track.events().iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![0.0, 4.0, 4.0]);
        assert!(matches!(track.events()[1].kind, EventKind::Tempo(_)));
        assert!(matches!(track.events()[2].kind, EventKind::Channel(_)));
    }

    #[test]
    fn cursor_walks_every_event_once() {
        let mut track = Track::new(480);
        for i in 0..3 {
            track.new_tempo_event(i as f64, 100.0 + i as f64);
        }

        let mut cursor = track.cursor();
        let mut seen = 0;
        while cursor.has_current() {
            assert!(cursor.current().is_some());
            seen += 1;
            cursor.advance();
        }
        assert_eq!(seen, 3);
        assert!(cursor.current().is_none());
        cursor.advance();
        assert!(!cursor.has_current());
    }

    #[test]
    fn bar_beat_default_four_four() {
        let sequence = Sequence::new(480);

        let start = sequence.beats_to_bar_beat_time(0.0, 480);
        assert_eq!((start.bar, start.beat, start.sub_beat), (1, 1, 0));

        let later = sequence.beats_to_bar_beat_time(5.5, 480);
        assert_eq!((later.bar, later.beat, later.sub_beat), (2, 2, 240));
        assert_eq!(later.sub_beat_divisor, 480);
    }

    #[test]
    fn bar_beat_follows_signature_changes() {
        let mut sequence = Sequence::new(480);
        sequence
            .tempo_track_mut()
            .new_meta_event(0.0, time_signature(3, 2));
        sequence
            .tempo_track_mut()
            .new_meta_event(6.0, time_signature(6, 3));

        // two bars of 3/4, then 6/8 bars of three quarter-note beats
        let in_three = sequence.beats_to_bar_beat_time(4.0, 480);
        assert_eq!((in_three.bar, in_three.beat), (2, 2));

        let in_six = sequence.beats_to_bar_beat_time(7.5, 480);
        assert_eq!((in_six.bar, in_six.beat, in_six.sub_beat), (3, 4, 0));
    }

    #[test]
    fn bar_beat_far_from_start_saturates() {
        let sequence = Sequence::new(480);

        let time = sequence.beats_to_bar_beat_time(1.0e10, 480);
        assert_eq!(time.bar, i32::MAX);
        assert!(time.beat >= 1);

        let huge = sequence.beats_to_bar_beat_time(f64::MAX, 480);
        assert_eq!(huge.bar, i32::MAX);
    }

    #[test]
    fn bar_beat_map_matches_per_call_lookup() {
        let mut sequence = Sequence::new(480);
        sequence
            .tempo_track_mut()
            .new_meta_event(0.0, time_signature(3, 2));
        sequence
            .tempo_track_mut()
            .new_meta_event(6.0, time_signature(6, 3));

        let map = sequence.bar_beat_map();
        for beat in [0.0, 2.5, 4.0, 5.99, 6.0, 7.5, 40.25] {
            assert_eq!(
                map.bar_beat_time(beat, 480),
                sequence.beats_to_bar_beat_time(beat, 480)
            );
        }

        // negative beats fall back to the first bar
        let before = map.bar_beat_time(-2.0, 480);
        assert_eq!((before.bar, before.beat, before.sub_beat), (1, 1, 0));
    }

    #[test]
    fn malformed_signature_is_ignored() {
        let mut sequence = Sequence::new(96);
        sequence.tempo_track_mut().new_meta_event(
            0.0,
            MetaEvent {
                meta_type: TIME_SIGNATURE_META_TYPE,
                payload: vec![3],
            },
        );

        assert!(sequence.time_signatures().is_empty());
        let time = sequence.beats_to_bar_beat_time(4.0, 96);
        assert_eq!((time.bar, time.beat), (2, 1));
    }
}
