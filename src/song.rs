//! Decoded song model: notes, tracks, tempo and meter maps

use crate::analysis::{KeyDetection, RoleProbabilities, SwingAnalysis, TrackFeatures};
use crate::error::{MineError, Result as MineResult};
use serde::{Deserialize, Serialize};

/// Tempo used when the source carries no tempo events
pub const DEFAULT_TEMPO_BPM: f64 = 120.0;

/// Zero-based index of General MIDI channel 10
pub const PERCUSSION_CHANNEL: u8 = 9;

/// A single note as decoded from the source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub pitch: u8,
    pub velocity: u8,
    /// Raw start position in quarter-note beats
    pub start_beat: f64,
    /// Raw duration in quarter-note beats
    pub duration_beats: f64,
    pub track_id: u32,
    /// Zero-based MIDI channel
    pub channel: u8,
    /// Grid-snapped start, attached by timing resolution
    pub quantized_start: Option<f64>,
    /// Grid-snapped duration, attached by timing resolution
    pub quantized_duration: Option<f64>,
}

impl NoteEvent {
    pub fn new(
        pitch: u8,
        velocity: u8,
        start_beat: f64,
        duration_beats: f64,
        track_id: u32,
        channel: u8,
    ) -> Self {
        Self {
            pitch: pitch.min(127),
            velocity: velocity.min(127),
            start_beat,
            duration_beats: duration_beats.max(0.0),
            track_id,
            channel,
            quantized_start: None,
            quantized_duration: None,
        }
    }

    /// Build a note from parser tick positions
    pub fn from_ticks(
        pitch: u8,
        velocity: u8,
        start_tick: u64,
        duration_ticks: u64,
        ticks_per_beat: u32,
        track_id: u32,
        channel: u8,
    ) -> Self {
        let tpb = ticks_per_beat.max(1) as f64;
        Self::new(
            pitch,
            velocity,
            start_tick as f64 / tpb,
            duration_ticks as f64 / tpb,
            track_id,
            channel,
        )
    }

    pub fn is_quantized(&self) -> bool {
        self.quantized_start.is_some()
    }

    /// Quantized start when resolved, raw start otherwise
    pub fn effective_start(&self) -> f64 {
        self.quantized_start.unwrap_or(self.start_beat)
    }

    /// Quantized duration when resolved, raw duration otherwise
    pub fn effective_duration(&self) -> f64 {
        self.quantized_duration.unwrap_or(self.duration_beats)
    }

    pub fn effective_end(&self) -> f64 {
        self.effective_start() + self.effective_duration()
    }

    pub fn pitch_class(&self) -> u8 {
        self.pitch % 12
    }

    /// True on the configured percussion channel (`PERCUSSION_CHANNEL` by default)
    pub fn is_percussion(&self, percussion_channel: u8) -> bool {
        self.channel == percussion_channel
    }
}

/// Tempo change
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoEvent {
    pub tick: u64,
    pub beat: f64,
    pub bpm: f64,
}

impl TempoEvent {
    pub fn new(tick: u64, ticks_per_beat: u32, bpm: f64) -> Self {
        Self {
            tick,
            beat: tick as f64 / ticks_per_beat.max(1) as f64,
            bpm,
        }
    }
}

/// Time-signature change
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub tick: u64,
    pub beat: f64,
    pub bar: u32,
    pub numerator: u8,
    pub denominator: u8,
}

impl TimeSignature {
    /// Meter at the start of the song
    pub fn new(numerator: u8, denominator: u8) -> MineResult<Self> {
        Self::at(0, 0.0, 0, numerator, denominator)
    }

    pub fn at(tick: u64, beat: f64, bar: u32, numerator: u8, denominator: u8) -> MineResult<Self> {
        if numerator == 0 || denominator == 0 || !denominator.is_power_of_two() {
            return Err(MineError::InvalidTimeSignature {
                numerator,
                denominator,
            });
        }
        Ok(Self {
            tick,
            beat,
            bar,
            numerator,
            denominator,
        })
    }

    /// 4/4 at the start of the song
    pub fn common_time() -> Self {
        Self {
            tick: 0,
            beat: 0.0,
            bar: 0,
            numerator: 4,
            denominator: 4,
        }
    }

    /// Bar length in quarter-note beats
    pub fn beats_per_bar(&self) -> f64 {
        self.numerator as f64 * 4.0 / self.denominator as f64
    }

    pub fn as_tuple(&self) -> (u8, u8) {
        (self.numerator, self.denominator)
    }
}

const SEGMENT_EPSILON: f64 = 1e-9;

/// Stretch of the song under one time signature, starting on a barline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeterSegment {
    pub meter: TimeSignature,
    pub start_beat: f64,
    /// Start of the next segment; `None` for the last one
    pub end_beat: Option<f64>,
    /// Song bar number of the segment's first bar
    pub first_bar: u32,
}

impl MeterSegment {
    pub fn contains(&self, beat: f64) -> bool {
        beat + SEGMENT_EPSILON >= self.start_beat
            && self.end_beat.map_or(true, |end| beat + SEGMENT_EPSILON < end)
    }

    /// Bars between the segment start and a beat inside it
    pub fn bar_offset(&self, beat: f64) -> u32 {
        ((beat - self.start_beat).max(0.0) / self.meter.beats_per_bar() + SEGMENT_EPSILON).floor()
            as u32
    }

    /// Span of `bars` bars starting `bar_offset` bars in, cut at the segment end
    pub fn span(&self, bar_offset: u32, bars: u32) -> (f64, f64) {
        let bar_beats = self.meter.beats_per_bar();
        let start = self.start_beat + bar_offset as f64 * bar_beats;
        let end = start + bars as f64 * bar_beats;
        (start, self.end_beat.map_or(end, |limit| end.min(limit)))
    }
}

/// Bar-aligned meter segments of a time-signature map ordered by tick.
///
/// The first segment always starts at beat 0. A change landing mid-bar
/// closes the bar it interrupts; changes at the same beat keep the later one.
pub fn meter_segments(time_sig_map: &[TimeSignature]) -> Vec<MeterSegment> {
    let mut segments: Vec<MeterSegment> = Vec::with_capacity(time_sig_map.len().max(1));

    for ts in time_sig_map {
        let Some(last) = segments.last_mut() else {
            segments.push(MeterSegment {
                meter: *ts,
                start_beat: 0.0,
                end_beat: None,
                first_bar: 0,
            });
            continue;
        };

        if ts.beat <= last.start_beat + SEGMENT_EPSILON {
            last.meter = *ts;
            continue;
        }
        if ts.as_tuple() == last.meter.as_tuple() {
            continue;
        }

        let bars = ((ts.beat - last.start_beat) / last.meter.beats_per_bar() - SEGMENT_EPSILON)
            .ceil() as u32;
        last.end_beat = Some(ts.beat);
        let first_bar = last.first_bar + bars;
        segments.push(MeterSegment {
            meter: *ts,
            start_beat: ts.beat,
            end_beat: None,
            first_bar,
        });
    }

    if segments.is_empty() {
        segments.push(MeterSegment {
            meter: TimeSignature::common_time(),
            start_beat: 0.0,
            end_beat: None,
            first_bar: 0,
        });
    }
    segments
}

/// Segment holding a beat; beats before the first change fall in the first
pub fn segment_at(segments: &[MeterSegment], beat: f64) -> Option<(usize, &MeterSegment)> {
    segments
        .iter()
        .enumerate()
        .rev()
        .find(|(_, s)| s.contains(beat))
        .or_else(|| segments.first().map(|s| (0, s)))
}

/// Every bar span from beat 0 up to `until_beat`
pub fn bar_spans(segments: &[MeterSegment], until_beat: f64) -> Vec<(f64, f64)> {
    let mut spans = Vec::new();
    for segment in segments {
        let mut offset = 0;
        loop {
            let (start, end) = segment.span(offset, 1);
            if start + SEGMENT_EPSILON >= until_beat || end <= start + SEGMENT_EPSILON {
                break;
            }
            spans.push((start, end));
            offset += 1;
        }
    }
    spans
}

/// One track of a song with its derived annotations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: u32,
    pub name: Option<String>,
    pub notes: Vec<NoteEvent>,
    pub roles: Option<RoleProbabilities>,
    pub features: Option<TrackFeatures>,
    pub swing: Option<SwingAnalysis>,
    pub key: Option<KeyDetection>,
}

impl Track {
    /// Create a track; notes are ordered by start then pitch
    pub fn new(id: u32, mut notes: Vec<NoteEvent>) -> Self {
        notes.sort_by(|a, b| {
            a.start_beat
                .partial_cmp(&b.start_beat)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.pitch.cmp(&b.pitch))
        });
        Self {
            id,
            name: None,
            notes,
            roles: None,
            features: None,
            swing: None,
            key: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Sum of effective note durations in beats
    pub fn total_duration(&self) -> f64 {
        self.notes.iter().map(|n| n.effective_duration()).sum()
    }
}

/// A fully decoded song
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub source: String,
    pub artist: Option<String>,
    pub ticks_per_beat: u32,
    pub tempo_map: Vec<TempoEvent>,
    pub time_sig_map: Vec<TimeSignature>,
    pub tracks: Vec<Track>,
}

impl Song {
    /// Create a song, ordering both maps by tick and filling in
    /// 120 BPM and 4/4 when they are empty
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        ticks_per_beat: u32,
        mut tempo_map: Vec<TempoEvent>,
        mut time_sig_map: Vec<TimeSignature>,
        tracks: Vec<Track>,
    ) -> Self {
        let ticks_per_beat = ticks_per_beat.max(1);

        tempo_map.retain(|t| t.bpm.is_finite() && t.bpm > 0.0);
        tempo_map.sort_by_key(|t| t.tick);
        if tempo_map.is_empty() {
            tempo_map.push(TempoEvent::new(0, ticks_per_beat, DEFAULT_TEMPO_BPM));
        }

        time_sig_map.sort_by_key(|t| t.tick);
        if time_sig_map.is_empty() {
            time_sig_map.push(TimeSignature::common_time());
        }

        Self {
            id: id.into(),
            source: source.into(),
            artist: None,
            ticks_per_beat,
            tempo_map,
            time_sig_map,
            tracks,
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn primary_tempo(&self) -> f64 {
        self.tempo_map
            .first()
            .map(|t| t.bpm)
            .unwrap_or(DEFAULT_TEMPO_BPM)
    }

    pub fn primary_time_sig(&self) -> (u8, u8) {
        self.meter().as_tuple()
    }

    /// Meter at the start of the song
    pub fn meter(&self) -> TimeSignature {
        self.time_sig_map
            .first()
            .copied()
            .unwrap_or_else(TimeSignature::common_time)
    }

    /// Bar layout following every time-signature change
    pub fn meter_segments(&self) -> Vec<MeterSegment> {
        meter_segments(&self.time_sig_map)
    }

    pub fn beat_at_tick(&self, tick: u64) -> f64 {
        tick as f64 / self.ticks_per_beat as f64
    }

    /// Wall-clock position of a beat, following tempo changes
    pub fn seconds_at_beat(&self, beat: f64) -> f64 {
        let mut seconds = 0.0;
        let mut last_beat = 0.0;
        let mut bpm = DEFAULT_TEMPO_BPM;

        for tempo in &self.tempo_map {
            if tempo.beat >= beat {
                break;
            }
            seconds += (tempo.beat - last_beat).max(0.0) * 60.0 / bpm;
            last_beat = tempo.beat.max(last_beat);
            bpm = tempo.bpm;
        }

        seconds + (beat - last_beat).max(0.0) * 60.0 / bpm
    }

    /// End of the last note in beats
    pub fn total_beats(&self) -> f64 {
        self.tracks
            .iter()
            .flat_map(|t| t.notes.iter())
            .map(|n| n.start_beat + n.duration_beats)
            .fold(0.0, f64::max)
    }

    pub fn duration_seconds(&self) -> f64 {
        self.seconds_at_beat(self.total_beats())
    }

    pub fn note_count(&self) -> usize {
        self.tracks.iter().map(|t| t.notes.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beats_per_bar() {
        assert_eq!(TimeSignature::new(4, 4).unwrap().beats_per_bar(), 4.0);
        assert_eq!(TimeSignature::new(3, 4).unwrap().beats_per_bar(), 3.0);
        assert_eq!(TimeSignature::new(6, 8).unwrap().beats_per_bar(), 3.0);
        assert_eq!(TimeSignature::new(7, 8).unwrap().beats_per_bar(), 3.5);
        assert_eq!(TimeSignature::new(2, 2).unwrap().beats_per_bar(), 4.0);
    }

    #[test]
    fn test_invalid_time_signature() {
        assert!(TimeSignature::new(0, 4).is_err());
        assert!(TimeSignature::new(4, 3).is_err());
        assert!(TimeSignature::new(4, 0).is_err());
    }

    #[test]
    fn test_meter_segments() {
        let sigs = vec![
            TimeSignature::common_time(),
            TimeSignature::at(1920, 4.0, 1, 3, 4).unwrap(),
            // Repeated meter does not open a segment
            TimeSignature::at(2880, 6.0, 2, 3, 4).unwrap(),
            // Lands mid-bar: 3/4 bars at 4, 7 and a cut bar at 10
            TimeSignature::at(5280, 11.0, 4, 4, 4).unwrap(),
        ];
        let segments = meter_segments(&sigs);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].end_beat, Some(4.0));
        assert_eq!(segments[1].first_bar, 1);
        assert_eq!(segments[1].end_beat, Some(11.0));
        assert_eq!(segments[2].first_bar, 4);
        assert_eq!(segments[2].end_beat, None);

        assert_eq!(segment_at(&segments, 3.99).unwrap().0, 0);
        assert_eq!(segment_at(&segments, 4.0).unwrap().0, 1);
        assert_eq!(segment_at(&segments, 20.0).unwrap().0, 2);
        assert_eq!(segments[1].bar_offset(10.5), 2);
        assert_eq!(segments[1].span(2, 1), (10.0, 11.0));

        let spans = bar_spans(&segments, 15.0);
        assert_eq!(
            spans,
            vec![(0.0, 4.0), (4.0, 7.0), (7.0, 10.0), (10.0, 11.0), (11.0, 15.0)]
        );
    }

    #[test]
    fn test_empty_meter_map_is_common_time() {
        let segments = meter_segments(&[]);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].meter.as_tuple(), (4, 4));
        assert!(bar_spans(&segments, 0.0).is_empty());
        assert_eq!(bar_spans(&segments, 5.0), vec![(0.0, 4.0), (4.0, 8.0)]);
    }

    #[test]
    fn test_song_defaults() {
        let song = Song::new("s", "s.mid", 480, vec![], vec![], vec![]);
        assert_eq!(song.primary_tempo(), 120.0);
        assert_eq!(song.primary_time_sig(), (4, 4));
        assert_eq!(song.tempo_map.len(), 1);
        assert_eq!(song.time_sig_map.len(), 1);
    }

    #[test]
    fn test_maps_sorted_by_tick() {
        let tempo = vec![TempoEvent::new(960, 480, 90.0), TempoEvent::new(0, 480, 100.0)];
        let sigs = vec![
            TimeSignature::at(1920, 4.0, 1, 3, 4).unwrap(),
            TimeSignature::new(4, 4).unwrap(),
        ];
        let song = Song::new("s", "s.mid", 480, tempo, sigs, vec![]);
        assert_eq!(song.primary_tempo(), 100.0);
        assert_eq!(song.primary_time_sig(), (4, 4));
        assert_eq!(song.tempo_map[1].beat, 2.0);
    }

    #[test]
    fn test_seconds_at_beat_follows_tempo_changes() {
        let tempo = vec![TempoEvent::new(0, 480, 120.0), TempoEvent::new(1920, 480, 60.0)];
        let song = Song::new("s", "s.mid", 480, tempo, vec![], vec![]);
        // 4 beats at 120 BPM, then 2 beats at 60 BPM
        assert!((song.seconds_at_beat(4.0) - 2.0).abs() < 1e-9);
        assert!((song.seconds_at_beat(6.0) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_note_from_ticks() {
        let note = NoteEvent::from_ticks(60, 100, 240, 480, 480, 0, 0);
        assert_eq!(note.start_beat, 0.5);
        assert_eq!(note.duration_beats, 1.0);
        assert_eq!(note.effective_start(), 0.5);
        assert!(!note.is_quantized());
        assert!(!note.is_percussion(PERCUSSION_CHANNEL));
        assert!(NoteEvent::new(36, 100, 0.0, 0.1, 0, 9).is_percussion(PERCUSSION_CHANNEL));
        // A remapped kit on channel 11
        assert!(!NoteEvent::new(36, 100, 0.0, 0.1, 0, 9).is_percussion(10));
        assert!(NoteEvent::new(36, 100, 0.0, 0.1, 0, 10).is_percussion(10));
    }

    #[test]
    fn test_track_orders_notes() {
        let track = Track::new(
            0,
            vec![
                NoteEvent::new(64, 90, 1.0, 0.5, 0, 0),
                NoteEvent::new(62, 90, 0.0, 0.5, 0, 0),
                NoteEvent::new(60, 90, 0.0, 0.5, 0, 0),
            ],
        );
        let pitches: Vec<u8> = track.notes.iter().map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![60, 62, 64]);
    }
}
