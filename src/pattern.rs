//! Chunk representations, fingerprints and canonical patterns

use crate::analysis::Role;
use crate::song::TimeSignature;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Default onset binarization threshold for rhythm hashes
pub const ONSET_THRESHOLD: f64 = 0.1;

/// Joins the rhythm and pitch halves of a combo fingerprint
pub const COMBO_SEPARATOR: char = '|';

/// One drum hit on the chunk grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrumHit {
    pub step: u32,
    pub pitch: u8,
    pub velocity: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrumPattern {
    pub steps: u32,
    pub hits: Vec<DrumHit>,
}

/// Note position relative to the chunk's first note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MelodicNote {
    pub step: u32,
    pub interval: i16,
    pub duration_steps: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MelodicPattern {
    pub steps: u32,
    pub notes: Vec<MelodicNote>,
}

/// Subdivision an arpeggio moves at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArpRate {
    Eighth,
    EighthTriplet,
    Sixteenth,
    ThirtySecond,
}

impl ArpRate {
    pub const ALL: [ArpRate; 4] = [
        ArpRate::Eighth,
        ArpRate::EighthTriplet,
        ArpRate::Sixteenth,
        ArpRate::ThirtySecond,
    ];

    /// Note spacing in beats
    pub fn beats(&self) -> f64 {
        match self {
            ArpRate::Eighth => 0.5,
            ArpRate::EighthTriplet => 1.0 / 3.0,
            ArpRate::Sixteenth => 0.25,
            ArpRate::ThirtySecond => 0.125,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArpPattern {
    pub rate: ArpRate,
    /// Pitch-class offset of each note from the first note
    pub intervals: Vec<u8>,
    /// Octave of each note relative to the first note
    pub octave_jumps: Vec<i8>,
    /// Mean sounding length as a fraction of the rate
    pub gate_ratio: f64,
}

/// Role-specific chunk content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatternRepresentation {
    Drum(DrumPattern),
    Melodic(MelodicPattern),
    Arp(ArpPattern),
}

impl PatternRepresentation {
    pub fn kind(&self) -> &'static str {
        match self {
            PatternRepresentation::Drum(_) => "drum",
            PatternRepresentation::Melodic(_) => "melodic",
            PatternRepresentation::Arp(_) => "arp",
        }
    }
}

/// A note inside a chunk, positioned relative to the chunk start
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkNote {
    pub step: u32,
    pub offset_beats: f64,
    /// In-window duration; truncated at the chunk end
    pub duration_beats: f64,
    pub pitch: u8,
    pub velocity: u8,
}

/// One bar-aligned window of a track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub track_id: u32,
    pub role: Role,
    pub bar_index: u32,
    pub bars: u32,
    pub meter: TimeSignature,
    pub grid_resolution: u32,
    pub steps: u32,
    /// Ordered by step, then pitch
    pub notes: Vec<ChunkNote>,
    pub representation: PatternRepresentation,
}

impl Chunk {
    /// Pitch that interval sequences are measured from; `None` for drums
    pub fn anchor_pitch(&self) -> Option<u8> {
        if self.role == Role::Drums {
            return None;
        }
        self.notes.first().map(|n| n.pitch)
    }

    pub fn steps_per_beat(&self) -> u32 {
        self.grid_resolution / 4
    }
}

/// Onset grid of a chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RhythmFingerprint {
    /// Velocity relative to the chunk peak, 0 where nothing starts
    pub onsets: Vec<f64>,
    /// Velocity / 127 per step
    pub accents: Vec<f64>,
    /// Onset steps per step
    pub density: f64,
}

impl RhythmFingerprint {
    /// Binary onset string with the default threshold
    pub fn to_hash(&self) -> String {
        self.hash_with_threshold(ONSET_THRESHOLD)
    }

    pub fn hash_with_threshold(&self, threshold: f64) -> String {
        self.onsets
            .iter()
            .map(|&w| if w > threshold { '1' } else { '0' })
            .collect()
    }

    pub fn steps(&self) -> usize {
        self.onsets.len()
    }
}

/// Transposition-free pitch content of a chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitchFingerprint {
    /// Semitones from the first note, one per note
    pub intervals: Vec<i16>,
    /// -1 / 0 / +1 between consecutive notes
    pub contour: Vec<i8>,
    pub pitch_classes: BTreeSet<u8>,
}

impl PitchFingerprint {
    /// Contour as a `U`/`D`/`S` string
    pub fn to_hash(&self) -> String {
        self.contour
            .iter()
            .map(|&c| match c.signum() {
                1 => 'U',
                -1 => 'D',
                _ => 'S',
            })
            .collect()
    }

    pub fn span(&self) -> i16 {
        let min = self.intervals.iter().copied().min().unwrap_or(0);
        let max = self.intervals.iter().copied().max().unwrap_or(0);
        max - min
    }
}

/// Deduplication key: rhythm hash, separator, pitch hash
pub fn combo_fingerprint(rhythm_hash: &str, pitch_hash: &str) -> String {
    format!("{}{}{}", rhythm_hash, COMBO_SEPARATOR, pitch_hash)
}

/// A chunk with its fingerprints, ready for the miner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintedChunk {
    pub chunk: Chunk,
    pub rhythm: RhythmFingerprint,
    pub pitch: Option<PitchFingerprint>,
    pub combo_fingerprint: String,
    pub tags: Vec<String>,
}

/// Transposition mapping an occurrence onto its canonical pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transform {
    /// Semitones to add to the occurrence
    pub transpose: i8,
}

impl Transform {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn transpose(semitones: i8) -> Self {
        Self {
            transpose: semitones,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.transpose == 0
    }
}

/// Aggregate usage counters of a canonical pattern
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PatternStats {
    pub occurrences: usize,
    pub song_ids: BTreeSet<String>,
    pub artists: BTreeSet<String>,
}

impl PatternStats {
    pub fn record(&mut self, song_id: &str, artist: Option<&str>) {
        self.occurrences += 1;
        self.song_ids.insert(song_id.to_string());
        if let Some(artist) = artist {
            self.artists.insert(artist.to_string());
        }
    }

    pub fn distinct_songs(&self) -> usize {
        self.song_ids.len()
    }

    pub fn distinct_artists(&self) -> usize {
        self.artists.len()
    }
}

/// Canonical deduplicated pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub combo_fingerprint: String,
    pub role: Role,
    pub bars: u32,
    pub meter: (u8, u8),
    pub grid_resolution: u32,
    pub rhythm: RhythmFingerprint,
    pub pitch: Option<PitchFingerprint>,
    pub representation: PatternRepresentation,
    /// First-note pitch of the chunk the pattern was seeded from
    pub anchor_pitch: Option<u8>,
    pub stats: PatternStats,
    pub tags: Vec<String>,
}

impl Pattern {
    /// `pat_` + first 16 hex digits of SHA-256 over the combo fingerprint
    pub fn id_for(combo_fingerprint: &str) -> String {
        let digest = Sha256::digest(combo_fingerprint.as_bytes());
        let hex = format!("{:x}", digest);
        format!("pat_{}", &hex[..16])
    }

    /// Seed a new canonical pattern from its first occurrence
    pub fn from_chunk(fingerprinted: &FingerprintedChunk) -> Self {
        let chunk = &fingerprinted.chunk;
        Self {
            id: Self::id_for(&fingerprinted.combo_fingerprint),
            combo_fingerprint: fingerprinted.combo_fingerprint.clone(),
            role: chunk.role,
            bars: chunk.bars,
            meter: chunk.meter.as_tuple(),
            grid_resolution: chunk.grid_resolution,
            rhythm: fingerprinted.rhythm.clone(),
            pitch: fingerprinted.pitch.clone(),
            representation: chunk.representation.clone(),
            anchor_pitch: chunk.anchor_pitch(),
            stats: PatternStats::default(),
            tags: fingerprinted.tags.clone(),
        }
    }
}

/// One concrete occurrence of a pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternInstance {
    pub pattern_id: String,
    pub song_id: String,
    pub track_id: u32,
    pub start_bar: u32,
    pub confidence: f64,
    pub transform: Transform,
}

/// Pattern and instance pair handed to storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternUpsert {
    pub pattern: Pattern,
    pub instance: PatternInstance,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rhythm_hash_threshold() {
        let a = RhythmFingerprint {
            onsets: vec![1.0, 0.0, 0.5, 0.0],
            accents: vec![0.8, 0.0, 0.4, 0.0],
            density: 0.5,
        };
        let b = RhythmFingerprint {
            onsets: vec![0.9, 0.0, 0.2, 0.0],
            accents: vec![0.7, 0.0, 0.1, 0.0],
            density: 0.5,
        };
        assert_eq!(a.to_hash(), "1010");
        assert_eq!(a.to_hash(), b.to_hash());

        // Exactly at the threshold is not an onset
        let c = RhythmFingerprint {
            onsets: vec![0.1, 0.11],
            accents: vec![0.1, 0.11],
            density: 1.0,
        };
        assert_eq!(c.to_hash(), "01");
    }

    #[test]
    fn test_pitch_hash_uses_contour_only() {
        let small = PitchFingerprint {
            intervals: vec![0, 1, 0, 2],
            contour: vec![1, -1, 1],
            pitch_classes: [0, 1, 2].into_iter().collect(),
        };
        let large = PitchFingerprint {
            intervals: vec![0, 12, -5, 7],
            contour: vec![1, -1, 1],
            pitch_classes: [0, 7].into_iter().collect(),
        };
        assert_eq!(small.to_hash(), "UDU");
        assert_eq!(small.to_hash(), large.to_hash());
    }

    #[test]
    fn test_combo_has_single_separator() {
        let combo = combo_fingerprint("10001000", "");
        assert_eq!(combo, "10001000|");
        assert_eq!(combo.matches(COMBO_SEPARATOR).count(), 1);

        let combo = combo_fingerprint("1010", "UDS");
        assert_eq!(combo.split(COMBO_SEPARATOR).collect::<Vec<_>>(), vec!["1010", "UDS"]);
    }

    #[test]
    fn test_pattern_id_is_deterministic() {
        let a = Pattern::id_for("1000100010001000|");
        let b = Pattern::id_for("1000100010001000|");
        let c = Pattern::id_for("1000100010001000|U");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("pat_"));
        assert_eq!(a.len(), 20);
    }

    #[test]
    fn test_stats_record() {
        let mut stats = PatternStats::default();
        stats.record("song-a", Some("artist-1"));
        stats.record("song-a", None);
        stats.record("song-b", Some("artist-1"));
        assert_eq!(stats.occurrences, 3);
        assert_eq!(stats.distinct_songs(), 2);
        assert_eq!(stats.distinct_artists(), 1);
    }
}
