//! Per-song analysis state threaded through the passes

use crate::analysis::{ChordProgression, KeyDetection, Role, SwingAnalysis};
use crate::error::Result as MineResult;
use crate::pattern::{Chunk, FingerprintedChunk};
use crate::song::{Song, Track};
use serde::{Deserialize, Serialize};

/// Song plus everything the passes derive from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongAnalysis {
    /// Song with quantized notes, features and roles attached to its tracks
    pub song: Song,

    // Pass 1: Timing resolution
    /// Density-weighted swing across tracks
    pub swing: Option<SwingAnalysis>,

    // Pass 4: Key detection
    pub key: Option<KeyDetection>,

    // Pass 5: Chord detection
    pub progression: Option<ChordProgression>,

    // Pass 6: Bar chunking
    pub chunks: Vec<Chunk>,

    // Pass 7: Fingerprinting
    pub fingerprints: Vec<FingerprintedChunk>,
}

impl SongAnalysis {
    pub fn new(song: Song) -> Self {
        Self {
            song,
            swing: None,
            key: None,
            progression: None,
            chunks: Vec::new(),
            fingerprints: Vec::new(),
        }
    }

    pub fn song_id(&self) -> &str {
        &self.song.id
    }

    /// Primary role of a track, if classified
    pub fn track_role(&self, track: &Track) -> Option<Role> {
        track.roles.map(|r| r.primary_role())
    }

    /// Tracks whose primary role matches
    pub fn tracks_with_role(&self, role: Role) -> Vec<&Track> {
        self.song
            .tracks
            .iter()
            .filter(|t| self.track_role(t) == Some(role))
            .collect()
    }

    /// Serialize for the storage collaborator
    pub fn to_json(&self) -> MineResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> MineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
