//! MIDI Musical Structure Mining
//!
//! A deterministic analysis pipeline that takes decoded MIDI songs and
//! extracts reusable musical structure: quantized timing and swing, track
//! roles, key and chord progression, and bar-aligned patterns deduplicated
//! across a whole corpus.

pub mod analysis;
pub mod config;
pub mod corpus;
pub mod error;
pub mod miner;
pub mod passes;
pub mod pattern;
pub mod song;
pub mod state;

pub use config::Config;
pub use corpus::{mine_corpus, CorpusMiningResult, SongMiningResult};
pub use error::{MineError, Result as MineResult};
pub use miner::{PatternMiner, PatternMinerHandle, PatternRegistry};
pub use song::{NoteEvent, Song, TimeSignature, Track};
pub use state::SongAnalysis;

/// Per-song analysis pipeline
#[derive(Debug, Clone)]
pub struct SongPipeline {
    config: Config,
}

impl SongPipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run every pass over a song
    pub fn analyze(&self, song: Song) -> MineResult<SongAnalysis> {
        validate_input(&song, &self.config)?;

        let mut state = SongAnalysis::new(song);
        self.run_pipeline(&mut state)?;
        Ok(state)
    }

    /// Execute the complete multi-pass pipeline
    fn run_pipeline(&self, state: &mut SongAnalysis) -> MineResult<()> {
        // Pass 1: Timing Resolution & Swing Detection
        passes::timing::run(state, &self.config)?;

        // Pass 2: Track Feature Extraction
        passes::features::run(state, &self.config)?;

        // Pass 3: Role Classification
        passes::roles::run(state, &self.config)?;

        // Pass 4: Key Detection
        passes::keys::run(state, &self.config)?;

        // Pass 5: Chord Detection & Progression Labeling
        passes::chords::run(state, &self.config)?;

        // Pass 6: Bar Chunking
        passes::chunker::run(state, &self.config)?;

        // Pass 7: Chunk Fingerprinting
        passes::fingerprint::run(state, &self.config)?;

        Ok(())
    }
}

/// Validate configuration and the parts of a song the passes rely on
pub fn validate_input(song: &Song, config: &Config) -> MineResult<()> {
    config::validate_config(config)
        .map_err(|e| MineError::ConfigValidationFailed(e.to_string()))?;

    for ts in &song.time_sig_map {
        if ts.numerator == 0 || ts.denominator == 0 || !ts.denominator.is_power_of_two() {
            return Err(MineError::InvalidTimeSignature {
                numerator: ts.numerator,
                denominator: ts.denominator,
            });
        }
    }

    let bad_note = song
        .tracks
        .iter()
        .flat_map(|t| t.notes.iter())
        .find(|n| !n.start_beat.is_finite() || !n.duration_beats.is_finite());
    if let Some(note) = bad_note {
        return Err(MineError::ContractViolation(format!(
            "note {} on track {} has a non-finite position",
            note.pitch, note.track_id
        )));
    }

    Ok(())
}
