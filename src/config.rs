//! Configuration system for the pattern-mining pipeline

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: String,
    pub timing: TimingConfig,
    pub swing: SwingConfig,
    pub features: FeatureConfig,
    pub roles: RoleConfig,
    pub keys: KeyConfig,
    pub chords: ChordConfig,
    pub chunking: ChunkConfig,
    pub fingerprint: FingerprintConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            timing: TimingConfig::default(),
            swing: SwingConfig::default(),
            features: FeatureConfig::default(),
            roles: RoleConfig::default(),
            keys: KeyConfig::default(),
            chords: ChordConfig::default(),
            chunking: ChunkConfig::default(),
            fingerprint: FingerprintConfig::default(),
        }
    }
}

/// Quantization grid configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Grid steps per whole note (16 = sixteenth-note grid)
    pub grid_resolution: u32,
    /// Shortest quantized duration, in grid steps
    pub min_duration_steps: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            grid_resolution: 16,
            min_duration_steps: 1,
        }
    }
}

impl TimingConfig {
    /// Grid steps per quarter-note beat
    pub fn steps_per_beat(&self) -> u32 {
        self.grid_resolution / 4
    }

    /// Length of one grid step in beats
    pub fn step_beats(&self) -> f64 {
        4.0 / self.grid_resolution as f64
    }
}

/// Swing detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwingConfig {
    /// Minimum off-grid notes before a swing style is reported
    pub min_offgrid_samples: usize,
    pub bands: SwingBands,
}

impl Default for SwingConfig {
    fn default() -> Self {
        Self {
            min_offgrid_samples: 8,
            bands: SwingBands::default(),
        }
    }
}

/// Upper bounds of each swing style, as a fraction of one sixteenth note.
/// Anything at or above `triplet_max` is heavy swing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwingBands {
    pub none_max: f64,
    pub light_max: f64,
    pub medium_max: f64,
    pub triplet_max: f64,
}

impl Default for SwingBands {
    fn default() -> Self {
        Self {
            none_max: 0.08,
            light_max: 0.18,
            medium_max: 0.28,
            triplet_max: 0.42,
        }
    }
}

/// Feature extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Zero-based MIDI channel reserved for percussion
    pub percussion_channel: u8,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            percussion_channel: crate::song::PERCUSSION_CHANNEL,
        }
    }
}

/// Role classification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleConfig {
    pub weights: RoleRuleWeights,
    pub margins: RoleMargins,
    /// Weight given to `other` for a track without notes
    pub empty_track_confidence: f64,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            weights: RoleRuleWeights::default(),
            margins: RoleMargins::default(),
            empty_track_confidence: 0.1,
        }
    }
}

/// Score added to a role each time one of its rules fires
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleRuleWeights {
    pub percussion_channel: f64,
    pub narrow_pitch_set: f64,
    pub short_hits: f64,
    pub low_register: f64,
    pub monophonic_low: f64,
    pub polyphonic: f64,
    pub triadic_stacks: f64,
    pub sustained: f64,
    pub sparse_sustained: f64,
    pub upper_register: f64,
    pub melodic_motion: f64,
    pub steady_fast_onsets: f64,
    pub wide_single_voice: f64,
    pub other_baseline: f64,
}

impl Default for RoleRuleWeights {
    fn default() -> Self {
        Self {
            percussion_channel: 3.0,
            narrow_pitch_set: 0.5,
            short_hits: 0.3,
            low_register: 1.0,
            monophonic_low: 0.6,
            polyphonic: 0.8,
            triadic_stacks: 0.6,
            sustained: 0.7,
            sparse_sustained: 0.5,
            upper_register: 0.6,
            melodic_motion: 0.5,
            steady_fast_onsets: 0.8,
            wide_single_voice: 0.4,
            other_baseline: 0.05,
        }
    }
}

/// Feature thresholds that decide whether a role rule fires
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleMargins {
    pub percussion_channel_fraction: f64,
    pub drums_max_distinct_pitches: usize,
    pub drums_max_mean_duration: f64,
    pub bass_max_mean_pitch: f64,
    pub monophonic_max_polyphony: f64,
    pub chords_min_polyphony: f64,
    pub chords_min_simultaneous: usize,
    pub pad_min_mean_duration: f64,
    pub pad_max_density: f64,
    pub lead_min_mean_pitch: f64,
    pub lead_min_distinct_pitches: usize,
    pub arp_min_density: f64,
    pub arp_max_ioi_cv: f64,
    pub arp_min_pitch_range: u8,
}

impl Default for RoleMargins {
    fn default() -> Self {
        Self {
            percussion_channel_fraction: 0.5,
            drums_max_distinct_pitches: 8,
            drums_max_mean_duration: 0.25,
            bass_max_mean_pitch: 52.0,
            monophonic_max_polyphony: 0.1,
            chords_min_polyphony: 0.5,
            chords_min_simultaneous: 3,
            pad_min_mean_duration: 2.0,
            pad_max_density: 1.0,
            lead_min_mean_pitch: 60.0,
            lead_min_distinct_pitches: 4,
            arp_min_density: 3.0,
            arp_max_ioi_cv: 0.15,
            arp_min_pitch_range: 7,
        }
    }
}

/// Key detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Leave drum tracks out of the song-level pitch-class histogram
    pub exclude_drum_tracks: bool,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            exclude_drum_tracks: true,
        }
    }
}

/// Chord window length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChordWindow {
    Beat,
    Bar,
}

/// Chord detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChordConfig {
    pub window: ChordWindow,
    /// Windows with fewer distinct pitch classes yield no chord
    pub min_pitch_classes: usize,
    pub non_chord_penalty: f64,
    pub missing_tone_penalty: f64,
    pub smoothing: bool,
}

impl Default for ChordConfig {
    fn default() -> Self {
        Self {
            window: ChordWindow::Bar,
            min_pitch_classes: 2,
            non_chord_penalty: 0.5,
            missing_tone_penalty: 0.3,
            smoothing: true,
        }
    }
}

/// Bar chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Chunk length in bars: 1, 2, 4 or 8
    pub bars_per_chunk: u32,
    pub arp_min_notes: usize,
    /// Allowed deviation of an arpeggio onset from its rate, in beats
    pub arp_timing_tolerance_beats: f64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            bars_per_chunk: 1,
            arp_min_notes: 4,
            arp_timing_tolerance_beats: 0.02,
        }
    }
}

/// Fingerprinting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Onset weights above this value count as a hit in the rhythm hash
    pub onset_threshold: f64,
    pub sparse_density_max: f64,
    pub dense_density_min: f64,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            onset_threshold: 0.1,
            sparse_density_max: 0.2,
            dense_density_min: 0.6,
        }
    }
}

/// Validate configuration parameters
pub fn validate_config(config: &Config) -> anyhow::Result<()> {
    let resolution = config.timing.grid_resolution;
    if resolution == 0 || resolution % 4 != 0 {
        anyhow::bail!(
            "grid_resolution must be a positive multiple of 4, got {}",
            resolution
        );
    }

    if config.timing.min_duration_steps == 0 {
        anyhow::bail!("min_duration_steps must be at least 1");
    }

    if ![1, 2, 4, 8].contains(&config.chunking.bars_per_chunk) {
        anyhow::bail!(
            "bars_per_chunk must be 1, 2, 4 or 8, got {}",
            config.chunking.bars_per_chunk
        );
    }

    let bands = &config.swing.bands;
    if !(0.0 <= bands.none_max
        && bands.none_max < bands.light_max
        && bands.light_max < bands.medium_max
        && bands.medium_max < bands.triplet_max)
    {
        anyhow::bail!("swing bands must be non-negative and strictly increasing");
    }

    if !(0.0..1.0).contains(&config.fingerprint.onset_threshold) {
        anyhow::bail!("onset_threshold must be in [0, 1)");
    }

    if config.fingerprint.sparse_density_max >= config.fingerprint.dense_density_min {
        anyhow::bail!("sparse_density_max must be < dense_density_min");
    }

    if config.chords.min_pitch_classes == 0 {
        anyhow::bail!("min_pitch_classes must be at least 1");
    }

    if config.chords.non_chord_penalty < 0.0 || config.chords.missing_tone_penalty < 0.0 {
        anyhow::bail!("chord penalties must be non-negative");
    }

    if config.roles.empty_track_confidence < 0.0 {
        anyhow::bail!("empty_track_confidence must be non-negative");
    }

    if config.chunking.arp_min_notes < 2 {
        anyhow::bail!("arp_min_notes must be at least 2");
    }

    Ok(())
}

/// Load configuration from JSON file
pub fn load_config<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Save configuration to JSON file
pub fn save_config<P: AsRef<std::path::Path>>(config: &Config, path: P) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
