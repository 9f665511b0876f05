//! Pass 1: Timing Resolution & Swing Detection

use crate::analysis::{SwingAnalysis, SwingStyle};
use crate::config::{Config, SwingBands, SwingConfig, TimingConfig};
use crate::error::Result as MineResult;
use crate::passes::features::note_density;
use crate::song::{NoteEvent, Track};
use crate::state::SongAnalysis;
use tracing::{debug, info};

/// Sixteenth notes per beat; swing is always measured on this grid
const SIXTEENTHS_PER_BEAT: f64 = 4.0;

/// Snap a note's start and duration to the grid, keeping the raw values
pub fn quantize_note(note: &mut NoteEvent, timing: &TimingConfig) {
    let step = timing.step_beats();
    let start_steps = (note.start_beat.max(0.0) / step).round();
    let duration_steps = (note.duration_beats / step)
        .round()
        .max(timing.min_duration_steps as f64);

    note.quantized_start = Some(start_steps * step);
    note.quantized_duration = Some(duration_steps * step);
}

/// Quantize every note of a track in place
pub fn resolve_track_timing(track: &mut Track, timing: &TimingConfig) {
    for note in &mut track.notes {
        quantize_note(note, timing);
    }
}

/// Delay of each note sitting nearest the second sixteenth of an eighth pair,
/// in sixteenths (negative when early)
pub fn offgrid_offsets(notes: &[NoteEvent]) -> Vec<f64> {
    notes
        .iter()
        .filter_map(|note| {
            let position = note.start_beat.max(0.0) * SIXTEENTHS_PER_BEAT;
            let nearest = position.round();
            if (nearest as i64) % 2 == 1 {
                Some(position - nearest)
            } else {
                None
            }
        })
        .collect()
}

/// Map an offset onto its swing band
pub fn classify_swing_offset(offset: f64, bands: &SwingBands) -> SwingStyle {
    let offset = offset.max(0.0);
    if offset < bands.none_max {
        SwingStyle::None
    } else if offset < bands.light_max {
        SwingStyle::Light
    } else if offset < bands.medium_max {
        SwingStyle::Medium
    } else if offset < bands.triplet_max {
        SwingStyle::Triplet
    } else {
        SwingStyle::Heavy
    }
}

fn agreement(offsets: &[f64], style: SwingStyle, bands: &SwingBands) -> f64 {
    if offsets.is_empty() {
        return 0.0;
    }
    let agreeing = offsets
        .iter()
        .filter(|&&o| classify_swing_offset(o, bands) == style)
        .count();
    agreeing as f64 / offsets.len() as f64
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Swing style of one track from its raw timing
pub fn detect_track_swing(notes: &[NoteEvent], config: &SwingConfig) -> SwingAnalysis {
    let offsets = offgrid_offsets(notes);
    if offsets.len() < config.min_offgrid_samples {
        return SwingAnalysis::straight(offsets.len());
    }

    let mean_offset = mean(&offsets).max(0.0);
    let style = classify_swing_offset(mean_offset, &config.bands);

    SwingAnalysis {
        style,
        mean_offset,
        confidence: agreement(&offsets, style, &config.bands),
        qualifying_notes: offsets.len(),
    }
}

/// Per-track input to song-level swing
#[derive(Debug, Clone)]
pub struct TrackSwingSample {
    /// Notes per beat of the track
    pub density: f64,
    pub offsets: Vec<f64>,
}

/// Density-weighted swing over all tracks.
///
/// Each track weighs `density * qualifying notes`; the minimum-sample rule
/// applies to the pooled note count.
pub fn aggregate_song_swing(samples: &[TrackSwingSample], config: &SwingConfig) -> SwingAnalysis {
    let pooled: usize = samples.iter().map(|s| s.offsets.len()).sum();
    if pooled < config.min_offgrid_samples {
        return SwingAnalysis::straight(pooled);
    }

    let mut weighted_offset = 0.0;
    let mut total_weight = 0.0;
    for sample in samples.iter().filter(|s| !s.offsets.is_empty()) {
        let weight = sample.density.max(0.0) * sample.offsets.len() as f64;
        weighted_offset += weight * mean(&sample.offsets);
        total_weight += weight;
    }

    if total_weight <= 0.0 {
        return SwingAnalysis::straight(pooled);
    }

    let mean_offset = (weighted_offset / total_weight).max(0.0);
    let style = classify_swing_offset(mean_offset, &config.bands);

    let confidence = samples
        .iter()
        .filter(|s| !s.offsets.is_empty())
        .map(|s| {
            let weight = s.density.max(0.0) * s.offsets.len() as f64;
            weight * agreement(&s.offsets, style, &config.bands)
        })
        .sum::<f64>()
        / total_weight;

    SwingAnalysis {
        style,
        mean_offset,
        confidence,
        qualifying_notes: pooled,
    }
}

pub fn run(state: &mut SongAnalysis, config: &Config) -> MineResult<()> {
    info!(song = %state.song.id, "Pass 1: Timing Resolution & Swing Detection");

    let mut samples = Vec::with_capacity(state.song.tracks.len());

    for track in &mut state.song.tracks {
        resolve_track_timing(track, &config.timing);

        let swing = detect_track_swing(&track.notes, &config.swing);
        debug!(
            track = track.id,
            style = swing.style.name(),
            offset = swing.mean_offset,
            confidence = swing.confidence,
            "track swing"
        );
        track.swing = Some(swing);

        samples.push(TrackSwingSample {
            density: note_density(&track.notes),
            offsets: offgrid_offsets(&track.notes),
        });
    }

    let song_swing = aggregate_song_swing(&samples, &config.swing);
    info!(
        "  Song swing: {} (offset {:.3}, confidence {:.2}, {} off-grid notes)",
        song_swing.style.name(),
        song_swing.mean_offset,
        song_swing.confidence,
        song_swing.qualifying_notes
    );
    state.swing = Some(song_swing);

    Ok(())
}
