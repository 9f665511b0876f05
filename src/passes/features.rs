//! Pass 2: Track Feature Extraction

use crate::analysis::TrackFeatures;
use crate::config::{Config, FeatureConfig};
use crate::error::Result as MineResult;
use crate::song::{NoteEvent, Track};
use crate::state::SongAnalysis;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Beats from the first onset to the last release
pub fn span_beats(notes: &[NoteEvent]) -> f64 {
    let start = notes
        .iter()
        .map(|n| n.effective_start())
        .fold(f64::INFINITY, f64::min);
    let end = notes
        .iter()
        .map(|n| n.effective_end())
        .fold(f64::NEG_INFINITY, f64::max);
    if notes.is_empty() {
        0.0
    } else {
        (end - start).max(0.0)
    }
}

/// Notes per beat; spans shorter than one beat count as one beat
pub fn note_density(notes: &[NoteEvent]) -> f64 {
    if notes.is_empty() {
        return 0.0;
    }
    notes.len() as f64 / span_beats(notes).max(1.0)
}

/// Returns (polyphony ratio, max simultaneous notes)
fn compute_polyphony(notes: &[NoteEvent]) -> (f64, usize) {
    if notes.is_empty() {
        return (0.0, 0);
    }

    let mut events: Vec<(f64, i32)> = Vec::with_capacity(notes.len() * 2);
    for note in notes {
        events.push((note.effective_start(), 1));
        events.push((note.effective_end(), -1));
    }
    // Releases sort before onsets at the same instant
    events.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.cmp(&b.1))
    });

    let mut active = 0i32;
    let mut max_active = 0usize;
    let mut sounding = 0.0;
    let mut stacked = 0.0;
    let mut last_time = events[0].0;

    for &(time, delta) in &events {
        let elapsed = time - last_time;
        if active >= 1 {
            sounding += elapsed;
        }
        if active >= 2 {
            stacked += elapsed;
        }
        active += delta;
        max_active = max_active.max(active.max(0) as usize);
        last_time = time;
    }

    let ratio = if sounding > 0.0 { stacked / sounding } else { 0.0 };
    (ratio, max_active)
}

/// Returns (mean inter-onset interval, coefficient of variation)
fn compute_ioi_stats(notes: &[NoteEvent]) -> (f64, f64) {
    let mut onsets: Vec<f64> = notes.iter().map(|n| n.effective_start()).collect();
    onsets.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    onsets.dedup_by(|a, b| (*a - *b).abs() < 1e-9);

    if onsets.len() < 2 {
        return (0.0, 0.0);
    }

    let iois: Vec<f64> = onsets.windows(2).map(|w| w[1] - w[0]).collect();
    let mean = iois.iter().sum::<f64>() / iois.len() as f64;
    let variance = iois.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / iois.len() as f64;
    let cv = if mean > 0.0 { variance.sqrt() / mean } else { 0.0 };

    (mean, cv)
}

/// Derive scalar descriptors from a track's (quantized) notes
pub fn extract_features(track: &Track, config: &FeatureConfig) -> TrackFeatures {
    let notes = &track.notes;
    if notes.is_empty() {
        return TrackFeatures::default();
    }

    let count = notes.len() as f64;
    let pitch_min = notes.iter().map(|n| n.pitch).min().unwrap_or(0);
    let pitch_max = notes.iter().map(|n| n.pitch).max().unwrap_or(0);
    let mean_pitch = notes.iter().map(|n| n.pitch as f64).sum::<f64>() / count;

    let distinct_pitches = notes.iter().map(|n| n.pitch).collect::<BTreeSet<_>>().len();
    let distinct_pitch_classes = notes
        .iter()
        .map(|n| n.pitch_class())
        .collect::<BTreeSet<_>>()
        .len();

    let mean_duration_beats = notes.iter().map(|n| n.effective_duration()).sum::<f64>() / count;

    let mean_velocity = notes.iter().map(|n| n.velocity as f64).sum::<f64>() / count;
    let velocity_std_dev = (notes
        .iter()
        .map(|n| (n.velocity as f64 - mean_velocity).powi(2))
        .sum::<f64>()
        / count)
        .sqrt();

    let (polyphony_ratio, max_simultaneous) = compute_polyphony(notes);
    let (mean_ioi_beats, ioi_cv) = compute_ioi_stats(notes);

    let percussion_notes = notes
        .iter()
        .filter(|n| n.is_percussion(config.percussion_channel))
        .count();

    TrackFeatures {
        note_count: notes.len(),
        note_density: note_density(notes),
        polyphony_ratio,
        max_simultaneous,
        pitch_min,
        pitch_max,
        pitch_range: pitch_max - pitch_min,
        mean_pitch,
        distinct_pitches,
        distinct_pitch_classes,
        mean_duration_beats,
        mean_velocity,
        velocity_std_dev,
        mean_ioi_beats,
        ioi_cv,
        percussion_channel_fraction: percussion_notes as f64 / count,
        span_beats: span_beats(notes),
    }
}

pub fn run(state: &mut SongAnalysis, config: &Config) -> MineResult<()> {
    info!(song = %state.song.id, "Pass 2: Track Feature Extraction");

    for track in &mut state.song.tracks {
        let features = extract_features(track, &config.features);
        debug!(
            track = track.id,
            notes = features.note_count,
            density = features.note_density,
            polyphony = features.polyphony_ratio,
            "track features"
        );
        track.features = Some(features);
    }

    Ok(())
}
