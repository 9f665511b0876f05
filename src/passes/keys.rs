//! Pass 4: Key Detection
//!
//! Krumhansl-Kessler profile correlation over duration- and
//! velocity-weighted pitch-class histograms, per track and per song.

use crate::analysis::{KeyDetection, KeySignature, Mode, Role};
use crate::config::Config;
use crate::error::Result as MineResult;
use crate::song::{NoteEvent, Track};
use crate::state::SongAnalysis;
use tracing::{debug, info, warn};

/// Krumhansl-Kessler major profile, tonic first
pub const MAJOR_PROFILE: [f64; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];

/// Krumhansl-Kessler minor profile, tonic first
pub const MINOR_PROFILE: [f64; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

/// Pitch-class weights: duration times velocity / 127
pub fn pitch_class_histogram(notes: &[NoteEvent]) -> [f64; 12] {
    let mut histogram = [0.0; 12];
    for note in notes {
        histogram[note.pitch_class() as usize] +=
            note.effective_duration() * (note.velocity as f64 / 127.0);
    }
    histogram
}

/// Pearson correlation coefficient; 0 when either side has no variance
pub fn corrcoef(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let n = a.len() as f64;
    let sum_a = a.iter().sum::<f64>();
    let sum_b = b.iter().sum::<f64>();
    let sum_ab = a.iter().zip(b).map(|(&x, &y)| x * y).sum::<f64>();
    let sum_a2 = a.iter().map(|&x| x * x).sum::<f64>();
    let sum_b2 = b.iter().map(|&x| x * x).sum::<f64>();

    let numerator = n * sum_ab - sum_a * sum_b;
    let denominator = ((n * sum_a2 - sum_a * sum_a) * (n * sum_b2 - sum_b * sum_b)).sqrt();

    if denominator <= 1e-12 || !denominator.is_finite() {
        0.0
    } else {
        numerator / denominator
    }
}

fn rotated_profile(key: &KeySignature) -> [f64; 12] {
    let base = match key.mode {
        Mode::Major => &MAJOR_PROFILE,
        Mode::Minor => &MINOR_PROFILE,
    };
    let mut profile = [0.0; 12];
    for (pc, slot) in profile.iter_mut().enumerate() {
        *slot = base[(pc + 12 - key.root as usize) % 12];
    }
    profile
}

/// Candidate keys in tie-break order: all majors, then all minors, by root
fn candidate_keys() -> impl Iterator<Item = KeySignature> {
    [Mode::Major, Mode::Minor]
        .into_iter()
        .flat_map(|mode| (0..12u8).map(move |root| KeySignature::new(root, mode)))
}

/// C major with zero confidence
pub fn fallback_key() -> KeyDetection {
    KeyDetection {
        key: KeySignature::new(0, Mode::Major),
        correlation: 0.0,
        margin: 0.0,
        runner_up: None,
        confidence: 0.0,
    }
}

/// Best-correlating key for a pitch-class histogram
pub fn detect_key_from_histogram(histogram: &[f64; 12]) -> KeyDetection {
    let mass: f64 = histogram.iter().sum();
    if mass <= 0.0 {
        return fallback_key();
    }

    let mut best: Option<(KeySignature, f64)> = None;
    let mut second: Option<(KeySignature, f64)> = None;

    for key in candidate_keys() {
        let r = corrcoef(histogram, &rotated_profile(&key));
        match best {
            Some((_, best_r)) if r <= best_r => {
                if second.map_or(true, |(_, second_r)| r > second_r) {
                    second = Some((key, r));
                }
            }
            _ => {
                second = best;
                best = Some((key, r));
            }
        }
    }

    let Some((key, correlation)) = best else {
        return fallback_key();
    };
    let margin = second.map_or(correlation, |(_, r)| correlation - r);

    KeyDetection {
        key,
        correlation,
        margin,
        runner_up: second.map(|(k, _)| k),
        confidence: correlation.clamp(0.0, 1.0),
    }
}

pub fn detect_track_key(track: &Track) -> KeyDetection {
    detect_key_from_histogram(&pitch_class_histogram(&track.notes))
}

/// Tracks left out of the song-level histogram
pub fn is_percussive(track: &Track, percussion_channel: u8) -> bool {
    if track.roles.map(|r| r.primary_role()) == Some(Role::Drums) {
        return true;
    }
    !track.notes.is_empty() && track.notes.iter().all(|n| n.is_percussion(percussion_channel))
}

/// Sum of per-track histograms, each normalized to unit mass and weighted
/// by the track's total note duration
pub fn song_histogram<'a>(tracks: impl IntoIterator<Item = &'a Track>) -> [f64; 12] {
    let mut histogram = [0.0; 12];
    for track in tracks {
        let track_hist = pitch_class_histogram(&track.notes);
        let mass: f64 = track_hist.iter().sum();
        if mass <= 0.0 {
            continue;
        }
        let weight: f64 = track.notes.iter().map(|n| n.effective_duration()).sum();
        for (slot, value) in histogram.iter_mut().zip(track_hist.iter()) {
            *slot += value / mass * weight;
        }
    }
    histogram
}

pub fn detect_song_key(tracks: &[Track], config: &Config) -> KeyDetection {
    let percussion_channel = config.features.percussion_channel;
    let included = tracks
        .iter()
        .filter(|t| !(config.keys.exclude_drum_tracks && is_percussive(t, percussion_channel)));
    detect_key_from_histogram(&song_histogram(included))
}

pub fn run(state: &mut SongAnalysis, config: &Config) -> MineResult<()> {
    info!(song = %state.song.id, "Pass 4: Key Detection");

    for track in &mut state.song.tracks {
        if track.is_empty() {
            track.key = None;
            continue;
        }
        let detection = detect_track_key(track);
        debug!(
            track = track.id,
            key = %detection.key.name(),
            correlation = detection.correlation,
            "track key"
        );
        track.key = Some(detection);
    }

    let song_key = detect_song_key(&state.song.tracks, config);
    if song_key.confidence == 0.0 {
        warn!("  No tonal evidence, falling back to {}", song_key.key.name());
    } else {
        info!(
            "  Song key: {} (r={:.3}, margin {:.3})",
            song_key.key.name(),
            song_key.correlation,
            song_key.margin
        );
    }
    state.key = Some(song_key);

    Ok(())
}
