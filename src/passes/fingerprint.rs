//! Pass 7: Chunk Fingerprinting

use crate::analysis::Role;
use crate::config::{Config, FingerprintConfig};
use crate::error::Result as MineResult;
use crate::pattern::{
    combo_fingerprint, Chunk, FingerprintedChunk, PatternRepresentation, PitchFingerprint,
    RhythmFingerprint,
};
use crate::state::SongAnalysis;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Per-step onset weights relative to the loudest hit of the chunk
pub fn rhythm_fingerprint(chunk: &Chunk) -> RhythmFingerprint {
    let steps = chunk.steps as usize;
    let mut step_velocity = vec![0u8; steps];
    for note in &chunk.notes {
        if let Some(slot) = step_velocity.get_mut(note.step as usize) {
            *slot = (*slot).max(note.velocity);
        }
    }

    let peak = step_velocity.iter().copied().max().unwrap_or(0).max(1) as f64;
    let onsets: Vec<f64> = step_velocity.iter().map(|&v| v as f64 / peak).collect();
    let accents: Vec<f64> = step_velocity.iter().map(|&v| v as f64 / 127.0).collect();

    let hit_steps = chunk
        .notes
        .iter()
        .map(|n| n.step)
        .collect::<BTreeSet<_>>()
        .len();
    let density = if steps > 0 {
        hit_steps as f64 / steps as f64
    } else {
        0.0
    };

    RhythmFingerprint {
        onsets,
        accents,
        density,
    }
}

/// Intervals and contour relative to the first note; `None` for drums
pub fn pitch_fingerprint(chunk: &Chunk) -> Option<PitchFingerprint> {
    let anchor = chunk.anchor_pitch()? as i16;

    let intervals: Vec<i16> = chunk.notes.iter().map(|n| n.pitch as i16 - anchor).collect();
    let contour: Vec<i8> = chunk
        .notes
        .windows(2)
        .map(|w| (w[1].pitch as i16 - w[0].pitch as i16).signum() as i8)
        .collect();
    let pitch_classes = chunk.notes.iter().map(|n| n.pitch % 12).collect();

    Some(PitchFingerprint {
        intervals,
        contour,
        pitch_classes,
    })
}

/// Descriptive tags for browsing
pub fn chunk_tags(
    chunk: &Chunk,
    rhythm: &RhythmFingerprint,
    pitch: Option<&PitchFingerprint>,
    config: &FingerprintConfig,
) -> Vec<String> {
    let mut tags = vec![chunk.role.name().to_string()];
    let per_beat = chunk.steps_per_beat().max(1) as usize;
    let hit = |step: usize| rhythm.onsets.get(step).map_or(false, |&w| w > config.onset_threshold);

    if chunk.role == Role::Drums {
        let beats = rhythm.steps() / per_beat;
        if beats > 0 && (0..beats).all(|b| hit(b * per_beat)) {
            tags.push("four_on_the_floor".to_string());
        }
    }

    let (on_beat, off_beat) = (0..rhythm.steps())
        .filter(|&s| hit(s))
        .fold((0usize, 0usize), |(on, off), s| {
            if s % per_beat == 0 {
                (on + 1, off)
            } else {
                (on, off + 1)
            }
        });
    if off_beat > on_beat {
        tags.push("syncopated".to_string());
    }

    if rhythm.density <= config.sparse_density_max {
        tags.push("sparse".to_string());
    } else if rhythm.density >= config.dense_density_min {
        tags.push("dense".to_string());
    }

    if matches!(chunk.representation, PatternRepresentation::Arp(_)) {
        tags.push("arpeggio".to_string());
    }

    if pitch.map_or(false, |p| p.span() >= 12) {
        tags.push("wide_range".to_string());
    }

    tags
}

pub fn fingerprint_chunk(chunk: Chunk, config: &FingerprintConfig) -> FingerprintedChunk {
    let rhythm = rhythm_fingerprint(&chunk);
    let pitch = pitch_fingerprint(&chunk);
    let pitch_hash = pitch.as_ref().map(|p| p.to_hash()).unwrap_or_default();
    let combo = combo_fingerprint(&rhythm.hash_with_threshold(config.onset_threshold), &pitch_hash);
    let tags = chunk_tags(&chunk, &rhythm, pitch.as_ref(), config);

    FingerprintedChunk {
        chunk,
        rhythm,
        pitch,
        combo_fingerprint: combo,
        tags,
    }
}

pub fn run(state: &mut SongAnalysis, config: &Config) -> MineResult<()> {
    info!(song = %state.song.id, "Pass 7: Chunk Fingerprinting");

    let fingerprints: Vec<FingerprintedChunk> = state
        .chunks
        .iter()
        .cloned()
        .map(|chunk| fingerprint_chunk(chunk, &config.fingerprint))
        .collect();

    for fp in &fingerprints {
        debug!(
            track = fp.chunk.track_id,
            bar = fp.chunk.bar_index,
            combo = %fp.combo_fingerprint,
            "chunk fingerprint"
        );
    }

    let distinct: BTreeSet<&str> = fingerprints
        .iter()
        .map(|f| f.combo_fingerprint.as_str())
        .collect();
    info!(
        "  {} fingerprints, {} distinct within song",
        fingerprints.len(),
        distinct.len()
    );

    state.fingerprints = fingerprints;
    Ok(())
}
