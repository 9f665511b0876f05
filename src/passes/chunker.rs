//! Pass 6: Bar Chunking

use crate::analysis::Role;
use crate::config::{ChunkConfig, Config, TimingConfig};
use crate::error::{MineError, Result as MineResult};
use crate::pattern::{
    ArpPattern, ArpRate, Chunk, ChunkNote, DrumHit, DrumPattern, MelodicNote, MelodicPattern,
    PatternRepresentation,
};
use crate::song::{meter_segments, segment_at, NoteEvent, TimeSignature, Track};
use crate::state::SongAnalysis;
use std::collections::BTreeMap;
use tracing::{debug, info};

const EPSILON: f64 = 1e-9;

fn to_chunk_notes(
    notes: &[&NoteEvent],
    window_start: f64,
    window_beats: f64,
    steps: u32,
    step_beats: f64,
    track_id: u32,
) -> MineResult<Vec<ChunkNote>> {
    let mut chunk_notes = Vec::with_capacity(notes.len());
    for note in notes {
        let offset = (note.effective_start() - window_start).max(0.0);
        let step = (offset / step_beats).round() as u32;
        if step >= steps {
            return Err(MineError::ContractViolation(format!(
                "note at beat {:.4} on track {} maps to step {} of a {}-step chunk",
                note.effective_start(),
                track_id,
                step,
                steps
            )));
        }
        chunk_notes.push(ChunkNote {
            step,
            offset_beats: offset,
            duration_beats: note.effective_duration().min(window_beats - offset),
            pitch: note.pitch,
            velocity: note.velocity,
        });
    }
    chunk_notes.sort_by(|a, b| a.step.cmp(&b.step).then(a.pitch.cmp(&b.pitch)));
    Ok(chunk_notes)
}

fn drum_pattern(notes: &[ChunkNote], steps: u32) -> DrumPattern {
    DrumPattern {
        steps,
        hits: notes
            .iter()
            .map(|n| DrumHit {
                step: n.step,
                pitch: n.pitch,
                velocity: n.velocity,
            })
            .collect(),
    }
}

fn melodic_pattern(notes: &[ChunkNote], steps: u32, step_beats: f64) -> MelodicPattern {
    let anchor = notes.first().map(|n| n.pitch as i16).unwrap_or(0);
    MelodicPattern {
        steps,
        notes: notes
            .iter()
            .map(|n| MelodicNote {
                step: n.step,
                interval: n.pitch as i16 - anchor,
                duration_steps: ((n.duration_beats / step_beats).round() as u32).max(1),
            })
            .collect(),
    }
}

/// Arpeggio reading of a chunk: one voice, enough notes, two or more
/// pitches and evenly spaced onsets at a known rate
pub fn detect_arp(notes: &[ChunkNote], config: &ChunkConfig) -> Option<ArpPattern> {
    if notes.len() < config.arp_min_notes {
        return None;
    }
    // One onset per step
    if notes.windows(2).any(|w| w[0].step == w[1].step) {
        return None;
    }
    let first = notes[0].pitch;
    if notes.iter().all(|n| n.pitch == first) {
        return None;
    }

    let iois: Vec<f64> = notes
        .windows(2)
        .map(|w| w[1].offset_beats - w[0].offset_beats)
        .collect();
    let tolerance = config.arp_timing_tolerance_beats;
    let rate = ArpRate::ALL
        .into_iter()
        .find(|rate| iois.iter().all(|ioi| (ioi - rate.beats()).abs() <= tolerance))?;

    let gate_ratio = notes
        .iter()
        .map(|n| n.duration_beats / rate.beats())
        .sum::<f64>()
        / notes.len() as f64;

    Some(ArpPattern {
        rate,
        intervals: notes
            .iter()
            .map(|n| (n.pitch as i16 - first as i16).rem_euclid(12) as u8)
            .collect(),
        octave_jumps: notes
            .iter()
            .map(|n| (n.pitch as i16 - first as i16).div_euclid(12) as i8)
            .collect(),
        gate_ratio: gate_ratio.min(1.0),
    })
}

pub fn represent(
    role: Role,
    notes: &[ChunkNote],
    steps: u32,
    step_beats: f64,
    config: &ChunkConfig,
) -> PatternRepresentation {
    match role {
        Role::Drums => PatternRepresentation::Drum(drum_pattern(notes, steps)),
        Role::Arp => match detect_arp(notes, config) {
            Some(arp) => PatternRepresentation::Arp(arp),
            None => PatternRepresentation::Melodic(melodic_pattern(notes, steps, step_beats)),
        },
        _ => PatternRepresentation::Melodic(melodic_pattern(notes, steps, step_beats)),
    }
}

/// Slice a track into bar-aligned chunks, skipping empty windows.
///
/// Windows restart at every meter change and never cross one; each chunk
/// takes its step count and meter from the segment it lies in.
pub fn chunk_track(
    track: &Track,
    role: Role,
    time_sig_map: &[TimeSignature],
    timing: &TimingConfig,
    chunking: &ChunkConfig,
) -> MineResult<Vec<Chunk>> {
    let bars = chunking.bars_per_chunk;
    let step_beats = timing.step_beats();
    let segments = meter_segments(time_sig_map);

    // Keyed by (segment, window within segment) so chunks come out in bar order
    let mut windows: BTreeMap<(usize, u32), Vec<&NoteEvent>> = BTreeMap::new();
    for note in &track.notes {
        let beat = note.effective_start();
        if let Some((index, segment)) = segment_at(&segments, beat) {
            windows
                .entry((index, segment.bar_offset(beat) / bars.max(1)))
                .or_default()
                .push(note);
        }
    }

    let mut chunks = Vec::with_capacity(windows.len());
    for ((segment_index, window), notes) in windows {
        let segment = &segments[segment_index];
        let meter = segment.meter;
        let steps = window_steps(&meter, bars, timing)?;
        let (window_start, window_end) = segment.span(window * bars, bars);

        let chunk_notes = to_chunk_notes(
            &notes,
            window_start,
            window_end - window_start,
            steps,
            step_beats,
            track.id,
        )?;
        if chunk_notes.is_empty() {
            continue;
        }
        let representation = represent(role, &chunk_notes, steps, step_beats, chunking);

        chunks.push(Chunk {
            track_id: track.id,
            role,
            bar_index: segment.first_bar + window * bars,
            bars,
            meter,
            grid_resolution: timing.grid_resolution,
            steps,
            notes: chunk_notes,
            representation,
        });
    }

    Ok(chunks)
}

/// Grid steps in a window of `bars` bars of `meter`
fn window_steps(meter: &TimeSignature, bars: u32, timing: &TimingConfig) -> MineResult<u32> {
    let window_beats = bars as f64 * meter.beats_per_bar();
    if window_beats <= 0.0 {
        return Err(MineError::ContractViolation(format!(
            "chunk window of {} bars in {}/{} has no length",
            bars, meter.numerator, meter.denominator
        )));
    }
    let exact_steps = window_beats / timing.step_beats();
    if (exact_steps - exact_steps.round()).abs() > EPSILON {
        return Err(MineError::InvalidConfigParameter(format!(
            "grid resolution {} cannot split a {}/{} bar into whole steps",
            timing.grid_resolution, meter.numerator, meter.denominator
        )));
    }
    Ok(exact_steps.round() as u32)
}

pub fn run(state: &mut SongAnalysis, config: &Config) -> MineResult<()> {
    info!(song = %state.song.id, "Pass 6: Bar Chunking");

    let time_sig_map = &state.song.time_sig_map;
    let mut chunks = Vec::new();

    for track in &state.song.tracks {
        let role = track.roles.map(|r| r.primary_role()).unwrap_or(Role::Other);
        let track_chunks =
            chunk_track(track, role, time_sig_map, &config.timing, &config.chunking)?;
        debug!(
            track = track.id,
            role = role.name(),
            chunks = track_chunks.len(),
            "track chunks"
        );
        chunks.extend(track_chunks);
    }

    info!(
        "  {} chunks of {} bar(s) across {} meter segment(s)",
        chunks.len(),
        config.chunking.bars_per_chunk,
        state.song.meter_segments().len()
    );
    state.chunks = chunks;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_note(step: u32, pitch: u8) -> ChunkNote {
        ChunkNote {
            step,
            offset_beats: step as f64 * 0.25,
            duration_beats: 0.2,
            pitch,
            velocity: 100,
        }
    }

    #[test]
    fn test_window_steps_follow_meter() {
        let timing = TimingConfig::default();
        assert_eq!(window_steps(&TimeSignature::common_time(), 1, &timing).unwrap(), 16);
        assert_eq!(window_steps(&TimeSignature::new(3, 4).unwrap(), 2, &timing).unwrap(), 24);
        assert_eq!(window_steps(&TimeSignature::new(7, 8).unwrap(), 1, &timing).unwrap(), 14);
    }

    #[test]
    fn test_detect_sixteenth_arp() {
        let notes: Vec<ChunkNote> = [60, 64, 67, 72]
            .iter()
            .enumerate()
            .map(|(i, &p)| chunk_note(i as u32, p))
            .collect();
        let arp = detect_arp(&notes, &ChunkConfig::default()).unwrap();
        assert_eq!(arp.rate, ArpRate::Sixteenth);
        assert_eq!(arp.intervals, vec![0, 4, 7, 0]);
        assert_eq!(arp.octave_jumps, vec![0, 0, 0, 1]);
        assert!((arp.gate_ratio - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_uneven_onsets_are_not_arp() {
        let notes = vec![
            chunk_note(0, 60),
            chunk_note(1, 64),
            chunk_note(3, 67),
            chunk_note(4, 72),
        ];
        assert!(detect_arp(&notes, &ChunkConfig::default()).is_none());
    }

    #[test]
    fn test_repeated_pitch_is_not_arp() {
        let notes: Vec<ChunkNote> = (0..4).map(|i| chunk_note(i, 60)).collect();
        assert!(detect_arp(&notes, &ChunkConfig::default()).is_none());
    }
}
