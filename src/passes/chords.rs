//! Pass 5: Chord Detection & Progression Labeling

use crate::analysis::{
    Chord, ChordEvent, ChordProgression, ChordQuality, KeySignature, ProgressionMatch,
};
use crate::config::{ChordConfig, ChordWindow, Config};
use crate::error::Result as MineResult;
use crate::passes::keys::{fallback_key, is_percussive};
use crate::song::{bar_spans, NoteEvent, Song};
use crate::state::SongAnalysis;
use ndarray::{Array2, ArrayView1};
use tracing::{debug, info};

const EPSILON: f64 = 1e-9;

/// Named progressions as (semitones above the tonic, minor family) steps
pub const PROGRESSION_CATALOG: [(&str, &[(u8, bool)]); 8] = [
    ("I-V-vi-IV", &[(0, false), (7, false), (9, true), (5, false)]),
    ("vi-IV-I-V", &[(9, true), (5, false), (0, false), (7, false)]),
    ("I-vi-IV-V", &[(0, false), (9, true), (5, false), (7, false)]),
    ("ii-V-I", &[(2, true), (7, false), (0, false)]),
    ("I-IV-V", &[(0, false), (5, false), (7, false)]),
    ("i-VI-III-VII", &[(0, true), (8, false), (3, false), (10, false)]),
    ("i-iv-v", &[(0, true), (5, true), (7, true)]),
    ("i-VII-VI-V", &[(0, true), (10, false), (8, false), (7, false)]),
];

/// Pitch-class weights per window plus the lowest sounding pitch
pub struct WindowChroma {
    /// windows x 12, overlap duration times velocity / 127
    pub weights: Array2<f64>,
    pub bass: Vec<Option<u8>>,
    /// (start, end) beats of each window
    pub spans: Vec<(f64, f64)>,
}

fn notes_end(notes: &[&NoteEvent]) -> f64 {
    notes
        .iter()
        .map(|n| n.effective_end())
        .fold(0.0_f64, f64::max)
}

/// Back-to-back windows of equal length from beat 0 up to `end`
pub fn uniform_windows(window_beats: f64, end: f64) -> Vec<(f64, f64)> {
    if end <= 0.0 || window_beats <= 0.0 {
        return Vec::new();
    }
    let count = (end / window_beats - EPSILON).ceil().max(1.0) as usize;
    (0..count)
        .map(|w| (w as f64 * window_beats, (w + 1) as f64 * window_beats))
        .collect()
}

/// Chord windows up to `end`: single beats, or bars following the meter map
pub fn chord_windows(song: &Song, end: f64, config: &ChordConfig) -> Vec<(f64, f64)> {
    match config.window {
        ChordWindow::Beat => uniform_windows(1.0, end),
        ChordWindow::Bar => bar_spans(&song.meter_segments(), end),
    }
}

/// Accumulate notes into ordered, non-overlapping windows
pub fn window_chroma<'a>(
    notes: impl IntoIterator<Item = &'a NoteEvent>,
    spans: &[(f64, f64)],
) -> WindowChroma {
    let mut weights = Array2::<f64>::zeros((spans.len(), 12));
    let mut lowest: Vec<Option<u8>> = vec![None; spans.len()];

    for note in notes {
        let start = note.effective_start();
        let stop = note.effective_end();
        let velocity_factor = note.velocity as f64 / 127.0;
        let first = spans.partition_point(|&(_, w_end)| w_end <= start + EPSILON);

        for (w, &(w_start, w_end)) in spans.iter().enumerate().skip(first) {
            if w_start >= stop {
                break;
            }
            let overlap = stop.min(w_end) - start.max(w_start);
            if overlap <= EPSILON {
                continue;
            }
            weights[[w, note.pitch_class() as usize]] += overlap * velocity_factor;
            lowest[w] = Some(lowest[w].map_or(note.pitch, |p| p.min(note.pitch)));
        }
    }

    WindowChroma {
        weights,
        bass: lowest.into_iter().map(|p| p.map(|p| p % 12)).collect(),
        spans: spans.to_vec(),
    }
}

/// Template score: (in - penalty * out) / total - missing penalty * missing fraction
pub fn score_template(weights: &ArrayView1<f64>, chord: &Chord, config: &ChordConfig) -> f64 {
    let total: f64 = weights.sum();
    if total <= 0.0 {
        return 0.0;
    }
    let tones = chord.pitch_classes();
    let in_weight: f64 = tones.iter().map(|&pc| weights[pc as usize]).sum();
    let out_weight = total - in_weight;
    let missing = tones
        .iter()
        .filter(|&&pc| weights[pc as usize] <= EPSILON)
        .count() as f64
        / tones.len() as f64;

    (in_weight - config.non_chord_penalty * out_weight) / total
        - config.missing_tone_penalty * missing
}

/// Best chord for one window's weights, or `None` below `min_pitch_classes`
pub fn detect_window_chord(
    weights: &ArrayView1<f64>,
    bass: Option<u8>,
    config: &ChordConfig,
) -> Option<(Chord, f64)> {
    let distinct = weights.iter().filter(|&&w| w > EPSILON).count();
    if distinct < config.min_pitch_classes {
        return None;
    }

    let mut best: Option<(Chord, f64)> = None;
    // Template order outer, root inner: strict improvement keeps the earlier candidate
    for quality in ChordQuality::ALL {
        for root in 0..12u8 {
            let chord = Chord::new(root, quality);
            let score = score_template(weights, &chord, config);
            best = match best {
                None => Some((chord, score)),
                Some((current, current_score)) => {
                    if score > current_score + EPSILON {
                        Some((chord, score))
                    } else if (score - current_score).abs() <= EPSILON
                        && bass == Some(root)
                        && bass != Some(current.root)
                    {
                        Some((chord, score))
                    } else {
                        Some((current, current_score))
                    }
                }
            };
        }
    }
    best
}

/// Raw chord events over equal windows starting at beat 0
pub fn detect_chords<'a>(
    notes: impl IntoIterator<Item = &'a NoteEvent>,
    window_beats: f64,
    config: &ChordConfig,
) -> Vec<ChordEvent> {
    let notes: Vec<&NoteEvent> = notes.into_iter().collect();
    let spans = uniform_windows(window_beats, notes_end(&notes));
    detect_chords_in(notes, &spans, config)
}

/// Raw chord events, one per window
pub fn detect_chords_in<'a>(
    notes: impl IntoIterator<Item = &'a NoteEvent>,
    spans: &[(f64, f64)],
    config: &ChordConfig,
) -> Vec<ChordEvent> {
    let chroma = window_chroma(notes, spans);
    chroma
        .spans
        .iter()
        .enumerate()
        .map(|(w, &(start, end))| {
            let duration = end - start;
            let row = chroma.weights.row(w);
            match detect_window_chord(&row, chroma.bass[w], config) {
                Some((chord, score)) => ChordEvent {
                    chord: Some(chord),
                    start_beat: start,
                    duration_beats: duration,
                    confidence: score.clamp(0.0, 1.0),
                    bass_pitch_class: chroma.bass[w],
                },
                None => {
                    let mut event = ChordEvent::no_chord(start, duration);
                    event.bass_pitch_class = chroma.bass[w];
                    event
                }
            }
        })
        .collect()
}

/// Replace single-chord outliers whose sounding neighbors agree.
///
/// No-chord windows stay as they are, silent or not.
pub fn smooth_chords(events: &[ChordEvent]) -> Vec<ChordEvent> {
    let mut smoothed = events.to_vec();
    for i in 1..events.len().saturating_sub(1) {
        if smoothed[i].chord.is_none() {
            continue;
        }
        let left = smoothed[i - 1].chord;
        let right = events[i + 1].chord;
        if left.is_some() && left == right && smoothed[i].chord != left {
            smoothed[i].chord = left;
            smoothed[i].confidence = smoothed[i - 1].confidence.min(events[i + 1].confidence);
        }
    }
    smoothed
}

/// Merge consecutive events carrying the same chord
pub fn merge_chords(events: &[ChordEvent]) -> Vec<ChordEvent> {
    let mut merged: Vec<ChordEvent> = Vec::with_capacity(events.len());
    for event in events {
        match merged.last_mut() {
            Some(last) if last.chord == event.chord => {
                let total = last.duration_beats + event.duration_beats;
                if total > 0.0 {
                    last.confidence = (last.confidence * last.duration_beats
                        + event.confidence * event.duration_beats)
                        / total;
                }
                last.duration_beats = total;
            }
            _ => merged.push(event.clone()),
        }
    }
    merged
}

/// Scale-degree steps of the sounding chords
pub fn degree_sequence(events: &[ChordEvent], key: &KeySignature) -> Vec<(u8, bool)> {
    events
        .iter()
        .filter_map(|e| e.chord)
        .map(|c| ((c.root + 12 - key.root) % 12, c.quality.is_minor_family()))
        .collect()
}

/// All catalog matches plus the winning label
pub fn label_progression(
    events: &[ChordEvent],
    key: &KeySignature,
) -> (Option<String>, Vec<ProgressionMatch>) {
    let degrees = degree_sequence(events, key);
    let mut matches = Vec::new();

    for start in 0..degrees.len() {
        for (name, steps) in PROGRESSION_CATALOG.iter() {
            let end = start + steps.len();
            if end <= degrees.len() && degrees[start..end] == **steps {
                matches.push(ProgressionMatch {
                    name: name.to_string(),
                    start_index: start,
                    length: steps.len(),
                });
            }
        }
    }

    // Longest, then earliest, then catalog order (already the push order)
    let label = matches
        .iter()
        .enumerate()
        .min_by(|(ia, a), (ib, b)| {
            b.length
                .cmp(&a.length)
                .then(a.start_index.cmp(&b.start_index))
                .then(ia.cmp(ib))
        })
        .map(|(_, m)| m.name.clone());

    (label, matches)
}

/// Detect, smooth, merge and label the chords of a song
pub fn detect_progression(song: &Song, key: &KeySignature, config: &Config) -> ChordProgression {
    let percussion_channel = config.features.percussion_channel;
    let notes: Vec<&NoteEvent> = song
        .tracks
        .iter()
        .filter(|t| !is_percussive(t, percussion_channel))
        .flat_map(|t| t.notes.iter())
        .collect();

    let spans = chord_windows(song, notes_end(&notes), &config.chords);
    let raw = detect_chords_in(notes, &spans, &config.chords);
    let smoothed = if config.chords.smoothing {
        smooth_chords(&raw)
    } else {
        raw
    };
    let events = merge_chords(&smoothed);
    let (label, matches) = label_progression(&events, key);

    ChordProgression {
        events,
        key: *key,
        label,
        matches,
    }
}

pub fn run(state: &mut SongAnalysis, config: &Config) -> MineResult<()> {
    info!(song = %state.song.id, "Pass 5: Chord Detection & Progression Labeling");

    let key = state.key.clone().unwrap_or_else(fallback_key).key;
    let progression = detect_progression(&state.song, &key, config);

    for event in &progression.events {
        debug!(
            start = event.start_beat,
            duration = event.duration_beats,
            chord = %event.chord.map(|c| c.name()).unwrap_or_else(|| "N.C.".to_string()),
            "chord"
        );
    }

    let sounding = progression.events.iter().filter(|e| !e.is_no_chord()).count();
    info!(
        "  {} chord events ({} sounding), label: {}",
        progression.events.len(),
        sounding,
        progression.label.as_deref().unwrap_or("none")
    );

    state.progression = Some(progression);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Mode;
    use ndarray::Array1;

    fn weights(pcs: &[(usize, f64)]) -> Array1<f64> {
        let mut w = Array1::<f64>::zeros(12);
        for &(pc, v) in pcs {
            w[pc] = v;
        }
        w
    }

    fn event(chord: Option<Chord>, start: f64) -> ChordEvent {
        ChordEvent {
            chord,
            start_beat: start,
            duration_beats: 4.0,
            confidence: 1.0,
            bass_pitch_class: chord.map(|c| c.root),
        }
    }

    #[test]
    fn test_exact_triad_scores_one() {
        let w = weights(&[(0, 1.0), (4, 1.0), (7, 1.0)]);
        let config = ChordConfig::default();
        let score = score_template(&w.view(), &Chord::new(0, ChordQuality::Major), &config);
        assert!((score - 1.0).abs() < 1e-9);

        let (chord, _) = detect_window_chord(&w.view(), Some(0), &config).unwrap();
        assert_eq!(chord, Chord::new(0, ChordQuality::Major));
    }

    #[test]
    fn test_bass_breaks_ties() {
        // C and G only: C major and C minor tie, as do several fifths-based chords
        let w = weights(&[(0, 1.0), (7, 1.0)]);
        let config = ChordConfig::default();
        let (chord, _) = detect_window_chord(&w.view(), Some(0), &config).unwrap();
        assert_eq!(chord.root, 0);
        // Template order breaks the remaining tie
        assert_eq!(chord.quality, ChordQuality::Major);
    }

    #[test]
    fn test_single_pitch_class_is_no_chord() {
        let w = weights(&[(4, 2.0)]);
        assert!(detect_window_chord(&w.view(), Some(4), &ChordConfig::default()).is_none());
    }

    #[test]
    fn test_smoothing_replaces_isolated_window() {
        let c = Some(Chord::new(0, ChordQuality::Major));
        let d = Some(Chord::new(2, ChordQuality::Minor));
        let events = vec![event(c, 0.0), event(d, 4.0), event(c, 8.0)];
        let smoothed = smooth_chords(&events);
        assert!(smoothed.iter().all(|e| e.chord == c));

        let merged = merge_chords(&smoothed);
        assert_eq!(merged.len(), 1);
        assert!((merged[0].duration_beats - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_smoothing_keeps_no_chord_window() {
        let c = Some(Chord::new(0, ChordQuality::Major));
        let events = vec![event(c, 0.0), event(None, 4.0), event(c, 8.0)];
        let smoothed = smooth_chords(&events);
        assert!(smoothed[1].is_no_chord());
        assert_eq!(merge_chords(&smoothed).len(), 3);
    }

    #[test]
    fn test_uniform_windows() {
        assert!(uniform_windows(4.0, 0.0).is_empty());
        assert_eq!(uniform_windows(4.0, 4.0), vec![(0.0, 4.0)]);
        assert_eq!(uniform_windows(4.0, 4.5).len(), 2);
    }

    #[test]
    fn test_label_prefers_longest_match() {
        let key = KeySignature::new(0, Mode::Major);
        let events: Vec<ChordEvent> = [
            Chord::new(0, ChordQuality::Major),
            Chord::new(7, ChordQuality::Major),
            Chord::new(9, ChordQuality::Minor),
            Chord::new(5, ChordQuality::Major),
        ]
        .iter()
        .enumerate()
        .map(|(i, c)| event(Some(*c), i as f64 * 4.0))
        .collect();

        let (label, matches) = label_progression(&events, &key);
        assert_eq!(label.as_deref(), Some("I-V-vi-IV"));
        assert_eq!(matches[0].start_index, 0);
    }
}
