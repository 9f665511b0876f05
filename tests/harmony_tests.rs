//! Validation tests for Pass 4: Key Detection and
//! Pass 5: Chord Detection & Progression Labeling

use midimine::analysis::{Chord, ChordQuality, KeySignature, Mode};
use midimine::config::{ChordConfig, ChordWindow, Config};
use midimine::passes::{chords, keys};
use midimine::song::{NoteEvent, Song, TimeSignature, Track};
use midimine::state::SongAnalysis;

fn note(pitch: u8, start: f64, duration: f64) -> NoteEvent {
    NoteEvent::new(pitch, 100, start, duration, 0, 0)
}

/// Sequence of (pitch, beats) played back to back
fn generate_melody(line: &[(u8, f64)]) -> Vec<NoteEvent> {
    let mut t = 0.0;
    line.iter()
        .map(|&(pitch, dur)| {
            let n = note(pitch, t, dur);
            t += dur;
            n
        })
        .collect()
}

/// One whole-note triad per bar
fn generate_block_chords(triads: &[[u8; 3]]) -> Vec<NoteEvent> {
    triads
        .iter()
        .enumerate()
        .flat_map(|(bar, triad)| triad.map(|p| note(p, bar as f64 * 4.0, 4.0)))
        .collect()
}

/// C - Am - F - G, one bar each, with roots doubled in the bass
fn generate_pop_song() -> Song {
    let chords = generate_block_chords(&[[60, 64, 67], [57, 60, 64], [53, 57, 60], [55, 59, 62]]);
    let bass = generate_melody(&[(36, 4.0), (33, 4.0), (29, 4.0), (31, 4.0)]);
    Song::new(
        "pop",
        "test",
        480,
        vec![],
        vec![],
        vec![Track::new(0, chords), Track::new(1, bass)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_major_melody() {
        let track = Track::new(
            0,
            generate_melody(&[
                (60, 2.0),
                (62, 1.0),
                (64, 2.0),
                (65, 1.0),
                (67, 2.0),
                (69, 1.0),
                (71, 1.0),
                (72, 2.0),
            ]),
        );
        let detection = keys::detect_track_key(&track);
        println!(
            "  Detected {} (r={:.3}, margin {:.3})",
            detection.key.name(),
            detection.correlation,
            detection.margin
        );
        assert_eq!(detection.key, KeySignature::new(0, Mode::Major));
        assert!(detection.correlation > 0.9);
        assert_eq!(detection.runner_up, Some(KeySignature::new(9, Mode::Minor)));
    }

    #[test]
    fn test_a_minor_melody() {
        let track = Track::new(
            0,
            generate_melody(&[
                (69, 4.0),
                (71, 1.0),
                (72, 2.0),
                (74, 1.0),
                (76, 3.0),
                (77, 1.0),
                (68, 1.0),
            ]),
        );
        let detection = keys::detect_track_key(&track);
        assert_eq!(detection.key.name(), "A minor");
        assert!(detection.margin > 0.1);
    }

    #[test]
    fn test_empty_song_key_is_c_major() {
        let song = Song::new("empty", "test", 480, vec![], vec![], vec![]);
        let detection = keys::detect_song_key(&song.tracks, &Config::default());
        assert_eq!(detection.key.name(), "C major");
        assert_eq!(detection.confidence, 0.0);
    }

    #[test]
    fn test_song_key_ignores_percussion() {
        let mut song = generate_pop_song();
        // A loud, long F# on the drum channel would drag the key toward G or D
        let hats: Vec<NoteEvent> = (0..64)
            .map(|i| NoteEvent::new(42, 127, i as f64 * 0.25, 0.25, 2, 9))
            .collect();
        song.tracks.push(Track::new(2, hats));

        let detection = keys::detect_song_key(&song.tracks, &Config::default());
        assert_eq!(detection.key, KeySignature::new(0, Mode::Major));
    }

    #[test]
    fn test_block_chords_and_progression_label() {
        let song = generate_pop_song();
        let key = KeySignature::new(0, Mode::Major);
        let progression = chords::detect_progression(&song, &key, &Config::default());

        let names: Vec<String> = progression
            .events
            .iter()
            .filter_map(|e| e.chord.map(|c| c.name()))
            .collect();
        println!("  Chords: {:?}, label {:?}", names, progression.label);

        assert_eq!(names, vec!["C", "Am", "F", "G"]);
        assert_eq!(progression.roman_numerals(), vec!["I", "vi", "IV", "V"]);
        assert_eq!(progression.label.as_deref(), Some("I-vi-IV-V"));
        assert_eq!(progression.events[1].bass_pitch_class, Some(9));
        assert!(progression.events.iter().all(|e| (e.confidence - 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_passing_chord_is_smoothed_away() {
        // C for three bars with a lone D minor in bar two
        let notes = generate_block_chords(&[[60, 64, 67], [62, 65, 69], [60, 64, 67]]);
        let config = ChordConfig::default();
        let raw = chords::detect_chords(notes.iter(), 4.0, &config);
        assert_eq!(raw[1].chord, Some(Chord::new(2, ChordQuality::Minor)));

        let merged = chords::merge_chords(&chords::smooth_chords(&raw));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].chord, Some(Chord::new(0, ChordQuality::Major)));
        assert!((merged[0].duration_beats - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_smoothing_can_be_disabled() {
        let notes = generate_block_chords(&[[60, 64, 67], [62, 65, 69], [60, 64, 67]]);
        let song = Song::new("s", "test", 480, vec![], vec![], vec![Track::new(0, notes)]);
        let mut config = Config::default();
        config.chords.smoothing = false;
        let progression =
            chords::detect_progression(&song, &KeySignature::new(0, Mode::Major), &config);
        assert_eq!(progression.events.len(), 3);
    }

    #[test]
    fn test_silent_bar_between_equal_chords_survives_smoothing() {
        let notes = vec![
            note(60, 0.0, 4.0),
            note(64, 0.0, 4.0),
            note(67, 0.0, 4.0),
            note(60, 8.0, 4.0),
            note(64, 8.0, 4.0),
            note(67, 8.0, 4.0),
        ];
        let song = Song::new("gap", "test", 480, vec![], vec![], vec![Track::new(0, notes)]);
        let progression =
            chords::detect_progression(&song, &KeySignature::new(0, Mode::Major), &Config::default());

        assert_eq!(progression.events.len(), 3);
        assert!(progression.events[1].is_no_chord());
        assert_eq!(progression.events[1].bass_pitch_class, None);
        assert!((progression.events[1].duration_beats - 4.0).abs() < 1e-9);
        assert_eq!(progression.events[2].chord, Some(Chord::new(0, ChordQuality::Major)));
    }

    #[test]
    fn test_bar_windows_follow_meter_change() {
        // C in a 4/4 bar, then Am and F in 3/4 bars
        let mut notes = Vec::new();
        for (start, dur, triad) in [(0.0, 4.0, [60, 64, 67]), (4.0, 3.0, [57, 60, 64]), (7.0, 3.0, [53, 57, 60])] {
            notes.extend(triad.iter().map(|&p| note(p, start, dur)));
        }
        let song = Song::new(
            "meter",
            "test",
            480,
            vec![],
            vec![
                TimeSignature::common_time(),
                TimeSignature::at(1920, 4.0, 1, 3, 4).unwrap(),
            ],
            vec![Track::new(0, notes)],
        );
        let progression =
            chords::detect_progression(&song, &KeySignature::new(0, Mode::Major), &Config::default());

        let names: Vec<String> = progression
            .events
            .iter()
            .filter_map(|e| e.chord.map(|c| c.name()))
            .collect();
        assert_eq!(names, vec!["C", "Am", "F"]);
        let starts: Vec<f64> = progression.events.iter().map(|e| e.start_beat).collect();
        assert_eq!(starts, vec![0.0, 4.0, 7.0]);
        assert!(progression.events.iter().all(|e| (e.confidence - 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_monophonic_and_silent_windows_are_no_chord() {
        // Bar one: single note; bar two: silence; bar three: a triad
        let notes = vec![
            note(64, 0.0, 4.0),
            note(57, 8.0, 4.0),
            note(60, 8.0, 4.0),
            note(64, 8.0, 4.0),
        ];
        let raw = chords::detect_chords(notes.iter(), 4.0, &ChordConfig::default());

        assert_eq!(raw.len(), 3);
        assert!(raw[0].is_no_chord());
        assert!(raw[1].is_no_chord());
        assert_eq!(raw[1].bass_pitch_class, None);
        assert_eq!(raw[2].chord, Some(Chord::new(9, ChordQuality::Minor)));
    }

    #[test]
    fn test_beat_windows() {
        let song = generate_pop_song();
        let mut config = ChordConfig::default();
        assert_eq!(chords::chord_windows(&song, 16.0, &config).len(), 4);
        config.window = ChordWindow::Beat;
        let windows = chords::chord_windows(&song, 16.0, &config);
        assert_eq!(windows.len(), 16);
        assert_eq!(windows[5], (5.0, 6.0));

        let notes: Vec<&NoteEvent> = song.tracks.iter().flat_map(|t| t.notes.iter()).collect();
        let raw = chords::detect_chords(notes, 1.0, &config);
        assert_eq!(raw.len(), 16);
        assert_eq!(chords::merge_chords(&raw).len(), 4);
    }

    #[test]
    fn test_harmony_passes_on_song_state() {
        let config = Config::default();
        let mut state = SongAnalysis::new(generate_pop_song());
        keys::run(&mut state, &config).unwrap();
        chords::run(&mut state, &config).unwrap();

        let key = state.key.clone().unwrap();
        assert_eq!(key.key, KeySignature::new(0, Mode::Major));
        let progression = state.progression.clone().unwrap();
        assert_eq!(progression.label.as_deref(), Some("I-vi-IV-V"));
        assert!(state.song.tracks.iter().all(|t| t.key.is_some()));
    }
}
