//! Validation tests for Pass 3: Role Classification

use midimine::analysis::{Role, RoleProbabilities};
use midimine::config::{Config, FeatureConfig, RoleConfig};
use midimine::passes::{features, roles};
use midimine::song::{NoteEvent, Song, Track};
use midimine::state::SongAnalysis;

fn note(pitch: u8, start: f64, duration: f64, channel: u8) -> NoteEvent {
    NoteEvent::new(pitch, 100, start, duration, 0, channel)
}

/// Root-fifth quarter notes low in the register
fn generate_bass(bars: usize) -> Vec<NoteEvent> {
    let line = [36, 36, 43, 41];
    (0..bars * 4)
        .map(|b| note(line[b % 4], b as f64, 1.0, 0))
        .collect()
}

/// Kick on the beat, snare on 2 and 4, closed hats on eighths
fn generate_drums(bars: usize) -> Vec<NoteEvent> {
    let mut notes = Vec::new();
    for bar in 0..bars {
        let base = bar as f64 * 4.0;
        for beat in 0..4 {
            notes.push(note(36, base + beat as f64, 0.1, 9));
            if beat % 2 == 1 {
                notes.push(note(38, base + beat as f64, 0.1, 9));
            }
        }
        for eighth in 0..8 {
            notes.push(note(42, base + eighth as f64 * 0.5, 0.1, 9));
        }
    }
    notes
}

/// Triads stacked on every beat
fn generate_chord_stabs(bars: usize) -> Vec<NoteEvent> {
    (0..bars * 4)
        .flat_map(|b| [60, 64, 67].map(|p| note(p, b as f64, 1.0, 0)))
        .collect()
}

/// One held triad per bar
fn generate_pad(bars: usize) -> Vec<NoteEvent> {
    let voicings = [[60, 64, 67], [57, 60, 64], [53, 57, 60], [55, 59, 62]];
    (0..bars)
        .flat_map(|bar| voicings[bar % 4].map(|p| note(p, bar as f64 * 4.0, 4.0, 0)))
        .collect()
}

/// Single melodic line above middle C with uneven rhythm
fn generate_lead(bars: usize) -> Vec<NoteEvent> {
    let phrase = [(72, 0.5), (74, 0.5), (76, 1.0), (79, 0.5), (77, 0.5), (76, 1.0)];
    let mut notes = Vec::new();
    let mut t = 0.0;
    for _ in 0..bars {
        for &(pitch, dur) in &phrase {
            notes.push(note(pitch, t, dur, 0));
            t += dur;
        }
    }
    notes
}

/// Broken C major chord in sixteenths
fn generate_arp(bars: usize) -> Vec<NoteEvent> {
    let cycle = [60, 64, 67, 72];
    (0..bars * 16)
        .map(|i| note(cycle[i % 4], i as f64 * 0.25, 0.2, 0))
        .collect()
}

fn classify(notes: Vec<NoteEvent>) -> RoleProbabilities {
    let track = Track::new(0, notes);
    let f = features::extract_features(&track, &FeatureConfig::default());
    roles::classify_roles(&f, &RoleConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_tracks_get_expected_roles() {
        let cases: Vec<(&str, Vec<NoteEvent>, Role)> = vec![
            ("bass", generate_bass(4), Role::Bass),
            ("drums", generate_drums(4), Role::Drums),
            ("chords", generate_chord_stabs(4), Role::Chords),
            ("pad", generate_pad(4), Role::Pad),
            ("lead", generate_lead(4), Role::Lead),
            ("arp", generate_arp(2), Role::Arp),
        ];

        for (name, notes, expected) in cases {
            let probs = classify(notes);
            println!(
                "  {}: {} ({:.2}) ranked {:?}",
                name,
                probs.primary_role(),
                probs.confidence(),
                probs.ranked()
            );
            assert_eq!(probs.primary_role(), expected, "{} track misclassified", name);
            assert!(
                (probs.total() - 1.0).abs() < 1e-9,
                "{} scores should be divided by their total",
                name
            );
        }
    }

    #[test]
    fn test_empty_track_is_other_with_low_confidence() {
        let probs = classify(vec![]);
        assert_eq!(probs.primary_role(), Role::Other);
        assert!((probs.confidence() - 0.1).abs() < 1e-12);
        assert!(Role::ALL
            .iter()
            .filter(|&&r| r != Role::Other)
            .all(|&r| probs.get(r) == 0.0));
    }

    #[test]
    fn test_primary_role_only_helper() {
        let track = Track::new(0, generate_bass(2));
        let f = features::extract_features(&track, &FeatureConfig::default());
        assert_eq!(roles::classify_track_role(&f, &RoleConfig::default()), Role::Bass);
    }

    #[test]
    fn test_priority_order_on_exact_ties() {
        let tie = RoleProbabilities {
            pad: 0.5,
            lead: 0.5,
            ..Default::default()
        };
        assert_eq!(tie.primary_role(), Role::Pad);

        let drums_bass = RoleProbabilities {
            drums: 0.2,
            bass: 0.2,
            other: 0.1,
            ..Default::default()
        };
        assert_eq!(drums_bass.primary_role(), Role::Drums);
    }

    #[test]
    fn test_rule_weights_are_configurable() {
        let track = Track::new(0, generate_bass(2));
        let f = features::extract_features(&track, &FeatureConfig::default());

        let mut config = RoleConfig::default();
        config.weights.low_register = 0.0;
        config.weights.monophonic_low = 0.0;
        let probs = roles::classify_roles(&f, &config);
        assert_ne!(probs.primary_role(), Role::Bass);
        assert_eq!(probs.bass, 0.0);
    }

    #[test]
    fn test_run_attaches_roles_to_every_track() {
        let song = Song::new(
            "band",
            "test",
            480,
            vec![],
            vec![],
            vec![
                Track::new(0, generate_drums(2)),
                Track::new(1, generate_bass(2)),
                Track::new(2, vec![]),
            ],
        );
        let config = Config::default();
        let mut state = SongAnalysis::new(song);
        features::run(&mut state, &config).unwrap();
        roles::run(&mut state, &config).unwrap();

        let primary: Vec<Role> = state
            .song
            .tracks
            .iter()
            .map(|t| t.roles.unwrap().primary_role())
            .collect();
        assert_eq!(primary, vec![Role::Drums, Role::Bass, Role::Other]);
        assert_eq!(state.tracks_with_role(Role::Bass).len(), 1);

        // Same input, same answer
        let again = roles::classify_roles(
            state.song.tracks[1].features.as_ref().unwrap(),
            &config.roles,
        );
        assert_eq!(Some(again), state.song.tracks[1].roles);
    }
}
