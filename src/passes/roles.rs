//! Pass 3: Role Classification

use crate::analysis::{Role, RoleProbabilities, TrackFeatures};
use crate::config::{Config, RoleConfig};
use crate::error::Result as MineResult;
use crate::passes::features::extract_features;
use crate::state::SongAnalysis;
use tracing::{debug, info};

/// Raw rule scores per role, before dividing by their total
pub fn score_roles(features: &TrackFeatures, config: &RoleConfig) -> RoleProbabilities {
    let w = &config.weights;
    let m = &config.margins;
    let mut scores = RoleProbabilities::default();
    let mut add = |role: Role, amount: f64| {
        let current = scores.get(role);
        scores.set(role, current + amount);
    };

    let monophonic = features.polyphony_ratio <= m.monophonic_max_polyphony;

    // Rule 1: Percussion channel is the strongest drum cue
    if features.percussion_channel_fraction >= m.percussion_channel_fraction {
        add(Role::Drums, w.percussion_channel);
    }

    // Rule 2: Few fixed pitches hit briefly
    if features.distinct_pitches <= m.drums_max_distinct_pitches {
        add(Role::Drums, w.narrow_pitch_set);
    }
    if features.mean_duration_beats <= m.drums_max_mean_duration {
        add(Role::Drums, w.short_hits);
    }

    // Rule 3: Low register, mostly one note at a time
    if features.mean_pitch <= m.bass_max_mean_pitch {
        add(Role::Bass, w.low_register);
        if monophonic {
            add(Role::Bass, w.monophonic_low);
        }
    }

    // Rule 4: Stacked notes
    if features.polyphony_ratio >= m.chords_min_polyphony {
        add(Role::Chords, w.polyphonic);
    }
    if features.max_simultaneous >= m.chords_min_simultaneous {
        add(Role::Chords, w.triadic_stacks);
        add(Role::Pad, w.triadic_stacks * 0.5);
    }

    // Rule 5: Long sustained notes
    if features.mean_duration_beats >= m.pad_min_mean_duration {
        add(Role::Pad, w.sustained);
        if features.note_density <= m.pad_max_density {
            add(Role::Pad, w.sparse_sustained);
        }
    }

    // Rule 6: Single voice above middle C moving between pitches
    if monophonic && features.mean_pitch >= m.lead_min_mean_pitch {
        add(Role::Lead, w.upper_register);
    }
    if monophonic && features.distinct_pitches >= m.lead_min_distinct_pitches {
        add(Role::Lead, w.melodic_motion);
    }

    // Rule 7: Fast, evenly spaced single voice across a wide range
    if features.note_density >= m.arp_min_density && features.ioi_cv <= m.arp_max_ioi_cv {
        add(Role::Arp, w.steady_fast_onsets);
    }
    if monophonic && features.pitch_range >= m.arp_min_pitch_range && features.note_density >= m.arp_min_density {
        add(Role::Arp, w.wide_single_voice);
    }

    // Rule 8: Baseline keeps `other` reachable
    add(Role::Other, w.other_baseline);

    scores
}

/// Role distribution for a track's features.
///
/// Non-empty tracks get their rule scores divided by the score total; empty
/// tracks get a single low `other` weight.
pub fn classify_roles(features: &TrackFeatures, config: &RoleConfig) -> RoleProbabilities {
    if features.note_count == 0 {
        return RoleProbabilities::only(Role::Other, config.empty_track_confidence);
    }

    let scores = score_roles(features, config);
    let total = scores.total();
    if total <= 0.0 {
        return RoleProbabilities::only(Role::Other, config.empty_track_confidence);
    }

    let mut probs = RoleProbabilities::default();
    for (role, score) in scores.iter() {
        probs.set(role, score / total);
    }
    probs
}

/// Primary role only
pub fn classify_track_role(features: &TrackFeatures, config: &RoleConfig) -> Role {
    classify_roles(features, config).primary_role()
}

pub fn run(state: &mut SongAnalysis, config: &Config) -> MineResult<()> {
    info!(song = %state.song.id, "Pass 3: Role Classification");

    for track in &mut state.song.tracks {
        let features = match &track.features {
            Some(features) => features.clone(),
            None => {
                let features = extract_features(track, &config.features);
                track.features = Some(features.clone());
                features
            }
        };

        let roles = classify_roles(&features, &config.roles);
        debug!(
            track = track.id,
            role = roles.primary_role().name(),
            confidence = roles.confidence(),
            "track role"
        );
        track.roles = Some(roles);
    }

    let summary: Vec<String> = state
        .song
        .tracks
        .iter()
        .filter_map(|t| t.roles.map(|r| format!("{}={}", t.id, r.primary_role())))
        .collect();
    info!("  Roles: {}", summary.join(", "));

    Ok(())
}
