//! Analysis result types shared between passes

use serde::{Deserialize, Serialize};

/// Pitch-class spellings, sharps only
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Functional role of a track in an arrangement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Drums,
    Bass,
    Chords,
    Pad,
    Lead,
    Arp,
    Other,
}

impl Role {
    /// All roles in tie-break priority order
    pub const ALL: [Role; 7] = [
        Role::Drums,
        Role::Bass,
        Role::Chords,
        Role::Pad,
        Role::Lead,
        Role::Arp,
        Role::Other,
    ];

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Role::Drums => "drums",
            Role::Bass => "bass",
            Role::Chords => "chords",
            Role::Pad => "pad",
            Role::Lead => "lead",
            Role::Arp => "arp",
            Role::Other => "other",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Relative weight per role.
///
/// The weights are not required to sum to 1 and are never normalized here;
/// only their ordering matters for `primary_role`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RoleProbabilities {
    pub drums: f64,
    pub bass: f64,
    pub chords: f64,
    pub pad: f64,
    pub lead: f64,
    pub arp: f64,
    pub other: f64,
}

impl RoleProbabilities {
    /// All weight on a single role
    pub fn only(role: Role, weight: f64) -> Self {
        let mut probs = Self::default();
        probs.set(role, weight);
        probs
    }

    pub fn get(&self, role: Role) -> f64 {
        match role {
            Role::Drums => self.drums,
            Role::Bass => self.bass,
            Role::Chords => self.chords,
            Role::Pad => self.pad,
            Role::Lead => self.lead,
            Role::Arp => self.arp,
            Role::Other => self.other,
        }
    }

    /// Set a weight; negative values are clamped to zero
    pub fn set(&mut self, role: Role, weight: f64) {
        let weight = weight.max(0.0);
        match role {
            Role::Drums => self.drums = weight,
            Role::Bass => self.bass = weight,
            Role::Chords => self.chords = weight,
            Role::Pad => self.pad = weight,
            Role::Lead => self.lead = weight,
            Role::Arp => self.arp = weight,
            Role::Other => self.other = weight,
        }
    }

    /// (role, weight) pairs in priority order
    pub fn iter(&self) -> impl Iterator<Item = (Role, f64)> + '_ {
        Role::ALL.iter().map(move |&role| (role, self.get(role)))
    }

    pub fn total(&self) -> f64 {
        self.iter().map(|(_, w)| w).sum()
    }

    /// Arg-max role; equal weights resolve to the earlier role in `Role::ALL`
    pub fn primary_role(&self) -> Role {
        let mut best = Role::ALL[0];
        let mut best_weight = self.get(best);
        for (role, weight) in self.iter().skip(1) {
            if weight > best_weight {
                best = role;
                best_weight = weight;
            }
        }
        best
    }

    /// Weight of the primary role
    pub fn confidence(&self) -> f64 {
        self.get(self.primary_role())
    }

    /// Roles sorted by weight, highest first, priority order on ties
    pub fn ranked(&self) -> Vec<(Role, f64)> {
        let mut ranked: Vec<(Role, f64)> = self.iter().collect();
        // Stable sort keeps priority order among equal weights
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }
}

/// Scalar descriptors of a track, the classifier's only input
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackFeatures {
    pub note_count: usize,
    /// Notes per beat over the track's span
    pub note_density: f64,
    /// Time with two or more sounding notes over time with any sounding note
    pub polyphony_ratio: f64,
    pub max_simultaneous: usize,
    pub pitch_min: u8,
    pub pitch_max: u8,
    pub pitch_range: u8,
    pub mean_pitch: f64,
    pub distinct_pitches: usize,
    pub distinct_pitch_classes: usize,
    pub mean_duration_beats: f64,
    pub mean_velocity: f64,
    pub velocity_std_dev: f64,
    pub mean_ioi_beats: f64,
    /// Coefficient of variation of inter-onset intervals
    pub ioi_cv: f64,
    pub percussion_channel_fraction: f64,
    pub span_beats: f64,
}

/// Swing feel categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwingStyle {
    None,
    Light,
    Medium,
    Heavy,
    Triplet,
}

impl SwingStyle {
    pub fn name(&self) -> &'static str {
        match self {
            SwingStyle::None => "none",
            SwingStyle::Light => "light",
            SwingStyle::Medium => "medium",
            SwingStyle::Heavy => "heavy",
            SwingStyle::Triplet => "triplet",
        }
    }
}

/// Swing analysis results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwingAnalysis {
    pub style: SwingStyle,
    /// Mean delay of off-grid notes, in sixteenth notes
    pub mean_offset: f64,
    /// Fraction of qualifying notes agreeing with `style`
    pub confidence: f64,
    pub qualifying_notes: usize,
}

impl SwingAnalysis {
    /// Straight timing, reported when evidence is too thin
    pub fn straight(qualifying_notes: usize) -> Self {
        Self {
            style: SwingStyle::None,
            mean_offset: 0.0,
            confidence: 0.0,
            qualifying_notes,
        }
    }
}

/// Major or minor mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Major,
    Minor,
}

/// Tonal center: root pitch class plus mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeySignature {
    pub root: u8,
    pub mode: Mode,
}

impl KeySignature {
    pub fn new(root: u8, mode: Mode) -> Self {
        Self {
            root: root % 12,
            mode,
        }
    }

    /// Relative major/minor sharing the same key signature
    pub fn relative(&self) -> Self {
        match self.mode {
            Mode::Major => Self::new(self.root + 9, Mode::Minor),
            Mode::Minor => Self::new(self.root + 3, Mode::Major),
        }
    }

    /// Same root, opposite mode
    pub fn parallel(&self) -> Self {
        match self.mode {
            Mode::Major => Self::new(self.root, Mode::Minor),
            Mode::Minor => Self::new(self.root, Mode::Major),
        }
    }

    pub fn name(&self) -> String {
        let mode = match self.mode {
            Mode::Major => "major",
            Mode::Minor => "minor",
        };
        format!("{} {}", NOTE_NAMES[self.root as usize], mode)
    }

    /// Pitch classes of the major or natural minor scale
    pub fn scale_pitch_classes(&self) -> [u8; 7] {
        let steps: [u8; 7] = match self.mode {
            Mode::Major => [0, 2, 4, 5, 7, 9, 11],
            Mode::Minor => [0, 2, 3, 5, 7, 8, 10],
        };
        steps.map(|s| (self.root + s) % 12)
    }
}

/// Key detection result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyDetection {
    pub key: KeySignature,
    /// Pearson correlation with the winning profile
    pub correlation: f64,
    /// Correlation lead over the runner-up
    pub margin: f64,
    pub runner_up: Option<KeySignature>,
    pub confidence: f64,
}

/// Chord quality templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChordQuality {
    Major,
    Minor,
    Diminished,
    Augmented,
    DominantSeventh,
    MajorSeventh,
    MinorSeventh,
}

impl ChordQuality {
    /// Templates in tie-break order
    pub const ALL: [ChordQuality; 7] = [
        ChordQuality::Major,
        ChordQuality::Minor,
        ChordQuality::Diminished,
        ChordQuality::Augmented,
        ChordQuality::DominantSeventh,
        ChordQuality::MajorSeventh,
        ChordQuality::MinorSeventh,
    ];

    /// Chord tones in semitones above the root
    pub fn intervals(&self) -> &'static [u8] {
        match self {
            ChordQuality::Major => &[0, 4, 7],
            ChordQuality::Minor => &[0, 3, 7],
            ChordQuality::Diminished => &[0, 3, 6],
            ChordQuality::Augmented => &[0, 4, 8],
            ChordQuality::DominantSeventh => &[0, 4, 7, 10],
            ChordQuality::MajorSeventh => &[0, 4, 7, 11],
            ChordQuality::MinorSeventh => &[0, 3, 7, 10],
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            ChordQuality::Major => "",
            ChordQuality::Minor => "m",
            ChordQuality::Diminished => "dim",
            ChordQuality::Augmented => "aug",
            ChordQuality::DominantSeventh => "7",
            ChordQuality::MajorSeventh => "maj7",
            ChordQuality::MinorSeventh => "m7",
        }
    }

    /// Minor third above the root
    pub fn is_minor_family(&self) -> bool {
        matches!(
            self,
            ChordQuality::Minor | ChordQuality::Diminished | ChordQuality::MinorSeventh
        )
    }
}

/// Root plus quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chord {
    pub root: u8,
    pub quality: ChordQuality,
}

impl Chord {
    pub fn new(root: u8, quality: ChordQuality) -> Self {
        Self {
            root: root % 12,
            quality,
        }
    }

    pub fn pitch_classes(&self) -> Vec<u8> {
        self.quality
            .intervals()
            .iter()
            .map(|i| (self.root + i) % 12)
            .collect()
    }

    pub fn name(&self) -> String {
        format!("{}{}", NOTE_NAMES[self.root as usize], self.quality.suffix())
    }

    /// Scale-degree label relative to `key`, e.g. "vi" or "V7"
    pub fn roman_numeral(&self, key: &KeySignature) -> String {
        const NUMERALS: [&str; 12] = [
            "I", "bII", "II", "bIII", "III", "IV", "#IV", "V", "bVI", "VI", "bVII", "VII",
        ];
        let degree = (self.root + 12 - key.root) % 12;
        let numeral = NUMERALS[degree as usize];
        let numeral = if self.quality.is_minor_family() {
            numeral.to_lowercase()
        } else {
            numeral.to_string()
        };
        let suffix = match self.quality {
            ChordQuality::Major | ChordQuality::Minor => "",
            ChordQuality::Diminished => "°",
            ChordQuality::Augmented => "+",
            ChordQuality::DominantSeventh | ChordQuality::MinorSeventh => "7",
            ChordQuality::MajorSeventh => "maj7",
        };
        format!("{}{}", numeral, suffix)
    }
}

/// Chord over one time window; `chord` is `None` for the no-chord sentinel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordEvent {
    pub chord: Option<Chord>,
    pub start_beat: f64,
    pub duration_beats: f64,
    pub confidence: f64,
    pub bass_pitch_class: Option<u8>,
}

impl ChordEvent {
    pub fn no_chord(start_beat: f64, duration_beats: f64) -> Self {
        Self {
            chord: None,
            start_beat,
            duration_beats,
            confidence: 0.0,
            bass_pitch_class: None,
        }
    }

    pub fn is_no_chord(&self) -> bool {
        self.chord.is_none()
    }

    pub fn end_beat(&self) -> f64 {
        self.start_beat + self.duration_beats
    }
}

/// One catalog progression found in a chord sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressionMatch {
    pub name: String,
    /// Index into the sounding (non-sentinel) chords
    pub start_index: usize,
    pub length: usize,
}

/// Smoothed chord sequence with optional catalog label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordProgression {
    pub events: Vec<ChordEvent>,
    pub key: KeySignature,
    pub label: Option<String>,
    pub matches: Vec<ProgressionMatch>,
}

impl ChordProgression {
    /// Roman numerals of sounding chords
    pub fn roman_numerals(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| e.chord.map(|c| c.roman_numeral(&self.key)))
            .collect()
    }
}
