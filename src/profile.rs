//! Taste profile: the user's preference document, fully typed.
//!
//! The profile is loaded from a YAML file and deep-merged over defaults —
//! every field is always present and typed, no matter how partial the user's
//! document is. A malformed document fails soft: the loader logs a warning
//! and falls back to the defaults so a refresh run never dies on config.

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Paired artist/track name lists used by the ban/avoid/boost/like sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NameLists {
    pub artists: Vec<String>,
    pub tracks: Vec<String>,
}

/// Track-only list for the nested `track_rules` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackList {
    pub tracks: Vec<String>,
}

/// Nested per-track rules. These are unioned into the corresponding
/// top-level sections at load time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackRules {
    pub hard_bans: TrackList,
    pub boost: TrackList,
    pub like: TrackList,
    pub avoid: TrackList,
}

/// Repetition constraints enforced by the one-pass constraint filter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Constraints {
    pub max_tracks_per_artist: u32,
    pub cooldown_days_same_track: i64,
    pub cooldown_days_same_artist: i64,
    pub dedupe_title_variants: bool,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            max_tracks_per_artist: 2,
            cooldown_days_same_track: 30,
            cooldown_days_same_artist: 10,
            dedupe_title_variants: false,
        }
    }
}

/// Discovery blending knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Discovery {
    pub ratio_default: f64,
    pub discourage_artists: Vec<String>,
    /// Probability that a reduce-frequency artist is dropped on any given
    /// pass. Tunable rather than a literal; the default rejects roughly two
    /// out of three occurrences.
    pub reduce_frequency_bias: f64,
}

impl Default for Discovery {
    fn default() -> Self {
        Self {
            ratio_default: 0.0,
            discourage_artists: Vec::new(),
            reduce_frequency_bias: 0.66,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecentPlayPenalty {
    pub within_days: i64,
    pub penalty: f64,
}

impl Default for RecentPlayPenalty {
    fn default() -> Self {
        Self {
            within_days: 14,
            penalty: -1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LongNoPlayBonus {
    pub after_days: i64,
    pub bonus: f64,
}

impl Default for LongNoPlayBonus {
    fn default() -> Self {
        Self {
            after_days: 120,
            bonus: 0.0,
        }
    }
}

/// Additive scoring weights. All weights apply per fragment hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringWeights {
    pub boost_weight: f64,
    pub like_weight: f64,
    pub avoid_weight: f64,
    pub hard_ban_weight: f64,
    pub recent_play_penalty: RecentPlayPenalty,
    pub long_time_no_play_bonus: LongNoPlayBonus,
    /// Fraction of `boost_weight` granted on a scene-anchor hit.
    pub anchor_factor: f64,
    /// Fixed bonus for artists in the learned-boost set.
    pub learned_boost_bonus: f64,
    /// Fixed bonus for tracks in the liked set.
    pub liked_track_bonus: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            boost_weight: 1.0,
            like_weight: 0.5,
            avoid_weight: -0.5,
            hard_ban_weight: -9999.0,
            recent_play_penalty: RecentPlayPenalty::default(),
            long_time_no_play_bonus: LongNoPlayBonus::default(),
            anchor_factor: 0.5,
            learned_boost_bonus: 1.5,
            liked_track_bonus: 3.0,
        }
    }
}

/// Context-specific overrides, keyed by context name (e.g. a weekday tag).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Mode {
    pub discovery_ratio: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Learning {
    /// Liked-track count at which an artist is promoted to the
    /// learned-boost set.
    pub artist_like_threshold: u32,
}

impl Default for Learning {
    fn default() -> Self {
        Self {
            artist_like_threshold: 5,
        }
    }
}

/// The fully populated taste profile. Every field carries a default, so a
/// partially specified user document merges over the defaults per leaf key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TasteProfile {
    pub hard_bans: NameLists,
    pub avoid: NameLists,
    pub boost: NameLists,
    pub like: NameLists,
    pub track_rules: TrackRules,
    pub constraints: Constraints,
    pub discovery: Discovery,
    /// Named artist groups that receive a partial boost.
    pub scene_anchors: BTreeMap<String, Vec<String>>,
    pub scoring: ScoringWeights,
    pub modes: BTreeMap<String, Mode>,
    pub learning: Learning,
}

/// Loads a taste profile, always returning *some* valid profile.
///
/// Missing file and parse failures both fall back to the defaults; the
/// latter is logged. After parsing, the nested `track_rules` lists are
/// unioned into the matching top-level sections so the scoring engine only
/// ever needs to look in one place.
pub fn load_taste_profile(path: &Path) -> TasteProfile {
    let mut profile = match std::fs::read_to_string(path) {
        Ok(content) => match serde_yaml::from_str::<TasteProfile>(&content) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("could not parse taste profile {}: {err}", path.display());
                TasteProfile::default()
            }
        },
        Err(_) => TasteProfile::default(),
    };

    union_case_insensitive(&mut profile.hard_bans.tracks, &profile.track_rules.hard_bans.tracks);
    union_case_insensitive(&mut profile.boost.tracks, &profile.track_rules.boost.tracks);
    union_case_insensitive(&mut profile.like.tracks, &profile.track_rules.like.tracks);
    union_case_insensitive(&mut profile.avoid.tracks, &profile.track_rules.avoid.tracks);

    profile
}

/// Extends `target` with entries from `extra` not already present,
/// comparing case-insensitively and preserving order.
fn union_case_insensitive(target: &mut Vec<String>, extra: &[String]) {
    let extra = extra.to_vec();
    for item in extra {
        let lowered = item.to_lowercase();
        if !target.iter().any(|t| t.to_lowercase() == lowered) {
            target.push(item);
        }
    }
}

/// Resolves the discovery ratio for a context: a matching `modes` entry
/// wins, otherwise the caller's fallback is used.
pub fn resolve_discovery_ratio(profile: &TasteProfile, fallback: f64, context_key: &str) -> f64 {
    profile
        .modes
        .get(context_key)
        .and_then(|mode| mode.discovery_ratio)
        .unwrap_or(fallback)
}

/// Canonical form used for all fragment matching: lower-cased, `&`/`+`
/// spelled out, punctuation stripped, whitespace collapsed.
pub fn normalize_text(text: &str) -> String {
    let lowered = text.to_lowercase().replace(['&', '+'], " and ");
    let stripped: String = lowered
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True if any entry of `needles` is a normalized substring of `name`.
pub fn fragment_matches(name: &str, needles: &[String]) -> bool {
    let norm = normalize_text(name);
    needles.iter().any(|needle| {
        let needle = normalize_text(needle);
        !needle.is_empty() && norm.contains(&needle)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn normalize_folds_ampersands_and_plus() {
        assert_eq!(
            normalize_text("Florence + The Machine"),
            "florence and the machine"
        );
        assert_eq!(normalize_text("AC/DC"), "acdc");
        assert_eq!(normalize_text("  Two   Words "), "two words");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let profile = load_taste_profile(Path::new("/nonexistent/taste.yaml"));
        assert_eq!(profile.constraints.max_tracks_per_artist, 2);
        assert_eq!(profile.scoring.boost_weight, 1.0);
        assert!(profile.hard_bans.artists.is_empty());
    }

    #[test]
    fn malformed_document_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{not valid yaml: [").unwrap();
        let profile = load_taste_profile(file.path());
        assert_eq!(profile, TasteProfile::default());
    }

    #[test]
    fn partial_document_merges_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "constraints:\n  max_tracks_per_artist: 1\nhard_bans:\n  artists: [\"florence and the machine\"]"
        )
        .unwrap();
        let profile = load_taste_profile(file.path());

        assert_eq!(profile.constraints.max_tracks_per_artist, 1);
        // Unspecified sibling leaves keep their defaults.
        assert_eq!(profile.constraints.cooldown_days_same_track, 30);
        assert_eq!(
            profile.hard_bans.artists,
            vec!["florence and the machine".to_string()]
        );
    }

    #[test]
    fn track_rules_union_into_top_level_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "hard_bans:\n  tracks: [\"Wonderwall\"]\ntrack_rules:\n  hard_bans:\n    tracks: [\"wonderwall\", \"Mr. Brightside\"]\n  boost:\n    tracks: [\"Buddy Holly\"]"
        )
        .unwrap();
        let profile = load_taste_profile(file.path());

        // Case-insensitive union: the duplicate is not added twice.
        assert_eq!(
            profile.hard_bans.tracks,
            vec!["Wonderwall".to_string(), "Mr. Brightside".to_string()]
        );
        assert_eq!(profile.boost.tracks, vec!["Buddy Holly".to_string()]);
    }

    #[test]
    fn discovery_ratio_prefers_mode_override() {
        let mut profile = TasteProfile::default();
        profile.modes.insert(
            "friday".to_string(),
            Mode {
                discovery_ratio: Some(0.5),
            },
        );

        assert_eq!(resolve_discovery_ratio(&profile, 0.2, "friday"), 0.5);
        assert_eq!(resolve_discovery_ratio(&profile, 0.2, "monday"), 0.2);
    }
}
