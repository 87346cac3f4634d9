//! Domain types shared across the selection pipeline.
//!
//! A [`TrackCandidate`] is the unit everything else operates on: the catalog
//! store produces them, the scoring engine ranks them, the merge engine
//! emits the final ordered list of them. Identity is the track id; two
//! candidates with the same id are the same track no matter what their
//! metadata says.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Simplified representation of a catalog track we can reason about.
///
/// Candidates are treated as immutable: transformations like metadata
/// enrichment go through [`TrackCandidate::with_metadata`], which returns a
/// new value so the original pool stays intact for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackCandidate {
    /// Opaque identifier, unique within a pool.
    pub id: String,
    pub title: String,
    /// Single string; multi-artist tracks arrive pre-joined.
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Lowercase context label, e.g. a weekday name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_tag: Option<String>,
    /// Free-form provenance: source, recommendation reason, confidence,
    /// last-played date. `BTreeMap` keeps serialized output stable.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl TrackCandidate {
    pub fn new(
        id: impl Into<String>,
        artist: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            album: None,
            duration_ms: None,
            energy_tag: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Returns a copy with `key` set in metadata. Never mutates in place.
    #[must_use]
    pub fn with_metadata(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.metadata.insert(key.into(), value.into());
        copy
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// Structured artist rules for recommendation prompts and merge weighting.
///
/// Membership tests against these lists are substring-based on lower-cased
/// names everywhere except the merge engine's final preference sort, which
/// compares exactly because its input is already filtered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RulePreferences {
    pub banned_artists: Vec<String>,
    pub reduce_frequency_artists: Vec<String>,
    pub increase_weight_artists: Vec<String>,
}

impl RulePreferences {
    /// Builds a preference set with each list lower-cased and sorted so
    /// prompt output stays deterministic.
    pub fn new(
        banned: impl IntoIterator<Item = String>,
        reduce: impl IntoIterator<Item = String>,
        increase: impl IntoIterator<Item = String>,
    ) -> Self {
        fn normalized(items: impl IntoIterator<Item = String>) -> Vec<String> {
            let mut list: Vec<String> = items.into_iter().map(|s| s.to_lowercase()).collect();
            list.sort();
            list.dedup();
            list
        }

        Self {
            banned_artists: normalized(banned),
            reduce_frequency_artists: normalized(reduce),
            increase_weight_artists: normalized(increase),
        }
    }

    /// Summary lines for the recommendation prompt.
    pub fn to_prompt_lines(&self) -> Vec<String> {
        fn fmt(name: &str, items: &[String]) -> String {
            if items.is_empty() {
                format!("- {name}: none")
            } else {
                format!("- {name}: {}", items.join(", "))
            }
        }

        vec![
            fmt("banned_artists", &self.banned_artists),
            fmt("reduce_frequency_artists", &self.reduce_frequency_artists),
            fmt("increase_weight_artists", &self.increase_weight_artists),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_metadata_leaves_original_untouched() {
        let track = TrackCandidate::new("t1", "Artist", "Song");
        let enriched = track.with_metadata("reason", "fits the morning vibe");

        assert!(track.metadata.is_empty(), "original must stay unchanged");
        assert_eq!(enriched.meta("reason"), Some("fits the morning vibe"));
        assert_eq!(enriched.id, track.id);
    }

    #[test]
    fn rule_preferences_sorts_and_lowercases() {
        let prefs = RulePreferences::new(
            vec!["Zeta".to_string(), "alpha".to_string(), "Zeta".to_string()],
            vec![],
            vec![],
        );
        assert_eq!(prefs.banned_artists, vec!["alpha", "zeta"]);
    }

    #[test]
    fn prompt_lines_mark_empty_lists() {
        let prefs = RulePreferences::new(vec!["the killers".to_string()], vec![], vec![]);
        let lines = prefs.to_prompt_lines();
        assert_eq!(lines[0], "- banned_artists: the killers");
        assert_eq!(lines[1], "- reduce_frequency_artists: none");
    }
}
