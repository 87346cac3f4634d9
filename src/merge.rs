//! Merge engine: blends discovery recommendations into the base selection.
//!
//! The merge never invents tracks. A recommendation only makes it into the
//! output if it resolves to a track already in the pool, matched by id
//! first and by a normalized `artist::title` composite key second.
//! Unmatched recommendations become warnings, not errors.

use crate::recommend::Recommendation;
use crate::track::{RulePreferences, TrackCandidate};
use std::collections::{HashMap, HashSet};

/// Merges matched discoveries into the base track list under a target
/// discovery ratio.
///
/// Output guarantees: no duplicate ids, length ≤ `total_limit`, discovery
/// picks ≤ `round(total_limit * discovery_ratio)`. Coming up short is not
/// an error; `total_limit == 0` yields an empty result plus a warning.
///
/// When rule preferences are supplied the final list is stable-sorted
/// descending by a multiplicative weight (×1.3 increase, ×0.7 reduce,
/// ×0.1 banned — exact matches only, since inputs here are pre-filtered).
pub fn merge_recommendations(
    base_tracks: &[TrackCandidate],
    track_pool: &[TrackCandidate],
    recommendations: &[Recommendation],
    total_limit: usize,
    discovery_ratio: f64,
    rule_preferences: Option<&RulePreferences>,
) -> (Vec<TrackCandidate>, Vec<String>) {
    if total_limit == 0 {
        return (Vec::new(), vec!["total_limit must be positive".to_string()]);
    }

    let discovery_target = ((total_limit as f64 * discovery_ratio).round() as i64)
        .clamp(0, total_limit as i64) as usize;
    let pool_index = build_track_index(track_pool);

    let (matched, warnings) = match_recommendations(recommendations, track_pool, &pool_index);

    let mut final_tracks: Vec<TrackCandidate> = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();

    for track in matched.into_iter().take(discovery_target) {
        if seen_ids.insert(track.id.clone()) {
            final_tracks.push(track);
        }
    }

    for track in base_tracks {
        if final_tracks.len() >= total_limit {
            break;
        }
        if seen_ids.insert(track.id.clone()) {
            final_tracks.push(track.clone());
        }
    }

    if final_tracks.len() < total_limit {
        for track in track_pool {
            if final_tracks.len() >= total_limit {
                break;
            }
            if seen_ids.insert(track.id.clone()) {
                final_tracks.push(track.clone());
            }
        }
    }

    final_tracks.truncate(total_limit);

    if let Some(prefs) = rule_preferences {
        final_tracks.sort_by(|a, b| {
            preference_weight(b, prefs)
                .partial_cmp(&preference_weight(a, prefs))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    (final_tracks, warnings)
}

/// Index over the pool keyed by lower-cased id and by the composite
/// `artist::title` key. Later pool entries win on key collisions.
fn build_track_index(pool: &[TrackCandidate]) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for (position, track) in pool.iter().enumerate() {
        if !track.id.is_empty() {
            index.insert(track.id.to_lowercase(), position);
        }
        index.insert(composite_key(&track.artist, &track.title), position);
    }
    index
}

fn match_recommendations(
    recommendations: &[Recommendation],
    pool: &[TrackCandidate],
    index: &HashMap<String, usize>,
) -> (Vec<TrackCandidate>, Vec<String>) {
    let mut matched = Vec::new();
    let mut warnings = Vec::new();

    for rec in recommendations {
        let position = rec
            .track_id
            .as_deref()
            .and_then(|id| index.get(&id.to_lowercase()))
            .or_else(|| index.get(&composite_key(&rec.artist, &rec.title)));

        let Some(&position) = position else {
            warnings.push(format!(
                "recommended '{} – {}', but it is not in the candidate pool",
                rec.artist, rec.title
            ));
            continue;
        };

        let enriched = pool[position]
            .with_metadata("rec_reason", rec.reason.clone())
            .with_metadata("rec_confidence", format!("{:.2}", rec.confidence));
        matched.push(enriched);
    }

    (matched, warnings)
}

/// Exact-match multiplicative weight used for the final preference sort.
fn preference_weight(track: &TrackCandidate, prefs: &RulePreferences) -> f64 {
    let artist = track.artist.to_lowercase();
    let mut weight = 1.0;
    if prefs
        .increase_weight_artists
        .iter()
        .any(|item| artist == item.to_lowercase())
    {
        weight *= 1.3;
    }
    if prefs
        .reduce_frequency_artists
        .iter()
        .any(|item| artist == item.to_lowercase())
    {
        weight *= 0.7;
    }
    if prefs
        .banned_artists
        .iter()
        .any(|item| artist == item.to_lowercase())
    {
        weight *= 0.1;
    }
    weight
}

/// Whitespace-collapsed, lower-cased `artist::title` composite key.
fn composite_key(artist: &str, title: &str) -> String {
    fn collapse(value: &str) -> String {
        value
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
    format!("{}::{}", collapse(artist), collapse(title))
}
