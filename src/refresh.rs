//! Daily refresh orchestration.
//!
//! One call of [`run_refresh`] performs a full day's cycle: detect manual
//! removals from the last run, build the eligible pool, score and
//! constrain it, blend in discovery recommendations, push the result to
//! the playlist provider, and record everything (catalog, run history,
//! feedback log). The pipeline degrades rather than fails: a missing or
//! broken recommender leaves the deterministic base selection intact and
//! surfaces a warning in the outcome.

use crate::config::{RulesConfig, Settings};
use crate::db::CatalogStore;
use crate::feedback::{self, load_state};
use crate::profile::{resolve_discovery_ratio, TasteProfile};
use crate::provider::{push_items, PlaylistProvider};
use crate::recommend::{
    log_recommendations, run_recommender, CompletionClient, RecommendError, RecommendationContext,
};
use crate::scoring::{apply_constraints, is_hard_banned, score_track, ArtistRules};
use crate::track::TrackCandidate;
use anyhow::{bail, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use log::{info, warn};
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// What a refresh produced, for display and logging.
#[derive(Debug)]
pub struct RefreshOutcome {
    pub energy_tag: String,
    pub run_label: String,
    pub tracks: Vec<TrackCandidate>,
    pub warnings: Vec<String>,
}

/// The day's context label: the lower-cased weekday name.
pub fn energy_tag_for(date: NaiveDate) -> String {
    match date.weekday() {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
    .to_string()
}

/// Runs the full daily refresh against the given store and provider.
#[allow(clippy::too_many_arguments)]
pub fn run_refresh(
    store: &mut CatalogStore,
    provider: &mut dyn PlaylistProvider,
    client: Option<&dyn CompletionClient>,
    settings: &Settings,
    profile: &TasteProfile,
    rules: &RulesConfig,
    feedback_log: &Path,
    history_log: &Path,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<RefreshOutcome> {
    let energy_tag = energy_tag_for(today);
    let run_label = format!("{today}-{energy_tag}");
    let mut warnings: Vec<String> = Vec::new();

    ban_manual_removals(store, provider, today)?;

    let state = load_state(feedback_log, profile.learning.artist_like_threshold);
    let discovery_ratio =
        resolve_discovery_ratio(profile, settings.discovery_ratio, &energy_tag);

    let banned_ids = store.banned_track_ids()?;
    let recent_ids = store.recent_track_ids(settings.no_repeat_days, today)?;
    let artist_rules = ArtistRules::new(
        rules.banned_artists.clone(),
        rules.reduce_frequency_artists.clone(),
        profile.discovery.reduce_frequency_bias,
    )
    .with_dynamic_bans(store.banned_artists()?);

    let mut rng = rand::thread_rng();
    let eligible = |track: &TrackCandidate, rng: &mut rand::rngs::ThreadRng| {
        if banned_ids.contains(&track.id.to_lowercase()) {
            return false;
        }
        if is_hard_banned(&track.artist, &track.title, profile) {
            return false;
        }
        // Don't repeat a playlist placement inside the no-repeat window.
        if let Some(last) = state.track_last_seen.get(&track.id.to_lowercase()) {
            if now - *last < Duration::days(settings.no_repeat_days) {
                return false;
            }
        }
        artist_rules.allows(track, &recent_ids, rng)
    };

    let mut pool: Vec<TrackCandidate> = store
        .candidate_tracks(&energy_tag)?
        .into_iter()
        .filter(|t| eligible(t, &mut rng))
        .collect();

    // One widening step: if the tag-filtered pool is dry, draw from the
    // whole catalog under the same rules.
    if pool.is_empty() {
        warn!("no candidates tagged {energy_tag}, widening to full catalog");
        pool = store
            .all_tracks()?
            .into_iter()
            .filter(|t| eligible(t, &mut rng))
            .collect();
    }
    if pool.is_empty() {
        bail!("no eligible tracks in the catalog after filtering");
    }

    pool.shuffle(&mut rng);
    let mut scored: Vec<(f64, TrackCandidate)> = pool
        .iter()
        .map(|track| (score_track(track, profile, &state, now), track.clone()))
        .collect();
    // Stable sort keeps the shuffle order among equal scores.
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    let ranked: Vec<TrackCandidate> = scored.into_iter().map(|(_, t)| t).collect();

    let constrained = apply_constraints(&ranked, profile, &state, now);
    let base = select_for_duration(
        &constrained,
        settings.tracks_per_day,
        settings.target_duration_minutes,
    );
    let total_limit = settings.tracks_per_day.max(base.len());

    let mut tracks = base.clone();
    if settings.enable_discovery && discovery_ratio > 0.0 {
        if let Some(client) = client {
            let context = RecommendationContext {
                user_profile: profile_summary(profile),
                rules: rules.prompt_rules(),
                listening_history: store.recent_history(settings.max_history_items)?,
                track_pool: pool.clone(),
                rule_preferences: Some(rules.to_rule_preferences()),
            };
            match run_recommender(
                &context,
                &base,
                &settings.playlist_name,
                &settings.timezone_hint,
                total_limit,
                discovery_ratio,
                client,
                settings.max_history_items,
                settings.max_pool_snapshot,
            ) {
                Ok(result) => {
                    tracks = result.tracks;
                    warnings.extend(result.warnings);
                    if !result.recommendations.is_empty() {
                        let discoveries: Vec<TrackCandidate> = tracks
                            .iter()
                            .filter(|t| t.meta("rec_reason").is_some())
                            .cloned()
                            .collect();
                        log_recommendations(&discoveries, history_log, &run_label)?;
                    }
                }
                Err(RecommendError::Disabled) => {}
                Err(err) => {
                    warnings.push(format!("discovery recommender skipped: {err}"));
                }
            }
        }
    }

    // Last line of defense before pushing: no empties, no duplicates, no
    // banned or freshly played ids.
    let mut seen: HashSet<String> = HashSet::new();
    let tracks: Vec<TrackCandidate> = tracks
        .into_iter()
        .filter(|t| {
            let id = t.id.to_lowercase();
            !id.is_empty()
                && !banned_ids.contains(&id)
                && !recent_ids.contains(&id)
                && seen.insert(id)
        })
        .collect();
    if tracks.is_empty() {
        bail!("refresh produced no playable tracks");
    }

    let ids: Vec<String> = tracks.iter().map(|t| t.id.clone()).collect();
    push_items(provider, &ids)?;

    store.ensure_tracks_exist(&tracks)?;
    store.mark_played(&ids, today)?;
    store.record_run(&run_label, &energy_tag, &tracks)?;

    let artists: Vec<String> = tracks.iter().map(|t| t.artist.clone()).collect();
    feedback::record_generated_event(
        feedback_log,
        &ids,
        &artists,
        &energy_tag,
        discovery_ratio,
        pool.len(),
    )?;

    info!("refresh {run_label}: {} tracks pushed", tracks.len());
    Ok(RefreshOutcome {
        energy_tag,
        run_label,
        tracks,
        warnings,
    })
}

/// Tracks that disappeared from the playlist since the last run were
/// removed by hand; record them as bans. Skipped when the last run was
/// today, so re-running after an edit does not ban the edits of the run
/// itself.
fn ban_manual_removals(
    store: &mut CatalogStore,
    provider: &dyn PlaylistProvider,
    today: NaiveDate,
) -> Result<()> {
    let Some((record, placed_ids)) = store.last_run()? else {
        return Ok(());
    };
    if record.run_at.starts_with(&today.format("%Y-%m-%d").to_string()) {
        return Ok(());
    }

    let current: HashSet<String> = provider
        .current_items()?
        .into_iter()
        .map(|id| id.to_lowercase())
        .collect();
    let removed: Vec<String> = placed_ids
        .into_iter()
        .filter(|id| !current.contains(id))
        .collect();
    if !removed.is_empty() {
        info!("{} tracks manually removed since last run", removed.len());
        store.record_bans(&removed, "manually removed from playlist")?;
    }
    Ok(())
}

/// Takes tracks in order until both the minimum count and the target
/// playtime are reached. Both are floors, not caps: a playlist of short
/// tracks grows past `minimum_count` until the playtime is covered. A
/// zero target disables the duration condition; unknown durations
/// contribute nothing.
fn select_for_duration(
    tracks: &[TrackCandidate],
    minimum_count: usize,
    target_minutes: u64,
) -> Vec<TrackCandidate> {
    let target_ms = target_minutes * 60 * 1000;
    let mut selected = Vec::new();
    let mut total_ms: u64 = 0;

    for track in tracks {
        if track.id.is_empty() {
            continue;
        }
        total_ms += track.duration_ms.unwrap_or(0);
        selected.push(track.clone());
        if selected.len() >= minimum_count && (target_ms == 0 || total_ms >= target_ms) {
            break;
        }
    }
    selected
}

/// Condensed profile facts for the recommendation prompt.
fn profile_summary(profile: &TasteProfile) -> BTreeMap<String, String> {
    fn joined(items: &[String]) -> String {
        if items.is_empty() {
            "none".to_string()
        } else {
            items.join(", ")
        }
    }

    let mut summary = BTreeMap::new();
    summary.insert("boost_artists".to_string(), joined(&profile.boost.artists));
    summary.insert("like_artists".to_string(), joined(&profile.like.artists));
    summary.insert("avoid_artists".to_string(), joined(&profile.avoid.artists));
    if !profile.scene_anchors.is_empty() {
        summary.insert(
            "scenes".to_string(),
            profile
                .scene_anchors
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(", "),
        );
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energy_tag_follows_weekday() {
        let monday = NaiveDate::from_ymd_opt(2025, 6, 9).unwrap();
        assert_eq!(energy_tag_for(monday), "monday");
        let sunday = NaiveDate::from_ymd_opt(2025, 6, 8).unwrap();
        assert_eq!(energy_tag_for(sunday), "sunday");
    }

    fn timed(id: &str, minutes: u64) -> TrackCandidate {
        TrackCandidate {
            duration_ms: Some(minutes * 60 * 1000),
            ..TrackCandidate::new(id, "Artist", "Song")
        }
    }

    #[test]
    fn duration_selection_fills_to_the_count_floor() {
        // The playtime target is covered after two tracks, but the count
        // floor is not, so selection keeps going.
        let tracks = vec![timed("a", 30), timed("b", 30), timed("c", 30)];
        let selected = select_for_duration(&tracks, 10, 60);
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn duration_selection_fills_to_the_playtime_floor() {
        let tracks = vec![timed("a", 30), timed("b", 30), timed("c", 30), timed("d", 30)];
        let selected = select_for_duration(&tracks, 2, 90);
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn duration_selection_stops_once_both_floors_are_met() {
        let tracks = vec![timed("a", 30), timed("b", 30), timed("c", 30)];
        let selected = select_for_duration(&tracks, 2, 60);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn zero_target_disables_the_playtime_floor() {
        let tracks = vec![timed("a", 1), timed("b", 1), timed("c", 1)];
        let selected = select_for_duration(&tracks, 2, 0);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn unknown_durations_count_for_nothing() {
        let tracks = vec![
            TrackCandidate::new("a", "Artist", "Song A"),
            TrackCandidate::new("b", "Artist", "Song B"),
        ];
        // The playtime floor can never be reached, so everything is taken.
        let selected = select_for_duration(&tracks, 1, 4);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn profile_summary_names_scenes() {
        let mut profile = TasteProfile::default();
        profile
            .scene_anchors
            .insert("britpop".to_string(), vec!["blur".to_string()]);
        profile.boost.artists.push("weezer".to_string());

        let summary = profile_summary(&profile);
        assert_eq!(summary.get("scenes").unwrap(), "britpop");
        assert_eq!(summary.get("boost_artists").unwrap(), "weezer");
        assert_eq!(summary.get("avoid_artists").unwrap(), "none");
    }
}
