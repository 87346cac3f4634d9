//! Scoring and constraint engine.
//!
//! Three layers, applied in order of severity:
//!
//! 1. **Hard bans** — absolute exclusion, checked before any scoring.
//! 2. **Artist rules** — fragment-matched bans plus probabilistic
//!    reduce-frequency drops.
//! 3. **Scoring + constraints** — additive preference score, then a
//!    single-pass greedy filter for artist caps, cooldowns, and optional
//!    title dedupe.
//!
//! All fragment matches are case-insensitive substring tests on normalized
//! text. Scores are unbounded; ties keep the caller's input order.

use crate::feedback::FeedbackState;
use crate::profile::{fragment_matches, normalize_text, TasteProfile};
use crate::track::TrackCandidate;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::{HashMap, HashSet};

/// True iff a normalized substring match exists between the track's artist
/// or title and the profile's hard-ban lists. Hard bans cannot be
/// overridden by boosts.
pub fn is_hard_banned(artist: &str, title: &str, profile: &TasteProfile) -> bool {
    fragment_matches(artist, &profile.hard_bans.artists)
        || fragment_matches(title, &profile.hard_bans.tracks)
}

/// Additive preference score for one candidate.
///
/// Composed of boost/like/avoid fragment hits (each at its configured
/// weight), a discourage-list penalty, a partial scene-anchor boost, recency
/// penalties, a long-no-play bonus, and fixed bonuses for learned-boost
/// artists and liked tracks.
pub fn score_track(
    track: &TrackCandidate,
    profile: &TasteProfile,
    state: &FeedbackState,
    now: DateTime<Utc>,
) -> f64 {
    let weights = &profile.scoring;
    let mut score = 0.0;

    if fragment_matches(&track.artist, &profile.boost.artists) {
        score += weights.boost_weight;
    }
    if fragment_matches(&track.title, &profile.boost.tracks) {
        score += weights.boost_weight;
    }
    if fragment_matches(&track.artist, &profile.like.artists) {
        score += weights.like_weight;
    }
    if fragment_matches(&track.title, &profile.like.tracks) {
        score += weights.like_weight;
    }
    if fragment_matches(&track.artist, &profile.avoid.artists) {
        score += weights.avoid_weight;
    }
    if fragment_matches(&track.title, &profile.avoid.tracks) {
        score += weights.avoid_weight;
    }

    if fragment_matches(&track.artist, &profile.discovery.discourage_artists) {
        score += weights.avoid_weight;
    }

    for group in profile.scene_anchors.values() {
        if fragment_matches(&track.artist, group) {
            score += weights.boost_weight * weights.anchor_factor;
            break;
        }
    }

    let recent = &weights.recent_play_penalty;
    let long_gap = &weights.long_time_no_play_bonus;
    if let Some(last) = state.artist_last_seen.get(&track.artist.to_lowercase()) {
        if (now - *last).num_days() <= recent.within_days {
            score += recent.penalty;
        }
    }
    if let Some(last) = state.track_last_seen.get(&track.id.to_lowercase()) {
        let days = (now - *last).num_days();
        if days <= recent.within_days {
            score += recent.penalty;
        }
        if days >= long_gap.after_days {
            score += long_gap.bonus;
        }
    }

    if state
        .learned_boost_artists
        .contains(&track.artist.to_lowercase())
    {
        score += weights.learned_boost_bonus;
    }
    let id_lower = track.id.to_lowercase();
    if state.liked_tracks.contains(&id_lower)
        || state.liked_tracks.contains(&format!("track:{id_lower}"))
    {
        score += weights.liked_track_bonus;
    }

    score
}

/// One-pass greedy constraint filter.
///
/// Walks the input left to right, rejecting tracks whose artist already
/// filled its per-artist quota in the output so far, tracks or artists
/// still inside their cooldown window, and (optionally) repeated normalized
/// titles. No backtracking; callers pre-sort, shuffle, or score first.
pub fn apply_constraints(
    tracks: &[TrackCandidate],
    profile: &TasteProfile,
    state: &FeedbackState,
    now: DateTime<Utc>,
) -> Vec<TrackCandidate> {
    let constraints = &profile.constraints;
    let mut artist_counts: HashMap<String, u32> = HashMap::new();
    let mut seen_titles: HashSet<String> = HashSet::new();
    let mut filtered = Vec::new();

    for track in tracks {
        let artist_key = track.artist.to_lowercase();
        if artist_counts.get(&artist_key).copied().unwrap_or(0)
            >= constraints.max_tracks_per_artist
        {
            continue;
        }

        if let Some(last) = state.track_last_seen.get(&track.id.to_lowercase()) {
            if now - *last < Duration::days(constraints.cooldown_days_same_track) {
                continue;
            }
        }
        if let Some(last) = state.artist_last_seen.get(&artist_key) {
            if now - *last < Duration::days(constraints.cooldown_days_same_artist) {
                continue;
            }
        }

        if constraints.dedupe_title_variants {
            let norm_title = normalize_text(&track.title);
            if !seen_titles.insert(norm_title) {
                continue;
            }
        }

        *artist_counts.entry(artist_key).or_insert(0) += 1;
        filtered.push(track.clone());
    }

    filtered
}

/// Artist-level eligibility rules, evaluated per candidate during pool
/// construction. Banned artists (configured and dynamically learned alike)
/// are excluded on fragment match; reduce-frequency artists are dropped
/// probabilistically so they thin out without disappearing.
#[derive(Debug, Clone, Default)]
pub struct ArtistRules {
    pub banned: Vec<String>,
    pub reduce_frequency: Vec<String>,
    /// Drop probability per reduce-frequency occurrence.
    pub reduce_bias: f64,
}

impl ArtistRules {
    pub fn new(banned: Vec<String>, reduce_frequency: Vec<String>, reduce_bias: f64) -> Self {
        Self {
            banned: banned.into_iter().map(|a| a.to_lowercase()).collect(),
            reduce_frequency: reduce_frequency
                .into_iter()
                .map(|a| a.to_lowercase())
                .collect(),
            reduce_bias,
        }
    }

    /// Unions dynamically learned bans (e.g. repeated manual removals) into
    /// the exclusion set. They are evaluated with the same fragment rule as
    /// configured bans.
    pub fn with_dynamic_bans(mut self, artists: impl IntoIterator<Item = String>) -> Self {
        self.banned
            .extend(artists.into_iter().map(|a| a.to_lowercase()));
        self
    }

    /// Whether the track passes id/recency and artist rules.
    pub fn allows(
        &self,
        track: &TrackCandidate,
        recent_ids: &HashSet<String>,
        rng: &mut impl Rng,
    ) -> bool {
        // Recent-id sets are lower-cased at the source.
        if track.id.is_empty() || recent_ids.contains(&track.id.to_lowercase()) {
            return false;
        }
        let artist_lower = track.artist.to_lowercase();
        if self
            .banned
            .iter()
            .any(|b| !b.is_empty() && artist_lower.contains(b))
        {
            return false;
        }
        if self
            .reduce_frequency
            .iter()
            .any(|r| !r.is_empty() && artist_lower.contains(r))
            && rng.gen::<f64>() < self.reduce_bias
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn profile_with_hard_ban() -> TasteProfile {
        let mut profile = TasteProfile::default();
        profile
            .hard_bans
            .artists
            .push("florence and the machine".to_string());
        profile
    }

    #[test]
    fn hard_ban_matches_normalized_artist() {
        let profile = profile_with_hard_ban();
        assert!(is_hard_banned(
            "Florence + The Machine",
            "Dog Days Are Over",
            &profile
        ));
        assert!(!is_hard_banned("Weezer", "Buddy Holly", &profile));
    }

    #[test]
    fn score_rewards_boosted_artist() {
        let mut profile = TasteProfile::default();
        profile.boost.artists.push("weezer".to_string());
        let track = TrackCandidate::new("t1", "Weezer", "Song");
        let score = score_track(&track, &profile, &FeedbackState::default(), Utc::now());
        assert!(score > 0.0, "boosted artist should score positive");
    }

    #[test]
    fn score_penalizes_recent_artist() {
        let profile = TasteProfile::default();
        let now = Utc::now();
        let mut state = FeedbackState::default();
        state
            .artist_last_seen
            .insert("weezer".to_string(), now - Duration::days(2));

        let track = TrackCandidate::new("t1", "Weezer", "Song");
        let score = score_track(&track, &profile, &state, now);
        assert_eq!(score, profile.scoring.recent_play_penalty.penalty);
    }

    #[test]
    fn score_adds_liked_track_bonus() {
        let profile = TasteProfile::default();
        let mut state = FeedbackState::default();
        state.liked_tracks.insert("track:t1".to_string());

        let track = TrackCandidate::new("T1", "Someone", "Song");
        let score = score_track(&track, &profile, &state, Utc::now());
        assert_eq!(score, profile.scoring.liked_track_bonus);
    }

    #[test]
    fn scene_anchor_gives_partial_boost() {
        let mut profile = TasteProfile::default();
        profile
            .scene_anchors
            .insert("britpop".to_string(), vec!["blur".to_string()]);

        let track = TrackCandidate::new("t1", "Blur", "Song 2");
        let score = score_track(&track, &profile, &FeedbackState::default(), Utc::now());
        assert_eq!(
            score,
            profile.scoring.boost_weight * profile.scoring.anchor_factor
        );
    }

    #[test]
    fn constraints_cap_tracks_per_artist() {
        let mut profile = TasteProfile::default();
        profile.constraints.max_tracks_per_artist = 1;
        let tracks = vec![
            TrackCandidate::new("t1", "Weezer", "Song1"),
            TrackCandidate::new("t2", "Weezer", "Song2"),
            TrackCandidate::new("t3", "Other", "Song3"),
        ];

        let filtered = apply_constraints(&tracks, &profile, &FeedbackState::default(), Utc::now());
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].id, "t1");
        assert_eq!(filtered[1].artist, "Other");
    }

    #[test]
    fn constraints_block_artist_inside_cooldown() {
        let mut profile = TasteProfile::default();
        profile.constraints.cooldown_days_same_artist = 10;
        let now = Utc::now();
        let mut state = FeedbackState::default();
        state
            .artist_last_seen
            .insert("weezer".to_string(), now - Duration::days(1));

        let tracks = vec![TrackCandidate::new("t1", "Weezer", "Song1")];
        let filtered = apply_constraints(&tracks, &profile, &state, now);
        assert!(filtered.is_empty());
    }

    #[test]
    fn constraints_dedupe_title_variants_when_enabled() {
        let mut profile = TasteProfile::default();
        profile.constraints.dedupe_title_variants = true;
        let tracks = vec![
            TrackCandidate::new("t1", "A", "Golden Hour"),
            TrackCandidate::new("t2", "B", "Golden  Hour!"),
        ];

        let filtered = apply_constraints(&tracks, &profile, &FeedbackState::default(), Utc::now());
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn artist_rules_exclude_banned_fragment() {
        let rules = ArtistRules::new(vec!["killers".to_string()], vec![], 0.66);
        let mut rng = StepRng::new(0, 0);
        let track = TrackCandidate::new("t1", "The Killers", "Mr. Brightside");
        assert!(!rules.allows(&track, &HashSet::new(), &mut rng));
    }

    #[test]
    fn artist_rules_respect_recent_ids() {
        let rules = ArtistRules::default();
        let mut rng = StepRng::new(0, 0);
        let track = TrackCandidate::new("t1", "Anyone", "Anything");
        let recent: HashSet<String> = ["t1".to_string()].into_iter().collect();
        assert!(!rules.allows(&track, &recent, &mut rng));
    }

    #[test]
    fn reduce_frequency_drop_follows_bias() {
        let rules = ArtistRules::new(vec![], vec!["arctic monkeys".to_string()], 1.0);
        let mut rng = StepRng::new(0, 0); // always yields 0.0 < 1.0
        let track = TrackCandidate::new("t1", "Arctic Monkeys", "505");
        assert!(!rules.allows(&track, &HashSet::new(), &mut rng));

        let never = ArtistRules::new(vec![], vec!["arctic monkeys".to_string()], 0.0);
        assert!(never.allows(&track, &HashSet::new(), &mut rng));
    }

    #[test]
    fn dynamic_bans_join_the_exclusion_set() {
        let rules = ArtistRules::default().with_dynamic_bans(vec!["Oasis".to_string()]);
        let mut rng = StepRng::new(0, 0);
        let track = TrackCandidate::new("t1", "Oasis", "Wonderwall");
        assert!(!rules.allows(&track, &HashSet::new(), &mut rng));
    }
}
