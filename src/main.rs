//! # Rota - Daily Playlist Curator
//!
//! Rota rebuilds a daily playlist from a local track catalog: it scores
//! candidates against a taste profile, enforces repetition constraints and
//! cooldowns, learns from likes and manual removals, and optionally blends
//! in discovery picks from a completion service.
//!
//! ## Architecture
//!
//! - `cli`: Command-line interface definitions
//! - `config`: Settings, rules, and home directory resolution
//! - `db`: SQLite catalog store and run history
//! - `profile` / `scoring`: Taste profile and the scoring engine
//! - `feedback`: Append-only feedback event log
//! - `recommend` / `merge`: Discovery protocol and merge engine
//! - `provider`: Playlist destinations
//! - `refresh`: The daily orchestration
//!
//! ## Usage
//!
//! ```bash
//! # One-time setup
//! rota init-db
//!
//! # Daily (e.g. from cron)
//! rota refresh
//!
//! # Feedback
//! rota like track:abc123 --artist "Weezer"
//! ```

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::Parser;
use log::{info, warn};
use rota::cli::{Args, Command};
use rota::config::{Paths, RulesConfig, Settings};
use rota::db::CatalogStore;
use rota::feedback::{self, load_state};
use rota::profile::load_taste_profile;
use rota::provider::JsonPlaylist;
use rota::recommend::{
    run_recommender, CompletionClient, HttpCompletionClient, RecommendationContext,
};
use rota::refresh::{energy_tag_for, run_refresh, RefreshOutcome};
use rota::track::TrackCandidate;

/// Main entry point for the Rota application.
///
/// Initializes logging, parses command-line arguments, and routes commands
/// to the appropriate module functions.
///
/// # Logging
///
/// Environment logger, controlled via `RUST_LOG`:
/// - `RUST_LOG=debug rota refresh` - Enable debug logging
/// - `RUST_LOG=rota::refresh=trace rota refresh` - Module-specific logging
fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let paths = Paths::discover()?;

    match args.command {
        Command::InitDb { force } => {
            if force && paths.db_path.exists() {
                std::fs::remove_file(&paths.db_path).with_context(|| {
                    format!("could not remove database {}", paths.db_path.display())
                })?;
                info!("removed existing database");
            }
            let mut store = CatalogStore::open(&paths.db_path)?;
            store.init_schema()?;
            println!("Catalog database ready at {}", paths.db_path.display());
        }

        Command::Refresh => {
            let settings = Settings::load(&paths.settings_path);
            let profile = load_taste_profile(&paths.profile_path);
            let rules = RulesConfig::load(&paths.rules_path);

            let mut store = CatalogStore::open(&paths.db_path)?;
            store.init_schema()?;
            let mut playlist = JsonPlaylist::open(&paths.playlist_file, &settings.playlist_name)?;

            let client = match HttpCompletionClient::from_env() {
                Ok(client) => Some(client),
                Err(err) => {
                    warn!("discovery disabled: {err}");
                    None
                }
            };

            let outcome = run_refresh(
                &mut store,
                &mut playlist,
                client.as_ref().map(|c| c as &dyn CompletionClient),
                &settings,
                &profile,
                &rules,
                &paths.feedback_log,
                &paths.history_log,
                Local::now().date_naive(),
                Utc::now(),
            )?;
            print_outcome(&outcome);
        }

        Command::Recommend {
            energy_tag,
            limit,
            discovery_ratio,
            history_limit,
        } => {
            let settings = Settings::load(&paths.settings_path);
            let rules = RulesConfig::load(&paths.rules_path);
            let mut store = CatalogStore::open(&paths.db_path)?;
            store.init_schema()?;

            let tag = energy_tag.unwrap_or_else(|| energy_tag_for(Local::now().date_naive()));
            let client = HttpCompletionClient::from_env()
                .context("the recommend command needs a completion API key")?;

            let context = RecommendationContext {
                user_profile: Default::default(),
                rules: rules.prompt_rules(),
                listening_history: store.recent_history(history_limit)?,
                track_pool: store.candidate_tracks(&tag)?,
                rule_preferences: Some(rules.to_rule_preferences()),
            };
            let result = run_recommender(
                &context,
                &[],
                &settings.playlist_name,
                &settings.timezone_hint,
                limit,
                discovery_ratio,
                &client,
                settings.max_history_items,
                settings.max_pool_snapshot,
            )?;

            println!("Recommendations for {tag}:");
            for track in &result.tracks {
                print_track(track);
            }
            for warning in &result.warnings {
                println!("warning: {warning}");
            }
        }

        Command::Like { track_id, artist } => {
            feedback::record_like_event(&paths.feedback_log, &track_id, &artist)?;
            println!("Liked {track_id}");

            if !artist.is_empty() {
                let profile = load_taste_profile(&paths.profile_path);
                let threshold = profile.learning.artist_like_threshold;
                let state = load_state(&paths.feedback_log, threshold);
                // Fire the promotion event exactly once, when the
                // threshold is crossed.
                if state.liked_count(&artist) == threshold {
                    feedback::record_boost_artist_event(&paths.feedback_log, &artist, threshold)?;
                    println!("{artist} promoted to learned boosts ({threshold} likes)");
                }
            }
        }

        Command::Doctor => {
            let exists = |p: &std::path::Path| if p.exists() { "ok" } else { "missing" };
            println!("home:          {} ({})", paths.home.display(), exists(&paths.home));
            println!("database:      {} ({})", paths.db_path.display(), exists(&paths.db_path));
            println!("settings:      {} ({})", paths.settings_path.display(), exists(&paths.settings_path));
            println!("taste profile: {} ({})", paths.profile_path.display(), exists(&paths.profile_path));
            println!("rules:         {} ({})", paths.rules_path.display(), exists(&paths.rules_path));
            println!("feedback log:  {} ({})", paths.feedback_log.display(), exists(&paths.feedback_log));
            println!("playlist:      {} ({})", paths.playlist_file.display(), exists(&paths.playlist_file));
            let key_status = match HttpCompletionClient::from_env() {
                Ok(_) => "configured",
                Err(_) => "not configured (discovery disabled)",
            };
            println!("completion API key: {key_status}");
        }
    }

    Ok(())
}

fn print_outcome(outcome: &RefreshOutcome) {
    println!(
        "Refreshed {} ({} tracks):",
        outcome.run_label,
        outcome.tracks.len()
    );
    for track in outcome.tracks.iter().take(10) {
        print_track(track);
    }
    if outcome.tracks.len() > 10 {
        println!("  ... and {} more", outcome.tracks.len() - 10);
    }
    for warning in &outcome.warnings {
        println!("warning: {warning}");
    }
}

fn print_track(track: &TrackCandidate) {
    match track.meta("rec_reason") {
        Some(reason) => println!("  {} – {} ({reason})", track.artist, track.title),
        None => println!("  {} – {}", track.artist, track.title),
    }
}
