//! Daily playlist curation with taste rules, cooldowns and discovery
//! blending.
//!
//! Core modules:
//! - [`scoring`] - Additive preference scoring and constraint filtering
//! - [`merge`] - Blending discovery recommendations into the base selection
//! - [`recommend`] - Recommendation protocol (prompt, parse, client seam)
//! - [`refresh`] - The daily refresh orchestration
//! - [`db`] - SQLite catalog store and run history
//!
//! ### Supporting Modules
//!
//! - [`track`] - Shared domain types
//! - [`profile`] - The typed taste profile document
//! - [`feedback`] - Append-only feedback event log and derived state
//! - [`provider`] - Playlist destinations with batched pushes
//! - [`config`] - Settings, rules, and home directory resolution
//! - [`cli`] - Command-line interface definitions with clap integration
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use rota::config::{Paths, RulesConfig, Settings};
//! use rota::db::CatalogStore;
//! use rota::profile::load_taste_profile;
//! use rota::provider::JsonPlaylist;
//! use rota::refresh::run_refresh;
//! use chrono::{Local, Utc};
//!
//! let paths = Paths::discover()?;
//! let settings = Settings::load(&paths.settings_path);
//! let profile = load_taste_profile(&paths.profile_path);
//! let rules = RulesConfig::load(&paths.rules_path);
//!
//! let mut store = CatalogStore::open(&paths.db_path)?;
//! store.init_schema()?;
//! let mut playlist = JsonPlaylist::open(&paths.playlist_file, &settings.playlist_name)?;
//!
//! let outcome = run_refresh(
//!     &mut store,
//!     &mut playlist,
//!     None, // no discovery client: deterministic selection only
//!     &settings,
//!     &profile,
//!     &rules,
//!     &paths.feedback_log,
//!     &paths.history_log,
//!     Local::now().date_naive(),
//!     Utc::now(),
//! )?;
//! println!("{} tracks pushed", outcome.tracks.len());
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Selection Pipeline
//!
//! A refresh walks candidates through layers of decreasing severity:
//!
//! 1. **Hard bans** - absolute exclusions from the taste profile, plus
//!    track and artist bans learned from manual playlist removals
//! 2. **Artist rules** - fragment-matched bans and probabilistic
//!    reduce-frequency drops
//! 3. **Scoring** - additive weights for boosted, liked and avoided names,
//!    scene-anchor groups, recency penalties, and learned feedback
//! 4. **Constraints** - per-artist caps, track and artist cooldowns,
//!    optional title-variant dedupe
//! 5. **Discovery merge** - recommendations from a completion service,
//!    matched against the pool and capped by the discovery ratio
//!
//! ## Feedback Loop
//!
//! Likes and generated playlists are appended to a JSON-lines event log
//! and replayed into derived state on each run. Artists that collect
//! enough likes get a standing score bonus; tracks removed from the
//! playlist by hand become bans, and repeated removals of one artist ban
//! the artist outright.
//!
//! ## Error Handling
//!
//! Public functions return `Result<T, anyhow::Error>`. Configuration
//! failures degrade to defaults with a logged warning; a failing discovery
//! service degrades to the deterministic selection with a warning in the
//! outcome. Only an empty catalog or an unusable playlist destination
//! abort a refresh.

pub mod cli;
pub mod config;
pub mod db;
pub mod feedback;
pub mod merge;
pub mod profile;
pub mod provider;
pub mod recommend;
pub mod refresh;
pub mod scoring;
pub mod track;
