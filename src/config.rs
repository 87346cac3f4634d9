//! # Configuration Module
//!
//! Runtime settings, the rules document, and filesystem path resolution.
//!
//! ## Data Storage
//!
//! Rota keeps its files in a single home directory:
//! - Linux: `~/.local/share/rota/`
//! - macOS: `~/Library/Application Support/rota/`
//! - Windows: `%APPDATA%\rota\`
//!
//! The home can be overridden with the `ROTA_HOME` environment variable,
//! and an existing legacy `~/.rota` directory is honored so upgrades keep
//! their data. Resolution order is explicit and testable: override, then
//! legacy (only if it already exists), then the platform default.
//!
//! ## Documents
//!
//! Two user documents live in the home: `settings.yaml` (runtime knobs)
//! and `rules.yaml` (artist lists fed to the recommender). Both fail soft
//! on missing or malformed content so a refresh never dies on config.

use crate::track::RulePreferences;
use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the home directory outright.
pub const HOME_ENV_VAR: &str = "ROTA_HOME";

/// Runtime knobs, loaded from `settings.yaml`. Every field has a default,
/// so a partial document overrides only what it names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub playlist_name: String,
    /// Free-text hint passed to the recommender, not parsed.
    pub timezone_hint: String,
    pub tracks_per_day: usize,
    pub target_duration_minutes: u64,
    /// Days before a track may reappear: excludes recent catalog plays
    /// and recent playlist placements from the pool.
    pub no_repeat_days: i64,
    pub discovery_ratio: f64,
    pub enable_discovery: bool,
    /// Bounds on the prompt sections, keeping requests small.
    pub max_history_items: usize,
    pub max_pool_snapshot: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            playlist_name: "Daily Rotation".to_string(),
            timezone_hint: "local time".to_string(),
            tracks_per_day: 60,
            target_duration_minutes: 360,
            no_repeat_days: 14,
            discovery_ratio: 0.3,
            enable_discovery: true,
            max_history_items: 10,
            max_pool_snapshot: 12,
        }
    }
}

impl Settings {
    /// Loads settings, falling back to defaults on a missing file and
    /// logging a warning (still falling back) on a malformed one.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str(&content) {
                Ok(settings) => settings,
                Err(err) => {
                    warn!("could not parse settings {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}

/// Artist rule lists from `rules.yaml`. Unknown list-valued keys are kept
/// in `extra` and forwarded to the recommender verbatim, so users can add
/// their own rule categories without a schema change.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RulesConfig {
    pub banned_artists: Vec<String>,
    pub reduce_frequency_artists: Vec<String>,
    pub increase_weight_artists: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Vec<String>>,
}

impl RulesConfig {
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str(&content) {
                Ok(rules) => rules,
                Err(err) => {
                    warn!("could not parse rules {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn to_rule_preferences(&self) -> RulePreferences {
        RulePreferences::new(
            self.banned_artists.iter().cloned(),
            self.reduce_frequency_artists.iter().cloned(),
            self.increase_weight_artists.iter().cloned(),
        )
    }

    /// All rule lists, named, for the recommendation prompt.
    pub fn prompt_rules(&self) -> BTreeMap<String, Vec<String>> {
        let mut rules = self.extra.clone();
        rules.insert("banned_artists".to_string(), self.banned_artists.clone());
        rules.insert(
            "reduce_frequency_artists".to_string(),
            self.reduce_frequency_artists.clone(),
        );
        rules.insert(
            "increase_weight_artists".to_string(),
            self.increase_weight_artists.clone(),
        );
        rules
    }
}

/// Resolves the home directory given an override, a legacy candidate, a
/// platform default, and an existence probe. Pure so the policy is
/// testable without touching the real filesystem.
///
/// Order: explicit override always wins (even if it does not exist yet);
/// the legacy location is used only when it already exists; otherwise the
/// platform default.
pub fn resolve_home(
    override_dir: Option<PathBuf>,
    legacy_dir: &Path,
    default_dir: &Path,
    exists: impl Fn(&Path) -> bool,
) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir;
    }
    if exists(legacy_dir) {
        return legacy_dir.to_path_buf();
    }
    default_dir.to_path_buf()
}

/// Resolved locations of everything Rota keeps on disk.
#[derive(Debug, Clone)]
pub struct Paths {
    pub home: PathBuf,
    pub db_path: PathBuf,
    pub settings_path: PathBuf,
    pub rules_path: PathBuf,
    pub profile_path: PathBuf,
    pub feedback_log: PathBuf,
    pub history_log: PathBuf,
    pub playlist_file: PathBuf,
}

impl Paths {
    /// Lays out the standard file names under `home`.
    pub fn under(home: PathBuf) -> Self {
        Self {
            db_path: home.join("catalog.db"),
            settings_path: home.join("settings.yaml"),
            rules_path: home.join("rules.yaml"),
            profile_path: home.join("taste_profile.yaml"),
            feedback_log: home.join("feedback.jsonl"),
            history_log: home.join("recommendation_history.jsonl"),
            playlist_file: home.join("playlist.json"),
            home,
        }
    }

    /// Resolves against the real environment and ensures the home exists.
    pub fn discover() -> Result<Self> {
        let override_dir = std::env::var_os(HOME_ENV_VAR).map(PathBuf::from);
        let legacy_dir = dirs::home_dir()
            .map(|home| home.join(".rota"))
            .unwrap_or_else(|| PathBuf::from(".rota"));
        let default_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("could not determine system data directory"))?
            .join("rota");

        let home = resolve_home(override_dir, &legacy_dir, &default_dir, |p| p.is_dir());
        fs::create_dir_all(&home)
            .with_context(|| format!("failed to create home directory {}", home.display()))?;
        Ok(Self::under(home))
    }
}
