//! Feedback event log and derived state.
//!
//! Feedback lives in an append-only JSON-lines file. Nothing mutates the
//! derived state directly: new events are appended, and [`load_state`]
//! replays the full log from the top on each invocation. Replay is
//! idempotent and order-sensitive — later events overwrite earlier derived
//! values for the same key.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// One line of the feedback log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedbackEvent {
    /// A playlist was generated; records what was picked and when.
    Generated {
        timestamp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        energy_tag: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        discovery_ratio: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        candidate_count: Option<usize>,
        /// Track URIs; the id is taken after the final `:`.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        picks: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        track_ids: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        artists: Vec<String>,
    },
    /// The user explicitly liked a track.
    LikeTrack {
        timestamp: String,
        track_uri: String,
        artist: String,
    },
    /// An artist crossed the like threshold and was promoted automatically.
    BoostArtistAuto {
        timestamp: String,
        artist: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<u32>,
    },
}

/// Read-mostly snapshot derived by replaying the event log.
#[derive(Debug, Clone, Default)]
pub struct FeedbackState {
    pub artist_last_seen: HashMap<String, DateTime<Utc>>,
    pub track_last_seen: HashMap<String, DateTime<Utc>>,
    /// Lower-cased liked track URIs/ids.
    pub liked_tracks: HashSet<String>,
    pub liked_by_artist: HashMap<String, u32>,
    pub learned_boost_artists: HashSet<String>,
}

impl FeedbackState {
    pub fn liked_count(&self, artist: &str) -> u32 {
        self.liked_by_artist
            .get(&artist.to_lowercase())
            .copied()
            .unwrap_or(0)
    }
}

/// Accepts RFC 3339 as written by this crate, plus bare ISO timestamps
/// from older logs.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Replays the event log into a [`FeedbackState`].
///
/// A missing file produces an empty-but-well-typed state. Lines that fail
/// to parse, or that carry an unreadable timestamp, are skipped. After
/// replay, any artist whose liked count reached `artist_like_threshold` is
/// added to the learned-boost set even without an explicit boost event.
pub fn load_state(path: &Path, artist_like_threshold: u32) -> FeedbackState {
    let mut state = FeedbackState::default();
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(_) => return state,
    };

    for line in BufReader::new(file).lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<FeedbackEvent>(&line) else {
            continue;
        };
        apply_event(&mut state, &event);
    }

    for (artist, count) in &state.liked_by_artist {
        if *count >= artist_like_threshold {
            state.learned_boost_artists.insert(artist.clone());
        }
    }

    state
}

fn apply_event(state: &mut FeedbackState, event: &FeedbackEvent) {
    match event {
        FeedbackEvent::Generated {
            timestamp,
            picks,
            track_ids,
            artists,
            ..
        } => {
            let Some(ts) = parse_timestamp(timestamp) else {
                return;
            };
            for pick in picks {
                let id = pick.rsplit(':').next().unwrap_or(pick).to_lowercase();
                state.track_last_seen.insert(id, ts);
            }
            for id in track_ids {
                state.track_last_seen.insert(id.to_lowercase(), ts);
            }
            for artist in artists {
                state.artist_last_seen.insert(artist.to_lowercase(), ts);
            }
        }
        FeedbackEvent::LikeTrack {
            track_uri, artist, ..
        } => {
            if !track_uri.is_empty() {
                state.liked_tracks.insert(track_uri.to_lowercase());
            }
            if !artist.is_empty() {
                *state
                    .liked_by_artist
                    .entry(artist.to_lowercase())
                    .or_insert(0) += 1;
            }
        }
        FeedbackEvent::BoostArtistAuto { artist, .. } => {
            if !artist.is_empty() {
                state.learned_boost_artists.insert(artist.to_lowercase());
            }
        }
    }
}

/// Appends one event as a JSON line, creating parent directories as needed.
pub fn append_event(path: &Path, event: &FeedbackEvent) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open feedback log {}", path.display()))?;
    let line = serde_json::to_string(event)?;
    writeln!(file, "{line}")
        .with_context(|| format!("failed to append to feedback log {}", path.display()))?;
    Ok(())
}

pub fn record_generated_event(
    path: &Path,
    picks: &[String],
    artists: &[String],
    energy_tag: &str,
    discovery_ratio: f64,
    candidate_count: usize,
) -> Result<()> {
    append_event(
        path,
        &FeedbackEvent::Generated {
            timestamp: Utc::now().to_rfc3339(),
            energy_tag: Some(energy_tag.to_string()),
            discovery_ratio: Some(discovery_ratio),
            candidate_count: Some(candidate_count),
            picks: picks.to_vec(),
            track_ids: Vec::new(),
            artists: artists.to_vec(),
        },
    )
}

pub fn record_like_event(path: &Path, track_uri: &str, artist: &str) -> Result<()> {
    append_event(
        path,
        &FeedbackEvent::LikeTrack {
            timestamp: Utc::now().to_rfc3339(),
            track_uri: track_uri.to_string(),
            artist: artist.to_string(),
        },
    )
}

pub fn record_boost_artist_event(path: &Path, artist: &str, count: u32) -> Result<()> {
    append_event(
        path,
        &FeedbackEvent::BoostArtistAuto {
            timestamp: Utc::now().to_rfc3339(),
            artist: artist.to_string(),
            reason: Some("like_threshold".to_string()),
            count: Some(count),
        },
    )
}
