//! Discovery recommendation protocol: prompt assembly, response parsing,
//! and the completion-client seam.
//!
//! This module keeps the external recommender isolated so the rest of the
//! pipeline stays deterministic and easy to test. The request builder is a
//! pure function of its inputs — identical context and parameters produce
//! byte-identical prompt text — and the parser validates the agreed JSON
//! schema before anything reaches the merge engine. Failures are typed
//! ([`RecommendError`]) so the orchestrator can downgrade them to warnings
//! instead of unwinding.

use crate::merge::merge_recommendations;
use crate::track::{RulePreferences, TrackCandidate};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

/// Normalized recommendation coming back from the completion service.
/// Only the response parser constructs these.
#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub title: String,
    pub artist: String,
    /// One-sentence free-text justification.
    pub reason: String,
    pub energy_tag: Option<String>,
    pub track_id: Option<String>,
    /// Clamped to [0, 1].
    pub confidence: f64,
}

/// Snapshot of data describing the user and the current playlist needs.
///
/// Maps are `BTreeMap` so prompt rendering iterates in a stable order.
#[derive(Debug, Clone, Default)]
pub struct RecommendationContext {
    pub user_profile: BTreeMap<String, String>,
    pub rules: BTreeMap<String, Vec<String>>,
    pub listening_history: Vec<TrackCandidate>,
    pub track_pool: Vec<TrackCandidate>,
    pub rule_preferences: Option<RulePreferences>,
}

/// Bundle returned by [`run_recommender`].
#[derive(Debug, Clone)]
pub struct RecommendationRunResult {
    pub tracks: Vec<TrackCandidate>,
    pub warnings: Vec<String>,
    /// Raw recommendations actually considered, for audit logging.
    pub recommendations: Vec<Recommendation>,
}

/// Why a recommendation pass produced no result. Consumed by the
/// orchestrator; everything except [`RecommendError::Disabled`] surfaces
/// as a run warning.
#[derive(Debug, Error)]
pub enum RecommendError {
    #[error("discovery is disabled for this run")]
    Disabled,
    #[error("completion request failed: {0}")]
    Completion(#[source] anyhow::Error),
    #[error("response was not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("response schema error: {0}")]
    Schema(String),
}

/// Seam for the external text-completion service; swapped for a scripted
/// client in tests.
pub trait CompletionClient {
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// Blocking adapter for an OpenAI-style chat completion endpoint.
pub struct HttpCompletionClient {
    endpoint: String,
    model: String,
    temperature: f64,
    system_prompt: String,
    api_key: String,
}

impl HttpCompletionClient {
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.openai.com/v1/chat/completions";
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";

    /// Reads the API key from `ROTA_API_KEY`, falling back to
    /// `OPENAI_API_KEY`. Endpoint and model can be overridden via
    /// `ROTA_COMPLETION_ENDPOINT` / `ROTA_COMPLETION_MODEL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ROTA_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .context("no completion API key set (ROTA_API_KEY or OPENAI_API_KEY)")?;
        Ok(Self {
            endpoint: std::env::var("ROTA_COMPLETION_ENDPOINT")
                .unwrap_or_else(|_| Self::DEFAULT_ENDPOINT.to_string()),
            model: std::env::var("ROTA_COMPLETION_MODEL")
                .unwrap_or_else(|_| Self::DEFAULT_MODEL.to_string()),
            temperature: 0.2,
            system_prompt: "You are a meticulous musicologist.".to_string(),
            api_key,
        })
    }
}

impl CompletionClient for HttpCompletionClient {
    fn complete(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": self.system_prompt},
                {"role": "user", "content": prompt},
            ],
        });

        let response: Value = reqwest::blocking::Client::new()
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .context("completion request failed")?
            .error_for_status()
            .context("completion endpoint returned an error status")?
            .json()
            .context("completion response was not JSON")?;

        let content = response
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(content.to_string())
    }
}

/// Builds the structured prompt sent to the completion service.
///
/// Deterministic by construction: bounded listings, stable map iteration,
/// no randomness, no side effects.
pub struct RequestBuilder<'a> {
    context: &'a RecommendationContext,
    playlist_name: &'a str,
    timezone_hint: &'a str,
    max_history_items: usize,
    max_pool_snapshot: usize,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(
        context: &'a RecommendationContext,
        playlist_name: &'a str,
        timezone_hint: &'a str,
        max_history_items: usize,
        max_pool_snapshot: usize,
    ) -> Self {
        Self {
            context,
            playlist_name,
            timezone_hint,
            max_history_items,
            max_pool_snapshot,
        }
    }

    /// Returns the full prompt, naming the exact number of discovery picks
    /// required and the JSON schema the response must match.
    pub fn build(&self, discovery_target: usize) -> String {
        let history_end = self.context.listening_history.len().min(self.max_history_items);
        let pool_end = self.context.track_pool.len().min(self.max_pool_snapshot);

        let profile_lines = self.format_profile();
        let rules_lines = self.format_rules();
        let history_lines = format_tracks(&self.context.listening_history[..history_end]);
        let pool_lines = format_tracks(&self.context.track_pool[..pool_end]);

        let schema = serde_json::to_string_pretty(&json!({
            "recommendations": [
                {
                    "title": "Song title",
                    "artist": "Artist name",
                    "energy_tag": "monday / tuesday / ... or null",
                    "track_id": "optional catalog track id string",
                    "reason": "1 short sentence",
                    "confidence": 0.0,
                }
            ]
        }))
        .unwrap_or_else(|_| r#"{"recommendations": []}"#.to_string());

        format!(
            "I need help programming a playlist called \"{name}\". Timezone: {tz}.\n\
             \n\
             Profile:\n{profile}\n\
             \n\
             Rules:\n{rules}\n\
             \n\
             Recently loved tracks:\n{history}\n\
             \n\
             Current pool snapshot:\n{pool}\n\
             \n\
             You must recommend songs that feel like a continuation of the user's \
             taste. Select exactly {target} new discovery tracks that are not \
             already in the user's history.\n\
             \n\
             Return ONLY valid JSON that matches this schema:\n{schema}",
            name = self.playlist_name,
            tz = self.timezone_hint,
            profile = profile_lines,
            rules = rules_lines,
            history = history_lines,
            pool = pool_lines,
            target = discovery_target,
            schema = schema,
        )
    }

    fn format_profile(&self) -> String {
        if self.context.user_profile.is_empty() {
            return "- (no profile provided)".to_string();
        }
        self.context
            .user_profile
            .iter()
            .map(|(key, value)| format!("- {key}: {value}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn format_rules(&self) -> String {
        let mut lines = if self.context.rules.is_empty() {
            vec!["- (no rules provided)".to_string()]
        } else {
            self.context
                .rules
                .iter()
                .map(|(rule, values)| {
                    let payload = if values.is_empty() {
                        "none".to_string()
                    } else {
                        values.join(", ")
                    };
                    format!("- {rule}: {payload}")
                })
                .collect()
        };
        if let Some(prefs) = &self.context.rule_preferences {
            lines.push(String::new());
            lines.push("Preference summary:".to_string());
            lines.extend(prefs.to_prompt_lines());
        }
        lines.join("\n")
    }
}

fn format_tracks(tracks: &[TrackCandidate]) -> String {
    if tracks.is_empty() {
        return "- none".to_string();
    }
    tracks
        .iter()
        .map(|track| match &track.energy_tag {
            Some(tag) => format!("- {} – {} [{tag}]", track.artist, track.title),
            None => format!("- {} – {}", track.artist, track.title),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Validates that the completion response matches the agreed schema.
#[derive(Debug, Default)]
pub struct ResponseParser;

impl ResponseParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses the raw assistant response into normalized recommendations.
    pub fn parse(&self, response_text: &str) -> Result<Vec<Recommendation>, RecommendError> {
        let json_text = extract_json(response_text);
        let payload: Value = serde_json::from_str(&json_text)?;

        let recs = payload
            .get("recommendations")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                RecommendError::Schema("missing 'recommendations' list".to_string())
            })?;

        recs.iter().map(parse_entry).collect()
    }
}

fn parse_entry(entry: &Value) -> Result<Recommendation, RecommendError> {
    fn required(entry: &Value, field: &str) -> Result<String, RecommendError> {
        entry
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| RecommendError::Schema(format!("missing '{field}' in entry")))
    }

    let confidence = match entry.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.5),
        Some(Value::String(s)) => s.parse().unwrap_or(0.5),
        _ => 0.5,
    }
    .clamp(0.0, 1.0);

    let energy_tag = entry
        .get("energy_tag")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);
    let track_id = entry
        .get("track_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(Recommendation {
        title: required(entry, "title")?,
        artist: required(entry, "artist")?,
        reason: required(entry, "reason")?,
        energy_tag,
        track_id,
        confidence,
    })
}

/// The service sometimes wraps JSON in ``` fences; strip those first.
fn extract_json(text: &str) -> String {
    if !text.contains("```") {
        return text.trim().to_string();
    }
    let Some(start) = text.find("```") else {
        return text.trim().to_string();
    };
    let after_fence = &text[start + 3..];
    let after_tag = after_fence.strip_prefix("json").unwrap_or(after_fence);
    match after_tag.rfind("```") {
        Some(end) => after_tag[..end].trim().to_string(),
        None => text.trim().to_string(),
    }
}

#[derive(Serialize)]
struct LoggedRecommendation<'a> {
    run_label: &'a str,
    timestamp: &'a str,
    track_id: &'a str,
    artist: &'a str,
    title: &'a str,
    energy_tag: Option<&'a str>,
    metadata: &'a BTreeMap<String, String>,
}

/// Appends the final track decisions to a JSONL audit trail, one line per
/// track, so provenance outlives the run.
pub fn log_recommendations(
    tracks: &[TrackCandidate],
    destination: &Path,
    run_label: &str,
) -> Result<()> {
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let timestamp = Utc::now().to_rfc3339();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(destination)
        .with_context(|| format!("failed to open {}", destination.display()))?;

    for track in tracks {
        let payload = LoggedRecommendation {
            run_label,
            timestamp: &timestamp,
            track_id: &track.id,
            artist: &track.artist,
            title: &track.title,
            energy_tag: track.energy_tag.as_deref(),
            metadata: &track.metadata,
        };
        let line = serde_json::to_string(&payload)?;
        writeln!(file, "{line}")?;
    }
    Ok(())
}

/// High-level prompt → completion → parse → merge flow.
///
/// A non-positive discovery ratio short-circuits with
/// [`RecommendError::Disabled`]; transport and schema failures come back
/// typed so the caller can degrade to the deterministic base selection.
#[allow(clippy::too_many_arguments)]
pub fn run_recommender(
    context: &RecommendationContext,
    base_tracks: &[TrackCandidate],
    playlist_name: &str,
    timezone_hint: &str,
    total_limit: usize,
    discovery_ratio: f64,
    client: &dyn CompletionClient,
    max_history_items: usize,
    max_pool_snapshot: usize,
) -> Result<RecommendationRunResult, RecommendError> {
    if discovery_ratio <= 0.0 {
        return Err(RecommendError::Disabled);
    }

    let builder = RequestBuilder::new(
        context,
        playlist_name,
        timezone_hint,
        max_history_items,
        max_pool_snapshot,
    );
    let discovery_target = ((total_limit as f64 * discovery_ratio).round() as usize).max(1);
    let prompt = builder.build(discovery_target);

    let raw_response = client
        .complete(&prompt)
        .map_err(RecommendError::Completion)?;
    let recommendations = ResponseParser::new().parse(&raw_response)?;

    let (tracks, warnings) = merge_recommendations(
        base_tracks,
        &context.track_pool,
        &recommendations,
        total_limit,
        discovery_ratio,
        context.rule_preferences.as_ref(),
    );

    Ok(RecommendationRunResult {
        tracks,
        warnings,
        recommendations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_context() -> RecommendationContext {
        let mut user_profile = BTreeMap::new();
        user_profile.insert("mood".to_string(), "energetic mornings".to_string());
        let mut rules = BTreeMap::new();
        rules.insert(
            "banned_artists".to_string(),
            vec!["the killers".to_string()],
        );

        RecommendationContext {
            user_profile,
            rules,
            listening_history: vec![
                TrackCandidate::new("hist1", "Artist A", "Song A"),
                TrackCandidate {
                    energy_tag: Some("monday".to_string()),
                    ..TrackCandidate::new("hist2", "Artist B", "Song B")
                },
            ],
            track_pool: vec![
                TrackCandidate::new("cand1", "Pool Artist", "Pool Song"),
                TrackCandidate::new("cand2", "Another", "Cut"),
            ],
            rule_preferences: Some(RulePreferences::new(
                vec!["the killers".to_string()],
                vec!["artist b".to_string()],
                vec!["pool artist".to_string()],
            )),
        }
    }

    #[test]
    fn request_builder_formats_prompt() {
        let context = sample_context();
        let builder = RequestBuilder::new(&context, "Daily Rotation", "UTC", 10, 12);
        let prompt = builder.build(2);

        assert!(prompt.contains("playlist called \"Daily Rotation\""));
        assert!(prompt.contains("- mood: energetic mornings"));
        assert!(prompt.contains("Select exactly 2 new discovery tracks"));
        assert!(prompt.contains("Return ONLY valid JSON"));
        assert!(prompt.contains("- Artist B – Song B [monday]"));
    }

    #[test]
    fn request_builder_is_deterministic() {
        let context = sample_context();
        let builder = RequestBuilder::new(&context, "Daily Rotation", "UTC", 10, 12);
        assert_eq!(builder.build(3), builder.build(3));
    }

    #[test]
    fn parser_strips_code_fences() {
        let response = r#"
        ```json
        {
            "recommendations": [
                {
                    "title": "Discovery",
                    "artist": "Fresh Artist",
                    "reason": "Matches upbeat vibe",
                    "track_id": "cand1",
                    "energy_tag": "FRIDAY",
                    "confidence": 0.73
                }
            ]
        }
        ```
        "#;

        let recs = ResponseParser::new().parse(response).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].artist, "Fresh Artist");
        assert!((recs[0].confidence - 0.73).abs() < 1e-9);
        assert_eq!(recs[0].energy_tag.as_deref(), Some("friday"));
    }

    #[test]
    fn parser_rejects_missing_recommendations_list() {
        let err = ResponseParser::new().parse(r#"{"picks": []}"#).unwrap_err();
        assert!(matches!(err, RecommendError::Schema(_)));
    }

    #[test]
    fn parser_rejects_entry_missing_required_field() {
        let response = r#"{"recommendations": [{"title": "X", "artist": "Y"}]}"#;
        let err = ResponseParser::new().parse(response).unwrap_err();
        assert!(matches!(err, RecommendError::Schema(ref msg) if msg.contains("reason")));
    }

    #[test]
    fn parser_clamps_out_of_range_confidence() {
        let response = r#"{"recommendations": [
            {"title": "X", "artist": "Y", "reason": "Z", "confidence": 1.7}
        ]}"#;
        let recs = ResponseParser::new().parse(response).unwrap();
        assert_eq!(recs[0].confidence, 1.0);
    }

    #[test]
    fn parser_defaults_absent_optionals_to_none() {
        let response = r#"{"recommendations": [
            {"title": "X", "artist": "Y", "reason": "Z"}
        ]}"#;
        let recs = ResponseParser::new().parse(response).unwrap();
        assert_eq!(recs[0].energy_tag, None);
        assert_eq!(recs[0].track_id, None);
        assert_eq!(recs[0].confidence, 0.5);
    }

    #[test]
    fn log_recommendations_appends_one_line_per_track() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("history.jsonl");
        let tracks =
            vec![TrackCandidate::new("track1", "Artist", "Song").with_metadata("rec_reason", "test")];

        log_recommendations(&tracks, &path, "unit-test").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.trim().lines().collect();
        assert_eq!(lines.len(), 1);
        let payload: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(payload["track_id"], "track1");
        assert_eq!(payload["run_label"], "unit-test");
    }

    struct ScriptedClient {
        payload: String,
    }

    impl CompletionClient for ScriptedClient {
        fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.payload.clone())
        }
    }

    #[test]
    fn run_recommender_full_flow() {
        let context = sample_context();
        let base = context.track_pool.clone();
        let client = ScriptedClient {
            payload: r#"{"recommendations": [
                {"title": "Pool Song", "artist": "Pool Artist", "track_id": "cand1",
                 "reason": "Still fresh", "confidence": 0.9}
            ]}"#
            .to_string(),
        };

        let result = run_recommender(
            &context,
            &base,
            "Daily Rotation",
            "UTC",
            2,
            0.5,
            &client,
            10,
            12,
        )
        .unwrap();

        assert_eq!(result.tracks.len(), 2);
        assert_eq!(result.recommendations.len(), 1);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn run_recommender_disabled_for_zero_ratio() {
        let context = sample_context();
        let client = ScriptedClient {
            payload: String::new(),
        };
        let err =
            run_recommender(&context, &[], "Daily Rotation", "UTC", 2, 0.0, &client, 10, 12)
                .unwrap_err();
        assert!(matches!(err, RecommendError::Disabled));
    }
}
