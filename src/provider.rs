//! Playlist provider abstraction and batched push logic.
//!
//! The refresh pipeline ends by handing an ordered id list to a provider.
//! Providers are dumb: replace, append, report. All batching policy lives
//! in [`push_items`] so every backend gets the same ≤100-id chunking.

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Providers reject larger batches, so pushes are chunked to this size.
pub const BATCH_LIMIT: usize = 100;

/// Destination for the finished playlist.
pub trait PlaylistProvider {
    /// Ordered ids currently in the playlist.
    fn current_items(&self) -> Result<Vec<String>>;
    /// Replaces the whole playlist with `ids` (at most [`BATCH_LIMIT`]).
    fn replace_items(&mut self, ids: &[String]) -> Result<()>;
    /// Appends `ids` to the end (at most [`BATCH_LIMIT`]).
    fn add_items(&mut self, ids: &[String]) -> Result<()>;
}

/// Pushes an ordered id list of any length: the first chunk replaces the
/// playlist (clearing yesterday's content even when `ids` is short), and
/// remaining chunks append in order.
pub fn push_items(provider: &mut dyn PlaylistProvider, ids: &[String]) -> Result<()> {
    let first_end = ids.len().min(BATCH_LIMIT);
    provider
        .replace_items(&ids[..first_end])
        .context("could not replace playlist contents")?;

    for chunk in ids[first_end..].chunks(BATCH_LIMIT) {
        provider
            .add_items(chunk)
            .context("could not append playlist batch")?;
    }
    debug!("pushed {} items to provider", ids.len());
    Ok(())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PlaylistDocument {
    name: String,
    items: Vec<String>,
}

/// File-backed provider: the playlist is a JSON document on disk. Useful
/// for local use and as the default backend for the CLI.
pub struct JsonPlaylist {
    path: PathBuf,
    document: PlaylistDocument,
}

impl JsonPlaylist {
    /// Opens the playlist file, creating an empty document if absent.
    pub fn open(path: &Path, name: &str) -> Result<Self> {
        let document = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("malformed playlist file {}", path.display()))?,
            Err(_) => PlaylistDocument {
                name: name.to_string(),
                items: Vec::new(),
            },
        };
        Ok(Self {
            path: path.to_path_buf(),
            document,
        })
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let payload = serde_json::to_string_pretty(&self.document)?;
        std::fs::write(&self.path, payload)
            .with_context(|| format!("could not write playlist file {}", self.path.display()))?;
        Ok(())
    }
}

impl PlaylistProvider for JsonPlaylist {
    fn current_items(&self) -> Result<Vec<String>> {
        Ok(self.document.items.clone())
    }

    fn replace_items(&mut self, ids: &[String]) -> Result<()> {
        self.document.items = ids.to_vec();
        self.save()
    }

    fn add_items(&mut self, ids: &[String]) -> Result<()> {
        self.document.items.extend_from_slice(ids);
        self.save()
    }
}
