//! # Command-Line Interface Module
//!
//! Defines the command-line interface for Rota using Clap derive macros.
//! Parsing is type-safe; routing to the actual functionality happens in
//! `main`.
//!
//! ## Commands
//!
//! - `init-db`: Create (or recreate) the catalog database
//! - `refresh`: Run the full daily playlist refresh
//! - `recommend`: Ask the discovery recommender without touching the playlist
//! - `like`: Record liked-track feedback
//! - `doctor`: Report resolved paths and environment status
//!
//! ## Examples
//!
//! ```bash
//! rota init-db
//! rota refresh
//! rota recommend friday --limit 10
//! rota like track:4uLU6hMCjMI75M1A2tKUQC --artist "Rick Astley"
//! ```

use clap::{Parser, Subcommand};

/// Main application arguments structure.
///
/// Contains only a subcommand since all functionality is accessed through
/// specific commands.
#[derive(Parser)]
#[command(name = "rota")]
#[command(about = "Rota: daily playlist curation with taste rules, cooldowns & discovery blending")]
#[command(version)]
pub struct Args {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Enumeration of all available subcommands.
///
/// Command arguments are embedded directly in the enum variants for type
/// safety and automatic validation.
#[derive(Subcommand)]
pub enum Command {
    /// Initialize the catalog database
    ///
    /// Creates the database file and all tables. Safe to re-run: existing
    /// data is kept unless --force is given.
    InitDb {
        /// Delete any existing database first
        #[arg(long)]
        force: bool,
    },

    /// Run the daily playlist refresh
    ///
    /// Builds today's playlist from the catalog: detects manual removals,
    /// scores and filters candidates, blends in discovery picks when a
    /// completion API key is configured, pushes the result to the playlist
    /// file, and records the run.
    Refresh,

    /// Ask the discovery recommender directly
    ///
    /// Runs the recommendation flow against the current catalog and prints
    /// the merged result without modifying the playlist or recording a run.
    /// Requires a completion API key in the environment.
    Recommend {
        /// Context tag to recommend for (defaults to today's weekday)
        energy_tag: Option<String>,

        /// Maximum number of tracks in the merged result
        #[arg(long, default_value = "30")]
        limit: usize,

        /// Fraction of the result reserved for discoveries
        #[arg(long, default_value = "0.2")]
        discovery_ratio: f64,

        /// How many recently played tracks to show the recommender
        #[arg(long, default_value = "10")]
        history_limit: usize,
    },

    /// Record a liked track
    ///
    /// Appends a like event to the feedback log. Once an artist collects
    /// enough likes they are promoted to the learned-boost set and scored
    /// higher in future refreshes.
    Like {
        /// Track id or URI to like
        track_id: String,

        /// Artist credited for the like (enables artist-level learning)
        #[arg(long, default_value = "")]
        artist: String,
    },

    /// Report resolved paths and environment status
    ///
    /// Prints where Rota keeps its files, which of them exist, and whether
    /// a completion API key is configured. Useful for debugging a fresh
    /// install or a ROTA_HOME override.
    Doctor,
}
