//! Catalog store: the SQLite-backed track library and run history.
//!
//! Everything the refresh pipeline needs from disk lives here — the track
//! catalog, ban lists, and the record of past playlist runs. Schema setup
//! is idempotent, so `init_schema` can run at every startup; multi-row
//! writes go through transactions with prepared statements.

use crate::track::TrackCandidate;
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;

/// Bans sharing a reason against this many tracks of one artist escalate
/// into an artist-level ban.
const ARTIST_BAN_THRESHOLD: u32 = 3;

/// Owns the SQLite connection for the track catalog.
pub struct CatalogStore {
    conn: Connection,
}

/// One row of the run history, newest first.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_at: String,
    pub run_label: String,
    pub energy_tag: String,
    pub track_count: u32,
}

impl CatalogStore {
    /// Opens (or creates) the catalog database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("could not open catalog database at {}", path.display()))?;
        Ok(Self { conn })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("could not open in-memory database")?;
        Ok(Self { conn })
    }

    /// Creates all tables if absent and applies in-place column migrations.
    /// Safe to call on every startup.
    pub fn init_schema(&mut self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS tracks (
                    id             TEXT PRIMARY KEY,
                    title          TEXT NOT NULL,
                    artist         TEXT NOT NULL,
                    album          TEXT,
                    energy_tag     TEXT,
                    duration_ms    INTEGER,
                    added_at       TEXT,
                    last_played_at TEXT
                );
                CREATE TABLE IF NOT EXISTS bans (
                    track_id   TEXT PRIMARY KEY,
                    artist     TEXT NOT NULL DEFAULT '',
                    title      TEXT NOT NULL DEFAULT '',
                    reason     TEXT,
                    created_at TEXT
                );
                CREATE TABLE IF NOT EXISTS artist_bans (
                    artist     TEXT PRIMARY KEY,
                    reason     TEXT,
                    created_at TEXT
                );
                CREATE TABLE IF NOT EXISTS playlist_runs (
                    id          INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_at      TEXT NOT NULL,
                    run_label   TEXT NOT NULL,
                    energy_tag  TEXT NOT NULL,
                    track_count INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS playlist_run_tracks (
                    run_id         INTEGER NOT NULL,
                    position       INTEGER NOT NULL,
                    track_id       TEXT NOT NULL,
                    source         TEXT NOT NULL,
                    rec_reason     TEXT,
                    rec_confidence TEXT,
                    PRIMARY KEY (run_id, position)
                );",
            )
            .context("could not create catalog schema")?;

        // Older databases predate the duration_ms column.
        if !self.column_exists("tracks", "duration_ms")? {
            info!("migrating tracks table: adding duration_ms column");
            self.conn
                .execute("ALTER TABLE tracks ADD COLUMN duration_ms INTEGER", [])
                .context("could not add duration_ms column to tracks")?;
        }

        // Bans carry a snapshot of artist and title so escalation keeps
        // working after catalog rows change or disappear.
        for column in ["artist", "title"] {
            if !self.column_exists("bans", column)? {
                info!("migrating bans table: adding {column} column");
                self.conn
                    .execute(
                        &format!("ALTER TABLE bans ADD COLUMN {column} TEXT NOT NULL DEFAULT ''"),
                        [],
                    )
                    .with_context(|| format!("could not add {column} column to bans"))?;
            }
        }

        Ok(())
    }

    fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .context("could not inspect table columns")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            if name == column {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Tracks matching the day's energy tag, plus untagged tracks that fit
    /// any day.
    pub fn candidate_tracks(&self, energy_tag: &str) -> Result<Vec<TrackCandidate>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, title, artist, album, energy_tag, duration_ms FROM tracks
                 WHERE energy_tag = ?1 OR energy_tag IS NULL OR energy_tag = ''",
            )
            .context("could not prepare candidate query")?;
        let rows = stmt
            .query_map([energy_tag], row_to_track)
            .context("could not query candidate tracks")?;

        let mut tracks = Vec::new();
        for track in rows {
            tracks.push(track.context("bad candidate row")?);
        }
        debug!("{} candidates for tag {energy_tag}", tracks.len());
        Ok(tracks)
    }

    /// The whole catalog, used when the tag-filtered pool runs dry.
    pub fn all_tracks(&self) -> Result<Vec<TrackCandidate>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, title, artist, album, energy_tag, duration_ms FROM tracks")
            .context("could not prepare catalog query")?;
        let rows = stmt
            .query_map([], row_to_track)
            .context("could not query catalog")?;

        let mut tracks = Vec::new();
        for track in rows {
            tracks.push(track.context("bad catalog row")?);
        }
        Ok(tracks)
    }

    /// Ids of tracks played within the last `days` days before `today`.
    pub fn recent_track_ids(&self, days: i64, today: NaiveDate) -> Result<HashSet<String>> {
        let cutoff = today - chrono::Duration::days(days);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id FROM tracks
                 WHERE last_played_at IS NOT NULL AND date(last_played_at) >= date(?1)",
            )
            .context("could not prepare recent-track query")?;
        let rows = stmt
            .query_map([cutoff.format("%Y-%m-%d").to_string()], |row| {
                row.get::<_, String>(0)
            })
            .context("could not query recent tracks")?;

        let mut ids = HashSet::new();
        for id in rows {
            ids.insert(id.context("bad recent-track row")?.to_lowercase());
        }
        Ok(ids)
    }

    /// Most recently played tracks, newest first, for the recommender's
    /// history section.
    pub fn recent_history(&self, limit: usize) -> Result<Vec<TrackCandidate>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, title, artist, album, energy_tag, duration_ms FROM tracks
                 WHERE last_played_at IS NOT NULL
                 ORDER BY last_played_at DESC LIMIT ?1",
            )
            .context("could not prepare history query")?;
        let rows = stmt
            .query_map([limit], row_to_track)
            .context("could not query history")?;

        let mut tracks = Vec::new();
        for track in rows {
            tracks.push(track.context("bad history row")?);
        }
        Ok(tracks)
    }

    /// Lower-cased ids of all banned tracks.
    pub fn banned_track_ids(&self) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT track_id FROM bans")
            .context("could not prepare ban query")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("could not query bans")?;

        let mut ids = HashSet::new();
        for id in rows {
            ids.insert(id.context("bad ban row")?.to_lowercase());
        }
        Ok(ids)
    }

    /// Lower-cased artist names from the artist-level ban table.
    pub fn banned_artists(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT artist FROM artist_bans")
            .context("could not prepare artist-ban query")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("could not query artist bans")?;

        let mut artists = Vec::new();
        for artist in rows {
            artists.push(artist.context("bad artist-ban row")?.to_lowercase());
        }
        Ok(artists)
    }

    /// Records track-level bans, snapshotting the artist and title from
    /// the catalog, and escalates to an artist ban when the same reason
    /// has hit [`ARTIST_BAN_THRESHOLD`] tracks of one artist. The
    /// escalation count reads the ban rows themselves, so it survives
    /// later catalog edits; a banned id unknown to the catalog is stored
    /// with an empty artist and never counts toward escalation.
    pub fn record_bans(&mut self, track_ids: &[String], reason: &str) -> Result<()> {
        if track_ids.is_empty() {
            return Ok(());
        }
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        {
            let mut lookup = tx.prepare("SELECT artist, title FROM tracks WHERE id = ?1")?;
            let mut insert = tx.prepare(
                "INSERT OR REPLACE INTO bans (track_id, artist, title, reason, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for id in track_ids {
                let (artist, title): (String, String) = lookup
                    .query_row([id], |row| Ok((row.get(0)?, row.get(1)?)))
                    .optional()
                    .with_context(|| format!("could not look up track {id}"))?
                    .unwrap_or_default();
                insert
                    .execute(params![id, artist, title, reason, now])
                    .with_context(|| format!("could not record ban for track {id}"))?;
            }
        }

        {
            let mut stmt = tx.prepare(
                "SELECT artist, COUNT(*) FROM bans
                 WHERE reason = ?1 AND artist != ''
                 GROUP BY lower(artist)
                 HAVING COUNT(*) >= ?2",
            )?;
            let offenders: Vec<(String, u32)> = stmt
                .query_map(params![reason, ARTIST_BAN_THRESHOLD], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<std::result::Result<_, _>>()
                .context("could not evaluate artist-ban escalation")?;

            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO artist_bans (artist, reason, created_at)
                 VALUES (?1, ?2, ?3)",
            )?;
            for (artist, count) in offenders {
                let inserted = insert
                    .execute(params![
                        artist.to_lowercase(),
                        "auto-banned due to repeated removals",
                        now,
                    ])
                    .with_context(|| format!("could not record artist ban for {artist}"))?;
                if inserted > 0 {
                    info!("escalated to artist ban: {artist} ({count} tracks, {reason})");
                }
            }
        }

        tx.commit().context("could not commit ban transaction")?;
        Ok(())
    }

    /// Upserts catalog rows for every track in `tracks`. Existing rows keep
    /// their values where the incoming track has none.
    pub fn ensure_tracks_exist(&mut self, tracks: &[TrackCandidate]) -> Result<()> {
        if tracks.is_empty() {
            return Ok(());
        }
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        {
            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO tracks (id, title, artist, album, energy_tag, duration_ms, added_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            let mut update = tx.prepare(
                "UPDATE tracks SET
                    title = ?2,
                    artist = ?3,
                    album = COALESCE(?4, album),
                    energy_tag = COALESCE(?5, energy_tag),
                    duration_ms = COALESCE(?6, duration_ms)
                 WHERE id = ?1",
            )?;
            for track in tracks {
                if track.id.is_empty() {
                    continue;
                }
                insert
                    .execute(params![
                        track.id,
                        track.title,
                        track.artist,
                        track.album,
                        track.energy_tag,
                        track.duration_ms,
                        now,
                    ])
                    .with_context(|| format!("could not insert track {}", track.id))?;
                update
                    .execute(params![
                        track.id,
                        track.title,
                        track.artist,
                        track.album,
                        track.energy_tag,
                        track.duration_ms,
                    ])
                    .with_context(|| format!("could not update track {}", track.id))?;
            }
        }

        tx.commit().context("could not commit track upsert")?;
        Ok(())
    }

    /// Stamps `last_played_at` for every id in `track_ids`.
    pub fn mark_played(&mut self, track_ids: &[String], today: NaiveDate) -> Result<()> {
        if track_ids.is_empty() {
            return Ok(());
        }
        let date = today.format("%Y-%m-%d").to_string();
        let tx = self.conn.transaction()?;

        {
            let mut stmt = tx.prepare("UPDATE tracks SET last_played_at = ?1 WHERE id = ?2")?;
            for id in track_ids {
                stmt.execute(params![date, id])
                    .with_context(|| format!("could not mark track {id} as played"))?;
            }
        }

        tx.commit().context("could not commit play marks")?;
        Ok(())
    }

    /// Records a finished run and its ordered track list.
    pub fn record_run(
        &mut self,
        run_label: &str,
        energy_tag: &str,
        tracks: &[TrackCandidate],
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO playlist_runs (run_at, run_label, energy_tag, track_count)
             VALUES (?1, ?2, ?3, ?4)",
            params![now, run_label, energy_tag, tracks.len() as u32],
        )
        .context("could not record playlist run")?;
        let run_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO playlist_run_tracks
                    (run_id, position, track_id, source, rec_reason, rec_confidence)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (position, track) in tracks.iter().enumerate() {
                let source = if track.meta("rec_reason").is_some() {
                    "discovery"
                } else {
                    "base"
                };
                stmt.execute(params![
                    run_id,
                    position as u32,
                    track.id,
                    source,
                    track.meta("rec_reason"),
                    track.meta("rec_confidence"),
                ])
                .with_context(|| format!("could not record run track {}", track.id))?;
            }
        }

        tx.commit().context("could not commit run record")?;
        Ok(())
    }

    /// The most recent run and the set of lower-cased track ids it placed,
    /// or `None` for a fresh database.
    pub fn last_run(&self) -> Result<Option<(RunRecord, HashSet<String>)>> {
        let record: Option<(i64, RunRecord)> = self
            .conn
            .query_row(
                "SELECT id, run_at, run_label, energy_tag, track_count
                 FROM playlist_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        RunRecord {
                            run_at: row.get(1)?,
                            run_label: row.get(2)?,
                            energy_tag: row.get(3)?,
                            track_count: row.get(4)?,
                        },
                    ))
                },
            )
            .optional()
            .context("could not query last run")?;

        let Some((run_id, record)) = record else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare("SELECT track_id FROM playlist_run_tracks WHERE run_id = ?1")
            .context("could not prepare run-track query")?;
        let rows = stmt
            .query_map([run_id], |row| row.get::<_, String>(0))
            .context("could not query run tracks")?;

        let mut ids = HashSet::new();
        for id in rows {
            ids.insert(id.context("bad run-track row")?.to_lowercase());
        }
        Ok(Some((record, ids)))
    }
}

fn row_to_track(row: &rusqlite::Row<'_>) -> std::result::Result<TrackCandidate, rusqlite::Error> {
    Ok(TrackCandidate {
        id: row.get(0)?,
        title: row.get(1)?,
        artist: row.get(2)?,
        album: row.get(3)?,
        energy_tag: row.get(4)?,
        duration_ms: row.get::<_, Option<i64>>(5)?.map(|ms| ms.max(0) as u64),
        metadata: Default::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_tracks(tracks: &[TrackCandidate]) -> CatalogStore {
        let mut store = CatalogStore::open_in_memory().unwrap();
        store.init_schema().unwrap();
        store.ensure_tracks_exist(tracks).unwrap();
        store
    }

    fn track(id: &str, artist: &str, title: &str, tag: Option<&str>) -> TrackCandidate {
        TrackCandidate {
            energy_tag: tag.map(str::to_string),
            ..TrackCandidate::new(id, artist, title)
        }
    }

    #[test]
    fn init_schema_is_idempotent() {
        let mut store = CatalogStore::open_in_memory().unwrap();
        store.init_schema().unwrap();
        store.init_schema().unwrap();
    }

    #[test]
    fn candidates_include_matching_tag_and_untagged() {
        let store = store_with_tracks(&[
            track("a", "Artist", "Monday Song", Some("monday")),
            track("b", "Artist", "Friday Song", Some("friday")),
            track("c", "Artist", "Anytime Song", None),
        ]);

        let candidates = store.candidate_tracks("monday").unwrap();
        let ids: HashSet<&str> = candidates.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, HashSet::from(["a", "c"]));
    }

    #[test]
    fn upsert_preserves_existing_values_on_none() {
        let mut store = store_with_tracks(&[TrackCandidate {
            album: Some("First Album".to_string()),
            duration_ms: Some(200_000),
            ..track("a", "Artist", "Song", Some("monday"))
        }]);

        // Re-upsert with no album or duration; existing values must survive.
        store
            .ensure_tracks_exist(&[track("a", "Artist", "Song Renamed", None)])
            .unwrap();

        let all = store.all_tracks().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Song Renamed");
        assert_eq!(all[0].album.as_deref(), Some("First Album"));
        assert_eq!(all[0].duration_ms, Some(200_000));
    }

    #[test]
    fn mark_played_feeds_recent_track_ids() {
        let mut store = store_with_tracks(&[
            track("a", "Artist", "Song A", None),
            track("b", "Artist", "Song B", None),
        ]);
        let today = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        store.mark_played(&["a".to_string()], today).unwrap();

        let recent = store.recent_track_ids(14, today).unwrap();
        assert!(recent.contains("a"));
        assert!(!recent.contains("b"));

        // Outside the window the track ages out.
        let later = today + chrono::Duration::days(30);
        let recent = store.recent_track_ids(14, later).unwrap();
        assert!(recent.is_empty());
    }

    #[test]
    fn ban_escalates_to_artist_after_threshold() {
        let mut store = store_with_tracks(&[
            track("a", "Nickelback", "Song 1", None),
            track("b", "Nickelback", "Song 2", None),
            track("c", "Nickelback", "Song 3", None),
            track("d", "Other", "Song 4", None),
        ]);

        store
            .record_bans(&["a".to_string(), "b".to_string()], "manually removed")
            .unwrap();
        assert!(store.banned_artists().unwrap().is_empty());

        store
            .record_bans(&["c".to_string()], "manually removed")
            .unwrap();
        assert_eq!(store.banned_artists().unwrap(), vec!["nickelback"]);

        let banned = store.banned_track_ids().unwrap();
        assert_eq!(banned.len(), 3);
        assert!(!banned.contains("d"));
    }

    #[test]
    fn ban_of_unknown_track_is_recorded_without_artist() {
        let mut store = store_with_tracks(&[]);
        store
            .record_bans(&["ghost".to_string()], "manually removed")
            .unwrap();

        assert!(store.banned_track_ids().unwrap().contains("ghost"));
        assert!(store.banned_artists().unwrap().is_empty());
    }

    #[test]
    fn escalation_counts_artist_captured_at_ban_time() {
        let mut store = store_with_tracks(&[
            track("a", "Nickelback", "Song 1", None),
            track("b", "Nickelback", "Song 2", None),
            track("c", "Nickelback", "Song 3", None),
        ]);
        store
            .record_bans(&["a".to_string(), "b".to_string()], "manually removed")
            .unwrap();

        // The catalog entry is later corrected to a different artist;
        // the ban rows keep the name they were recorded with.
        store
            .ensure_tracks_exist(&[track("a", "Someone Else", "Song 1", None)])
            .unwrap();
        store
            .record_bans(&["c".to_string()], "manually removed")
            .unwrap();

        assert_eq!(store.banned_artists().unwrap(), vec!["nickelback"]);
    }

    #[test]
    fn record_run_and_last_run_round_trip() {
        let tracks = vec![
            track("a", "Artist", "Song A", None),
            track("b", "Artist", "Song B", None)
                .with_metadata("rec_reason", "fits the vibe")
                .with_metadata("rec_confidence", "0.80"),
        ];
        let mut store = store_with_tracks(&tracks);

        assert!(store.last_run().unwrap().is_none());
        store.record_run("2025-06-10-tuesday", "tuesday", &tracks).unwrap();

        let (record, ids) = store.last_run().unwrap().unwrap();
        assert_eq!(record.run_label, "2025-06-10-tuesday");
        assert_eq!(record.track_count, 2);
        assert_eq!(ids, HashSet::from(["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn recent_history_orders_newest_first() {
        let mut store = store_with_tracks(&[
            track("a", "Artist", "Old", None),
            track("b", "Artist", "New", None),
        ]);
        let day1 = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2025, 6, 9).unwrap();
        store.mark_played(&["a".to_string()], day1).unwrap();
        store.mark_played(&["b".to_string()], day2).unwrap();

        let history = store.recent_history(10).unwrap();
        assert_eq!(history[0].id, "b");
        assert_eq!(history[1].id, "a");
    }
}
