//! SQLite backend
//!
//! Single-host deployments and tests. Timestamps are stored as fixed-width
//! RFC 3339 text so that string comparison orders them correctly.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use super::{CatalogStore, StateStore};
use crate::models::{
    DiscoveryHit, JobCursor, PlaylistRecord, PlaylistWrite, SelectionWindow, StalePlaylist,
    StoreCounts, TrackLink, TrackRecord,
};
use crate::scheduler::state::CycleState;

/// Max bound parameters per `IN (...)` query
const IN_CHUNK: usize = 500;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS discovered_playlists (
        playlist_id TEXT PRIMARY KEY,
        region TEXT NOT NULL,
        query TEXT NOT NULL,
        category TEXT NOT NULL,
        title TEXT NOT NULL DEFAULT '',
        channel_title TEXT NOT NULL DEFAULT '',
        discovered_at TEXT NOT NULL,
        checked_at TEXT,
        validated INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_discovered_region
        ON discovered_playlists(region, checked_at, discovered_at);

    CREATE TABLE IF NOT EXISTS playlists (
        external_id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        cover_url TEXT,
        region TEXT NOT NULL,
        category TEXT,
        is_public INTEGER NOT NULL DEFAULT 1,
        item_count INTEGER NOT NULL DEFAULT 0,
        channel_title TEXT NOT NULL DEFAULT '',
        etag TEXT,
        validated INTEGER NOT NULL DEFAULT 0,
        fetched_on TEXT NOT NULL,
        last_refreshed_on TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_playlists_refresh
        ON playlists(region, last_refreshed_on);

    CREATE TABLE IF NOT EXISTS tracks (
        external_id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        artist TEXT NOT NULL DEFAULT '',
        cover_url TEXT,
        sync_status TEXT NOT NULL DEFAULT 'pending',
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS playlist_tracks (
        playlist_id TEXT NOT NULL,
        track_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (playlist_id, track_id)
    );

    CREATE TABLE IF NOT EXISTS cycle_state (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        mode TEXT NOT NULL,
        day INTEGER NOT NULL,
        last_region TEXT,
        cycle_started_on TEXT NOT NULL,
        day_started_on TEXT NOT NULL,
        locked INTEGER NOT NULL DEFAULT 0,
        locked_at TEXT,
        process_started_at TEXT,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS job_cursors (
        job TEXT PRIMARY KEY,
        idx INTEGER NOT NULL,
        last_id TEXT,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS selection_windows (
        job TEXT PRIMARY KEY,
        ids TEXT NOT NULL,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    );
"#;

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp: {s}"))?
        .with_timezone(&Utc))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("Invalid date: {s}"))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

/// SQLite implementation of the store traits
///
/// Statements run on the blocking pool; the connection sits behind a
/// `Mutex` shared with those tasks.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) a database file
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .context("Failed to configure SQLite")?;

        let store = Self::from_connection(conn)?;
        tracing::info!(path = %path.display(), "SQLite store initialized");
        Ok(store)
    }

    /// Create in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory SQLite")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to create SQLite schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| anyhow!("SQLite connection mutex poisoned"))?;
            f(&mut guard)
        })
        .await
        .context("SQLite task panicked")?
    }
}

fn read_cycle_state(conn: &Connection) -> Result<Option<CycleState>> {
    let row = conn
        .query_row(
            "SELECT mode, day, last_region, cycle_started_on, day_started_on,
                    locked, locked_at, process_started_at, updated_at
             FROM cycle_state WHERE id = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, String>(8)?,
                ))
            },
        )
        .optional()
        .context("Failed to read cycle state")?;

    row.map(|r| {
        Ok(CycleState {
            mode: r.0.parse().map_err(|e: String| anyhow!(e))?,
            day: r.1,
            last_region: r.2,
            cycle_started_on: parse_date(&r.3)?,
            day_started_on: parse_date(&r.4)?,
            locked: r.5,
            locked_at: parse_opt_ts(r.6)?,
            process_started_at: parse_opt_ts(r.7)?,
            updated_at: parse_ts(&r.8)?,
        })
    })
    .transpose()
}

// ============================================================================
// Catalog
// ============================================================================

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn upsert_discovery_hits(&self, hits: &[DiscoveryHit]) -> Result<usize> {
        let hits = hits.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO discovered_playlists
                        (playlist_id, region, query, category, title, channel_title,
                         discovered_at, checked_at, validated)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(playlist_id) DO UPDATE SET
                        title = excluded.title,
                        channel_title = excluded.channel_title",
                )?;
                for h in &hits {
                    stmt.execute(params![
                        h.playlist_id,
                        h.region,
                        h.query,
                        h.category,
                        h.title,
                        h.channel_title,
                        ts(h.discovered_at),
                        h.checked_at.map(ts),
                        h.validated,
                    ])
                    .with_context(|| format!("Failed to upsert discovery hit {}", h.playlist_id))?;
                }
            }
            tx.commit().context("Failed to commit discovery hits")?;
            Ok(hits.len())
        })
        .await
    }

    async fn cached_candidates(
        &self,
        region: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let region = region.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT playlist_id FROM discovered_playlists
                 WHERE region = ?1 AND checked_at IS NULL AND discovered_at >= ?2
                 ORDER BY discovered_at DESC, playlist_id
                 LIMIT ?3",
            )?;
            let ids = stmt
                .query_map(params![region, ts(since), limit as i64], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()
                .context("Failed to read cached candidates")?;
            Ok(ids)
        })
        .await
    }

    async fn discovery_hits(&self, ids: &[String]) -> Result<Vec<DiscoveryHit>> {
        let ids = ids.to_vec();
        self.blocking(move |conn| {
            let mut hits = Vec::with_capacity(ids.len());

            for chunk in ids.chunks(IN_CHUNK) {
                let sql = format!(
                    "SELECT playlist_id, region, query, category, title, channel_title,
                            discovered_at, checked_at, validated
                     FROM discovered_playlists WHERE playlist_id IN ({})",
                    placeholders(chunk.len())
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(chunk.iter()), |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, String>(6)?,
                            row.get::<_, Option<String>>(7)?,
                            row.get::<_, bool>(8)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .context("Failed to read discovery hits")?;

                for (playlist_id, region, query, category, title, channel_title, d, c, validated) in
                    rows
                {
                    hits.push(DiscoveryHit {
                        playlist_id,
                        region,
                        query,
                        category,
                        title,
                        channel_title,
                        discovered_at: parse_ts(&d)?,
                        checked_at: parse_opt_ts(c)?,
                        validated,
                    });
                }
            }

            Ok(hits)
        })
        .await
    }

    async fn mark_discovery_checked(
        &self,
        playlist_id: &str,
        validated: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let playlist_id = playlist_id.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "UPDATE discovered_playlists SET checked_at = ?2, validated = ?3
                 WHERE playlist_id = ?1",
                params![playlist_id, ts(at), validated],
            )
            .with_context(|| format!("Failed to mark {playlist_id} checked"))?;
            Ok(())
        })
        .await
    }

    async fn known_playlist_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        let ids = ids.to_vec();
        self.blocking(move |conn| {
            let mut known = HashSet::new();

            for chunk in ids.chunks(IN_CHUNK) {
                let sql = format!(
                    "SELECT external_id FROM playlists WHERE external_id IN ({})",
                    placeholders(chunk.len())
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(chunk.iter()), |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .context("Failed to read known playlists")?;
                known.extend(rows);
            }

            Ok(known)
        })
        .await
    }

    async fn upsert_playlists(&self, rows: &[PlaylistWrite]) -> Result<usize> {
        let rows = rows.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;

            for row in &rows {
                match row {
                    PlaylistWrite::Full(p) => {
                        tx.execute(
                            "INSERT INTO playlists
                                (external_id, title, description, cover_url, region, category,
                                 is_public, item_count, channel_title, etag, validated,
                                 fetched_on, last_refreshed_on)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                             ON CONFLICT(external_id) DO UPDATE SET
                                title = excluded.title,
                                description = excluded.description,
                                cover_url = excluded.cover_url,
                                region = excluded.region,
                                category = COALESCE(excluded.category, playlists.category),
                                is_public = excluded.is_public,
                                item_count = excluded.item_count,
                                channel_title = excluded.channel_title,
                                etag = excluded.etag,
                                validated = excluded.validated,
                                last_refreshed_on = excluded.last_refreshed_on",
                            params![
                                p.external_id,
                                p.title,
                                p.description,
                                p.cover_url,
                                p.region,
                                p.category,
                                p.is_public,
                                p.item_count as i64,
                                p.channel_title,
                                p.etag,
                                p.validated,
                                ts(p.fetched_on),
                                ts(p.last_refreshed_on),
                            ],
                        )
                        .with_context(|| format!("Failed to upsert playlist {}", p.external_id))?;
                    }
                    PlaylistWrite::Identity(p) => {
                        tx.execute(
                            "INSERT INTO playlists
                                (external_id, title, region, etag, validated,
                                 fetched_on, last_refreshed_on)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                             ON CONFLICT(external_id) DO UPDATE SET
                                title = excluded.title,
                                region = excluded.region,
                                etag = excluded.etag,
                                validated = excluded.validated,
                                last_refreshed_on = excluded.last_refreshed_on",
                            params![
                                p.external_id,
                                p.title,
                                p.region,
                                p.etag,
                                p.validated,
                                ts(p.fetched_on),
                                ts(p.last_refreshed_on),
                            ],
                        )
                        .with_context(|| format!("Failed to upsert playlist {}", p.external_id))?;
                    }
                }
            }

            tx.commit().context("Failed to commit playlists")?;
            Ok(rows.len())
        })
        .await
    }

    async fn set_playlist_etag(&self, external_id: &str, etag: Option<&str>) -> Result<()> {
        let external_id = external_id.to_string();
        let etag = etag.map(str::to_string);
        self.blocking(move |conn| {
            conn.execute(
                "UPDATE playlists SET etag = ?2 WHERE external_id = ?1",
                params![external_id, etag],
            )
            .with_context(|| format!("Failed to set etag of {external_id}"))?;
            Ok(())
        })
        .await
    }

    async fn playlist(&self, external_id: &str) -> Result<Option<PlaylistRecord>> {
        let external_id = external_id.to_string();
        self.blocking(move |conn| {
            let row = conn
                .query_row(
                    "SELECT external_id, title, description, cover_url, region, category,
                            is_public, item_count, channel_title, etag, validated,
                            fetched_on, last_refreshed_on
                     FROM playlists WHERE external_id = ?1",
                    params![external_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, Option<String>>(5)?,
                            row.get::<_, bool>(6)?,
                            row.get::<_, i64>(7)?,
                            row.get::<_, String>(8)?,
                            row.get::<_, Option<String>>(9)?,
                            row.get::<_, bool>(10)?,
                            row.get::<_, String>(11)?,
                            row.get::<_, String>(12)?,
                        ))
                    },
                )
                .optional()
                .with_context(|| format!("Failed to read playlist {external_id}"))?;

            row.map(|r| {
                Ok(PlaylistRecord {
                    external_id: r.0,
                    title: r.1,
                    description: r.2,
                    cover_url: r.3,
                    region: r.4,
                    category: r.5,
                    is_public: r.6,
                    item_count: r.7.max(0) as u64,
                    channel_title: r.8,
                    etag: r.9,
                    validated: r.10,
                    fetched_on: parse_ts(&r.11)?,
                    last_refreshed_on: parse_ts(&r.12)?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn touch_refreshed(&self, ids: &[String], at: DateTime<Utc>) -> Result<()> {
        let ids = ids.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx
                    .prepare("UPDATE playlists SET last_refreshed_on = ?2 WHERE external_id = ?1")?;
                let at = ts(at);
                for id in &ids {
                    stmt.execute(params![id, at])?;
                }
            }
            tx.commit().context("Failed to touch playlists")?;
            Ok(())
        })
        .await
    }

    async fn upsert_tracks(&self, rows: &[TrackRecord]) -> Result<usize> {
        let rows = rows.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO tracks
                        (external_id, title, artist, cover_url, sync_status, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(external_id) DO UPDATE SET
                        title = excluded.title,
                        artist = excluded.artist,
                        cover_url = COALESCE(excluded.cover_url, tracks.cover_url),
                        updated_at = excluded.updated_at",
                )?;
                let now = ts(Utc::now());
                for t in &rows {
                    stmt.execute(params![
                        t.external_id,
                        t.title,
                        t.artist,
                        t.cover_url,
                        t.sync_status,
                        now
                    ])
                    .with_context(|| format!("Failed to upsert track {}", t.external_id))?;
                }
            }
            tx.commit().context("Failed to commit tracks")?;
            Ok(rows.len())
        })
        .await
    }

    async fn upsert_links(&self, rows: &[TrackLink]) -> Result<usize> {
        let rows = rows.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO playlist_tracks (playlist_id, track_id, position, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(playlist_id, track_id) DO UPDATE SET
                        position = excluded.position,
                        updated_at = excluded.updated_at",
                )?;
                let now = ts(Utc::now());
                for l in &rows {
                    stmt.execute(params![l.playlist_id, l.track_id, l.position, now])
                        .with_context(|| {
                            format!("Failed to upsert link {}/{}", l.playlist_id, l.track_id)
                        })?;
                }
            }
            tx.commit().context("Failed to commit links")?;
            Ok(rows.len())
        })
        .await
    }

    async fn playlist_links(&self, playlist_id: &str) -> Result<Vec<TrackLink>> {
        let playlist_id = playlist_id.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT playlist_id, track_id, position FROM playlist_tracks
                 WHERE playlist_id = ?1 ORDER BY position, track_id",
            )?;
            let links = stmt
                .query_map(params![playlist_id], |row| {
                    Ok(TrackLink {
                        playlist_id: row.get(0)?,
                        track_id: row.get(1)?,
                        position: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to read playlist links")?;
            Ok(links)
        })
        .await
    }

    async fn stale_playlists(&self, region: &str, limit: usize) -> Result<Vec<StalePlaylist>> {
        let region = region.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT external_id, etag, last_refreshed_on FROM playlists
                 WHERE region = ?1
                 ORDER BY last_refreshed_on ASC, external_id
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![region, limit as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to read stale playlists")?;

            rows.into_iter()
                .map(|(external_id, etag, refreshed)| {
                    Ok(StalePlaylist {
                        external_id,
                        etag,
                        last_refreshed_on: parse_ts(&refreshed)?,
                    })
                })
                .collect()
        })
        .await
    }

    async fn empty_playlists(&self, limit: usize) -> Result<Vec<String>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT p.external_id FROM playlists p
                 WHERE NOT EXISTS (
                    SELECT 1 FROM playlist_tracks l WHERE l.playlist_id = p.external_id
                 )
                 ORDER BY p.last_refreshed_on ASC, p.external_id
                 LIMIT ?1",
            )?;
            let ids = stmt
                .query_map(params![limit as i64], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()
                .context("Failed to read empty playlists")?;
            Ok(ids)
        })
        .await
    }

    async fn counts(&self) -> Result<StoreCounts> {
        self.blocking(|conn| {
            let count = |table: &str| -> Result<u64> {
                let n: i64 = conn
                    .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                    .with_context(|| format!("Failed to count {table}"))?;
                Ok(n.max(0) as u64)
            };

            Ok(StoreCounts {
                discovered: count("discovered_playlists")?,
                playlists: count("playlists")?,
                tracks: count("tracks")?,
                links: count("playlist_tracks")?,
            })
        })
        .await
    }
}

// ============================================================================
// Scheduler state
// ============================================================================

#[async_trait]
impl StateStore for SqliteStore {
    async fn ensure_cycle_state(&self, initial: &CycleState) -> Result<CycleState> {
        let initial = initial.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO cycle_state
                    (id, mode, day, last_region, cycle_started_on, day_started_on,
                     locked, locked_at, process_started_at, updated_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, 0, NULL, NULL, ?6)",
                params![
                    initial.mode.as_str(),
                    initial.day,
                    initial.last_region,
                    initial.cycle_started_on.to_string(),
                    initial.day_started_on.to_string(),
                    ts(initial.updated_at),
                ],
            )
            .context("Failed to initialize cycle state")?;

            read_cycle_state(conn)?
                .ok_or_else(|| anyhow!("cycle state missing after initialization"))
        })
        .await
    }

    async fn load_cycle_state(&self) -> Result<Option<CycleState>> {
        self.blocking(|conn| read_cycle_state(conn)).await
    }

    async fn save_cycle_state(&self, state: &CycleState) -> Result<()> {
        let state = state.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO cycle_state
                    (id, mode, day, last_region, cycle_started_on, day_started_on, updated_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    mode = excluded.mode,
                    day = excluded.day,
                    last_region = excluded.last_region,
                    cycle_started_on = excluded.cycle_started_on,
                    day_started_on = excluded.day_started_on,
                    updated_at = excluded.updated_at",
                params![
                    state.mode.as_str(),
                    state.day,
                    state.last_region,
                    state.cycle_started_on.to_string(),
                    state.day_started_on.to_string(),
                    ts(state.updated_at),
                ],
            )
            .context("Failed to save cycle state")?;
            Ok(())
        })
        .await
    }

    async fn try_acquire_lock(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        self.blocking(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE cycle_state SET locked = 1, locked_at = ?1, process_started_at = ?1
                     WHERE id = 1 AND (locked = 0 OR locked_at IS NULL OR locked_at < ?2)",
                    params![ts(now), ts(stale_before)],
                )
                .context("Failed to acquire scheduler lock")?;
            Ok(changed == 1)
        })
        .await
    }

    async fn release_lock(&self) -> Result<()> {
        self.blocking(|conn| {
            conn.execute(
                "UPDATE cycle_state SET locked = 0, locked_at = NULL, process_started_at = NULL
                 WHERE id = 1",
                [],
            )
            .context("Failed to release scheduler lock")?;
            Ok(())
        })
        .await
    }

    async fn load_cursor(&self, job: &str) -> Result<Option<JobCursor>> {
        let job = job.to_string();
        self.blocking(move |conn| {
            let row = conn
                .query_row(
                    "SELECT idx, last_id, updated_at FROM job_cursors WHERE job = ?1",
                    params![job],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()
                .with_context(|| format!("Failed to read cursor {job}"))?;

            row.map(|(index, last_id, updated)| {
                Ok(JobCursor {
                    job: job.clone(),
                    index: index.max(0) as u64,
                    last_id,
                    updated_at: parse_ts(&updated)?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn save_cursor(&self, cursor: &JobCursor) -> Result<()> {
        let cursor = cursor.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO job_cursors (job, idx, last_id, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(job) DO UPDATE SET
                    idx = excluded.idx,
                    last_id = excluded.last_id,
                    updated_at = excluded.updated_at",
                params![
                    cursor.job,
                    cursor.index as i64,
                    cursor.last_id,
                    ts(cursor.updated_at)
                ],
            )
            .with_context(|| format!("Failed to save cursor {}", cursor.job))?;
            Ok(())
        })
        .await
    }

    async fn delete_cursor(&self, job: &str) -> Result<()> {
        let job = job.to_string();
        self.blocking(move |conn| {
            conn.execute("DELETE FROM job_cursors WHERE job = ?1", params![job])
                .with_context(|| format!("Failed to delete cursor {job}"))?;
            Ok(())
        })
        .await
    }

    async fn load_window(&self, job: &str) -> Result<Option<SelectionWindow>> {
        let job = job.to_string();
        self.blocking(move |conn| {
            let row = conn
                .query_row(
                    "SELECT ids, created_at, expires_at FROM selection_windows WHERE job = ?1",
                    params![job],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()
                .with_context(|| format!("Failed to read selection window {job}"))?;

            row.map(|(ids, created, expires)| {
                Ok(SelectionWindow {
                    job: job.clone(),
                    ids: serde_json::from_str(&ids).context("Invalid selection window ids")?,
                    created_at: parse_ts(&created)?,
                    expires_at: parse_ts(&expires)?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn save_window(&self, window: &SelectionWindow) -> Result<()> {
        let ids = serde_json::to_string(&window.ids)?;
        let window = window.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO selection_windows (job, ids, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(job) DO UPDATE SET
                    ids = excluded.ids,
                    created_at = excluded.created_at,
                    expires_at = excluded.expires_at",
                params![
                    window.job,
                    ids,
                    ts(window.created_at),
                    ts(window.expires_at)
                ],
            )
            .with_context(|| format!("Failed to save selection window {}", window.job))?;
            Ok(())
        })
        .await
    }

    async fn delete_window(&self, job: &str) -> Result<()> {
        let job = job.to_string();
        self.blocking(move |conn| {
            conn.execute("DELETE FROM selection_windows WHERE job = ?1", params![job])
                .with_context(|| format!("Failed to delete selection window {job}"))?;
            Ok(())
        })
        .await
    }
}
