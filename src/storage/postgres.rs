//! PostgreSQL backend
//!
//! Shared deployments where several harvester processes coordinate through
//! the `cycle_state` lock row. Connections come from a deadpool pool.

use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use deadpool_postgres::{
    Config as PoolConfig, ManagerConfig, Pool, PoolConfig as Sizing, RecyclingMethod, Runtime,
};
use tokio_postgres::{NoTls, Row};

use super::{CatalogStore, StateStore};
use crate::models::{
    DiscoveryHit, JobCursor, PlaylistRecord, PlaylistWrite, SelectionWindow, StalePlaylist,
    StoreCounts, TrackLink, TrackRecord,
};
use crate::scheduler::state::CycleState;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS discovered_playlists (
        playlist_id TEXT PRIMARY KEY,
        region TEXT NOT NULL,
        query TEXT NOT NULL,
        category TEXT NOT NULL,
        title TEXT NOT NULL DEFAULT '',
        channel_title TEXT NOT NULL DEFAULT '',
        discovered_at TIMESTAMPTZ NOT NULL,
        checked_at TIMESTAMPTZ,
        validated BOOLEAN NOT NULL DEFAULT FALSE
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
        is_public BOOLEAN NOT NULL DEFAULT TRUE,
        item_count BIGINT NOT NULL DEFAULT 0,
        channel_title TEXT NOT NULL DEFAULT '',
        etag TEXT,
        validated BOOLEAN NOT NULL DEFAULT FALSE,
        fetched_on TIMESTAMPTZ NOT NULL,
        last_refreshed_on TIMESTAMPTZ NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_playlists_refresh
        ON playlists(region, last_refreshed_on);

    CREATE TABLE IF NOT EXISTS tracks (
        external_id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        artist TEXT NOT NULL DEFAULT '',
        cover_url TEXT,
        sync_status TEXT NOT NULL DEFAULT 'pending',
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );

    CREATE TABLE IF NOT EXISTS playlist_tracks (
        playlist_id TEXT NOT NULL,
        track_id TEXT NOT NULL,
        position BIGINT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (playlist_id, track_id)
    );

    CREATE TABLE IF NOT EXISTS cycle_state (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        mode TEXT NOT NULL,
        day INTEGER NOT NULL,
        last_region TEXT,
        cycle_started_on DATE NOT NULL,
        day_started_on DATE NOT NULL,
        locked BOOLEAN NOT NULL DEFAULT FALSE,
        locked_at TIMESTAMPTZ,
        process_started_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ NOT NULL
    );

    CREATE TABLE IF NOT EXISTS job_cursors (
        job TEXT PRIMARY KEY,
        idx BIGINT NOT NULL,
        last_id TEXT,
        updated_at TIMESTAMPTZ NOT NULL
    );

    CREATE TABLE IF NOT EXISTS selection_windows (
        job TEXT PRIMARY KEY,
        ids TEXT[] NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
    );

    CREATE OR REPLACE FUNCTION harvest_empty_playlists(max_rows INTEGER)
    RETURNS SETOF TEXT AS $$
        SELECT p.external_id FROM playlists p
        WHERE NOT EXISTS (
            SELECT 1 FROM playlist_tracks l WHERE l.playlist_id = p.external_id
        )
        ORDER BY p.last_refreshed_on ASC, p.external_id
        LIMIT max_rows
    $$ LANGUAGE SQL STABLE;
"#;

/// PostgreSQL implementation of the store traits
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    /// Build the pool, verify connectivity and create the schema
    pub async fn connect(url: &str, pool_size: usize) -> Result<Self> {
        let mut pool_config = PoolConfig::new();
        pool_config.url = Some(url.to_string());
        pool_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        pool_config.pool = Some(Sizing::new(pool_size.max(1)));

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .context("Failed to create PostgreSQL connection pool")?;

        // Test connection
        let client = pool
            .get()
            .await
            .context("Failed to connect to PostgreSQL")?;
        client.simple_query("SELECT 1").await?;
        drop(client);

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create tables and the empty-playlist selection function
    pub async fn migrate(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .batch_execute(SCHEMA)
            .await
            .context("Failed to create PostgreSQL schema")?;

        tracing::info!("PostgreSQL schema initialized");
        Ok(())
    }
}

fn playlist_from_row(row: &Row) -> PlaylistRecord {
    PlaylistRecord {
        external_id: row.get(0),
        title: row.get(1),
        description: row.get(2),
        cover_url: row.get(3),
        region: row.get(4),
        category: row.get(5),
        is_public: row.get(6),
        item_count: row.get::<_, i64>(7).max(0) as u64,
        channel_title: row.get(8),
        etag: row.get(9),
        validated: row.get(10),
        fetched_on: row.get(11),
        last_refreshed_on: row.get(12),
    }
}

// ============================================================================
// Catalog
// ============================================================================

#[async_trait]
impl CatalogStore for PostgresStore {
    async fn upsert_discovery_hits(&self, hits: &[DiscoveryHit]) -> Result<usize> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let stmt = tx
            .prepare(
                "INSERT INTO discovered_playlists
                    (playlist_id, region, query, category, title, channel_title,
                     discovered_at, checked_at, validated)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 ON CONFLICT (playlist_id) DO UPDATE SET
                    title = EXCLUDED.title,
                    channel_title = EXCLUDED.channel_title",
            )
            .await?;

        for h in hits {
            tx.execute(
                &stmt,
                &[
                    &h.playlist_id,
                    &h.region,
                    &h.query,
                    &h.category,
                    &h.title,
                    &h.channel_title,
                    &h.discovered_at,
                    &h.checked_at,
                    &h.validated,
                ],
            )
            .await
            .with_context(|| format!("Failed to upsert discovery hit {}", h.playlist_id))?;
        }

        tx.commit().await.context("Failed to commit discovery hits")?;
        Ok(hits.len())
    }

    async fn cached_candidates(
        &self,
        region: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT playlist_id FROM discovered_playlists
                 WHERE region = $1 AND checked_at IS NULL AND discovered_at >= $2
                 ORDER BY discovered_at DESC, playlist_id
                 LIMIT $3",
                &[&region, &since, &(limit as i64)],
            )
            .await
            .context("Failed to read cached candidates")?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn discovery_hits(&self, ids: &[String]) -> Result<Vec<DiscoveryHit>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT playlist_id, region, query, category, title, channel_title,
                        discovered_at, checked_at, validated
                 FROM discovered_playlists WHERE playlist_id = ANY($1)",
                &[&ids],
            )
            .await
            .context("Failed to read discovery hits")?;

        Ok(rows
            .iter()
            .map(|r| DiscoveryHit {
                playlist_id: r.get(0),
                region: r.get(1),
                query: r.get(2),
                category: r.get(3),
                title: r.get(4),
                channel_title: r.get(5),
                discovered_at: r.get(6),
                checked_at: r.get(7),
                validated: r.get(8),
            })
            .collect())
    }

    async fn mark_discovery_checked(
        &self,
        playlist_id: &str,
        validated: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE discovered_playlists SET checked_at = $2, validated = $3
                 WHERE playlist_id = $1",
                &[&playlist_id, &at, &validated],
            )
            .await
            .with_context(|| format!("Failed to mark {playlist_id} checked"))?;
        Ok(())
    }

    async fn known_playlist_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT external_id FROM playlists WHERE external_id = ANY($1)",
                &[&ids],
            )
            .await
            .context("Failed to read known playlists")?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn upsert_playlists(&self, rows: &[PlaylistWrite]) -> Result<usize> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let full = tx
            .prepare(
                "INSERT INTO playlists
                    (external_id, title, description, cover_url, region, category,
                     is_public, item_count, channel_title, etag, validated,
                     fetched_on, last_refreshed_on)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                 ON CONFLICT (external_id) DO UPDATE SET
                    title = EXCLUDED.title,
                    description = EXCLUDED.description,
                    cover_url = EXCLUDED.cover_url,
                    region = EXCLUDED.region,
                    category = COALESCE(EXCLUDED.category, playlists.category),
                    is_public = EXCLUDED.is_public,
                    item_count = EXCLUDED.item_count,
                    channel_title = EXCLUDED.channel_title,
                    etag = EXCLUDED.etag,
                    validated = EXCLUDED.validated,
                    last_refreshed_on = EXCLUDED.last_refreshed_on",
            )
            .await?;
        let identity = tx
            .prepare(
                "INSERT INTO playlists
                    (external_id, title, region, etag, validated, fetched_on, last_refreshed_on)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (external_id) DO UPDATE SET
                    title = EXCLUDED.title,
                    region = EXCLUDED.region,
                    etag = EXCLUDED.etag,
                    validated = EXCLUDED.validated,
                    last_refreshed_on = EXCLUDED.last_refreshed_on",
            )
            .await?;

        for row in rows {
            match row {
                PlaylistWrite::Full(p) => {
                    let item_count = p.item_count as i64;
                    tx.execute(
                        &full,
                        &[
                            &p.external_id,
                            &p.title,
                            &p.description,
                            &p.cover_url,
                            &p.region,
                            &p.category,
                            &p.is_public,
                            &item_count,
                            &p.channel_title,
                            &p.etag,
                            &p.validated,
                            &p.fetched_on,
                            &p.last_refreshed_on,
                        ],
                    )
                    .await
                }
                PlaylistWrite::Identity(p) => {
                    tx.execute(
                        &identity,
                        &[
                            &p.external_id,
                            &p.title,
                            &p.region,
                            &p.etag,
                            &p.validated,
                            &p.fetched_on,
                            &p.last_refreshed_on,
                        ],
                    )
                    .await
                }
            }
            .with_context(|| format!("Failed to upsert playlist {}", row.external_id()))?;
        }

        tx.commit().await.context("Failed to commit playlists")?;
        Ok(rows.len())
    }

    async fn set_playlist_etag(&self, external_id: &str, etag: Option<&str>) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE playlists SET etag = $2 WHERE external_id = $1",
                &[&external_id, &etag],
            )
            .await
            .with_context(|| format!("Failed to set etag of {external_id}"))?;
        Ok(())
    }

    async fn playlist(&self, external_id: &str) -> Result<Option<PlaylistRecord>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT external_id, title, description, cover_url, region, category,
                        is_public, item_count, channel_title, etag, validated,
                        fetched_on, last_refreshed_on
                 FROM playlists WHERE external_id = $1",
                &[&external_id],
            )
            .await
            .with_context(|| format!("Failed to read playlist {external_id}"))?;
        Ok(row.as_ref().map(playlist_from_row))
    }

    async fn touch_refreshed(&self, ids: &[String], at: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE playlists SET last_refreshed_on = $2 WHERE external_id = ANY($1)",
                &[&ids, &at],
            )
            .await
            .context("Failed to touch playlists")?;
        Ok(())
    }

    async fn upsert_tracks(&self, rows: &[TrackRecord]) -> Result<usize> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let stmt = tx
            .prepare(
                "INSERT INTO tracks (external_id, title, artist, cover_url, sync_status, updated_at)
                 VALUES ($1, $2, $3, $4, $5, NOW())
                 ON CONFLICT (external_id) DO UPDATE SET
                    title = EXCLUDED.title,
                    artist = EXCLUDED.artist,
                    cover_url = COALESCE(EXCLUDED.cover_url, tracks.cover_url),
                    updated_at = NOW()",
            )
            .await?;

        for t in rows {
            tx.execute(
                &stmt,
                &[&t.external_id, &t.title, &t.artist, &t.cover_url, &t.sync_status],
            )
            .await
            .with_context(|| format!("Failed to upsert track {}", t.external_id))?;
        }

        tx.commit().await.context("Failed to commit tracks")?;
        Ok(rows.len())
    }

    async fn upsert_links(&self, rows: &[TrackLink]) -> Result<usize> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let stmt = tx
            .prepare(
                "INSERT INTO playlist_tracks (playlist_id, track_id, position, updated_at)
                 VALUES ($1, $2, $3, NOW())
                 ON CONFLICT (playlist_id, track_id) DO UPDATE SET
                    position = EXCLUDED.position,
                    updated_at = NOW()",
            )
            .await?;

        for l in rows {
            let position = i64::from(l.position);
            tx.execute(&stmt, &[&l.playlist_id, &l.track_id, &position])
                .await
                .with_context(|| {
                    format!("Failed to upsert link {}/{}", l.playlist_id, l.track_id)
                })?;
        }

        tx.commit().await.context("Failed to commit links")?;
        Ok(rows.len())
    }

    async fn playlist_links(&self, playlist_id: &str) -> Result<Vec<TrackLink>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT playlist_id, track_id, position FROM playlist_tracks
                 WHERE playlist_id = $1 ORDER BY position, track_id",
                &[&playlist_id],
            )
            .await
            .context("Failed to read playlist links")?;

        Ok(rows
            .iter()
            .map(|r| TrackLink {
                playlist_id: r.get(0),
                track_id: r.get(1),
                position: u32::try_from(r.get::<_, i64>(2)).unwrap_or(u32::MAX),
            })
            .collect())
    }

    async fn stale_playlists(&self, region: &str, limit: usize) -> Result<Vec<StalePlaylist>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT external_id, etag, last_refreshed_on FROM playlists
                 WHERE region = $1
                 ORDER BY last_refreshed_on ASC, external_id
                 LIMIT $2",
                &[&region, &(limit as i64)],
            )
            .await
            .context("Failed to read stale playlists")?;

        Ok(rows
            .iter()
            .map(|r| StalePlaylist {
                external_id: r.get(0),
                etag: r.get(1),
                last_refreshed_on: r.get(2),
            })
            .collect())
    }

    async fn empty_playlists(&self, limit: usize) -> Result<Vec<String>> {
        let client = self.pool.get().await?;
        let limit = i32::try_from(limit).unwrap_or(i32::MAX);
        let rows = client
            .query("SELECT * FROM harvest_empty_playlists($1)", &[&limit])
            .await
            .context("Failed to read empty playlists")?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT
                    (SELECT COUNT(*) FROM discovered_playlists),
                    (SELECT COUNT(*) FROM playlists),
                    (SELECT COUNT(*) FROM tracks),
                    (SELECT COUNT(*) FROM playlist_tracks)",
                &[],
            )
            .await
            .context("Failed to count rows")?;

        let n = |i: usize| row.get::<_, i64>(i).max(0) as u64;
        Ok(StoreCounts {
            discovered: n(0),
            playlists: n(1),
            tracks: n(2),
            links: n(3),
        })
    }
}

// ============================================================================
// Scheduler state
// ============================================================================

#[async_trait]
impl StateStore for PostgresStore {
    async fn ensure_cycle_state(&self, initial: &CycleState) -> Result<CycleState> {
        {
            let client = self.pool.get().await?;
            let day = i32::try_from(initial.day).context("Day out of range")?;
            client
                .execute(
                    "INSERT INTO cycle_state
                        (id, mode, day, last_region, cycle_started_on, day_started_on,
                         locked, updated_at)
                     VALUES (1, $1, $2, $3, $4, $5, FALSE, $6)
                     ON CONFLICT (id) DO NOTHING",
                    &[
                        &initial.mode.as_str(),
                        &day,
                        &initial.last_region,
                        &initial.cycle_started_on,
                        &initial.day_started_on,
                        &initial.updated_at,
                    ],
                )
                .await
                .context("Failed to initialize cycle state")?;
        }

        self.load_cycle_state()
            .await?
            .ok_or_else(|| anyhow!("cycle state missing after initialization"))
    }

    async fn load_cycle_state(&self) -> Result<Option<CycleState>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT mode, day, last_region, cycle_started_on, day_started_on,
                        locked, locked_at, process_started_at, updated_at
                 FROM cycle_state WHERE id = 1",
                &[],
            )
            .await
            .context("Failed to read cycle state")?;

        row.map(|r| {
            let mode: String = r.get(0);
            let day: i32 = r.get(1);
            Ok(CycleState {
                mode: mode.parse().map_err(|e: String| anyhow!(e))?,
                day: u32::try_from(day).with_context(|| format!("Invalid day {day}"))?,
                last_region: r.get(2),
                cycle_started_on: r.get::<_, NaiveDate>(3),
                day_started_on: r.get::<_, NaiveDate>(4),
                locked: r.get(5),
                locked_at: r.get(6),
                process_started_at: r.get(7),
                updated_at: r.get(8),
            })
        })
        .transpose()
    }

    async fn save_cycle_state(&self, state: &CycleState) -> Result<()> {
        let client = self.pool.get().await?;
        let day = i32::try_from(state.day).context("Day out of range")?;
        client
            .execute(
                "INSERT INTO cycle_state
                    (id, mode, day, last_region, cycle_started_on, day_started_on, updated_at)
                 VALUES (1, $1, $2, $3, $4, $5, $6)
                 ON CONFLICT (id) DO UPDATE SET
                    mode = EXCLUDED.mode,
                    day = EXCLUDED.day,
                    last_region = EXCLUDED.last_region,
                    cycle_started_on = EXCLUDED.cycle_started_on,
                    day_started_on = EXCLUDED.day_started_on,
                    updated_at = EXCLUDED.updated_at",
                &[
                    &state.mode.as_str(),
                    &day,
                    &state.last_region,
                    &state.cycle_started_on,
                    &state.day_started_on,
                    &state.updated_at,
                ],
            )
            .await
            .context("Failed to save cycle state")?;
        Ok(())
    }

    async fn try_acquire_lock(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let client = self.pool.get().await?;
        let changed = client
            .execute(
                "UPDATE cycle_state SET locked = TRUE, locked_at = $1, process_started_at = $1
                 WHERE id = 1 AND (locked = FALSE OR locked_at IS NULL OR locked_at < $2)",
                &[&now, &stale_before],
            )
            .await
            .context("Failed to acquire scheduler lock")?;
        Ok(changed == 1)
    }

    async fn release_lock(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE cycle_state SET locked = FALSE, locked_at = NULL, process_started_at = NULL
                 WHERE id = 1",
                &[],
            )
            .await
            .context("Failed to release scheduler lock")?;
        Ok(())
    }

    async fn load_cursor(&self, job: &str) -> Result<Option<JobCursor>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT idx, last_id, updated_at FROM job_cursors WHERE job = $1",
                &[&job],
            )
            .await
            .with_context(|| format!("Failed to read cursor {job}"))?;

        Ok(row.map(|r| JobCursor {
            job: job.to_string(),
            index: r.get::<_, i64>(0).max(0) as u64,
            last_id: r.get(1),
            updated_at: r.get(2),
        }))
    }

    async fn save_cursor(&self, cursor: &JobCursor) -> Result<()> {
        let client = self.pool.get().await?;
        let index = i64::try_from(cursor.index).context("Cursor index out of range")?;
        client
            .execute(
                "INSERT INTO job_cursors (job, idx, last_id, updated_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (job) DO UPDATE SET
                    idx = EXCLUDED.idx,
                    last_id = EXCLUDED.last_id,
                    updated_at = EXCLUDED.updated_at",
                &[&cursor.job, &index, &cursor.last_id, &cursor.updated_at],
            )
            .await
            .with_context(|| format!("Failed to save cursor {}", cursor.job))?;
        Ok(())
    }

    async fn delete_cursor(&self, job: &str) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute("DELETE FROM job_cursors WHERE job = $1", &[&job])
            .await
            .with_context(|| format!("Failed to delete cursor {job}"))?;
        Ok(())
    }

    async fn load_window(&self, job: &str) -> Result<Option<SelectionWindow>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT ids, created_at, expires_at FROM selection_windows WHERE job = $1",
                &[&job],
            )
            .await
            .with_context(|| format!("Failed to read selection window {job}"))?;

        Ok(row.map(|r| SelectionWindow {
            job: job.to_string(),
            ids: r.get(0),
            created_at: r.get(1),
            expires_at: r.get(2),
        }))
    }

    async fn save_window(&self, window: &SelectionWindow) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO selection_windows (job, ids, created_at, expires_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (job) DO UPDATE SET
                    ids = EXCLUDED.ids,
                    created_at = EXCLUDED.created_at,
                    expires_at = EXCLUDED.expires_at",
                &[&window.job, &window.ids, &window.created_at, &window.expires_at],
            )
            .await
            .with_context(|| format!("Failed to save selection window {}", window.job))?;
        Ok(())
    }

    async fn delete_window(&self, job: &str) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute("DELETE FROM selection_windows WHERE job = $1", &[&job])
            .await
            .with_context(|| format!("Failed to delete selection window {job}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_declares_selection_function() {
        assert!(SCHEMA.contains("FUNCTION harvest_empty_playlists"));
        assert!(SCHEMA.contains("PRIMARY KEY (playlist_id, track_id)"));
    }

    #[tokio::test]
    #[ignore = "requires a running PostgreSQL (HARVEST_TEST_POSTGRES_URL)"]
    async fn test_lock_round_trip() {
        let url = std::env::var("HARVEST_TEST_POSTGRES_URL")
            .unwrap_or_else(|_| "postgresql://localhost/harvest_test".into());
        let store = PostgresStore::connect(&url, 2).await.unwrap();
        let now = Utc::now();
        store.ensure_cycle_state(&CycleState::initial(now)).await.unwrap();
        store.release_lock().await.unwrap();

        let stale_before = now - chrono::Duration::hours(3);
        assert!(store.try_acquire_lock(now, stale_before).await.unwrap());
        assert!(!store.try_acquire_lock(now, stale_before).await.unwrap());
        store.release_lock().await.unwrap();
    }
}
