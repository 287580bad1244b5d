//! Persistence for catalog rows and scheduler state
//!
//! Two traits split the store by concern:
//!
//! - [`CatalogStore`]: discovery hits, playlists, tracks and links, all
//!   written with upserts keyed by natural external ids
//! - [`StateStore`]: the cycle state singleton with its single-flight lock,
//!   job cursors and selection windows
//!
//! ```text
//!        pipeline / scheduler
//!                 │
//!                 ▼
//!      CatalogStore + StateStore
//!                 │
//!         ┌───────┴────────┐
//!         ▼                ▼
//!    SqliteStore     PostgresStore
//! ```

pub mod postgres;
pub mod sqlite;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::DatabaseConfig;
use crate::models::{
    DiscoveryHit, JobCursor, PlaylistRecord, PlaylistWrite, SelectionWindow, StalePlaylist,
    StoreCounts, TrackLink, TrackRecord,
};
use crate::scheduler::state::CycleState;

// ============================================================================
// Store Traits
// ============================================================================

/// Catalog tables: `discovered_playlists`, `playlists`, `tracks`,
/// `playlist_tracks`
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert raw search hits; existing hits keep their discovery time and
    /// check status
    async fn upsert_discovery_hits(&self, hits: &[DiscoveryHit]) -> Result<usize>;

    /// Unchecked hits of a region discovered at or after `since`, newest first
    async fn cached_candidates(
        &self,
        region: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>>;

    async fn discovery_hits(&self, ids: &[String]) -> Result<Vec<DiscoveryHit>>;

    /// Record the validation outcome of a hit
    async fn mark_discovery_checked(
        &self,
        playlist_id: &str,
        validated: bool,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Subset of `ids` already present in the canonical table
    async fn known_playlist_ids(&self, ids: &[String]) -> Result<HashSet<String>>;

    async fn upsert_playlists(&self, rows: &[PlaylistWrite]) -> Result<usize>;

    /// Record the fingerprint of a playlist whose items were fully walked
    async fn set_playlist_etag(&self, external_id: &str, etag: Option<&str>) -> Result<()>;

    async fn playlist(&self, external_id: &str) -> Result<Option<PlaylistRecord>>;

    /// Bump `last_refreshed_on` without touching content
    async fn touch_refreshed(&self, ids: &[String], at: DateTime<Utc>) -> Result<()>;

    async fn upsert_tracks(&self, rows: &[TrackRecord]) -> Result<usize>;

    /// Upsert links by `(playlist_id, track_id)`, updating the position
    async fn upsert_links(&self, rows: &[TrackLink]) -> Result<usize>;

    /// Links of one playlist ordered by position
    async fn playlist_links(&self, playlist_id: &str) -> Result<Vec<TrackLink>>;

    /// Oldest-refreshed playlists of a region
    async fn stale_playlists(&self, region: &str, limit: usize) -> Result<Vec<StalePlaylist>>;

    /// Playlists without any link, stalest first
    async fn empty_playlists(&self, limit: usize) -> Result<Vec<String>>;

    async fn counts(&self) -> Result<StoreCounts>;
}

/// Scheduler tables: `cycle_state`, `job_cursors`, `selection_windows`
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Insert `initial` when no state row exists, then return the stored row
    async fn ensure_cycle_state(&self, initial: &CycleState) -> Result<CycleState>;

    async fn load_cycle_state(&self) -> Result<Option<CycleState>>;

    /// Persist mode, day, region and dates; lock columns are left alone
    async fn save_cycle_state(&self, state: &CycleState) -> Result<()>;

    /// Take the single-flight lock if it is free or was taken before
    /// `stale_before`
    async fn try_acquire_lock(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool>;

    async fn release_lock(&self) -> Result<()>;

    async fn load_cursor(&self, job: &str) -> Result<Option<JobCursor>>;

    async fn save_cursor(&self, cursor: &JobCursor) -> Result<()>;

    async fn delete_cursor(&self, job: &str) -> Result<()>;

    async fn load_window(&self, job: &str) -> Result<Option<SelectionWindow>>;

    async fn save_window(&self, window: &SelectionWindow) -> Result<()>;

    async fn delete_window(&self, job: &str) -> Result<()>;
}

/// Full store used by the pipeline and scheduler
pub trait Store: CatalogStore + StateStore {}

impl<T: CatalogStore + StateStore + ?Sized> Store for T {}

/// Thread-safe shared store
pub type SharedStore = Arc<dyn Store>;

/// Open the configured backend
///
/// A `postgres://` or `postgresql://` URL selects PostgreSQL, anything else
/// the SQLite file at `sqlite_path`.
pub async fn open(config: &DatabaseConfig) -> Result<SharedStore> {
    match config.url.as_deref() {
        Some(url) if url.starts_with("postgres") => {
            let store = PostgresStore::connect(url, config.pool_size).await?;
            Ok(Arc::new(store))
        }
        _ => Ok(Arc::new(SqliteStore::new(&config.sqlite_path)?)),
    }
}
