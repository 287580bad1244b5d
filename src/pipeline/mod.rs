//! Ingestion pipeline
//!
//! Drives discovery, detail fetches and playlist walks on top of the
//! [`PagingClient`], writing everything through idempotent upserts.
//!
//! # Jobs
//!
//! Every entry point runs as a [`ResumableJob`] whose unit of work is one
//! playlist:
//!
//! | Job | Selection | Per playlist |
//! |---|---|---|
//! | `fetch:<REGION>` | cached discovery hits, else seed searches; known ids removed | validate, promote, walk items |
//! | `refresh:<REGION>` | stalest canonical playlists of the region | skip if the ETag is unchanged, else re-walk |
//! | `backfill:empty` | playlists without any link, stalest first | walk items |
//! | `manual:<digest>` | explicit ids | validate, promote, walk items |
//!
//! # Failure handling
//!
//! - quota depletion aborts the job and propagates to the scheduler
//! - an exhausted tick budget stops the job; the cursor stays on the
//!   unfinished playlist so the next tick redoes it
//! - anything else fails only the current playlist

pub mod batch;
pub mod mapping;
pub mod resume;

pub use batch::{BatchStats, BatchWriter};
pub use resume::ResumableJob;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{
    decode_items, ApiError, ApiRequest, PagingClient, PlaylistItemResource, PlaylistResource,
    MAX_PAGE_SIZE,
};
use crate::config::Config;
use crate::credentials::TickBudget;
use crate::models::{DiscoveryHit, PlaylistWrite, RowShape};
use crate::scheduler::region::{api_region_code, relevance_language, GLOBAL};
use crate::scheduler::state::Mode;
use crate::seeds::{SeedError, SeedPlan};
use crate::storage::{CatalogStore, SharedStore};
use crate::utils::digest_ids;
use mapping::{map_item, playlist_record};

// ============================================================================
// Errors and results
// ============================================================================

/// Failures that end a pipeline job early
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error(transparent)]
    Seed(#[from] SeedError),
}

impl PipelineError {
    /// Every credential is out of quota
    pub fn is_depleted(&self) -> bool {
        matches!(self, Self::Api(e) if e.is_depleted())
    }

    pub fn is_budget_exhausted(&self) -> bool {
        matches!(self, Self::Api(e) if e.is_budget_exhausted())
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Api(e) => !matches!(e, ApiError::Permanent { .. } | ApiError::Decode(_)),
            Self::Store(_) => true,
            Self::Seed(_) => false,
        }
    }
}

/// Counters of one job or region
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub searches: usize,
    pub candidates: usize,
    pub playlists_ingested: usize,
    pub playlists_unchanged: usize,
    pub playlists_rejected: usize,
    pub playlists_failed: usize,
    pub tracks: usize,
    pub links: usize,
    pub failed_batches: usize,
}

impl IngestStats {
    fn absorb(&mut self, batch: BatchStats) {
        self.tracks += batch.tracks;
        self.links += batch.links;
        self.failed_batches += batch.failed_batches;
    }

    pub fn merge(&mut self, other: &IngestStats) {
        self.searches += other.searches;
        self.candidates += other.candidates;
        self.playlists_ingested += other.playlists_ingested;
        self.playlists_unchanged += other.playlists_unchanged;
        self.playlists_rejected += other.playlists_rejected;
        self.playlists_failed += other.playlists_failed;
        self.tracks += other.tracks;
        self.links += other.links;
        self.failed_batches += other.failed_batches;
    }
}

/// How a job ended without a hard error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionOutcome {
    /// The whole selection was consumed
    Completed(IngestStats),
    /// The tick budget ran out; the job resumes next tick
    BudgetExhausted(IngestStats),
}

impl RegionOutcome {
    pub fn stats(&self) -> &IngestStats {
        match self {
            Self::Completed(s) | Self::BudgetExhausted(s) => s,
        }
    }

    pub fn is_budget_exhausted(&self) -> bool {
        matches!(self, Self::BudgetExhausted(_))
    }
}

/// One region's unit of work within a tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionTask {
    pub region: String,
    /// Index of the region in the rotation, spreads seed queries
    pub position: usize,
    pub mode: Mode,
    pub cycle_start: NaiveDate,
    pub day: u32,
    /// UTC hour, selects the seed slot
    pub hour: u32,
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub discovery_ttl: chrono::Duration,
    pub min_cached_candidates: usize,
    pub queries_per_region: u32,
    pub max_new_per_region: usize,
    pub refresh_per_region: usize,
    pub backfill_batch: usize,
    pub window_ttl: chrono::Duration,
    pub row_shape: RowShape,
    /// Seed plan shape
    pub cycle_length: u32,
    pub slots: u32,
    pub per_slot: u32,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        let p = &config.pipeline;
        Self {
            batch_size: p.batch_size,
            batch_timeout: Duration::from_secs(p.batch_timeout_secs),
            discovery_ttl: chrono::Duration::hours(p.discovery_ttl_hours as i64),
            min_cached_candidates: p.min_cached_candidates,
            queries_per_region: p.queries_per_region,
            max_new_per_region: p.max_new_per_region,
            refresh_per_region: p.refresh_per_region,
            backfill_batch: p.backfill_batch,
            window_ttl: chrono::Duration::hours(p.window_ttl_hours as i64),
            row_shape: p.row_shape,
            cycle_length: config.scheduler.cycle_length,
            slots: config.seeds.slots,
            per_slot: config.seeds.per_slot,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// ============================================================================
// Pipeline
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    Discover,
    Refresh,
    Backfill,
    Manual,
}

impl JobKind {
    fn label(&self) -> &'static str {
        match self {
            Self::Discover => Mode::Fetch.as_str(),
            Self::Refresh => Mode::Refresh.as_str(),
            Self::Backfill => "BACKFILL",
            Self::Manual => "MANUAL",
        }
    }

    fn needs_details(&self) -> bool {
        !matches!(self, Self::Backfill)
    }
}

/// What to do after a unit failed
enum Flow {
    Skip,
    Stop,
}

fn triage(error: PipelineError) -> Result<Flow, PipelineError> {
    if error.is_depleted() {
        Err(error)
    } else if error.is_budget_exhausted() {
        Ok(Flow::Stop)
    } else {
        Ok(Flow::Skip)
    }
}

pub struct Pipeline {
    client: Arc<PagingClient>,
    store: SharedStore,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(client: Arc<PagingClient>, store: SharedStore, settings: PipelineSettings) -> Self {
        Self {
            client,
            store,
            settings,
        }
    }

    pub fn client(&self) -> &Arc<PagingClient> {
        &self.client
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Process one region in the given mode
    pub async fn run_region(
        &self,
        task: &RegionTask,
        budget: &TickBudget,
    ) -> Result<RegionOutcome, PipelineError> {
        let now = Utc::now();
        let mut stats = IngestStats::default();

        let (name, kind) = match task.mode {
            Mode::Fetch => (format!("fetch:{}", task.region), JobKind::Discover),
            Mode::Refresh => (format!("refresh:{}", task.region), JobKind::Refresh),
        };

        let job = match kind {
            JobKind::Discover => {
                let selection_stats = &mut stats;
                ResumableJob::open(&self.store, &name, self.settings.window_ttl, now, move || {
                    self.select_discovery(task, budget, selection_stats)
                })
                .await
            }
            _ => {
                ResumableJob::open(&self.store, &name, self.settings.window_ttl, now, || {
                    self.select_refresh(&task.region)
                })
                .await
            }
        };

        let job = match job {
            Ok(job) => job,
            Err(e) if e.is_budget_exhausted() => {
                info!(region = %task.region, "Budget exhausted during selection");
                return Ok(RegionOutcome::BudgetExhausted(stats));
            }
            Err(e) => return Err(e),
        };

        self.run_job(job, kind, &task.region, budget, stats).await
    }

    /// Ingest explicit playlist ids
    pub async fn ingest_playlists(
        &self,
        ids: &[String],
        budget: &TickBudget,
    ) -> Result<RegionOutcome, PipelineError> {
        let mut unique = Vec::with_capacity(ids.len());
        let mut seen = HashSet::with_capacity(ids.len());
        for id in ids.iter().map(|i| i.trim()).filter(|i| !i.is_empty()) {
            if seen.insert(id.to_string()) {
                unique.push(id.to_string());
            }
        }

        let name = format!("manual:{}", digest_ids(&unique));
        let job = ResumableJob::open(
            &self.store,
            &name,
            self.settings.window_ttl,
            Utc::now(),
            move || async move { Ok(unique) },
        )
        .await?;

        self.run_job(job, JobKind::Manual, GLOBAL, budget, IngestStats::default())
            .await
    }

    /// Walk items of empty playlists, stalest first
    pub async fn backfill_empty_playlists(
        &self,
        budget: &TickBudget,
    ) -> Result<RegionOutcome, PipelineError> {
        let limit = self.settings.backfill_batch;
        let job = ResumableJob::open(
            &self.store,
            "backfill:empty",
            self.settings.window_ttl,
            Utc::now(),
            || async move { Ok(self.store.empty_playlists(limit).await?) },
        )
        .await?;

        self.run_job(job, JobKind::Backfill, GLOBAL, budget, IngestStats::default())
            .await
    }

    // ------------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------------

    async fn select_discovery(
        &self,
        task: &RegionTask,
        budget: &TickBudget,
        stats: &mut IngestStats,
    ) -> Result<Vec<String>, PipelineError> {
        let now = Utc::now();
        let since = now - self.settings.discovery_ttl;
        let limit = self
            .settings
            .max_new_per_region
            .max(self.settings.min_cached_candidates);

        let mut candidates = self
            .store
            .cached_candidates(&task.region, since, limit)
            .await?;

        if candidates.len() >= self.settings.min_cached_candidates && !candidates.is_empty() {
            debug!(region = %task.region, cached = candidates.len(), "Using cached candidates");
        } else {
            let found = self.search_region(task, budget, stats).await?;
            let mut seen: HashSet<String> = candidates.iter().cloned().collect();
            candidates.extend(found.into_iter().filter(|id| seen.insert(id.clone())));
        }
        stats.candidates = candidates.len();

        let known = self.store.known_playlist_ids(&candidates).await?;
        for id in &known {
            self.store.mark_discovery_checked(id, true, now).await?;
        }
        candidates.retain(|id| !known.contains(id));
        candidates.truncate(self.settings.max_new_per_region);

        info!(
            region = %task.region,
            candidates = stats.candidates,
            known = known.len(),
            selected = candidates.len(),
            "Discovery selection ready"
        );
        Ok(candidates)
    }

    /// Run this region's seed queries and store the raw hits
    ///
    /// Hits found before a quota or budget stop are still stored; they feed
    /// the discovery cache of the next tick.
    async fn search_region(
        &self,
        task: &RegionTask,
        budget: &TickBudget,
        stats: &mut IngestStats,
    ) -> Result<Vec<String>, PipelineError> {
        let plan = SeedPlan::new(
            task.cycle_start,
            self.settings.cycle_length,
            self.settings.slots,
            self.settings.per_slot,
        )?;
        let day = task.day.clamp(1, plan.days());
        let slot = plan.slot_for_hour(task.hour);
        let per_slot = u64::from(plan.per_slot());
        let count = u64::from(self.settings.queries_per_region).min(per_slot);
        let base = (task.position as u64 * count) % per_slot;

        let region_code = api_region_code(&task.region);
        let language = relevance_language(&task.region);

        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        let mut halted = None;

        for i in 0..count {
            let index = ((base + i) % per_slot) as u32;
            let query = plan.query(day, slot, index)?;

            match self
                .client
                .search_playlists(&query.text, region_code, language, budget)
                .await
            {
                Ok(found) => {
                    stats.searches += 1;
                    let now = Utc::now();
                    for hit in found {
                        if seen.insert(hit.playlist_id.clone()) {
                            hits.push(DiscoveryHit {
                                playlist_id: hit.playlist_id,
                                region: task.region.clone(),
                                query: query.text.clone(),
                                category: query.genre.to_string(),
                                title: hit.title,
                                channel_title: hit.channel_title,
                                discovered_at: now,
                                checked_at: None,
                                validated: false,
                            });
                        }
                    }
                }
                Err(e) if e.is_depleted() || e.is_budget_exhausted() => {
                    halted = Some(e);
                    break;
                }
                Err(e) => {
                    warn!(region = %task.region, query = %query.text, error = %e, "Search failed");
                }
            }
        }

        if !hits.is_empty() {
            self.store.upsert_discovery_hits(&hits).await?;
        }
        if let Some(e) = halted {
            return Err(e.into());
        }

        Ok(hits.into_iter().map(|h| h.playlist_id).collect())
    }

    async fn select_refresh(&self, region: &str) -> Result<Vec<String>, PipelineError> {
        let stale = self
            .store
            .stale_playlists(region, self.settings.refresh_per_region)
            .await?;
        Ok(stale.into_iter().map(|p| p.external_id).collect())
    }

    // ------------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------------

    async fn run_job(
        &self,
        mut job: ResumableJob,
        kind: JobKind,
        region: &str,
        budget: &TickBudget,
        mut stats: IngestStats,
    ) -> Result<RegionOutcome, PipelineError> {
        let remaining = job.remaining();
        debug!(
            job = %job.name(),
            position = job.position(),
            remaining = remaining.len(),
            "Processing job"
        );

        for chunk in remaining.chunks(MAX_PAGE_SIZE) {
            let details = if kind.needs_details() {
                match self.client.playlist_details(chunk, budget).await {
                    Ok(list) => list.into_iter().map(|p| (p.id.clone(), p)).collect(),
                    Err(e) => match triage(e.into())? {
                        Flow::Stop => return Ok(self.stopped(&job, kind, stats)),
                        Flow::Skip => {
                            warn!(job = %job.name(), ids = chunk.len(), "Detail fetch failed, skipping chunk");
                            for id in chunk {
                                stats.playlists_failed += 1;
                                job.complete(id).await;
                            }
                            continue;
                        }
                    },
                }
            } else {
                HashMap::new()
            };

            let categories: HashMap<String, String> = if kind == JobKind::Discover {
                self.store
                    .discovery_hits(chunk)
                    .await?
                    .into_iter()
                    .map(|h| (h.playlist_id, h.category))
                    .collect()
            } else {
                HashMap::new()
            };

            for id in chunk {
                let result = self
                    .process_unit(
                        kind,
                        id,
                        details.get(id),
                        region,
                        categories.get(id).map(String::as_str),
                        budget,
                        &mut stats,
                    )
                    .await;

                if let Err(e) = result {
                    let message = e.to_string();
                    match triage(e)? {
                        Flow::Stop => return Ok(self.stopped(&job, kind, stats)),
                        Flow::Skip => {
                            warn!(job = %job.name(), playlist = %id, error = %message, "Playlist failed");
                            stats.playlists_failed += 1;
                        }
                    }
                }

                job.complete(id).await;
            }
        }

        let name = job.name().to_string();
        job.finish().await?;
        crate::metrics::record_playlists_ingested(kind.label(), stats.playlists_ingested as u64);

        info!(
            job = %name,
            ingested = stats.playlists_ingested,
            unchanged = stats.playlists_unchanged,
            rejected = stats.playlists_rejected,
            failed = stats.playlists_failed,
            tracks = stats.tracks,
            links = stats.links,
            "Job completed"
        );
        Ok(RegionOutcome::Completed(stats))
    }

    fn stopped(&self, job: &ResumableJob, kind: JobKind, stats: IngestStats) -> RegionOutcome {
        crate::metrics::record_playlists_ingested(kind.label(), stats.playlists_ingested as u64);
        info!(
            job = %job.name(),
            position = job.position(),
            total = job.total(),
            "Tick budget exhausted, job will resume"
        );
        RegionOutcome::BudgetExhausted(stats)
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_unit(
        &self,
        kind: JobKind,
        id: &str,
        resource: Option<&PlaylistResource>,
        region: &str,
        category: Option<&str>,
        budget: &TickBudget,
        stats: &mut IngestStats,
    ) -> Result<(), PipelineError> {
        let now = Utc::now();

        match kind {
            JobKind::Discover => {
                let valid = resource.is_some_and(PlaylistResource::is_valid);
                self.store.mark_discovery_checked(id, valid, now).await?;

                let Some(resource) = resource.filter(|r| r.is_valid()) else {
                    debug!(playlist = %id, "Rejected: not public or empty");
                    stats.playlists_rejected += 1;
                    return Ok(());
                };

                self.promote(resource, region, category, None).await?;
                self.walk(id, budget, stats).await?;
                self.seal(resource).await?;
            }
            JobKind::Refresh => {
                let Some(resource) = resource.filter(|r| r.is_valid()) else {
                    debug!(playlist = %id, "No longer available, touching");
                    self.store.touch_refreshed(&[id.to_string()], now).await?;
                    stats.playlists_rejected += 1;
                    return Ok(());
                };

                let stored = self.store.playlist(id).await?;
                let previous = stored.as_ref().and_then(|p| p.etag.as_deref());
                if previous.is_some() && previous == resource.etag.as_deref() {
                    self.store.touch_refreshed(&[id.to_string()], now).await?;
                    stats.playlists_unchanged += 1;
                    return Ok(());
                }

                let region = stored.as_ref().map_or(region, |p| p.region.as_str());
                let category = stored.as_ref().and_then(|p| p.category.as_deref());
                self.promote(resource, region, category, previous).await?;
                self.walk(id, budget, stats).await?;
                self.seal(resource).await?;
            }
            JobKind::Backfill => {
                self.walk(id, budget, stats).await?;
                // Moves the playlist behind the others if it stays empty.
                self.store.touch_refreshed(&[id.to_string()], now).await?;
            }
            JobKind::Manual => {
                let Some(resource) = resource.filter(|r| r.is_valid()) else {
                    warn!(playlist = %id, "Rejected: missing, private or empty");
                    stats.playlists_rejected += 1;
                    return Ok(());
                };

                let stored = self.store.playlist(id).await?;
                let previous = stored.as_ref().and_then(|p| p.etag.as_deref());
                let region = stored.as_ref().map_or(region, |p| p.region.as_str());
                let category = stored.as_ref().and_then(|p| p.category.as_deref());
                self.promote(resource, region, category, previous).await?;
                self.walk(id, budget, stats).await?;
                self.seal(resource).await?;
            }
        }

        stats.playlists_ingested += 1;
        Ok(())
    }

    /// Upsert the playlist row, holding back the fetched ETag
    ///
    /// The row keeps `held_etag` until [`Self::seal`] runs after a complete
    /// walk, so an interrupted walk is never mistaken for an unchanged
    /// playlist.
    async fn promote(
        &self,
        resource: &PlaylistResource,
        region: &str,
        category: Option<&str>,
        held_etag: Option<&str>,
    ) -> Result<(), PipelineError> {
        let mut record = playlist_record(resource, region, category, Utc::now());
        record.etag = held_etag.map(str::to_string);
        let n = self
            .store
            .upsert_playlists(&[PlaylistWrite::new(record, self.settings.row_shape)])
            .await?;
        crate::metrics::record_rows_upserted("playlists", n);
        Ok(())
    }

    async fn seal(&self, resource: &PlaylistResource) -> Result<(), PipelineError> {
        self.store
            .set_playlist_etag(&resource.id, resource.etag.as_deref())
            .await?;
        Ok(())
    }

    async fn walk(
        &self,
        playlist_id: &str,
        budget: &TickBudget,
        stats: &mut IngestStats,
    ) -> Result<(), PipelineError> {
        let (batch, result) = self.ingest_items(playlist_id, budget).await;
        stats.absorb(batch);
        result
    }

    /// Page through a playlist's members, writing tracks and links in batches
    ///
    /// Rows gathered before a failing page are still written.
    async fn ingest_items(
        &self,
        playlist_id: &str,
        budget: &TickBudget,
    ) -> (BatchStats, Result<(), PipelineError>) {
        let mut writer = BatchWriter::new(
            self.store.clone(),
            self.settings.batch_size,
            self.settings.batch_timeout,
        );
        let request = ApiRequest::PlaylistItems {
            playlist_id: playlist_id.to_string(),
            page_token: None,
        };
        let mut pager = self
            .client
            .pages(request, self.client.settings().max_item_pages);

        let mut position = 0u32;
        let mut skipped = 0usize;

        let result = loop {
            let page = match pager.next_page(budget).await {
                Ok(Some(page)) => page,
                Ok(None) => break Ok(()),
                Err(e) => break Err(PipelineError::from(e)),
            };

            for item in decode_items::<PlaylistItemResource>(page.items) {
                match map_item(playlist_id, &item, position) {
                    Some((track, link)) => writer.push(track, link).await,
                    None => skipped += 1,
                }
                position += 1;
            }
        };

        let batch = writer.finish().await;
        debug!(
            playlist = %playlist_id,
            pages = pager.pages_fetched(),
            items = position,
            skipped = skipped,
            links = batch.links,
            "Playlist walked"
        );
        (batch, result)
    }
}
