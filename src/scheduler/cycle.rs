//! Cycle scheduler
//!
//! One tick = take the single-flight lock, process the next regions of the
//! rotation in the current mode, backfill empty playlists with what is left
//! of the budget, advance the day, release the lock.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::error::{SchedulerError, SchedulerResult};
use super::region::{next_regions, position};
use super::state::{CycleState, DayAdvance, Mode};
use crate::config::Config;
use crate::credentials::{ApiOperation, CredentialPool, CredentialSnapshot, TickBudget};
use crate::models::StoreCounts;
use crate::pipeline::{IngestStats, Pipeline, RegionOutcome, RegionTask};
use crate::storage::{CatalogStore, SharedStore, StateStore};

// ============================================================================
// Settings and outcomes
// ============================================================================

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub regions: Vec<String>,
    pub regions_per_tick: usize,
    pub cycle_length: u32,
    pub tick_interval: Duration,
    /// Quota units one tick may spend, 0 for no limit
    pub tick_budget: u64,
    pub depletion_cooldown: Duration,
    pub region_timeout: Duration,
    pub lock_stale_after: chrono::Duration,
    pub day_advance: DayAdvance,
    /// Pins the seed plan anchor instead of the persisted cycle start
    pub cycle_start: Option<NaiveDate>,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        let s = &config.scheduler;
        Self {
            regions: s.regions.clone(),
            regions_per_tick: s.regions_per_tick,
            cycle_length: s.cycle_length,
            tick_interval: config.tick_interval(),
            tick_budget: config.quota.tick_budget,
            depletion_cooldown: Duration::from_secs(s.depletion_cooldown_mins * 60),
            region_timeout: Duration::from_secs(s.region_timeout_secs),
            lock_stale_after: chrono::Duration::minutes(s.lock_stale_after_mins as i64),
            day_advance: s.day_advance,
            cycle_start: config.seeds.cycle_start,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub mode: Option<Mode>,
    pub day: u32,
    /// Regions fully processed, in order
    pub regions: Vec<String>,
    /// Regions abandoned for this tick (timeout or error)
    pub abandoned: Vec<String>,
    pub stats: IngestStats,
    pub units_spent: u64,
    pub mode_flipped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// Another tick holds the lock
    Skipped,
    /// All selected regions processed, day advanced
    Completed(TickReport),
    /// Stopped early on the tick budget, day advanced
    BudgetExhausted(TickReport),
    /// Every credential out of quota; state left for the next tick
    QuotaDepleted(TickReport),
}

impl TickOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Completed(_) => "completed",
            Self::BudgetExhausted(_) => "budget_exhausted",
            Self::QuotaDepleted(_) => "quota_depleted",
        }
    }

    pub fn report(&self) -> Option<&TickReport> {
        match self {
            Self::Skipped => None,
            Self::Completed(r) | Self::BudgetExhausted(r) | Self::QuotaDepleted(r) => Some(r),
        }
    }
}

/// Read-only view for the status query
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub mode: Mode,
    pub day: u32,
    pub cycle_length: u32,
    pub last_region: Option<String>,
    pub next_regions: Vec<String>,
    pub cycle_started_on: NaiveDate,
    pub locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub lock_stale: bool,
    pub uptime_secs: i64,
    pub credentials: Vec<CredentialSnapshot>,
    pub counts: StoreCounts,
}

impl StatusReport {
    /// Build the report from persisted state; an absent state row reads as
    /// the initial state without being written
    pub async fn collect(
        store: &SharedStore,
        settings: &SchedulerSettings,
        credentials: Vec<CredentialSnapshot>,
        started_at: DateTime<Utc>,
    ) -> SchedulerResult<Self> {
        let now = Utc::now();
        let state = store
            .load_cycle_state()
            .await?
            .unwrap_or_else(|| CycleState::initial(now));
        let counts = store.counts().await?;

        Ok(Self {
            mode: state.mode,
            day: state.day,
            cycle_length: settings.cycle_length,
            next_regions: next_regions(
                &settings.regions,
                state.last_region.as_deref(),
                settings.regions_per_tick,
            ),
            last_region: state.last_region.clone(),
            cycle_started_on: settings.cycle_start.unwrap_or(state.cycle_started_on),
            locked: state.locked,
            locked_at: state.locked_at,
            lock_stale: state.lock_is_stale(now, settings.lock_stale_after),
            uptime_secs: (now - started_at).num_seconds(),
            credentials,
            counts,
        })
    }
}

/// Clear the single-flight lock unconditionally
pub async fn reset_lock(store: &SharedStore) -> SchedulerResult<()> {
    let state = store.load_cycle_state().await?;
    store.release_lock().await?;
    match state {
        Some(s) if s.locked => {
            warn!(locked_at = ?s.locked_at, "Single-flight lock reset manually");
        }
        _ => info!("Lock reset requested, lock was not held"),
    }
    Ok(())
}

// ============================================================================
// Scheduler
// ============================================================================

pub struct CycleScheduler {
    pipeline: Arc<Pipeline>,
    store: SharedStore,
    settings: SchedulerSettings,
    started_at: DateTime<Utc>,
    stop: watch::Sender<bool>,
}

impl CycleScheduler {
    pub fn new(pipeline: Arc<Pipeline>, settings: SchedulerSettings) -> Self {
        let store = pipeline.store().clone();
        let (stop, _) = watch::channel(false);
        Self {
            pipeline,
            store,
            settings,
            started_at: Utc::now(),
            stop,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    fn pool(&self) -> &Arc<CredentialPool> {
        self.pipeline.client().pool()
    }

    /// Cut short a depletion cooldown; the in-flight tick still returns
    pub fn request_stop(&self) {
        self.stop.send_replace(true);
    }

    /// Run one tick under the single-flight lock
    ///
    /// The lock is released on every path, including a panic in the tick
    /// body.
    pub async fn tick(&self) -> SchedulerResult<TickOutcome> {
        let now = Utc::now();
        let state = self
            .store
            .ensure_cycle_state(&CycleState::initial(now))
            .await?;

        if state.lock_is_stale(now, self.settings.lock_stale_after) {
            warn!(
                locked_at = ?state.locked_at,
                stale_after_mins = self.settings.lock_stale_after.num_minutes(),
                "Taking over stale lock"
            );
        }

        let stale_before = now - self.settings.lock_stale_after;
        if !self.store.try_acquire_lock(now, stale_before).await? {
            info!(locked_at = ?state.locked_at, "Tick skipped, another tick holds the lock");
            crate::metrics::record_tick(TickOutcome::Skipped.as_str());
            return Ok(TickOutcome::Skipped);
        }

        let span = info_span!(
            "tick",
            id = %Uuid::new_v4(),
            mode = %state.mode,
            day = state.day
        );
        let result = AssertUnwindSafe(self.run_tick().instrument(span))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(SchedulerError::Panicked(panic_message(panic))));

        if let Err(e) = self.store.release_lock().await {
            error!(error = %e, "Failed to release lock");
            if result.is_ok() {
                return Err(e.into());
            }
        }

        match &result {
            Ok(outcome) => crate::metrics::record_tick(outcome.as_str()),
            Err(e) => {
                error!(error = %e, "Tick failed");
                crate::metrics::record_tick("failed");
            }
        }
        result
    }

    async fn run_tick(&self) -> SchedulerResult<TickOutcome> {
        // Re-read under the lock; a previous holder may have moved on.
        let mut state = self
            .store
            .load_cycle_state()
            .await?
            .ok_or_else(|| SchedulerError::invalid_state("cycle state row disappeared"))?;
        if state.day == 0 {
            return Err(SchedulerError::invalid_state("day 0 is outside the cycle"));
        }

        let now = Utc::now();
        let pool = self.pool();
        if pool.maybe_reset_daily(now) {
            info!("Daily quota reset applied");
        }
        crate::metrics::set_credentials_cooling(pool.cooling_count());
        crate::metrics::set_cycle_day(state.day);

        let budget = match self.settings.tick_budget {
            0 => TickBudget::unlimited(),
            limit => TickBudget::new(limit),
        };
        let cycle_start = self.settings.cycle_start.unwrap_or(state.cycle_started_on);
        let regions = next_regions(
            &self.settings.regions,
            state.last_region.as_deref(),
            self.settings.regions_per_tick,
        );

        let mut report = TickReport {
            mode: Some(state.mode),
            day: state.day,
            ..Default::default()
        };

        info!(
            regions = ?regions,
            budget = budget.limit(),
            cycle_start = %cycle_start,
            "Tick started"
        );

        let mut budget_stopped = false;
        // Once a region past the head of the tick is abandoned, the rotation
        // stays behind it so the next tick starts there. An abandoned head
        // region is passed over so one bad region cannot stall the rotation.
        let mut held = false;
        for (index, region) in regions.into_iter().enumerate() {
            let task = RegionTask {
                position: position(&self.settings.regions, &region).unwrap_or(0),
                region: region.clone(),
                mode: state.mode,
                cycle_start,
                day: state.day,
                hour: Utc::now().hour(),
            };

            let timer = crate::metrics::start_region_timer(&region, state.mode.as_str());
            let result = tokio::time::timeout(
                self.settings.region_timeout,
                self.pipeline.run_region(&task, &budget),
            )
            .await;
            drop(timer);

            match result {
                Err(_) => {
                    warn!(
                        region = %region,
                        timeout_secs = self.settings.region_timeout.as_secs(),
                        "Region timed out, retried on a later tick"
                    );
                    held |= index > 0;
                    report.abandoned.push(region);
                }
                Ok(Err(e)) if e.is_depleted() => {
                    report.units_spent = budget.spent();
                    return Ok(self.depleted(report, &region).await);
                }
                Ok(Err(e)) => {
                    warn!(region = %region, error = %e, "Region failed, retried on a later tick");
                    held |= index > 0;
                    report.abandoned.push(region);
                }
                Ok(Ok(outcome)) => {
                    report.stats.merge(outcome.stats());
                    if let RegionOutcome::BudgetExhausted(_) = outcome {
                        info!(region = %region, spent = budget.spent(), "Tick budget exhausted");
                        budget_stopped = true;
                        break;
                    }

                    if !held {
                        state.last_region = Some(region.clone());
                        state.updated_at = Utc::now();
                        self.store.save_cycle_state(&state).await?;
                        debug!(region = %region, "Region progress saved");
                    }
                    report.regions.push(region);
                }
            }
        }

        let item_cost = pool.costs().cost(ApiOperation::ListPlaylistItems);
        if !budget_stopped && budget.can_afford(item_cost) {
            match tokio::time::timeout(
                self.settings.region_timeout,
                self.pipeline.backfill_empty_playlists(&budget),
            )
            .await
            {
                Ok(Ok(outcome)) => {
                    report.stats.merge(outcome.stats());
                    budget_stopped = outcome.is_budget_exhausted();
                }
                Ok(Err(e)) if e.is_depleted() => {
                    report.units_spent = budget.spent();
                    return Ok(self.depleted(report, "backfill").await);
                }
                Ok(Err(e)) => warn!(error = %e, "Backfill failed"),
                Err(_) => warn!("Backfill timed out"),
            }
        }

        let now = Utc::now();
        if state.should_advance(self.settings.day_advance, now.date_naive()) {
            let previous = state.mode;
            report.mode_flipped = state.advance_day(self.settings.cycle_length, now);
            if report.mode_flipped {
                info!(from = %previous, to = %state.mode, "Cycle boundary crossed, mode flipped");
            }
        }
        state.updated_at = now;
        self.store.save_cycle_state(&state).await?;
        crate::metrics::set_cycle_day(state.day);
        crate::metrics::set_credentials_cooling(pool.cooling_count());

        report.units_spent = budget.spent();
        info!(
            regions = report.regions.len(),
            abandoned = report.abandoned.len(),
            ingested = report.stats.playlists_ingested,
            links = report.stats.links,
            spent = report.units_spent,
            next_day = state.day,
            next_mode = %state.mode,
            "Tick finished"
        );

        Ok(if budget_stopped {
            TickOutcome::BudgetExhausted(report)
        } else {
            TickOutcome::Completed(report)
        })
    }

    /// Sleep the depletion cooldown, cut short by [`Self::request_stop`]
    async fn depleted(&self, report: TickReport, during: &str) -> TickOutcome {
        let cooldown = self.settings.depletion_cooldown;
        warn!(
            during = %during,
            cooldown_mins = cooldown.as_secs() / 60,
            "Quota depleted on every credential, pausing"
        );

        let mut stop = self.stop.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(cooldown) => {}
            _ = stop.wait_for(|stopped| *stopped) => {
                info!("Depletion cooldown interrupted by shutdown");
            }
        }
        TickOutcome::QuotaDepleted(report)
    }

    pub async fn status(&self) -> SchedulerResult<StatusReport> {
        StatusReport::collect(
            &self.store,
            &self.settings,
            self.pool().snapshot(),
            self.started_at,
        )
        .await
    }

    pub async fn reset_lock(&self) -> SchedulerResult<()> {
        reset_lock(&self.store).await
    }

    /// Tick on a fixed interval until `shutdown` resolves
    ///
    /// The first tick fires immediately and missed ticks are skipped. A
    /// shutdown during a tick lets that tick finish first.
    pub async fn run<F>(&self, shutdown: F) -> SchedulerResult<()>
    where
        F: std::future::Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut interval = tokio::time::interval(self.settings.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_mins = self.settings.tick_interval.as_secs() / 60,
            regions = self.settings.regions.len(),
            per_tick = self.settings.regions_per_tick,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {}
            }

            let tick = self.tick();
            tokio::pin!(tick);

            let result = tokio::select! {
                result = &mut tick => result,
                _ = &mut shutdown => {
                    info!("Shutdown requested, finishing in-flight tick");
                    self.request_stop();
                    let result = tick.await;
                    log_tick_result(&result);
                    break;
                }
            };
            log_tick_result(&result);
        }

        info!("Scheduler stopped");
        Ok(())
    }
}

fn log_tick_result(result: &SchedulerResult<TickOutcome>) {
    match result {
        Ok(outcome) => debug!(outcome = outcome.as_str(), "Tick returned"),
        Err(e) if e.is_recoverable() => warn!(error = %e, "Tick failed, retrying next interval"),
        Err(e) => error!(error = %e, "Tick failed with unrecoverable error"),
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(TickOutcome::Skipped.as_str(), "skipped");
        assert!(TickOutcome::Skipped.report().is_none());
        let done = TickOutcome::Completed(TickReport::default());
        assert_eq!(done.as_str(), "completed");
        assert!(done.report().is_some());
    }

    #[test]
    fn test_outcome_serializes_tagged() {
        let json = serde_json::to_value(TickOutcome::Skipped).unwrap();
        assert_eq!(json["outcome"], "skipped");
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "unknown panic");
    }

    #[test]
    fn test_settings_from_config() {
        let settings = SchedulerSettings::default();
        assert_eq!(settings.cycle_length, 29);
        assert_eq!(settings.regions_per_tick, 3);
        assert_eq!(settings.region_timeout, Duration::from_secs(120));
        assert_eq!(settings.lock_stale_after, chrono::Duration::hours(3));
    }
}
