//! Configuration management for the harvester
//!
//! Configuration is read from an optional TOML file and then overridden by
//! `HARVEST_*` environment variables. Every section has defaults, so an empty
//! file (or none at all) is a valid starting point.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::api::{PagingSettings, DEFAULT_BASE_URL};
use crate::credentials::{PoolSettings, QuotaCostTable};
use crate::models::RowShape;
use crate::scheduler::state::DayAdvance;
use crate::seeds::MAX_PER_SLOT;
use crate::utils::retry::RetryConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub quota: QuotaConfig,
    pub scheduler: SchedulerConfig,
    pub pipeline: PipelineConfig,
    pub seeds: SeedsConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// External API access
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Credential list
    #[serde(skip_serializing)]
    pub keys: Vec<String>,

    pub base_url: String,

    /// Process-wide request rate (requests per second)
    pub requests_per_second: u32,

    pub timeout_secs: u64,

    /// Transient retries per call
    pub max_retries: u32,

    pub retry_base_delay_ms: u64,

    /// Pause between consecutive pages
    pub page_delay_ms: u64,

    pub max_item_pages: usize,

    pub max_search_pages: usize,

    /// Searches returning fewer results are discarded
    pub min_search_results: usize,
}

/// Credential quota accounting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Units per credential per day
    pub daily_limit: u64,

    pub cooldown_mins: u64,

    pub min_key_gap_ms: u64,

    /// Bounded wait when every credential is cooling down
    pub exhausted_wait_secs: u64,

    /// 0 disables early rotation
    pub max_consecutive_uses: u32,

    pub reset_hour_utc: u32,

    /// Units one tick may spend
    pub tick_budget: u64,

    pub costs: QuotaCostTable,
}

/// Cycle scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Days per phase before the mode flips
    pub cycle_length: u32,

    pub tick_interval_mins: u64,

    pub regions_per_tick: usize,

    /// Sleep after total quota depletion
    pub depletion_cooldown_mins: u64,

    pub region_timeout_secs: u64,

    /// A lock older than this is taken over
    pub lock_stale_after_mins: u64,

    pub day_advance: DayAdvance,

    /// Rotation order; `GLOBAL` omits the region filter
    pub regions: Vec<String>,
}

/// Ingestion pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Rows per store write
    pub batch_size: usize,

    pub batch_timeout_secs: u64,

    /// How long unchecked discovery hits stay usable
    pub discovery_ttl_hours: u64,

    /// Cached candidates needed to skip searching
    pub min_cached_candidates: usize,

    /// Seed queries issued per region when searching
    pub queries_per_region: u32,

    /// New playlists ingested per region per tick
    pub max_new_per_region: usize,

    /// Playlists refreshed per region per tick
    pub refresh_per_region: usize,

    /// Empty playlists backfilled per selection window
    pub backfill_batch: usize,

    pub window_ttl_hours: u64,

    pub row_shape: RowShape,
}

/// Seed query plan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedsConfig {
    /// Pins the plan anchor instead of the persisted cycle start
    pub cycle_start: Option<NaiveDate>,

    /// Time slots per day; must divide 24
    pub slots: u32,

    pub per_slot: u32,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `postgres://` URL; SQLite is used when absent
    pub url: Option<String>,

    /// SQLite database path
    pub sqlite_path: PathBuf,

    /// Maximum pool size
    pub pool_size: usize,
}

/// Operational HTTP surface
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

/// Rotation order used when none is configured
pub const DEFAULT_REGIONS: [&str; 20] = [
    "GLOBAL", "US", "GB", "CA", "AU", "IN", "BR", "MX", "DE", "FR", "ES", "IT", "JP", "KR", "ID",
    "PH", "NG", "ZA", "TR", "SE",
];

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            requests_per_second: 5,
            timeout_secs: 30,
            max_retries: 2,
            retry_base_delay_ms: 2000,
            page_delay_ms: 250,
            max_item_pages: 20,
            max_search_pages: 1,
            min_search_results: 10,
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: 10_000,
            cooldown_mins: 60,
            min_key_gap_ms: 300,
            exhausted_wait_secs: 5,
            max_consecutive_uses: 25,
            reset_hour_utc: 8,
            tick_budget: 3_000,
            costs: QuotaCostTable::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cycle_length: 29,
            tick_interval_mins: 30,
            regions_per_tick: 3,
            depletion_cooldown_mins: 60,
            region_timeout_secs: 120,
            lock_stale_after_mins: 180,
            day_advance: DayAdvance::Tick,
            regions: DEFAULT_REGIONS.iter().map(|r| r.to_string()).collect(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_timeout_secs: 30,
            discovery_ttl_hours: 24,
            min_cached_candidates: 10,
            queries_per_region: 3,
            max_new_per_region: 50,
            refresh_per_region: 25,
            backfill_batch: 20,
            window_ttl_hours: 6,
            row_shape: RowShape::Full,
        }
    }
}

impl Default for SeedsConfig {
    fn default() -> Self {
        Self {
            cycle_start: None,
            slots: 6,
            per_slot: 120,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            sqlite_path: PathBuf::from("data/harvest.db"),
            pool_size: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var(name)
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| anyhow::anyhow!("Invalid {name}={v}: {e}"))
        })
        .transpose()
}

/// Split a comma-separated credential list, ignoring blanks
pub fn parse_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Load configuration from environment variables over defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// File (when given) with environment overrides applied on top
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `HARVEST_*` (and `DATABASE_URL`) overrides
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(keys) = env_var("HARVEST_API_KEYS") {
            self.api.keys = parse_keys(&keys);
        }
        if let Some(url) = env_var("HARVEST_API_BASE_URL") {
            self.api.base_url = url;
        }

        if let Some(v) = env_parse("HARVEST_DAILY_LIMIT")? {
            self.quota.daily_limit = v;
        }
        if let Some(v) = env_parse("HARVEST_COOLDOWN_MINS")? {
            self.quota.cooldown_mins = v;
        }
        if let Some(v) = env_parse("HARVEST_MIN_KEY_GAP_MS")? {
            self.quota.min_key_gap_ms = v;
        }
        if let Some(v) = env_parse("HARVEST_MAX_CONSECUTIVE_USES")? {
            self.quota.max_consecutive_uses = v;
        }
        if let Some(v) = env_parse("HARVEST_TICK_BUDGET")? {
            self.quota.tick_budget = v;
        }

        if let Some(v) = env_parse("HARVEST_CYCLE_LENGTH")? {
            self.scheduler.cycle_length = v;
        }
        if let Some(v) = env_parse("HARVEST_TICK_INTERVAL_MINS")? {
            self.scheduler.tick_interval_mins = v;
        }
        if let Some(v) = env_parse("HARVEST_REGIONS_PER_TICK")? {
            self.scheduler.regions_per_tick = v;
        }
        if let Some(v) = env_parse("HARVEST_DEPLETION_COOLDOWN_MINS")? {
            self.scheduler.depletion_cooldown_mins = v;
        }
        if let Some(v) = env_parse("HARVEST_REGION_TIMEOUT_SECS")? {
            self.scheduler.region_timeout_secs = v;
        }
        if let Some(v) = env_parse::<DayAdvance>("HARVEST_DAY_ADVANCE")? {
            self.scheduler.day_advance = v;
        }

        if let Some(v) = env_parse("HARVEST_MIN_SEARCH_RESULTS")? {
            self.api.min_search_results = v;
        }
        if let Some(v) = env_parse::<RowShape>("HARVEST_ROW_SHAPE")? {
            self.pipeline.row_shape = v;
        }
        if let Some(v) = env_parse::<NaiveDate>("HARVEST_CYCLE_START")? {
            self.seeds.cycle_start = Some(v);
        }

        if let Some(url) = env_var("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(path) = env_var("HARVEST_SQLITE_PATH") {
            self.database.sqlite_path = PathBuf::from(path);
        }
        if let Some(listen) = env_var("HARVEST_LISTEN") {
            self.server.listen = Some(listen);
        }
        if let Some(format) = env_var("HARVEST_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.cycle_length == 0 {
            anyhow::bail!("cycle_length must be greater than 0");
        }

        if self.scheduler.regions_per_tick == 0 {
            anyhow::bail!("regions_per_tick must be greater than 0");
        }

        if self.scheduler.regions.is_empty() {
            anyhow::bail!("at least one region must be configured");
        }

        if self.quota.daily_limit == 0 {
            anyhow::bail!("daily_limit must be greater than 0");
        }

        if self.quota.reset_hour_utc > 23 {
            anyhow::bail!("reset_hour_utc must be 0-23");
        }

        if self.pipeline.batch_size == 0 {
            anyhow::bail!("batch_size must be greater than 0");
        }

        if self.api.requests_per_second == 0 {
            anyhow::bail!("requests_per_second must be greater than 0");
        }

        let base = url::Url::parse(&self.api.base_url)
            .with_context(|| format!("Invalid api.base_url: {}", self.api.base_url))?;
        if !matches!(base.scheme(), "http" | "https") {
            anyhow::bail!("api.base_url must be http or https, got {}", base.scheme());
        }

        if self.seeds.slots == 0 || 24 % self.seeds.slots != 0 {
            anyhow::bail!("seeds.slots must be a divisor of 24, got {}", self.seeds.slots);
        }

        if self.seeds.per_slot == 0 || self.seeds.per_slot > MAX_PER_SLOT {
            anyhow::bail!(
                "seeds.per_slot must be 1..={MAX_PER_SLOT}, got {}",
                self.seeds.per_slot
            );
        }

        if self.pipeline.queries_per_region > self.seeds.per_slot {
            anyhow::bail!("queries_per_region cannot exceed seeds.per_slot");
        }

        if self.database.pool_size == 0 {
            anyhow::bail!("pool_size must be greater than 0");
        }

        Ok(())
    }

    pub fn has_credentials(&self) -> bool {
        !self.api.keys.is_empty()
    }

    /// Credential pool tuning derived from the quota section
    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            daily_limit: self.quota.daily_limit,
            cooldown: Duration::from_secs(self.quota.cooldown_mins * 60),
            min_gap: Duration::from_millis(self.quota.min_key_gap_ms),
            exhausted_wait: Duration::from_secs(self.quota.exhausted_wait_secs),
            max_consecutive_uses: self.quota.max_consecutive_uses,
            reset_hour_utc: self.quota.reset_hour_utc,
        }
    }

    /// Paging client limits derived from the api section
    pub fn paging_settings(&self) -> PagingSettings {
        PagingSettings {
            retry: RetryConfig::with_delays(
                self.api.max_retries,
                self.api.retry_base_delay_ms,
                30_000,
            ),
            page_delay: Duration::from_millis(self.api.page_delay_ms),
            max_item_pages: self.api.max_item_pages,
            max_search_pages: self.api.max_search_pages,
            min_search_results: self.api.min_search_results,
        }
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.tick_interval_mins.max(1) * 60)
    }
}
