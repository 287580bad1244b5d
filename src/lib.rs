//! playlist-harvester - quota-aware playlist and track harvester
//!
//! Discovers, fetches and refreshes playlist metadata from a quota-limited,
//! paginated video API using a rotating pool of API keys, and persists the
//! results through idempotent upserts.
//!
//! # Architecture
//!
//! The library is organized into several modules, leaf first:
//!
//! - [`credentials`] - Credential pool, quota cost table, per-tick budget
//! - [`seeds`] - Deterministic seed query generator
//! - [`api`] - Wire types, HTTP client and the resumable paging client
//! - [`storage`] - Catalog and scheduler state stores (SQLite, PostgreSQL)
//! - [`pipeline`] - Discovery, refresh, backfill and manual ingestion
//! - [`scheduler`] - Cycle state machine, region rotation, tick loop
//! - [`server`] - Operational HTTP surface
//! - [`config`] - Configuration management and settings
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Retry, query sanitising, key masking
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use playlist_harvester::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = playlist_harvester::storage::open(&config.database).await?;
//!     let pool = Arc::new(CredentialPool::new(
//!         config.api.keys.clone(),
//!         config.quota.costs.clone(),
//!         config.pool_settings(),
//!     )?);
//!     let api = Arc::new(HttpVideoApi::with_base_url(
//!         &config.api.base_url,
//!         config.api.requests_per_second,
//!         config.request_timeout(),
//!     )?);
//!     let client = Arc::new(PagingClient::new(api, pool, config.paging_settings()));
//!     let pipeline = Arc::new(Pipeline::new(
//!         client,
//!         store,
//!         PipelineSettings::from_config(&config),
//!     ));
//!     let scheduler = CycleScheduler::new(pipeline, SchedulerSettings::from_config(&config));
//!     let outcome = scheduler.tick().await?;
//!     println!("{}", outcome.as_str());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod credentials;
pub mod error;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod scheduler;
pub mod seeds;
pub mod server;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::api::{HttpVideoApi, PagingClient, VideoApi};
    pub use crate::config::Config;
    pub use crate::credentials::{ApiOperation, CredentialPool, TickBudget};
    pub use crate::error::{Error, ErrorCategory, HarvestErrorTrait, Result};
    pub use crate::pipeline::{Pipeline, PipelineSettings};
    pub use crate::scheduler::{CycleScheduler, Mode, SchedulerSettings, TickOutcome};
    pub use crate::seeds::SeedPlan;
    pub use crate::storage::{SharedStore, Store};
}

// Direct re-exports for convenience
pub use models::{PlaylistRecord, TrackLink, TrackRecord};
