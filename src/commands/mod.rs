pub mod inspect;
pub mod run;

pub use inspect::{plan, reset_lock, status};
pub use run::{ingest, run, tick};

use std::sync::Arc;

use anyhow::{Context, Result};

use playlist_harvester::api::{HttpVideoApi, PagingClient};
use playlist_harvester::config::Config;
use playlist_harvester::credentials::CredentialPool;
use playlist_harvester::pipeline::{Pipeline, PipelineSettings};
use playlist_harvester::scheduler::{CycleScheduler, SchedulerSettings};
use playlist_harvester::storage::{self, SharedStore};

/// Fully wired components for the commands that call the video API
pub struct Harvester {
    pub pipeline: Arc<Pipeline>,
    pub scheduler: Arc<CycleScheduler>,
}

impl Harvester {
    pub async fn build(config: &Config) -> Result<Self> {
        if !config.has_credentials() {
            anyhow::bail!("no API credentials configured (set HARVEST_API_KEYS)");
        }

        let store = open_store(config).await?;
        let pool = Arc::new(CredentialPool::new(
            config.api.keys.clone(),
            config.quota.costs.clone(),
            config.pool_settings(),
        )?);
        let api = Arc::new(HttpVideoApi::with_base_url(
            &config.api.base_url,
            config.api.requests_per_second,
            config.request_timeout(),
        )?);
        let client = Arc::new(PagingClient::new(api, pool, config.paging_settings()));
        let pipeline = Arc::new(Pipeline::new(
            client,
            store,
            PipelineSettings::from_config(config),
        ));
        let scheduler = Arc::new(CycleScheduler::new(
            pipeline.clone(),
            SchedulerSettings::from_config(config),
        ));

        Ok(Self {
            pipeline,
            scheduler,
        })
    }
}

pub async fn open_store(config: &Config) -> Result<SharedStore> {
    let backend = if config
        .database
        .url
        .as_deref()
        .is_some_and(|u| u.starts_with("postgres"))
    {
        "postgres".to_string()
    } else {
        config.database.sqlite_path.display().to_string()
    };

    storage::open(&config.database)
        .await
        .with_context(|| format!("Failed to open store ({backend})"))
}
