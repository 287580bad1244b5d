use anyhow::{Context, Result};
use tokio::sync::watch;

use playlist_harvester::config::Config;
use playlist_harvester::credentials::TickBudget;
use playlist_harvester::metrics;
use playlist_harvester::pipeline::RegionOutcome;
use playlist_harvester::server::HarvestServer;

use super::Harvester;

// ============================================================================
// Scheduler loop
// ============================================================================

pub async fn run(config: &Config, listen: Option<String>) -> Result<()> {
    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics unavailable");
    }

    let harvester = Harvester::build(config).await?;
    let (stop_tx, stop_rx) = watch::channel(false);

    let server = match listen {
        Some(addr) => {
            let server = HarvestServer::new(&addr, harvester.scheduler.clone())?;
            let mut rx = stop_rx.clone();
            Some(tokio::spawn(async move {
                server
                    .serve_with_shutdown(async move {
                        let _ = rx.wait_for(|stopped| *stopped).await;
                    })
                    .await
            }))
        }
        None => None,
    };

    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        let _ = stop_tx.send(true);
    });

    let mut rx = stop_rx.clone();
    harvester
        .scheduler
        .run(async move {
            let _ = rx.wait_for(|stopped| *stopped).await;
        })
        .await?;

    if let Some(handle) = server {
        handle
            .await
            .context("Server task panicked")?
            .context("Operational server failed")?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// ============================================================================
// One-shot commands
// ============================================================================

pub async fn tick(config: &Config) -> Result<()> {
    let harvester = Harvester::build(config).await?;
    let outcome = harvester.scheduler.tick().await?;

    println!("Tick: {}", outcome.as_str());
    if let Some(report) = outcome.report() {
        println!("  Regions:   {}", report.regions.join(", "));
        if !report.abandoned.is_empty() {
            println!("  Abandoned: {}", report.abandoned.join(", "));
        }
        println!("  Ingested:  {}", report.stats.playlists_ingested);
        println!("  Links:     {}", report.stats.links);
        println!("  Units:     {}", report.units_spent);
    }
    Ok(())
}

pub async fn ingest(config: &Config, ids: Vec<String>) -> Result<()> {
    let harvester = Harvester::build(config).await?;
    let budget = match config.quota.tick_budget {
        0 => TickBudget::unlimited(),
        limit => TickBudget::new(limit),
    };

    let outcome = harvester.pipeline.ingest_playlists(&ids, &budget).await?;
    let stats = outcome.stats();

    println!("Ingested {} of {} playlists", stats.playlists_ingested, ids.len());
    println!("  Rejected: {}", stats.playlists_rejected);
    println!("  Failed:   {}", stats.playlists_failed);
    println!("  Tracks:   {}", stats.tracks);
    println!("  Links:    {}", stats.links);
    if let RegionOutcome::BudgetExhausted(_) = outcome {
        println!("Budget exhausted after {} units; rerun to resume", budget.spent());
    }
    Ok(())
}
