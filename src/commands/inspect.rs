use anyhow::{Context, Result};
use chrono::{Timelike, Utc};

use playlist_harvester::config::Config;
use playlist_harvester::scheduler::{self, SchedulerSettings, StatusReport};
use playlist_harvester::seeds::SeedPlan;
use playlist_harvester::storage::StateStore;

use super::open_store;

/// Status query; runs without credentials
pub async fn status(config: &Config, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let settings = SchedulerSettings::from_config(config);
    let report = StatusReport::collect(&store, &settings, Vec::new(), Utc::now()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Harvester Status");
    println!("{:-<40}", "");
    println!("Mode:          {}", report.mode);
    println!("Day:           {}/{}", report.day, report.cycle_length);
    println!("Cycle start:   {}", report.cycle_started_on);
    println!(
        "Last region:   {}",
        report.last_region.as_deref().unwrap_or("-")
    );
    println!("Next regions:  {}", report.next_regions.join(", "));

    let lock = match (report.locked, report.lock_stale) {
        (false, _) => "free".to_string(),
        (true, false) => format!("held since {}", fmt_time(report.locked_at)),
        (true, true) => format!("STALE since {}", fmt_time(report.locked_at)),
    };
    println!("Lock:          {lock}");

    println!();
    println!("Rows");
    println!("  Discovered:  {}", report.counts.discovered);
    println!("  Playlists:   {}", report.counts.playlists);
    println!("  Tracks:      {}", report.counts.tracks);
    println!("  Links:       {}", report.counts.links);
    Ok(())
}

fn fmt_time(at: Option<chrono::DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn reset_lock(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    scheduler::reset_lock(&store).await?;
    println!("Lock released");
    Ok(())
}

/// Print one slot of the seed plan, or verify the whole plan
pub async fn plan(
    config: &Config,
    verify: bool,
    day: Option<u32>,
    slot: Option<u32>,
    limit: usize,
) -> Result<()> {
    let now = Utc::now();

    // The persisted state supplies the anchor and day; without a store the
    // plan is anchored at today.
    let state = match open_store(config).await {
        Ok(store) => store.load_cycle_state().await.ok().flatten(),
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "Store unavailable, anchoring plan at today");
            None
        }
    };

    let cycle_start = config
        .seeds
        .cycle_start
        .or(state.as_ref().map(|s| s.cycle_started_on))
        .unwrap_or_else(|| now.date_naive());

    let plan = SeedPlan::new(
        cycle_start,
        config.scheduler.cycle_length,
        config.seeds.slots,
        config.seeds.per_slot,
    )?;

    if verify {
        let total = plan
            .self_check()
            .context("Seed plan self-check failed")?;
        println!(
            "Plan verified: {} days x {} slots x {} queries = {} distinct per slot",
            plan.days(),
            plan.slots(),
            plan.per_slot(),
            total
        );
        return Ok(());
    }

    let day = day.or(state.as_ref().map(|s| s.day)).unwrap_or(1);
    let slot = slot.unwrap_or_else(|| plan.slot_for_hour(now.hour()));
    let queries = plan.slot_queries(day, slot)?;

    println!("Plan anchored at {cycle_start}, day {day}, slot {slot}");
    println!("{:-<40}", "");
    for query in queries.iter().take(limit) {
        println!("{:>4}  {}  [{}]", query.index, query.text, query.genre);
    }
    if queries.len() > limit {
        println!("... {} more", queries.len() - limit);
    }
    Ok(())
}
