use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;

use harvester::config::Config;
use harvester::error::HarvesterErrorTrait;
use harvester::harvest::{HarvestReport, Harvester, Query, RemoteBackendSource};
use harvester::Item;

use super::open_scheduler;

pub async fn harvest(config: Config, keyword: Option<String>, max_items: Option<usize>) -> Result<()> {
    let (pool, scheduler) = open_scheduler(&config, config.pool.lock_state)?;
    let scheduler = Arc::new(scheduler);

    let source = RemoteBackendSource::new(&config.backend)
        .context("Failed to create backend client")?;
    tracing::info!(
        endpoint = %source.endpoint(),
        resources = pool.len(),
        mode = %scheduler.mode(),
        "Harvest configured"
    );

    // Items are written as they are emitted, so an interrupted run keeps them
    let (sink, items) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_items(items));

    let harvester = Harvester::new(
        Arc::clone(&scheduler),
        Arc::new(source),
        config.harvest.clone(),
        config.retry.clone(),
    )
    .with_sink(sink);
    let query = Query { keyword, max_items };

    // Dropping the harvest future releases any lease still held
    let result = tokio::select! {
        result = harvester.harvest(&query) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    drop(harvester);
    let written = writer.await.context("Item writer failed")??;

    let report = match result {
        Some(Ok(report)) => report,
        Some(Err(e)) => {
            tracing::error!(
                category = %e.category(),
                recoverable = e.is_recoverable(),
                error = %e,
                items = written,
                "Harvest aborted"
            );
            return Err(e).context("Harvest aborted");
        }
        None => {
            tracing::warn!(items = written, "Interrupted, held resources released");
            return Ok(());
        }
    };

    print_summary(&report);
    Ok(())
}

/// Write items as JSON lines until every sender is gone
async fn write_items(mut items: mpsc::UnboundedReceiver<Item>) -> Result<usize> {
    let mut written = 0;
    while let Some(item) = items.recv().await {
        let mut out = std::io::stdout().lock();
        serde_json::to_writer(&mut out, &item)?;
        writeln!(out)?;
        out.flush()?;
        written += 1;
    }
    Ok(written)
}

fn print_summary(report: &HarvestReport) {
    eprintln!("Harvest {}", report.run_id);
    eprintln!("  Keywords: {}", report.keywords.join(", "));
    eprintln!("  Items: {}", report.items.len());
    eprintln!("  Sessions: {}", report.sessions);
    eprintln!("  Rate limited: {}", report.rate_limited);
    eprintln!("  Transient failures: {}", report.transient_failures);
    if !report.invalidated.is_empty() {
        let ids: Vec<&str> = report.invalidated.iter().map(|id| id.as_str()).collect();
        eprintln!("  Invalidated: {} (run `harvester restore <ID>` once fixed)", ids.join(", "));
    }
    for (reason, count) in &report.rejected {
        eprintln!("  Dropped ({reason}): {count}");
    }
}
