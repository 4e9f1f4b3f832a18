use anyhow::Result;

use harvester::config::Config;
use harvester::rotation::ResourceSnapshot;
use harvester::utils::{format_duration_secs, truncate_text};

use super::open_scheduler;

pub async fn status(config: Config, json: bool) -> Result<()> {
    let (_pool, scheduler) = open_scheduler(&config, false)?;
    let snapshot = scheduler.snapshot();

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("Rotation Status");
    println!("===============");
    println!("Mode: {}", scheduler.mode());
    println!("Resources: {}", snapshot.len());
    println!();

    let available = snapshot.iter().filter(|s| s.status.is_available()).count();
    for entry in &snapshot {
        print_entry(entry);
    }

    println!();
    println!("Available now: {available}/{}", snapshot.len());
    Ok(())
}

fn print_entry(entry: &ResourceSnapshot) {
    let last_used = entry
        .state
        .last_used_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());

    println!(
        "{:<20} {:<36} uses={:<4} last={:<19} duration={}",
        truncate_text(entry.id.as_str(), 20),
        entry.status.to_string(),
        entry.state.usage_count,
        last_used,
        format_duration_secs(entry.state.cumulative_duration_secs)
    );
    println!("{:<20} {}", "", entry.label);
}
