use anyhow::{Context, Result};

use harvester::config::Config;
use harvester::pool::ResourceId;
use harvester::rotation::StateLock;

use super::{open_scheduler, state_path};

/// Clear the invalid flag of a resource after its credential was fixed
pub async fn restore(config: Config, id: String) -> Result<()> {
    let (_pool, scheduler) = open_scheduler(&config, config.pool.lock_state)?;
    let id = ResourceId::new(id);

    scheduler
        .restore(&id)
        .with_context(|| format!("Failed to restore {id}"))?;

    println!("Restored {id}");
    Ok(())
}

/// Remove a lock left behind by a crashed process
pub async fn unlock(config: Config) -> Result<()> {
    let path = state_path(&config);
    let removed = StateLock::remove_stale(&path)
        .with_context(|| format!("Failed to unlock {}", path.display()))?;

    if removed {
        println!("Removed {}", StateLock::lock_path(&path).display());
    } else {
        println!("No lock on {}", path.display());
    }
    Ok(())
}
