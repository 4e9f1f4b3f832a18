pub mod harvest;
pub mod maintenance;
pub mod status;

// Re-export command functions for convenience
pub use harvest::harvest;
pub use maintenance::{restore, unlock};
pub use status::status;

use anyhow::{Context, Result};
use std::path::PathBuf;

use harvester::config::Config;
use harvester::pool::ResourcePool;
use harvester::rotation::{store_for_pool, RotationScheduler};

/// Load the pool and build a scheduler over its persisted state
///
/// `lock` takes the single-writer lock; read-only commands skip it so they
/// can run next to a harvest.
pub fn open_scheduler(config: &Config, lock: bool) -> Result<(ResourcePool, RotationScheduler)> {
    let pool = ResourcePool::resolve(config.pool.path.as_deref())
        .context("Failed to load resource pool")?;
    let store = store_for_pool(&pool, &config.pool.state_file, lock)
        .context("Failed to open rotation state")?;
    let scheduler = RotationScheduler::from_pool(&pool, config.rotation.clone(), store)
        .context("Failed to initialize rotation scheduler")?;
    Ok((pool, scheduler))
}

/// File that holds rotation state for the configured pool
///
/// Mirrors the store selection without loading the pool, so it works when
/// the pool itself is broken.
pub fn state_path(config: &Config) -> PathBuf {
    match &config.pool.path {
        Some(path)
            if path.exists()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("json")) =>
        {
            path.clone()
        }
        _ => config.pool.state_file.clone(),
    }
}
