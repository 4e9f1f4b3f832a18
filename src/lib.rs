//! harvester - Social media harvester with proxy and credential rotation
//!
//! Collects short posts from a remote scraping backend through a pool of
//! (proxy, credential) resources. The rotation core hands out resources
//! under usage caps and cooldowns, persists their state across runs and
//! turns upstream failures into backoff.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`pool`] - Resource pool loading (line list, account registry, environment)
//! - [`rotation`] - Rotation scheduler, state store and backoff
//! - [`harvest`] - Fetch loop, content sources and item normalization
//! - [`models`] - Core data structures and types
//! - [`config`] - Configuration management and settings
//! - [`error`] - Unified error type
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use harvester::config::Config;
//! use harvester::harvest::{Harvester, Query, RemoteBackendSource};
//! use harvester::pool::ResourcePool;
//! use harvester::rotation::{store_for_pool, RotationScheduler};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let pool = ResourcePool::resolve(config.pool.path.as_deref())?;
//!     let store = store_for_pool(&pool, &config.pool.state_file, true)?;
//!     let scheduler = Arc::new(RotationScheduler::from_pool(&pool, config.rotation.clone(), store)?);
//!
//!     let source = Arc::new(RemoteBackendSource::new(&config.backend)?);
//!     let harvester = Harvester::new(scheduler, source, config.harvest.clone(), config.retry.clone());
//!     let report = harvester.harvest(&Query::keyword("bitcoin")).await?;
//!     println!("{} items", report.items.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod harvest;
pub mod models;
pub mod pool;
pub mod rotation;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, HarvesterErrorTrait, Result};
    pub use crate::harvest::{ContentSource, FetchRequest, HarvestReport, Harvester, Query};
    pub use crate::models::{Item, RawRecord, SessionOutcome};
    pub use crate::pool::{Credential, Resource, ResourceId, ResourcePool};
    pub use crate::rotation::{
        ErrorClass, ResourceLease, RotationError, RotationPolicy, RotationScheduler,
    };
}

// Direct re-exports for convenience
pub use models::{Item, RawRecord, SessionOutcome};
