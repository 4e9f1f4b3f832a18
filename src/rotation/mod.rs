//! Resource rotation and backoff
//!
//! Selects the next usable (proxy, credential) resource from a fixed pool,
//! tracks usage counters and cooldowns per resource, persists that state
//! after every mutation, and turns upstream failure signals into cooldowns.
//!
//! # Modules
//!
//! - [`state`] - Per-resource counters and derived status
//! - [`store`] - Durable state (JSON file, account registry, memory) and the single-writer lock
//! - [`policy`] - Caps, cooldowns and selection strategies
//! - [`clock`] - Time source, replaceable in tests
//! - [`scheduler`] - Selection, feedback and session finalization
//! - [`lease`] - Scoped acquisition guard
//! - [`classify`] - Failure classes consumed by the scheduler
//! - [`error`] - Configuration and persistence errors
//!
//! # Quick Start
//!
//! ```no_run
//! use harvester::pool::ResourcePool;
//! use harvester::rotation::{store_for_pool, ErrorClass, RotationPolicy, RotationScheduler};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> harvester::rotation::RotationResult<()> {
//! let pool = ResourcePool::load(Path::new("proxies.txt"))?;
//! let store = store_for_pool(&pool, Path::new("state/rotation.json"), true)?;
//! let scheduler = Arc::new(RotationScheduler::from_pool(&pool, RotationPolicy::default(), store)?);
//!
//! let mut lease = scheduler.acquire_lease().await?;
//! // ... fetch through lease.resource() ...
//! lease.report(ErrorClass::RateLimited)?;
//! lease.finish()?;
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod clock;
pub mod error;
pub mod lease;
pub mod policy;
pub mod scheduler;
pub mod state;
pub mod store;

pub use classify::{classify_status, Classify, ErrorClass};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{RotationError, RotationResult};
pub use lease::ResourceLease;
pub use policy::{
    Candidate, IdleWeighted, InOrder, PolicyOverlay, RotationPolicy, SelectionMode,
    SelectionStrategy, StrategyKind, UniformRandom,
};
pub use scheduler::{ResourceSnapshot, RotationScheduler};
pub use state::{ResourceStatus, RotationState, StateTable};
pub use store::{
    store_for_pool, JsonStateStore, MemoryStateStore, RegistryStateStore, StateLock, StateStore,
};
