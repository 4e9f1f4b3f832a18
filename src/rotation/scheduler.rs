//! Rotation scheduler
//!
//! Hands out one resource at a time under usage caps and cooldowns, and
//! adapts availability to the error classes reported back by the fetch loop.
//!
//! Selection and the counter update form one critical section guarded by a
//! mutex, so concurrent callers within a process never double-count a pick.
//! The mutex is never held across an await: the only suspension point is the
//! wait for the next eligibility deadline, taken after the lock is released.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::classify::ErrorClass;
use super::clock::{Clock, SystemClock};
use super::error::{RotationError, RotationResult};
use super::lease::ResourceLease;
use super::policy::{Candidate, RotationPolicy, SelectionMode, SelectionStrategy};
use super::state::{add_secs, secs_between, ResourceStatus, RotationState, StateTable};
use super::store::StateStore;
use crate::models::SessionOutcome;
use crate::pool::{Credential, Resource, ResourceId, ResourcePool};

/// Point-in-time view of one resource
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSnapshot {
    pub id: ResourceId,
    pub label: String,
    pub status: ResourceStatus,
    pub state: RotationState,
}

enum Selection {
    Chosen(Resource),
    Wait(DateTime<Utc>),
}

struct Inner {
    table: StateTable,
    strategy: Box<dyn SelectionStrategy>,
}

/// Selects resources from a fixed pool and tracks their rotation state
pub struct RotationScheduler {
    resources: Vec<Resource>,
    policy: RotationPolicy,
    mode: SelectionMode,
    store: Box<dyn StateStore>,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for RotationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationScheduler")
            .field("resources", &self.resources.len())
            .field("mode", &self.mode)
            .field("store", &self.store.describe())
            .finish()
    }
}

impl RotationScheduler {
    /// Create a scheduler over `resources`, loading state from `store`
    pub fn new(
        resources: Vec<Resource>,
        policy: RotationPolicy,
        store: Box<dyn StateStore>,
    ) -> RotationResult<Self> {
        if resources.is_empty() {
            return Err(RotationError::configuration("resource pool is empty"));
        }
        policy.validate()?;

        let table = store.load(&resources)?;
        let mode = policy.effective_mode();
        let strategy = policy.strategy.build();

        tracing::info!(
            resources = resources.len(),
            mode = %mode,
            store = %store.describe(),
            "Rotation scheduler ready"
        );

        Ok(Self {
            resources,
            policy,
            mode,
            store,
            clock: Arc::new(SystemClock),
            inner: Mutex::new(Inner { table, strategy }),
        })
    }

    /// Create a scheduler for a loaded pool
    ///
    /// Policy values carried by the pool file override `policy`, and the
    /// pool format picks the selection mode unless `policy.mode` is set.
    pub fn from_pool(
        pool: &ResourcePool,
        policy: RotationPolicy,
        store: Box<dyn StateStore>,
    ) -> RotationResult<Self> {
        let mut policy = pool.overlay().apply(policy);
        if policy.mode.is_none() {
            policy.mode = Some(pool.implied_mode());
        }
        Self::new(pool.resources().to_vec(), policy, store)
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the selection strategy
    pub fn with_strategy(mut self, strategy: Box<dyn SelectionStrategy>) -> Self {
        self.inner
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .strategy = strategy;
        self
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Hand out the next eligible resource, waiting until one exists
    ///
    /// The chosen resource's `usage_count` is incremented and `last_used_at`
    /// set to now before it is returned. Fails only when every resource has
    /// been invalidated, since no deadline exists to wait for.
    pub async fn acquire(&self) -> RotationResult<Resource> {
        loop {
            let (now, until) = {
                let mut inner = self.lock();
                let now = self.clock.now();

                match self.select(&mut inner, now)? {
                    Selection::Chosen(resource) => {
                        if let Err(e) = self.store.save(&inner.table) {
                            tracing::warn!(
                                resource = %resource.id,
                                error = %e,
                                "Failed to persist rotation state after acquire"
                            );
                        }
                        tracing::debug!(
                            resource = %resource.id,
                            credential = %resource.credential.label(),
                            "Resource acquired"
                        );
                        return Ok(resource);
                    }
                    Selection::Wait(until) => (now, until),
                }
            };

            let wait = (until - now)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .max(Duration::from_millis(1));

            tracing::info!(
                wait_secs = wait.as_secs_f64(),
                until = %until,
                "No eligible resource, waiting"
            );
            self.clock.sleep(wait).await;
        }
    }

    /// Acquire a resource wrapped in a guard that always releases it
    pub async fn acquire_lease(self: &Arc<Self>) -> RotationResult<ResourceLease> {
        let resource = self.acquire().await?;
        let credential = self
            .credential_for(&resource.id)
            .unwrap_or_else(|| resource.credential.clone());
        Ok(ResourceLease::new(Arc::clone(self), resource, credential))
    }

    fn select(&self, inner: &mut Inner, now: DateTime<Utc>) -> RotationResult<Selection> {
        let Inner { table, strategy } = inner;
        table.ensure(&self.resources);

        match self.mode {
            SelectionMode::Quota => self.select_quota(table, strategy.as_mut(), now),
            SelectionMode::SessionDuration => self.select_session(table, now),
        }
    }

    fn select_quota(
        &self,
        table: &mut StateTable,
        strategy: &mut dyn SelectionStrategy,
        now: DateTime<Utc>,
    ) -> RotationResult<Selection> {
        let mut candidates = Vec::new();
        let mut earliest: Option<DateTime<Utc>> = None;

        for resource in &self.resources {
            let Some(state) = table.get_mut(&resource.id) else {
                continue;
            };
            state.clear_expired_cooldown(now);

            match state.quota_status(now, &self.policy) {
                ResourceStatus::Available => candidates.push(Candidate {
                    id: resource.id.clone(),
                    idle_secs: state.idle_secs(now),
                    usage_count: state.usage_count,
                }),
                ResourceStatus::Invalid => {}
                status => {
                    if let Some(until) = status.until() {
                        earliest = Some(earliest.map_or(until, |e| e.min(until)));
                    }
                }
            }
        }

        if candidates.is_empty() {
            return self.wait_or_exhausted(earliest);
        }

        let index = strategy.choose(&candidates);
        let chosen = &candidates[if index < candidates.len() { index } else { 0 }];

        let Some(state) = table.get_mut(&chosen.id) else {
            return Err(RotationError::unknown_resource(chosen.id.as_str()));
        };
        if state.reset_if_recovered(now, &self.policy) {
            tracing::debug!(resource = %chosen.id, "Usage counter reset after cooldown");
        }
        state.usage_count = state.usage_count.saturating_add(1);
        state.last_used_at = Some(now);

        self.resource(&chosen.id).map(Selection::Chosen)
    }

    fn select_session(&self, table: &mut StateTable, now: DateTime<Utc>) -> RotationResult<Selection> {
        let mut candidates: Vec<(&Resource, RotationState)> = Vec::new();
        let mut earliest: Option<DateTime<Utc>> = None;

        for resource in &self.resources {
            let Some(state) = table.get_mut(&resource.id) else {
                continue;
            };
            state.clear_expired_cooldown(now);

            match state.session_status(now) {
                ResourceStatus::Available => candidates.push((resource, state.clone())),
                ResourceStatus::InCooldown { until } => {
                    earliest = Some(earliest.map_or(until, |e| e.min(until)));
                }
                _ => {}
            }
        }

        if candidates.is_empty() {
            return self.wait_or_exhausted(earliest);
        }

        // Longest-running first, most recently used first among equals: keep
        // the current account until it crosses the threshold.
        candidates.sort_by(|(_, a), (_, b)| {
            b.cumulative_duration_secs
                .cmp(&a.cumulative_duration_secs)
                .then_with(|| b.last_used_at.cmp(&a.last_used_at))
        });

        let threshold = self.policy.rotation_duration_threshold_secs;
        let (resource, forced) = match candidates
            .iter()
            .find(|(_, state)| state.cumulative_duration_secs <= threshold)
        {
            Some((resource, _)) => (*resource, false),
            None => {
                // min_by_key keeps the first of equal keys: ties go to the
                // highest-ranked candidate
                let lru = candidates
                    .iter()
                    .min_by_key(|(_, state)| state.last_used_at)
                    .map(|(resource, _)| *resource);
                match lru {
                    Some(resource) => (resource, true),
                    None => return self.wait_or_exhausted(earliest),
                }
            }
        };

        let Some(state) = table.get_mut(&resource.id) else {
            return Err(RotationError::unknown_resource(resource.id.as_str()));
        };
        if forced {
            tracing::info!(
                resource = %resource.id,
                cumulative_secs = state.cumulative_duration_secs,
                threshold_secs = threshold,
                "All accounts over session threshold, rotating to least recently used"
            );
            state.cumulative_duration_secs = 0;
        }
        state.usage_count = state.usage_count.saturating_add(1);
        state.last_used_at = Some(now);

        Ok(Selection::Chosen(resource.clone()))
    }

    fn wait_or_exhausted(&self, earliest: Option<DateTime<Utc>>) -> RotationResult<Selection> {
        match earliest {
            Some(until) => Ok(Selection::Wait(until)),
            None => {
                tracing::error!(
                    pool_size = self.resources.len(),
                    "Every resource is invalid"
                );
                Err(RotationError::PoolExhausted {
                    pool_size: self.resources.len(),
                })
            }
        }
    }

    // ========================================================================
    // Feedback
    // ========================================================================

    /// Keep a resource out of rotation for `cooldown` (default: the policy's
    /// cooldown period). Does not change `usage_count`.
    pub fn mark_unavailable(&self, id: &ResourceId, cooldown: Option<Duration>) -> RotationResult<()> {
        let cooldown = cooldown.unwrap_or_else(|| self.policy.cooldown_period());
        let mut inner = self.lock();
        let now = self.clock.now();

        let state = Self::state_mut(&mut inner.table, id)?;
        let cooldown_secs = cooldown.as_secs() + u64::from(cooldown.subsec_nanos() > 0);
        let until = add_secs(now, cooldown_secs);
        state.last_used_at = Some(now);
        state.cooldown_until = Some(state.cooldown_until.map_or(until, |current| current.max(until)));

        tracing::warn!(
            resource = %id,
            cooldown_secs = cooldown_secs,
            until = %until,
            "Resource marked unavailable"
        );
        self.persist(&inner.table, "mark_unavailable")
    }

    /// Apply a classified failure to a resource
    pub fn report(&self, id: &ResourceId, class: ErrorClass) -> RotationResult<()> {
        match class {
            ErrorClass::RateLimited => {
                tracing::warn!(resource = %id, "Rate limit reported");
                self.mark_unavailable(id, Some(self.policy.rate_limit_cooldown()))
            }
            ErrorClass::Transient => {
                self.mark_unavailable(id, Some(self.policy.transient_cooldown()))
            }
            ErrorClass::ResourceInvalid => self.invalidate(id),
        }
    }

    /// Exclude a resource until [`restore`](Self::restore) is called
    pub fn invalidate(&self, id: &ResourceId) -> RotationResult<()> {
        let mut inner = self.lock();
        let now = self.clock.now();

        let state = Self::state_mut(&mut inner.table, id)?;
        state.invalid = true;
        state.last_used_at = Some(now);

        tracing::warn!(resource = %id, "Resource invalidated, needs external remediation");
        self.persist(&inner.table, "invalidate")
    }

    /// Return an invalidated or cooling-down resource to rotation
    pub fn restore(&self, id: &ResourceId) -> RotationResult<()> {
        let mut inner = self.lock();

        let state = Self::state_mut(&mut inner.table, id)?;
        state.invalid = false;
        state.cooldown_until = None;

        tracing::info!(resource = %id, "Resource restored");
        self.persist(&inner.table, "restore")
    }

    /// Finalize a session on a resource
    ///
    /// Adds the time since `started_at` to `cumulative_duration`, plus the
    /// duration malus when the session produced nothing or hit a rate limit.
    /// The start is passed in because failure reports during the session move
    /// `last_used_at` forward.
    pub fn release(
        &self,
        id: &ResourceId,
        started_at: DateTime<Utc>,
        outcome: &SessionOutcome,
    ) -> RotationResult<()> {
        let mut inner = self.lock();
        let now = self.clock.now();
        let malus = if outcome.is_penalized() {
            self.policy.duration_malus_secs
        } else {
            0
        };

        let state = Self::state_mut(&mut inner.table, id)?;
        let elapsed = secs_between(started_at, now);

        state.cumulative_duration_secs = state
            .cumulative_duration_secs
            .saturating_add(elapsed)
            .saturating_add(malus);
        state.last_used_at = Some(now);

        if let Some(path) = &outcome.refreshed_credential {
            if state.credential_override.as_ref() != Some(path) {
                tracing::debug!(resource = %id, path = %path.display(), "Credential refreshed");
                state.credential_override = Some(path.clone());
            }
        }

        tracing::debug!(
            resource = %id,
            items = outcome.items_produced,
            rate_limited = outcome.rate_limited,
            elapsed_secs = elapsed,
            malus_secs = malus,
            cumulative_secs = state.cumulative_duration_secs,
            "Resource released"
        );
        self.persist(&inner.table, "release")
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Status and state of every resource, in pool order
    pub fn snapshot(&self) -> Vec<ResourceSnapshot> {
        let inner = self.lock();
        let now = self.clock.now();

        self.resources
            .iter()
            .map(|resource| {
                let state = inner.table.get(&resource.id).cloned().unwrap_or_default();
                let status = match self.mode {
                    SelectionMode::Quota => state.quota_status(now, &self.policy),
                    SelectionMode::SessionDuration => state.session_status(now),
                };
                ResourceSnapshot {
                    id: resource.id.clone(),
                    label: resource.credential.label(),
                    status,
                    state,
                }
            })
            .collect()
    }

    /// Current state of one resource
    pub fn state_of(&self, id: &ResourceId) -> Option<RotationState> {
        self.lock().table.get(id).cloned()
    }

    /// Credential of a resource with any refreshed cookie file applied
    pub fn credential_for(&self, id: &ResourceId) -> Option<Credential> {
        let resource = self.resources.iter().find(|r| &r.id == id)?;
        let override_path = self
            .lock()
            .table
            .get(id)
            .and_then(|state| state.credential_override.clone());

        Some(match override_path {
            Some(path) => resource.credential.with_cookies_file(path),
            None => resource.credential.clone(),
        })
    }

    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn resource(&self, id: &ResourceId) -> RotationResult<Resource> {
        self.resources
            .iter()
            .find(|r| &r.id == id)
            .cloned()
            .ok_or_else(|| RotationError::unknown_resource(id.as_str()))
    }

    fn state_mut<'a>(table: &'a mut StateTable, id: &ResourceId) -> RotationResult<&'a mut RotationState> {
        table
            .get_mut(id)
            .ok_or_else(|| RotationError::unknown_resource(id.as_str()))
    }

    fn persist(&self, table: &StateTable, operation: &str) -> RotationResult<()> {
        self.store.save(table).map_err(|e| {
            tracing::error!(
                operation = operation,
                store = %self.store.describe(),
                error = %e,
                "Failed to persist rotation state"
            );
            match e {
                RotationError::Persistence { reason, .. } => {
                    RotationError::persistence(operation, reason)
                }
                other => other,
            }
        })
    }
}
