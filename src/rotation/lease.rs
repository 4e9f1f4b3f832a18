//! Scoped acquisition of a resource
//!
//! A [`ResourceLease`] is released exactly once: explicitly through
//! [`finish`](ResourceLease::finish), or on drop when the holder bails out
//! early (error return, panic unwinding, task cancellation). A dropped lease
//! is released with whatever outcome was accumulated so far.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;

use super::classify::ErrorClass;
use super::error::RotationResult;
use super::scheduler::RotationScheduler;
use crate::models::SessionOutcome;
use crate::pool::{Credential, Resource, ResourceId};

/// Exclusive use of one resource for a bounded session
pub struct ResourceLease {
    scheduler: Arc<RotationScheduler>,
    resource: Resource,
    credential: Credential,
    outcome: SessionOutcome,
    acquired_at: DateTime<Utc>,
    released: bool,
}

impl ResourceLease {
    pub(crate) fn new(
        scheduler: Arc<RotationScheduler>,
        resource: Resource,
        credential: Credential,
    ) -> Self {
        let acquired_at = scheduler.now();
        Self {
            scheduler,
            resource,
            credential,
            outcome: SessionOutcome::default(),
            acquired_at,
            released: false,
        }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn id(&self) -> &ResourceId {
        &self.resource.id
    }

    /// Credential to use, including any cookie refresh recorded so far
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    pub fn outcome(&self) -> &SessionOutcome {
        &self.outcome
    }

    /// Count items produced with this resource
    pub fn record_items(&mut self, count: usize) {
        self.outcome.items_produced += count;
    }

    /// Record a refreshed cookie file
    pub fn refresh_credential(&mut self, path: PathBuf) {
        self.credential = self.credential.with_cookies_file(path.clone());
        self.outcome.refreshed_credential = Some(path);
    }

    /// Forward a classified failure to the scheduler
    pub fn report(&mut self, class: ErrorClass) -> RotationResult<()> {
        if class == ErrorClass::RateLimited {
            self.outcome.rate_limited = true;
        }
        self.scheduler.report(&self.resource.id, class)
    }

    /// End the session and release the resource
    pub fn finish(mut self) -> RotationResult<SessionOutcome> {
        self.released = true;
        let outcome = std::mem::take(&mut self.outcome);
        self.scheduler
            .release(&self.resource.id, self.acquired_at, &outcome)?;
        Ok(outcome)
    }
}

impl std::fmt::Debug for ResourceLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLease")
            .field("resource", &self.resource.id)
            .field("outcome", &self.outcome)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::warn!(
            resource = %self.resource.id,
            items = self.outcome.items_produced,
            "Lease dropped without finish, releasing"
        );
        if let Err(e) = self
            .scheduler
            .release(&self.resource.id, self.acquired_at, &self.outcome)
        {
            tracing::error!(resource = %self.resource.id, error = %e, "Release on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ProxyEndpoint;
    use crate::rotation::clock::ManualClock;
    use crate::rotation::policy::{RotationPolicy, SelectionMode};
    use crate::rotation::store::MemoryStateStore;
    use std::time::Duration;

    fn scheduler() -> (Arc<RotationScheduler>, ManualClock) {
        let clock = ManualClock::default();
        let resources = vec![Resource::new(
            "only",
            ProxyEndpoint::parse("10.0.0.1:3128").unwrap(),
            Credential::CookieFile(PathBuf::from("cookies/only.json")),
        )];
        let scheduler = RotationScheduler::new(
            resources,
            RotationPolicy::default(),
            Box::new(MemoryStateStore::new()),
        )
        .unwrap()
        .with_clock(Arc::new(clock.clone()));
        (Arc::new(scheduler), clock)
    }

    #[tokio::test]
    async fn test_finish_releases_with_outcome() {
        let (scheduler, clock) = scheduler();
        let mut lease = scheduler.acquire_lease().await.unwrap();
        lease.record_items(3);
        lease.record_items(2);
        clock.advance(Duration::from_secs(30));

        let outcome = lease.finish().unwrap();
        assert_eq!(outcome.items_produced, 5);

        let state = scheduler.state_of(&ResourceId::new("only")).unwrap();
        assert_eq!(state.cumulative_duration_secs, 30);
    }

    #[tokio::test]
    async fn test_drop_releases_with_malus() {
        let (scheduler, _clock) = scheduler();
        {
            let _lease = scheduler.acquire_lease().await.unwrap();
        }
        let state = scheduler.state_of(&ResourceId::new("only")).unwrap();
        assert_eq!(state.cumulative_duration_secs, scheduler.policy().duration_malus_secs);
    }

    #[tokio::test]
    async fn test_report_rate_limit_marks_outcome() {
        let (scheduler, _clock) = scheduler();
        let mut lease = scheduler.acquire_lease().await.unwrap();
        lease.record_items(10);
        lease.report(ErrorClass::RateLimited).unwrap();
        assert!(lease.outcome().rate_limited);

        let outcome = lease.finish().unwrap();
        assert!(outcome.is_penalized());
        let state = scheduler.state_of(&ResourceId::new("only")).unwrap();
        assert!(state.cooldown_until.is_some());
    }

    #[tokio::test]
    async fn test_failure_report_keeps_session_time() {
        let clock = ManualClock::default();
        let resources = vec![Resource::new(
            "acct",
            ProxyEndpoint::parse("10.0.0.2:3128").unwrap(),
            Credential::CookieFile(PathBuf::from("cookies/acct.json")),
        )];
        let policy = RotationPolicy {
            mode: Some(SelectionMode::SessionDuration),
            duration_malus_secs: 0,
            ..Default::default()
        };
        let scheduler = Arc::new(
            RotationScheduler::new(resources, policy, Box::new(MemoryStateStore::new()))
                .unwrap()
                .with_clock(Arc::new(clock.clone())),
        );

        let mut lease = scheduler.acquire_lease().await.unwrap();
        lease.record_items(5);
        clock.advance(Duration::from_secs(600));
        lease.report(ErrorClass::Transient).unwrap();
        lease.finish().unwrap();

        let state = scheduler.state_of(&ResourceId::new("acct")).unwrap();
        assert_eq!(state.cumulative_duration_secs, 600);
    }

    #[tokio::test]
    async fn test_refresh_credential() {
        let (scheduler, _clock) = scheduler();
        let mut lease = scheduler.acquire_lease().await.unwrap();
        lease.refresh_credential(PathBuf::from("cookies/new.json"));
        assert_eq!(
            lease.credential().cookies_file(),
            Some(std::path::Path::new("cookies/new.json"))
        );
        lease.record_items(1);
        lease.finish().unwrap();

        let credential = scheduler.credential_for(&ResourceId::new("only")).unwrap();
        assert_eq!(
            credential.cookies_file(),
            Some(std::path::Path::new("cookies/new.json"))
        );
    }
}
