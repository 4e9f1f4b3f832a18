//! Fetch loop: leases resources, retrieves content and feeds failures back
//!
//! A harvest run is a sequence of sessions. Each session leases one
//! resource from the [`RotationScheduler`], performs a bounded number of
//! fetches through it and releases it with the session outcome. Failures are
//! classified at this boundary: transient ones are retried on the same
//! resource, anything else is reported to the scheduler and ends the
//! session.

pub mod emitter;
pub mod keywords;
pub mod remote;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::HarvestConfig;
use crate::error::{self, Error, HarvesterErrorTrait};
use crate::models::{Item, RawRecord};
use crate::pool::{Credential, Resource, ResourceId};
use crate::rotation::{Classify, ErrorClass, ResourceLease, RotationScheduler};
use crate::utils::error::FetchError;
use crate::utils::retry::{with_retry_if, RetryConfig};

pub use emitter::{EmitterConfig, ItemEmitter, Rejection};
pub use keywords::KeywordPicker;
pub use remote::RemoteBackendSource;

/// One retrieval request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub keyword: Option<String>,
    pub size: usize,
}

/// Retrieves raw records using a leased resource
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(
        &self,
        resource: &Resource,
        credential: &Credential,
        request: &FetchRequest,
    ) -> Result<Vec<RawRecord>, FetchError>;
}

/// What to harvest
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub keyword: Option<String>,
    /// Overrides the configured item cap
    pub max_items: Option<usize>,
}

impl Query {
    pub fn keyword(keyword: impl Into<String>) -> Self {
        Self {
            keyword: Some(keyword.into()),
            max_items: None,
        }
    }
}

/// Result of a harvest run
#[derive(Debug, Clone)]
pub struct HarvestReport {
    pub run_id: Uuid,
    pub keywords: Vec<String>,
    pub items: Vec<Item>,
    pub sessions: usize,
    pub rate_limited: usize,
    pub invalidated: Vec<ResourceId>,
    pub transient_failures: usize,
    pub rejected: BTreeMap<String, usize>,
}

impl HarvestReport {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            keywords: Vec::new(),
            items: Vec::new(),
            sessions: 0,
            rate_limited: 0,
            invalidated: Vec::new(),
            transient_failures: 0,
            rejected: BTreeMap::new(),
        }
    }
}

/// Drives sessions over the rotation scheduler
pub struct Harvester {
    scheduler: Arc<RotationScheduler>,
    source: Arc<dyn ContentSource>,
    config: HarvestConfig,
    retry: RetryConfig,
    sink: Option<mpsc::UnboundedSender<Item>>,
}

impl Harvester {
    pub fn new(
        scheduler: Arc<RotationScheduler>,
        source: Arc<dyn ContentSource>,
        config: HarvestConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            scheduler,
            source,
            config,
            retry,
            sink: None,
        }
    }

    /// Also send every accepted item to `sink` as soon as it is emitted
    ///
    /// Items reach the sink even when the run is cancelled before the
    /// report is returned.
    pub fn with_sink(mut self, sink: mpsc::UnboundedSender<Item>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn scheduler(&self) -> &Arc<RotationScheduler> {
        &self.scheduler
    }

    /// Run one harvest
    ///
    /// Unrecoverable scheduler errors (bad configuration, a fully
    /// invalidated pool) abort the run; every other failure shows up in the
    /// report as fewer items.
    pub async fn harvest(&self, query: &Query) -> error::Result<HarvestReport> {
        let mut report = HarvestReport::new();
        let mut emitter = ItemEmitter::new(EmitterConfig {
            min_post_length: self.config.min_post_length,
            max_oldness_secs: self.config.max_oldness_secs,
            default_domain: self.config.default_domain.clone(),
        });
        let mut picker = if self.config.default_keywords.is_empty() {
            KeywordPicker::with_builtin(self.config.default_keyword_weight)
        } else {
            KeywordPicker::new(
                self.config.default_keywords.clone(),
                self.config.default_keyword_weight,
            )
        };

        let max_items = query.max_items.unwrap_or(self.config.max_items);
        let keyword = picker.pick(query.keyword.as_deref());

        tracing::info!(
            run_id = %report.run_id,
            keyword = ?keyword,
            max_items = max_items,
            "Harvest started"
        );

        self.collect(keyword, max_items, &mut emitter, &mut report)
            .await?;

        for _ in 0..self.config.special_checks {
            let Some(extra) = picker.random_default() else {
                break;
            };
            tracing::debug!(keyword = %extra, "Extra keyword check");
            self.collect(
                Some(extra),
                self.config.special_check_items,
                &mut emitter,
                &mut report,
            )
            .await?;
        }

        report.rejected = emitter
            .rejections()
            .iter()
            .map(|(reason, count)| (reason.to_string(), *count))
            .collect();

        tracing::info!(
            run_id = %report.run_id,
            items = report.items.len(),
            sessions = report.sessions,
            rate_limited = report.rate_limited,
            invalidated = report.invalidated.len(),
            transient_failures = report.transient_failures,
            "Harvest finished"
        );
        Ok(report)
    }

    async fn collect(
        &self,
        keyword: Option<String>,
        limit: usize,
        emitter: &mut ItemEmitter,
        report: &mut HarvestReport,
    ) -> error::Result<()> {
        if let Some(keyword) = &keyword {
            report.keywords.push(keyword.clone());
        }
        let target = report.items.len() + limit;

        for _ in 0..self.config.max_sessions {
            if report.items.len() >= target {
                break;
            }

            let mut lease = match self.scheduler.acquire_lease().await {
                Ok(lease) => lease,
                Err(e) => {
                    let err = Error::from(e);
                    if !err.is_recoverable() {
                        return Err(err);
                    }
                    tracing::warn!(
                        category = %err.category(),
                        error = %err,
                        "Could not acquire a resource"
                    );
                    break;
                }
            };
            report.sessions += 1;

            self.run_session(&mut lease, keyword.as_deref(), target, emitter, report)
                .await;

            let resource = lease.id().clone();
            match lease.finish() {
                Ok(outcome) => tracing::debug!(
                    resource = %resource,
                    items = outcome.items_produced,
                    rate_limited = outcome.rate_limited,
                    "Session finished"
                ),
                Err(e) => tracing::warn!(
                    resource = %resource,
                    error = %e,
                    "Session finished but state was not persisted"
                ),
            }
        }

        Ok(())
    }

    async fn run_session(
        &self,
        lease: &mut ResourceLease,
        keyword: Option<&str>,
        target: usize,
        emitter: &mut ItemEmitter,
        report: &mut HarvestReport,
    ) {
        let request = FetchRequest {
            keyword: keyword.map(str::to_string),
            size: self.config.batch_size,
        };

        for _ in 0..self.config.requests_per_session {
            if report.items.len() >= target {
                return;
            }

            let result = {
                let resource = lease.resource();
                let credential = lease.credential();
                let request = &request;
                with_retry_if(
                    &self.retry,
                    || self.source.fetch(resource, credential, request),
                    |e: &FetchError| e.classify() == ErrorClass::Transient,
                )
                .await
            };

            match result {
                Ok(records) if records.is_empty() => {
                    tracing::debug!(resource = %lease.id(), "Empty batch, ending session");
                    return;
                }
                Ok(records) => {
                    let received = records.len();
                    let mut items = emitter.emit_all(records, keyword, self.scheduler.now());
                    items.truncate(target - report.items.len());

                    tracing::debug!(
                        resource = %lease.id(),
                        received = received,
                        accepted = items.len(),
                        "Batch processed"
                    );
                    lease.record_items(items.len());
                    if let Some(sink) = &self.sink {
                        for item in &items {
                            // A closed receiver only loses the live copy
                            let _ = sink.send(item.clone());
                        }
                    }
                    report.items.extend(items);
                }
                Err(e) => {
                    let class = e.classify();
                    tracing::warn!(
                        resource = %lease.id(),
                        class = %class,
                        category = %e.category(),
                        error = %e,
                        "Fetch failed"
                    );
                    match class {
                        ErrorClass::RateLimited => report.rate_limited += 1,
                        ErrorClass::ResourceInvalid => {
                            report.invalidated.push(lease.id().clone())
                        }
                        ErrorClass::Transient => report.transient_failures += 1,
                    }
                    if let Err(e) = lease.report(class) {
                        tracing::warn!(
                            resource = %lease.id(),
                            error = %e,
                            "Failed to persist failure report"
                        );
                    }
                    return;
                }
            }
        }
    }
}
