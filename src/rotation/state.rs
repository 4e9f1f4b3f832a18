//! Per-resource rotation state and eligibility

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use super::policy::RotationPolicy;
use crate::pool::{Resource, ResourceId};

/// Add whole seconds to an instant, saturating at the maximum time
pub fn add_secs(at: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    let delta = TimeDelta::try_seconds(i64::try_from(secs).unwrap_or(i64::MAX))
        .unwrap_or(TimeDelta::MAX);
    at.checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Whole seconds from `earlier` to `later`, zero if negative
pub fn secs_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> u64 {
    (later - earlier).num_seconds().max(0) as u64
}

// ============================================================================
// Rotation State
// ============================================================================

/// Mutable rotation counters of one resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationState {
    /// Acquisitions since the last reset
    pub usage_count: u32,

    /// `None` = never used
    pub last_used_at: Option<DateTime<Utc>>,

    /// Session seconds accumulated since the last rotation reset
    pub cumulative_duration_secs: u64,

    /// Explicit cooldown set by an error signal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,

    /// Credential rejected; excluded until restored
    #[serde(skip_serializing_if = "is_false")]
    pub invalid: bool,

    /// Refreshed cookie file recorded at release
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_override: Option<PathBuf>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Derived availability of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResourceStatus {
    Available,
    /// Used too recently (`min_request_interval`)
    Spacing { until: DateTime<Utc> },
    /// Explicit cooldown after an error signal
    InCooldown { until: DateTime<Utc> },
    /// Usage cap reached, waiting for the cooldown period
    UsageExhausted { until: DateTime<Utc> },
    /// Credential rejected
    Invalid,
}

impl ResourceStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }

    /// Instant the resource leaves this status, if bounded
    pub fn until(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Spacing { until } | Self::InCooldown { until } | Self::UsageExhausted { until } => {
                Some(*until)
            }
            Self::Available | Self::Invalid => None,
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Spacing { until } => write!(f, "spacing until {}", until.format("%H:%M:%S")),
            Self::InCooldown { until } => {
                write!(f, "cooldown until {}", until.format("%Y-%m-%d %H:%M:%S"))
            }
            Self::UsageExhausted { until } => {
                write!(f, "exhausted until {}", until.format("%Y-%m-%d %H:%M:%S"))
            }
            Self::Invalid => write!(f, "invalid"),
        }
    }
}

impl RotationState {
    /// Seconds since last use
    pub fn idle_secs(&self, now: DateTime<Utc>) -> Option<u64> {
        self.last_used_at.map(|last| secs_between(last, now))
    }

    /// Whether the usage cap is reached
    pub fn is_exhausted(&self, policy: &RotationPolicy) -> bool {
        self.usage_count >= policy.max_uses_per_resource
    }

    /// Whether an explicit cooldown is still running
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    /// Reset the usage counter of an exhausted resource whose cooldown
    /// period has elapsed. Returns true when a reset happened.
    pub fn reset_if_recovered(&mut self, now: DateTime<Utc>, policy: &RotationPolicy) -> bool {
        if !self.is_exhausted(policy) {
            return false;
        }
        let recovered = match self.last_used_at {
            Some(last) => now >= add_secs(last, policy.cooldown_period_secs),
            None => true,
        };
        if recovered {
            self.usage_count = 0;
        }
        recovered
    }

    /// Drop an explicit cooldown that has run out
    pub fn clear_expired_cooldown(&mut self, now: DateTime<Utc>) {
        if self.cooldown_until.is_some_and(|until| now >= until) {
            self.cooldown_until = None;
        }
    }

    /// Request-count status
    ///
    /// An exhausted resource whose cooldown period has elapsed reports
    /// `Available`; the counter reset happens at selection time.
    pub fn quota_status(&self, now: DateTime<Utc>, policy: &RotationPolicy) -> ResourceStatus {
        if self.invalid {
            return ResourceStatus::Invalid;
        }

        let mut status = ResourceStatus::Available;
        let mut latest = now;

        if let Some(until) = self.cooldown_until.filter(|until| *until > latest) {
            latest = until;
            status = ResourceStatus::InCooldown { until };
        }

        if let Some(last) = self.last_used_at {
            if self.is_exhausted(policy) {
                let until = add_secs(last, policy.cooldown_period_secs);
                if until > latest {
                    latest = until;
                    status = ResourceStatus::UsageExhausted { until };
                }
            }

            let until = add_secs(last, policy.min_request_interval_secs);
            if until > latest {
                status = ResourceStatus::Spacing { until };
            }
        }

        status
    }

    /// Session-time status: only invalidation and explicit cooldowns exclude
    pub fn session_status(&self, now: DateTime<Utc>) -> ResourceStatus {
        if self.invalid {
            return ResourceStatus::Invalid;
        }
        match self.cooldown_until {
            Some(until) if now < until => ResourceStatus::InCooldown { until },
            _ => ResourceStatus::Available,
        }
    }
}

// ============================================================================
// State Table
// ============================================================================

/// Rotation state of every resource, keyed by id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateTable(BTreeMap<ResourceId, RotationState>);

impl StateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add default entries for resources that have none
    pub fn ensure(&mut self, resources: &[Resource]) {
        for resource in resources {
            self.0.entry(resource.id.clone()).or_default();
        }
    }

    /// Table with a default entry for every resource
    pub fn for_resources(resources: &[Resource]) -> Self {
        let mut table = Self::new();
        table.ensure(resources);
        table
    }

    pub fn get(&self, id: &ResourceId) -> Option<&RotationState> {
        self.0.get(id)
    }

    pub fn get_mut(&mut self, id: &ResourceId) -> Option<&mut RotationState> {
        self.0.get_mut(id)
    }

    pub fn insert(&mut self, id: ResourceId, state: RotationState) {
        self.0.insert(id, state);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceId, &RotationState)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(ResourceId, RotationState)> for StateTable {
    fn from_iter<I: IntoIterator<Item = (ResourceId, RotationState)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
