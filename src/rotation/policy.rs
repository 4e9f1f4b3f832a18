//! Rotation policy and selection strategies

use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::error::{RotationError, RotationResult};
use crate::pool::ResourceId;

// ============================================================================
// Selection Mode
// ============================================================================

/// How eligibility is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Request-count caps with a cooldown once exhausted (proxy + cookie pairs)
    #[default]
    Quota,
    /// Cumulative session time with forced least-recently-used rotation
    /// (full login accounts)
    SessionDuration,
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quota => write!(f, "quota"),
            Self::SessionDuration => write!(f, "session_duration"),
        }
    }
}

/// Strategy used to pick among eligible resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Uniform,
    IdleWeighted,
    InOrder,
}

impl StrategyKind {
    /// Instantiate the strategy
    pub fn build(self) -> Box<dyn SelectionStrategy> {
        match self {
            Self::Uniform => Box::new(UniformRandom::new()),
            Self::IdleWeighted => Box::new(IdleWeighted::new()),
            Self::InOrder => Box::new(InOrder),
        }
    }
}

// ============================================================================
// Rotation Policy
// ============================================================================

/// Rotation policy
///
/// Durations are whole seconds so the policy reads the same in `config.toml`,
/// environment variables and the account registry `parameters` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationPolicy {
    /// Forced selection mode; `None` lets the pool format decide
    pub mode: Option<SelectionMode>,

    pub strategy: StrategyKind,

    pub max_uses_per_resource: u32,

    /// Idle time after which an exhausted resource gets its usage reset
    pub cooldown_period_secs: u64,

    /// Cooldown applied after a rate-limit signal
    pub rate_limit_cooldown_secs: u64,

    /// Cooldown applied after a transient failure
    pub transient_cooldown_secs: u64,

    /// Session time after which an account is rotated out
    pub rotation_duration_threshold_secs: u64,

    /// Penalty added to the session time of an empty or rate-limited session
    pub duration_malus_secs: u64,

    /// Minimum spacing between two uses of the same resource
    pub min_request_interval_secs: u64,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            mode: None,
            strategy: StrategyKind::Uniform,
            max_uses_per_resource: 50,
            cooldown_period_secs: 15 * 60,
            rate_limit_cooldown_secs: 15 * 60,
            transient_cooldown_secs: 60,
            rotation_duration_threshold_secs: 3600,
            duration_malus_secs: 3 * 3600,
            min_request_interval_secs: 24,
        }
    }
}

impl RotationPolicy {
    /// Selection mode in effect
    pub fn effective_mode(&self) -> SelectionMode {
        self.mode.unwrap_or_default()
    }

    pub fn cooldown_period(&self) -> Duration {
        Duration::from_secs(self.cooldown_period_secs)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }

    pub fn transient_cooldown(&self) -> Duration {
        Duration::from_secs(self.transient_cooldown_secs)
    }

    pub fn rotation_duration_threshold(&self) -> Duration {
        Duration::from_secs(self.rotation_duration_threshold_secs)
    }

    pub fn duration_malus(&self) -> Duration {
        Duration::from_secs(self.duration_malus_secs)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_secs(self.min_request_interval_secs)
    }

    /// Validate the policy
    pub fn validate(&self) -> RotationResult<()> {
        if self.max_uses_per_resource == 0 {
            return Err(RotationError::configuration(
                "max_uses_per_resource must be at least 1",
            ));
        }
        if self.rotation_duration_threshold_secs == 0
            && self.effective_mode() == SelectionMode::SessionDuration
        {
            return Err(RotationError::configuration(
                "rotation_duration_threshold must be positive in session_duration mode",
            ));
        }
        Ok(())
    }
}

/// Policy values carried by a pool definition
///
/// Set fields override the configured policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOverlay {
    pub max_uses_per_resource: Option<u32>,
    pub cooldown_period_secs: Option<u64>,
    pub rate_limit_cooldown_secs: Option<u64>,
    pub transient_cooldown_secs: Option<u64>,
    pub rotation_duration_threshold_secs: Option<u64>,
    pub duration_malus_secs: Option<u64>,
    pub min_request_interval_secs: Option<u64>,
}

impl PolicyOverlay {
    /// Whether the overlay sets nothing
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Apply the overlay on top of a policy
    pub fn apply(&self, mut policy: RotationPolicy) -> RotationPolicy {
        if let Some(v) = self.max_uses_per_resource {
            policy.max_uses_per_resource = v;
        }
        if let Some(v) = self.cooldown_period_secs {
            policy.cooldown_period_secs = v;
        }
        if let Some(v) = self.rate_limit_cooldown_secs {
            policy.rate_limit_cooldown_secs = v;
        }
        if let Some(v) = self.transient_cooldown_secs {
            policy.transient_cooldown_secs = v;
        }
        if let Some(v) = self.rotation_duration_threshold_secs {
            policy.rotation_duration_threshold_secs = v;
        }
        if let Some(v) = self.duration_malus_secs {
            policy.duration_malus_secs = v;
        }
        if let Some(v) = self.min_request_interval_secs {
            policy.min_request_interval_secs = v;
        }
        policy
    }
}

// ============================================================================
// Selection Strategies
// ============================================================================

/// An eligible resource offered to a strategy
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: ResourceId,
    /// Seconds since last use, `None` when never used
    pub idle_secs: Option<u64>,
    pub usage_count: u32,
}

/// Picks one resource among the eligible candidates
///
/// Candidates arrive in pool order and are never empty. The returned index
/// must be within bounds; out-of-range answers fall back to the first
/// candidate.
pub trait SelectionStrategy: Send + fmt::Debug {
    fn choose(&mut self, candidates: &[Candidate]) -> usize;
}

/// Uniform random choice
#[derive(Debug)]
pub struct UniformRandom {
    rng: ChaCha8Rng,
}

impl UniformRandom {
    pub fn new() -> Self {
        Self {
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    /// Reproducible sequence for tests
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Default for UniformRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStrategy for UniformRandom {
    fn choose(&mut self, candidates: &[Candidate]) -> usize {
        if candidates.len() <= 1 {
            return 0;
        }
        self.rng.gen_range(0..candidates.len())
    }
}

/// Random choice weighted by idle time, never-used resources weigh the most
#[derive(Debug)]
pub struct IdleWeighted {
    rng: ChaCha8Rng,
}

impl IdleWeighted {
    pub fn new() -> Self {
        Self {
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    fn weight(candidate: &Candidate, longest_idle: u64) -> u64 {
        match candidate.idle_secs {
            Some(idle) => idle.saturating_add(1),
            None => longest_idle.saturating_mul(2).max(1),
        }
    }
}

impl Default for IdleWeighted {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStrategy for IdleWeighted {
    fn choose(&mut self, candidates: &[Candidate]) -> usize {
        if candidates.len() <= 1 {
            return 0;
        }

        let longest_idle = candidates
            .iter()
            .filter_map(|c| c.idle_secs)
            .max()
            .unwrap_or(1)
            .min(u32::MAX as u64);
        let weights: Vec<u64> = candidates
            .iter()
            .map(|c| Self::weight(c, longest_idle).min(u32::MAX as u64))
            .collect();

        match WeightedIndex::new(&weights) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => self.rng.gen_range(0..candidates.len()),
        }
    }
}

/// First eligible resource in pool order
#[derive(Debug, Default, Clone, Copy)]
pub struct InOrder;

impl SelectionStrategy for InOrder {
    fn choose(&mut self, _candidates: &[Candidate]) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(idles: &[Option<u64>]) -> Vec<Candidate> {
        idles
            .iter()
            .enumerate()
            .map(|(i, idle)| Candidate {
                id: ResourceId::new(format!("r{i}")),
                idle_secs: *idle,
                usage_count: 0,
            })
            .collect()
    }

    #[test]
    fn test_default_policy() {
        let policy = RotationPolicy::default();
        assert_eq!(policy.max_uses_per_resource, 50);
        assert_eq!(policy.cooldown_period(), Duration::from_secs(900));
        assert_eq!(policy.rate_limit_cooldown(), Duration::from_secs(900));
        assert_eq!(policy.rotation_duration_threshold(), Duration::from_secs(3600));
        assert_eq!(policy.duration_malus(), Duration::from_secs(10800));
        assert_eq!(policy.min_request_interval(), Duration::from_secs(24));
        assert_eq!(policy.effective_mode(), SelectionMode::Quota);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_cap() {
        let policy = RotationPolicy {
            max_uses_per_resource: 0,
            ..Default::default()
        };
        assert!(policy.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_overlay_apply() {
        let overlay = PolicyOverlay {
            rotation_duration_threshold_secs: Some(7200),
            max_uses_per_resource: Some(5),
            ..Default::default()
        };
        let policy = overlay.apply(RotationPolicy::default());
        assert_eq!(policy.rotation_duration_threshold_secs, 7200);
        assert_eq!(policy.max_uses_per_resource, 5);
        assert_eq!(policy.cooldown_period_secs, 900);
        assert!(PolicyOverlay::default().is_empty());
    }

    #[test]
    fn test_policy_from_toml() {
        let policy: RotationPolicy = toml::from_str(
            r#"
            mode = "session_duration"
            strategy = "in_order"
            max_uses_per_resource = 3
            "#,
        )
        .unwrap();
        assert_eq!(policy.effective_mode(), SelectionMode::SessionDuration);
        assert_eq!(policy.strategy, StrategyKind::InOrder);
        assert_eq!(policy.max_uses_per_resource, 3);
        assert_eq!(policy.min_request_interval_secs, 24);
    }

    #[test]
    fn test_uniform_seeded_is_reproducible() {
        let pool = candidates(&[Some(1), Some(2), Some(3), Some(4)]);
        let mut a = UniformRandom::seeded(42);
        let mut b = UniformRandom::seeded(42);
        for _ in 0..20 {
            let pick = a.choose(&pool);
            assert!(pick < pool.len());
            assert_eq!(pick, b.choose(&pool));
        }
    }

    #[test]
    fn test_uniform_covers_all_candidates() {
        let pool = candidates(&[None, None, None]);
        let mut strategy = UniformRandom::seeded(7);
        let mut seen = [false; 3];
        for _ in 0..200 {
            seen[strategy.choose(&pool)] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_idle_weighted_prefers_idle() {
        let pool = candidates(&[Some(1), Some(10_000)]);
        let mut strategy = IdleWeighted::seeded(1);
        let idle_picks = (0..500).filter(|_| strategy.choose(&pool) == 1).count();
        assert!(idle_picks > 450, "idle resource picked {idle_picks} times");
    }

    #[test]
    fn test_in_order_picks_first() {
        let pool = candidates(&[Some(5), None]);
        assert_eq!(InOrder.choose(&pool), 0);
    }
}
