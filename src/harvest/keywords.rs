//! Search keyword selection

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Keywords used when the caller gives none
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "bitcoin",
    "ethereum",
    "crypto",
    "btc",
    "eth",
    "blockchain",
    "defi",
    "nft",
    "solana",
    "memecoin",
    "stablecoin",
    "altcoin",
];

/// Picks the keyword for a search
///
/// The caller's keyword is used unless it is empty or a weighted coin flip
/// selects a random default keyword instead, which spreads collection over
/// the default list.
#[derive(Debug)]
pub struct KeywordPicker {
    defaults: Vec<String>,
    default_weight: f64,
    rng: ChaCha8Rng,
}

impl KeywordPicker {
    pub fn new(defaults: Vec<String>, default_weight: f64) -> Self {
        Self {
            defaults,
            default_weight: default_weight.clamp(0.0, 1.0),
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    /// Picker with the built-in keyword list
    pub fn with_builtin(default_weight: f64) -> Self {
        Self::new(
            DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            default_weight,
        )
    }

    /// Reproducible picker for tests
    pub fn seeded(defaults: Vec<String>, default_weight: f64, seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            ..Self::new(defaults, default_weight)
        }
    }

    /// Keyword for the next search, `None` when nothing is available
    pub fn pick(&mut self, requested: Option<&str>) -> Option<String> {
        let requested = requested.map(str::trim).filter(|k| !k.is_empty());

        match requested {
            Some(keyword) if !self.rng.gen_bool(self.default_weight) => Some(keyword.to_string()),
            Some(keyword) => self.random_default().or_else(|| Some(keyword.to_string())),
            None => self.random_default(),
        }
    }

    /// Random entry of the default list
    pub fn random_default(&mut self) -> Option<String> {
        self.defaults.choose(&mut self.rng).cloned()
    }
}
