// Core data structures for the harvester

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Normalized post handed to downstream consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub content: String,
    pub author: String, // SHA-256 of the raw handle, never the handle itself
    pub created_at: String, // ISO-8601 UTC with microseconds
    pub domain: String,
    pub url: String,
    pub external_id: String,
}

/// Post as returned by a content source, before normalization
///
/// Field names follow the remote backend's wire format (`content_`,
/// `author_`, ...); plain names are accepted too.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default, rename = "content_", alias = "content")]
    pub content: Option<String>,

    #[serde(default, rename = "author_", alias = "author")]
    pub author: Option<String>,

    /// `Wed Oct 10 20:19:24 +0000 2018` or RFC 3339
    #[serde(default, rename = "created_at_", alias = "created_at")]
    pub created_at: Option<String>,

    #[serde(default, rename = "domain_", alias = "domain")]
    pub domain: Option<String>,

    #[serde(default, rename = "url_", alias = "url")]
    pub url: Option<String>,

    #[serde(default, rename = "external_id_", alias = "external_id")]
    pub external_id: Option<String>,
}

/// How a session on one resource went
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOutcome {
    pub items_produced: usize,
    pub rate_limited: bool,
    /// New cookie file written during the session
    pub refreshed_credential: Option<PathBuf>,
}

impl SessionOutcome {
    /// Session that produced items without incident
    pub fn productive(items: usize) -> Self {
        Self {
            items_produced: items,
            ..Default::default()
        }
    }

    /// Session that produced nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Session cut short by a rate limit
    pub fn rate_limited(items: usize) -> Self {
        Self {
            items_produced: items,
            rate_limited: true,
            refreshed_credential: None,
        }
    }

    /// Whether the session earns the duration malus
    pub fn is_penalized(&self) -> bool {
        self.rate_limited || self.items_produced == 0
    }
}
