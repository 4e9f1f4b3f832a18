//! Raw record normalization and validity filters

use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::models::{Item, RawRecord};
use crate::utils::{hash_identity, last_path_segment, normalize_whitespace, strip_html};

/// Output timestamp format (UTC, microseconds)
pub const CREATED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Author placeholder when a record has none
pub const DELETED_AUTHOR: &str = "[deleted]";

/// Source timestamp format of the remote backend
const BACKEND_TIME_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// Filter settings
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Minimum content length in characters
    pub min_post_length: usize,

    /// Maximum distance between `created_at` and now, either direction
    pub max_oldness_secs: u64,

    /// Domain used when a record carries none
    pub default_domain: String,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            min_post_length: 10,
            max_oldness_secs: 1800,
            default_domain: "x.com".to_string(),
        }
    }
}

/// Why a record was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    EmptyContent,
    TooShort,
    MissingTimestamp,
    OutsideAgeWindow,
    MissingId,
    Duplicate,
    KeywordInAuthorOnly,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::EmptyContent => "empty content",
            Self::TooShort => "content too short",
            Self::MissingTimestamp => "missing or unparseable timestamp",
            Self::OutsideAgeWindow => "outside age window",
            Self::MissingId => "no external id",
            Self::Duplicate => "duplicate",
            Self::KeywordInAuthorOnly => "keyword only in author",
        };
        f.write_str(text)
    }
}

/// Maps raw records to items, dropping invalid ones
///
/// Remembers emitted external ids for the lifetime of the emitter, so one
/// emitter should span one harvest run.
#[derive(Debug, Default)]
pub struct ItemEmitter {
    config: EmitterConfig,
    seen: HashSet<String>,
    rejections: HashMap<Rejection, usize>,
}

impl ItemEmitter {
    pub fn new(config: EmitterConfig) -> Self {
        Self {
            config,
            seen: HashSet::new(),
            rejections: HashMap::new(),
        }
    }

    /// Normalize one record
    ///
    /// `keyword` is the search keyword the record was retrieved with, used
    /// to drop matches on the author name alone.
    pub fn emit(
        &mut self,
        record: RawRecord,
        keyword: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Item, Rejection> {
        let result = self.normalize(record, keyword, now);
        if let Err(rejection) = result {
            *self.rejections.entry(rejection).or_default() += 1;
            tracing::trace!(reason = %rejection, "Record dropped");
        }
        result
    }

    /// Normalize a batch, keeping only valid items
    pub fn emit_all(
        &mut self,
        records: Vec<RawRecord>,
        keyword: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<Item> {
        records
            .into_iter()
            .filter_map(|record| self.emit(record, keyword, now).ok())
            .collect()
    }

    /// Counts of dropped records by reason
    pub fn rejections(&self) -> &HashMap<Rejection, usize> {
        &self.rejections
    }

    /// Number of distinct items emitted
    pub fn emitted(&self) -> usize {
        self.seen.len()
    }

    fn normalize(
        &mut self,
        record: RawRecord,
        keyword: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Item, Rejection> {
        let content = normalize_whitespace(&strip_html(record.content.as_deref().unwrap_or("")));
        if content.is_empty() {
            return Err(Rejection::EmptyContent);
        }
        if content.chars().count() < self.config.min_post_length {
            return Err(Rejection::TooShort);
        }

        let raw_author = record
            .author
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(DELETED_AUTHOR);

        if let Some(keyword) = keyword.map(str::trim).filter(|k| !k.is_empty()) {
            let keyword = keyword.to_lowercase();
            if raw_author.to_lowercase().contains(&keyword)
                && !content.to_lowercase().contains(&keyword)
            {
                return Err(Rejection::KeywordInAuthorOnly);
            }
        }

        let created_at = record
            .created_at
            .as_deref()
            .and_then(parse_created_at)
            .ok_or(Rejection::MissingTimestamp)?;
        let age = (now - created_at).num_seconds().unsigned_abs();
        if age > self.config.max_oldness_secs {
            return Err(Rejection::OutsideAgeWindow);
        }

        let url = record.url.unwrap_or_default().trim().to_string();
        let external_id = record
            .external_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .or_else(|| last_path_segment(&url))
            .ok_or(Rejection::MissingId)?;

        if !self.seen.insert(external_id.clone()) {
            return Err(Rejection::Duplicate);
        }

        let domain = record
            .domain
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| self.config.default_domain.clone());

        Ok(Item {
            content,
            author: hash_identity(raw_author),
            created_at: created_at.format(CREATED_AT_FORMAT).to_string(),
            domain,
            url,
            external_id,
        })
    }
}

/// Parse a source timestamp
///
/// Accepts `Wed Oct 10 20:19:24 +0000 2018`, RFC 3339 and
/// `2023-06-16 10:10:59+00:00`.
pub fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    DateTime::parse_from_str(raw, BACKEND_TIME_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z"))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.fZ")
                .ok()
                .map(|naive| naive.and_utc())
        })
}
