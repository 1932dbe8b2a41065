//! Search Module
//!
//! The search backend port with an in-memory index and an Elasticsearch
//! client speaking the REST API over HTTP.

mod elasticsearch;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

pub use elasticsearch::ElasticsearchClient;
pub use memory::MemorySearchIndex;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: usize = 100;

const MAX_INDEX_NAME_BYTES: usize = 255;
const FORBIDDEN_INDEX_CHARS: &[char] = &[
    '\\', '/', '*', '?', '"', '<', '>', '|', ' ', ',', '#', ':',
];

/// Checks `name` against the index naming rules: lowercase, at most 255
/// bytes, none of `\ / * ? " < > | , # :` or spaces, not starting with
/// `-`, `_` or `+`, and not `.` or `..`.
///
/// # Errors
/// Returns `Error::SearchRejected` naming the broken rule.
pub fn validate_index_name(name: &str) -> Result<()> {
    let reject = |reason: &str| -> Result<()> {
        Err(Error::SearchRejected(format!(
            "Invalid index name '{}': {}",
            name, reason
        )))
    };

    if name.is_empty() {
        return reject("must not be empty");
    }
    if name.len() > MAX_INDEX_NAME_BYTES {
        return reject("longer than 255 bytes");
    }
    if name == "." || name == ".." {
        return reject("reserved name");
    }
    if name.starts_with(['-', '_', '+']) {
        return reject("must not start with '-', '_' or '+'");
    }
    if name.chars().any(|c| c.is_uppercase()) {
        return reject("must be lowercase");
    }
    if name.contains(FORBIDDEN_INDEX_CHARS) {
        return reject("contains a forbidden character");
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Full-text query with exact-match filters and paging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub filters: BTreeMap<String, Value>,
    /// 1-based page number
    pub page: usize,
    pub page_size: usize,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_order: SortOrder,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            filters: BTreeMap::new(),
            page: 1,
            page_size: 10,
            sort_by: None,
            sort_order: SortOrder::default(),
        }
    }

    pub fn with_page(mut self, page: usize, page_size: usize) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filters.insert(field.into(), value);
        self
    }

    pub fn sorted_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort_by = Some(field.into());
        self.sort_order = order;
        self
    }

    /// Page number clamped to at least 1.
    pub fn page(&self) -> usize {
        self.page.max(1)
    }

    /// Page size clamped to `1..=MAX_PAGE_SIZE`.
    pub fn page_size(&self) -> usize {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    /// Number of hits skipped before this page.
    pub fn offset(&self) -> usize {
        (self.page() - 1) * self.page_size()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    pub document: Value,
}

/// Document index operations.
///
/// Unreachable backends report `Error::SearchUnavailable`; requests the
/// backend refuses report `Error::SearchRejected`.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Indexes `document`, generating an id when none is given. Returns the id.
    async fn index(&self, index: &str, id: Option<&str>, document: &Value) -> Result<String>;

    /// Merges `fields` into an existing document.
    async fn update(&self, index: &str, id: &str, fields: &Value) -> Result<()>;

    async fn delete(&self, index: &str, id: &str) -> Result<()>;

    async fn search(&self, index: &str, query: &SearchQuery) -> Result<Vec<SearchHit>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paging_is_clamped() {
        let query = SearchQuery::new("x").with_page(0, 1_000);
        assert_eq!(query.page(), 1);
        assert_eq!(query.page_size(), MAX_PAGE_SIZE);
        assert_eq!(query.offset(), 0);

        let query = SearchQuery::new("x").with_page(3, 20);
        assert_eq!(query.offset(), 40);
    }

    #[test]
    fn test_index_name_rules() {
        for valid in ["articles", "logs-2024.01", "a_b"] {
            assert!(validate_index_name(valid).is_ok(), "{}", valid);
        }
        for invalid in [
            "",
            "Articles",
            "docs/_doc/1",
            "docs?refresh=true",
            "a b",
            "_all",
            "-x",
            "..",
            "docs#frag",
        ] {
            assert!(
                matches!(validate_index_name(invalid), Err(Error::SearchRejected(_))),
                "{}",
                invalid
            );
        }
        assert!(validate_index_name(&"a".repeat(256)).is_err());
    }
}
