//! In-memory search index.
//!
//! Scores a document by how many times the lowercased query terms occur in
//! its string fields. An empty query matches every document with score 1.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::search::{SearchBackend, SearchHit, SearchQuery, SortOrder};

#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    indices: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents held in `index`.
    pub async fn count(&self, index: &str) -> usize {
        self.indices
            .read()
            .await
            .get(index)
            .map_or(0, |docs| docs.len())
    }
}

fn collect_text(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            out.push_str(&s.to_lowercase());
            out.push(' ');
        }
        Value::Array(items) => items.iter().for_each(|v| collect_text(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_text(v, out)),
        _ => {}
    }
}

fn score(document: &Value, terms: &[String]) -> f64 {
    if terms.is_empty() {
        return 1.0;
    }
    let mut text = String::new();
    collect_text(document, &mut text);
    terms
        .iter()
        .map(|term| text.matches(term.as_str()).count() as f64)
        .sum()
}

fn compare_field(a: &Value, b: &Value, field: &str) -> Ordering {
    match (a.get(field), b.get(field)) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

fn require_object(document: &Value) -> Result<()> {
    if document.is_object() {
        Ok(())
    } else {
        Err(Error::SearchRejected(
            "Documents must be JSON objects".to_string(),
        ))
    }
}

#[async_trait]
impl SearchBackend for MemorySearchIndex {
    async fn index(&self, index: &str, id: Option<&str>, document: &Value) -> Result<String> {
        require_object(document)?;
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        self.indices
            .write()
            .await
            .entry(index.to_string())
            .or_default()
            .insert(id.clone(), document.clone());
        Ok(id)
    }

    async fn update(&self, index: &str, id: &str, fields: &Value) -> Result<()> {
        let Value::Object(fields) = fields else {
            return Err(Error::SearchRejected(
                "Partial documents must be JSON objects".to_string(),
            ));
        };
        let mut indices = self.indices.write().await;
        let document = indices
            .get_mut(index)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| Error::SearchRejected(format!("Document {}/{} not found", index, id)))?;

        if let Value::Object(existing) = document {
            for (key, value) in fields {
                existing.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, index: &str, id: &str) -> Result<()> {
        let removed = self
            .indices
            .write()
            .await
            .get_mut(index)
            .and_then(|docs| docs.remove(id));
        match removed {
            Some(_) => Ok(()),
            None => Err(Error::SearchRejected(format!(
                "Document {}/{} not found",
                index, id
            ))),
        }
    }

    async fn search(&self, index: &str, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let terms: Vec<String> = query
            .query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();

        let indices = self.indices.read().await;
        let Some(docs) = indices.get(index) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<SearchHit> = docs
            .iter()
            .filter(|(_, doc)| {
                query
                    .filters
                    .iter()
                    .all(|(field, expected)| doc.get(field) == Some(expected))
            })
            .map(|(id, doc)| SearchHit {
                id: id.clone(),
                score: score(doc, &terms),
                document: doc.clone(),
            })
            .filter(|hit| hit.score > 0.0)
            .collect();

        match &query.sort_by {
            Some(field) => hits.sort_by(|a, b| {
                let ord = compare_field(&a.document, &b.document, field);
                match query.sort_order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                }
            }),
            None => hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal)),
        }

        Ok(hits
            .into_iter()
            .skip(query.offset())
            .take(query.page_size())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded() -> MemorySearchIndex {
        let index = MemorySearchIndex::new();
        index
            .index("docs", Some("1"), &json!({"title": "Rust async runtime", "year": 2019}))
            .await
            .unwrap();
        index
            .index("docs", Some("2"), &json!({"title": "Rust rust rust", "year": 2015}))
            .await
            .unwrap();
        index
            .index("docs", Some("3"), &json!({"title": "Python tooling", "year": 2021}))
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn test_search_ranks_by_term_frequency() {
        let index = seeded().await;
        let hits = index.search("docs", &SearchQuery::new("rust")).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "2");
        assert_eq!(hits[1].id, "1");
    }

    #[tokio::test]
    async fn test_filters_and_sorting() {
        let index = seeded().await;
        let query = SearchQuery::new("").sorted_by("year", SortOrder::Asc);
        let ids: Vec<String> = index
            .search("docs", &query)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.id)
            .collect();
        assert_eq!(ids, vec!["2", "1", "3"]);

        let filtered = SearchQuery::new("").with_filter("year", json!(2021));
        let hits = index.search("docs", &filtered).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "3");
    }

    #[tokio::test]
    async fn test_paging() {
        let index = seeded().await;
        let page = SearchQuery::new("").with_page(2, 2);
        assert_eq!(index.search("docs", &page).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let index = seeded().await;
        index
            .update("docs", "3", &json!({"title": "Rust tooling"}))
            .await
            .unwrap();
        assert_eq!(index.search("docs", &SearchQuery::new("tooling rust")).await.unwrap().len(), 3);

        index.delete("docs", "3").await.unwrap();
        assert_eq!(index.count("docs").await, 2);
        assert!(matches!(
            index.delete("docs", "3").await,
            Err(Error::SearchRejected(_))
        ));
    }

    #[tokio::test]
    async fn test_generated_id_and_rejected_document() {
        let index = MemorySearchIndex::new();
        let id = index.index("notes", None, &json!({"body": "hi"})).await.unwrap();
        assert!(!id.is_empty());

        assert!(matches!(
            index.index("notes", None, &json!("scalar")).await,
            Err(Error::SearchRejected(_))
        ));
    }
}
