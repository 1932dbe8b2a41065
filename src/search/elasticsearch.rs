//! Elasticsearch REST client.
//!
//! Transport failures and 5xx replies map to `SearchUnavailable`; other
//! non-success replies map to `SearchRejected`. Index names are checked
//! before any request is sent, and every caller-supplied path part is
//! percent-encoded as a single segment.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::search::{validate_index_name, SearchBackend, SearchHit, SearchQuery, SortOrder};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct IndexReply {
    #[serde(rename = "_id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct SearchReply {
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    hits: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score")]
    score: Option<f64>,
    #[serde(rename = "_source", default)]
    source: Value,
}

fn transport_error(err: reqwest::Error) -> Error {
    Error::SearchUnavailable(err.to_string())
}

fn validate_document_id(id: &str) -> Result<()> {
    if id.is_empty() || id == "." || id == ".." {
        return Err(Error::SearchRejected(format!("Invalid document id '{}'", id)));
    }
    Ok(())
}

#[derive(Clone)]
pub struct ElasticsearchClient {
    client: reqwest::Client,
    base_url: Url,
}

impl ElasticsearchClient {
    /// Creates a client for the cluster at `base_url`.
    ///
    /// # Errors
    /// Returns `Error::Internal` if `base_url` is not an absolute http(s)
    /// URL or the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Internal(format!("Invalid search URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Internal(format!(
                "Invalid search URL '{}': not a base URL",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("Search client setup failed: {}", e)))?;
        Ok(Self { client, base_url })
    }

    /// Appends `segments` to the base path, encoding each one whole.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Internal(format!("Search URL '{}' is not a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Builds the `_search` request body.
    pub fn query_body(query: &SearchQuery) -> Value {
        let must = if query.query.trim().is_empty() {
            json!([{ "match_all": {} }])
        } else {
            json!([{ "multi_match": { "query": query.query, "fields": ["*"] } }])
        };
        let filter: Vec<Value> = query
            .filters
            .iter()
            .map(|(field, value)| json!({ "term": { field: value } }))
            .collect();

        let mut body = json!({
            "query": { "bool": { "must": must, "filter": filter } },
            "from": query.offset(),
            "size": query.page_size(),
        });
        if let Some(field) = &query.sort_by {
            let order = match query.sort_order {
                SortOrder::Asc => "asc",
                SortOrder::Desc => "desc",
            };
            body["sort"] = json!([{ field: { "order": order } }]);
        }
        body
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let message = format!("HTTP {}: {}", status.as_u16(), text);
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(Error::SearchUnavailable(message))
        } else {
            Err(Error::SearchRejected(message))
        }
    }
}

#[async_trait]
impl SearchBackend for ElasticsearchClient {
    async fn index(&self, index: &str, id: Option<&str>, document: &Value) -> Result<String> {
        validate_index_name(index)?;
        let request = match id {
            Some(id) => {
                validate_document_id(id)?;
                self.client.put(self.url(&[index, "_doc", id])?)
            }
            None => self.client.post(self.url(&[index, "_doc"])?),
        };
        let response = request.json(document).send().await.map_err(transport_error)?;
        let reply: IndexReply = Self::check(response)
            .await?
            .json()
            .await
            .map_err(transport_error)?;
        debug!(index = %index, id = %reply.id, "Indexed document");
        Ok(reply.id)
    }

    async fn update(&self, index: &str, id: &str, fields: &Value) -> Result<()> {
        validate_index_name(index)?;
        validate_document_id(id)?;
        let response = self
            .client
            .post(self.url(&[index, "_update", id])?)
            .json(&json!({ "doc": fields }))
            .send()
            .await
            .map_err(transport_error)?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete(&self, index: &str, id: &str) -> Result<()> {
        validate_index_name(index)?;
        validate_document_id(id)?;
        let response = self
            .client
            .delete(self.url(&[index, "_doc", id])?)
            .send()
            .await
            .map_err(transport_error)?;
        Self::check(response).await?;
        Ok(())
    }

    async fn search(&self, index: &str, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        validate_index_name(index)?;
        let response = self
            .client
            .post(self.url(&[index, "_search"])?)
            .json(&Self::query_body(query))
            .send()
            .await
            .map_err(transport_error)?;
        let reply: SearchReply = Self::check(response)
            .await?
            .json()
            .await
            .map_err(transport_error)?;

        Ok(reply
            .hits
            .hits
            .into_iter()
            .map(|hit| SearchHit {
                id: hit.id,
                score: hit.score.unwrap_or(0.0),
                document: hit.source,
            })
            .collect())
    }
}
