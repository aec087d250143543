//! Elasticsearch/OpenSearch compatible index over HTTP.
//!
//! Each run writes into a fresh index `{alias}-{suffix}`, created on the first
//! publish. `finalize` copies over whatever the alias served before, refreshes
//! the new index and atomically points the alias at it. Documents already in
//! the new index win over the copied ones, so a run only has to publish the
//! files it actually processed.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Response, StatusCode};
use serde_json::{json, Value};
use tokio::sync::OnceCell;

use super::{IndexDocument, SearchIndex};
use crate::config::HTTP_STATUS_TOO_MANY_REQUESTS;
use crate::error_handling::TransientError;

/// Longest response body quoted in an error
const MAX_BODY_IN_ERROR: usize = 500;

pub struct HttpSearchIndex {
    client: Arc<reqwest::Client>,
    base_url: String,
    alias: String,
    index_name: String,
    created: OnceCell<()>,
}

impl HttpSearchIndex {
    pub fn new(
        client: Arc<reqwest::Client>,
        base_url: &str,
        alias: impl Into<String>,
        index_suffix: &str,
    ) -> Self {
        let alias = alias.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            index_name: format!("{alias}-{index_suffix}"),
            alias,
            created: OnceCell::new(),
        }
    }

    /// Concrete index receiving this run's documents.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn ensure_index(&self) -> Result<()> {
        self.created.get_or_try_init(|| self.create_index()).await?;
        Ok(())
    }

    async fn create_index(&self) -> Result<()> {
        let response = self.client.put(self.url(&self.index_name)).send().await?;
        let status = response.status();
        if status.is_success() {
            info!("Created search index {}", self.index_name);
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception") {
            debug!("Search index {} already exists", self.index_name);
            return Ok(());
        }
        Err(status_error("create index", status, &body))
    }

    /// Names of the indices the alias currently points at.
    async fn alias_targets(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.url(&format!("_alias/{}", self.alias)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let body: Value = ensure_success("read alias", response).await?.json().await?;
        Ok(body
            .as_object()
            .map(|indices| indices.keys().cloned().collect())
            .unwrap_or_default())
    }

    /// Copies the documents of `sources` into this run's index.
    ///
    /// `op_type: create` with `conflicts: proceed` leaves documents this run
    /// already published untouched.
    async fn carry_over(&self, sources: &[String]) -> Result<()> {
        if sources.is_empty() {
            return Ok(());
        }
        let request = json!({
            "conflicts": "proceed",
            "source": { "index": sources },
            "dest": { "index": self.index_name, "op_type": "create" },
        });
        let response = self
            .client
            .post(self.url("_reindex?wait_for_completion=true"))
            .json(&request)
            .send()
            .await?;
        let summary: Value = ensure_success("reindex", response).await?.json().await?;

        if let Some(failure) = summary["failures"].as_array().and_then(|f| f.first()) {
            bail!(
                "reindex from {} into {} failed: {failure}",
                sources.join(","),
                self.index_name
            );
        }
        info!(
            "Carried {} document(s) from {} into {}",
            summary["created"].as_u64().unwrap_or_default(),
            sources.join(","),
            self.index_name
        );
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    async fn publish(&self, document: &IndexDocument) -> Result<()> {
        self.ensure_index().await?;

        let action = json!({ "index": { "_index": self.index_name, "_id": document.doc_id } });
        let mut body = serde_json::to_string(&action)?;
        body.push('\n');
        body.push_str(&serde_json::to_string(document)?);
        body.push('\n');

        let response = self
            .client
            .post(self.url("_bulk"))
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        let summary: Value = ensure_success("bulk publish", response).await?.json().await?;

        if summary["errors"].as_bool() == Some(true) {
            let item = &summary["items"][0]["index"];
            let item_status = item["status"].as_u64().unwrap_or_default();
            let message = format!(
                "index rejected {} (status {item_status}): {}",
                document.doc_id, item["error"]
            );
            if is_retryable_status(item_status as u16) {
                return Err(TransientError(message).into());
            }
            bail!(message);
        }
        Ok(())
    }

    async fn finalize(&self, prefix: &str) -> Result<()> {
        if self.created.get().is_none() {
            info!("Nothing published for '{prefix}'; alias {} unchanged", self.alias);
            return Ok(());
        }

        let previous: Vec<String> = self
            .alias_targets()
            .await?
            .into_iter()
            .filter(|index| index != &self.index_name)
            .collect();
        self.carry_over(&previous).await?;

        let response = self
            .client
            .post(self.url(&format!("{}/_refresh", self.index_name)))
            .send()
            .await?;
        ensure_success("refresh", response).await?;

        let mut actions: Vec<Value> = previous
            .iter()
            .map(|index| json!({ "remove": { "index": index, "alias": self.alias } }))
            .collect();
        actions.push(json!({ "add": { "index": self.index_name, "alias": self.alias } }));

        let response = self
            .client
            .post(self.url("_aliases"))
            .json(&json!({ "actions": actions }))
            .send()
            .await?;
        ensure_success("alias swap", response).await?;

        info!(
            "Alias {} now points at {} (after '{prefix}')",
            self.alias, self.index_name
        );
        Ok(())
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == HTTP_STATUS_TOO_MANY_REQUESTS || (500..600).contains(&status)
}

/// Converts a non-2xx response into an error; 429 and 5xx are transient.
async fn ensure_success(action: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(action, status, &body))
}

fn status_error(action: &str, status: StatusCode, body: &str) -> anyhow::Error {
    let body: String = body.chars().take(MAX_BODY_IN_ERROR).collect();
    let message = format!("{action} failed with HTTP {status}: {}", body.trim());
    if is_retryable_status(status.as_u16()) {
        TransientError(message).into()
    } else {
        anyhow!(message)
    }
}
