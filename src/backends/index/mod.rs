//! Search index publication.
//!
//! Documents are published one at a time during a prefix and made visible to
//! readers by `finalize` once the prefix completes. Publication is
//! at-least-once: implementations key documents by `doc_id`, so a
//! republished document replaces its earlier copy.

mod http;
mod jsonl;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use http::HttpSearchIndex;
pub use jsonl::JsonlSearchIndex;

/// The combined record sent to the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    /// SHA-256 of the source path, hex encoded
    pub doc_id: String,
    pub filename: String,
    pub source_path: String,
    pub base_path: String,
    pub text: String,
    /// Fields merged from the reference datasets
    pub metadata: Map<String, Value>,
    pub ocr_applied: bool,
    /// RFC 3339 timestamp of this publication
    pub ingested_at: String,
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn publish(&self, document: &IndexDocument) -> Result<()>;

    /// Makes everything published so far visible (alias swap or flush).
    async fn finalize(&self, prefix: &str) -> Result<()>;
}
