//! JSON Lines index in a local directory.
//!
//! `publish` appends to `{alias}.pending.jsonl`. `finalize` merges the pending
//! documents into `{alias}.jsonl` (one line per `doc_id`, newest wins) and
//! swaps the file in with a rename, so readers only ever see complete files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{IndexDocument, SearchIndex};

pub struct JsonlSearchIndex {
    dir: PathBuf,
    alias: String,
    /// Serializes appends and finalization
    write_lock: Mutex<()>,
}

impl JsonlSearchIndex {
    pub async fn open(dir: impl Into<PathBuf>, alias: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create index directory {}", dir.display()))?;
        Ok(Self {
            dir,
            alias: alias.into(),
            write_lock: Mutex::new(()),
        })
    }

    /// File readers consume.
    pub fn published_path(&self) -> PathBuf {
        self.dir.join(format!("{}.jsonl", self.alias))
    }

    fn pending_path(&self) -> PathBuf {
        self.dir.join(format!("{}.pending.jsonl", self.alias))
    }
}

#[async_trait]
impl SearchIndex for JsonlSearchIndex {
    async fn publish(&self, document: &IndexDocument) -> Result<()> {
        let mut line = serde_json::to_string(document)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.pending_path())
            .await
            .context("failed to open pending index file")?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn finalize(&self, prefix: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let pending_path = self.pending_path();
        if !tokio::fs::try_exists(&pending_path).await? {
            info!("Nothing published for '{prefix}'; {} unchanged", self.alias);
            return Ok(());
        }

        let published_path = self.published_path();
        let mut order: Vec<String> = Vec::new();
        let mut lines: HashMap<String, String> = HashMap::new();
        for path in [&published_path, &pending_path] {
            merge_lines(path, &mut order, &mut lines).await?;
        }

        let mut output = String::new();
        for doc_id in &order {
            if let Some(line) = lines.get(doc_id) {
                output.push_str(line);
                output.push('\n');
            }
        }

        let staging = self.dir.join(format!("{}.jsonl.tmp", self.alias));
        tokio::fs::write(&staging, output).await?;
        tokio::fs::rename(&staging, &published_path).await?;
        tokio::fs::remove_file(&pending_path).await?;

        info!(
            "Published {} documents to {} (after '{prefix}')",
            order.len(),
            published_path.display()
        );
        Ok(())
    }
}

/// Reads `path` (if present) into `lines` keyed by `doc_id`, keeping first-seen order.
async fn merge_lines(
    path: &Path,
    order: &mut Vec<String>,
    lines: &mut HashMap<String, String>,
) -> Result<()> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(());
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let doc_id = serde_json::from_str::<Value>(line)
            .ok()
            .and_then(|v| v.get("doc_id").and_then(Value::as_str).map(str::to_string));
        let Some(doc_id) = doc_id else {
            warn!("Skipping malformed line in {}", path.display());
            continue;
        };
        if lines.insert(doc_id.clone(), line.to_string()).is_none() {
            order.push(doc_id);
        }
    }
    Ok(())
}
