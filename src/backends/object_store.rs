//! Object storage.
//!
//! Source objects are read-only to the pipeline; `put_object` is only used
//! for derived artifacts under the artifact prefix.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::debug;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// All keys under `prefix`, sorted.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;

    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;

    /// Checked before a source is read, so an object that vanished after
    /// listing is reported as missing rather than unreadable.
    async fn exists(&self, key: &str) -> Result<bool>;

    async fn put_object(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Object store backed by a local (or mounted) directory.
///
/// Keys are `/`-separated paths relative to the root.
pub struct LocalObjectStore {
    root: PathBuf,
    /// Keys under this prefix are derived artifacts and never listed
    excluded_prefix: Option<String>,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            excluded_prefix: None,
        }
    }

    pub fn excluding(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        self.excluded_prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            bail!("invalid object key '{key}'");
        }
        Ok(self.root.join(relative))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();
        Some(parts.join("/"))
    }

    fn is_excluded(&self, key: &str) -> bool {
        match &self.excluded_prefix {
            Some(excluded) => {
                key == excluded
                    || key
                        .strip_prefix(excluded.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            None => false,
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let start = self.resolve(prefix.trim_end_matches('/'))?;
        if !tokio::fs::try_exists(&start).await? {
            debug!("Prefix '{prefix}' does not exist under {}", self.root.display());
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .with_context(|| format!("failed to list {}", dir.display()))?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let Some(key) = self.key_for(&path) else {
                    continue;
                };
                if self.is_excluded(&key) {
                    continue;
                }
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read object '{key}'"))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn put_object(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        // Write-then-rename so readers never see a partial artifact
        let mut partial = path.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);
        tokio::fs::write(&partial, bytes)
            .await
            .with_context(|| format!("failed to write object '{key}'"))?;
        tokio::fs::rename(&partial, &path)
            .await
            .with_context(|| format!("failed to publish object '{key}'"))?;
        Ok(())
    }
}
