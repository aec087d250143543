// Shared test helpers: in-memory collaborators and a temp-dir configuration.
//
// Each test file includes this with `mod helpers;`, so not every helper is
// used by every file.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use doc_ingest::backends::{
    Backends, ExtractedText, IndexDocument, ObjectStore, ReferenceDataset, ReferenceFields,
    ReferenceStore, SearchIndex, TextExtractor,
};
use doc_ingest::config::DEFAULT_ARTIFACT_PREFIX;
use doc_ingest::error_handling::TransientError;
use doc_ingest::storage::{AuditLedger, BoundedConnectionPool, PoolSettings};
use doc_ingest::Config;

/// Object store over a map. Listing skips the artifact prefix like the
/// local store does.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    /// Keys returned by listing that have no object behind them
    vanished: Mutex<BTreeSet<String>>,
}

impl MemoryObjectStore {
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let store = Self::default();
        for (key, body) in files {
            store.insert(key, body.as_bytes());
        }
        store
    }

    pub fn insert(&self, key: &str, body: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), body.to_vec());
    }

    pub fn read(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn remove(&self, key: &str) {
        self.objects.lock().unwrap().remove(key);
    }

    /// Lists `key` without storing it, like an object deleted mid-run.
    pub fn list_vanished(&self, key: &str) {
        self.vanished.lock().unwrap().insert(key.to_string());
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.trim_matches('/');
        let artifacts = format!("{DEFAULT_ARTIFACT_PREFIX}/");
        let mut keys: BTreeSet<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.extend(self.vanished.lock().unwrap().iter().cloned());
        Ok(keys
            .into_iter()
            .filter(|key| !key.starts_with(&artifacts))
            .filter(|key| prefix.is_empty() || key.starts_with(&format!("{prefix}/")))
            .collect())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        self.read(key)
            .ok_or_else(|| anyhow!("object {key} does not exist"))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read(key).is_some())
    }

    async fn put_object(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.insert(key, bytes);
        Ok(())
    }
}

/// Returns the object body as text. Bodies starting with `PANIC` panic and
/// bodies starting with `CORRUPT` fail; `.png` files count as OCR.
pub struct FakeExtractor;

#[async_trait]
impl TextExtractor for FakeExtractor {
    async fn extract(&self, filename: &str, bytes: &[u8], _: &Path) -> Result<ExtractedText> {
        if bytes.starts_with(b"PANIC") {
            panic!("extractor blew up on {filename}");
        }
        if bytes.starts_with(b"CORRUPT") {
            return Err(anyhow!("{filename} is not a valid document"));
        }
        Ok(ExtractedText {
            text: String::from_utf8_lossy(bytes).into_owned(),
            ocr_applied: filename.ends_with(".png"),
        })
    }
}

/// Reference rows keyed by `(dataset, identifier)`.
#[derive(Default)]
pub struct MapReferenceStore {
    rows: HashMap<(ReferenceDataset, String), ReferenceFields>,
}

impl MapReferenceStore {
    pub fn with(mut self, dataset: ReferenceDataset, identifier: &str, fields: Value) -> Self {
        let Value::Object(fields) = fields else {
            panic!("reference fields must be an object");
        };
        self.rows.insert((dataset, identifier.to_string()), fields);
        self
    }
}

#[async_trait]
impl ReferenceStore for MapReferenceStore {
    async fn lookup(
        &self,
        dataset: ReferenceDataset,
        identifier: &str,
    ) -> Result<Option<ReferenceFields>> {
        Ok(self.rows.get(&(dataset, identifier.to_string())).cloned())
    }
}

/// Index that records publications and finalizations.
///
/// Documents whose filename is in `always_transient` fail every attempt with
/// a transient error; those in `flaky` fail transiently `flaky_failures`
/// times before succeeding.
#[derive(Default)]
pub struct RecordingIndex {
    pub published: Mutex<Vec<IndexDocument>>,
    pub finalized: Mutex<Vec<String>>,
    always_transient: HashSet<String>,
    flaky: HashSet<String>,
    flaky_failures: usize,
    attempts: Mutex<HashMap<String, usize>>,
}

impl RecordingIndex {
    pub fn failing_for(filename: &str) -> Self {
        Self {
            always_transient: HashSet::from([filename.to_string()]),
            ..Default::default()
        }
    }

    pub fn flaky_for(filename: &str, failures: usize) -> Self {
        Self {
            flaky: HashSet::from([filename.to_string()]),
            flaky_failures: failures,
            ..Default::default()
        }
    }

    pub fn attempts_for(&self, filename: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .get(filename)
            .copied()
            .unwrap_or(0)
    }

    pub fn published_sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .published
            .lock()
            .unwrap()
            .iter()
            .map(|doc| doc.source_path.clone())
            .collect();
        names.sort();
        names
    }

    pub fn publish_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    pub fn finalized_prefixes(&self) -> Vec<String> {
        self.finalized.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchIndex for RecordingIndex {
    async fn publish(&self, document: &IndexDocument) -> Result<()> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(document.filename.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if self.always_transient.contains(&document.filename)
            || (self.flaky.contains(&document.filename) && attempt <= self.flaky_failures)
        {
            return Err(TransientError(format!("index busy for {}", document.filename)).into());
        }
        self.published.lock().unwrap().push(document.clone());
        Ok(())
    }

    async fn finalize(&self, prefix: &str) -> Result<()> {
        self.finalized.lock().unwrap().push(prefix.to_string());
        Ok(())
    }
}

/// Reference store that is busy on every lookup.
#[derive(Default)]
pub struct UnavailableReferenceStore {
    pub lookups: AtomicUsize,
}

#[async_trait]
impl ReferenceStore for UnavailableReferenceStore {
    async fn lookup(&self, dataset: ReferenceDataset, _: &str) -> Result<Option<ReferenceFields>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Err(TransientError(format!("{} store is busy", dataset.as_str())).into())
    }
}

/// Counts reference lookups so tests can assert enrichment ran.
#[derive(Default)]
pub struct CountingReferenceStore {
    pub lookups: AtomicUsize,
}

#[async_trait]
impl ReferenceStore for CountingReferenceStore {
    async fn lookup(&self, _: ReferenceDataset, _: &str) -> Result<Option<ReferenceFields>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

pub fn backends(
    store: Arc<MemoryObjectStore>,
    reference: Arc<dyn ReferenceStore>,
    index: Arc<RecordingIndex>,
) -> Backends {
    Backends {
        object_store: store,
        extractor: Arc::new(FakeExtractor),
        reference,
        index,
    }
}

/// Configuration rooted in `dir` with fast retries.
pub fn test_config(dir: &TempDir, prefixes: &[&str]) -> Config {
    Config {
        storage_root: dir.path().join("store"),
        prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        db_path: dir.path().join("ledger.db"),
        index_dir: dir.path().join("index"),
        scratch_dir: dir.path().join("scratch"),
        processes: 2,
        threads_per_process: 4,
        chunk_size: 3,
        pool_min_connections: 1,
        pool_max_connections: 3,
        stage_retry_delay: Duration::from_millis(1),
        ..Default::default()
    }
}

/// Ledger on a fresh pool over the run's database.
pub fn open_ledger(config: &Config) -> AuditLedger {
    let pool = BoundedConnectionPool::new(PoolSettings::new(&config.db_path).with_bounds(1, 2));
    AuditLedger::new(Arc::new(pool))
}

pub fn supplementary(fields: &[(&str, &str)]) -> Value {
    let map: serde_json::Map<String, Value> = fields
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect();
    Value::Object(map)
}
