//! Collaborator construction from configuration.

use std::sync::Arc;

use log::{info, warn};

use super::client::init_client;
use crate::backends::{
    Backends, HttpSearchIndex, JsonlSearchIndex, LocalObjectStore, NoReferenceStore,
    PdfToolsExtractor, ReferenceStore, SearchIndex, SqliteReferenceStore,
};
use crate::config::{Config, IndexBackend};
use crate::error_handling::InitializationError;

/// Builds the object store, extractor, reference store and search index.
///
/// `index_suffix` names the fresh index an HTTP backend publishes into.
///
/// # Errors
///
/// Returns an error if the reference database is configured but unusable,
/// the index directory cannot be created, or the HTTP client fails to build.
pub async fn build_backends(
    config: &Config,
    index_suffix: &str,
) -> Result<Backends, InitializationError> {
    let object_store = LocalObjectStore::new(&config.storage_root)
        .excluding(config.artifact_prefix.clone());
    let extractor = PdfToolsExtractor::new(config.ocr_lang.clone(), config.ocr_min_text_chars);

    let reference: Arc<dyn ReferenceStore> = match &config.reference_db {
        Some(path) => {
            let store = SqliteReferenceStore::open(path, config.pool_max_connections)
                .await
                .map_err(|e| InitializationError::BackendError(format!("{e:#}")))?;
            info!("Reference metadata from {}", path.display());
            Arc::new(store)
        }
        None => {
            warn!("No reference database configured, enrichment will match nothing");
            Arc::new(NoReferenceStore)
        }
    };

    let index: Arc<dyn SearchIndex> = match config.index_backend {
        IndexBackend::Http => {
            let base_url = config.index_url.as_deref().ok_or_else(|| {
                InitializationError::BackendError(
                    "the http index backend needs an index URL".into(),
                )
            })?;
            let client = init_client(config.request_timeout_seconds)?;
            let index =
                HttpSearchIndex::new(client, base_url, config.index_alias.clone(), index_suffix);
            info!(
                "Publishing to {base_url} index {} (alias '{}')",
                index.index_name(),
                config.index_alias
            );
            Arc::new(index)
        }
        IndexBackend::Jsonl => {
            let index = JsonlSearchIndex::open(&config.index_dir, config.index_alias.clone())
                .await
                .map_err(|e| InitializationError::BackendError(format!("{e:#}")))?;
            info!("Publishing to {}", index.published_path().display());
            Arc::new(index)
        }
    };

    Ok(Backends {
        object_store: Arc::new(object_store),
        extractor: Arc::new(extractor),
        reference,
        index,
    })
}
