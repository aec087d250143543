//! HTTP client initialization.

use std::sync::Arc;
use std::time::Duration;

use reqwest::ClientBuilder;

/// Initializes the client used by the HTTP search index.
///
/// One client is shared by every worker so connections to the index are
/// pooled across the whole run.
///
/// # Errors
///
/// Returns a `reqwest::Error` if client creation fails.
pub fn init_client(timeout_seconds: u64) -> Result<Arc<reqwest::Client>, reqwest::Error> {
    let client = ClientBuilder::new()
        .timeout(Duration::from_secs(timeout_seconds))
        .user_agent(concat!("doc_ingest/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(Arc::new(client))
}
