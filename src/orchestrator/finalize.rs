//! Prefix finalization.

use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::backends::SearchIndex;
use crate::error_handling::is_transient_error;
use crate::utils::{retry_call, RetryPolicy};

/// Makes the prefix's documents visible in the index and removes its
/// scratch directory.
///
/// An index that cannot be finalized fails the run: every file was recorded
/// as indexed, so silently leaving the alias on the old index would hide
/// them. A scratch directory that cannot be removed only warns.
pub(super) async fn finalize_prefix(
    index: &dyn SearchIndex,
    prefix: &str,
    scratch_dir: &Path,
    retry: RetryPolicy,
) -> Result<()> {
    let retried = retry_call(retry, || index.finalize(prefix), is_transient_error).await;
    retried
        .result
        .with_context(|| format!("Failed to finalize the search index for '{prefix}'"))?;
    info!("[{prefix}] index finalized");

    remove_scratch_dir(scratch_dir).await;
    Ok(())
}

async fn remove_scratch_dir(scratch_dir: &Path) {
    match tokio::fs::remove_dir_all(scratch_dir).await {
        Ok(()) => debug!("Removed scratch directory {}", scratch_dir.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(
            "Could not remove scratch directory {}: {e}",
            scratch_dir.display()
        ),
    }
}
