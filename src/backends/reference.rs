//! Reference metadata lookups.
//!
//! Reference datasets are keyed by identifiers derived from the source
//! filename. A missing row is a normal outcome, never an error.

use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use strum_macros::EnumIter;

use crate::config::SQLITE_BUSY_TIMEOUT;

/// Matched fields from one dataset.
pub type ReferenceFields = Map<String, Value>;

/// Reference datasets consulted during enrichment, in lookup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum ReferenceDataset {
    SupplementaryA,
    SupplementaryB,
    /// Third-party contract metadata, keyed by the leading filename token
    ThirdParty,
}

impl ReferenceDataset {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceDataset::SupplementaryA => "supplementary_a",
            ReferenceDataset::SupplementaryB => "supplementary_b",
            ReferenceDataset::ThirdParty => "third_party",
        }
    }

    /// Identifier used to look `filename` up in this dataset.
    ///
    /// Supplementary datasets use the file stem; the third-party dataset uses
    /// the stem up to the first `_`.
    pub fn identifier_for(&self, filename: &str) -> Option<String> {
        let stem = Path::new(filename).file_stem()?.to_str()?.trim();
        if stem.is_empty() {
            return None;
        }
        let identifier = match self {
            ReferenceDataset::SupplementaryA | ReferenceDataset::SupplementaryB => stem,
            ReferenceDataset::ThirdParty => stem.split('_').next().unwrap_or(stem),
        };
        (!identifier.is_empty()).then(|| identifier.to_string())
    }
}

#[async_trait]
pub trait ReferenceStore: Send + Sync {
    /// Zero or one matching row.
    async fn lookup(
        &self,
        dataset: ReferenceDataset,
        identifier: &str,
    ) -> Result<Option<ReferenceFields>>;
}

/// Used when no reference database is configured: nothing ever matches.
pub struct NoReferenceStore;

#[async_trait]
impl ReferenceStore for NoReferenceStore {
    async fn lookup(&self, _: ReferenceDataset, _: &str) -> Result<Option<ReferenceFields>> {
        Ok(None)
    }
}

/// Reads `reference_records(dataset, identifier, payload)` from a SQLite file.
///
/// `payload` holds a JSON object with the fields to merge.
pub struct SqliteReferenceStore {
    pool: SqlitePool,
}

impl SqliteReferenceStore {
    /// Opens the database read-only. Fails if the file or table is missing.
    pub async fn open(path: &Path, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .busy_timeout(SQLITE_BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open reference database {}", path.display()))?;

        sqlx::query("SELECT dataset, identifier, payload FROM reference_records LIMIT 0")
            .execute(&pool)
            .await
            .context("reference database has no usable reference_records table")?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl ReferenceStore for SqliteReferenceStore {
    async fn lookup(
        &self,
        dataset: ReferenceDataset,
        identifier: &str,
    ) -> Result<Option<ReferenceFields>> {
        let payload: Option<String> = sqlx::query_scalar(
            "SELECT payload FROM reference_records WHERE dataset = ? AND identifier = ? LIMIT 1",
        )
        .bind(dataset.as_str())
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        let Some(payload) = payload else {
            return Ok(None);
        };
        match serde_json::from_str::<Value>(&payload)
            .with_context(|| format!("malformed {} payload for '{identifier}'", dataset.as_str()))?
        {
            Value::Object(fields) => Ok(Some(fields)),
            other => bail!(
                "{} payload for '{identifier}' is not an object: {other}",
                dataset.as_str()
            ),
        }
    }
}
