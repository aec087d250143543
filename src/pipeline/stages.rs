//! Stage implementations for the two processing paths.

use anyhow::anyhow;
use chrono::Utc;
use log::debug;
use serde_json::{Map, Value};
use strum::IntoEnumIterator;

use super::{FileOutcome, ObjectKey, PipelineContext, StageFailure};
use crate::backends::{IndexDocument, ReferenceDataset};
use crate::error_handling::{FailureReason, InfoType};
use crate::policy::LedgerState;
use crate::storage::{SuccessUpdate, SuccessWrite};

/// Result of the enrichment stage.
#[derive(Debug, Default)]
struct Enrichment {
    metadata: Map<String, Value>,
    supplementary_a: bool,
    supplementary_b: bool,
    third_party: bool,
}

impl Enrichment {
    fn supplementary_file_missing(&self) -> bool {
        !self.supplementary_a && !self.supplementary_b
    }

    fn apply_flags(&self, update: &mut SuccessUpdate) {
        update.is_supplementary_data_a = Some(self.supplementary_a);
        update.is_supplementary_data_b = Some(self.supplementary_b);
        update.is_third_party_enriched = Some(self.third_party);
        update.supplementary_file_missing = Some(self.supplementary_file_missing());
    }
}

pub(super) fn duplicate(object: &ObjectKey, state: &LedgerState) -> StageFailure {
    let existing = match state {
        LedgerState::SucceededElsewhere { base_path } => base_path.as_str(),
        _ => "another base path",
    };
    StageFailure::new(
        FailureReason::Duplicate,
        anyhow!("{} already processed under '{existing}'", object.filename()),
    )
}

/// Extraction, enrichment, publication and ledger write.
pub(super) async fn full_process(
    ctx: &PipelineContext,
    object: &ObjectKey,
) -> Result<FileOutcome, StageFailure> {
    let store = &ctx.backends.object_store;
    let filename = object.filename();

    let present = ctx
        .call_with_retry("Source lookup", filename, || store.exists(object.key()))
        .await
        .map_err(|e| StageFailure::new(FailureReason::SourceUnavailable, e))?;
    if !present {
        return Err(StageFailure::new(
            FailureReason::SourceUnavailable,
            anyhow!("source object {} no longer exists", object.key()),
        ));
    }

    let bytes = ctx
        .call_with_retry("Source read", filename, || store.get_object(object.key()))
        .await
        .map_err(|e| StageFailure::new(FailureReason::SourceUnavailable, e))?;

    let extracted = ctx
        .backends
        .extractor
        .extract(filename, &bytes, &ctx.scratch_dir)
        .await
        .map_err(|e| StageFailure::new(FailureReason::SourceUnavailable, e))?;
    drop(bytes);
    if extracted.ocr_applied {
        ctx.stats.increment_info(InfoType::OcrApplied);
    }

    let text_key = object.text_artifact_key(&ctx.artifact_prefix);
    ctx.call_with_retry("Text artifact write", filename, || {
        store.put_object(&text_key, extracted.text.as_bytes())
    })
    .await
    .map_err(|e| StageFailure::new(FailureReason::ArtifactWriteFailed, e))?;

    let enrichment = enrich(ctx, object).await?;
    let doc_key = publish(ctx, object, &extracted.text, extracted.ocr_applied, &enrichment).await?;

    let mut update = SuccessUpdate::new(filename, object.key(), object.base_path());
    update.extracted_text_path = Some(text_key);
    update.published_doc_path = Some(doc_key);
    update.is_ocr_applied = Some(extracted.ocr_applied);
    update.is_indexed = Some(true);
    enrichment.apply_flags(&mut update);

    write_success(ctx, &update).await
}

/// Re-enrichment and republication from the previously extracted text.
///
/// Extraction flags and the text path are left as stored.
pub(super) async fn metadata_only(
    ctx: &PipelineContext,
    object: &ObjectKey,
) -> Result<FileOutcome, StageFailure> {
    let filename = object.filename();
    let record = ctx
        .ledger
        .fetch_success(filename)
        .await
        .map_err(|e| StageFailure::new(FailureReason::LedgerUnavailable, e))?
        .ok_or_else(|| {
            StageFailure::new(
                FailureReason::LedgerUnavailable,
                anyhow!("success record for {filename} disappeared"),
            )
        })?;

    let text_key = record.extracted_text_path.as_deref().ok_or_else(|| {
        StageFailure::new(
            FailureReason::SupplementaryDataMissing,
            anyhow!("no extracted text recorded for {filename}"),
        )
    })?;
    let bytes = ctx
        .call_with_retry("Extracted text read", filename, || {
            ctx.backends.object_store.get_object(text_key)
        })
        .await
        .map_err(|e| StageFailure::new(FailureReason::SupplementaryDataMissing, e))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| StageFailure::new(FailureReason::SupplementaryDataMissing, e))?;

    let enrichment = enrich(ctx, object).await?;
    let doc_key = publish(ctx, object, &text, record.is_ocr_applied, &enrichment).await?;

    let mut update = SuccessUpdate::new(filename, object.key(), object.base_path());
    update.published_doc_path = Some(doc_key);
    update.is_indexed = Some(true);
    enrichment.apply_flags(&mut update);

    let outcome = write_success(ctx, &update).await?;
    ctx.stats.increment_info(InfoType::MetadataOnlyReindex);
    Ok(outcome)
}

/// Looks the file up in every reference dataset.
///
/// Supplementary fields merge into the top level of the metadata (first
/// dataset wins on key clashes); third-party fields go under `third_party`.
async fn enrich(ctx: &PipelineContext, object: &ObjectKey) -> Result<Enrichment, StageFailure> {
    let filename = object.filename();
    let mut enrichment = Enrichment::default();

    for dataset in ReferenceDataset::iter() {
        let Some(identifier) = dataset.identifier_for(filename) else {
            continue;
        };
        let found = ctx
            .call_with_retry("Reference lookup", filename, || {
                ctx.backends.reference.lookup(dataset, &identifier)
            })
            .await
            .map_err(|e| {
                StageFailure::new(
                    FailureReason::EnrichmentFailed,
                    e.context(format!("{} lookup for '{identifier}'", dataset.as_str())),
                )
            })?;
        let Some(fields) = found else {
            continue;
        };

        match dataset {
            ReferenceDataset::SupplementaryA => enrichment.supplementary_a = true,
            ReferenceDataset::SupplementaryB => enrichment.supplementary_b = true,
            ReferenceDataset::ThirdParty => enrichment.third_party = true,
        }
        if dataset == ReferenceDataset::ThirdParty {
            enrichment
                .metadata
                .insert(dataset.as_str().to_string(), Value::Object(fields));
        } else {
            for (field, value) in fields {
                enrichment.metadata.entry(field).or_insert(value);
            }
        }
    }

    if enrichment.supplementary_file_missing() {
        debug!("No supplementary metadata for {filename}");
        ctx.stats.increment_info(InfoType::SupplementaryFileMissing);
    }
    Ok(enrichment)
}

/// Writes the document artifact and publishes it. Returns the artifact key.
async fn publish(
    ctx: &PipelineContext,
    object: &ObjectKey,
    text: &str,
    ocr_applied: bool,
    enrichment: &Enrichment,
) -> Result<String, StageFailure> {
    let filename = object.filename();
    let document = IndexDocument {
        doc_id: object.doc_id(),
        filename: filename.to_string(),
        source_path: object.key().to_string(),
        base_path: object.base_path().to_string(),
        text: text.to_string(),
        metadata: enrichment.metadata.clone(),
        ocr_applied,
        ingested_at: Utc::now().to_rfc3339(),
    };

    let doc_key = object.document_artifact_key(&ctx.artifact_prefix);
    let body = serde_json::to_vec_pretty(&document)
        .map_err(|e| StageFailure::new(FailureReason::IndexPublishFailed, e))?;
    ctx.call_with_retry("Document artifact write", filename, || {
        ctx.backends.object_store.put_object(&doc_key, &body)
    })
    .await
    .map_err(|e| StageFailure::new(FailureReason::ArtifactWriteFailed, e))?;

    ctx.call_with_retry("Index publish", filename, || {
        ctx.backends.index.publish(&document)
    })
    .await
    .map_err(|e| StageFailure::new(FailureReason::IndexPublishFailed, e))?;

    Ok(doc_key)
}

async fn write_success(
    ctx: &PipelineContext,
    update: &SuccessUpdate,
) -> Result<FileOutcome, StageFailure> {
    match ctx.ledger.record_success(update).await {
        Ok(SuccessWrite::Merged) => Ok(FileOutcome::Processed),
        // Another worker recorded the same filename under a different base path first
        Ok(SuccessWrite::BasePathConflict { existing_base_path }) => Err(StageFailure::new(
            FailureReason::Duplicate,
            anyhow!(
                "{} already processed under '{existing_base_path}'",
                update.filename
            ),
        )),
        Err(e) => Err(StageFailure::new(FailureReason::LedgerUnavailable, e)),
    }
}
