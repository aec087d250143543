//! End-to-end runs over in-memory collaborators.
//!
//! Every test drives `run_with_backends` against a real SQLite ledger in a
//! temp directory and inspects the ledger, the fake index and the store.

mod helpers;

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use doc_ingest::backends::ReferenceDataset;
use doc_ingest::error_handling::FailureReason;
use doc_ingest::policy::LedgerState;
use doc_ingest::{query_run_history, run_with_backends, JobType};
use helpers::{
    backends, open_ledger, supplementary, test_config, MapReferenceStore, MemoryObjectStore,
    RecordingIndex,
};

fn scenario_store() -> Arc<MemoryObjectStore> {
    Arc::new(MemoryObjectStore::with_files(&[
        ("p1/A.pdf", "alpha text"),
        ("p1/B.pdf", "bravo text"),
        ("p2/A.pdf", "alpha copy"),
    ]))
}

fn scenario_reference() -> Arc<MapReferenceStore> {
    Arc::new(
        MapReferenceStore::default()
            .with(
                ReferenceDataset::SupplementaryA,
                "A",
                supplementary(&[("title", "Alpha")]),
            )
            .with(ReferenceDataset::ThirdParty, "A", json!({"vendor": "acme"})),
    )
}

#[tokio::test]
async fn test_same_filename_in_two_prefixes_is_a_duplicate() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, &["p1", "p2"]);
    let store = scenario_store();
    let index = Arc::new(RecordingIndex::default());

    let report = run_with_backends(
        config.clone(),
        backends(Arc::clone(&store), scenario_reference(), Arc::clone(&index)),
    )
    .await
    .unwrap();

    assert_eq!(report.total_files, 3);
    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.prefixes.len(), 2);
    assert_eq!(report.prefixes[0].processed, 2);
    assert_eq!(report.prefixes[1].failed, 1);

    let ledger = open_ledger(&config);
    assert_eq!(ledger.lookup("A.pdf").await.unwrap().as_deref(), Some("p1"));
    assert_eq!(ledger.lookup("B.pdf").await.unwrap().as_deref(), Some("p1"));
    let duplicate = ledger.fetch_failure("A.pdf", "p2").await.unwrap().unwrap();
    assert_eq!(duplicate.reason, FailureReason::Duplicate.as_str());
    assert!(duplicate.error_message.unwrap().contains("p1"));
    assert!(ledger.fetch_failure("A.pdf", "p1").await.unwrap().is_none());
    assert_eq!(
        ledger.state("A.pdf", "p2").await.unwrap(),
        LedgerState::Failed
    );

    assert_eq!(index.published_sources(), vec!["p1/A.pdf", "p1/B.pdf"]);
    assert_eq!(index.finalized_prefixes(), vec!["p1", "p2"]);
}

#[tokio::test]
async fn test_success_records_carry_stage_flags_and_artifacts() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, &["p1"]);
    let store = scenario_store();
    let index = Arc::new(RecordingIndex::default());

    run_with_backends(
        config.clone(),
        backends(Arc::clone(&store), scenario_reference(), Arc::clone(&index)),
    )
    .await
    .unwrap();

    let ledger = open_ledger(&config);
    let a = ledger.fetch_success("A.pdf").await.unwrap().unwrap();
    assert_eq!(a.source_path, "p1/A.pdf");
    assert!(a.is_indexed);
    assert!(a.is_supplementary_data_a);
    assert!(!a.is_supplementary_data_b);
    assert!(a.is_third_party_enriched);
    assert!(!a.supplementary_file_missing);
    assert!(!a.is_ocr_applied);
    let text_key = a.extracted_text_path.unwrap();
    assert_eq!(text_key, "_ingest/text/p1/A.txt");
    assert_eq!(store.read(&text_key).unwrap(), b"alpha text");
    let doc_key = a.published_doc_path.unwrap();
    assert!(store.read(&doc_key).is_some());

    let b = ledger.fetch_success("B.pdf").await.unwrap().unwrap();
    assert!(b.supplementary_file_missing);
    assert!(!b.is_supplementary_data_a);

    let published = index.published.lock().unwrap().clone();
    let doc = published.iter().find(|d| d.filename == "A.pdf").unwrap();
    assert_eq!(doc.metadata["title"], "Alpha");
    assert_eq!(doc.metadata["third_party"]["vendor"], "acme");
    assert_eq!(doc.text, "alpha text");
    assert_eq!(doc.doc_id.len(), 64);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, &["p1", "p2"]);
    let store = scenario_store();
    let index = Arc::new(RecordingIndex::default());

    run_with_backends(
        config.clone(),
        backends(Arc::clone(&store), scenario_reference(), Arc::clone(&index)),
    )
    .await
    .unwrap();
    let ledger = open_ledger(&config);
    let first_a = ledger.fetch_success("A.pdf").await.unwrap().unwrap();
    let first_b = ledger.fetch_success("B.pdf").await.unwrap().unwrap();

    // A rewrite during the second run would move last_modified_ms
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let second = run_with_backends(
        config.clone(),
        backends(Arc::clone(&store), scenario_reference(), Arc::clone(&index)),
    )
    .await
    .unwrap();

    assert_eq!(
        ledger.fetch_success("A.pdf").await.unwrap().unwrap(),
        first_a
    );
    assert_eq!(
        ledger.fetch_success("B.pdf").await.unwrap().unwrap(),
        first_b
    );
    assert_eq!(second.processed, 0);
    assert_eq!(second.failed, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(index.publish_count(), 2);

    let failures = ledger.list_failures_by_base_path("").await.unwrap();
    assert_eq!(failures.len(), 1);

    let history = query_run_history(ledger.pool(), None).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].counters.skipped_files, 3);
    assert_eq!(history[1].counters.processed_files, 2);
}

#[tokio::test]
async fn test_unsupported_and_corrupt_files_are_recorded_once() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, &["p1"]);
    let store = Arc::new(MemoryObjectStore::with_files(&[
        ("p1/notes.docx", "not a scan"),
        ("p1/bad.pdf", "CORRUPT bytes"),
        ("p1/good.pdf", "fine"),
    ]));
    let index = Arc::new(RecordingIndex::default());
    let reference = Arc::new(MapReferenceStore::default());

    let report = run_with_backends(
        config.clone(),
        backends(Arc::clone(&store), reference.clone(), Arc::clone(&index)),
    )
    .await
    .unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 2);

    let ledger = open_ledger(&config);
    let docx = ledger.fetch_failure("notes.docx", "p1").await.unwrap().unwrap();
    assert_eq!(docx.reason, FailureReason::UnsupportedFileType.as_str());
    let bad = ledger.fetch_failure("bad.pdf", "p1").await.unwrap().unwrap();
    assert_eq!(bad.reason, FailureReason::SourceUnavailable.as_str());
    assert!(bad.error_message.unwrap().contains("not a valid document"));

    // Known failures are not retried automatically
    let again = run_with_backends(
        config.clone(),
        backends(Arc::clone(&store), reference, Arc::clone(&index)),
    )
    .await
    .unwrap();
    assert_eq!(again.failed, 0);
    assert_eq!(again.skipped, 3);
}

#[tokio::test]
async fn test_update_metadata_reenriches_known_files_and_processes_new_ones() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, &["p1"]);
    let store = Arc::new(MemoryObjectStore::with_files(&[
        ("p1/A.pdf", "alpha text"),
        ("p1/B.pdf", "bravo text"),
    ]));
    let index = Arc::new(RecordingIndex::default());

    run_with_backends(
        config.clone(),
        backends(Arc::clone(&store), scenario_reference(), Arc::clone(&index)),
    )
    .await
    .unwrap();
    let ledger = open_ledger(&config);
    let b_before = ledger.fetch_success("B.pdf").await.unwrap().unwrap();
    assert!(b_before.supplementary_file_missing);

    // B now has reference data and a new file appears
    store.insert("p1/C.pdf", b"charlie text");
    let reference = Arc::new(
        MapReferenceStore::default()
            .with(
                ReferenceDataset::SupplementaryA,
                "A",
                supplementary(&[("title", "Alpha")]),
            )
            .with(
                ReferenceDataset::SupplementaryB,
                "B",
                supplementary(&[("title", "Bravo")]),
            ),
    );
    let mut update = config.clone();
    update.job_type = JobType::UpdateMetadata;
    let report = run_with_backends(
        update,
        backends(Arc::clone(&store), reference, Arc::clone(&index)),
    )
    .await
    .unwrap();

    assert_eq!(report.processed, 3);
    assert_eq!(report.skipped, 0);
    assert_eq!(index.publish_count(), 5);

    let b_after = ledger.fetch_success("B.pdf").await.unwrap().unwrap();
    assert!(b_after.is_supplementary_data_b);
    assert!(!b_after.supplementary_file_missing);
    // Extraction results are left as they were
    assert_eq!(b_after.extracted_text_path, b_before.extracted_text_path);
    assert_eq!(b_after.is_ocr_applied, b_before.is_ocr_applied);

    let a_after = ledger.fetch_success("A.pdf").await.unwrap().unwrap();
    // Third-party data vanished from the reference store, so the flag clears
    assert!(!a_after.is_third_party_enriched);
    assert!(a_after.is_supplementary_data_a);

    let published = index.published.lock().unwrap().clone();
    let republished_b = published
        .iter()
        .rev()
        .find(|d| d.filename == "B.pdf")
        .unwrap();
    assert_eq!(republished_b.text, "bravo text");
    assert_eq!(republished_b.metadata["title"], "Bravo");
    assert!(ledger.fetch_success("C.pdf").await.unwrap().is_some());
}

#[tokio::test]
async fn test_update_metadata_skip_new_leaves_new_files_alone() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, &["p1"]);
    let store = Arc::new(MemoryObjectStore::with_files(&[("p1/A.pdf", "alpha text")]));
    let index = Arc::new(RecordingIndex::default());
    let reference = Arc::new(MapReferenceStore::default());

    run_with_backends(
        config.clone(),
        backends(Arc::clone(&store), reference.clone(), Arc::clone(&index)),
    )
    .await
    .unwrap();

    store.insert("p1/C.pdf", b"charlie text");
    let mut update = config.clone();
    update.job_type = JobType::UpdateMetadataSkipNew;
    let report = run_with_backends(
        update,
        backends(Arc::clone(&store), reference, Arc::clone(&index)),
    )
    .await
    .unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.skipped, 1);
    let ledger = open_ledger(&config);
    assert_eq!(ledger.lookup("C.pdf").await.unwrap(), None);
    assert!(ledger.fetch_failure("C.pdf", "p1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_metadata_only_without_stored_text_fails() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, &["p1"]);
    let store = Arc::new(MemoryObjectStore::with_files(&[("p1/A.pdf", "alpha text")]));
    let index = Arc::new(RecordingIndex::default());
    let reference = Arc::new(MapReferenceStore::default());

    run_with_backends(
        config.clone(),
        backends(Arc::clone(&store), reference.clone(), Arc::clone(&index)),
    )
    .await
    .unwrap();
    store.remove("_ingest/text/p1/A.txt");

    let mut update = config.clone();
    update.job_type = JobType::UpdateMetadata;
    let report = run_with_backends(
        update,
        backends(Arc::clone(&store), reference, Arc::clone(&index)),
    )
    .await
    .unwrap();

    assert_eq!(report.failed, 1);
    let ledger = open_ledger(&config);
    let failure = ledger.fetch_failure("A.pdf", "p1").await.unwrap().unwrap();
    assert_eq!(failure.reason, FailureReason::SupplementaryDataMissing.as_str());
    // The earlier success stays; the ledger never deletes
    assert!(ledger.fetch_success("A.pdf").await.unwrap().is_some());
}

#[tokio::test]
async fn test_reprocess_redoes_files_under_the_same_path() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, &["p1"]);
    let store = Arc::new(MemoryObjectStore::with_files(&[("p1/A.pdf", "first scan")]));
    let index = Arc::new(RecordingIndex::default());
    let reference = Arc::new(MapReferenceStore::default());

    run_with_backends(
        config.clone(),
        backends(Arc::clone(&store), reference.clone(), Arc::clone(&index)),
    )
    .await
    .unwrap();

    store.insert("p1/A.pdf", b"second scan");
    let mut reprocess = config.clone();
    reprocess.job_type = JobType::Reprocess;
    let report = run_with_backends(
        reprocess,
        backends(Arc::clone(&store), reference, Arc::clone(&index)),
    )
    .await
    .unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(store.read("_ingest/text/p1/A.txt").unwrap(), b"second scan");
    let published = index.published.lock().unwrap().clone();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].doc_id, published[1].doc_id);
}

#[tokio::test]
async fn test_nested_directories_belong_to_their_prefix() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, &["p1"]);
    let store = Arc::new(MemoryObjectStore::with_files(&[
        ("p1/Y.pdf", "top"),
        ("p1/sub/X.pdf", "nested"),
        ("p10/Z.pdf", "other prefix"),
    ]));
    let index = Arc::new(RecordingIndex::default());
    let reference = Arc::new(MapReferenceStore::default());

    let first = run_with_backends(
        config.clone(),
        backends(Arc::clone(&store), reference.clone(), Arc::clone(&index)),
    )
    .await
    .unwrap();
    assert_eq!(first.total_files, 2);
    assert_eq!(first.processed, 2);

    let ledger = open_ledger(&config);
    assert_eq!(
        ledger.lookup("X.pdf").await.unwrap().as_deref(),
        Some("p1/sub")
    );

    let second = run_with_backends(
        config.clone(),
        backends(Arc::clone(&store), reference, Arc::clone(&index)),
    )
    .await
    .unwrap();
    assert_eq!(second.skipped, 2);
    assert_eq!(index.publish_count(), 2);
}

#[tokio::test]
async fn test_empty_prefix_still_finalizes() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, &["empty"]);
    let store = Arc::new(MemoryObjectStore::default());
    let index = Arc::new(RecordingIndex::default());

    let report = run_with_backends(
        config,
        backends(store, Arc::new(MapReferenceStore::default()), Arc::clone(&index)),
    )
    .await
    .unwrap();

    assert_eq!(report.total_files, 0);
    assert_eq!(index.finalized_prefixes(), vec!["empty"]);
}

#[tokio::test]
async fn test_source_deleted_after_listing_is_reported_missing() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, &["p1"]);
    let store = Arc::new(MemoryObjectStore::with_files(&[("p1/A.pdf", "alpha")]));
    store.list_vanished("p1/gone.pdf");
    let index = Arc::new(RecordingIndex::default());

    let report = run_with_backends(
        config.clone(),
        backends(store, Arc::new(MapReferenceStore::default()), Arc::clone(&index)),
    )
    .await
    .unwrap();

    assert_eq!(report.total_files, 2);
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 1);

    let ledger = open_ledger(&config);
    let failure = ledger.fetch_failure("gone.pdf", "p1").await.unwrap().unwrap();
    assert_eq!(failure.reason, FailureReason::SourceUnavailable.as_str());
    assert!(failure.error_message.unwrap().contains("no longer exists"));
}
