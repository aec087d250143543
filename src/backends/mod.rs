//! External collaborators of the pipeline.
//!
//! Each collaborator sits behind an `async_trait` so the orchestrator can be
//! driven by the production implementations or by in-process fakes:
//! - [`ObjectStore`]: source listing and reads, derived artifact writes
//! - [`TextExtractor`]: text layer extraction with OCR fallback
//! - [`ReferenceStore`]: reference metadata point lookups
//! - [`SearchIndex`]: document publication and finalization

mod extractor;
mod index;
mod object_store;
mod reference;

use std::sync::Arc;

pub use extractor::{non_whitespace_char_count, ExtractedText, PdfToolsExtractor, TextExtractor};
pub use index::{HttpSearchIndex, IndexDocument, JsonlSearchIndex, SearchIndex};
pub use object_store::{LocalObjectStore, ObjectStore};
pub use reference::{
    NoReferenceStore, ReferenceDataset, ReferenceFields, ReferenceStore, SqliteReferenceStore,
};

/// The set of collaborators a run uses. Cheap to clone; shared by all workers.
#[derive(Clone)]
pub struct Backends {
    pub object_store: Arc<dyn ObjectStore>,
    pub extractor: Arc<dyn TextExtractor>,
    pub reference: Arc<dyn ReferenceStore>,
    pub index: Arc<dyn SearchIndex>,
}
