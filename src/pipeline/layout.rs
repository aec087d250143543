//! Object key layout.
//!
//! A key such as `p1/2024/A.pdf` has filename `A.pdf` and base path
//! `p1/2024`. Derived artifacts mirror the source key under the artifact
//! prefix: `{artifact_prefix}/text/p1/2024/A.txt` and
//! `{artifact_prefix}/docs/p1/2024/A.json`.

use sha2::{Digest, Sha256};

use crate::config::SUPPORTED_EXTENSIONS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey {
    key: String,
    filename: String,
    base_path: String,
}

impl ObjectKey {
    pub fn parse(key: &str) -> Self {
        let key = key.trim_start_matches('/').to_string();
        let (base_path, filename) = match key.rsplit_once('/') {
            Some((base, name)) => (base.to_string(), name.to_string()),
            None => (String::new(), key.clone()),
        };
        Self {
            key,
            filename,
            base_path,
        }
    }

    /// Full key, which is also the canonical source path.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Lowercased extension without the dot.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.filename.rsplit_once('.')?;
        (!stem.is_empty() && !ext.is_empty()).then(|| ext.to_ascii_lowercase())
    }

    pub fn is_supported(&self) -> bool {
        self.extension()
            .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
    }

    /// The key with the filename's extension removed.
    fn key_stem(&self) -> &str {
        match self.extension() {
            Some(ext) => &self.key[..self.key.len() - ext.len() - 1],
            None => &self.key,
        }
    }

    pub fn text_artifact_key(&self, artifact_prefix: &str) -> String {
        format!(
            "{}/text/{}.txt",
            artifact_prefix.trim_matches('/'),
            self.key_stem()
        )
    }

    pub fn document_artifact_key(&self, artifact_prefix: &str) -> String {
        format!(
            "{}/docs/{}.json",
            artifact_prefix.trim_matches('/'),
            self.key_stem()
        )
    }

    /// Index document id: hex SHA-256 of the source path.
    pub fn doc_id(&self) -> String {
        format!("{:x}", Sha256::digest(self.key.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_key() {
        let key = ObjectKey::parse("p1/2024/A.pdf");
        assert_eq!(key.filename(), "A.pdf");
        assert_eq!(key.base_path(), "p1/2024");
        assert_eq!(key.key(), "p1/2024/A.pdf");
    }

    #[test]
    fn test_parse_root_key() {
        let key = ObjectKey::parse("/A.pdf");
        assert_eq!(key.filename(), "A.pdf");
        assert_eq!(key.base_path(), "");
    }

    #[test]
    fn test_supported_extensions_are_case_insensitive() {
        assert!(ObjectKey::parse("p1/A.PDF").is_supported());
        assert!(ObjectKey::parse("p1/scan.tiff").is_supported());
        assert!(!ObjectKey::parse("p1/A.docx").is_supported());
        assert!(!ObjectKey::parse("p1/README").is_supported());
        assert!(!ObjectKey::parse("p1/.pdf").is_supported());
    }

    #[test]
    fn test_artifact_keys() {
        let key = ObjectKey::parse("p1/A.b.PDF");
        assert_eq!(key.text_artifact_key("_ingest/"), "_ingest/text/p1/A.b.txt");
        assert_eq!(key.document_artifact_key("_ingest"), "_ingest/docs/p1/A.b.json");
    }

    #[test]
    fn test_doc_id_is_sha256_of_source_path() {
        let key = ObjectKey::parse("p1/A.pdf");
        let id = key.doc_id();
        assert_eq!(id.len(), 64);
        assert_eq!(id, ObjectKey::parse("p1/A.pdf").doc_id());
        assert_ne!(id, ObjectKey::parse("p2/A.pdf").doc_id());
    }
}
