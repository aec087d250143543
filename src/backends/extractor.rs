//! Text extraction with an OCR fallback.
//!
//! PDFs go through `pdftotext` first. When the text layer is too thin to be
//! useful the pages are rasterized with `pdftoppm` and read with `tesseract`.
//! Images go straight to `tesseract`; plain text is passed through.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use tokio::process::Command;

use crate::config::{DEFAULT_OCR_LANG, DEFAULT_OCR_MIN_TEXT_CHARS};
use crate::utils::sanitize::safe_path_component;

/// Text produced for one source object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    /// `true` when OCR produced the text rather than an embedded text layer
    pub ocr_applied: bool,
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extracts text from `bytes`. `filename` selects the method by extension;
    /// intermediates go under `scratch_dir`.
    async fn extract(&self, filename: &str, bytes: &[u8], scratch_dir: &Path)
        -> Result<ExtractedText>;
}

/// Extractor driving the poppler and tesseract command line tools.
pub struct PdfToolsExtractor {
    ocr_lang: String,
    min_text_chars: usize,
    sequence: AtomicU64,
}

impl Default for PdfToolsExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_OCR_LANG, DEFAULT_OCR_MIN_TEXT_CHARS)
    }
}

impl PdfToolsExtractor {
    pub fn new(ocr_lang: impl Into<String>, min_text_chars: usize) -> Self {
        Self {
            ocr_lang: ocr_lang.into(),
            min_text_chars,
            sequence: AtomicU64::new(0),
        }
    }

    /// Unique stem for scratch files of one extraction.
    fn scratch_stem(&self, filename: &str, scratch_dir: &Path) -> PathBuf {
        let stem = Path::new(filename)
            .file_stem()
            .and_then(|value| value.to_str())
            .unwrap_or("doc");
        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        scratch_dir.join(format!(
            "{}_{}_{}_{}",
            safe_path_component(stem),
            std::process::id(),
            stamp,
            seq
        ))
    }

    async fn extract_pdf(&self, pdf_path: &Path, stem: &Path) -> Result<ExtractedText> {
        let text = pdftotext(pdf_path).await?;
        if non_whitespace_char_count(&text) >= self.min_text_chars {
            return Ok(ExtractedText {
                text,
                ocr_applied: false,
            });
        }

        debug!(
            "Text layer of {} below {} chars, running OCR",
            pdf_path.display(),
            self.min_text_chars
        );
        let pages = pdftoppm(pdf_path, stem).await?;
        let mut texts = Vec::with_capacity(pages.len());
        for page in &pages {
            let result = tesseract(page, &self.ocr_lang).await;
            let _ = tokio::fs::remove_file(page).await;
            texts.push(result?);
        }
        Ok(ExtractedText {
            text: texts.join("\n\n"),
            ocr_applied: true,
        })
    }
}

#[async_trait]
impl TextExtractor for PdfToolsExtractor {
    async fn extract(
        &self,
        filename: &str,
        bytes: &[u8],
        scratch_dir: &Path,
    ) -> Result<ExtractedText> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if extension == "txt" {
            let text = String::from_utf8(bytes.to_vec())
                .with_context(|| format!("{filename} is not valid UTF-8"))?;
            return Ok(ExtractedText {
                text,
                ocr_applied: false,
            });
        }

        tokio::fs::create_dir_all(scratch_dir)
            .await
            .with_context(|| format!("failed to create {}", scratch_dir.display()))?;
        let stem = self.scratch_stem(filename, scratch_dir);
        let mut input = stem.clone().into_os_string();
        input.push(format!(".{extension}"));
        let input = PathBuf::from(input);
        tokio::fs::write(&input, bytes)
            .await
            .with_context(|| format!("failed to stage {filename} for extraction"))?;

        let result = if extension == "pdf" {
            self.extract_pdf(&input, &stem).await
        } else {
            tesseract(&input, &self.ocr_lang)
                .await
                .map(|text| ExtractedText {
                    text,
                    ocr_applied: true,
                })
        };

        let _ = tokio::fs::remove_file(&input).await;
        result
    }
}

pub fn non_whitespace_char_count(text: &str) -> usize {
    text.chars()
        .filter(|character| !character.is_whitespace())
        .count()
}

async fn pdftotext(pdf_path: &Path) -> Result<String> {
    let output = Command::new("pdftotext")
        .arg("-enc")
        .arg("UTF-8")
        .arg(pdf_path)
        .arg("-")
        .output()
        .await
        .with_context(|| format!("failed to execute pdftotext for {}", pdf_path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "pdftotext returned non-zero exit status for {}: {}",
            pdf_path.display(),
            stderr.trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).replace('\u{0000}', ""))
}

/// Rasterizes every page to `{stem}-N.png` and returns the images in page order.
async fn pdftoppm(pdf_path: &Path, stem: &Path) -> Result<Vec<PathBuf>> {
    let output = Command::new("pdftoppm")
        .arg("-r")
        .arg("300")
        .arg("-png")
        .arg(pdf_path)
        .arg(stem)
        .output()
        .await
        .with_context(|| format!("failed to execute pdftoppm for {}", pdf_path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "pdftoppm returned non-zero exit status for {}: {}",
            pdf_path.display(),
            stderr.trim()
        );
    }

    let (Some(dir), Some(prefix)) = (stem.parent(), stem.file_name().and_then(|n| n.to_str()))
    else {
        bail!("invalid scratch path {}", stem.display());
    };
    let page_prefix = format!("{prefix}-");

    let mut pages: Vec<(u32, PathBuf)> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let page_number = name
            .strip_prefix(&page_prefix)
            .and_then(|rest| rest.strip_suffix(".png"))
            .and_then(|number| number.parse::<u32>().ok());
        if let Some(page_number) = page_number {
            pages.push((page_number, entry.path()));
        }
    }

    if pages.is_empty() {
        bail!("pdftoppm produced no pages for {}", pdf_path.display());
    }
    pages.sort_by_key(|(number, _)| *number);
    Ok(pages.into_iter().map(|(_, path)| path).collect())
}

async fn tesseract(image_path: &Path, ocr_lang: &str) -> Result<String> {
    let output = Command::new("tesseract")
        .arg(image_path)
        .arg("stdout")
        .arg("-l")
        .arg(ocr_lang)
        .output()
        .await
        .with_context(|| format!("failed to execute tesseract for {}", image_path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "tesseract returned non-zero exit status for {}: {}",
            image_path.display(),
            stderr.trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .replace('\u{0000}', "")
        .trim()
        .to_string())
}
