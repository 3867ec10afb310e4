//! Per-page text extraction for uploaded documents.
//!
//! Extraction never fails because of a single bad page: pages whose text cannot be decoded are
//! returned as empty strings. Only documents that cannot be opened at all produce
//! [`ExtractionError::Unreadable`], which keeps "corrupt file" distinguishable from "opened,
//! but zero pages".

use sha2::{Digest, Sha256};
use thiserror::Error;

/// MIME type accepted for uploads.
pub const MIME_PDF: &str = "application/pdf";
const MIME_OCTET_STREAM: &str = "application/octet-stream";

/// Errors produced while opening a document.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The bytes could not be parsed as a document.
    #[error("document could not be opened: {0}")]
    Unreadable(String),
}

/// Capability that turns document bytes into ordered page texts.
pub trait TextExtractor: Send + Sync {
    /// Extract one string per page in page order.
    fn extract(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractionError>;
}

/// PDF extractor backed by `lopdf`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
        let document = lopdf::Document::load_mem(bytes)
            .map_err(|error| ExtractionError::Unreadable(error.to_string()))?;

        let pages = document
            .get_pages()
            .into_keys()
            .map(|page_number| match document.extract_text(&[page_number]) {
                Ok(text) => text,
                Err(error) => {
                    tracing::debug!(page = page_number, error = %error, "Page text unavailable");
                    String::new()
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!(pages = pages.len(), "Extracted page texts");
        Ok(pages)
    }
}

/// A single uploaded file as received from the client.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    /// Client-supplied filename.
    pub filename: String,
    /// Declared MIME type, if any.
    pub content_type: Option<String>,
    /// Raw document bytes.
    pub bytes: Vec<u8>,
}

impl UploadedDocument {
    /// Create a document from its parts.
    pub fn new(filename: impl Into<String>, content_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type,
            bytes,
        }
    }

    /// Whether the declared type (or, lacking one, the filename) identifies a PDF.
    pub fn is_pdf(&self) -> bool {
        let declared = self
            .content_type
            .as_deref()
            .map(|value| {
                value
                    .split(';')
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_ascii_lowercase()
            })
            .filter(|value| !value.is_empty());

        match declared.as_deref() {
            Some(MIME_PDF) => true,
            None | Some(MIME_OCTET_STREAM) => {
                self.filename.to_ascii_lowercase().ends_with(".pdf")
            }
            Some(_) => false,
        }
    }

    /// Hex-encoded SHA-256 digest of the document bytes.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_detection_prefers_declared_type() {
        let declared = UploadedDocument::new("notes.bin", Some(MIME_PDF.into()), Vec::new());
        assert!(declared.is_pdf());

        let with_params =
            UploadedDocument::new("x", Some("Application/PDF; charset=binary".into()), Vec::new());
        assert!(with_params.is_pdf());

        let wrong_type = UploadedDocument::new("report.pdf", Some("text/plain".into()), Vec::new());
        assert!(!wrong_type.is_pdf());
    }

    #[test]
    fn pdf_detection_falls_back_to_extension() {
        let untyped = UploadedDocument::new("Report.PDF", None, Vec::new());
        assert!(untyped.is_pdf());

        let octet = UploadedDocument::new("scan.pdf", Some(MIME_OCTET_STREAM.into()), Vec::new());
        assert!(octet.is_pdf());

        let other = UploadedDocument::new("scan.docx", None, Vec::new());
        assert!(!other.is_pdf());
    }

    #[test]
    fn fingerprint_is_sha256_hex() {
        let document = UploadedDocument::new("a.pdf", None, b"abc".to_vec());
        assert_eq!(
            document.fingerprint(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn garbage_bytes_are_unreadable() {
        let error = PdfTextExtractor.extract(b"not a valid pdf").unwrap_err();
        assert!(matches!(error, ExtractionError::Unreadable(_)));
    }
}
