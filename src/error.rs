//! Error types for the diag2graph library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`AnalyzeError`] — **Fatal**: the analysis cannot proceed at all
//!   (unreadable input, no vision provider configured). Returned as
//!   `Err(AnalyzeError)` from the top-level `analyze*` functions.
//!
//! * [`PageError`] — **Non-fatal**: a single page failed (decode glitch,
//!   model call exhausted its retries, unparseable model output) but other
//!   pages are fine. Stored inside [`crate::graph::PageReport`] so callers
//!   can inspect partial success rather than losing a multi-page document
//!   to one bad page.
//!
//! Note what is *not* here: the structural extractor declining an SVG is not
//! an error at all — it returns `None` and the pipeline silently falls back
//! to the perception path.

use crate::pipeline::detect::DocumentKind;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the diag2graph library.
///
/// Page-level failures use [`PageError`] and are stored in
/// [`crate::graph::PageReport`] rather than propagated here.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The payload matched none of the supported formats.
    #[error("Unsupported input format (first bytes: {magic:02x?})\nSupported: PNG, JPEG, WEBP, GIF, PDF, SVG.")]
    UnsupportedFormat { magic: Vec<u8> },

    /// The payload was classified but could not be decoded.
    #[error("Failed to decode {kind} input: {detail}")]
    Decode { kind: DocumentKind, detail: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF requires a password but none was provided.
    #[error("PDF is encrypted and requires a password.")]
    PasswordRequired,

    /// A password was provided but it is wrong.
    #[error("Wrong password for encrypted PDF.")]
    WrongPassword,

    // ── Provider errors ───────────────────────────────────────────────────
    /// No vision model is configured and none could be detected from the
    /// environment.
    #[error("Vision model provider is not configured.\n{hint}")]
    ProviderNotConfigured { hint: String },

    /// Every page failed; there is no output to return.
    #[error("All {total} pages failed.\nFirst error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// Stored inside [`crate::graph::PageReport`] when a page fails. The overall
/// analysis continues unless ALL pages fail.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageError {
    /// Page rasterisation or decode failed.
    #[error("Page {page}: decode failed: {detail}")]
    Decode { page: usize, detail: String },

    /// Perception-model call failed after retries.
    #[error("Page {page}: model call failed after {retries} retries: {detail}")]
    ModelFailed {
        page: usize,
        retries: u8,
        detail: String,
    },

    /// Perception-model call timed out.
    #[error("Page {page}: model call timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },

    /// Model output contained no balanced JSON payload and the repair
    /// rules could not recover one. `snippet` carries the offending text
    /// (truncated) so the defect can be reproduced in a test.
    #[error("Page {page}: unrecoverable model output format: {snippet:?}")]
    UnrecoverableFormat { page: usize, snippet: String },

    /// Model output parsed as JSON but lacked the minimum graph shape.
    #[error("Page {page}: schema mismatch: {detail}")]
    SchemaMismatch { page: usize, detail: String },
}

impl PageError {
    /// 0-based page index the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::Decode { page, .. }
            | PageError::ModelFailed { page, .. }
            | PageError::Timeout { page, .. }
            | PageError::UnrecoverableFormat { page, .. }
            | PageError::SchemaMismatch { page, .. } => *page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_pages_failed_display() {
        let e = AnalyzeError::AllPagesFailed {
            total: 3,
            first_error: "model call timed out".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("All 3 pages"), "got: {msg}");
        assert!(msg.contains("timed out"));
    }

    #[test]
    fn unrecoverable_format_keeps_snippet() {
        let e = PageError::UnrecoverableFormat {
            page: 1,
            snippet: "no json here".into(),
        };
        assert!(e.to_string().contains("no json here"));
        assert_eq!(e.page(), 1);
    }

    #[test]
    fn page_error_serialises_with_kind_tag() {
        let e = PageError::SchemaMismatch {
            page: 2,
            detail: "steps missing".into(),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "schema_mismatch");
        assert_eq!(json["page"], 2);
    }
}
