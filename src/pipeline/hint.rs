//! Text hints: a best-effort transcript of the legible text on each page.
//!
//! The hint is handed to the perception model verbatim as a known-correct
//! reference (see [`crate::prompts::hint_context`]); it is never parsed into
//! structure. Two sources:
//!
//! * SVG input — the document's text-bearing elements, walked directly in
//!   document order. Exact; no recognition error is possible.
//! * raster / PDF pages — the injected [`TextRecognizer`] capability.
//!   Recognition failure degrades to an empty hint rather than aborting the
//!   pipeline: hints are an aid, not a requirement.

use crate::error::PageError;
use crate::pipeline::detect::{DocumentKind, RawDocument};
use crate::pipeline::raster::PageImage;
use crate::text::{collapse_whitespace, join_broken_words};
use crate::vision::TextRecognizer;
use std::sync::Arc;
use tracing::debug;

/// Extract one hint per page, aligned with `pages` by position.
///
/// Failed pages get an empty hint; there is nothing to transcribe.
pub async fn extract_hints(
    doc: &RawDocument,
    pages: &[Result<PageImage, PageError>],
    recognizer: Option<&Arc<dyn TextRecognizer>>,
) -> Vec<String> {
    if doc.kind == DocumentKind::Svg {
        // Single-page by construction; the hint comes from the markup, not
        // the rendered pixels.
        let hint = svg_text_hint(&doc.bytes);
        return vec![hint; pages.len().max(1)];
    }

    let mut hints = Vec::with_capacity(pages.len());
    for page in pages {
        let hint = match (page, recognizer) {
            (Ok(p), Some(r)) => {
                let text = r.recognize(&p.image).await;
                debug!("Page {}: OCR hint of {} chars", p.index, text.len());
                text
            }
            _ => String::new(),
        };
        hints.push(hint);
    }
    hints
}

/// Concatenate the content of all `<text>` elements in document order.
///
/// tspan-wrapped lines are joined with spaces and severed words repaired;
/// unparseable XML yields an empty hint, never an error.
pub fn svg_text_hint(bytes: &[u8]) -> String {
    let Ok(content) = std::str::from_utf8(bytes) else {
        return String::new();
    };
    let Ok(doc) = roxmltree::Document::parse(content) else {
        return String::new();
    };

    let mut lines = Vec::new();
    for node in doc.descendants() {
        if !node.is_element() || node.tag_name().name() != "text" {
            continue;
        }
        // Element `.text()` aliases the first text child; walk only the
        // text nodes so nothing is collected twice.
        let raw: String = node
            .descendants()
            .filter(|n| n.is_text())
            .filter_map(|n| n.text())
            .collect::<Vec<_>>()
            .join(" ");
        let line = join_broken_words(&collapse_whitespace(&raw));
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines.join("\n")
}
