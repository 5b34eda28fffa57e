//! Input classification: raw bytes → document kind and SVG flavour.
//!
//! Classification is byte-sniffing only; no decoding happens here. The SVG
//! flavour check additionally looks for the metadata signatures that known
//! diagramming tools leave in their exports, because a recognised export can
//! skip the perception model entirely (see [`crate::structural`]).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared kind of a raw input payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// PNG / JPEG / WEBP / GIF bitmap.
    Raster,
    /// PDF document, possibly multi-page.
    Pdf,
    /// SVG document.
    Svg,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocumentKind::Raster => "raster",
            DocumentKind::Pdf => "pdf",
            DocumentKind::Svg => "svg",
        })
    }
}

/// Which tool, if any, produced an SVG input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SvgFlavor {
    /// draw.io / diagrams.net export carrying an mxGraphModel payload.
    DrawIo,
    /// bpmn-js / bpmn.io export with data-element-id annotated groups.
    BpmnJs,
    /// Any other SVG; goes through the perception path.
    Generic,
}

/// An ingested document: opaque bytes plus their detected kind.
///
/// Created once at ingestion and consumed by rasterisation; nothing in the
/// pipeline mutates it.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub kind: DocumentKind,
    pub bytes: Vec<u8>,
}

impl RawDocument {
    /// The SVG flavour, or `None` for non-SVG input.
    pub fn svg_flavor(&self) -> Option<SvgFlavor> {
        (self.kind == DocumentKind::Svg).then(|| detect_svg_flavor(&self.bytes))
    }
}

/// Classify raw bytes into a [`DocumentKind`].
///
/// Returns `None` when the payload matches no supported signature; the
/// caller turns that into `AnalyzeError::UnsupportedFormat`.
pub fn detect_kind(bytes: &[u8]) -> Option<DocumentKind> {
    if bytes.starts_with(b"%PDF") {
        return Some(DocumentKind::Pdf);
    }
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n")
        || bytes.starts_with(&[0xFF, 0xD8, 0xFF])
        || bytes.starts_with(b"GIF87a")
        || bytes.starts_with(b"GIF89a")
        || (bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WEBP"))
    {
        return Some(DocumentKind::Raster);
    }
    if looks_like_svg(bytes) {
        return Some(DocumentKind::Svg);
    }
    None
}

/// SVG has no magic bytes; sniff for an `<svg` tag in the leading bytes,
/// tolerating an XML declaration, comments, and a DOCTYPE before it.
fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(1024)];
    let Ok(text) = std::str::from_utf8(head) else {
        // UTF-8 may be cut mid-codepoint at the 1024 boundary; lossy is fine
        // for a signature check.
        return String::from_utf8_lossy(head).contains("<svg");
    };
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    trimmed.starts_with("<svg") || (trimmed.starts_with("<?xml") && text.contains("<svg"))
}

/// Detect the diagramming tool that produced an SVG, from its metadata
/// signatures. Unrecognised exports are [`SvgFlavor::Generic`].
pub fn detect_svg_flavor(bytes: &[u8]) -> SvgFlavor {
    // bpmn-js stamps its attribution comment right at the top of the file.
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(500)]).to_lowercase();
    if head.contains("bpmn-js") || head.contains("bpmn.io") {
        return SvgFlavor::BpmnJs;
    }

    // draw.io embeds its model (or a reference to it) within the first ~2 KB.
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(2000)]).to_lowercase();
    if head.contains("mxgraphmodel")
        || head.contains("mxfile")
        || head.contains("draw.io")
        || head.contains("diagrams.net")
    {
        return SvgFlavor::DrawIo;
    }

    SvgFlavor::Generic
}
