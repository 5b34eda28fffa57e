//! Pipeline stages for diagram-to-graph extraction.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. switch rendering backend) without touching
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! detect ──▶ raster ──▶ tile ──▶ hint ──▶ encode ──▶ infer ──▶ parse
//! (magic)   (pixels)   (crops)  (OCR)    (base64)   (model)   (graph)
//! ```
//!
//! 1. [`detect`] — sniff the payload's format and SVG flavor from its bytes
//! 2. [`raster`] — decode/render pages to pixels; runs in `spawn_blocking`
//!    because pdfium and resvg are not async-safe
//! 3. [`tile`]   — split oversized or panoramic pages into overlapping crops
//! 4. [`hint`]   — best-effort page transcript (SVG markup walk or OCR)
//! 5. [`encode`] — PNG-encode and base64-wrap each tile for the multimodal
//!    API request body
//! 6. [`infer`]  — drive the model call with retry/backoff; the only stage
//!    with network I/O
//! 7. [`parse`]  — tolerant recovery of the graph JSON from raw model text
//!
//! Recognized tool-exported SVGs bypass stages 2–7 entirely; see
//! [`crate::structural`].

pub mod detect;
pub mod encode;
pub mod hint;
pub mod infer;
pub mod parse;
pub mod raster;
pub mod tile;
