//! # diag2graph
//!
//! Convert diagram images — flowcharts, BPMN process maps, draw.io exports —
//! into structured step graphs using Vision Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! OCR on a diagram gives you a bag of words; what you usually need is the
//! process itself: which step follows which, where the decisions branch, and
//! who owns each lane. This crate rasterises the diagram and lets a VLM read
//! it as a human would, returning a typed graph of steps and transitions.
//! When the input is an SVG exported by a known diagramming tool, the graph
//! is recovered directly from the tool's embedded metadata — deterministic,
//! instant, and without a single model call.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PNG / JPEG / PDF / SVG
//!  │
//!  ├─ 1. Detect   sniff format and SVG flavour from the bytes
//!  ├─ 2. Extract  draw.io / bpmn-js SVG? walk the XML; done, zero model calls
//!  ├─ 3. Raster   decode / render pages (pdfium, resvg; spawn_blocking)
//!  ├─ 4. Tile     split panoramic or oversized pages into overlapping crops
//!  ├─ 5. Hint     best-effort page transcript (OCR or SVG text), sent verbatim
//!  ├─ 6. Infer    concurrent VLM calls, all tiles of a page per request
//!  └─ 7. Parse    tolerant JSON recovery → per-page DiagramGraph + stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use diag2graph::{analyze, AnalysisConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider configured from DIAG2GRAPH_API_BASE / OPENAI_API_KEY
//!     let config = AnalysisConfig::default();
//!     let output = analyze("process.svg", &config).await?;
//!     for (page, graph) in output.graphs() {
//!         println!("page {page}: {} steps ({})", graph.steps.len(), graph.diagram_type);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `diag2graph` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! diag2graph = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod prompts;
pub mod structural;
pub mod text;
pub mod vision;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{analyze, analyze_bytes, analyze_sync};
pub use config::{AnalysisConfig, AnalysisConfigBuilder};
pub use error::{AnalyzeError, PageError};
pub use graph::{
    AnalysisOutput, AnalysisStats, DiagramGraph, NextStep, NodeType, PageReport, Step, StepId,
};
pub use pipeline::detect::{detect_kind, DocumentKind, RawDocument, SvgFlavor};
pub use vision::{OpenAiCompatibleVision, TextRecognizer, VisionError, VisionModel, VisionRequest};
