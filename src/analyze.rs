//! Analysis entry points: document bytes in, structured graph(s) out.
//!
//! Routing: recognized tool-exported SVGs take the deterministic structural
//! path and never touch the perception model; everything else is rasterised,
//! tiled, and described by the model page by page. Pages are analysed
//! concurrently and reassembled in page order, so one failing page never
//! blocks or hides the others.

use crate::config::AnalysisConfig;
use crate::error::AnalyzeError;
use crate::graph::{AnalysisOutput, AnalysisStats, PageReport};
use crate::pipeline::{detect, hint, infer, raster};
use crate::structural;
use crate::vision::{OpenAiCompatibleVision, VisionModel};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Analyze a diagram file on disk.
///
/// This is the primary entry point for the library.
///
/// # Errors
/// Returns `Err(AnalyzeError)` only for document-level failures: unreadable
/// file, unsupported format, corrupt payload, missing provider, or every
/// page failing. Per-page failures are reported inside the output.
pub async fn analyze(
    path: impl AsRef<Path>,
    config: &AnalysisConfig,
) -> Result<AnalysisOutput, AnalyzeError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AnalyzeError::FileNotFound {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => AnalyzeError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => AnalyzeError::Internal(format!("read {}: {e}", path.display())),
    })?;
    analyze_bytes(&bytes, config).await
}

/// Analyze an in-memory diagram payload.
pub async fn analyze_bytes(
    bytes: &[u8],
    config: &AnalysisConfig,
) -> Result<AnalysisOutput, AnalyzeError> {
    let total_start = Instant::now();

    let kind = detect::detect_kind(bytes).ok_or_else(|| AnalyzeError::UnsupportedFormat {
        magic: bytes.iter().copied().take(8).collect(),
    })?;
    info!("Input classified as {kind} ({} bytes)", bytes.len());
    let doc = detect::RawDocument {
        kind,
        bytes: bytes.to_vec(),
    };

    // Structural path first: a recognized tool export yields its graph
    // without a single model call.
    if let Some(graph) = structural::extract(&doc) {
        let stats = AnalysisStats {
            total_pages: 1,
            analyzed_pages: 1,
            structural_pages: 1,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
            ..AnalysisStats::default()
        };
        return Ok(AnalysisOutput::Single {
            page: PageReport::success(0, graph),
            stats,
        });
    }

    let provider = resolve_provider(config)?;

    let raster_start = Instant::now();
    let pages = raster::rasterize(&doc, config).await?;
    let raster_duration_ms = raster_start.elapsed().as_millis() as u64;
    let total_pages = pages.len();
    info!("Rasterised {total_pages} page(s) in {raster_duration_ms}ms");

    let hints = hint::extract_hints(&doc, &pages, config.recognizer.as_ref()).await;

    let model_start = Instant::now();
    let mut reports: Vec<PageReport> = stream::iter(pages.into_iter().zip(hints).map(
        |(page, page_hint)| {
            let provider = Arc::clone(&provider);
            async move {
                match page {
                    Ok(p) => infer::analyze_page(&provider, p, &page_hint, config).await,
                    Err(e) => PageReport::failure(e.page(), e),
                }
            }
        },
    ))
    .buffer_unordered(config.concurrency)
    .collect()
    .await;
    let model_duration_ms = model_start.elapsed().as_millis() as u64;

    // Completion order varies with provider latency; output order must not.
    reports.sort_by_key(|r| r.page_index);
    debug!(
        "{} of {} page(s) succeeded",
        reports.iter().filter(|r| r.is_success()).count(),
        total_pages
    );

    let analyzed = reports.iter().filter(|r| r.is_success()).count();
    if analyzed == 0 {
        let first_error = reports
            .iter()
            .find_map(|r| r.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no pages produced".to_string());
        return Err(AnalyzeError::AllPagesFailed {
            total: total_pages,
            first_error,
        });
    }

    let stats = AnalysisStats {
        total_pages,
        analyzed_pages: analyzed,
        failed_pages: total_pages - analyzed,
        structural_pages: 0,
        model_calls: reports.iter().map(|r| u64::from(r.model_calls)).sum(),
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        raster_duration_ms,
        model_duration_ms,
    };

    if reports.len() == 1 {
        let page = reports.into_iter().next().ok_or_else(|| {
            AnalyzeError::Internal("page report vanished during aggregation".to_string())
        })?;
        Ok(AnalysisOutput::Single { page, stats })
    } else {
        Ok(AnalysisOutput::MultiPage {
            pages: reports,
            stats,
        })
    }
}

/// Synchronous wrapper around [`analyze`].
///
/// Creates a temporary tokio runtime internally.
pub fn analyze_sync(
    path: impl AsRef<Path>,
    config: &AnalysisConfig,
) -> Result<AnalysisOutput, AnalyzeError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| AnalyzeError::Internal(format!("failed to create tokio runtime: {e}")))?
        .block_on(analyze(path, config))
}

/// Resolve the perception provider, most-specific first: a caller-supplied
/// provider wins, then the environment-configured OpenAI-compatible one.
fn resolve_provider(config: &AnalysisConfig) -> Result<Arc<dyn VisionModel>, AnalyzeError> {
    if let Some(provider) = &config.provider {
        return Ok(Arc::clone(provider));
    }
    match OpenAiCompatibleVision::from_env() {
        Some(provider) => Ok(Arc::new(provider)),
        None => Err(AnalyzeError::ProviderNotConfigured {
            hint: "set DIAG2GRAPH_API_BASE (any OpenAI-compatible endpoint) or \
                   OPENAI_API_KEY, or supply AnalysisConfig::provider"
                .to_string(),
        }),
    }
}
