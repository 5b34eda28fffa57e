//! Perception path for one page: tile, encode, call the model, parse.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 responses from model APIs are transient and frequent under
//! concurrent load. Exponential backoff (`retry_backoff_ms` doubling per
//! attempt)
//! avoids thundering-herd: with 500 ms base and 3 retries the wait sequence
//! is 500 ms → 1 s → 2 s, totalling < 4 s of back-off per page. Parse
//! failures are not retried: the model already answered, and re-asking with
//! an identical payload reproduces the same defect more often than not.

use crate::config::AnalysisConfig;
use crate::error::PageError;
use crate::graph::PageReport;
use crate::pipeline::encode::encode_tile;
use crate::pipeline::parse::parse_graph;
use crate::pipeline::raster::PageImage;
use crate::pipeline::tile::tile;
use crate::prompts::{build_instructions, DEFAULT_SYSTEM_PROMPT};
use crate::vision::{VisionModel, VisionRequest};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Analyze a single rasterised page via the perception model.
///
/// All tiles of the page travel in one request, in tile order, so the model
/// sees every crop of the diagram at once and returns exactly one graph.
///
/// Always returns a `PageReport` — never propagates the error upward, so a
/// single bad page doesn't abort the document. Callers check the report to
/// decide how to aggregate.
pub async fn analyze_page(
    provider: &Arc<dyn VisionModel>,
    page: PageImage,
    hint: &str,
    config: &AnalysisConfig,
) -> PageReport {
    let start = Instant::now();
    let page_num = page.index;

    let tiles = tile(&page.image, config);
    debug!("Page {}: {} tile(s)", page_num, tiles.len());

    let mut images = Vec::with_capacity(tiles.len());
    for t in &tiles {
        match encode_tile(&t.image) {
            Ok(encoded) => images.push(encoded),
            Err(e) => {
                let mut report = PageReport::failure(
                    page_num,
                    PageError::Decode {
                        page: page_num,
                        detail: format!("tile encode failed: {e}"),
                    },
                );
                report.duration_ms = start.elapsed().as_millis() as u64;
                return report;
            }
        }
    }

    let system_prompt = config
        .system_prompt
        .as_deref()
        .unwrap_or(DEFAULT_SYSTEM_PROMPT);
    let hint = if config.use_hint { hint } else { "" };
    let request = VisionRequest {
        images,
        instructions: build_instructions(system_prompt, (!hint.is_empty()).then_some(hint)),
        model: config.model.clone(),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };

    let deadline = Duration::from_secs(config.api_timeout_secs);
    let mut last_err: Option<PageError> = None;
    let mut calls = 0u32;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page_num, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        calls += 1;
        match timeout(deadline, provider.describe(&request)).await {
            Ok(Ok(text)) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                let mut report = match parse_graph(page_num, &text) {
                    Ok(graph) => {
                        debug!(
                            "Page {}: graph with {} step(s) in {}ms",
                            page_num,
                            graph.steps.len(),
                            duration_ms
                        );
                        PageReport::success(page_num, graph)
                    }
                    Err(e) => PageReport::failure(page_num, e),
                };
                report.model_calls = calls;
                report.retries = attempt as u8;
                report.duration_ms = duration_ms;
                return report;
            }
            Ok(Err(e)) => {
                warn!("Page {}: attempt {} failed — {}", page_num, attempt + 1, e);
                last_err = Some(PageError::ModelFailed {
                    page: page_num,
                    retries: attempt as u8,
                    detail: e.to_string(),
                });
            }
            Err(_) => {
                warn!(
                    "Page {}: attempt {} timed out after {}s",
                    page_num,
                    attempt + 1,
                    config.api_timeout_secs
                );
                last_err = Some(PageError::Timeout {
                    page: page_num,
                    secs: config.api_timeout_secs,
                });
            }
        }
    }

    let error = last_err.unwrap_or(PageError::ModelFailed {
        page: page_num,
        retries: config.max_retries as u8,
        detail: "no attempt was made".to_string(),
    });
    let mut report = PageReport::failure(page_num, error);
    report.model_calls = calls;
    report.retries = config.max_retries as u8;
    report.duration_ms = start.elapsed().as_millis() as u64;
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::VisionError;
    use async_trait::async_trait;
    use image::DynamicImage;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedModel {
        calls: AtomicU32,
        responses: Vec<Result<String, VisionError>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<Result<String, VisionError>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                responses,
            })
        }
    }

    #[async_trait]
    impl VisionModel for ScriptedModel {
        async fn describe(&self, _req: &VisionRequest) -> Result<String, VisionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            self.responses[n.min(self.responses.len() - 1)].clone()
        }
    }

    fn page() -> PageImage {
        PageImage {
            index: 0,
            image: DynamicImage::new_rgb8(64, 64),
        }
    }

    fn fast_config() -> AnalysisConfig {
        AnalysisConfig::builder()
            .max_retries(1)
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let model = ScriptedModel::new(vec![Ok(
            r#"{"steps": [{"step": 1, "action": "x", "type": "task"}]}"#.to_string(),
        )]);
        let provider: Arc<dyn VisionModel> = model.clone();
        let report = analyze_page(&provider, page(), "", &fast_config()).await;
        assert!(report.is_success());
        assert_eq!(report.model_calls, 1);
        assert_eq!(report.retries, 0);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let model = ScriptedModel::new(vec![
            Err(VisionError::Api {
                status: 429,
                detail: "rate limited".into(),
            }),
            Ok(r#"{"steps": [{"step": 1, "action": "x", "type": "task"}]}"#.to_string()),
        ]);
        let provider: Arc<dyn VisionModel> = model.clone();
        let report = analyze_page(&provider, page(), "", &fast_config()).await;
        assert!(report.is_success());
        assert_eq!(report.model_calls, 2);
        assert_eq!(report.retries, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_report_model_failure() {
        let model = ScriptedModel::new(vec![Err(VisionError::Transport("refused".into()))]);
        let provider: Arc<dyn VisionModel> = model.clone();
        let report = analyze_page(&provider, page(), "", &fast_config()).await;
        assert!(!report.is_success());
        assert_eq!(report.model_calls, 2);
        assert!(matches!(
            report.error,
            Some(PageError::ModelFailed { page: 0, .. })
        ));
    }

    #[tokio::test]
    async fn garbage_response_is_not_retried() {
        let model = ScriptedModel::new(vec![Ok("no json here".to_string())]);
        let provider: Arc<dyn VisionModel> = model.clone();
        let report = analyze_page(&provider, page(), "", &fast_config()).await;
        assert_eq!(report.model_calls, 1);
        assert!(matches!(
            report.error,
            Some(PageError::UnrecoverableFormat { .. })
        ));
    }
}
