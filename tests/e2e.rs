//! End-to-end integration tests for diag2graph.
//!
//! Everything here runs offline: inputs are synthetic fixtures built in the
//! test itself, and the perception model is a deterministic scripted double
//! injected through `AnalysisConfig::provider`. No network, no API keys.
//!
//! The multi-page PDF test additionally needs a loadable pdfium library; it
//! prints SKIP and returns when none is found, so CI without pdfium still
//! passes.
//!
//! Run with:
//!   cargo test --test e2e -- --nocapture

use async_trait::async_trait;
use diag2graph::{
    analyze_bytes, AnalysisConfig, AnalysisOutput, AnalyzeError, NextStep, NodeType, PageError,
    StepId, VisionError, VisionModel, VisionRequest,
};
use pdfium_render::prelude::Pdfium;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

// ── Test helpers ─────────────────────────────────────────────────────────

/// A vision model that replays canned responses in call order and counts
/// every call it receives. Calls past the script replay the last entry.
struct ScriptedModel {
    calls: AtomicU32,
    responses: Vec<String>,
}

impl ScriptedModel {
    fn new<S: Into<String>>(responses: impl IntoIterator<Item = S>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            responses: responses.into_iter().map(Into::into).collect(),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionModel for ScriptedModel {
    async fn describe(&self, _request: &VisionRequest) -> Result<String, VisionError> {
        let i = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        match self.responses.get(i).or_else(|| self.responses.last()) {
            Some(r) => Ok(r.clone()),
            None => Err(VisionError::EmptyResponse),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn config_with(model: &Arc<ScriptedModel>) -> AnalysisConfig {
    AnalysisConfig::builder()
        .provider(model.clone())
        .max_retries(0)
        .retry_backoff_ms(1)
        .concurrency(1)
        .build()
        .unwrap()
}

/// In-memory PNG with a plain grey surface.
fn png_bytes() -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        64,
        64,
        image::Rgb([220, 220, 220]),
    ));
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

/// Minimal valid 3-page PDF, assembled with a correct xref table. The pages
/// are blank; only page count and order matter here.
fn three_page_pdf() -> Vec<u8> {
    let objects = [
        "1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n",
        "2 0 obj\n<< /Type /Pages /Kids [3 0 R 4 0 R 5 0 R] /Count 3 >>\nendobj\n",
        "3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 144 144] >>\nendobj\n",
        "4 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 144 144] >>\nendobj\n",
        "5 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 144 144] >>\nendobj\n",
    ];

    let mut buf: Vec<u8> = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::new();
    for obj in objects {
        offsets.push(buf.len());
        buf.extend_from_slice(obj.as_bytes());
    }
    let xref_pos = buf.len();
    buf.extend_from_slice(b"xref\n0 6\n0000000000 65535 f \n");
    for off in offsets {
        buf.extend_from_slice(format!("{off:010} 00000 n \n").as_bytes());
    }
    buf.extend_from_slice(b"trailer\n<< /Size 6 /Root 1 0 R >>\nstartxref\n");
    buf.extend_from_slice(xref_pos.to_string().as_bytes());
    buf.extend_from_slice(b"\n%%EOF\n");
    buf
}

/// True when pdfium can be bound the same way the rasteriser binds it.
fn pdfium_available() -> bool {
    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .is_ok()
}

// ── Structural path (tool-exported SVG, zero model calls) ────────────────

const DRAWIO_SVG: &str = r#"<svg xmlns="http://www.w3.org/2000/svg">
    <metadata><mxGraphModel><root>
        <mxCell id="0"/>
        <mxCell id="1" parent="0"/>
        <mxCell id="s1" style="ellipse;fillColor=#ffffff" vertex="1" parent="1"/>
        <mxCell id="t1" value="Проверить данные" style="rounded=1" vertex="1" parent="1"/>
        <mxCell id="e1" edge="1" source="s1" target="t1" parent="1"/>
    </root></mxGraphModel></metadata>
</svg>"#;

const BPMN_SVG: &str = r#"<svg xmlns="http://www.w3.org/2000/svg"><!-- created with bpmn-js -->
    <g data-element-id="Event_start" transform="matrix(1 0 0 1 100 100)">
        <circle r="18" style="stroke-width: 1px; fill: white"/>
    </g>
    <g data-element-id="Activity_check" transform="matrix(1 0 0 1 200 90)">
        <rect width="100" height="56"/>
        <text><tspan>Проверить данные</tspan></text>
    </g>
    <g data-element-id="Flow_1"><path d="M136,118L200,118"/></g>
</svg>"#;

#[tokio::test]
async fn drawio_export_never_reaches_the_model() {
    let model = ScriptedModel::new(Vec::<String>::new());
    let config = config_with(&model);

    let out = analyze_bytes(DRAWIO_SVG.as_bytes(), &config)
        .await
        .expect("structural extraction should succeed");

    assert_eq!(model.calls(), 0, "structural path must not call the model");
    assert_eq!(out.stats().model_calls, 0);
    assert_eq!(out.stats().structural_pages, 1);

    let AnalysisOutput::Single { page, .. } = out else {
        panic!("single SVG input must yield a Single output");
    };
    let graph = page.graph.expect("page should carry a graph");
    assert_eq!(graph.steps.len(), 2);

    let start = &graph.steps[0];
    assert_eq!(start.id, StepId::Marker("start".into()));
    assert_eq!(start.node_type, NodeType::Start);
    assert_eq!(start.next_steps, vec![NextStep::new(1, "")]);

    let task = graph.step(&StepId::Num(1)).unwrap();
    assert_eq!(task.action, "Проверить данные");
    assert!(graph.edges_resolved());
}

#[tokio::test]
async fn bpmn_export_never_reaches_the_model() {
    let model = ScriptedModel::new(Vec::<String>::new());
    let config = config_with(&model);

    let out = analyze_bytes(BPMN_SVG.as_bytes(), &config)
        .await
        .expect("structural extraction should succeed");

    assert_eq!(model.calls(), 0);
    let graph = out.pages()[0].graph.as_ref().unwrap();
    assert_eq!(graph.steps.len(), 2);
    assert_eq!(graph.steps[0].node_type, NodeType::Start);
    assert_eq!(graph.steps[1].action, "Проверить данные");
    assert!(graph.edges_resolved());
}

#[tokio::test]
async fn file_entry_point_reads_and_analyses() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("export.drawio.svg");
    std::fs::write(&path, DRAWIO_SVG).unwrap();

    let model = ScriptedModel::new(Vec::<String>::new());
    let out = diag2graph::analyze(&path, &config_with(&model)).await.unwrap();
    assert_eq!(out.pages()[0].graph.as_ref().unwrap().steps.len(), 2);

    let missing = dir.path().join("nope.svg");
    let err = diag2graph::analyze(&missing, &config_with(&model))
        .await
        .expect_err("missing file must be reported");
    assert!(matches!(err, AnalyzeError::FileNotFound { .. }));
}

// ── Perception path (raster input + scripted model) ──────────────────────

/// Typical sloppy model answer: prose wrapper, fenced block, unquoted keys.
const MALFORMED_RESPONSE: &str = r#"Here is the result:
```json
{description: "x", steps: [{step: "start", type: "start", next_steps: [{to: 1, label: ""}]}, {step: 1, action: "Do thing", type: "task", next_steps: []}]}
```"#;

#[tokio::test]
async fn raster_page_recovers_malformed_model_output() {
    let model = ScriptedModel::new([MALFORMED_RESPONSE]);
    let config = config_with(&model);

    let out = analyze_bytes(&png_bytes(), &config)
        .await
        .expect("analysis should succeed");

    assert_eq!(model.calls(), 1);
    assert_eq!(out.stats().model_calls, 1);
    assert_eq!(out.stats().structural_pages, 0);

    let graph = out.pages()[0].graph.as_ref().expect("page should succeed");
    assert_eq!(graph.description, "x");
    assert_eq!(graph.steps.len(), 2);
    assert_eq!(graph.steps[0].id, StepId::Marker("start".into()));
    assert_eq!(graph.steps[0].next_steps, vec![NextStep::new(1, "")]);
    assert_eq!(graph.steps[1].id, StepId::Num(1));
    assert_eq!(graph.steps[1].action, "Do thing");
}

#[tokio::test]
async fn garbage_model_output_fails_the_page_without_retry() {
    let model = ScriptedModel::new(["the diagram shows a process, no JSON here"]);
    let config = config_with(&model);

    let err = analyze_bytes(&png_bytes(), &config)
        .await
        .expect_err("a single all-garbage page should fail the run");

    assert_eq!(model.calls(), 1, "parse failures must not burn retries");
    assert!(matches!(err, AnalyzeError::AllPagesFailed { total: 1, .. }));
}

// ── Multi-page aggregation (needs pdfium) ────────────────────────────────

const PAGE_GRAPH_ONE: &str =
    r#"{"description": "page one", "steps": [{"step": 1, "action": "A", "type": "task", "next_steps": []}]}"#;
const PAGE_GRAPH_THREE: &str =
    r#"{"description": "page three", "steps": [{"step": 1, "action": "C", "type": "task", "next_steps": []}]}"#;

#[tokio::test]
async fn multi_page_failure_is_reported_in_place() {
    if !pdfium_available() {
        println!("SKIP — pdfium library not available");
        return;
    }

    // concurrency=1 keeps model calls in page order, so the scripted double
    // fails exactly page 2
    let model = ScriptedModel::new([PAGE_GRAPH_ONE, "not json at all", PAGE_GRAPH_THREE]);
    let config = config_with(&model);

    let out = analyze_bytes(&three_page_pdf(), &config)
        .await
        .expect("two of three pages succeed");

    let AnalysisOutput::MultiPage { pages, stats } = out else {
        panic!("3-page PDF must yield a MultiPage output");
    };
    assert_eq!(pages.len(), 3, "failed page must not be dropped");
    assert_eq!(
        pages.iter().map(|p| p.page_index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );

    assert_eq!(
        pages[0].graph.as_ref().unwrap().description,
        "page one"
    );
    assert!(matches!(
        pages[1].error,
        Some(PageError::UnrecoverableFormat { page: 1, .. })
    ));
    assert_eq!(
        pages[2].graph.as_ref().unwrap().description,
        "page three"
    );

    assert_eq!(stats.total_pages, 3);
    assert_eq!(stats.analyzed_pages, 2);
    assert_eq!(stats.failed_pages, 1);
    assert_eq!(stats.model_calls, 3);
    assert_eq!(model.calls(), 3);
}

// ── Error surface ────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_payload_is_rejected_up_front() {
    let model = ScriptedModel::new(Vec::<String>::new());
    let config = config_with(&model);

    let err = analyze_bytes(b"plain text, no known signature", &config)
        .await
        .expect_err("unknown magic must be rejected");

    assert!(matches!(err, AnalyzeError::UnsupportedFormat { .. }));
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn missing_provider_is_reported_before_any_model_work() {
    std::env::remove_var("DIAG2GRAPH_API_BASE");
    std::env::remove_var("OPENAI_API_KEY");

    let config = AnalysisConfig::builder().build().unwrap();
    let err = analyze_bytes(&png_bytes(), &config)
        .await
        .expect_err("no provider and no environment must fail");

    assert!(matches!(err, AnalyzeError::ProviderNotConfigured { .. }));
}
