//! The structured graph produced by an analysis run.
//!
//! Field names and the node `type` vocabulary are a stable wire contract
//! consumed by downstream rendering and export tooling. Renaming a field or
//! adding a node type here is a breaking change.

use crate::error::PageError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a step within one [`DiagramGraph`].
///
/// Ordinary nodes get sequential numeric ids in document order. The unique
/// start and end shapes of a diagram use the literal markers `"start"` and
/// `"end"` (`"start_2"`, `"end_2"`, … when a diagram has several).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepId {
    Num(i64),
    Marker(String),
}

impl StepId {
    /// Marker id for the n-th start node (1-indexed).
    pub fn start(n: usize) -> Self {
        if n <= 1 {
            StepId::Marker("start".into())
        } else {
            StepId::Marker(format!("start_{n}"))
        }
    }

    /// Marker id for the n-th end node (1-indexed).
    pub fn end(n: usize) -> Self {
        if n <= 1 {
            StepId::Marker("end".into())
        } else {
            StepId::Marker(format!("end_{n}"))
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepId::Num(n) => write!(f, "{n}"),
            StepId::Marker(m) => f.write_str(m),
        }
    }
}

impl From<i64> for StepId {
    fn from(n: i64) -> Self {
        StepId::Num(n)
    }
}

impl From<&str> for StepId {
    fn from(s: &str) -> Self {
        StepId::Marker(s.to_string())
    }
}

/// Canonical node type vocabulary.
///
/// Tool-specific vocabularies (draw.io styles, bpmn-js element classes) are
/// mapped onto this set by the structural extractors; anything unrecognised
/// becomes [`NodeType::Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Start,
    End,
    #[default]
    Task,
    Decision,
    Subprocess,
}

impl NodeType {
    /// Parse a node type from model output, defaulting to `Task` for
    /// unknown vocabulary rather than rejecting the whole step.
    pub fn from_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => NodeType::Start,
            "end" => NodeType::End,
            "decision" | "gateway" | "choice" => NodeType::Decision,
            "subprocess" | "sub_process" | "container" => NodeType::Subprocess,
            _ => NodeType::Task,
        }
    }
}

/// An outgoing transition of a [`Step`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextStep {
    pub to: StepId,
    #[serde(default)]
    pub label: String,
}

impl NextStep {
    pub fn new(to: impl Into<StepId>, label: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            label: label.into(),
        }
    }
}

/// A single node of the extracted graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Step identifier; `"start"`/`"end"` markers or a numeric id.
    #[serde(rename = "step")]
    pub id: StepId,

    /// Action text of the node. Empty for start/end events.
    #[serde(default)]
    pub action: String,

    /// Node classification.
    #[serde(rename = "type", default)]
    pub node_type: NodeType,

    /// Swimlane / responsible actor, or empty if the diagram has no lanes.
    #[serde(default)]
    pub role: String,

    /// Outgoing transitions, in source order.
    #[serde(default)]
    pub next_steps: Vec<NextStep>,
}

/// The graph extracted from one page of a diagram document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramGraph {
    /// Free-text classification, e.g. "bpmn" or "flowchart".
    pub diagram_type: String,

    /// Short overall description of the process.
    #[serde(default)]
    pub description: String,

    /// Steps in document order.
    pub steps: Vec<Step>,
}

impl DiagramGraph {
    /// Look up a step by id.
    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// True when every `next_steps.to` references an existing step.
    pub fn edges_resolved(&self) -> bool {
        self.steps
            .iter()
            .flat_map(|s| &s.next_steps)
            .all(|n| self.step(&n.to).is_some())
    }
}

// ── Per-page and aggregate results ───────────────────────────────────────

/// Outcome of analysing a single page.
///
/// Exactly one of `graph` / `error` is populated. A failed page is reported
/// in place; it is never dropped from the aggregate and never replaced by a
/// synthetic empty graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageReport {
    /// 0-based page index within the source document.
    pub page_index: usize,

    /// Extracted graph, when the page succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<DiagramGraph>,

    /// Failure detail, when the page failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PageError>,

    /// Number of perception-model calls made for this page
    /// (0 on the structural path).
    pub model_calls: u32,

    /// Retries spent on the model call.
    pub retries: u8,

    /// Wall-clock time spent on this page.
    pub duration_ms: u64,
}

impl PageReport {
    pub fn success(page_index: usize, graph: DiagramGraph) -> Self {
        Self {
            page_index,
            graph: Some(graph),
            error: None,
            model_calls: 0,
            retries: 0,
            duration_ms: 0,
        }
    }

    pub fn failure(page_index: usize, error: PageError) -> Self {
        Self {
            page_index,
            graph: None,
            error: Some(error),
            model_calls: 0,
            retries: 0,
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.graph.is_some()
    }
}

/// Counters and timings for an analysis run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisStats {
    /// Pages in the source document.
    pub total_pages: usize,
    /// Pages that produced a graph.
    pub analyzed_pages: usize,
    /// Pages that ended in a [`PageError`].
    pub failed_pages: usize,
    /// Pages resolved by the deterministic structural extractor.
    pub structural_pages: usize,
    /// Total perception-model calls issued.
    pub model_calls: u64,
    /// End-to-end wall-clock time.
    pub total_duration_ms: u64,
    /// Time spent decoding and rasterising input.
    pub raster_duration_ms: u64,
    /// Time spent waiting on the perception model.
    pub model_duration_ms: u64,
}

/// Result of a full analysis run.
///
/// A sum type with an explicit discriminant rather than an optional `pages`
/// field, so callers can never observe a partially populated shape: a
/// single-page source yields `Single`, a multi-page PDF yields `MultiPage`
/// with one entry per selected page in page order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum AnalysisOutput {
    Single {
        page: PageReport,
        stats: AnalysisStats,
    },
    MultiPage {
        pages: Vec<PageReport>,
        stats: AnalysisStats,
    },
}

impl AnalysisOutput {
    /// All page reports, in page order.
    pub fn pages(&self) -> &[PageReport] {
        match self {
            AnalysisOutput::Single { page, .. } => std::slice::from_ref(page),
            AnalysisOutput::MultiPage { pages, .. } => pages,
        }
    }

    pub fn stats(&self) -> &AnalysisStats {
        match self {
            AnalysisOutput::Single { stats, .. } | AnalysisOutput::MultiPage { stats, .. } => stats,
        }
    }

    /// Successful graphs with their page indices, in page order.
    pub fn graphs(&self) -> impl Iterator<Item = (usize, &DiagramGraph)> {
        self.pages()
            .iter()
            .filter_map(|p| p.graph.as_ref().map(|g| (p.page_index, g)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_id_serialises_untagged() {
        assert_eq!(serde_json::to_string(&StepId::Num(3)).unwrap(), "3");
        assert_eq!(
            serde_json::to_string(&StepId::start(1)).unwrap(),
            "\"start\""
        );
        assert_eq!(
            serde_json::to_string(&StepId::start(2)).unwrap(),
            "\"start_2\""
        );
    }

    #[test]
    fn node_type_wire_vocabulary() {
        for (t, s) in [
            (NodeType::Start, "\"start\""),
            (NodeType::End, "\"end\""),
            (NodeType::Task, "\"task\""),
            (NodeType::Decision, "\"decision\""),
            (NodeType::Subprocess, "\"subprocess\""),
        ] {
            assert_eq!(serde_json::to_string(&t).unwrap(), s);
        }
    }

    #[test]
    fn node_type_loose_parse_defaults_to_task() {
        assert_eq!(NodeType::from_loose("Decision"), NodeType::Decision);
        assert_eq!(NodeType::from_loose("gateway"), NodeType::Decision);
        assert_eq!(NodeType::from_loose("data_store"), NodeType::Task);
        assert_eq!(NodeType::from_loose(""), NodeType::Task);
    }

    #[test]
    fn step_round_trip_uses_step_and_type_keys() {
        let step = Step {
            id: StepId::Num(1),
            action: "Проверить данные".into(),
            node_type: NodeType::Task,
            role: "Оператор".into(),
            next_steps: vec![NextStep::new("end", "да")],
        };
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["step"], 1);
        assert_eq!(json["type"], "task");
        let back: Step = serde_json::from_value(json).unwrap();
        assert_eq!(back, step);
    }

    #[test]
    fn edges_resolved_detects_dangling_reference() {
        let graph = DiagramGraph {
            diagram_type: "flowchart".into(),
            description: String::new(),
            steps: vec![Step {
                id: StepId::start(1),
                action: String::new(),
                node_type: NodeType::Start,
                role: String::new(),
                next_steps: vec![NextStep::new(7, "")],
            }],
        };
        assert!(!graph.edges_resolved());
    }

    #[test]
    fn output_discriminant_is_explicit() {
        let out = AnalysisOutput::Single {
            page: PageReport::success(
                0,
                DiagramGraph {
                    diagram_type: "flowchart".into(),
                    description: "x".into(),
                    steps: vec![],
                },
            ),
            stats: AnalysisStats::default(),
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["scope"], "single");
        assert_eq!(json["page"]["page_index"], 0);
    }
}
