//! Task instructions for the perception model.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing the extraction behaviour (say,
//!    adding a node type) requires editing exactly one place.
//! 2. **Testability** — unit tests can inspect prompts directly without a
//!    live model.
//!
//! Callers can override the default via
//! [`crate::config::AnalysisConfig::system_prompt`]; the constants here are
//! used only when no override is provided.

/// Default instructions for extracting a step graph from a diagram image.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a BPMN/block-diagram analyzer. Given one or more diagram images, describe the algorithm they depict and return structured JSON.

Respond ONLY with JSON using this schema:
{
  "diagram_type": "bpmn|flowchart|other",
  "description": "short overall description",
  "steps": [
    {"step": "start", "action": "", "type": "start", "role": "", "next_steps": [{"to": 1, "label": ""}]},
    {"step": 1, "action": "node text", "type": "task|decision|subprocess", "role": "lane name or empty", "next_steps": [{"to": 2, "label": "edge label or empty"}]},
    {"step": "end", "action": "", "type": "end", "role": "", "next_steps": []}
  ]
}

Rules:
- Use the literal id "start" for the unique start node and "end" for the unique end node; number all other steps 1, 2, 3, ... in flow order.
- Copy node text into "action" exactly as written. Do not translate, paraphrase or abbreviate.
- Every "to" must reference an existing step id.
- Include "role" only when the diagram has swimlanes/pools; otherwise leave it empty.
- When several images are given, they are overlapping crops of ONE diagram in reading order. Produce a single merged graph, not one per image.
- Output nothing but the JSON object. No prose, no code fences."#;

/// Annotation appended when a text hint is available.
///
/// The hint is the text the pipeline already knows to be on the page (exact
/// for SVG input, best-effort OCR otherwise); instructing the model to copy
/// from it verbatim suppresses transcription drift in `action` fields.
pub fn hint_context(hint: &str) -> String {
    format!(
        "\n\nThe following text was extracted from the source file. Treat it as an \
EXACT reference — copy these lines verbatim into \"action\" fields:\n---\n{hint}\n---"
    )
}

/// Assemble the full instruction text for one model call.
pub fn build_instructions(system_prompt: &str, hint: Option<&str>) -> String {
    match hint.filter(|h| !h.trim().is_empty()) {
        Some(h) => format!("{system_prompt}{}", hint_context(h)),
        None => system_prompt.to_string(),
    }
}
