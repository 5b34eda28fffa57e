//! Tolerant parsing of raw model text into a [`DiagramGraph`].
//!
//! Vision models wrap their JSON in prose, code fences, or both, and the
//! payload itself often carries small syntactic defects: unquoted object
//! keys, invalid escape sequences, trailing commas. This module locates the
//! JSON span, applies a fixed sequence of narrow textual repairs, and then
//! validates the parsed value against the graph shape.
//!
//! Each repair is a pure `&str -> String` rule with its own regex; they are
//! applied cumulatively in a documented order and every intermediate
//! candidate is attempted, so a payload that was already valid is never
//! touched. Repairs rewrite syntax only, never content.
//!
//! Failure is always explicit: text with no brace-delimited span (or one
//! that no repair can salvage) is [`PageError::UnrecoverableFormat`], and
//! parseable JSON of the wrong shape is [`PageError::SchemaMismatch`]. An
//! empty or dangling graph is never passed off as success.

use crate::error::PageError;
use crate::graph::{DiagramGraph, NextStep, NodeType, Step, StepId};
use crate::text::collapse_whitespace;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// Parse raw model output for one page into a validated graph.
pub fn parse_graph(page: usize, raw: &str) -> Result<DiagramGraph, PageError> {
    let span = match locate_json_span(raw) {
        Some(s) => s,
        None => {
            return Err(PageError::UnrecoverableFormat {
                page,
                snippet: snippet_of(raw),
            })
        }
    };

    let payload = match parse_with_repairs(span) {
        Some(v) => v,
        None => {
            debug!("Page {page}: no repair candidate yielded valid JSON");
            return Err(PageError::UnrecoverableFormat {
                page,
                snippet: snippet_of(span),
            });
        }
    };

    value_to_graph(page, payload, raw)
}

// ── Span location ────────────────────────────────────────────────────────────

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```(?:json)?\s*(\{.*?\})\s*```").unwrap());

/// The brace-delimited span the payload lives in, fenced block preferred.
fn locate_json_span(text: &str) -> Option<&str> {
    let text = match RE_FENCED.captures(text) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(text),
        None => text,
    };
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

// ── Repair rules ─────────────────────────────────────────────────────────────

/// Try the raw span, then cumulatively repaired versions of it.
///
/// Rules (applied in order):
/// 1. Escape bare backslashes that do not start a valid JSON escape
/// 2. Quote bare object keys (`{step: 1}` → `{ "step": 1}`)
/// 3. Drop trailing commas before a closing bracket
fn parse_with_repairs(span: &str) -> Option<Value> {
    let mut candidate = span.to_string();
    if let Ok(v) = serde_json::from_str(&candidate) {
        return Some(v);
    }
    for rule in [fix_invalid_escapes, quote_bare_keys, strip_trailing_commas] {
        candidate = rule(&candidate);
        if let Ok(v) = serde_json::from_str(&candidate) {
            return Some(v);
        }
    }
    None
}

static RE_ESCAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\(.)").unwrap());

/// `\G` is not a JSON escape; double the backslash so it survives parsing.
/// Left-to-right matching keeps already-valid `\\G` untouched.
fn fix_invalid_escapes(input: &str) -> String {
    RE_ESCAPE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let c = &caps[1];
            if matches!(c, "\"" | "\\" | "/" | "b" | "f" | "n" | "r" | "t" | "u") {
                caps[0].to_string()
            } else {
                format!("\\\\{c}")
            }
        })
        .into_owned()
}

static RE_BARE_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"([{,\[])\s*(\w+)\s*:").unwrap());

fn quote_bare_keys(input: &str) -> String {
    RE_BARE_KEY.replace_all(input, "$1 \"$2\":").into_owned()
}

static RE_TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*([}\]])").unwrap());

fn strip_trailing_commas(input: &str) -> String {
    RE_TRAILING_COMMA.replace_all(input, "$1").into_owned()
}

// ── Shape validation ─────────────────────────────────────────────────────────

fn value_to_graph(page: usize, payload: Value, raw: &str) -> Result<DiagramGraph, PageError> {
    // Models sometimes nest the whole payload as a string inside
    // "description"; unwrap one level when it plausibly holds the real JSON.
    let payload = match payload.get("description").and_then(Value::as_str) {
        Some(inner) if inner.contains("steps") && inner.contains('{') => {
            match locate_json_span(inner).and_then(parse_with_repairs) {
                Some(v) => v,
                None => payload,
            }
        }
        _ => payload,
    };

    let diagram_type = str_field(&payload, "diagram_type")
        .or_else(|| str_field(&payload, "type"))
        .unwrap_or_else(|| "unknown".to_string());
    let description = str_field(&payload, "description").unwrap_or_else(|| raw.trim().to_string());

    let raw_steps = match payload.get("steps").and_then(Value::as_array) {
        Some(arr) if !arr.is_empty() => arr,
        _ => {
            return Err(PageError::SchemaMismatch {
                page,
                detail: "payload has no non-empty steps array".to_string(),
            })
        }
    };

    let mut steps = Vec::with_capacity(raw_steps.len());
    for (idx, item) in raw_steps.iter().enumerate() {
        steps.push(value_to_step(page, idx, item)?);
    }

    // A multi-step graph with no edges at all is almost always a model that
    // forgot next_steps on a linear flow; chain the steps in listed order.
    if steps.len() > 1 && steps.iter().all(|s| s.next_steps.is_empty()) {
        let targets: Vec<StepId> = steps.iter().skip(1).map(|s| s.id.clone()).collect();
        for (step, to) in steps.iter_mut().zip(targets) {
            step.next_steps = vec![NextStep {
                to,
                label: String::new(),
            }];
        }
    }

    let graph = DiagramGraph {
        diagram_type,
        description,
        steps,
    };

    // Every edge target must name a step that exists on this page.
    for step in &graph.steps {
        for next in &step.next_steps {
            if graph.step(&next.to).is_none() {
                return Err(PageError::SchemaMismatch {
                    page,
                    detail: format!("edge from {} targets unknown step {}", step.id, next.to),
                });
            }
        }
    }

    Ok(graph)
}

fn value_to_step(page: usize, idx: usize, item: &Value) -> Result<Step, PageError> {
    let Some(obj) = item.as_object() else {
        // A bare string in the steps array is the step's text.
        return Ok(Step {
            id: StepId::Num(idx as i64 + 1),
            action: collapse_whitespace(&scalar_text(item)),
            node_type: NodeType::Task,
            role: String::new(),
            next_steps: Vec::new(),
        });
    };

    if !obj.contains_key("type") && !obj.contains_key("action") && !obj.contains_key("text") {
        return Err(PageError::SchemaMismatch {
            page,
            detail: format!("step {} carries neither type nor action", idx + 1),
        });
    }

    let id = obj
        .get("id")
        .or_else(|| obj.get("step"))
        .and_then(value_to_id)
        .unwrap_or(StepId::Num(idx as i64 + 1));
    let action = str_field(item, "action")
        .or_else(|| str_field(item, "text"))
        .map(|s| collapse_whitespace(&s))
        .unwrap_or_default();
    let node_type = obj
        .get("type")
        .and_then(Value::as_str)
        .map(NodeType::from_loose)
        .unwrap_or_default();
    let role = str_field(item, "role").unwrap_or_default();

    let mut next_steps = Vec::new();
    if let Some(arr) = obj.get("next_steps").and_then(Value::as_array) {
        for (pos, entry) in arr.iter().enumerate() {
            // Bare scalars name the target directly; objects must carry `to`.
            let to = if entry.is_object() {
                entry.get("to").and_then(value_to_id)
            } else {
                value_to_id(entry)
            };
            let Some(to) = to else {
                return Err(PageError::SchemaMismatch {
                    page,
                    detail: format!("step {id} next_steps[{pos}] has no usable target"),
                });
            };
            let label = str_field(entry, "label").unwrap_or_default();
            next_steps.push(NextStep { to, label });
        }
    }

    Ok(Step {
        id,
        action,
        node_type,
        role,
        next_steps,
    })
}

/// Numbers stay numeric; numeric-looking strings are normalized to numbers
/// so `"to": "2"` still resolves against a step numbered 2.
fn value_to_id(v: &Value) -> Option<StepId> {
    match v {
        Value::Number(n) => n.as_i64().map(StepId::Num),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else if let Ok(n) = s.parse::<i64>() {
                Some(StepId::Num(n))
            } else {
                Some(StepId::Marker(s.to_string()))
            }
        }
        _ => None,
    }
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn scalar_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn snippet_of(text: &str) -> String {
    let trimmed = text.trim();
    let mut end = trimmed.len().min(200);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}
