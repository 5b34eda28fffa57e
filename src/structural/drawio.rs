//! Structural extraction from draw.io / diagrams.net SVG exports.
//!
//! draw.io embeds its editable model in the exported SVG. The model is an
//! `<mxGraphModel>` tree of `<mxCell>` elements: vertices carry a `style`
//! string describing the shape, edges carry `source`/`target` cell ids.
//! Depending on export settings the model appears in one of three places:
//!
//! 1. inline `<mxGraphModel>` XML somewhere in the file;
//! 2. inside a `<diagram>` element, base64 + deflate compressed and then
//!    URL-encoded (the diagrams.net wire format);
//! 3. HTML-encoded in a `content` attribute on the root element.
//!
//! All three are tried in order. Shape classification reads the style
//! string: `swimlane` marks a lane container, ellipse/terminator shapes are
//! direction-ambiguous terminators (resolved by connectivity downstream),
//! rhombus/decision shapes are decisions, everything else is a task.

use super::assemble::{assemble, RawEdge, RawKind, RawNode};
use crate::graph::DiagramGraph;
use crate::text::strip_html;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::{DeflateDecoder, ZlibDecoder};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::io::Read;
use tracing::debug;

pub fn extract(bytes: &[u8]) -> Option<DiagramGraph> {
    let text = String::from_utf8_lossy(bytes);
    let model_xml = find_model_xml(&text)?;
    let doc = roxmltree::Document::parse(&model_xml).ok()?;

    let mut swimlanes: HashMap<String, String> = HashMap::new();
    let mut lane_names: Vec<String> = Vec::new();
    let mut infos: Vec<CellInfo> = Vec::new();
    let mut parents: HashMap<String, String> = HashMap::new();
    let mut edges: Vec<RawEdge> = Vec::new();

    for cell in doc.descendants().filter(|n| n.is_element() && n.tag_name().name() == "mxCell") {
        // draw.io sometimes wraps cells in <UserObject>/<object>, moving the
        // id and label onto the wrapper.
        let wrapper = cell
            .parent_element()
            .filter(|p| matches!(p.tag_name().name(), "UserObject" | "object"));
        let Some(key) = wrapper
            .and_then(|w| w.attribute("id"))
            .or_else(|| cell.attribute("id"))
        else {
            continue;
        };
        let value = cell
            .attribute("value")
            .filter(|v| !v.is_empty())
            .or_else(|| wrapper.and_then(|w| w.attribute("label")))
            .or_else(|| wrapper.and_then(|w| w.attribute("value")))
            .unwrap_or("");
        let style = cell.attribute("style").unwrap_or("");
        let parent = cell.attribute("parent").unwrap_or("");

        if cell.attribute("vertex") == Some("1") {
            let label = strip_html(value);
            match classify_style(style) {
                StyleClass::Swimlane => {
                    lane_names.push(label.clone());
                    swimlanes.insert(key.to_string(), label);
                }
                StyleClass::Node(kind) => {
                    parents.insert(key.to_string(), parent.to_string());
                    infos.push(CellInfo {
                        key: key.to_string(),
                        kind,
                        label,
                        parent: parent.to_string(),
                    });
                }
            }
        } else if cell.attribute("edge") == Some("1") {
            let (source, target) = (
                cell.attribute("source").unwrap_or(""),
                cell.attribute("target").unwrap_or(""),
            );
            if !source.is_empty() && !target.is_empty() {
                edges.push(RawEdge {
                    source: source.to_string(),
                    target: target.to_string(),
                    label: strip_html(value),
                });
            }
        }
    }

    debug!(
        "draw.io model: {} node(s), {} edge(s), {} lane(s)",
        infos.len(),
        edges.len(),
        swimlanes.len()
    );

    let nodes = infos
        .into_iter()
        .map(|info| {
            // Lane comes from the parent chain: a node sits either directly
            // in a swimlane or in a group whose parent is one.
            let lane = swimlanes
                .get(&info.parent)
                .cloned()
                .or_else(|| {
                    parents
                        .get(&info.parent)
                        .and_then(|gp| swimlanes.get(gp))
                        .cloned()
                })
                .unwrap_or_default();
            RawNode {
                key: info.key,
                kind: info.kind,
                label: info.label,
                lane,
            }
        })
        .collect();

    assemble(nodes, edges, lane_names, "Draw.io диаграмма")
}

struct CellInfo {
    key: String,
    kind: RawKind,
    label: String,
    parent: String,
}

// ── Model location ───────────────────────────────────────────────────────────

static RE_MODEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<mxGraphModel[\s>].*?</mxGraphModel>").unwrap());
static RE_DIAGRAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<diagram[^>]*>(.*?)</diagram>").unwrap());

fn find_model_xml(text: &str) -> Option<String> {
    // Strategy 1: inline <mxGraphModel> XML.
    if let Some(m) = RE_MODEL.find(text) {
        if roxmltree::Document::parse(m.as_str()).is_ok() {
            return Some(m.as_str().to_string());
        }
    }

    // Strategy 2: compressed <diagram> payload.
    if let Some(caps) = RE_DIAGRAM.captures(text) {
        let encoded = caps[1].trim();
        if !encoded.is_empty() {
            if let Some(decoded) = decode_diagram(encoded) {
                if roxmltree::Document::parse(&decoded).is_ok() {
                    return Some(decoded);
                }
            }
        }
    }

    // Strategy 3: HTML-encoded content attribute. roxmltree resolves the
    // entities when reading the attribute.
    if let Ok(doc) = roxmltree::Document::parse(text) {
        for node in doc.descendants().filter(|n| n.is_element()) {
            if let Some(content) = node.attribute("content") {
                if content.contains("mxGraphModel") {
                    return Some(content.to_string());
                }
            }
        }
    }

    None
}

/// Decode the diagrams.net wire format: base64, then raw deflate or zlib,
/// then URL-decode. Uncompressed payloads pass through the inflate step.
fn decode_diagram(encoded: &str) -> Option<String> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let raw = BASE64.decode(compact.as_bytes()).ok()?;

    let mut inflated = Vec::new();
    if DeflateDecoder::new(raw.as_slice())
        .read_to_end(&mut inflated)
        .is_err()
    {
        inflated.clear();
        if ZlibDecoder::new(raw.as_slice())
            .read_to_end(&mut inflated)
            .is_err()
        {
            inflated = raw;
        }
    }

    let text = String::from_utf8_lossy(&inflated).into_owned();
    match urlencoding::decode(&text) {
        Ok(decoded) => Some(decoded.into_owned()),
        Err(_) => Some(text),
    }
}

// ── Style classification ─────────────────────────────────────────────────────

enum StyleClass {
    Swimlane,
    Node(RawKind),
}

/// draw.io styles are `key=value;bare;` lists; we match on the lowercased
/// keys and on a few well-known shape names.
fn classify_style(style: &str) -> StyleClass {
    let lowered = style.to_ascii_lowercase();
    let style = parse_style(&lowered);

    if style.contains_key("swimlane") {
        return StyleClass::Swimlane;
    }

    let shape = style.get("shape").copied().unwrap_or("");
    if style.contains_key("ellipse")
        || matches!(shape, "mxgraph.flowchart.terminator" | "mxgraph.bpmn.shape")
    {
        return StyleClass::Node(RawKind::StartEnd);
    }
    if style.contains_key("rhombus") || shape == "mxgraph.flowchart.decision" {
        return StyleClass::Node(RawKind::Decision);
    }

    StyleClass::Node(RawKind::Task)
}

fn parse_style(style: &str) -> HashMap<&str, &str> {
    let mut map = HashMap::new();
    for part in style.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            Some((k, v)) => map.insert(k.trim(), v.trim()),
            None => map.insert(part, ""),
        };
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeType, StepId};
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    const INLINE_MODEL: &str = r#"<svg xmlns="http://www.w3.org/2000/svg">
        <metadata><mxGraphModel><root>
            <mxCell id="0"/>
            <mxCell id="1" parent="0"/>
            <mxCell id="lane1" value="&lt;b&gt;Клиент&lt;/b&gt;" style="swimlane;horizontal=0" vertex="1" parent="1"/>
            <mxCell id="s1" value="" style="ellipse;fillColor=#fff" vertex="1" parent="lane1"/>
            <mxCell id="t1" value="Проверить данные" style="rounded=1" vertex="1" parent="lane1"/>
            <mxCell id="d1" value="Готово?" style="rhombus" vertex="1" parent="lane1"/>
            <mxCell id="e1" style="edgeStyle=orthogonal" edge="1" source="s1" target="t1" parent="1"/>
            <mxCell id="e2" value="да" edge="1" source="t1" target="d1" parent="1"/>
        </root></mxGraphModel></metadata>
    </svg>"#;

    #[test]
    fn extracts_inline_model() {
        let g = extract(INLINE_MODEL.as_bytes()).unwrap();
        assert_eq!(g.diagram_type, "bpmn");
        assert_eq!(g.description, "Draw.io диаграмма: Клиент");
        assert_eq!(g.steps.len(), 3);

        let start = &g.steps[0];
        assert_eq!(start.id, StepId::Marker("start".into()));
        assert_eq!(start.node_type, NodeType::Start);
        assert_eq!(start.role, "Клиент");
        assert_eq!(start.next_steps.len(), 1);

        let task = g.step(&start.next_steps[0].to).unwrap();
        assert_eq!(task.action, "Проверить данные");
        assert_eq!(task.next_steps[0].label, "да");

        let decision = g.step(&task.next_steps[0].to).unwrap();
        assert_eq!(decision.node_type, NodeType::Decision);
        assert!(g.edges_resolved());
    }

    #[test]
    fn extraction_is_deterministic() {
        let a = extract(INLINE_MODEL.as_bytes()).unwrap();
        let b = extract(INLINE_MODEL.as_bytes()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn extracts_compressed_diagram_payload() {
        let model = r#"<mxGraphModel><root>
            <mxCell id="0"/>
            <mxCell id="a" value="%D0%A8%D0%B0%D0%B3" style="rounded=1" vertex="1" parent="0"/>
            <mxCell id="b" value="Конец" style="ellipse" vertex="1" parent="0"/>
            <mxCell id="e" edge="1" source="a" target="b" parent="0"/>
        </root></mxGraphModel>"#;
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(model.as_bytes()).unwrap();
        let compressed = enc.finish().unwrap();
        let svg = format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\"><mxfile><diagram>{}</diagram></mxfile></svg>",
            BASE64.encode(compressed)
        );
        let g = extract(svg.as_bytes()).unwrap();
        assert_eq!(g.steps.len(), 2);
        assert_eq!(g.steps[0].action, "Шаг");
        // terminator with only incoming edges resolves to end
        assert_eq!(g.steps[1].node_type, NodeType::End);
        assert_eq!(g.steps[1].id, StepId::Marker("end".into()));
    }

    #[test]
    fn extracts_content_attribute_model() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" content="&lt;mxGraphModel&gt;&lt;root&gt;&lt;mxCell id=&quot;a&quot; value=&quot;X&quot; style=&quot;rounded=1&quot; vertex=&quot;1&quot;/&gt;&lt;/root&gt;&lt;/mxGraphModel&gt;"/>"#;
        let g = extract(svg.as_bytes()).unwrap();
        assert_eq!(g.steps.len(), 1);
        assert_eq!(g.steps[0].action, "X");
    }

    #[test]
    fn wrapper_objects_supply_id_and_label() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg"><mxGraphModel><root>
            <UserObject id="u1" label="Обработать заявку">
                <mxCell style="rounded=1" vertex="1" parent="1"/>
            </UserObject>
        </root></mxGraphModel></svg>"#;
        let g = extract(svg.as_bytes()).unwrap();
        assert_eq!(g.steps.len(), 1);
        assert_eq!(g.steps[0].action, "Обработать заявку");
    }

    #[test]
    fn svg_without_model_is_inapplicable() {
        assert!(extract(b"<svg xmlns=\"http://www.w3.org/2000/svg\"><rect/></svg>").is_none());
    }
}
