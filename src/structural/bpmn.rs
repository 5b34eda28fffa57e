//! Structural extraction from bpmn-js rendered SVGs.
//!
//! Unlike draw.io, bpmn-js exports carry no embedded model: the SVG is pure
//! geometry, with each BPMN element rendered as a `<g data-element-id="…">`
//! group whose id prefix encodes the element class (`Activity_`, `Event_`,
//! `Gateway_`, `Flow_`, `Participant_`). Structure is recovered
//! geometrically: shapes get a bounding box from their transform matrix and
//! first `<rect>`/`<circle>`, sequence flows get endpoints from their
//! `<path>` data, and each flow endpoint is matched to the nearest shape
//! within a fixed pixel tolerance.
//!
//! Classification rules observed in bpmn-js output:
//! * events are circles; a thick stroke (≥ 3) marks the end event, a thin
//!   one the start event;
//! * activities larger than 200×200 are expanded sub-processes acting as
//!   containers — flows touching a container are re-routed to the child
//!   shape nearest the endpoint (incoming) or to the child the flow leaves
//!   from, preferring an end event (outgoing), and the container itself is
//!   dissolved;
//! * gateways are 50×50 diamonds;
//! * participants are lane rectangles, assigned to shapes by center point.

use super::assemble::{assemble, RawEdge, RawKind, RawNode};
use crate::graph::DiagramGraph;
use crate::text::{collapse_whitespace, join_broken_words};
use once_cell::sync::Lazy;
use regex::Regex;
use roxmltree::Node;
use std::collections::HashMap;
use tracing::debug;

/// Pixel tolerance when matching flow endpoints to shape boxes.
const MATCH_TOLERANCE: f64 = 25.0;
/// Activities larger than this on both axes are expanded sub-processes.
const CONTAINER_MIN_DIM: f64 = 200.0;
/// End events are drawn with a thick circle stroke.
const END_EVENT_STROKE: f64 = 3.0;
/// Gateway diamonds have a fixed size in bpmn-js.
const GATEWAY_SIZE: f64 = 50.0;

#[derive(Debug, Clone)]
struct Shape {
    eid: String,
    kind: RawKind,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    label: String,
    lane: String,
}

impl Shape {
    fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    fn covers(&self, px: f64, py: f64, tolerance: f64) -> bool {
        self.x - tolerance <= px
            && px <= self.x + self.width + tolerance
            && self.y - tolerance <= py
            && py <= self.y + self.height + tolerance
    }
}

struct Flow {
    start: (f64, f64),
    end: (f64, f64),
    label: String,
}

struct LaneBox {
    name: String,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

pub fn extract(bytes: &[u8]) -> Option<DiagramGraph> {
    let text = String::from_utf8_lossy(bytes);
    let doc = roxmltree::Document::parse(&text).ok()?;

    // Groups by element id, in document order.
    let groups: Vec<(&str, Node)> = doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "g")
        .filter_map(|n| n.attribute("data-element-id").map(|eid| (eid, n)))
        .collect();
    let by_id: HashMap<&str, Node> = groups.iter().copied().collect();
    let label_of = |eid: &str| -> String {
        by_id
            .get(format!("{eid}_label").as_str())
            .map(|g| group_text(*g))
            .unwrap_or_default()
    };

    let mut lanes: Vec<LaneBox> = Vec::new();
    let mut shapes: Vec<Shape> = Vec::new();
    let mut containers: Vec<Shape> = Vec::new();

    for &(eid, g) in &groups {
        if eid.contains("_label") {
            continue;
        }
        let (x, y) = transform_xy(g);

        if eid.starts_with("Participant_") {
            let (width, height) = first_rect(g);
            if width > 0.0 && height > 0.0 {
                lanes.push(LaneBox {
                    name: group_text(g),
                    x,
                    y,
                    width,
                    height,
                });
            }
        } else if eid.starts_with("Activity_") {
            let (width, height) = first_rect(g);
            let mut label = group_text(g);
            if label.is_empty() {
                label = label_of(eid);
            }
            let shape = Shape {
                eid: eid.to_string(),
                kind: if width > CONTAINER_MIN_DIM && height > CONTAINER_MIN_DIM {
                    RawKind::Subprocess
                } else {
                    RawKind::Task
                },
                x,
                y,
                width,
                height,
                label,
                lane: String::new(),
            };
            if shape.kind == RawKind::Subprocess {
                containers.push(shape);
            } else {
                shapes.push(shape);
            }
        } else if eid.starts_with("Event_") {
            let r = circle_radius(g);
            let kind = if circle_stroke_width(g) >= END_EVENT_STROKE {
                RawKind::End
            } else {
                RawKind::Start
            };
            shapes.push(Shape {
                eid: eid.to_string(),
                kind,
                x,
                y,
                width: r * 2.0,
                height: r * 2.0,
                label: String::new(),
                lane: String::new(),
            });
        } else if eid.starts_with("Gateway_") {
            let mut label = group_text(g);
            if label.is_empty() {
                label = label_of(eid);
            }
            shapes.push(Shape {
                eid: eid.to_string(),
                kind: RawKind::Decision,
                x,
                y,
                width: GATEWAY_SIZE,
                height: GATEWAY_SIZE,
                label,
                lane: String::new(),
            });
        }
    }

    for shape in shapes.iter_mut() {
        let (cx, cy) = shape.center();
        if let Some(lane) = lanes.iter().find(|l| {
            l.x <= cx && cx <= l.x + l.width && l.y <= cy && cy <= l.y + l.height
        }) {
            shape.lane = lane.name.clone();
        }
    }

    let mut flows: Vec<Flow> = Vec::new();
    for &(eid, g) in &groups {
        if !eid.starts_with("Flow_") || eid.contains("_label") {
            continue;
        }
        let Some((start, end)) = path_endpoints(g) else {
            continue;
        };
        flows.push(Flow {
            start,
            end,
            label: label_of(eid),
        });
    }

    debug!(
        "bpmn-js geometry: {} shape(s), {} container(s), {} flow(s), {} lane(s)",
        shapes.len(),
        containers.len(),
        flows.len(),
        lanes.len()
    );

    let edges = match_flows(&shapes, &containers, &flows);
    let nodes = shapes
        .into_iter()
        .map(|s| RawNode {
            key: s.eid,
            kind: s.kind,
            label: s.label,
            lane: s.lane,
        })
        .collect();
    let lane_names = lanes.into_iter().map(|l| l.name).collect();
    assemble(nodes, edges, lane_names, "BPMN-диаграмма")
}

// ── Flow endpoint matching ───────────────────────────────────────────────────

/// Match flow endpoints to shapes while dissolving containers: an endpoint
/// on a container re-routes to the appropriate child shape.
fn match_flows(shapes: &[Shape], containers: &[Shape], flows: &[Flow]) -> Vec<RawEdge> {
    let pool: Vec<&Shape> = shapes.iter().chain(containers.iter()).collect();
    let children: HashMap<&str, Vec<&Shape>> = containers
        .iter()
        .map(|c| {
            let inside: Vec<&Shape> = shapes
                .iter()
                .filter(|s| {
                    let (cx, cy) = s.center();
                    c.x <= cx && cx <= c.x + c.width && c.y <= cy && cy <= c.y + c.height
                })
                .collect();
            (c.eid.as_str(), inside)
        })
        .collect();

    let mut edges: Vec<RawEdge> = Vec::new();
    for flow in flows {
        let Some(src) = nearest_shape(flow.start, &pool, None) else {
            continue;
        };
        let Some(dst) = nearest_shape(flow.end, &pool, Some(src)) else {
            continue;
        };
        // Incoming into a container lands on its child nearest the endpoint.
        let dst = match children.get(dst.eid.as_str()) {
            Some(inside) => match nearest_center(flow.end, inside) {
                Some(child) => child,
                None => continue,
            },
            None => dst,
        };
        if src.eid == dst.eid {
            continue;
        }
        edges.push(RawEdge {
            source: src.eid.clone(),
            target: dst.eid.clone(),
            label: flow.label.clone(),
        });
    }

    // Outgoing from a container leaves through its exit child: the end
    // event if it has one, otherwise the child with no sibling-bound edges.
    for container in containers {
        let Some(inside) = children.get(container.eid.as_str()) else {
            continue;
        };
        if inside.is_empty() {
            edges.retain(|e| e.source != container.eid);
            continue;
        }
        let exit = container_exit(inside, &edges);
        for edge in edges.iter_mut().filter(|e| e.source == container.eid) {
            edge.source = exit.to_string();
        }
    }

    edges
}

fn nearest_shape<'a>(
    point: (f64, f64),
    pool: &[&'a Shape],
    exclude: Option<&Shape>,
) -> Option<&'a Shape> {
    let candidates: Vec<&Shape> = pool
        .iter()
        .copied()
        .filter(|s| exclude.map_or(true, |e| e.eid != s.eid))
        .filter(|s| s.covers(point.0, point.1, MATCH_TOLERANCE))
        .collect();
    nearest_center(point, &candidates)
}

fn nearest_center<'a>(point: (f64, f64), candidates: &[&'a Shape]) -> Option<&'a Shape> {
    candidates
        .iter()
        .copied()
        .min_by(|a, b| {
            let da = dist_sq(point, a.center());
            let db = dist_sq(point, b.center());
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
}

fn dist_sq(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)
}

fn container_exit<'a>(inside: &[&'a Shape], edges: &[RawEdge]) -> &'a str {
    if let Some(end) = inside.iter().find(|s| s.kind == RawKind::End) {
        return &end.eid;
    }
    let sibling_ids: Vec<&str> = inside.iter().map(|s| s.eid.as_str()).collect();
    inside
        .iter()
        .find(|s| {
            !edges
                .iter()
                .any(|e| e.source == s.eid && sibling_ids.contains(&e.target.as_str()))
        })
        .or(inside.last())
        .map(|s| s.eid.as_str())
        .unwrap_or("")
}

// ── Geometry helpers ─────────────────────────────────────────────────────────

static RE_MATRIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"matrix\([^)]*[\s,](-?\d+(?:\.\d+)?)[\s,]+(-?\d+(?:\.\d+)?)\)").unwrap()
});
static RE_STROKE_WIDTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"stroke-width:\s*(\d+(?:\.\d+)?)").unwrap());
static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d+(?:\.\d+)?").unwrap());

/// Translation part of the group's `transform="matrix(a b c d e f)"`.
fn transform_xy(g: Node) -> (f64, f64) {
    let Some(t) = g.attribute("transform") else {
        return (0.0, 0.0);
    };
    match RE_MATRIX.captures(t) {
        Some(caps) => (parse_f64(&caps[1]), parse_f64(&caps[2])),
        None => (0.0, 0.0),
    }
}

fn first_rect(g: Node) -> (f64, f64) {
    for n in g.descendants() {
        if n.is_element() && n.tag_name().name() == "rect" {
            return (
                parse_f64(n.attribute("width").unwrap_or("0")),
                parse_f64(n.attribute("height").unwrap_or("0")),
            );
        }
    }
    (0.0, 0.0)
}

fn circle_stroke_width(g: Node) -> f64 {
    for n in g.descendants() {
        if n.is_element() && n.tag_name().name() == "circle" {
            if let Some(caps) = n.attribute("style").and_then(|s| RE_STROKE_WIDTH.captures(s)) {
                return parse_f64(&caps[1]);
            }
            // presentation attribute form; unstyled circles are thin
            return parse_f64(n.attribute("stroke-width").unwrap_or("1"));
        }
    }
    0.0
}

fn circle_radius(g: Node) -> f64 {
    for n in g.descendants() {
        if n.is_element() && n.tag_name().name() == "circle" {
            return parse_f64(n.attribute("r").unwrap_or("18"));
        }
    }
    18.0
}

/// Start (the `M` move-to) and end coordinates of the first `<path>`.
fn path_endpoints(g: Node) -> Option<((f64, f64), (f64, f64))> {
    for n in g.descendants() {
        if !(n.is_element() && n.tag_name().name() == "path") {
            continue;
        }
        let d = n.attribute("d").unwrap_or("");
        if !d.contains('M') {
            continue;
        }
        let nums: Vec<f64> = RE_NUMBER
            .find_iter(d)
            .map(|m| parse_f64(m.as_str()))
            .collect();
        if nums.len() >= 4 {
            return Some((
                (nums[0], nums[1]),
                (nums[nums.len() - 2], nums[nums.len() - 1]),
            ));
        }
    }
    None
}

fn parse_f64(s: &str) -> f64 {
    s.trim().trim_end_matches("px").parse().unwrap_or(0.0)
}

/// All tspan/text content under the group's first `<text>`, rejoined.
fn group_text(g: Node) -> String {
    let Some(text_elem) = g.descendants().find(|n| n.is_element() && n.tag_name().name() == "text") else {
        return String::new();
    };
    // Walk text nodes only; an element's `.text()` aliases its first text
    // child and would duplicate every line.
    let raw: String = text_elem
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    join_broken_words(&collapse_whitespace(&raw))
}
