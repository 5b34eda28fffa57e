//! Shared graph assembly for the structural extractors.
//!
//! Both dialect walkers ([`super::drawio`], [`super::bpmn`]) reduce their XML
//! to the same flat intermediate: a list of nodes with a coarse kind and an
//! optional lane, plus source/target edges keyed by the tool's element ids.
//! This module turns that intermediate into a [`DiagramGraph`]: it resolves
//! ambiguous terminator shapes by connectivity, assigns stable step ids, and
//! groups outgoing edges under each step.
//!
//! Id scheme: the first start node gets the literal id `start`, further
//! start nodes `start_2`, `start_3`, …; same for `end`. Every other node
//! gets the next sequential number, counted in node order. Node order is
//! document order as produced by the walker, so extraction stays
//! deterministic for identical input bytes.

use crate::graph::{DiagramGraph, NextStep, NodeType, Step, StepId};
use std::collections::HashMap;

/// Coarse node classification as read off the markup, before connectivity
/// resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    Start,
    End,
    /// Terminator shape whose direction is not encoded in the markup
    /// (a draw.io ellipse is drawn the same way at either end of a flow).
    StartEnd,
    Task,
    Decision,
    Subprocess,
}

/// One diagram node keyed by the tool's own element id.
#[derive(Debug, Clone)]
pub struct RawNode {
    pub key: String,
    pub kind: RawKind,
    pub label: String,
    pub lane: String,
}

/// One directed connector between two tool element ids.
#[derive(Debug, Clone)]
pub struct RawEdge {
    pub source: String,
    pub target: String,
    pub label: String,
}

/// Assemble the walker output into a graph.
///
/// Returns `None` when no nodes survived the walk; an empty structural
/// result means the extractor was not applicable after all.
pub fn assemble(
    mut nodes: Vec<RawNode>,
    edges: Vec<RawEdge>,
    lane_names: Vec<String>,
    tool_label: &str,
) -> Option<DiagramGraph> {
    if nodes.is_empty() {
        return None;
    }

    resolve_terminators(&mut nodes, &edges);

    // Stable step ids in node order.
    let mut id_map: HashMap<String, StepId> = HashMap::new();
    let mut counter = 1i64;
    let mut starts = 0usize;
    let mut ends = 0usize;
    for node in &nodes {
        let id = match node.kind {
            RawKind::Start => {
                starts += 1;
                StepId::start(starts)
            }
            RawKind::End => {
                ends += 1;
                StepId::end(ends)
            }
            _ => {
                let id = StepId::Num(counter);
                counter += 1;
                id
            }
        };
        id_map.insert(node.key.clone(), id);
    }

    // Outgoing edges grouped by source, kept in connector order; edges to
    // unknown elements are dropped.
    let mut edge_map: HashMap<&str, Vec<NextStep>> = HashMap::new();
    for edge in &edges {
        if !id_map.contains_key(&edge.source) {
            continue;
        }
        let Some(to) = id_map.get(&edge.target) else {
            continue;
        };
        edge_map.entry(edge.source.as_str()).or_default().push(NextStep {
            to: to.clone(),
            label: edge.label.clone(),
        });
    }

    let steps = nodes
        .iter()
        .map(|node| Step {
            id: id_map[&node.key].clone(),
            action: node.label.clone(),
            node_type: canonical_type(node.kind),
            role: node.lane.clone(),
            next_steps: edge_map.remove(node.key.as_str()).unwrap_or_default(),
        })
        .collect();

    let lanes: Vec<&str> = lane_names
        .iter()
        .map(String::as_str)
        .filter(|n| !n.is_empty())
        .collect();
    let description = if lanes.is_empty() {
        tool_label.to_string()
    } else {
        format!("{}: {}", tool_label, lanes.join(", "))
    };

    Some(DiagramGraph {
        diagram_type: "bpmn".to_string(),
        description,
        steps,
    })
}

/// Decide start vs. end for direction-ambiguous terminators by looking at
/// their edges: only outgoing means start, only incoming means end, both
/// means a pass-through task, neither defaults to start.
fn resolve_terminators(nodes: &mut [RawNode], edges: &[RawEdge]) {
    let mut incoming: HashMap<&str, usize> = HashMap::new();
    let mut outgoing: HashMap<&str, usize> = HashMap::new();
    for edge in edges {
        *incoming.entry(edge.target.as_str()).or_default() += 1;
        *outgoing.entry(edge.source.as_str()).or_default() += 1;
    }

    for node in nodes.iter_mut() {
        if node.kind != RawKind::StartEnd {
            continue;
        }
        let has_in = incoming.get(node.key.as_str()).copied().unwrap_or(0) > 0;
        let has_out = outgoing.get(node.key.as_str()).copied().unwrap_or(0) > 0;
        node.kind = match (has_in, has_out) {
            (true, false) => RawKind::End,
            (false, true) | (false, false) => RawKind::Start,
            (true, true) => RawKind::Task,
        };
    }
}

fn canonical_type(kind: RawKind) -> NodeType {
    match kind {
        RawKind::Start => NodeType::Start,
        RawKind::End => NodeType::End,
        RawKind::Decision => NodeType::Decision,
        RawKind::Subprocess => NodeType::Subprocess,
        RawKind::Task | RawKind::StartEnd => NodeType::Task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(key: &str, kind: RawKind, label: &str) -> RawNode {
        RawNode {
            key: key.to_string(),
            kind,
            label: label.to_string(),
            lane: String::new(),
        }
    }

    fn edge(source: &str, target: &str) -> RawEdge {
        RawEdge {
            source: source.to_string(),
            target: target.to_string(),
            label: String::new(),
        }
    }

    #[test]
    fn assigns_marker_and_numeric_ids_in_order() {
        let nodes = vec![
            node("a", RawKind::Start, ""),
            node("b", RawKind::Task, "Один"),
            node("c", RawKind::Decision, "Два"),
            node("d", RawKind::End, ""),
        ];
        let g = assemble(nodes, vec![], vec![], "diagram").unwrap();
        let ids: Vec<&StepId> = g.steps.iter().map(|s| &s.id).collect();
        assert_eq!(
            ids,
            [
                &StepId::Marker("start".into()),
                &StepId::Num(1),
                &StepId::Num(2),
                &StepId::Marker("end".into()),
            ]
        );
    }

    #[test]
    fn duplicate_markers_get_suffixes() {
        let nodes = vec![
            node("a", RawKind::Start, ""),
            node("b", RawKind::Start, ""),
            node("c", RawKind::End, ""),
            node("d", RawKind::End, ""),
        ];
        let g = assemble(nodes, vec![], vec![], "diagram").unwrap();
        assert_eq!(g.steps[1].id, StepId::Marker("start_2".into()));
        assert_eq!(g.steps[3].id, StepId::Marker("end_2".into()));
    }

    #[test]
    fn terminator_direction_resolves_by_connectivity() {
        let nodes = vec![
            node("a", RawKind::StartEnd, ""),
            node("b", RawKind::Task, "x"),
            node("c", RawKind::StartEnd, ""),
            node("d", RawKind::StartEnd, ""),
        ];
        let edges = vec![edge("a", "b"), edge("b", "c")];
        let g = assemble(nodes, edges, vec![], "diagram").unwrap();
        assert_eq!(g.steps[0].node_type, NodeType::Start);
        assert_eq!(g.steps[2].node_type, NodeType::End);
        // isolated terminator defaults to start and takes the next suffix
        assert_eq!(g.steps[3].node_type, NodeType::Start);
        assert_eq!(g.steps[3].id, StepId::Marker("start_2".into()));
    }

    #[test]
    fn pass_through_terminator_becomes_task() {
        let nodes = vec![
            node("a", RawKind::Start, ""),
            node("b", RawKind::StartEnd, "между"),
            node("c", RawKind::End, ""),
        ];
        let edges = vec![edge("a", "b"), edge("b", "c")];
        let g = assemble(nodes, edges, vec![], "diagram").unwrap();
        assert_eq!(g.steps[1].node_type, NodeType::Task);
        assert_eq!(g.steps[1].id, StepId::Num(1));
    }

    #[test]
    fn edges_group_under_sources_and_dangling_targets_drop() {
        let nodes = vec![node("a", RawKind::Task, "x"), node("b", RawKind::Task, "y")];
        let mut e = edge("a", "b");
        e.label = "да".to_string();
        let edges = vec![e, edge("a", "ghost")];
        let g = assemble(nodes, edges, vec![], "diagram").unwrap();
        assert_eq!(g.steps[0].next_steps.len(), 1);
        assert_eq!(g.steps[0].next_steps[0].label, "да");
        assert!(g.edges_resolved());
    }

    #[test]
    fn description_lists_lane_names() {
        let nodes = vec![node("a", RawKind::Task, "x")];
        let g = assemble(
            nodes,
            vec![],
            vec!["Клиент".to_string(), String::new(), "Банк".to_string()],
            "BPMN diagram",
        )
        .unwrap();
        assert_eq!(g.description, "BPMN diagram: Клиент, Банк");
    }

    #[test]
    fn empty_node_list_is_inapplicable() {
        assert!(assemble(vec![], vec![], vec![], "diagram").is_none());
    }
}
