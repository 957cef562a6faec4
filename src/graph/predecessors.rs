use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use super::entities::{edge_id, split_edge_id};
use super::workflow_graph::WorkflowGraph;

/// Full opacity for highlighted ids.
pub const HIGHLIGHT_OPACITY: f32 = 1.0;
/// Opacity for everything outside a highlight.
pub const DIMMED_OPACITY: f32 = 0.3;

/// Source of "who feeds into this node" answers for the walker.
pub trait Adjacency {
    /// Ids of the nodes directly upstream of `id`.
    fn predecessors(&self, id: &str) -> Vec<String>;
    /// Ids of the edges that end at `id`.
    fn incoming_edges(&self, id: &str) -> Vec<String>;
}

/// Adjacency derived from the graph's edge list.
pub struct EdgeListAdjacency {
    incoming: HashMap<String, Vec<(String, String)>>,
}

impl EdgeListAdjacency {
    pub fn new(graph: &WorkflowGraph) -> Self {
        let mut incoming: HashMap<String, Vec<(String, String)>> = HashMap::new();
        for edge in graph.edges() {
            incoming
                .entry(edge.v.clone())
                .or_default()
                .push((edge.u.clone(), edge.id()));
        }
        EdgeListAdjacency { incoming }
    }
}

impl Adjacency for EdgeListAdjacency {
    fn predecessors(&self, id: &str) -> Vec<String> {
        self.incoming
            .get(id)
            .map(|edges| edges.iter().map(|(u, _)| u.clone()).collect())
            .unwrap_or_default()
    }

    fn incoming_edges(&self, id: &str) -> Vec<String> {
        self.incoming
            .get(id)
            .map(|edges| edges.iter().map(|(_, e)| e.clone()).collect())
            .unwrap_or_default()
    }
}

/// Adjacency from the `predecessors` list a producer may attach to each node's
/// properties.  Nodes without such a list fall back to the edge list, and
/// incoming edges always come from the edge list.
pub struct PrecomputedAdjacency<'a> {
    graph: &'a WorkflowGraph,
    edges: EdgeListAdjacency,
}

impl<'a> PrecomputedAdjacency<'a> {
    pub fn new(graph: &'a WorkflowGraph) -> Self {
        PrecomputedAdjacency {
            graph,
            edges: EdgeListAdjacency::new(graph),
        }
    }
}

fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl<'a> Adjacency for PrecomputedAdjacency<'a> {
    fn predecessors(&self, id: &str) -> Vec<String> {
        let listed = self
            .graph
            .node(id)
            .and_then(|n| n.properties.get("predecessors"))
            .and_then(Value::as_array);
        match listed {
            Some(list) => list.iter().filter_map(id_from_value).collect(),
            None => self.edges.predecessors(id),
        }
    }

    fn incoming_edges(&self, id: &str) -> Vec<String> {
        self.edges.incoming_edges(id)
    }
}

/// Node and edge ids that stay at full opacity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Highlight {
    pub node_ids: BTreeSet<String>,
    pub edge_ids: BTreeSet<String>,
}

impl Highlight {
    pub fn contains_node(&self, node_id: &str) -> bool {
        self.node_ids.contains(node_id)
    }

    pub fn contains_edge(&self, edge_id: &str) -> bool {
        self.edge_ids.contains(edge_id)
    }

    /// Edge ids are `u->v` and node ids never hold `->`, so the shape of `id`
    /// says which set to look in.
    pub fn contains(&self, id: &str) -> bool {
        match split_edge_id(id) {
            Some(_) => self.contains_edge(id),
            None => self.contains_node(id),
        }
    }

    /// Binary highlight: full or dimmed, nothing in between.
    pub fn opacity_of(&self, id: &str) -> f32 {
        if self.contains(id) {
            HIGHLIGHT_OPACITY
        } else {
            DIMMED_OPACITY
        }
    }
}

/// Walk upstream from `target`, collecting every ancestor node and every edge
/// crossed on the way.  Each node is expanded at most once, so cycles and
/// self-loops terminate.
pub fn highlighted_set_for<A: Adjacency + ?Sized>(adjacency: &A, target: &str) -> Highlight {
    let mut highlight = Highlight::default();
    highlight.node_ids.insert(target.to_string());

    let mut expanded: HashSet<String> = HashSet::new();
    expanded.insert(target.to_string());
    let mut frontier = vec![target.to_string()];

    while !frontier.is_empty() {
        let mut next = vec![];
        for id in &frontier {
            highlight.edge_ids.extend(adjacency.incoming_edges(id));
            for pred in adjacency.predecessors(id) {
                highlight.node_ids.insert(pred.clone());
                if expanded.insert(pred.clone()) {
                    next.push(pred);
                }
            }
        }
        trace!(frontier = frontier.len(), next = next.len(), "expanded predecessors");
        frontier = next;
    }

    highlight
}

/// Everything at full opacity.
pub fn highlight_all(graph: &WorkflowGraph) -> Highlight {
    Highlight {
        node_ids: graph.nodes().iter().map(|n| n.id.clone()).collect(),
        edge_ids: graph.edges().iter().map(|e| edge_id(&e.u, &e.v)).collect(),
    }
}

impl WorkflowGraph {
    /// Highlight the path into `target` using the edge list.
    pub fn highlighted_set_for(&self, target: &str) -> Highlight {
        highlighted_set_for(&EdgeListAdjacency::new(self), target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph(doc: Value) -> WorkflowGraph {
        WorkflowGraph::from_document(&doc).unwrap()
    }

    #[test]
    fn single_edge_path() {
        let g = graph(json!({
            "id": "g1",
            "nodes": [{"id": "a"}, {"id": "b"}],
            "edges": [{"u": "a", "v": "b"}]
        }));
        let highlight = g.highlighted_set_for("b");
        let ids = |ids: &[&str]| ids.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>();
        assert_eq!(highlight.node_ids, ids(&["a", "b"]));
        assert_eq!(highlight.edge_ids, ids(&["a->b"]));
        assert_eq!(highlight.opacity_of("a->b"), HIGHLIGHT_OPACITY);

        let root = g.highlighted_set_for("a");
        assert_eq!(root.node_ids.len(), 1);
        assert!(root.edge_ids.is_empty());
        assert_eq!(root.opacity_of("b"), DIMMED_OPACITY);
    }

    #[test]
    fn diamond_collects_both_branches() {
        let g = graph(json!({
            "id": "diamond",
            "nodes": [{"id": "load"}, {"id": "left"}, {"id": "right"}, {"id": "join"}, {"id": "other"}],
            "edges": [
                {"u": "load", "v": "left"},
                {"u": "load", "v": "right"},
                {"u": "left", "v": "join"},
                {"u": "right", "v": "join"},
                {"u": "join", "v": "other"}
            ]
        }));
        let highlight = g.highlighted_set_for("join");
        assert_eq!(highlight.node_ids.len(), 4);
        assert!(!highlight.contains("other"));
        assert_eq!(highlight.edge_ids.len(), 4);
        assert!(!highlight.contains("join->other"));
    }

    #[test]
    fn cycles_and_self_loops_terminate() {
        let g = graph(json!({
            "id": "cyclic",
            "nodes": [{"id": "a"}, {"id": "b"}, {"id": "c"}],
            "edges": [
                {"u": "a", "v": "b"},
                {"u": "b", "v": "a"},
                {"u": "b", "v": "b"},
                {"u": "b", "v": "c"}
            ]
        }));
        let highlight = g.highlighted_set_for("c");
        assert_eq!(highlight.node_ids.len(), 3);
        assert!(highlight.contains("b->b"));
        assert!(highlight.contains("b->a"));
        assert!(highlight.contains("a->b"));
    }

    #[test]
    fn precomputed_predecessors_agree_with_edges() {
        let g = graph(json!({
            "id": "pig",
            "nodes": [
                {"id": "1", "properties": {"predecessors": []}},
                {"id": "2", "properties": {"predecessors": [1]}},
                {"id": "3", "properties": {"predecessors": ["2"]}},
                {"id": "4"}
            ],
            "edges": [{"u": "1", "v": "2"}, {"u": "2", "v": "3"}, {"u": "3", "v": "4"}]
        }));
        let from_edges = highlighted_set_for(&EdgeListAdjacency::new(&g), "4");
        let precomputed = highlighted_set_for(&PrecomputedAdjacency::new(&g), "4");
        assert_eq!(from_edges, precomputed);
        assert_eq!(precomputed.node_ids.len(), 4);
    }

    #[test]
    fn highlight_everything() {
        let g = graph(json!({
            "id": "all",
            "nodes": [{"id": "a"}, {"id": "b"}],
            "edges": [{"u": "a", "v": "b"}]
        }));
        let all = highlight_all(&g);
        assert!(all.contains("a") && all.contains("b") && all.contains("a->b"));
    }

    #[test]
    fn node_and_edge_lookups_stay_apart() {
        let mut highlight = Highlight::default();
        highlight.node_ids.insert("x->y".to_string());
        highlight.edge_ids.insert("a".to_string());

        assert!(!highlight.contains("x->y"));
        assert!(!highlight.contains("a"));
        assert_eq!(highlight.opacity_of("x->y"), DIMMED_OPACITY);
        assert_eq!(highlight.opacity_of("a"), DIMMED_OPACITY);
        assert!(highlight.contains_node("x->y"));
        assert!(highlight.contains_edge("a"));
    }
}
