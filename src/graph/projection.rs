use std::collections::{BTreeMap, HashSet};

use dot_structures::{
    Attribute, Edge as DotEdge, EdgeTy, Graph as DotGraph, GraphAttributes, Id, Node as DotNode,
    NodeId, Stmt, Subgraph, Vertex,
};
use graphviz_rust::printer::{DotPrinter, PrinterContext};
use serde::Serialize;
use serde_json::{json, Value};

use super::workflow_graph::WorkflowGraph;

/// One edge of a render subset.  Endpoints are rendered ids, so an edge that
/// touches a collapsed representative node points at its group instead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RenderedEdge {
    /// The `"u->v"` id of the underlying edge.
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// The part of a graph that is drawn when looking at one subgraph level.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RenderSubset {
    pub subgraph: String,
    /// Rendered node ids in document order.  A node that represents a group
    /// shows up under the group's id.
    pub nodes: Vec<String>,
    /// Node groups drawn as clusters, in rendering order.
    pub node_groups: Vec<String>,
    pub edges: Vec<RenderedEdge>,
    /// Rendered id -> the cluster it is drawn inside.
    pub parent_of: BTreeMap<String, String>,
}

/// Build the render subset for `subgraph_id`.  Pure function of the graph.
pub fn project_subgraph(graph: &WorkflowGraph, subgraph_id: &str) -> RenderSubset {
    let layout = graph.layout();
    let mut subset = RenderSubset {
        subgraph: subgraph_id.to_string(),
        ..Default::default()
    };
    let mut rendered: HashSet<String> = HashSet::new();

    for node in graph.nodes() {
        let within = layout
            .node(&node.id)
            .map_or(false, |p| p.is_within(subgraph_id));
        if !within {
            continue;
        }
        let id = node.child.clone().unwrap_or_else(|| node.id.clone());
        if rendered.insert(id.clone()) {
            subset.nodes.push(id);
        }
    }

    for group_id in layout.sorted_groups() {
        let within = layout
            .group(group_id)
            .map_or(false, |p| p.is_within(subgraph_id));
        if within {
            subset.node_groups.push(group_id.clone());
        }
    }

    for group_id in &subset.node_groups {
        let group = match graph.node_group(group_id) {
            Some(group) => group,
            None => continue,
        };
        for child in &group.children {
            let child_node = match graph.node(child) {
                Some(node) => node,
                None => continue,
            };
            let rendered_id = child_node.child.as_ref().unwrap_or(&child_node.id);
            if rendered.contains(rendered_id) && !subset.parent_of.contains_key(rendered_id) {
                subset
                    .parent_of
                    .insert(rendered_id.clone(), group_id.clone());
            }
        }
    }

    let collapse = |id: &str| -> String {
        graph
            .node(id)
            .and_then(|n| n.child.clone())
            .unwrap_or_else(|| id.to_string())
    };
    for edge in graph.edges() {
        let source = collapse(&edge.u);
        let target = collapse(&edge.v);
        if rendered.contains(&source) && rendered.contains(&target) {
            subset.edges.push(RenderedEdge {
                id: edge.id(),
                source,
                target,
                label: edge.label.clone(),
            });
        }
    }

    subset
}

impl WorkflowGraph {
    pub fn project_subgraph(&self, subgraph_id: &str) -> RenderSubset {
        project_subgraph(self, subgraph_id)
    }
}

fn quoted(s: &str) -> Id {
    Id::Escaped(format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")))
}

fn attr(key: &str, value: &str) -> Attribute {
    Attribute(Id::Plain(key.to_string()), quoted(value))
}

impl RenderSubset {
    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n == id)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "subgraph": self.subgraph,
            "nodes": self.nodes,
            "node_groups": self.node_groups,
            "edges": self.edges,
            "parent_of": self.parent_of,
        })
    }

    /// Statements for everything drawn directly inside `cluster` (`None` is
    /// the top level), recursing into nested clusters.
    fn cluster_stmts(&self, cluster: Option<&str>) -> Vec<Stmt> {
        let mut stmts = vec![];
        if let Some(cluster) = cluster {
            stmts.push(Stmt::Attribute(attr("label", cluster)));
            // Edges into a collapsed group attach to this point.
            if self.contains_node(cluster) {
                stmts.push(Stmt::Node(DotNode::new(
                    NodeId(quoted(cluster), None),
                    vec![attr("label", ""), attr("shape", "point")],
                )));
            }
        }

        for group_id in &self.node_groups {
            if self.parent_of.get(group_id).map(String::as_str) == cluster {
                stmts.push(Stmt::Subgraph(Subgraph {
                    id: quoted(&format!("cluster_{}", group_id)),
                    stmts: self.cluster_stmts(Some(group_id)),
                }));
            }
        }

        for node_id in &self.nodes {
            if self.node_groups.contains(node_id) {
                continue;
            }
            if self.parent_of.get(node_id).map(String::as_str) == cluster {
                stmts.push(Stmt::Node(DotNode::new(NodeId(quoted(node_id), None), vec![])));
            }
        }

        stmts
    }

    /// Graphviz DOT text with one `cluster_<group>` subgraph per node group.
    pub fn to_dot(&self) -> String {
        let mut stmts = vec![Stmt::GAttribute(GraphAttributes::Graph(vec![Attribute(
            Id::Plain("compound".to_string()),
            Id::Plain("true".to_string()),
        )]))];
        stmts.extend(self.cluster_stmts(None));

        for edge in &self.edges {
            let mut attributes = vec![];
            if let Some(label) = &edge.label {
                attributes.push(attr("label", label));
            }
            stmts.push(Stmt::Edge(DotEdge {
                ty: EdgeTy::Pair(
                    Vertex::N(NodeId(quoted(&edge.source), None)),
                    Vertex::N(NodeId(quoted(&edge.target), None)),
                ),
                attributes,
            }));
        }

        let graph = DotGraph::DiGraph {
            id: quoted(&self.subgraph),
            strict: false,
            stmts,
        };
        graph.print(&mut PrinterContext::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nested() -> WorkflowGraph {
        WorkflowGraph::from_document(&json!({
            "id": "nested",
            "nodes": [
                {"id": "job1", "child": "1"},
                {"id": "a"},
                {"id": "inner", "child": "2"},
                {"id": "b"},
                {"id": "c"},
                {"id": "x"}
            ],
            "edges": [
                {"u": "a", "v": "inner"},
                {"u": "b", "v": "c", "label": "12 rows"},
                {"u": "x", "v": "job1"}
            ],
            "node_groups": [
                {"id": "1", "children": ["a", "inner"]},
                {"id": "2", "children": ["b", "c"]}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn root_view_collapses_representatives() {
        let graph = nested();
        let subset = graph.project_subgraph("_root");
        assert_eq!(subset.nodes, vec!["1", "a", "2", "b", "c", "x"]);
        assert_eq!(subset.node_groups, vec!["1", "2"]);
        assert_eq!(subset.parent_of.get("a").map(String::as_str), Some("1"));
        assert_eq!(subset.parent_of.get("2").map(String::as_str), Some("1"));
        assert_eq!(subset.parent_of.get("c").map(String::as_str), Some("2"));
        assert!(!subset.parent_of.contains_key("x"));

        let ends: Vec<(&str, &str)> = subset
            .edges
            .iter()
            .map(|e| (e.source.as_str(), e.target.as_str()))
            .collect();
        assert_eq!(ends, vec![("a", "2"), ("b", "c"), ("x", "1")]);
        assert_eq!(subset.edges[2].id, "x->job1");
    }

    #[test]
    fn inner_view_only_keeps_internal_edges() {
        let graph = nested();
        let subset = graph.project_subgraph("1");
        assert_eq!(subset.nodes, vec!["a", "2", "b", "c"]);
        assert_eq!(subset.node_groups, vec!["2"]);
        assert!(!subset.parent_of.contains_key("a"));
        assert_eq!(subset.edges.len(), 2);

        let leaf = graph.project_subgraph("2");
        assert_eq!(leaf.nodes, vec!["b", "c"]);
        assert!(leaf.node_groups.is_empty());
        assert_eq!(leaf.edges[0].label.as_deref(), Some("12 rows"));
    }

    #[test]
    fn projection_is_idempotent() {
        let graph = nested();
        for subgraph in ["_root", "1", "2", "no-such-group"] {
            assert_eq!(graph.project_subgraph(subgraph), graph.project_subgraph(subgraph));
        }
        assert!(graph.project_subgraph("no-such-group").nodes.is_empty());
    }

    #[test]
    fn json_and_dot_output() {
        let graph = nested();
        let subset = graph.project_subgraph("_root");

        let value = subset.to_json();
        assert_eq!(value["parent_of"]["b"], "2");
        assert_eq!(value["edges"][1], json!({ "id": "b->c", "source": "b", "target": "c", "label": "12 rows" }));

        let dot = subset.to_dot();
        assert!(dot.contains("digraph"));
        assert!(dot.contains("cluster_1"));
        assert!(dot.contains("cluster_2"));
        assert!(dot.contains("12 rows"));

        let inner = graph.project_subgraph("1").to_dot();
        assert!(!inner.contains("cluster_1"));
    }
}
