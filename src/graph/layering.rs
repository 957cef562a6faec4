use std::collections::{HashMap, HashSet};

use petgraph::{graph::NodeIndex, visit::Dfs, Directed, Graph};
use tracing::{trace, warn};

use super::{
    entities::NodeGroup,
    errors::{ReferenceKind, ReferenceWarning},
    workflow_graph::WorkflowGraph,
};

/// Id of the synthetic node group that holds every root node.
pub const ROOT_GROUP_ID: &str = "_root";

/// Where a node or node group sits in the group hierarchy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    pub depth: u32,
    /// Enclosing node group ids, outermost (`_root`) first.
    pub parents: Vec<String>,
}

impl Placement {
    /// The immediately enclosing node group.
    pub fn parent(&self) -> Option<&str> {
        self.parents.last().map(String::as_str)
    }

    pub fn is_within(&self, group_id: &str) -> bool {
        self.parents.iter().any(|p| p == group_id)
    }
}

/// Result of the layering pass.
///
/// Depth convention: `_root` is depth 0 and root nodes are depth 1.  A node
/// group gets the depth of the node that represents it, and the group's
/// children sit one level deeper.  Node groups that no node represents hang
/// directly off `_root` as if represented at depth 1.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Layout {
    nodes: HashMap<String, Placement>,
    groups: HashMap<String, Placement>,
    root_children: Vec<String>,
    sorted_groups: Vec<String>,
    max_depth: u32,
    warnings: Vec<ReferenceWarning>,
}

impl Layout {
    pub fn node(&self, id: &str) -> Option<&Placement> {
        self.nodes.get(id)
    }

    pub fn group(&self, id: &str) -> Option<&Placement> {
        self.groups.get(id)
    }

    /// Node ids that are direct children of `_root`, in document order.
    pub fn root_children(&self) -> &[String] {
        &self.root_children
    }

    /// Node group ids in pre-order starting at `_root`.  This is the order the
    /// renderer and the stage listing walk the hierarchy in.
    pub fn sorted_groups(&self) -> &[String] {
        &self.sorted_groups
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn warnings(&self) -> &[ReferenceWarning] {
        &self.warnings
    }
}

struct LayoutBuilder<'a> {
    graph: &'a WorkflowGraph,
    layout: Layout,
}

impl<'a> LayoutBuilder<'a> {
    fn warn(&mut self, kind: ReferenceKind, owner: &str, missing: &str) {
        let warning = ReferenceWarning {
            kind,
            owner: owner.to_string(),
            missing: missing.to_string(),
        };
        warn!(graph = %self.graph.id, "{}", warning);
        self.layout.warnings.push(warning);
    }

    fn visit_node(&mut self, id: &str, depth: u32, parents: &[String]) {
        let graph = self.graph;
        let node = match graph.node(id) {
            Some(node) => node,
            None => return,
        };
        // A node listed by more than one group keeps its first placement.
        if self.layout.nodes.contains_key(id) {
            return;
        }

        trace!(node = id, depth, "placing node");
        self.layout.nodes.insert(
            id.to_string(),
            Placement {
                depth,
                parents: parents.to_vec(),
            },
        );
        self.layout.max_depth = self.layout.max_depth.max(depth);

        if let Some(child) = &node.child {
            match graph.node_group(child) {
                Some(group) => self.visit_group(group, depth, parents, id),
                None => self.warn(ReferenceKind::NodeChild, id, child),
            }
        }
    }

    fn visit_group(&mut self, group: &'a NodeGroup, depth: u32, parents: &[String], via: &str) {
        // Placing the group before descending means a nesting cycle shows up
        // here as an already-placed group.
        if self.layout.groups.contains_key(&group.id) {
            self.warn(ReferenceKind::GroupCycle, via, &group.id);
            return;
        }

        trace!(group = group.id.as_str(), depth, "placing node group");
        self.layout.groups.insert(
            group.id.clone(),
            Placement {
                depth,
                parents: parents.to_vec(),
            },
        );

        let mut child_parents = parents.to_vec();
        child_parents.push(group.id.clone());
        for child in &group.children {
            if self.graph.node(child).is_some() {
                self.visit_node(child, depth + 1, &child_parents);
            } else {
                self.warn(ReferenceKind::GroupChild, &group.id, child);
            }
        }
    }

    fn root_nodes(&mut self) -> Vec<String> {
        let graph = self.graph;
        if let Some(root) = graph.node_group(ROOT_GROUP_ID) {
            let mut roots = vec![];
            for child in &root.children {
                if graph.node(child).is_some() {
                    roots.push(child.clone());
                } else {
                    self.warn(ReferenceKind::GroupChild, ROOT_GROUP_ID, child);
                }
            }
            return roots;
        }

        let nested: HashSet<&str> = graph
            .node_groups()
            .iter()
            .flat_map(|g| g.children.iter().map(String::as_str))
            .collect();
        graph
            .nodes()
            .iter()
            .filter(|n| !nested.contains(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect()
    }

    fn sort_groups(&mut self) {
        let mut tree: Graph<String, (), Directed> = Graph::new();
        let mut indices: HashMap<&str, NodeIndex> = HashMap::new();

        let root_ix = tree.add_node(ROOT_GROUP_ID.to_string());
        indices.insert(ROOT_GROUP_ID, root_ix);

        let graph = self.graph;
        let placed: Vec<&NodeGroup> = graph
            .node_groups()
            .iter()
            .filter(|g| g.id != ROOT_GROUP_ID && self.layout.groups.contains_key(&g.id))
            .collect();
        for group in &placed {
            indices.insert(group.id.as_str(), tree.add_node(group.id.clone()));
        }
        // Edges go in document order so that siblings come out of the
        // pre-order walk in document order too.
        for group in &placed {
            let parent = self
                .layout
                .groups
                .get(&group.id)
                .and_then(Placement::parent)
                .unwrap_or(ROOT_GROUP_ID);
            if let (Some(&parent_ix), Some(&group_ix)) =
                (indices.get(parent), indices.get(group.id.as_str()))
            {
                tree.add_edge(parent_ix, group_ix, ());
            }
        }

        let mut sorted = vec![];
        let mut seen: HashSet<&str> = HashSet::new();
        let mut dfs = Dfs::new(&tree, root_ix);
        while let Some(ix) = dfs.next(&tree) {
            seen.insert(tree[ix].as_str());
            sorted.push(tree[ix].clone());
        }
        // Groups the walk never reached still get rendered, after the rest.
        for group in graph.node_groups() {
            if group.id != ROOT_GROUP_ID && seen.insert(group.id.as_str()) {
                sorted.push(group.id.clone());
            }
        }
        self.layout.sorted_groups = sorted;
    }
}

/// Compute depth and parent chains for every node and node group, then order
/// the node groups for hierarchical rendering.  Dangling references are
/// skipped and reported through `Layout::warnings`.
pub fn compute_layout(graph: &WorkflowGraph) -> Layout {
    let mut builder = LayoutBuilder {
        graph,
        layout: Layout::default(),
    };

    builder.layout.groups.insert(
        ROOT_GROUP_ID.to_string(),
        Placement {
            depth: 0,
            parents: vec![],
        },
    );

    let root_parents = vec![ROOT_GROUP_ID.to_string()];
    let roots = builder.root_nodes();
    for root in &roots {
        builder.visit_node(root, 1, &root_parents);
    }
    builder.layout.root_children = roots;

    let represented: HashSet<&str> = graph
        .nodes()
        .iter()
        .filter_map(|n| n.child.as_deref())
        .collect();
    for group in graph.node_groups() {
        if group.id == ROOT_GROUP_ID
            || represented.contains(group.id.as_str())
            || builder.layout.groups.contains_key(&group.id)
        {
            continue;
        }
        builder.visit_group(group, 1, &root_parents, ROOT_GROUP_ID);
    }

    for node in graph.nodes() {
        if !builder.layout.nodes.contains_key(&node.id) {
            let id = node.id.clone();
            builder.warn(ReferenceKind::UnplacedNode, &id, ROOT_GROUP_ID);
        }
    }

    builder.sort_groups();
    builder.layout
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph(doc: serde_json::Value) -> WorkflowGraph {
        WorkflowGraph::from_document(&doc).unwrap()
    }

    #[test]
    fn flat_graph_is_all_roots() {
        let g = graph(json!({
            "id": "g1",
            "nodes": [{"id": "a"}, {"id": "b"}],
            "edges": [{"u": "a", "v": "b"}],
            "node_groups": []
        }));
        let layout = g.layout();
        assert_eq!(layout.root_children(), &["a".to_string(), "b".to_string()]);
        assert_eq!(layout.node("a").unwrap().depth, 1);
        assert_eq!(layout.node("b").unwrap().parents, vec![ROOT_GROUP_ID.to_string()]);
        assert_eq!(layout.sorted_groups(), &[ROOT_GROUP_ID.to_string()]);
        assert_eq!(layout.max_depth(), 1);
        assert!(layout.warnings().is_empty());
    }

    #[test]
    fn three_levels_of_nesting() {
        let g = graph(json!({
            "id": "nested",
            "nodes": [
                {"id": "job1", "child": "1"},
                {"id": "a"},
                {"id": "inner", "child": "2"},
                {"id": "b"},
                {"id": "c"}
            ],
            "edges": [{"u": "a", "v": "inner"}, {"u": "b", "v": "c"}],
            "node_groups": [
                {"id": "1", "children": ["a", "inner"]},
                {"id": "2", "children": ["b", "c"]}
            ]
        }));
        let layout = g.layout();

        let job1 = layout.node("job1").unwrap();
        let group1 = layout.group("1").unwrap();
        assert_eq!(job1.depth, 1);
        assert_eq!(group1.depth, job1.depth);
        assert_eq!(layout.node("a").unwrap().depth, job1.depth + 1);

        let inner = layout.node("inner").unwrap();
        let group2 = layout.group("2").unwrap();
        assert_eq!(group2.depth, inner.depth);
        for child in ["b", "c"] {
            let placement = layout.node(child).unwrap();
            assert_eq!(placement.depth, inner.depth + 1);
            assert_eq!(placement.parents, vec!["_root", "1", "2"]);
            assert_eq!(placement.parent(), Some("2"));
        }

        assert_eq!(group2.parents, vec!["_root", "1"]);
        assert_eq!(layout.max_depth(), 3);
        assert_eq!(layout.sorted_groups(), &["_root", "1", "2"]);
        assert!(layout.warnings().is_empty());
    }

    #[test]
    fn groups_without_representatives_hang_off_root() {
        let g = graph(json!({
            "id": "stages",
            "nodes": [{"id": "a"}, {"id": "b"}, {"id": "c"}],
            "edges": [{"u": "a", "v": "b"}, {"u": "b", "v": "c"}],
            "node_groups": [
                {"id": "s1", "children": ["a", "b"]},
                {"id": "s2", "children": ["c"]}
            ]
        }));
        let layout = g.layout();
        assert!(layout.root_children().is_empty());
        assert_eq!(layout.group("s1").unwrap().depth, 1);
        assert_eq!(layout.node("a").unwrap().depth, 2);
        assert_eq!(layout.node("c").unwrap().parents, vec!["_root", "s2"]);
        assert_eq!(layout.sorted_groups(), &["_root", "s1", "s2"]);
    }

    #[test]
    fn dangling_references_are_skipped() {
        let g = graph(json!({
            "id": "dangling",
            "nodes": [{"id": "a"}, {"id": "job", "child": "missing-group"}],
            "edges": [],
            "node_groups": [{"id": "1", "children": ["optimized-a"]}]
        }));
        let layout = g.layout();
        let kinds: Vec<ReferenceKind> = layout.warnings().iter().map(|w| w.kind).collect();
        assert!(kinds.contains(&ReferenceKind::NodeChild));
        assert!(kinds.contains(&ReferenceKind::GroupChild));
        assert_eq!(layout.node("job").unwrap().depth, 1);
        assert!(layout.node("optimized-a").is_none());
    }

    #[test]
    fn group_nesting_cycle_is_cut() {
        // r enters gx, gx holds y, y enters gy, gy holds x, and x points back
        // at gx.
        let g = graph(json!({
            "id": "cycle",
            "nodes": [
                {"id": "r", "child": "gx"},
                {"id": "y", "child": "gy"},
                {"id": "x", "child": "gx"}
            ],
            "edges": [],
            "node_groups": [
                {"id": "gx", "children": ["y"]},
                {"id": "gy", "children": ["x"]}
            ]
        }));
        let layout = g.layout();
        assert_eq!(layout.root_children(), &["r".to_string()]);
        assert_eq!(layout.node("x").unwrap().depth, 3);
        assert!(layout
            .warnings()
            .iter()
            .any(|w| w.kind == ReferenceKind::GroupCycle && w.owner == "x" && w.missing == "gx"));
        assert_eq!(layout.sorted_groups(), &["_root", "gx", "gy"]);
    }

    #[test]
    fn wide_group_lists_sort_in_document_order() {
        let count = 2000;
        let nodes: Vec<_> = (0..count)
            .map(|i| json!({ "id": format!("job-{}", i), "child": format!("scope-{}", i) }))
            .collect();
        let groups: Vec<_> = (0..count)
            .map(|i| json!({ "id": format!("scope-{}", i), "children": [] }))
            .collect();
        let g = graph(json!({ "id": "wide", "nodes": nodes, "edges": [], "node_groups": groups }));

        let sorted = g.layout().sorted_groups();
        assert_eq!(sorted.len(), count + 1);
        assert_eq!(sorted[0], ROOT_GROUP_ID);
        assert_eq!(sorted[1], "scope-0");
        assert_eq!(sorted[count], format!("scope-{}", count - 1));
    }

    #[test]
    fn supplied_root_group_is_respected() {
        let g = graph(json!({
            "id": "rooted",
            "nodes": [{"id": "a"}, {"id": "b"}],
            "edges": [],
            "node_groups": [{"id": "_root", "children": ["b"]}]
        }));
        let layout = g.layout();
        assert_eq!(layout.root_children(), &["b".to_string()]);
        assert!(layout.node("a").is_none());
        assert_eq!(layout.sorted_groups(), &["_root"]);
    }
}
