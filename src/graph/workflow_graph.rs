use std::collections::HashMap;
use std::fmt;

use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tracing::trace;

use super::{
    entities::{
        edge_id, merge_properties, split_edge_id, Edge, EdgePatch, Node, NodeGroup,
        NodeGroupPatch, NodePatch, Properties,
    },
    errors::{EntityKind, GraphError, ReferenceKind, ReferenceWarning, Result},
    layering::{compute_layout, Layout, Placement},
    now_millis,
    status::{Status, StatusPatch, StatusText},
};

/// Emitted to observers after every successful mutation.  This is how a view
/// layer learns that it needs to redraw; there is no implicit binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GraphEvent {
    NodeUpserted { id: String, created: bool },
    EdgeUpserted { id: String, created: bool },
    NodeGroupUpserted { id: String, created: bool },
    StatusPatched,
    LayoutRecomputed,
}

pub trait GraphObserver: Send + Sync {
    fn on_graph_event(&self, event: &GraphEvent);
}

impl<F> GraphObserver for F
where
    F: Fn(&GraphEvent) + Send + Sync,
{
    fn on_graph_event(&self, event: &GraphEvent) {
        self(event)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upserted {
    Created,
    Updated,
}

/// Schema of an inbound graph document.  Entities are read as patches so that
/// a document and a later partial update share one code path.
#[derive(Deserialize)]
struct GraphDocument {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    properties: Option<Properties>,
    #[serde(default)]
    status: Option<StatusPatch>,
    nodes: Vec<NodePatch>,
    edges: Vec<EdgePatch>,
    #[serde(default)]
    node_groups: Option<Vec<NodeGroupPatch>>,
    #[serde(default)]
    created_at: Option<i64>,
    #[serde(default)]
    updated_at: Option<i64>,
}

/// Status routing entry of a `GraphPatch`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct EntityStatusPatch {
    pub id: String,
    #[serde(default)]
    pub status: Option<StatusPatch>,
}

/// Whole-graph update as posted by a running job.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct GraphPatch {
    #[serde(default)]
    pub status: Option<StatusPatch>,
    #[serde(default)]
    pub properties: Option<Properties>,
    #[serde(default)]
    pub node_groups: Option<Vec<EntityStatusPatch>>,
    #[serde(default)]
    pub nodes: Option<Vec<EntityStatusPatch>>,
}

/// Deserialize a patch, mapping any shape problem to `GraphError::Format`.
pub fn parse_patch<T: DeserializeOwned>(entity: EntityKind, value: &Value) -> Result<T> {
    serde_json::from_value(value.clone()).map_err(|err| GraphError::format(entity, err.to_string()))
}

/// A workflow graph: nodes, directed edges and node groups plus the computed
/// layout.  Entities are held in document order and found through id maps;
/// parent relationships live in the `Layout` as ids, never as references.
pub struct WorkflowGraph {
    pub id: String,
    pub name: String,
    pub properties: Properties,
    pub status: Status,
    pub created_at: i64,
    pub updated_at: i64,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    node_groups: Vec<NodeGroup>,
    node_index: HashMap<String, usize>,
    group_index: HashMap<String, usize>,
    edge_index: HashMap<(String, String), usize>,
    layout: Layout,
    observers: Vec<Box<dyn GraphObserver>>,
}

impl fmt::Debug for WorkflowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowGraph")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.len())
            .field("node_groups", &self.node_groups.len())
            .finish()
    }
}

impl WorkflowGraph {
    /// Empty graph with the default name.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let now = now_millis();
        WorkflowGraph {
            name: format!("workflow-{}", id),
            id,
            properties: Properties::new(),
            status: Status::default(),
            created_at: now,
            updated_at: now,
            nodes: vec![],
            edges: vec![],
            node_groups: vec![],
            node_index: HashMap::new(),
            group_index: HashMap::new(),
            edge_index: HashMap::new(),
            layout: Layout::default(),
            observers: vec![],
        }
    }

    /// Ingest a full graph document.  `id`, `nodes` and `edges` are required;
    /// nothing is built unless the whole document is acceptable.
    pub fn from_document(doc: &Value) -> Result<WorkflowGraph> {
        let obj = doc
            .as_object()
            .ok_or_else(|| GraphError::format(EntityKind::Graph, "graph document must be an object"))?;
        match obj.get("id") {
            Some(Value::String(_)) => {}
            Some(_) => return Err(GraphError::format(EntityKind::Graph, "graph id must be a string")),
            None => return Err(GraphError::format(EntityKind::Graph, "all graphs must have an id")),
        }
        if !matches!(obj.get("nodes"), Some(Value::Array(_))) {
            return Err(GraphError::format(EntityKind::Graph, "all graphs must have nodes"));
        }
        if !matches!(obj.get("edges"), Some(Value::Array(_))) {
            return Err(GraphError::format(EntityKind::Graph, "all graphs must have edges"));
        }
        let parsed: GraphDocument = parse_patch(EntityKind::Graph, doc)?;

        let mut graph = WorkflowGraph::new(parsed.id);
        if let Some(name) = parsed.name {
            graph.name = name;
        }
        if let Some(properties) = parsed.properties {
            graph.properties = properties;
        }
        if let Some(status) = &parsed.status {
            graph.status = Status::from_patch(status);
        }
        graph.created_at = parsed.created_at.unwrap_or(graph.created_at);
        graph.updated_at = parsed.updated_at.unwrap_or(graph.created_at);

        // Creation failures are format problems at ingestion time.
        let as_format = |err: GraphError| GraphError::Format(err.details().clone());
        for patch in &parsed.nodes {
            let node = Node::from_patch(patch).map_err(as_format)?;
            match graph.node_index.get(&node.id).copied() {
                Some(ix) => {
                    graph.nodes[ix].update_with(patch);
                }
                None => graph.push_node(node),
            }
        }
        for patch in &parsed.edges {
            let edge = Edge::from_patch(patch).map_err(as_format)?;
            let key = (edge.u.clone(), edge.v.clone());
            match graph.edge_index.get(&key).copied() {
                Some(ix) => graph.edges[ix].update_with(patch),
                None => graph.push_edge(edge),
            }
        }
        for patch in parsed.node_groups.iter().flatten() {
            let group = NodeGroup::from_patch(patch).map_err(as_format)?;
            match graph.group_index.get(&group.id).copied() {
                Some(ix) => {
                    graph.node_groups[ix].update_with(patch);
                }
                None => graph.push_node_group(group),
            }
        }

        graph.layout = compute_layout(&graph);
        Ok(graph)
    }

    /// Serialize back to the document shape accepted by `from_document`.
    /// Computed layout data is not part of the document.
    pub fn to_document(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "properties": self.properties,
            "status": self.status,
            "nodes": self.nodes,
            "edges": self.edges,
            "node_groups": self.node_groups,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
        })
    }

    fn push_node(&mut self, node: Node) {
        self.node_index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
    }

    fn push_edge(&mut self, edge: Edge) {
        self.edge_index
            .insert((edge.u.clone(), edge.v.clone()), self.edges.len());
        self.edges.push(edge);
    }

    fn push_node_group(&mut self, group: NodeGroup) {
        self.group_index.insert(group.id.clone(), self.node_groups.len());
        self.node_groups.push(group);
    }

    pub fn subscribe(&mut self, observer: Box<dyn GraphObserver>) {
        self.observers.push(observer);
    }

    fn notify(&self, event: GraphEvent) {
        for observer in &self.observers {
            observer.on_graph_event(&event);
        }
    }

    fn recompute_layout(&mut self) {
        self.layout = compute_layout(self);
        self.notify(GraphEvent::LayoutRecomputed);
    }

    /// Bump `updated_at` to now.
    pub fn touch(&mut self) {
        self.updated_at = now_millis();
    }

    // ## Lookups

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_groups(&self) -> &[NodeGroup] {
        &self.node_groups
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.node_index.get(id).map(|&ix| &self.nodes[ix])
    }

    pub fn node_group(&self, id: &str) -> Option<&NodeGroup> {
        self.group_index.get(id).map(|&ix| &self.node_groups[ix])
    }

    pub fn edge(&self, u: &str, v: &str) -> Option<&Edge> {
        self.edge_index
            .get(&(u.to_string(), v.to_string()))
            .map(|&ix| &self.edges[ix])
    }

    /// Look up an edge by its `"u->v"` id.
    pub fn edge_by_id(&self, id: &str) -> Option<&Edge> {
        let (u, v) = split_edge_id(id)?;
        self.edge(u, v)
    }

    /// The node that stands in for `group_id` when it is collapsed.
    pub fn representative_of(&self, group_id: &str) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|n| n.child.as_deref() == Some(group_id))
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Immediately enclosing node group of a node.
    pub fn node_parent(&self, id: &str) -> Option<&str> {
        self.layout.node(id).and_then(Placement::parent)
    }

    /// Immediately enclosing node group of a node group.
    pub fn node_group_parent(&self, id: &str) -> Option<&str> {
        self.layout.group(id).and_then(Placement::parent)
    }

    /// Nodes placed at `depth`, in document order.  Unplaced nodes and
    /// references to missing nodes never show up here.
    pub fn nodes_at(&self, depth: u32) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| self.layout.node(&n.id).map(|p| p.depth) == Some(depth))
            .collect()
    }

    /// Node group ids placed at `depth`, in rendering order.  Depth 0 is the
    /// synthetic root.
    pub fn subgraphs_at(&self, depth: u32) -> Vec<&str> {
        self.layout
            .sorted_groups()
            .iter()
            .filter(|g| self.layout.group(g).map(|p| p.depth) == Some(depth))
            .map(String::as_str)
            .collect()
    }

    pub fn max_depth(&self) -> u32 {
        self.layout.max_depth()
    }

    pub fn nodes_with_status(&self, status_text: StatusText) -> Vec<&Node> {
        self.nodes.iter().filter(|n| n.status.is(status_text)).collect()
    }

    pub fn node_groups_with_status(&self, status_text: StatusText) -> Vec<&NodeGroup> {
        self.node_groups
            .iter()
            .filter(|g| g.status.is(status_text))
            .collect()
    }

    // ## Mutation

    /// Update the node `id` or create it from `patch` if it does not exist.
    pub fn upsert_node(&mut self, id: &str, patch: &NodePatch) -> Result<Upserted> {
        if let Some(ix) = self.node_index.get(id).copied() {
            let structural = self.nodes[ix].update_with(patch);
            self.notify(GraphEvent::NodeUpserted {
                id: id.to_string(),
                created: false,
            });
            if structural {
                self.recompute_layout();
            }
            return Ok(Upserted::Updated);
        }

        let node = Node::from_patch(patch)?;
        if node.id != id {
            return Err(GraphError::patch_no_op(
                EntityKind::Node,
                format!("patch id {} does not match node {}", node.id, id),
            ));
        }
        self.push_node(node);
        self.notify(GraphEvent::NodeUpserted {
            id: id.to_string(),
            created: true,
        });
        self.recompute_layout();
        Ok(Upserted::Created)
    }

    /// Update the edge `u -> v` or create it from `patch`.  There is never more
    /// than one edge per ordered pair.
    pub fn upsert_edge(&mut self, u: &str, v: &str, patch: &EdgePatch) -> Result<Upserted> {
        let key = (u.to_string(), v.to_string());
        if let Some(ix) = self.edge_index.get(&key).copied() {
            self.edges[ix].update_with(patch);
            self.notify(GraphEvent::EdgeUpserted {
                id: edge_id(u, v),
                created: false,
            });
            return Ok(Upserted::Updated);
        }

        let edge = Edge::from_patch(patch)?;
        if edge.u != u || edge.v != v {
            return Err(GraphError::patch_no_op(
                EntityKind::Edge,
                format!("patch endpoints {} do not match {}", edge.id(), edge_id(u, v)),
            ));
        }
        self.push_edge(edge);
        self.notify(GraphEvent::EdgeUpserted {
            id: edge_id(u, v),
            created: true,
        });
        self.recompute_layout();
        Ok(Upserted::Created)
    }

    pub fn upsert_node_group(&mut self, id: &str, patch: &NodeGroupPatch) -> Result<Upserted> {
        if let Some(ix) = self.group_index.get(id).copied() {
            let structural = self.node_groups[ix].update_with(patch);
            self.notify(GraphEvent::NodeGroupUpserted {
                id: id.to_string(),
                created: false,
            });
            if structural {
                self.recompute_layout();
            }
            return Ok(Upserted::Updated);
        }

        let group = NodeGroup::from_patch(patch)?;
        if group.id != id {
            return Err(GraphError::patch_no_op(
                EntityKind::NodeGroup,
                format!("patch id {} does not match node group {}", group.id, id),
            ));
        }
        self.push_node_group(group);
        self.notify(GraphEvent::NodeGroupUpserted {
            id: id.to_string(),
            created: true,
        });
        self.recompute_layout();
        Ok(Upserted::Created)
    }

    /// Apply a status update from a running job.  The top-level status is
    /// replaced; listed nodes and node groups that carry a `status` get it
    /// merged in; unknown ids are skipped.  Never touches the layout.
    pub fn apply_graph_patch(&mut self, patch: &GraphPatch) {
        if let Some(status) = &patch.status {
            self.status = Status::from_patch(status);
        }
        if let Some(properties) = &patch.properties {
            merge_properties(&mut self.properties, properties);
        }
        for entry in patch.node_groups.iter().flatten() {
            if let Some(status) = &entry.status {
                match self.group_index.get(&entry.id) {
                    Some(&ix) => self.node_groups[ix].status.update_with(status),
                    None => trace!(group = entry.id.as_str(), "skipping status for unknown node group"),
                }
            }
        }
        for entry in patch.nodes.iter().flatten() {
            if let Some(status) = &entry.status {
                match self.node_index.get(&entry.id) {
                    Some(&ix) => self.nodes[ix].status.update_with(status),
                    None => trace!(node = entry.id.as_str(), "skipping status for unknown node"),
                }
            }
        }
        self.touch();
        self.notify(GraphEvent::StatusPatched);
    }

    /// Parse and apply a JSON graph patch.  A malformed patch changes nothing.
    pub fn apply_graph_patch_json(&mut self, patch: &Value) -> Result<()> {
        let patch: GraphPatch = parse_patch(EntityKind::Graph, patch)?;
        self.apply_graph_patch(&patch);
        Ok(())
    }

    /// Report every reference that does not resolve.  Nothing here is fatal.
    pub fn validate(&self) -> Vec<ReferenceWarning> {
        let mut warnings = vec![];
        for edge in &self.edges {
            if self.node(&edge.u).is_none() {
                warnings.push(ReferenceWarning {
                    kind: ReferenceKind::EdgeSource,
                    owner: edge.id(),
                    missing: edge.u.clone(),
                });
            }
            if self.node(&edge.v).is_none() {
                warnings.push(ReferenceWarning {
                    kind: ReferenceKind::EdgeTarget,
                    owner: edge.id(),
                    missing: edge.v.clone(),
                });
            }
        }
        for group in &self.node_groups {
            for child in &group.children {
                if self.node(child).is_none() {
                    warnings.push(ReferenceWarning {
                        kind: ReferenceKind::GroupChild,
                        owner: group.id.clone(),
                        missing: child.clone(),
                    });
                }
            }
        }
        for node in &self.nodes {
            if let Some(child) = &node.child {
                if self.node_group(child).is_none() {
                    warnings.push(ReferenceWarning {
                        kind: ReferenceKind::NodeChild,
                        owner: node.id.clone(),
                        missing: child.clone(),
                    });
                }
            }
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn sample() -> WorkflowGraph {
        WorkflowGraph::from_document(&json!({
            "id": "g1",
            "status": { "progress": 20, "startTime": 1000, "heartbeatTime": 1000, "statusText": "running" },
            "nodes": [
                { "id": "job1", "child": "1" },
                { "id": "a", "properties": { "alias": "one" }, "status": { "statusText": "running", "progress": 50, "startTime": 5, "heartbeatTime": 6 } },
                { "id": "b", "type": "Custom" }
            ],
            "edges": [{ "u": "a", "v": "b" }],
            "node_groups": [{ "id": "1", "children": ["a", "b"] }],
            "created_at": 100
        }))
        .unwrap()
    }

    #[test]
    fn missing_required_fields_are_format_errors() {
        for doc in [
            json!({ "nodes": [], "edges": [] }),
            json!({ "id": "x", "edges": [] }),
            json!({ "id": "x", "nodes": [] }),
            json!({ "id": "x", "nodes": {}, "edges": [] }),
            json!({ "id": 7, "nodes": [], "edges": [] }),
            json!({ "id": "x", "nodes": [{ "properties": {} }], "edges": [] }),
            json!({ "id": "x", "nodes": [{ "id": "a->b" }, { "id": "a" }], "edges": [] }),
            json!({ "id": "x", "nodes": [], "edges": [{ "u": "a->b", "v": "c" }] }),
            json!({ "id": "x", "nodes": [], "edges": [], "status": { "statusText": "bogus" } }),
            json!([]),
        ] {
            let err = WorkflowGraph::from_document(&doc).unwrap_err();
            assert!(matches!(err, GraphError::Format(_)), "{:?} gave {:?}", doc, err);
        }
    }

    #[test]
    fn document_defaults_are_filled() {
        let graph = WorkflowGraph::from_document(&json!({
            "id": "9",
            "nodes": [{ "id": "a" }],
            "edges": []
        }))
        .unwrap();
        let doc = graph.to_document();
        assert_eq!(doc["name"], "workflow-9");
        assert_eq!(doc["properties"], json!({}));
        assert_eq!(doc["status"], json!({ "progress": 0 }));
        assert_eq!(doc["node_groups"], json!([]));
        assert_eq!(doc["nodes"][0]["type"], "PigNode");
        assert_eq!(doc["created_at"], doc["updated_at"]);
    }

    #[test]
    fn document_round_trips() {
        let graph = sample();
        let doc = graph.to_document();
        assert_eq!(doc["id"], "g1");
        assert_eq!(doc["created_at"], 100);
        assert_eq!(doc["updated_at"], 100);
        assert_eq!(doc["nodes"][0]["child"], "1");
        assert_eq!(doc["nodes"][2]["type"], "Custom");
        assert_eq!(doc["edges"][0], json!({ "u": "a", "v": "b", "type": "PigEdge", "properties": {} }));

        // Statuses with both timestamps present are reproduced exactly.
        let full = json!({ "progress": 3, "startTime": 1, "heartbeatTime": 2 });
        let stable = WorkflowGraph::from_document(&json!({
            "id": "g2",
            "name": "nightly",
            "properties": { "owner": "etl" },
            "status": full,
            "nodes": [{ "id": "a", "status": full, "child": "1", "url": "/jobs/a" }],
            "edges": [{ "u": "a", "v": "a", "label": "loop" }],
            "node_groups": [{ "id": "1", "children": [], "status": full }],
            "created_at": 5,
            "updated_at": 6
        }))
        .unwrap();
        let doc = stable.to_document();
        let again = WorkflowGraph::from_document(&doc).unwrap();
        assert_eq!(again.to_document(), doc);
    }

    #[test]
    fn duplicate_edges_collapse_into_one() {
        let graph = WorkflowGraph::from_document(&json!({
            "id": "dup",
            "nodes": [{ "id": "a" }, { "id": "b" }],
            "edges": [{ "u": "a", "v": "b" }, { "u": "a", "v": "b", "label": "second" }]
        }))
        .unwrap();
        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.edge("a", "b").unwrap().label.as_deref(), Some("second"));
        assert!(graph.edge_by_id("a->b").is_some());
        assert!(graph.edge_by_id("b->a").is_none());
    }

    #[test]
    fn status_patch_on_node_keeps_other_fields() {
        let mut graph = sample();
        let recomputes = Arc::new(Mutex::new(0));
        let seen = recomputes.clone();
        graph.subscribe(Box::new(move |event: &GraphEvent| {
            if *event == GraphEvent::LayoutRecomputed {
                *seen.lock().unwrap() += 1;
            }
        }));

        let patch: NodePatch = parse_patch(EntityKind::Node, &json!({ "status": { "statusText": "failed" } })).unwrap();
        assert_eq!(graph.upsert_node("a", &patch).unwrap(), Upserted::Updated);

        let status = &graph.node("a").unwrap().status;
        assert_eq!(status.status_text, Some(StatusText::Failed));
        assert_eq!(status.progress, 50);
        assert_eq!(status.start_time, Some(5));
        assert_eq!(status.heartbeat_time, Some(6));
        assert_eq!(*recomputes.lock().unwrap(), 0);
    }

    #[test]
    fn upsert_creates_and_relayers() {
        let mut graph = sample();
        let patch: NodePatch = parse_patch(EntityKind::Node, &json!({ "id": "c" })).unwrap();
        assert_eq!(graph.upsert_node("c", &patch).unwrap(), Upserted::Created);
        assert_eq!(graph.layout().node("c").unwrap().depth, 1);

        let group: NodeGroupPatch =
            parse_patch(EntityKind::NodeGroup, &json!({ "children": ["a", "b", "c"] })).unwrap();
        graph.upsert_node_group("1", &group).unwrap();
        assert_eq!(graph.layout().node("c").unwrap().depth, 2);
        assert_eq!(graph.node_parent("c"), Some("1"));
    }

    #[test]
    fn upsert_without_required_fields_changes_nothing() {
        let mut graph = sample();
        let before = graph.to_document();

        let bad_node: NodePatch = parse_patch(EntityKind::Node, &json!({ "properties": {} })).unwrap();
        assert!(matches!(graph.upsert_node("zz", &bad_node), Err(GraphError::PatchNoOp(_))));

        let mismatched: NodePatch = parse_patch(EntityKind::Node, &json!({ "id": "other" })).unwrap();
        assert!(matches!(graph.upsert_node("zz", &mismatched), Err(GraphError::PatchNoOp(_))));

        let bad_edge: EdgePatch = parse_patch(EntityKind::Edge, &json!({ "u": "b" })).unwrap();
        assert!(matches!(graph.upsert_edge("b", "a", &bad_edge), Err(GraphError::PatchNoOp(_))));

        let bad_group: NodeGroupPatch = parse_patch(EntityKind::NodeGroup, &json!({})).unwrap();
        assert!(matches!(graph.upsert_node_group("7", &bad_group), Err(GraphError::PatchNoOp(_))));

        assert_eq!(graph.to_document(), before);
    }

    #[test]
    fn upsert_edge_updates_in_place() {
        let mut graph = sample();
        let patch: EdgePatch = parse_patch(EntityKind::Edge, &json!({ "label": "10 records" })).unwrap();
        assert_eq!(graph.upsert_edge("a", "b", &patch).unwrap(), Upserted::Updated);
        assert_eq!(graph.edges().len(), 1);

        let patch: EdgePatch = parse_patch(EntityKind::Edge, &json!({ "u": "b", "v": "a" })).unwrap();
        assert_eq!(graph.upsert_edge("b", "a", &patch).unwrap(), Upserted::Created);
        assert_eq!(graph.edges().len(), 2);
    }

    #[test]
    fn graph_patch_routes_statuses() {
        let mut graph = sample();
        let before_updated = graph.updated_at;
        graph
            .apply_graph_patch_json(&json!({
                "status": { "statusText": "finished", "progress": 100 },
                "node_groups": [
                    { "id": "1", "status": { "progress": 75 } },
                    { "id": "nope", "status": { "progress": 1 } }
                ],
                "nodes": [
                    { "id": "b", "status": { "statusText": "finished" } },
                    { "id": "a" }
                ]
            }))
            .unwrap();

        assert!(graph.status.is(StatusText::Finished));
        assert_eq!(graph.status.progress, 100);
        assert_eq!(graph.node_group("1").unwrap().status.progress, 75);
        assert!(graph.node("b").unwrap().status.is(StatusText::Finished));
        assert!(graph.node("a").unwrap().status.is(StatusText::Running));
        assert!(graph.updated_at >= before_updated);
        assert_eq!(graph.nodes_with_status(StatusText::Finished).len(), 1);
        assert_eq!(graph.node_groups().len(), 1);
    }

    #[test]
    fn malformed_graph_patch_is_rejected_whole() {
        let mut graph = sample();
        let before = graph.to_document();
        let err = graph
            .apply_graph_patch_json(&json!({
                "status": { "statusText": "finished" },
                "nodes": [{ "status": { "progress": 3 } }]
            }))
            .unwrap_err();
        assert!(matches!(err, GraphError::Format(_)));
        assert_eq!(graph.to_document(), before);
    }

    #[test]
    fn missing_children_are_not_at_any_depth() {
        let graph = WorkflowGraph::from_document(&json!({
            "id": "g",
            "nodes": [{ "id": "a" }],
            "edges": [{ "u": "a", "v": "ghost" }],
            "node_groups": [{ "id": "1", "children": ["optimized-a"] }]
        }))
        .unwrap();
        for depth in 0..=3 {
            assert!(graph.nodes_at(depth).iter().all(|n| n.id != "optimized-a"));
        }
        assert_eq!(graph.nodes_at(1).len(), 1);
        assert_eq!(graph.subgraphs_at(0), vec!["_root"]);
        assert_eq!(graph.subgraphs_at(1), vec!["1"]);

        let kinds: Vec<ReferenceKind> = graph.validate().iter().map(|w| w.kind).collect();
        assert_eq!(kinds, vec![ReferenceKind::EdgeTarget, ReferenceKind::GroupChild]);
    }

    #[test]
    fn representative_lookup() {
        let graph = sample();
        assert_eq!(graph.representative_of("1").map(|n| n.id.as_str()), Some("job1"));
        assert_eq!(graph.node_group_parent("1"), Some("_root"));
        assert_eq!(graph.max_depth(), 2);
    }
}
