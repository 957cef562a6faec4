use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::{EntityKind, GraphError, Result};
use super::status::{Status, StatusPatch};

pub const DEFAULT_NODE_TYPE: &str = "PigNode";
pub const DEFAULT_EDGE_TYPE: &str = "PigEdge";

/// Open, producer-defined attributes.
pub type Properties = Map<String, Value>;

/// One-level key-wise merge: keys in `patch` overwrite keys in `target`,
/// nested objects are replaced rather than merged.
pub fn merge_properties(target: &mut Properties, patch: &Properties) {
    for (key, value) in patch {
        target.insert(key.clone(), value.clone());
    }
}

/// Joins the endpoints of an edge id.  Node ids may not contain it, so every
/// edge id splits back into exactly one `(u, v)`.
pub const EDGE_ID_SEPARATOR: &str = "->";

/// The string id used for an edge when it has to be addressed on its own, for
/// example in highlight results.
pub fn edge_id(u: &str, v: &str) -> String {
    format!("{}{}{}", u, EDGE_ID_SEPARATOR, v)
}

/// Split an `edge_id` back into its endpoints.
pub fn split_edge_id(id: &str) -> Option<(&str, &str)> {
    let mut ends = id.splitn(2, EDGE_ID_SEPARATOR);
    match (ends.next(), ends.next()) {
        (Some(u), Some(v)) => Some((u, v)),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Node {
    pub id: String,
    pub properties: Properties,
    #[serde(rename = "type")]
    pub node_type: String,
    pub status: Status,
    /// Node group this node stands in for when collapsed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct NodePatch {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub properties: Option<Properties>,
    #[serde(default, rename = "type")]
    pub node_type: Option<String>,
    #[serde(default)]
    pub status: Option<StatusPatch>,
    #[serde(default)]
    pub child: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Node {
    pub fn new(id: impl Into<String>) -> Self {
        Node {
            id: id.into(),
            properties: Properties::new(),
            node_type: DEFAULT_NODE_TYPE.to_string(),
            status: Status::default(),
            child: None,
            url: None,
        }
    }

    /// Construct a node from a patch treated as a full document.
    pub fn from_patch(patch: &NodePatch) -> Result<Node> {
        let id = match &patch.id {
            Some(id) => id.clone(),
            None => {
                return Err(GraphError::patch_no_op(EntityKind::Node, "all nodes must have an id"))
            }
        };
        if id.contains(EDGE_ID_SEPARATOR) {
            return Err(GraphError::patch_no_op(
                EntityKind::Node,
                format!("node id {:?} contains {:?}", id, EDGE_ID_SEPARATOR),
            ));
        }
        Ok(Node {
            id,
            properties: patch.properties.clone().unwrap_or_default(),
            node_type: patch
                .node_type
                .clone()
                .unwrap_or_else(|| DEFAULT_NODE_TYPE.to_string()),
            status: patch.status.as_ref().map(Status::from_patch).unwrap_or_default(),
            child: patch.child.clone(),
            url: patch.url.clone(),
        })
    }

    /// Apply a partial update.  Returns true if the update touched something
    /// that affects layering (currently only `child`).
    pub fn update_with(&mut self, patch: &NodePatch) -> bool {
        let mut structural = false;
        if let Some(properties) = &patch.properties {
            merge_properties(&mut self.properties, properties);
        }
        if let Some(node_type) = &patch.node_type {
            self.node_type = node_type.clone();
        }
        if let Some(status) = &patch.status {
            self.status.update_with(status);
        }
        if let Some(child) = &patch.child {
            structural = self.child.as_ref() != Some(child);
            self.child = Some(child.clone());
        }
        if let Some(url) = &patch.url {
            self.url = Some(url.clone());
        }
        structural
    }

    pub fn has_child(&self) -> bool {
        self.child.is_some()
    }

    /// Look up a string property, mostly used for `alias`.
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Edge {
    pub u: String,
    pub v: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub properties: Properties,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct EdgePatch {
    #[serde(default)]
    pub u: Option<String>,
    #[serde(default)]
    pub v: Option<String>,
    #[serde(default, rename = "type")]
    pub edge_type: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub properties: Option<Properties>,
}

impl Edge {
    pub fn new(u: impl Into<String>, v: impl Into<String>) -> Self {
        Edge {
            u: u.into(),
            v: v.into(),
            edge_type: DEFAULT_EDGE_TYPE.to_string(),
            label: None,
            properties: Properties::new(),
        }
    }

    pub fn from_patch(patch: &EdgePatch) -> Result<Edge> {
        let (u, v) = match (&patch.u, &patch.v) {
            (Some(u), Some(v)) => (u.clone(), v.clone()),
            _ => {
                return Err(GraphError::patch_no_op(
                    EntityKind::Edge,
                    "all edges must have both u and v",
                ))
            }
        };
        if u.contains(EDGE_ID_SEPARATOR) || v.contains(EDGE_ID_SEPARATOR) {
            return Err(GraphError::patch_no_op(
                EntityKind::Edge,
                format!("edge endpoint in {:?} contains {:?}", edge_id(&u, &v), EDGE_ID_SEPARATOR),
            ));
        }
        Ok(Edge {
            u,
            v,
            edge_type: patch
                .edge_type
                .clone()
                .unwrap_or_else(|| DEFAULT_EDGE_TYPE.to_string()),
            label: patch.label.clone(),
            properties: patch.properties.clone().unwrap_or_default(),
        })
    }

    /// Endpoints are the edge's identity and are never rewritten by a patch.
    pub fn update_with(&mut self, patch: &EdgePatch) {
        if let Some(edge_type) = &patch.edge_type {
            self.edge_type = edge_type.clone();
        }
        if let Some(label) = &patch.label {
            self.label = Some(label.clone());
        }
        if let Some(properties) = &patch.properties {
            merge_properties(&mut self.properties, properties);
        }
    }

    pub fn id(&self) -> String {
        edge_id(&self.u, &self.v)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NodeGroup {
    pub id: String,
    pub children: Vec<String>,
    pub properties: Properties,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct NodeGroupPatch {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub children: Option<Vec<String>>,
    #[serde(default)]
    pub properties: Option<Properties>,
    #[serde(default)]
    pub status: Option<StatusPatch>,
    #[serde(default)]
    pub url: Option<String>,
}

impl NodeGroup {
    pub fn new(id: impl Into<String>, children: Vec<String>) -> Self {
        NodeGroup {
            id: id.into(),
            children,
            properties: Properties::new(),
            status: Status::default(),
            url: None,
        }
    }

    pub fn from_patch(patch: &NodeGroupPatch) -> Result<NodeGroup> {
        let id = match &patch.id {
            Some(id) => id.clone(),
            None => {
                return Err(GraphError::patch_no_op(
                    EntityKind::NodeGroup,
                    "all node groups must have an id",
                ))
            }
        };
        Ok(NodeGroup {
            id,
            children: patch.children.clone().unwrap_or_default(),
            properties: patch.properties.clone().unwrap_or_default(),
            status: patch.status.as_ref().map(Status::from_patch).unwrap_or_default(),
            url: patch.url.clone(),
        })
    }

    /// Returns true if the membership changed.
    pub fn update_with(&mut self, patch: &NodeGroupPatch) -> bool {
        let mut structural = false;
        if let Some(children) = &patch.children {
            structural = &self.children != children;
            self.children = children.clone();
        }
        if let Some(properties) = &patch.properties {
            merge_properties(&mut self.properties, properties);
        }
        if let Some(status) = &patch.status {
            self.status.update_with(status);
        }
        if let Some(url) = &patch.url {
            self.url = Some(url.clone());
        }
        structural
    }
}
