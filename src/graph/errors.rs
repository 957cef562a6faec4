use std::fmt;

/// Which kind of entity an error or warning is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Graph,
    Node,
    Edge,
    NodeGroup,
}

impl EntityKind {
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Graph => "graph",
            EntityKind::Node => "node",
            EntityKind::Edge => "edge",
            EntityKind::NodeGroup => "node_group",
        }
    }
}

/// Payload shared by the `GraphError` variants so callers can tell which
/// entity was being processed when things went wrong.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorDetails {
    pub entity: EntityKind,
    pub message: String,
}

/// Errors raised by graph ingestion and mutation.  No variant is ever returned
/// after state has been touched; a failed operation leaves the graph exactly
/// as it was.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GraphError {
    /// The inbound document or patch is malformed or incomplete.
    Format(ErrorDetails),
    /// An upsert targeted an unknown id and the patch could not stand on its
    /// own as a new entity.
    PatchNoOp(ErrorDetails),
}

pub type Result<T> = std::result::Result<T, GraphError>;

impl GraphError {
    pub fn format(entity: EntityKind, message: impl Into<String>) -> GraphError {
        GraphError::Format(ErrorDetails {
            entity,
            message: message.into(),
        })
    }

    pub fn patch_no_op(entity: EntityKind, message: impl Into<String>) -> GraphError {
        GraphError::PatchNoOp(ErrorDetails {
            entity,
            message: message.into(),
        })
    }

    pub fn details(&self) -> &ErrorDetails {
        match self {
            GraphError::Format(details) | GraphError::PatchNoOp(details) => details,
        }
    }
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::Format(d) => write!(f, "malformed {}: {}", d.entity.name(), d.message),
            GraphError::PatchNoOp(d) => {
                write!(f, "cannot create {} from patch: {}", d.entity.name(), d.message)
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Kinds of dangling or inconsistent references found in a graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    EdgeSource,
    EdgeTarget,
    GroupChild,
    NodeChild,
    GroupCycle,
    UnplacedNode,
}

/// A recoverable data-integrity problem.  These are logged and reported, never
/// raised.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReferenceWarning {
    pub kind: ReferenceKind,
    /// Id of the entity holding the reference (an edge id for edges).
    pub owner: String,
    /// The id that could not be resolved.
    pub missing: String,
}

impl fmt::Display for ReferenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ReferenceKind::EdgeSource => {
                write!(f, "edge {} starts at unknown node {}", self.owner, self.missing)
            }
            ReferenceKind::EdgeTarget => {
                write!(f, "edge {} ends at unknown node {}", self.owner, self.missing)
            }
            ReferenceKind::GroupChild => {
                write!(f, "node group {} lists unknown child node {}", self.owner, self.missing)
            }
            ReferenceKind::NodeChild => {
                write!(f, "node {} points at unknown node group {}", self.owner, self.missing)
            }
            ReferenceKind::GroupCycle => {
                write!(f, "node {} re-enters node group {}", self.owner, self.missing)
            }
            ReferenceKind::UnplacedNode => {
                write!(f, "node {} is not reachable from {}", self.owner, self.missing)
            }
        }
    }
}
