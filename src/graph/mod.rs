pub mod entities;
pub mod errors;
pub mod layering;
pub mod predecessors;
pub mod projection;
pub mod status;
pub mod workflow_graph;

pub use entities::{Edge, EdgePatch, Node, NodeGroup, NodeGroupPatch, NodePatch, Properties};
pub use errors::{EntityKind, GraphError, ReferenceKind, ReferenceWarning};
pub use layering::{Layout, Placement, ROOT_GROUP_ID};
pub use status::{Status, StatusPatch, StatusText, MAX_PROGRESS};
pub use workflow_graph::{
    parse_patch, EntityStatusPatch, GraphEvent, GraphObserver, GraphPatch, Upserted, WorkflowGraph,
};

/// Current time as epoch milliseconds, the unit every timestamp in a graph
/// document uses.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
