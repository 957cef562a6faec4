//! Load, mutate and persist whole graph documents on behalf of the job
//! tools posting updates, plus the listing used by the job index page.

use std::fmt;

use serde_json::Value;
use tracing::{info, warn};

use crate::graph::{
    parse_patch, EdgePatch, EntityKind, GraphError, NodeGroupPatch, NodePatch, Upserted,
    WorkflowGraph,
};
use crate::graph_store::{GraphListing, GraphQuery, GraphStore, StoreError, LISTING_CAP};
use crate::p2j::{apply_sample_output, PlanPackage, SampleOutputList};

#[derive(Debug)]
pub enum ServiceError {
    Graph(GraphError),
    Store(StoreError),
    /// No stored graph has this id.
    NotFound(String),
}

impl From<GraphError> for ServiceError {
    fn from(err: GraphError) -> ServiceError {
        ServiceError::Graph(err)
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> ServiceError {
        ServiceError::Store(err)
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Graph(err) => write!(f, "{}", err),
            ServiceError::Store(err) => write!(f, "{}", err),
            ServiceError::NotFound(id) => write!(f, "no graph with id {}", id),
        }
    }
}

impl std::error::Error for ServiceError {}

pub type Result<T> = std::result::Result<T, ServiceError>;

pub struct GraphService {
    store: Box<dyn GraphStore + Send + Sync>,
    listing_cap: usize,
}

impl GraphService {
    pub fn new(store: Box<dyn GraphStore + Send + Sync>) -> Self {
        GraphService {
            store,
            listing_cap: LISTING_CAP,
        }
    }

    pub fn with_listing_cap(mut self, listing_cap: usize) -> Self {
        self.listing_cap = listing_cap;
        self
    }

    async fn persist(&self, graph: &WorkflowGraph) -> Result<()> {
        self.store.save(&graph.id, &graph.to_document()).await?;
        Ok(())
    }

    /// Ingest a submitted document and store it, replacing any graph with the
    /// same id.  Dangling references are logged but do not fail the request.
    pub async fn create_graph(&self, doc: &Value) -> Result<WorkflowGraph> {
        let graph = WorkflowGraph::from_document(doc)?;
        for warning in graph.validate() {
            warn!(graph = graph.id.as_str(), %warning, "dangling reference");
        }
        self.persist(&graph).await?;
        info!(
            graph = graph.id.as_str(),
            nodes = graph.nodes().len(),
            edges = graph.edges().len(),
            node_groups = graph.node_groups().len(),
            "created graph"
        );
        Ok(graph)
    }

    /// Translate a legacy plan package and store the resulting graph under the
    /// package's uuid.
    pub async fn import_plan(&self, package: &PlanPackage) -> Result<WorkflowGraph> {
        self.create_graph(&package.to_document()).await
    }

    /// Attach sampled output of map-reduce job `job_id` to the edges leaving
    /// that job.
    pub async fn add_sample_output(
        &self,
        id: &str,
        job_id: &str,
        samples: &SampleOutputList,
    ) -> Result<WorkflowGraph> {
        let (graph, updated) = self
            .mutate(id, |graph| apply_sample_output(graph, job_id, samples))
            .await?;
        info!(graph = id, job = job_id, edges = updated, "added sample output");
        Ok(graph)
    }

    pub async fn get_graph(&self, id: &str) -> Result<WorkflowGraph> {
        match self.store.get(id).await? {
            Some(doc) => Ok(WorkflowGraph::from_document(&doc)?),
            None => Err(ServiceError::NotFound(id.to_string())),
        }
    }

    /// Load `id`, apply `mutate`, bump `updated_at` and write the whole graph
    /// back.  Nothing is written if `mutate` fails.
    async fn mutate<T, F>(&self, id: &str, mutate: F) -> Result<(WorkflowGraph, T)>
    where
        F: FnOnce(&mut WorkflowGraph) -> std::result::Result<T, GraphError>,
    {
        let mut graph = self.get_graph(id).await?;
        let outcome = mutate(&mut graph)?;
        graph.touch();
        self.persist(&graph).await?;
        Ok((graph, outcome))
    }

    pub async fn update_node(
        &self,
        id: &str,
        node_id: &str,
        patch: &Value,
    ) -> Result<WorkflowGraph> {
        let patch: NodePatch = parse_patch(EntityKind::Node, patch)?;
        let (graph, outcome) = self
            .mutate(id, |graph| graph.upsert_node(node_id, &patch))
            .await?;
        info!(graph = id, node = node_id, created = outcome == Upserted::Created, "updated node");
        Ok(graph)
    }

    pub async fn update_node_group(
        &self,
        id: &str,
        group_id: &str,
        patch: &Value,
    ) -> Result<WorkflowGraph> {
        let patch: NodeGroupPatch = parse_patch(EntityKind::NodeGroup, patch)?;
        let (graph, outcome) = self
            .mutate(id, |graph| graph.upsert_node_group(group_id, &patch))
            .await?;
        info!(
            graph = id,
            node_group = group_id,
            created = outcome == Upserted::Created,
            "updated node group"
        );
        Ok(graph)
    }

    pub async fn update_edge(
        &self,
        id: &str,
        u: &str,
        v: &str,
        patch: &Value,
    ) -> Result<WorkflowGraph> {
        let patch: EdgePatch = parse_patch(EntityKind::Edge, patch)?;
        let (graph, outcome) = self
            .mutate(id, |graph| graph.upsert_edge(u, v, &patch))
            .await?;
        info!(graph = id, u, v, created = outcome == Upserted::Created, "updated edge");
        Ok(graph)
    }

    /// Apply a whole-graph status patch.
    pub async fn update_graph(&self, id: &str, patch: &Value) -> Result<WorkflowGraph> {
        let (graph, ()) = self
            .mutate(id, |graph| graph.apply_graph_patch_json(patch))
            .await?;
        info!(
            graph = id,
            status = ?graph.status.status_text,
            progress = graph.status.progress,
            "updated graph"
        );
        Ok(graph)
    }

    pub async fn list_graphs(&self, query: &GraphQuery) -> Result<GraphListing> {
        let mut query = query.clone();
        query.max = query.page_size(self.listing_cap);
        Ok(self.store.search(&query).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::StatusText;
    use crate::graph_store::{ErrorLayer, LocalStore};
    use crate::utils::temp_dir::TempDir;
    use serde_json::json;

    fn service(dir: &TempDir) -> GraphService {
        GraphService::new(Box::new(LocalStore::new(&**dir)))
    }

    fn submitted() -> Value {
        json!({
            "id": "job-1",
            "name": "nightly rollup",
            "properties": { "user": "amy" },
            "status": { "progress": 0, "statusText": "running" },
            "nodes": [{ "id": "a" }, { "id": "b" }],
            "edges": [{ "u": "a", "v": "b" }, { "u": "b", "v": "ghost" }]
        })
    }

    #[tokio::test]
    async fn create_then_get() {
        let dir = TempDir::new("plangraph-service-create").unwrap();
        let service = service(&dir);
        let created = service.create_graph(&submitted()).await.unwrap();
        assert_eq!(created.validate().len(), 1);

        let loaded = service.get_graph("job-1").await.unwrap();
        assert_eq!(loaded.name, "nightly rollup");
        assert_eq!(loaded.nodes().len(), 2);
        assert!(loaded.edge("a", "b").is_some());

        match service.get_graph("job-2").await {
            Err(ServiceError::NotFound(id)) => assert_eq!(id, "job-2"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_documents_are_not_stored() {
        let dir = TempDir::new("plangraph-service-malformed").unwrap();
        let service = service(&dir);
        let err = service
            .create_graph(&json!({ "id": "x", "nodes": [] }))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Graph(GraphError::Format(_))));
        assert!(matches!(service.get_graph("x").await, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn node_updates_persist_and_bump_updated_at() {
        let dir = TempDir::new("plangraph-service-update-node").unwrap();
        let service = service(&dir);
        let mut doc = submitted();
        doc["updated_at"] = json!(1);
        service.create_graph(&doc).await.unwrap();

        service
            .update_node("job-1", "a", &json!({ "status": { "statusText": "failed" } }))
            .await
            .unwrap();
        service
            .update_node("job-1", "c", &json!({ "id": "c", "properties": { "alias": "c" } }))
            .await
            .unwrap();

        let loaded = service.get_graph("job-1").await.unwrap();
        assert!(loaded.node("a").unwrap().status.is(StatusText::Failed));
        assert_eq!(loaded.node("c").unwrap().property_str("alias"), Some("c"));
        assert!(loaded.updated_at > 1);
    }

    #[tokio::test]
    async fn failed_upsert_writes_nothing() {
        let dir = TempDir::new("plangraph-service-noop").unwrap();
        let service = service(&dir);
        service.create_graph(&submitted()).await.unwrap();
        let before = service.store.get("job-1").await.unwrap();

        let err = service
            .update_node_group("job-1", "stage-1", &json!({ "status": { "progress": 5 } }))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Graph(GraphError::PatchNoOp(_))));
        let err = service
            .update_edge("job-1", "a", "c", &json!({ "label": 3 }))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Graph(GraphError::Format(_))));

        let after = service.store.get("job-1").await.unwrap();
        assert!(before.is_some());
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn graph_patch_and_listing() {
        let dir = TempDir::new("plangraph-service-listing").unwrap();
        let service = service(&dir).with_listing_cap(1);
        service.create_graph(&submitted()).await.unwrap();
        let mut other = submitted();
        other["id"] = json!("job-2");
        other["name"] = json!("weekly report");
        service.create_graph(&other).await.unwrap();

        service
            .update_graph(
                "job-1",
                &json!({
                    "status": { "progress": 100, "statusText": "finished" },
                    "nodes": [{ "id": "a", "status": { "progress": 100 } }]
                }),
            )
            .await
            .unwrap();

        let finished = service
            .list_graphs(&GraphQuery {
                status: Some("finished".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(finished.total, 1);
        assert_eq!(finished.items[0].id, "job-1");
        assert_eq!(finished.items[0].user, "amy");
        assert_eq!(finished.items[0].progress, 100);

        let all = service.list_graphs(&GraphQuery::default()).await.unwrap();
        assert_eq!(all.total, 2);
        assert_eq!(all.items.len(), 1);
    }

    #[tokio::test]
    async fn unusable_ids_surface_store_errors() {
        let dir = TempDir::new("plangraph-service-bad-id").unwrap();
        let service = service(&dir);
        let mut doc = submitted();
        doc["id"] = json!("../escape");
        match service.create_graph(&doc).await {
            Err(ServiceError::Store(StoreError::StickyProblem(details))) => {
                assert_eq!(details.layer, ErrorLayer::BadInput)
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
