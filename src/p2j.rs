//! Legacy plan packages.
//!
//! Older Pig listeners post a package holding the optimized and unoptimized
//! logical plans of a script plus the status of every map-reduce job.  This
//! module reads that package and turns it into a graph document:
//!
//! - every logical operator becomes a `PigNode` with id `<plan>-<uid>`;
//! - operators of one map-reduce job share a node group, represented by a
//!   node named after the job scope (`<plan>-<jobId>`);
//! - the job groups of each plan hang under an `optimized` or `unoptimized`
//!   node;
//! - job status becomes node group status;
//! - an edge leaving a job carries that job's sampled output, if any.

use std::collections::{BTreeMap, HashMap};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use tracing::{trace, warn};

use crate::graph::entities::DEFAULT_NODE_TYPE;
use crate::graph::errors::Result;
use crate::graph::{now_millis, EdgePatch, EntityKind, GraphError, WorkflowGraph, MAX_PROGRESS};

pub const OPTIMIZED: &str = "optimized";
pub const UNOPTIMIZED: &str = "unoptimized";

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanPackage {
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default)]
    pub optimized: Plan,
    #[serde(default)]
    pub unoptimized: Plan,
    #[serde(default)]
    pub status: PlanStatus,
    #[serde(default)]
    pub scripts: Scripts,
    /// Sampled output keyed by map-reduce job id.
    #[serde(default)]
    pub sample_output_map: BTreeMap<String, SampleOutputList>,
}

/// One logical plan.  Operators keep the order the producer sent them in.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Plan {
    #[serde(
        default,
        deserialize_with = "operators_in_order",
        serialize_with = "operators_as_map"
    )]
    pub plan: Vec<(String, Operator)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svg: Option<String>,
}

fn operators_in_order<'de, D>(deserializer: D) -> std::result::Result<Vec<(String, Operator)>, D::Error>
where
    D: Deserializer<'de>,
{
    Map::<String, Value>::deserialize(deserializer)?
        .into_iter()
        .map(|(key, op)| {
            serde_json::from_value(op)
                .map(|op| (key.clone(), op))
                .map_err(|err| de::Error::custom(format!("operator {}: {}", key, err)))
        })
        .collect()
}

fn operators_as_map<S>(plan: &[(String, Operator)], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_map(plan.iter().map(|(key, op)| (key, op)))
}

/// A logical relational operator.  Fields that only some operators carry
/// (filter expressions, load/store targets, limits, grouping and join keys)
/// are optional.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Operator {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default)]
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_reduce: Option<MapReduceStage>,
    #[serde(default)]
    pub predecessors: Vec<String>,
    #[serde(default)]
    pub successors: Vec<String>,
    #[serde(default)]
    pub schema: Vec<SchemaElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Join>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<Join>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, rename = "macro", skip_serializing_if = "Option::is_none")]
    pub macros: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapReduceStage {
    #[serde(default)]
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_type: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaElement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schema_elements: Vec<SchemaElement>,
}

impl SchemaElement {
    /// `{alias, type}`, plus a nested `schema` for bags and tuples.
    pub fn to_property(&self) -> Value {
        let mut column = json!({ "alias": self.alias, "type": self.field_type });
        if !self.schema_elements.is_empty() {
            column["schema"] = Value::Array(self.schema_elements.iter().map(Self::to_property).collect());
        }
        column
    }
}

/// Grouping or join keys: relation alias to the fields it is keyed on.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Join {
    #[serde(default)]
    pub expression: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub join_type: Option<String>,
}

impl Join {
    pub fn to_property(&self) -> Value {
        let by: Vec<Value> = self
            .expression
            .iter()
            .map(|(alias, expression)| {
                json!({
                    "alias": alias,
                    "fields": expression.get("fields").cloned().unwrap_or(Value::Null),
                })
            })
            .collect();
        json!({ "by": by, "strategy": self.strategy, "type": self.join_type })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(default)]
    pub job_status_map: BTreeMap<String, JobStatus>,
}

impl PlanStatus {
    /// Graph-level status holding only the fields the package supplied.
    pub fn to_status(&self) -> Value {
        let mut status = Map::new();
        let mut put = |key: &str, value: Option<Value>| {
            if let Some(value) = value {
                status.insert(key.to_string(), value);
            }
        };
        put("startTime", self.start_time.map(Value::from));
        put("endTime", self.end_time.map(Value::from));
        put("heartbeatTime", self.heartbeat_time.map(Value::from));
        put("progress", self.progress.map(Value::from));
        put("statusText", self.status_text.clone().map(Value::from));
        Value::Object(status)
    }

    fn job_in_scope(&self, job_id: &str) -> Option<&JobStatus> {
        self.job_status_map
            .values()
            .find(|job| job.scope.as_deref() == Some(job_id))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_url: Option<String>,
    #[serde(default, alias = "complete")]
    pub is_complete: bool,
    #[serde(default, alias = "successful")]
    pub is_successful: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce_progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_mappers: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_reducers: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_written: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_written: Option<i64>,
    #[serde(default)]
    pub counters: BTreeMap<String, CounterGroup>,
    #[serde(default)]
    pub warnings: BTreeMap<String, JobWarning>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct CounterGroup {
    #[serde(default)]
    pub counters: BTreeMap<String, i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobWarning {
    #[serde(default)]
    pub warning_attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_key: Option<String>,
}

impl JobStatus {
    pub fn status_text(&self) -> Option<&'static str> {
        if self.is_complete {
            Some(if self.is_successful { "finished" } else { "failed" })
        } else if self.finish_time.unwrap_or(0) > 0 {
            Some("finished")
        } else if self.map_progress.unwrap_or(0.0) > 0.0 {
            Some("running")
        } else {
            None
        }
    }

    /// Mean of map and reduce progress as a percentage; a successful job is
    /// always complete.
    pub fn progress(&self) -> u32 {
        if self.is_successful {
            return MAX_PROGRESS;
        }
        let mean = (self.map_progress.unwrap_or(0.0) + self.reduce_progress.unwrap_or(0.0)) / 2.0;
        (mean * 100.0).max(0.0).min(MAX_PROGRESS as f64) as u32
    }

    fn to_status(&self) -> Value {
        let mut status = json!({
            "startTime": self.start_time,
            "endTime": self.finish_time,
            "progress": self.progress(),
        });
        if let Some(text) = self.status_text() {
            status["statusText"] = Value::from(text);
        }
        status
    }

    fn to_properties(&self) -> Value {
        let counters: Map<String, Value> = self
            .counters
            .iter()
            .map(|(name, group)| (name.clone(), json!(group.counters)))
            .collect();
        let warnings: Map<String, Value> = self
            .warnings
            .iter()
            .map(|(name, warning)| (name.clone(), json!(warning)))
            .collect();
        json!({ "jobId": self.job_id, "counters": counters, "warnings": warnings })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Scripts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleOutputList {
    #[serde(default)]
    pub sample_output_list: Vec<SampleOutput>,
}

impl SampleOutputList {
    fn outputs(&self) -> Vec<Value> {
        self.sample_output_list
            .iter()
            .map(|sample| Value::from(sample.sample_output.clone()))
            .collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_string: Option<String>,
    /// Records separated by newlines, fields by `\u{1}`.
    #[serde(default)]
    pub sample_output: String,
}

fn package_error(err: serde_json::Error) -> GraphError {
    GraphError::format(EntityKind::Graph, format!("unreadable plan package: {}", err))
}

/// The job id half of a `<plan>-<jobId>` scope.
fn job_of_scope(scope: &str) -> &str {
    scope.splitn(2, '-').last().unwrap_or(scope)
}

/// What edge translation needs to know about an operator node.
struct Translated {
    scope: String,
    schema: Value,
    successors: Vec<String>,
}

impl Operator {
    /// The operator name as shown on a node: `LOFilter` becomes `FILTER`.
    pub fn operation(&self) -> String {
        self.operator.replace("LO", "").to_uppercase()
    }

    /// Whether this operator's schema is non-empty and equal to the schema of
    /// every predecessor that has one.
    fn schema_equals_predecessors(&self, by_key: &HashMap<&str, &Operator>) -> bool {
        if self.schema.is_empty() {
            return false;
        }
        self.predecessors
            .iter()
            .filter_map(|pred| by_key.get(pred.as_str()))
            .filter(|pred| !pred.schema.is_empty())
            .all(|pred| pred.schema == self.schema)
    }

    fn to_node(&self, prefix: &str, key: &str, schema_equals_pred: bool) -> (Value, Translated) {
        let uid = self.uid.as_deref().unwrap_or(key);
        let prefixed = |ids: &[String]| -> Vec<String> {
            ids.iter().map(|id| format!("{}-{}", prefix, id)).collect()
        };
        let job_id = self.map_reduce.as_ref().map(|mr| mr.job_id.as_str()).unwrap_or_default();
        let scope = format!("{}-{}", prefix, job_id);
        let schema = Value::Array(self.schema.iter().map(SchemaElement::to_property).collect());
        let successors = prefixed(&self.successors);

        let mut properties = Map::new();
        properties.insert("alias".to_string(), json!(self.alias));
        properties.insert("schema".to_string(), schema.clone());
        if let Some(location) = &self.location {
            properties.insert("location".to_string(), json!(location));
        }
        properties.insert("operation".to_string(), Value::from(self.operation()));
        properties.insert("scope".to_string(), Value::from(scope.clone()));
        properties.insert("successors".to_string(), json!(successors));
        properties.insert("predecessors".to_string(), json!(prefixed(&self.predecessors)));
        properties.insert(
            "step_type".to_string(),
            json!(self.map_reduce.as_ref().and_then(|mr| mr.step_type.as_ref())),
        );
        properties.insert("schema_equals_pred".to_string(), Value::from(schema_equals_pred));
        if let Some(expression) = &self.expression {
            properties.insert("expression".to_string(), Value::from(expression.clone()));
        }
        if let Some(function) = &self.storage_function {
            properties.insert("storage_function".to_string(), Value::from(function.clone()));
        }
        if let Some(location) = &self.storage_location {
            properties.insert("storage_location".to_string(), Value::from(location.clone()));
        }
        if let Some(limit) = self.row_limit {
            properties.insert("limit".to_string(), Value::from(limit));
        }
        if let Some(group) = &self.group {
            properties.insert("group".to_string(), group.to_property());
        }
        if let Some(join) = &self.join {
            properties.insert("join".to_string(), join.to_property());
        }

        let node = json!({
            "id": format!("{}-{}", prefix, uid),
            "type": DEFAULT_NODE_TYPE,
            "properties": properties,
        });
        (
            node,
            Translated {
                scope,
                schema,
                successors,
            },
        )
    }
}

impl PlanPackage {
    pub fn from_json(raw: &str) -> Result<PlanPackage> {
        serde_json::from_str(raw).map_err(package_error)
    }

    pub fn from_value(value: &Value) -> Result<PlanPackage> {
        PlanPackage::deserialize(value).map_err(package_error)
    }

    /// Record the sampled output of one map-reduce job, replacing any earlier
    /// sample for it.
    pub fn add_sample_output(&mut self, job_id: &str, samples: SampleOutputList) {
        self.sample_output_map.insert(job_id.to_string(), samples);
    }

    /// Build the graph document for this package.
    pub fn to_document(&self) -> Value {
        let mut nodes: Vec<Value> = vec![];
        let mut translated: Vec<(String, Translated)> = vec![];
        // Job scope to member node ids, in first-seen order.
        let mut scopes: Vec<(String, Vec<String>)> = vec![];
        let mut scope_index: HashMap<String, usize> = HashMap::new();

        for (prefix, plan) in [(OPTIMIZED, &self.optimized), (UNOPTIMIZED, &self.unoptimized)] {
            let by_key: HashMap<&str, &Operator> =
                plan.plan.iter().map(|(key, op)| (key.as_str(), op)).collect();
            for (key, op) in &plan.plan {
                let (node, info) = op.to_node(prefix, key, op.schema_equals_predecessors(&by_key));
                let node_id = node["id"].as_str().unwrap_or_default().to_string();
                let ix = *scope_index.entry(info.scope.clone()).or_insert_with(|| {
                    scopes.push((info.scope.clone(), vec![]));
                    scopes.len() - 1
                });
                scopes[ix].1.push(node_id.clone());
                nodes.push(node);
                translated.push((node_id, info));
            }
        }

        let mut node_groups: Vec<Value> = vec![];
        let mut plan_children: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for (ix, (scope, children)) in scopes.iter().enumerate() {
            let group_id = ix.to_string();
            nodes.push(json!({ "id": scope, "child": group_id }));

            let mut group = json!({ "id": group_id, "children": children });
            if let Some(job) = self.status.job_in_scope(job_of_scope(scope)) {
                group["status"] = job.to_status();
                if let Some(url) = &job.tracking_url {
                    group["url"] = Value::from(url.clone());
                }
                group["properties"] = job.to_properties();
            }
            node_groups.push(group);

            let plan = if scope.starts_with(OPTIMIZED) { OPTIMIZED } else { UNOPTIMIZED };
            plan_children.entry(plan).or_default().push(scope.clone());
        }
        for plan in [OPTIMIZED, UNOPTIMIZED] {
            let group_id = node_groups.len().to_string();
            nodes.push(json!({ "id": plan, "child": group_id }));
            node_groups.push(json!({
                "id": group_id,
                "children": plan_children.remove(plan).unwrap_or_default(),
            }));
        }

        let scope_of: HashMap<&str, &str> = translated
            .iter()
            .map(|(id, info)| (id.as_str(), info.scope.as_str()))
            .collect();
        let mut edges: Vec<Value> = vec![];
        for (node_id, info) in &translated {
            for successor in &info.successors {
                let successor_scope = match scope_of.get(successor.as_str()) {
                    Some(scope) => *scope,
                    None => {
                        warn!(node = node_id.as_str(), successor = successor.as_str(), "successor not in plan");
                        continue;
                    }
                };
                let mut edge = json!({ "u": node_id, "v": successor });
                if successor_scope != info.scope {
                    if let Some(samples) = self.sample_output_map.get(job_of_scope(&info.scope)) {
                        edge["properties"] = json!({
                            "schema": info.schema,
                            "sampleOutput": samples.outputs(),
                        });
                    }
                }
                edges.push(edge);
            }
        }
        trace!(
            uuid = self.uuid.as_str(),
            nodes = nodes.len(),
            edges = edges.len(),
            node_groups = node_groups.len(),
            "translated plan package"
        );

        let now = now_millis();
        let mut doc = json!({
            "id": self.uuid,
            "properties": {
                "userName": self.user_name,
                "script": self.scripts.script,
            },
            "status": self.status.to_status(),
            "nodes": nodes,
            "edges": edges,
            "node_groups": node_groups,
            "created_at": now,
            "updated_at": now,
        });
        if let Some(name) = &self.job_name {
            doc["name"] = Value::from(name.clone());
        }
        doc
    }

    pub fn to_graph(&self) -> Result<WorkflowGraph> {
        WorkflowGraph::from_document(&self.to_document())
    }
}

/// Attach one job's sampled output to every edge that leaves the job in an
/// already translated graph.  Returns how many edges were updated.
pub fn apply_sample_output(
    graph: &mut WorkflowGraph,
    job_id: &str,
    samples: &SampleOutputList,
) -> Result<usize> {
    let scope_of = |id: &str| -> Option<String> {
        graph
            .node(id)
            .and_then(|n| n.properties.get("scope"))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let leaving: Vec<(String, String, Value)> = graph
        .edges()
        .iter()
        .filter_map(|edge| {
            let from = scope_of(&edge.u)?;
            if job_of_scope(&from) != job_id || scope_of(&edge.v).as_deref() == Some(from.as_str()) {
                return None;
            }
            let schema = graph
                .node(&edge.u)
                .and_then(|n| n.properties.get("schema"))
                .cloned()
                .unwrap_or(Value::Null);
            Some((edge.u.clone(), edge.v.clone(), schema))
        })
        .collect();

    for (u, v, schema) in &leaving {
        let mut properties = Map::new();
        properties.insert("schema".to_string(), schema.clone());
        properties.insert("sampleOutput".to_string(), Value::Array(samples.outputs()));
        let patch = EdgePatch {
            properties: Some(properties),
            ..Default::default()
        };
        graph.upsert_edge(u, v, &patch)?;
    }
    Ok(leaving.len())
}
