use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::MAX_PROGRESS;

pub type Result<T> = std::result::Result<T, StoreError>;

// JSON parse errors are sticky data problems.
impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> StoreError {
        StoreError::StickyProblem(ErrorDetails {
            layer: ErrorLayer::DataLayer,
            message: err.to_string(),
        })
    }
}

// I/O errors may or may not go away on retry.
impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> StoreError {
        StoreError::TransientProblem(ErrorDetails {
            layer: ErrorLayer::StoreLayer,
            message: err.to_string(),
        })
    }
}

/// Express whether the error seems to be happening in the store or the data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorLayer {
    /// The request can't be served as asked, like a graph id that would
    /// escape the store directory.
    BadInput,
    /// The storage backend itself misbehaved.
    StoreLayer,
    /// The stored document is damaged or not a graph.
    DataLayer,
    UnknownLayer,
}

/// StoreError payload describing what went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetails {
    pub layer: ErrorLayer,
    /// Stringified version of the lower level error.
    pub message: String,
}

/// Does a retry make sense or not?
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Will keep failing for this document.
    StickyProblem(ErrorDetails),
    /// Might go away if retried later.
    TransientProblem(ErrorDetails),
    Unsupported,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::StickyProblem(d) => write!(f, "{:?} problem: {}", d.layer, d.message),
            StoreError::TransientProblem(d) => {
                write!(f, "transient {:?} problem: {}", d.layer, d.message)
            }
            StoreError::Unsupported => write!(f, "operation not supported by this store"),
        }
    }
}

impl std::error::Error for StoreError {}

pub const DEFAULT_LISTING_MAX: usize = 10;
pub const LISTING_CAP: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::Desc
    }
}

/// Filters, sort and page for `GraphStore::search`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphQuery {
    /// Substring matched against the graph's name and user.
    pub search: Option<String>,
    /// Only graphs whose `status.statusText` equals this.
    pub status: Option<String>,
    /// Listing field to sort on.
    pub sort: String,
    pub order: SortOrder,
    pub offset: usize,
    pub max: usize,
}

impl Default for GraphQuery {
    fn default() -> Self {
        GraphQuery {
            search: None,
            status: None,
            sort: "updated_at".to_string(),
            order: SortOrder::Desc,
            offset: 0,
            max: DEFAULT_LISTING_MAX,
        }
    }
}

impl GraphQuery {
    /// Page size after applying the cap.
    pub fn page_size(&self, cap: usize) -> usize {
        self.max.min(cap)
    }
}

/// One row of a graph listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub id: String,
    pub name: String,
    pub user: String,
    pub progress: u32,
    pub status_text: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Stored progress as a listing value, clamped to a percentage.
fn listed_progress(value: &Value) -> Option<u32> {
    let progress = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    Some(progress.min(MAX_PROGRESS as u64) as u32)
}

impl GraphSummary {
    /// Summarize a stored graph document.  Missing fields get the listing
    /// defaults (`Unknown` user, `running`, zero progress).
    pub fn from_document(doc: &Value) -> GraphSummary {
        let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);
        let status = doc.get("status");
        GraphSummary {
            id: text(doc.get("id")).unwrap_or_default(),
            name: text(doc.get("name")).unwrap_or_default(),
            user: text(doc.get("user"))
                .or_else(|| text(doc.pointer("/properties/user")))
                .or_else(|| text(doc.pointer("/properties/userName")))
                .unwrap_or_else(|| "Unknown".to_string()),
            progress: status
                .and_then(|s| s.get("progress"))
                .and_then(listed_progress)
                .unwrap_or(0),
            status_text: text(status.and_then(|s| s.get("statusText")))
                .unwrap_or_else(|| "running".to_string()),
            created_at: doc.get("created_at").and_then(Value::as_i64).unwrap_or(0),
            updated_at: doc.get("updated_at").and_then(Value::as_i64).unwrap_or(0),
        }
    }

    /// Value of a sortable listing field.
    pub fn sort_key(&self, field: &str) -> SortKey<'_> {
        match field {
            "created_at" => SortKey::Number(self.created_at),
            "updated_at" => SortKey::Number(self.updated_at),
            "progress" => SortKey::Number(self.progress as i64),
            "id" => SortKey::Text(&self.id),
            "name" => SortKey::Text(&self.name),
            "user" => SortKey::Text(&self.user),
            "status_text" | "status.statusText" => SortKey::Text(&self.status_text),
            _ => SortKey::Number(self.updated_at),
        }
    }

    pub fn matches(&self, query: &GraphQuery) -> bool {
        if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
            if !self.name.contains(search) && !self.user.contains(search) {
                return false;
            }
        }
        if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
            if self.status_text != status {
                return false;
            }
        }
        true
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SortKey<'a> {
    Number(i64),
    Text(&'a str),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphListing {
    #[serde(rename = "jobs")]
    pub items: Vec<GraphSummary>,
    #[serde(rename = "jobsTotal")]
    pub total: usize,
}

/// Where graph documents live.  Documents are stored and returned whole; the
/// store is the only arbiter between concurrent writers and the last write
/// wins.
///
/// Implementations run inside a tokio runtime and must not block it.
#[async_trait]
pub trait GraphStore {
    /// Fetch a graph document, `None` if there is none with that id.
    async fn get(&self, id: &str) -> Result<Option<Value>>;

    async fn save(&self, id: &str, doc: &Value) -> Result<()>;

    async fn search(&self, query: &GraphQuery) -> Result<GraphListing>;
}
