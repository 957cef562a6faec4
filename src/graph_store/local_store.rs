use std::cmp::Ordering;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use async_trait::async_trait;
use serde_json::{from_str, to_string_pretty, Value};
use tokio::fs;
use tracing::{trace, warn};

use super::store_interface::{
    ErrorDetails, ErrorLayer, GraphListing, GraphQuery, GraphStore, GraphSummary, Result,
    SortOrder, StoreError, LISTING_CAP,
};

/// Distinguishes the temp files of saves that are in flight at the same time.
static SAVE_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Graph documents kept as `<root>/<id>.json`, one pretty-printed file per
/// graph.  Searching scans the whole directory, which is fine for the few
/// hundred graphs a developer machine sees.
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    listing_cap: usize,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        LocalStore {
            root: root.as_ref().to_path_buf(),
            listing_cap: LISTING_CAP,
        }
    }

    pub fn with_listing_cap(mut self, listing_cap: usize) -> Self {
        self.listing_cap = listing_cap;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        let bad = id.is_empty()
            || id.starts_with('.')
            || id.contains('/')
            || id.contains('\\')
            || id.contains('\0');
        if bad {
            return Err(StoreError::StickyProblem(ErrorDetails {
                layer: ErrorLayer::BadInput,
                message: format!("unusable graph id: {:?}", id),
            }));
        }
        Ok(self.root.join(format!("{}.json", id)))
    }

    /// A temp file name no other in-flight save uses. The leading dot and the
    /// `.tmp` extension keep it out of `read_summaries`.
    fn temp_path_for(&self, id: &str) -> PathBuf {
        let n = SAVE_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
        self.root
            .join(format!(".{}.json.{}.{}.tmp", id, process::id(), n))
    }

    async fn read_summaries(&self) -> Result<Vec<GraphSummary>> {
        let mut summaries = vec![];
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            // Nothing saved yet.
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(summaries),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read_to_string(&path).await?;
            match from_str::<Value>(&raw) {
                Ok(doc) => summaries.push(GraphSummary::from_document(&doc)),
                Err(err) => warn!(path = %path.display(), %err, "skipping unreadable graph document"),
            }
        }
        Ok(summaries)
    }
}

#[async_trait]
impl GraphStore for LocalStore {
    async fn get(&self, id: &str) -> Result<Option<Value>> {
        let path = self.path_for(id)?;
        match fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(from_str(&raw)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, id: &str, doc: &Value) -> Result<()> {
        let path = self.path_for(id)?;
        fs::create_dir_all(&self.root).await?;
        // Write then rename so a reader never sees half a document.
        let tmp_path = self.temp_path_for(id);
        let written = match fs::write(&tmp_path, to_string_pretty(doc)?).await {
            Ok(()) => fs::rename(&tmp_path, &path).await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        trace!(id, path = %path.display(), "saved graph");
        Ok(())
    }

    async fn search(&self, query: &GraphQuery) -> Result<GraphListing> {
        let mut items: Vec<GraphSummary> = self
            .read_summaries()
            .await?
            .into_iter()
            .filter(|s| s.matches(query))
            .collect();

        items.sort_by(|a, b| {
            let by_key = a.sort_key(&query.sort).cmp(&b.sort_key(&query.sort));
            let by_key = match query.order {
                SortOrder::Asc => by_key,
                SortOrder::Desc => by_key.reverse(),
            };
            match by_key {
                Ordering::Equal => a.id.cmp(&b.id),
                other => other,
            }
        });

        let total = items.len();
        let items = items
            .into_iter()
            .skip(query.offset)
            .take(query.page_size(self.listing_cap))
            .collect();
        Ok(GraphListing { items, total })
    }
}

/// Boxed store rooted at `root`, for callers that only care about the trait.
pub fn make_local_store<P: AsRef<Path>>(root: P) -> Box<dyn GraphStore + Send + Sync> {
    Box::new(LocalStore::new(root))
}
