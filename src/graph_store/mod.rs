mod local_store;
mod store_interface;

pub use local_store::{make_local_store, LocalStore};
pub use store_interface::{
    ErrorDetails, ErrorLayer, GraphListing, GraphQuery, GraphStore, GraphSummary, Result,
    SortKey, SortOrder, StoreError, DEFAULT_LISTING_MAX, LISTING_CAP,
};
