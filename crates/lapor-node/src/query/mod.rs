//! Read-only query service over the replica set.
//!
//! Serves the paginated master list, by-id lookup, and per-category
//! statistics. Requests are spread across the replicas round-robin; the
//! query path never writes a replica.

mod handlers;
mod store;

pub use handlers::{router, ListParams, Pagination, QueryState};
pub use store::{CategoryStats, QueryStore, ReadModelRow, ReportFilter};
