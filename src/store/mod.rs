//! Durable task records and the read-only dashboard over them.

pub mod query;
pub mod task_store;

pub use query::{Dashboard, TaskMetricsView};
pub use task_store::{TaskStore, TaskStoreRecord, DETAIL_FILE, INDEX_FILE};
