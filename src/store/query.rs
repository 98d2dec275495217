//! Dashboard queries.
//!
//! Every query re-reads the store files so an external process sees the
//! same view as the queue that owns the tasks.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::task::{Task, TaskId, TaskMetrics, TaskStatus, TaskSummary};
use crate::error::Result;
use crate::store::TaskStore;
use crate::util;

/// Metrics of one task as shown on the dashboard.
///
/// `metrics` stays `None` until the decomposition stage has finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMetricsView {
    pub id: TaskId,
    pub status: TaskStatus,
    pub metrics: Option<TaskMetrics>,
}

#[derive(Debug, Clone)]
pub struct Dashboard {
    store: Arc<TaskStore>,
}

impl Dashboard {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self { store }
    }

    pub async fn get_task_summary(&self, id: TaskId) -> Result<Option<TaskSummary>> {
        let store = Arc::clone(&self.store);
        util::blocking(move || Ok(store.read_index()?.remove(&id))).await
    }

    /// All tasks, oldest first.
    pub async fn list_tasks(&self) -> Result<Vec<TaskSummary>> {
        let store = Arc::clone(&self.store);
        util::blocking(move || {
            let mut tasks: Vec<TaskSummary> = store.read_index()?.into_values().collect();
            tasks.sort_by_key(|t| (t.created_at, t.id));
            Ok(tasks)
        })
        .await
    }

    pub async fn get_task_detail(&self, id: TaskId) -> Result<Option<Task>> {
        let store = Arc::clone(&self.store);
        util::blocking(move || {
            let Some(summary) = store.read_index()?.remove(&id) else {
                return Ok(None);
            };
            match summary.project_dir {
                Some(dir) => store.read_detail(&dir),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn get_task_metrics(&self, id: TaskId) -> Result<Option<TaskMetricsView>> {
        if let Some(task) = self.get_task_detail(id).await? {
            return Ok(Some(TaskMetricsView {
                id,
                status: task.status,
                metrics: task.metrics,
            }));
        }
        Ok(self.get_task_summary(id).await?.map(|summary| TaskMetricsView {
            id,
            status: summary.status,
            metrics: None,
        }))
    }
}
