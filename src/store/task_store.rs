//! Durable task store.
//!
//! Layout under the store root:
//! - `tasks_index.json`: task id -> `TaskSummary`, read on every dashboard poll
//! - `<project-slug>-<short id>/status.json`: full `Task` detail, next to
//!   the other artifacts of that task
//!
//! Every file is replaced atomically (write to `*.tmp`, then rename), so a
//! crash can leave a stale record but never a torn one.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::DEFAULT_STORE_RETRY_BACKOFF_MS;
use crate::core::task::{Job, Task, TaskId, TaskSummary};
use crate::error::{Error, Result};
use crate::util::project_slug;

pub const INDEX_FILE: &str = "tasks_index.json";
pub const DETAIL_FILE: &str = "status.json";

type Index = BTreeMap<TaskId, TaskSummary>;

/// Durable projection of a task: its index entry and, when readable, its
/// detail record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStoreRecord {
    pub summary: TaskSummary,
    pub detail: Option<Task>,
}

impl TaskStoreRecord {
    /// Rebuild the in-memory task.
    ///
    /// Without a detail record only the summary fields survive; the job
    /// payload is lost, so such a task cannot be re-run.
    pub fn into_task(self) -> Task {
        if let Some(task) = self.detail {
            return task;
        }
        let s = self.summary;
        let mut task = Task::new(Job::new(&s.title, ""));
        task.id = s.id;
        task.status = s.status;
        task.created_at = s.created_at;
        task.updated_at = s.updated_at;
        task.project_dir = s.project_dir;
        task.error = s.error;
        task
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("json.tmp");
    let mut file = File::create(&temp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    fs::rename(&temp_path, path)
}

/// File-backed task store. Shared between workers behind an `Arc`.
#[derive(Debug)]
pub struct TaskStore {
    root: PathBuf,
    retry_backoff: Duration,
    /// In-memory copy of the index; the lock also serializes index rewrites.
    index: Mutex<Index>,
    /// One lock per task id so writes for the same task never overlap.
    task_locks: Mutex<HashMap<TaskId, Arc<Mutex<()>>>>,
}

impl TaskStore {
    /// Open (or create) a store rooted at `root`.
    ///
    /// # Errors
    /// Fails if the root cannot be created or the index exists but is corrupt.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        let index = read_index_file(&root.join(INDEX_FILE))?;
        tracing::debug!(root = %root.display(), tasks = index.len(), "TaskStore::open");
        Ok(Self {
            root: root.to_path_buf(),
            retry_backoff: Duration::from_millis(DEFAULT_STORE_RETRY_BACKOFF_MS),
            index: Mutex::new(index),
            task_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// Per-task project directory: `<root>/<slug>-<short id>`.
    pub fn project_dir_for(&self, task: &Task) -> PathBuf {
        self.root
            .join(format!("{}-{}", project_slug(&task.job.title), task.id.short()))
    }

    fn detail_path(&self, task: &Task) -> PathBuf {
        task.project_dir
            .clone()
            .unwrap_or_else(|| self.project_dir_for(task))
            .join(DETAIL_FILE)
    }

    fn task_lock(&self, id: TaskId) -> Arc<Mutex<()>> {
        Arc::clone(lock(&self.task_locks).entry(id).or_default())
    }

    /// Run a write, retrying once after the backoff.
    fn with_retry(&self, path: &Path, op: impl Fn() -> io::Result<()>) -> Result<()> {
        match op() {
            Ok(()) => Ok(()),
            Err(first) => {
                tracing::warn!(path = %path.display(), error = %first, "store write failed, retrying");
                std::thread::sleep(self.retry_backoff);
                op().map_err(|e| Error::StoreWrite {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn write_index(&self, index: &Index) -> Result<()> {
        let contents = serde_json::to_vec_pretty(index)?;
        let path = self.index_path();
        self.with_retry(&path, || write_atomic(&path, &contents))
    }

    /// Persist a task: detail record first, then its index entry.
    ///
    /// Blocks the calling thread; async callers go through `util::blocking`.
    ///
    /// # Errors
    /// `Error::StoreWrite` when a write still fails after one retry.
    pub fn save(&self, task: &Task) -> Result<()> {
        let task_lock = self.task_lock(task.id);
        let _guard = lock(&task_lock);

        let detail_path = self.detail_path(task);
        let contents = serde_json::to_vec_pretty(task)?;
        self.with_retry(&detail_path, || write_atomic(&detail_path, &contents))?;

        let mut index = lock(&self.index);
        let previous = index.insert(task.id, task.summary());
        if let Err(e) = self.write_index(&index) {
            match previous {
                Some(summary) => {
                    index.insert(task.id, summary);
                }
                None => {
                    // a task the index never held must not come back via orphan recovery
                    index.remove(&task.id);
                    let _ = fs::remove_file(&detail_path);
                }
            }
            return Err(e);
        }
        tracing::debug!(task = %task.id.short(), status = %task.status, "task saved");
        Ok(())
    }

    /// Delete a task's records. Used when a queued task is cancelled.
    pub fn remove(&self, id: TaskId) -> Result<()> {
        let task_lock = self.task_lock(id);
        let _guard = lock(&task_lock);

        let mut index = lock(&self.index);
        let Some(summary) = index.remove(&id) else {
            return Err(Error::TaskNotFound(id.to_string()));
        };
        self.write_index(&index)?;
        drop(index);

        if let Some(dir) = summary.project_dir {
            let detail = dir.join(DETAIL_FILE);
            if detail.exists() {
                fs::remove_file(&detail)?;
            }
            // only an otherwise empty directory is removed
            let _ = fs::remove_dir(&dir);
        }
        lock(&self.task_locks).remove(&id);
        tracing::debug!(task = %id.short(), "task removed from store");
        Ok(())
    }

    /// Read the index from disk.
    pub fn read_index(&self) -> Result<Index> {
        read_index_file(&self.index_path())
    }

    /// Read a detail record, `None` if absent.
    pub fn read_detail(&self, project_dir: &Path) -> Result<Option<Task>> {
        let path = project_dir.join(DETAIL_FILE);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&fs::read_to_string(&path)?)?))
    }

    fn read_detail_lenient(&self, project_dir: &Path) -> Option<Task> {
        match self.read_detail(project_dir) {
            Ok(detail) => detail,
            Err(e) => {
                tracing::warn!(dir = %project_dir.display(), error = %e, "unreadable task detail");
                None
            }
        }
    }

    /// Load every task known to the store, oldest first.
    ///
    /// Detail records whose task is missing from the index (a crash between
    /// the detail and index writes) are recovered as well.
    ///
    /// # Errors
    /// Fails if the index is corrupt or the root cannot be listed.
    pub fn load_all(&self) -> Result<Vec<TaskStoreRecord>> {
        let index = self.read_index()?;
        let mut records: Vec<TaskStoreRecord> = index
            .values()
            .map(|summary| TaskStoreRecord {
                detail: summary
                    .project_dir
                    .as_deref()
                    .and_then(|dir| self.read_detail_lenient(dir)),
                summary: summary.clone(),
            })
            .collect();

        for entry in fs::read_dir(&self.root)? {
            let dir = entry?.path();
            if !dir.is_dir() {
                continue;
            }
            if let Some(task) = self.read_detail_lenient(&dir) {
                if !index.contains_key(&task.id) {
                    tracing::warn!(task = %task.id.short(), "recovered task missing from index");
                    records.push(TaskStoreRecord {
                        summary: task.summary(),
                        detail: Some(task),
                    });
                }
            }
        }

        records.sort_by_key(|r| (r.summary.created_at, r.summary.id));
        *lock(&self.index) = records.iter().map(|r| (r.summary.id, r.summary.clone())).collect();
        tracing::info!(tasks = records.len(), root = %self.root.display(), "task store loaded");
        Ok(records)
    }
}

fn read_index_file(path: &Path) -> Result<Index> {
    if !path.exists() {
        return Ok(Index::new());
    }
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}
