//! Persistent multi-task execution queue.
//!
//! A fixed pool of worker loops pulls tasks in submission order and runs
//! the pipeline for each one in its own tokio task, so a failing or
//! panicking pipeline only fails that task. Every state change is written
//! to the `TaskStore` before it is announced.

use futures::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::task::{Job, Task, TaskId, TaskStatus, TaskSummary};
use crate::error::{Error, Result};
use crate::executor::pipeline::{Pipeline, ProgressSink};
use crate::store::TaskStore;
use crate::util;

pub const INTERRUPTED: &str = "interrupted by restart";
const EVENT_CAPACITY: usize = 256;

/// Lifecycle events emitted by the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Queued(TaskId),
    Started(TaskId),
    Succeeded(TaskId),
    Failed { id: TaskId, error: String },
    /// A queued task was withdrawn before it started.
    Cancelled(TaskId),
}

impl TaskEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            TaskEvent::Queued(id)
            | TaskEvent::Started(id)
            | TaskEvent::Succeeded(id)
            | TaskEvent::Cancelled(id)
            | TaskEvent::Failed { id, .. } => *id,
        }
    }
}

struct Shared {
    registry: RwLock<HashMap<TaskId, Task>>,
    pending: Mutex<VecDeque<TaskId>>,
    notify: Notify,
    tokens: Mutex<HashMap<TaskId, CancellationToken>>,
    store: Arc<TaskStore>,
    pipeline: Arc<Pipeline>,
    shutdown: CancellationToken,
    events: broadcast::Sender<TaskEvent>,
}

impl Shared {
    fn emit(&self, event: TaskEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    async fn persist(&self, task: &Task) -> Result<()> {
        let store = Arc::clone(&self.store);
        let task = task.clone();
        util::blocking(move || store.save(&task)).await
    }

    /// Publish a task snapshot to the registry, then to disk.
    async fn commit(&self, task: &Task) -> Result<()> {
        self.registry.write().await.insert(task.id, task.clone());
        self.persist(task).await
    }

    /// Make a queued task visible and runnable.
    ///
    /// The pending lock is held throughout so `cancel` never sees the task
    /// without its token or outside the queue.
    async fn enqueue(&self, task: Task) {
        let id = task.id;
        let mut pending = self.pending.lock().await;
        self.tokens.lock().await.insert(id, CancellationToken::new());
        self.registry.write().await.insert(id, task);
        pending.push_back(id);
        drop(pending);
        self.notify.notify_one();
    }

    async fn next(&self) -> TaskId {
        loop {
            let notified = self.notify.notified();
            if let Some(id) = self.pending.lock().await.pop_front() {
                return id;
            }
            notified.await;
        }
    }

    /// Move a task to a terminal state, saving it as a best effort.
    async fn finish(&self, mut task: Task, outcome: Result<()>) {
        let transition = match &outcome {
            Ok(()) => task.succeed(),
            Err(e) => task.fail(&failure_message(e)),
        };
        if let Err(e) = transition {
            tracing::warn!(task = %task.id.short(), error = %e, "cannot finish task");
            return;
        }
        if let Err(e) = self.commit(&task).await {
            tracing::error!(task = %task.id.short(), error = %e, "failed to persist final task state");
        }
        self.tokens.lock().await.remove(&task.id);

        match outcome {
            Ok(()) => {
                tracing::info!(task = %task.id.short(), "task succeeded");
                self.emit(TaskEvent::Succeeded(task.id));
            }
            Err(_) => {
                let error = task.error.clone().unwrap_or_default();
                tracing::warn!(task = %task.id.short(), %error, "task failed");
                self.emit(TaskEvent::Failed { id: task.id, error });
            }
        }
    }
}

fn failure_message(e: &Error) -> String {
    match e {
        Error::TaskExecution(msg) => msg.clone(),
        other => other.to_string(),
    }
}

/// Records pipeline progress into the registry and the store.
struct Recorder(Arc<Shared>);

impl ProgressSink for Recorder {
    fn record<'a>(&'a self, task: &'a Task) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.0.commit(task))
    }
}

async fn run_task(shared: &Arc<Shared>, id: TaskId) {
    let Some(mut task) = shared.registry.read().await.get(&id).cloned() else {
        return;
    };
    let token = shared.tokens.lock().await.get(&id).cloned().unwrap_or_default();

    if let Err(e) = task.start() {
        tracing::warn!(task = %id.short(), error = %e, "cannot start task");
        return;
    }
    if let Err(e) = shared.commit(&task).await {
        shared.finish(task, Err(e)).await;
        return;
    }
    tracing::info!(task = %id.short(), title = %task.job.title, "task started");
    shared.emit(TaskEvent::Started(id));

    let pipeline = Arc::clone(&shared.pipeline);
    let sink = Recorder(Arc::clone(shared));
    let handle = tokio::spawn(async move {
        let outcome = pipeline.run(&mut task, &token, &sink).await;
        (task, outcome)
    });

    let (task, outcome) = match handle.await {
        Ok(pair) => pair,
        Err(join_err) => {
            // the last recorded snapshot is all that survives a panic
            let Some(task) = shared.registry.read().await.get(&id).cloned() else {
                return;
            };
            let error = Error::TaskExecution(format!("pipeline panicked: {}", join_err));
            (task, Err(error))
        }
    };
    shared.finish(task, outcome).await;
}

async fn worker_loop(shared: Arc<Shared>, worker: usize) {
    tracing::debug!(worker, "worker started");
    loop {
        let id = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            id = shared.next() => id,
        };
        tracing::debug!(worker, task = %id.short(), "worker picked task");
        run_task(&shared, id).await;
    }
    tracing::debug!(worker, "worker stopped");
}

/// Task queue with a fixed worker pool.
pub struct TaskQueue {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskQueue {
    /// Rebuild the registry from the store and start `config.worker_count`
    /// workers.
    ///
    /// Tasks recorded as running are failed as interrupted; queued tasks are
    /// re-enqueued in creation order.
    ///
    /// # Errors
    /// Fails if the store cannot be loaded.
    pub async fn start(config: &Config, store: Arc<TaskStore>, pipeline: Arc<Pipeline>) -> Result<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            registry: RwLock::new(HashMap::new()),
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            tokens: Mutex::new(HashMap::new()),
            store: Arc::clone(&store),
            pipeline,
            shutdown: CancellationToken::new(),
            events,
        });

        let records = util::blocking(move || store.load_all()).await?;
        let (mut requeued, mut interrupted) = (0, 0);
        for record in records {
            let has_detail = record.detail.is_some();
            let mut task = record.into_task();
            match task.status {
                TaskStatus::Running => {
                    task.fail(INTERRUPTED)?;
                    interrupted += 1;
                    shared.commit(&task).await?;
                }
                TaskStatus::Queued if !has_detail => {
                    task.fail("task record lost")?;
                    shared.commit(&task).await?;
                }
                TaskStatus::Queued => {
                    shared.enqueue(task).await;
                    requeued += 1;
                }
                TaskStatus::Succeeded | TaskStatus::Failed => {
                    shared.registry.write().await.insert(task.id, task);
                }
            }
        }

        let worker_count = if config.worker_count == 0 {
            tracing::warn!("worker_count is 0, using 1 worker");
            1
        } else {
            config.worker_count
        };
        let workers = (0..worker_count)
            .map(|n| tokio::spawn(worker_loop(Arc::clone(&shared), n)))
            .collect();
        tracing::info!(workers = worker_count, requeued, interrupted, "task queue started");

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// Persist a new queued task and hand it to the workers.
    ///
    /// # Errors
    /// `QueueClosed` after shutdown. `StoreWrite` if the task cannot be
    /// saved; the task is then never queued.
    pub async fn submit(&self, job: Job) -> Result<TaskId> {
        if self.shared.shutdown.is_cancelled() {
            return Err(Error::QueueClosed);
        }
        let mut task = Task::new(job);
        task.project_dir = Some(self.shared.store.project_dir_for(&task));
        let id = task.id;
        self.shared.persist(&task).await?;
        tracing::info!(task = %id.short(), title = %task.job.title, "task queued");
        self.shared.enqueue(task).await;
        self.shared.emit(TaskEvent::Queued(id));
        Ok(id)
    }

    /// Cancel a task.
    ///
    /// A queued task is removed from the queue, the registry and the store.
    /// A running task is flagged; it fails with "cancelled" once its current
    /// stage completes.
    ///
    /// # Errors
    /// `TaskNotFound` for unknown ids, `InvalidTransition` for finished tasks.
    pub async fn cancel(&self, id: TaskId) -> Result<()> {
        let withdrawn = {
            let mut pending = self.shared.pending.lock().await;
            match pending.iter().position(|p| *p == id) {
                Some(pos) => pending.remove(pos).is_some(),
                None => false,
            }
        };

        if withdrawn {
            self.shared.registry.write().await.remove(&id);
            self.shared.tokens.lock().await.remove(&id);
            let store = Arc::clone(&self.shared.store);
            util::blocking(move || store.remove(id)).await?;
            tracing::info!(task = %id.short(), "queued task cancelled");
            self.shared.emit(TaskEvent::Cancelled(id));
            return Ok(());
        }

        let status = match self.shared.registry.read().await.get(&id) {
            Some(task) => task.status,
            None => return Err(Error::TaskNotFound(id.to_string())),
        };
        if status.is_terminal() {
            return Err(Error::InvalidTransition {
                from: status.to_string(),
                to: "cancelled".to_string(),
            });
        }
        if let Some(token) = self.shared.tokens.lock().await.get(&id) {
            token.cancel();
            tracing::info!(task = %id.short(), "cancellation requested for running task");
        }
        Ok(())
    }

    pub async fn get(&self, id: TaskId) -> Option<Task> {
        self.shared.registry.read().await.get(&id).cloned()
    }

    /// All known tasks, oldest first.
    pub async fn list(&self) -> Vec<TaskSummary> {
        let mut tasks: Vec<TaskSummary> = self
            .shared
            .registry
            .read()
            .await
            .values()
            .map(Task::summary)
            .collect();
        tasks.sort_by_key(|t| (t.created_at, t.id));
        tasks
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.shared.events.subscribe()
    }

    /// Wait until the task reaches a terminal state.
    ///
    /// # Errors
    /// `TaskNotFound` if the task is unknown or was cancelled while queued.
    pub async fn wait_for(&self, id: TaskId) -> Result<Task> {
        let mut events = self.subscribe();
        loop {
            match self.get(id).await {
                Some(task) if task.is_finished() => return Ok(task),
                Some(_) => {}
                None => return Err(Error::TaskNotFound(id.to_string())),
            }
            loop {
                match events.recv().await {
                    Ok(event) if event.task_id() == id => break,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => break,
                    Err(broadcast::error::RecvError::Closed) => return Err(Error::QueueClosed),
                }
            }
        }
    }

    /// Stop the workers once their current tasks are done.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "worker ended abnormally");
            }
        }
        tracing::info!("task queue stopped");
    }
}
