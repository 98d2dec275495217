//! Task data model for the execution queue.
//!
//! A task is one end-to-end pipeline run. It tracks its status, the
//! progress of every pipeline stage, the artifacts produced so far and
//! the job it was submitted with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Unique identifier for a task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Task status in its lifecycle.
///
/// `queued -> running -> {succeeded | failed}`. A queued task may also
/// fail directly, e.g. when its record cannot be restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    RequirementAnalysis,
    ArchitectureDesign,
    Decomposition,
    DevelopmentExecution,
    Deployment,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::RequirementAnalysis,
        Stage::ArchitectureDesign,
        Stage::Decomposition,
        Stage::DevelopmentExecution,
        Stage::Deployment,
    ];
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::RequirementAnalysis => write!(f, "requirement_analysis"),
            Stage::ArchitectureDesign => write!(f, "architecture_design"),
            Stage::Decomposition => write!(f, "decomposition"),
            Stage::DevelopmentExecution => write!(f, "development_execution"),
            Stage::Deployment => write!(f, "deployment"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Progress marker for one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageProgress {
    pub stage: Stage,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageProgress {
    fn pending(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            started_at: None,
            finished_at: None,
        }
    }
}

/// One end-to-end job as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Project title, used to name the project directory.
    pub title: String,
    /// Free-text product requirements.
    #[serde(default)]
    pub requirement: String,
    /// Structured architecture description, when the caller already has one.
    #[serde(default)]
    pub architecture: Option<serde_json::Value>,
}

impl Job {
    pub fn new(title: &str, requirement: &str) -> Self {
        Self {
            title: title.to_string(),
            requirement: requirement.to_string(),
            architecture: None,
        }
    }

    pub fn with_architecture(mut self, architecture: serde_json::Value) -> Self {
        self.architecture = Some(architecture);
        self
    }
}

/// Planning metrics shown on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskMetrics {
    pub coverage_percentage: f64,
    pub package_count: usize,
    pub remediation_count: usize,
    pub batch_count: usize,
}

/// A single pipeline execution tracked by the queue and the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub job: Job,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageProgress>,
    /// Artifact pointers keyed by name, e.g. `decomposition_plan`.
    #[serde(default)]
    pub artifacts: BTreeMap<String, PathBuf>,
    pub project_dir: Option<PathBuf>,
    pub error: Option<String>,
    pub metrics: Option<TaskMetrics>,
}

impl Task {
    /// Create a queued task for the given job.
    pub fn new(job: Job) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            status: TaskStatus::Queued,
            job,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            stages: Stage::ALL.iter().copied().map(StageProgress::pending).collect(),
            artifacts: BTreeMap::new(),
            project_dir: None,
            error: None,
            metrics: None,
        }
    }

    fn transition(&mut self, to: TaskStatus) -> Result<()> {
        let allowed = matches!(
            (self.status, to),
            (TaskStatus::Queued, TaskStatus::Running)
                | (TaskStatus::Queued, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Succeeded)
                | (TaskStatus::Running, TaskStatus::Failed)
        );
        if !allowed {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        self.touch();
        Ok(())
    }

    /// Transition `queued -> running` and record the start time.
    pub fn start(&mut self) -> Result<()> {
        self.transition(TaskStatus::Running)?;
        self.started_at = Some(self.updated_at);
        Ok(())
    }

    /// Transition `running -> succeeded`.
    pub fn succeed(&mut self) -> Result<()> {
        self.transition(TaskStatus::Succeeded)?;
        self.finished_at = Some(self.updated_at);
        Ok(())
    }

    /// Mark the task as failed with an error message.
    ///
    /// Stage outputs and artifacts recorded so far are kept.
    pub fn fail(&mut self, error: &str) -> Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(error.to_string());
        self.finished_at = Some(self.updated_at);
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageProgress> {
        self.stages.iter().find(|p| p.stage == stage)
    }

    fn stage_mut(&mut self, stage: Stage) -> &mut StageProgress {
        let pos = match self.stages.iter().position(|p| p.stage == stage) {
            Some(pos) => pos,
            None => {
                self.stages.push(StageProgress::pending(stage));
                self.stages.len() - 1
            }
        };
        &mut self.stages[pos]
    }

    pub fn begin_stage(&mut self, stage: Stage) {
        let now = Utc::now();
        let progress = self.stage_mut(stage);
        progress.status = StageStatus::Running;
        progress.started_at = Some(now);
        self.updated_at = now;
    }

    pub fn finish_stage(&mut self, stage: Stage, status: StageStatus) {
        let now = Utc::now();
        let progress = self.stage_mut(stage);
        progress.status = status;
        progress.finished_at = Some(now);
        self.updated_at = now;
    }

    pub fn record_artifact(&mut self, name: &str, path: PathBuf) {
        self.artifacts.insert(name.to_string(), path);
        self.touch();
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id,
            title: self.job.title.clone(),
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            project_dir: self.project_dir.clone(),
            error: self.error.clone(),
        }
    }
}

/// Lightweight index entry for a task, read on every dashboard poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub title: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub project_dir: Option<PathBuf>,
    #[serde(default)]
    pub error: Option<String>,
}
