//! Staged pipeline run for a single task.
//!
//! Stages run in `Stage::ALL` order. A stage without an implementation is
//! marked skipped. Cancellation is observed between stages only; a stage
//! that has started always runs to completion.

use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::task::{Job, Stage, StageStatus, Task, TaskId, TaskMetrics};
use crate::error::{Error, Result};
use crate::model::{ModelConfig, ModelInvoker};
use crate::planning::{decompose, ArchitectureDescription, PlanningConfig};
use crate::util;

pub const CANCELLED: &str = "cancelled";
pub const DECOMPOSITION_PLAN_ARTIFACT: &str = "decomposition_plan";

/// Working state shared by the stages of one run.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub task_id: TaskId,
    pub job: Job,
    pub project_dir: PathBuf,
    /// Output value of every completed stage.
    pub outputs: BTreeMap<Stage, serde_json::Value>,
}

impl StageContext {
    pub fn new(task_id: TaskId, job: Job, project_dir: PathBuf) -> Self {
        Self {
            task_id,
            job,
            project_dir,
            outputs: BTreeMap::new(),
        }
    }

    pub fn output(&self, stage: Stage) -> Option<&serde_json::Value> {
        self.outputs.get(&stage)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub value: serde_json::Value,
    /// `(name, path)` pointers recorded on the task.
    pub artifacts: Vec<(String, PathBuf)>,
    pub metrics: Option<TaskMetrics>,
}

pub trait PipelineStage: Send + Sync {
    fn stage(&self) -> Stage;

    fn run<'a>(&'a self, ctx: &'a mut StageContext) -> BoxFuture<'a, Result<StageOutput>>;
}

/// Receives the task after every stage transition.
pub trait ProgressSink: Send + Sync {
    fn record<'a>(&'a self, task: &'a Task) -> BoxFuture<'a, Result<()>>;
}

async fn write_artifact(project_dir: &Path, relative: &str, contents: Vec<u8>) -> Result<PathBuf> {
    let path = project_dir.join(relative);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, contents).await?;
    Ok(path)
}

/// Architecture stage for jobs submitted with a structured description.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchitectureInputStage;

impl PipelineStage for ArchitectureInputStage {
    fn stage(&self) -> Stage {
        Stage::ArchitectureDesign
    }

    fn run<'a>(&'a self, ctx: &'a mut StageContext) -> BoxFuture<'a, Result<StageOutput>> {
        Box::pin(async move {
            let Some(architecture) = ctx.job.architecture.clone() else {
                return Err(Error::TaskExecution(
                    "job carries no architecture description".to_string(),
                ));
            };
            let path = write_artifact(
                &ctx.project_dir,
                "architecture/architecture.json",
                serde_json::to_vec_pretty(&architecture)?,
            )
            .await?;
            Ok(StageOutput {
                value: architecture,
                artifacts: vec![("architecture".to_string(), path)],
                metrics: None,
            })
        })
    }
}

/// Runs the deterministic decomposition on the architecture stage output.
#[derive(Debug, Clone, Default)]
pub struct DecompositionStage {
    config: PlanningConfig,
}

impl DecompositionStage {
    pub fn new(config: PlanningConfig) -> Self {
        Self { config }
    }
}

impl PipelineStage for DecompositionStage {
    fn stage(&self) -> Stage {
        Stage::Decomposition
    }

    fn run<'a>(&'a self, ctx: &'a mut StageContext) -> BoxFuture<'a, Result<StageOutput>> {
        Box::pin(async move {
            let value = ctx
                .output(Stage::ArchitectureDesign)
                .or(ctx.job.architecture.as_ref())
                .cloned()
                .ok_or_else(|| Error::Extraction("no architecture description available".to_string()))?;
            let arch = ArchitectureDescription::from_value(value)?;
            let config = self.config.clone();
            let plan = util::blocking(move || decompose(&arch, &config)).await?;

            let path = write_artifact(
                &ctx.project_dir,
                "decomposition/plan.json",
                serde_json::to_vec_pretty(&plan)?,
            )
            .await?;
            let metrics = plan.metrics();
            tracing::info!(
                task = %ctx.task_id.short(),
                packages = metrics.package_count,
                batches = metrics.batch_count,
                coverage = metrics.coverage_percentage,
                "decomposition complete"
            );
            Ok(StageOutput {
                value: serde_json::to_value(&plan)?,
                artifacts: vec![(DECOMPOSITION_PLAN_ARTIFACT.to_string(), path)],
                metrics: Some(metrics),
            })
        })
    }
}

/// A stage answered by a language model.
///
/// The reply is stored verbatim as `<stage>.md` in the project directory.
pub struct ModelStage {
    stage: Stage,
    invoker: Arc<dyn ModelInvoker>,
    config: ModelConfig,
    prompt: fn(&StageContext) -> String,
}

impl ModelStage {
    pub fn new(
        stage: Stage,
        invoker: Arc<dyn ModelInvoker>,
        config: ModelConfig,
        prompt: fn(&StageContext) -> String,
    ) -> Self {
        Self {
            stage,
            invoker,
            config,
            prompt,
        }
    }
}

impl PipelineStage for ModelStage {
    fn stage(&self) -> Stage {
        self.stage
    }

    fn run<'a>(&'a self, ctx: &'a mut StageContext) -> BoxFuture<'a, Result<StageOutput>> {
        Box::pin(async move {
            let prompt = (self.prompt)(ctx);
            let reply = self.invoker.invoke(&prompt, &self.config).await?;
            let path = write_artifact(
                &ctx.project_dir,
                &format!("{}.md", self.stage),
                reply.content.clone().into_bytes(),
            )
            .await?;
            Ok(StageOutput {
                value: serde_json::Value::String(reply.content),
                artifacts: vec![(self.stage.to_string(), path)],
                metrics: None,
            })
        })
    }
}

/// Ordered set of stage implementations.
#[derive(Default, Clone)]
pub struct Pipeline {
    stages: BTreeMap<Stage, Arc<dyn PipelineStage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Architecture input followed by decomposition.
    pub fn standard(config: PlanningConfig) -> Self {
        Self::new()
            .with_stage(ArchitectureInputStage)
            .with_stage(DecompositionStage::new(config))
    }

    /// Register a stage, replacing any earlier one for the same `Stage`.
    pub fn with_stage(mut self, stage: impl PipelineStage + 'static) -> Self {
        self.stages.insert(stage.stage(), Arc::new(stage));
        self
    }

    pub fn has_stage(&self, stage: Stage) -> bool {
        self.stages.contains_key(&stage)
    }

    /// Run every stage against `task`, reporting each transition to `sink`.
    ///
    /// # Errors
    /// `Error::TaskExecution` when a stage fails or the run is cancelled;
    /// sink errors are returned unchanged.
    pub async fn run(&self, task: &mut Task, cancel: &CancellationToken, sink: &dyn ProgressSink) -> Result<()> {
        let project_dir = task
            .project_dir
            .clone()
            .ok_or_else(|| Error::TaskExecution("task has no project directory".to_string()))?;
        let mut ctx = StageContext::new(task.id, task.job.clone(), project_dir);

        for stage in Stage::ALL {
            if cancel.is_cancelled() {
                tracing::info!(task = %task.id.short(), %stage, "run cancelled");
                return Err(Error::TaskExecution(CANCELLED.to_string()));
            }
            let Some(runner) = self.stages.get(&stage) else {
                task.finish_stage(stage, StageStatus::Skipped);
                sink.record(task).await?;
                continue;
            };

            task.begin_stage(stage);
            sink.record(task).await?;
            tracing::debug!(task = %task.id.short(), %stage, "stage started");

            match runner.run(&mut ctx).await {
                Ok(output) => {
                    for (name, path) in output.artifacts {
                        task.record_artifact(&name, path);
                    }
                    if output.metrics.is_some() {
                        task.metrics = output.metrics;
                    }
                    ctx.outputs.insert(stage, output.value);
                    task.finish_stage(stage, StageStatus::Completed);
                    sink.record(task).await?;
                }
                Err(e) => {
                    task.finish_stage(stage, StageStatus::Failed);
                    if let Err(save_err) = sink.record(task).await {
                        tracing::warn!(task = %task.id.short(), error = %save_err, "failed to record stage failure");
                    }
                    return Err(Error::TaskExecution(format!("{} stage failed: {}", stage, e)));
                }
            }
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Behavior, FakeStage, RecordingSink};
    use super::*;
    use crate::core::task::TaskStatus;
    use crate::model::testing::ScriptedModel;
    use crate::model::ModelReply;
    use serde_json::json;
    use tempfile::TempDir;

    fn shop_architecture() -> serde_json::Value {
        json!({
            "system_architecture": {"system_components": [
                {"name": "Cart", "context": "shop"},
                {"name": "Checkout", "context": "shop"}
            ]},
            "database_design": {"tables": ["orders"]},
            "api_architecture": {"api_endpoints": [{"path": "/orders", "method": "POST"}]}
        })
    }

    fn running_task(dir: &TempDir, job: Job) -> Task {
        let mut task = Task::new(job);
        task.project_dir = Some(dir.path().join("shop"));
        task.start().unwrap();
        task
    }

    #[tokio::test]
    async fn test_standard_pipeline_writes_plan() {
        let dir = TempDir::new().unwrap();
        let mut task = running_task(&dir, Job::new("shop", "").with_architecture(shop_architecture()));
        let sink = RecordingSink::default();

        Pipeline::standard(PlanningConfig::default())
            .run(&mut task, &CancellationToken::new(), &sink)
            .await
            .unwrap();

        let plan_path = &task.artifacts[DECOMPOSITION_PLAN_ARTIFACT];
        assert!(plan_path.ends_with("decomposition/plan.json"));
        let plan: serde_json::Value = serde_json::from_slice(&std::fs::read(plan_path).unwrap()).unwrap();
        assert_eq!(plan["units"].as_array().unwrap().len(), 4);

        let metrics = task.metrics.unwrap();
        assert_eq!(metrics.coverage_percentage, 100.0);
        assert_eq!(metrics.package_count, 3);

        let status = |stage| task.stage(stage).unwrap().status;
        assert_eq!(status(Stage::RequirementAnalysis), StageStatus::Skipped);
        assert_eq!(status(Stage::ArchitectureDesign), StageStatus::Completed);
        assert_eq!(status(Stage::Decomposition), StageStatus::Completed);
        assert_eq!(status(Stage::Deployment), StageStatus::Skipped);
        assert!(!sink.snapshots.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_architecture_fails_stage() {
        let dir = TempDir::new().unwrap();
        let mut task = running_task(&dir, Job::new("shop", "no architecture"));
        let err = Pipeline::standard(PlanningConfig::default())
            .run(&mut task, &CancellationToken::new(), &RecordingSink::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("architecture_design stage failed"));
        assert_eq!(
            task.stage(Stage::ArchitectureDesign).unwrap().status,
            StageStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_failure_keeps_earlier_artifacts() {
        let dir = TempDir::new().unwrap();
        let mut task = running_task(&dir, Job::new("shop", "").with_architecture(shop_architecture()));
        let pipeline = Pipeline::standard(PlanningConfig::default())
            .with_stage(FakeStage::new(Stage::Deployment, Behavior::Fail("no target")));

        let err = pipeline
            .run(&mut task, &CancellationToken::new(), &RecordingSink::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TaskExecution(ref m) if m.contains("no target")));
        assert!(task.artifacts.contains_key(DECOMPOSITION_PLAN_ARTIFACT));
        assert!(task.metrics.is_some());
    }

    #[tokio::test]
    async fn test_cancelled_before_first_stage() {
        let dir = TempDir::new().unwrap();
        let mut task = running_task(&dir, Job::new("shop", ""));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = Pipeline::new().run(&mut task, &cancel, &RecordingSink::default()).await.unwrap_err();
        assert!(matches!(err, Error::TaskExecution(ref m) if m == CANCELLED));
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_model_stage_stores_reply() {
        let dir = TempDir::new().unwrap();
        let mut task = running_task(&dir, Job::new("shop", "sell things"));
        let model = Arc::new(ScriptedModel::new(vec![Ok(ModelReply::text("# Requirements"))]));
        let pipeline = Pipeline::new().with_stage(ModelStage::new(
            Stage::RequirementAnalysis,
            model.clone(),
            ModelConfig::new("test-model"),
            |ctx| format!("Analyse: {}", ctx.job.requirement),
        ));

        pipeline
            .run(&mut task, &CancellationToken::new(), &RecordingSink::default())
            .await
            .unwrap();
        assert_eq!(model.prompts.lock().unwrap().as_slice(), ["Analyse: sell things"]);
        let path = &task.artifacts["requirement_analysis"];
        assert_eq!(std::fs::read_to_string(path).unwrap(), "# Requirements");
    }

    #[tokio::test]
    async fn test_task_without_project_dir_is_rejected() {
        let mut task = Task::new(Job::new("shop", ""));
        task.start().unwrap();
        let err = Pipeline::new()
            .run(&mut task, &CancellationToken::new(), &RecordingSink::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TaskExecution(_)));
    }
}
