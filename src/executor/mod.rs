//! Task execution: the staged pipeline and the worker queue that runs it.

pub mod pipeline;
pub mod queue;

pub use pipeline::{
    ArchitectureInputStage, DecompositionStage, ModelStage, Pipeline, PipelineStage, ProgressSink,
    StageContext, StageOutput,
};
pub use queue::{TaskEvent, TaskQueue};
