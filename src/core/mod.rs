//! Core domain models.
//!
//! Software units and work packages are produced by the planning pipeline;
//! tasks are owned by the execution queue and mirrored by the task store.

pub mod package;
pub mod task;
pub mod unit;

pub use package::{PackageId, PackageOrigin, WorkPackage};
pub use task::{Job, Stage, StageProgress, StageStatus, Task, TaskId, TaskMetrics, TaskStatus, TaskSummary};
pub use unit::{RiskLevel, SoftwareUnit, SourceRef, UnitId, UnitKind};
