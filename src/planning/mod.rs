//! Deterministic decomposition of an architecture into scheduled work.
//!
//! A decomposition run chains the normalizer, the work package planner, the
//! coverage auditor and the concurrency orchestrator. Every step is a pure
//! function of its inputs; any error aborts the whole run and no partial
//! plan is produced.

pub mod auditor;
pub mod matcher;
pub mod normalizer;
pub mod orchestrator;
pub mod planner;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_MAX_UNITS_PER_PACKAGE;
use crate::core::package::WorkPackage;
use crate::core::task::TaskMetrics;
use crate::core::unit::SoftwareUnit;
use crate::error::Result;

pub use auditor::{audit, audit_and_remediate, CoverageReport, DuplicateBinding, RemediationOutcome};
pub use matcher::{match_bindings, BindingIssue, BindingReport, WrongBinding};
pub use normalizer::{normalize, ArchitectureDescription};
pub use orchestrator::{
    Access, ConcurrencyBatch, ConcurrencyOrchestrator, ConcurrencyPlan, ConflictEdge,
    OrderingConstraint, ResourceKey, ResourceKind, ResourceRef,
};
pub use planner::WorkPackagePlanner;

/// Knobs for one decomposition run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanningConfig {
    pub max_units_per_package: usize,
    /// Extra ordering constraints between package ids.
    #[serde(default)]
    pub constraints: Vec<OrderingConstraint>,
    /// Order table migrations before the packages using those tables.
    #[serde(default = "default_true")]
    pub migrations_first: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self::with_max_units(DEFAULT_MAX_UNITS_PER_PACKAGE)
    }
}

impl PlanningConfig {
    pub fn with_max_units(max_units_per_package: usize) -> Self {
        Self {
            max_units_per_package,
            constraints: Vec::new(),
            migrations_first: true,
        }
    }

    fn orchestrator(&self) -> ConcurrencyOrchestrator {
        let base = if self.migrations_first {
            ConcurrencyOrchestrator::new()
        } else {
            ConcurrencyOrchestrator::new().without_migration_ordering()
        };
        self.constraints
            .iter()
            .cloned()
            .fold(base, ConcurrencyOrchestrator::with_constraint)
    }
}

/// Everything a decomposition run produces, ready for rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionPlan {
    pub units: Vec<SoftwareUnit>,
    pub packages: Vec<WorkPackage>,
    pub coverage: CoverageReport,
    pub remediation_count: usize,
    /// Present when the package list went through binding repair.
    #[serde(default)]
    pub bindings: Option<BindingReport>,
    pub concurrency: ConcurrencyPlan,
}

impl DecompositionPlan {
    pub fn metrics(&self) -> TaskMetrics {
        TaskMetrics {
            coverage_percentage: self.coverage.coverage_percentage(),
            package_count: self.packages.len(),
            remediation_count: self.remediation_count,
            batch_count: self.concurrency.batch_count(),
        }
    }
}

fn finish(
    units: Vec<SoftwareUnit>,
    packages: Vec<WorkPackage>,
    bindings: Option<BindingReport>,
    config: &PlanningConfig,
) -> Result<DecompositionPlan> {
    let outcome = audit_and_remediate(&units, packages, config.max_units_per_package)?;
    let concurrency = config.orchestrator().plan(&outcome.packages, &units)?;
    Ok(DecompositionPlan {
        units,
        packages: outcome.packages,
        coverage: outcome.report,
        remediation_count: outcome.remediation_count,
        bindings,
        concurrency,
    })
}

/// Run the full decomposition for an architecture description.
///
/// # Errors
/// Any of `Extraction`, `Planning`, `Coverage` or `ConflictGraph`.
pub fn decompose(arch: &ArchitectureDescription, config: &PlanningConfig) -> Result<DecompositionPlan> {
    let planner = WorkPackagePlanner::new(config.max_units_per_package)?;
    let units = normalize(arch)?;
    let packages = planner.plan(&units);
    finish(units, packages, None, config)
}

/// Audit and schedule an externally supplied package list.
///
/// Bindings are repaired first; units left unbound are picked up by the
/// remediation pass.
pub fn decompose_packages(
    units: Vec<SoftwareUnit>,
    mut packages: Vec<WorkPackage>,
    config: &PlanningConfig,
) -> Result<DecompositionPlan> {
    planner::check_package_size(config.max_units_per_package)?;
    let bindings = match_bindings(&units, &mut packages, config.max_units_per_package);
    packages.retain(|p| !p.is_empty());
    finish(units, packages, Some(bindings), config)
}
