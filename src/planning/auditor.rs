//! Coverage auditor.
//!
//! Checks the coverage invariant (every unit bound to exactly one package)
//! and closes gaps with a single deterministic remediation pass.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::core::package::{PackageId, PackageOrigin, WorkPackage};
use crate::core::unit::{SoftwareUnit, UnitId};
use crate::error::{Error, Result};
use crate::planning::planner::{bucketize, check_package_size, pack};

/// A unit bound to more than one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateBinding {
    pub unit: UnitId,
    pub packages: Vec<PackageId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub total_units: usize,
    pub covered_units: usize,
    /// Covered fraction in `[0, 1]`.
    pub coverage_ratio: f64,
    /// Uncovered unit ids, in extraction order.
    pub uncovered: Vec<UnitId>,
    pub duplicates: Vec<DuplicateBinding>,
    /// Ids referenced by packages that match no extracted unit.
    pub unknown_units: Vec<UnitId>,
}

impl CoverageReport {
    pub fn coverage_percentage(&self) -> f64 {
        self.coverage_ratio * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.uncovered.is_empty()
    }

    /// Complete coverage with pairwise-disjoint packages and no stray ids.
    pub fn holds_invariant(&self) -> bool {
        self.is_complete() && self.duplicates.is_empty() && self.unknown_units.is_empty()
    }
}

/// Compute coverage of `units` by `packages`.
///
/// An empty unit set is reported as fully covered.
pub fn audit(units: &[SoftwareUnit], packages: &[WorkPackage]) -> CoverageReport {
    let known: HashSet<&UnitId> = units.iter().map(|u| &u.id).collect();
    let mut bindings: BTreeMap<&UnitId, Vec<PackageId>> = BTreeMap::new();
    let mut unknown_units = Vec::new();

    for package in packages {
        for id in &package.units {
            if known.contains(id) {
                bindings.entry(id).or_default().push(package.id.clone());
            } else if !unknown_units.contains(id) {
                unknown_units.push(id.clone());
            }
        }
    }

    let uncovered: Vec<UnitId> = units
        .iter()
        .filter(|u| !bindings.contains_key(&u.id))
        .map(|u| u.id.clone())
        .collect();

    let duplicates = bindings
        .iter()
        .filter(|(_, pkgs)| pkgs.len() > 1)
        .map(|(unit, pkgs)| DuplicateBinding {
            unit: (*unit).clone(),
            packages: pkgs.clone(),
        })
        .collect();

    let total_units = units.len();
    let covered_units = total_units - uncovered.len();
    let coverage_ratio = if total_units == 0 {
        1.0
    } else {
        covered_units as f64 / total_units as f64
    };

    let report = CoverageReport {
        total_units,
        covered_units,
        coverage_ratio,
        uncovered,
        duplicates,
        unknown_units,
    };
    tracing::debug!(
        coverage = report.coverage_percentage(),
        uncovered = report.uncovered.len(),
        duplicates = report.duplicates.len(),
        "coverage audit"
    );
    report
}

/// Result of an audit with remediation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationOutcome {
    /// Input packages followed by any remediation packages.
    pub packages: Vec<WorkPackage>,
    /// Number of remediation packages appended.
    pub remediation_count: usize,
    /// Audit before remediation.
    pub initial: CoverageReport,
    /// Audit after remediation; the one callers should report.
    pub report: CoverageReport,
}

/// Build remediation packages covering exactly `gaps`, bucketed like the
/// planner and chunked at `k`.
///
/// Numbering continues after the highest `WP-FIX-NNN` already in `existing`.
fn remediation_packages(
    units: &[SoftwareUnit],
    existing: &[WorkPackage],
    gaps: &[UnitId],
    k: usize,
) -> Vec<WorkPackage> {
    let by_id: HashMap<&UnitId, &SoftwareUnit> = units.iter().map(|u| (&u.id, u)).collect();
    let gap_units = gaps.iter().filter_map(|id| by_id.get(id).copied());
    let buckets = bucketize(gap_units);
    let offset = existing
        .iter()
        .filter_map(|p| p.id.remediation_seq())
        .max()
        .unwrap_or(0);
    pack(&buckets, k, PackageOrigin::Remediation, |n| {
        PackageId::remediation(offset + n)
    })
}

/// Audit coverage and, if gaps exist, append remediation packages and
/// audit again. Remediation runs exactly once.
///
/// # Errors
/// - `Error::Planning` if `k` is zero.
/// - `Error::Coverage` if, after the remediation pass, coverage is below
///   100% or packages still overlap or reference unknown units.
pub fn audit_and_remediate(
    units: &[SoftwareUnit],
    packages: Vec<WorkPackage>,
    k: usize,
) -> Result<RemediationOutcome> {
    check_package_size(k)?;
    let initial = audit(units, &packages);
    let mut packages = packages;

    let remediation = if initial.is_complete() {
        Vec::new()
    } else {
        remediation_packages(units, &packages, &initial.uncovered, k)
    };
    let remediation_count = remediation.len();
    if remediation_count > 0 {
        tracing::warn!(
            gaps = initial.uncovered.len(),
            packages = remediation_count,
            "coverage gaps found, adding remediation packages"
        );
    }
    packages.extend(remediation);

    let report = if remediation_count == 0 {
        initial.clone()
    } else {
        audit(units, &packages)
    };

    if !report.holds_invariant() {
        let mut reasons = Vec::new();
        if !report.uncovered.is_empty() {
            reasons.push(format!("{} unit(s) uncovered", report.uncovered.len()));
        }
        if !report.duplicates.is_empty() {
            reasons.push(format!("{} unit(s) bound more than once", report.duplicates.len()));
        }
        if !report.unknown_units.is_empty() {
            reasons.push(format!("{} unknown unit id(s) referenced", report.unknown_units.len()));
        }
        return Err(Error::Coverage {
            coverage: report.coverage_percentage(),
            reason: reasons.join(", "),
        });
    }

    tracing::info!(
        coverage = report.coverage_percentage(),
        packages = packages.len(),
        remediation = remediation_count,
        "coverage verified"
    );
    Ok(RemediationOutcome {
        packages,
        remediation_count,
        initial,
        report,
    })
}
