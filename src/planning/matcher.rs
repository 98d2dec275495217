//! Unit-to-package binding validation.
//!
//! Package lists that did not come straight from the planner (edited plans,
//! plans loaded from disk) may bind units that no longer exist or that do not
//! belong to the package's bucket, or that exceed the package size limit.
//! The matcher drops such bindings and re-homes unbound units into coherent
//! packages with spare room.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::core::package::{PackageId, WorkPackage};
use crate::core::unit::{SoftwareUnit, UnitId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingIssue {
    /// The package references a unit id that was not extracted.
    UnknownUnit,
    /// The unit's domain or kind differs from the package's.
    Incoherent,
    /// The package already holds the maximum number of units.
    Overflow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrongBinding {
    pub package: PackageId,
    pub unit: UnitId,
    pub issue: BindingIssue,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingReport {
    /// Units that could not be placed in any existing package.
    pub unbound: Vec<UnitId>,
    pub wrong_bindings: Vec<WrongBinding>,
    /// Units attached to an existing package by the matcher.
    pub rebound: Vec<(UnitId, PackageId)>,
}

fn coherent(package: &WorkPackage, unit: &SoftwareUnit) -> bool {
    package.domain == unit.domain && package.kind == unit.kind
}

/// Validate and repair unit bindings in place.
///
/// A unit bound to several packages keeps its first binding here only if it
/// is coherent; duplicate detection is left to the coverage auditor.
pub fn match_bindings(
    units: &[SoftwareUnit],
    packages: &mut [WorkPackage],
    max_units_per_package: usize,
) -> BindingReport {
    let index: HashMap<&UnitId, &SoftwareUnit> = units.iter().map(|u| (&u.id, u)).collect();
    let mut report = BindingReport::default();

    for package in packages.iter_mut() {
        let mut kept = Vec::with_capacity(package.units.len());
        for id in std::mem::take(&mut package.units) {
            let issue = match index.get(&id) {
                None => Some(BindingIssue::UnknownUnit),
                Some(unit) if !coherent(package, unit) => Some(BindingIssue::Incoherent),
                Some(_) => None,
            };
            match issue {
                Some(issue) => report.wrong_bindings.push(WrongBinding {
                    package: package.id.clone(),
                    unit: id,
                    issue,
                }),
                None => kept.push(id),
            }
        }
        if kept.len() > max_units_per_package {
            for id in kept.split_off(max_units_per_package) {
                report.wrong_bindings.push(WrongBinding {
                    package: package.id.clone(),
                    unit: id,
                    issue: BindingIssue::Overflow,
                });
            }
        }
        package.units = kept;
    }

    let bound: HashSet<UnitId> = packages
        .iter()
        .flat_map(|p| p.units.iter().cloned())
        .collect();

    for unit in units.iter().filter(|u| !bound.contains(&u.id)) {
        let candidate = packages
            .iter_mut()
            .filter(|p| coherent(p, unit) && p.len() < max_units_per_package)
            // min_by_key keeps the first of equal loads
            .min_by_key(|p| p.len());
        match candidate {
            Some(package) => {
                package.units.push(unit.id.clone());
                report.rebound.push((unit.id.clone(), package.id.clone()));
            }
            None => report.unbound.push(unit.id.clone()),
        }
    }

    if !report.wrong_bindings.is_empty() || !report.unbound.is_empty() {
        tracing::warn!(
            wrong = report.wrong_bindings.len(),
            rebound = report.rebound.len(),
            unbound = report.unbound.len(),
            "repaired unit bindings"
        );
    }
    report
}
