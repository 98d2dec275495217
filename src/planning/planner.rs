//! Work package planner.
//!
//! Buckets units by `(domain, kind)` and chunks every bucket greedily, in
//! extraction order, into packages of at most K units. A remainder smaller
//! than K stays in its own package; buckets are never mixed.

use std::collections::HashMap;

use crate::core::package::{PackageId, PackageOrigin, WorkPackage};
use crate::core::unit::{RiskLevel, SoftwareUnit, UnitKind};
use crate::error::{Error, Result};

/// Units of one `(domain, kind)` bucket, in first-appearance order.
pub(crate) struct Bucket<'a> {
    pub domain: &'a str,
    pub kind: UnitKind,
    pub units: Vec<&'a SoftwareUnit>,
}

/// Group units by `(domain, kind)`, keeping buckets in order of first
/// appearance and units in their original order.
pub(crate) fn bucketize<'a, I>(units: I) -> Vec<Bucket<'a>>
where
    I: IntoIterator<Item = &'a SoftwareUnit>,
{
    let mut index: HashMap<(&'a str, UnitKind), usize> = HashMap::new();
    let mut buckets: Vec<Bucket<'a>> = Vec::new();
    for unit in units {
        let key = (unit.domain.as_str(), unit.kind);
        let pos = *index.entry(key).or_insert_with(|| {
            buckets.push(Bucket {
                domain: key.0,
                kind: key.1,
                units: Vec::new(),
            });
            buckets.len() - 1
        });
        buckets[pos].units.push(unit);
    }
    buckets
}

/// Chunk buckets into packages of at most `k` units.
///
/// `next_id` is called once per package with a 1-based sequence number.
pub(crate) fn pack(
    buckets: &[Bucket<'_>],
    k: usize,
    origin: PackageOrigin,
    next_id: impl Fn(usize) -> PackageId,
) -> Vec<WorkPackage> {
    let mut packages = Vec::new();
    for bucket in buckets {
        let bucket_name = WorkPackage::bucket_name(bucket.domain, bucket.kind);
        for (n, chunk) in bucket.units.chunks(k).enumerate() {
            packages.push(WorkPackage {
                id: next_id(packages.len() + 1),
                name: format!("{}#{}", bucket_name, n + 1),
                units: chunk.iter().map(|u| u.id.clone()).collect(),
                domain: bucket.domain.to_string(),
                kind: bucket.kind,
                origin,
                priority: chunk.iter().map(|u| u.risk).max().unwrap_or(RiskLevel::Low),
            });
        }
    }
    packages
}

pub(crate) fn check_package_size(k: usize) -> Result<()> {
    if k < 1 {
        return Err(Error::Planning(format!(
            "max units per package must be at least 1, got {}",
            k
        )));
    }
    Ok(())
}

/// Plans work packages of bounded size.
#[derive(Debug, Clone, Copy)]
pub struct WorkPackagePlanner {
    max_units_per_package: usize,
}

impl WorkPackagePlanner {
    /// # Errors
    /// Returns `Error::Planning` if `max_units_per_package` is zero.
    pub fn new(max_units_per_package: usize) -> Result<Self> {
        check_package_size(max_units_per_package)?;
        Ok(Self {
            max_units_per_package,
        })
    }

    pub fn max_units_per_package(&self) -> usize {
        self.max_units_per_package
    }

    pub fn plan(&self, units: &[SoftwareUnit]) -> Vec<WorkPackage> {
        let buckets = bucketize(units);
        let packages = pack(
            &buckets,
            self.max_units_per_package,
            PackageOrigin::Planned,
            PackageId::planned,
        );
        tracing::info!(
            units = units.len(),
            buckets = buckets.len(),
            packages = packages.len(),
            k = self.max_units_per_package,
            "planned work packages"
        );
        packages
    }
}
