//! Work package data model.

use serde::{Deserialize, Serialize};

use crate::core::unit::{RiskLevel, UnitId, UnitKind};

/// Identifier of a work package (`WP-001`, `WP-FIX-001`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(pub String);

impl PackageId {
    pub fn planned(seq: usize) -> Self {
        Self(format!("WP-{:03}", seq))
    }

    pub fn remediation(seq: usize) -> Self {
        Self(format!("WP-FIX-{:03}", seq))
    }

    /// Sequence number of a `WP-FIX-NNN` id.
    pub fn remediation_seq(&self) -> Option<usize> {
        self.0.strip_prefix("WP-FIX-")?.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PackageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PackageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How a package came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PackageOrigin {
    #[default]
    Planned,
    /// Generated by the coverage auditor to close gaps.
    Remediation,
}

/// A bounded bundle of units handed downstream as one piece of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkPackage {
    pub id: PackageId,
    /// `<domain>/<kind>#<n>`
    pub name: String,
    pub units: Vec<UnitId>,
    pub domain: String,
    pub kind: UnitKind,
    #[serde(default)]
    pub origin: PackageOrigin,
    #[serde(default)]
    pub priority: RiskLevel,
}

impl WorkPackage {
    pub fn bucket_name(domain: &str, kind: UnitKind) -> String {
        format!("{}/{}", domain, kind)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn is_remediation(&self) -> bool {
        self.origin == PackageOrigin::Remediation
    }

    pub fn contains(&self, unit: &UnitId) -> bool {
        self.units.contains(unit)
    }
}
