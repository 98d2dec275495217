//! Software unit data model.
//!
//! A `SoftwareUnit` is one atomic piece of system scope (a component, a
//! database object, or an API endpoint) extracted from an architecture
//! description. Units are immutable once extracted.

use serde::{Deserialize, Serialize};

/// Stable identifier of a software unit, e.g. `DB::orders`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub String);

impl UnitId {
    pub fn new(kind: UnitKind, name: &str) -> Self {
        Self(format!("{}::{}", kind.id_prefix(), name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UnitId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The kind of architecture element a unit was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitKind {
    Component,
    DatabaseObject,
    ApiEndpoint,
}

impl UnitKind {
    pub fn id_prefix(&self) -> &'static str {
        match self {
            UnitKind::Component => "COMP",
            UnitKind::DatabaseObject => "DB",
            UnitKind::ApiEndpoint => "API",
        }
    }
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitKind::Component => write!(f, "component"),
            UnitKind::DatabaseObject => write!(f, "database-object"),
            UnitKind::ApiEndpoint => write!(f, "api-endpoint"),
        }
    }
}

/// Implementation risk, inferred from element names and descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    const HIGH_KEYWORDS: &'static [&'static str] =
        &["payment", "security", "auth", "encrypt", "认证", "授权", "加密"];
    const MEDIUM_KEYWORDS: &'static [&'static str] =
        &["order", "database", "migration", "index", "数据库", "迁移", "索引"];

    pub fn infer(text: &str) -> Self {
        let t = text.to_lowercase();
        if Self::HIGH_KEYWORDS.iter().any(|k| t.contains(k)) {
            RiskLevel::High
        } else if Self::MEDIUM_KEYWORDS.iter().any(|k| t.contains(k)) {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// Where in the architecture description a unit came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Section name, e.g. `database_design.tables`.
    pub section: String,
    /// Position of the element inside its section.
    pub index: usize,
}

/// One atomic unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftwareUnit {
    pub id: UnitId,
    pub name: String,
    pub kind: UnitKind,
    pub domain: String,
    /// Raw resource references, parsed by the concurrency orchestrator.
    #[serde(default)]
    pub resources: Vec<String>,
    pub source: SourceRef,
    #[serde(default)]
    pub risk: RiskLevel,
}

impl SoftwareUnit {
    /// Key used for deduplication: kind plus the normalized qualified name.
    pub fn normalized_key(&self) -> (UnitKind, String) {
        normalized_key(self.kind, &self.name)
    }
}

pub fn normalized_key(kind: UnitKind, name: &str) -> (UnitKind, String) {
    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    (kind, collapsed.to_lowercase())
}
