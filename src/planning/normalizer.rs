//! Software unit normalizer.
//!
//! Converts the heterogeneous architecture description produced by the
//! architecture stage (components, tables, endpoints) into one ordered,
//! deduplicated list of `SoftwareUnit`s.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::core::unit::{RiskLevel, SoftwareUnit, SourceRef, UnitId, UnitKind};
use crate::error::{Error, Result};

const DEFAULT_COMPONENT_DOMAIN: &str = "system";
const DEFAULT_DATABASE_DOMAIN: &str = "database";
const DEFAULT_API_DOMAIN: &str = "api";
const DEFAULT_METHOD: &str = "GET";

/// An element given either as a detailed object or as a bare name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Element<T> {
    Detailed(T),
    Bare(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ComponentSpec {
    #[serde(default, alias = "component")]
    pub name: Option<String>,
    #[serde(default, alias = "service")]
    pub context: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TableSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EndpointSpec {
    #[serde(default, alias = "url")]
    pub path: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SystemArchitecture {
    #[serde(default)]
    pub system_components: Vec<Element<ComponentSpec>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DatabaseDesign {
    #[serde(default)]
    pub database_type: Option<String>,
    #[serde(default)]
    pub tables: Vec<Element<TableSpec>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ApiArchitecture {
    #[serde(default)]
    pub api_style: Option<String>,
    #[serde(default)]
    pub api_endpoints: Vec<Element<EndpointSpec>>,
}

/// Structured output of the architecture stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ArchitectureDescription {
    #[serde(default)]
    pub system_architecture: SystemArchitecture,
    #[serde(default)]
    pub database_design: DatabaseDesign,
    #[serde(default)]
    pub api_architecture: ApiArchitecture,
}

impl ArchitectureDescription {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Number of elements declared across all sections.
    pub fn declared_count(&self) -> usize {
        self.system_architecture.system_components.len()
            + self.database_design.tables.len()
            + self.api_architecture.api_endpoints.len()
    }
}

/// Implicit resource held by a database object: its table, under migration.
///
/// Whitespace runs and `:` become `_` so the result always parses.
pub fn table_migration_resource(table: &str) -> String {
    let name = table.split_whitespace().collect::<Vec<_>>().join("_").replace(':', "_");
    format!("table:{}:migrate", name.to_lowercase())
}

fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

struct Candidate {
    kind: UnitKind,
    name: String,
    domain: String,
    description: String,
    resources: Vec<String>,
    source: SourceRef,
}

impl Candidate {
    fn into_unit(self) -> SoftwareUnit {
        let risk_text = if self.description.is_empty() {
            self.name.as_str()
        } else {
            self.description.as_str()
        };
        SoftwareUnit {
            id: UnitId::new(self.kind, &self.name),
            risk: RiskLevel::infer(risk_text),
            name: self.name,
            kind: self.kind,
            domain: self.domain,
            resources: self.resources,
            source: self.source,
        }
    }
}

fn components(arch: &SystemArchitecture) -> Vec<Option<Candidate>> {
    const SECTION: &str = "system_architecture.system_components";
    arch.system_components
        .iter()
        .enumerate()
        .map(|(index, element)| {
            let source = SourceRef { section: SECTION.to_string(), index };
            match element {
                Element::Bare(name) => Some(Candidate {
                    kind: UnitKind::Component,
                    name: name.trim().to_string(),
                    domain: DEFAULT_COMPONENT_DOMAIN.to_string(),
                    description: String::new(),
                    resources: Vec::new(),
                    source,
                }),
                Element::Detailed(spec) => Some(Candidate {
                    kind: UnitKind::Component,
                    name: non_blank(spec.name.as_ref())?.to_string(),
                    domain: non_blank(spec.context.as_ref())
                        .unwrap_or(DEFAULT_COMPONENT_DOMAIN)
                        .to_string(),
                    description: spec.description.clone().unwrap_or_default(),
                    resources: spec.resources.clone(),
                    source,
                }),
            }
        })
        .collect()
}

fn tables(design: &DatabaseDesign) -> Vec<Option<Candidate>> {
    const SECTION: &str = "database_design.tables";
    let section_domain = non_blank(design.database_type.as_ref()).unwrap_or(DEFAULT_DATABASE_DOMAIN);
    design
        .tables
        .iter()
        .enumerate()
        .map(|(index, element)| {
            let source = SourceRef { section: SECTION.to_string(), index };
            let (name, domain, description, declared) = match element {
                Element::Bare(name) => (name.trim(), section_domain, "", &[][..]),
                Element::Detailed(spec) => (
                    non_blank(spec.name.as_ref())?,
                    non_blank(spec.domain.as_ref()).unwrap_or(section_domain),
                    spec.description.as_deref().unwrap_or_default(),
                    spec.resources.as_slice(),
                ),
            };
            let mut resources = vec![table_migration_resource(name)];
            resources.extend(declared.iter().cloned());
            Some(Candidate {
                kind: UnitKind::DatabaseObject,
                name: name.to_string(),
                domain: domain.to_string(),
                description: description.to_string(),
                resources,
                source,
            })
        })
        .collect()
}

fn endpoints(api: &ApiArchitecture) -> Vec<Option<Candidate>> {
    const SECTION: &str = "api_architecture.api_endpoints";
    let section_domain = non_blank(api.api_style.as_ref()).unwrap_or(DEFAULT_API_DOMAIN);
    api.api_endpoints
        .iter()
        .enumerate()
        .map(|(index, element)| {
            let source = SourceRef { section: SECTION.to_string(), index };
            match element {
                Element::Bare(name) => Some(Candidate {
                    kind: UnitKind::ApiEndpoint,
                    name: name.trim().to_string(),
                    domain: section_domain.to_string(),
                    description: String::new(),
                    resources: Vec::new(),
                    source,
                }),
                Element::Detailed(spec) => {
                    let path = non_blank(spec.path.as_ref())?;
                    let method = non_blank(spec.method.as_ref())
                        .unwrap_or(DEFAULT_METHOD)
                        .to_uppercase();
                    Some(Candidate {
                        kind: UnitKind::ApiEndpoint,
                        name: format!("{} {}", method, path),
                        domain: non_blank(spec.domain.as_ref())
                            .unwrap_or(section_domain)
                            .to_string(),
                        description: spec.description.clone().unwrap_or_default(),
                        resources: spec.resources.clone(),
                        source,
                    })
                }
            }
        })
        .collect()
}

/// Extract the ordered, deduplicated unit list from an architecture description.
///
/// Units are ordered components, then tables, then endpoints, each in
/// declaration order. Duplicates (same kind and normalized name) keep the
/// first occurrence.
///
/// # Errors
/// Returns `Error::Extraction` when no unit could be extracted.
pub fn normalize(arch: &ArchitectureDescription) -> Result<Vec<SoftwareUnit>> {
    let declared = arch.declared_count();
    if declared == 0 {
        return Err(Error::Extraction(
            "architecture description declares no components, tables or endpoints".to_string(),
        ));
    }

    let candidates = components(&arch.system_architecture)
        .into_iter()
        .chain(tables(&arch.database_design))
        .chain(endpoints(&arch.api_architecture));

    let mut seen = HashSet::new();
    let mut units = Vec::new();
    let mut skipped = 0usize;
    for candidate in candidates {
        let Some(candidate) = candidate.filter(|c| !c.name.is_empty()) else {
            skipped += 1;
            continue;
        };
        let unit = candidate.into_unit();
        if seen.insert(unit.normalized_key()) {
            units.push(unit);
        } else {
            tracing::debug!(unit = %unit.id, "dropping duplicate unit");
        }
    }

    if skipped > 0 {
        tracing::warn!(skipped, "skipped architecture elements without a usable name");
    }
    if units.is_empty() {
        return Err(Error::Extraction(format!(
            "none of the {} declared architecture elements yielded a unit",
            declared
        )));
    }

    tracing::info!(units = units.len(), declared, "extracted software units");
    Ok(units)
}
