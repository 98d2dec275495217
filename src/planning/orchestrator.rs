//! Concurrency orchestrator.
//!
//! Builds a conflict graph over work packages from the resources their units
//! declare, and schedules packages into ordered batches in which no two
//! packages conflict. Scheduling is greedy graph coloring in creation order:
//! deterministic and fast, but the batch count is not guaranteed minimal.
//!
//! Resource references use the form `<kind>:<name>[:<access>]`:
//! - kind is `table` or `service`
//! - access is `read`, `write` or `migrate`; tables default to `read`,
//!   services (named shared resources) default to `write`

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex, UnGraph};
use petgraph::Direction;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::str::FromStr;
use std::sync::OnceLock;

use crate::core::package::{PackageId, WorkPackage};
use crate::core::unit::{SoftwareUnit, UnitId, UnitKind};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Table,
    Service,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Read,
    Write,
    Migrate,
}

impl Access {
    pub fn is_mutating(&self) -> bool {
        matches!(self, Access::Write | Access::Migrate)
    }
}

/// Identity of a contended resource, independent of access mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub name: String,
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            ResourceKind::Table => "table",
            ResourceKind::Service => "service",
        };
        write!(f, "{}:{}", kind, self.name)
    }
}

/// A parsed resource reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub key: ResourceKey,
    pub access: Access,
}

impl FromStr for ResourceRef {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        static GRAMMAR: OnceLock<Regex> = OnceLock::new();
        let re = GRAMMAR.get_or_init(|| {
            Regex::new(r"^(table|service):([^:\s]+)(?::(read|write|migrate))?$")
                .expect("valid resource grammar")
        });

        let normalized = raw.trim().to_lowercase();
        let caps = re.captures(&normalized).ok_or_else(|| {
            Error::ConflictGraph(format!(
                "malformed resource reference '{}': expected <table|service>:<name>[:read|write|migrate]",
                raw
            ))
        })?;

        let kind = match &caps[1] {
            "table" => ResourceKind::Table,
            _ => ResourceKind::Service,
        };
        let access = match caps.get(3).map(|m| m.as_str()) {
            Some("read") => Access::Read,
            Some("write") => Access::Write,
            Some(_) => Access::Migrate,
            None if kind == ResourceKind::Table => Access::Read,
            None => Access::Write,
        };
        Ok(Self {
            key: ResourceKey {
                kind,
                name: caps[2].to_string(),
            },
            access,
        })
    }
}

/// Two packages that must not run in the same batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictEdge {
    pub a: PackageId,
    pub b: PackageId,
    /// Contended resource keys, e.g. `table:orders`.
    pub resources: Vec<String>,
}

/// `before` must be in an earlier batch than `after`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingConstraint {
    pub before: PackageId,
    pub after: PackageId,
    pub reason: String,
}

impl OrderingConstraint {
    pub fn new(before: &str, after: &str, reason: &str) -> Self {
        Self {
            before: PackageId::from(before),
            after: PackageId::from(after),
            reason: reason.to_string(),
        }
    }
}

/// A set of packages that may run together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyBatch {
    pub index: usize,
    /// Package ids in creation order.
    pub packages: Vec<PackageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConcurrencyPlan {
    pub batches: Vec<ConcurrencyBatch>,
    pub conflicts: Vec<ConflictEdge>,
    pub constraints: Vec<OrderingConstraint>,
}

impl ConcurrencyPlan {
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Index of the batch containing `package`.
    pub fn batch_of(&self, package: &PackageId) -> Option<usize> {
        self.batches
            .iter()
            .find(|b| b.packages.contains(package))
            .map(|b| b.index)
    }

    pub fn conflicts_between(&self, a: &PackageId, b: &PackageId) -> bool {
        self.conflicts
            .iter()
            .any(|e| (&e.a == a && &e.b == b) || (&e.a == b && &e.b == a))
    }
}

/// Resources held by one package, with the strongest access per key.
type Holdings = BTreeMap<ResourceKey, Access>;

fn package_holdings(
    package: &WorkPackage,
    units: &HashMap<&UnitId, &SoftwareUnit>,
) -> Result<Holdings> {
    let mut holdings = Holdings::new();
    for id in &package.units {
        let unit = units.get(id).ok_or_else(|| {
            Error::ConflictGraph(format!("package {} references unknown unit {}", package.id, id))
        })?;
        for raw in &unit.resources {
            let resource: ResourceRef = raw.parse().map_err(|e| match e {
                Error::ConflictGraph(msg) => Error::ConflictGraph(format!("unit {}: {}", unit.id, msg)),
                other => other,
            })?;
            let entry = holdings.entry(resource.key).or_insert(resource.access);
            if resource.access.is_mutating() && !entry.is_mutating() {
                *entry = resource.access;
            }
        }
    }
    Ok(holdings)
}

/// Keys contended between two packages: held by both, mutated by at least one.
fn contended(a: &Holdings, b: &Holdings) -> Vec<String> {
    a.iter()
        .filter_map(|(key, access_a)| {
            let access_b = b.get(key)?;
            (access_a.is_mutating() || access_b.is_mutating()).then(|| key.to_string())
        })
        .collect()
}

/// Schedules work packages into conflict-free batches.
#[derive(Debug, Clone)]
pub struct ConcurrencyOrchestrator {
    constraints: Vec<OrderingConstraint>,
    migrations_first: bool,
}

impl Default for ConcurrencyOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConcurrencyOrchestrator {
    /// An orchestrator that orders table migrations before the packages
    /// using those tables.
    pub fn new() -> Self {
        Self {
            constraints: Vec::new(),
            migrations_first: true,
        }
    }

    pub fn with_constraint(mut self, constraint: OrderingConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Disable the derived migration-before-use ordering.
    pub fn without_migration_ordering(mut self) -> Self {
        self.migrations_first = false;
        self
    }

    /// Derived constraints: a database-object package migrating a table runs
    /// before every non-database package touching the same table.
    fn migration_constraints(packages: &[WorkPackage], holdings: &[Holdings]) -> Vec<OrderingConstraint> {
        let mut derived = Vec::new();
        for (i, migrator) in packages.iter().enumerate() {
            if migrator.kind != UnitKind::DatabaseObject {
                continue;
            }
            let migrated: Vec<&ResourceKey> = holdings[i]
                .iter()
                .filter(|(k, a)| k.kind == ResourceKind::Table && **a == Access::Migrate)
                .map(|(k, _)| k)
                .collect();
            for (j, user) in packages.iter().enumerate() {
                if user.kind == UnitKind::DatabaseObject {
                    continue;
                }
                if let Some(key) = migrated.iter().find(|k| holdings[j].contains_key(**k)) {
                    derived.push(OrderingConstraint {
                        before: migrator.id.clone(),
                        after: user.id.clone(),
                        reason: format!("migration of {} before use", key),
                    });
                }
            }
        }
        derived
    }

    /// Compute the batch sequence for `packages`.
    ///
    /// # Errors
    /// Returns `Error::ConflictGraph` for malformed resource references,
    /// duplicate package ids, packages referencing unknown units, constraints
    /// naming unknown packages, or cyclic ordering constraints.
    pub fn plan(&self, packages: &[WorkPackage], units: &[SoftwareUnit]) -> Result<ConcurrencyPlan> {
        let unit_index: HashMap<&UnitId, &SoftwareUnit> = units.iter().map(|u| (&u.id, u)).collect();

        let mut position: HashMap<&PackageId, usize> = HashMap::new();
        for (i, package) in packages.iter().enumerate() {
            if position.insert(&package.id, i).is_some() {
                return Err(Error::ConflictGraph(format!("duplicate package id {}", package.id)));
            }
        }

        let holdings = packages
            .iter()
            .map(|p| package_holdings(p, &unit_index))
            .collect::<Result<Vec<_>>>()?;

        // Node i is package i in both graphs.
        let mut conflicts: UnGraph<usize, Vec<String>> = UnGraph::default();
        let mut ordering: DiGraph<usize, ()> = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..packages.len())
            .map(|i| {
                ordering.add_node(i);
                conflicts.add_node(i)
            })
            .collect();

        for i in 0..packages.len() {
            for j in (i + 1)..packages.len() {
                let shared = contended(&holdings[i], &holdings[j]);
                if !shared.is_empty() {
                    conflicts.add_edge(nodes[i], nodes[j], shared);
                }
            }
        }

        let mut constraints = if self.migrations_first {
            Self::migration_constraints(packages, &holdings)
        } else {
            Vec::new()
        };
        constraints.extend(self.constraints.iter().cloned());
        for constraint in &constraints {
            let lookup = |id: &PackageId| {
                position.get(id).copied().ok_or_else(|| {
                    Error::ConflictGraph(format!("ordering constraint names unknown package {}", id))
                })
            };
            let before = lookup(&constraint.before)?;
            let after = lookup(&constraint.after)?;
            ordering.update_edge(nodes[before], nodes[after], ());
        }
        if is_cyclic_directed(&ordering) {
            return Err(Error::ConflictGraph("ordering constraints form a cycle".to_string()));
        }

        let batches = Self::color(&conflicts, &ordering, &nodes);

        let mut edges: Vec<ConflictEdge> = conflicts
            .edge_indices()
            .filter_map(|e| {
                let (x, y) = conflicts.edge_endpoints(e)?;
                let (lo, hi) = (x.index().min(y.index()), x.index().max(y.index()));
                Some(ConflictEdge {
                    a: packages[lo].id.clone(),
                    b: packages[hi].id.clone(),
                    resources: conflicts.edge_weight(e)?.clone(),
                })
            })
            .collect();
        edges.sort_by_key(|e| (position[&e.a], position[&e.b]));

        let plan = ConcurrencyPlan {
            batches: batches
                .into_iter()
                .enumerate()
                .map(|(index, members)| ConcurrencyBatch {
                    index,
                    packages: members.into_iter().map(|i| packages[i].id.clone()).collect(),
                })
                .collect(),
            conflicts: edges,
            constraints,
        };
        tracing::info!(
            packages = packages.len(),
            conflicts = plan.conflicts.len(),
            batches = plan.batch_count(),
            "concurrency plan computed"
        );
        Ok(plan)
    }

    /// Greedy coloring over an acyclic ordering graph.
    ///
    /// Packages are taken lowest creation index first among those whose
    /// predecessors are placed; each goes to the earliest batch after all of
    /// its predecessors that holds no conflicting package.
    fn color(
        conflicts: &UnGraph<usize, Vec<String>>,
        ordering: &DiGraph<usize, ()>,
        nodes: &[NodeIndex],
    ) -> Vec<Vec<usize>> {
        let mut indegree: Vec<usize> = nodes
            .iter()
            .map(|&n| ordering.neighbors_directed(n, Direction::Incoming).count())
            .collect();
        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut assigned: Vec<Option<usize>> = vec![None; nodes.len()];
        let mut batches: Vec<Vec<usize>> = Vec::new();

        while let Some(Reverse(i)) = ready.pop() {
            let earliest = ordering
                .neighbors_directed(nodes[i], Direction::Incoming)
                .filter_map(|p| assigned[p.index()])
                .map(|b| b + 1)
                .max()
                .unwrap_or(0);

            let neighbors: HashSet<usize> = conflicts.neighbors(nodes[i]).map(|n| n.index()).collect();
            let slot = (earliest..batches.len())
                .find(|&b| batches[b].iter().all(|m| !neighbors.contains(m)));
            let slot = match slot {
                Some(b) => b,
                None => {
                    batches.push(Vec::new());
                    batches.len() - 1
                }
            };
            batches[slot].push(i);
            assigned[i] = Some(slot);

            for succ in ordering.neighbors_directed(nodes[i], Direction::Outgoing) {
                let s = succ.index();
                indegree[s] -= 1;
                if indegree[s] == 0 {
                    ready.push(Reverse(s));
                }
            }
        }

        for batch in &mut batches {
            batch.sort_unstable();
        }
        batches
    }
}
