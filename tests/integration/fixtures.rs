//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Building software units and architecture descriptions
//! - Temporary task stores
//! - Pipeline stages whose progress the test controls

use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use planforge::config::Config;
use planforge::core::package::WorkPackage;
use planforge::core::task::Stage;
use planforge::core::unit::{RiskLevel, SoftwareUnit, SourceRef, UnitId, UnitKind};
use planforge::executor::{PipelineStage, StageContext, StageOutput};
use planforge::planning::DecompositionPlan;
use planforge::store::TaskStore;
use planforge::{Error, Result};

pub fn unit(kind: UnitKind, name: &str, domain: &str) -> SoftwareUnit {
    SoftwareUnit {
        id: UnitId::new(kind, name),
        name: name.to_string(),
        kind,
        domain: domain.to_string(),
        resources: Vec::new(),
        source: SourceRef {
            section: "fixture".to_string(),
            index: 0,
        },
        risk: RiskLevel::Low,
    }
}

pub fn with_resources(mut unit: SoftwareUnit, resources: &[&str]) -> SoftwareUnit {
    unit.resources = resources.iter().map(|r| r.to_string()).collect();
    unit
}

/// Seven components over three domains: 3 / 2 / 2.
pub fn three_domain_units() -> Vec<SoftwareUnit> {
    vec![
        unit(UnitKind::Component, "Catalog", "shop"),
        unit(UnitKind::Component, "Cart", "shop"),
        unit(UnitKind::Component, "Checkout", "shop"),
        unit(UnitKind::Component, "Ledger", "billing"),
        unit(UnitKind::Component, "Invoicing", "billing"),
        unit(UnitKind::Component, "Mailer", "notify"),
        unit(UnitKind::Component, "Sms", "notify"),
    ]
}

/// A small shop with shared tables and a contended payment service.
pub fn shop_architecture() -> Value {
    json!({
        "system_architecture": {"system_components": [
            {"name": "Cart", "context": "shop", "resources": ["table:orders"]},
            {"name": "Checkout", "context": "shop", "resources": ["service:payments"]},
            {"name": "Refunds", "context": "billing", "resources": ["service:payments", "table:orders:write"]},
            {"name": "Mailer", "context": "notify", "description": "Sends order mails"}
        ]},
        "database_design": {"database_type": "postgres", "tables": [
            "orders",
            {"name": "users", "description": "accounts and auth data"}
        ]},
        "api_architecture": {"api_style": "rest", "api_endpoints": [
            {"path": "/orders", "method": "post", "resources": ["table:orders:write"]},
            {"path": "/users/{id}", "resources": ["table:users"]}
        ]}
    })
}

/// Assert every structural invariant of a finished plan.
pub fn assert_plan_invariants(plan: &DecompositionPlan, k: usize) {
    let by_id: HashMap<&UnitId, &SoftwareUnit> = plan.units.iter().map(|u| (&u.id, u)).collect();

    // bounded, homogeneous packages
    for package in &plan.packages {
        assert!(package.len() <= k, "{} has {} units", package.id, package.len());
        assert!(!package.is_empty());
        for id in &package.units {
            let u = by_id[id];
            assert_eq!(u.domain, package.domain);
            assert_eq!(u.kind, package.kind);
        }
    }

    // exact cover
    let mut bound = HashSet::new();
    for id in plan.packages.iter().flat_map(|p| p.units.iter()) {
        assert!(bound.insert(id), "{} bound twice", id);
    }
    assert_eq!(bound.len(), plan.units.len());
    assert_eq!(plan.coverage.coverage_percentage(), 100.0);

    // every package in exactly one batch
    let batched: Vec<_> = plan.concurrency.batches.iter().flat_map(|b| b.packages.iter()).collect();
    assert_eq!(batched.len(), plan.packages.len());
    for package in &plan.packages {
        assert!(plan.concurrency.batch_of(&package.id).is_some());
    }

    // no conflict inside a batch
    for batch in &plan.concurrency.batches {
        for (i, a) in batch.packages.iter().enumerate() {
            for b in &batch.packages[i + 1..] {
                assert!(!plan.concurrency.conflicts_between(a, b), "{} and {} share batch {}", a, b, batch.index);
            }
        }
    }

    // ordering constraints
    for c in &plan.concurrency.constraints {
        let before = plan.concurrency.batch_of(&c.before).unwrap();
        let after = plan.concurrency.batch_of(&c.after).unwrap();
        assert!(before < after, "{} must precede {}", c.before, c.after);
    }
}

pub fn package_sizes(packages: &[WorkPackage]) -> Vec<usize> {
    packages.iter().map(|p| p.len()).collect()
}

/// A task store in a temporary directory.
pub struct TestStore {
    pub dir: TempDir,
    pub store: Arc<TaskStore>,
}

impl TestStore {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = Arc::new(TaskStore::open(dir.path()).expect("Failed to open store"));
        Self { dir, store }
    }

    /// Open a second, independent handle on the same directory.
    pub fn reopen(&self) -> Arc<TaskStore> {
        Arc::new(TaskStore::open(self.dir.path()).expect("Failed to reopen store"))
    }
}

pub fn config(workers: usize) -> Config {
    Config {
        worker_count: workers,
        ..Config::default()
    }
}

/// Requirement stage that blocks until the test releases a permit.
pub struct GatedStage {
    pub gate: Arc<Semaphore>,
}

impl GatedStage {
    pub fn new() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (Self { gate: Arc::clone(&gate) }, gate)
    }
}

impl PipelineStage for GatedStage {
    fn stage(&self) -> Stage {
        Stage::RequirementAnalysis
    }

    fn run<'a>(&'a self, ctx: &'a mut StageContext) -> BoxFuture<'a, Result<StageOutput>> {
        Box::pin(async move {
            let permit = self.gate.acquire().await.map_err(|_| Error::QueueClosed)?;
            permit.forget();
            Ok(StageOutput {
                value: Value::String(ctx.job.requirement.clone()),
                ..StageOutput::default()
            })
        })
    }
}

/// Deployment stage that always fails.
pub struct FailingDeploy;

impl PipelineStage for FailingDeploy {
    fn stage(&self) -> Stage {
        Stage::Deployment
    }

    fn run<'a>(&'a self, _ctx: &'a mut StageContext) -> BoxFuture<'a, Result<StageOutput>> {
        Box::pin(async { Err(Error::TaskExecution("no deployment target".to_string())) })
    }
}
