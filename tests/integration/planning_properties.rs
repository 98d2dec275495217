//! Package, coverage and batch invariants of the decomposition run.

use planforge::core::package::PackageId;
use planforge::core::unit::UnitKind;
use planforge::planning::{
    audit_and_remediate, decompose, decompose_packages, normalize, ArchitectureDescription,
    ConcurrencyOrchestrator, OrderingConstraint, PlanningConfig, WorkPackagePlanner,
};
use planforge::Error;

use crate::fixtures::{
    assert_plan_invariants, package_sizes, shop_architecture, three_domain_units, unit, with_resources,
};

fn shop() -> ArchitectureDescription {
    ArchitectureDescription::from_value(shop_architecture()).unwrap()
}

#[test]
fn test_invariants_hold_for_every_k() {
    for k in 1..=5 {
        let plan = decompose(&shop(), &PlanningConfig::with_max_units(k)).unwrap();
        assert_plan_invariants(&plan, k);
        assert_eq!(plan.remediation_count, 0);
    }
}

#[test]
fn test_seven_units_three_domains() {
    let units = three_domain_units();
    let packages = WorkPackagePlanner::new(3).unwrap().plan(&units);
    assert_eq!(package_sizes(&packages), vec![3, 2, 2]);

    let outcome = audit_and_remediate(&units, packages, 3).unwrap();
    assert_eq!(outcome.report.coverage_percentage(), 100.0);
    assert_eq!(outcome.remediation_count, 0);
    assert!(outcome.packages.iter().all(|p| !p.is_remediation()));
}

#[test]
fn test_shop_schedule() {
    let plan = decompose(&shop(), &PlanningConfig::default()).unwrap();
    assert_eq!(plan.units.len(), 8);
    let ids: Vec<&str> = plan.packages.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["WP-001", "WP-002", "WP-003", "WP-004", "WP-005"]);

    // the table migrations go first, with the independent mailer package
    let db = PackageId::from("WP-004");
    assert_eq!(plan.concurrency.batch_of(&db), Some(0));
    assert_eq!(plan.concurrency.batch_of(&PackageId::from("WP-003")), Some(0));
    assert!(plan.concurrency.conflicts_between(&PackageId::from("WP-001"), &PackageId::from("WP-002")));
    assert_eq!(plan.concurrency.batch_count(), 4);
}

#[test]
fn test_two_packages_migrating_orders_are_split() {
    let units = vec![
        with_resources(unit(UnitKind::Component, "A", "alpha"), &["table:orders:migrate"]),
        with_resources(unit(UnitKind::Component, "B", "beta"), &["table:orders:migrate"]),
    ];
    let packages = WorkPackagePlanner::new(3).unwrap().plan(&units);
    assert_eq!(packages.len(), 2);

    let plan = ConcurrencyOrchestrator::new().plan(&packages, &units).unwrap();
    let a = plan.batch_of(&packages[0].id).unwrap();
    let b = plan.batch_of(&packages[1].id).unwrap();
    assert_ne!(a, b);
    assert_eq!(plan.conflicts.len(), 1);
    assert_eq!(plan.conflicts[0].resources, vec!["table:orders".to_string()]);
}

#[test]
fn test_shared_reads_run_together() {
    let units = vec![
        with_resources(unit(UnitKind::Component, "A", "alpha"), &["table:orders"]),
        with_resources(unit(UnitKind::Component, "B", "beta"), &["table:orders:read"]),
    ];
    let packages = WorkPackagePlanner::new(3).unwrap().plan(&units);
    let plan = ConcurrencyOrchestrator::new().plan(&packages, &units).unwrap();
    assert_eq!(plan.batch_count(), 1);
    assert!(plan.conflicts.is_empty());
}

#[test]
fn test_pipeline_is_idempotent() {
    let units = normalize(&shop()).unwrap();
    let run = || {
        let packages = WorkPackagePlanner::new(2).unwrap().plan(&units);
        let outcome = audit_and_remediate(&units, packages, 2).unwrap();
        let concurrency = ConcurrencyOrchestrator::new().plan(&outcome.packages, &units).unwrap();
        (outcome.packages, concurrency)
    };
    assert_eq!(run(), run());
}

#[test]
fn test_explicit_constraint_cycle_is_rejected() {
    let config = PlanningConfig {
        constraints: vec![
            OrderingConstraint::new("WP-001", "WP-003", "first"),
            OrderingConstraint::new("WP-003", "WP-001", "second"),
        ],
        ..PlanningConfig::default()
    };
    let err = decompose(&shop(), &config).unwrap_err();
    assert!(matches!(err, Error::ConflictGraph(_)));
    assert!(err.is_planning_failure());
}

#[test]
fn test_external_packages_get_remediated() {
    let units = three_domain_units();
    let mut packages = WorkPackagePlanner::new(3).unwrap().plan(&units);
    packages.truncate(1);

    let plan = decompose_packages(units, packages, &PlanningConfig::default()).unwrap();
    assert_eq!(plan.remediation_count, 2);
    assert_plan_invariants(&plan, 3);
    let fixes: Vec<&str> = plan
        .packages
        .iter()
        .filter(|p| p.is_remediation())
        .map(|p| p.id.as_str())
        .collect();
    assert_eq!(fixes, vec!["WP-FIX-001", "WP-FIX-002"]);
}

#[test]
fn test_empty_architecture_is_extraction_error() {
    let err = decompose(&ArchitectureDescription::default(), &PlanningConfig::default()).unwrap_err();
    assert!(matches!(err, Error::Extraction(_)));
}
