//! Planning time on large inputs.

use std::time::{Duration, Instant};

use planforge::planning::{decompose, ArchitectureDescription, PlanningConfig};
use serde_json::json;

use crate::fixtures::assert_plan_invariants;

/// 300 components over 10 domains, 100 tables and 200 endpoints.
fn large_architecture() -> ArchitectureDescription {
    let components: Vec<_> = (0..300)
        .map(|i| {
            json!({
                "name": format!("Component{}", i),
                "context": format!("domain{}", i % 10),
                "resources": [format!("table:t{}", i % 100), format!("service:s{}:read", i % 7)]
            })
        })
        .collect();
    let tables: Vec<_> = (0..100).map(|i| json!(format!("t{}", i))).collect();
    let endpoints: Vec<_> = (0..200)
        .map(|i| json!({"path": format!("/r{}", i), "resources": [format!("table:t{}:write", i % 100)]}))
        .collect();
    ArchitectureDescription::from_value(json!({
        "system_architecture": {"system_components": components},
        "database_design": {"tables": tables},
        "api_architecture": {"api_endpoints": endpoints}
    }))
    .unwrap()
}

#[test]
fn test_large_decomposition_is_fast() {
    let arch = large_architecture();
    let start = Instant::now();
    let plan = decompose(&arch, &PlanningConfig::default()).unwrap();
    let elapsed = start.elapsed();

    assert_eq!(plan.units.len(), 600);
    assert_plan_invariants(&plan, 3);
    assert!(
        elapsed < Duration::from_secs(10),
        "decomposition took {:?}",
        elapsed
    );
}
