//! Integration test suite for planforge.
//!
//! These tests drive the public API end to end: decomposition of
//! architecture descriptions, the task queue over a real on-disk store,
//! restart recovery and the dashboard queries.
//!
//! # Test Categories
//!
//! - `planning_properties`: package, coverage and batch invariants
//! - `queue_fairness`: FIFO start order and worker pool limits
//! - `workflow_e2e`: full pipeline runs through queue, store and dashboard
//! - `recovery`: reload after restart
//! - `performance`: planning time on large inputs
//!
//! Pipelines use in-test stages only; no model service is contacted.

mod fixtures;

mod performance;
mod planning_properties;
mod queue_fairness;
mod recovery;
mod workflow_e2e;
