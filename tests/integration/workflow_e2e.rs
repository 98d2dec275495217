//! Full pipeline runs through queue, store and dashboard.

use std::sync::Arc;

use planforge::core::task::{Job, Stage, StageStatus, TaskStatus};
use planforge::executor::{Pipeline, TaskQueue};
use planforge::planning::PlanningConfig;
use planforge::store::{Dashboard, TaskStore, INDEX_FILE};

use crate::fixtures::{config, shop_architecture, FailingDeploy, TestStore};

#[tokio::test]
async fn test_shop_job_end_to_end() {
    let store = TestStore::new();
    let pipeline = Arc::new(Pipeline::standard(PlanningConfig::default()));
    let queue = TaskQueue::start(&config(2), Arc::clone(&store.store), pipeline).await.unwrap();

    let id = queue
        .submit(Job::new("Shop Backend", "an online shop").with_architecture(shop_architecture()))
        .await
        .unwrap();
    let task = queue.wait_for(id).await.unwrap();
    queue.shutdown().await;

    assert_eq!(task.status, TaskStatus::Succeeded);
    let project_dir = task.project_dir.clone().unwrap();
    assert!(project_dir
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("shop-backend-"));
    assert!(project_dir.join("decomposition/plan.json").exists());
    assert!(store.dir.path().join(INDEX_FILE).exists());
    assert_eq!(task.stage(Stage::Decomposition).unwrap().status, StageStatus::Completed);
    assert_eq!(task.stage(Stage::DevelopmentExecution).unwrap().status, StageStatus::Skipped);

    // a separate dashboard process reads the same files
    let dashboard = Dashboard::new(store.reopen());
    let summary = dashboard.get_task_summary(id).await.unwrap().unwrap();
    assert_eq!(summary.status, TaskStatus::Succeeded);
    let view = dashboard.get_task_metrics(id).await.unwrap().unwrap();
    let metrics = view.metrics.unwrap();
    assert_eq!(metrics.coverage_percentage, 100.0);
    assert_eq!(metrics.package_count, 5);
    assert_eq!(metrics.batch_count, 4);
    assert_eq!(dashboard.get_task_detail(id).await.unwrap().unwrap(), task);
}

#[tokio::test]
async fn test_failures_are_isolated_per_task() {
    let store = TestStore::new();
    let pipeline = Arc::new(Pipeline::standard(PlanningConfig::default()));
    let queue = TaskQueue::start(&config(1), Arc::clone(&store.store), pipeline).await.unwrap();

    let broken = queue
        .submit(Job::new("broken", "").with_architecture(serde_json::json!({})))
        .await
        .unwrap();
    let good = queue
        .submit(Job::new("good", "").with_architecture(shop_architecture()))
        .await
        .unwrap();

    let broken = queue.wait_for(broken).await.unwrap();
    assert_eq!(broken.status, TaskStatus::Failed);
    assert!(broken.error.as_deref().unwrap().contains("decomposition stage failed"));
    assert!(broken.metrics.is_none());

    assert_eq!(queue.wait_for(good).await.unwrap().status, TaskStatus::Succeeded);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_late_stage_failure_keeps_plan() {
    let store = TestStore::new();
    let pipeline = Arc::new(Pipeline::standard(PlanningConfig::default()).with_stage(FailingDeploy));
    let queue = TaskQueue::start(&config(1), Arc::clone(&store.store), pipeline).await.unwrap();

    let id = queue
        .submit(Job::new("shop", "").with_architecture(shop_architecture()))
        .await
        .unwrap();
    let task = queue.wait_for(id).await.unwrap();
    queue.shutdown().await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.as_deref().unwrap().contains("no deployment target"));
    assert!(task.artifacts.contains_key("decomposition_plan"));
    assert_eq!(task.metrics.unwrap().package_count, 5);

    let reloaded = TaskStore::open(store.dir.path()).unwrap().load_all().unwrap();
    assert_eq!(reloaded[0].detail.as_ref().unwrap(), &task);
}
