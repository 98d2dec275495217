//! Reload after restart.

use std::sync::Arc;
use std::time::Duration;

use planforge::core::task::{Job, Stage, StageStatus, Task, TaskStatus};
use planforge::executor::queue::INTERRUPTED;
use planforge::executor::{Pipeline, TaskEvent, TaskQueue};
use planforge::planning::PlanningConfig;

use crate::fixtures::{config, shop_architecture, GatedStage, TestStore};

#[tokio::test]
async fn test_succeeded_task_survives_restart() {
    let store = TestStore::new();
    let finished = {
        let pipeline = Arc::new(Pipeline::standard(PlanningConfig::default()));
        let queue = TaskQueue::start(&config(2), Arc::clone(&store.store), pipeline).await.unwrap();
        let id = queue
            .submit(Job::new("shop", "").with_architecture(shop_architecture()))
            .await
            .unwrap();
        let task = queue.wait_for(id).await.unwrap();
        queue.shutdown().await;
        task
    };

    let queue = TaskQueue::start(&config(2), store.reopen(), Arc::new(Pipeline::new()))
        .await
        .unwrap();
    let reloaded = queue.get(finished.id).await.unwrap();
    assert_eq!(reloaded.status, TaskStatus::Succeeded);
    assert_eq!(reloaded, finished);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_restart_fails_running_and_resumes_queued() {
    let store = TestStore::new();
    let (running, queued) = {
        let (stage, _gate) = GatedStage::new();
        let queue = TaskQueue::start(&config(1), Arc::clone(&store.store), Arc::new(Pipeline::new().with_stage(stage)))
            .await
            .unwrap();
        let mut events = queue.subscribe();
        let running = queue.submit(Job::new("running", "")).await.unwrap();
        let queued = queue.submit(Job::new("queued", "")).await.unwrap();
        // wait until the first task is marked running on disk
        loop {
            if let TaskEvent::Started(id) = events.recv().await.unwrap() {
                assert_eq!(id, running);
                break;
            }
        }
        // and its first stage has been recorded, so nothing more is written
        loop {
            let task = queue.get(running).await.unwrap();
            if task.stage(Stage::RequirementAnalysis).unwrap().status == StageStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // the process "dies": the queue is dropped with the gate still closed
        (running, queued)
    };

    let records = store.reopen().load_all().unwrap();
    let statuses: Vec<TaskStatus> = records.iter().map(|r| r.summary.status).collect();
    assert_eq!(statuses, vec![TaskStatus::Running, TaskStatus::Queued]);

    let queue = TaskQueue::start(&config(1), store.reopen(), Arc::new(Pipeline::new()))
        .await
        .unwrap();
    let interrupted: Task = queue.get(running).await.unwrap();
    assert_eq!(interrupted.status, TaskStatus::Failed);
    assert_eq!(interrupted.error.as_deref(), Some(INTERRUPTED));
    assert_eq!(queue.wait_for(queued).await.unwrap().status, TaskStatus::Succeeded);
    queue.shutdown().await;
}
