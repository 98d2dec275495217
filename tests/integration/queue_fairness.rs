//! FIFO start order and worker pool limits.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use planforge::core::task::{Job, TaskId, TaskStatus};
use planforge::executor::{Pipeline, TaskEvent, TaskQueue};

use crate::fixtures::{config, GatedStage, TestStore};

async fn started(events: &mut tokio::sync::broadcast::Receiver<TaskEvent>, count: usize) -> Vec<TaskId> {
    let mut ids = Vec::new();
    while ids.len() < count {
        if let TaskEvent::Started(id) = events.recv().await.unwrap() {
            ids.push(id);
        }
    }
    ids
}

#[tokio::test]
async fn test_first_n_tasks_reach_running_first() {
    let store = TestStore::new();
    let (stage, gate) = GatedStage::new();
    let queue = TaskQueue::start(&config(3), Arc::clone(&store.store), Arc::new(Pipeline::new().with_stage(stage)))
        .await
        .unwrap();
    let mut events = queue.subscribe();

    let mut ids = Vec::new();
    for n in 0..5 {
        ids.push(queue.submit(Job::new(&format!("task {}", n), "")).await.unwrap());
    }

    let first: HashSet<TaskId> = started(&mut events, 3).await.into_iter().collect();
    assert_eq!(first, ids[..3].iter().copied().collect());

    tokio::time::sleep(Duration::from_millis(50)).await;
    for id in &ids[3..] {
        assert_eq!(queue.get(*id).await.unwrap().status, TaskStatus::Queued);
    }

    // one slot frees up: the fourth task goes next, not the fifth
    gate.add_permits(1);
    assert_eq!(started(&mut events, 1).await, vec![ids[3]]);

    gate.add_permits(4);
    for id in &ids {
        assert_eq!(queue.wait_for(*id).await.unwrap().status, TaskStatus::Succeeded);
    }
    queue.shutdown().await;
}

#[tokio::test]
async fn test_list_reports_creation_order() {
    let store = TestStore::new();
    let queue = TaskQueue::start(&config(2), Arc::clone(&store.store), Arc::new(Pipeline::new()))
        .await
        .unwrap();

    let a = queue.submit(Job::new("alpha", "")).await.unwrap();
    let b = queue.submit(Job::new("beta", "")).await.unwrap();
    queue.wait_for(a).await.unwrap();
    queue.wait_for(b).await.unwrap();

    let listed: Vec<TaskId> = queue.list().await.into_iter().map(|t| t.id).collect();
    assert_eq!(listed, vec![a, b]);
    queue.shutdown().await;
}
