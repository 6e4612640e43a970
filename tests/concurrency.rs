mod common;

use common::within;
use flowgate::{
    concurrency::{ConcurrencyControlService, ConcurrencyQueue},
    workflow::types::ExecutionMode,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;

/// Spawn `enqueue` calls in order, reporting each admission on a channel
async fn spawn_waiters(queue: &Arc<ConcurrencyQueue>, ids: &[&str]) -> mpsc::UnboundedReceiver<String> {
    let (admitted_tx, admitted) = mpsc::unbounded_channel();
    for id in ids {
        let queue = Arc::clone(queue);
        let admitted_tx = admitted_tx.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            queue.enqueue(&id).await;
            let _ = admitted_tx.send(id);
        });
        // Let the task reach the queue before spawning the next one
        tokio::task::yield_now().await;
    }
    admitted
}

#[tokio::test]
async fn capacity_one_admits_the_next_waiter_on_release() {
    let queue = Arc::new(ConcurrencyQueue::new(1));
    let mut admitted = spawn_waiters(&queue, &["1", "2"]).await;

    assert_eq!(within(admitted.recv()).await.as_deref(), Some("1"));
    assert_eq!(queue.running(), vec!["1".to_string()]);
    assert_eq!(queue.waiting(), vec!["2".to_string()]);

    queue.dequeue();

    assert_eq!(within(admitted.recv()).await.as_deref(), Some("2"));
    assert_eq!(queue.running(), vec!["2".to_string()]);
    assert!(queue.waiting().is_empty());
}

#[tokio::test]
async fn waiters_are_admitted_in_arrival_order() {
    let queue = Arc::new(ConcurrencyQueue::new(2));
    let mut admitted = spawn_waiters(&queue, &["a", "b", "c", "d", "e"]).await;

    assert_eq!(within(admitted.recv()).await.as_deref(), Some("a"));
    assert_eq!(within(admitted.recv()).await.as_deref(), Some("b"));
    assert_eq!(queue.get_all(), vec!["a", "b", "c", "d", "e"]);

    for expected in ["c", "d", "e"] {
        queue.dequeue();
        assert_eq!(within(admitted.recv()).await.as_deref(), Some(expected));
        assert!(queue.running().len() <= queue.capacity());
    }
}

#[tokio::test]
async fn removing_is_idempotent_and_never_admits_the_removed_waiter() {
    let queue = Arc::new(ConcurrencyQueue::new(1));
    let mut admitted = spawn_waiters(&queue, &["1", "2", "3"]).await;
    assert_eq!(within(admitted.recv()).await.as_deref(), Some("1"));

    queue.remove("2");
    queue.remove("2");
    assert_eq!(queue.get_all(), vec!["1", "3"]);

    queue.dequeue();
    assert_eq!(within(admitted.recv()).await.as_deref(), Some("3"));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(admitted.try_recv().is_err());
}

#[tokio::test]
async fn removing_a_running_execution_frees_its_slot() {
    let queue = Arc::new(ConcurrencyQueue::new(1));
    let mut admitted = spawn_waiters(&queue, &["1", "2"]).await;
    assert_eq!(within(admitted.recv()).await.as_deref(), Some("1"));

    queue.remove("1");

    assert_eq!(within(admitted.recv()).await.as_deref(), Some("2"));
    assert_eq!(queue.running(), vec!["2".to_string()]);
}

#[tokio::test]
async fn releasing_with_nothing_running_is_a_no_op() {
    let queue = ConcurrencyQueue::new(1);
    queue.dequeue();
    queue.enqueue("1").await;
    assert_eq!(queue.running(), vec!["1".to_string()]);
}

#[tokio::test]
async fn internal_modes_bypass_the_production_queue() {
    let service = ConcurrencyControlService::new(1).unwrap();
    service.check("prod-1", ExecutionMode::Webhook).await;

    for (id, mode) in [
        ("manual-1", ExecutionMode::Manual),
        ("retry-1", ExecutionMode::Retry),
        ("error-1", ExecutionMode::Error),
        ("internal-1", ExecutionMode::Internal),
    ] {
        within(service.check(id, mode)).await;
        service.release(mode);
        service.remove(id, mode);
    }

    assert_eq!(service.snapshot().running, vec!["prod-1".to_string()]);
    assert!(service.snapshot().waiting.is_empty());
}

#[tokio::test]
async fn service_gates_webhook_and_trigger_executions_together() {
    let service = Arc::new(ConcurrencyControlService::new(1).unwrap());
    service.check("hook-1", ExecutionMode::Webhook).await;

    let waiting = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.check("trigger-1", ExecutionMode::Trigger).await })
    };
    tokio::task::yield_now().await;
    assert_eq!(service.snapshot().waiting, vec!["trigger-1".to_string()]);

    service.release(ExecutionMode::Webhook);
    within(waiting).await.unwrap();
    assert_eq!(service.snapshot().running, vec!["trigger-1".to_string()]);
}

#[tokio::test]
async fn remove_all_drops_running_and_waiting_executions() {
    let service = Arc::new(ConcurrencyControlService::new(1).unwrap());
    service.check("1", ExecutionMode::Trigger).await;
    let blocked = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.check("2", ExecutionMode::Trigger).await })
    };
    tokio::task::yield_now().await;

    service.remove_all();

    let snapshot = service.snapshot();
    assert!(snapshot.running.is_empty());
    assert!(snapshot.waiting.is_empty());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!blocked.is_finished());
    blocked.abort();
}

#[tokio::test]
async fn disabled_service_lets_everything_through() {
    let service = ConcurrencyControlService::new(-1).unwrap();
    for i in 0..10 {
        within(service.check(&format!("exec-{i}"), ExecutionMode::Webhook)).await;
    }
    service.release(ExecutionMode::Webhook);

    let snapshot = service.snapshot();
    assert!(!snapshot.enabled);
    assert!(snapshot.running.is_empty());
}
