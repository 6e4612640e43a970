mod common;

use common::{trigger_node, webhook_node, workflow};
use flowgate::{
    database,
    webhooks::{SqliteWebhookStore, WebhookEntity, WebhookStore, WebhookStoreError},
    workflow::storage::{SqliteWorkflowStorage, WorkflowRepository},
};

fn entity(workflow_id: &str, path: &str, method: &str) -> WebhookEntity {
    WebhookEntity {
        workflow_id: workflow_id.to_string(),
        webhook_path: path.to_string(),
        method: method.to_string(),
        node: "Hook".to_string(),
        webhook_id: None,
        path_length: None,
    }
}

#[tokio::test]
async fn workflows_round_trip_with_the_active_column_winning() {
    let pool = database::connect_in_memory().await.unwrap();
    let storage = SqliteWorkflowStorage::new(pool);

    storage
        .save_workflow(&workflow("wf-1", true, vec![trigger_node("Listener")]))
        .await
        .unwrap();
    storage
        .save_workflow(&workflow("wf-2", false, vec![webhook_node("Hook", "orders")]))
        .await
        .unwrap();

    let active = storage.get_all_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, "wf-1");
    assert_eq!(active[0].nodes[0].name, "Listener");

    assert!(storage.set_active("wf-1", false).await.unwrap());
    assert!(!storage.set_active("wf-missing", true).await.unwrap());

    let stored = storage.find_by_id("wf-1").await.unwrap().unwrap();
    assert!(!stored.active);
    assert!(storage.get_all_active().await.unwrap().is_empty());
    assert!(storage.find_by_id("wf-missing").await.unwrap().is_none());
}

#[tokio::test]
async fn trigger_count_survives_saves() {
    let pool = database::connect_in_memory().await.unwrap();
    let storage = SqliteWorkflowStorage::new(pool);
    let record = workflow("wf-1", true, vec![trigger_node("Listener")]);

    storage.save_workflow(&record).await.unwrap();
    storage.update_trigger_count("wf-1", 3).await.unwrap();
    storage.save_workflow(&record).await.unwrap();

    assert_eq!(storage.trigger_count("wf-1").await.unwrap(), Some(3));
    assert_eq!(storage.trigger_count("wf-missing").await.unwrap(), None);
}

#[tokio::test]
async fn duplicate_webhook_paths_are_unique_violations() {
    let pool = database::connect_in_memory().await.unwrap();
    let store = SqliteWebhookStore::new(pool);

    store.store_webhook(&entity("wf-1", "orders", "POST")).await.unwrap();
    // Same path, other method
    store.store_webhook(&entity("wf-1", "orders", "GET")).await.unwrap();

    let error = store
        .store_webhook(&entity("wf-2", "orders", "POST"))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        WebhookStoreError::UniqueViolation { ref method, ref path } if method == "POST" && path == "orders"
    ));
}

#[tokio::test]
async fn webhooks_are_deleted_per_workflow() {
    let pool = database::connect_in_memory().await.unwrap();
    let store = SqliteWebhookStore::new(pool);

    let mut dynamic = entity("wf-1", "7f3a/user/:id", "GET");
    dynamic.webhook_id = Some("7f3a".into());
    dynamic.path_length = Some(3);
    store.store_webhook(&dynamic).await.unwrap();
    store.store_webhook(&entity("wf-1", "orders", "POST")).await.unwrap();
    store.store_webhook(&entity("wf-2", "invoices", "POST")).await.unwrap();

    assert_eq!(
        store.find_workflow_webhooks("wf-1").await.unwrap(),
        vec![dynamic, entity("wf-1", "orders", "POST")]
    );

    store.delete_workflow_webhooks("wf-1").await.unwrap();

    assert!(store.find_workflow_webhooks("wf-1").await.unwrap().is_empty());
    assert_eq!(store.find_workflow_webhooks("wf-2").await.unwrap().len(), 1);
    // Path is free again
    store.store_webhook(&entity("wf-3", "orders", "POST")).await.unwrap();
}
