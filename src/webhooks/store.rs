/// SQLite-backed webhook table
///
/// One row per `(webhook_path, method)`; the unique index is what detects two
/// workflows claiming the same URL.

use crate::webhooks::path::WebhookEntity;
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePool, Row};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebhookStoreError {
    #[error("Webhook {method} /{path} is already registered")]
    UniqueViolation { method: String, path: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait WebhookStore: Send + Sync {
    /// Insert a webhook row
    async fn store_webhook(&self, webhook: &WebhookEntity) -> Result<(), WebhookStoreError>;

    /// Delete every webhook row of a workflow
    async fn delete_workflow_webhooks(&self, workflow_id: &str) -> Result<(), WebhookStoreError>;

    /// Webhook rows of a workflow
    async fn find_workflow_webhooks(&self, workflow_id: &str) -> Result<Vec<WebhookEntity>, WebhookStoreError>;
}

#[derive(Debug, Clone)]
pub struct SqliteWebhookStore {
    pool: SqlitePool,
}

impl SqliteWebhookStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the webhook table. Safe to call multiple times.
    pub async fn init_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS webhook_entity (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workflow_id TEXT NOT NULL,
                webhook_path TEXT NOT NULL,
                method TEXT NOT NULL,
                node TEXT NOT NULL,
                webhook_id TEXT,
                path_length INTEGER,
                UNIQUE (webhook_path, method)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_webhook_entity_workflow
            ON webhook_entity(workflow_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl WebhookStore for SqliteWebhookStore {
    async fn store_webhook(&self, webhook: &WebhookEntity) -> Result<(), WebhookStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_entity (workflow_id, webhook_path, method, node, webhook_id, path_length)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&webhook.workflow_id)
        .bind(&webhook.webhook_path)
        .bind(&webhook.method)
        .bind(&webhook.node)
        .bind(&webhook.webhook_id)
        .bind(webhook.path_length.map(i64::from))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(WebhookStoreError::UniqueViolation {
                method: webhook.method.clone(),
                path: webhook.webhook_path.clone(),
            }),
            Err(e) => Err(anyhow::Error::from(e).into()),
        }
    }

    async fn delete_workflow_webhooks(&self, workflow_id: &str) -> Result<(), WebhookStoreError> {
        sqlx::query("DELETE FROM webhook_entity WHERE workflow_id = ?")
            .bind(workflow_id)
            .execute(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(())
    }

    async fn find_workflow_webhooks(&self, workflow_id: &str) -> Result<Vec<WebhookEntity>, WebhookStoreError> {
        let rows = sqlx::query(
            "SELECT workflow_id, webhook_path, method, node, webhook_id, path_length FROM webhook_entity WHERE workflow_id = ? ORDER BY id",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        Ok(rows
            .into_iter()
            .map(|row| WebhookEntity {
                workflow_id: row.get("workflow_id"),
                webhook_path: row.get("webhook_path"),
                method: row.get("method"),
                node: row.get("node"),
                webhook_id: row.get("webhook_id"),
                path_length: row
                    .get::<Option<i64>, _>("path_length")
                    .and_then(|length| u32::try_from(length).ok()),
            })
            .collect())
    }
}
