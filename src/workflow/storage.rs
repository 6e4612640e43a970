/// SQLite persistence layer for workflow records
///
/// Workflows are stored as JSON with the fields the activation subsystem
/// queries on (`active`, `trigger_count`) kept in their own columns.

use crate::workflow::types::WorkflowRecord;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePool, Row};

/// What the activation subsystem needs from workflow storage
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Every workflow whose persisted `active` flag is set
    async fn get_all_active(&self) -> Result<Vec<WorkflowRecord>>;

    async fn find_by_id(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>>;

    /// Persist the number of triggers, pollers and webhooks of a workflow
    async fn update_trigger_count(&self, workflow_id: &str, count: usize) -> Result<()>;
}

/// SQLite-based workflow storage
#[derive(Debug, Clone)]
pub struct SqliteWorkflowStorage {
    /// SQLite connection pool for workflow database
    pool: SqlitePool,
}

impl SqliteWorkflowStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the workflow storage schema
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                active BOOLEAN NOT NULL DEFAULT 0,
                trigger_count INTEGER NOT NULL DEFAULT 0,
                definition JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_workflows_active
            ON workflows(active)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store a new workflow or update an existing one
    ///
    /// Leaves `trigger_count` alone; that column belongs to the activation manager.
    pub async fn save_workflow(&self, workflow: &WorkflowRecord) -> Result<()> {
        let definition_json = serde_json::to_string(workflow)?;

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, active, definition, updated_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                active = excluded.active,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(workflow.active)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Flip the persisted activation flag; false when the workflow doesn't exist
    pub async fn set_active(&self, workflow_id: &str, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE workflows SET active = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
            .bind(active)
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn trigger_count(&self, workflow_id: &str) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT trigger_count FROM workflows WHERE id = ?")
            .bind(workflow_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.get("trigger_count")))
    }

    fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowRecord> {
        let definition_json: String = row.get("definition");
        let mut workflow: WorkflowRecord = serde_json::from_str(&definition_json)?;
        // The column wins over whatever the JSON snapshot says
        workflow.active = row.get("active");
        Ok(workflow)
    }
}

#[async_trait]
impl WorkflowRepository for SqliteWorkflowStorage {
    async fn get_all_active(&self) -> Result<Vec<WorkflowRecord>> {
        let rows = sqlx::query("SELECT active, definition FROM workflows WHERE active = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::record_from_row).collect()
    }

    async fn find_by_id(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>> {
        let row = sqlx::query("SELECT active, definition FROM workflows WHERE id = ?")
            .bind(workflow_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn update_trigger_count(&self, workflow_id: &str, count: usize) -> Result<()> {
        sqlx::query("UPDATE workflows SET trigger_count = ? WHERE id = ?")
            .bind(i64::try_from(count)?)
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
