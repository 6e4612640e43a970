/// Cron task scheduling for poll nodes
///
/// Poll schedules are registered per workflow and removed by the job UUID the
/// scheduler hands out. The registry only sees the [`ScheduledTaskManager`]
/// trait, so tests can swap in a recording fake.

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// A task that runs on every tick of a schedule
pub type ScheduledTask = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[async_trait]
pub trait ScheduledTaskManager: Send + Sync {
    /// Run `task` on every tick of a six-field (seconds first) cron expression
    async fn register_cron(&self, workflow_id: &str, expression: &str, task: ScheduledTask) -> Result<Uuid>;

    /// Stop a previously registered task
    async fn deregister(&self, handle: &Uuid) -> Result<()>;
}

/// tokio-cron-scheduler backed task manager
pub struct CronTaskManager {
    scheduler: Arc<RwLock<JobScheduler>>,
    /// Job UUID -> owning workflow id
    job_uuid_map: Arc<RwLock<HashMap<Uuid, String>>>,
}

impl CronTaskManager {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            job_uuid_map: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting cron task manager");
        let scheduler = self.scheduler.read().await;
        scheduler.start().await?;
        Ok(())
    }

    /// Drop every job and shut the scheduler down
    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping cron task manager");

        {
            let mut job_uuid_map = self.job_uuid_map.write().await;
            job_uuid_map.clear();
        }

        let mut scheduler = self.scheduler.write().await;
        scheduler.shutdown().await?;

        tracing::info!("✅ Cron task manager stopped");
        Ok(())
    }

    /// Number of live jobs
    pub async fn registered_count(&self) -> usize {
        self.job_uuid_map.read().await.len()
    }

    /// Live jobs owned by a workflow
    pub async fn workflow_jobs(&self, workflow_id: &str) -> Vec<Uuid> {
        self.job_uuid_map
            .read()
            .await
            .iter()
            .filter(|(_, owner)| owner.as_str() == workflow_id)
            .map(|(uuid, _)| *uuid)
            .collect()
    }
}

#[async_trait]
impl ScheduledTaskManager for CronTaskManager {
    async fn register_cron(&self, workflow_id: &str, expression: &str, task: ScheduledTask) -> Result<Uuid> {
        let workflow_id_owned = workflow_id.to_string();
        let job = Job::new_async(expression, move |_uuid, _l| {
            tracing::debug!("🔔 Poll tick for workflow {}", workflow_id_owned);
            task()
        })
        .map_err(|e| anyhow::anyhow!("Invalid cron expression \"{}\": {}", expression, e))?;

        let job_uuid = {
            let scheduler = self.scheduler.read().await;
            scheduler.add(job).await?
        };

        {
            let mut job_uuid_map = self.job_uuid_map.write().await;
            job_uuid_map.insert(job_uuid, workflow_id.to_string());
        }

        tracing::debug!("📝 Registered cron job {} ({}) for workflow {}", job_uuid, expression, workflow_id);
        Ok(job_uuid)
    }

    async fn deregister(&self, handle: &Uuid) -> Result<()> {
        let owner = self.job_uuid_map.write().await.remove(handle);
        if owner.is_none() {
            tracing::debug!("⏭️ Cron job {} was not registered", handle);
            return Ok(());
        }

        let scheduler = self.scheduler.read().await;
        scheduler.remove(handle).await?;
        tracing::debug!("🛑 Removed cron job {}", handle);
        Ok(())
    }
}
