/// Trigger and poll runtime
///
/// This module holds everything that keeps an activated workflow listening:
/// - The registry of running triggers and scheduled pollers
/// - Contexts through which nodes emit data and errors
/// - Cron scheduling for poll nodes
/// - Hand-off of emitted data to execution

// Registry of running triggers and pollers
pub mod active_workflows;

// Trigger/poll contexts and the emit channels
pub mod context;

// Poll time parsing and cron expression rules
pub mod poll_times;

// Cron task manager backing poll schedules
pub mod scheduler;

// Execution dispatch and error workflow hand-off
pub mod runner;

pub use active_workflows::ActiveWorkflows;
pub use scheduler::{CronTaskManager, ScheduledTaskManager};
