//! Background task scheduler
//!
//! One cooperative loop: every tick, each due task is claimed through the
//! database (so several worker processes never run the same task
//! concurrently), executed to completion or soft timeout, and released
//! with its outcome logged. Tasks run serially within a tick; the database
//! is the only coordinator.

use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use curator_core::domain::TaskOutcome;

use crate::config::BackgroundConfig;
use crate::context::TaskContext;
use crate::tasks::{self, TaskSpec};

/// Soft-timeout budget checked between files
///
/// Tasks never abort mid-file: the budget is consulted at file boundaries
/// and the task winds down once it is spent.
#[derive(Debug, Clone, Copy)]
pub struct TaskBudget {
    deadline: Instant,
}

impl TaskBudget {
    /// Creates a budget expiring after `soft_timeout`
    pub fn new(soft_timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + soft_timeout,
        }
    }

    /// Whether the budget is spent
    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// One schedulable task instance
struct ScheduledTask {
    name: String,
    every: Duration,
    soft_timeout: Duration,
    spec: TaskSpec,
    next_run: Instant,
}

/// The background scheduler
pub struct TaskScheduler {
    context: TaskContext,
    tasks: Vec<ScheduledTask>,
}

impl TaskScheduler {
    /// Builds the schedule from a validated background configuration
    pub fn new(context: TaskContext, config: &BackgroundConfig) -> Self {
        let mut tasks = Vec::new();
        let now = Instant::now();

        let mut push = |name: Option<&String>, default: String, every: u64, soft: u64, spec: TaskSpec| {
            tasks.push(ScheduledTask {
                name: name.cloned().unwrap_or(default),
                every: Duration::from_secs(every),
                soft_timeout: Duration::from_secs(soft),
                spec,
                next_run: now,
            });
        };

        for (i, c) in config.check_integrity.iter().enumerate() {
            push(
                c.common.name.as_ref(),
                format!("check_integrity.{i}"),
                c.common.every_secs,
                c.common.soft_timeout_secs,
                TaskSpec::CheckIntegrity(c.clone()),
            );
        }
        for (i, c) in config.create_local_clone.iter().enumerate() {
            push(
                c.common.name.as_ref(),
                format!("create_local_clone.{i}"),
                c.common.every_secs,
                c.common.soft_timeout_secs,
                TaskSpec::CreateLocalClone(c.clone()),
            );
        }
        for (i, c) in config.send_clone.iter().enumerate() {
            push(
                c.common.name.as_ref(),
                format!("send_clone.{i}"),
                c.common.every_secs,
                c.common.soft_timeout_secs,
                TaskSpec::SendClone(c.clone()),
            );
        }
        for (i, c) in config.consume_queue.iter().enumerate() {
            push(
                c.common.name.as_ref(),
                format!("consume_queue.{i}"),
                c.common.every_secs,
                c.common.soft_timeout_secs,
                TaskSpec::ConsumeQueue(c.clone()),
            );
        }
        for (i, c) in config.check_consumed_queue.iter().enumerate() {
            push(
                c.common.name.as_ref(),
                format!("check_consumed_queue.{i}"),
                c.common.every_secs,
                c.common.soft_timeout_secs,
                TaskSpec::CheckConsumedQueue(c.clone()),
            );
        }
        for (i, c) in config.receive_clone.iter().enumerate() {
            push(
                c.common.name.as_ref(),
                format!("receive_clone.{i}"),
                c.common.every_secs,
                c.common.soft_timeout_secs,
                TaskSpec::ReceiveClone(c.clone()),
            );
        }
        for (i, c) in config.outgoing_transfer_hypervisor.iter().enumerate() {
            push(
                c.common.name.as_ref(),
                format!("outgoing_transfer_hypervisor.{i}"),
                c.common.every_secs,
                c.common.soft_timeout_secs,
                TaskSpec::OutgoingHypervisor(c.clone()),
            );
        }
        for (i, c) in config.incoming_transfer_hypervisor.iter().enumerate() {
            push(
                c.common.name.as_ref(),
                format!("incoming_transfer_hypervisor.{i}"),
                c.common.every_secs,
                c.common.soft_timeout_secs,
                TaskSpec::IncomingHypervisor(c.clone()),
            );
        }

        info!(tasks = tasks.len(), "Built background schedule");
        Self { context, tasks }
    }

    /// Number of scheduled tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the schedule is empty
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Main scheduler loop; returns when the token is cancelled
    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!("Background scheduler starting");
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.run_due_tasks().await;
                }
                _ = shutdown.cancelled() => {
                    info!("Background scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// Runs every due task, serially
    async fn run_due_tasks(&mut self) {
        let now = Instant::now();
        for task in &mut self.tasks {
            if task.next_run > now {
                continue;
            }
            task.next_run = now + task.every;

            // Another worker process may hold the claim; a claim is stale
            // once its holder could not still be inside the task.
            let stale_secs = (task.every + 2 * task.soft_timeout).as_secs() as i64;
            match self.context.repository.claim_task(&task.name, stale_secs).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(task = %task.name, "Task is claimed elsewhere");
                    continue;
                }
                Err(e) => {
                    error!(task = %task.name, error = %e, "Failed to consult task claims");
                    continue;
                }
            }

            let claimed_at = Utc::now();
            let budget = TaskBudget::new(task.soft_timeout);
            debug!(task = %task.name, "Running background task");

            let outcome = match tasks::run(&self.context, &task.spec, &budget).await {
                Ok(()) if budget.expired() => TaskOutcome::TimedOut,
                Ok(()) => TaskOutcome::Succeeded,
                Err(e) => {
                    // Task-boundary catch: log and let the next tick retry.
                    error!(task = %task.name, error = %e, "Background task failed");
                    TaskOutcome::Failed
                }
            };

            if let Err(e) = self
                .context
                .repository
                .release_task(&task.name, claimed_at, outcome)
                .await
            {
                error!(task = %task.name, error = %e, "Failed to release task claim");
            }
        }
    }

    /// Runs one named task immediately, outside the cadence (tests,
    /// operator tooling)
    pub async fn run_task_now(&self, name: &str) -> anyhow::Result<()> {
        let task = self
            .tasks
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| anyhow::anyhow!("no task named {name}"))?;
        let budget = TaskBudget::new(task.soft_timeout);
        tasks::run(&self.context, &task.spec, &budget).await
    }
}
