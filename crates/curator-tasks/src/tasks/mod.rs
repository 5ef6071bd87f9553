//! Background task implementations
//!
//! Each task is a straight-line procedure over the task context, checking
//! its soft-timeout budget between files. The scheduler owns parallelism;
//! no task spawns its own workers.

pub mod clone_local;
pub mod hypervisor;
pub mod integrity;
pub mod queue;
pub mod receive;
pub mod send;

use crate::config::{
    CheckConsumedQueueConfig, CheckIntegrityConfig, ConsumeQueueConfig, CreateLocalCloneConfig,
    HypervisorConfig, ReceiveCloneConfig, SendCloneConfig,
};
use crate::context::TaskContext;
use crate::scheduler::TaskBudget;

/// A task instance with its parameters, dispatched by the scheduler
pub enum TaskSpec {
    CheckIntegrity(CheckIntegrityConfig),
    CreateLocalClone(CreateLocalCloneConfig),
    SendClone(SendCloneConfig),
    ConsumeQueue(ConsumeQueueConfig),
    CheckConsumedQueue(CheckConsumedQueueConfig),
    ReceiveClone(ReceiveCloneConfig),
    OutgoingHypervisor(HypervisorConfig),
    IncomingHypervisor(HypervisorConfig),
}

/// Runs one task to completion or soft timeout
pub async fn run(context: &TaskContext, spec: &TaskSpec, budget: &TaskBudget) -> anyhow::Result<()> {
    match spec {
        TaskSpec::CheckIntegrity(c) => integrity::check_integrity(context, c, budget).await,
        TaskSpec::CreateLocalClone(c) => clone_local::create_local_clone(context, c, budget).await,
        TaskSpec::SendClone(c) => send::send_clone(context, c).await,
        TaskSpec::ConsumeQueue(c) => queue::consume_queue(context, c, budget).await,
        TaskSpec::CheckConsumedQueue(_) => queue::check_consumed_queue(context, budget).await,
        TaskSpec::ReceiveClone(c) => receive::receive_clone(context, c, budget).await,
        TaskSpec::OutgoingHypervisor(c) => {
            hypervisor::outgoing_transfer_hypervisor(context, c, budget).await
        }
        TaskSpec::IncomingHypervisor(c) => {
            hypervisor::incoming_transfer_hypervisor(context, c, budget).await
        }
    }
}
