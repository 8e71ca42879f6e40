//! autoapply-core
//!
//! Durable, single-writer task queue with an embedded state machine that
//! drives a batch of job-application tasks to completion. Individual tasks
//! pause when they need a human (authentication, missing answers, final
//! approval) without pausing the batch, and the side-effecting submit step
//! runs at most once per (run, user, target) fingerprint.
//!
//! # Modules
//! - **domain**: ids, states and the allowed-transition table, records,
//!   executor callback contract, errors
//! - **ports**: seams to collaborators (task store, executor, notifier, clock)
//! - **store**: in-memory `TaskStore` honoring the dequeue/locking contract
//! - **queue**: dequeue, stuck-task recovery, manual resume, retry policy
//! - **approval**: time-boxed single-use approval tokens
//! - **signal**: level-triggered interruption flag for approval preemption
//! - **submit**: idempotent submit guard
//! - **worker**: the single consumer loop and the maintenance loop

pub mod approval;
pub mod config;
pub mod domain;
pub mod ports;
pub mod queue;
pub mod signal;
pub mod store;
pub mod submit;
pub mod worker;

pub use approval::ApprovalService;
pub use config::CoreConfig;
pub use queue::QueueService;
pub use signal::InterruptSignal;
pub use store::MemoryStore;
pub use submit::{fingerprint, SubmitGuard, SubmitResult};
pub use worker::{spawn_maintenance, LoopHandle, Worker};
