//! Ports: the seams between the core and its collaborators.
//!
//! Each trait hides an external system (relational store, browser-driving
//! executor, email delivery, wall clock) behind an interface the services
//! depend on. The in-memory store and the no-op notifier live in this crate;
//! real implementations live outside.

pub mod clock;
pub mod executor;
pub mod notifier;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use executor::ApplicationExecutor;
pub use notifier::{ApprovalNotifier, NoopNotifier};
pub use store::{TaskStore, TransitionCtx};
