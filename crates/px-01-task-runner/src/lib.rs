//! # px-01-task-runner
//!
//! Sequential task executor shared by every trade protocol.
//!
//! ## Overview
//!
//! A protocol reacts to an action or an inbound message by building a list
//! of tasks and handing it to a `TaskRunner` together with the trade's
//! process model. The runner executes the tasks one at a time:
//!
//! ```text
//! [task 1] ──Ok──→ [task 2] ──Ok──→ ... ──Ok──→ [task N] ──→ RunReport
//!               │
//!               └──Err──→ RunnerFault (remaining tasks never run)
//! ```
//!
//! The crate also provides `Timer`, the single-owner timeout used by the
//! availability handshake, the trade protocol and the dispute retry.
//!
//! ## Example
//!
//! ```rust,ignore
//! let runner = TaskRunner::new(trade_id.short(), vec![
//!     Box::new(ValidateRequest),
//!     Box::new(VerifyPeerInputs),
//!     Box::new(SendResponse),
//! ]);
//! match runner.run(&mut model).await {
//!     Ok(report) => on_complete(report),
//!     Err(fault) => on_fault(fault),
//! }
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod error;
pub mod runner;
pub mod timer;

pub use error::RunnerFault;
pub use runner::{
    BoxedTask, CancelHandle, RunOutcome, RunReport, Step, Task, TaskRunner, DEFAULT_MAX_TASKS,
};
pub use timer::Timer;
