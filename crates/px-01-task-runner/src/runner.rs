//! # Task Runner
//!
//! Runs an ordered queue of tasks against one mutable model.
//!
//! - Tasks run strictly one after another; the next task starts only after
//!   the previous one's future resolved.
//! - The first `Err` stops the sequence. The caller gets exactly one
//!   `RunnerFault` and handles it; later tasks never run.
//! - A task may append successors through its `Step`. They land at the tail,
//!   after everything already queued.
//! - `CancelHandle::cancel` is observed between tasks, never mid-task.

use crate::error::RunnerFault;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Default bound on the number of tasks one run may execute.
pub const DEFAULT_MAX_TASKS: usize = 64;

/// One protocol step.
#[async_trait]
pub trait Task<M: Send, E: Send>: Send + Sync {
    /// Name used in logs and in the fault message.
    fn name(&self) -> &'static str;

    /// Run against the model. `Ok` completes the step, `Err` fails it.
    async fn run(&self, step: &mut Step<'_, M, E>) -> Result<(), E>;
}

/// A boxed task.
pub type BoxedTask<M, E> = Box<dyn Task<M, E>>;

/// What a running task sees: the model and the append-only tail.
pub struct Step<'a, M, E> {
    model: &'a mut M,
    appended: Vec<BoxedTask<M, E>>,
}

impl<'a, M: Send, E: Send> Step<'a, M, E> {
    /// The shared model.
    pub fn model(&mut self) -> &mut M {
        &mut *self.model
    }

    /// Read-only view of the model.
    pub fn model_ref(&self) -> &M {
        &*self.model
    }

    /// Queue `task` after every task already in the sequence.
    pub fn append(&mut self, task: BoxedTask<M, E>) {
        self.appended.push(task);
    }
}

/// Cooperative cancellation flag shared with the owner of a run.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Create an un-cancelled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the run after the current task.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether `cancel` was called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a run ended without a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every queued task completed.
    Completed,
    /// The run was cancelled between two tasks.
    Cancelled,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Names of the tasks that ran, in order.
    pub executed: Vec<&'static str>,
    /// How the run ended.
    pub outcome: RunOutcome,
}

impl RunReport {
    /// Whether every task completed.
    pub fn is_completed(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}

/// Sequential executor. Owns its queue exclusively.
pub struct TaskRunner<M, E> {
    queue: VecDeque<BoxedTask<M, E>>,
    cancel: CancelHandle,
    max_tasks: usize,
    label: String,
}

impl<M: Send, E: Send> TaskRunner<M, E> {
    /// Create a runner over `tasks`.
    pub fn new(label: impl Into<String>, tasks: Vec<BoxedTask<M, E>>) -> Self {
        Self {
            queue: tasks.into(),
            cancel: CancelHandle::new(),
            max_tasks: DEFAULT_MAX_TASKS,
            label: label.into(),
        }
    }

    /// Observe `cancel` between tasks.
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Bound the number of tasks one run may execute.
    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks;
        self
    }

    /// Handle that cancels this run.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Number of tasks still queued.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Run the queue to completion, cancellation or the first failure.
    pub async fn run(mut self, model: &mut M) -> Result<RunReport, RunnerFault<E>> {
        let mut executed = Vec::new();

        while let Some(task) = self.queue.pop_front() {
            if self.cancel.is_cancelled() {
                debug!(
                    runner = %self.label,
                    executed = executed.len(),
                    skipped = self.queue.len() + 1,
                    "Task sequence cancelled"
                );
                return Ok(RunReport {
                    executed,
                    outcome: RunOutcome::Cancelled,
                });
            }
            if executed.len() >= self.max_tasks {
                warn!(runner = %self.label, limit = self.max_tasks, "Task limit exceeded");
                return Err(RunnerFault::LimitExceeded {
                    limit: self.max_tasks,
                });
            }

            let name = task.name();
            trace!(runner = %self.label, task = name, "Run task");
            executed.push(name);

            let mut step = Step {
                model: &mut *model,
                appended: Vec::new(),
            };
            let result = task.run(&mut step).await;
            let appended = step.appended;

            if let Err(error) = result {
                debug!(runner = %self.label, task = name, "Task failed");
                return Err(RunnerFault::Task {
                    task: name,
                    error,
                    executed,
                });
            }
            self.queue.extend(appended);
        }

        trace!(runner = %self.label, executed = executed.len(), "Task sequence completed");
        Ok(RunReport {
            executed,
            outcome: RunOutcome::Completed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Model {
        log: Vec<&'static str>,
    }

    struct Record(&'static str);

    #[async_trait]
    impl Task<Model, String> for Record {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn run(&self, step: &mut Step<'_, Model, String>) -> Result<(), String> {
            tokio::task::yield_now().await;
            step.model().log.push(self.0);
            Ok(())
        }
    }

    struct Fail(&'static str);

    #[async_trait]
    impl Task<Model, String> for Fail {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn run(&self, step: &mut Step<'_, Model, String>) -> Result<(), String> {
            step.model().log.push(self.0);
            Err(format!("{} broke", self.0))
        }
    }

    /// Appends `n` more copies of itself, counting down.
    struct Recurse(u32);

    #[async_trait]
    impl Task<Model, String> for Recurse {
        fn name(&self) -> &'static str {
            "Recurse"
        }

        async fn run(&self, step: &mut Step<'_, Model, String>) -> Result<(), String> {
            step.model().log.push("recurse");
            if self.0 > 0 {
                step.append(Box::new(Recurse(self.0 - 1)));
            }
            Ok(())
        }
    }

    struct CancelDuring(CancelHandle);

    #[async_trait]
    impl Task<Model, String> for CancelDuring {
        fn name(&self) -> &'static str {
            "CancelDuring"
        }

        async fn run(&self, step: &mut Step<'_, Model, String>) -> Result<(), String> {
            self.0.cancel();
            // The current task still finishes.
            step.model().log.push("cancel-finished");
            Ok(())
        }
    }

    fn boxed(t: impl Task<Model, String> + 'static) -> BoxedTask<Model, String> {
        Box::new(t)
    }

    #[tokio::test]
    async fn test_all_tasks_complete_in_order() {
        let mut model = Model::default();
        let runner = TaskRunner::new(
            "t",
            vec![boxed(Record("a")), boxed(Record("b")), boxed(Record("c"))],
        );

        let report = runner.run(&mut model).await.unwrap();
        assert!(report.is_completed());
        assert_eq!(report.executed, vec!["a", "b", "c"]);
        assert_eq!(model.log, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_failure_at_step_k_stops_sequence() {
        for k in 0..4 {
            let mut tasks = Vec::new();
            let names = ["s1", "s2", "s3", "s4"];
            for (i, name) in names.iter().copied().enumerate() {
                if i == k {
                    tasks.push(boxed(Fail(name)));
                } else {
                    tasks.push(boxed(Record(name)));
                }
            }
            let mut model = Model::default();
            let fault = TaskRunner::new("t", tasks).run(&mut model).await.unwrap_err();

            assert_eq!(model.log, names[..=k].to_vec());
            match fault {
                RunnerFault::Task {
                    task,
                    error,
                    executed,
                } => {
                    assert_eq!(task, names[k]);
                    assert_eq!(error, format!("{} broke", names[k]));
                    assert_eq!(executed.len(), k + 1);
                }
                other => panic!("unexpected fault {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_fault_message_names_task() {
        let mut model = Model::default();
        let fault = TaskRunner::new("t", vec![boxed(Fail("VerifyPeer"))])
            .run(&mut model)
            .await
            .unwrap_err();
        assert_eq!(
            fault.to_string(),
            "An error occurred at task VerifyPeer: VerifyPeer broke"
        );
        assert_eq!(fault.into_task_error(), Some("VerifyPeer broke".to_string()));
    }

    #[tokio::test]
    async fn test_appended_tasks_run_after_queued_ones() {
        let mut model = Model::default();
        let runner = TaskRunner::new("t", vec![boxed(Recurse(2)), boxed(Record("tail"))]);

        let report = runner.run(&mut model).await.unwrap();
        assert_eq!(model.log, vec!["recurse", "tail", "recurse", "recurse"]);
        assert_eq!(report.executed.len(), 4);
    }

    #[tokio::test]
    async fn test_unbounded_append_hits_limit() {
        let mut model = Model::default();
        let fault = TaskRunner::new("t", vec![boxed(Recurse(1000))])
            .with_max_tasks(10)
            .run(&mut model)
            .await
            .unwrap_err();
        assert_eq!(fault, RunnerFault::LimitExceeded { limit: 10 });
        assert_eq!(model.log.len(), 10);
    }

    #[tokio::test]
    async fn test_cancel_waits_for_running_task() {
        let mut model = Model::default();
        let cancel = CancelHandle::new();
        let runner = TaskRunner::new(
            "t",
            vec![
                boxed(Record("a")),
                boxed(CancelDuring(cancel.clone())),
                boxed(Record("never")),
            ],
        )
        .with_cancel(cancel);

        let report = runner.run(&mut model).await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert_eq!(model.log, vec!["a", "cancel-finished"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let mut model = Model::default();
        let runner = TaskRunner::new("t", vec![boxed(Record("a"))]);
        runner.cancel_handle().cancel();
        assert_eq!(runner.pending(), 1);

        let report = runner.run(&mut model).await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert!(model.log.is_empty());
    }
}
