//! Error types for the task runner

use thiserror::Error;

/// Why a task sequence stopped without completing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RunnerFault<E> {
    /// A task failed. No later task ran.
    #[error("An error occurred at task {task}: {error}")]
    Task {
        /// Name of the failing task.
        task: &'static str,
        /// The task's error.
        error: E,
        /// Names of the tasks that ran, the failing one included.
        executed: Vec<&'static str>,
    },

    /// Tasks kept appending successors past the bound.
    #[error("Task limit of {limit} exceeded")]
    LimitExceeded { limit: usize },
}

impl<E> RunnerFault<E> {
    /// The task error, if a task failed.
    pub fn task_error(&self) -> Option<&E> {
        match self {
            Self::Task { error, .. } => Some(error),
            Self::LimitExceeded { .. } => None,
        }
    }

    /// Consume the fault, returning the task error if a task failed.
    pub fn into_task_error(self) -> Option<E> {
        match self {
            Self::Task { error, .. } => Some(error),
            Self::LimitExceeded { .. } => None,
        }
    }
}
