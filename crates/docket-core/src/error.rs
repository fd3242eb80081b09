//! Error types surfaced by the task store.

use thiserror::Error;

use crate::task::TaskId;

/// Result type for task store operations.
pub type TaskResult<T> = Result<T, TaskError>;

/// A write that was rejected before touching the collection.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The task text is empty after trimming.
    #[error("task text must not be empty")]
    EmptyText,

    /// An end time was given without a start time.
    #[error("end time requires a start time")]
    EndWithoutStart,

    /// The end time precedes the start time.
    #[error("end time cannot be before start time")]
    EndBeforeStart,

    /// A reminder was submitted without a start time while the policy requires one.
    #[error("reminders require a start time")]
    ReminderWithoutStart,
}

/// Errors returned by [`crate::store::TaskStore`] mutations.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The stored collection already holds the largest possible id.
    #[error("no task ids left to assign")]
    IdsExhausted,

    /// The storage backend refused the write; the mutation was rolled back.
    #[error("failed to persist tasks")]
    Persist(#[source] anyhow::Error),
}
