//! Error types for coordination runs

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::SinkClosed;

/// A worker reported a failed terminal status
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("worker '{worker}' failed: {description}")]
pub struct WorkerInvocationError {
    pub worker: String,
    pub description: String,
}

impl WorkerInvocationError {
    pub fn new(worker: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            description: description.into(),
        }
    }
}

/// Errors that can occur while coordinating workers
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Worker address unreachable at connect time
    #[error("cannot connect to worker '{worker}': {reason}")]
    Connection { worker: String, reason: String },

    /// A single worker failed
    #[error(transparent)]
    WorkerInvocation(#[from] WorkerInvocationError),

    /// One or more workers failed
    #[error("{} worker(s) failed: {}", .0.len(), format_failures(.0))]
    AggregateFailure(Vec<WorkerInvocationError>),

    /// Plan referenced a worker that is not configured
    #[error("unknown worker: {0}")]
    UnknownWorker(String),

    /// Worker selection failed
    #[error("routing failed: {0}")]
    Routing(String),

    /// Result synthesis failed
    #[error("synthesis failed: {0}")]
    Synthesis(String),

    /// Operation exceeded its time limit
    #[error("timed out after {0}s")]
    Timeout(u64),

    /// Run was cancelled
    #[error("run was cancelled")]
    Cancelled,

    /// The consumer of the event stream went away
    #[error("event sink closed")]
    SinkClosed,

    /// Catch-all for anything else that goes wrong inside a run
    #[error("{0}")]
    Coordination(String),
}

impl From<SinkClosed> for CoordinationError {
    fn from(_: SinkClosed) -> Self {
        CoordinationError::SinkClosed
    }
}

fn format_failures(failures: &[WorkerInvocationError]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl CoordinationError {
    /// Connection failure for a named worker
    pub fn connection(worker: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Connection {
            worker: worker.into(),
            reason: reason.to_string(),
        }
    }

    /// Per-worker failures carried by this error, if any
    pub fn worker_failures(&self) -> Vec<&WorkerInvocationError> {
        match self {
            Self::WorkerInvocation(e) => vec![e],
            Self::AggregateFailure(list) => list.iter().collect(),
            _ => Vec::new(),
        }
    }
}

/// Result type alias for coordination operations
pub type CoordinationResult<T> = Result<T, CoordinationError>;
