//! Core types shared by the coordinator, the bundled agents and the HTTP adapters

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod card;
pub mod event;

pub use card::{AgentCapabilities, AgentCard, AgentSkill, AGENT_CARD_PATH};
pub use event::{EventSink, EventStream, Phase, ProgressEvent, SinkClosed};

/// One unit of work submitted to an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub instruction: String,
    pub session_id: String,
}

impl Task {
    pub fn new(instruction: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            session_id: session_id.into(),
        }
    }

    /// Create a task with a freshly generated session id
    pub fn with_new_session(instruction: impl Into<String>) -> Self {
        Self::new(instruction, uuid::Uuid::new_v4().to_string())
    }
}

/// Body of a task submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl From<TaskRequest> for Task {
    fn from(request: TaskRequest) -> Self {
        match request.session_id {
            Some(id) if !id.is_empty() => Task::new(request.instruction, id),
            _ => Task::with_new_session(request.instruction),
        }
    }
}

/// Port implemented by anything that can serve tasks: the coordinator and the bundled agents
///
/// `execute` must publish exactly one terminal status as its last event.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Card describing this executor
    fn card(&self) -> AgentCard;

    /// Run a task to completion, publishing progress to `sink`
    async fn execute(&self, task: Task, sink: EventSink);

    /// Request cancellation of a running session; returns false if nothing was running
    async fn cancel(&self, session_id: &str) -> bool;
}
