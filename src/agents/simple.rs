//! Agent that answers with canned replies

use async_trait::async_trait;

use crate::domain::{AgentCard, AgentSkill, EventSink, Phase, ProgressEvent, Task, TaskExecutor};

/// Replies to greetings and help requests and echoes everything else
pub struct SimpleAgent {
    url: String,
}

impl SimpleAgent {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Reply for a single instruction
    pub fn respond(instruction: &str) -> String {
        let lower = instruction.to_lowercase();
        if lower.contains("hello") {
            "Hello! I'm a simple agent. How can I help you today?".to_string()
        } else if lower.contains("help") {
            "I'm a simple agent that can respond to your messages. Ask me anything!".to_string()
        } else {
            format!(
                "You said: '{}'. I'm a simple agent - give me a greeting or ask for help!",
                instruction
            )
        }
    }
}

impl Default for SimpleAgent {
    fn default() -> Self {
        Self::new("local://simple")
    }
}

#[async_trait]
impl TaskExecutor for SimpleAgent {
    fn card(&self) -> AgentCard {
        AgentCard::new("simple", "A simple agent that responds to messages", self.url.clone())
            .with_skill(
                AgentSkill::new("chat", "Chat", "Responds to greetings and questions")
                    .with_tags(&["chat", "greeting"])
                    .with_examples(&["hello", "help"]),
            )
    }

    async fn execute(&self, task: Task, sink: EventSink) {
        tracing::debug!("Simple agent handling session {}", task.session_id);

        let events = [
            ProgressEvent::status(Phase::Thinking, "Processing your request..."),
            ProgressEvent::text(Self::respond(&task.instruction)),
            ProgressEvent::status(Phase::Completed, "Task completed successfully!"),
        ];
        for event in events {
            if sink.emit(event).await.is_err() {
                tracing::debug!("Caller went away during session {}", task.session_id);
                return;
            }
        }
    }

    /// Replies are produced immediately so there is never anything to cancel
    async fn cancel(&self, _session_id: &str) -> bool {
        false
    }
}
