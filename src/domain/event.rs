//! Progress events and the channel that carries them to the caller

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc;

/// Default capacity of an event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle phase reported by a status event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Analyzing the task and planning
    Thinking,
    /// Work is in progress
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Stopped by an external request
    Cancelled,
}

impl Phase {
    /// Whether no further transitions may follow this phase
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed | Phase::Cancelled)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Thinking => write!(f, "thinking"),
            Phase::Running => write!(f, "running"),
            Phase::Completed => write!(f, "completed"),
            Phase::Failed => write!(f, "failed"),
            Phase::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A progress notification published during a run
///
/// Events forwarded from a worker carry that worker's name in `worker`.
/// Events produced by the run itself leave it empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Phase change
    Status {
        phase: Phase,
        description: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker: Option<String>,
    },
    /// Text output
    Text {
        content: String,
        #[serde(default)]
        append: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker: Option<String>,
    },
}

impl ProgressEvent {
    /// Create a status event
    pub fn status(phase: Phase, description: impl Into<String>) -> Self {
        Self::Status {
            phase,
            description: description.into(),
            worker: None,
        }
    }

    /// Create a text event that replaces any previous text
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            append: false,
            worker: None,
        }
    }

    /// Create a text event that extends the previous text
    pub fn append(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            append: true,
            worker: None,
        }
    }

    /// Stamp the event with the worker it came from
    pub fn from_worker(mut self, name: &str) -> Self {
        match &mut self {
            Self::Status { worker, .. } | Self::Text { worker, .. } => {
                *worker = Some(name.to_string());
            }
        }
        self
    }

    /// Name of the worker that emitted this event, if any
    pub fn worker(&self) -> Option<&str> {
        match self {
            Self::Status { worker, .. } | Self::Text { worker, .. } => worker.as_deref(),
        }
    }

    /// Phase of a status event
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Status { phase, .. } => Some(*phase),
            Self::Text { .. } => None,
        }
    }

    /// Whether this status ends the stream that produced it
    pub fn is_terminal_status(&self) -> bool {
        self.phase().map(|p| p.is_terminal()).unwrap_or(false)
    }

    /// Whether this is the terminal event of a coordination run
    pub fn is_run_terminal(&self) -> bool {
        self.is_terminal_status() && self.worker().is_none()
    }
}

/// The consumer of an event channel went away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event sink closed")]
pub struct SinkClosed;

/// Producer half of an event channel
///
/// Cloning yields another producer on the same channel; each producer's
/// events keep their relative order.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::Sender<ProgressEvent>,
}

impl EventSink {
    /// Publish an event, failing once the consumer has gone away
    pub async fn emit(&self, event: ProgressEvent) -> Result<(), SinkClosed> {
        self.sender.send(event).await.map_err(|_| SinkClosed)
    }

    /// Check if the consumer has gone away
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Consumer half of an event channel
pub struct EventStream {
    receiver: mpsc::Receiver<ProgressEvent>,
}

impl EventStream {
    /// Create a channel pair with the default capacity
    pub fn channel() -> (EventSink, Self) {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    /// Create a channel pair with an explicit capacity
    pub fn with_capacity(buffer: usize) -> (EventSink, Self) {
        let (sender, receiver) = mpsc::channel(buffer);
        (EventSink { sender }, Self { receiver })
    }

    /// Receive the next event
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.recv().await
    }

    /// Drain the stream until every producer has finished
    pub async fn collect_all(mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.receiver.recv().await {
            events.push(event);
        }
        events
    }
}

impl Stream for EventStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = ProgressEvent::status(Phase::Thinking, "planning");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["phase"], "thinking");
        assert!(json.get("worker").is_none());

        let event = ProgressEvent::append("chunk").from_worker("writer");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["append"], true);
        assert_eq!(json["worker"], "writer");
    }

    #[test]
    fn test_text_without_append_field_defaults_to_replace() {
        let event: ProgressEvent =
            serde_json::from_str(r#"{"type":"text","content":"hi"}"#).unwrap();
        assert_eq!(event, ProgressEvent::text("hi"));
    }

    #[test]
    fn test_run_terminal_ignores_worker_events() {
        let worker_done = ProgressEvent::status(Phase::Completed, "done").from_worker("a");
        assert!(worker_done.is_terminal_status());
        assert!(!worker_done.is_run_terminal());

        let run_done = ProgressEvent::status(Phase::Completed, "done");
        assert!(run_done.is_run_terminal());
        assert!(!ProgressEvent::status(Phase::Running, "busy").is_run_terminal());
    }

    #[tokio::test]
    async fn test_concurrent_producers_keep_their_own_order() {
        let (sink, stream) = EventStream::channel();
        let mut handles = Vec::new();
        for producer in ["a", "b"] {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..20 {
                    sink.emit(ProgressEvent::append(i.to_string()).from_worker(producer))
                        .await
                        .unwrap();
                }
            }));
        }
        drop(sink);
        for handle in handles {
            handle.await.unwrap();
        }

        let events = stream.collect_all().await;
        assert_eq!(events.len(), 40);
        for producer in ["a", "b"] {
            let seen: Vec<String> = events
                .iter()
                .filter(|e| e.worker() == Some(producer))
                .map(|e| match e {
                    ProgressEvent::Text { content, .. } => content.clone(),
                    _ => unreachable!(),
                })
                .collect();
            let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
            assert_eq!(seen, expected);
        }
    }

    #[tokio::test]
    async fn test_emit_fails_after_consumer_dropped() {
        let (sink, stream) = EventStream::channel();
        drop(stream);
        assert!(sink.is_closed());
        assert_eq!(sink.emit(ProgressEvent::text("lost")).await, Err(SinkClosed));
    }
}
