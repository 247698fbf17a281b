#![allow(dead_code)]

use async_trait::async_trait;
use maestro::adapters::{
    health_handler::HealthHandler,
    metrics_handler::{MetricsCollector, MetricsHandler},
    task_handler::AgentState,
};
use maestro::config::AgentRole;
use maestro::domain::{AgentCard, EventSink, Phase, ProgressEvent, Task, TaskExecutor};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct TestServer {
    pub addr: SocketAddr,
    pub base_url: String,
    pub metrics: Arc<MetricsCollector>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Serve `state` on a random local port
    pub async fn start(state: AgentState, role: AgentRole, metrics: Arc<MetricsCollector>) -> Self {
        let workers = state.coordinator.as_ref().map(|c| c.workers().len()).unwrap_or(0);
        let health_handler = Arc::new(HealthHandler::new(role, workers));
        let metrics_handler = Arc::new(MetricsHandler::new(metrics.clone()));
        let app = maestro::create_app(state, health_handler, metrics_handler);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            base_url: format!("http://{}", addr),
            metrics,
            handle,
        }
    }

    /// Serve a single agent
    pub async fn agent(executor: Arc<dyn TaskExecutor>) -> Self {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        Self::start(AgentState::new(executor), AgentRole::Simple, metrics).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Agent that reports RUNNING and then waits until cancelled
#[derive(Default)]
pub struct WaitingAgent {
    sessions: Mutex<HashMap<String, CancellationToken>>,
}

#[async_trait]
impl TaskExecutor for WaitingAgent {
    fn card(&self) -> AgentCard {
        AgentCard::new("waiting", "Waits until cancelled", "local://waiting")
    }

    async fn execute(&self, task: Task, sink: EventSink) {
        let token = CancellationToken::new();
        self.sessions.lock().await.insert(task.session_id.clone(), token.clone());

        if sink.emit(ProgressEvent::status(Phase::Running, "Waiting...")).await.is_ok() {
            while !token.is_cancelled() && !sink.is_closed() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            let _ = sink.emit(ProgressEvent::status(Phase::Cancelled, "Stopped.")).await;
        }

        self.sessions.lock().await.remove(&task.session_id);
    }

    async fn cancel(&self, session_id: &str) -> bool {
        match self.sessions.lock().await.get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Parse an NDJSON body into events
pub fn parse_events(body: &str) -> Vec<ProgressEvent> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// Content of the last whole-text event without a worker tag
pub fn final_text(events: &[ProgressEvent]) -> Option<String> {
    events.iter().rev().find_map(|event| match event {
        ProgressEvent::Text { content, append: false, worker: None } => Some(content.clone()),
        _ => None,
    })
}
