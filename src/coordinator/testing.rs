//! Scripted in-process workers for coordinator tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::error::CoordinationResult;
use super::transport::{Connection, LocalTransport, Transport};
use super::worker::WorkerSet;
use crate::domain::{AgentCard, EventSink, Phase, ProgressEvent, Task, TaskExecutor};

type ReplyFn = Arc<dyn Fn(&str) -> Result<String, String> + Send + Sync>;

enum Reply {
    Respond(ReplyFn),
    /// Emit text then stop without a terminal status
    Silent,
    /// Never finish
    Hang,
}

/// Worker whose replies are computed from its instruction
pub struct ScriptedAgent {
    name: String,
    reply: Reply,
    delay: Option<Duration>,
    instructions: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    fn build(name: &str, reply: Reply) -> Self {
        Self {
            name: name.to_string(),
            reply,
            delay: None,
            instructions: Mutex::new(Vec::new()),
        }
    }

    pub fn with(name: &str, f: impl Fn(&str) -> Result<String, String> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self::build(name, Reply::Respond(Arc::new(f))))
    }

    pub fn ok(name: &str, output: &str) -> Arc<Self> {
        let output = output.to_string();
        Self::with(name, move |_| Ok(output.clone()))
    }

    pub fn failing(name: &str, description: &str) -> Arc<Self> {
        let description = description.to_string();
        Self::with(name, move |_| Err(description.clone()))
    }

    pub fn silent(name: &str) -> Arc<Self> {
        Arc::new(Self::build(name, Reply::Silent))
    }

    pub fn hanging(name: &str) -> Arc<Self> {
        Arc::new(Self::build(name, Reply::Hang))
    }

    pub fn delayed(name: &str, output: &str, delay: Duration) -> Arc<Self> {
        let output = output.to_string();
        let mut agent = Self::build(name, Reply::Respond(Arc::new(move |_| Ok(output.clone()))));
        agent.delay = Some(delay);
        Arc::new(agent)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instructions received so far, in arrival order
    pub fn instructions(&self) -> Vec<String> {
        self.instructions.lock().unwrap().clone()
    }

    pub fn invocations(&self) -> usize {
        self.instructions.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedAgent {
    fn card(&self) -> AgentCard {
        AgentCard::new(&self.name, format!("Scripted agent {}", self.name), format!("local://{}", self.name))
    }

    async fn execute(&self, task: Task, sink: EventSink) {
        self.instructions.lock().unwrap().push(task.instruction.clone());
        let _ = sink.emit(ProgressEvent::status(Phase::Running, "Working...")).await;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.reply {
            Reply::Respond(f) => match f(&task.instruction) {
                Ok(output) => {
                    let _ = sink.emit(ProgressEvent::append(output)).await;
                    let _ = sink.emit(ProgressEvent::status(Phase::Completed, "Done")).await;
                }
                Err(description) => {
                    let _ = sink.emit(ProgressEvent::status(Phase::Failed, description)).await;
                }
            },
            Reply::Silent => {
                let _ = sink.emit(ProgressEvent::append("partial")).await;
            }
            Reply::Hang => std::future::pending::<()>().await,
        }
    }

    async fn cancel(&self, _session_id: &str) -> bool {
        false
    }
}

/// Transport counting how many connections it opened
pub struct CountingTransport {
    inner: LocalTransport,
    connects: AtomicUsize,
}

impl CountingTransport {
    pub fn new(inner: LocalTransport) -> Self {
        Self {
            inner,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for CountingTransport {
    async fn connect(&self, worker: &str, address: &str) -> CoordinationResult<Arc<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.inner.connect(worker, address).await
    }
}

/// Worker set serving `agents` in process, in the given order
pub fn local_workers(agents: &[Arc<ScriptedAgent>]) -> WorkerSet {
    let mut transport = LocalTransport::new();
    for agent in agents {
        transport = transport.register(agent.name(), agent.clone() as Arc<dyn TaskExecutor>);
    }
    WorkerSet::from_addresses(
        agents
            .iter()
            .map(|a| (a.name().to_string(), format!("local://{}", a.name()))),
        Arc::new(transport),
    )
}

/// Text content of every event
pub fn texts(events: &[ProgressEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Text { content, .. } => Some(content.clone()),
            _ => None,
        })
        .collect()
}
