//! Transports that open connections to worker agents
//!
//! - `HttpTransport`: remote agents speaking the card + NDJSON task protocol
//! - `LocalTransport`: in-process executors addressed as `local://<name>`
//! - `SchemeTransport`: picks one of the above by address scheme

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::error::{CoordinationError, CoordinationResult};
use crate::domain::{AgentCard, EventStream, ProgressEvent, Task, TaskExecutor, TaskRequest, AGENT_CARD_PATH};

/// Address prefix for in-process executors
pub const LOCAL_SCHEME: &str = "local://";

/// Events read from a worker before any bookkeeping by the handle
pub type RawEvents = BoxStream<'static, CoordinationResult<ProgressEvent>>;

/// An established link to one worker
#[async_trait]
pub trait Connection: Send + Sync {
    /// Fetch the worker's card
    async fn fetch_card(&self) -> CoordinationResult<AgentCard>;

    /// Send a task and return the worker's event sequence
    async fn send_task(&self, task: Task) -> CoordinationResult<RawEvents>;
}

/// Opens connections to worker addresses
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to `address` on behalf of the worker called `worker`
    async fn connect(&self, worker: &str, address: &str) -> CoordinationResult<Arc<dyn Connection>>;
}

// ============================================================================
// HTTP
// ============================================================================

/// Transport for agents reachable over HTTP
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self, worker: &str, address: &str) -> CoordinationResult<Arc<dyn Connection>> {
        let base_url = address.trim_end_matches('/').to_string();
        let card_url = format!("{}{}", base_url, AGENT_CARD_PATH);

        // Fetching the card doubles as the reachability check
        let response = self
            .client
            .get(&card_url)
            .send()
            .await
            .map_err(|e| CoordinationError::connection(worker, e))?;

        if !response.status().is_success() {
            return Err(CoordinationError::connection(
                worker,
                format!("{} returned {}", card_url, response.status()),
            ));
        }

        let card: AgentCard = response
            .json()
            .await
            .map_err(|e| CoordinationError::connection(worker, format!("invalid agent card: {}", e)))?;

        info!("Connected to worker '{}' at {} ({})", worker, base_url, card.name);

        Ok(Arc::new(HttpConnection {
            client: self.client.clone(),
            worker: worker.to_string(),
            base_url,
            card,
        }))
    }
}

struct HttpConnection {
    client: Client,
    worker: String,
    base_url: String,
    card: AgentCard,
}

#[async_trait]
impl Connection for HttpConnection {
    async fn fetch_card(&self) -> CoordinationResult<AgentCard> {
        Ok(self.card.clone())
    }

    async fn send_task(&self, task: Task) -> CoordinationResult<RawEvents> {
        let request = TaskRequest {
            instruction: task.instruction,
            session_id: Some(task.session_id),
        };

        let response = self
            .client
            .post(format!("{}/tasks", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                CoordinationError::Coordination(format!("request to '{}' failed: {}", self.worker, e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CoordinationError::Coordination(format!(
                "worker '{}' returned error {}: {}",
                self.worker, status, text
            )));
        }

        Ok(decode_ndjson(response.bytes_stream()))
    }
}

/// Decode a newline-delimited JSON byte stream into progress events
///
/// Blank lines are skipped. A transport error ends the stream after
/// yielding one `Err`.
pub fn decode_ndjson<S, E>(bytes: S) -> RawEvents
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = (bytes.boxed(), Vec::<u8>::new(), false);

    stream::unfold(state, |(mut bytes, mut buffer, mut done)| async move {
        loop {
            if let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if line.iter().all(|b| b.is_ascii_whitespace()) {
                    continue;
                }
                let item = parse_line(&line);
                return Some((item, (bytes, buffer, done)));
            }

            if done {
                if buffer.iter().all(|b| b.is_ascii_whitespace()) {
                    return None;
                }
                let rest = std::mem::take(&mut buffer);
                let item = parse_line(&rest);
                return Some((item, (bytes, buffer, done)));
            }

            match bytes.next().await {
                Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    buffer.clear();
                    done = true;
                    let item = Err(CoordinationError::Coordination(format!(
                        "event stream interrupted: {}",
                        e
                    )));
                    return Some((item, (bytes, buffer, done)));
                }
                None => done = true,
            }
        }
    })
    .boxed()
}

fn parse_line(line: &[u8]) -> CoordinationResult<ProgressEvent> {
    serde_json::from_slice(line)
        .map_err(|e| CoordinationError::Coordination(format!("malformed event: {}", e)))
}

// ============================================================================
// In-process
// ============================================================================

/// Transport for executors living in the same process
#[derive(Clone, Default)]
pub struct LocalTransport {
    executors: HashMap<String, Arc<dyn TaskExecutor>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `executor` at `local://<name>`
    pub fn register(mut self, name: impl Into<String>, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executors.insert(name.into(), executor);
        self
    }

    /// Names of the registered executors
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.executors.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn connect(&self, worker: &str, address: &str) -> CoordinationResult<Arc<dyn Connection>> {
        let name = address.strip_prefix(LOCAL_SCHEME).unwrap_or(address);
        let executor = self.executors.get(name).cloned().ok_or_else(|| {
            CoordinationError::connection(worker, format!("no in-process agent at {}", address))
        })?;
        debug!("Connected to in-process worker '{}' at {}", worker, address);
        Ok(Arc::new(LocalConnection { executor }))
    }
}

struct LocalConnection {
    executor: Arc<dyn TaskExecutor>,
}

#[async_trait]
impl Connection for LocalConnection {
    async fn fetch_card(&self) -> CoordinationResult<AgentCard> {
        Ok(self.executor.card())
    }

    async fn send_task(&self, task: Task) -> CoordinationResult<RawEvents> {
        let (sink, stream) = EventStream::channel();
        let executor = self.executor.clone();
        tokio::spawn(async move {
            executor.execute(task, sink).await;
        });
        Ok(stream.map(Ok).boxed())
    }
}

// ============================================================================
// Scheme dispatch
// ============================================================================

/// Transport choosing HTTP or in-process delivery from the address scheme
#[derive(Clone)]
pub struct SchemeTransport {
    http: HttpTransport,
    local: LocalTransport,
}

impl SchemeTransport {
    pub fn new(http: HttpTransport, local: LocalTransport) -> Self {
        Self { http, local }
    }
}

#[async_trait]
impl Transport for SchemeTransport {
    async fn connect(&self, worker: &str, address: &str) -> CoordinationResult<Arc<dyn Connection>> {
        if address.starts_with(LOCAL_SCHEME) {
            self.local.connect(worker, address).await
        } else if address.starts_with("http://") || address.starts_with("https://") {
            self.http.connect(worker, address).await
        } else {
            Err(CoordinationError::connection(
                worker,
                format!("unsupported address scheme: {}", address),
            ))
        }
    }
}
