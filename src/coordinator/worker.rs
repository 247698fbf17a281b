//! Worker handles: one remote agent, its cached card and its lazily opened connection

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::WorkerConfig;
use super::error::CoordinationResult;
use super::transport::{Connection, RawEvents, Transport};
use crate::domain::{AgentCard, Phase, ProgressEvent, Task};
use futures::StreamExt;

type ConnectionSlot = Arc<Mutex<Option<Arc<dyn Connection>>>>;

/// Handle to one worker agent
pub struct WorkerHandle {
    name: String,
    address: String,
    description: Option<String>,
    transport: Arc<dyn Transport>,
    connection: ConnectionSlot,
    card: RwLock<Option<AgentCard>>,
    timeout: Option<Duration>,
}

impl WorkerHandle {
    pub fn new(name: impl Into<String>, address: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            description: None,
            transport,
            connection: Arc::new(Mutex::new(None)),
            card: RwLock::new(None),
            timeout: None,
        }
    }

    /// Description shown when the worker's card has not been fetched
    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// Limit each invocation to `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Card description if cached, else the configured description
    pub fn description(&self) -> Option<String> {
        self.cached_card()
            .map(|card| card.description)
            .or_else(|| self.description.clone())
    }

    /// Open the connection, or return the one already open
    pub async fn connect(&self) -> CoordinationResult<Arc<dyn Connection>> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            return Ok(connection.clone());
        }

        let connection = self.transport.connect(&self.name, &self.address).await?;
        *slot = Some(connection.clone());
        Ok(connection)
    }

    /// Drop the memoized connection so the next call reconnects
    pub async fn invalidate(&self) {
        let mut slot = self.connection.lock().await;
        if slot.take().is_some() {
            info!("Invalidated connection to worker '{}'", self.name);
        }
    }

    /// Check if a connection is currently memoized
    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// Fetch the agent card, using the cached copy when present
    pub async fn card(&self) -> CoordinationResult<AgentCard> {
        if let Some(card) = self.cached_card() {
            return Ok(card);
        }

        let connection = self.connect().await?;
        let card = connection.fetch_card().await?;
        if let Ok(mut cached) = self.card.write() {
            *cached = Some(card.clone());
        }
        Ok(card)
    }

    pub fn cached_card(&self) -> Option<AgentCard> {
        self.card.read().ok().and_then(|card| card.clone())
    }

    /// Send an instruction to the worker
    ///
    /// Only connection establishment fails with an error. Every later
    /// problem is reported as the worker's `Failed` status inside the
    /// returned sequence.
    pub async fn invoke(&self, instruction: &str, session_id: &str) -> CoordinationResult<WorkerEvents> {
        let connection = self.connect().await?;
        debug!("Invoking worker '{}' ({} chars)", self.name, instruction.len());

        let task = Task::new(instruction, session_id);
        let state = match connection.send_task(task).await {
            Ok(events) => EventsState::Streaming {
                events,
                connection,
                deadline: self.timeout.map(|limit| (Instant::now() + limit, limit)),
            },
            Err(e) => {
                warn!("Worker '{}' rejected task: {}", self.name, e);
                release(&self.connection, &connection).await;
                EventsState::Failed(e.to_string())
            }
        };

        Ok(WorkerEvents {
            worker: self.name.clone(),
            slot: self.connection.clone(),
            state,
        })
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Drop `connection` from `slot` unless it has already been replaced
async fn release(slot: &ConnectionSlot, connection: &Arc<dyn Connection>) {
    let mut current = slot.lock().await;
    let same = current
        .as_ref()
        .map(|c| Arc::as_ptr(c) as *const () == Arc::as_ptr(connection) as *const ())
        .unwrap_or(false);
    if same {
        *current = None;
    }
}

enum EventsState {
    Streaming {
        events: RawEvents,
        connection: Arc<dyn Connection>,
        deadline: Option<(Instant, Duration)>,
    },
    Failed(String),
    Done,
}

/// Events of one worker invocation, stamped with the worker's name
///
/// The last event is always a terminal status of the worker.
pub struct WorkerEvents {
    worker: String,
    slot: ConnectionSlot,
    state: EventsState,
}

impl WorkerEvents {
    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// Next event, or `None` after the terminal status has been returned
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if !matches!(self.state, EventsState::Streaming { .. }) {
            return match std::mem::replace(&mut self.state, EventsState::Done) {
                EventsState::Failed(description) => Some(self.failure(description)),
                _ => None,
            };
        }

        let EventsState::Streaming { events, deadline, .. } = &mut self.state else {
            return None;
        };

        let item = match *deadline {
            Some((at, limit)) => match tokio::time::timeout_at(at, events.next()).await {
                Ok(item) => item,
                Err(_) => {
                    warn!("Worker '{}' timed out after {:?}", self.worker, limit);
                    self.state = EventsState::Done;
                    return Some(self.failure(format!("timed out after {:?}", limit)));
                }
            },
            None => events.next().await,
        };

        match item {
            Some(Ok(event)) => {
                let terminal = event.is_run_terminal();
                if terminal {
                    self.state = EventsState::Done;
                }
                Some(self.tag(event))
            }
            Some(Err(e)) => {
                warn!("Lost event stream of worker '{}': {}", self.worker, e);
                if let EventsState::Streaming { connection, .. } =
                    std::mem::replace(&mut self.state, EventsState::Done)
                {
                    release(&self.slot, &connection).await;
                }
                Some(self.failure(e.to_string()))
            }
            None => {
                self.state = EventsState::Done;
                Some(self.failure("stream ended without a terminal status"))
            }
        }
    }

    fn failure(&self, description: impl Into<String>) -> ProgressEvent {
        ProgressEvent::status(Phase::Failed, description).from_worker(&self.worker)
    }

    /// Stamp the worker's own events with its name and prefix events it
    /// forwarded from its own workers
    fn tag(&self, event: ProgressEvent) -> ProgressEvent {
        match event.worker().map(str::to_string) {
            None => event.from_worker(&self.worker),
            Some(inner) => event.from_worker(&format!("{}/{}", self.worker, inner)),
        }
    }
}

/// The configured workers, in declaration order
///
/// Read-only once built.
#[derive(Debug, Default)]
pub struct WorkerSet {
    workers: Vec<Arc<WorkerHandle>>,
    index: HashMap<String, usize>,
}

impl WorkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build handles from worker configs; duplicate names keep the first entry
    pub fn from_configs(configs: &[WorkerConfig], transport: Arc<dyn Transport>, timeout: Option<Duration>) -> Self {
        let mut set = Self::new();
        for config in configs {
            let handle = WorkerHandle::new(&config.name, &config.url, transport.clone())
                .with_description(config.description.clone())
                .with_timeout(timeout);
            set.push(handle);
        }
        set
    }

    /// Build handles from a name to address mapping
    pub fn from_addresses<I>(addresses: I, transport: Arc<dyn Transport>) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut set = Self::new();
        for (name, address) in addresses {
            set.push(WorkerHandle::new(name, address, transport.clone()));
        }
        set
    }

    fn push(&mut self, handle: WorkerHandle) {
        if self.index.contains_key(handle.name()) {
            warn!("Ignoring duplicate worker '{}'", handle.name());
            return;
        }
        self.index.insert(handle.name().to_string(), self.workers.len());
        self.workers.push(Arc::new(handle));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<WorkerHandle>> {
        self.index.get(name).map(|i| &self.workers[*i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Worker names in declaration order
    pub fn names(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.name().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<WorkerHandle>> {
        self.workers.iter()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
