//! Coordinator façade: the entry point of a coordination run
//!
//! Every run ends with exactly one terminal status and nothing is emitted
//! after it. Errors raised anywhere below are converted into that status.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::aggregate::{synthesize_or_default, DefaultSynthesizer, Synthesis, Synthesizer};
use super::config::CoordinationConfig;
use super::error::{CoordinationError, CoordinationResult};
use super::plan::CoordinationMode;
use super::policy::{InstructionBuilder, SatisfactionPredicate, StopPredicate};
use super::routing::Router;
use super::strategy::{Policies, RunContext, StrategyEngine};
use super::worker::WorkerSet;
use crate::adapters::metrics_handler::MetricsCollector;
use crate::domain::{AgentCard, AgentSkill, EventSink, EventStream, Phase, ProgressEvent, Task, TaskExecutor};

/// Phase tracker enforcing the run state machine
///
/// `START -> THINKING -> RUNNING -> COMPLETED`, with `FAILED` and
/// `CANCELLED` reachable from any non-terminal state.
#[derive(Debug, Default)]
struct RunTracker {
    phase: Mutex<Option<Phase>>,
}

impl RunTracker {
    /// Move to `next`; returns false if the transition is not allowed
    fn advance(&self, next: Phase) -> bool {
        let Ok(mut phase) = self.phase.lock() else {
            return false;
        };
        let allowed = match (*phase, next) {
            (Some(current), _) if current.is_terminal() => false,
            (None, Phase::Thinking) => true,
            (Some(Phase::Thinking), Phase::Running) => true,
            (Some(Phase::Running), Phase::Completed) => true,
            (_, Phase::Failed | Phase::Cancelled) => true,
            _ => false,
        };
        if allowed {
            *phase = Some(next);
        }
        allowed
    }
}

/// Description of a configured worker
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkerInfo {
    pub name: String,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card: Option<AgentCard>,
}

struct CoordinatorInner {
    card: AgentCard,
    engine: StrategyEngine,
    mode: CoordinationMode,
    synthesizer: Arc<dyn Synthesizer>,
    sessions: RwLock<HashMap<String, CancellationToken>>,
    run_timeout: Option<Duration>,
    metrics: Option<Arc<MetricsCollector>>,
}

/// Delegating task coordinator
///
/// Cheap to clone; clones share sessions and workers.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

impl Coordinator {
    /// Start building a coordinator over `workers`, owned or already shared
    pub fn builder(workers: impl Into<Arc<WorkerSet>>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(workers)
    }

    pub fn mode(&self) -> CoordinationMode {
        self.inner.mode
    }

    pub fn workers(&self) -> &Arc<WorkerSet> {
        self.inner.engine.workers()
    }

    /// Run `task` to completion, publishing progress to `sink`
    pub async fn execute(&self, task: Task, sink: EventSink) {
        self.execute_with_cancellation(task, sink, CancellationToken::new())
            .await
    }

    /// Run `task`, also stopping when `cancel` fires
    pub async fn execute_with_cancellation(&self, task: Task, sink: EventSink, cancel: CancellationToken) {
        let session_id = task.session_id.clone();
        let registered = {
            let mut sessions = self.inner.sessions.write().await;
            if sessions.contains_key(&session_id) {
                false
            } else {
                sessions.insert(session_id.clone(), cancel.clone());
                true
            }
        };
        if !registered {
            warn!("Rejected task for already active session {}", session_id);
            let _ = sink
                .emit(ProgressEvent::status(
                    Phase::Failed,
                    format!("Orchestration failed: session {} is already active", session_id),
                ))
                .await;
            return;
        }

        info!("Starting {} run for session {}", self.inner.mode, session_id);
        let started = Instant::now();
        if let Some(metrics) = &self.inner.metrics {
            metrics.runs_in_flight.inc();
        }

        let tracker = RunTracker::default();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CoordinationError::Cancelled),
            result = self.drive_with_timeout(&task, &sink, &cancel, &tracker) => result,
        };

        let outcome = self.finish(result, &sink, &tracker).await;

        self.inner.sessions.write().await.remove(&session_id);
        if let Some(metrics) = &self.inner.metrics {
            metrics.runs_in_flight.dec();
            metrics.record_run(
                &self.inner.mode.to_string(),
                &outcome.to_string(),
                started.elapsed().as_secs_f64(),
            );
        }
        info!("Run for session {} ended {} in {:?}", session_id, outcome, started.elapsed());
    }

    async fn drive_with_timeout(
        &self,
        task: &Task,
        sink: &EventSink,
        cancel: &CancellationToken,
        tracker: &RunTracker,
    ) -> CoordinationResult<String> {
        match self.inner.run_timeout {
            Some(limit) => tokio::time::timeout(limit, self.drive(task, sink, cancel, tracker))
                .await
                .unwrap_or(Err(CoordinationError::Timeout(limit.as_secs()))),
            None => self.drive(task, sink, cancel, tracker).await,
        }
    }

    async fn drive(
        &self,
        task: &Task,
        sink: &EventSink,
        cancel: &CancellationToken,
        tracker: &RunTracker,
    ) -> CoordinationResult<String> {
        tracker.advance(Phase::Thinking);
        sink.emit(ProgressEvent::status(
            Phase::Thinking,
            "Analyzing task and planning agent coordination...",
        ))
        .await?;

        let engine = &self.inner.engine;
        let plan = engine.plan(self.inner.mode, task).await?;

        if cancel.is_cancelled() {
            return Err(CoordinationError::Cancelled);
        }
        tracker.advance(Phase::Running);
        sink.emit(ProgressEvent::status(
            Phase::Running,
            format!(
                "Running {} coordination across {} worker(s)",
                plan.mode,
                plan.steps.len()
            ),
        ))
        .await?;

        let ctx = RunContext::new(task, sink, cancel).with_metrics(self.inner.metrics.as_deref());
        let outcome = engine.run(&plan, &ctx).await?;

        let synthesis = Synthesis {
            mode: plan.mode,
            instruction: task.instruction.clone(),
            results: outcome.results,
            rounds: outcome.rounds,
        };
        Ok(synthesize_or_default(self.inner.synthesizer.as_ref(), &synthesis).await)
    }

    /// Emit the run's terminal status and return its phase
    async fn finish(&self, result: CoordinationResult<String>, sink: &EventSink, tracker: &RunTracker) -> Phase {
        let (final_text, terminal) = match result {
            Ok(answer) => (
                Some(answer),
                ProgressEvent::status(Phase::Completed, "All sub-agents completed successfully!"),
            ),
            Err(CoordinationError::Cancelled) => (
                None,
                ProgressEvent::status(Phase::Cancelled, "Orchestration cancelled."),
            ),
            Err(CoordinationError::SinkClosed) => {
                debug!("Caller went away, abandoning run");
                tracker.advance(Phase::Cancelled);
                return Phase::Cancelled;
            }
            Err(e) => {
                error!("Orchestration failed: {}", e);
                (
                    None,
                    ProgressEvent::status(Phase::Failed, format!("Orchestration failed: {}", e)),
                )
            }
        };

        let phase = terminal.phase().unwrap_or(Phase::Failed);
        if !tracker.advance(phase) {
            // Completed is only reachable from Running
            warn!("Run ended in unexpected phase, reporting failure");
            tracker.advance(Phase::Failed);
            let _ = sink
                .emit(ProgressEvent::status(
                    Phase::Failed,
                    "Orchestration failed: run ended before coordination started",
                ))
                .await;
            return Phase::Failed;
        }

        if let Some(answer) = final_text {
            let _ = sink.emit(ProgressEvent::text(answer)).await;
        }
        let _ = sink.emit(terminal).await;
        phase
    }

    /// Start a run in the background and return its event stream
    pub fn submit(&self, task: Task) -> EventStream {
        let (sink, stream) = EventStream::channel();
        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator.execute(task, sink).await;
        });
        stream
    }

    /// Request cancellation of an active session
    pub async fn cancel(&self, session_id: &str) -> bool {
        match self.inner.sessions.read().await.get(session_id) {
            Some(token) => {
                info!("Cancelling session {}", session_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Sessions currently running
    pub async fn active_sessions(&self) -> Vec<String> {
        self.inner.sessions.read().await.keys().cloned().collect()
    }

    /// Fetch every worker's card, logging the ones that are unreachable
    pub async fn refresh_cards(&self) -> usize {
        let mut fetched = 0;
        for worker in self.workers().iter() {
            match worker.card().await {
                Ok(card) => {
                    debug!("Worker '{}' is {} v{}", worker.name(), card.name, card.version);
                    fetched += 1;
                }
                Err(e) => warn!("Could not fetch card of worker '{}': {}", worker.name(), e),
            }
        }
        fetched
    }

    /// Configured workers with whatever card is cached
    pub fn describe_workers(&self) -> Vec<WorkerInfo> {
        self.workers()
            .iter()
            .map(|w| WorkerInfo {
                name: w.name().to_string(),
                address: w.address().to_string(),
                card: w.cached_card(),
            })
            .collect()
    }
}

#[async_trait]
impl TaskExecutor for Coordinator {
    fn card(&self) -> AgentCard {
        self.inner.card.clone()
    }

    async fn execute(&self, task: Task, sink: EventSink) {
        Coordinator::execute(self, task, sink).await
    }

    async fn cancel(&self, session_id: &str) -> bool {
        Coordinator::cancel(self, session_id).await
    }
}

/// Builder for [`Coordinator`]
pub struct CoordinatorBuilder {
    workers: Arc<WorkerSet>,
    config: CoordinationConfig,
    mode: Option<CoordinationMode>,
    router: Option<Arc<dyn Router>>,
    stop: Option<Arc<dyn StopPredicate>>,
    satisfaction: Option<Arc<dyn SatisfactionPredicate>>,
    instructions: Option<Arc<dyn InstructionBuilder>>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    metrics: Option<Arc<MetricsCollector>>,
    card: Option<AgentCard>,
    url: Option<String>,
}

impl CoordinatorBuilder {
    pub fn new(workers: impl Into<Arc<WorkerSet>>) -> Self {
        Self {
            workers: workers.into(),
            config: CoordinationConfig::default(),
            mode: None,
            router: None,
            stop: None,
            satisfaction: None,
            instructions: None,
            synthesizer: None,
            metrics: None,
            card: None,
            url: None,
        }
    }

    pub fn config(mut self, config: CoordinationConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the mode from the configuration
    pub fn mode(mut self, mode: CoordinationMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn stop_predicate(mut self, stop: Arc<dyn StopPredicate>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn satisfaction(mut self, satisfaction: Arc<dyn SatisfactionPredicate>) -> Self {
        self.satisfaction = Some(satisfaction);
        self
    }

    pub fn instruction_builder(mut self, instructions: Arc<dyn InstructionBuilder>) -> Self {
        self.instructions = Some(instructions);
        self
    }

    pub fn synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn card(mut self, card: AgentCard) -> Self {
        self.card = Some(card);
        self
    }

    /// URL advertised on the generated card
    pub fn public_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn build(self) -> Coordinator {
        let mode = self.mode.unwrap_or(self.config.mode);
        let defaults = Policies::from_config(&self.config);
        let policies = Policies {
            router: self.router.unwrap_or(defaults.router),
            stop: self.stop.unwrap_or(defaults.stop),
            satisfaction: self.satisfaction.unwrap_or(defaults.satisfaction),
            instructions: self.instructions.unwrap_or(defaults.instructions),
        };
        let run_timeout = self.config.run_timeout_secs.map(Duration::from_secs);
        let url = self.url.unwrap_or_else(|| "http://localhost:8080".to_string());
        let card = self.card.unwrap_or_else(|| default_card(mode, &self.workers, url));
        let engine = StrategyEngine::new(self.workers, policies, self.config);

        Coordinator {
            inner: Arc::new(CoordinatorInner {
                card,
                engine,
                mode,
                synthesizer: self
                    .synthesizer
                    .unwrap_or_else(|| Arc::new(DefaultSynthesizer)),
                sessions: RwLock::new(HashMap::new()),
                run_timeout,
                metrics: self.metrics,
            }),
        }
    }
}

fn default_card(mode: CoordinationMode, workers: &WorkerSet, url: String) -> AgentCard {
    AgentCard::new(
        "maestro",
        format!(
            "Coordinates {} worker agent(s) in {} mode",
            workers.len(),
            mode
        ),
        url,
    )
    .with_skill(
        AgentSkill::new(
            "orchestrate",
            "Task orchestration",
            "Delegates a task to specialist agents and combines their results",
        )
        .with_tags(&["orchestration", "delegation", "multi-agent"]),
    )
}
