//! Strategy engine: runs a coordination plan over the worker set
//!
//! Sequential, routed and iterative runs have at most one worker invocation
//! in flight. Parallel runs invoke every planned worker concurrently and
//! merge their outcomes after all of them finish.

use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::aggregate::{ResultMap, WorkerOutcome};
use super::config::CoordinationConfig;
use super::error::{CoordinationError, CoordinationResult, WorkerInvocationError};
use super::plan::{CoordinationMode, CoordinationPlan, PlanStep};
use super::policy::{
    ApprovalMarker, CarryForward, InstructionBuilder, NeverSatisfied, SatisfactionPredicate,
    StopAfterFirst, StopAfterFirstSuccess, StopPredicate,
};
use super::routing::{retain_known, KeywordRouter, Router};
use super::worker::WorkerSet;
use crate::adapters::metrics_handler::MetricsCollector;
use crate::domain::{EventSink, Phase, ProgressEvent, Task};

/// Everything a strategy needs from the run it belongs to
pub struct RunContext<'a> {
    pub task: &'a Task,
    pub sink: &'a EventSink,
    pub cancel: &'a CancellationToken,
    pub metrics: Option<&'a MetricsCollector>,
}

impl<'a> RunContext<'a> {
    pub fn new(task: &'a Task, sink: &'a EventSink, cancel: &'a CancellationToken) -> Self {
        Self {
            task,
            sink,
            cancel,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<&'a MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Fail with `Cancelled` once cancellation has been requested
    pub fn ensure_active(&self) -> CoordinationResult<()> {
        if self.cancel.is_cancelled() {
            return Err(CoordinationError::Cancelled);
        }
        Ok(())
    }

    pub async fn emit(&self, event: ProgressEvent) -> CoordinationResult<()> {
        Ok(self.sink.emit(event).await?)
    }
}

/// Decision points used by the strategies
#[derive(Clone)]
pub struct Policies {
    pub router: Arc<dyn Router>,
    pub stop: Arc<dyn StopPredicate>,
    pub satisfaction: Arc<dyn SatisfactionPredicate>,
    pub instructions: Arc<dyn InstructionBuilder>,
}

impl Policies {
    /// Keyword routing, stop and satisfaction rules taken from `config`
    pub fn from_config(config: &CoordinationConfig) -> Self {
        let stop: Arc<dyn StopPredicate> = if config.routing.stop_on_success {
            Arc::new(StopAfterFirstSuccess)
        } else {
            Arc::new(StopAfterFirst)
        };
        let satisfaction: Arc<dyn SatisfactionPredicate> = match &config.iterative.approval_marker {
            Some(marker) if !marker.is_empty() => Arc::new(ApprovalMarker::new(marker.clone())),
            _ => Arc::new(NeverSatisfied),
        };

        Self {
            router: Arc::new(KeywordRouter::from_config(&config.routing)),
            stop,
            satisfaction,
            instructions: Arc::new(CarryForward),
        }
    }
}

/// Results of a finished strategy
#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    pub results: ResultMap,
    /// Rounds performed (iterative mode only)
    pub rounds: Option<u32>,
}

pub struct StrategyEngine {
    workers: Arc<WorkerSet>,
    policies: Policies,
    config: CoordinationConfig,
}

impl StrategyEngine {
    pub fn new(workers: Arc<WorkerSet>, policies: Policies, config: CoordinationConfig) -> Self {
        Self {
            workers,
            policies,
            config,
        }
    }

    pub fn workers(&self) -> &Arc<WorkerSet> {
        &self.workers
    }

    /// Build the plan for `task`
    pub async fn plan(&self, mode: CoordinationMode, task: &Task) -> CoordinationResult<CoordinationPlan> {
        let steps = match mode {
            CoordinationMode::Sequential => self
                .participants()
                .into_iter()
                .map(|worker| PlanStep::new(worker, &task.instruction))
                .collect(),
            CoordinationMode::Parallel => self
                .participants()
                .into_iter()
                .map(|worker| {
                    let instruction = format!("{} (handled by {})", task.instruction, worker);
                    PlanStep::new(worker, instruction)
                })
                .collect(),
            CoordinationMode::Routed => {
                let selected = self.policies.router.select(task, &self.workers.names()).await?;
                retain_known(selected, &self.workers)
                    .into_iter()
                    .map(|worker| PlanStep::new(worker, &task.instruction))
                    .collect()
            }
            CoordinationMode::Iterative => {
                let (generator, critic) = self.iterative_pair()?;
                vec![
                    PlanStep::new(generator, &task.instruction),
                    PlanStep::new(critic, &task.instruction),
                ]
            }
        };

        let plan = CoordinationPlan::new(mode, steps);
        plan.validate(&self.workers)?;
        debug!("Planned {} run: {:?}", mode, plan.worker_names());
        Ok(plan)
    }

    /// Configured participants in declared order, each named once
    fn participants(&self) -> Vec<String> {
        if self.config.participants.is_empty() {
            return self.workers.names();
        }
        let mut unique: Vec<String> = Vec::with_capacity(self.config.participants.len());
        for name in &self.config.participants {
            if unique.contains(name) {
                warn!("Participant '{}' listed more than once, running it once", name);
                continue;
            }
            unique.push(name.clone());
        }
        unique
    }

    fn iterative_pair(&self) -> CoordinationResult<(String, String)> {
        let names = self.workers.names();
        let generator = self
            .config
            .iterative
            .generator
            .clone()
            .or_else(|| names.first().cloned())
            .ok_or_else(|| CoordinationError::Coordination("no workers configured".to_string()))?;
        let critic = self
            .config
            .iterative
            .critic
            .clone()
            .or_else(|| names.get(1).cloned())
            .unwrap_or_else(|| generator.clone());
        Ok((generator, critic))
    }

    /// Execute `plan`, forwarding every worker event to the run's sink
    pub async fn run(&self, plan: &CoordinationPlan, ctx: &RunContext<'_>) -> CoordinationResult<StrategyOutcome> {
        match plan.mode {
            CoordinationMode::Sequential => Ok(StrategyOutcome {
                results: self.run_sequential(plan, ctx).await?,
                rounds: None,
            }),
            CoordinationMode::Parallel => Ok(StrategyOutcome {
                results: self.run_parallel(plan, ctx).await?,
                rounds: None,
            }),
            CoordinationMode::Routed => Ok(StrategyOutcome {
                results: self.run_routed(plan, ctx).await?,
                rounds: None,
            }),
            CoordinationMode::Iterative => {
                let (results, rounds) = self.run_iterative(plan, ctx).await?;
                Ok(StrategyOutcome {
                    results,
                    rounds: Some(rounds),
                })
            }
        }
    }

    /// Workers in order; the first failure aborts the run
    async fn run_sequential(&self, plan: &CoordinationPlan, ctx: &RunContext<'_>) -> CoordinationResult<ResultMap> {
        let mut results = ResultMap::new();
        for step in &plan.steps {
            ctx.ensure_active()?;
            ctx.emit(ProgressEvent::append(format!("\n--- Delegating to {} ---\n", step.worker)))
                .await?;

            let instruction = self.policies.instructions.build(step, &results);
            let output = self.invoke_worker(ctx, &step.worker, &instruction).await??;
            results.insert(&step.worker, Ok(output));
        }
        Ok(results)
    }

    /// All workers at once; any failure fails the run with every failure listed
    async fn run_parallel(&self, plan: &CoordinationPlan, ctx: &RunContext<'_>) -> CoordinationResult<ResultMap> {
        ctx.ensure_active()?;
        ctx.emit(ProgressEvent::append("Executing multiple agents in parallel...\n"))
            .await?;

        let invocations = plan.steps.iter().map(|step| async move {
            let outcome = self.invoke_worker(ctx, &step.worker, &step.instruction).await;
            (step.worker.as_str(), outcome)
        });
        let finished = join_all(invocations).await;

        let mut results = ResultMap::new();
        for (worker, outcome) in finished {
            results.insert(worker, outcome?);
        }

        let failures = results.failures();
        if !failures.is_empty() {
            return Err(CoordinationError::AggregateFailure(failures));
        }
        Ok(results)
    }

    /// Selected workers in order until the stop predicate holds
    ///
    /// A failing worker does not end the run. The run fails only when every
    /// worker that ran failed.
    async fn run_routed(&self, plan: &CoordinationPlan, ctx: &RunContext<'_>) -> CoordinationResult<ResultMap> {
        let mut results = ResultMap::new();
        if plan.steps.is_empty() {
            info!("No workers selected for session {}", ctx.task.session_id);
            ctx.emit(ProgressEvent::append("No agents selected for this task.\n"))
                .await?;
            return Ok(results);
        }

        for step in &plan.steps {
            ctx.ensure_active()?;
            ctx.emit(ProgressEvent::append(format!(
                "\n--- Selected {} for this task ---\n",
                step.worker
            )))
            .await?;

            let outcome = self.invoke_worker(ctx, &step.worker, &step.instruction).await?;
            if let Err(failure) = &outcome {
                warn!("Routed worker failed, continuing: {}", failure);
            }
            results.insert(&step.worker, outcome);

            if self.policies.stop.should_stop(&results) {
                debug!("Stop predicate satisfied after {}", step.worker);
                break;
            }
        }

        if results.successes().next().is_none() {
            return Err(CoordinationError::AggregateFailure(results.failures()));
        }
        Ok(results)
    }

    /// Generator/critic rounds until satisfied or out of rounds
    async fn run_iterative(&self, plan: &CoordinationPlan, ctx: &RunContext<'_>) -> CoordinationResult<(ResultMap, u32)> {
        let (Some(generator), Some(critic)) = (plan.steps.first(), plan.steps.get(1)) else {
            return Err(CoordinationError::Coordination(
                "iterative plan needs a generator and a critic".to_string(),
            ));
        };

        let max_rounds = self.config.iterative.max_rounds.max(1);
        let marker = self.config.iterative.approval_marker.as_deref();
        let mut draft = String::new();
        let mut critique = String::new();
        let mut rounds = 0;

        for round in 1..=max_rounds {
            ctx.ensure_active()?;
            rounds = round;
            ctx.emit(ProgressEvent::append(format!("\n--- Iteration {} ---\n", round)))
                .await?;

            ctx.emit(ProgressEvent::append("Generating...\n")).await?;
            let instruction = generator_instruction(&generator.instruction, &draft, &critique, round);
            draft = self.invoke_worker(ctx, &generator.worker, &instruction).await??;

            ctx.emit(ProgressEvent::append("Reviewing...\n")).await?;
            let review = critic_instruction(&critic.instruction, &draft, marker);
            critique = self.invoke_worker(ctx, &critic.worker, &review).await??;

            if self.policies.satisfaction.is_satisfied(round, &draft, &critique) {
                info!("Draft accepted after {} round(s)", round);
                break;
            }
        }

        let mut results = ResultMap::new();
        results.insert(&generator.worker, Ok(draft));
        if critic.worker != generator.worker {
            results.insert(&critic.worker, Ok(critique));
        }
        Ok((results, rounds))
    }

    /// Invoke one worker and forward its events until its terminal status
    ///
    /// A worker failure is returned as `Ok(Err(..))`. Only run-level
    /// conditions (cancellation, closed sink, unknown worker) are `Err`.
    async fn invoke_worker(
        &self,
        ctx: &RunContext<'_>,
        worker: &str,
        instruction: &str,
    ) -> CoordinationResult<WorkerOutcome> {
        ctx.ensure_active()?;
        let handle = self
            .workers
            .get(worker)
            .ok_or_else(|| CoordinationError::UnknownWorker(worker.to_string()))?;

        let invoked = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(CoordinationError::Cancelled),
            invoked = handle.invoke(instruction, &ctx.task.session_id) => invoked,
        };

        let mut events = match invoked {
            Ok(events) => events,
            Err(e @ CoordinationError::Connection { .. }) => {
                warn!("{}", e);
                record_invocation(ctx, worker, "failed");
                ctx.emit(ProgressEvent::status(Phase::Failed, e.to_string()).from_worker(worker))
                    .await?;
                return Ok(Err(WorkerInvocationError::new(worker, e.to_string())));
            }
            Err(e) => return Err(e),
        };

        let mut output = String::new();
        let mut outcome: Option<WorkerOutcome> = None;
        loop {
            let event = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(CoordinationError::Cancelled),
                event = events.next() => event,
            };
            let Some(event) = event else { break };

            if event.worker() == Some(worker) {
                match &event {
                    ProgressEvent::Text { content, append, .. } => {
                        if *append {
                            output.push_str(content);
                        } else {
                            output = content.clone();
                        }
                    }
                    ProgressEvent::Status { phase, description, .. } => match phase {
                        Phase::Completed => outcome = Some(Ok(output.clone())),
                        Phase::Failed | Phase::Cancelled => {
                            outcome = Some(Err(WorkerInvocationError::new(worker, description.clone())))
                        }
                        Phase::Thinking | Phase::Running => {}
                    },
                }
            }

            if let Some(metrics) = ctx.metrics {
                metrics.worker_events.with_label_values(&[worker]).inc();
            }
            ctx.emit(event).await?;
        }

        let outcome = outcome.unwrap_or_else(|| {
            Err(WorkerInvocationError::new(worker, "no terminal status received"))
        });
        record_invocation(ctx, worker, if outcome.is_ok() { "completed" } else { "failed" });
        Ok(outcome)
    }
}

fn record_invocation(ctx: &RunContext<'_>, worker: &str, outcome: &str) {
    if let Some(metrics) = ctx.metrics {
        metrics.record_invocation(worker, outcome);
    }
}

fn generator_instruction(task: &str, draft: &str, critique: &str, round: u32) -> String {
    if round == 1 {
        return task.to_string();
    }
    format!(
        "{}\n\nPrevious draft:\n{}\n\nReviewer feedback:\n{}\n\nRevise the draft to address the feedback.",
        task,
        draft.trim(),
        critique.trim()
    )
}

fn critic_instruction(task: &str, draft: &str, marker: Option<&str>) -> String {
    let mut instruction = format!(
        "Review the following response to the request below and give concrete feedback.\n\nRequest:\n{}\n\nResponse:\n{}",
        task,
        draft.trim()
    );
    if let Some(marker) = marker.filter(|m| !m.is_empty()) {
        instruction.push_str(&format!(
            "\n\nIf the response needs no further changes, include the word {}.",
            marker
        ));
    }
    instruction
}
