use super::config::{CoordinationConfig, WorkerConfig};
use super::error::{CoordinationError, CoordinationResult};
use super::facade::Coordinator;
use super::plan::CoordinationMode;
use super::policy::RunAllSelected;
use super::routing::{KeywordRouter, Router};
use super::testing::{local_workers, texts, ScriptedAgent};
use super::transport::LocalTransport;
use super::worker::WorkerSet;
use super::aggregate::{Synthesis, Synthesizer};
use crate::domain::{EventStream, Phase, ProgressEvent, Task, TaskExecutor};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn run(coordinator: &Coordinator, instruction: &str) -> Vec<ProgressEvent> {
    coordinator
        .submit(Task::new(instruction, "session-1"))
        .collect_all()
        .await
}

/// Exactly one terminal event, and it is the last one
fn terminal(events: &[ProgressEvent]) -> (Phase, String) {
    let count = events.iter().filter(|e| e.is_run_terminal()).count();
    assert_eq!(count, 1, "expected one terminal event in {:?}", events);
    match events.last() {
        Some(ProgressEvent::Status { phase, description, worker: None }) => (*phase, description.clone()),
        other => panic!("last event is not a run status: {:?}", other),
    }
}

fn final_text(events: &[ProgressEvent]) -> String {
    events
        .iter()
        .rev()
        .find_map(|e| match e {
            ProgressEvent::Text { content, append: false, worker: None } => Some(content.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

fn config(mode: CoordinationMode) -> CoordinationConfig {
    CoordinationConfig {
        mode,
        ..CoordinationConfig::default()
    }
}

// ============================================================================
// Sequential
// ============================================================================

#[tokio::test]
async fn test_sequential_instruction_sees_only_earlier_results() {
    let a = ScriptedAgent::ok("a", "alpha");
    let b = ScriptedAgent::ok("b", "beta");
    let c = ScriptedAgent::ok("c", "gamma");
    let coordinator = Coordinator::builder(local_workers(&[a.clone(), b.clone(), c.clone()])).build();

    let events = run(&coordinator, "summarize").await;

    assert_eq!(terminal(&events).0, Phase::Completed);
    assert_eq!(a.instructions(), vec!["summarize"]);
    assert_eq!(b.instructions(), vec!["summarize\n\nPrevious results:\n- a: alpha"]);
    assert_eq!(
        c.instructions(),
        vec!["summarize\n\nPrevious results:\n- a: alpha\n- b: beta"]
    );
    assert!(final_text(&events).starts_with("Orchestration completed. Agents executed: a, b, c"));
}

#[tokio::test]
async fn test_sequential_aborts_on_first_failure() {
    let a = ScriptedAgent::failing("a", "boom");
    let b = ScriptedAgent::ok("b", "beta");
    let coordinator = Coordinator::builder(local_workers(&[a, b.clone()])).build();

    let events = run(&coordinator, "task").await;

    let (phase, description) = terminal(&events);
    assert_eq!(phase, Phase::Failed);
    assert!(description.contains("worker 'a' failed: boom"), "{}", description);
    assert_eq!(b.invocations(), 0);
}

#[tokio::test]
async fn test_run_emits_thinking_then_running() {
    let coordinator = Coordinator::builder(local_workers(&[ScriptedAgent::ok("a", "x")])).build();
    let events = run(&coordinator, "task").await;

    assert_eq!(events[0].phase(), Some(Phase::Thinking));
    assert_eq!(events[1].phase(), Some(Phase::Running));
    assert!(events[0].worker().is_none() && events[1].worker().is_none());
}

#[tokio::test]
async fn test_worker_events_are_tagged_with_their_worker() {
    let coordinator = Coordinator::builder(local_workers(&[
        ScriptedAgent::ok("a", "x"),
        ScriptedAgent::ok("b", "y"),
    ]))
    .mode(CoordinationMode::Parallel)
    .build();

    let events = run(&coordinator, "task").await;

    let worker_statuses: Vec<_> = events
        .iter()
        .filter(|e| e.is_terminal_status() && !e.is_run_terminal())
        .map(|e| e.worker().unwrap_or_default().to_string())
        .collect();
    assert_eq!(worker_statuses.len(), 2);
    assert!(worker_statuses.contains(&"a".to_string()));
    assert!(worker_statuses.contains(&"b".to_string()));
}

// ============================================================================
// Parallel
// ============================================================================

#[tokio::test]
async fn test_parallel_failure_lists_only_failed_workers() {
    let a = ScriptedAgent::ok("a", "A-out");
    let b = ScriptedAgent::failing("b", "bad input");
    let coordinator = Coordinator::builder(local_workers(&[a.clone(), b]))
        .mode(CoordinationMode::Parallel)
        .build();

    let events = run(&coordinator, "task").await;

    let (phase, description) = terminal(&events);
    assert_eq!(phase, Phase::Failed);
    assert!(description.contains("1 worker(s) failed"), "{}", description);
    assert!(description.contains("worker 'b' failed: bad input"));
    assert!(!description.contains("worker 'a'"));

    let a_text = events
        .iter()
        .position(|e| e.worker() == Some("a") && matches!(e, ProgressEvent::Text { content, .. } if content == "A-out"));
    assert!(a_text.is_some());
    assert!(a_text.unwrap() < events.len() - 1);
    assert_eq!(a.instructions(), vec!["task (handled by a)"]);
}

#[tokio::test]
async fn test_parallel_duplicate_participant_runs_once() {
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = calls.clone();
    let a = ScriptedAgent::with("a", move |_| {
        if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
            Err("first call fails".to_string())
        } else {
            Ok("recovered".to_string())
        }
    });
    let mut config = config(CoordinationMode::Parallel);
    config.participants = vec!["a".to_string(), "a".to_string()];
    let coordinator = Coordinator::builder(local_workers(&[a.clone()]))
        .config(config)
        .build();

    let events = run(&coordinator, "task").await;

    let (phase, description) = terminal(&events);
    assert_eq!(phase, Phase::Failed);
    assert!(description.contains("worker 'a' failed: first call fails"), "{}", description);
    assert_eq!(a.invocations(), 1);
}

#[tokio::test]
async fn test_parallel_merges_results_in_declared_order() {
    let slow = ScriptedAgent::delayed("slow", "first", Duration::from_millis(100));
    let fast = ScriptedAgent::ok("fast", "second");
    let coordinator = Coordinator::builder(local_workers(&[slow, fast]))
        .mode(CoordinationMode::Parallel)
        .build();

    let events = run(&coordinator, "task").await;

    assert_eq!(terminal(&events).0, Phase::Completed);
    let answer = final_text(&events);
    assert!(answer.starts_with("Orchestration completed. Agents executed: slow, fast"));

    // The fast worker finishes while the slow one is still working
    let fast_done = events
        .iter()
        .position(|e| e.worker() == Some("fast") && e.phase() == Some(Phase::Completed))
        .unwrap();
    let slow_done = events
        .iter()
        .position(|e| e.worker() == Some("slow") && e.phase() == Some(Phase::Completed))
        .unwrap();
    assert!(fast_done < slow_done);
}

// ============================================================================
// Routed
// ============================================================================

#[tokio::test]
async fn test_routed_empty_selection_completes_with_no_agents() {
    let a = ScriptedAgent::ok("a", "x");
    let router = |_task: &Task, _available: &[String]| -> Vec<String> { Vec::new() };
    let coordinator = Coordinator::builder(local_workers(&[a.clone()]))
        .mode(CoordinationMode::Routed)
        .router(Arc::new(router))
        .build();

    let events = run(&coordinator, "task").await;

    assert_eq!(terminal(&events).0, Phase::Completed);
    assert_eq!(final_text(&events), "Orchestration completed. Agents executed: (none)");
    assert_eq!(a.invocations(), 0);
}

#[tokio::test]
async fn test_routed_stops_after_first_worker_by_default() {
    let weather = ScriptedAgent::ok("weather", "sunny");
    let travel = ScriptedAgent::ok("travel", "book a flight");
    let router = KeywordRouter::new().rule(&["weather"], &["weather", "travel"]);
    let coordinator = Coordinator::builder(local_workers(&[travel.clone(), weather.clone()]))
        .mode(CoordinationMode::Routed)
        .router(Arc::new(router))
        .build();

    let events = run(&coordinator, "What is the weather?").await;

    assert_eq!(terminal(&events).0, Phase::Completed);
    assert_eq!(weather.invocations(), 1);
    assert_eq!(travel.invocations(), 0);
    assert!(texts(&events).contains(&"\n--- Selected weather for this task ---\n".to_string()));
}

#[tokio::test]
async fn test_routed_continues_past_failures() {
    let a = ScriptedAgent::failing("a", "nope");
    let b = ScriptedAgent::ok("b", "yes");
    let coordinator = Coordinator::builder(local_workers(&[a.clone(), b.clone()]))
        .mode(CoordinationMode::Routed)
        .stop_predicate(Arc::new(RunAllSelected))
        .build();

    let events = run(&coordinator, "anything").await;

    assert_eq!(terminal(&events).0, Phase::Completed);
    assert_eq!(a.invocations(), 1);
    assert_eq!(b.invocations(), 1);
    assert!(final_text(&events).contains("[a]\n(failed: nope)"));
}

#[tokio::test]
async fn test_routed_fails_when_every_worker_failed() {
    let coordinator = Coordinator::builder(local_workers(&[ScriptedAgent::failing("a", "nope")]))
        .mode(CoordinationMode::Routed)
        .build();

    let events = run(&coordinator, "anything").await;

    let (phase, description) = terminal(&events);
    assert_eq!(phase, Phase::Failed);
    assert!(description.contains("worker 'a' failed: nope"));
}

#[tokio::test]
async fn test_routed_drops_unknown_workers() {
    let a = ScriptedAgent::ok("a", "x");
    let router = |_task: &Task, _available: &[String]| -> Vec<String> { vec!["ghost".to_string(), "a".to_string()] };
    let coordinator = Coordinator::builder(local_workers(&[a.clone()]))
        .mode(CoordinationMode::Routed)
        .router(Arc::new(router))
        .build();

    let events = run(&coordinator, "task").await;

    assert_eq!(terminal(&events).0, Phase::Completed);
    assert_eq!(a.invocations(), 1);
}

struct FailingRouter;

#[async_trait]
impl Router for FailingRouter {
    async fn select(&self, _task: &Task, _available: &[String]) -> CoordinationResult<Vec<String>> {
        Err(CoordinationError::Routing("classifier offline".to_string()))
    }
}

#[tokio::test]
async fn test_routing_error_fails_run() {
    let coordinator = Coordinator::builder(local_workers(&[ScriptedAgent::ok("a", "x")]))
        .mode(CoordinationMode::Routed)
        .router(Arc::new(FailingRouter))
        .build();

    let events = run(&coordinator, "task").await;

    let (phase, description) = terminal(&events);
    assert_eq!(phase, Phase::Failed);
    assert!(description.contains("classifier offline"));
}

// ============================================================================
// Iterative
// ============================================================================

#[tokio::test]
async fn test_iterative_runs_max_rounds_when_never_satisfied() {
    let generator = ScriptedAgent::ok("generator", "draft");
    let critic = ScriptedAgent::ok("critic", "needs more detail");
    let coordinator = Coordinator::builder(local_workers(&[generator.clone(), critic.clone()]))
        .config(config(CoordinationMode::Iterative))
        .build();

    let events = run(&coordinator, "write a haiku").await;

    assert_eq!(terminal(&events).0, Phase::Completed);
    assert_eq!(generator.invocations(), 3);
    assert_eq!(critic.invocations(), 3);
    assert!(final_text(&events).starts_with("Orchestration completed after 3 round(s)"));

    let revisions = generator.instructions();
    assert_eq!(revisions[0], "write a haiku");
    assert!(revisions[1].contains("Previous draft:\ndraft"));
    assert!(revisions[1].contains("Reviewer feedback:\nneeds more detail"));
}

#[tokio::test]
async fn test_iterative_stops_when_critic_approves() {
    let generator = ScriptedAgent::ok("generator", "draft");
    let critic = ScriptedAgent::ok("critic", "Looks great. APPROVED");
    let mut config = config(CoordinationMode::Iterative);
    config.iterative.approval_marker = Some("approved".to_string());
    let coordinator = Coordinator::builder(local_workers(&[generator.clone(), critic.clone()]))
        .config(config)
        .build();

    let events = run(&coordinator, "write a haiku").await;

    assert_eq!(terminal(&events).0, Phase::Completed);
    assert_eq!(generator.invocations(), 1);
    assert!(critic.instructions()[0].contains("include the word approved"));
}

#[tokio::test]
async fn test_iterative_generator_failure_fails_run() {
    let generator = ScriptedAgent::failing("generator", "writer's block");
    let critic = ScriptedAgent::ok("critic", "fine");
    let coordinator = Coordinator::builder(local_workers(&[generator, critic.clone()]))
        .mode(CoordinationMode::Iterative)
        .build();

    let events = run(&coordinator, "task").await;

    assert_eq!(terminal(&events).0, Phase::Failed);
    assert_eq!(critic.invocations(), 0);
}

// ============================================================================
// Cancellation, timeouts and failures outside the workers
// ============================================================================

#[tokio::test]
async fn test_cancel_before_start_invokes_no_worker() {
    let a = ScriptedAgent::ok("a", "x");
    let coordinator = Coordinator::builder(local_workers(&[a.clone()])).build();
    let (sink, stream) = EventStream::channel();
    let token = CancellationToken::new();
    token.cancel();

    coordinator
        .execute_with_cancellation(Task::new("task", "s"), sink, token)
        .await;
    let events = stream.collect_all().await;

    assert_eq!(terminal(&events).0, Phase::Cancelled);
    assert_eq!(a.invocations(), 0);
}

#[tokio::test]
async fn test_cancel_mid_run_stops_further_invocations() {
    let slow = ScriptedAgent::hanging("slow");
    let next = ScriptedAgent::ok("next", "x");
    let coordinator = Coordinator::builder(local_workers(&[slow, next.clone()])).build();

    let mut stream = coordinator.submit(Task::new("task", "s-cancel"));
    let mut events = Vec::new();
    while let Some(event) = stream.recv().await {
        let started = event.worker() == Some("slow") && event.phase() == Some(Phase::Running);
        events.push(event);
        if started {
            break;
        }
    }

    assert!(coordinator.cancel("s-cancel").await);
    events.extend(stream.collect_all().await);

    let (phase, description) = terminal(&events);
    assert_eq!(phase, Phase::Cancelled);
    assert_eq!(description, "Orchestration cancelled.");
    assert_eq!(next.invocations(), 0);
    assert!(!coordinator.cancel("s-cancel").await);
}

#[tokio::test]
async fn test_cancel_unknown_session_returns_false() {
    let coordinator = Coordinator::builder(local_workers(&[ScriptedAgent::ok("a", "x")])).build();
    assert!(!coordinator.cancel("nobody").await);
}

#[tokio::test]
async fn test_duplicate_session_is_rejected() {
    let coordinator = Coordinator::builder(local_workers(&[ScriptedAgent::hanging("slow")])).build();

    let mut first = coordinator.submit(Task::new("task", "dup"));
    while let Some(event) = first.recv().await {
        if event.worker() == Some("slow") {
            break;
        }
    }

    let second = run_with_session(&coordinator, "dup").await;
    assert_eq!(second.len(), 1);
    let (phase, description) = terminal(&second);
    assert_eq!(phase, Phase::Failed);
    assert!(description.contains("already active"));

    assert!(coordinator.cancel("dup").await);
    let rest = first.collect_all().await;
    assert_eq!(rest.last().and_then(|e| e.phase()), Some(Phase::Cancelled));
}

async fn run_with_session(coordinator: &Coordinator, session: &str) -> Vec<ProgressEvent> {
    coordinator.submit(Task::new("task", session)).collect_all().await
}

#[tokio::test]
async fn test_worker_timeout_fails_that_worker() {
    let slow = ScriptedAgent::hanging("slow");
    let transport = Arc::new(LocalTransport::new().register("slow", slow as Arc<dyn TaskExecutor>));
    let workers = WorkerSet::from_configs(
        &[WorkerConfig {
            name: "slow".to_string(),
            url: "local://slow".to_string(),
            description: None,
        }],
        transport,
        Some(Duration::from_millis(50)),
    );
    let coordinator = Coordinator::builder(workers).build();

    let events = run(&coordinator, "task").await;

    let (phase, description) = terminal(&events);
    assert_eq!(phase, Phase::Failed);
    assert!(description.contains("timed out"), "{}", description);
}

#[tokio::test]
async fn test_run_timeout_fails_run() {
    let mut config = config(CoordinationMode::Sequential);
    config.run_timeout_secs = Some(1);
    let coordinator = Coordinator::builder(local_workers(&[ScriptedAgent::hanging("slow")]))
        .config(config)
        .build();

    let events = run(&coordinator, "task").await;

    let (phase, description) = terminal(&events);
    assert_eq!(phase, Phase::Failed);
    assert_eq!(description, "Orchestration failed: timed out after 1s");
}

#[tokio::test]
async fn test_unreachable_worker_fails_sequential_run() {
    let transport = Arc::new(LocalTransport::new());
    let workers = WorkerSet::from_addresses(vec![("ghost".to_string(), "local://ghost".to_string())], transport);
    let coordinator = Coordinator::builder(workers).build();

    let events = run(&coordinator, "task").await;

    let (phase, description) = terminal(&events);
    assert_eq!(phase, Phase::Failed);
    assert!(description.contains("cannot connect to worker 'ghost'"), "{}", description);
    assert!(events
        .iter()
        .any(|e| e.worker() == Some("ghost") && e.phase() == Some(Phase::Failed)));
}

#[tokio::test]
async fn test_unknown_participant_fails_run() {
    let mut config = config(CoordinationMode::Sequential);
    config.participants = vec!["a".to_string(), "missing".to_string()];
    let a = ScriptedAgent::ok("a", "x");
    let coordinator = Coordinator::builder(local_workers(&[a.clone()]))
        .config(config)
        .build();

    let events = run(&coordinator, "task").await;

    let (phase, description) = terminal(&events);
    assert_eq!(phase, Phase::Failed);
    assert!(description.contains("unknown worker: missing"));
    assert_eq!(a.invocations(), 0);
}

#[tokio::test]
async fn test_no_workers_fails_iterative_run() {
    let coordinator = Coordinator::builder(WorkerSet::new())
        .mode(CoordinationMode::Iterative)
        .build();

    let events = run(&coordinator, "task").await;

    assert_eq!(terminal(&events).0, Phase::Failed);
}

struct BrokenSynthesizer;

#[async_trait]
impl Synthesizer for BrokenSynthesizer {
    async fn synthesize(&self, _synthesis: &Synthesis) -> CoordinationResult<String> {
        Err(CoordinationError::Synthesis("model unavailable".to_string()))
    }
}

#[tokio::test]
async fn test_synthesizer_failure_degrades_to_default_answer() {
    let coordinator = Coordinator::builder(local_workers(&[ScriptedAgent::ok("a", "x")]))
        .synthesizer(Arc::new(BrokenSynthesizer))
        .build();

    let events = run(&coordinator, "task").await;

    assert_eq!(terminal(&events).0, Phase::Completed);
    assert!(final_text(&events).starts_with("Orchestration completed. Agents executed: a"));
}

#[tokio::test]
async fn test_run_ends_when_caller_goes_away() {
    let coordinator = Coordinator::builder(local_workers(&[ScriptedAgent::ok("a", "x")])).build();
    let (sink, stream) = EventStream::channel();
    drop(stream);

    coordinator.execute(Task::new("task", "gone"), sink).await;

    assert!(coordinator.active_sessions().await.is_empty());
}

#[tokio::test]
async fn test_nested_coordinator_prefixes_worker_names() {
    let inner = Coordinator::builder(local_workers(&[ScriptedAgent::ok("leaf", "deep")])).build();
    let transport = Arc::new(LocalTransport::new().register("team", Arc::new(inner) as Arc<dyn TaskExecutor>));
    let workers = WorkerSet::from_addresses(vec![("team".to_string(), "local://team".to_string())], transport);
    let outer = Coordinator::builder(workers).build();

    let events = run(&outer, "task").await;

    assert_eq!(terminal(&events).0, Phase::Completed);
    assert!(events.iter().any(|e| e.worker() == Some("team/leaf")));
    assert!(events
        .iter()
        .any(|e| e.worker() == Some("team") && e.phase() == Some(Phase::Completed)));
}
