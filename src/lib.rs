//! # Maestro - Delegating Task Coordinator
//!
//! Maestro fans one task out to a set of worker agents under a coordination
//! mode, streams their progress back to the caller and combines their
//! outputs into one answer.
//!
//! ## Features
//!
//! - **4 Coordination Modes**: Sequential, Parallel, Routed, Iterative
//! - **Pluggable Policies**: routers, stop predicates, satisfaction checks, synthesizers
//! - **Transports**: HTTP (NDJSON event streams) and in-process `local://` agents
//! - **Bundled Agents**: a simple agent and a tool-using agent
//! - **Metrics**: Prometheus metrics for runs and worker invocations
//! - **Health Checks**: Kubernetes-ready health endpoints
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use maestro::config::Settings;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::new()?;
//!     let state = maestro::build_state(&settings, None)?;
//!     let result = state
//!         .coordinator
//!         .expect("coordinator role")
//!         .submit(maestro::domain::Task::with_new_session("is 97 prime?"))
//!         .collect_all()
//!         .await;
//!     println!("{:?}", result.last());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Domain**: tasks, progress events, agent cards and the `TaskExecutor` port
//! - **Coordinator**: worker handles, strategy engine, aggregation and the façade
//! - **Agents / Tools**: bundled executors and their tool registry
//! - **Adapters**: HTTP handlers, health and metrics
//! - **Config**: configuration loading and validation

pub mod adapters;
pub mod agents;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod llm;
pub mod tools;

use crate::adapters::health_handler::HealthHandler;
use crate::adapters::metrics_handler::{MetricsCollector, MetricsHandler};
use crate::adapters::task_handler::{self, AgentState};
use crate::agents::{SimpleAgent, ToolAgent};
use crate::config::{AgentRole, Settings};
use crate::coordinator::{
    Coordinator, HttpTransport, KeywordRouter, LlmRouter, LlmSynthesizer, LocalTransport, SchemeTransport,
    Transport, WorkerSet,
};
use crate::domain::AGENT_CARD_PATH;
use crate::llm::{LlmClient, OpenAiClient};
use crate::tools::ToolRegistry;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;

/// Creates the Axum application router with all endpoints configured.
///
/// # Arguments
///
/// * `state` - Executor served by this process
/// * `health_handler` - Health check handler
/// * `metrics_handler` - Metrics collection handler
///
/// # Returns
///
/// Configured Axum Router
pub fn create_app(
    state: AgentState,
    health_handler: Arc<HealthHandler>,
    metrics_handler: Arc<MetricsHandler>,
) -> Router {
    let ops_router = Router::new()
        .route("/health", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.health().await }
            }
        }))
        .route("/health/ready", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.ready().await }
            }
        }))
        .route("/health/live", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.live().await }
            }
        }))
        .route("/metrics", get({
            let handler = metrics_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.metrics().await }
            }
        }));

    let task_router = Router::new()
        .route(AGENT_CARD_PATH, get(task_handler::get_card))
        .route("/tasks", post(task_handler::submit_task))
        .route("/tasks/:session_id/cancel", post(task_handler::cancel_task))
        .route("/workers", get(task_handler::list_workers))
        .with_state(state);

    ops_router.merge(task_router).layer(
        tower_http::cors::CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    )
}

/// Builds the executor for the configured role
pub fn build_state(settings: &Settings, metrics: Option<Arc<MetricsCollector>>) -> anyhow::Result<AgentState> {
    let url = settings.server.public_url();
    let state = match settings.role {
        AgentRole::Simple => AgentState::new(Arc::new(SimpleAgent::new(url))),
        AgentRole::Tools => AgentState::new(Arc::new(ToolAgent::new(ToolRegistry::with_builtins(), url))),
        AgentRole::Coordinator => AgentState::for_coordinator(build_coordinator(settings, metrics)?),
    };
    Ok(state)
}

/// Builds a coordinator over the configured workers
///
/// `local://simple` and `local://tools` resolve to in-process bundled agents;
/// every other worker is reached over HTTP.
pub fn build_coordinator(
    settings: &Settings,
    metrics: Option<Arc<MetricsCollector>>,
) -> anyhow::Result<Coordinator> {
    let coordination = &settings.coordination;

    let local = LocalTransport::new()
        .register("simple", Arc::new(SimpleAgent::default()))
        .register("tools", Arc::new(ToolAgent::default()));
    let http = HttpTransport::new(Duration::from_secs(coordination.connect_timeout_secs));
    let transport: Arc<dyn Transport> = Arc::new(SchemeTransport::new(http, local));

    let workers = Arc::new(WorkerSet::from_configs(
        &settings.effective_workers(),
        transport,
        Some(Duration::from_secs(coordination.worker_timeout_secs)),
    ));

    let mut builder = Coordinator::builder(workers.clone())
        .config(coordination.clone())
        .public_url(settings.server.public_url());

    if let Some(llm) = &settings.llm {
        let client: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(llm)?);
        tracing::info!("Using LLM synthesis with model {}", client.model());
        if coordination.routing.use_llm {
            let fallback = Arc::new(KeywordRouter::from_config(&coordination.routing));
            builder = builder.router(Arc::new(LlmRouter::new(client.clone(), workers, fallback)));
        }
        builder = builder.synthesizer(Arc::new(LlmSynthesizer::new(client)));
    }

    if let Some(metrics) = metrics {
        builder = builder.metrics(metrics);
    }

    Ok(builder.build())
}
