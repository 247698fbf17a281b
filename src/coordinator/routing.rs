//! Worker selection for routed runs
//!
//! A router maps a task and the available worker names to an ordered
//! subset of those names. Closures of type `Fn(&Task, &[String]) -> Vec<String>`
//! are routers too.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::config::{RoutingConfig, RoutingRule};
use super::error::CoordinationResult;
use super::worker::WorkerSet;
use crate::domain::Task;
use crate::llm::LlmClient;

#[async_trait]
pub trait Router: Send + Sync {
    /// Select workers for `task`, in execution order
    async fn select(&self, task: &Task, available: &[String]) -> CoordinationResult<Vec<String>>;
}

#[async_trait]
impl<F> Router for F
where
    F: Fn(&Task, &[String]) -> Vec<String> + Send + Sync,
{
    async fn select(&self, task: &Task, available: &[String]) -> CoordinationResult<Vec<String>> {
        Ok(self(task, available))
    }
}

/// Selects every available worker
#[derive(Debug, Clone, Copy, Default)]
pub struct AllWorkersRouter;

#[async_trait]
impl Router for AllWorkersRouter {
    async fn select(&self, _task: &Task, available: &[String]) -> CoordinationResult<Vec<String>> {
        Ok(available.to_vec())
    }
}

/// Routes on case-insensitive keyword matches
///
/// Every matching rule contributes its workers, in rule order, without
/// duplicates. When nothing matches the fallback list is used, or every
/// available worker if there is no fallback.
#[derive(Debug, Clone, Default)]
pub struct KeywordRouter {
    rules: Vec<RoutingRule>,
    fallback: Option<Vec<String>>,
}

impl KeywordRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RoutingConfig) -> Self {
        Self {
            rules: config.rules.clone(),
            fallback: config.fallback.clone(),
        }
    }

    pub fn rule(mut self, keywords: &[&str], workers: &[&str]) -> Self {
        self.rules.push(RoutingRule {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            workers: workers.iter().map(|w| w.to_string()).collect(),
        });
        self
    }

    pub fn fallback(mut self, workers: &[&str]) -> Self {
        self.fallback = Some(workers.iter().map(|w| w.to_string()).collect());
        self
    }

    fn matches(&self, instruction: &str) -> Vec<String> {
        let text = instruction.to_lowercase();
        let mut selected: Vec<String> = Vec::new();
        for rule in &self.rules {
            let hit = rule
                .keywords
                .iter()
                .any(|k| !k.is_empty() && text.contains(&k.to_lowercase()));
            if hit {
                for worker in &rule.workers {
                    if !selected.contains(worker) {
                        selected.push(worker.clone());
                    }
                }
            }
        }
        selected
    }
}

#[async_trait]
impl Router for KeywordRouter {
    async fn select(&self, task: &Task, available: &[String]) -> CoordinationResult<Vec<String>> {
        let selected = self.matches(&task.instruction);
        if !selected.is_empty() {
            return Ok(selected);
        }
        debug!("No routing rule matched, using fallback");
        Ok(self
            .fallback
            .clone()
            .unwrap_or_else(|| available.to_vec()))
    }
}

const ROUTING_SYSTEM_PROMPT: &str = "You route user requests to specialist agents. \
Reply with the names of the agents that should handle the request, most relevant first, \
separated by commas. Reply NONE if no agent fits. Reply with names only.";

/// Asks an LLM to pick workers from their descriptions
///
/// Any LLM failure or an unusable reply defers to the fallback router.
pub struct LlmRouter {
    client: Arc<dyn LlmClient>,
    workers: Arc<WorkerSet>,
    fallback: Arc<dyn Router>,
}

impl LlmRouter {
    pub fn new(client: Arc<dyn LlmClient>, workers: Arc<WorkerSet>, fallback: Arc<dyn Router>) -> Self {
        Self {
            client,
            workers,
            fallback,
        }
    }

    fn prompt(&self, task: &Task, available: &[String]) -> String {
        let mut prompt = String::from("Available agents:");
        for name in available {
            let description = self
                .workers
                .get(name)
                .and_then(|w| w.description())
                .unwrap_or_else(|| "(no description)".to_string());
            prompt.push_str(&format!("\n- {}: {}", name, description));
        }
        prompt.push_str(&format!("\n\nRequest:\n{}", task.instruction));
        prompt
    }

    /// Known names from a comma or newline separated reply, in reply order
    fn parse_reply(reply: &str, available: &[String]) -> Option<Vec<String>> {
        let reply = reply.trim();
        if reply.eq_ignore_ascii_case("none") {
            return Some(Vec::new());
        }

        let mut selected: Vec<String> = Vec::new();
        for part in reply.split(|c: char| c == ',' || c == '\n') {
            let candidate = part
                .trim()
                .trim_matches(|c: char| matches!(c, '-' | '*' | '`' | '"' | '.') || c.is_whitespace());
            if let Some(name) = available.iter().find(|n| n.eq_ignore_ascii_case(candidate)) {
                if !selected.contains(name) {
                    selected.push(name.clone());
                }
            }
        }

        if selected.is_empty() {
            None
        } else {
            Some(selected)
        }
    }
}

#[async_trait]
impl Router for LlmRouter {
    async fn select(&self, task: &Task, available: &[String]) -> CoordinationResult<Vec<String>> {
        match self
            .client
            .complete(ROUTING_SYSTEM_PROMPT, &self.prompt(task, available))
            .await
        {
            Ok(reply) => match Self::parse_reply(&reply, available) {
                Some(selected) => {
                    debug!("LLM selected workers: {:?}", selected);
                    Ok(selected)
                }
                None => {
                    warn!("LLM routing reply named no known worker: {:?}", reply);
                    self.fallback.select(task, available).await
                }
            },
            Err(e) => {
                warn!("LLM routing failed, using fallback router: {}", e);
                self.fallback.select(task, available).await
            }
        }
    }
}

/// Drop names that are not configured workers, and duplicates
pub fn retain_known(selected: Vec<String>, workers: &WorkerSet) -> Vec<String> {
    let mut kept: Vec<String> = Vec::new();
    for name in selected {
        if !workers.contains(&name) {
            warn!("Router selected unknown worker '{}', skipping", name);
            continue;
        }
        if !kept.contains(&name) {
            kept.push(name);
        }
    }
    kept
}
