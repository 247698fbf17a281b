//! Result aggregation: per-worker outcomes and their synthesis into one answer

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::error::{CoordinationResult, WorkerInvocationError};
use super::plan::CoordinationMode;
use crate::llm::LlmClient;

/// Output of one worker invocation
pub type WorkerOutcome = Result<String, WorkerInvocationError>;

/// Worker outcomes in insertion order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultMap {
    entries: Vec<(String, WorkerOutcome)>,
}

impl ResultMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a worker's outcome; a repeated name replaces the earlier outcome in place
    pub fn insert(&mut self, worker: impl Into<String>, outcome: WorkerOutcome) {
        let worker = worker.into();
        match self.entries.iter_mut().find(|(name, _)| *name == worker) {
            Some((_, existing)) => *existing = outcome,
            None => self.entries.push((worker, outcome)),
        }
    }

    pub fn get(&self, worker: &str) -> Option<&WorkerOutcome> {
        self.entries
            .iter()
            .find(|(name, _)| name == worker)
            .map(|(_, outcome)| outcome)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &WorkerOutcome)> {
        self.entries.iter().map(|(name, outcome)| (name.as_str(), outcome))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Successful outputs in insertion order
    pub fn successes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().filter_map(|(name, outcome)| match outcome {
            Ok(output) => Some((name.as_str(), output.as_str())),
            Err(_) => None,
        })
    }

    pub fn failures(&self) -> Vec<WorkerInvocationError> {
        self.entries
            .iter()
            .filter_map(|(_, outcome)| outcome.as_ref().err().cloned())
            .collect()
    }
}

/// Everything a synthesizer gets to see about a finished run
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub mode: CoordinationMode,
    pub instruction: String,
    pub results: ResultMap,
    /// Rounds performed (iterative mode only)
    pub rounds: Option<u32>,
}

/// Combines worker outcomes into the final answer
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, synthesis: &Synthesis) -> CoordinationResult<String>;
}

/// Lists the workers that ran, then each worker's output
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSynthesizer;

impl DefaultSynthesizer {
    pub fn render(synthesis: &Synthesis) -> String {
        let names = synthesis.results.names();
        let executed = if names.is_empty() {
            "(none)".to_string()
        } else {
            names.join(", ")
        };

        let mut answer = match synthesis.rounds {
            Some(rounds) => format!(
                "Orchestration completed after {} round(s). Agents executed: {}",
                rounds, executed
            ),
            None => format!("Orchestration completed. Agents executed: {}", executed),
        };

        for (name, outcome) in synthesis.results.iter() {
            match outcome {
                Ok(output) => answer.push_str(&format!("\n\n[{}]\n{}", name, output.trim_end())),
                Err(e) => answer.push_str(&format!("\n\n[{}]\n(failed: {})", name, e.description)),
            }
        }
        answer
    }
}

#[async_trait]
impl Synthesizer for DefaultSynthesizer {
    async fn synthesize(&self, synthesis: &Synthesis) -> CoordinationResult<String> {
        Ok(Self::render(synthesis))
    }
}

const SYNTHESIS_SYSTEM_PROMPT: &str = "You combine the outputs of several specialist agents into one \
clear, complete answer for the user. Do not mention the agents unless it helps the answer.";

/// Asks an LLM to merge the outputs, falling back to [`DefaultSynthesizer`]
pub struct LlmSynthesizer {
    client: Arc<dyn LlmClient>,
}

impl LlmSynthesizer {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    fn prompt(synthesis: &Synthesis) -> String {
        let mut prompt = format!("User request:\n{}\n\nAgent outputs:", synthesis.instruction);
        for (name, output) in synthesis.results.successes() {
            prompt.push_str(&format!("\n\n[{}]\n{}", name, output));
        }
        prompt.push_str("\n\nWrite the final answer.");
        prompt
    }
}

#[async_trait]
impl Synthesizer for LlmSynthesizer {
    async fn synthesize(&self, synthesis: &Synthesis) -> CoordinationResult<String> {
        if synthesis.results.successes().next().is_none() {
            return Ok(DefaultSynthesizer::render(synthesis));
        }

        match self
            .client
            .complete(SYNTHESIS_SYSTEM_PROMPT, &Self::prompt(synthesis))
            .await
        {
            Ok(answer) if !answer.trim().is_empty() => Ok(answer),
            Ok(_) => {
                warn!("LLM synthesis returned an empty answer, using default synthesis");
                Ok(DefaultSynthesizer::render(synthesis))
            }
            Err(e) => {
                warn!("LLM synthesis failed, using default synthesis: {}", e);
                Ok(DefaultSynthesizer::render(synthesis))
            }
        }
    }
}

/// Run `synthesizer`, degrading to the default rendering if it fails
pub async fn synthesize_or_default(synthesizer: &dyn Synthesizer, synthesis: &Synthesis) -> String {
    match synthesizer.synthesize(synthesis).await {
        Ok(answer) => answer,
        Err(e) => {
            warn!("Synthesis failed, using default synthesis: {}", e);
            DefaultSynthesizer::render(synthesis)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::error::CoordinationError;
    use crate::llm::{LlmError, LlmResult};

    struct FixedLlm(LlmResult<String>);

    #[async_trait]
    impl LlmClient for FixedLlm {
        fn model(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _system: &str, _prompt: &str) -> LlmResult<String> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(_) => Err(LlmError::Network("unreachable".to_string())),
            }
        }
    }

    struct Broken;

    #[async_trait]
    impl Synthesizer for Broken {
        async fn synthesize(&self, _synthesis: &Synthesis) -> CoordinationResult<String> {
            Err(CoordinationError::Synthesis("boom".to_string()))
        }
    }

    fn synthesis(results: ResultMap, rounds: Option<u32>) -> Synthesis {
        Synthesis {
            mode: CoordinationMode::Sequential,
            instruction: "task".to_string(),
            results,
            rounds,
        }
    }

    #[test]
    fn test_result_map_keeps_insertion_order_and_replaces_in_place() {
        let mut map = ResultMap::new();
        map.insert("b", Ok("1".to_string()));
        map.insert("a", Err(WorkerInvocationError::new("a", "bad")));
        map.insert("b", Ok("2".to_string()));
        assert_eq!(map.names(), vec!["b", "a"]);
        assert_eq!(map.get("b"), Some(&Ok("2".to_string())));
        assert_eq!(map.failures().len(), 1);
        assert_eq!(map.successes().count(), 1);
    }

    #[tokio::test]
    async fn test_default_synthesis_lists_agents() {
        let mut map = ResultMap::new();
        map.insert("researcher", Ok("facts".to_string()));
        map.insert("writer", Ok("essay\n".to_string()));
        let answer = DefaultSynthesizer.synthesize(&synthesis(map, None)).await.unwrap();
        assert!(answer.starts_with("Orchestration completed. Agents executed: researcher, writer"));
        assert!(answer.contains("[writer]\nessay"));

        let answer = DefaultSynthesizer
            .synthesize(&synthesis(ResultMap::new(), None))
            .await
            .unwrap();
        assert_eq!(answer, "Orchestration completed. Agents executed: (none)");
    }

    #[test]
    fn test_default_synthesis_reports_rounds() {
        let mut map = ResultMap::new();
        map.insert("gen", Ok("draft".to_string()));
        let answer = DefaultSynthesizer::render(&synthesis(map, Some(2)));
        assert!(answer.starts_with("Orchestration completed after 2 round(s)"));
    }

    #[tokio::test]
    async fn test_llm_synthesis_falls_back_on_error() {
        let mut map = ResultMap::new();
        map.insert("a", Ok("x".to_string()));
        let s = synthesis(map, None);

        let llm = LlmSynthesizer::new(Arc::new(FixedLlm(Ok("merged".to_string()))));
        assert_eq!(llm.synthesize(&s).await.unwrap(), "merged");

        let llm = LlmSynthesizer::new(Arc::new(FixedLlm(Err(LlmError::Timeout))));
        let answer = llm.synthesize(&s).await.unwrap();
        assert!(answer.starts_with("Orchestration completed."));
    }

    #[tokio::test]
    async fn test_failing_synthesizer_degrades_to_default() {
        let answer = synthesize_or_default(&Broken, &synthesis(ResultMap::new(), None)).await;
        assert_eq!(answer, "Orchestration completed. Agents executed: (none)");
    }
}
