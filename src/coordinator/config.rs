//! Configuration types for coordination runs

use serde::{Deserialize, Serialize};

use super::plan::CoordinationMode;

/// Configuration for one remote worker agent
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Unique worker name
    pub name: String,
    /// Address of the worker (`http://`, `https://` or `local://`)
    pub url: String,
    /// Optional description used when the worker's card is unavailable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// How a coordinator runs its workers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoordinationConfig {
    /// Strategy used for every run
    #[serde(default)]
    pub mode: CoordinationMode,
    /// Workers taking part in sequential and parallel runs, in order.
    /// Empty means every configured worker in declaration order.
    #[serde(default)]
    pub participants: Vec<String>,
    /// Routing rules (routed mode)
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Generator/critic loop settings (iterative mode)
    #[serde(default)]
    pub iterative: IterativeConfig,
    /// Time limit for a single worker invocation
    #[serde(default = "default_worker_timeout")]
    pub worker_timeout_secs: u64,
    /// Time limit for a whole run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout_secs: Option<u64>,
    /// Time limit for establishing a worker connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_worker_timeout() -> u64 {
    120
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            mode: CoordinationMode::default(),
            participants: Vec::new(),
            routing: RoutingConfig::default(),
            iterative: IterativeConfig::default(),
            worker_timeout_secs: default_worker_timeout(),
            run_timeout_secs: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Keyword routing configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RoutingConfig {
    /// Rules evaluated in order; every matching rule contributes its workers
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
    /// Workers used when no rule matches. Unset means every worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Vec<String>>,
    /// Stop after the first worker that succeeds instead of the first worker that runs
    #[serde(default)]
    pub stop_on_success: bool,
    /// Ask the configured LLM to pick workers, falling back to the rules
    #[serde(default)]
    pub use_llm: bool,
}

/// Route tasks mentioning any keyword to the listed workers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingRule {
    pub keywords: Vec<String>,
    pub workers: Vec<String>,
}

/// Generator/critic refinement loop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IterativeConfig {
    /// Worker producing drafts. Defaults to the first configured worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    /// Worker reviewing drafts. Defaults to the second configured worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critic: Option<String>,
    /// Maximum number of generator/critic rounds
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// Text in a critique that ends the loop early
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_marker: Option<String>,
}

fn default_max_rounds() -> u32 {
    3
}

impl Default for IterativeConfig {
    fn default() -> Self {
        Self {
            generator: None,
            critic: None,
            max_rounds: default_max_rounds(),
            approval_marker: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordination_defaults() {
        let config: CoordinationConfig = toml::from_str("").unwrap();
        assert_eq!(config.mode, CoordinationMode::Sequential);
        assert_eq!(config.worker_timeout_secs, 120);
        assert_eq!(config.iterative.max_rounds, 3);
        assert!(config.routing.fallback.is_none());
        assert!(config.run_timeout_secs.is_none());
    }

    #[test]
    fn test_routing_rules_from_toml() {
        let config: CoordinationConfig = toml::from_str(
            r#"
mode = "routed"

[routing]
fallback = ["general_agent"]

[[routing.rules]]
keywords = ["weather", "forecast"]
workers = ["weather_agent"]
"#,
        )
        .unwrap();
        assert_eq!(config.mode, CoordinationMode::Routed);
        assert_eq!(config.routing.rules.len(), 1);
        assert_eq!(config.routing.rules[0].workers, vec!["weather_agent"]);
        assert_eq!(
            config.routing.fallback,
            Some(vec!["general_agent".to_string()])
        );
    }
}
