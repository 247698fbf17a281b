use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub mod validator;

use crate::cli::Cli;
use crate::coordinator::{CoordinationConfig, WorkerConfig};
use crate::llm::LlmConfig;

/// Which executor a process serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Delegates tasks to the configured workers
    #[default]
    Coordinator,
    /// Canned-reply agent
    Simple,
    /// Tool-using agent
    Tools,
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coordinator => write!(f, "coordinator"),
            Self::Simple => write!(f, "simple"),
            Self::Tools => write!(f, "tools"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub server: ServerSettings,
    #[serde(default)]
    pub role: AgentRole,
    /// Workers available to the coordinator
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,
    #[serde(default)]
    pub coordination: CoordinationConfig,
    /// Chat model used by LLM routing and synthesis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// URL advertised on the agent card; defaults to `http://host:port`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
}

impl ServerSettings {
    pub fn public_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                public_url: None,
            },
            role: AgentRole::default(),
            workers: Vec::new(),
            coordination: CoordinationConfig::default(),
            llm: None,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, anyhow::Error> {
        Self::from_root(".")
    }

    /// Create settings from CLI arguments (includes config file and CLI overrides)
    pub fn new_with_cli(cli: &Cli) -> Result<Self, anyhow::Error> {
        let root = cli
            .config
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut settings = Self::load(&cli.config)?;

        // CLI > env vars > config file
        settings.apply_cli_overrides(cli);

        settings.load_workers_from_dir(&root.join("config").join("workers"))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_root(root: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let root = root.as_ref();
        let mut settings = Self::load(&root.join("maestro"))?;
        settings.load_workers_from_dir(&root.join("config").join("workers"))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Config file (optional), then `MAESTRO__*` environment variables, then defaults
    fn load(config_path: &Path) -> Result<Self, anyhow::Error> {
        let s = Config::builder()
            .add_source(File::from(config_path).required(false))
            .add_source(
                Environment::with_prefix("MAESTRO")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .build()?;

        Ok(s.try_deserialize()?)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        validator::ConfigValidator::validate(self).map_err(|errors| {
            let error_messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::anyhow!(
                "Configuration validation failed:\n{}",
                error_messages.join("\n")
            )
        })
    }

    /// Apply CLI argument overrides to settings
    pub fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(role) = cli.role {
            self.role = role;
        }
        if let Some(mode) = cli.mode {
            self.coordination.mode = mode;
        }
        Self::merge_vec_by_key(&mut self.workers, cli.workers.clone(), |w| w.name.clone());
    }

    /// Workers the coordinator runs with: the configured ones, or the bundled agents
    pub fn effective_workers(&self) -> Vec<WorkerConfig> {
        if !self.workers.is_empty() {
            return self.workers.clone();
        }
        vec![
            WorkerConfig {
                name: "simple".to_string(),
                url: "local://simple".to_string(),
                description: Some("Answers greetings and general questions".to_string()),
            },
            WorkerConfig {
                name: "tools".to_string(),
                url: "local://tools".to_string(),
                description: Some("Math, text analysis, unit conversion and time".to_string()),
            },
        ]
    }

    /// Merge two vectors by a key function.
    /// Items from `other` override items in `base` with the same key.
    /// Items from `other` not in `base` are added.
    fn merge_vec_by_key<T, K, F>(base: &mut Vec<T>, other: Vec<T>, key_fn: F)
    where
        K: Eq + std::hash::Hash,
        F: Fn(&T) -> K,
    {
        use std::collections::HashMap;

        let mut key_to_index: HashMap<K, usize> = HashMap::new();
        for (i, item) in base.iter().enumerate() {
            key_to_index.insert(key_fn(item), i);
        }

        for item in other {
            let key = key_fn(&item);
            if let Some(&idx) = key_to_index.get(&key) {
                base[idx] = item;
            } else {
                key_to_index.insert(key, base.len());
                base.push(item);
            }
        }
    }

    /// Load one worker per file from `dir`, in file name order
    pub fn load_workers_from_dir(&mut self, dir: &Path) -> Result<(), anyhow::Error> {
        let pattern = format!("{}/*", dir.display());
        let mut loaded = Vec::new();
        for entry in glob::glob(&pattern)? {
            match entry {
                Ok(path) => {
                    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                        continue;
                    };
                    let content = std::fs::read_to_string(&path)?;
                    let worker: WorkerConfig = match ext {
                        "toml" => toml::from_str(&content)?,
                        "yaml" | "yml" => serde_yaml::from_str(&content)?,
                        "json" => serde_json::from_str(&content)?,
                        _ => continue,
                    };
                    tracing::debug!("Loaded worker '{}' from {}", worker.name, path.display());
                    loaded.push(worker);
                }
                Err(e) => tracing::error!("Error reading worker config: {:?}", e),
            }
        }
        Self::merge_vec_by_key(&mut self.workers, loaded, |w| w.name.clone());
        Ok(())
    }
}
