use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::config::{ServerSettings, Settings};
use crate::coordinator::{CoordinationConfig, CoordinationMode, WorkerConfig};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Cross-reference error: {0}")]
    CrossReference(String),

    #[error("Duplicate entry: {0}")]
    Duplicate(String),
}

const WORKER_SCHEMES: [&str; 3] = ["http://", "https://", "local://"];

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(settings: &Settings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        errors.extend(Self::validate_server(&settings.server));
        errors.extend(Self::validate_workers(&settings.workers));
        errors.extend(Self::validate_coordination(&settings.coordination));

        if let Some(llm) = &settings.llm {
            if llm.model.trim().is_empty() {
                errors.push(ValidationError::MissingField("llm.model".to_string()));
            }
        }
        if settings.coordination.routing.use_llm && settings.llm.is_none() {
            errors.push(ValidationError::CrossReference(
                "coordination.routing.use_llm requires an [llm] section".to_string(),
            ));
        }

        errors.extend(Self::validate_cross_references(settings));

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_server(server: &ServerSettings) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if server.host.is_empty() {
            errors.push(ValidationError::MissingField("server.host".to_string()));
        }

        if server.port == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "server.port".to_string(),
                reason: "Port must be greater than 0".to_string(),
            });
        }

        errors
    }

    fn validate_workers(workers: &[WorkerConfig]) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut seen_names = HashMap::new();

        for (idx, worker) in workers.iter().enumerate() {
            if let Some(prev_idx) = seen_names.insert(&worker.name, idx) {
                errors.push(ValidationError::Duplicate(format!(
                    "Worker name '{}' appears at indices {} and {}",
                    worker.name, prev_idx, idx
                )));
            }

            if worker.name.is_empty() {
                errors.push(ValidationError::MissingField(format!("workers[{}].name", idx)));
            }

            if worker.url.is_empty() {
                errors.push(ValidationError::MissingField(format!("workers[{}].url", idx)));
            } else if !WORKER_SCHEMES.iter().any(|s| worker.url.starts_with(s)) {
                errors.push(ValidationError::InvalidValue {
                    field: format!("workers[{}].url", idx),
                    reason: format!(
                        "'{}' must start with one of {}",
                        worker.url,
                        WORKER_SCHEMES.join(", ")
                    ),
                });
            }
        }

        errors
    }

    fn validate_coordination(coordination: &CoordinationConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        let timeouts = [
            ("coordination.worker_timeout_secs", Some(coordination.worker_timeout_secs)),
            ("coordination.connect_timeout_secs", Some(coordination.connect_timeout_secs)),
            ("coordination.run_timeout_secs", coordination.run_timeout_secs),
        ];
        for (field, value) in timeouts {
            if value == Some(0) {
                errors.push(ValidationError::InvalidValue {
                    field: field.to_string(),
                    reason: "Timeout must be greater than 0".to_string(),
                });
            }
        }

        let mut seen = HashSet::new();
        for name in &coordination.participants {
            if !seen.insert(name.as_str()) {
                errors.push(ValidationError::Duplicate(format!("coordination.participants '{}'", name)));
            }
        }

        if coordination.iterative.max_rounds == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "coordination.iterative.max_rounds".to_string(),
                reason: "At least one round is required".to_string(),
            });
        }

        for (idx, rule) in coordination.routing.rules.iter().enumerate() {
            if rule.keywords.iter().all(|k| k.trim().is_empty()) {
                errors.push(ValidationError::MissingField(format!(
                    "coordination.routing.rules[{}].keywords",
                    idx
                )));
            }
            if rule.workers.is_empty() {
                errors.push(ValidationError::MissingField(format!(
                    "coordination.routing.rules[{}].workers",
                    idx
                )));
            }
        }

        errors
    }

    /// Every worker name mentioned by the coordination section must be a known worker
    fn validate_cross_references(settings: &Settings) -> Vec<ValidationError> {
        let known: HashSet<String> = settings
            .effective_workers()
            .into_iter()
            .map(|w| w.name)
            .collect();
        let coordination = &settings.coordination;

        let mut references: Vec<(String, &String)> = Vec::new();
        for name in &coordination.participants {
            references.push(("coordination.participants".to_string(), name));
        }
        for (idx, rule) in coordination.routing.rules.iter().enumerate() {
            for name in &rule.workers {
                references.push((format!("coordination.routing.rules[{}]", idx), name));
            }
        }
        for name in coordination.routing.fallback.iter().flatten() {
            references.push(("coordination.routing.fallback".to_string(), name));
        }
        for name in [&coordination.iterative.generator, &coordination.iterative.critic]
            .into_iter()
            .flatten()
        {
            references.push(("coordination.iterative".to_string(), name));
        }

        let mut errors: Vec<ValidationError> = references
            .into_iter()
            .filter(|(_, name)| !known.contains(*name))
            .map(|(field, name)| {
                ValidationError::CrossReference(format!("{} references unknown worker '{}'", field, name))
            })
            .collect();

        if coordination.mode == CoordinationMode::Iterative
            && coordination.iterative.generator.is_none()
            && coordination.iterative.critic.is_none()
            && known.len() < 2
        {
            errors.push(ValidationError::InvalidValue {
                field: "coordination.iterative".to_string(),
                reason: "Iterative mode needs a generator and a critic".to_string(),
            });
        }

        errors
    }
}
