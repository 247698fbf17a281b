//! Coordination plans

use serde::{Deserialize, Serialize};

use super::error::{CoordinationError, CoordinationResult};
use super::worker::WorkerSet;

/// Strategy used to run the workers of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationMode {
    /// One after another, each seeing the results of the previous ones
    #[default]
    Sequential,
    /// All at once, independently
    Parallel,
    /// A selected subset, in the selected order, until the stop predicate holds
    Routed,
    /// Generator/critic rounds until satisfied or out of rounds
    Iterative,
}

impl std::fmt::Display for CoordinationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinationMode::Sequential => write!(f, "sequential"),
            CoordinationMode::Parallel => write!(f, "parallel"),
            CoordinationMode::Routed => write!(f, "routed"),
            CoordinationMode::Iterative => write!(f, "iterative"),
        }
    }
}

/// One worker and the instruction it receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub worker: String,
    /// Instruction sent to the worker. In sequential mode this is the base
    /// instruction that the instruction builder extends with prior results.
    pub instruction: String,
}

impl PlanStep {
    pub fn new(worker: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            instruction: instruction.into(),
        }
    }
}

/// Workers to run for one task and how to run them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinationPlan {
    pub mode: CoordinationMode,
    pub steps: Vec<PlanStep>,
}

impl CoordinationPlan {
    pub fn new(mode: CoordinationMode, steps: Vec<PlanStep>) -> Self {
        Self { mode, steps }
    }

    /// Names of the workers in plan order
    pub fn worker_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.worker.as_str()).collect()
    }

    /// Check that every step names a configured worker
    pub fn validate(&self, workers: &WorkerSet) -> CoordinationResult<()> {
        if let Some(step) = self.steps.iter().find(|s| !workers.contains(&s.worker)) {
            return Err(CoordinationError::UnknownWorker(step.worker.clone()));
        }
        if self.mode == CoordinationMode::Iterative && self.steps.len() != 2 {
            return Err(CoordinationError::Coordination(format!(
                "iterative plan needs a generator and a critic, got {} step(s)",
                self.steps.len()
            )));
        }
        Ok(())
    }
}
