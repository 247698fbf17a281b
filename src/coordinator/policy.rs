//! Pluggable decision points of the strategy engine

use super::aggregate::ResultMap;
use super::plan::PlanStep;

/// Builds the instruction a sequential step receives
pub trait InstructionBuilder: Send + Sync {
    /// `prior` holds exactly the outcomes of the steps before `step`
    fn build(&self, step: &PlanStep, prior: &ResultMap) -> String;
}

/// Passes the step instruction through, followed by the earlier outputs
#[derive(Debug, Clone, Copy, Default)]
pub struct CarryForward;

impl InstructionBuilder for CarryForward {
    fn build(&self, step: &PlanStep, prior: &ResultMap) -> String {
        let mut outputs = prior.successes().peekable();
        if outputs.peek().is_none() {
            return step.instruction.clone();
        }

        let mut instruction = format!("{}\n\nPrevious results:", step.instruction);
        for (name, output) in outputs {
            instruction.push_str(&format!("\n- {}: {}", name, output.trim()));
        }
        instruction
    }
}

impl<F> InstructionBuilder for F
where
    F: Fn(&PlanStep, &ResultMap) -> String + Send + Sync,
{
    fn build(&self, step: &PlanStep, prior: &ResultMap) -> String {
        self(step, prior)
    }
}

/// Decides after each routed worker whether to skip the rest of the selection
pub trait StopPredicate: Send + Sync {
    fn should_stop(&self, results: &ResultMap) -> bool;
}

/// Stop once any worker has run
#[derive(Debug, Clone, Copy, Default)]
pub struct StopAfterFirst;

impl StopPredicate for StopAfterFirst {
    fn should_stop(&self, results: &ResultMap) -> bool {
        !results.is_empty()
    }
}

/// Stop once any worker has succeeded
#[derive(Debug, Clone, Copy, Default)]
pub struct StopAfterFirstSuccess;

impl StopPredicate for StopAfterFirstSuccess {
    fn should_stop(&self, results: &ResultMap) -> bool {
        results.successes().next().is_some()
    }
}

/// Never stop early
#[derive(Debug, Clone, Copy, Default)]
pub struct RunAllSelected;

impl StopPredicate for RunAllSelected {
    fn should_stop(&self, _results: &ResultMap) -> bool {
        false
    }
}

impl<F> StopPredicate for F
where
    F: Fn(&ResultMap) -> bool + Send + Sync,
{
    fn should_stop(&self, results: &ResultMap) -> bool {
        self(results)
    }
}

/// Decides after each critic step whether the draft is good enough
pub trait SatisfactionPredicate: Send + Sync {
    fn is_satisfied(&self, round: u32, draft: &str, critique: &str) -> bool;
}

/// Satisfied when the critique contains a marker, ignoring case
#[derive(Debug, Clone)]
pub struct ApprovalMarker {
    marker: String,
}

impl ApprovalMarker {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into().to_lowercase(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }
}

impl SatisfactionPredicate for ApprovalMarker {
    fn is_satisfied(&self, _round: u32, _draft: &str, critique: &str) -> bool {
        !self.marker.is_empty() && critique.to_lowercase().contains(&self.marker)
    }
}

/// Always run the maximum number of rounds
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSatisfied;

impl SatisfactionPredicate for NeverSatisfied {
    fn is_satisfied(&self, _round: u32, _draft: &str, _critique: &str) -> bool {
        false
    }
}

impl<F> SatisfactionPredicate for F
where
    F: Fn(u32, &str, &str) -> bool + Send + Sync,
{
    fn is_satisfied(&self, round: u32, draft: &str, critique: &str) -> bool {
        self(round, draft, critique)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::error::WorkerInvocationError;

    #[test]
    fn test_carry_forward_first_step_is_passthrough() {
        let step = PlanStep::new("a", "write a poem");
        assert_eq!(CarryForward.build(&step, &ResultMap::new()), "write a poem");
    }

    #[test]
    fn test_carry_forward_appends_prior_successes() {
        let mut prior = ResultMap::new();
        prior.insert("research", Ok("cats purr\n".to_string()));
        prior.insert("broken", Err(WorkerInvocationError::new("broken", "x")));
        let step = PlanStep::new("writer", "write a poem");
        assert_eq!(
            CarryForward.build(&step, &prior),
            "write a poem\n\nPrevious results:\n- research: cats purr"
        );
    }

    #[test]
    fn test_stop_predicates() {
        let mut results = ResultMap::new();
        assert!(!StopAfterFirst.should_stop(&results));
        results.insert("a", Err(WorkerInvocationError::new("a", "x")));
        assert!(StopAfterFirst.should_stop(&results));
        assert!(!StopAfterFirstSuccess.should_stop(&results));
        results.insert("b", Ok("y".to_string()));
        assert!(StopAfterFirstSuccess.should_stop(&results));
        assert!(!RunAllSelected.should_stop(&results));

        let two = |r: &ResultMap| r.len() >= 2;
        assert!(two.should_stop(&results));
    }

    #[test]
    fn test_approval_marker_ignores_case() {
        let marker = ApprovalMarker::new("APPROVED");
        assert!(marker.is_satisfied(1, "draft", "Looks good. Approved."));
        assert!(!marker.is_satisfied(1, "draft", "needs work"));
        assert!(!NeverSatisfied.is_satisfied(1, "draft", "approved"));
    }
}
