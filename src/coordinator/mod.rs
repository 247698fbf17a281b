//! Delegating task coordinator
//!
//! Fans one task out to a set of worker agents under a coordination mode,
//! forwards their progress events and combines their outputs.
//!
//! ```text
//! Task -> Coordinator -> StrategyEngine -> WorkerHandle -> Transport
//!              |               |
//!              |               +-> ResultMap -> Synthesizer
//!              +-> EventSink (THINKING, RUNNING, worker events, terminal)
//! ```

pub mod aggregate;
pub mod config;
pub mod error;
pub mod facade;
pub mod plan;
pub mod policy;
pub mod routing;
pub mod strategy;
pub mod transport;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod strategy_test;

pub use aggregate::{DefaultSynthesizer, LlmSynthesizer, ResultMap, Synthesis, Synthesizer, WorkerOutcome};
pub use config::{CoordinationConfig, IterativeConfig, RoutingConfig, RoutingRule, WorkerConfig};
pub use error::{CoordinationError, CoordinationResult, WorkerInvocationError};
pub use facade::{Coordinator, CoordinatorBuilder, WorkerInfo};
pub use plan::{CoordinationMode, CoordinationPlan, PlanStep};
pub use policy::{
    ApprovalMarker, CarryForward, InstructionBuilder, NeverSatisfied, RunAllSelected, SatisfactionPredicate,
    StopAfterFirst, StopAfterFirstSuccess, StopPredicate,
};
pub use routing::{AllWorkersRouter, KeywordRouter, LlmRouter, Router};
pub use strategy::{Policies, RunContext, StrategyEngine, StrategyOutcome};
pub use transport::{Connection, HttpTransport, LocalTransport, SchemeTransport, Transport};
pub use worker::{WorkerEvents, WorkerHandle, WorkerSet};
