//! Query routing and confidence arbitration.
//!
//! [`RoutingOrchestrator`] walks a query through the guardrail, the knowledge
//! base, web search and solution generation, picks one candidate and wraps
//! it in a [`ResponseEnvelope`](crate::models::ResponseEnvelope) with steps,
//! an aggregate confidence and ordered provenance.

mod assembly;
mod orchestrator;
mod steps;

#[cfg(test)]
mod tests;

pub use assembly::{aggregate_confidence, build_provenance, normalize_source_id};
pub use orchestrator::{RoutingOrchestrator, RoutingOrchestratorBuilder};
pub use steps::decompose_steps;
