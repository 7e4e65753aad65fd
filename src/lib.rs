//! mathroute: a mathematics tutoring assistant that routes each question
//! through a guardrail, a knowledge base of solved problems, web search and
//! an LLM, and answers with step-by-step solutions, a confidence and the
//! sources they came from.

pub mod app;
pub mod config;
pub mod db;
pub mod doctor;
pub mod error;
pub mod feedback;
pub mod generator;
pub mod guardrail;
pub mod knowledge;
pub mod models;
pub mod ollama;
pub mod router;
pub mod search;
pub mod utils;

pub use app::App;
pub use config::{AppConfig, GuardrailFallbackPolicy, RoutingPolicy};
pub use db::Database;
pub use error::{CapabilityError, ConfigError};
pub use models::{
    Candidate, EnvelopeId, EnvelopeState, ProvenanceEntry, ProvenanceRole, Query, QueryId,
    ResponseEnvelope, SourceKind, SubjectArea,
};
pub use router::{RoutingOrchestrator, RoutingOrchestratorBuilder};
