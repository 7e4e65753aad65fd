mod candidate;
mod envelope;
mod ids;
mod query;
mod subject;

pub use candidate::{Candidate, SourceKind, clamp_unit, select_best};
pub use envelope::{EnvelopeState, ProvenanceEntry, ProvenanceRole, ResponseEnvelope};
pub use ids::{EnvelopeId, QueryId, SolutionId};
pub use query::Query;
pub use subject::SubjectArea;
