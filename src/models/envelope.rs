use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{EnvelopeId, Query, QueryId, SourceKind, SubjectArea, candidate::clamp_unit};

/// Terminal state of a routed query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeState {
    /// A candidate was chosen and the answer is populated.
    Answered,
    /// The guardrail refused the query; no upstream source was consulted.
    Rejected,
    /// Every stage failed or produced nothing usable.
    NoAnswerAvailable,
}

/// Whether a provenance entry supplied the answer or supported it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceRole {
    Primary,
    Secondary,
}

impl fmt::Display for ProvenanceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// One source that contributed to an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    pub kind: SourceKind,
    pub source_id: String,
    pub role: ProvenanceRole,
    /// Contribution weight in [0, 1]; entries are ordered by it.
    pub weight: f64,
}

impl ProvenanceEntry {
    pub fn new(
        kind: SourceKind,
        source_id: impl Into<String>,
        role: ProvenanceRole,
        weight: f64,
    ) -> Self {
        Self {
            kind,
            source_id: source_id.into(),
            role,
            weight: clamp_unit(weight),
        }
    }
}

/// The final, immutable result of routing one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    id: EnvelopeId,
    query_id: QueryId,
    state: EnvelopeState,
    answer: Option<String>,
    steps: Vec<String>,
    confidence: f64,
    provenance: Vec<ProvenanceEntry>,
    rejection_reason: Option<String>,
    unvalidated: bool,
    subject: Option<SubjectArea>,
    unavailable_sources: Vec<SourceKind>,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

impl ResponseEnvelope {
    fn base(query: &Query, state: EnvelopeState) -> Self {
        Self {
            id: EnvelopeId::new(),
            query_id: query.id(),
            state,
            answer: None,
            steps: Vec::new(),
            confidence: 0.0,
            provenance: Vec::new(),
            rejection_reason: None,
            unvalidated: false,
            subject: query.subject(),
            unavailable_sources: Vec::new(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Creates an answered envelope. Confidence is clamped to [0, 1].
    pub fn answered(
        query: &Query,
        answer: String,
        steps: Vec<String>,
        confidence: f64,
        provenance: Vec<ProvenanceEntry>,
    ) -> Self {
        Self {
            answer: Some(answer),
            steps,
            confidence: clamp_unit(confidence),
            provenance,
            ..Self::base(query, EnvelopeState::Answered)
        }
    }

    /// Creates a guardrail rejection carrying the user-visible reason.
    pub fn rejected(query: &Query, reason: impl Into<String>) -> Self {
        Self {
            rejection_reason: Some(reason.into()),
            ..Self::base(query, EnvelopeState::Rejected)
        }
    }

    /// Creates the "unable to help" envelope used when every stage failed.
    pub fn no_answer(query: &Query) -> Self {
        Self::base(query, EnvelopeState::NoAnswerAvailable)
    }

    /// Marks the envelope as produced without a working guardrail.
    #[must_use]
    pub fn unvalidated(mut self, unvalidated: bool) -> Self {
        self.unvalidated = unvalidated;
        self
    }

    /// Records which sources failed or timed out while routing.
    #[must_use]
    pub fn with_unavailable_sources(mut self, sources: Vec<SourceKind>) -> Self {
        self.unavailable_sources = sources;
        self
    }

    pub fn id(&self) -> EnvelopeId {
        self.id
    }

    pub fn query_id(&self) -> QueryId {
        self.query_id
    }

    pub fn state(&self) -> EnvelopeState {
        self.state
    }

    /// Returns false only for guardrail rejections.
    pub fn is_accepted(&self) -> bool {
        self.state != EnvelopeState::Rejected
    }

    pub fn answer(&self) -> Option<&str> {
        self.answer.as_deref()
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    /// Aggregate confidence in [0, 1].
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Provenance entries, primary first.
    pub fn provenance(&self) -> &[ProvenanceEntry] {
        &self.provenance
    }

    /// The entry of the chosen candidate, if any.
    pub fn primary_source(&self) -> Option<&ProvenanceEntry> {
        self.provenance
            .iter()
            .find(|p| p.role == ProvenanceRole::Primary)
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn is_unvalidated(&self) -> bool {
        self.unvalidated
    }

    pub fn subject(&self) -> Option<SubjectArea> {
        self.subject
    }

    pub fn unavailable_sources(&self) -> &[SourceKind] {
        &self.unavailable_sources
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }
}
