use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Where a candidate answer came from.
///
/// The declaration order is also the attribution order used when two
/// provenance entries carry the same weight: retrieval before generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    KnowledgeBase,
    Web,
    Generated,
}

impl SourceKind {
    /// Position of this source in the routing pipeline (0 = first).
    pub fn stage_rank(self) -> u8 {
        match self {
            Self::KnowledgeBase => 0,
            Self::Web => 1,
            Self::Generated => 2,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KnowledgeBase => write!(f, "knowledge_base"),
            Self::Web => write!(f, "web"),
            Self::Generated => write!(f, "generated"),
        }
    }
}

/// A possible answer proposed by one source.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    kind: SourceKind,
    content: String,
    confidence: f64,
    source_id: String,
    latency: Duration,
    steps: Vec<String>,
}

impl Candidate {
    /// Creates a candidate. The confidence is clamped to [0, 1]; NaN becomes 0.
    pub fn new(
        kind: SourceKind,
        content: impl Into<String>,
        confidence: f64,
        source_id: impl Into<String>,
        latency: Duration,
    ) -> Self {
        Self {
            kind,
            content: content.into(),
            confidence: clamp_unit(confidence),
            source_id: source_id.into(),
            latency,
            steps: Vec::new(),
        }
    }

    /// Attaches steps that the source already structured (generator output).
    #[must_use]
    pub fn with_steps(mut self, steps: Vec<String>) -> Self {
        self.steps = steps;
        self
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns the per-source confidence in [0, 1].
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Returns the provenance identifier: `kb:<id>`, a URL, or `model:<name>`.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Returns pre-structured steps; empty when the source gave free text.
    pub fn steps(&self) -> &[String] {
        &self.steps
    }
}

/// Clamps a score into [0, 1], mapping NaN to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Picks the candidate with the strictly highest confidence.
///
/// On exact ties the earliest candidate in slice order wins, so selection is
/// deterministic for a given client response.
pub fn select_best(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates.iter().fold(None, |best, candidate| match best {
        Some(current) if candidate.confidence() <= current.confidence() => Some(current),
        _ => Some(candidate),
    })
}
