use serde::Serialize;

use super::{QueryId, SubjectArea};

/// A single incoming math question.
///
/// Queries are immutable once created: the raw text is kept for web search
/// and display, while the normalized form feeds classification, subject
/// detection and embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    id: QueryId,
    raw: String,
    normalized: String,
    subject: Option<SubjectArea>,
}

impl Query {
    /// Creates a query from user input, normalizing it and detecting its subject.
    ///
    /// # Examples
    ///
    /// ```
    /// use mathroute::models::{Query, SubjectArea};
    ///
    /// let query = Query::new("  Solve   X² - 4 = 0 ");
    /// assert_eq!(query.normalized(), "solve x^2 - 4 = 0");
    /// assert_eq!(query.subject(), Some(SubjectArea::Quadratics));
    /// ```
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let normalized = normalize(&raw);
        let subject = SubjectArea::detect(&normalized);
        Self {
            id: QueryId::new(),
            raw,
            normalized,
            subject,
        }
    }

    /// Overrides the detected subject with a caller-supplied tag.
    #[must_use]
    pub fn with_subject(mut self, subject: SubjectArea) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn id(&self) -> QueryId {
        self.id
    }

    /// Returns the text exactly as the user typed it.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Returns the lowercased, whitespace-collapsed text.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn subject(&self) -> Option<SubjectArea> {
        self.subject
    }

    /// Returns true if the query has no content after normalization.
    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }
}

/// Lowercases, collapses whitespace and rewrites superscript powers.
fn normalize(raw: &str) -> String {
    let rewritten: String = raw
        .chars()
        .flat_map(|c| match c {
            '²' => vec!['^', '2'],
            '³' => vec!['^', '3'],
            other => other.to_lowercase().collect(),
        })
        .collect();

    rewritten.split_whitespace().collect::<Vec<_>>().join(" ")
}
