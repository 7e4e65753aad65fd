use serde::{Deserialize, Serialize};
use std::fmt;

/// Area of mathematics a query belongs to.
///
/// Detected from the normalized query text with simple keyword rules. Rules are
/// checked in declaration order, so a query mentioning both an integral and a
/// sine is tagged as integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectArea {
    DifferentialEquations,
    Quadratics,
    Integration,
    Differentiation,
    Limits,
    LinearAlgebra,
    ProbabilityStatistics,
    Geometry,
    Trigonometry,
}

/// Keyword rules: (subject, whole-word keywords, raw substrings).
const RULES: &[(SubjectArea, &[&str], &[&str])] = &[
    (
        SubjectArea::DifferentialEquations,
        &["differential", "slope", "curve", "ode"],
        &["dy/dx"],
    ),
    (SubjectArea::Quadratics, &["quadratic"], &["x^2"]),
    (
        SubjectArea::Integration,
        &["integral", "integrals", "integrate", "integration", "antiderivative"],
        &["∫"],
    ),
    (
        SubjectArea::Differentiation,
        &["derivative", "derivatives", "differentiate", "differentiation"],
        &["d/dx"],
    ),
    (SubjectArea::Limits, &["limit", "limits", "lim"], &[]),
    (
        SubjectArea::LinearAlgebra,
        &["matrix", "matrices", "determinant", "eigenvalue", "eigenvector"],
        &[],
    ),
    (
        SubjectArea::ProbabilityStatistics,
        &[
            "probability",
            "statistics",
            "mean",
            "median",
            "variance",
            "binomial",
        ],
        &["standard deviation"],
    ),
    (
        SubjectArea::Geometry,
        &["geometry", "triangle", "circle", "area", "volume", "radius"],
        &[],
    ),
    (
        SubjectArea::Trigonometry,
        &["trigonometry", "sin", "cos", "tan", "sine", "cosine", "tangent"],
        &[],
    ),
];

impl SubjectArea {
    /// Detects the subject of an already-normalized query.
    ///
    /// Returns `None` for general mathematics or when nothing matches.
    pub fn detect(normalized: &str) -> Option<Self> {
        let tokens: Vec<&str> = normalized
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        RULES.iter().find_map(|(subject, words, substrings)| {
            let word_hit = words.iter().any(|w| tokens.contains(w));
            let substring_hit = substrings.iter().any(|s| normalized.contains(s));
            (word_hit || substring_hit).then_some(*subject)
        })
    }
}

impl fmt::Display for SubjectArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::DifferentialEquations => "differential equations",
            Self::Quadratics => "quadratic equations",
            Self::Integration => "integration",
            Self::Differentiation => "differentiation",
            Self::Limits => "limits",
            Self::LinearAlgebra => "linear algebra",
            Self::ProbabilityStatistics => "probability/statistics",
            Self::Geometry => "geometry",
            Self::Trigonometry => "trigonometry",
        };
        write!(f, "{label}")
    }
}
