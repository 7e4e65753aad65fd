//! Query classification capability and an offline keyword classifier.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::error::CapabilityError;

/// Category label for in-scope mathematical queries.
pub const MATHEMATICS: &str = "mathematics";
/// Category label for out-of-scope queries.
pub const NON_MATHEMATICAL: &str = "non-mathematical";
/// Requests for exam answers or other cheating.
pub const ACADEMIC_DISHONESTY: &str = "academic-dishonesty";
pub const HARASSMENT: &str = "harassment";
pub const SELF_HARM: &str = "self-harm";
pub const HARMFUL: &str = "harmful";

/// Categories that are rejected as policy violations regardless of score.
pub const POLICY_CATEGORIES: &[&str] = &[ACADEMIC_DISHONESTY, HARASSMENT, SELF_HARM, HARMFUL];

/// A classifier verdict: a category label and the classifier's score for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: String,
    pub score: f64,
}

impl Classification {
    pub fn new(category: impl Into<String>, score: f64) -> Self {
        Self {
            category: category.into(),
            score: crate::models::clamp_unit(score),
        }
    }
}

/// Text classifier used by the guardrail.
#[async_trait]
pub trait GuardrailClassifier: Send + Sync {
    /// Classifies `text` into a single category with a score in [0, 1].
    async fn classify(&self, text: &str) -> Result<Classification, CapabilityError>;
}

const MATH_WORDS: &[&str] = &[
    "solve", "equation", "equations", "algebra", "calculus", "geometry", "trigonometry",
    "statistics", "probability", "derivative", "derivatives", "integral", "integrals",
    "integrate", "differentiate", "limit", "limits", "function", "graph", "matrix", "matrices",
    "vector", "scalar", "logarithm", "log", "ln", "exponent", "inequality", "polynomial",
    "quadratic", "linear", "mean", "median", "mode", "variance", "binomial", "permutation",
    "permutations", "combination", "combinations", "series", "sequence", "differential", "area",
    "volume", "angle", "radius", "pi", "theorem", "proof", "prove", "identity", "domain", "range",
    "asymptote", "factor", "factorise", "factorize", "intercept", "transformation", "complex",
    "imaginary", "root", "roots", "zero", "zeros", "sin", "cos", "tan", "sqrt", "simplify",
    "evaluate", "calculate", "compute", "fraction", "fractions", "percentage", "percent",
    "prime", "gcd", "lcm", "hypotenuse", "triangle", "circle", "slope", "determinant",
    "eigenvalue", "eigenvalues", "arithmetic", "geometric", "sum", "product", "divisible",
];

const MATH_PHRASES: &[&str] = &["standard deviation", "d/dx", "dy/dx", "∫", "√", "π"];

const DISHONESTY_WORDS: &[&str] = &["hack", "cheat", "cheating"];
const DISHONESTY_PHRASES: &[&str] = &["answer key", "exam paper", "test solutions"];

const SELF_HARM_PHRASES: &[&str] = &[
    "kill myself",
    "hurt myself",
    "self harm",
    "self-harm",
    "suicide",
    "end my life",
];
const HARASSMENT_PHRASES: &[&str] = &["harass", "stalk", "bully", "humiliate"];
const HARMFUL_PHRASES: &[&str] = &["make a bomb", "build a bomb", "build a weapon", "poison someone"];

/// Arithmetic or algebraic notation: `2 + 3`, `x^2`, `x = 4`, `sin(`.
static NOTATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(\d\s*[-+*/^=]\s*\d)|([a-z0-9)]\s*\^\s*[a-z0-9(])|([a-z0-9)]\s*=\s*[-a-z0-9(])|\b(sin|cos|tan|log|ln|sqrt|exp)\s*\(",
    )
    .expect("notation regex is valid")
});

/// Offline classifier built from math vocabulary, notation patterns and
/// blocked phrases.
///
/// Policy categories are checked first, so "answer key for the calculus exam"
/// is academic dishonesty even though it mentions calculus.
#[derive(Debug, Default, Clone)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous classification, shared by the async trait method.
    pub fn classify_text(&self, text: &str) -> Classification {
        let lower = text.to_lowercase();
        let tokens: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let has_phrase = |phrases: &[&str]| phrases.iter().any(|p| lower.contains(p));
        let has_word = |words: &[&str]| words.iter().any(|w| tokens.contains(w));

        if has_phrase(SELF_HARM_PHRASES) {
            return Classification::new(SELF_HARM, 1.0);
        }
        if has_phrase(HARMFUL_PHRASES) {
            return Classification::new(HARMFUL, 1.0);
        }
        if has_phrase(HARASSMENT_PHRASES) {
            return Classification::new(HARASSMENT, 0.9);
        }
        if has_word(DISHONESTY_WORDS) || has_phrase(DISHONESTY_PHRASES) {
            return Classification::new(ACADEMIC_DISHONESTY, 0.9);
        }

        let signals = MATH_WORDS.iter().filter(|w| tokens.contains(w)).count()
            + MATH_PHRASES.iter().filter(|p| lower.contains(*p)).count()
            + NOTATION_RE.find_iter(&lower).count();

        if signals == 0 {
            return Classification::new(NON_MATHEMATICAL, 0.9);
        }

        let score = 0.55 + 0.15 * (signals - 1) as f64;
        Classification::new(MATHEMATICS, score.min(1.0))
    }
}

#[async_trait]
impl GuardrailClassifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, CapabilityError> {
        Ok(self.classify_text(text))
    }
}
