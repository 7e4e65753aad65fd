//! Guardrails: scope and policy checks applied before routing, and a
//! minimum-substance check applied to answers.

mod classifier;
mod ollama_classifier;
mod validator;

pub use classifier::{
    ACADEMIC_DISHONESTY, Classification, GuardrailClassifier, HARASSMENT, HARMFUL,
    KeywordClassifier, MATHEMATICS, NON_MATHEMATICAL, POLICY_CATEGORIES, SELF_HARM,
};
pub use ollama_classifier::OllamaClassifier;
pub use validator::{
    GuardrailValidator, REASON_EMPTY, REASON_NON_MATHEMATICAL, REASON_TOO_BRIEF, REASON_TOO_LONG,
    REASON_UNAVAILABLE, ValidationResult,
};
