//! Input and output guardrail policy.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::classifier::{GuardrailClassifier, MATHEMATICS, POLICY_CATEGORIES};
use crate::config::{GuardrailFallbackPolicy, RoutingPolicy};
use crate::error::CapabilityError;
use crate::models::Query;

pub const REASON_EMPTY: &str = "empty-query";
pub const REASON_TOO_LONG: &str = "query-too-long";
pub const REASON_NON_MATHEMATICAL: &str = "non-mathematical";
pub const REASON_UNAVAILABLE: &str = "guardrail-unavailable";
pub const REASON_TOO_BRIEF: &str = "response-too-brief";

/// Outcome of a guardrail check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    accepted: bool,
    reason: Option<String>,
    unvalidated: bool,
}

impl ValidationResult {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            reason: None,
            unvalidated: false,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
            unvalidated: false,
        }
    }

    /// Accepted without a classifier verdict (fail-open fallback).
    pub fn accept_unvalidated() -> Self {
        Self {
            accepted: true,
            reason: None,
            unvalidated: true,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn is_unvalidated(&self) -> bool {
        self.unvalidated
    }
}

/// Decides whether a query is in scope before any costly processing, and
/// whether an answer is substantial enough to return.
pub struct GuardrailValidator {
    classifier: Arc<dyn GuardrailClassifier>,
    fallback: GuardrailFallbackPolicy,
    min_math_score: f64,
    max_query_length: usize,
    min_answer_length: usize,
    timeout: Duration,
}

impl GuardrailValidator {
    /// Creates a validator using the thresholds and fallback from `policy`.
    pub fn new(classifier: Arc<dyn GuardrailClassifier>, policy: &RoutingPolicy) -> Self {
        Self {
            classifier,
            fallback: policy.guardrail_fallback_policy,
            min_math_score: policy.min_math_score,
            max_query_length: policy.max_query_length,
            min_answer_length: policy.min_answer_length,
            timeout: policy.timeout(),
        }
    }

    pub fn fallback_policy(&self) -> GuardrailFallbackPolicy {
        self.fallback
    }

    /// Validates an incoming query.
    ///
    /// Length checks run before the classifier; a classifier failure or
    /// timeout is resolved by the configured fallback policy.
    pub async fn validate(&self, query: &Query) -> ValidationResult {
        if query.is_empty() {
            return ValidationResult::reject(REASON_EMPTY);
        }
        if query.raw().chars().count() > self.max_query_length {
            return ValidationResult::reject(REASON_TOO_LONG);
        }

        let verdict = match tokio::time::timeout(
            self.timeout,
            self.classifier.classify(query.normalized()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(CapabilityError::Timeout(self.timeout)),
        };

        match verdict {
            Ok(classification) => {
                debug!(
                    category = %classification.category,
                    score = classification.score,
                    "guardrail classification"
                );
                let category = classification.category.as_str();
                if POLICY_CATEGORIES.contains(&category) {
                    ValidationResult::reject(format!("policy-violation:{category}"))
                } else if category == MATHEMATICS && classification.score >= self.min_math_score {
                    ValidationResult::accept()
                } else {
                    ValidationResult::reject(REASON_NON_MATHEMATICAL)
                }
            }
            Err(e) => match self.fallback {
                GuardrailFallbackPolicy::FailClosed => {
                    warn!(error = %e, "guardrail classifier unavailable, rejecting");
                    ValidationResult::reject(REASON_UNAVAILABLE)
                }
                GuardrailFallbackPolicy::FailOpen => {
                    warn!(error = %e, "guardrail classifier unavailable, accepting unvalidated");
                    ValidationResult::accept_unvalidated()
                }
            },
        }
    }

    /// Checks that an answer is substantial enough to show.
    pub fn validate_output(&self, answer: &str) -> ValidationResult {
        if answer.trim().chars().count() < self.min_answer_length {
            ValidationResult::reject(REASON_TOO_BRIEF)
        } else {
            ValidationResult::accept()
        }
    }
}
