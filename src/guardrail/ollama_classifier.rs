//! LLM-backed guardrail classifier.

use std::sync::Arc;

use async_trait::async_trait;

use super::classifier::{Classification, GuardrailClassifier, NON_MATHEMATICAL};
use crate::error::CapabilityError;
use crate::ollama::OllamaClientTrait;
use crate::utils::extract_json;

/// Prompt template for scope classification.
const PROMPT_TEMPLATE: &str = r#"You are the input filter of a mathematics tutoring assistant. Classify the user's message into exactly one category:

- "mathematics": a mathematics question or problem (any level)
- "non-mathematical": anything that is not a mathematics question
- "academic-dishonesty": asks for exam papers, answer keys or help cheating
- "harassment": insults or targets a person
- "self-harm": mentions hurting oneself
- "harmful": asks for dangerous or illegal help

MESSAGE:
{text}

Return ONLY a JSON object:
{"category": "<one of the categories>", "score": <confidence 0.0-1.0>}

JSON OUTPUT:"#;

/// Classifies queries by asking a local Ollama model.
pub struct OllamaClassifier {
    client: Arc<dyn OllamaClientTrait>,
    model: String,
}

impl OllamaClassifier {
    pub fn new(client: Arc<dyn OllamaClientTrait>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl GuardrailClassifier for OllamaClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, CapabilityError> {
        let prompt = PROMPT_TEMPLATE.replace("{text}", text);
        let response = self.client.generate(&self.model, &prompt).await?;
        parse_classification(&response)
    }
}

/// Parses the model reply. A missing score defaults to 0.5; a missing
/// category is an error so the guardrail fallback policy applies.
fn parse_classification(response: &str) -> Result<Classification, CapabilityError> {
    let json_str = extract_json(response).ok_or_else(|| {
        CapabilityError::InvalidResponse("no JSON object in classifier reply".to_string())
    })?;
    let value: serde_json::Value = serde_json::from_str(&json_str)
        .map_err(|e| CapabilityError::InvalidResponse(format!("classifier JSON: {e}")))?;

    let category = value
        .get("category")
        .and_then(|c| c.as_str())
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| CapabilityError::InvalidResponse("classifier gave no category".to_string()))?;
    let score = value.get("score").and_then(|s| s.as_f64()).unwrap_or(0.5);

    // Anything outside the known vocabulary is treated as out of scope.
    let category = match category.as_str() {
        "mathematics" | "math" => super::classifier::MATHEMATICS.to_string(),
        known if super::classifier::POLICY_CATEGORIES.contains(&known) => known.to_string(),
        _ => NON_MATHEMATICAL.to_string(),
    };

    Ok(Classification::new(category, score))
}
