//! Step-by-step solution synthesis with a local LLM.
//!
//! `OllamaSolutionGenerator` asks the model for a JSON object of steps, a
//! final answer and a self-assessed confidence. Models that ignore the
//! format still produce a usable solution: the raw reply is decomposed into
//! steps and reported without a confidence.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::CapabilityError;
use crate::ollama::{DEFAULT_MODEL, OllamaClientTrait};
use crate::router::decompose_steps;
use crate::utils::extract_json;

/// Prompt template for solving a problem.
///
/// `{context_block}` is either empty or a block of reference material found
/// on the web.
const SOLVE_PROMPT_TEMPLATE: &str = r#"You are an expert mathematics professor. Solve the problem below with a complete step-by-step solution.

RULES:
1. Identify the problem type and the approach first
2. Show every mathematical step and intermediate calculation
3. State the final answer clearly
4. Verify the answer when applicable
5. CONFIDENCE: a score (0.0-1.0) for how sure you are the final answer is correct
{context_block}
PROBLEM:
{query}

Return ONLY a JSON object with three fields:
- "steps": the solution steps, in order (array of strings)
- "final_answer": the final answer (string)
- "confidence": your confidence (float 0.0-1.0)

JSON OUTPUT:"#;

/// Prompt template for rewriting a solution after negative feedback.
const REFINE_PROMPT_TEMPLATE: &str = r#"A student found this solution hard to follow.

ORIGINAL SOLUTION:
{solution}

STUDENT FEEDBACK:
{feedback}

Rewrite the solution so it addresses the feedback. Use simpler language, explain each step and keep every calculation correct. Return only the improved solution as plain text with numbered steps."#;

/// A synthesized solution.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedSolution {
    /// Full answer text, ready to display.
    pub answer: String,
    pub steps: Vec<String>,
    /// The model's own confidence, when it reported one.
    pub self_confidence: Option<f64>,
}

/// Reads a self-reported confidence. Values in (1, 100] are percentages;
/// anything else outside [0, 1] is treated as not reported.
pub fn reported_confidence(raw: f64) -> Option<f64> {
    if (0.0..=1.0).contains(&raw) {
        Some(raw)
    } else if raw > 1.0 && raw <= 100.0 {
        Some(raw / 100.0)
    } else {
        None
    }
}

/// Produces a worked solution, optionally grounded in reference material.
#[async_trait]
pub trait SolutionGenerator: Send + Sync {
    /// Model identifier used for provenance (`model:<name>`).
    fn model_name(&self) -> &str;

    async fn generate(
        &self,
        query: &str,
        context: Option<&str>,
    ) -> Result<GeneratedSolution, CapabilityError>;
}

/// Builder for [`OllamaSolutionGenerator`].
#[derive(Default)]
pub struct OllamaSolutionGeneratorBuilder {
    client: Option<Arc<dyn OllamaClientTrait>>,
    model: Option<String>,
}

impl OllamaSolutionGeneratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(mut self, client: Arc<dyn OllamaClientTrait>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Builds the generator. The model defaults to [`DEFAULT_MODEL`].
    ///
    /// # Errors
    ///
    /// Returns `NotConfigured` when no client was provided.
    pub fn build(self) -> Result<OllamaSolutionGenerator, CapabilityError> {
        let client = self.client.ok_or_else(|| {
            CapabilityError::NotConfigured("solution generator needs an Ollama client".to_string())
        })?;
        Ok(OllamaSolutionGenerator {
            client,
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }
}

/// Solution generator backed by an Ollama model.
pub struct OllamaSolutionGenerator {
    client: Arc<dyn OllamaClientTrait>,
    model: String,
}

impl OllamaSolutionGenerator {
    /// Rewrites `solution` in response to a learner's feedback.
    pub async fn refine(&self, solution: &str, feedback: &str) -> Result<String, CapabilityError> {
        let feedback = match feedback.trim() {
            "" => "The explanation was unclear.",
            text => text,
        };
        let prompt = REFINE_PROMPT_TEMPLATE
            .replace("{solution}", solution.trim())
            .replace("{feedback}", feedback);
        let response = self.client.generate(&self.model, &prompt).await?;
        let refined = response.trim();
        if refined.is_empty() {
            return Err(CapabilityError::InvalidResponse(
                "model returned an empty refinement".to_string(),
            ));
        }
        Ok(refined.to_string())
    }
}

#[async_trait]
impl SolutionGenerator for OllamaSolutionGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        query: &str,
        context: Option<&str>,
    ) -> Result<GeneratedSolution, CapabilityError> {
        let prompt = build_solve_prompt(query, context);
        let response = self.client.generate(&self.model, &prompt).await?;
        let solution = parse_solution(&response)?;
        debug!(
            steps = solution.steps.len(),
            confidence = ?solution.self_confidence,
            "generated solution"
        );
        Ok(solution)
    }
}

fn build_solve_prompt(query: &str, context: Option<&str>) -> String {
    let context_block = match context.map(str::trim).filter(|c| !c.is_empty()) {
        Some(context) => format!(
            "6. Use the reference material where it helps, but check it\n\nREFERENCE MATERIAL:\n{context}\n"
        ),
        None => String::new(),
    };
    SOLVE_PROMPT_TEMPLATE
        .replace("{context_block}", &context_block)
        .replace("{query}", query.trim())
}

/// Parses a model reply, falling back to plain-text step decomposition.
fn parse_solution(response: &str) -> Result<GeneratedSolution, CapabilityError> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(CapabilityError::InvalidResponse(
            "model returned an empty solution".to_string(),
        ));
    }

    if let Some(solution) = extract_json(trimmed).and_then(|json| parse_json_solution(&json)) {
        return Ok(solution);
    }

    Ok(GeneratedSolution {
        answer: trimmed.to_string(),
        steps: decompose_steps(trimmed),
        self_confidence: None,
    })
}

fn parse_json_solution(json_str: &str) -> Option<GeneratedSolution> {
    let value: serde_json::Value = serde_json::from_str(json_str).ok()?;

    let steps: Vec<String> = value
        .get("steps")?
        .as_array()?
        .iter()
        .filter_map(|step| match step {
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            // Some models emit {"step": 1, "description": "..."}
            serde_json::Value::Object(obj) => obj
                .get("description")
                .or_else(|| obj.get("text"))
                .and_then(|d| d.as_str())
                .map(|d| d.trim().to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect();

    let final_answer = value
        .get("final_answer")
        .and_then(|a| match a {
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|a| !a.is_empty());

    if steps.is_empty() && final_answer.is_none() {
        return None;
    }

    let mut answer = steps
        .iter()
        .enumerate()
        .map(|(i, step)| format!("Step {}: {}", i + 1, step))
        .collect::<Vec<_>>()
        .join("\n");
    if let Some(final_answer) = &final_answer {
        if !answer.is_empty() {
            answer.push_str("\n\n");
        }
        answer.push_str(&format!("Final answer: {final_answer}"));
    }

    let steps = match final_answer {
        Some(final_answer) if steps.is_empty() => vec![final_answer],
        Some(final_answer) => {
            let mut steps = steps;
            steps.push(format!("Final answer: {final_answer}"));
            steps
        }
        None => steps,
    };

    Some(GeneratedSolution {
        answer,
        steps,
        self_confidence: value
            .get("confidence")
            .and_then(|c| c.as_f64())
            .and_then(reported_confidence),
    })
}
