use async_trait::async_trait;
use serde_json::{Value, json};

use super::{RawHit, SearchProvider, read_json};
use crate::error::CapabilityError;
use crate::utils::truncate_chars;

const DEFAULT_BASE_URL: &str = "https://api.perplexity.ai";
const SNIPPET_CHARS: usize = 500;
const DOMAIN_FILTER: &[&str] = &[
    "wolframalpha.com",
    "khanacademy.org",
    "mathworld.wolfram.com",
    "brilliant.org",
];

/// Perplexity chat completions with online search, restricted to math sites.
///
/// The answer text becomes the snippet of each cited source; without
/// citations the whole answer is a single hit attributed to Perplexity.
pub struct PerplexitySearch {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_results: usize,
}

impl PerplexitySearch {
    pub fn new(
        client: reqwest::Client,
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_results: usize,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_results,
        }
    }

    fn request_body(&self, query: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a helpful assistant that provides detailed mathematical solutions with step-by-step explanations. Always cite sources when providing information from the web."
                },
                {
                    "role": "user",
                    "content": format!("Find comprehensive information about: {query}. Provide step-by-step mathematical solution if applicable. Include relevant formulas and examples.")
                }
            ],
            "max_tokens": 1000,
            "temperature": 0.2,
            "search_domain_filter": DOMAIN_FILTER,
            "return_images": false
        })
    }
}

#[async_trait]
impl SearchProvider for PerplexitySearch {
    fn name(&self) -> &'static str {
        "perplexity"
    }

    async fn search(&self, query: &str) -> Result<Vec<RawHit>, CapabilityError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(query))
            .send()
            .await;
        let body = read_json(response).await?;
        parse_response(&body, self.max_results)
    }
}

/// Extracts hits from a chat completion. Citations may be plain URL strings
/// or objects with `url` and `title`.
fn parse_response(body: &Value, max_results: usize) -> Result<Vec<RawHit>, CapabilityError> {
    let content = body
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| CapabilityError::InvalidResponse("no choices in response".to_string()))?;

    let citations = body
        .get("search_results")
        .or_else(|| body.get("citations"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if citations.is_empty() {
        return Ok(vec![RawHit::new(
            "https://perplexity.ai",
            "Perplexity answer",
            content,
        )]);
    }

    let snippet = truncate_chars(content, SNIPPET_CHARS);
    Ok(citations
        .iter()
        .take(max_results)
        .enumerate()
        .filter_map(|(i, citation)| {
            let (url, title) = match citation {
                Value::String(url) => (url.clone(), None),
                Value::Object(obj) => (
                    obj.get("url").and_then(Value::as_str)?.to_string(),
                    obj.get("title").and_then(Value::as_str).map(str::to_string),
                ),
                _ => return None,
            };
            let title = title.unwrap_or_else(|| format!("Mathematical resource {}", i + 1));
            Some(RawHit::new(url, title, snippet))
        })
        .collect())
}
