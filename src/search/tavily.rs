use async_trait::async_trait;
use serde_json::{Value, json};

use super::{RawHit, SearchProvider, read_json, solution_query};
use crate::error::CapabilityError;

const DEFAULT_BASE_URL: &str = "https://api.tavily.com";

/// Tavily search API. Its per-result `score` is kept as the provider score.
pub struct TavilySearch {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    max_results: usize,
}

impl TavilySearch {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, max_results: usize) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_results,
        }
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    fn name(&self) -> &'static str {
        "tavily"
    }

    async fn search(&self, query: &str) -> Result<Vec<RawHit>, CapabilityError> {
        let body = json!({
            "query": solution_query(query),
            "search_depth": "advanced",
            "max_results": self.max_results,
        });
        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await;
        let body = read_json(response).await?;
        parse_response(&body)
    }
}

fn parse_response(body: &Value) -> Result<Vec<RawHit>, CapabilityError> {
    let results = body
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| CapabilityError::InvalidResponse("missing results array".to_string()))?;

    Ok(results
        .iter()
        .filter_map(|r| {
            let url = r.get("url").and_then(Value::as_str)?;
            let title = r.get("title").and_then(Value::as_str).unwrap_or("Untitled");
            let content = r.get("content").and_then(Value::as_str).unwrap_or_default();
            let hit = RawHit::new(url, title, content);
            Some(match r.get("score").and_then(Value::as_f64) {
                Some(score) => hit.with_provider_score(score),
                None => hit,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_results_with_scores() {
        let body = json!({
            "results": [
                {"url": "https://a.edu/x", "title": "Limits", "content": "lim x->0", "score": 0.82},
                {"title": "no url is skipped"},
                {"url": "https://b.org", "content": "text"}
            ]
        });
        let hits = parse_response(&body).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].provider_score, Some(0.82));
        assert_eq!(hits[1].title, "Untitled");
        assert_eq!(hits[1].provider_score, None);
    }

    #[test]
    fn missing_results_is_invalid() {
        assert!(parse_response(&json!({"error": "bad key"})).is_err());
    }
}
