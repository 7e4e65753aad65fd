use async_trait::async_trait;
use serde_json::Value;

use super::{RawHit, SearchProvider, read_json};
use crate::error::CapabilityError;

const DEFAULT_BASE_URL: &str = "https://api.duckduckgo.com";

/// Keyless DuckDuckGo instant-answer API, used as the last resort.
///
/// Returns the abstract (when present) followed by related topics. Topic
/// groups are flattened.
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    base_url: String,
    max_results: usize,
}

impl DuckDuckGoSearch {
    pub fn new(client: reqwest::Client, max_results: usize) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            max_results,
        }
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    fn name(&self) -> &'static str {
        "duckduckgo"
    }

    async fn search(&self, query: &str) -> Result<Vec<RawHit>, CapabilityError> {
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .query(&[
                ("q", query.trim()),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await;
        let body = read_json(response).await?;
        Ok(parse_response(&body, self.max_results))
    }
}

fn parse_response(body: &Value, max_results: usize) -> Vec<RawHit> {
    let mut hits = Vec::new();

    let text = |key: &str| body.get(key).and_then(Value::as_str).unwrap_or_default();
    if !text("AbstractText").is_empty() && !text("AbstractURL").is_empty() {
        let title = match text("Heading") {
            "" => "DuckDuckGo abstract",
            heading => heading,
        };
        hits.push(RawHit::new(text("AbstractURL"), title, text("AbstractText")));
    }

    if let Some(topics) = body.get("RelatedTopics").and_then(Value::as_array) {
        collect_topics(topics, &mut hits);
    }

    hits.truncate(max_results);
    hits
}

fn collect_topics(topics: &[Value], hits: &mut Vec<RawHit>) {
    for topic in topics {
        if let Some(nested) = topic.get("Topics").and_then(Value::as_array) {
            collect_topics(nested, hits);
            continue;
        }
        let url = topic.get("FirstURL").and_then(Value::as_str).unwrap_or_default();
        let text = topic.get("Text").and_then(Value::as_str).unwrap_or_default();
        if url.is_empty() || text.is_empty() {
            continue;
        }
        // Topic text starts with the topic name, separated by " - "
        let title = text.split(" - ").next().unwrap_or(text);
        hits.push(RawHit::new(url, title, text));
    }
}
