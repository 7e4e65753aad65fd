//! Web search: provider adapters, a fallback chain and source scoring.

mod chain;
mod duckduckgo;
mod perplexity;
mod scorer;
mod tavily;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::CapabilityError;

pub use chain::{ProviderChain, SearchProvider};
pub use duckduckgo::DuckDuckGoSearch;
pub use perplexity::PerplexitySearch;
pub use scorer::{DomainTrustScorer, SourceScorer, TRUSTED_DOMAINS};
pub use tavily::TavilySearch;

/// An unscored result as returned by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    /// Relevance reported by the provider itself, when it reports one.
    pub provider_score: Option<f64>,
}

impl RawHit {
    pub fn new(url: impl Into<String>, title: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            snippet: snippet.into(),
            provider_score: None,
        }
    }

    #[must_use]
    pub fn with_provider_score(mut self, score: f64) -> Self {
        self.provider_score = Some(score);
        self
    }
}

/// A scored web result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    /// Relevance and trust score in [0, 1].
    pub score: f64,
}

/// Web search as seen by the router.
#[async_trait]
pub trait WebSearchClient: Send + Sync {
    /// Returns scored hits, best first.
    async fn search(&self, query: &str) -> Result<Vec<WebHit>, CapabilityError>;
}

/// Biases general-purpose engines toward worked solutions.
pub(crate) fn solution_query(query: &str) -> String {
    format!("mathematics {} step by step solution", query.trim())
}

/// Reads a JSON body, mapping transport and status failures.
pub(crate) async fn read_json(
    response: Result<reqwest::Response, reqwest::Error>,
) -> Result<serde_json::Value, CapabilityError> {
    let response = response.map_err(CapabilityError::Network)?;
    let status = response.status();
    if !status.is_success() {
        return Err(CapabilityError::Http {
            status: status.as_u16(),
        });
    }
    response
        .json()
        .await
        .map_err(|e| CapabilityError::InvalidResponse(format!("JSON body: {e}")))
}
