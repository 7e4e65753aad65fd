use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{RawHit, SourceScorer, WebHit, WebSearchClient};
use crate::error::CapabilityError;

/// One web search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &'static str;

    async fn search(&self, query: &str) -> Result<Vec<RawHit>, CapabilityError>;
}

/// Tries providers in order; the first one that returns results wins.
///
/// A provider error falls through to the next provider. The chain only fails
/// when every provider failed; if at least one answered with nothing, the
/// result is an empty list.
pub struct ProviderChain {
    providers: Vec<Arc<dyn SearchProvider>>,
    scorer: Arc<dyn SourceScorer>,
}

impl ProviderChain {
    pub fn new(scorer: Arc<dyn SourceScorer>) -> Self {
        Self {
            providers: Vec::new(),
            scorer,
        }
    }

    /// Appends a provider; earlier providers are preferred.
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    fn score(&self, query: &str, hits: Vec<RawHit>) -> Vec<WebHit> {
        let mut scored: Vec<WebHit> = hits
            .into_iter()
            .map(|hit| {
                let score = self.scorer.score(query, &hit);
                WebHit {
                    url: hit.url,
                    title: hit.title,
                    snippet: hit.snippet,
                    score,
                }
            })
            .collect();
        // Stable sort keeps provider order among equal scores
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored
    }
}

#[async_trait]
impl WebSearchClient for ProviderChain {
    async fn search(&self, query: &str) -> Result<Vec<WebHit>, CapabilityError> {
        let mut last_error = None;
        let mut answered = false;

        for provider in &self.providers {
            match provider.search(query).await {
                Ok(hits) if !hits.is_empty() => {
                    debug!(provider = provider.name(), hits = hits.len(), "web search succeeded");
                    return Ok(self.score(query, hits));
                }
                Ok(_) => {
                    debug!(provider = provider.name(), "web search returned nothing");
                    answered = true;
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "web search provider failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !answered => Err(e),
            _ if self.providers.is_empty() => Err(CapabilityError::NotConfigured(
                "no web search provider configured".to_string(),
            )),
            _ => Ok(Vec::new()),
        }
    }
}
