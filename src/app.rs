//! Wires configured components into a runnable assistant.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{AppConfig, ClassifierKind, EmbeddingProvider};
use crate::db::Database;
use crate::feedback::{FeedbackRecord, FeedbackRecorder, SqliteFeedbackStore};
use crate::generator::{OllamaSolutionGenerator, OllamaSolutionGeneratorBuilder};
use crate::guardrail::{GuardrailClassifier, KeywordClassifier, OllamaClassifier};
use crate::knowledge::{Embedder, HashingEmbedder, OllamaEmbedder, SolutionStore};
use crate::models::{EnvelopeId, Query, ResponseEnvelope};
use crate::ollama::{OllamaClient, OllamaClientBuilder, OllamaClientTrait};
use crate::router::RoutingOrchestrator;
use crate::search::{
    DomainTrustScorer, DuckDuckGoSearch, PerplexitySearch, ProviderChain, TavilySearch,
};
use crate::utils::{ensure_database_directory, get_database_path};

/// Feedback referred to an envelope that was never logged.
#[derive(Debug, Error)]
#[error("no logged response with id {0}")]
pub struct UnknownResponse(pub EnvelopeId);

/// What happened to a piece of feedback.
#[derive(Debug)]
pub struct FeedbackOutcome {
    pub record: FeedbackRecord,
    /// A rewritten answer, produced for low ratings when the model is reachable.
    pub refined: Option<String>,
}

/// The assembled assistant: storage, providers and the orchestrator.
pub struct App {
    config: AppConfig,
    database_label: String,
    db: Arc<Database>,
    ollama: Arc<OllamaClient>,
    solutions: Arc<SolutionStore>,
    search: Arc<ProviderChain>,
    generator: Arc<OllamaSolutionGenerator>,
    feedback: Arc<SqliteFeedbackStore>,
    orchestrator: RoutingOrchestrator,
}

impl App {
    /// Opens the configured database (creating its directory) and builds
    /// every component.
    pub fn open(config: AppConfig) -> Result<Self> {
        let path: PathBuf = match &config.database.path {
            Some(path) => path.clone(),
            None => get_database_path()?,
        };
        ensure_database_directory(&path)?;
        let db = Database::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Self::with_database(config, Arc::new(db), path.display().to_string())
    }

    /// Builds every component on top of an already open database.
    pub fn with_database(
        config: AppConfig,
        db: Arc<Database>,
        database_label: impl Into<String>,
    ) -> Result<Self> {
        config.validate()?;
        let policy = config.routing.clone();

        let mut ollama = OllamaClientBuilder::new().request_timeout(policy.timeout());
        if let Some(url) = &config.ollama.base_url {
            ollama = ollama.base_url(url.clone());
        }
        if let Some(model) = &config.ollama.model {
            ollama = ollama.model(model.clone());
        }
        let ollama = Arc::new(ollama.build().context("Failed to create Ollama client")?);
        let ollama_dyn: Arc<dyn OllamaClientTrait> = ollama.clone();

        let classifier: Arc<dyn GuardrailClassifier> = match config.guardrail.classifier {
            ClassifierKind::Keyword => Arc::new(KeywordClassifier::new()),
            ClassifierKind::Ollama => Arc::new(OllamaClassifier::new(
                ollama_dyn.clone(),
                ollama.model(),
            )),
        };

        let embedder: Arc<dyn Embedder> = match config.embedding.provider {
            EmbeddingProvider::Hashing => {
                Arc::new(HashingEmbedder::new(config.embedding.dimensions))
            }
            EmbeddingProvider::Ollama => Arc::new(OllamaEmbedder::new(
                ollama_dyn.clone(),
                config.ollama.embedding_model.clone(),
            )),
        };

        let http = reqwest::Client::builder()
            .timeout(policy.timeout())
            .build()
            .context("Failed to create HTTP client")?;
        let search = Arc::new(build_provider_chain(&config, &http));

        let generator = Arc::new(
            OllamaSolutionGeneratorBuilder::new()
                .client(ollama_dyn)
                .model(ollama.model())
                .build()?,
        );

        let solutions = Arc::new(SolutionStore::new(Arc::clone(&db), Arc::clone(&embedder)));
        let feedback = Arc::new(SqliteFeedbackStore::new(Arc::clone(&db)));

        let orchestrator = RoutingOrchestrator::builder()
            .policy(policy)
            .classifier(classifier)
            .embedder(embedder)
            .knowledge_base(solutions.clone())
            .web_search(search.clone())
            .generator(generator.clone())
            .build()?;

        debug!(
            providers = ?search.provider_names(),
            model = ollama.model(),
            embedding_model = solutions.embedding_model(),
            "assistant assembled"
        );

        Ok(Self {
            config,
            database_label: database_label.into(),
            db,
            ollama,
            solutions,
            search,
            generator,
            feedback,
            orchestrator,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Where the database lives, for display.
    pub fn database_label(&self) -> &str {
        &self.database_label
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn ollama(&self) -> &OllamaClient {
        &self.ollama
    }

    pub fn solutions(&self) -> &SolutionStore {
        &self.solutions
    }

    pub fn feedback_store(&self) -> &SqliteFeedbackStore {
        &self.feedback
    }

    pub fn orchestrator(&self) -> &RoutingOrchestrator {
        &self.orchestrator
    }

    /// Names of the configured web search providers, in query order.
    pub fn search_providers(&self) -> Vec<&'static str> {
        self.search.provider_names()
    }

    /// Routes `text` and logs the envelope for later feedback.
    ///
    /// Logging failures are reported but never cost the caller the answer.
    pub async fn ask(&self, text: &str) -> ResponseEnvelope {
        let query = Query::new(text);
        let envelope = self.orchestrator.route(&query).await;
        if let Err(e) = self.feedback.log_envelope(query.raw(), &envelope).await {
            warn!(envelope_id = %envelope.id(), error = %e, "failed to log response");
        }
        envelope
    }

    /// Records a rating for a logged envelope and, for low ratings, asks the
    /// model for a clearer version of the answer.
    pub async fn submit_feedback(
        &self,
        envelope_id: EnvelopeId,
        rating: u8,
        comment: Option<String>,
    ) -> Result<FeedbackOutcome> {
        let logged = self
            .feedback
            .get_response(envelope_id)?
            .ok_or(UnknownResponse(envelope_id))?;
        let record = FeedbackRecord::for_envelope(&logged.envelope, rating, comment)?;

        FeedbackRecorder::new(self.feedback.clone())
            .submit(record.clone())
            .await
            .context("Feedback task failed")?;

        let refined = match logged.envelope.answer() {
            Some(answer) if record.needs_refinement() => {
                let note = record.comment().unwrap_or_default();
                match self.generator.refine(answer, note).await {
                    Ok(text) => Some(text),
                    Err(e) => {
                        warn!(envelope_id = %envelope_id, error = %e, "refinement unavailable");
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(FeedbackOutcome { record, refined })
    }
}

/// Providers in preference order: Perplexity, Tavily, then DuckDuckGo.
/// Blank API keys count as unset.
fn build_provider_chain(config: &AppConfig, http: &reqwest::Client) -> ProviderChain {
    let search = &config.search;
    let configured = |key: &Option<String>| key.clone().filter(|k| !k.trim().is_empty());

    let mut chain = ProviderChain::new(Arc::new(DomainTrustScorer::new()));
    if let Some(key) = configured(&search.perplexity_api_key) {
        chain = chain.provider(Arc::new(PerplexitySearch::new(
            http.clone(),
            key,
            search.perplexity_model.clone(),
            search.max_results,
        )));
    }
    if let Some(key) = configured(&search.tavily_api_key) {
        chain = chain.provider(Arc::new(TavilySearch::new(
            http.clone(),
            key,
            search.max_results,
        )));
    }
    if search.duckduckgo {
        chain = chain.provider(Arc::new(DuckDuckGoSearch::new(
            http.clone(),
            search.max_results,
        )));
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnvelopeState;

    fn offline_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.ollama.base_url = Some("http://127.0.0.1:9".to_string());
        config.search.duckduckgo = false;
        config.routing.timeout_ms = 200;
        config
    }

    fn app(config: AppConfig) -> App {
        let db = Arc::new(Database::in_memory().unwrap());
        App::with_database(config, db, ":memory:").unwrap()
    }

    #[test]
    fn provider_order_follows_preference() {
        let mut config = offline_config();
        config.search.tavily_api_key = Some("tvly-key".to_string());
        config.search.perplexity_api_key = Some("pplx-key".to_string());
        config.search.duckduckgo = true;

        assert_eq!(
            app(config).search_providers(),
            vec!["perplexity", "tavily", "duckduckgo"]
        );
    }

    #[test]
    fn blank_keys_are_ignored() {
        let mut config = offline_config();
        config.search.tavily_api_key = Some("   ".to_string());
        assert!(app(config).search_providers().is_empty());
    }

    #[test]
    fn invalid_config_is_refused() {
        let mut config = offline_config();
        config.routing.kb_threshold = 1.5;
        let db = Arc::new(Database::in_memory().unwrap());
        assert!(App::with_database(config, db, ":memory:").is_err());
    }

    #[tokio::test]
    async fn rejected_queries_are_logged() {
        let app = app(offline_config());
        let envelope = app.ask("   ").await;
        assert_eq!(envelope.state(), EnvelopeState::Rejected);

        let logged = app.feedback_store().get_response(envelope.id()).unwrap();
        assert_eq!(logged.unwrap().envelope.id(), envelope.id());
    }

    #[tokio::test]
    async fn feedback_for_unknown_envelope_is_refused() {
        let app = app(offline_config());
        let err = app
            .submit_feedback(EnvelopeId::new(), 4, None)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<UnknownResponse>().is_some());
    }

    #[tokio::test]
    async fn feedback_is_stored_without_refinement_for_good_ratings() {
        let app = app(offline_config());
        let envelope = app.ask("").await;

        let outcome = app
            .submit_feedback(envelope.id(), 5, Some("clear".to_string()))
            .await
            .unwrap();
        assert!(outcome.refined.is_none());
        assert_eq!(
            app.feedback_store().feedback_for(envelope.id()).unwrap().len(),
            1
        );
    }
}
