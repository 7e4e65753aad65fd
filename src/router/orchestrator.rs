use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use super::assembly::{aggregate_confidence, build_provenance};
use super::steps::decompose_steps;
use crate::config::RoutingPolicy;
use crate::error::{CapabilityError, ConfigError};
use crate::generator::{SolutionGenerator, reported_confidence};
use crate::guardrail::{GuardrailClassifier, GuardrailValidator};
use crate::knowledge::{Embedder, KnowledgeBaseClient};
use crate::models::{Candidate, Query, ResponseEnvelope, SourceKind, select_best};
use crate::search::WebSearchClient;

/// Pipeline position of one routing run.
enum Stage {
    Start,
    Validated,
    Rejected(String),
    /// Holds the knowledge-base candidate when it cleared the threshold.
    KbChecked(Option<Candidate>),
    /// Qualifying web candidates, best first.
    WebChecked(Vec<Candidate>),
    Generated(Option<Selection>),
    Assembled(ResponseEnvelope),
}

/// The chosen candidate and what supported it.
struct Selection {
    chosen: Candidate,
    supporting: Vec<Candidate>,
    without_context: bool,
}

/// Per-request bookkeeping carried across stages.
struct Run<'q> {
    query: &'q Query,
    unvalidated: bool,
    unavailable: Vec<SourceKind>,
}

impl Run<'_> {
    fn mark_unavailable(&mut self, kind: SourceKind, error: &CapabilityError) {
        warn!(source = %kind, error = %error, "source unavailable");
        if !self.unavailable.contains(&kind) {
            self.unavailable.push(kind);
        }
    }
}

/// Decides, per query, which source answers it and how far to trust the answer.
///
/// Stages run in order: guardrail, knowledge base, web search, generation.
/// The knowledge base short-circuits the rest when its best match clears
/// `kb_threshold`. A failed or timed-out source contributes nothing and
/// routing moves on; `route` itself never fails.
///
/// The orchestrator only holds configuration and shared capability handles,
/// so one instance can serve many tasks concurrently.
pub struct RoutingOrchestrator {
    guardrail: GuardrailValidator,
    embedder: Arc<dyn Embedder>,
    knowledge_base: Arc<dyn KnowledgeBaseClient>,
    web_search: Arc<dyn WebSearchClient>,
    generator: Arc<dyn SolutionGenerator>,
    policy: RoutingPolicy,
}

impl RoutingOrchestrator {
    pub fn builder() -> RoutingOrchestratorBuilder {
        RoutingOrchestratorBuilder::new()
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    /// Routes one query to a final envelope.
    #[instrument(skip(self, query), fields(query_id = %query.id()))]
    pub async fn route(&self, query: &Query) -> ResponseEnvelope {
        let mut run = Run {
            query,
            unvalidated: false,
            unavailable: Vec::new(),
        };
        let mut stage = Stage::Start;

        loop {
            stage = match stage {
                Stage::Start => self.validate(&mut run).await,
                Stage::Validated => self.check_knowledge_base(&mut run).await,
                Stage::Rejected(reason) => {
                    info!(reason = %reason, "query rejected");
                    Stage::Assembled(ResponseEnvelope::rejected(query, reason))
                }
                Stage::KbChecked(Some(chosen)) => Stage::Assembled(self.assemble(
                    &run,
                    Some(Selection {
                        chosen,
                        supporting: Vec::new(),
                        without_context: false,
                    }),
                )),
                Stage::KbChecked(None) => self.search_web(&mut run).await,
                Stage::WebChecked(context) => self.generate(&mut run, context).await,
                Stage::Generated(selection) => Stage::Assembled(self.assemble(&run, selection)),
                Stage::Assembled(envelope) => return envelope,
            };
        }
    }

    async fn validate(&self, run: &mut Run<'_>) -> Stage {
        let result = self.guardrail.validate(run.query).await;
        if !result.is_accepted() {
            return Stage::Rejected(result.reason().unwrap_or("rejected").to_string());
        }
        run.unvalidated = result.is_unvalidated();
        Stage::Validated
    }

    async fn check_knowledge_base(&self, run: &mut Run<'_>) -> Stage {
        let query = run.query;
        let started = Instant::now();
        let lookup = async {
            let embedding = self.embedder.embed(query.normalized()).await?;
            self.knowledge_base
                .search(&embedding, self.policy.kb_top_k)
                .await
        };
        let hits = match self.bounded(lookup).await {
            Ok(hits) => hits,
            Err(e) => {
                run.mark_unavailable(SourceKind::KnowledgeBase, &e);
                return Stage::KbChecked(None);
            }
        };
        let latency = started.elapsed();

        let candidates: Vec<Candidate> = hits
            .into_iter()
            .map(|hit| {
                Candidate::new(
                    SourceKind::KnowledgeBase,
                    hit.content,
                    hit.score,
                    format!("kb:{}", hit.id),
                    latency,
                )
            })
            .filter(|c| self.passes_output_guardrail(c))
            .collect();

        match select_best(&candidates) {
            Some(best) if best.confidence() >= self.policy.kb_threshold => {
                info!(
                    source = best.source_id(),
                    confidence = best.confidence(),
                    "answered from knowledge base"
                );
                Stage::KbChecked(Some(best.clone()))
            }
            Some(best) => {
                debug!(
                    confidence = best.confidence(),
                    threshold = self.policy.kb_threshold,
                    "knowledge base match below threshold"
                );
                Stage::KbChecked(None)
            }
            None => Stage::KbChecked(None),
        }
    }

    async fn search_web(&self, run: &mut Run<'_>) -> Stage {
        let started = Instant::now();
        let hits = match self.bounded(self.web_search.search(run.query.raw())).await {
            Ok(hits) => hits,
            Err(e) => {
                run.mark_unavailable(SourceKind::Web, &e);
                return Stage::WebChecked(Vec::new());
            }
        };
        let latency = started.elapsed();

        let mut qualifying: Vec<Candidate> = hits
            .into_iter()
            .map(|hit| Candidate::new(SourceKind::Web, hit.snippet, hit.score, hit.url, latency))
            .filter(|c| c.confidence() >= self.policy.web_threshold)
            .filter(|c| self.passes_output_guardrail(c))
            .collect();
        // Stable sort: equal scores keep the order the search returned them in
        qualifying.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));
        qualifying.truncate(self.policy.web_context_limit);

        debug!(qualifying = qualifying.len(), "web search done");
        Stage::WebChecked(qualifying)
    }

    async fn generate(&self, run: &mut Run<'_>, context: Vec<Candidate>) -> Stage {
        let context_text = format_context(&context);
        let started = Instant::now();
        let generated = self
            .bounded(self.generator.generate(run.query.raw(), context_text.as_deref()))
            .await;

        match generated {
            Ok(solution) => {
                let confidence = solution
                    .self_confidence
                    .and_then(reported_confidence)
                    .unwrap_or(self.policy.generated_default_confidence);
                let candidate = Candidate::new(
                    SourceKind::Generated,
                    solution.answer,
                    confidence,
                    format!("model:{}", self.generator.model_name()),
                    started.elapsed(),
                )
                .with_steps(solution.steps);

                if self.passes_output_guardrail(&candidate) {
                    info!(
                        with_context = !context.is_empty(),
                        confidence = candidate.confidence(),
                        "answered by generation"
                    );
                    let without_context = context.is_empty();
                    return Stage::Generated(Some(Selection {
                        chosen: candidate,
                        supporting: context,
                        without_context,
                    }));
                }
            }
            Err(e) => run.mark_unavailable(SourceKind::Generated, &e),
        }

        Stage::Generated(self.fall_back_to_web(context))
    }

    /// Uses the best web hit as the answer when generation produced nothing.
    fn fall_back_to_web(&self, mut context: Vec<Candidate>) -> Option<Selection> {
        let position = context
            .iter()
            .position(|c| self.passes_output_guardrail(c))?;
        let chosen = context.remove(position);
        info!(source = chosen.source_id(), "answered from web result");
        Some(Selection {
            chosen,
            supporting: context,
            without_context: false,
        })
    }

    fn assemble(&self, run: &Run<'_>, selection: Option<Selection>) -> ResponseEnvelope {
        let envelope = match selection {
            Some(selection) => {
                let Selection {
                    chosen,
                    supporting,
                    without_context,
                } = selection;
                let mut steps = if chosen.steps().is_empty() {
                    decompose_steps(chosen.content())
                } else {
                    chosen.steps().to_vec()
                };
                if steps.is_empty() {
                    steps.push(chosen.content().trim().to_string());
                }
                let confidence = aggregate_confidence(
                    &chosen,
                    without_context,
                    self.policy.generated_without_context_penalty,
                );
                let provenance = build_provenance(&chosen, &supporting);
                ResponseEnvelope::answered(
                    run.query,
                    chosen.content().to_string(),
                    steps,
                    confidence,
                    provenance,
                )
            }
            None => {
                info!("no source could answer");
                ResponseEnvelope::no_answer(run.query)
            }
        };

        envelope
            .unvalidated(run.unvalidated)
            .with_unavailable_sources(run.unavailable.clone())
    }

    fn passes_output_guardrail(&self, candidate: &Candidate) -> bool {
        let accepted = self.guardrail.validate_output(candidate.content()).is_accepted();
        if !accepted {
            debug!(source = candidate.source_id(), "candidate too brief, discarded");
        }
        accepted
    }

    /// Bounds a capability call by the configured timeout.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, CapabilityError>>,
    ) -> Result<T, CapabilityError> {
        let limit = self.policy.timeout();
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(CapabilityError::Timeout(limit)))
    }
}

/// Formats web context for the generator prompt.
fn format_context(context: &[Candidate]) -> Option<String> {
    if context.is_empty() {
        return None;
    }
    let blocks: Vec<String> = context
        .iter()
        .enumerate()
        .map(|(i, c)| format!("Source {} ({}):\n{}", i + 1, c.source_id(), c.content().trim()))
        .collect();
    Some(blocks.join("\n\n"))
}

/// Builder for [`RoutingOrchestrator`].
///
/// Every capability is required; the policy defaults to
/// [`RoutingPolicy::default`].
#[derive(Default)]
pub struct RoutingOrchestratorBuilder {
    policy: Option<RoutingPolicy>,
    classifier: Option<Arc<dyn GuardrailClassifier>>,
    embedder: Option<Arc<dyn Embedder>>,
    knowledge_base: Option<Arc<dyn KnowledgeBaseClient>>,
    web_search: Option<Arc<dyn WebSearchClient>>,
    generator: Option<Arc<dyn SolutionGenerator>>,
}

impl RoutingOrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn policy(mut self, policy: RoutingPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn GuardrailClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn knowledge_base(mut self, knowledge_base: Arc<dyn KnowledgeBaseClient>) -> Self {
        self.knowledge_base = Some(knowledge_base);
        self
    }

    pub fn web_search(mut self, web_search: Arc<dyn WebSearchClient>) -> Self {
        self.web_search = Some(web_search);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn SolutionGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Validates the policy and assembles the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for an invalid policy or a missing capability.
    pub fn build(self) -> Result<RoutingOrchestrator, ConfigError> {
        let policy = self.policy.unwrap_or_default();
        policy.validate()?;

        let classifier = self
            .classifier
            .ok_or(ConfigError::MissingComponent("guardrail classifier"))?;
        let guardrail = GuardrailValidator::new(classifier, &policy);

        Ok(RoutingOrchestrator {
            guardrail,
            embedder: self
                .embedder
                .ok_or(ConfigError::MissingComponent("embedder"))?,
            knowledge_base: self
                .knowledge_base
                .ok_or(ConfigError::MissingComponent("knowledge base"))?,
            web_search: self
                .web_search
                .ok_or(ConfigError::MissingComponent("web search"))?,
            generator: self
                .generator
                .ok_or(ConfigError::MissingComponent("solution generator"))?,
            policy,
        })
    }
}
