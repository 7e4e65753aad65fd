use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::config::{GuardrailFallbackPolicy, RoutingPolicy};
use crate::error::{CapabilityError, ConfigError};
use crate::generator::{GeneratedSolution, SolutionGenerator};
use crate::guardrail::{Classification, GuardrailClassifier, KeywordClassifier};
use crate::knowledge::{Embedder, KnowledgeBaseClient, KnowledgeHit};
use crate::models::{EnvelopeState, ProvenanceRole, Query, SolutionId, SourceKind};
use crate::search::{WebHit, WebSearchClient};

// --- Mock capabilities ---

#[derive(Clone)]
enum Behavior<T> {
    Return(T),
    Fail,
    Hang,
}

impl<T: Clone> Behavior<T> {
    async fn act(&self) -> Result<T, CapabilityError> {
        match self {
            Self::Return(value) => Ok(value.clone()),
            Self::Fail => Err(CapabilityError::Http { status: 503 }),
            Self::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(CapabilityError::Http { status: 504 })
            }
        }
    }
}

struct MockEmbedder {
    calls: AtomicUsize,
    behavior: Behavior<Vec<f32>>,
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn model_name(&self) -> &str {
        "mock-embedder"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.behavior.act().await
    }
}

struct MockKnowledgeBase {
    calls: AtomicUsize,
    behavior: Behavior<Vec<KnowledgeHit>>,
}

#[async_trait]
impl KnowledgeBaseClient for MockKnowledgeBase {
    async fn search(
        &self,
        _embedding: &[f32],
        _top_k: usize,
    ) -> Result<Vec<KnowledgeHit>, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.behavior.act().await
    }
}

struct MockWebSearch {
    calls: AtomicUsize,
    behavior: Behavior<Vec<WebHit>>,
}

#[async_trait]
impl WebSearchClient for MockWebSearch {
    async fn search(&self, _query: &str) -> Result<Vec<WebHit>, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.behavior.act().await
    }
}

struct MockGenerator {
    calls: AtomicUsize,
    behavior: Behavior<GeneratedSolution>,
    last_context: Mutex<Option<String>>,
}

#[async_trait]
impl SolutionGenerator for MockGenerator {
    fn model_name(&self) -> &str {
        "mock-llm"
    }

    async fn generate(
        &self,
        _query: &str,
        context: Option<&str>,
    ) -> Result<GeneratedSolution, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_context.lock().unwrap() = context.map(str::to_string);
        self.behavior.act().await
    }
}

struct FailingClassifier;

#[async_trait]
impl GuardrailClassifier for FailingClassifier {
    async fn classify(&self, _text: &str) -> Result<Classification, CapabilityError> {
        Err(CapabilityError::NotConfigured("offline".to_string()))
    }
}

// --- Fixture ---

struct Fixture {
    orchestrator: RoutingOrchestrator,
    embedder: Arc<MockEmbedder>,
    knowledge_base: Arc<MockKnowledgeBase>,
    web: Arc<MockWebSearch>,
    generator: Arc<MockGenerator>,
}

impl Fixture {
    fn new(
        kb: Behavior<Vec<KnowledgeHit>>,
        web: Behavior<Vec<WebHit>>,
        generator: Behavior<GeneratedSolution>,
    ) -> Self {
        Self::with(
            RoutingPolicy::default(),
            Arc::new(KeywordClassifier::new()),
            kb,
            web,
            generator,
        )
    }

    fn with(
        policy: RoutingPolicy,
        classifier: Arc<dyn GuardrailClassifier>,
        kb: Behavior<Vec<KnowledgeHit>>,
        web: Behavior<Vec<WebHit>>,
        generator: Behavior<GeneratedSolution>,
    ) -> Self {
        let embedder = Arc::new(MockEmbedder {
            calls: AtomicUsize::new(0),
            behavior: Behavior::Return(vec![1.0, 0.0, 0.0]),
        });
        let knowledge_base = Arc::new(MockKnowledgeBase {
            calls: AtomicUsize::new(0),
            behavior: kb,
        });
        let web = Arc::new(MockWebSearch {
            calls: AtomicUsize::new(0),
            behavior: web,
        });
        let generator = Arc::new(MockGenerator {
            calls: AtomicUsize::new(0),
            behavior: generator,
            last_context: Mutex::new(None),
        });

        let orchestrator = RoutingOrchestrator::builder()
            .policy(policy)
            .classifier(classifier)
            .embedder(embedder.clone())
            .knowledge_base(knowledge_base.clone())
            .web_search(web.clone())
            .generator(generator.clone())
            .build()
            .expect("valid orchestrator");

        Self {
            orchestrator,
            embedder,
            knowledge_base,
            web,
            generator,
        }
    }

    fn calls(&self) -> (usize, usize, usize, usize) {
        (
            self.embedder.calls.load(Ordering::SeqCst),
            self.knowledge_base.calls.load(Ordering::SeqCst),
            self.web.calls.load(Ordering::SeqCst),
            self.generator.calls.load(Ordering::SeqCst),
        )
    }

    fn generator_context(&self) -> Option<String> {
        self.generator.last_context.lock().unwrap().clone()
    }
}

fn kb_hit(id: i64, score: f64, content: &str) -> KnowledgeHit {
    KnowledgeHit {
        id: SolutionId::new(id),
        question: "stored question".to_string(),
        content: content.to_string(),
        score,
    }
}

fn web_hit(url: &str, score: f64) -> WebHit {
    WebHit {
        url: url.to_string(),
        title: "Worked example".to_string(),
        snippet: format!("Worked solution from {url} with every step shown."),
        score,
    }
}

fn generated(confidence: Option<f64>) -> GeneratedSolution {
    GeneratedSolution {
        answer: "Step 1: Use the identity sin(2x) = 2 sin x cos x.\nStep 2: Integrate to get -cos(2x)/4 + C.".to_string(),
        steps: vec![
            "Use the identity sin(2x) = 2 sin x cos x.".to_string(),
            "Integrate to get -cos(2x)/4 + C.".to_string(),
        ],
        self_confidence: confidence,
    }
}

const KB_SOLUTION: &str = "Factor: (x - 2)(x + 2) = 0, so x = 2 or x = -2.";

// --- Scenarios ---

#[tokio::test]
async fn knowledge_base_hit_above_threshold_short_circuits() {
    let fixture = Fixture::new(
        Behavior::Return(vec![kb_hit(7, 0.92, KB_SOLUTION)]),
        Behavior::Return(vec![web_hit("https://khanacademy.org/a", 0.9)]),
        Behavior::Return(generated(Some(0.9))),
    );

    let envelope = fixture
        .orchestrator
        .route(&Query::new("solve x^2 - 4 = 0"))
        .await;

    assert_eq!(envelope.state(), EnvelopeState::Answered);
    assert_eq!(envelope.answer(), Some(KB_SOLUTION));
    assert_eq!(envelope.confidence(), 0.92);
    assert_eq!(envelope.provenance().len(), 1);
    let primary = envelope.primary_source().unwrap();
    assert_eq!(primary.kind, SourceKind::KnowledgeBase);
    assert_eq!(primary.source_id, "kb:7");
    assert_eq!(fixture.calls(), (1, 1, 0, 0), "web and generator must not run");
}

#[tokio::test]
async fn qualifying_web_hit_is_passed_to_generator_as_context() {
    let fixture = Fixture::new(
        Behavior::Return(vec![kb_hit(1, 0.3, KB_SOLUTION)]),
        Behavior::Return(vec![web_hit("https://www.khanacademy.org/integrals", 0.75)]),
        Behavior::Return(generated(Some(0.8))),
    );

    let envelope = fixture
        .orchestrator
        .route(&Query::new("integrate sin(x)cos(x)"))
        .await;

    assert_eq!(envelope.state(), EnvelopeState::Answered);
    assert_eq!(envelope.confidence(), 0.8, "no penalty with context");
    assert_eq!(envelope.steps().len(), 2);

    let provenance = envelope.provenance();
    assert_eq!(provenance.len(), 2);
    assert_eq!(provenance[0].kind, SourceKind::Generated);
    assert_eq!(provenance[0].role, ProvenanceRole::Primary);
    assert_eq!(provenance[0].source_id, "model:mock-llm");
    assert_eq!(provenance[1].kind, SourceKind::Web);
    assert_eq!(provenance[1].role, ProvenanceRole::Secondary);
    assert!((provenance[1].weight - 0.375).abs() < 1e-9);

    let context = fixture.generator_context().expect("generator received context");
    assert!(context.contains("https://www.khanacademy.org/integrals"));
}

#[tokio::test]
async fn rejected_query_makes_no_capability_calls() {
    let fixture = Fixture::new(
        Behavior::Return(vec![kb_hit(1, 0.99, KB_SOLUTION)]),
        Behavior::Return(Vec::new()),
        Behavior::Return(generated(Some(0.9))),
    );

    let envelope = fixture
        .orchestrator
        .route(&Query::new("write a poem about cats"))
        .await;

    assert!(!envelope.is_accepted());
    assert_eq!(envelope.state(), EnvelopeState::Rejected);
    assert_eq!(envelope.rejection_reason(), Some("non-mathematical"));
    assert_eq!(envelope.confidence(), 0.0);
    assert_eq!(fixture.calls(), (0, 0, 0, 0));
}

#[tokio::test(start_paused = true)]
async fn every_stage_timing_out_yields_no_answer() {
    let fixture = Fixture::new(Behavior::Hang, Behavior::Hang, Behavior::Hang);

    let envelope = fixture
        .orchestrator
        .route(&Query::new("solve 3x + 1 = 10"))
        .await;

    assert_eq!(envelope.state(), EnvelopeState::NoAnswerAvailable);
    assert!(envelope.answer().is_none());
    assert!(envelope.provenance().is_empty());
    assert_eq!(
        envelope.unavailable_sources(),
        &[SourceKind::KnowledgeBase, SourceKind::Web, SourceKind::Generated]
    );
}

// --- Thresholds and confidence ---

#[tokio::test]
async fn generation_without_context_is_penalized() {
    let fixture = Fixture::new(
        Behavior::Return(Vec::new()),
        Behavior::Return(Vec::new()),
        Behavior::Return(generated(None)),
    );

    let envelope = fixture
        .orchestrator
        .route(&Query::new("integrate sin(x)cos(x)"))
        .await;

    // Default confidence 0.5 reduced by the 0.2 penalty
    assert!((envelope.confidence() - 0.4).abs() < 1e-9);
    assert!(fixture.generator_context().is_none());
    assert_eq!(envelope.provenance().len(), 1);
}

#[tokio::test]
async fn knowledge_base_score_equal_to_threshold_is_accepted() {
    let fixture = Fixture::new(
        Behavior::Return(vec![kb_hit(3, 0.80, KB_SOLUTION)]),
        Behavior::Return(Vec::new()),
        Behavior::Return(generated(Some(0.9))),
    );

    let envelope = fixture.orchestrator.route(&Query::new("solve x^2 = 4")).await;

    assert_eq!(envelope.primary_source().unwrap().kind, SourceKind::KnowledgeBase);
    assert_eq!(fixture.calls().2, 0);
}

#[tokio::test]
async fn knowledge_base_below_threshold_falls_through() {
    let fixture = Fixture::new(
        Behavior::Return(vec![kb_hit(3, 0.79, KB_SOLUTION)]),
        Behavior::Return(Vec::new()),
        Behavior::Return(generated(Some(0.9))),
    );

    let envelope = fixture.orchestrator.route(&Query::new("solve x^2 = 4")).await;

    assert_eq!(envelope.primary_source().unwrap().kind, SourceKind::Generated);
    assert_eq!(fixture.calls(), (1, 1, 1, 1));
}

#[tokio::test]
async fn tied_knowledge_base_hits_keep_the_earliest() {
    let fixture = Fixture::new(
        Behavior::Return(vec![
            kb_hit(11, 0.9, KB_SOLUTION),
            kb_hit(12, 0.9, "Take square roots: x = ±2 are the solutions."),
        ]),
        Behavior::Return(Vec::new()),
        Behavior::Return(generated(None)),
    );

    let envelope = fixture.orchestrator.route(&Query::new("solve x^2 = 4")).await;
    assert_eq!(envelope.primary_source().unwrap().source_id, "kb:11");
}

#[tokio::test]
async fn web_hits_below_threshold_are_not_context() {
    let fixture = Fixture::new(
        Behavior::Return(Vec::new()),
        Behavior::Return(vec![web_hit("https://random.blog/post", 0.5)]),
        Behavior::Return(generated(Some(0.7))),
    );

    let envelope = fixture.orchestrator.route(&Query::new("solve x + 1 = 3")).await;

    assert!(fixture.generator_context().is_none());
    assert_eq!(envelope.provenance().len(), 1);
    assert!((envelope.confidence() - 0.56).abs() < 1e-9);
}

#[tokio::test]
async fn web_context_is_limited_and_ordered() {
    let fixture = Fixture::new(
        Behavior::Return(Vec::new()),
        Behavior::Return(vec![
            web_hit("https://c.org/third", 0.7),
            web_hit("https://a.org/first", 0.9),
            web_hit("https://b.org/second", 0.8),
        ]),
        Behavior::Return(generated(Some(0.6))),
    );

    let envelope = fixture.orchestrator.route(&Query::new("solve x + 1 = 3")).await;

    let context = fixture.generator_context().unwrap();
    let first = context.find("https://a.org/first").unwrap();
    let second = context.find("https://b.org/second").unwrap();
    assert!(first < second);
    assert!(!context.contains("https://c.org/third"));

    let ids: Vec<&str> = envelope
        .provenance()
        .iter()
        .map(|p| p.source_id.as_str())
        .collect();
    assert_eq!(ids, vec!["model:mock-llm", "https://a.org/first", "https://b.org/second"]);
}

#[tokio::test]
async fn generator_failure_falls_back_to_best_web_hit() {
    let fixture = Fixture::new(
        Behavior::Return(Vec::new()),
        Behavior::Return(vec![web_hit("https://mathworld.wolfram.com/x", 0.75)]),
        Behavior::Fail,
    );

    let envelope = fixture.orchestrator.route(&Query::new("solve x + 1 = 3")).await;

    assert_eq!(envelope.state(), EnvelopeState::Answered);
    let primary = envelope.primary_source().unwrap();
    assert_eq!(primary.kind, SourceKind::Web);
    assert_eq!(envelope.confidence(), 0.75);
    assert_eq!(envelope.unavailable_sources(), &[SourceKind::Generated]);
}

#[tokio::test]
async fn percentage_generator_confidence_is_rescaled() {
    let fixture = Fixture::new(
        Behavior::Return(Vec::new()),
        Behavior::Return(vec![web_hit("https://a.org", 0.9)]),
        Behavior::Return(generated(Some(85.0))),
    );

    let envelope = fixture.orchestrator.route(&Query::new("solve x + 1 = 3")).await;
    assert!((envelope.confidence() - 0.85).abs() < 1e-9);
}

#[tokio::test]
async fn nonsense_generator_confidence_uses_the_default() {
    let fixture = Fixture::new(
        Behavior::Return(Vec::new()),
        Behavior::Return(vec![web_hit("https://a.org", 0.9)]),
        Behavior::Return(generated(Some(250.0))),
    );

    let envelope = fixture.orchestrator.route(&Query::new("solve x + 1 = 3")).await;
    let default = RoutingPolicy::default().generated_default_confidence;
    assert!((envelope.confidence() - default).abs() < 1e-9);
}

#[tokio::test]
async fn brief_web_snippets_are_not_context() {
    let mut brief = web_hit("https://a.org/brief", 0.95);
    brief.snippet = "x=2".to_string();
    let fixture = Fixture::new(
        Behavior::Return(Vec::new()),
        Behavior::Return(vec![brief, web_hit("https://b.org/full", 0.7)]),
        Behavior::Return(generated(Some(0.8))),
    );

    let envelope = fixture.orchestrator.route(&Query::new("solve x + 1 = 3")).await;

    let context = fixture.generator_context().expect("generator saw context");
    assert!(context.contains("https://b.org/full"));
    assert!(!context.contains("https://a.org/brief"));
    assert!(
        envelope
            .provenance()
            .iter()
            .all(|p| !p.source_id.contains("a.org"))
    );
}

#[tokio::test]
async fn brief_knowledge_base_answer_is_discarded() {
    let fixture = Fixture::new(
        Behavior::Return(vec![kb_hit(5, 0.95, "x=2")]),
        Behavior::Return(Vec::new()),
        Behavior::Return(generated(Some(0.6))),
    );

    let envelope = fixture.orchestrator.route(&Query::new("solve x^2 = 4")).await;

    assert_eq!(envelope.primary_source().unwrap().kind, SourceKind::Generated);
    assert_eq!(fixture.calls().2, 1);
}

// --- Failure handling ---

#[tokio::test]
async fn embedder_failure_marks_knowledge_base_unavailable() {
    let base = Fixture::new(
        Behavior::Return(vec![kb_hit(1, 0.99, KB_SOLUTION)]),
        Behavior::Return(Vec::new()),
        Behavior::Return(generated(Some(0.6))),
    );
    // Rebuild with a failing embedder
    let embedder = Arc::new(MockEmbedder {
        calls: AtomicUsize::new(0),
        behavior: Behavior::Fail,
    });
    let orchestrator = RoutingOrchestrator::builder()
        .classifier(Arc::new(KeywordClassifier::new()))
        .embedder(embedder)
        .knowledge_base(base.knowledge_base.clone())
        .web_search(base.web.clone())
        .generator(base.generator.clone())
        .build()
        .unwrap();

    let envelope = orchestrator.route(&Query::new("solve x^2 = 4")).await;

    assert_eq!(envelope.unavailable_sources(), &[SourceKind::KnowledgeBase]);
    assert_eq!(base.knowledge_base.calls.load(Ordering::SeqCst), 0);
    assert_eq!(envelope.primary_source().unwrap().kind, SourceKind::Generated);
}

#[tokio::test]
async fn fail_open_guardrail_marks_envelope_unvalidated() {
    let policy = RoutingPolicy {
        guardrail_fallback_policy: GuardrailFallbackPolicy::FailOpen,
        ..RoutingPolicy::default()
    };
    let fixture = Fixture::with(
        policy,
        Arc::new(FailingClassifier),
        Behavior::Return(vec![kb_hit(2, 0.9, KB_SOLUTION)]),
        Behavior::Return(Vec::new()),
        Behavior::Return(generated(None)),
    );

    let envelope = fixture.orchestrator.route(&Query::new("solve x^2 = 4")).await;

    assert_eq!(envelope.state(), EnvelopeState::Answered);
    assert!(envelope.is_unvalidated());
}

#[tokio::test]
async fn fail_closed_guardrail_rejects_without_calls() {
    let fixture = Fixture::with(
        RoutingPolicy::default(),
        Arc::new(FailingClassifier),
        Behavior::Return(vec![kb_hit(2, 0.9, KB_SOLUTION)]),
        Behavior::Return(Vec::new()),
        Behavior::Return(generated(None)),
    );

    let envelope = fixture.orchestrator.route(&Query::new("solve x^2 = 4")).await;

    assert_eq!(envelope.rejection_reason(), Some("guardrail-unavailable"));
    assert_eq!(fixture.calls(), (0, 0, 0, 0));
}

#[tokio::test]
async fn subject_tag_is_carried_into_envelope() {
    let fixture = Fixture::new(
        Behavior::Return(vec![kb_hit(2, 0.9, KB_SOLUTION)]),
        Behavior::Return(Vec::new()),
        Behavior::Return(generated(None)),
    );
    let query = Query::new("solve the quadratic x^2 - 4 = 0");
    let envelope = fixture.orchestrator.route(&query).await;

    assert_eq!(envelope.query_id(), query.id());
    assert_eq!(envelope.subject(), query.subject());
}

#[tokio::test]
async fn orchestrator_is_shared_across_tasks() {
    let fixture = Fixture::new(
        Behavior::Return(vec![kb_hit(2, 0.9, KB_SOLUTION)]),
        Behavior::Return(Vec::new()),
        Behavior::Return(generated(None)),
    );
    let orchestrator = Arc::new(fixture.orchestrator);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                orchestrator
                    .route(&Query::new(format!("solve x^2 = {}", i + 1)))
                    .await
            })
        })
        .collect();

    for handle in handles {
        let envelope = handle.await.unwrap();
        assert_eq!(envelope.state(), EnvelopeState::Answered);
    }
    assert_eq!(fixture.knowledge_base.calls.load(Ordering::SeqCst), 4);
}

// --- Builder ---

#[test]
fn builder_requires_every_capability() {
    let result = RoutingOrchestrator::builder()
        .classifier(Arc::new(KeywordClassifier::new()))
        .build();
    assert!(matches!(result, Err(ConfigError::MissingComponent("embedder"))));
}

#[test]
fn builder_rejects_invalid_policy() {
    let policy = RoutingPolicy {
        kb_threshold: 1.5,
        ..RoutingPolicy::default()
    };
    let result = RoutingOrchestrator::builder().policy(policy).build();
    assert!(matches!(result, Err(ConfigError::OutOfRange { .. })));
}
