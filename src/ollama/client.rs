use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

/// Model used when neither the builder nor `OLLAMA_MODEL` names one.
pub const DEFAULT_MODEL: &str = "llama3.2";

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Waits between attempts; one initial try plus one retry per entry.
const BACKOFF: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Errors talking to an Ollama server.
#[derive(Debug, Error)]
pub enum OllamaError {
    /// Connection refused, DNS failure, reset mid-body.
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Request timed out")]
    Timeout(#[source] reqwest::Error),

    #[error("HTTP error: status {status}")]
    Http { status: u16 },

    /// The reply was not the JSON shape the endpoint documents.
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Ollama answered with an `{"error": ...}` body, e.g. an unknown model.
    #[error("Ollama API error: {message}")]
    Api { message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl OllamaError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err)
        } else {
            Self::Network(err)
        }
    }

    /// Network failures, timeouts and 5xx replies may succeed on retry.
    fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Http { status } => (500..600).contains(status),
            Self::Serialization(_) | Self::Api { .. } | Self::InvalidUrl(_) => false,
        }
    }
}

/// Builder for [`OllamaClient`].
///
/// ```
/// use mathroute::ollama::OllamaClientBuilder;
///
/// let client = OllamaClientBuilder::new()
///     .base_url("http://localhost:11434/")
///     .model("qwen2.5-math")
///     .build()
///     .expect("valid url");
/// assert_eq!(client.base_url(), "http://localhost:11434");
/// ```
#[derive(Debug, Default)]
pub struct OllamaClientBuilder {
    base_url: Option<String>,
    model: Option<String>,
    request_timeout: Option<Duration>,
}

impl OllamaClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Model used for generation and classification, e.g. `qwen2.5-math`.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Transport timeout for one HTTP request. Defaults to 60 seconds.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Builds the client.
    ///
    /// Unset values fall back to `OLLAMA_HOST` and `OLLAMA_MODEL`, then to
    /// `http://localhost:11434` and [`DEFAULT_MODEL`].
    ///
    /// # Errors
    ///
    /// Returns [`OllamaError::InvalidUrl`] when the base URL does not parse.
    pub fn build(self) -> Result<OllamaClient, OllamaError> {
        let base_url = self
            .base_url
            .or_else(|| std::env::var("OLLAMA_HOST").ok())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let model = self
            .model
            .or_else(|| std::env::var("OLLAMA_MODEL").ok())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        reqwest::Url::parse(&base_url)
            .map_err(|e| OllamaError::InvalidUrl(format!("{base_url}: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(OllamaError::Network)?;

        Ok(OllamaClient {
            http,
            base_url,
            model,
        })
    }
}

/// Generation and embedding calls, mockable in tests.
#[async_trait]
pub trait OllamaClientTrait: Send + Sync {
    /// Runs a non-streaming completion of `prompt` on `model`.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, OllamaError>;

    /// Embeds `input` with an embedding model.
    async fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, OllamaError>;
}

/// Async client for the Ollama REST API. Construct with [`OllamaClientBuilder`].
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct GenerateReply {
    response: String,
}

#[derive(Debug, Deserialize)]
struct EmbedReply {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct TagsReply {
    #[serde(default)]
    models: Vec<InstalledModel>,
}

#[derive(Debug, Deserialize)]
struct InstalledModel {
    name: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorReply {
    error: String,
}

impl OllamaClient {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Installed model names, largest first. Not retried, so a health check
    /// against a stopped server fails fast.
    pub async fn list_models(&self) -> Result<Vec<String>, OllamaError> {
        let response = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await;
        let reply: TagsReply = decode(response).await?;

        let mut models = reply.models;
        models.sort_by(|a, b| b.size.cmp(&a.size));
        Ok(models.into_iter().map(|m| m.name).collect())
    }

    /// POSTs `body` to `endpoint`, retrying transient failures.
    async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<T, OllamaError> {
        let url = format!("{}{endpoint}", self.base_url);
        let (url, http) = (url.as_str(), &self.http);
        retry_with_backoff(|| async move { decode(http.post(url).json(body).send().await).await })
            .await
    }
}

#[async_trait]
impl OllamaClientTrait for OllamaClient {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, OllamaError> {
        debug!(model, prompt_len = prompt.len(), "ollama generate");
        let body = json!({ "model": model, "prompt": prompt, "stream": false });
        let reply: GenerateReply = self.post("/api/generate", &body).await?;
        Ok(reply.response)
    }

    async fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, OllamaError> {
        debug!(model, input_len = input.len(), "ollama embed");
        let body = json!({ "model": model, "input": input });
        let reply: EmbedReply = self.post("/api/embed", &body).await?;
        first_embedding(reply)
    }
}

fn first_embedding(reply: EmbedReply) -> Result<Vec<f32>, OllamaError> {
    reply
        .embeddings
        .into_iter()
        .next()
        .ok_or_else(|| OllamaError::Api {
            message: "embed reply contained no vectors".to_string(),
        })
}

/// Checks the status and decodes a JSON reply.
///
/// 4xx replies carrying an `error` field become [`OllamaError::Api`]; other
/// failures keep their status so 5xx can be retried.
async fn decode<T: DeserializeOwned>(
    response: Result<reqwest::Response, reqwest::Error>,
) -> Result<T, OllamaError> {
    let response = response.map_err(OllamaError::from_reqwest)?;
    let status = response.status();
    let bytes = response.bytes().await.map_err(OllamaError::from_reqwest)?;

    if !status.is_success() {
        return Err(status_error(status.as_u16(), &bytes));
    }
    serde_json::from_slice(&bytes).map_err(OllamaError::Serialization)
}

fn status_error(status: u16, body: &[u8]) -> OllamaError {
    if (400..500).contains(&status)
        && let Ok(reply) = serde_json::from_slice::<ErrorReply>(body)
    {
        return OllamaError::Api {
            message: reply.error,
        };
    }
    OllamaError::Http { status }
}

/// Runs `f`, retrying transient errors after 1s, 2s and 4s.
pub async fn retry_with_backoff<F, Fut, T>(mut f: F) -> Result<T, OllamaError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OllamaError>>,
{
    let mut delays = BACKOFF.iter();
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => match delays.next() {
                Some(delay) => {
                    debug!(error = %e, delay_ms = delay.as_millis() as u64, "retrying ollama request");
                    tokio::time::sleep(*delay).await;
                }
                None => return Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::error::Error;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn network_error() -> OllamaError {
        OllamaError::Network(
            reqwest::Client::new()
                .get("not-a-valid-url")
                .build()
                .unwrap_err(),
        )
    }

    /// Runs `retry_with_backoff` over a scripted sequence of outcomes.
    async fn run_script(script: Vec<Result<&'static str, OllamaError>>) -> (Result<&'static str, OllamaError>, usize) {
        let attempts = Arc::new(AtomicUsize::new(0));
        let script = Arc::new(std::sync::Mutex::new(script.into_iter()));
        let result = retry_with_backoff(|| {
            let attempts = attempts.clone();
            let script = script.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                script
                    .lock()
                    .unwrap()
                    .next()
                    .unwrap_or(Err(OllamaError::Http { status: 503 }))
            }
        })
        .await;
        (result, attempts.load(Ordering::SeqCst))
    }

    #[test]
    fn transient_errors_are_classified() {
        assert!(network_error().is_transient());
        assert!(OllamaError::Http { status: 502 }.is_transient());
        assert!(!OllamaError::Http { status: 404 }.is_transient());
        assert!(!OllamaError::Api { message: "model not found".into() }.is_transient());
    }

    #[test]
    fn serialization_error_keeps_its_source() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error = OllamaError::Serialization(json_error);
        assert!(error.to_string().starts_with("Serialization error"));
        assert!(error.source().is_some());
    }

    #[test]
    fn client_errors_with_a_body_become_api_errors() {
        let error = status_error(404, br#"{"error":"model 'nope' not found"}"#);
        assert!(matches!(error, OllamaError::Api { ref message } if message.contains("nope")));

        assert!(matches!(status_error(404, b"not json"), OllamaError::Http { status: 404 }));
        assert!(matches!(
            status_error(500, br#"{"error":"out of memory"}"#),
            OllamaError::Http { status: 500 }
        ));
    }

    #[test]
    #[serial]
    fn build_uses_default_url_and_model_when_unset() {
        unsafe {
            std::env::remove_var("OLLAMA_HOST");
            std::env::remove_var("OLLAMA_MODEL");
        }

        let client = OllamaClientBuilder::new().build().unwrap();
        assert_eq!(client.base_url(), DEFAULT_BASE_URL);
        assert_eq!(client.model(), DEFAULT_MODEL);
    }

    #[test]
    #[serial]
    fn build_reads_environment_variables() {
        unsafe {
            std::env::set_var("OLLAMA_HOST", "http://gpu-box:11434/");
            std::env::set_var("OLLAMA_MODEL", "qwen2.5-math");
        }

        let client = OllamaClientBuilder::new().build();

        unsafe {
            std::env::remove_var("OLLAMA_HOST");
            std::env::remove_var("OLLAMA_MODEL");
        }

        let client = client.unwrap();
        assert_eq!(client.base_url(), "http://gpu-box:11434");
        assert_eq!(client.model(), "qwen2.5-math");
    }

    #[test]
    #[serial]
    fn builder_values_take_precedence_over_environment() {
        unsafe {
            std::env::set_var("OLLAMA_HOST", "http://from-env:11434");
        }

        let client = OllamaClientBuilder::new()
            .base_url("http://from-builder:11434")
            .model("deepseek-math")
            .build();

        unsafe {
            std::env::remove_var("OLLAMA_HOST");
        }

        let client = client.unwrap();
        assert_eq!(client.base_url(), "http://from-builder:11434");
        assert_eq!(client.model(), "deepseek-math");
    }

    #[test]
    fn invalid_url_is_rejected() {
        let result = OllamaClientBuilder::new().base_url("localhost without scheme").build();
        assert!(matches!(result, Err(OllamaError::InvalidUrl(_))));
    }

    #[test]
    fn replies_decode_into_typed_bodies() {
        let reply: GenerateReply =
            serde_json::from_str(r#"{"model":"llama3.2","response":"x = 4","done":true}"#).unwrap();
        assert_eq!(reply.response, "x = 4");

        let reply: EmbedReply =
            serde_json::from_str(r#"{"model":"nomic-embed-text","embeddings":[[0.5,-0.25,1.0]]}"#)
                .unwrap();
        assert_eq!(first_embedding(reply).unwrap(), vec![0.5, -0.25, 1.0]);

        let empty: EmbedReply = serde_json::from_str(r#"{"embeddings":[]}"#).unwrap();
        assert!(first_embedding(empty).is_err());

        let tags: TagsReply = serde_json::from_str(r#"{}"#).unwrap();
        assert!(tags.models.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_from_a_dropped_connection() {
        let (result, attempts) = run_script(vec![Err(network_error()), Ok("x = 4")]).await;
        assert_eq!(result.unwrap(), "x = 4");
        assert_eq!(attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_three_retries() {
        let start = tokio::time::Instant::now();
        let (result, attempts) = run_script(Vec::new()).await;

        assert!(matches!(result, Err(OllamaError::Http { status: 503 })));
        assert_eq!(attempts, 4);
        // 1s + 2s + 4s of virtual backoff
        assert!(start.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test]
    async fn unknown_model_is_not_retried() {
        let (result, attempts) = run_script(vec![Err(OllamaError::Api {
            message: "model not found".to_string(),
        })])
        .await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn trait_objects_can_be_mocked() {
        struct Canned;

        #[async_trait]
        impl OllamaClientTrait for Canned {
            async fn generate(&self, _model: &str, _prompt: &str) -> Result<String, OllamaError> {
                Ok("canned".to_string())
            }

            async fn embed(&self, _model: &str, _input: &str) -> Result<Vec<f32>, OllamaError> {
                Ok(vec![1.0, 0.0])
            }
        }

        let client: Arc<dyn OllamaClientTrait> = Arc::new(Canned);
        assert_eq!(client.generate("m", "p").await.unwrap(), "canned");
        assert_eq!(client.embed("m", "p").await.unwrap(), vec![1.0, 0.0]);
    }
}
