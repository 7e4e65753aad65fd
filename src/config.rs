//! Configuration loading and validation.
//!
//! Settings come from three layers, later layers winning:
//! built-in defaults, a TOML file (`{config_dir}/mathroute/config.toml` or
//! `--config`), and environment variables (a `.env` file is honoured by the
//! binary). Invalid values are rejected by [`AppConfig::validate`] before any
//! query is routed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What the guardrail does when its classifier cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailFallbackPolicy {
    /// Accept the query and mark the envelope as unvalidated.
    FailOpen,
    /// Reject the query.
    #[default]
    FailClosed,
}

impl FromStr for GuardrailFallbackPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "fail_open" => Ok(Self::FailOpen),
            "fail_closed" => Ok(Self::FailClosed),
            other => Err(ConfigError::UnknownValue {
                name: "guardrail_fallback_policy",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for GuardrailFallbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FailOpen => "fail_open",
            Self::FailClosed => "fail_closed",
        })
    }
}

/// Thresholds and policy constants used by the routing orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoutingPolicy {
    /// Minimum knowledge-base similarity for a stored solution to be used as-is.
    pub kb_threshold: f64,
    /// Minimum web score for a hit to be passed to the generator as context.
    pub web_threshold: f64,
    /// Fraction removed from the confidence of answers generated without context.
    pub generated_without_context_penalty: f64,
    pub guardrail_fallback_policy: GuardrailFallbackPolicy,
    /// Per-call timeout for every external capability.
    pub timeout_ms: u64,
    /// Number of knowledge-base matches requested per query.
    pub kb_top_k: usize,
    /// Maximum number of web hits forwarded as generator context.
    pub web_context_limit: usize,
    /// Confidence given to generated answers that carry no self-assessment.
    pub generated_default_confidence: f64,
    /// Minimum classifier score for a query to count as mathematical.
    pub min_math_score: f64,
    /// Longest accepted query, in characters.
    pub max_query_length: usize,
    /// Shortest answer the output guardrail lets through, in characters.
    pub min_answer_length: usize,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            kb_threshold: 0.80,
            web_threshold: 0.60,
            generated_without_context_penalty: 0.20,
            guardrail_fallback_policy: GuardrailFallbackPolicy::FailClosed,
            timeout_ms: 10_000,
            kb_top_k: 3,
            web_context_limit: 2,
            generated_default_confidence: 0.50,
            min_math_score: 0.50,
            max_query_length: 500,
            min_answer_length: 10,
        }
    }
}

impl RoutingPolicy {
    /// Returns the per-call timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Checks every threshold is within [0, 1] and every count is positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit_values = [
            ("kb_threshold", self.kb_threshold),
            ("web_threshold", self.web_threshold),
            (
                "generated_without_context_penalty",
                self.generated_without_context_penalty,
            ),
            ("generated_default_confidence", self.generated_default_confidence),
            ("min_math_score", self.min_math_score),
        ];
        for (name, value) in unit_values {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange { name, value });
            }
        }

        let positive_values = [
            ("timeout_ms", self.timeout_ms as usize),
            ("kb_top_k", self.kb_top_k),
            ("web_context_limit", self.web_context_limit),
            ("max_query_length", self.max_query_length),
        ];
        for (name, value) in positive_values {
            if value == 0 {
                return Err(ConfigError::Zero { name });
            }
        }

        Ok(())
    }
}

/// Which classifier backs the guardrail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    #[default]
    Keyword,
    Ollama,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardrailSettings {
    pub classifier: ClassifierKind,
}

/// Which embedder produces query and solution vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// Offline feature hashing; no model server needed.
    #[default]
    Hashing,
    Ollama,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    /// Vector size of the hashing embedder.
    pub dimensions: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hashing,
            dimensions: 384,
        }
    }
}

/// Ollama connection settings. Unset values fall back to `OLLAMA_HOST` and
/// `OLLAMA_MODEL`, then to built-in defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OllamaSettings {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub embedding_model: String,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            model: None,
            embedding_model: "nomic-embed-text".to_string(),
        }
    }
}

/// Web search providers. Providers without credentials are skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchSettings {
    pub perplexity_api_key: Option<String>,
    pub perplexity_model: String,
    pub tavily_api_key: Option<String>,
    /// Use the keyless DuckDuckGo instant-answer API as the last provider.
    pub duckduckgo: bool,
    pub max_results: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            perplexity_api_key: None,
            perplexity_model: "sonar".to_string(),
            tavily_api_key: None,
            duckduckgo: true,
            max_results: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseSettings {
    /// Overrides the platform data directory location.
    pub path: Option<PathBuf>,
}

/// Complete application configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub routing: RoutingPolicy,
    pub guardrail: GuardrailSettings,
    pub embedding: EmbeddingSettings,
    pub ollama: OllamaSettings,
    pub search: SearchSettings,
    pub database: DatabaseSettings,
}

impl AppConfig {
    /// Loads configuration from `path`, or from the default location when
    /// `path` is `None`, then applies environment overrides and validates.
    ///
    /// An explicit path must exist; a missing default file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(default) if default.exists() => Self::from_file(&default)?,
                _ => Self::default(),
            },
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML file without applying overrides or validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Applies environment-style overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("OLLAMA_HOST") {
            self.ollama.base_url = Some(value);
        }
        if let Some(value) = lookup("OLLAMA_MODEL") {
            self.ollama.model = Some(value);
        }
        if let Some(value) = lookup("TAVILY_API_KEY") {
            self.search.tavily_api_key = Some(value);
        }
        if let Some(value) = lookup("PERPLEXITY_API_KEY") {
            self.search.perplexity_api_key = Some(value);
        }
        if let Some(value) = lookup("MATHROUTE_KB_THRESHOLD") {
            self.routing.kb_threshold = parse_env("MATHROUTE_KB_THRESHOLD", &value)?;
        }
        if let Some(value) = lookup("MATHROUTE_WEB_THRESHOLD") {
            self.routing.web_threshold = parse_env("MATHROUTE_WEB_THRESHOLD", &value)?;
        }
        if let Some(value) = lookup("MATHROUTE_TIMEOUT_MS") {
            self.routing.timeout_ms = parse_env("MATHROUTE_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("MATHROUTE_GUARDRAIL_FALLBACK") {
            self.routing.guardrail_fallback_policy = value.parse()?;
        }
        Ok(())
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.routing.validate()?;
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Zero {
                name: "embedding.dimensions",
            });
        }
        if self.search.max_results == 0 {
            return Err(ConfigError::Zero {
                name: "search.max_results",
            });
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
    })
}

/// Returns `{config_dir}/mathroute/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mathroute").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.routing.kb_threshold, 0.80);
        assert_eq!(config.routing.web_threshold, 0.60);
        assert_eq!(
            config.routing.guardrail_fallback_policy,
            GuardrailFallbackPolicy::FailClosed
        );
    }

    #[test]
    fn threshold_above_one_is_rejected() {
        let mut policy = RoutingPolicy::default();
        policy.kb_threshold = 1.2;
        assert!(matches!(
            policy.validate(),
            Err(ConfigError::OutOfRange {
                name: "kb_threshold",
                ..
            })
        ));
    }

    #[test]
    fn nan_penalty_is_rejected() {
        let mut policy = RoutingPolicy::default();
        policy.generated_without_context_penalty = f64::NAN;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut policy = RoutingPolicy::default();
        policy.timeout_ms = 0;
        assert!(matches!(
            policy.validate(),
            Err(ConfigError::Zero { name: "timeout_ms" })
        ));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [routing]
            kb_threshold = 0.9
            guardrail_fallback_policy = "fail_open"

            [search]
            tavily_api_key = "tvly-test"
            "#,
        )
        .unwrap();

        assert_eq!(config.routing.kb_threshold, 0.9);
        assert_eq!(config.routing.web_threshold, 0.60);
        assert_eq!(
            config.routing.guardrail_fallback_policy,
            GuardrailFallbackPolicy::FailOpen
        );
        assert_eq!(config.search.tavily_api_key.as_deref(), Some("tvly-test"));
        assert!(config.search.duckduckgo);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: Result<AppConfig, _> = toml::from_str("[routing]\nkb_treshold = 0.9\n");
        assert!(result.is_err());
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("MATHROUTE_KB_THRESHOLD", "0.95"),
                ("MATHROUTE_TIMEOUT_MS", "2500"),
                ("MATHROUTE_GUARDRAIL_FALLBACK", "fail-open"),
                ("OLLAMA_HOST", "http://gpu-box:11434"),
            ]))
            .unwrap();

        assert_eq!(config.routing.kb_threshold, 0.95);
        assert_eq!(config.routing.timeout(), Duration::from_millis(2500));
        assert_eq!(
            config.routing.guardrail_fallback_policy,
            GuardrailFallbackPolicy::FailOpen
        );
        assert_eq!(config.ollama.base_url.as_deref(), Some("http://gpu-box:11434"));
    }

    #[test]
    fn malformed_override_is_a_config_error() {
        let mut config = AppConfig::default();
        let result = config.apply_overrides(lookup_from(&[("MATHROUTE_WEB_THRESHOLD", "high")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnv {
                var: "MATHROUTE_WEB_THRESHOLD",
                ..
            })
        ));
    }

    #[test]
    fn unknown_fallback_policy_is_rejected() {
        assert!("fail_sometimes".parse::<GuardrailFallbackPolicy>().is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = AppConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    #[serial]
    fn load_applies_process_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[routing]\nweb_threshold = 0.7\n").unwrap();

        unsafe {
            std::env::set_var("MATHROUTE_KB_THRESHOLD", "0.85");
        }
        let config = AppConfig::load(Some(&path));
        unsafe {
            std::env::remove_var("MATHROUTE_KB_THRESHOLD");
        }

        let config = config.unwrap();
        assert_eq!(config.routing.kb_threshold, 0.85);
        assert_eq!(config.routing.web_threshold, 0.7);
    }

    #[test]
    #[serial]
    fn load_rejects_out_of_range_environment_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();

        unsafe {
            std::env::set_var("MATHROUTE_WEB_THRESHOLD", "1.5");
        }
        let result = AppConfig::load(Some(&path));
        unsafe {
            std::env::remove_var("MATHROUTE_WEB_THRESHOLD");
        }

        assert!(matches!(result, Err(ConfigError::OutOfRange { .. })));
    }
}
