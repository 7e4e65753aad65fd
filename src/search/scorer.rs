use std::collections::HashSet;

use super::RawHit;
use crate::models::clamp_unit;

/// Math reference sites whose content is trusted by default.
pub const TRUSTED_DOMAINS: &[&str] = &[
    "wolframalpha.com",
    "mathworld.wolfram.com",
    "khanacademy.org",
    "brilliant.org",
    "math.stackexchange.com",
    "mathsisfun.com",
    "tutorial.math.lamar.edu",
    "openstax.org",
    "wikipedia.org",
];

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "the", "of", "for", "to", "in", "on", "is", "what", "how", "find", "me",
    "with", "by", "it", "this", "that", "please",
];

/// Assigns a confidence to a web result for a given query.
pub trait SourceScorer: Send + Sync {
    /// Returns a score in [0, 1].
    fn score(&self, query: &str, hit: &RawHit) -> f64;
}

/// Scores hits by domain trust and query-term overlap, blended with the
/// provider's own relevance score when it reports one.
#[derive(Debug, Default, Clone)]
pub struct DomainTrustScorer;

impl DomainTrustScorer {
    pub fn new() -> Self {
        Self
    }

    /// Trust of the hit's host: curated math sites 1.0, `.edu` 0.85, other 0.5,
    /// missing or unparsable URL 0.3.
    pub fn domain_trust(url: &str) -> f64 {
        let Some(host) = reqwest::Url::parse(url.trim())
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
        else {
            return 0.3;
        };

        let trusted = TRUSTED_DOMAINS
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")));
        if trusted {
            1.0
        } else if host.ends_with(".edu") {
            0.85
        } else {
            0.5
        }
    }

    /// Fraction of the query's content terms found in the title or snippet.
    pub fn term_overlap(query: &str, hit: &RawHit) -> f64 {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return 0.0;
        }
        let hit_text = format!("{} {}", hit.title, hit.snippet);
        let hit_terms = terms(&hit_text);
        let shared = query_terms.intersection(&hit_terms).count();
        shared as f64 / query_terms.len() as f64
    }
}

impl SourceScorer for DomainTrustScorer {
    fn score(&self, query: &str, hit: &RawHit) -> f64 {
        let trust = Self::domain_trust(&hit.url);
        let overlap = Self::term_overlap(query, hit);
        let score = match hit.provider_score {
            Some(provider) => 0.5 * clamp_unit(provider) + 0.3 * overlap + 0.2 * trust,
            None => 0.6 * overlap + 0.4 * trust,
        };
        clamp_unit(score)
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '^'))
        .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}
