//! Provenance and confidence for the final envelope.

use std::collections::HashMap;

use crate::models::{Candidate, ProvenanceEntry, ProvenanceRole, clamp_unit};

/// Weight of a supporting source relative to its own confidence.
const SECONDARY_WEIGHT_FACTOR: f64 = 0.5;

/// Normalizes a provenance identifier for de-duplication.
///
/// URLs lose their fragment, a leading `www.` and a trailing slash, and have
/// scheme and host lowercased; other identifiers are lowercased.
pub fn normalize_source_id(id: &str) -> String {
    let trimmed = id.trim();
    let Ok(url) = reqwest::Url::parse(trimmed) else {
        return trimmed.to_lowercase();
    };
    let Some(host) = url.host_str() else {
        return trimmed.to_lowercase();
    };
    if !matches!(url.scheme(), "http" | "https") {
        return trimmed.to_lowercase();
    }

    let host = host.strip_prefix("www.").unwrap_or(host);
    let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
    let path = url.path().trim_end_matches('/');
    let query = url.query().map(|q| format!("?{q}")).unwrap_or_default();
    format!("{}://{host}{port}{path}{query}", url.scheme())
}

/// Builds ordered, de-duplicated provenance.
///
/// The chosen candidate weighs 1.0; each supporting candidate weighs half its
/// confidence. Duplicates keep the heavier entry. Entries are sorted by weight,
/// with equal weights ordered knowledge base, web, generated.
pub fn build_provenance(chosen: &Candidate, supporting: &[Candidate]) -> Vec<ProvenanceEntry> {
    let mut entries: Vec<ProvenanceEntry> = Vec::with_capacity(supporting.len() + 1);
    let mut index: HashMap<String, usize> = HashMap::new();

    let primary = ProvenanceEntry::new(
        chosen.kind(),
        chosen.source_id(),
        ProvenanceRole::Primary,
        1.0,
    );
    let secondaries = supporting.iter().map(|c| {
        ProvenanceEntry::new(
            c.kind(),
            c.source_id(),
            ProvenanceRole::Secondary,
            SECONDARY_WEIGHT_FACTOR * c.confidence(),
        )
    });

    for entry in std::iter::once(primary).chain(secondaries) {
        let key = normalize_source_id(&entry.source_id);
        match index.get(&key).copied() {
            Some(i) => {
                if entry.weight > entries[i].weight {
                    entries[i] = entry;
                }
            }
            None => {
                index.insert(key, entries.len());
                entries.push(entry);
            }
        }
    }

    entries.sort_by(|a, b| {
        b.weight
            .total_cmp(&a.weight)
            .then(a.kind.stage_rank().cmp(&b.kind.stage_rank()))
    });
    entries
}

/// Aggregate confidence: the chosen candidate's own confidence, reduced by
/// `penalty` when a generated answer had no supporting context.
pub fn aggregate_confidence(chosen: &Candidate, without_context: bool, penalty: f64) -> f64 {
    let base = chosen.confidence();
    if without_context {
        clamp_unit(base * (1.0 - clamp_unit(penalty)))
    } else {
        base
    }
}
