//! Knowledge base of previously solved problems.

mod embedder;
mod store;

pub use embedder::{Embedder, HashingEmbedder, OllamaEmbedder, cosine_similarity};
pub use store::{
    ImportSummary, KnowledgeBaseClient, KnowledgeHit, NewSolution, SolutionStore, StoredSolution,
};
