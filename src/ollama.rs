//! Async client for a local Ollama server: text generation, embeddings and
//! model listing, with transport retries.

mod client;

pub use client::{
    DEFAULT_MODEL, OllamaClient, OllamaClientBuilder, OllamaClientTrait, OllamaError,
    retry_with_backoff,
};
