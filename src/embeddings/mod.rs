// Embeddings module
// Wraps the external embedding model and fits its output to the index dimension

pub mod adapter;
pub mod ollama;

pub use adapter::{EMBEDDING_DIMENSION, Embedder, EmbeddingAdapter, fit_embedding};
pub use ollama::OllamaClient;
