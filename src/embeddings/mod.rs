// Embeddings module
// Chunking of loaded documents and the embedding provider seam

pub mod chunking;
pub mod ollama;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;

use crate::Result;

pub use chunking::{ChunkingConfig, DocumentChunk, TextChunker};
pub use ollama::OllamaClient;

/// Maps text to fixed-length vectors.
///
/// Every vector returned by one embedder must have the same length.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input, in input order
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}
