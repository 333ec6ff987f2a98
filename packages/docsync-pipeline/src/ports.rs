//! Port traits for the ingestion pipeline.
//!
//! The sync strategy only ever talks to these traits. Production wires in a
//! real splitter, an embedding API client, a vector database and the
//! metadata store; tests wire in mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A single chunk produced by the splitter, in document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocChunk {
    pub content: String,
    pub chunk_index: usize,
    /// Heading breadcrumb ("Guide > Setup > Install"), when the splitter
    /// tracks document structure.
    pub title_chain: Option<String>,
}

/// A vector point ready for upsert into the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

/// A source document as the metadata store sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub collection_id: String,
    pub name: String,
    pub content: String,
    pub synced: bool,
}

/// Chunk bookkeeping row linking a vector point back to its document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub point_id: String,
    pub doc_id: String,
    pub chunk_index: usize,
}

/// Deterministic point id for a chunk. Re-running a sync overwrites the
/// same points instead of accumulating duplicates.
pub fn point_id(doc_id: &str, chunk_index: usize) -> String {
    format!("{doc_id}#{chunk_index}")
}

#[async_trait]
pub trait Splitter: Send + Sync {
    /// Split document text into ordered chunks. An empty result is valid
    /// for content that is all whitespace or markup.
    async fn split(&self, text: &str, doc_name: &str) -> Result<Vec<DocChunk>>;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts. Must return exactly one vector per input,
    /// in input order.
    async fn generate(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[async_trait]
pub trait VectorRepo: Send + Sync {
    /// Upsert points into the collection, replacing points with the same id.
    async fn upsert_collection(&self, collection_id: &str, points: Vec<Point>) -> Result<()>;
}

#[async_trait]
pub trait MetadataRepo: Send + Sync {
    async fn get_doc(&self, doc_id: &str) -> Result<Option<Document>>;

    /// Replace the chunk rows for a document with a fresh set.
    async fn add_chunks(&self, doc_id: &str, chunks: Vec<ChunkMeta>) -> Result<()>;

    async fn get_chunk_metas_by_doc_id(&self, doc_id: &str) -> Result<Vec<ChunkMeta>>;

    /// Texts for the given points, in input order, for re-embedding
    /// without re-splitting.
    async fn get_chunk_texts(&self, point_ids: &[String]) -> Result<Vec<String>>;

    async fn mark_doc_as_synced(&self, doc_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_is_stable() {
        assert_eq!(point_id("doc-1", 0), "doc-1#0");
        assert_eq!(point_id("doc-1", 12), "doc-1#12");
        assert_ne!(point_id("doc-1", 0), point_id("doc-2", 0));
    }
}
