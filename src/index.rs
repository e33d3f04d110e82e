//! In-memory vector index over embedded chunks.
//!
//! A [`VectorIndex`] is immutable once built: rebuilding produces a new value
//! which the index manager swaps in. Retrieval is a brute-force cosine scan,
//! which is fast enough for a corpus of a few thousand pages.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::chunk::chunk_document;
use crate::config::ChunkingConfig;
use crate::embedding::{cosine_similarity, Embedder};
use crate::error::{AssistantError, Result};
use crate::models::{Chunk, Document, Source};
use crate::progress::{BuildProgressEvent, BuildProgressReporter};

/// Identity and metadata of an indexed document. The text itself lives in
/// the document's chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    pub id: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    embedding_model: String,
    created_at: DateTime<Utc>,
    documents: Vec<IndexedDocument>,
    chunks: Vec<IndexedChunk>,
}

impl VectorIndex {
    /// Assemble an index from already embedded parts (used when loading a
    /// snapshot). All vectors must share one dimension.
    pub fn from_parts(
        embedding_model: String,
        created_at: DateTime<Utc>,
        documents: Vec<IndexedDocument>,
        chunks: Vec<IndexedChunk>,
    ) -> Result<Self> {
        check_dims(&chunks).map_err(|msg| AssistantError::persistence(anyhow::anyhow!(msg)))?;
        Ok(Self {
            embedding_model,
            created_at,
            documents,
            chunks,
        })
    }

    /// Chunk and embed `documents`.
    ///
    /// Embedding requests are sent `batch_size` chunks at a time. Any
    /// embedding failure aborts the build.
    pub async fn build(
        documents: &[Document],
        chunking: &ChunkingConfig,
        embedder: &dyn Embedder,
        batch_size: usize,
        progress: &dyn BuildProgressReporter,
    ) -> Result<Self> {
        let chunks: Vec<Chunk> = documents
            .iter()
            .flat_map(|doc| chunk_document(doc, chunking))
            .collect();
        progress.report(BuildProgressEvent::Chunked {
            documents: documents.len() as u64,
            chunks: chunks.len() as u64,
        });
        if chunks.is_empty() {
            return Err(AssistantError::configuration(
                "documents contain no indexable text",
            ));
        }

        let total = chunks.len() as u64;
        let mut indexed = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(AssistantError::external(anyhow::anyhow!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            indexed.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(vectors)
                    .map(|(chunk, vector)| IndexedChunk { chunk, vector }),
            );
            progress.report(BuildProgressEvent::Embedding {
                n: indexed.len() as u64,
                total,
            });
        }
        check_dims(&indexed).map_err(|msg| AssistantError::external(anyhow::anyhow!(msg)))?;

        let documents = documents
            .iter()
            .map(|d| IndexedDocument {
                id: d.id.clone(),
                metadata: d.metadata.clone(),
            })
            .collect::<Vec<_>>();

        info!(
            documents = documents.len(),
            chunks = indexed.len(),
            model = embedder.model_name(),
            "built vector index"
        );
        Ok(Self {
            embedding_model: embedder.model_name().to_string(),
            created_at: Utc::now(),
            documents,
            chunks: indexed,
        })
    }

    /// The `top_k` chunks most similar to `query`, best first.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<Source> {
        let mut scored: Vec<(f32, &IndexedChunk)> = self
            .chunks
            .iter()
            .map(|c| (cosine_similarity(query, &c.vector), c))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(top_k);
        debug!(
            candidates = self.chunks.len(),
            returned = scored.len(),
            "vector search"
        );

        scored
            .into_iter()
            .map(|(score, c)| Source {
                score,
                text: c.chunk.text.clone(),
                metadata: (!c.chunk.metadata.is_empty()).then(|| c.chunk.metadata.clone()),
            })
            .collect()
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn documents(&self) -> &[IndexedDocument] {
        &self.documents
    }

    pub fn chunks(&self) -> &[IndexedChunk] {
        &self.chunks
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Vector dimension, or 0 for an index without chunks.
    pub fn dims(&self) -> usize {
        self.chunks.first().map(|c| c.vector.len()).unwrap_or(0)
    }
}

fn check_dims(chunks: &[IndexedChunk]) -> std::result::Result<(), String> {
    let Some(first) = chunks.first() else {
        return Ok(());
    };
    let dims = first.vector.len();
    if dims == 0 {
        return Err("embedding vectors are empty".to_string());
    }
    match chunks.iter().find(|c| c.vector.len() != dims) {
        Some(bad) => Err(format!(
            "chunk {} has {} dimensions, expected {}",
            bad.chunk.id,
            bad.vector.len(),
            dims
        )),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Embeds by keyword presence so similarity is predictable.
    struct KeywordEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keyword"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    vec![
                        t.contains("memory") as u8 as f32,
                        t.contains("attention") as u8 as f32,
                        0.1,
                    ]
                })
                .collect())
        }
    }

    fn doc(id: &str, text: &str) -> Document {
        let mut metadata = BTreeMap::new();
        metadata.insert("file_name".to_string(), format!("{}.pdf", id));
        Document {
            id: id.to_string(),
            text: text.to_string(),
            metadata,
        }
    }

    async fn build(docs: &[Document], batch_size: usize) -> (VectorIndex, usize) {
        let embedder = KeywordEmbedder {
            calls: AtomicUsize::new(0),
        };
        let index = VectorIndex::build(
            docs,
            &ChunkingConfig::default(),
            &embedder,
            batch_size,
            &NoProgress,
        )
        .await
        .unwrap();
        (index, embedder.calls.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn search_ranks_by_similarity() {
        let docs = vec![
            doc("a", "Working memory capacity."),
            doc("b", "Selective attention filters input."),
            doc("c", "Unrelated text about weather."),
        ];
        let (index, _) = build(&docs, 8).await;
        assert_eq!(index.document_count(), 3);
        assert_eq!(index.chunk_count(), 3);
        assert_eq!(index.dims(), 3);

        let hits = index.search(&[0.0, 1.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert!(hits[0].text.contains("attention"));
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(hits[0].label(), "b.pdf");
    }

    #[tokio::test]
    async fn top_k_larger_than_index_returns_all() {
        let (index, _) = build(&[doc("a", "memory")], 8).await;
        assert_eq!(index.search(&[1.0, 0.0, 0.0], 10).len(), 1);
    }

    #[tokio::test]
    async fn embeds_in_batches() {
        let docs: Vec<_> = (0..5).map(|i| doc(&format!("d{}", i), "memory")).collect();
        let (index, calls) = build(&docs, 2).await;
        assert_eq!(index.chunk_count(), 5);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn no_text_is_a_configuration_error() {
        let embedder = KeywordEmbedder {
            calls: AtomicUsize::new(0),
        };
        let err = VectorIndex::build(
            &[doc("a", "   ")],
            &ChunkingConfig::default(),
            &embedder,
            4,
            &NoProgress,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AssistantError::Configuration(_)));
    }

    #[test]
    fn from_parts_rejects_mixed_dimensions() {
        let chunk = |id: &str, dims: usize| IndexedChunk {
            chunk: Chunk {
                id: id.to_string(),
                document_id: "d".to_string(),
                chunk_index: 0,
                text: "t".to_string(),
                hash: "h".to_string(),
                metadata: BTreeMap::new(),
            },
            vector: vec![1.0; dims],
        };
        let err = VectorIndex::from_parts(
            "m".to_string(),
            Utc::now(),
            Vec::new(),
            vec![chunk("a", 3), chunk("b", 4)],
        )
        .unwrap_err();
        assert!(matches!(err, AssistantError::Persistence(_)));
    }
}
