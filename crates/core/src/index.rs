use crate::error::{IngestError, QueryError};
use crate::models::{IndexEntry, ScoredChunk};
use async_trait::async_trait;
use std::sync::Arc;

/// A fully-built, immutable searchable index. Replacement happens by
/// building a new handle and swapping the reference, so a rebuild can
/// never leak entries from an earlier build.
pub trait IndexHandle: Send + Sync {
    /// Top `top_k` entries by descending similarity. Ties keep insertion
    /// order.
    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>, QueryError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `None` for an index built from zero entries.
    fn dimensions(&self) -> Option<usize>;
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn build(&self, entries: Vec<IndexEntry>) -> Result<Arc<dyn IndexHandle>, IngestError>;
}

/// Cosine-similarity index held entirely in memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryIndex;

struct InMemoryHandle {
    entries: Vec<IndexEntry>,
    norms: Vec<f32>,
    dimensions: Option<usize>,
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn build(&self, entries: Vec<IndexEntry>) -> Result<Arc<dyn IndexHandle>, IngestError> {
        let mut dimensions = None;
        for entry in &entries {
            match dimensions {
                None => dimensions = Some(entry.vector.len()),
                Some(expected) if entry.vector.len() != expected => {
                    return Err(IngestError::IndexBuild(format!(
                        "mixed embedding dimensions: {} and {}",
                        expected,
                        entry.vector.len()
                    )));
                }
                Some(_) => {}
            }
        }

        let norms = entries.iter().map(|entry| magnitude(&entry.vector)).collect();
        Ok(Arc::new(InMemoryHandle {
            entries,
            norms,
            dimensions,
        }))
    }
}

impl IndexHandle for InMemoryHandle {
    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>, QueryError> {
        if top_k == 0 {
            return Err(QueryError::InvalidArgument(
                "top_k must be positive".to_string(),
            ));
        }
        if let Some(expected) = self.dimensions {
            if query.len() != expected {
                return Err(QueryError::InvalidArgument(format!(
                    "query vector dimension {} does not match index dimension {}",
                    query.len(),
                    expected
                )));
            }
        }

        let query_norm = magnitude(query);
        let mut hits: Vec<ScoredChunk> = self
            .entries
            .iter()
            .zip(&self.norms)
            .map(|(entry, norm)| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine(&entry.vector, *norm, query, query_norm),
            })
            .collect();

        // Stable sort keeps insertion order on equal scores.
        hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }
}

fn magnitude(vector: &[f32]) -> f32 {
    vector.iter().map(|value| value * value).sum::<f32>().sqrt()
}

fn cosine(vector: &[f32], norm: f32, query: &[f32], query_norm: f32) -> f32 {
    if norm == 0.0 || query_norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = vector.iter().zip(query).map(|(a, b)| a * b).sum();
    dot / (norm * query_norm)
}
