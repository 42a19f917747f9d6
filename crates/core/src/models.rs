use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One page of extracted text joined with the identity of its source
/// document. Produced by the loader, consumed by the chunker; never stored.
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub document_id: String,
    pub document_title: String,
    pub source_path: String,
    pub page_number: u32,
    pub text: String,
}

/// A bounded text segment derived from one document, with enough source
/// metadata to cite it back to a page span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub document_title: String,
    pub source_path: String,
    pub page_start: u32,
    pub page_end: u32,
    pub chunk_index: u64,
    pub text: String,
}

/// Splitting parameters. Markers are tried in priority order; the first
/// marker found inside the size window wins over lower-priority ones.
#[derive(Debug, Clone)]
pub struct ChunkingOptions {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub boundary_markers: Vec<String>,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            max_chars: 1_000,
            overlap_chars: 150,
            boundary_markers: vec![
                "\n\n".to_string(),
                ".".to_string(),
                "!".to_string(),
                "?".to_string(),
            ],
        }
    }
}

/// An embedding vector paired with the chunk it was computed from.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub vector: Vec<f32>,
    pub chunk: DocumentChunk,
}

/// One search hit, scored by similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// Summary of one completed indexing run.
#[derive(Debug, Clone)]
pub struct IndexReport {
    pub generation_id: Uuid,
    pub built_at: DateTime<Utc>,
    pub document_count: usize,
    pub chunk_count: usize,
    pub skipped_files: Vec<String>,
}

/// Observable per-user lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Indexing,
    Ready,
    Stale,
}

/// Snapshot of a user's session: lifecycle state plus metadata of the
/// active index generation, if one exists.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: SessionState,
    pub generation_id: Option<Uuid>,
    pub built_at: Option<DateTime<Utc>>,
    pub chunk_count: Option<usize>,
}
