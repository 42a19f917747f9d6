pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generator;
pub mod index;
pub mod loader;
pub mod models;
pub mod orchestrator;
pub mod storage;

pub use chunking::{chunk_document, validate_options, PAGE_SEPARATOR};
pub use embeddings::{Embedder, HashingEmbedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{EmbeddingFailure, GenerationFailure, IngestError, QueryError};
pub use extractor::{LopdfExtractor, PageText, PdfExtractor};
pub use generator::{
    build_prompt, render_context, AnswerGenerator, ExtractiveGenerator, OllamaGenerator,
    INSUFFICIENT_CONTEXT_SENTINEL,
};
pub use index::{InMemoryIndex, IndexHandle, VectorIndex};
pub use loader::{discover_pdf_files, load_pages, LoadReport, SkippedPdf};
pub use models::{
    ChunkingOptions, DocumentChunk, IndexEntry, IndexReport, PageRecord, ScoredChunk,
    SessionState, SessionStatus,
};
pub use orchestrator::{IndexGeneration, QaCoordinator, DEFAULT_TOP_K};
pub use storage::{DocumentStorage, FsDocumentStorage};
