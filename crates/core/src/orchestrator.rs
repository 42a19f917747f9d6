use crate::chunking::{chunk_document, validate_options};
use crate::embeddings::Embedder;
use crate::error::{IngestError, QueryError};
use crate::extractor::PdfExtractor;
use crate::generator::AnswerGenerator;
use crate::index::{IndexHandle, VectorIndex};
use crate::loader::load_pages;
use crate::models::{
    ChunkingOptions, DocumentChunk, IndexEntry, IndexReport, PageRecord, SessionState,
    SessionStatus,
};
use crate::storage::DocumentStorage;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const DEFAULT_TOP_K: usize = 4;

/// One fully-built index for one user. Immutable after construction;
/// activation replaces the whole `Arc`, so readers in flight keep a
/// consistent snapshot and never observe a partial build.
pub struct IndexGeneration {
    pub generation_id: Uuid,
    pub built_at: DateTime<Utc>,
    pub chunk_count: usize,
    handle: Arc<dyn IndexHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RestingState {
    Idle,
    Ready,
    Stale,
}

#[derive(Debug, Clone, Copy)]
enum Lifecycle {
    Resting(RestingState),
    /// A build is running. `previous` is the state to revert to when the
    /// build fails; a previous `Ready` generation keeps serving queries
    /// until the swap.
    Indexing { previous: RestingState },
}

struct UserSession {
    lifecycle: Lifecycle,
    active: Option<Arc<IndexGeneration>>,
}

impl Default for UserSession {
    fn default() -> Self {
        Self {
            lifecycle: Lifecycle::Resting(RestingState::Idle),
            active: None,
        }
    }
}

/// Wires loader, chunker, embedder, vector index, and generator into the
/// two-phase workflow: an index phase that atomically activates one
/// generation per user, and a query phase that answers strictly from the
/// active generation.
pub struct QaCoordinator<E, G>
where
    E: Embedder,
    G: AnswerGenerator,
{
    storage: Arc<dyn DocumentStorage>,
    extractor: Arc<dyn PdfExtractor>,
    index: Arc<dyn VectorIndex>,
    embedder: E,
    generator: G,
    options: ChunkingOptions,
    top_k: usize,
    sessions: RwLock<HashMap<String, UserSession>>,
}

impl<E, G> QaCoordinator<E, G>
where
    E: Embedder,
    G: AnswerGenerator,
{
    pub fn new(
        storage: Arc<dyn DocumentStorage>,
        extractor: Arc<dyn PdfExtractor>,
        index: Arc<dyn VectorIndex>,
        embedder: E,
        generator: G,
    ) -> Self {
        Self {
            storage,
            extractor,
            index,
            embedder,
            generator,
            options: ChunkingOptions::default(),
            top_k: DEFAULT_TOP_K,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_options(mut self, options: ChunkingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Builds a fresh index generation for the user and atomically makes
    /// it the active one. All-or-nothing: any failure leaves the previous
    /// state and generation untouched. A second call while a build is
    /// running is rejected with `IndexingInProgress`.
    pub async fn start_indexing(&self, user: &str) -> Result<IndexReport, IngestError> {
        self.begin_indexing(user).await?;

        // No session lock held across the build, so queries keep flowing
        // and other users stay unaffected.
        let outcome = self.build_generation(user).await;

        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(user.to_string()).or_default();
        match outcome {
            Ok((generation, report)) => {
                session.active = Some(Arc::new(generation));
                session.lifecycle = Lifecycle::Resting(RestingState::Ready);
                Ok(report)
            }
            Err(error) => {
                if let Lifecycle::Indexing { previous } = session.lifecycle {
                    session.lifecycle = Lifecycle::Resting(previous);
                }
                Err(error)
            }
        }
    }

    /// Answers a question from the user's active index generation.
    /// Requires a trusted generation: `Ready`, or a build in progress that
    /// started from `Ready` (the previous generation keeps serving until
    /// the new one lands).
    pub async fn answer_question(&self, user: &str, question: &str) -> Result<String, QueryError> {
        if question.trim().is_empty() {
            return Err(QueryError::InvalidArgument("question is empty".to_string()));
        }

        let generation = self.queryable_generation(user).await?;
        let query_vector = self.embedder.embed(question).await?;
        let hits = generation.handle.search(&query_vector, self.top_k)?;
        let answer = self.generator.generate(question, &hits).await?;
        Ok(answer)
    }

    /// Marks the user's active generation untrusted after an upload or
    /// delete. `Ready` becomes `Stale`; other states are left alone.
    pub async fn on_document_set_changed(&self, user: &str) {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(user) else {
            return;
        };
        if matches!(session.lifecycle, Lifecycle::Resting(RestingState::Ready)) {
            session.lifecycle = Lifecycle::Resting(RestingState::Stale);
        }
    }

    pub async fn upload_document(
        &self,
        user: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, IngestError> {
        let path = self.storage.save_document(user, name, bytes)?;
        self.on_document_set_changed(user).await;
        Ok(path)
    }

    pub async fn delete_document(&self, user: &str, name: &str) -> Result<(), IngestError> {
        self.storage.delete_document(user, name)?;
        self.on_document_set_changed(user).await;
        Ok(())
    }

    pub fn list_documents(&self, user: &str) -> Result<Vec<String>, IngestError> {
        self.storage.list_documents(user)
    }

    pub async fn session_status(&self, user: &str) -> SessionStatus {
        let sessions = self.sessions.read().await;
        let Some(session) = sessions.get(user) else {
            return SessionStatus {
                state: SessionState::Idle,
                generation_id: None,
                built_at: None,
                chunk_count: None,
            };
        };

        let state = match session.lifecycle {
            Lifecycle::Resting(RestingState::Idle) => SessionState::Idle,
            Lifecycle::Resting(RestingState::Ready) => SessionState::Ready,
            Lifecycle::Resting(RestingState::Stale) => SessionState::Stale,
            Lifecycle::Indexing { .. } => SessionState::Indexing,
        };
        SessionStatus {
            state,
            generation_id: session.active.as_ref().map(|g| g.generation_id),
            built_at: session.active.as_ref().map(|g| g.built_at),
            chunk_count: session.active.as_ref().map(|g| g.chunk_count),
        }
    }

    async fn begin_indexing(&self, user: &str) -> Result<(), IngestError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(user.to_string()).or_default();
        match session.lifecycle {
            Lifecycle::Indexing { .. } => Err(IngestError::IndexingInProgress(user.to_string())),
            Lifecycle::Resting(previous) => {
                session.lifecycle = Lifecycle::Indexing { previous };
                Ok(())
            }
        }
    }

    async fn build_generation(
        &self,
        user: &str,
    ) -> Result<(IndexGeneration, IndexReport), IngestError> {
        validate_options(&self.options)?;

        let folder = self.storage.user_dir(user);
        let load_report = load_pages(&folder, self.extractor.as_ref())?;

        let chunks = chunk_all(&load_report.pages, &self.options)?;
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        if vectors.len() != chunks.len() {
            return Err(IngestError::IndexBuild(format!(
                "embedding count {} does not match chunk count {}",
                vectors.len(),
                chunks.len()
            )));
        }

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry { vector, chunk })
            .collect();
        let chunk_count = entries.len();
        let handle = self.index.build(entries).await?;

        let generation = IndexGeneration {
            generation_id: Uuid::new_v4(),
            built_at: Utc::now(),
            chunk_count,
            handle,
        };
        let report = IndexReport {
            generation_id: generation.generation_id,
            built_at: generation.built_at,
            document_count: load_report.document_count,
            chunk_count,
            skipped_files: load_report
                .skipped
                .iter()
                .map(|skip| format!("{}: {}", skip.path.display(), skip.reason))
                .collect(),
        };
        Ok((generation, report))
    }

    async fn queryable_generation(&self, user: &str) -> Result<Arc<IndexGeneration>, QueryError> {
        let sessions = self.sessions.read().await;
        let Some(session) = sessions.get(user) else {
            return Err(QueryError::IndexNotReady(user.to_string()));
        };

        let trusted = matches!(
            session.lifecycle,
            Lifecycle::Resting(RestingState::Ready)
                | Lifecycle::Indexing {
                    previous: RestingState::Ready
                }
        );
        match (&session.active, trusted) {
            (Some(generation), true) => Ok(Arc::clone(generation)),
            _ => Err(QueryError::IndexNotReady(user.to_string())),
        }
    }
}

/// Chunks a loaded page sequence, one document at a time, with chunk
/// indices running across the whole set.
fn chunk_all(
    pages: &[PageRecord],
    options: &ChunkingOptions,
) -> Result<Vec<DocumentChunk>, IngestError> {
    let mut chunks = Vec::new();
    let mut index = 0u64;
    let mut start = 0usize;

    while start < pages.len() {
        let document_id = &pages[start].document_id;
        let end = pages[start..]
            .iter()
            .position(|page| &page.document_id != document_id)
            .map(|offset| start + offset)
            .unwrap_or(pages.len());

        let document_chunks = chunk_document(&pages[start..end], options, index)?;
        index = index.saturating_add(document_chunks.len() as u64);
        chunks.extend(document_chunks);
        start = end;
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::error::{EmbeddingFailure, GenerationFailure};
    use crate::extractor::PageText;
    use crate::generator::INSUFFICIENT_CONTEXT_SENTINEL;
    use crate::index::InMemoryIndex;
    use crate::models::ScoredChunk;
    use crate::storage::FsDocumentStorage;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::sync::Semaphore;

    /// Reads each "pdf" as plain text, one page per file.
    struct TextFileExtractor;

    impl PdfExtractor for TextFileExtractor {
        fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
            let text = std::fs::read_to_string(path)?;
            if text.trim().is_empty() {
                return Err(IngestError::PdfParse(format!(
                    "no readable text: {}",
                    path.display()
                )));
            }
            Ok(vec![PageText { number: 1, text }])
        }
    }

    /// Echoes the retrieved chunk texts so tests can see exactly which
    /// generation served the query.
    struct EchoGenerator;

    #[async_trait]
    impl AnswerGenerator for EchoGenerator {
        async fn generate(
            &self,
            _question: &str,
            context: &[ScoredChunk],
        ) -> Result<String, GenerationFailure> {
            if context.is_empty() {
                return Ok(INSUFFICIENT_CONTEXT_SENTINEL.to_string());
            }
            Ok(context
                .iter()
                .map(|hit| hit.chunk.text.clone())
                .collect::<Vec<_>>()
                .join(" | "))
        }
    }

    /// Delegates to the hashing embedder until the allowance runs out,
    /// then fails every call.
    struct FlakyEmbedder {
        inner: HashingEmbedder,
        allowance: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingFailure> {
            let before = self.allowance.fetch_update(
                Ordering::SeqCst,
                Ordering::SeqCst,
                |n| n.checked_sub(1),
            );
            if before.is_err() {
                return Err(EmbeddingFailure::MalformedResponse(
                    "embedding backend unreachable".to_string(),
                ));
            }
            self.inner.embed(text).await
        }
    }

    /// Signals when an embed call starts, then blocks until released.
    struct GatedEmbedder {
        inner: HashingEmbedder,
        started: Arc<Semaphore>,
        release: Arc<Semaphore>,
    }

    #[async_trait]
    impl Embedder for GatedEmbedder {
        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingFailure> {
            self.started.add_permits(1);
            let permit = self.release.acquire().await.expect("release semaphore");
            permit.forget();
            self.inner.embed(text).await
        }
    }

    fn coordinator_in(
        dir: &TempDir,
    ) -> QaCoordinator<HashingEmbedder, EchoGenerator> {
        QaCoordinator::new(
            Arc::new(FsDocumentStorage::new(dir.path())),
            Arc::new(TextFileExtractor),
            Arc::new(InMemoryIndex),
            HashingEmbedder::default(),
            EchoGenerator,
        )
    }

    #[tokio::test]
    async fn asking_before_any_index_fails_with_not_ready() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator_in(&dir);

        let result = coordinator.answer_question("alice", "what is this?").await;
        assert!(matches!(result, Err(QueryError::IndexNotReady(_))));
    }

    #[tokio::test]
    async fn empty_question_is_rejected() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator_in(&dir);

        let result = coordinator.answer_question("alice", "   ").await;
        assert!(matches!(result, Err(QueryError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn zero_documents_index_to_an_empty_ready_generation() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator_in(&dir);
        std::fs::create_dir_all(dir.path().join("alice")).unwrap();

        let report = coordinator.start_indexing("alice").await.unwrap();
        assert_eq!(report.chunk_count, 0);
        assert_eq!(report.document_count, 0);

        let status = coordinator.session_status("alice").await;
        assert_eq!(status.state, SessionState::Ready);

        let answer = coordinator
            .answer_question("alice", "anything in here?")
            .await
            .unwrap();
        assert_eq!(answer, INSUFFICIENT_CONTEXT_SENTINEL);
    }

    #[tokio::test]
    async fn missing_user_folder_fails_the_indexing_run() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator_in(&dir);

        let result = coordinator.start_indexing("nobody").await;
        assert!(matches!(result, Err(IngestError::Load(_))));

        let status = coordinator.session_status("nobody").await;
        assert_eq!(status.state, SessionState::Idle);
    }

    #[tokio::test]
    async fn indexed_documents_answer_questions_from_their_content() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator_in(&dir);

        coordinator
            .upload_document("alice", "pumps.pdf", b"the pump pressure limit is 90 psi")
            .await
            .unwrap();
        let report = coordinator.start_indexing("alice").await.unwrap();
        assert_eq!(report.document_count, 1);
        assert!(report.chunk_count >= 1);

        let answer = coordinator
            .answer_question("alice", "pump pressure limit")
            .await
            .unwrap();
        assert!(answer.contains("90 psi"));
    }

    #[tokio::test]
    async fn document_change_marks_the_session_stale_and_blocks_queries() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator_in(&dir);

        coordinator
            .upload_document("alice", "a.pdf", b"alpha content")
            .await
            .unwrap();
        coordinator.start_indexing("alice").await.unwrap();
        assert_eq!(
            coordinator.session_status("alice").await.state,
            SessionState::Ready
        );

        coordinator
            .upload_document("alice", "b.pdf", b"beta content")
            .await
            .unwrap();
        assert_eq!(
            coordinator.session_status("alice").await.state,
            SessionState::Stale
        );

        let result = coordinator.answer_question("alice", "alpha?").await;
        assert!(matches!(result, Err(QueryError::IndexNotReady(_))));

        // Re-indexing restores service and picks up the new document.
        coordinator.start_indexing("alice").await.unwrap();
        let answer = coordinator
            .answer_question("alice", "beta content")
            .await
            .unwrap();
        assert!(answer.contains("beta content"));
    }

    #[tokio::test]
    async fn rebuild_never_serves_chunks_from_a_prior_generation() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator_in(&dir);

        coordinator
            .upload_document("alice", "old.pdf", b"obsolete maintenance schedule")
            .await
            .unwrap();
        coordinator.start_indexing("alice").await.unwrap();
        let first = coordinator.session_status("alice").await.generation_id;

        coordinator.delete_document("alice", "old.pdf").await.unwrap();
        coordinator
            .upload_document("alice", "new.pdf", b"revised maintenance schedule")
            .await
            .unwrap();
        coordinator.start_indexing("alice").await.unwrap();
        let second = coordinator.session_status("alice").await.generation_id;
        assert_ne!(first, second);

        let answer = coordinator
            .answer_question("alice", "maintenance schedule")
            .await
            .unwrap();
        assert!(answer.contains("revised"));
        assert!(!answer.contains("obsolete"));
    }

    #[tokio::test]
    async fn embedding_failure_keeps_the_previous_generation_queryable() {
        let dir = TempDir::new().unwrap();
        let allowance = Arc::new(AtomicUsize::new(usize::MAX));
        let coordinator = QaCoordinator::new(
            Arc::new(FsDocumentStorage::new(dir.path())),
            Arc::new(TextFileExtractor),
            Arc::new(InMemoryIndex),
            FlakyEmbedder {
                inner: HashingEmbedder::default(),
                allowance: Arc::clone(&allowance),
            },
            EchoGenerator,
        );

        // Long enough for three chunks, so a partial allowance fails the
        // batch partway through.
        let body = "stable content ".repeat(150);
        coordinator
            .upload_document("alice", "a.pdf", body.as_bytes())
            .await
            .unwrap();
        let report = coordinator.start_indexing("alice").await.unwrap();
        assert!(report.chunk_count >= 3);
        let first = coordinator.session_status("alice").await.generation_id;

        allowance.store(1, Ordering::SeqCst);
        let result = coordinator.start_indexing("alice").await;
        assert!(matches!(result, Err(IngestError::Embedding(_))));

        let status = coordinator.session_status("alice").await;
        assert_eq!(status.state, SessionState::Ready);
        assert_eq!(status.generation_id, first);

        allowance.store(usize::MAX, Ordering::SeqCst);
        let answer = coordinator
            .answer_question("alice", "stable content")
            .await
            .unwrap();
        assert!(answer.contains("stable content"));
    }

    #[tokio::test]
    async fn concurrent_indexing_for_one_user_is_rejected() {
        let dir = TempDir::new().unwrap();
        let started = Arc::new(Semaphore::new(0));
        let release = Arc::new(Semaphore::new(0));
        let coordinator = Arc::new(QaCoordinator::new(
            Arc::new(FsDocumentStorage::new(dir.path())),
            Arc::new(TextFileExtractor),
            Arc::new(InMemoryIndex),
            GatedEmbedder {
                inner: HashingEmbedder::default(),
                started: Arc::clone(&started),
                release: Arc::clone(&release),
            },
            EchoGenerator,
        ));

        coordinator
            .upload_document("alice", "a.pdf", b"some content")
            .await
            .unwrap();

        let background = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.start_indexing("alice").await }
        });

        // Wait until the first run is inside the embedding phase.
        let permit = started.acquire().await.unwrap();
        permit.forget();

        let second = coordinator.start_indexing("alice").await;
        assert!(matches!(second, Err(IngestError::IndexingInProgress(_))));

        release.add_permits(64);
        let report = background.await.unwrap().unwrap();
        assert!(report.chunk_count >= 1);
        assert_eq!(
            coordinator.session_status("alice").await.state,
            SessionState::Ready
        );
    }

    #[tokio::test]
    async fn users_have_independent_sessions() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator_in(&dir);

        coordinator
            .upload_document("alice", "a.pdf", b"alice data")
            .await
            .unwrap();
        coordinator.start_indexing("alice").await.unwrap();

        let result = coordinator.answer_question("bob", "anything?").await;
        assert!(matches!(result, Err(QueryError::IndexNotReady(_))));

        let answer = coordinator
            .answer_question("alice", "alice data")
            .await
            .unwrap();
        assert!(answer.contains("alice data"));
    }

    #[tokio::test]
    async fn chunk_indices_run_across_documents() {
        let pages = vec![
            PageRecord {
                document_id: "doc-a".to_string(),
                document_title: "a.pdf".to_string(),
                source_path: "/tmp/a.pdf".to_string(),
                page_number: 1,
                text: "x".repeat(500),
            },
            PageRecord {
                document_id: "doc-b".to_string(),
                document_title: "b.pdf".to_string(),
                source_path: "/tmp/b.pdf".to_string(),
                page_number: 1,
                text: "y".repeat(500),
            },
        ];
        let options = ChunkingOptions {
            max_chars: 200,
            overlap_chars: 50,
            ..ChunkingOptions::default()
        };

        let chunks = chunk_all(&pages, &options).unwrap();
        for (position, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, position as u64);
        }
        assert!(chunks.iter().any(|chunk| chunk.document_id == "doc-a"));
        assert!(chunks.iter().any(|chunk| chunk.document_id == "doc-b"));
    }
}
