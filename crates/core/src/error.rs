use thiserror::Error;

/// Failure talking to the embedding backend. Request timeouts surface as
/// `Http` through the client's timeout budget.
#[derive(Debug, Error)]
pub enum EmbeddingFailure {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding backend returned {status}: {details}")]
    Backend { status: u16, details: String },

    #[error("malformed embedding response: {0}")]
    MalformedResponse(String),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

/// Failure talking to the answer-generation backend.
#[derive(Debug, Error)]
pub enum GenerationFailure {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generation backend returned {status}: {details}")]
    Backend { status: u16, details: String },

    #[error("malformed generation response: {0}")]
    MalformedResponse(String),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot read document folder: {0}")]
    Load(String),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingFailure),

    #[error("index build failed: {0}")]
    IndexBuild(String),

    #[error("an indexing run is already in progress for user {0}")]
    IndexingInProgress(String),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no index is ready for user {0}; run indexing first")]
    IndexNotReady(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingFailure),

    #[error("answer generation failed: {0}")]
    Generation(#[from] GenerationFailure),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
