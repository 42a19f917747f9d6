use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use pdf_qa_core::{
    AnswerGenerator, ChunkingOptions, Embedder, ExtractiveGenerator, FsDocumentStorage,
    HashingEmbedder, InMemoryIndex, LopdfExtractor, OllamaEmbedder, OllamaGenerator, QaCoordinator,
    QueryError,
};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-qa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Root folder holding one subfolder of PDFs per user.
    #[arg(long, env = "PDF_QA_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Ollama base URL used for embeddings and generation.
    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434")]
    ollama_url: String,

    /// Embedding model name.
    #[arg(long, env = "PDF_QA_EMBED_MODEL", default_value = "qwen2:0.5b")]
    embed_model: String,

    /// Vector dimension the embedding model produces.
    #[arg(long, env = "PDF_QA_EMBED_DIMENSIONS", default_value = "896")]
    embed_dimensions: usize,

    /// Generation model name.
    #[arg(long, env = "PDF_QA_GENERATE_MODEL", default_value = "qwen2:0.5b")]
    generate_model: String,

    /// Retrieved chunks passed to the generator per question.
    #[arg(long, default_value = "4")]
    top_k: usize,

    /// Chunk size budget in characters.
    #[arg(long, default_value = "1000")]
    chunk_max_chars: usize,

    /// Overlap between consecutive chunks in characters.
    #[arg(long, default_value = "150")]
    chunk_overlap_chars: usize,

    /// Timeout budget for embedding and generation calls, in seconds.
    #[arg(long, default_value = "120")]
    timeout_secs: u64,

    /// Run without a model backend: hashing embedder plus extractive
    /// answers.
    #[arg(long, default_value_t = false)]
    offline: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Copy a PDF into the user's document folder.
    Upload {
        #[arg(long)]
        user: String,
        /// Path of the PDF to upload.
        #[arg(long)]
        file: PathBuf,
    },
    /// List the PDFs currently stored for the user.
    List {
        #[arg(long)]
        user: String,
    },
    /// Delete one stored PDF.
    Delete {
        #[arg(long)]
        user: String,
        /// Stored file name, as printed by `list`.
        #[arg(long)]
        name: String,
    },
    /// Show the user's session state and active index metadata.
    Status {
        #[arg(long)]
        user: String,
    },
    /// Index the user's documents, then answer a single question.
    Ask {
        #[arg(long)]
        user: String,
        #[arg(long)]
        question: String,
    },
    /// Index the user's documents once, then answer questions
    /// interactively. `/reindex` rebuilds, `/quit` exits.
    Chat {
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        offline = cli.offline,
        "pdf-qa boot"
    );

    let storage = Arc::new(FsDocumentStorage::new(cli.data_dir.clone()));
    let extractor = Arc::new(LopdfExtractor);
    let index = Arc::new(InMemoryIndex);
    let options = ChunkingOptions {
        max_chars: cli.chunk_max_chars,
        overlap_chars: cli.chunk_overlap_chars,
        ..ChunkingOptions::default()
    };

    if cli.offline {
        let coordinator = QaCoordinator::new(
            storage,
            extractor,
            index,
            HashingEmbedder::default(),
            ExtractiveGenerator,
        )
        .with_options(options)
        .with_top_k(cli.top_k);
        run_command(cli.command, coordinator).await
    } else {
        let timeout = Duration::from_secs(cli.timeout_secs);
        let embedder = OllamaEmbedder::new(
            &cli.ollama_url,
            cli.embed_model.clone(),
            cli.embed_dimensions,
            timeout,
        )
        .context("failed to build embedding client")?;
        let generator = OllamaGenerator::new(&cli.ollama_url, cli.generate_model.clone(), timeout)
            .context("failed to build generation client")?;

        let coordinator = QaCoordinator::new(storage, extractor, index, embedder, generator)
            .with_options(options)
            .with_top_k(cli.top_k);
        run_command(cli.command, coordinator).await
    }
}

async fn run_command<E, G>(command: Command, coordinator: QaCoordinator<E, G>) -> anyhow::Result<()>
where
    E: Embedder,
    G: AnswerGenerator,
{
    match command {
        Command::Upload { user, file } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let name = file
                .file_name()
                .and_then(|name| name.to_str())
                .with_context(|| format!("path has no file name: {}", file.display()))?;

            let stored = coordinator.upload_document(&user, name, &bytes).await?;
            println!("uploaded {} for user {user}", stored.display());
        }
        Command::List { user } => {
            let documents = coordinator.list_documents(&user)?;
            if documents.is_empty() {
                println!("no documents stored for user {user}");
            }
            for name in documents {
                println!("{name}");
            }
        }
        Command::Delete { user, name } => {
            coordinator.delete_document(&user, &name).await?;
            println!("deleted {name} for user {user}");
        }
        Command::Status { user } => {
            let status = coordinator.session_status(&user).await;
            println!("state: {:?}", status.state);
            if let Some(generation_id) = status.generation_id {
                println!("generation: {generation_id}");
            }
            if let Some(built_at) = status.built_at {
                println!("built_at: {}", built_at.to_rfc3339());
            }
            if let Some(chunk_count) = status.chunk_count {
                println!("chunks: {chunk_count}");
            }
        }
        Command::Ask { user, question } => {
            index_and_log(&coordinator, &user).await?;
            let answer = coordinator.answer_question(&user, &question).await?;
            println!("{answer}");
        }
        Command::Chat { user } => {
            index_and_log(&coordinator, &user).await?;
            chat_loop(&coordinator, &user).await?;
        }
    }

    Ok(())
}

async fn index_and_log<E, G>(coordinator: &QaCoordinator<E, G>, user: &str) -> anyhow::Result<()>
where
    E: Embedder,
    G: AnswerGenerator,
{
    let report = coordinator.start_indexing(user).await?;

    for skipped in &report.skipped_files {
        warn!(user, file = %skipped, "skipped unreadable pdf");
    }
    info!(
        user,
        generation = %report.generation_id,
        documents = report.document_count,
        chunks = report.chunk_count,
        "index ready"
    );
    Ok(())
}

async fn chat_loop<E, G>(coordinator: &QaCoordinator<E, G>, user: &str) -> anyhow::Result<()>
where
    E: Embedder,
    G: AnswerGenerator,
{
    let stdin = std::io::stdin();
    loop {
        print!("{user}> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();

        match line {
            "" => continue,
            "/quit" => break,
            "/reindex" => {
                if let Err(error) = index_and_log(coordinator, user).await {
                    eprintln!("reindex failed: {error}");
                }
            }
            question => match coordinator.answer_question(user, question).await {
                Ok(answer) => println!("{answer}"),
                Err(error @ QueryError::IndexNotReady(_)) => {
                    eprintln!("{error}; use /reindex to rebuild");
                }
                Err(error) => eprintln!("{error}"),
            },
        }
    }

    Ok(())
}
