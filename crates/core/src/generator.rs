use crate::error::GenerationFailure;
use crate::models::ScoredChunk;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::fmt::Write as _;
use std::time::Duration;
use url::Url;

/// Reply the model is instructed to give when the supplied context does not
/// contain the answer.
pub const INSUFFICIENT_CONTEXT_SENTINEL: &str = "I don't know";

/// Produces a natural-language answer constrained to the supplied context.
/// The constraint is a prompt contract on the backing model; callers are
/// responsible for passing only the retrieved top-k chunks.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(
        &self,
        question: &str,
        context: &[ScoredChunk],
    ) -> Result<String, GenerationFailure>;
}

/// Renders retrieved chunks as a citation-labelled context block.
pub fn render_context(context: &[ScoredChunk]) -> String {
    let mut block = String::new();
    for hit in context {
        let _ = writeln!(
            block,
            "[source: {} pages {}-{}]\n{}\n",
            hit.chunk.document_title, hit.chunk.page_start, hit.chunk.page_end, hit.chunk.text
        );
    }
    block
}

pub fn build_prompt(question: &str, context: &[ScoredChunk]) -> String {
    format!(
        "You are a helpful assistant with access to the following document context.\n\
         Answer the question based ONLY on this context. If the context doesn't have \
         the information, say \"{INSUFFICIENT_CONTEXT_SENTINEL}\".\n\n\
         Document Context:\n{context}\n\
         Question: {question}\n\n\
         Please provide a clear and concise answer in a few sentences.",
        context = render_context(context),
    )
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

/// Generator backed by an Ollama server's `/api/generate` endpoint.
pub struct OllamaGenerator {
    client: Client,
    endpoint: Url,
    model: String,
}

impl OllamaGenerator {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GenerationFailure> {
        let endpoint = Url::parse(base_url)?.join("api/generate")?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            model: model.into(),
        })
    }
}

#[async_trait]
impl AnswerGenerator for OllamaGenerator {
    async fn generate(
        &self,
        question: &str,
        context: &[ScoredChunk],
    ) -> Result<String, GenerationFailure> {
        let prompt = build_prompt(question, context);
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GenerationFailure::Backend {
                status: response.status().as_u16(),
                details: response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<body unavailable>".to_string()),
            });
        }

        let parsed: OllamaGenerateResponse = response.json().await?;
        let answer = parsed.response.trim().to_string();
        if answer.is_empty() {
            return Err(GenerationFailure::MalformedResponse(
                "backend returned an empty answer".to_string(),
            ));
        }
        Ok(answer)
    }
}

/// Offline generator: quotes the best-matching chunk instead of calling a
/// model. Useful for smoke runs without a backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtractiveGenerator;

#[async_trait]
impl AnswerGenerator for ExtractiveGenerator {
    async fn generate(
        &self,
        _question: &str,
        context: &[ScoredChunk],
    ) -> Result<String, GenerationFailure> {
        let Some(best) = context.first() else {
            return Ok(INSUFFICIENT_CONTEXT_SENTINEL.to_string());
        };
        Ok(format!(
            "From {} (pages {}-{}): {}",
            best.chunk.document_title, best.chunk.page_start, best.chunk.page_end, best.chunk.text
        ))
    }
}
