//! RAG orchestration: retrieve chunks, build the prompt, generate, cite.
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use docqa_core::{Error, Meta, Result, ScoredChunk, Settings};
use docqa_index::IndexManager;

use crate::generator::{Generator, LlmSettings, OpenAiGenerator};

pub const NO_RELEVANT_DOCUMENTS: &str = "No relevant documents found to answer this question.";

pub const PROMPT_TEMPLATE: &str = "Use the following pieces of context to answer the question at the end.
If you don't know the answer, just say that you don't know, don't try to make up an answer.

Context:
{context}

Question: {question}

Answer:";

/// Fill `PROMPT_TEMPLATE`. Placeholders inside `context` or `question` are left alone.
pub fn build_prompt(context: &str, question: &str) -> String {
    let (head, rest) = PROMPT_TEMPLATE.split_once("{context}").unwrap_or((PROMPT_TEMPLATE, ""));
    let (middle, tail) = rest.split_once("{question}").unwrap_or((rest, ""));
    format!("{head}{context}{middle}{question}{tail}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub content: String,
    pub metadata: Meta,
    pub score: f32,
}

impl From<ScoredChunk> for SourceDocument {
    fn from(s: ScoredChunk) -> Self {
        Self { content: s.chunk.text, metadata: s.chunk.metadata, score: s.score }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub answer: String,
    pub sources: Vec<SourceDocument>,
    pub success: bool,
    pub error: Option<String>,
}

impl AnswerResponse {
    fn failed(err: &Error) -> Self {
        let detail = err.to_string();
        Self {
            answer: format!("Error processing question: {detail}"),
            sources: Vec::new(),
            success: false,
            error: Some(detail),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RagOptions {
    pub k: usize,
    pub generation_timeout: Duration,
}

impl Default for RagOptions {
    fn default() -> Self {
        Self { k: 4, generation_timeout: Duration::from_secs(60) }
    }
}

impl RagOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self { k: settings.retrieval_k, generation_timeout: settings.generation_timeout() }
    }
}

pub struct RagEngine {
    index: Arc<IndexManager>,
    generator: Arc<dyn Generator>,
    options: RagOptions,
}

impl RagEngine {
    pub fn new(index: Arc<IndexManager>, generator: Arc<dyn Generator>, options: RagOptions) -> Self {
        Self { index, generator, options }
    }

    /// Engine backed by the OpenAI-compatible client; needs an API key.
    pub fn from_settings(settings: &Settings, index: Arc<IndexManager>) -> Result<Self> {
        let generator = OpenAiGenerator::new(LlmSettings::from_settings(settings))?;
        Ok(Self::new(index, Arc::new(generator), RagOptions::from_settings(settings)))
    }

    pub fn options(&self) -> &RagOptions { &self.options }

    pub fn generator(&self) -> &Arc<dyn Generator> { &self.generator }

    /// Answer `question` from the indexed documents.
    ///
    /// Retrieval problems are returned as errors. Generation problems are not:
    /// they come back as `success = false` with the detail in `error`.
    pub async fn answer(&self, question: &str) -> Result<AnswerResponse> {
        let hits = self.retrieve(question, self.options.k).await?;
        if hits.is_empty() {
            debug!("no chunks retrieved");
            return Ok(AnswerResponse {
                answer: NO_RELEVANT_DOCUMENTS.to_string(),
                sources: Vec::new(),
                success: true,
                error: None,
            });
        }

        let context = hits.iter().map(|h| h.chunk.text.as_str()).collect::<Vec<_>>().join("\n\n");
        let prompt = build_prompt(&context, question);
        let timeout = self.options.generation_timeout;
        let generated = tokio::time::timeout(timeout, self.generator.generate(&prompt)).await;

        let text = match generated {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(model = self.generator.model(), error = %e, "generation failed");
                return Ok(AnswerResponse::failed(&Error::from(e)));
            }
            Err(_) => {
                warn!(model = self.generator.model(), secs = timeout.as_secs_f64(), "generation timed out");
                return Ok(AnswerResponse::failed(&Error::Generation(format!(
                    "timed out after {:.1}s",
                    timeout.as_secs_f64()
                ))));
            }
        };
        info!(sources = hits.len(), model = self.generator.model(), "answered question");
        Ok(AnswerResponse {
            answer: text.trim().to_string(),
            sources: hits.into_iter().map(SourceDocument::from).collect(),
            success: true,
            error: None,
        })
    }

    /// Top `k` chunks for `question`, loading the saved index if needed.
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        ensure_loaded(&self.index).await?;
        self.index.search_with_scores(question, k).await
    }
}

/// `NotIndexed` when there is nothing to search; loads a saved index that is
/// not in memory yet.
pub(crate) async fn ensure_loaded(index: &IndexManager) -> Result<()> {
    if !index.is_ready().await {
        return Err(Error::NotIndexed);
    }
    if !index.is_loaded().await {
        index.load().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_has_context_then_question() {
        let p = build_prompt("alpha\n\nbeta", "What is alpha?");
        assert!(p.starts_with("Use the following pieces of context"));
        assert!(p.contains("Context:\nalpha\n\nbeta\n\nQuestion: What is alpha?\n\nAnswer:"));
        assert!(p.contains("don't try to make up an answer"));
    }

    #[test]
    fn placeholders_in_input_are_not_expanded() {
        let p = build_prompt("see {question}", "and {context}?");
        assert!(p.contains("Context:\nsee {question}\n"));
        assert!(p.contains("Question: and {context}?"));
    }
}
