//! Prompt assembly and grounded answer generation.

use super::types::{Answer, AnswerError, RetrievedChunk};
use crate::generation::{GenerationClient, GenerationRequest};
use std::time::Duration;

const INSTRUCTIONS: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.";

/// Build a "stuff" prompt: instructions, every retrieved chunk in ranking order, then the
/// question.
pub fn build_prompt(question: &str, retrieved: &[RetrievedChunk]) -> String {
    let context = retrieved
        .iter()
        .map(|chunk| chunk.text.trim())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "{INSTRUCTIONS}\n\n{context}\n\nQuestion: {question}\nHelpful Answer:",
        question = question.trim()
    )
}

/// Answer `question` from `retrieved` context using the supplied language model.
///
/// An empty context is rejected before the model is called. The model call is bounded by
/// `timeout`; dropping the in-flight request on expiry has no other side effects.
pub async fn answer(
    question: &str,
    retrieved: Vec<RetrievedChunk>,
    generator: &dyn GenerationClient,
    timeout: Duration,
) -> Result<Answer, AnswerError> {
    if retrieved.is_empty() {
        return Err(AnswerError::NoContext);
    }

    let defaults = generator.defaults();
    let request = GenerationRequest {
        prompt: build_prompt(question, &retrieved),
        temperature: defaults.temperature,
        max_tokens: defaults.max_tokens,
    };
    tracing::debug!(
        context_chunks = retrieved.len(),
        prompt_chars = request.prompt.len(),
        "Generating answer"
    );

    let text = tokio::time::timeout(timeout, generator.generate(request))
        .await
        .map_err(|_| AnswerError::TimedOut(timeout))??;

    Ok(Answer {
        text: text.trim().to_string(),
        sources: retrieved,
    })
}
