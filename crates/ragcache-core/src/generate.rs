//! Answer generation trait and prompt construction.

use anyhow::Result;
use async_trait::async_trait;

/// Returned when the generation service answers without any text part.
pub const FALLBACK_ANSWER: &str = "Could not generate an answer";

/// Separator placed between retrieved chunks in the prompt context.
pub const CONTEXT_SEPARATOR: &str = "\n---\n";

/// Default system instruction for grounded answers.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful and supportive assistant for the CSEC Dev Division.
Your answer should be concise and directly address the user's question using ONLY the provided context.

Follow these rules exactly:
1. If the provided context contains the answer, provide it directly.
2. For any question where the context does not contain the answer, reply with: 'I don't have that specific information in my current knowledge base.'
3. Keep your tone light and engaging.
4. If the message is a greeting, respond politely.";

/// Sends one stateless system + user prompt to a language model.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

/// Build the user message that grounds `question` in `context`.
pub fn user_prompt(context: &str, question: &str) -> String {
    format!(
        "Based on the following context, answer the user's question:\n\nContext:\n{context}\n\nUser Question: {question}"
    )
}
