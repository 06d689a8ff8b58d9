//! Summarization Seam
//!
//! The engine never talks to a language model directly; callers inject an
//! implementation of [`Summarizer`]. The merge path uses it to compress
//! over-budget descriptions, the report packer to turn a packed community
//! description into a structured report.

use async_trait::async_trait;
use thiserror::Error;

/// Errors from the injected summarizer.
#[derive(Debug, Error)]
pub enum SummarizeError {
    /// The model call itself failed (network, provider, timeout).
    #[error("summarizer call failed: {0}")]
    Call(String),

    /// The model answered but the output was unusable.
    #[error("summarizer output malformed: {0}")]
    Malformed(String),
}

/// External summarization capability.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize free text about one entity or relationship down to at most
    /// `max_tokens` tokens. `id` names the subject for prompt context.
    async fn summarize(
        &self,
        id: &str,
        text: &str,
        max_tokens: usize,
    ) -> Result<String, SummarizeError>;

    /// Produce a structured community report for a fully rendered prompt.
    /// The returned string must be JSON parsable into
    /// [`crate::domain::community::ReportJson`].
    async fn summarize_report(&self, prompt: &str) -> Result<String, SummarizeError>;
}
