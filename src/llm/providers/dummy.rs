//! Dummy LLM provider — echoes input back prefixed with `[echo]`.
//! Used for tests and keyless local runs.

use futures_util::stream;
use futures_util::StreamExt;

use crate::llm::{ProviderError, TextStream};

#[derive(Debug, Clone)]
pub struct DummyProvider;

impl DummyProvider {
    pub async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        Ok(format!("[echo] {prompt}"))
    }

    /// Streams the same echo text one word (with its trailing space) at a time.
    pub fn stream(&self, prompt: &str) -> TextStream {
        let text = format!("[echo] {prompt}");
        let fragments: Vec<Result<String, ProviderError>> = text
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        stream::iter(fragments).boxed()
    }
}
