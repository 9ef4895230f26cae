//! LLM provider abstraction and the conversation-facing bridge.
//!
//! `LlmProvider` is an enum over concrete provider implementations.
//! Add a new variant + module in `providers/` for each additional backend.
//!
//! Provider instances are shared immutable capabilities — clone them freely.
//! Errors stop here: [`bridge::LlmBridge`] turns every provider failure into
//! a fixed apologetic reply so a conversation turn never hard-fails.

pub mod bridge;
pub mod providers;

use futures_util::stream::BoxStream;
use thiserror::Error;

pub use bridge::{LlmBridge, FALLBACK_REPLY};

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider '{0}' requires LLM_API_KEY")]
    MissingApiKey(String),
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider stream failed: {0}")]
    Stream(String),
}

/// Fragments of a streamed completion, in arrival order.
pub type TextStream = BoxStream<'static, Result<String, ProviderError>>;

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available provider backends.
///
/// Enum dispatch avoids `dyn` trait objects and the `async-trait` dependency.
/// Adding a backend = new module + new variant + new `complete`/`stream` arm.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    Dummy(providers::dummy::DummyProvider),
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
}

impl LlmProvider {
    /// Send `prompt` to the provider and return its text reply.
    pub async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        match self {
            LlmProvider::Dummy(p) => p.complete(prompt).await,
            LlmProvider::OpenAiCompatible(p) => p.complete(prompt).await,
        }
    }

    /// Start a streamed completion. The returned stream is finite and
    /// cannot be restarted; an `Err` item ends it.
    pub async fn stream(&self, prompt: &str) -> Result<TextStream, ProviderError> {
        match self {
            LlmProvider::Dummy(p) => Ok(p.stream(prompt)),
            LlmProvider::OpenAiCompatible(p) => p.stream(prompt).await,
        }
    }

    /// Short backend name for logs and the info endpoint.
    pub fn name(&self) -> &'static str {
        match self {
            LlmProvider::Dummy(_) => "dummy",
            LlmProvider::OpenAiCompatible(_) => "openai",
        }
    }
}
