//! LLM provider implementations.
//!
//! `build(config, api_key)` is the factory — called once at startup.
//! Adding a new backend = new module + new match arm.

pub mod dummy;
pub mod openai_compatible;
#[cfg(test)]
pub(crate) mod sse_fixture;

use crate::config::LlmConfig;
use crate::llm::{LlmProvider, ProviderError};

/// Construct a `LlmProvider` from config and an optional API key.
///
/// `api_key` is sourced from `LLM_API_KEY` env (never TOML). Hosted
/// providers refuse to build without one; local endpoints on `localhost`
/// or `127.0.0.1` are allowed keyless.
pub fn build(config: &LlmConfig, api_key: Option<String>) -> Result<LlmProvider, ProviderError> {
    match config.provider.as_str() {
        "dummy" => Ok(LlmProvider::Dummy(dummy::DummyProvider)),
        "openai" | "openai-compatible" => {
            let oai = &config.openai;
            if api_key.is_none() && !is_local_endpoint(&oai.api_base_url) {
                return Err(ProviderError::MissingApiKey(config.provider.clone()));
            }
            let p = openai_compatible::OpenAiCompatibleProvider::new(
                oai.api_base_url.clone(),
                oai.model.clone(),
                oai.temperature,
                oai.timeout_seconds,
                api_key,
            )?;
            Ok(LlmProvider::OpenAiCompatible(p))
        }
        _ => Err(ProviderError::UnknownProvider(config.provider.clone())),
    }
}

fn is_local_endpoint(url: &str) -> bool {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .unwrap_or(url);
    rest.starts_with("localhost") || rest.starts_with("127.0.0.1") || rest.starts_with("[::1]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn llm_config(provider: &str, url: &str) -> LlmConfig {
        let mut cfg = Config::test_default(std::path::Path::new("/tmp")).llm;
        cfg.provider = provider.into();
        cfg.openai.api_base_url = url.into();
        cfg
    }

    #[test]
    fn dummy_builds_without_key() {
        let p = build(&llm_config("dummy", ""), None).unwrap();
        assert_eq!(p.name(), "dummy");
    }

    #[test]
    fn hosted_openai_requires_key() {
        let cfg = llm_config("openai", "https://api.openai.com/v1/chat/completions");
        assert!(matches!(build(&cfg, None), Err(ProviderError::MissingApiKey(_))));
        assert!(build(&cfg, Some("sk-test".into())).is_ok());
    }

    #[test]
    fn local_openai_is_keyless() {
        let cfg = llm_config("openai", "http://localhost:11434/v1/chat/completions");
        assert_eq!(build(&cfg, None).unwrap().name(), "openai");
    }

    #[test]
    fn unknown_provider_errors() {
        let err = build(&llm_config("gemini-native", ""), None).unwrap_err();
        assert!(err.to_string().contains("gemini-native"));
    }
}
