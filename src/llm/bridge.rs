//! Conversation-facing wrapper around [`LlmProvider`].
//!
//! Builds the context-augmented prompt (session memory + recent transcript)
//! and applies the "never hard-fail a turn" policy: provider errors are
//! logged in full and replaced by [`FALLBACK_REPLY`].

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tracing::{debug, error};

use super::{LlmProvider, ProviderError, TextStream};
use crate::subsystems::memory::SessionMemory;

/// Reply used whenever the provider cannot be reached or fails mid-stream.
pub const FALLBACK_REPLY: &str =
    "Lo siento, parece que tengo problemas para contactar a mi cerebro externo en este momento.";

/// Prompt assembly + fallback policy over one shared provider.
#[derive(Debug, Clone)]
pub struct LlmBridge {
    provider: LlmProvider,
    context_turns: usize,
}

impl LlmBridge {
    pub fn new(provider: LlmProvider, context_turns: usize) -> Self {
        Self { provider, context_turns }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Render the full prompt for `utterance`.
    ///
    /// `history` is the transcript *before* the current utterance. Entries
    /// alternate user/assistant starting with the user at index 0; only the
    /// last `context_turns` entries are rendered.
    pub fn build_prompt(&self, memory: &SessionMemory, history: &[String], utterance: &str) -> String {
        let start = history.len().saturating_sub(self.context_turns);
        let turns = history[start..]
            .iter()
            .enumerate()
            .map(|(i, turn)| {
                let speaker = if (start + i) % 2 == 0 { "User" } else { "Assistant" };
                format!("{speaker}: {turn}")
            })
            .collect::<Vec<_>>()
            .join("\n");

        let assistant = non_empty_or(&memory.assistant_name, "IA");
        let user = non_empty_or(&memory.user_name, "desconocido");
        let facts = serde_json::to_string_pretty(&memory.learned_facts)
            .unwrap_or_else(|_| "{}".to_string());

        format!(
            "Eres una IA servicial y amigable llamada {assistant}.\n\
             El nombre de tu usuario es {user}.\n\
             Estos son algunos datos que has aprendido sobre el usuario y sus preferencias (en formato JSON): {facts}\n\
             Usa esta información para que tus respuestas suenen más personales, pero sin ser repetitivo.\n\
             Si tu respuesta incluye código, escríbelo dentro de bloques de código con triple comilla invertida (```), indicando el lenguaje.\n\
             A continuación se muestra el historial reciente de la conversación:\n\
             --- INICIO HISTORIAL ---\n\
             {turns}\n\
             --- FIN HISTORIAL ---\n\
             Basado en todo lo anterior, responde a la siguiente pregunta o comentario del usuario de forma natural y útil: \"{utterance}\""
        )
    }

    /// Blocking completion. Never fails: errors become [`FALLBACK_REPLY`].
    pub async fn complete(&self, prompt: &str) -> String {
        debug!(provider = self.provider.name(), "querying external model");
        match self.provider.complete(prompt).await {
            Ok(text) => text,
            Err(e) => {
                error!(provider = self.provider.name(), error = %e, "LLM completion failed");
                FALLBACK_REPLY.to_string()
            }
        }
    }

    /// Streamed completion. Fragments arrive in provider order; a failure
    /// (at start or mid-stream) yields [`FALLBACK_REPLY`] as the last
    /// fragment. Already-yielded fragments are not retracted. A stream that
    /// ends without any text also yields the fallback so every turn has a reply.
    pub fn stream(&self, prompt: String) -> BoxStream<'static, String> {
        let provider = self.provider.clone();
        async_stream::stream! {
            let started = provider.stream(&prompt).await;
            let mut fragments = with_fallback(provider.name(), started);
            while let Some(fragment) = fragments.next().await {
                yield fragment;
            }
        }
        .boxed()
    }
}

/// Apply the fallback policy to a provider stream (or its failure to start).
fn with_fallback(
    provider: &'static str,
    started: Result<TextStream, ProviderError>,
) -> BoxStream<'static, String> {
    async_stream::stream! {
        let mut inner = match started {
            Ok(s) => s,
            Err(e) => {
                error!(provider, error = %e, "LLM stream could not start");
                yield FALLBACK_REPLY.to_string();
                return;
            }
        };
        let mut produced = false;
        while let Some(item) = inner.next().await {
            match item {
                Ok(fragment) => {
                    produced = true;
                    yield fragment;
                }
                Err(e) => {
                    error!(provider, error = %e, "LLM stream failed");
                    yield FALLBACK_REPLY.to_string();
                    return;
                }
            }
        }
        if !produced {
            yield FALLBACK_REPLY.to_string();
        }
    }
    .boxed()
}

fn non_empty_or<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() { default } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::providers::sse_fixture::{self, Part};
    use crate::llm::providers::{dummy::DummyProvider, openai_compatible::OpenAiCompatibleProvider};
    use futures_util::stream;

    fn dummy_bridge(turns: usize) -> LlmBridge {
        LlmBridge::new(LlmProvider::Dummy(DummyProvider), turns)
    }

    fn unreachable_bridge() -> LlmBridge {
        let p = OpenAiCompatibleProvider::new(
            "http://127.0.0.1:9/v1/chat/completions".into(),
            "m".into(),
            0.0,
            1,
            None,
        )
        .unwrap();
        LlmBridge::new(LlmProvider::OpenAiCompatible(p), 6)
    }

    fn named_memory() -> SessionMemory {
        let mut m = SessionMemory::default();
        m.assistant_name = "Nova".into();
        m.user_name = "Ana".into();
        m.learned_facts.insert("color favorito".into(), "verde".into());
        m
    }

    #[test]
    fn prompt_carries_memory_and_utterance() {
        let prompt = dummy_bridge(6).build_prompt(&named_memory(), &[], "¿qué hora es?");
        assert!(prompt.contains("llamada Nova"));
        assert!(prompt.contains("usuario es Ana"));
        assert!(prompt.contains("\"color favorito\": \"verde\""));
        assert!(prompt.contains("```"));
        assert!(prompt.ends_with("\"¿qué hora es?\""));
    }

    #[test]
    fn prompt_defaults_for_blank_memory() {
        let prompt = dummy_bridge(6).build_prompt(&SessionMemory::default(), &[], "hola");
        assert!(prompt.contains("llamada IA"));
        assert!(prompt.contains("usuario es desconocido"));
    }

    #[test]
    fn prompt_keeps_last_turns_with_absolute_speaker_parity() {
        let history: Vec<String> = (0..9).map(|i| format!("t{i}")).collect();
        let prompt = dummy_bridge(6).build_prompt(&SessionMemory::default(), &history, "x");
        assert!(!prompt.contains("t2"));
        // t3 sits at an odd index, so it was an assistant turn.
        assert!(prompt.contains("Assistant: t3"));
        assert!(prompt.contains("User: t4"));
        assert!(prompt.contains("User: t8"));
    }

    #[tokio::test]
    async fn complete_falls_back_on_provider_error() {
        assert_eq!(unreachable_bridge().complete("hola").await, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn stream_falls_back_on_provider_error() {
        let fragments: Vec<String> = unreachable_bridge().stream("hola".into()).collect().await;
        assert_eq!(fragments, vec![FALLBACK_REPLY.to_string()]);
    }

    #[tokio::test]
    async fn stream_preserves_order() {
        let fragments: Vec<String> = dummy_bridge(6).stream("uno dos tres".into()).collect().await;
        assert_eq!(fragments, vec!["[echo] ", "uno ", "dos ", "tres"]);
    }

    fn scripted(items: Vec<Result<&'static str, ProviderError>>) -> Result<TextStream, ProviderError> {
        Ok(stream::iter(items.into_iter().map(|i| i.map(String::from))).boxed())
    }

    #[tokio::test]
    async fn mid_stream_failure_appends_fallback_after_sent_fragments() {
        let items = scripted(vec![Ok("a"), Ok("b"), Err(ProviderError::Stream("reset".into())), Ok("c")]);
        let fragments: Vec<String> = with_fallback("test", items).collect().await;
        assert_eq!(fragments, vec!["a", "b", FALLBACK_REPLY]);
    }

    #[tokio::test]
    async fn empty_stream_yields_fallback() {
        let fragments: Vec<String> = with_fallback("test", scripted(vec![])).collect().await;
        assert_eq!(fragments, vec![FALLBACK_REPLY]);
    }

    #[tokio::test]
    async fn dropped_connection_keeps_partial_reply() {
        let url = sse_fixture::serve(vec![
            Part::Bytes(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n"),
            Part::Bytes(b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\n"),
            Part::Abort,
        ])
        .await;
        let p = OpenAiCompatibleProvider::new(url, "m".into(), 0.0, 5, None).unwrap();
        let bridge = LlmBridge::new(LlmProvider::OpenAiCompatible(p), 6);

        let fragments: Vec<String> = bridge.stream("hola".into()).collect().await;
        assert_eq!(fragments, vec!["a", "b", FALLBACK_REPLY]);
    }
}
