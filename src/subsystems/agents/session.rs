//! One session's conversational state and its "think and respond" turn.
//!
//! A turn appends the user utterance to the transcript, routes it through
//! the command table (or the LLM bridge), appends the reply and writes the
//! whole record back through [`MemoryStore`]. Blank input is answered with
//! an empty reply and leaves the transcript untouched.

use std::sync::Arc;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use crate::llm::LlmBridge;
use crate::subsystems::memory::{MemoryStore, SessionMemory, Transcript};

use super::apps::{AppLauncher, Launch};
use super::commands::{self, Command, CommandMatch};
use super::{Action, Reply};

/// Reply to an utterance that only contains the assistant's name.
fn name_only_greeting(name: &str) -> String {
    format!("¡Hola! Soy {name}. ¿Qué necesitas?")
}

/// What the request layer streams back for one turn.
pub enum Turn {
    /// Handled locally or by a command; sent as a single event.
    Complete(Reply),
    /// Model-routed reply, delivered fragment by fragment.
    Streaming(BoxStream<'static, StreamEvent>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Chunk(String),
    /// The reply has been appended to the transcript and saved.
    Done,
}

/// Where a non-empty utterance ends up after routing.
enum Plan {
    Reply(Reply),
    /// Ask the model this query.
    Model(String),
}

pub struct SessionAgent {
    session_id: String,
    memory: SessionMemory,
    transcript: Transcript,
    store: MemoryStore,
    llm: Arc<LlmBridge>,
    launcher: Arc<AppLauncher>,
}

impl SessionAgent {
    /// Build the agent for `session_id`, loading whatever the store has.
    pub async fn load(
        session_id: &str,
        store: MemoryStore,
        llm: Arc<LlmBridge>,
        launcher: Arc<AppLauncher>,
    ) -> Self {
        let record = store.load(session_id).await;
        Self {
            session_id: session_id.to_string(),
            memory: record.memory,
            transcript: record.transcript,
            store,
            llm,
            launcher,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn memory(&self) -> &SessionMemory {
        &self.memory
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    /// Greeting for the current memory. Never mutates anything.
    pub fn greet(&self) -> String {
        let m = &self.memory;
        match (m.is_named(), m.user_name.is_empty()) {
            (true, false) => format!(
                "¡Hola de nuevo, {}! Soy {} y estoy lista para ayudarte.",
                m.user_name, m.assistant_name
            ),
            (true, true) => format!(
                "¡Hola de nuevo! Soy {}. Estoy lista para ayudarte.",
                m.assistant_name
            ),
            (false, _) => {
                "Hola, soy tu nueva IA. Aún no tengo un nombre. Por favor, dime cómo quieres llamarme."
                    .to_string()
            }
        }
    }

    /// Full blocking turn.
    pub async fn respond(&mut self, text: &str) -> Reply {
        let text = normalise(text);
        if text.is_empty() {
            return Reply::silent();
        }

        self.transcript.push(text.clone());
        let reply = match self.plan(&text).await {
            Plan::Reply(reply) => reply,
            Plan::Model(query) => Reply::speech(self.ask_model(&query).await),
        };
        self.finish_turn(reply).await
    }

    /// Streaming turn. Takes the locked agent so the session stays
    /// serialised until the stream has been fully consumed and saved.
    /// Dropping the stream early skips the write of the partial reply.
    pub async fn respond_streaming(mut agent: OwnedMutexGuard<Self>, text: &str) -> Turn {
        let text = normalise(text);
        if text.is_empty() {
            return Turn::Complete(Reply::silent());
        }

        agent.transcript.push(text.clone());
        let query = match agent.plan(&text).await {
            Plan::Reply(reply) => return Turn::Complete(agent.finish_turn(reply).await),
            Plan::Model(query) => query,
        };

        let prompt = agent.prompt_for(&query);
        let mut fragments = agent.llm.stream(prompt);
        let events = async_stream::stream! {
            let mut full = String::new();
            while let Some(fragment) = fragments.next().await {
                full.push_str(&fragment);
                yield StreamEvent::Chunk(fragment);
            }
            agent.finish_turn(Reply::speech(full)).await;
            yield StreamEvent::Done;
        };
        Turn::Streaming(events.boxed())
    }

    async fn plan(&mut self, text: &str) -> Plan {
        match commands::find_command(self.memory.is_named(), text) {
            Some(matched) => {
                debug!(session_id = %self.session_id, command = ?matched.command, "command matched");
                Plan::Reply(self.run_command(matched, text).await)
            }
            None => self.activation(text),
        }
    }

    /// Fallback routing: an utterance addressed to the assistant by name has
    /// the name stripped; the bare name gets a local hello.
    fn activation(&self, text: &str) -> Plan {
        let name = self.memory.assistant_name.to_lowercase();
        match text.strip_prefix(name.as_str()) {
            Some(rest) if !name.is_empty() => {
                let rest = commands::clean(rest);
                if rest.is_empty() {
                    Plan::Reply(Reply::speech(name_only_greeting(&self.memory.assistant_name)))
                } else {
                    Plan::Model(rest.to_string())
                }
            }
            _ => Plan::Model(text.to_string()),
        }
    }

    async fn run_command(&mut self, matched: CommandMatch, text: &str) -> Reply {
        let arg = matched.argument(text);
        let arg = arg.as_str();
        match matched.command {
            Command::SetAssistantName => {
                let name = commands::capitalize(arg);
                info!(session_id = %self.session_id, assistant_name = %name, "assistant named");
                let reply = format!(
                    "¡Entendido! A partir de ahora mi nombre es {name}. ¿En qué puedo ayudarte?"
                );
                self.memory.assistant_name = name;
                Reply::speech(reply)
            }
            Command::SetUserName => {
                let name = commands::capitalize(commands::clean(arg));
                if name.is_empty() {
                    return Reply::speech("¿Cómo te llamas? Dime 'mi nombre es ...' para recordarlo.");
                }
                let reply = format!("¡Hola, {name}! Un placer conocerte. He guardado tu nombre.");
                self.memory.user_name = name;
                Reply::speech(reply)
            }
            Command::GetUserName => {
                if self.memory.user_name.is_empty() {
                    Reply::speech(
                        "Aún no me has dicho tu nombre. Puedes decir 'mi nombre es...' para que lo recuerde.",
                    )
                } else {
                    Reply::speech(format!("Te llamas {}, ¿verdad?", self.memory.user_name))
                }
            }
            Command::RememberFact => match commands::parse_fact(arg) {
                Some((key, value)) => {
                    let reply = format!("Entendido. He guardado que '{key}' es '{value}'.");
                    self.memory.learned_facts.insert(key, value);
                    Reply::speech(reply)
                }
                None => Reply::speech(
                    "Para que recuerde algo, por favor usa el formato: 'recuerda que [dato] es [valor]'.",
                ),
            },
            Command::RecallFact => {
                let key = commands::clean(arg);
                if key.is_empty() {
                    return Reply::speech("¿Sobre qué quieres que te recuerde algo?");
                }
                if let Some(value) = self.memory.learned_facts.get(key) {
                    return Reply::speech(format!("Recuerdo que {key} es {value}."));
                }
                let answer = self.ask_model(key).await;
                Reply::speech(format!(
                    "No tengo información específica sobre '{key}'. Le preguntaré a mi cerebro externo. {answer}"
                ))
            }
            Command::OpenWebsite => match commands::website_url(arg) {
                Some(url) => Reply {
                    speech: format!("Claro, abriendo {url}."),
                    action: Action::OpenUrl { url },
                },
                None => Reply::speech("¿Qué sitio web quieres que abra?"),
            },
            Command::GoogleSearch => {
                let term = commands::clean(arg);
                match commands::search_url(term).filter(|_| !term.is_empty()) {
                    Some(url) => Reply {
                        speech: format!("Buscando '{term}' en Google."),
                        action: Action::OpenUrl { url },
                    },
                    None => Reply::speech("¿Qué quieres que busque en Google?"),
                }
            }
            Command::ExecuteApp => self.execute_app(commands::clean(arg)),
            Command::Exit => {
                let speech = if self.memory.user_name.is_empty() {
                    "¡Hasta pronto!".to_string()
                } else {
                    format!("¡Hasta pronto, {}!", self.memory.user_name)
                };
                Reply { speech, action: Action::Exit }
            }
        }
    }

    fn execute_app(&self, request: &str) -> Reply {
        match self.launcher.launch(request) {
            Launch::Started { app_name } => Reply {
                speech: format!("Ejecutando {app_name} en el dispositivo servidor."),
                action: Action::ExecuteApp { app_name },
            },
            Launch::Failed { app_name } => {
                Reply::speech(format!("No pude ejecutar {app_name} en el dispositivo servidor."))
            }
            Launch::Unknown => Reply::speech(format!(
                "No sé cómo ejecutar '{request}'. Puedes enseñarme agregándolo a la configuración."
            )),
            Launch::UnsupportedHost { permitted_os } => Reply::speech(format!(
                "Lo siento, solo puedo ejecutar aplicaciones cuando el servidor corre en {permitted_os}."
            )),
            Launch::Disabled => {
                Reply::speech("Lo siento, la ejecución de aplicaciones está desactivada en este servidor.")
            }
        }
    }

    /// Prompt for `query`; history excludes the utterance of this turn.
    fn prompt_for(&self, query: &str) -> String {
        let history = &self.transcript[..self.transcript.len().saturating_sub(1)];
        self.llm.build_prompt(&self.memory, history, query)
    }

    async fn ask_model(&self, query: &str) -> String {
        let prompt = self.prompt_for(query);
        self.llm.complete(&prompt).await
    }

    /// Append the reply and write the session back.
    async fn finish_turn(&mut self, reply: Reply) -> Reply {
        if !reply.speech.is_empty() {
            self.transcript.push(reply.speech.clone());
        }
        self.store.save(&self.session_id, &self.memory, &self.transcript).await;
        reply
    }
}

fn normalise(text: &str) -> String {
    text.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;
    use tokio::sync::Mutex;

    use super::*;
    use crate::config::Config;
    use crate::llm::providers::dummy::DummyProvider;
    use crate::llm::{LlmProvider, FALLBACK_REPLY};
    use crate::subsystems::memory::stores::file::FileSessionStore;

    fn parts(dir: &TempDir) -> (MemoryStore, Arc<LlmBridge>, Arc<AppLauncher>) {
        let config = Config::test_default(dir.path());
        let store = MemoryStore::new(Arc::new(FileSessionStore::open(config.sessions_dir()).unwrap()));
        let llm = Arc::new(LlmBridge::new(LlmProvider::Dummy(DummyProvider), 6));
        let launcher = Arc::new(AppLauncher::from_config(&config.apps));
        (store, llm, launcher)
    }

    async fn agent(dir: &TempDir, id: &str) -> SessionAgent {
        let (store, llm, launcher) = parts(dir);
        SessionAgent::load(id, store, llm, launcher).await
    }

    async fn named_agent(dir: &TempDir) -> SessionAgent {
        let mut a = agent(dir, "s1").await;
        a.respond("nova").await;
        a
    }

    #[tokio::test]
    async fn unnamed_agent_takes_any_input_as_name() {
        let dir = TempDir::new().unwrap();
        let mut a = agent(&dir, "s1").await;
        let reply = a.respond("  ADIÓS amigo ").await;
        assert_eq!(a.memory().assistant_name, "Adiós amigo");
        assert!(reply.speech.contains("mi nombre es Adiós amigo"));
        assert_eq!(reply.action, Action::None);
    }

    #[tokio::test]
    async fn transcript_alternates_and_persists() {
        let dir = TempDir::new().unwrap();
        let mut a = named_agent(&dir).await;
        a.respond("Mi nombre es ana").await;
        assert_eq!(a.transcript().len(), 4);
        assert_eq!(a.transcript()[2], "mi nombre es ana");

        let reloaded = agent(&dir, "s1").await;
        assert_eq!(reloaded.memory().user_name, "Ana");
        assert_eq!(reloaded.transcript(), a.transcript());
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let dir = TempDir::new().unwrap();
        let mut a = named_agent(&dir).await;
        let before = a.transcript().to_vec();
        let reply = a.respond("   ").await;
        assert_eq!(reply, Reply::silent());
        assert_eq!(a.transcript(), before.as_slice());
    }

    #[tokio::test]
    async fn greet_is_pure() {
        let dir = TempDir::new().unwrap();
        let mut a = agent(&dir, "s1").await;
        assert!(a.greet().contains("Aún no tengo un nombre"));
        a.respond("nova").await;
        let first = a.greet();
        assert_eq!(first, a.greet());
        assert_eq!(a.transcript().len(), 2);
        a.respond("mi nombre es ana").await;
        assert!(a.greet().contains("Ana"));
    }

    #[tokio::test]
    async fn remember_then_recall_without_model() {
        let dir = TempDir::new().unwrap();
        let mut a = named_agent(&dir).await;
        a.respond("recuerda que el cielo es azul").await;
        assert_eq!(a.memory().learned_facts.get("el cielo").map(String::as_str), Some("azul"));

        let reply = a.respond("¿qué sabes sobre el cielo?").await;
        assert!(reply.speech.contains("azul"));
        assert!(!reply.speech.contains("[echo]"));
    }

    #[tokio::test]
    async fn remember_without_connector_hints() {
        let dir = TempDir::new().unwrap();
        let mut a = named_agent(&dir).await;
        let reply = a.respond("recuerda que nada").await;
        assert!(reply.speech.contains("recuerda que [dato] es [valor]"));
        assert!(a.memory().learned_facts.is_empty());
    }

    #[tokio::test]
    async fn recall_miss_asks_model_with_key() {
        let dir = TempDir::new().unwrap();
        let mut a = named_agent(&dir).await;
        let reply = a.respond("qué sabes sobre marte").await;
        assert!(reply.speech.starts_with("No tengo información específica sobre 'marte'"));
        assert!(reply.speech.contains("[echo]"));
        assert!(reply.speech.ends_with("\"marte\""));
    }

    #[tokio::test]
    async fn url_actions() {
        let dir = TempDir::new().unwrap();
        let mut a = named_agent(&dir).await;
        let reply = a.respond("por favor abre google.com").await;
        assert_eq!(reply.action, Action::OpenUrl { url: "https://google.com".into() });

        let reply = a.respond("busca en google gatos negros").await;
        assert_eq!(
            reply.action,
            Action::OpenUrl { url: "https://www.google.com/search?q=gatos+negros".into() }
        );
    }

    #[tokio::test]
    async fn website_with_spaces_is_not_opened() {
        let dir = TempDir::new().unwrap();
        let mut a = named_agent(&dir).await;
        let reply = a.respond("abre e inicia youtube.com").await;
        assert_eq!(reply.action, Action::None);
        assert_eq!(reply.speech, "¿Qué sitio web quieres que abra?");

        let reply = a.respond("abre youtube.com inicia").await;
        assert_eq!(reply.action, Action::OpenUrl { url: "https://youtube.com".into() });
    }

    #[tokio::test]
    async fn execute_refused_off_permitted_host() {
        let dir = TempDir::new().unwrap();
        let mut a = named_agent(&dir).await;
        let reply = a.respond("ejecuta calculadora").await;
        assert_eq!(reply.action, Action::None);
        assert!(reply.speech.starts_with("Lo siento"));
    }

    #[tokio::test]
    async fn exit_is_personalised() {
        let dir = TempDir::new().unwrap();
        let mut a = named_agent(&dir).await;
        assert_eq!(a.respond("adiós").await, Reply { speech: "¡Hasta pronto!".into(), action: Action::Exit });
        a.respond("mi nombre es ana").await;
        assert_eq!(a.respond("hasta luego").await.speech, "¡Hasta pronto, Ana!");
    }

    #[tokio::test]
    async fn name_activation() {
        let dir = TempDir::new().unwrap();
        let mut a = named_agent(&dir).await;
        assert_eq!(a.respond("Nova").await.speech, "¡Hola! Soy Nova. ¿Qué necesitas?");
        let reply = a.respond("nova, cuéntame un chiste").await;
        assert!(reply.speech.ends_with("\"cuéntame un chiste\""));
    }

    #[tokio::test]
    async fn streamed_reply_matches_transcript() {
        let dir = TempDir::new().unwrap();
        let shared = Arc::new(Mutex::new(named_agent(&dir).await));

        let turn = SessionAgent::respond_streaming(shared.clone().lock_owned().await, "cuéntame algo").await;
        let Turn::Streaming(stream) = turn else { panic!("expected a streamed turn") };
        let events: Vec<StreamEvent> = stream.collect().await;
        assert_eq!(events.last(), Some(&StreamEvent::Done));
        let joined: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Chunk(c) => Some(c.as_str()),
                StreamEvent::Done => None,
            })
            .collect();

        let agent = shared.lock().await;
        assert_eq!(agent.transcript().last(), Some(&joined));
        assert_ne!(joined, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn streamed_command_is_single_reply() {
        let dir = TempDir::new().unwrap();
        let shared = Arc::new(Mutex::new(named_agent(&dir).await));
        let turn = SessionAgent::respond_streaming(shared.clone().lock_owned().await, "adiós").await;
        let Turn::Complete(reply) = turn else { panic!("expected a complete turn") };
        assert_eq!(reply.action, Action::Exit);
        assert_eq!(shared.lock().await.transcript().len(), 4);
    }
}
