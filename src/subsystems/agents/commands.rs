//! Keyword command table and the text helpers the handlers use.
//!
//! Matching is plain substring containment over lowercased input: a
//! command fires when any of its phrases appears anywhere in the text,
//! mid-word included. The table is scanned in definition order, each
//! command's phrases in order, and the first hit wins.

use reqwest::Url;

/// Closed set of things an utterance can be routed to besides the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetAssistantName,
    SetUserName,
    GetUserName,
    RememberFact,
    RecallFact,
    OpenWebsite,
    GoogleSearch,
    ExecuteApp,
    Exit,
}

/// Ordered dispatch table. `ExecuteApp` is deliberately absent: it is
/// checked after the table via [`EXECUTE_KEYWORD`].
pub const COMMAND_TABLE: &[(Command, &[&str])] = &[
    (Command::SetUserName, &["mi nombre es"]),
    (Command::GetUserName, &["¿cómo me llamo?", "cómo me llamo", "cuál es mi nombre"]),
    (Command::RememberFact, &["recuerda que"]),
    (Command::RecallFact, &["qué sabes sobre", "recuérdame"]),
    (Command::OpenWebsite, &["abre", "inicia"]),
    (Command::GoogleSearch, &["busca en google"]),
    (Command::Exit, &["adiós", "hasta luego", "apágate"]),
];

pub const EXECUTE_KEYWORD: &str = "ejecuta";

/// Split points for "remember fact", highest priority first.
pub const FACT_CONNECTORS: &[&str] = &[" se encuentra en ", " está en ", " es ", " son "];

/// A routing decision: which command, and the phrase that triggered it
/// (`None` for the unnamed-assistant override, which consumes everything).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandMatch {
    pub command: Command,
    pub keyword: Option<&'static str>,
}

impl CommandMatch {
    /// Text following the trigger phrase, or the whole input when there is
    /// none. Later standalone occurrences of the command's own phrases are
    /// dropped too.
    pub fn argument(&self, text: &str) -> String {
        let Some(keyword) = self.keyword else {
            return text.to_string();
        };
        let rest = text.split_once(keyword).map(|(_, rest)| rest).unwrap_or("");
        keywords_of(self.command)
            .iter()
            .fold(rest.to_string(), |arg, phrase| strip_phrase(&arg, phrase))
    }
}

fn keywords_of(command: Command) -> &'static [&'static str] {
    if command == Command::ExecuteApp {
        return &[EXECUTE_KEYWORD];
    }
    COMMAND_TABLE
        .iter()
        .find(|(c, _)| *c == command)
        .map(|(_, keywords)| *keywords)
        .unwrap_or(&[])
}

/// Remove whole-word occurrences of `phrase`; "abre" inside "cabrera" stays.
fn strip_phrase(text: &str, phrase: &str) -> String {
    let needle = format!(" {phrase} ");
    let mut padded = format!(" {text} ");
    while let Some(pos) = padded.find(&needle) {
        padded.replace_range(pos..pos + needle.len(), " ");
    }
    padded[1..padded.len() - 1].to_string()
}

/// Resolve `text` (already lowercased) to at most one command.
///
/// While the assistant is unnamed every utterance sets the name.
pub fn find_command(assistant_named: bool, text: &str) -> Option<CommandMatch> {
    if !assistant_named {
        return Some(CommandMatch { command: Command::SetAssistantName, keyword: None });
    }

    for (command, keywords) in COMMAND_TABLE {
        if let Some(keyword) = keywords.iter().find(|k| text.contains(**k)) {
            return Some(CommandMatch { command: *command, keyword: Some(*keyword) });
        }
    }

    text.contains(EXECUTE_KEYWORD)
        .then_some(CommandMatch { command: Command::ExecuteApp, keyword: Some(EXECUTE_KEYWORD) })
}

/// First letter upper-case, the rest lower-case.
pub fn capitalize(s: &str) -> String {
    let mut chars = s.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Trim whitespace plus the sentence punctuation people wrap questions in.
pub fn clean(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || matches!(c, '¿' | '?' | '¡' | '!' | '.' | ',' | ';' | ':'))
}

/// Split a "remember fact" argument into `(key, value)` at the first
/// occurrence of the highest-priority connector present.
pub fn parse_fact(arg: &str) -> Option<(String, String)> {
    // Pad so a connector at either edge still has its surrounding spaces.
    let padded = format!(" {} ", arg.trim());
    let connector = FACT_CONNECTORS.iter().find(|c| padded.contains(**c))?;
    let (key, value) = padded.split_once(connector)?;
    let (key, value) = (clean(key), clean(value));
    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

/// Normalise a website argument into an absolute URL. Anything that is
/// not a single token is not an address.
pub fn website_url(arg: &str) -> Option<String> {
    let site = clean(arg);
    if site.is_empty() || site.contains(char::is_whitespace) {
        return None;
    }
    if site.contains("://") {
        Some(site.to_string())
    } else {
        Some(format!("https://{site}"))
    }
}

/// Google search URL for `term` (form-encoded, spaces as `+`).
pub fn search_url(term: &str) -> Option<String> {
    Url::parse_with_params("https://www.google.com/search", &[("q", term)])
        .ok()
        .map(String::from)
}
