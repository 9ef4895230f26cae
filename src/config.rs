//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory
//! (or an explicit `--config` path), then applies `NEXUS_WORK_DIR`,
//! `NEXUS_LOG_LEVEL`, `NEXUS_HTTP_BIND`, `DATABASE_URL` and `LLM_API_KEY`
//! env overrides. Secrets are never read from TOML.

use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;

/// HTTP channel configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Socket address to bind the HTTP listener to.
    pub bind: String,
}

/// Session registry configuration.
#[derive(Debug, Clone)]
pub struct SessionsConfig {
    /// Maximum number of session agents kept in memory (LRU beyond that).
    pub capacity: usize,
    /// How many trailing transcript entries are rendered into LLM prompts.
    pub context_turns: usize,
}

/// OpenAI / OpenAI-compatible provider configuration.
/// Populated from `[llm.openai]` in the TOML.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    /// Model name passed in the request body.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
}

/// LLM configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which provider is active (`"dummy"`, `"openai"`).
    /// Maps to `default` in `[llm]`.
    pub provider: String,
    pub openai: OpenAiConfig,
}

/// Host application launcher configuration (`[apps]`).
#[derive(Debug, Clone)]
pub struct AppsConfig {
    /// Master switch for the execute-application command.
    pub enabled: bool,
    /// Operating system (as in `std::env::consts::OS`) the mapped
    /// executables belong to. Any other host refuses to launch.
    pub permitted_os: String,
    /// Natural-language app name -> executable. Ordered for stable matching.
    pub map: BTreeMap<String, String>,
}

/// Fully-resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_name: String,
    /// Working directory for file-backed session memory (already expanded, no `~`).
    pub work_dir: PathBuf,
    pub log_level: String,
    pub http: HttpConfig,
    pub sessions: SessionsConfig,
    pub llm: LlmConfig,
    pub apps: AppsConfig,
    /// Durable store location from `DATABASE_URL`. `None` selects the
    /// file-backed memory store.
    pub database_url: Option<String>,
    /// API key from `LLM_API_KEY` — `None` for keyless providers.
    pub llm_api_key: Option<String>,
}

impl Config {
    /// Directory holding one JSON file per session for the file backend.
    pub fn sessions_dir(&self) -> PathBuf {
        self.work_dir.join("sessions")
    }
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawConfig {
    server: RawServer,
    #[serde(default)]
    http: RawHttp,
    #[serde(default)]
    sessions: RawSessions,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    apps: RawApps,
}

#[derive(Deserialize)]
struct RawServer {
    bot_name: String,
    work_dir: String,
    #[serde(default = "default_log_level")]
    log_level: String,
}

#[derive(Deserialize)]
struct RawHttp {
    #[serde(default = "default_http_bind")]
    bind: String,
}

impl Default for RawHttp {
    fn default() -> Self {
        Self { bind: default_http_bind() }
    }
}

#[derive(Deserialize)]
struct RawSessions {
    #[serde(default = "default_capacity")]
    capacity: usize,
    #[serde(default = "default_context_turns")]
    context_turns: usize,
}

impl Default for RawSessions {
    fn default() -> Self {
        Self { capacity: default_capacity(), context_turns: default_context_turns() }
    }
}

#[derive(Deserialize)]
struct RawLlm {
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default)]
    openai: RawOpenAiConfig,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self { provider: default_llm_provider(), openai: RawOpenAiConfig::default() }
    }
}

#[derive(Deserialize)]
struct RawOpenAiConfig {
    #[serde(default = "default_openai_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_openai_model")]
    model: String,
    #[serde(default = "default_openai_temperature")]
    temperature: f32,
    #[serde(default = "default_openai_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawOpenAiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            model: default_openai_model(),
            temperature: default_openai_temperature(),
            timeout_seconds: default_openai_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawApps {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_permitted_os")]
    permitted_os: String,
    #[serde(default = "default_app_map")]
    map: BTreeMap<String, String>,
}

impl Default for RawApps {
    fn default() -> Self {
        Self {
            enabled: true,
            permitted_os: default_permitted_os(),
            map: default_app_map(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_http_bind() -> String { "0.0.0.0:5000".to_string() }
fn default_capacity() -> usize { 100 }
fn default_context_turns() -> usize { 6 }
fn default_llm_provider() -> String { "dummy".to_string() }
fn default_openai_api_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions".to_string()
}
fn default_openai_model() -> String { "gemini-1.5-flash".to_string() }
fn default_openai_temperature() -> f32 { 0.7 }
fn default_openai_timeout_seconds() -> u64 { 60 }
fn default_true() -> bool { true }
fn default_permitted_os() -> String { "windows".to_string() }

fn default_app_map() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("calculadora".to_string(), "calc.exe".to_string()),
        ("bloc de notas".to_string(), "notepad.exe".to_string()),
        ("explorador de archivos".to_string(), "explorer.exe".to_string()),
    ])
}

/// Env-sourced overrides. Tests build this directly instead of mutating env vars.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub work_dir: Option<String>,
    pub log_level: Option<String>,
    pub http_bind: Option<String>,
    pub database_url: Option<String>,
    pub llm_api_key: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        let non_empty = |name: &str| env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            work_dir: non_empty("NEXUS_WORK_DIR"),
            log_level: non_empty("NEXUS_LOG_LEVEL"),
            http_bind: non_empty("NEXUS_HTTP_BIND"),
            database_url: non_empty("DATABASE_URL"),
            llm_api_key: non_empty("LLM_API_KEY"),
        }
    }
}

/// Load config from `path` (default `config/default.toml`), then apply env overrides.
pub fn load(path: Option<&Path>) -> Result<Config, AppError> {
    load_from(
        path.unwrap_or_else(|| Path::new("config/default.toml")),
        Overrides::from_env(),
    )
}

/// Internal loader — accepts an explicit path and resolved overrides.
pub fn load_from(path: &Path, overrides: Overrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    parse(&raw, overrides)
        .map_err(|e| AppError::Config(format!("{} ({})", e, path.display())))
}

fn parse(raw: &str, overrides: Overrides) -> Result<Config, String> {
    let parsed: RawConfig = toml::from_str(raw).map_err(|e| format!("parse error: {e}"))?;

    let s = parsed.server;
    let work_dir = expand_home(overrides.work_dir.as_deref().unwrap_or(&s.work_dir));
    let log_level = overrides.log_level.unwrap_or(s.log_level);

    if parsed.sessions.capacity == 0 {
        return Err("[sessions] capacity must be at least 1".to_string());
    }

    Ok(Config {
        bot_name: s.bot_name,
        work_dir,
        log_level,
        http: HttpConfig {
            bind: overrides.http_bind.unwrap_or(parsed.http.bind),
        },
        sessions: SessionsConfig {
            capacity: parsed.sessions.capacity,
            context_turns: parsed.sessions.context_turns,
        },
        llm: LlmConfig {
            provider: parsed.llm.provider,
            openai: OpenAiConfig {
                api_base_url: parsed.llm.openai.api_base_url,
                model: parsed.llm.openai.model,
                temperature: parsed.llm.openai.temperature,
                timeout_seconds: parsed.llm.openai.timeout_seconds,
            },
        },
        apps: AppsConfig {
            enabled: parsed.apps.enabled,
            permitted_os: parsed.apps.permitted_os,
            map: parsed
                .apps
                .map
                .into_iter()
                .map(|(name, exe)| (name.to_lowercase(), exe))
                .collect(),
        },
        database_url: overrides.database_url,
        llm_api_key: overrides.llm_api_key,
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

impl Config {
    /// Safe `Config` for tests — dummy LLM, file-backed memory under
    /// `work_dir`, launcher bound to an OS that is never the test host.
    pub fn test_default(work_dir: &Path) -> Self {
        Self {
            bot_name: "test".into(),
            work_dir: work_dir.to_path_buf(),
            log_level: "info".into(),
            http: HttpConfig { bind: "127.0.0.1:0".into() },
            sessions: SessionsConfig { capacity: 100, context_turns: 6 },
            llm: LlmConfig {
                provider: "dummy".into(),
                openai: OpenAiConfig {
                    api_base_url: "http://127.0.0.1:9/v1/chat/completions".into(),
                    model: "test-model".into(),
                    temperature: 0.0,
                    timeout_seconds: 1,
                },
            },
            apps: AppsConfig {
                enabled: true,
                permitted_os: "none".into(),
                map: default_app_map(),
            },
            database_url: None,
            llm_api_key: None,
        }
    }
}
