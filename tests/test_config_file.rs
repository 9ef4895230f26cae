//! The shipped `config/default.toml` stays loadable.

use std::path::Path;

use nexus_bot::config::{load_from, Overrides};

#[test]
fn test_default_toml_parses() {
    let config = load_from(Path::new("config/default.toml"), Overrides::default()).unwrap();
    assert_eq!(config.bot_name, "Nexus");
    assert_eq!(config.sessions.capacity, 100);
    assert_eq!(config.sessions.context_turns, 6);
    assert_eq!(config.llm.provider, "openai");
    assert_eq!(config.apps.permitted_os, "windows");
    assert_eq!(config.apps.map.get("calculadora").map(String::as_str), Some("calc.exe"));
    assert!(config.database_url.is_none());
    assert!(config.llm_api_key.is_none());
}

#[test]
fn test_default_toml_honours_overrides() {
    let overrides = Overrides {
        http_bind: Some("127.0.0.1:8080".into()),
        database_url: Some("sqlite://nexus.db".into()),
        ..Overrides::default()
    };
    let config = load_from(Path::new("config/default.toml"), overrides).unwrap();
    assert_eq!(config.http.bind, "127.0.0.1:8080");
    assert_eq!(config.database_url.as_deref(), Some("sqlite://nexus.db"));
}
