//! Logging initialisation via tracing-subscriber.
//!
//! Call [`init`] once at startup, after the effective level is resolved
//! (CLI `-v` flags > `NEXUS_LOG_LEVEL` > config file).

use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Transport crates that are chatty at `debug`; capped unless `RUST_LOG`
/// names them explicitly.
const QUIET_DIRECTIVES: &[&str] = &["hyper=warn", "hyper_util=warn", "reqwest=info", "h2=warn"];

/// Initialise the global tracing subscriber.
///
/// `level` accepts standard level strings: `"error"`, `"warn"`, `"info"`,
/// `"debug"`, `"trace"`, or a full filter directive such as
/// `"nexus_bot=debug,tower_http=info"`.
///
/// If `prefer_level` is `true`, `level` takes precedence and `RUST_LOG` is only
/// used as a fallback when `level` is invalid. If `prefer_level` is `false`,
/// `RUST_LOG` takes precedence and `level` is the fallback.
pub fn init(level: &str, prefer_level: bool) -> Result<(), AppError> {
    let filter = build_filter(level, prefer_level)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))?;

    Ok(())
}

fn build_filter(level: &str, prefer_level: bool) -> Result<EnvFilter, AppError> {
    let from_level = || {
        let mut filter = EnvFilter::try_new(level)?;
        for directive in QUIET_DIRECTIVES {
            // Static strings above always parse.
            if let Ok(d) = directive.parse() {
                filter = filter.add_directive(d);
            }
        }
        Ok::<_, tracing_subscriber::filter::ParseError>(filter)
    };

    if prefer_level {
        match from_level() {
            Ok(filter) => Ok(filter),
            Err(level_err) => EnvFilter::try_from_default_env().map_err(|env_err| {
                AppError::Logger(format!(
                    "invalid log level '{level}': {level_err}; RUST_LOG parse failed: {env_err}"
                ))
            }),
        }
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| from_level())
            .map_err(|e| AppError::Logger(format!("invalid log level '{level}': {e}")))
    }
}

/// Map a `-v` count to a level name. `0` means "no CLI override".
pub fn level_from_verbosity(count: u8) -> Option<&'static str> {
    match count {
        0 => None,
        1 => Some("info"),
        2 => Some("debug"),
        _ => Some("trace"),
    }
}
