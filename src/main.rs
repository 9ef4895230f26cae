//! Nexus bot — HTTP service entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Parse CLI args, load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Open the session memory backend
//!   6. Build the LLM provider (a failure is kept and reported per session)
//!   7. Spawn Ctrl-C → shutdown signal watcher
//!   8. Serve HTTP until shutdown

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use nexus_bot::config;
use nexus_bot::error::AppError;
use nexus_bot::llm::{providers, LlmBridge};
use nexus_bot::logger;
use nexus_bot::subsystems::agents::apps::AppLauncher;
use nexus_bot::subsystems::agents::SessionRegistry;
use nexus_bot::subsystems::comms::{AxumChannel, AxumState, ServiceInfo};
use nexus_bot::subsystems::memory::MemoryStore;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();
    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_log_level, args.log_level.is_some())?;

    info!(
        bot_name = %config.bot_name,
        work_dir = %config.work_dir.display(),
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    let store = MemoryStore::from_config(&config)?;

    let llm = match providers::build(&config.llm, config.llm_api_key.clone()) {
        Ok(provider) => {
            info!(provider = provider.name(), "llm provider ready");
            Ok(Arc::new(LlmBridge::new(provider, config.sessions.context_turns)))
        }
        Err(e) => {
            error!(error = %e, "llm provider unavailable, sessions will fail until this is fixed");
            Err(e.to_string())
        }
    };
    let llm_provider = match &llm {
        Ok(bridge) => bridge.provider_name().to_string(),
        Err(_) => "unavailable".to_string(),
    };

    let launcher = Arc::new(AppLauncher::from_config(&config.apps));
    info!(
        enabled = config.apps.enabled,
        host_permitted = launcher.host_permitted(),
        "app launcher configured"
    );

    let registry = Arc::new(SessionRegistry::new(config.sessions.capacity, store.clone(), llm, launcher));
    let state = AxumState::new(
        registry,
        ServiceInfo {
            bot_name: config.bot_name.clone(),
            llm_provider,
            memory_backend: store.backend_name().to_string(),
        },
    );

    // Shared shutdown token — Ctrl-C cancels it.
    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received — initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    AxumChannel::new(config.http.bind.clone(), state).run(shutdown).await?;

    info!("shutdown complete");
    Ok(())
}

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<PathBuf>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: nexus-bot [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("  -v, -vv, -vvv              Increase logging verbosity");
                std::process::exit(0);
            }
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(PathBuf::from(path));
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => {}
        }
    }

    CliArgs { log_level: logger::level_from_verbosity(verbosity), config_path }
}
