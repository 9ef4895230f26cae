//! Local application launcher for the "execute app" command.
//!
//! Launching is gated twice: the `[apps]` section must be enabled and the
//! server must be running on the configured `permitted_os`. Anywhere else the
//! command answers with a refusal and spawns nothing.

use std::collections::BTreeMap;
use std::io;
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use crate::config::AppsConfig;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct AppLauncher {
    enabled: bool,
    permitted_os: String,
    host_os: String,
    map: BTreeMap<String, String>,
}

/// Outcome of resolving an "ejecuta ..." argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launch {
    /// Launching is switched off in config.
    Disabled,
    /// Host OS is not the permitted one.
    UnsupportedHost { permitted_os: String },
    /// No configured app name appears in the argument.
    Unknown,
    Started { app_name: String },
    Failed { app_name: String },
}

impl AppLauncher {
    pub fn from_config(apps: &AppsConfig) -> Self {
        Self::with_host_os(apps, std::env::consts::OS)
    }

    pub fn with_host_os(apps: &AppsConfig, host_os: &str) -> Self {
        Self {
            enabled: apps.enabled,
            permitted_os: apps.permitted_os.to_lowercase(),
            host_os: host_os.to_lowercase(),
            map: apps.map.clone(),
        }
    }

    pub fn host_permitted(&self) -> bool {
        self.host_os == self.permitted_os
    }

    /// Resolve `request` against the app map and spawn the first match.
    pub fn launch(&self, request: &str) -> Launch {
        if !self.enabled {
            return Launch::Disabled;
        }
        if !self.host_permitted() {
            info!(host_os = %self.host_os, permitted_os = %self.permitted_os, "app launch refused on this host");
            return Launch::UnsupportedHost { permitted_os: self.permitted_os.clone() };
        }

        let Some((name, executable)) = self.map.iter().find(|(name, _)| request.contains(name.as_str()))
        else {
            return Launch::Unknown;
        };

        match spawn_detached(executable) {
            Ok(_reaper) => {
                info!(app = %name, %executable, "app launched");
                Launch::Started { app_name: name.clone() }
            }
            Err(e) => {
                warn!(app = %name, %executable, error = %e, "app launch failed");
                Launch::Failed { app_name: name.clone() }
            }
        }
    }
}

/// Start `executable` with null stdio. A background thread waits on the
/// child so it is reaped when it exits.
fn spawn_detached(executable: &str) -> Result<JoinHandle<io::Result<ExitStatus>>, AppError> {
    let mut child = Command::new(executable)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(AppError::Io)?;
    Ok(thread::spawn(move || child.wait()))
}
