//! Service lifecycle for the ISC DHCP server.
//!
//! Every transition runs one privileged shell command, waits for it, and
//! then re-probes the service rather than trusting the command's exit code.
//! Transitions hold the state lock for their whole duration, so two
//! transitions never interleave their writes to the staged files.
//!
//! # States
//!
//! ```text
//! Unknown -> NotInstalled | Installed
//! Installed -> Stopped | Running
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::directive::{parse_config, render_config};
use crate::error::{Error, Result};
use crate::runner::{CommandOutput, CommandRunner};
use crate::service_default::{read_interfaces, render_lines, rewrite_interfaces};
use crate::settings::{Settings, SettingsEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Unknown,
    NotInstalled,
    /// Installed, run status not yet observed.
    Installed,
    Stopped,
    Running,
}

impl ServiceState {
    pub fn is_installed(self) -> bool {
        matches!(self, Self::Installed | Self::Stopped | Self::Running)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::NotInstalled => "not installed",
            Self::Installed => "installed",
            Self::Stopped => "stopped",
            Self::Running => "running",
        };
        f.write_str(name)
    }
}

/// Interprets `service <name> status` output.
///
/// The case-sensitive `start` and `stop` markers are checked first, in that
/// order, so `stop/waiting` is stopped and anything mentioning `start` is
/// running. Output with neither falls back to phrase matching
/// (`is not running`, `inactive (dead)`, `active (running)`). Capitalized
/// journal lines such as `Started ...` do not hit the first two rules.
pub fn classify_status(output: &str) -> Option<ServiceState> {
    if output.contains("start") {
        return Some(ServiceState::Running);
    }
    if output.contains("stop") {
        return Some(ServiceState::Stopped);
    }

    let lowered = output.to_lowercase();
    if ["not running", "inactive", "failed"]
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        Some(ServiceState::Stopped)
    } else if ["running", "active"]
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        Some(ServiceState::Running)
    } else {
        None
    }
}

/// Single-quotes a path for the shell unless it is plainly safe.
fn shell_quote(path: &Path) -> String {
    let text = path.to_string_lossy();
    let safe = text
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+'));
    if safe && !text.is_empty() {
        text.into_owned()
    } else {
        format!("'{}'", text.replace('\'', r"'\''"))
    }
}

/// Drives install/start/stop/restart and configuration application.
pub struct ServiceController {
    config: Arc<Config>,
    settings: Settings,
    runner: Arc<dyn CommandRunner>,
    state: Mutex<ServiceState>,
}

impl ServiceController {
    pub fn new(config: Arc<Config>, settings: Settings, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            settings,
            runner,
            state: Mutex::new(ServiceState::Unknown),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn state(&self) -> ServiceState {
        *self.state.lock().await
    }

    async fn ensure_unix(&self) -> Result<()> {
        if self.settings.os_is_unix().await {
            Ok(())
        } else {
            Err(Error::UnsupportedPlatform)
        }
    }

    async fn run(&self, command: String) -> Result<CommandOutput> {
        self.run_bounded(command, self.config.command_timeout()).await
    }

    async fn run_bounded(&self, command: String, limit: Option<Duration>) -> Result<CommandOutput> {
        let output = self.runner.run(&command, limit).await?;
        info!(
            command = %command,
            exit_code = ?output.exit_code,
            "{}",
            output.stdout.trim_end()
        );
        Ok(output)
    }

    /// Runs a command whose exit code is the only evidence it worked.
    async fn run_checked(&self, command: String) -> Result<CommandOutput> {
        let output = self.run(command.clone()).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(Error::CommandFailed {
                command,
                exit_code: output.exit_code,
            })
        }
    }

    fn service_command(&self, verb: &str) -> String {
        self.config
            .privileged(&format!("service {} {}", self.config.package_name, verb))
    }

    /// Sets the platform flags: Unix from the build target, root from `whoami`.
    pub async fn detect_platform(&self) -> Result<()> {
        let unix = cfg!(unix);
        info!("Host is {}a Unix system", if unix { "" } else { "not " });
        self.settings.set_os_is_unix(unix).await;
        if !unix {
            return Ok(());
        }

        let output = self.run("whoami".to_string()).await?;
        self.settings
            .set_user_is_su(output.stdout.trim() == "root")
            .await;
        Ok(())
    }

    /// Installed iff the package query reports `ok`.
    pub async fn probe_installed(&self) -> Result<ServiceState> {
        self.ensure_unix().await?;
        let mut state = self.state.lock().await;
        self.probe_installed_locked(&mut state).await
    }

    async fn probe_installed_locked(&self, state: &mut ServiceState) -> Result<ServiceState> {
        let installed = self.query_package(&self.config.package_name).await?;

        if installed {
            if !state.is_installed() {
                *state = ServiceState::Installed;
            }
        } else {
            *state = ServiceState::NotInstalled;
            self.settings.set_server_running(false).await;
        }
        self.settings.set_server_installed(installed).await;

        info!("{} is {}", self.config.package_name, state);
        Ok(*state)
    }

    async fn query_package(&self, package: &str) -> Result<bool> {
        let output = self
            .run(format!(
                "dpkg-query -s {} | head -n2 | tail -n1 | cut -f3 -d' '",
                package
            ))
            .await?;
        Ok(output.stdout.contains("ok"))
    }

    /// Whether the privilege helper package (e.g. `gksu`) is installed.
    pub async fn probe_privilege_helper(&self) -> Result<bool> {
        self.ensure_unix().await?;
        self.query_package(&self.config.privilege_helper_package)
            .await
    }

    pub async fn install(&self) -> Result<ServiceState> {
        self.ensure_unix().await?;
        let mut state = self.state.lock().await;
        if *state != ServiceState::NotInstalled {
            return Err(Error::InvalidTransition {
                operation: "install",
                state: *state,
            });
        }

        let command = self.config.privileged(&format!(
            "apt-get install -y {}",
            self.config.package_name
        ));
        let output = self
            .run_bounded(command, self.config.install_timeout())
            .await?;
        if !output.success() {
            warn!(exit_code = ?output.exit_code, "Package install reported failure");
        }

        self.probe_installed_locked(&mut state).await
    }

    /// Re-reads the run status.
    ///
    /// Unrecognized output sets the state to `Stopped` and returns
    /// [`Error::UnknownServiceStatus`] so the caller can surface it.
    pub async fn probe_status(&self) -> Result<ServiceState> {
        self.ensure_unix().await?;
        let mut state = self.state.lock().await;
        self.probe_status_locked(&mut state).await
    }

    async fn probe_status_locked(&self, state: &mut ServiceState) -> Result<ServiceState> {
        if !state.is_installed() {
            return Err(Error::InvalidTransition {
                operation: "probe status",
                state: *state,
            });
        }

        let output = self.run(self.service_command("status")).await?;
        match classify_status(&output.stdout) {
            Some(observed) => {
                *state = observed;
                self.settings
                    .set_server_running(observed == ServiceState::Running)
                    .await;
                Ok(observed)
            }
            None => {
                warn!("Unrecognized status output, assuming stopped");
                *state = ServiceState::Stopped;
                self.settings.set_server_running(false).await;
                Err(Error::UnknownServiceStatus(output.stdout.trim().to_string()))
            }
        }
    }

    /// Probes installation and, when installed, run status.
    pub async fn refresh(&self) -> Result<ServiceState> {
        self.ensure_unix().await?;
        let mut state = self.state.lock().await;
        if self.probe_installed_locked(&mut state).await?.is_installed() {
            self.probe_status_locked(&mut state).await
        } else {
            Ok(*state)
        }
    }

    pub async fn start(&self) -> Result<ServiceState> {
        self.ensure_unix().await?;
        let mut state = self.state.lock().await;
        self.service_verb_locked(&mut state, "start", ServiceState::Stopped)
            .await
    }

    pub async fn stop(&self) -> Result<ServiceState> {
        self.ensure_unix().await?;
        let mut state = self.state.lock().await;
        self.service_verb_locked(&mut state, "stop", ServiceState::Running)
            .await
    }

    pub async fn restart(&self) -> Result<ServiceState> {
        self.ensure_unix().await?;
        let mut state = self.state.lock().await;
        self.service_verb_locked(&mut state, "restart", ServiceState::Running)
            .await
    }

    async fn service_verb_locked(
        &self,
        state: &mut ServiceState,
        verb: &'static str,
        required: ServiceState,
    ) -> Result<ServiceState> {
        if *state != required {
            return Err(Error::InvalidTransition {
                operation: verb,
                state: *state,
            });
        }

        self.persist_locked().await?;

        let output = self.run(self.service_command(verb)).await?;
        if !output.success() {
            warn!(verb, exit_code = ?output.exit_code, "Service command reported failure");
        }

        self.probe_status_locked(state).await
    }

    /// Renders the settings to the staged file and moves it over the live config.
    pub async fn persist_live_config(&self) -> Result<()> {
        self.ensure_unix().await?;
        let _state = self.state.lock().await;
        self.persist_locked().await
    }

    async fn persist_locked(&self) -> Result<()> {
        let model = self.settings.snapshot().await;
        let staged = std::path::absolute(&self.config.staged_config_file)?;
        tokio::fs::write(&staged, render_config(&model)).await?;
        info!("Configuration staged at {}", staged.display());

        self.run_checked(self.config.privileged(&format!(
            "mv {} {}",
            shell_quote(&staged),
            shell_quote(&self.config.live_config_file)
        )))
        .await?;
        Ok(())
    }

    /// Installs the current settings and interface selection, restarting
    /// the service if it was running beforehand.
    pub async fn apply_configuration(&self) -> Result<ServiceState> {
        self.ensure_unix().await?;
        let mut state = self.state.lock().await;
        let prior = *state;

        self.persist_locked().await?;
        self.apply_selected_interface_locked(prior).await?;

        if prior == ServiceState::Running {
            self.service_verb_locked(&mut state, "restart", ServiceState::Running)
                .await
        } else {
            Ok(*state)
        }
    }

    /// Writes the selected interface into the service-default file,
    /// backing up the original first.
    pub async fn apply_selected_interface(&self) -> Result<()> {
        self.ensure_unix().await?;
        let state = self.state.lock().await;
        self.apply_selected_interface_locked(*state).await
    }

    async fn apply_selected_interface_locked(&self, state: ServiceState) -> Result<()> {
        if state == ServiceState::NotInstalled {
            return Err(Error::InvalidTransition {
                operation: "apply interface",
                state,
            });
        }

        let Some(interface) = self.settings.selected_interface().await else {
            warn!("No interface selected, leaving service defaults unchanged");
            return Ok(());
        };

        let default_file = &self.config.service_default_file;
        let content = self.read_required(default_file).await?;
        let lines = rewrite_interfaces(content.lines(), &interface);

        let staged = std::path::absolute(&self.config.staged_service_default_file)?;
        tokio::fs::write(&staged, render_lines(&lines)).await?;

        self.run_checked(self.config.privileged(&format!(
            "cp {} {}",
            shell_quote(default_file),
            shell_quote(&self.config.service_default_backup_file)
        )))
        .await?;
        self.run_checked(self.config.privileged(&format!(
            "mv {} {}",
            shell_quote(&staged),
            shell_quote(default_file)
        )))
        .await?;

        info!("Service bound to interface {}", interface);
        Ok(())
    }

    async fn read_required(&self, path: &Path) -> Result<String> {
        if !tokio::fs::try_exists(path).await? {
            return Err(Error::RequiredFileMissing(path.to_path_buf()));
        }
        Ok(tokio::fs::read_to_string(path).await?)
    }

    /// Selects the interface currently named in the service-default file.
    pub async fn load_selected_interface(&self) -> Result<Option<String>> {
        self.ensure_unix().await?;
        let content = self.read_required(&self.config.service_default_file).await?;
        let interface = read_interfaces(&content);
        match &interface {
            Some(name) => self.settings.select_interface(name.clone()).await,
            None => warn!(
                "No INTERFACES entry in {}",
                self.config.service_default_file.display()
            ),
        }
        Ok(interface)
    }

    /// Parses a `dhcpd.conf` file into the settings.
    ///
    /// Returns the number of static leases loaded. A malformed file leaves
    /// the settings untouched.
    pub async fn load_settings_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let text = self.read_required(path).await?;

        let mut loaded = 0;
        self.settings
            .try_update(|model| {
                parse_config(&text, model)?;
                loaded = model.static_leases.len();
                Ok(SettingsEvent::ConfigurationLoaded(loaded))
            })
            .await?;

        info!("Loaded {} ({} static lease(s))", path.display(), loaded);
        Ok(loaded)
    }

    pub async fn save_settings_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let model = self.settings.snapshot().await;
        tokio::fs::write(path.as_ref(), render_config(&model)).await?;
        info!("File saved: {}", path.as_ref().display());
        Ok(())
    }

    /// Creates the leases file if dhcpd has not written one yet.
    pub async fn ensure_leases_file(&self) -> Result<PathBuf> {
        self.ensure_unix().await?;
        let path = self.config.leases_file.clone();
        if !tokio::fs::try_exists(&path).await? {
            self.run_checked(
                self.config
                    .privileged(&format!("touch {}", shell_quote(&path))),
            )
            .await?;
        }
        Ok(path)
    }
}
