use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Where the tool reads and writes, and how it talks to the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub staged_config_file: PathBuf,
    pub live_config_file: PathBuf,
    pub service_default_file: PathBuf,
    pub service_default_backup_file: PathBuf,
    pub staged_service_default_file: PathBuf,
    pub leases_file: PathBuf,
    pub package_name: String,
    /// Prefix for commands that need root, e.g. `gksudo` or `sudo`.
    pub privilege_command: Option<String>,
    pub privilege_helper_package: String,
    pub command_timeout_seconds: Option<u64>,
    /// Bound for `apt-get install`, which downloads packages and may sit
    /// behind a password prompt.
    #[serde(default = "default_install_timeout")]
    pub install_timeout_seconds: Option<u64>,
}

fn default_install_timeout() -> Option<u64> {
    Some(1800)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            staged_config_file: PathBuf::from("dhcpd.conf.staged"),
            live_config_file: PathBuf::from("/etc/dhcp/dhcpd.conf"),
            service_default_file: PathBuf::from("/etc/default/isc-dhcp-server"),
            service_default_backup_file: PathBuf::from("/etc/default/isc-dhcp-server.bak"),
            staged_service_default_file: PathBuf::from("isc-dhcp-server.staged"),
            leases_file: PathBuf::from("/var/lib/dhcp/dhcpd.leases"),
            package_name: "isc-dhcp-server".to_string(),
            privilege_command: Some("gksudo".to_string()),
            privilege_helper_package: "gksu".to_string(),
            command_timeout_seconds: Some(120),
            install_timeout_seconds: default_install_timeout(),
        }
    }
}

impl Config {
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let paths = [
            ("staged_config_file", &self.staged_config_file),
            ("live_config_file", &self.live_config_file),
            ("service_default_file", &self.service_default_file),
            ("service_default_backup_file", &self.service_default_backup_file),
            ("staged_service_default_file", &self.staged_service_default_file),
            ("leases_file", &self.leases_file),
        ];
        for (name, path) in paths {
            if path.as_os_str().is_empty() {
                return Err(Error::InvalidConfig(format!("{} must not be empty", name)));
            }
        }

        if self.service_default_file == self.service_default_backup_file {
            return Err(Error::InvalidConfig(
                "service_default_backup_file must differ from service_default_file".to_string(),
            ));
        }

        if self.package_name.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "package_name must not be empty".to_string(),
            ));
        }

        for (name, seconds) in [
            ("command_timeout_seconds", self.command_timeout_seconds),
            ("install_timeout_seconds", self.install_timeout_seconds),
        ] {
            if seconds == Some(0) {
                return Err(Error::InvalidConfig(format!("{} must be greater than 0", name)));
            }
        }

        Ok(())
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_seconds.map(Duration::from_secs)
    }

    pub fn install_timeout(&self) -> Option<Duration> {
        self.install_timeout_seconds.map(Duration::from_secs)
    }

    /// Prefixes `command` with the privilege helper, if one is configured.
    pub fn privileged(&self, command: &str) -> String {
        match self.privilege_command.as_deref().map(str::trim) {
            Some(prefix) if !prefix.is_empty() => format!("{} {}", prefix, command),
            _ => command.to_string(),
        }
    }
}
