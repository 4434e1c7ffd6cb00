//! The settings model shared between the front end and the engine.
//!
//! [`SettingsModel`] is plain data. [`Settings`] is the cloneable handle every
//! component writes through: updates commit under a write lock, the lock is
//! released, and then each subscriber is called synchronously with a
//! [`SettingsEvent`] describing what changed.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Arc, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::leases::DhcpdLease;

/// A fixed hardware-address to IP binding from a `host { }` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticLease {
    /// 1-based position in the configuration file, assigned at parse time.
    pub id: String,
    pub device_name: String,
    pub mac_address: String,
    pub ip_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsModel {
    pub default_lease_time: u32,
    pub max_lease_time: u32,
    pub subnet: Option<Ipv4Addr>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub ip_range_start: Option<Ipv4Addr>,
    pub ip_range_end: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub primary_dns: Option<Ipv4Addr>,
    pub secondary_dns: Option<Ipv4Addr>,
    /// Emitted as the global `option subnet-mask`.
    pub host_subnet_mask: Option<Ipv4Addr>,
    pub static_leases: Vec<StaticLease>,
    /// Runtime leases keyed by hardware address.
    pub dhcpd_leases: HashMap<String, DhcpdLease>,
    pub selected_interface: Option<String>,
    pub is_dhcp_server_installed: bool,
    pub is_dhcp_server_running: bool,
    pub os_is_unix: bool,
    pub user_is_su: bool,
}

impl Default for SettingsModel {
    fn default() -> Self {
        Self {
            default_lease_time: 600,
            max_lease_time: 7200,
            subnet: None,
            subnet_mask: None,
            ip_range_start: None,
            ip_range_end: None,
            gateway: None,
            primary_dns: None,
            secondary_dns: None,
            host_subnet_mask: None,
            static_leases: Vec::new(),
            dhcpd_leases: HashMap::new(),
            selected_interface: None,
            is_dhcp_server_installed: false,
            is_dhcp_server_running: false,
            os_is_unix: false,
            user_is_su: false,
        }
    }
}

impl SettingsModel {
    /// Appends a static lease, assigning it the next sequential id.
    pub fn add_static_lease(
        &mut self,
        device_name: impl Into<String>,
        mac_address: impl Into<String>,
        ip_address: impl Into<String>,
    ) -> &StaticLease {
        let id = (self.static_leases.len() + 1).to_string();
        self.static_leases.push(StaticLease {
            id,
            device_name: device_name.into(),
            mac_address: mac_address.into(),
            ip_address: ip_address.into(),
        });
        &self.static_leases[self.static_leases.len() - 1]
    }
}

/// What a committed update changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsEvent {
    OsIsUnixChanged(bool),
    UserIsSuChanged(bool),
    InstalledChanged(bool),
    RunningChanged(bool),
    InterfaceSelected(String),
    /// A configuration file was loaded; carries the static lease count.
    ConfigurationLoaded(usize),
    /// The runtime lease table was replaced; carries the entry count.
    DhcpdLeasesReplaced(usize),
    Replaced,
}

type Subscriber = Arc<dyn Fn(&SettingsEvent) + Send + Sync>;

/// Shared, lock-protected handle to one [`SettingsModel`].
#[derive(Clone, Default)]
pub struct Settings {
    model: Arc<RwLock<SettingsModel>>,
    subscribers: Arc<std::sync::Mutex<Vec<Subscriber>>>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings").finish_non_exhaustive()
    }
}

impl Settings {
    pub fn new(model: SettingsModel) -> Self {
        Self {
            model: Arc::new(RwLock::new(model)),
            subscribers: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Registers a callback invoked after every committed update.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&SettingsEvent) + Send + Sync + 'static,
    {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Callbacks run without the subscriber lock held, so they may subscribe.
    fn notify(&self, event: &SettingsEvent) {
        let subscribers: Vec<Subscriber> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for subscriber in &subscribers {
            subscriber(event);
        }
    }

    /// Returns a copy of the current model.
    pub async fn snapshot(&self) -> SettingsModel {
        self.model.read().await.clone()
    }

    pub async fn os_is_unix(&self) -> bool {
        self.model.read().await.os_is_unix
    }

    pub async fn selected_interface(&self) -> Option<String> {
        self.model.read().await.selected_interface.clone()
    }

    pub async fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut SettingsModel) -> SettingsEvent,
    {
        let event = {
            let mut model = self.model.write().await;
            f(&mut model)
        };
        self.notify(&event);
    }

    /// Applies `f` to a draft copy and commits it only if `f` succeeds.
    ///
    /// On error the published model is left exactly as it was and no
    /// subscriber is called.
    pub async fn try_update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut SettingsModel) -> Result<SettingsEvent>,
    {
        let event = {
            let mut model = self.model.write().await;
            let mut draft = model.clone();
            let event = f(&mut draft)?;
            *model = draft;
            event
        };
        self.notify(&event);
        Ok(())
    }

    pub async fn replace(&self, replacement: SettingsModel) {
        self.update(|model| {
            *model = replacement;
            SettingsEvent::Replaced
        })
        .await;
    }

    pub async fn set_os_is_unix(&self, value: bool) {
        self.update(|model| {
            model.os_is_unix = value;
            SettingsEvent::OsIsUnixChanged(value)
        })
        .await;
    }

    pub async fn set_user_is_su(&self, value: bool) {
        self.update(|model| {
            model.user_is_su = value;
            SettingsEvent::UserIsSuChanged(value)
        })
        .await;
    }

    pub async fn set_server_installed(&self, value: bool) {
        self.update(|model| {
            model.is_dhcp_server_installed = value;
            SettingsEvent::InstalledChanged(value)
        })
        .await;
    }

    pub async fn set_server_running(&self, value: bool) {
        self.update(|model| {
            model.is_dhcp_server_running = value;
            SettingsEvent::RunningChanged(value)
        })
        .await;
    }

    pub async fn select_interface(&self, name: impl Into<String>) {
        let name = name.into();
        self.update(|model| {
            model.selected_interface = Some(name.clone());
            SettingsEvent::InterfaceSelected(name)
        })
        .await;
    }

    /// Swaps in a freshly parsed lease table in one step.
    pub async fn replace_dhcpd_leases(&self, leases: HashMap<String, DhcpdLease>) {
        self.update(|model| {
            let count = leases.len();
            model.dhcpd_leases = leases;
            SettingsEvent::DhcpdLeasesReplaced(count)
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex;

    fn recorder(settings: &Settings) -> Arc<Mutex<Vec<SettingsEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        settings.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        events
    }

    #[test]
    fn test_add_static_lease_assigns_sequential_ids() {
        let mut model = SettingsModel::default();
        model.add_static_lease("printer", "aa:bb:cc:dd:ee:01", "192.168.1.20");
        let second = model.add_static_lease("nas", "aa:bb:cc:dd:ee:02", "192.168.1.21");
        assert_eq!(second.id, "2");
        assert_eq!(model.static_leases[0].id, "1");
    }

    #[tokio::test]
    async fn test_setters_notify_subscribers_after_commit() {
        let settings = Settings::default();
        let events = recorder(&settings);

        let observer = settings.clone();
        let seen_unix = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&seen_unix);
        settings.subscribe(move |event| {
            if let SettingsEvent::OsIsUnixChanged(_) = event {
                // The write lock is already released, so reading back works.
                *seen.lock().unwrap() = observer.model.try_read().ok().map(|m| m.os_is_unix);
            }
        });

        settings.set_os_is_unix(true).await;
        settings.set_user_is_su(false).await;
        settings.select_interface("eth0").await;

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                SettingsEvent::OsIsUnixChanged(true),
                SettingsEvent::UserIsSuChanged(false),
                SettingsEvent::InterfaceSelected("eth0".to_string()),
            ]
        );
        assert_eq!(*seen_unix.lock().unwrap(), Some(true));
        assert_eq!(settings.selected_interface().await.as_deref(), Some("eth0"));
    }

    #[tokio::test]
    async fn test_subscriber_may_subscribe_from_callback() {
        let settings = Settings::default();
        let late = Arc::new(Mutex::new(Vec::new()));

        let handle = settings.clone();
        let sink = Arc::clone(&late);
        settings.subscribe(move |event| {
            if let SettingsEvent::InterfaceSelected(_) = event {
                let sink = Arc::clone(&sink);
                handle.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
            }
        });

        settings.select_interface("eth0").await;
        settings.set_server_running(true).await;

        assert_eq!(
            *late.lock().unwrap(),
            vec![SettingsEvent::RunningChanged(true)]
        );
    }

    #[tokio::test]
    async fn test_try_update_failure_keeps_model() {
        let mut model = SettingsModel::default();
        model.add_static_lease("printer", "aa:bb:cc:dd:ee:01", "192.168.1.20");
        let settings = Settings::new(model);
        let events = recorder(&settings);

        let result = settings
            .try_update(|draft| {
                draft.static_leases.clear();
                draft.default_lease_time = 1;
                Err(Error::UnknownServiceStatus("boom".to_string()))
            })
            .await;

        assert!(result.is_err());
        let after = settings.snapshot().await;
        assert_eq!(after.static_leases.len(), 1);
        assert_eq!(after.default_lease_time, 600);
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_dhcpd_leases_reports_count() {
        let settings = Settings::default();
        let events = recorder(&settings);

        let mut table = HashMap::new();
        table.insert(
            "aa:bb:cc:dd:ee:ff".to_string(),
            DhcpdLease::new("192.168.1.100"),
        );
        settings.replace_dhcpd_leases(table).await;

        assert_eq!(settings.snapshot().await.dhcpd_leases.len(), 1);
        assert_eq!(
            *events.lock().unwrap(),
            vec![SettingsEvent::DhcpdLeasesReplaced(1)]
        );
    }
}
