//! # dhcpdctl
//!
//! Keeps an ISC DHCP server's configuration, lease view, and service state
//! in sync with an in-memory settings model.
//!
//! ## Features
//!
//! - Lenient `dhcpd.conf` parsing and rendering (lease times, subnet, range,
//!   routers, DNS, `host` blocks)
//! - `dhcpd.leases` history folded into one lease per hardware address
//! - Interface selection via `/etc/default/isc-dhcp-server`
//! - Install/start/stop/restart through shell commands with timeouts
//! - File watching with coalesced lease reloads
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use dhcpdctl::{Config, ServiceController, Settings, ShellRunner};
//!
//! #[tokio::main]
//! async fn main() -> dhcpdctl::Result<()> {
//!     let config = Arc::new(Config::load_or_create("config.json")?);
//!     let controller = ServiceController::new(config, Settings::default(), Arc::new(ShellRunner));
//!     controller.detect_platform().await?;
//!     println!("dhcpd is {}", controller.refresh().await?);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`Settings`] - Shared settings model with change subscribers
//! - [`directive`] - `dhcpd.conf` parser and renderer
//! - [`leases`] - `dhcpd.leases` parser
//! - [`service_default`] - `INTERFACES=` rewriting
//! - [`ServiceController`] - Service lifecycle state machine
//! - [`LeaseWatcher`] - Leases file watch and reload

pub mod config;
pub mod controller;
pub mod directive;
pub mod error;
pub mod leases;
pub mod runner;
pub mod service_default;
pub mod settings;
pub mod watch;

pub use config::Config;
pub use controller::{ServiceController, ServiceState};
pub use error::{Error, Result};
pub use leases::{DhcpdLease, LeaseTable};
pub use runner::{CommandOutput, CommandRunner, ShellRunner};
pub use settings::{Settings, SettingsEvent, SettingsModel, StaticLease};
pub use watch::LeaseWatcher;
