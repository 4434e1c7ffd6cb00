use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dhcpdctl::{
    Config, Error, LeaseWatcher, Result, ServiceController, ServiceState, Settings,
    SettingsEvent, SettingsModel, ShellRunner,
};

#[derive(Parser)]
#[command(name = "dhcpdctl")]
#[command(author, version, about = "Configure and control an ISC DHCP server", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Status,
    Install,
    Start,
    Stop,
    Restart,
    Apply {
        /// JSON settings model to apply instead of the live dhcpd.conf
        #[arg(long)]
        settings: Option<PathBuf>,
        /// Interface to bind, overriding the service-default file
        #[arg(long)]
        interface: Option<String>,
    },
    ShowConfig,
    ListLeases,
    Watch,
}

/// Loads the live dhcpd.conf so that persisting does not clobber it with defaults.
async fn load_live_settings(controller: &ServiceController) -> Result<()> {
    let live = controller.config().live_config_file.clone();
    match controller.load_settings_file(&live).await {
        Ok(_) => Ok(()),
        Err(Error::RequiredFileMissing(path)) => {
            warn!("{} not found, starting from default settings", path.display());
            Ok(())
        }
        Err(error) => Err(error),
    }
}

/// Privileged commands go through `gksudo`, which is useless without its package.
async fn check_privilege_helper(controller: &ServiceController) {
    if controller.config().privilege_command.as_deref().map(str::trim) != Some("gksudo") {
        return;
    }
    match controller.probe_privilege_helper().await {
        Ok(true) => {}
        Ok(false) => warn!(
            "{} is not installed; privileged commands will fail",
            controller.config().privilege_helper_package
        ),
        Err(error) => warn!("Could not check for the privilege helper: {}", error),
    }
}

fn print_state(state: ServiceState) {
    println!("isc-dhcp-server: {}", state);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = Arc::new(Config::load_or_create(&cli.config)?);
    let controller =
        ServiceController::new(Arc::clone(&config), Settings::default(), Arc::new(ShellRunner));
    controller.detect_platform().await?;

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => match controller.refresh().await {
            Ok(state) => {
                print_state(state);
                Ok(())
            }
            Err(Error::UnknownServiceStatus(output)) => {
                warn!("Unrecognized status output: {}", output);
                print_state(ServiceState::Stopped);
                Ok(())
            }
            Err(error) => Err(error),
        },
        Commands::Install => {
            check_privilege_helper(&controller).await;
            controller.refresh().await?;
            print_state(controller.install().await?);
            Ok(())
        }
        Commands::Start => {
            check_privilege_helper(&controller).await;
            load_live_settings(&controller).await?;
            controller.refresh().await?;
            print_state(controller.start().await?);
            Ok(())
        }
        Commands::Stop => {
            check_privilege_helper(&controller).await;
            load_live_settings(&controller).await?;
            controller.refresh().await?;
            print_state(controller.stop().await?);
            Ok(())
        }
        Commands::Restart => {
            check_privilege_helper(&controller).await;
            load_live_settings(&controller).await?;
            controller.refresh().await?;
            print_state(controller.restart().await?);
            Ok(())
        }
        Commands::Apply {
            settings,
            interface,
        } => {
            check_privilege_helper(&controller).await;
            match settings {
                Some(path) => {
                    let content = tokio::fs::read_to_string(&path).await?;
                    let model: SettingsModel = serde_json::from_str(&content)?;
                    controller.settings().replace(model).await;
                    controller.detect_platform().await?;
                    info!("Applying settings from {}", path.display());
                }
                None => load_live_settings(&controller).await?,
            }

            controller.refresh().await?;
            match interface {
                Some(name) => controller.settings().select_interface(name).await,
                None => {
                    controller.load_selected_interface().await?;
                }
            }

            print_state(controller.apply_configuration().await?);
            Ok(())
        }
        Commands::ShowConfig => {
            load_live_settings(&controller).await?;
            let model = controller.settings().snapshot().await;
            print!("{}", dhcpdctl::directive::render_config(&model));
            Ok(())
        }
        Commands::ListLeases => {
            dhcpdctl::leases::reload_leases(&config.leases_file, controller.settings()).await?;
            let model = controller.settings().snapshot().await;
            let mut leases: Vec<_> = model.dhcpd_leases.values().collect();
            leases.sort_by(|a, b| a.ip_address.cmp(&b.ip_address));

            if leases.is_empty() {
                println!("No leases.");
            } else {
                println!(
                    "{:<16} {:<18} {:<20} {:<8} {:<10}",
                    "IP Address", "MAC Address", "Device", "State", "Remaining"
                );
                println!("{}", "-".repeat(76));

                for lease in leases {
                    let remaining_str = match lease.remaining_seconds() {
                        Some(0) => "expired".to_string(),
                        Some(remaining) => format!("{}s", remaining),
                        None => "-".to_string(),
                    };

                    println!(
                        "{:<16} {:<18} {:<20} {:<8} {:<10}",
                        lease.ip_address,
                        lease.mac_address,
                        lease.device_name.as_deref().unwrap_or("-"),
                        lease.lease_state.as_deref().unwrap_or("-"),
                        remaining_str
                    );
                }
            }

            Ok(())
        }
        Commands::Watch => {
            let path = controller.ensure_leases_file().await?;
            controller.settings().subscribe(|event| {
                if let SettingsEvent::DhcpdLeasesReplaced(count) = event {
                    println!("{} lease(s)", count);
                }
            });

            let watcher = LeaseWatcher::spawn(path, controller.settings().clone())?;
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", error);
            }
            info!("Received shutdown signal, stopping watcher...");
            watcher.shutdown().await;
            Ok(())
        }
    }
}
