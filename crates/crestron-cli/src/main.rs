//! Crestron Discover - Command-line entry point
//!
//! Finds Crestron control processors by broadcast on the local adapters or
//! through a remote processor's console.

mod config;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use crestron_core::{ActivitySnapshot, AdapterDescriptor, DeviceRecord};
use crestron_discovery::{list_ipv4_adapters, DiscoveryEngine};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "crestron-discover")]
#[command(about = "Crestron control processor discovery")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "crestron-discover.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Print discovered devices as JSON
    #[arg(long)]
    json: bool,

    /// Write the default configuration to the config path and exit
    #[arg(long)]
    save_default_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List local IPv4 adapters
    Adapters,
    /// Broadcast discovery on one adapter or all of them
    Local {
        /// Adapter index, name or address (default: all adapters)
        #[arg(short, long)]
        adapter: Option<String>,
    },
    /// Ask a processor to run its own discovery over SSH
    Remote {
        /// Processor hostname or address
        host: String,
        #[arg(short, long)]
        username: String,
        /// Password (prompted for without echo when omitted)
        #[arg(short, long, env = "CRESTRON_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Crestron Discover v{}", env!("CARGO_PKG_VERSION"));

    if args.save_default_config {
        config::save_default_config(&args.config)?;
        info!(path = %args.config.display(), "Wrote default configuration");
        return Ok(());
    }

    let config = config::load_config(&args.config)?;
    info!(
        port = config.discovery.port,
        window_ms = config.discovery.window_ms,
        "Configuration loaded"
    );

    let Some(command) = args.command else {
        bail!("no command given, run with --help for usage");
    };

    let engine = DiscoveryEngine::new(config.discovery);
    spawn_event_logger(&engine);

    let devices = match command {
        Command::Adapters => {
            print_adapters(&list_ipv4_adapters()?);
            return Ok(());
        }
        Command::Local { adapter: None } => engine.discover_all_local_adapters().await,
        Command::Local {
            adapter: Some(selector),
        } => {
            let adapters = list_ipv4_adapters()?;
            let Some(adapter) = select_adapter(&adapters, &selector) else {
                bail!("no adapter matches '{selector}'");
            };
            info!(adapter = %adapter.local_address, name = %adapter.name, "Using adapter");
            engine.discover_on_adapter(adapter).await
        }
        Command::Remote {
            host,
            username,
            password,
        } => {
            let password = match password {
                Some(password) => password,
                None => rpassword::prompt_password(format!("Password for {username}@{host}: "))?,
            };
            engine.discover_remote(&host, &username, &password).await
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else {
        print_devices(&devices);
    }

    Ok(())
}

/// Log device and activity events as they arrive
fn spawn_event_logger(engine: &DiscoveryEngine) {
    let mut devices = engine.subscribe_devices();
    tokio::spawn(async move {
        loop {
            match devices.recv().await {
                Ok(device) => info!(
                    ip = %device.ip_address,
                    hostname = %device.hostname,
                    id = %device.device_id,
                    "Device discovered"
                ),
                Err(RecvError::Lagged(missed)) => warn!(missed, "Device log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut activity = engine.subscribe_activity();
    tokio::spawn(async move {
        loop {
            match activity.recv().await {
                Ok(snapshot) if !snapshot.is_running => {
                    if let Some(error) = &snapshot.last_error {
                        warn!(error = %error, "Discovery finished with an error");
                    }
                }
                Ok(snapshot) => info!("{}", progress_line(&snapshot)),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn progress_line(snapshot: &ActivitySnapshot) -> String {
    format!(
        "Discovering... {} found, {}s elapsed, {}s remaining",
        snapshot.devices_discovered,
        snapshot.elapsed.as_secs(),
        snapshot.remaining().as_secs()
    )
}

/// Pick an adapter by list index, interface name or local address
fn select_adapter<'a>(
    adapters: &'a [AdapterDescriptor],
    selector: &str,
) -> Option<&'a AdapterDescriptor> {
    if let Ok(index) = selector.parse::<usize>() {
        return adapters.get(index);
    }
    adapters
        .iter()
        .find(|a| a.name == selector || a.local_address.to_string() == selector)
}

fn print_adapters(adapters: &[AdapterDescriptor]) {
    if adapters.is_empty() {
        println!("No IPv4 adapters found.");
        return;
    }
    for (index, adapter) in adapters.iter().enumerate() {
        println!(
            "{:>3}  {:<15}  broadcast {:<15}  {}",
            index, adapter.local_address, adapter.broadcast_address, adapter.name
        );
    }
}

fn print_devices(devices: &[DeviceRecord]) {
    if devices.is_empty() {
        println!("No Crestron devices found.");
        return;
    }
    for device in devices {
        println!("{}", format_device(device));
    }
    println!("Found {} devices.", devices.len());
}

fn format_device(device: &DeviceRecord) -> String {
    format!(
        "Hostname:    {}\nIP Address:  {}\nDescription: {}\nDevice Id:   {}\n",
        device.hostname, device.ip_address, device.description, device.device_id
    )
}
