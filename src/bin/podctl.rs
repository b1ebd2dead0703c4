//! podctl - command line front end for pods.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use podlink::manager::{self, DeviceManager};
use podlink::{DeviceEntry, Endpoint, ManagerConfig, MemoryStore, Notification, SerialConnector};

#[derive(Parser, Debug)]
#[command(name = "podctl")]
#[command(about = "Discover and control serial-attached measurement pods")]
#[command(version)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter (e.g. "info", "podlink=debug"); overrides RUST_LOG
    #[arg(long)]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one discovery cycle and print the pods found
    List,
    /// Print the device list every refresh interval, and pods coming and
    /// going, until Ctrl-C
    Watch,
    /// Read a parameter
    Get {
        /// Port the pod is on (e.g. /dev/ttyACM0, COM4)
        port: String,
        /// Parameter name or index
        param: String,
    },
    /// Set a parameter
    Set {
        /// Port the pod is on
        port: String,
        /// Parameter name or index
        param: String,
        /// New value
        value: String,
        /// Persist the change
        #[arg(long)]
        save: bool,
    },
    /// Persist pending parameter changes
    Save {
        /// Port the pod is on
        port: String,
    },
    /// Blink the indicator LED
    Locate {
        /// Port the pod is on
        port: String,
    },
    /// Run a measurement
    Read {
        /// Port the pod is on
        port: String,
        /// Skip blank correction for the RP measurement
        #[arg(long)]
        no_blanks: bool,
        /// Run `RUN,<COMMAND>` instead of the RP measurement
        #[arg(long, requires = "tag")]
        command: Option<String>,
        /// Tag of the frames carrying the result of --command
        #[arg(long)]
        tag: Option<String>,
    },
}

fn init_logging(filter: Option<&str>) -> Result<()> {
    let filter = match filter {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .context("failed to initialize logging")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log.as_deref())?;

    let config = match &args.config {
        Some(path) => ManagerConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ManagerConfig::default(),
    };
    let manager = manager::init(config)?;

    match args.command {
        Command::List => {
            let pods = manager.refresh().await?;
            if pods.is_empty() {
                println!("No pods found");
            }
            for pod in pods {
                println!(
                    "{}  {}  fw {}",
                    pod.serial_number, pod.endpoint, pod.firmware_version
                );
            }
        }
        Command::Watch => watch(manager).await?,
        Command::Get { port, param } => {
            let endpoint = endpoint(&manager, &port).await?;
            println!("{}", manager.get_parameter(&endpoint, param.as_str()).await?);
        }
        Command::Set {
            port,
            param,
            value,
            save,
        } => {
            let endpoint = endpoint(&manager, &port).await?;
            if save {
                manager.update_parameter(&endpoint, param.as_str(), &value).await?;
                println!("{param} = {value} (saved)");
            } else {
                let echoed = manager.set_parameter(&endpoint, param.as_str(), &value).await?;
                println!("{param} = {echoed}");
            }
        }
        Command::Save { port } => {
            let endpoint = endpoint(&manager, &port).await?;
            manager.save_parameters(&endpoint).await?;
            println!("Parameters saved");
        }
        Command::Locate { port } => {
            let endpoint = endpoint(&manager, &port).await?;
            manager.locate(&endpoint).await?;
        }
        Command::Read {
            port,
            no_blanks,
            command,
            tag,
        } => {
            let endpoint = endpoint(&manager, &port).await?;
            let reading = match (command, tag) {
                (Some(command), Some(tag)) => manager.read_command(&endpoint, &command, &tag).await?,
                _ => manager.read_rp(&endpoint, !no_blanks).await?,
            };
            println!("{reading}");
        }
    }

    Ok(())
}

/// Resolves `port` to an endpoint with a queue.
async fn endpoint(manager: &DeviceManager<SerialConnector>, port: &str) -> Result<Endpoint> {
    let endpoint = Endpoint::new(port);
    let endpoints = manager.list_endpoints().await?;
    anyhow::ensure!(
        endpoints.contains(&endpoint),
        "no pod on {port} (found: {})",
        endpoints
            .iter()
            .map(Endpoint::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(endpoint)
}

async fn watch(manager: Arc<DeviceManager<SerialConnector>>) -> Result<()> {
    let interval = manager.config().refresh_interval();
    let store = Arc::new(MemoryStore::new());
    let mut notifications = manager.subscribe();
    let (handle, mut listings) = podlink::spawn_device_task(manager, store, interval)?;
    tracing::info!(interval_ms = interval.as_millis(), "watching for pods, Ctrl-C to stop");

    loop {
        tokio::select! {
            listing = listings.recv() => match listing {
                Some(listing) => print_listing(&listing),
                None => break,
            },
            Some(notification) = notifications.recv() => print_notification(&notification),
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
        }
    }

    handle.cancel().await;
    Ok(())
}

fn print_listing(listing: &[DeviceEntry]) {
    println!("--- {} pod(s)", listing.len());
    for entry in listing {
        match (&entry.endpoint, &entry.firmware_version) {
            (Some(endpoint), Some(firmware)) => println!(
                "{:>3}  {}  {}  fw {}",
                entry.id, entry.serial_number, endpoint, firmware
            ),
            _ => println!("{:>3}  {}  (disconnected)", entry.id, entry.serial_number),
        }
    }
}

fn print_notification(notification: &Notification) {
    let pod = notification.serial_number().unwrap_or("pod");
    match notification {
        Notification::DeviceAdded { endpoint, .. } => println!("+ {pod} on {endpoint}"),
        Notification::DeviceRemoved { endpoint } => println!("- {pod} gone from {endpoint}"),
        Notification::CheckMissedReads { session, .. } => {
            println!("! {pod} joined session {session}, check missed reads");
        }
    }
}
