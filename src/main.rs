//! Multicast routing daemon entry point.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use mcrouted::error::Error;
use mcrouted::kernel::IgmpSocketBridge;
use mcrouted::orchestrator::Daemon;

#[derive(Parser)]
#[command(name = "mcrouted", about = "User-space IPv4 multicast routing daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the static multicast routing daemon.
    Simple {
        #[arg(long)]
        config: std::path::PathBuf,
    },
}

fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();
    match cli.command {
        Command::Simple { config } => run_simple(&config),
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

fn run_simple(config_path: &std::path::Path) -> ExitCode {
    let inventory = match mcrouted::interface::network_interfaces() {
        Ok(inventory) => inventory,
        Err(e) => {
            tracing::error!(error = %e, "failed to enumerate network interfaces");
            return ExitCode::from(1);
        }
    };

    let config = match mcrouted::config_file::load(config_path, &inventory) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            return ExitCode::from(1);
        }
    };

    let kernel = match IgmpSocketBridge::open() {
        Ok(kernel) => std::sync::Arc::new(kernel),
        Err(Error::Permission(msg)) => {
            tracing::error!(msg, "permission error opening igmp socket");
            return ExitCode::from(2);
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to open igmp socket");
            return ExitCode::from(3);
        }
    };

    let daemon = match Daemon::start(kernel, &config) {
        Ok(daemon) => daemon,
        Err(e) => {
            tracing::error!(error = %e, "kernel bridge error during startup");
            return ExitCode::from(3);
        }
    };

    if let Err(e) = daemon.install_signal_handler() {
        tracing::error!(error = %e, "failed to install signal handler");
        return ExitCode::from(3);
    }

    tracing::info!("mcrouted running");
    while !daemon.is_shutting_down() {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    if let Err(e) = daemon.shutdown() {
        tracing::error!(error = %e, "error during shutdown");
        return ExitCode::from(3);
    }

    ExitCode::from(0)
}
