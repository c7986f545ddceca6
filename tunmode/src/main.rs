use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tunmode::sessions::FlowLogger;
use tunmode::{Dispatcher, HostBridge, NoopNotifier, TunOpener, TunnelConfig, TunnelController};

#[derive(Parser)]
#[command(name = "tunmode")]
#[command(about = "TUN packet filter with a live destination blocklist")]
struct Args {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TUN interface name
    #[arg(short, long)]
    name: Option<String>,

    /// Adopt an already-open TUN descriptor instead of creating the interface
    #[arg(long)]
    fd: Option<RawFd>,

    /// Blocked destination address (repeatable)
    #[arg(short, long = "block")]
    block: Vec<String>,

    /// Blocked destinations as one separated list, e.g. "1.1.1.1,2.2.2.2"
    #[arg(long)]
    blocklist: Option<String>,

    /// File of blocked destinations (one per line or separated); re-read on SIGHUP
    #[arg(long)]
    blocklist_file: Option<PathBuf>,

    /// Poll timeout in milliseconds
    #[arg(long)]
    poll_timeout_ms: Option<u64>,

    /// Reader threads
    #[arg(short, long)]
    workers: Option<usize>,
}

fn read_blocklist_file(path: &Path, separator: char) -> anyhow::Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read blocklist file {}", path.display()))?;
    Ok(raw
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .flat_map(|line| line.split(separator))
        .map(str::to_string)
        .collect())
}

/// Take ownership of a descriptor passed on the command line.
fn adopt_fd(fd: RawFd) -> anyhow::Result<OwnedFd> {
    if fd < 0 {
        anyhow::bail!("Invalid TUN descriptor {fd}");
    }
    // SAFETY: the caller hands over ownership of an open, non-negative descriptor
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn build_config(args: &Args) -> anyhow::Result<TunnelConfig> {
    let mut config = match &args.config {
        Some(path) => TunnelConfig::load(path)?,
        None => TunnelConfig::default(),
    };
    if let Some(name) = &args.name {
        config.device.name = name.clone();
    }
    if let Some(ms) = args.poll_timeout_ms {
        config.poll_timeout_ms = ms;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    Ok(config)
}

/// Initial blocklist from the command line, if any was given.
fn initial_blocklist(args: &Args, separator: char) -> anyhow::Result<Option<Vec<String>>> {
    if args.block.is_empty() && args.blocklist.is_none() && args.blocklist_file.is_none() {
        return Ok(None);
    }
    let mut entries = args.block.clone();
    if let Some(list) = &args.blocklist {
        entries.extend(list.split(separator).map(str::to_string));
    }
    if let Some(path) = &args.blocklist_file {
        entries.extend(read_blocklist_file(path, separator)?);
    }
    Ok(Some(entries))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tunmode=info".parse()?))
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;
    let separator = config.blocklist.separator;

    let mut opener = TunOpener::new(config.device.name.clone(), config.device.bring_up);
    if let Some(fd) = args.fd {
        opener = opener.with_fd(adopt_fd(fd)?);
    }

    let flows = Arc::new(FlowLogger::new());
    let dispatcher = Dispatcher::new(flows.clone(), flows);
    let controller = TunnelController::new(opener, config, dispatcher, Arc::new(NoopNotifier))?;
    let bridge = HostBridge::new(controller);

    if let Some(entries) = initial_blocklist(&args, separator)? {
        bridge.update_blocked_ips(entries);
    }
    info!(blocked = ?bridge.blocked_ips(), "Blocklist loaded");

    // Handlers go in before the tunnel starts so no signal can skip teardown
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to set up SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to set up SIGTERM handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to set up SIGHUP handler")?;

    let mut runner = {
        let bridge = bridge.clone();
        tokio::task::spawn_blocking(move || bridge.open_tunnel())
    };

    let result = loop {
        tokio::select! {
            result = &mut runner => break result.context("Tunnel thread failed")?,
            _ = sigint.recv() => {
                info!("Received SIGINT, closing tunnel...");
                bridge.close_tunnel();
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, closing tunnel...");
                bridge.close_tunnel();
            }
            _ = sighup.recv() => {
                let Some(path) = &args.blocklist_file else {
                    info!("Received SIGHUP, no blocklist file to reload");
                    continue;
                };
                match read_blocklist_file(path, separator) {
                    Ok(entries) => {
                        let outcome = bridge.update_blocked_ips(entries);
                        info!(?outcome, "Blocklist reloaded");
                    }
                    Err(e) => warn!(error = %e, "Blocklist reload failed, keeping current list"),
                }
            }
        }
    };

    let stats = result?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
