//! # SkyLink vehicle daemon
//!
//! Runs the vehicle side of the radio link: radio bring-up, negotiation
//! responder, adaptive video.
//!
//! ## Usage
//!
//! ```bash
//! # Bench mode: radios replaced by UDP to a ground simulator
//! skylink-vehicle --config vehicle.toml --model model.toml \
//!   --udp-bind 0.0.0.0:5600 --udp-peer 192.168.1.20:5601
//!
//! # Keep canceled negotiation data for inspection
//! skylink-vehicle --model model.toml --udp-peer 127.0.0.1:5601 --developer
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use quanta::Clock;
use skylink_vehicle::ipc::{ChannelNotifier, ModelChange, SiblingProcess};
use skylink_vehicle::pipeline::LoggingPipeline;
use skylink_vehicle::store::{ModelStore, TomlModelStore};
use skylink_vehicle::udp::udp_radio;
use skylink_vehicle::{
    AdaptiveVideoController, NegotiationEngine, RadioLinkManager, VehicleConfig, VehicleLink,
};
use tracing_subscriber::EnvFilter;

/// SkyLink vehicle radio link daemon.
#[derive(Parser, Debug)]
#[command(name = "skylink-vehicle", about = "SkyLink vehicle radio link daemon")]
struct Cli {
    /// Daemon configuration (TOML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model file; overrides `daemon.model_path`.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Force developer mode on.
    #[arg(long, default_value_t = false)]
    developer: bool,

    /// Local address for the UDP bench radio.
    #[arg(long, default_value = "0.0.0.0:5600")]
    udp_bind: SocketAddr,

    /// Ground simulator address. Required until a hardware backend is linked in.
    #[arg(long)]
    udp_peer: Option<SocketAddr>,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<VehicleConfig> {
    let Some(path) = path else {
        return Ok(VehicleConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    VehicleConfig::from_toml_str(&text)
        .with_context(|| format!("parsing config {}", path.display()))
}

/// Drains the per-sibling channels. Sibling processes attach here.
fn spawn_ipc_forwarder(
    channels: Vec<(SiblingProcess, Receiver<ModelChange>)>,
) -> anyhow::Result<()> {
    std::thread::Builder::new()
        .name("skylink-ipc".into())
        .spawn(move || loop {
            let mut open = false;
            for (sibling, rx) in &channels {
                match rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(change) => {
                        tracing::info!(?sibling, ?change, "model change published");
                        open = true;
                    }
                    Err(RecvTimeoutError::Timeout) => open = true,
                    Err(RecvTimeoutError::Disconnected) => {}
                }
            }
            if !open {
                break;
            }
        })
        .context("spawning IPC forwarder")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    // ── Configuration ───────────────────────────────────────────
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let model_path = cli.model.clone().unwrap_or_else(|| config.daemon.model_path.clone());
    let mut store = TomlModelStore::new(&model_path);
    let mut model = store
        .load()
        .with_context(|| format!("loading model {}", model_path.display()))?;
    if cli.developer {
        model.developer_mode = true;
    }
    if let Some(id) = config.daemon.vehicle_id {
        model.vehicle_id = id;
    }

    tracing::info!(
        vehicle_id = model.vehicle_id,
        interfaces = model.radio_interfaces.len(),
        links = model.radio_links.len(),
        developer = model.developer_mode,
        "skylink-vehicle starting"
    );

    // ── Radio backend ───────────────────────────────────────────
    let Some(peer) = cli.udp_peer else {
        bail!("no radio backend available: pass --udp-peer to run against a ground simulator");
    };
    let (registry, rx, inbound) = udp_radio(
        cli.udp_bind,
        peer,
        model.radio_interfaces.len(),
        config.radio.tx_queue_capacity,
    )
    .with_context(|| format!("binding UDP radio on {}", cli.udp_bind))?;
    tracing::info!(bind = %cli.udp_bind, %peer, "UDP bench radio");

    // ── IPC ─────────────────────────────────────────────────────
    let mut notifier = ChannelNotifier::new();
    let mut forwarder = Vec::new();
    for sibling in [SiblingProcess::Telemetry, SiblingProcess::Commands, SiblingProcess::Rc] {
        let (tx, rx) = bounded(16);
        notifier.add(sibling, tx);
        forwarder.push((sibling, rx));
    }
    spawn_ipc_forwarder(forwarder)?;

    // ── Components ──────────────────────────────────────────────
    let clock = Clock::new();
    let radio = RadioLinkManager::new(config.radio.clone(), Box::new(registry), Box::new(rx));
    let negotiation = NegotiationEngine::new(config.negotiation.clone(), clock.clone());
    let adaptive = AdaptiveVideoController::new(config.adaptive.clone(), clock);
    let mut link = VehicleLink::new(
        model,
        radio,
        negotiation,
        adaptive,
        Box::new(LoggingPipeline),
        Box::new(store),
        Box::new(notifier),
    );

    // ── Graceful shutdown ───────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutting down...");
            running.store(false, Ordering::Relaxed);
        })
        .context("installing signal handler")?;
    }

    if !link.start() {
        tracing::warn!("initial radio bring-up failed, retrying on the periodic loop");
        link.request_radio_restart();
    }

    // ── Main loop ───────────────────────────────────────────────
    let tick = config.daemon.tick;
    while running.load(Ordering::Relaxed) {
        match inbound.recv_timeout(tick) {
            Ok(packet) => {
                link.on_packet(&packet);
                while let Ok(packet) = inbound.try_recv() {
                    link.on_packet(&packet);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                tracing::warn!("RX queue closed");
                break;
            }
        }
        link.periodic_loop();
    }

    link.shutdown();
    Ok(())
}
