// floodnet node daemon: protocol engine + UDP link + role-specific tasks.

mod alerts;
mod config;
mod link;
mod sensors;
mod stations;
mod status;

use std::time::Duration;

use anyhow::Context;
use flood_core::{
    monotonic_clock, MessageKind, NetworkConfig, NodeRole, SharedNetwork,
};

use crate::link::UdpLink;
use crate::sensors::{AirSensor, Sensor, WaterLevelSensor};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("flood-node {}", VERSION);
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = config::load();
    tracing::info!(role = ?cfg.role, device_name = %cfg.resolved_device_name(), "flood-node starting");

    let clock = monotonic_clock();
    let transport = UdpLink::new(cfg.link_port);
    let net_config = NetworkConfig {
        role: cfg.role,
        min_peers: cfg.min_peers,
        channel: cfg.channel,
        device_name: cfg.resolved_device_name(),
    };
    let network = SharedNetwork::initialize(transport, net_config, clock.clone())
        .context("network bring-up failed")?;
    tracing::info!(address = %network.own_address(), "node online");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        // Engine tick: discovery cadence, status broadcasts, peer sweeps.
        let tick_network = network.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(250));
            loop {
                interval.tick().await;
                tick_network.tick();
            }
        });

        match cfg.role {
            NodeRole::Coordinator => run_coordinator(&cfg, &network, &clock),
            NodeRole::Leaf => run_leaf(&cfg, &network),
        }

        shutdown_signal().await
    })?;
    Ok(())
}

/// Coordinator: collect station reports, serve the status API, and push
/// alerts back out to the leaves when levels cross the thresholds.
fn run_coordinator(
    cfg: &config::Config,
    network: &SharedNetwork<UdpLink>,
    clock: &flood_core::Clock,
) {
    let stations = stations::shared();

    let observer_stations = stations.clone();
    let observer_clock = clock.clone();
    let warning_cm = cfg.water_warning_cm;
    let critical_cm = cfg.water_critical_cm;
    network.on_message(move |msg, source| {
        if msg.kind() == Some(MessageKind::SensorData) {
            let values = msg.values();
            let water_cm = values.first().copied().unwrap_or(0.0);
            let level = alerts::classify(water_cm, warning_cm, critical_cm);
            let name = msg.text();
            let name = if name.is_empty() {
                source.to_string()
            } else {
                name
            };
            stations::lock(&observer_stations).upsert(source, &name, values, level, observer_clock());
            if level > 0 {
                tracing::warn!(station = %name, water_cm, level = alerts::label(level), "elevated water level");
            }
        }
    });

    network.on_delivery_result(|dest, success| {
        if !success {
            tracing::debug!(peer = %dest, "delivery failed");
        }
    });

    // Alert loop: sweep stale stations and rebroadcast when the aggregate
    // alert level changes.
    let alert_network = network.clone();
    let alert_stations = stations.clone();
    let alert_clock = clock.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(2));
        let mut last_level = 0u8;
        loop {
            interval.tick().await;
            let (level, water_cm) = {
                let mut table = stations::lock(&alert_stations);
                table.sweep(alert_clock());
                (table.max_alert_level(), table.max_water_level())
            };
            if level != last_level {
                let outcome = if level > 0 {
                    alert_network.broadcast_to_leaves(&[water_cm], level, Some(alerts::label(level)))
                } else {
                    alert_network.broadcast_to_leaves(&[water_cm], 0, Some("Water level normal"))
                };
                match outcome {
                    Ok(()) => {
                        tracing::info!(level = alerts::label(level), water_cm, "alert level broadcast");
                        last_level = level;
                    }
                    Err(err) => tracing::warn!(error = %err, "alert broadcast failed"),
                }
            }
        }
    });

    let status_network = network.clone();
    let status_clock = clock.clone();
    let status_port = cfg.status_port;
    tokio::spawn(async move {
        if let Err(err) =
            status::run_status_server(status_port, status_network, stations, status_clock).await
        {
            tracing::error!(error = %err, "status server stopped");
        }
    });
}

/// Leaf: sample the local sensors and report to the coordinator; log
/// whatever the coordinator pushes back.
fn run_leaf(cfg: &config::Config, network: &SharedNetwork<UdpLink>) {
    network.on_message(|msg, source| match msg.kind() {
        Some(MessageKind::Alert) => {
            tracing::warn!(
                from = %source,
                level = alerts::label(msg.alert_level),
                text = %msg.text(),
                "alert received"
            );
        }
        Some(MessageKind::Command) => {
            tracing::info!(from = %source, text = %msg.text(), "command received");
        }
        Some(MessageKind::StatusUpdate) => {
            tracing::debug!(from = %source, "coordinator status update");
        }
        _ => {}
    });

    let report_network = network.clone();
    let device_name = cfg.resolved_device_name();
    let interval_secs = cfg.sample_interval_secs.max(1);
    tokio::spawn(async move {
        let mut water = WaterLevelSensor::new(4.0);
        let mut air = AirSensor::new();
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            let mut values = water.sample();
            values.extend(air.sample());
            match report_network.send_to_coordinator(&values, Some(&device_name)) {
                Ok(()) => tracing::debug!(water_cm = values[0], "sensor report sent"),
                Err(flood_core::SendError::NoCoordinator) => {
                    tracing::debug!("no coordinator yet, report skipped");
                }
                Err(err) => tracing::warn!(error = %err, "sensor report failed"),
            }
        }
    });
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
