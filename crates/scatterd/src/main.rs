//! scatterd — scatternet topology daemon.
//!
//! Hosts a handful of topology controllers over an in-process radio
//! medium: each simulated node advertises a demo name, looks for the
//! others, and the nodes negotiate master/drone/minion roles among
//! themselves exactly as they would over a real radio.

use std::sync::Arc;

use anyhow::Result;

use scatter_control::{Controller, ControllerHandle, Radio};
use scatter_core::config::ScatterConfig;
use scatter_core::signal::Signal;
use scatter_core::wire::{BusAddress, DeviceAddress};

mod sim;

use sim::{Ether, SimLink, SimRadio};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = ScatterConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = ScatterConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ScatterConfig::default()
    });

    let node_count: usize = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(3);
    tracing::info!(node_count, "scatterd starting");

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn the nodes ──────────────────────────────────────────────────────

    let ether = Ether::shared();
    let mut handles: Vec<ControllerHandle> = Vec::new();
    let mut names: Vec<String> = Vec::new();
    let mut addresses: Vec<BusAddress> = Vec::new();

    for i in 0..node_count {
        let unique_name = format!(":1.{i}");
        let service_id = 0x1001 + i as u16;

        // The first node takes its identity from the config; the rest are
        // generated.
        let device = if i == 0 && !config.node.device_address.is_empty() {
            config
                .node
                .device_address
                .parse()
                .unwrap_or_else(|_| DeviceAddress::new(rand::random::<u64>()))
        } else {
            DeviceAddress::new(rand::random::<u64>())
        };
        let guid = if i == 0 && !config.node.guid.is_empty() {
            config.node.guid.clone()
        } else {
            hex::encode(rand::random::<[u8; 8]>())
        };

        let radio = SimRadio::new(&unique_name, device, service_id, ether.clone());
        let link = SimLink::new(&unique_name, ether.clone());
        let (controller, handle) = Controller::new(
            &guid,
            &unique_name,
            &config.radio,
            radio.clone() as Arc<dyn Radio>,
            link,
        );
        ether.handles.insert(unique_name.clone(), handle.clone());

        tokio::spawn(controller.run(shutdown_tx.subscribe()));
        tokio::spawn(radio.scan_loop(shutdown_tx.subscribe()));

        let address = BusAddress::new(device, service_id);
        handle.device_available(true);
        handle.signal(
            &unique_name,
            Signal::AdvertiseName {
                requestor: unique_name.clone(),
                requestor_address: address,
                name: format!("org.scatter.demo.node{i}"),
            },
        );
        handle.signal(
            &unique_name,
            Signal::FindName {
                requestor: unique_name.clone(),
                requestor_address: address,
                name: "org.scatter.demo".to_string(),
            },
        );
        tracing::info!(node = %unique_name, address = %address, guid, "node up");

        handles.push(handle);
        names.push(unique_name);
        addresses.push(address);
    }

    // Ring up the first node from everyone else; the state exchange sorts
    // out who ends up master.
    for i in 1..node_count {
        if let Some(resolved) = handles[i].prep_connect(addresses[0]).await {
            tracing::info!(node = %names[i], target = %resolved, "connecting");
        }
        handles[i].post_connect(true, &names[0]);
    }

    // ── Status printer ───────────────────────────────────────────────────────

    let status_task = {
        let handles = handles.clone();
        let names = names.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
            loop {
                interval.tick().await;
                for (name, handle) in names.iter().zip(&handles) {
                    if let Some(status) = handle.status().await {
                        tracing::info!(
                            node = %name,
                            role = ?status.role,
                            minions = status.direct_minions,
                            nodes = status.node_count,
                            found = status.found_node_count,
                            advertising = status.advertise_active,
                            finding = status.find_active,
                            "  node status"
                        );
                    }
                }
            }
        })
    };

    let mut shutdown_rx = shutdown_tx.subscribe();
    let _ = shutdown_rx.recv().await;
    status_task.abort();
    tracing::info!("scatterd stopped");
    Ok(())
}
