//! In-process radio ether.
//!
//! scatterd runs several controllers in one process over a simulated
//! medium: advertisements live in a shared map, discovery is a periodic
//! sweep over that map, and signals are delivered straight to the target
//! controller's queue by bus name.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;

use scatter_control::{ControlError, ControlLink, ControllerHandle, DeviceInfo, Radio};
use scatter_core::signal::Signal;
use scatter_core::wire::{BusAddress, DeviceAddress, FoundNodeEntry};

/// What one radio currently has on the air.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub uuid_rev: u32,
    pub connect_address: BusAddress,
    pub ad_names: Vec<FoundNodeEntry>,
}

/// The shared medium: who is advertising what, plus a bus-name directory
/// of every controller in the process.
#[derive(Default)]
pub struct Ether {
    pub adverts: DashMap<DeviceAddress, Advertisement>,
    pub handles: DashMap<String, ControllerHandle>,
}

impl Ether {
    pub fn shared() -> Arc<Self> {
        Arc::new(Ether::default())
    }
}

/// One node's radio front end.
pub struct SimRadio {
    name: String,
    device: DeviceAddress,
    service_id: u16,
    ether: Arc<Ether>,
    finding: AtomicBool,
    ignore: Mutex<BTreeSet<DeviceAddress>>,
}

impl SimRadio {
    pub fn new(name: &str, device: DeviceAddress, service_id: u16, ether: Arc<Ether>) -> Arc<Self> {
        Arc::new(SimRadio {
            name: name.to_string(),
            device,
            service_id,
            ether,
            finding: AtomicBool::new(false),
            ignore: Mutex::new(BTreeSet::new()),
        })
    }

    fn ignore_set(&self) -> BTreeSet<DeviceAddress> {
        self.ignore.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Periodic discovery sweep while a find operation is active, feeding
    /// sightings to the owning controller the way inquiry results trickle
    /// in from a real radio.
    pub async fn scan_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval.tick() => {
                    if !self.finding.load(Ordering::SeqCst) {
                        continue;
                    }
                    let Some(handle) = self.ether.handles.get(&self.name).map(|h| h.clone()) else {
                        continue;
                    };
                    let ignore = self.ignore_set();
                    for entry in self.ether.adverts.iter() {
                        let device = *entry.key();
                        if device == self.device || ignore.contains(&device) {
                            continue;
                        }
                        handle.process_device_change(device, entry.value().uuid_rev);
                    }
                }
            }
        }
    }
}

impl Radio for SimRadio {
    fn start_find(
        &self,
        ignore_addrs: &BTreeSet<DeviceAddress>,
        _duration_secs: u64,
    ) -> Result<(), ControlError> {
        if let Ok(mut guard) = self.ignore.lock() {
            *guard = ignore_addrs.clone();
        }
        self.finding.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_find(&self) -> Result<(), ControlError> {
        self.finding.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn start_advertise(
        &self,
        uuid_rev: u32,
        address: BusAddress,
        ad_names: &[FoundNodeEntry],
        _duration_secs: u64,
    ) -> Result<(), ControlError> {
        self.ether.adverts.insert(
            self.device,
            Advertisement {
                uuid_rev,
                connect_address: address,
                ad_names: ad_names.to_vec(),
            },
        );
        Ok(())
    }

    fn stop_advertise(&self) -> Result<(), ControlError> {
        self.ether.adverts.remove(&self.device);
        Ok(())
    }

    fn start_listen(&self) -> Result<BusAddress, ControlError> {
        Ok(BusAddress::new(self.device, self.service_id))
    }

    fn stop_listen(&self) {}

    fn get_device_info(&self, device: DeviceAddress) -> Result<DeviceInfo, ControlError> {
        let advert = self
            .ether
            .adverts
            .get(&device)
            .ok_or(ControlError::DeviceUnavailable)?;
        Ok(DeviceInfo {
            uuid_rev: advert.uuid_rev,
            connect_address: advert.connect_address,
            ad_names: advert.ad_names.clone(),
        })
    }

    fn disconnect(&self, unique_name: &str) -> Result<(), ControlError> {
        // Both ends of a dropped link see the other's name vanish.
        if let Some(peer) = self.ether.handles.get(unique_name) {
            peer.name_lost(&self.name);
        }
        if let Some(me) = self.ether.handles.get(&self.name) {
            me.name_lost(unique_name);
        }
        Ok(())
    }

    fn found_names_change(
        &self,
        guid: &str,
        names: &BTreeSet<String>,
        address: BusAddress,
        lost: bool,
    ) {
        tracing::info!(
            node = %self.name,
            guid,
            ?names,
            address = %address,
            lost,
            "discovery callback"
        );
    }
}

/// Signal delivery by bus name.
pub struct SimLink {
    name: String,
    ether: Arc<Ether>,
}

impl SimLink {
    pub fn new(name: &str, ether: Arc<Ether>) -> Arc<Self> {
        Arc::new(SimLink {
            name: name.to_string(),
            ether,
        })
    }
}

impl ControlLink for SimLink {
    fn send_signal(&self, dest: &str, signal: &Signal) -> Result<(), ControlError> {
        match self.ether.handles.get(dest) {
            Some(handle) => {
                handle.signal(&self.name, signal.clone());
                Ok(())
            }
            None => Err(ControlError::UnknownPeer(dest.to_string())),
        }
    }
}
