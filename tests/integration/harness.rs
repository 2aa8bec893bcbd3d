//! Shared test infrastructure: an in-memory radio medium and fully wired
//! controller nodes driven only through their public handles.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;

use scatter_control::{
    ControlError, ControlLink, Controller, ControllerHandle, DeviceInfo, Radio, Role,
    StatusReport,
};
use scatter_core::config::RadioConfig;
use scatter_core::signal::Signal;
use scatter_core::wire::{BusAddress, DeviceAddress, FoundNodeEntry};

// ── Medium ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Advert {
    pub uuid_rev: u32,
    pub connect_address: BusAddress,
    pub ad_names: Vec<FoundNodeEntry>,
}

/// The shared ether: current advertisements plus the bus-name directory.
#[derive(Default)]
pub struct Net {
    pub adverts: DashMap<DeviceAddress, Advert>,
    pub handles: DashMap<String, ControllerHandle>,
}

impl Net {
    pub fn shared() -> Arc<Self> {
        Arc::new(Net::default())
    }

    /// Place a standalone advertisement on the air, as though some device
    /// outside the test group were advertising.
    pub fn plant_advert(
        &self,
        device: DeviceAddress,
        uuid_rev: u32,
        guid: &str,
        names: &[&str],
    ) -> BusAddress {
        let address = BusAddress::new(device, 0x2001);
        self.adverts.insert(
            device,
            Advert {
                uuid_rev,
                connect_address: address,
                ad_names: vec![FoundNodeEntry {
                    connect_address: address,
                    uuid_rev,
                    ad_names: vec![scatter_core::wire::AdNameEntry {
                        guid: guid.to_string(),
                        address,
                        names: names.iter().map(|n| n.to_string()).collect(),
                    }],
                }],
            },
        );
        address
    }
}

// ── Node radio ────────────────────────────────────────────────────────────────

pub struct NetRadio {
    name: String,
    device: DeviceAddress,
    service_id: u16,
    net: Arc<Net>,
    pub finding: AtomicBool,
    pub advertising: AtomicBool,
    ignore: Mutex<BTreeSet<DeviceAddress>>,
    /// Discovery callbacks delivered to this node's application layer:
    /// (guid, names, lost).
    pub callbacks: Mutex<Vec<(String, Vec<String>, bool)>>,
}

impl NetRadio {
    fn new(name: &str, device: DeviceAddress, service_id: u16, net: Arc<Net>) -> Arc<Self> {
        Arc::new(NetRadio {
            name: name.to_string(),
            device,
            service_id,
            net,
            finding: AtomicBool::new(false),
            advertising: AtomicBool::new(false),
            ignore: Mutex::new(BTreeSet::new()),
            callbacks: Mutex::new(Vec::new()),
        })
    }

    pub fn is_finding(&self) -> bool {
        self.finding.load(Ordering::SeqCst)
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising.load(Ordering::SeqCst)
    }

    pub fn found_guids(&self, lost: bool) -> Vec<String> {
        self.callbacks
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, l)| *l == lost)
            .map(|(g, _, _)| g.clone())
            .collect()
    }
}

impl Radio for NetRadio {
    fn start_find(
        &self,
        ignore_addrs: &BTreeSet<DeviceAddress>,
        _duration_secs: u64,
    ) -> Result<(), ControlError> {
        *self.ignore.lock().unwrap() = ignore_addrs.clone();
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
        self.net.adverts.insert(
            self.device,
            Advert {
                uuid_rev,
                connect_address: address,
                ad_names: ad_names.to_vec(),
            },
        );
        self.advertising.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_advertise(&self) -> Result<(), ControlError> {
        self.net.adverts.remove(&self.device);
        self.advertising.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn start_listen(&self) -> Result<BusAddress, ControlError> {
        Ok(BusAddress::new(self.device, self.service_id))
    }

    fn stop_listen(&self) {}

    fn get_device_info(&self, device: DeviceAddress) -> Result<DeviceInfo, ControlError> {
        let advert = self
            .net
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
        if let Some(peer) = self.net.handles.get(unique_name) {
            peer.name_lost(&self.name);
        }
        if let Some(me) = self.net.handles.get(&self.name) {
            me.name_lost(unique_name);
        }
        Ok(())
    }

    fn found_names_change(
        &self,
        guid: &str,
        names: &BTreeSet<String>,
        _address: BusAddress,
        lost: bool,
    ) {
        self.callbacks.lock().unwrap().push((
            guid.to_string(),
            names.iter().cloned().collect(),
            lost,
        ));
    }
}

struct NetLink {
    name: String,
    net: Arc<Net>,
}

impl ControlLink for NetLink {
    fn send_signal(&self, dest: &str, signal: &Signal) -> Result<(), ControlError> {
        match self.net.handles.get(dest) {
            Some(handle) => {
                handle.signal(&self.name, signal.clone());
                Ok(())
            }
            None => Err(ControlError::UnknownPeer(dest.to_string())),
        }
    }
}

// ── Nodes ─────────────────────────────────────────────────────────────────────

pub struct Node {
    pub name: String,
    pub address: BusAddress,
    pub handle: ControllerHandle,
    pub radio: Arc<NetRadio>,
}

impl Node {
    pub async fn status(&self) -> StatusReport {
        self.handle.status().await.expect("controller alive")
    }

    pub async fn role(&self) -> Role {
        self.status().await.role
    }

    /// Register an advertised name on behalf of a local client.
    pub fn advertise(&self, name: &str) {
        self.handle.signal(
            &self.name,
            Signal::AdvertiseName {
                requestor: self.name.clone(),
                requestor_address: self.address,
                name: name.to_string(),
            },
        );
    }

    /// Register a find interest on behalf of a local client.
    pub fn find(&self, name: &str) {
        self.handle.signal(
            &self.name,
            Signal::FindName {
                requestor: self.name.clone(),
                requestor_address: self.address,
                name: name.to_string(),
            },
        );
    }

    /// Report a raw radio sighting straight to this node's controller.
    pub fn sight(&self, device: DeviceAddress, uuid_rev: u32) {
        self.handle.process_device_change(device, uuid_rev);
    }
}

pub struct TestNet {
    pub net: Arc<Net>,
    pub shutdown: broadcast::Sender<()>,
    next_index: usize,
}

impl TestNet {
    pub fn new() -> Self {
        let (shutdown, _) = broadcast::channel(1);
        TestNet {
            net: Net::shared(),
            shutdown,
            next_index: 0,
        }
    }

    /// Spin up one fully wired node and wait for it to come on line.
    pub async fn spawn_node(&mut self) -> Node {
        let i = self.next_index;
        self.next_index += 1;

        let name = format!(":1.{i}");
        let device = DeviceAddress::new(0xa0 + i as u64);
        let service_id = 0x1001 + i as u16;
        let address = BusAddress::new(device, service_id);

        let radio = NetRadio::new(&name, device, service_id, self.net.clone());
        let link = Arc::new(NetLink {
            name: name.clone(),
            net: self.net.clone(),
        });
        let (controller, handle) = Controller::new(
            &format!("guid-{i}"),
            &name,
            &RadioConfig::default(),
            radio.clone() as Arc<dyn Radio>,
            link,
        );
        self.net.handles.insert(name.clone(), handle.clone());
        tokio::spawn(controller.run(self.shutdown.subscribe()));

        handle.device_available(true);
        settle().await;

        Node {
            name,
            address,
            handle,
            radio,
        }
    }

    /// Dial `callee` from `caller` and run the state exchange to quiescence.
    pub async fn connect(&self, caller: &Node, callee: &Node) {
        caller.handle.prep_connect(callee.address).await;
        caller.handle.post_connect(true, &callee.name);
        settle().await;
    }
}

/// Let queued commands, signal hops, and immediate work drain.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
