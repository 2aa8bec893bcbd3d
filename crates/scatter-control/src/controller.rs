//! The topology controller — one per process.
//!
//! Owns the connected-node database, the found-node cache, and both
//! delegation trackers, and runs the role state machine on a single task.
//! Every entry point — inbound signals, radio callbacks, deferred work —
//! arrives on this task's queues, so state is never shared and sending a
//! signal is just a call on the outbound link, with no lock juggling.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, mpsc, oneshot};

use scatter_core::config::RadioConfig;
use scatter_core::signal::{SetStateReply, SetStateRequest, Signal};
use scatter_core::wire::{
    AdNameEntry, BusAddress, DeviceAddress, FoundNodeEntry, NodeStateEntry, INVALID_UUID_REV,
    PROTOCOL_VERSION, SET_STATE_TIMEOUT_SECS, UUID_REV_COLLISION_WINDOW,
};
use scatter_topo::{FoundNodeCache, NodeDb, NodeInfo};

use crate::delegate::{decide, NameCategory, NameTracker};
use crate::radio::{ControlLink, Radio};
use crate::work::{Scheduler, WorkItem};

// ── Public surface ────────────────────────────────────────────────────────────

/// Derived role. Exactly one holds in every reachable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Drone,
    Minion,
}

/// Point-in-time view of the controller, for the status surface and tests.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub role: Role,
    pub address: BusAddress,
    pub unique_name: String,
    pub master: Option<String>,
    pub direct_minions: usize,
    pub node_count: usize,
    pub found_node_count: usize,
    pub cache_entries: usize,
    pub advertise_active: bool,
    pub find_active: bool,
    pub advertise_count: usize,
    pub find_count: usize,
}

/// External entry points, delivered to the controller task.
pub enum Command {
    DeviceAvailable(bool),
    PostConnect {
        ok: bool,
        remote_name: String,
    },
    ProcessDeviceChange {
        device: DeviceAddress,
        uuid_rev: u32,
    },
    Signal {
        sender: String,
        signal: Signal,
    },
    NameLost {
        unique_name: String,
    },
    CheckIncomingAddress {
        address: BusAddress,
        reply: oneshot::Sender<bool>,
    },
    PrepConnect {
        address: BusAddress,
        reply: oneshot::Sender<BusAddress>,
    },
    Status {
        reply: oneshot::Sender<StatusReport>,
    },
}

/// Cloneable handle for feeding a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl ControllerHandle {
    pub fn device_available(&self, on: bool) {
        let _ = self.tx.send(Command::DeviceAvailable(on));
    }

    pub fn post_connect(&self, ok: bool, remote_name: &str) {
        let _ = self.tx.send(Command::PostConnect {
            ok,
            remote_name: remote_name.to_string(),
        });
    }

    pub fn process_device_change(&self, device: DeviceAddress, uuid_rev: u32) {
        let _ = self.tx.send(Command::ProcessDeviceChange { device, uuid_rev });
    }

    pub fn signal(&self, sender: &str, signal: Signal) {
        let _ = self.tx.send(Command::Signal {
            sender: sender.to_string(),
            signal,
        });
    }

    pub fn name_lost(&self, unique_name: &str) {
        let _ = self.tx.send(Command::NameLost {
            unique_name: unique_name.to_string(),
        });
    }

    pub async fn check_incoming_address(&self, address: BusAddress) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Command::CheckIncomingAddress { address, reply })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn prep_connect(&self, address: BusAddress) -> Option<BusAddress> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::PrepConnect { address, reply }).ok()?;
        rx.await.ok()
    }

    pub async fn status(&self) -> Option<StatusReport> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Status { reply }).ok()?;
        rx.await.ok()
    }
}

// ── Controller state ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct MasterInfo {
    unique_name: String,
    address: BusAddress,
}

struct PendingSetState {
    peer: String,
    token: u64,
}

pub struct Controller {
    guid: String,
    unique_name: String,
    address: BusAddress,

    max_connections: usize,
    delegate_time: Duration,
    lost_device_timeout: Duration,

    master: Option<MasterInfo>,
    master_uuid_rev: u32,
    direct_minions: usize,

    node_db: NodeDb,
    found_db: NodeDb,
    cache: FoundNodeCache,
    advertise: NameTracker,
    find: NameTracker,

    listening: bool,
    dev_available: bool,

    pending_set_state: Option<PendingSetState>,
    stop_ad_token: u64,
    token_counter: u64,

    radio: Arc<dyn Radio>,
    link: Arc<dyn ControlLink>,
    scheduler: Scheduler,
    work_rx: mpsc::UnboundedReceiver<WorkItem>,
    command_rx: mpsc::UnboundedReceiver<Command>,
}

impl Controller {
    pub fn new(
        guid: &str,
        unique_name: &str,
        config: &RadioConfig,
        radio: Arc<dyn Radio>,
        link: Arc<dyn ControlLink>,
    ) -> (Self, ControllerHandle) {
        let (scheduler, work_rx) = Scheduler::new();
        let (tx, command_rx) = mpsc::unbounded_channel();

        let mut rng = rand::thread_rng();
        let master_uuid_rev = rng.gen_range(1..=u32::MAX);

        let controller = Controller {
            guid: guid.to_string(),
            unique_name: unique_name.to_string(),
            address: BusAddress::default(),
            max_connections: config.max_connections,
            delegate_time: Duration::from_secs(config.delegate_secs),
            lost_device_timeout: Duration::from_millis(config.lost_device_timeout_ms),
            master: None,
            master_uuid_rev,
            direct_minions: 0,
            node_db: NodeDb::new(),
            found_db: NodeDb::new(),
            cache: FoundNodeCache::new(),
            advertise: NameTracker::new(NameCategory::Advertise),
            find: NameTracker::new(NameCategory::Find),
            listening: false,
            dev_available: false,
            pending_set_state: None,
            stop_ad_token: 0,
            token_counter: 0,
            radio,
            link,
            scheduler,
            work_rx,
            command_rx,
        };
        (controller, ControllerHandle { tx })
    }

    /// Drive the controller until shutdown. Consumes self; all further
    /// interaction goes through the [`ControllerHandle`].
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(name = %self.unique_name, "topology controller running");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("topology controller shutting down");
                    break;
                }
                Some(item) = self.work_rx.recv() => self.handle_work(item),
                command = self.command_rx.recv() => match command {
                    Some(c) => self.handle_command(c),
                    None => break,
                },
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::DeviceAvailable(on) => self.device_available(on),
            Command::PostConnect { ok, remote_name } => self.post_connect(ok, &remote_name),
            Command::ProcessDeviceChange { device, uuid_rev } => {
                self.process_device_change(device, uuid_rev)
            }
            Command::Signal { sender, signal } => self.handle_signal(&sender, signal),
            Command::NameLost { unique_name } => self.name_lost(&unique_name),
            Command::CheckIncomingAddress { address, reply } => {
                let _ = reply.send(self.check_incoming_address(&address));
            }
            Command::PrepConnect { address, reply } => {
                let _ = reply.send(self.prep_connect(&address));
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn handle_work(&mut self, item: WorkItem) {
        match item {
            WorkItem::UpdateDelegations { reset_minions } => self.update_delegations(reset_minions),
            WorkItem::StopAdvertising { token } => self.finish_stop_advertising(token),
            WorkItem::ExpireCacheEntry { id, generation } => self.expire_cache_entry(id, generation),
            WorkItem::RotateMinions { advertise, token } => self.rotate_minion(advertise, token),
            WorkItem::SetStateTimeout { token } => self.set_state_timed_out(token),
        }
    }

    // ── Role predicates ───────────────────────────────────────────────────────

    fn minion_count(&self) -> usize {
        self.node_db.size().saturating_sub(1)
    }

    pub fn is_master(&self) -> bool {
        self.master.is_none()
    }

    fn is_drone(&self) -> bool {
        self.master.is_some() && self.minion_count() > 0
    }

    fn is_minion(&self) -> bool {
        self.master.is_some() && self.minion_count() == 0
    }

    fn role(&self) -> Role {
        if self.is_master() {
            Role::Master
        } else if self.is_drone() {
            Role::Drone
        } else {
            Role::Minion
        }
    }

    fn use_local_find(&self) -> bool {
        self.direct_minions == 0
    }

    fn use_local_advertise(&self) -> bool {
        self.direct_minions <= 1
    }

    fn rotate_minions(&self) -> bool {
        self.direct_minions > 2
    }

    fn next_token(&mut self) -> u64 {
        self.token_counter += 1;
        self.token_counter
    }

    fn status(&self) -> StatusReport {
        StatusReport {
            role: self.role(),
            address: self.address,
            unique_name: self.unique_name.clone(),
            master: self.master.as_ref().map(|m| m.unique_name.clone()),
            direct_minions: self.direct_minions,
            node_count: self.node_db.size(),
            found_node_count: self.found_db.size(),
            cache_entries: self.cache.len(),
            advertise_active: self.advertise.active,
            find_active: self.find.active,
            advertise_count: self.advertise.count,
            find_count: self.find.count,
        }
    }

    // ── Connection-layer surface ──────────────────────────────────────────────

    fn device_available(&mut self, on: bool) {
        tracing::info!(available = on, "radio device availability changed");
        self.dev_available = on;
        if on {
            match self.radio.start_listen() {
                Ok(address) => {
                    self.listening = true;
                    self.address = address;
                    if self.node_db.find_node(&address).is_none() {
                        self.node_db.add_node(NodeInfo::with_identity(
                            &self.guid,
                            &self.unique_name,
                            address,
                        ));
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to start listening");
                    self.listening = false;
                }
            }
        } else {
            if self.advertise.active && self.use_local_advertise() {
                let _ = self.radio.stop_advertise();
                self.advertise.active = false;
            }
            if self.find.active && self.use_local_find() {
                let _ = self.radio.stop_find();
                self.find.active = false;
            }
            self.radio.stop_listen();
            self.listening = false;
        }
        self.scheduler.dispatch(WorkItem::UpdateDelegations {
            reset_minions: false,
        });
    }

    /// May the transport accept an inbound connection from `address`?
    fn check_incoming_address(&self, address: &BusAddress) -> bool {
        if self.is_master() {
            self.node_db.contains(address) || self.direct_minions < self.max_connections
        } else {
            // Subordinates take orders, not strangers.
            self.master.as_ref().map(|m| m.address == *address).unwrap_or(false)
                || self.node_db.contains(address)
        }
    }

    /// Resolve the address an outbound connection must physically dial, and
    /// wind down local radio operations that would fight the new link.
    fn prep_connect(&mut self, address: &BusAddress) -> BusAddress {
        if self.find.active && self.use_local_find() {
            let _ = self.radio.stop_find();
            self.find.active = false;
        }
        if self.advertise.active && self.use_local_advertise() {
            let _ = self.radio.stop_advertise();
            self.advertise.active = false;
        }
        self.found_db
            .connect_address(address)
            .or_else(|| self.node_db.connect_address(address))
            .unwrap_or(*address)
    }

    fn post_connect(&mut self, ok: bool, remote_name: &str) {
        if !ok {
            // Connection fell through; resume whatever we paused.
            self.scheduler.dispatch(WorkItem::UpdateDelegations {
                reset_minions: false,
            });
            return;
        }
        self.send_set_state(remote_name);
    }

    // ── State-exchange handshake ──────────────────────────────────────────────

    fn send_set_state(&mut self, peer: &str) {
        if self.pending_set_state.is_some() {
            tracing::warn!(peer, "state exchange already in flight; dropping");
            return;
        }
        let request = SetStateRequest {
            protocol_version: PROTOCOL_VERSION,
            minion_count: self.direct_minions,
            uuid_rev: self.master_uuid_rev,
            address: self.address,
            node_states: self.node_db.node_state_entries(),
            found_nodes: self.found_db.found_node_entries(),
        };
        let token = self.next_token();
        self.pending_set_state = Some(PendingSetState {
            peer: peer.to_string(),
            token,
        });
        if let Err(e) = self.link.send_signal(peer, &Signal::SetStateRequest(request)) {
            tracing::warn!(peer, error = %e, "state exchange send failed; disconnecting");
            self.pending_set_state = None;
            let _ = self.radio.disconnect(peer);
            return;
        }
        self.scheduler.dispatch_after(
            Duration::from_secs(SET_STATE_TIMEOUT_SECS),
            WorkItem::SetStateTimeout { token },
        );
    }

    fn set_state_timed_out(&mut self, token: u64) {
        let timed_out = matches!(&self.pending_set_state, Some(p) if p.token == token);
        if !timed_out {
            return;
        }
        let pending = match self.pending_set_state.take() {
            Some(p) => p,
            None => return,
        };
        // No retry: tear the link down and let the transport decide.
        tracing::warn!(peer = %pending.peer, "state exchange timed out; disconnecting");
        let _ = self.radio.disconnect(&pending.peer);
    }

    fn handle_set_state_request(&mut self, sender: &str, request: SetStateRequest) {
        if self.node_db.contains(&request.address)
            || self.node_db.find_node_by_name(sender).is_some()
        {
            // A known node asking again is a protocol violation. No reply;
            // the peer can time out and disconnect.
            tracing::warn!(sender, "repeated state exchange from a known node; ignoring");
            return;
        }

        // Snapshot our side before the merge mutates anything: a conceding
        // reply must describe the pre-merge state.
        let our_states = self.node_db.node_state_entries();
        let our_found = self.found_db.found_node_entries();

        let remote_wins = request.minion_count > self.direct_minions
            || (request.minion_count == self.direct_minions
                && request.protocol_version > PROTOCOL_VERSION);

        let (reply_states, reply_found) = if remote_wins {
            self.become_subordinate(sender, request.address);
            self.import_state(request.address, &[], &request.found_nodes);
            (our_states, our_found)
        } else {
            self.import_state(request.address, &request.node_states, &request.found_nodes);
            // Empty node-state list tells the caller it is now a minion.
            (Vec::new(), Vec::new())
        };

        self.after_state_merge(request.uuid_rev);

        let reply = SetStateReply {
            protocol_version: PROTOCOL_VERSION,
            uuid_rev: self.master_uuid_rev,
            address: self.address,
            node_states: reply_states,
            found_nodes: reply_found,
        };
        if let Err(e) = self.link.send_signal(sender, &Signal::SetStateReply(reply)) {
            tracing::error!(sender, error = %e, "state exchange reply failed; disconnecting");
            let _ = self.radio.disconnect(sender);
        }
    }

    fn handle_set_state_reply(&mut self, sender: &str, reply: SetStateReply) {
        match &self.pending_set_state {
            Some(p) if p.peer == sender => {}
            _ => {
                tracing::warn!(sender, "unsolicited state exchange reply; ignoring");
                return;
            }
        }
        self.pending_set_state = None;

        if reply.node_states.is_empty() {
            // We lost the comparison; the replier keeps everything we sent.
            self.become_subordinate(sender, reply.address);
            self.import_state(reply.address, &[], &reply.found_nodes);
        } else {
            self.import_state(reply.address, &reply.node_states, &reply.found_nodes);
        }
        self.after_state_merge(reply.uuid_rev);
    }

    /// Common tail of both handshake sides.
    fn after_state_merge(&mut self, learned_uuid_rev: u32) {
        if !self.is_minion() {
            self.avoid_uuid_rev_collision(learned_uuid_rev);
        }
        if self.is_master() {
            self.scheduler.dispatch(WorkItem::UpdateDelegations {
                reset_minions: false,
            });
        } else {
            // A subordinate never stops advertisements on its own; cancel
            // any pending grace-period stop.
            self.stop_ad_token = self.next_token();
        }
    }

    fn become_subordinate(&mut self, master_name: &str, master_address: BusAddress) {
        tracing::info!(master = master_name, "conceding mastery");
        self.master = Some(MasterInfo {
            unique_name: master_name.to_string(),
            address: master_address,
        });
        // The master owns the authoritative found set from here on.
        self.cache.clear();
        self.found_db.clear();
        if self.advertise.active && self.use_local_advertise() {
            let _ = self.radio.stop_advertise();
            self.advertise.active = false;
        }
        if self.find.active && self.use_local_find() {
            let _ = self.radio.stop_find();
            self.find.active = false;
        }
        self.advertise.minion = None;
        self.find.minion = None;
        self.advertise.rotate_token = self.next_token();
        self.find.rotate_token = self.next_token();
    }

    /// Merge a peer's topology snapshot into ours. `states` non-empty means
    /// the peer (and everything behind it) joins as our direct minion;
    /// empty means only its found-node knowledge is taken.
    fn import_state(
        &mut self,
        connect_address: BusAddress,
        states: &[NodeStateEntry],
        found: &[FoundNodeEntry],
    ) {
        let incoming = NodeDb::new();
        for entry in states {
            let mut node =
                NodeInfo::with_identity(&entry.guid, &entry.unique_name, entry.address);
            if entry.address == connect_address {
                node.direct_minion = true;
            } else {
                node.connect_via = Some(connect_address);
            }
            let mut with_names = node.clone();
            with_names.advertise_names = entry.advertise_names.iter().cloned().collect();
            with_names.find_names = entry.find_names.iter().cloned().collect();
            incoming.add_node(with_names);
            // The live db gets the bare node; names go through the trackers
            // so the per-category counts stay truthful.
            self.node_db.add_node(node);
            for name in &entry.advertise_names {
                self.advertise.add_name(&self.node_db, &entry.address, name);
            }
            for name in &entry.find_names {
                self.find.add_name(&self.node_db, &entry.address, name);
            }
        }

        if !states.is_empty() {
            let was_rotating = self.rotate_minions();
            self.direct_minions += 1;
            self.find.ignore_addrs.insert(connect_address.device);
            if !was_rotating && self.rotate_minions() {
                // Delegations must start carrying durations.
                self.advertise.dirty = true;
                self.find.dirty = true;
            }
        }

        // Reconcile the found set against the merged graph. A node that
        // just became a member keeps its names reachable through the
        // connection, so it leaves the found set without a lost report;
        // a node whose cached connect path now terminates at a member is
        // stale and its names really are gone.
        let (mut added, _) = self.found_db.diff(&incoming);
        let mut absorbed: Vec<NodeInfo> = Vec::new();
        let mut stale: Vec<NodeInfo> = Vec::new();
        for node in self.found_db.snapshot() {
            if self.node_db.contains(&node.address) {
                absorbed.push(node);
            } else if self
                .found_db
                .connect_address(&node.address)
                .map(|c| self.node_db.contains(&c))
                .unwrap_or(false)
            {
                stale.push(node);
            }
        }
        if !absorbed.is_empty() || !stale.is_empty() {
            let detached: Vec<BusAddress> = absorbed
                .iter()
                .chain(stale.iter())
                .map(|n| n.address)
                .collect();
            self.cache.detach_nodes(&detached);
        }

        // The peer's found-node knowledge, minus anything now connected.
        let import_db = NodeDb::new();
        for node in nodes_from_found_entries(found) {
            if !self.node_db.contains(&node.address) {
                import_db.add_node(node);
            }
        }
        let (found_added, _) = self.found_db.diff(&import_db);
        added.extend(found_added.iter().cloned());

        self.found_db.update_db(&[], &absorbed, true);
        self.found_db.update_db(&found_added, &stale, true);
        let import_nodes = import_db.snapshot();
        self.found_db.update_db(&import_nodes, &[], false);

        if self.is_master() {
            for entry in found {
                let group: Vec<NodeInfo> = nodes_from_found_entries(std::slice::from_ref(entry))
                    .into_iter()
                    .filter(|n| !self.node_db.contains(&n.address))
                    .collect();
                if group.is_empty() {
                    continue;
                }
                let addresses: Vec<BusAddress> = group.iter().map(|n| n.address).collect();
                self.cache.detach_nodes(&addresses);
                let (id, generation) =
                    self.cache.insert(entry.uuid_rev, entry.connect_address, group);
                self.scheduler.dispatch_after(
                    self.lost_device_timeout,
                    WorkItem::ExpireCacheEntry { id, generation },
                );
            }
        }

        // Hand radio duties to a minion once delegation applies.
        if !self.use_local_find() && self.find.minion.is_none() {
            self.find.minion = self
                .node_db
                .find_direct_minion(None, self.advertise.minion.as_ref())
                .map(|n| n.address);
            self.find.dirty = true;
        }
        if !self.use_local_advertise() && self.advertise.minion.is_none() {
            self.advertise.minion = self
                .node_db
                .find_direct_minion(None, self.find.minion.as_ref())
                .map(|n| n.address);
            self.advertise.dirty = true;
        }

        self.distribute_advertised_name_changes(&added, &stale);

        // Newly joined searchers get the current found set up front.
        if self.is_master() {
            let prime = self.found_db.found_node_entries();
            if !prime.is_empty() {
                for entry in states {
                    if !entry.find_names.is_empty() && entry.unique_name != self.unique_name {
                        self.send(
                            &entry.unique_name,
                            &Signal::FoundNames {
                                entries: prime.clone(),
                            },
                        );
                    }
                }
            }
        }
    }

    fn avoid_uuid_rev_collision(&mut self, learned: u32) {
        while self.master_uuid_rev == INVALID_UUID_REV
            || rev_distance(self.master_uuid_rev, learned) < UUID_REV_COLLISION_WINDOW
        {
            self.master_uuid_rev = self.master_uuid_rev.wrapping_add(1);
        }
    }

    fn bump_master_uuid_rev(&mut self) {
        self.master_uuid_rev = self.master_uuid_rev.wrapping_add(1);
        if self.master_uuid_rev == INVALID_UUID_REV {
            self.master_uuid_rev = self.master_uuid_rev.wrapping_add(1);
        }
    }

    // ── Delegation ────────────────────────────────────────────────────────────

    fn update_delegations(&mut self, reset_minions: bool) {
        if reset_minions {
            self.advertise.minion = None;
            self.find.minion = None;
        }
        self.update_delegation(NameCategory::Advertise);
        self.update_delegation(NameCategory::Find);
    }

    fn update_delegation(&mut self, category: NameCategory) {
        let advertise_op = category == NameCategory::Advertise;
        let (active, empty, changed) = match category {
            NameCategory::Advertise => (
                self.advertise.active,
                self.advertise.is_empty(),
                self.advertise.dirty,
            ),
            NameCategory::Find => (self.find.active, self.find.is_empty(), self.find.dirty),
        };
        let allow_connections = (!advertise_op || self.listening)
            && self.is_master()
            && self.direct_minions < self.max_connections;

        let decision = decide(active, empty, changed, allow_connections, self.dev_available);
        if !decision.consistent() {
            tracing::error!(?decision, ?category, "inconsistent delegation decision; ignoring");
            return;
        }

        if advertise_op && changed && !decision.idle() && self.is_master() {
            // The advertised set changed shape; peers distinguish revisions
            // by this counter. Bump before acting so the revision on the
            // air matches the one we keep.
            self.bump_master_uuid_rev();
            self.find.dirty = true;
        }

        if decision.start || decision.restart {
            match category {
                NameCategory::Advertise => self.send_advertise_delegation(),
                NameCategory::Find => self.send_find_delegation(),
            }
        } else if decision.stop {
            match category {
                NameCategory::Advertise => self.begin_stop_advertising(),
                NameCategory::Find => self.stop_finding(),
            }
        }
    }

    /// Put the current advertise set on the air, locally or via a minion.
    fn send_advertise_delegation(&mut self) {
        let duration = self.delegation_duration();
        let payload = self.advertise_payload(false);
        if self.use_local_advertise() {
            match self
                .radio
                .start_advertise(self.master_uuid_rev, self.address, &payload, 0)
            {
                Ok(()) => self.advertise.active = true,
                Err(e) => {
                    tracing::warn!(error = %e, "local advertise failed");
                    self.advertise.active = false;
                }
            }
            self.advertise.dirty = false;
            return;
        }

        if self.advertise.minion.is_none() {
            self.advertise.minion = self
                .node_db
                .find_direct_minion(None, self.find.minion.as_ref())
                .map(|n| n.address);
        }
        let Some(dest) = self.minion_name(self.advertise.minion) else {
            tracing::warn!("no advertise minion available");
            self.advertise.active = false;
            return;
        };
        let signal = Signal::DelegateAdvertise {
            uuid_rev: self.master_uuid_rev,
            address: self.address,
            ad_names: payload,
            duration_secs: duration,
        };
        self.advertise.active = self.link.send_signal(&dest, &signal).is_ok();
        self.advertise.dirty = false;
        if self.advertise.active && self.rotate_minions() {
            let token = self.next_token();
            self.advertise.rotate_token = token;
            self.scheduler.dispatch_after(
                self.delegate_time,
                WorkItem::RotateMinions {
                    advertise: true,
                    token,
                },
            );
        }
    }

    fn send_find_delegation(&mut self) {
        let duration = self.delegation_duration();
        if self.use_local_find() {
            match self.radio.start_find(&self.find.ignore_addrs, 0) {
                Ok(()) => self.find.active = true,
                Err(e) => {
                    tracing::warn!(error = %e, "local find failed");
                    self.find.active = false;
                }
            }
            self.find.dirty = false;
            return;
        }

        if self.find.minion.is_none() {
            self.find.minion = self
                .node_db
                .find_direct_minion(None, self.advertise.minion.as_ref())
                .map(|n| n.address);
        }
        let Some(dest) = self.minion_name(self.find.minion) else {
            tracing::warn!("no find minion available");
            self.find.active = false;
            return;
        };
        let signal = Signal::DelegateFind {
            result_dest: self.unique_name.clone(),
            ignore_addrs: self.find.ignore_addrs.iter().copied().collect(),
            duration_secs: duration,
        };
        self.find.active = self.link.send_signal(&dest, &signal).is_ok();
        self.find.dirty = false;
        if self.find.active && self.rotate_minions() {
            let token = self.next_token();
            self.find.rotate_token = token;
            self.scheduler.dispatch_after(
                self.delegate_time,
                WorkItem::RotateMinions {
                    advertise: false,
                    token,
                },
            );
        }
    }

    /// With more than two direct minions no one is delegated permanently;
    /// each handoff is time-bounded and a rotation fires when it lapses.
    fn delegation_duration(&self) -> u64 {
        if self.rotate_minions() {
            self.delegate_time.as_secs()
        } else {
            0
        }
    }

    /// Advertisements get a grace period: peers first see an empty name set
    /// under our identity (so they clean their caches), and the actual
    /// radio stop runs after `delegate_time` unless something restarts the
    /// operation first.
    fn begin_stop_advertising(&mut self) {
        let payload = self.advertise_payload(true);
        if self.use_local_advertise() {
            let _ = self.radio.start_advertise(
                self.master_uuid_rev,
                self.address,
                &payload,
                self.delegate_time.as_secs(),
            );
        } else if let Some(dest) = self.minion_name(self.advertise.minion) {
            let signal = Signal::DelegateAdvertise {
                uuid_rev: self.master_uuid_rev,
                address: self.address,
                ad_names: payload,
                duration_secs: self.delegate_time.as_secs(),
            };
            let _ = self.link.send_signal(&dest, &signal);
        }
        self.advertise.active = false;
        self.advertise.dirty = false;
        let token = self.next_token();
        self.stop_ad_token = token;
        self.scheduler
            .dispatch_after(self.delegate_time, WorkItem::StopAdvertising { token });
    }

    fn finish_stop_advertising(&mut self, token: u64) {
        if token != self.stop_ad_token || self.advertise.active {
            return;
        }
        if self.use_local_advertise() {
            let _ = self.radio.stop_advertise();
        } else if let Some(dest) = self.minion_name(self.advertise.minion) {
            let _ = self.link.send_signal(
                &dest,
                &Signal::DelegateAdvertise {
                    uuid_rev: self.master_uuid_rev,
                    address: self.address,
                    ad_names: Vec::new(),
                    duration_secs: 0,
                },
            );
        }
    }

    fn stop_finding(&mut self) {
        if self.use_local_find() {
            let _ = self.radio.stop_find();
        } else if let Some(dest) = self.minion_name(self.find.minion) {
            let _ = self.link.send_signal(
                &dest,
                &Signal::DelegateFind {
                    result_dest: String::new(),
                    ignore_addrs: Vec::new(),
                    duration_secs: 0,
                },
            );
        }
        self.find.active = false;
        self.find.dirty = false;
    }

    fn rotate_minion(&mut self, advertise: bool, token: u64) {
        let (current_token, active, current) = if advertise {
            (
                self.advertise.rotate_token,
                self.advertise.active,
                self.advertise.minion,
            )
        } else {
            (self.find.rotate_token, self.find.active, self.find.minion)
        };
        if token != current_token || !active || !self.is_master() || !self.rotate_minions() {
            return;
        }
        let skip = if advertise {
            self.find.minion
        } else {
            self.advertise.minion
        };
        let next = self
            .node_db
            .find_direct_minion(current.as_ref(), skip.as_ref())
            .map(|n| n.address);
        if advertise {
            self.advertise.minion = next;
            self.send_advertise_delegation();
        } else {
            self.find.minion = next;
            self.send_find_delegation();
        }
    }

    fn minion_name(&self, minion: Option<BusAddress>) -> Option<String> {
        let address = minion?;
        let node = self.node_db.find_node(&address)?;
        if node.unique_name.is_empty() || node.address == self.address {
            None
        } else {
            Some(node.unique_name)
        }
    }

    /// Everything this group advertises, grouped under our identity.
    /// `strip_names` keeps the per-node identities but drops the names —
    /// the shape peers need in order to clean their caches.
    fn advertise_payload(&self, strip_names: bool) -> Vec<FoundNodeEntry> {
        let mut ad_names = Vec::new();
        for node in self.node_db.snapshot() {
            if !strip_names && node.advertise_names.is_empty() {
                continue;
            }
            ad_names.push(AdNameEntry {
                guid: node.guid.clone(),
                address: node.address,
                names: if strip_names {
                    Vec::new()
                } else {
                    node.advertise_names.iter().cloned().collect()
                },
            });
        }
        vec![FoundNodeEntry {
            connect_address: self.address,
            uuid_rev: self.master_uuid_rev,
            ad_names,
        }]
    }

    // ── Discovery & propagation ───────────────────────────────────────────────

    fn process_device_change(&mut self, device: DeviceAddress, uuid_rev: u32) {
        if !self.is_master() {
            // Only the master coordinates the authoritative cache; hand the
            // raw sighting to whoever asked us to look.
            if !self.find.result_dest.is_empty() {
                let dest = self.find.result_dest.clone();
                self.send(&dest, &Signal::FoundDevice { device, uuid_rev });
            }
            return;
        }

        if let Some(entry) = self.cache.lookup_device(device) {
            if entry.uuid_rev == uuid_rev {
                // Same advertisement revision: nothing new to fetch, just
                // keep the entry alive.
                let id = entry.id;
                if let Some(generation) = self.cache.refresh(id) {
                    self.scheduler.dispatch_after(
                        self.lost_device_timeout,
                        WorkItem::ExpireCacheEntry { id, generation },
                    );
                }
                return;
            }
        }

        // New or changed revision. The device query is slow (SDP); running
        // it on this task serializes racing reports in arrival order.
        let info = match self.radio.get_device_info(device) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(device = %device, error = %e, "device info query failed");
                return;
            }
        };

        let mut new_nodes = nodes_from_found_entries(&info.ad_names);
        for node in &mut new_nodes {
            node.uuid_rev = info.uuid_rev;
        }

        let mut removed = Vec::new();
        for node in &new_nodes {
            if let Some(old) = self.found_db.find_node(&node.address) {
                let gone: Vec<String> = old
                    .advertise_names
                    .difference(&node.advertise_names)
                    .cloned()
                    .collect();
                if !gone.is_empty() {
                    let mut partial = old.clone();
                    partial.advertise_names = gone.into_iter().collect();
                    removed.push(partial);
                }
            }
        }

        // Detach the nodes from whatever revision owned them before;
        // emptied entries die here and their pending expiries go stale.
        let addresses: Vec<BusAddress> = new_nodes.iter().map(|n| n.address).collect();
        self.cache.detach_nodes(&addresses);
        let (id, generation) =
            self.cache
                .insert(info.uuid_rev, info.connect_address, new_nodes.clone());
        self.scheduler.dispatch_after(
            self.lost_device_timeout,
            WorkItem::ExpireCacheEntry { id, generation },
        );

        self.found_db.update_db(&new_nodes, &removed, false);
        self.distribute_advertised_name_changes(&new_nodes, &removed);
    }

    fn expire_cache_entry(&mut self, id: u64, generation: u64) {
        let Some(entry) = self.cache.take_expired(id, generation) else {
            return;
        };
        tracing::debug!(uuid_rev = entry.uuid_rev, "found-node cache entry expired");
        self.found_db.update_db(&[], &entry.ad_info, true);
        self.distribute_advertised_name_changes(&[], &entry.ad_info);
    }

    /// Tell every interested party about names that appeared or vanished.
    /// Remote searchers get signals; the local application layer gets the
    /// discovery callback, after all sends so it can re-enter freely.
    fn distribute_advertised_name_changes(&mut self, added: &[NodeInfo], removed: &[NodeInfo]) {
        if added.is_empty() && removed.is_empty() {
            return;
        }
        let found_entries = group_into_entries(added);
        let lost_entries = group_into_entries(removed);

        for node in self.node_db.snapshot() {
            if node.address == self.address || node.find_names.is_empty() {
                continue;
            }
            if !lost_entries.is_empty() {
                self.send(
                    &node.unique_name,
                    &Signal::LostNames {
                        entries: lost_entries.clone(),
                    },
                );
            }
            if !found_entries.is_empty() {
                self.send(
                    &node.unique_name,
                    &Signal::FoundNames {
                        entries: found_entries.clone(),
                    },
                );
            }
        }

        for node in removed {
            if node.address != self.address && !node.advertise_names.is_empty() {
                self.radio
                    .found_names_change(&node.guid, &node.advertise_names, node.address, true);
            }
        }
        for node in added {
            if node.address != self.address && !node.advertise_names.is_empty() {
                self.radio
                    .found_names_change(&node.guid, &node.advertise_names, node.address, false);
            }
        }
    }

    // ── Inbound signals ───────────────────────────────────────────────────────

    fn handle_signal(&mut self, sender: &str, signal: Signal) {
        match signal {
            Signal::SetStateRequest(request) => self.handle_set_state_request(sender, request),
            Signal::SetStateReply(reply) => self.handle_set_state_reply(sender, reply),
            Signal::FindName {
                requestor_address,
                name,
                ..
            } => self.handle_name_op(sender, NameCategory::Find, true, requestor_address, name),
            Signal::CancelFindName {
                requestor_address,
                name,
                ..
            } => self.handle_name_op(sender, NameCategory::Find, false, requestor_address, name),
            Signal::AdvertiseName {
                requestor_address,
                name,
                ..
            } => {
                self.handle_name_op(sender, NameCategory::Advertise, true, requestor_address, name)
            }
            Signal::CancelAdvertiseName {
                requestor_address,
                name,
                ..
            } => self.handle_name_op(
                sender,
                NameCategory::Advertise,
                false,
                requestor_address,
                name,
            ),
            Signal::DelegateAdvertise {
                uuid_rev,
                address,
                ad_names,
                duration_secs,
            } => self.handle_delegate_advertise(sender, uuid_rev, address, ad_names, duration_secs),
            Signal::DelegateFind {
                result_dest,
                ignore_addrs,
                duration_secs,
            } => self.handle_delegate_find(sender, result_dest, ignore_addrs, duration_secs),
            Signal::FoundNames { entries } => self.handle_found_names(entries, false),
            Signal::LostNames { entries } => self.handle_found_names(entries, true),
            Signal::FoundDevice { device, uuid_rev } => {
                self.handle_found_device(sender, device, uuid_rev)
            }
        }
    }

    fn handle_name_op(
        &mut self,
        sender: &str,
        category: NameCategory,
        add: bool,
        requestor_address: BusAddress,
        name: String,
    ) {
        // Minions accept name operations only from their own local clients;
        // a remote signal reaching one is a protocol violation.
        let local = requestor_address == self.address;
        if self.is_minion() && !local {
            tracing::warn!(sender, "name operation received by a minion; ignoring");
            return;
        }
        let Some(node) = self.node_db.find_node(&requestor_address) else {
            tracing::warn!(sender, requestor = %requestor_address, "name operation for unknown node");
            return;
        };

        let changed = {
            let tracker = match category {
                NameCategory::Advertise => &mut self.advertise,
                NameCategory::Find => &mut self.find,
            };
            if add {
                tracker.add_name(&self.node_db, &node.address, &name)
            } else {
                tracker.remove_name(&self.node_db, &node.address, &name)
            }
        };
        if !changed {
            tracing::debug!(name, add, "name operation changed nothing");
            return;
        }

        if !self.is_master() {
            // Drones relay; the master runs delegation.
            let master_name = self.master.as_ref().map(|m| m.unique_name.clone());
            if let Some(dest) = master_name {
                let forwarded = match (category, add) {
                    (NameCategory::Find, true) => Signal::FindName {
                        requestor: node.unique_name.clone(),
                        requestor_address,
                        name,
                    },
                    (NameCategory::Find, false) => Signal::CancelFindName {
                        requestor: node.unique_name.clone(),
                        requestor_address,
                        name,
                    },
                    (NameCategory::Advertise, true) => Signal::AdvertiseName {
                        requestor: node.unique_name.clone(),
                        requestor_address,
                        name,
                    },
                    (NameCategory::Advertise, false) => Signal::CancelAdvertiseName {
                        requestor: node.unique_name.clone(),
                        requestor_address,
                        name,
                    },
                };
                self.send(&dest, &forwarded);
            }
            return;
        }

        self.scheduler.dispatch(WorkItem::UpdateDelegations {
            reset_minions: false,
        });

        match category {
            NameCategory::Find => {
                let Some(node_now) = self.node_db.find_node(&node.address) else {
                    return;
                };
                if node_now.unique_name == self.unique_name {
                    return;
                }
                if add && node_now.find_names.len() == 1 {
                    // First find interest: prime with the current found set.
                    let entries = self.found_db.found_node_entries();
                    if !entries.is_empty() {
                        self.send(&node_now.unique_name, &Signal::FoundNames { entries });
                    }
                } else if !add && node_now.find_names.is_empty() {
                    // Last interest gone: flush what we primed.
                    let entries = self.found_db.found_node_entries();
                    if !entries.is_empty() {
                        self.send(&node_now.unique_name, &Signal::LostNames { entries });
                    }
                }
            }
            NameCategory::Advertise => {
                // Single-name delta instead of a full resync.
                let mut partial = node.clone();
                partial.advertise_names = std::iter::once(name).collect();
                if add {
                    self.distribute_advertised_name_changes(&[partial], &[]);
                } else {
                    self.distribute_advertised_name_changes(&[], &[partial]);
                }
            }
        }
    }

    fn handle_delegate_advertise(
        &mut self,
        sender: &str,
        uuid_rev: u32,
        address: BusAddress,
        ad_names: Vec<FoundNodeEntry>,
        duration_secs: u64,
    ) {
        if !self.delegation_from_master(sender) {
            return;
        }
        if self.is_drone() {
            // Push radio work further down before doing it ourselves.
            let next = self
                .node_db
                .find_direct_minion(self.advertise.minion.as_ref(), self.find.minion.as_ref());
            if let Some(minion) = next {
                self.advertise.minion = Some(minion.address);
                self.send(
                    &minion.unique_name,
                    &Signal::DelegateAdvertise {
                        uuid_rev,
                        address,
                        ad_names,
                        duration_secs,
                    },
                );
                return;
            }
        }
        if ad_names.is_empty() {
            let _ = self.radio.stop_advertise();
            self.advertise.active = false;
        } else {
            match self
                .radio
                .start_advertise(uuid_rev, address, &ad_names, duration_secs)
            {
                Ok(()) => self.advertise.active = true,
                Err(e) => {
                    tracing::warn!(error = %e, "delegated advertise failed");
                    self.advertise.active = false;
                }
            }
        }
    }

    fn handle_delegate_find(
        &mut self,
        sender: &str,
        result_dest: String,
        ignore_addrs: Vec<DeviceAddress>,
        duration_secs: u64,
    ) {
        if !self.delegation_from_master(sender) {
            return;
        }
        if self.is_drone() {
            let next = self
                .node_db
                .find_direct_minion(self.find.minion.as_ref(), self.advertise.minion.as_ref());
            if let Some(minion) = next {
                self.find.minion = Some(minion.address);
                self.send(
                    &minion.unique_name,
                    &Signal::DelegateFind {
                        result_dest,
                        ignore_addrs,
                        duration_secs,
                    },
                );
                return;
            }
        }
        if result_dest.is_empty() {
            let _ = self.radio.stop_find();
            self.find.active = false;
            self.find.result_dest.clear();
        } else {
            self.find.result_dest = result_dest;
            self.find.ignore_addrs = ignore_addrs.into_iter().collect();
            match self.radio.start_find(&self.find.ignore_addrs, duration_secs) {
                Ok(()) => self.find.active = true,
                Err(e) => {
                    tracing::warn!(error = %e, "delegated find failed");
                    self.find.active = false;
                }
            }
        }
    }

    fn delegation_from_master(&self, sender: &str) -> bool {
        match &self.master {
            Some(master) if master.unique_name == sender => true,
            _ => {
                tracing::warn!(sender, "delegation from a node that is not our master; ignoring");
                false
            }
        }
    }

    fn handle_found_names(&mut self, entries: Vec<FoundNodeEntry>, lost: bool) {
        let nodes = nodes_from_found_entries(&entries);
        if lost {
            self.found_db.update_db(&[], &nodes, true);
        } else {
            self.found_db.update_db(&nodes, &[], false);
        }
        for node in &nodes {
            if !node.advertise_names.is_empty() {
                self.radio
                    .found_names_change(&node.guid, &node.advertise_names, node.address, lost);
            }
        }
    }

    fn handle_found_device(&mut self, _sender: &str, device: DeviceAddress, uuid_rev: u32) {
        if self.is_master() {
            self.process_device_change(device, uuid_rev);
        } else if let Some(master) = &self.master {
            // Relay raw sightings up the chain.
            let dest = master.unique_name.clone();
            self.send(&dest, &Signal::FoundDevice { device, uuid_rev });
        }
    }

    // ── Membership changes ────────────────────────────────────────────────────

    fn name_lost(&mut self, unique_name: &str) {
        if let Some(master) = self.master.clone() {
            if master.unique_name == unique_name {
                self.master_left(master);
                return;
            }
        }
        if let Some(node) = self.node_db.find_node_by_name(unique_name) {
            if node.address != self.address {
                self.minion_left(node);
            }
        }
    }

    fn master_left(&mut self, master: MasterInfo) {
        tracing::info!(master = %master.unique_name, "master vanished; promoting self");
        self.master = None;

        // The old master is still a radio out there; treat it as found and
        // give it the standard discovery grace before forgetting it.
        let mut former = NodeInfo::with_identity("", &master.unique_name, master.address);
        former.uuid_rev = INVALID_UUID_REV;
        self.found_db.update_db(&[former], &[], false);

        // The cache was empty while we were subordinate; rebuild it from
        // everything we currently believe is out there.
        self.cache.clear();
        for entry in self.found_db.found_node_entries() {
            let members: Vec<NodeInfo> = self
                .found_db
                .snapshot()
                .into_iter()
                .filter(|n| {
                    self.found_db.connect_address(&n.address).unwrap_or(n.address)
                        == entry.connect_address
                })
                .collect();
            if members.is_empty() {
                continue;
            }
            let (id, generation) =
                self.cache.insert(entry.uuid_rev, entry.connect_address, members);
            self.scheduler.dispatch_after(
                self.lost_device_timeout,
                WorkItem::ExpireCacheEntry { id, generation },
            );
        }

        self.find.ignore_addrs = self
            .node_db
            .snapshot()
            .iter()
            .filter(|n| n.address != self.address)
            .map(|n| n.address.device)
            .collect();
        self.find.result_dest.clear();
        self.advertise.dirty = true;
        self.find.dirty = true;
        self.scheduler.dispatch(WorkItem::UpdateDelegations {
            reset_minions: true,
        });
    }

    fn minion_left(&mut self, node: NodeInfo) {
        tracing::info!(name = %node.unique_name, address = %node.address, "group member vanished");
        let was_advertise_minion = self.advertise.minion == Some(node.address);
        let was_find_minion = self.find.minion == Some(node.address);
        let was_direct = node.direct_minion;
        let was_rotating = self.rotate_minions();

        self.node_db.remove_node(&node.address);
        self.find.ignore_addrs.remove(&node.address.device);
        self.advertise.forget_node_names(node.advertise_names.len());
        self.find.forget_node_names(node.find_names.len());

        if was_direct {
            self.direct_minions = self.direct_minions.saturating_sub(1);
            if was_rotating && !self.rotate_minions() {
                // Rotation just shut off; invalidate pending handoffs and
                // force a permanent-delegation resend.
                self.advertise.rotate_token = self.next_token();
                self.find.rotate_token = self.next_token();
                self.advertise.dirty = true;
                self.find.dirty = true;
            }
        }

        let mut reclaim_advertise_from: Option<String> = None;
        if was_find_minion {
            if self.direct_minions == 1 {
                // The one direct minion left carries find; we take the
                // advertising back ourselves.
                if let Some(remaining) = self.node_db.find_direct_minion(None, None) {
                    if self.advertise.minion == Some(remaining.address) {
                        reclaim_advertise_from = Some(remaining.unique_name.clone());
                    }
                    self.find.minion = Some(remaining.address);
                } else {
                    self.find.minion = None;
                }
            } else if self.direct_minions > 1 {
                self.find.minion = self
                    .node_db
                    .find_direct_minion(Some(&node.address), self.advertise.minion.as_ref())
                    .map(|n| n.address);
            } else {
                self.find.minion = None;
            }
            self.find.dirty = true;
        }
        if was_advertise_minion || reclaim_advertise_from.is_some() {
            self.advertise.minion = if self.direct_minions > 1 && reclaim_advertise_from.is_none() {
                self.node_db
                    .find_direct_minion(Some(&node.address), self.find.minion.as_ref())
                    .map(|n| n.address)
            } else {
                None
            };
            self.advertise.dirty = true;
        }

        // The departed node is still on the air somewhere; let it live in
        // the found set for the standard grace, or none if it had nothing
        // advertised.
        if self.is_master() {
            let mut found = node.clone();
            found.direct_minion = false;
            found.connect_via = None;
            let delay = if found.advertise_names.is_empty() {
                Duration::ZERO
            } else {
                self.lost_device_timeout
            };
            self.found_db.update_db(&[found.clone()], &[], false);
            let (id, generation) = self.cache.insert(found.uuid_rev, found.address, vec![found]);
            self.scheduler
                .dispatch_after(delay, WorkItem::ExpireCacheEntry { id, generation });
        }

        self.scheduler.dispatch(WorkItem::UpdateDelegations {
            reset_minions: false,
        });

        // The stop goes out only after the state work above is complete, so
        // a reentrant signal can't observe a half-updated view.
        if let Some(dest) = reclaim_advertise_from {
            self.send(
                &dest,
                &Signal::DelegateAdvertise {
                    uuid_rev: self.master_uuid_rev,
                    address: self.address,
                    ad_names: Vec::new(),
                    duration_secs: 0,
                },
            );
        }
    }

    fn send(&self, dest: &str, signal: &Signal) {
        if let Err(e) = self.link.send_signal(dest, signal) {
            tracing::warn!(dest, error = %e, "signal send failed");
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn rev_distance(a: u32, b: u32) -> u32 {
    a.wrapping_sub(b).min(b.wrapping_sub(a))
}

/// Flatten found-node wire entries into node records, wiring each node's
/// back-reference to its group's connect address.
fn nodes_from_found_entries(entries: &[FoundNodeEntry]) -> Vec<NodeInfo> {
    let mut nodes = Vec::new();
    for entry in entries {
        for ad in &entry.ad_names {
            let mut node = NodeInfo::with_identity(&ad.guid, "", ad.address);
            node.uuid_rev = entry.uuid_rev;
            if ad.address != entry.connect_address {
                node.connect_via = Some(entry.connect_address);
            }
            node.advertise_names = ad.names.iter().cloned().collect();
            nodes.push(node);
        }
    }
    nodes
}

/// Group nodes into wire entries by their one-hop connect reference.
fn group_into_entries(nodes: &[NodeInfo]) -> Vec<FoundNodeEntry> {
    let mut groups: BTreeMap<BusAddress, FoundNodeEntry> = BTreeMap::new();
    for node in nodes {
        if node.advertise_names.is_empty() {
            continue;
        }
        let connect = node.connect_via.unwrap_or(node.address);
        let entry = groups.entry(connect).or_insert_with(|| FoundNodeEntry {
            connect_address: connect,
            uuid_rev: node.uuid_rev,
            ad_names: Vec::new(),
        });
        entry.ad_names.push(AdNameEntry {
            guid: node.guid.clone(),
            address: node.address,
            names: node.advertise_names.iter().cloned().collect(),
        });
    }
    groups.into_values().collect()
}
