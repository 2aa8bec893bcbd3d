//! Delegation bookkeeping for one name category.
//!
//! The group-wide advertise and find name sets each get one
//! [`NameTracker`]: which minion currently carries the radio operation,
//! whether the operation is on the air, and whether the payload must be
//! regenerated before the next send. The two categories differ only in a
//! handful of branches, so a tag field replaces any deeper polymorphism.

use std::collections::BTreeSet;

use scatter_core::wire::{BusAddress, DeviceAddress};
use scatter_topo::NodeDb;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameCategory {
    Advertise,
    Find,
}

/// Delegation state for one category.
#[derive(Debug)]
pub struct NameTracker {
    pub category: NameCategory,
    /// Minion currently delegated; `None` means the operation runs locally
    /// (or not at all).
    pub minion: Option<BusAddress>,
    /// Find only: bus name discovery results are reported to.
    pub result_dest: String,
    /// Find only: devices excluded from discovery (already connected).
    pub ignore_addrs: BTreeSet<DeviceAddress>,
    pub active: bool,
    pub dirty: bool,
    /// Total names in this category across the whole group. Maintained
    /// incrementally on every add/remove, mirroring the reference count in
    /// the node database.
    pub count: usize,
    /// Invalidates in-flight rotation work when delegation is re-planned.
    pub rotate_token: u64,
}

impl NameTracker {
    pub fn new(category: NameCategory) -> Self {
        NameTracker {
            category,
            minion: None,
            result_dest: String::new(),
            ignore_addrs: BTreeSet::new(),
            active: false,
            dirty: false,
            count: 0,
            rotate_token: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Record `name` for `address`'s node and grow the group total.
    /// Returns false when the node is unknown or already had the name.
    pub fn add_name(&mut self, db: &NodeDb, address: &BusAddress, name: &str) -> bool {
        let added = match self.category {
            NameCategory::Advertise => db.add_advertise_name(address, name),
            NameCategory::Find => db.add_find_name(address, name),
        };
        if added {
            self.count += 1;
            self.dirty = true;
        }
        added
    }

    /// Remove `name` from `address`'s node and shrink the group total.
    pub fn remove_name(&mut self, db: &NodeDb, address: &BusAddress, name: &str) -> bool {
        let removed = match self.category {
            NameCategory::Advertise => db.remove_advertise_name(address, name),
            NameCategory::Find => db.remove_find_name(address, name),
        };
        if removed {
            self.count = self.count.saturating_sub(1);
            self.dirty = true;
        }
        removed
    }

    /// Drop a departed node's names from the group total.
    pub fn forget_node_names(&mut self, names: usize) {
        if names > 0 {
            self.count = self.count.saturating_sub(names);
            self.dirty = true;
        }
    }
}

/// Outcome of one delegation recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub start: bool,
    pub stop: bool,
    pub restart: bool,
}

impl Decision {
    pub fn idle(&self) -> bool {
        !self.start && !self.stop && !self.restart
    }

    /// The three actions are mutually exclusive by construction; a state
    /// where two hold at once is a programming error.
    pub fn consistent(&self) -> bool {
        u8::from(self.start) + u8::from(self.stop) + u8::from(self.restart) <= 1
    }
}

/// The delegation decision function, recomputed whenever the name set,
/// connectivity, minion membership, or device availability changes.
pub fn decide(
    active: bool,
    empty: bool,
    changed: bool,
    allow_connections: bool,
    device_available: bool,
) -> Decision {
    Decision {
        start: !active && !empty && allow_connections && device_available,
        stop: active && (empty || !allow_connections),
        restart: active && changed && !empty && allow_connections,
    }
}
