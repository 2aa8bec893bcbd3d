//! Time-bounded cache of discovered-but-unconnected device groups.
//!
//! Each entry snapshots everything advertised under one connect address at
//! one advertisement revision. The cache itself holds no timers: the owner
//! schedules an expiry for `(id, generation)` and calls
//! [`FoundNodeCache::take_expired`] when it fires. Refreshing bumps the
//! generation, so an expiry scheduled before the refresh lands on a stale
//! generation and does nothing.

use scatter_core::wire::{BusAddress, DeviceAddress};

use crate::node::NodeInfo;

/// One cached advertisement snapshot.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub id: u64,
    pub uuid_rev: u32,
    pub generation: u64,
    pub connect_address: BusAddress,
    pub ad_info: Vec<NodeInfo>,
}

#[derive(Default)]
pub struct FoundNodeCache {
    entries: Vec<CacheEntry>,
    next_id: u64,
}

impl FoundNodeCache {
    pub fn new() -> Self {
        FoundNodeCache::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// The entry whose snapshot contains `device`, if any. Revisions are not
    /// unique — during a transition two devices can momentarily share one —
    /// so lookup goes through the member list, not the revision.
    pub fn lookup_device(&self, device: DeviceAddress) -> Option<&CacheEntry> {
        self.entries
            .iter()
            .find(|e| e.ad_info.iter().any(|n| n.address.device == device))
    }

    pub fn get(&self, id: u64) -> Option<&CacheEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Insert a fresh snapshot, returning its `(id, generation)` for expiry
    /// scheduling.
    pub fn insert(
        &mut self,
        uuid_rev: u32,
        connect_address: BusAddress,
        ad_info: Vec<NodeInfo>,
    ) -> (u64, u64) {
        self.next_id += 1;
        let entry = CacheEntry {
            id: self.next_id,
            uuid_rev,
            generation: 0,
            connect_address,
            ad_info,
        };
        self.entries.push(entry);
        (self.next_id, 0)
    }

    /// Re-arm an entry that was seen again at an unchanged revision.
    /// Returns the new generation to schedule expiry against.
    pub fn refresh(&mut self, id: u64) -> Option<u64> {
        let entry = self.entries.iter_mut().find(|e| e.id == id)?;
        entry.generation += 1;
        Some(entry.generation)
    }

    /// Remove and return the entry only if `generation` is still current.
    /// A stale generation means the entry was refreshed after this expiry
    /// was scheduled; the fire is a no-op.
    pub fn take_expired(&mut self, id: u64, generation: u64) -> Option<CacheEntry> {
        let index = self
            .entries
            .iter()
            .position(|e| e.id == id && e.generation == generation)?;
        Some(self.entries.remove(index))
    }

    /// Detach the listed nodes from whatever entries currently hold them,
    /// dropping entries emptied in the process. Returns the ids of dropped
    /// entries so their pending expiries can be ignored.
    pub fn detach_nodes(&mut self, addresses: &[BusAddress]) -> Vec<u64> {
        for entry in &mut self.entries {
            entry.ad_info.retain(|n| !addresses.contains(&n.address));
        }
        let mut dropped = Vec::new();
        self.entries.retain(|e| {
            if e.ad_info.is_empty() {
                dropped.push(e.id);
                false
            } else {
                true
            }
        });
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scatter_core::wire::BusAddress;

    fn addr(device: u64) -> BusAddress {
        BusAddress::new(DeviceAddress::new(device), 0x1001)
    }

    fn snapshot(devices: &[u64]) -> Vec<NodeInfo> {
        devices.iter().map(|d| NodeInfo::new(addr(*d))).collect()
    }

    #[test]
    fn lookup_finds_members_not_revisions() {
        let mut cache = FoundNodeCache::new();
        cache.insert(5, addr(1), snapshot(&[1, 2]));
        cache.insert(5, addr(3), snapshot(&[3]));

        assert_eq!(cache.lookup_device(DeviceAddress::new(2)).unwrap().connect_address, addr(1));
        assert_eq!(cache.lookup_device(DeviceAddress::new(3)).unwrap().connect_address, addr(3));
        assert!(cache.lookup_device(DeviceAddress::new(9)).is_none());
    }

    #[test]
    fn stale_generation_expiry_is_a_no_op() {
        let mut cache = FoundNodeCache::new();
        let (id, generation) = cache.insert(5, addr(1), snapshot(&[1]));

        let refreshed = cache.refresh(id).unwrap();
        assert_eq!(refreshed, generation + 1);

        // The pre-refresh expiry must not remove the entry.
        assert!(cache.take_expired(id, generation).is_none());
        assert_eq!(cache.len(), 1);

        // The current generation does.
        assert!(cache.take_expired(id, refreshed).is_some());
        assert!(cache.is_empty());
    }

    #[test]
    fn detach_drops_emptied_entries() {
        let mut cache = FoundNodeCache::new();
        let (kept_id, _) = cache.insert(5, addr(1), snapshot(&[1, 2]));
        let (dropped_id, _) = cache.insert(6, addr(3), snapshot(&[3]));

        let dropped = cache.detach_nodes(&[addr(2), addr(3)]);
        assert_eq!(dropped, vec![dropped_id]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(kept_id).unwrap().ad_info.len(), 1);
    }
}
