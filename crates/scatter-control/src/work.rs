//! Deferred work for the controller task.
//!
//! Every delayed action the protocol needs — the advertise-stop grace
//! period, delegation recomputation, cache expiry, minion rotation, the
//! handshake timeout — is a [`WorkItem`] on the controller's own queue.
//! Items that can be superseded carry a token or generation; the controller
//! compares it against its current value when the item arrives, so a fire
//! scheduled before a cancellation lands as a no-op instead of acting on
//! stale context.

use std::time::Duration;

use tokio::sync::mpsc;

/// One unit of deferred controller work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItem {
    /// Recompute both delegation state machines. `reset_minions` forces a
    /// fresh minion choice first.
    UpdateDelegations { reset_minions: bool },

    /// The advertise-stop grace period ran out; take the advertisement off
    /// the air for real.
    StopAdvertising { token: u64 },

    /// A found-node cache entry went unrefreshed for its full timeout.
    ExpireCacheEntry { id: u64, generation: u64 },

    /// Hand the named category's delegation to the next direct minion.
    RotateMinions { advertise: bool, token: u64 },

    /// The state-exchange reply never arrived.
    SetStateTimeout { token: u64 },
}

/// Handle for queueing work onto a controller, immediately or after a
/// delay. Cloneable; delayed items ride a spawned sleep so the scheduler
/// itself never blocks.
#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<WorkItem>,
}

impl Scheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WorkItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Scheduler { tx }, rx)
    }

    /// Queue `item` for the next loop iteration.
    pub fn dispatch(&self, item: WorkItem) {
        // A closed receiver means the controller is gone; nothing to do.
        let _ = self.tx.send(item);
    }

    /// Queue `item` after `delay`.
    pub fn dispatch_after(&self, delay: Duration, item: WorkItem) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(item);
        });
    }
}
