mod conflict;
mod error;
pub mod gate;
mod mutations;
mod queries;

pub use conflict::{conflicts, find_conflict};
pub use error::ReservationError;
pub use gate::{AccessGate, GatePermit, GateTimeout, Occupancy};

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::*;
use crate::notify::NotificationSink;
use crate::store::{ReservationStore, StoreError};

/// Outcome of a `remove` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Removal {
    /// Rows actually deleted, in schedule order.
    pub deleted: Vec<Reservation>,
    /// Matching rows left alone because the caller neither owns them nor is an admin.
    pub unauthorized: Vec<ReservationId>,
    /// Store failure that stopped the removal after some rows were already
    /// deleted. Rows past the failure are untouched.
    pub incomplete: Option<StoreError>,
}

impl Removal {
    pub fn count(&self) -> usize {
        self.deleted.len()
    }
}

/// Reservation orchestration: gate admission, per-room exclusive section,
/// conflict check and store write.
pub struct Scheduler {
    pub(super) store: Arc<dyn ReservationStore>,
    pub(super) notifier: Arc<dyn NotificationSink>,
    gate: AccessGate,
    /// One exclusive section per room, nested inside the gate. Same-tier
    /// cohorts run concurrently, so the gate alone does not make
    /// check-then-insert atomic.
    room_locks: DashMap<RoomId, Arc<Mutex<()>>>,
    gate_timeout: Option<Duration>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn ReservationStore>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            store,
            notifier,
            gate: AccessGate::new(),
            room_locks: DashMap::new(),
            gate_timeout: None,
        }
    }

    /// Bound gate waits. `None` waits forever.
    pub fn with_gate_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.gate_timeout = timeout;
        self
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    pub(super) async fn admit(&self, tier: Tier) -> Result<GatePermit, ReservationError> {
        match self.gate_timeout {
            Some(limit) => Ok(self.gate.acquire_timeout(tier, limit).await?),
            None => Ok(self.gate.acquire(tier).await),
        }
    }

    /// Enter the exclusive section of one room. Caller must already hold a gate permit.
    pub(super) async fn lock_room(&self, room_id: RoomId) -> OwnedMutexGuard<()> {
        // clone out of the map before awaiting so no shard lock is held across .await
        let lock = self.room_locks.entry(room_id).or_default().value().clone();
        lock.lock_owned().await
    }
}
