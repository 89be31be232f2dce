//! Persistence boundary for users, rooms and reservations.
//!
//! The scheduler only talks to [`ReservationStore`]; [`WalStore`] is the
//! durable implementation used by the server.

mod wal_store;

pub use wal_store::WalStore;

use async_trait::async_trait;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Referential integrity: the reservation names a room that is not provisioned.
    MissingRoom(RoomId),
    /// Referential integrity: the reservation names an unknown user.
    MissingUser(UserId),
    Invalid(&'static str),
    WalError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::MissingRoom(id) => write!(f, "no such room: {id}"),
            StoreError::MissingUser(id) => write!(f, "no such user: {id}"),
            StoreError::Invalid(msg) => write!(f, "invalid record: {msg}"),
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Keyed storage for users, rooms and reservations.
///
/// Reads must be safe under concurrency. Writes are applied one at a time
/// per record; cross-record atomicity (check-then-insert) is the caller's job.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn find_room(&self, id: RoomId) -> Result<Option<Room>, StoreError>;

    /// All rooms, ascending by id.
    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError>;

    /// Matching reservations, ascending by start time.
    async fn list_reservations(
        &self,
        filter: ReservationFilter,
    ) -> Result<Vec<Reservation>, StoreError>;

    async fn insert_reservation(&self, reservation: &Reservation) -> Result<(), StoreError>;

    /// Delete by id. Returns the number of rows removed (0 or 1).
    async fn delete_reservation(&self, id: ReservationId) -> Result<usize, StoreError>;

    async fn upsert_user(&self, user: User) -> Result<(), StoreError>;

    async fn upsert_room(&self, room: Room) -> Result<(), StoreError>;
}
