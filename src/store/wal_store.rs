use std::io;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::info;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

use super::{ReservationStore, StoreError};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = Vec<(Event, oneshot::Sender<io::Result<()>>)>;

/// Background task that owns the WAL and batches appends for group commit:
/// take one append, drain whatever else is already queued, write the batch,
/// fsync once, answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };
        let mut batch: Pending = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // control commands run after the batch that preceded them
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Pending) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't bleed
    // into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

/// Durable store: concurrent in-memory indexes rebuilt from a WAL at startup.
pub struct WalStore {
    users: DashMap<UserId, User>,
    rooms: DashMap<RoomId, Room>,
    /// Per-room reservations, sorted by `span.start`.
    schedules: DashMap<RoomId, Vec<Reservation>>,
    /// Reverse lookup: reservation id → room id.
    reservation_rooms: DashMap<ReservationId, RoomId>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Shared by every append+apply, exclusive while a compaction snapshot
    /// is taken, so no logged event can be missing from the snapshot.
    commit: RwLock<()>,
}

impl WalStore {
    /// Open the log at `path`, replay it, and start the writer task.
    /// Must be called inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let wal = Wal::open(path)?;
        let replay = Wal::replay(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            users: DashMap::new(),
            rooms: DashMap::new(),
            schedules: DashMap::new(),
            reservation_rooms: DashMap::new(),
            wal_tx,
            commit: RwLock::new(()),
        };
        for event in &replay.events {
            store.apply(event);
        }
        info!(
            "store {}: replayed {} events ({} users, {} rooms, {} reservations)",
            path.display(),
            replay.events.len(),
            store.users.len(),
            store.rooms.len(),
            store.reservation_rooms.len()
        );
        Ok(store)
    }

    /// Apply an event to the indexes. Returns false if it changed nothing
    /// (a delete of an unknown reservation).
    fn apply(&self, event: &Event) -> bool {
        match event {
            Event::UserUpserted(user) => {
                self.users.insert(user.id, user.clone());
            }
            Event::RoomUpserted(room) => {
                self.schedules.entry(room.id).or_default();
                self.rooms.insert(room.id, room.clone());
            }
            Event::ReservationInserted(r) => {
                let mut schedule = self.schedules.entry(r.room_id).or_default();
                let pos = schedule.partition_point(|x| x.span.start <= r.span.start);
                schedule.insert(pos, r.clone());
                self.reservation_rooms.insert(r.id, r.room_id);
            }
            Event::ReservationDeleted { id, room_id } => {
                self.reservation_rooms.remove(id);
                let Some(mut schedule) = self.schedules.get_mut(room_id) else {
                    return false;
                };
                let before = schedule.len();
                schedule.retain(|r| r.id != *id);
                return schedule.len() < before;
            }
        }
        true
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    async fn persist_and_apply(&self, event: Event) -> Result<bool, StoreError> {
        let _commit = self.commit.read().await;
        self.wal_append(&event).await?;
        Ok(self.apply(&event))
    }

    /// Minimal event list that recreates the current state.
    fn snapshot(&self) -> Vec<Event> {
        let mut users: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by_key(|u| u.id);
        let mut rooms: Vec<Room> = self.rooms.iter().map(|e| e.value().clone()).collect();
        rooms.sort_by_key(|r| r.id);

        let mut events: Vec<Event> = users.into_iter().map(Event::UserUpserted).collect();
        events.extend(rooms.into_iter().map(Event::RoomUpserted));
        for entry in self.schedules.iter() {
            events.extend(entry.value().iter().cloned().map(Event::ReservationInserted));
        }
        events
    }

    /// Rewrite the WAL as a snapshot of the current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _commit = self.commit.write().await;
        let events = self.snapshot();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl ReservationStore for WalStore {
    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(&id).map(|e| e.value().clone()))
    }

    async fn find_room(&self, id: RoomId) -> Result<Option<Room>, StoreError> {
        Ok(self.rooms.get(&id).map(|e| e.value().clone()))
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let mut rooms: Vec<Room> = self.rooms.iter().map(|e| e.value().clone()).collect();
        rooms.sort_by_key(|r| r.id);
        Ok(rooms)
    }

    async fn list_reservations(
        &self,
        filter: ReservationFilter,
    ) -> Result<Vec<Reservation>, StoreError> {
        match filter {
            ReservationFilter::Room(room_id) => Ok(self
                .schedules
                .get(&room_id)
                .map(|e| e.value().clone())
                .unwrap_or_default()),
            ReservationFilter::User(user_id) => {
                let mut rows: Vec<Reservation> = self
                    .schedules
                    .iter()
                    .flat_map(|e| {
                        e.value()
                            .iter()
                            .filter(|r| r.user_id == user_id)
                            .cloned()
                            .collect::<Vec<_>>()
                    })
                    .collect();
                rows.sort_by_key(|r| (r.span.start, r.room_id));
                Ok(rows)
            }
        }
    }

    async fn insert_reservation(&self, reservation: &Reservation) -> Result<(), StoreError> {
        if reservation.span.start >= reservation.span.end {
            return Err(StoreError::Invalid("reservation must start before it ends"));
        }
        if !self.rooms.contains_key(&reservation.room_id) {
            return Err(StoreError::MissingRoom(reservation.room_id));
        }
        if !self.users.contains_key(&reservation.user_id) {
            return Err(StoreError::MissingUser(reservation.user_id));
        }
        self.persist_and_apply(Event::ReservationInserted(reservation.clone()))
            .await?;
        Ok(())
    }

    async fn delete_reservation(&self, id: ReservationId) -> Result<usize, StoreError> {
        let Some(room_id) = self.reservation_rooms.get(&id).map(|e| *e.value()) else {
            return Ok(0);
        };
        let removed = self
            .persist_and_apply(Event::ReservationDeleted { id, room_id })
            .await?;
        Ok(usize::from(removed))
    }

    async fn upsert_user(&self, user: User) -> Result<(), StoreError> {
        if user.contact.len() > MAX_CONTACT_LEN {
            return Err(StoreError::Invalid("contact address too long"));
        }
        self.persist_and_apply(Event::UserUpserted(user)).await?;
        Ok(())
    }

    async fn upsert_room(&self, room: Room) -> Result<(), StoreError> {
        if room.note.as_ref().is_some_and(|n| n.len() > MAX_NOTE_LEN) {
            return Err(StoreError::Invalid("room note too long"));
        }
        self.persist_and_apply(Event::RoomUpserted(room)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomsched_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn seeded(path: &Path) -> WalStore {
        let store = WalStore::open(path).unwrap();
        store
            .upsert_user(User { id: 1, tier: Tier::Student, contact: "s1@uni.edu".into() })
            .await
            .unwrap();
        store
            .upsert_user(User { id: 2, tier: Tier::Admin, contact: "a2@uni.edu".into() })
            .await
            .unwrap();
        store
            .upsert_room(Room { id: 5, capacity: 12, area: 300, note: Some("projector".into()) })
            .await
            .unwrap();
        store
            .upsert_room(Room { id: 3, capacity: 40, area: 900, note: None })
            .await
            .unwrap();
        store
    }

    fn row(room_id: RoomId, user_id: UserId, start: Ts, end: Ts) -> Reservation {
        Reservation { id: Ulid::new(), room_id, user_id, span: Span::new(start, end) }
    }

    #[tokio::test]
    async fn rooms_listed_by_id() {
        let store = seeded(&test_wal_path("rooms_by_id.wal")).await;
        let ids: Vec<RoomId> = store.list_rooms().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 5]);
        assert_eq!(store.find_room(5).await.unwrap().unwrap().note.as_deref(), Some("projector"));
        assert!(store.find_room(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reservations_ordered_by_start() {
        let store = seeded(&test_wal_path("ordered.wal")).await;
        for (s, e) in [(7200, 9000), (0, 3600), (3600, 7200)] {
            store.insert_reservation(&row(5, 1, s, e)).await.unwrap();
        }
        store.insert_reservation(&row(3, 1, 1800, 2000)).await.unwrap();

        let by_room = store.list_reservations(ReservationFilter::Room(5)).await.unwrap();
        let starts: Vec<Ts> = by_room.iter().map(|r| r.span.start).collect();
        assert_eq!(starts, vec![0, 3600, 7200]);

        let by_user = store.list_reservations(ReservationFilter::User(1)).await.unwrap();
        let starts: Vec<Ts> = by_user.iter().map(|r| r.span.start).collect();
        assert_eq!(starts, vec![0, 1800, 3600, 7200]);

        assert!(store.list_reservations(ReservationFilter::User(2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn insert_enforces_references() {
        let store = seeded(&test_wal_path("references.wal")).await;
        assert_eq!(
            store.insert_reservation(&row(42, 1, 0, 10)).await,
            Err(StoreError::MissingRoom(42))
        );
        assert_eq!(
            store.insert_reservation(&row(5, 77, 0, 10)).await,
            Err(StoreError::MissingUser(77))
        );
    }

    #[tokio::test]
    async fn delete_counts_rows() {
        let store = seeded(&test_wal_path("delete.wal")).await;
        let r = row(5, 1, 0, 3600);
        store.insert_reservation(&r).await.unwrap();
        assert_eq!(store.delete_reservation(r.id).await.unwrap(), 1);
        assert_eq!(store.delete_reservation(r.id).await.unwrap(), 0);
        assert!(store.list_reservations(ReservationFilter::Room(5)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_rejects_oversized_fields() {
        let store = WalStore::open(&test_wal_path("oversized.wal")).unwrap();
        let long = "x".repeat(MAX_CONTACT_LEN + 1);
        assert!(store
            .upsert_user(User { id: 1, tier: Tier::Faculty, contact: long })
            .await
            .is_err());
        let note = Some("n".repeat(MAX_NOTE_LEN + 1));
        assert!(store.upsert_room(Room { id: 1, capacity: 1, area: 1, note }).await.is_err());
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let path = test_wal_path("reopen.wal");
        let kept = row(5, 1, 3600, 7200);
        {
            let store = seeded(&path).await;
            let dropped = row(5, 2, 0, 3600);
            store.insert_reservation(&dropped).await.unwrap();
            store.insert_reservation(&kept).await.unwrap();
            store.delete_reservation(dropped.id).await.unwrap();
        }
        let store = WalStore::open(&path).unwrap();
        assert_eq!(store.find_user(2).await.unwrap().unwrap().tier, Tier::Admin);
        let rows = store.list_reservations(ReservationFilter::Room(5)).await.unwrap();
        assert_eq!(rows, vec![kept]);
    }

    #[tokio::test]
    async fn compaction_preserves_state() {
        let path = test_wal_path("compaction.wal");
        let kept = row(5, 1, 0, 3600);
        {
            let store = seeded(&path).await;
            for i in 0..20 {
                let tmp = row(3, 2, i * 10, i * 10 + 5);
                store.insert_reservation(&tmp).await.unwrap();
                store.delete_reservation(tmp.id).await.unwrap();
            }
            store.insert_reservation(&kept).await.unwrap();
            assert!(store.appends_since_compact().await >= 40);

            let before = std::fs::metadata(&path).unwrap().len();
            store.compact().await.unwrap();
            let after = std::fs::metadata(&path).unwrap().len();
            assert!(after < before);
            assert_eq!(store.appends_since_compact().await, 0);
        }
        let store = WalStore::open(&path).unwrap();
        assert_eq!(store.list_rooms().await.unwrap().len(), 2);
        assert_eq!(store.list_reservations(ReservationFilter::Room(5)).await.unwrap(), vec![kept]);
        assert!(store.list_reservations(ReservationFilter::Room(3)).await.unwrap().is_empty());
    }
}
