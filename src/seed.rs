//! Startup provisioning of users and rooms from a JSON file:
//!
//! ```json
//! { "users": [{"id": 1, "tier": "student", "contact": "s1@uni.edu"}],
//!   "rooms": [{"id": 5, "capacity": 12, "area": 300, "note": "projector"}] }
//! ```

use std::fmt;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::model::{Room, User};
use crate::store::{ReservationStore, StoreError};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Seed {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub rooms: Vec<Room>,
}

#[derive(Debug)]
pub enum SeedError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Store(StoreError),
}

impl fmt::Display for SeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedError::Io(e) => write!(f, "cannot read seed file: {e}"),
            SeedError::Parse(e) => write!(f, "malformed seed file: {e}"),
            SeedError::Store(e) => write!(f, "seeding failed: {e}"),
        }
    }
}

impl std::error::Error for SeedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SeedError::Io(e) => Some(e),
            SeedError::Parse(e) => Some(e),
            SeedError::Store(e) => Some(e),
        }
    }
}

impl From<StoreError> for SeedError {
    fn from(e: StoreError) -> Self {
        SeedError::Store(e)
    }
}

impl Seed {
    pub fn parse(json: &str) -> Result<Self, SeedError> {
        serde_json::from_str(json).map_err(SeedError::Parse)
    }

    pub fn load(path: &Path) -> Result<Self, SeedError> {
        let json = std::fs::read_to_string(path).map_err(SeedError::Io)?;
        Self::parse(&json)
    }

    /// Upsert everything into `store`. Existing records with the same id are replaced.
    pub async fn apply(self, store: &dyn ReservationStore) -> Result<(), SeedError> {
        let (users, rooms) = (self.users.len(), self.rooms.len());
        for user in self.users {
            store.upsert_user(user).await?;
        }
        for room in self.rooms {
            store.upsert_room(room).await?;
        }
        info!("seeded {users} users and {rooms} rooms");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tier;
    use crate::store::WalStore;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomsched_test_seed");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn parses_users_and_rooms() {
        let seed = Seed::parse(
            r#"{"users": [{"id": 9, "tier": "admin", "contact": "root@uni.edu"}],
                "rooms": [{"id": 5, "capacity": 12, "area": 300},
                          {"id": 6, "capacity": 2, "area": 80, "note": "quiet"}]}"#,
        )
        .unwrap();
        assert_eq!(seed.users[0].tier, Tier::Admin);
        assert_eq!(seed.rooms[0].note, None);
        assert_eq!(seed.rooms[1].note.as_deref(), Some("quiet"));
    }

    #[test]
    fn rejects_unknown_tier_and_fields() {
        assert!(matches!(
            Seed::parse(r#"{"users": [{"id": 1, "tier": "staff", "contact": "x"}]}"#),
            Err(SeedError::Parse(_))
        ));
        assert!(matches!(Seed::parse(r#"{"groups": []}"#), Err(SeedError::Parse(_))));
        assert!(Seed::parse("{}").unwrap().users.is_empty());
    }

    #[tokio::test]
    async fn apply_upserts_into_store() {
        let store = WalStore::open(&test_wal_path("apply.wal")).unwrap();
        Seed::parse(
            r#"{"users": [{"id": 1, "tier": "student", "contact": "a@uni.edu"}],
                "rooms": [{"id": 5, "capacity": 12, "area": 300}]}"#,
        )
        .unwrap()
        .apply(&store)
        .await
        .unwrap();
        assert_eq!(store.find_user(1).await.unwrap().map(|u| u.contact), Some("a@uni.edu".into()));
        assert!(store.find_room(5).await.unwrap().is_some());

        let too_long = format!(
            r#"{{"users": [{{"id": 2, "tier": "faculty", "contact": "{}"}}]}}"#,
            "x".repeat(crate::limits::MAX_CONTACT_LEN + 1)
        );
        let err = Seed::parse(&too_long).unwrap().apply(&store).await.unwrap_err();
        assert!(matches!(err, SeedError::Store(StoreError::Invalid(_))));
    }
}
