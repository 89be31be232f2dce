use std::fmt;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix seconds, UTC. The only time type.
pub type Ts = i64;

/// `ctime`-style rendering, e.g. `Thu Jan  1 00:00:00 1970`.
pub fn ctime(ts: Ts) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|t| t.format("%a %b %e %H:%M:%S %Y").to_string())
        .unwrap_or_else(|| ts.to_string())
}

pub type UserId = i64;
pub type RoomId = i64;
pub type ReservationId = Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ts,
    pub end: Ts,
}

impl Span {
    pub fn new(start: Ts, end: Ts) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn try_new(start: Ts, end: Ts) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration(&self) -> Ts {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Intersection with the closed range `[from, to]`. Used by removal,
    /// where touching an endpoint counts.
    pub fn touches(&self, from: Ts, to: Ts) -> bool {
        self.start <= to && from <= self.end
    }
}

/// Access tier of a user. Determines admission order in the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Student,
    Faculty,
    Admin,
}

impl Tier {
    pub fn label(&self) -> &'static str {
        match self {
            Tier::Student => "student",
            Tier::Faculty => "faculty",
            Tier::Admin => "admin",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub tier: Tier,
    pub contact: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub capacity: u32,
    /// Floor area in square feet.
    pub area: u32,
    #[serde(default)]
    pub note: Option<String>,
}

/// A stored reservation row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub span: Span,
}

/// A candidate reservation, not yet validated or stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationRequest {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub start: Ts,
    pub end: Ts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationFilter {
    Room(RoomId),
    User(UserId),
}

/// Store mutations. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserUpserted(User),
    RoomUpserted(Room),
    ReservationInserted(Reservation),
    ReservationDeleted { id: ReservationId, room_id: RoomId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_containment_overlaps() {
        let outer = Span::new(0, 1000);
        let inner = Span::new(400, 500);
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }

    #[test]
    fn span_try_new_rejects_empty_and_reversed() {
        assert!(Span::try_new(10, 10).is_none());
        assert!(Span::try_new(20, 10).is_none());
        assert_eq!(Span::try_new(10, 20), Some(Span::new(10, 20)));
        assert_eq!(Span::new(10, 20).duration(), 10);
    }

    #[test]
    fn span_touches_is_inclusive() {
        let s = Span::new(100, 200);
        assert!(s.touches(200, 200)); // end instant
        assert!(s.touches(100, 100)); // start instant
        assert!(s.touches(50, 150));
        assert!(!s.touches(201, 300));
        assert!(!s.touches(0, 99));
    }

    #[test]
    fn ctime_layout() {
        assert_eq!(ctime(0), "Thu Jan  1 00:00:00 1970");
        assert_eq!(ctime(1_700_000_000), "Tue Nov 14 22:13:20 2023");
    }

    #[test]
    fn tier_serde_rejects_unknown() {
        let t: Tier = serde_json::from_str("\"faculty\"").unwrap();
        assert_eq!(t, Tier::Faculty);
        assert!(serde_json::from_str::<Tier>("\"staff\"").is_err());
        assert!(serde_json::from_str::<Tier>("1").is_err());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationInserted(Reservation {
            id: Ulid::new(),
            room_id: 5,
            user_id: 1,
            span: Span::new(3600, 7200),
        });
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
