use crate::model::*;
use crate::store::StoreError;

use super::gate::GateTimeout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationError {
    /// `start` is not strictly before `end`.
    InvalidInterval { start: Ts, end: Ts },
    RoomNotFound(RoomId),
    /// The candidate overlaps an existing reservation.
    Conflict { room_id: RoomId, existing: ReservationId },
    /// Caller may not act on this reservation (or in this user's name).
    Unauthorized(UserId),
    LimitExceeded(&'static str),
    /// Gate admission did not happen within the configured bound.
    GateTimeout(GateTimeout),
    Store(StoreError),
}

impl std::fmt::Display for ReservationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReservationError::InvalidInterval { start, end } => {
                write!(f, "invalid interval: start {start} is not before end {end}")
            }
            ReservationError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            ReservationError::Conflict { room_id, existing } => {
                write!(f, "room {room_id} conflicts with reservation {existing}")
            }
            ReservationError::Unauthorized(user) => write!(f, "user {user} not authorized"),
            ReservationError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            ReservationError::GateTimeout(t) => write!(f, "{t}"),
            ReservationError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for ReservationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReservationError::Store(e) => Some(e),
            ReservationError::GateTimeout(t) => Some(t),
            _ => None,
        }
    }
}

impl From<StoreError> for ReservationError {
    fn from(e: StoreError) -> Self {
        ReservationError::Store(e)
    }
}

impl From<GateTimeout> for ReservationError {
    fn from(e: GateTimeout) -> Self {
        ReservationError::GateTimeout(e)
    }
}

impl ReservationError {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ReservationError::InvalidInterval { .. } => "invalid_interval",
            ReservationError::RoomNotFound(_) => "room_not_found",
            ReservationError::Conflict { .. } => "conflict",
            ReservationError::Unauthorized(_) => "unauthorized",
            ReservationError::LimitExceeded(_) => "limit_exceeded",
            ReservationError::GateTimeout(_) => "gate_timeout",
            ReservationError::Store(_) => "store_error",
        }
    }
}
