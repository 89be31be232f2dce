use crate::model::Ts;

/// Longest accepted session input line, in bytes.
pub const MAX_LINE_LEN: usize = 512;

/// Longest contact address stored for a user.
pub const MAX_CONTACT_LEN: usize = 64;

/// Longest free-form note stored for a room.
pub const MAX_NOTE_LEN: usize = 128;

pub const MIN_VALID_TIMESTAMP: Ts = 0;

/// 9999-12-31 23:59:59 UTC.
pub const MAX_VALID_TIMESTAMP: Ts = 253_402_300_799;

/// 366 days.
pub const MAX_SPAN_DURATION: Ts = 366 * 24 * 3600;

pub const MAX_RESERVATIONS_PER_ROOM: usize = 100_000;
