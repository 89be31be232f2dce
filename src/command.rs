//! Line grammar of the interactive session.
//!
//! One command per line, whitespace separated, dispatched on a single
//! letter. Times are `YYYY-MM-DD hh:mm` in UTC.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    Quit,
    ListRooms,
    RoomSchedule { room_id: RoomId },
    MySchedule,
    Reserve { room_id: RoomId, start: Ts, end: Ts },
    /// `end == start` when only one instant was given.
    Remove { room_id: RoomId, start: Ts, end: Ts },
}

pub const RESERVE_USAGE: &str = "r ROOM YYYY-MM-DD hh:mm YYYY-MM-DD hh:mm";
pub const REMOVE_USAGE: &str = "d ROOM YYYY-MM-DD hh:mm [YYYY-MM-DD hh:mm]";
pub const SCHEDULE_USAGE: &str = "s ROOM";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    Empty,
    Unknown(String),
    /// Right verb, wrong shape. Carries the usage line.
    Usage(&'static str),
    BadRoom(String),
    BadTime(String),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Empty => write!(f, "empty command"),
            CommandError::Unknown(verb) => write!(f, "unknown command: {verb}"),
            CommandError::Usage(usage) => write!(f, "usage: {usage}"),
            CommandError::BadRoom(s) => write!(f, "not a room number: {s}"),
            CommandError::BadTime(s) => write!(f, "not a time: {s}"),
        }
    }
}

impl std::error::Error for CommandError {}

pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let mut words = line.split_whitespace();
    let verb = words.next().ok_or(CommandError::Empty)?;
    let args: Vec<&str> = words.collect();

    match (verb, args.as_slice()) {
        ("h", []) => Ok(Command::Help),
        ("q", []) => Ok(Command::Quit),
        ("l", []) => Ok(Command::ListRooms),
        ("u", []) => Ok(Command::MySchedule),
        ("s", [room]) => Ok(Command::RoomSchedule { room_id: parse_room(room)? }),
        ("s", _) => Err(CommandError::Usage(SCHEDULE_USAGE)),
        ("r", [room, d1, t1, d2, t2]) => Ok(Command::Reserve {
            room_id: parse_room(room)?,
            start: parse_time(d1, t1)?,
            end: parse_time(d2, t2)?,
        }),
        ("r", _) => Err(CommandError::Usage(RESERVE_USAGE)),
        ("d", [room, d1, t1]) => {
            let at = parse_time(d1, t1)?;
            Ok(Command::Remove { room_id: parse_room(room)?, start: at, end: at })
        }
        ("d", [room, d1, t1, d2, t2]) => Ok(Command::Remove {
            room_id: parse_room(room)?,
            start: parse_time(d1, t1)?,
            end: parse_time(d2, t2)?,
        }),
        ("d", _) => Err(CommandError::Usage(REMOVE_USAGE)),
        (other, _) => Err(CommandError::Unknown(other.to_string())),
    }
}

fn parse_room(s: &str) -> Result<RoomId, CommandError> {
    s.parse().map_err(|_| CommandError::BadRoom(s.to_string()))
}

/// `YYYY-MM-DD` + `hh:mm` as UTC unix seconds.
pub fn parse_time(date: &str, time: &str) -> Result<Ts, CommandError> {
    let bad = || CommandError::BadTime(format!("{date} {time}"));
    let d = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| bad())?;
    let t = NaiveTime::parse_from_str(time, "%H:%M").map_err(|_| bad())?;
    Ok(NaiveDateTime::new(d, t).and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_letter_commands() {
        assert_eq!(parse_command("h"), Ok(Command::Help));
        assert_eq!(parse_command("  q  "), Ok(Command::Quit));
        assert_eq!(parse_command("l"), Ok(Command::ListRooms));
        assert_eq!(parse_command("u"), Ok(Command::MySchedule));
        assert_eq!(parse_command("s 101"), Ok(Command::RoomSchedule { room_id: 101 }));
    }

    #[test]
    fn reserve_parses_utc_times() {
        let cmd = parse_command("r 5 2023-11-14 22:13 2023-11-14 23:13").unwrap();
        assert_eq!(
            cmd,
            Command::Reserve { room_id: 5, start: 1_699_999_980, end: 1_700_003_580 }
        );
    }

    #[test]
    fn remove_accepts_instant_or_range() {
        assert_eq!(
            parse_command("d 5 1970-01-01 01:00"),
            Ok(Command::Remove { room_id: 5, start: 3600, end: 3600 })
        );
        assert_eq!(
            parse_command("d\t5 1970-01-01 01:00 1970-01-01 02:00"),
            Ok(Command::Remove { room_id: 5, start: 3600, end: 7200 })
        );
    }

    #[test]
    fn malformed_input() {
        assert_eq!(parse_command(""), Err(CommandError::Empty));
        assert_eq!(parse_command("x"), Err(CommandError::Unknown("x".into())));
        assert_eq!(parse_command("help"), Err(CommandError::Unknown("help".into())));
        assert_eq!(parse_command("r 5"), Err(CommandError::Usage(RESERVE_USAGE)));
        assert_eq!(parse_command("d 5 1970-01-01"), Err(CommandError::Usage(REMOVE_USAGE)));
        assert_eq!(parse_command("s"), Err(CommandError::Usage(SCHEDULE_USAGE)));
        assert_eq!(
            parse_command("s lab"),
            Err(CommandError::BadRoom("lab".into()))
        );
        assert!(matches!(
            parse_command("r 5 2023-13-01 10:00 2023-13-01 11:00"),
            Err(CommandError::BadTime(_))
        ));
        assert!(matches!(
            parse_command("r 5 2023-01-01 25:00 2023-01-01 11:00"),
            Err(CommandError::BadTime(_))
        ));
    }
}
