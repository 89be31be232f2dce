//! Per-connection session: identifies the caller, then runs commands
//! against the scheduler and renders replies as text.

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::command::{parse_command, Command, CommandError};
use crate::model::*;
use crate::observability;
use crate::scheduler::{Removal, ReservationError, Scheduler};

pub const ID_PROMPT: &str = "Please enter your user id: ";
pub const PROMPT: &str = "> ";
pub const GOODBYE: &str = "GOODBYE!\n";

/// End-of-transmission byte. A line starting with it ends the session.
pub const EOT: char = '\u{4}';

pub const HELP: &str = "Welcome to the scheduling system.\n\
- h - this help text\n\
- l - list the rooms\n\
- s ROOM - list the reservations for a room\n\
- r ROOM YYYY-MM-DD hh:mm YYYY-MM-DD hh:mm - reserve a room between two times (UTC)\n\
- u - list your reservations\n\
- d ROOM YYYY-MM-DD hh:mm [YYYY-MM-DD hh:mm] - delete your reservations in a room at that time or range\n\
- q - quit\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Active(User),
    Closed,
}

/// What to send back, and whether the connection stays open afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Continue(String),
    Close(String),
}

pub struct Session {
    scheduler: Arc<Scheduler>,
    state: SessionState,
}

impl Session {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            scheduler,
            state: SessionState::Unauthenticated,
        }
    }

    pub fn greeting(&self) -> &'static str {
        ID_PROMPT
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub async fn handle_line(&mut self, line: &str) -> Reply {
        if line.starts_with(EOT) {
            return self.close(GOODBYE);
        }
        match &self.state {
            SessionState::Unauthenticated => self.identify(line).await,
            SessionState::Active(user) => {
                let user = user.clone();
                self.dispatch(&user, line).await
            }
            SessionState::Closed => Reply::Close(String::new()),
        }
    }

    fn close(&mut self, text: &str) -> Reply {
        self.state = SessionState::Closed;
        Reply::Close(text.to_string())
    }

    async fn identify(&mut self, line: &str) -> Reply {
        let Ok(id) = line.trim().parse::<UserId>() else {
            return self.close("UNKNOWN USER!\n");
        };
        match self.scheduler.find_user(id).await {
            Ok(Some(user)) => {
                info!("session: user {} ({}) signed in", user.id, user.tier);
                self.state = SessionState::Active(user);
                Reply::Continue(format!("{HELP}{PROMPT}"))
            }
            Ok(None) => {
                debug!("session: unknown user id {id}");
                self.close("UNKNOWN USER!\n")
            }
            Err(e) => {
                error!("session: user lookup failed: {e}");
                self.close("INTERNAL ERROR\n")
            }
        }
    }

    async fn dispatch(&mut self, user: &User, line: &str) -> Reply {
        let cmd = match parse_command(line) {
            Ok(cmd) => cmd,
            Err(CommandError::Empty) => return Reply::Continue(PROMPT.to_string()),
            Err(CommandError::Unknown(_)) => {
                return Reply::Continue(format!("UNKNOWN COMMAND!\n{PROMPT}"));
            }
            Err(e) => return Reply::Continue(format!("NOT OKAY! {e}\n{PROMPT}")),
        };
        metrics::counter!(observability::COMMANDS_TOTAL, "command" => observability::command_label(&cmd))
            .increment(1);

        let body = match cmd {
            Command::Quit => return self.close(GOODBYE),
            Command::Help => HELP.to_string(),
            Command::ListRooms => match self.scheduler.list_rooms().await {
                Ok(rooms) => render_rooms(&rooms),
                Err(e) => outcome_line(&e),
            },
            Command::RoomSchedule { room_id } => {
                match self.scheduler.list_room_reservations(room_id).await {
                    Ok(rows) => render_schedule(&rows),
                    Err(e) => outcome_line(&e),
                }
            }
            Command::MySchedule => match self.scheduler.list_user_reservations(user.id).await {
                Ok(rows) => render_schedule(&rows),
                Err(e) => outcome_line(&e),
            },
            Command::Reserve { room_id, start, end } => {
                let request = ReservationRequest { room_id, user_id: user.id, start, end };
                match self.scheduler.reserve(request, user).await {
                    Ok(_) => "OKAY!\n".to_string(),
                    Err(e) => outcome_line(&e),
                }
            }
            Command::Remove { room_id, start, end } => {
                match self.scheduler.remove(room_id, start, end, user).await {
                    Ok(removal) => removal_line(&removal),
                    Err(e) => outcome_line(&e),
                }
            }
        };
        Reply::Continue(body + PROMPT)
    }
}

/// User-facing text for a failed operation.
pub fn outcome(e: &ReservationError) -> &'static str {
    match e {
        ReservationError::Conflict { .. } => "CONFLICT, TRY ANOTHER TIME",
        ReservationError::Unauthorized(_) => "NOT AUTHORIZED",
        ReservationError::RoomNotFound(_) => "ROOM NOT FOUND",
        ReservationError::InvalidInterval { .. } | ReservationError::LimitExceeded(_) => {
            "INVALID INTERVAL"
        }
        ReservationError::GateTimeout(_) => "BUSY, TRY AGAIN LATER",
        ReservationError::Store(_) => "INTERNAL ERROR",
    }
}

fn outcome_line(e: &ReservationError) -> String {
    format!("{}\n", outcome(e))
}

fn removal_line(removal: &Removal) -> String {
    if removal.count() == 0 && !removal.unauthorized.is_empty() {
        "NOT AUTHORIZED\n".to_string()
    } else {
        "OKAY!\n".to_string()
    }
}

pub fn render_rooms(rooms: &[Room]) -> String {
    let mut out = String::new();
    for r in rooms {
        let _ = write!(out, "ROOM {:4} | {} people ({} sqft)", r.id, r.capacity, r.area);
        if let Some(note) = r.note.as_deref().filter(|n| !n.is_empty()) {
            let _ = write!(out, " ({note})");
        }
        out.push('\n');
    }
    out
}

pub fn render_schedule(rows: &[Reservation]) -> String {
    let mut out = String::new();
    for r in rows {
        let _ = writeln!(out, "{} - {} - {}", r.room_id, ctime(r.span.start), ctime(r.span.end));
    }
    out
}
