use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{ReservationStatus, SlotTime};

#[derive(Debug, PartialEq, Eq)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    TableNumberTaken(u32),
    ExceptionDateNotFound(NaiveDate),
    /// Another active reservation already holds this table at this date/time.
    /// The caller's availability snapshot is stale: re-fetch, never retry the same slot.
    SlotConflict {
        table_id: Ulid,
        date: NaiveDate,
        time: SlotTime,
    },
    SlotCapReached {
        date: NaiveDate,
        time: SlotTime,
        cap: u32,
    },
    DayUnavailable(NaiveDate),
    InvalidInput(&'static str),
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    CancellationWindowClosed,
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Conflicts a client resolves by re-reading availability and choosing again.
    pub fn is_retryable_conflict(&self) -> bool {
        matches!(self, EngineError::SlotConflict { .. } | EngineError::SlotCapReached { .. })
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::TableNumberTaken(n) => write!(f, "table number {n} is already in use"),
            EngineError::ExceptionDateNotFound(d) => write!(f, "no exception date on {d}"),
            EngineError::SlotConflict { table_id, date, time } => {
                write!(f, "table {table_id} is already booked on {date} at {time}")
            }
            EngineError::SlotCapReached { date, time, cap } => {
                write!(f, "slot {date} {time} is full ({cap} reservations)")
            }
            EngineError::DayUnavailable(d) => write!(f, "{d} is not open for reservations"),
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "cannot change reservation status from {from} to {to}")
            }
            EngineError::CancellationWindowClosed => {
                write!(f, "reservations can only be cancelled at least 24 hours in advance")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
