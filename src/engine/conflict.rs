use chrono::{FixedOffset, NaiveDate, TimeZone};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Minimum notice for a guest-initiated cancellation.
pub const CANCELLATION_NOTICE_MS: Ms = 24 * 3_600_000;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_table(table: &Table) -> Result<(), EngineError> {
    if table.table_number == 0 {
        return Err(EngineError::InvalidInput("table_number must be positive"));
    }
    if table.seats == 0 {
        return Err(EngineError::InvalidInput("seats must be positive"));
    }
    if table.table_number > MAX_TABLE_NUMBER {
        return Err(EngineError::LimitExceeded("table number too large"));
    }
    if table.seats > MAX_SEATS {
        return Err(EngineError::LimitExceeded("too many seats"));
    }
    if table.available_hours.len() > MAX_HOURS_PER_TABLE {
        return Err(EngineError::LimitExceeded("too many hours on table"));
    }
    Ok(())
}

pub(crate) fn validate_new_reservation(new: &NewReservation) -> Result<(), EngineError> {
    if new.guests_count == 0 {
        return Err(EngineError::InvalidInput("guests_count must be positive"));
    }
    if new.guests_count > MAX_PARTY_SIZE {
        return Err(EngineError::LimitExceeded("party too large"));
    }
    if new.guest_name.as_ref().is_some_and(|n| n.len() > MAX_GUEST_NAME_LEN) {
        return Err(EngineError::LimitExceeded("guest name too long"));
    }
    Ok(())
}

pub(crate) fn validate_settings(settings: &ReservationSettings) -> Result<(), EngineError> {
    if settings.advance_booking_days > MAX_ADVANCE_BOOKING_DAYS {
        return Err(EngineError::LimitExceeded("advance booking window too long"));
    }
    if settings.max_reservations_per_slot == 0 {
        return Err(EngineError::InvalidInput("max_reservations_per_slot must be positive"));
    }
    if settings.max_reservations_per_slot > MAX_SLOT_CAP {
        return Err(EngineError::LimitExceeded("slot cap too large"));
    }
    Ok(())
}

/// The table/date/time uniqueness constraint. Caller holds the day's write lock,
/// so check and insert form one atomic step.
pub(crate) fn check_no_conflict(
    day: &DayState,
    table_id: Ulid,
    time: SlotTime,
) -> Result<(), EngineError> {
    if day.active_at(time).any(|r| r.table_id == Some(table_id)) {
        return Err(EngineError::SlotConflict {
            table_id,
            date: day.date,
            time,
        });
    }
    Ok(())
}

/// Site-wide per-slot cap across all tables.
pub(crate) fn check_slot_cap(day: &DayState, time: SlotTime, cap: u32) -> Result<(), EngineError> {
    if day.active_at(time).count() >= cap as usize {
        return Err(EngineError::SlotCapReached {
            date: day.date,
            time,
            cap,
        });
    }
    Ok(())
}

/// `pending → confirmed → completed`, and `pending|confirmed → cancelled`.
pub(crate) fn check_transition(
    from: ReservationStatus,
    to: ReservationStatus,
) -> Result<(), EngineError> {
    use ReservationStatus::*;
    match (from, to) {
        (Pending, Confirmed) | (Confirmed, Completed) | (Pending | Confirmed, Cancelled) => Ok(()),
        _ => Err(EngineError::InvalidTransition { from, to }),
    }
}

/// Instant the reservation starts, reading its date/time in the restaurant's offset.
pub(crate) fn reservation_starts_at(date: NaiveDate, time: SlotTime, offset: FixedOffset) -> Ms {
    let local = date.and_time(time.to_naive_time());
    match offset.from_local_datetime(&local).single() {
        Some(dt) => dt.timestamp_millis(),
        None => local.and_utc().timestamp_millis(),
    }
}

pub(crate) fn check_cancellation_window(starts_at: Ms, now: Ms) -> Result<(), EngineError> {
    if starts_at - now < CANCELLATION_NOTICE_MS {
        return Err(EngineError::CancellationWindowClosed);
    }
    Ok(())
}
