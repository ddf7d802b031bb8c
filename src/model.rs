use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — wall-clock instants (creation stamps, cancellation cutoffs).
pub type Ms = i64;

/// A bookable time of day with minute granularity, displayed as `HH:MM`.
///
/// Ordering matches the lexicographic order of the `HH:MM` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotTime {
    minutes: u16,
}

impl SlotTime {
    /// Default boundary between lunch and dinner service.
    pub const DINNER_START: SlotTime = SlotTime { minutes: 17 * 60 };

    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour >= 24 || minute >= 60 {
            return None;
        }
        Some(Self {
            minutes: hour as u16 * 60 + minute as u16,
        })
    }

    /// Parse `HH:MM` or `HH:MM:SS`. Seconds are validated and dropped.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.trim().split(':');
        let hour = parse_clock_field(parts.next()?, 1)?;
        let minute = parse_clock_field(parts.next()?, 2)?;
        if let Some(seconds) = parts.next() {
            if parse_clock_field(seconds, 2)? >= 60 {
                return None;
            }
        }
        if parts.next().is_some() {
            return None;
        }
        Self::new(hour, minute)
    }

    pub fn hour(&self) -> u8 {
        (self.minutes / 60) as u8
    }

    pub fn minute(&self) -> u8 {
        (self.minutes % 60) as u8
    }

    pub fn minutes_since_midnight(&self) -> u16 {
        self.minutes
    }

    pub fn to_naive_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour() as u32, self.minute() as u32, 0).unwrap_or(NaiveTime::MIN)
    }
}

fn parse_clock_field(s: &str, min_digits: usize) -> Option<u8> {
    if s.len() < min_digits || s.len() > 2 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for SlotTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid time of day: {s:?} (expected HH:MM)"))
    }
}

/// Sort and deduplicate a list of bookable hours.
pub fn normalize_hours(mut hours: Vec<SlotTime>) -> Vec<SlotTime> {
    hours.sort();
    hours.dedup();
    hours
}

/// A physical table in the dining room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: Ulid,
    /// Human-facing number, unique among tables.
    pub table_number: u32,
    pub seats: u32,
    pub is_active: bool,
    /// Hours this table can be booked at, kept sorted and deduplicated.
    pub available_hours: Vec<SlotTime>,
}

/// Partial update for a table; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableUpdate {
    pub table_number: Option<u32>,
    pub seats: Option<u32>,
    pub is_active: Option<bool>,
    pub available_hours: Option<Vec<SlotTime>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Completed => "completed",
        }
    }

    /// Whether a reservation in this state occupies its table/time pair.
    pub fn occupies_slot(&self) -> bool {
        !matches!(self, ReservationStatus::Cancelled)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(ReservationStatus::Pending),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "cancelled" | "canceled" => Ok(ReservationStatus::Cancelled),
            "completed" => Ok(ReservationStatus::Completed),
            other => Err(format!("unknown reservation status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    /// Weak reference: may be unassigned, or point at a table that was
    /// deactivated or deleted since.
    pub table_id: Option<Ulid>,
    pub reservation_date: NaiveDate,
    pub reservation_time: SlotTime,
    pub guests_count: u32,
    pub guest_name: Option<String>,
    pub status: ReservationStatus,
    pub created_at: Ms,
}

/// Reservation-create command as submitted by a guest or an admin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub id: Ulid,
    pub table_id: Option<Ulid>,
    pub reservation_date: NaiveDate,
    pub reservation_time: SlotTime,
    pub guests_count: u32,
    pub guest_name: Option<String>,
}

/// Which weekdays accept reservations at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaysAvailable {
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
    pub sunday: bool,
}

impl DaysAvailable {
    pub fn all() -> Self {
        Self {
            monday: true,
            tuesday: true,
            wednesday: true,
            thursday: true,
            friday: true,
            saturday: true,
            sunday: true,
        }
    }

    pub fn is_open(&self, day: Weekday) -> bool {
        match day {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        }
    }

    pub fn set(&mut self, day: Weekday, open: bool) {
        let slot = match day {
            Weekday::Mon => &mut self.monday,
            Weekday::Tue => &mut self.tuesday,
            Weekday::Wed => &mut self.wednesday,
            Weekday::Thu => &mut self.thursday,
            Weekday::Fri => &mut self.friday,
            Weekday::Sat => &mut self.saturday,
            Weekday::Sun => &mut self.sunday,
        };
        *slot = open;
    }
}

/// Global reservation policy. One per restaurant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationSettings {
    pub days_available: DaysAvailable,
    /// Furthest bookable date, counted in days starting from tomorrow.
    pub advance_booking_days: u32,
    /// Site-wide cap of active reservations sharing one date/time.
    pub max_reservations_per_slot: u32,
}

impl Default for ReservationSettings {
    fn default() -> Self {
        Self {
            days_available: DaysAvailable::all(),
            advance_booking_days: 30,
            max_reservations_per_slot: 10,
        }
    }
}

/// A partial settings change. Unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    pub days: Vec<(Weekday, bool)>,
    pub advance_booking_days: Option<u32>,
    pub max_reservations_per_slot: Option<u32>,
}

impl SettingsPatch {
    pub fn apply(&self, mut settings: ReservationSettings) -> ReservationSettings {
        for (day, open) in &self.days {
            settings.days_available.set(*day, *open);
        }
        if let Some(days) = self.advance_booking_days {
            settings.advance_booking_days = days;
        }
        if let Some(cap) = self.max_reservations_per_slot {
            settings.max_reservations_per_slot = cap;
        }
        settings
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExceptionKind {
    Closed,
    LunchOnly,
    DinnerOnly,
}

impl ExceptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExceptionKind::Closed => "closed",
            ExceptionKind::LunchOnly => "lunch_only",
            ExceptionKind::DinnerOnly => "dinner_only",
        }
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExceptionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "closed" => Ok(ExceptionKind::Closed),
            "lunch_only" => Ok(ExceptionKind::LunchOnly),
            "dinner_only" => Ok(ExceptionKind::DinnerOnly),
            other => Err(format!("unknown exception type: {other}")),
        }
    }
}

/// Calendar override for a single date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionDate {
    pub date: NaiveDate,
    pub kind: ExceptionKind,
    pub reason: Option<String>,
}

/// All reservations for one calendar date, sorted by `(reservation_time, created_at)`.
#[derive(Debug, Clone)]
pub struct DayState {
    pub date: NaiveDate,
    pub reservations: Vec<Reservation>,
}

impl DayState {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order.
    pub fn insert(&mut self, reservation: Reservation) {
        let key = (reservation.reservation_time, reservation.created_at);
        let pos = self
            .reservations
            .binary_search_by_key(&key, |r| (r.reservation_time, r.created_at))
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn get(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn get_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Reservations that still occupy their slot.
    pub fn active(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter().filter(|r| r.status.occupies_slot())
    }

    /// Active reservations at exactly `time`, across all tables.
    pub fn active_at(&self, time: SlotTime) -> impl Iterator<Item = &Reservation> {
        let start = self.reservations.partition_point(|r| r.reservation_time < time);
        self.reservations[start..]
            .iter()
            .take_while(move |r| r.reservation_time == time)
            .filter(|r| r.status.occupies_slot())
    }
}

/// The event types — flat, no nesting beyond settings. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    TableCreated {
        id: Ulid,
        table_number: u32,
        seats: u32,
        is_active: bool,
        available_hours: Vec<SlotTime>,
    },
    TableUpdated {
        id: Ulid,
        table_number: u32,
        seats: u32,
        is_active: bool,
        available_hours: Vec<SlotTime>,
    },
    TableDeleted {
        id: Ulid,
    },
    ReservationCreated {
        id: Ulid,
        table_id: Option<Ulid>,
        reservation_date: NaiveDate,
        reservation_time: SlotTime,
        guests_count: u32,
        guest_name: Option<String>,
        status: ReservationStatus,
        created_at: Ms,
    },
    ReservationStatusChanged {
        id: Ulid,
        reservation_date: NaiveDate,
        status: ReservationStatus,
    },
    SettingsUpdated {
        settings: ReservationSettings,
    },
    ExceptionDateSet {
        date: NaiveDate,
        kind: ExceptionKind,
        reason: Option<String>,
    },
    ExceptionDateRemoved {
        date: NaiveDate,
    },
}

impl Event {
    pub fn table_created(table: &Table) -> Self {
        Event::TableCreated {
            id: table.id,
            table_number: table.table_number,
            seats: table.seats,
            is_active: table.is_active,
            available_hours: table.available_hours.clone(),
        }
    }

    pub fn table_updated(table: &Table) -> Self {
        Event::TableUpdated {
            id: table.id,
            table_number: table.table_number,
            seats: table.seats,
            is_active: table.is_active,
            available_hours: table.available_hours.clone(),
        }
    }

    pub fn reservation_created(r: &Reservation) -> Self {
        Event::ReservationCreated {
            id: r.id,
            table_id: r.table_id,
            reservation_date: r.reservation_date,
            reservation_time: r.reservation_time,
            guests_count: r.guests_count,
            guest_name: r.guest_name.clone(),
            status: r.status,
            created_at: r.created_at,
        }
    }

    /// The date whose reservation list this event touches, if any.
    pub fn reservation_date(&self) -> Option<NaiveDate> {
        match self {
            Event::ReservationCreated { reservation_date, .. }
            | Event::ReservationStatusChanged { reservation_date, .. } => Some(*reservation_date),
            _ => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// One eligible table and the slots still open on it for the requested date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableAvailability {
    pub table_id: Ulid,
    pub table_number: u32,
    pub seats: u32,
    pub available_slots: Vec<SlotTime>,
}

impl TableAvailability {
    pub fn has_slots(&self) -> bool {
        !self.available_slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> SlotTime {
        SlotTime::parse(s).unwrap()
    }

    fn reservation(time: &str, created_at: Ms, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            table_id: Some(Ulid::new()),
            reservation_date: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            reservation_time: t(time),
            guests_count: 2,
            guest_name: None,
            status,
            created_at,
        }
    }

    #[test]
    fn slot_time_parse_and_display() {
        assert_eq!(t("19:30").to_string(), "19:30");
        assert_eq!(t("09:05").to_string(), "09:05");
        assert_eq!(t("9:05").to_string(), "09:05");
        assert_eq!(t("00:00").minutes_since_midnight(), 0);
        assert_eq!(t("23:59").minutes_since_midnight(), 23 * 60 + 59);
    }

    #[test]
    fn slot_time_drops_seconds() {
        assert_eq!(t("19:30:00"), t("19:30"));
        assert_eq!(t("19:30:59"), t("19:30"));
    }

    #[test]
    fn slot_time_rejects_garbage() {
        for bad in ["", "19", "24:00", "19:60", "19:3", "19:30:60", "ab:cd", "19:30:00:00", "-1:00", "123:00"] {
            assert!(SlotTime::parse(bad).is_none(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn slot_time_orders_like_strings() {
        let mut strings = vec!["20:00", "09:30", "19:30", "12:00", "19:00"];
        let mut slots: Vec<SlotTime> = strings.iter().map(|s| t(s)).collect();
        strings.sort();
        slots.sort();
        let rendered: Vec<String> = slots.iter().map(|s| s.to_string()).collect();
        assert_eq!(rendered, strings);
    }

    #[test]
    fn normalize_hours_sorts_and_dedups() {
        let hours = normalize_hours(vec![t("20:00"), t("19:00"), t("20:00"), t("19:30")]);
        assert_eq!(hours, vec![t("19:00"), t("19:30"), t("20:00")]);
    }

    #[test]
    fn status_parse_roundtrip() {
        for status in [
            ReservationStatus::Pending,
            ReservationStatus::Confirmed,
            ReservationStatus::Cancelled,
            ReservationStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<ReservationStatus>().unwrap(), status);
        }
        assert_eq!("CANCELED".parse::<ReservationStatus>().unwrap(), ReservationStatus::Cancelled);
        assert!("seated".parse::<ReservationStatus>().is_err());
    }

    #[test]
    fn only_cancelled_frees_the_slot() {
        assert!(ReservationStatus::Pending.occupies_slot());
        assert!(ReservationStatus::Confirmed.occupies_slot());
        assert!(ReservationStatus::Completed.occupies_slot());
        assert!(!ReservationStatus::Cancelled.occupies_slot());
    }

    #[test]
    fn days_available_set_and_query() {
        let mut days = DaysAvailable::all();
        days.set(Weekday::Mon, false);
        assert!(!days.is_open(Weekday::Mon));
        assert!(days.is_open(Weekday::Tue));
        assert!(days.is_open(Weekday::Sun));
    }

    #[test]
    fn exception_kind_parse() {
        assert_eq!("closed".parse::<ExceptionKind>().unwrap(), ExceptionKind::Closed);
        assert_eq!("Lunch_Only".parse::<ExceptionKind>().unwrap(), ExceptionKind::LunchOnly);
        assert_eq!("dinner_only".parse::<ExceptionKind>().unwrap(), ExceptionKind::DinnerOnly);
        assert!("brunch".parse::<ExceptionKind>().is_err());
    }

    #[test]
    fn day_state_keeps_time_order() {
        let mut day = DayState::new(NaiveDate::from_ymd_opt(2026, 10, 20).unwrap());
        day.insert(reservation("20:00", 1, ReservationStatus::Pending));
        day.insert(reservation("19:00", 3, ReservationStatus::Pending));
        day.insert(reservation("19:00", 2, ReservationStatus::Pending));
        let order: Vec<(String, Ms)> = day
            .reservations
            .iter()
            .map(|r| (r.reservation_time.to_string(), r.created_at))
            .collect();
        assert_eq!(
            order,
            vec![("19:00".into(), 2), ("19:00".into(), 3), ("20:00".into(), 1)]
        );
    }

    #[test]
    fn day_state_active_at_skips_cancelled_and_other_times() {
        let mut day = DayState::new(NaiveDate::from_ymd_opt(2026, 10, 20).unwrap());
        day.insert(reservation("19:00", 1, ReservationStatus::Confirmed));
        day.insert(reservation("19:00", 2, ReservationStatus::Cancelled));
        day.insert(reservation("19:30", 3, ReservationStatus::Pending));
        day.insert(reservation("18:30", 4, ReservationStatus::Completed));
        assert_eq!(day.active_at(t("19:00")).count(), 1);
        assert_eq!(day.active_at(t("19:30")).count(), 1);
        assert_eq!(day.active_at(t("20:00")).count(), 0);
        assert_eq!(day.active().count(), 3);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::TableCreated {
            id: Ulid::new(),
            table_number: 7,
            seats: 4,
            is_active: true,
            available_hours: vec![t("19:00"), t("21:00")],
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
