use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::compute_availability;
use super::policy::{self, ExceptionMode, apply_override, check_bookable, resolve_override};
use super::{Engine, EngineError};

impl Engine {
    /// Today's date in the restaurant's local time.
    pub fn today(&self) -> NaiveDate {
        self.options.today()
    }

    // ── Tables ───────────────────────────────────────────

    /// Every table, ordered by table number.
    pub fn list_tables(&self) -> Vec<Table> {
        let mut tables: Vec<Table> = self.tables.iter().map(|e| e.value().clone()).collect();
        tables.sort_by_key(|t| t.table_number);
        tables
    }

    pub fn list_active_tables(&self) -> Vec<Table> {
        let mut tables = self.list_tables();
        tables.retain(|t| t.is_active);
        tables
    }

    pub fn get_table(&self, id: &Ulid) -> Option<Table> {
        self.tables.get(id).map(|e| e.value().clone())
    }

    // ── Reservations ─────────────────────────────────────

    /// Reservations on `date` ordered by time then creation.
    pub async fn list_reservations(&self, date: NaiveDate, include_cancelled: bool) -> Vec<Reservation> {
        let Some(day) = self.day(&date) else {
            return Vec::new();
        };
        let guard = day.read().await;
        guard
            .reservations
            .iter()
            .filter(|r| include_cancelled || r.status.occupies_slot())
            .cloned()
            .collect()
    }

    pub async fn get_reservation(&self, id: &Ulid) -> Option<Reservation> {
        let date = *self.reservation_dates.get(id)?.value();
        let day = self.day(&date)?;
        let guard = day.read().await;
        guard.get(id).cloned()
    }

    // ── Settings & calendar ──────────────────────────────

    pub async fn get_reservation_settings(&self) -> ReservationSettings {
        *self.settings.read().await
    }

    /// Exception dates on or after `from`, in date order.
    pub async fn list_exception_dates(&self, from: NaiveDate) -> Vec<ExceptionDate> {
        self.exceptions
            .read()
            .await
            .range(from..)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub(super) async fn exception_snapshot(&self) -> Vec<ExceptionDate> {
        self.exceptions.read().await.values().cloned().collect()
    }

    /// A table's hours on a day with the given override. Overrides only trim
    /// hours when exceptions are enforced.
    pub(super) fn effective_hours(&self, table: &Table, kind: Option<ExceptionKind>) -> Vec<SlotTime> {
        match self.options.exception_mode {
            ExceptionMode::Enforce => {
                apply_override(&table.available_hours, kind, self.options.dinner_starts_at)
            }
            ExceptionMode::Ignore => table.available_hours.clone(),
        }
    }

    /// Dates a guest can pick right now, starting tomorrow.
    pub async fn bookable_dates(&self, today: NaiveDate) -> Vec<NaiveDate> {
        let settings = self.get_reservation_settings().await;
        let exceptions = self.exception_snapshot().await;
        policy::bookable_dates(today, &settings, &exceptions, self.options.exception_mode)
    }

    // ── Availability ─────────────────────────────────────

    /// Free slots per active table that seats `party_size` on `date`.
    /// Tables with free slots come first, then by seats and table number.
    pub async fn availability_for(
        &self,
        date: NaiveDate,
        party_size: u32,
        today: NaiveDate,
    ) -> Result<Vec<TableAvailability>, EngineError> {
        if party_size == 0 {
            return Err(EngineError::InvalidInput("party_size must be positive"));
        }
        if party_size > MAX_PARTY_SIZE {
            return Err(EngineError::LimitExceeded("party too large"));
        }

        let settings = self.get_reservation_settings().await;
        let exceptions = self.exception_snapshot().await;
        check_bookable(date, today, &settings, &exceptions, self.options.exception_mode)?;

        let kind = resolve_override(date, &exceptions);
        let tables: Vec<Table> = self
            .list_active_tables()
            .into_iter()
            .map(|mut t| {
                t.available_hours = self.effective_hours(&t, kind);
                t
            })
            .collect();
        let reservations = self.list_reservations(date, false).await;

        let started = std::time::Instant::now();
        let result = compute_availability(party_size, &tables, &reservations);
        metrics::histogram!(crate::observability::AVAILABILITY_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(result)
    }
}
