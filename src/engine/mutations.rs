use chrono::NaiveDate;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{
    check_cancellation_window, check_no_conflict, check_slot_cap, check_transition, now_ms,
    reservation_starts_at, validate_new_reservation, validate_settings, validate_table,
};
use super::policy::{check_bookable, past_exceptions, resolve_override};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    // ── Tables ───────────────────────────────────────────

    pub async fn create_table(&self, table: Table) -> Result<Table, EngineError> {
        let table = Table {
            available_hours: normalize_hours(table.available_hours),
            ..table
        };
        validate_table(&table)?;

        let _gate = self.write_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        if self.tables.len() >= MAX_TABLES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many tables"));
        }
        if self.tables.contains_key(&table.id) {
            return Err(EngineError::AlreadyExists(table.id));
        }
        self.check_table_number_free(table.table_number, table.id)?;

        let event = Event::table_created(&table);
        self.wal_append(&event).await?;
        self.tables.insert(table.id, table.clone());
        self.notify.send(&event);
        Ok(table)
    }

    pub async fn update_table(&self, id: Ulid, update: TableUpdate) -> Result<Table, EngineError> {
        let _gate = self.write_gate.write().await;
        let _catalog = self.catalog_lock.lock().await;
        let mut table = self.get_table(&id).ok_or(EngineError::NotFound(id))?;

        if let Some(number) = update.table_number {
            table.table_number = number;
        }
        if let Some(seats) = update.seats {
            table.seats = seats;
        }
        if let Some(active) = update.is_active {
            table.is_active = active;
        }
        if let Some(hours) = update.available_hours {
            table.available_hours = normalize_hours(hours);
        }
        validate_table(&table)?;
        self.check_table_number_free(table.table_number, id)?;

        let event = Event::table_updated(&table);
        self.wal_append(&event).await?;
        self.tables.insert(id, table.clone());
        self.notify.send(&event);
        Ok(table)
    }

    /// Remove a table from the catalog. Its reservations keep their `table_id`.
    pub async fn delete_table(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.write_gate.write().await;
        let _catalog = self.catalog_lock.lock().await;
        if !self.tables.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::TableDeleted { id };
        self.wal_append(&event).await?;
        self.tables.remove(&id);
        self.notify.send(&event);
        Ok(())
    }

    fn check_table_number_free(&self, number: u32, owner: Ulid) -> Result<(), EngineError> {
        let taken = self
            .tables
            .iter()
            .any(|t| t.table_number == number && t.id != owner);
        if taken {
            return Err(EngineError::TableNumberTaken(number));
        }
        Ok(())
    }

    // ── Reservations ─────────────────────────────────────

    /// Book a slot. The conflict check and the insert happen under the day's
    /// write lock, so of two racing bookings for one table/slot exactly one wins.
    /// The shared write gate is held throughout, so no closure, table change or
    /// settings change can slip in between the policy checks and the insert.
    pub async fn create_reservation(
        &self,
        new: NewReservation,
        today: NaiveDate,
    ) -> Result<Reservation, EngineError> {
        validate_new_reservation(&new)?;

        let _gate = self.write_gate.read().await;
        let claim = IdClaim::take(&self.reservation_dates, new.id, new.reservation_date)?;
        let reservation = self.insert_reservation(new, today).await?;
        claim.keep();
        Ok(reservation)
    }

    async fn insert_reservation(
        &self,
        new: NewReservation,
        today: NaiveDate,
    ) -> Result<Reservation, EngineError> {
        let settings = self.get_reservation_settings().await;
        let exceptions = self.exception_snapshot().await;
        check_bookable(
            new.reservation_date,
            today,
            &settings,
            &exceptions,
            self.options.exception_mode,
        )?;

        if let Some(table_id) = new.table_id {
            let table = self.get_table(&table_id).ok_or(EngineError::NotFound(table_id))?;
            if !table.is_active {
                return Err(EngineError::InvalidInput("table is not active"));
            }
            if table.seats < new.guests_count {
                return Err(EngineError::InvalidInput("party does not fit at this table"));
            }
            let kind = resolve_override(new.reservation_date, &exceptions);
            if !self.effective_hours(&table, kind).contains(&new.reservation_time) {
                return Err(EngineError::InvalidInput("time is not offered on this table"));
            }
        }

        let day = self.day_or_insert(new.reservation_date);
        let mut guard = day.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many reservations on this date"));
        }
        let checked = match new.table_id {
            Some(table_id) => check_no_conflict(&guard, table_id, new.reservation_time),
            None => Ok(()),
        }
        .and_then(|()| {
            if self.options.enforce_slot_cap {
                check_slot_cap(&guard, new.reservation_time, settings.max_reservations_per_slot)
            } else {
                Ok(())
            }
        });
        if let Err(e) = checked {
            metrics::counter!(crate::observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let reservation = Reservation {
            id: new.id,
            table_id: new.table_id,
            reservation_date: new.reservation_date,
            reservation_time: new.reservation_time,
            guests_count: new.guests_count,
            guest_name: new.guest_name,
            status: ReservationStatus::Pending,
            created_at: now_ms(),
        };
        let event = Event::reservation_created(&reservation);
        self.persist_day_event(&mut guard, &event).await?;
        Ok(reservation)
    }

    /// Staff-side status change along the lifecycle.
    pub async fn update_reservation_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.resolve_reservation_write(&id).await?;
        let current = guard.get(&id).ok_or(EngineError::NotFound(id))?;
        check_transition(current.status, status)?;

        let event = Event::ReservationStatusChanged {
            id,
            reservation_date: current.reservation_date,
            status,
        };
        self.persist_day_event(&mut guard, &event).await?;
        guard.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Guest-side cancellation: only while the reservation starts at least
    /// [`super::CANCELLATION_NOTICE_MS`] after `now`.
    pub async fn cancel_reservation(&self, id: Ulid, now: Ms) -> Result<Reservation, EngineError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.resolve_reservation_write(&id).await?;
        let current = guard.get(&id).ok_or(EngineError::NotFound(id))?;
        check_transition(current.status, ReservationStatus::Cancelled)?;
        let starts_at = reservation_starts_at(
            current.reservation_date,
            current.reservation_time,
            self.options.utc_offset,
        );
        check_cancellation_window(starts_at, now)?;

        let event = Event::ReservationStatusChanged {
            id,
            reservation_date: current.reservation_date,
            status: ReservationStatus::Cancelled,
        };
        self.persist_day_event(&mut guard, &event).await?;
        guard.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    // ── Settings & calendar ──────────────────────────────

    pub async fn update_settings(&self, settings: ReservationSettings) -> Result<(), EngineError> {
        validate_settings(&settings)?;
        let _gate = self.write_gate.write().await;
        let mut guard = self.settings.write().await;
        let event = Event::SettingsUpdated { settings };
        self.wal_append(&event).await?;
        *guard = settings;
        self.notify.send(&event);
        Ok(())
    }

    /// Apply a partial change to the current settings atomically.
    pub async fn patch_settings(&self, patch: &SettingsPatch) -> Result<ReservationSettings, EngineError> {
        let _gate = self.write_gate.write().await;
        let mut guard = self.settings.write().await;
        let settings = patch.apply(*guard);
        validate_settings(&settings)?;
        let event = Event::SettingsUpdated { settings };
        self.wal_append(&event).await?;
        *guard = settings;
        self.notify.send(&event);
        Ok(settings)
    }

    /// Insert or replace the override for one date. Past dates are rejected.
    pub async fn set_exception_date(
        &self,
        exception: ExceptionDate,
        today: NaiveDate,
    ) -> Result<(), EngineError> {
        if exception.date < today {
            return Err(EngineError::InvalidInput("exception date is in the past"));
        }
        if exception.reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("reason too long"));
        }

        let _gate = self.write_gate.write().await;
        let mut guard = self.exceptions.write().await;
        if !guard.contains_key(&exception.date) && guard.len() >= MAX_EXCEPTION_DATES {
            return Err(EngineError::LimitExceeded("too many exception dates"));
        }
        let event = Event::ExceptionDateSet {
            date: exception.date,
            kind: exception.kind,
            reason: exception.reason.clone(),
        };
        self.wal_append(&event).await?;
        guard.insert(exception.date, exception);
        self.notify.send(&event);
        Ok(())
    }

    pub async fn remove_exception_date(&self, date: NaiveDate) -> Result<(), EngineError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.exceptions.write().await;
        if !guard.contains_key(&date) {
            return Err(EngineError::ExceptionDateNotFound(date));
        }
        let event = Event::ExceptionDateRemoved { date };
        self.wal_append(&event).await?;
        guard.remove(&date);
        self.notify.send(&event);
        Ok(())
    }

    /// Drop exception dates that lie before `today`. Returns how many went.
    pub async fn prune_past_exceptions(&self, today: NaiveDate) -> Result<usize, EngineError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.exceptions.write().await;
        let snapshot: Vec<ExceptionDate> = guard.values().cloned().collect();
        let past = past_exceptions(&snapshot, today);
        for date in &past {
            let event = Event::ExceptionDateRemoved { date: *date };
            self.wal_append(&event).await?;
            guard.remove(date);
            self.notify.send(&event);
        }
        Ok(past.len())
    }

    // ── WAL maintenance ──────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.write_gate.write().await;
        let mut events = Vec::new();

        events.extend(self.list_tables().iter().map(Event::table_created));

        events.push(Event::SettingsUpdated {
            settings: *self.settings.read().await,
        });

        for exception in self.exceptions.read().await.values() {
            events.push(Event::ExceptionDateSet {
                date: exception.date,
                kind: exception.kind,
                reason: exception.reason.clone(),
            });
        }

        let mut dates: Vec<NaiveDate> = self.days.iter().map(|e| *e.key()).collect();
        dates.sort();
        for date in dates {
            let Some(day) = self.day(&date) else { continue };
            let guard = day.read().await;
            events.extend(guard.reservations.iter().map(Event::reservation_created));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// A reservation id reserved in the id index before the booking is checked.
/// Released on drop unless the booking went through.
struct IdClaim<'a> {
    index: &'a DashMap<Ulid, NaiveDate>,
    id: Ulid,
    kept: bool,
}

impl<'a> IdClaim<'a> {
    fn take(index: &'a DashMap<Ulid, NaiveDate>, id: Ulid, date: NaiveDate) -> Result<Self, EngineError> {
        match index.entry(id) {
            Entry::Occupied(_) => Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(date);
                Ok(Self { index, id, kept: false })
            }
        }
    }

    fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for IdClaim<'_> {
    fn drop(&mut self) {
        if !self.kept {
            self.index.remove(&self.id);
        }
    }
}
