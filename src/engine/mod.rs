mod availability;
mod conflict;
mod error;
mod mutations;
mod policy;
mod queries;

pub use availability::{booked_times_by_table, compute_availability, open_slots};
pub use conflict::CANCELLATION_NOTICE_MS;
pub use error::EngineError;
pub use policy::{
    ExceptionMode, apply_override, bookable_dates, check_bookable, is_day_available,
    past_exceptions, resolve_override,
};

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate, Offset, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedDayState = Arc<RwLock<DayState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued,
/// then pays a single fsync for the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(ref e) = result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err() {
        // The whole batch is reported failed, so none of it may survive on disk.
        if let Err(e) = wal.discard_unsynced() {
            tracing::error!("WAL rollback failed: {e}");
        }
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

// ── Engine ───────────────────────────────────────────────

/// Per-restaurant behaviour switches, fixed for the engine's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub exception_mode: ExceptionMode,
    /// First slot of dinner service; earlier slots are lunch.
    pub dinner_starts_at: SlotTime,
    /// Apply `max_reservations_per_slot` across all tables at insert time.
    pub enforce_slot_cap: bool,
    /// Restaurant local time, used for "today" and the cancellation cutoff.
    pub utc_offset: FixedOffset,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            exception_mode: ExceptionMode::Enforce,
            dinner_starts_at: SlotTime::DINNER_START,
            enforce_slot_cap: false,
            utc_offset: Utc.fix(),
        }
    }
}

impl EngineOptions {
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.utc_offset).date_naive()
    }
}

/// The reservation store for one restaurant: table catalog, reservations by
/// date, settings singleton and exception dates, all rebuilt from the WAL.
pub struct Engine {
    pub(super) tables: DashMap<Ulid, Table>,
    pub(super) days: DashMap<NaiveDate, SharedDayState>,
    /// Reverse lookup: reservation id → date.
    pub(super) reservation_dates: DashMap<Ulid, NaiveDate>,
    pub(super) settings: RwLock<ReservationSettings>,
    pub(super) exceptions: RwLock<BTreeMap<NaiveDate, ExceptionDate>>,
    /// Serializes catalog edits so table numbers stay unique.
    pub(super) catalog_lock: Mutex<()>,
    /// Bookings and additive edits hold it shared for their whole check-and-insert.
    /// Edits that can withdraw a date or slot (table update/delete, settings,
    /// new exception dates) and compaction take it exclusively.
    pub(super) write_gate: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub options: EngineOptions,
}

/// Apply a reservation event to its day (no locking — caller holds the lock).
pub(super) fn apply_to_day(day: &mut DayState, event: &Event) {
    match event {
        Event::ReservationCreated {
            id,
            table_id,
            reservation_date,
            reservation_time,
            guests_count,
            guest_name,
            status,
            created_at,
        } => day.insert(Reservation {
            id: *id,
            table_id: *table_id,
            reservation_date: *reservation_date,
            reservation_time: *reservation_time,
            guests_count: *guests_count,
            guest_name: guest_name.clone(),
            status: *status,
            created_at: *created_at,
        }),
        Event::ReservationStatusChanged { id, status, .. } => {
            if let Some(r) = day.get_mut(id) {
                r.status = *status;
            }
        }
        _ => {}
    }
}

pub(super) fn table_from_event(event: &Event) -> Option<Table> {
    match event {
        Event::TableCreated { id, table_number, seats, is_active, available_hours }
        | Event::TableUpdated { id, table_number, seats, is_active, available_hours } => {
            Some(Table {
                id: *id,
                table_number: *table_number,
                seats: *seats,
                is_active: *is_active,
                available_hours: available_hours.clone(),
            })
        }
        _ => None,
    }
}

/// State rebuilt from the WAL before the engine goes live.
#[derive(Default)]
struct Replayed {
    tables: HashMap<Ulid, Table>,
    days: BTreeMap<NaiveDate, DayState>,
    settings: ReservationSettings,
    exceptions: BTreeMap<NaiveDate, ExceptionDate>,
}

impl Replayed {
    fn apply(&mut self, event: &Event) {
        match event {
            Event::TableCreated { .. } | Event::TableUpdated { .. } => {
                if let Some(table) = table_from_event(event) {
                    self.tables.insert(table.id, table);
                }
            }
            Event::TableDeleted { id } => {
                self.tables.remove(id);
            }
            Event::ReservationCreated { reservation_date, .. }
            | Event::ReservationStatusChanged { reservation_date, .. } => {
                let day = self
                    .days
                    .entry(*reservation_date)
                    .or_insert_with(|| DayState::new(*reservation_date));
                apply_to_day(day, event);
            }
            Event::SettingsUpdated { settings } => self.settings = *settings,
            Event::ExceptionDateSet { date, kind, reason } => {
                self.exceptions.insert(
                    *date,
                    ExceptionDate { date: *date, kind: *kind, reason: reason.clone() },
                );
            }
            Event::ExceptionDateRemoved { date } => {
                self.exceptions.remove(date);
            }
        }
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, options: EngineOptions) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let mut replayed = Replayed::default();
        for event in &events {
            replayed.apply(event);
        }

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let reservation_dates = DashMap::new();
        let days = DashMap::new();
        for (date, day) in replayed.days {
            for r in &day.reservations {
                reservation_dates.insert(r.id, date);
            }
            days.insert(date, Arc::new(RwLock::new(day)));
        }

        tracing::debug!(
            "replayed {} events from {}: {} tables, {} reservations",
            events.len(),
            wal_path.display(),
            replayed.tables.len(),
            reservation_dates.len()
        );

        Ok(Self {
            tables: replayed.tables.into_iter().collect(),
            days,
            reservation_dates,
            settings: RwLock::new(replayed.settings),
            exceptions: RwLock::new(replayed.exceptions),
            catalog_lock: Mutex::new(()),
            write_gate: RwLock::new(()),
            wal_tx,
            notify,
            options,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append + apply + notify for a reservation event on a locked day.
    pub(super) async fn persist_day_event(
        &self,
        day: &mut DayState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_day(day, event);
        if let Event::ReservationCreated { id, reservation_date, .. } = event {
            self.reservation_dates.insert(*id, *reservation_date);
        }
        self.notify.send(event);
        Ok(())
    }

    pub(super) fn day(&self, date: &NaiveDate) -> Option<SharedDayState> {
        self.days.get(date).map(|e| e.value().clone())
    }

    pub(super) fn day_or_insert(&self, date: NaiveDate) -> SharedDayState {
        self.days
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DayState::new(date))))
            .value()
            .clone()
    }

    /// Lookup reservation → date, acquire that day's write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<DayState>, EngineError> {
        let date = self
            .reservation_dates
            .get(id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(*id))?;
        let day = self.day(&date).ok_or(EngineError::NotFound(*id))?;
        Ok(day.write_owned().await)
    }
}
