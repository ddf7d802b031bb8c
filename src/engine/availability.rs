use std::collections::{HashMap, HashSet};

use ulid::Ulid;

use crate::model::*;

// ── Slot Availability Algorithm ──────────────────────────────────

/// Compute, for every table that can seat `party_size`, the hours still open
/// on the date the reservations belong to.
///
/// `tables` is the active catalog snapshot (inactive tables are filtered by
/// the caller at load time). `reservations` are the reservations of one date
/// across all tables; cancelled ones are skipped here as well, so passing the
/// unfiltered list is safe.
///
/// Result order: tables with at least one open slot first, then by ascending
/// `seats`, then by `table_number`. Slots within a table are ascending.
/// Pure: identical inputs always give identical output.
pub fn compute_availability(
    party_size: u32,
    tables: &[Table],
    reservations: &[Reservation],
) -> Vec<TableAvailability> {
    let booked = booked_times_by_table(reservations);

    let mut result: Vec<TableAvailability> = tables
        .iter()
        .filter(|t| t.seats >= party_size)
        .map(|t| TableAvailability {
            table_id: t.id,
            table_number: t.table_number,
            seats: t.seats,
            available_slots: open_slots(&t.available_hours, booked.get(&t.id)),
        })
        .collect();

    result.sort_by(|a, b| {
        b.has_slots()
            .cmp(&a.has_slots())
            .then(a.seats.cmp(&b.seats))
            .then(a.table_number.cmp(&b.table_number))
    });
    result
}

/// Group active reservations by table. Unassigned reservations block nothing.
/// Reservations on since-deactivated tables still count for that table id.
pub fn booked_times_by_table(reservations: &[Reservation]) -> HashMap<Ulid, HashSet<SlotTime>> {
    let mut booked: HashMap<Ulid, HashSet<SlotTime>> = HashMap::new();
    for r in reservations.iter().filter(|r| r.status.occupies_slot()) {
        if let Some(table_id) = r.table_id {
            booked.entry(table_id).or_default().insert(r.reservation_time);
        }
    }
    booked
}

/// `hours − booked`, ascending and deduplicated.
pub fn open_slots(hours: &[SlotTime], booked: Option<&HashSet<SlotTime>>) -> Vec<SlotTime> {
    let mut slots: Vec<SlotTime> = hours
        .iter()
        .copied()
        .filter(|h| booked.is_none_or(|b| !b.contains(h)))
        .collect();
    slots.sort();
    slots.dedup();
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(s: &str) -> SlotTime {
        SlotTime::parse(s).unwrap()
    }

    fn hours(list: &[&str]) -> Vec<SlotTime> {
        list.iter().map(|s| t(s)).collect()
    }

    fn table(number: u32, seats: u32, h: &[&str]) -> Table {
        Table {
            id: Ulid::new(),
            table_number: number,
            seats,
            is_active: true,
            available_hours: hours(h),
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()
    }

    fn reservation(table_id: Option<Ulid>, time: &str, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            table_id,
            reservation_date: date(),
            reservation_time: t(time),
            guests_count: 2,
            guest_name: None,
            status,
            created_at: 0,
        }
    }

    fn slots(a: &TableAvailability) -> Vec<String> {
        a.available_slots.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn booked_slot_is_removed() {
        let a = table(1, 4, &["19:00", "19:30", "20:00"]);
        let r = reservation(Some(a.id), "19:30", ReservationStatus::Confirmed);
        let result = compute_availability(2, &[a.clone()], &[r]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].table_id, a.id);
        assert_eq!(slots(&result[0]), vec!["19:00", "20:00"]);
    }

    #[test]
    fn table_too_small_is_excluded() {
        let b = table(2, 2, &["19:00"]);
        let result = compute_availability(4, &[b], &[]);
        assert!(result.is_empty());
    }

    #[test]
    fn table_without_hours_sorts_last() {
        let c = table(3, 6, &[]);
        let big_open = table(4, 8, &["19:00"]);
        let result = compute_availability(2, &[c.clone(), big_open.clone()], &[]);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].table_id, big_open.id);
        assert_eq!(result[1].table_id, c.id);
        assert!(result[1].available_slots.is_empty());
    }

    #[test]
    fn cancelled_reservation_does_not_block() {
        let d = table(5, 4, &["19:00", "20:00"]);
        let cancelled = reservation(Some(d.id), "20:00", ReservationStatus::Cancelled);
        let confirmed = reservation(Some(d.id), "19:00", ReservationStatus::Confirmed);
        let result = compute_availability(2, &[d], &[cancelled, confirmed]);
        assert_eq!(slots(&result[0]), vec!["20:00"]);
    }

    #[test]
    fn cancelled_and_confirmed_on_same_slot() {
        let d = table(5, 4, &["19:00", "20:00"]);
        let cancelled = reservation(Some(d.id), "19:00", ReservationStatus::Cancelled);
        let confirmed = reservation(Some(d.id), "19:00", ReservationStatus::Confirmed);
        let result = compute_availability(2, &[d], &[cancelled, confirmed]);
        assert_eq!(slots(&result[0]), vec!["20:00"]);
    }

    #[test]
    fn completed_and_pending_still_block() {
        let d = table(5, 4, &["18:00", "19:00", "20:00"]);
        let completed = reservation(Some(d.id), "18:00", ReservationStatus::Completed);
        let pending = reservation(Some(d.id), "19:00", ReservationStatus::Pending);
        let result = compute_availability(2, &[d], &[completed, pending]);
        assert_eq!(slots(&result[0]), vec!["20:00"]);
    }

    #[test]
    fn reservation_on_other_table_does_not_block() {
        let a = table(1, 4, &["19:00"]);
        let b = table(2, 4, &["19:00"]);
        let r = reservation(Some(b.id), "19:00", ReservationStatus::Confirmed);
        let result = compute_availability(2, &[a.clone(), b.clone()], &[r]);
        assert_eq!(result[0].table_id, a.id);
        assert_eq!(slots(&result[0]), vec!["19:00"]);
        assert_eq!(result[1].table_id, b.id);
        assert!(result[1].available_slots.is_empty());
    }

    #[test]
    fn unassigned_reservation_blocks_nothing() {
        let a = table(1, 4, &["19:00"]);
        let r = reservation(None, "19:00", ReservationStatus::Confirmed);
        let result = compute_availability(2, &[a], &[r]);
        assert_eq!(slots(&result[0]), vec!["19:00"]);
    }

    #[test]
    fn slots_come_back_sorted() {
        let a = table(1, 4, &["21:00", "12:30", "19:00", "12:00"]);
        let result = compute_availability(1, &[a], &[]);
        assert_eq!(slots(&result[0]), vec!["12:00", "12:30", "19:00", "21:00"]);
    }

    #[test]
    fn sort_open_first_then_seats_then_number() {
        let six = table(1, 6, &["19:00"]);
        let four_b = table(9, 4, &["19:00"]);
        let four_a = table(3, 4, &["20:00"]);
        let full_two = table(2, 2, &["19:00"]);
        let r = reservation(Some(full_two.id), "19:00", ReservationStatus::Pending);
        let result = compute_availability(
            2,
            &[six.clone(), four_b.clone(), full_two.clone(), four_a.clone()],
            &[r],
        );
        let order: Vec<u32> = result.iter().map(|a| a.table_number).collect();
        assert_eq!(order, vec![3, 9, 1, 2]);
    }

    #[test]
    fn available_is_subset_of_configured_hours() {
        let a = table(1, 4, &["19:00", "20:00"]);
        // A stray reservation at a time the table never offered
        let stray = reservation(Some(a.id), "18:00", ReservationStatus::Confirmed);
        let result = compute_availability(2, &[a.clone()], &[stray]);
        for s in &result[0].available_slots {
            assert!(a.available_hours.contains(s));
        }
        assert_eq!(slots(&result[0]), vec!["19:00", "20:00"]);
    }

    #[test]
    fn capacity_filter_is_inclusive() {
        let exact = table(1, 4, &["19:00"]);
        let result = compute_availability(4, &[exact], &[]);
        assert_eq!(result.len(), 1);
        let result = compute_availability(5, &result_tables(&result), &[]);
        assert!(result.is_empty());
    }

    fn result_tables(result: &[TableAvailability]) -> Vec<Table> {
        result
            .iter()
            .map(|a| Table {
                id: a.table_id,
                table_number: a.table_number,
                seats: a.seats,
                is_active: true,
                available_hours: a.available_slots.clone(),
            })
            .collect()
    }

    #[test]
    fn idempotent() {
        let a = table(1, 4, &["19:00", "19:30", "20:00"]);
        let b = table(2, 2, &["19:00"]);
        let rs = vec![
            reservation(Some(a.id), "19:30", ReservationStatus::Confirmed),
            reservation(Some(b.id), "19:00", ReservationStatus::Cancelled),
        ];
        let tables = vec![a, b];
        let first = compute_availability(2, &tables, &rs);
        let second = compute_availability(2, &tables, &rs);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_inputs_give_empty_output() {
        assert!(compute_availability(2, &[], &[]).is_empty());
    }

    #[test]
    fn booked_never_offered_across_many_tables() {
        let tables: Vec<Table> = (1..=10)
            .map(|n| table(n, 2 + n % 4, &["18:00", "19:00", "20:00", "21:00"]))
            .collect();
        let mut rs = Vec::new();
        for (i, tbl) in tables.iter().enumerate() {
            let time = ["18:00", "19:00", "20:00", "21:00"][i % 4];
            rs.push(reservation(Some(tbl.id), time, ReservationStatus::Confirmed));
        }
        let result = compute_availability(1, &tables, &rs);
        assert_eq!(result.len(), 10);
        for r in &rs {
            let entry = result.iter().find(|a| Some(a.table_id) == r.table_id).unwrap();
            assert!(!entry.available_slots.contains(&r.reservation_time));
            assert_eq!(entry.available_slots.len(), 3);
        }
    }
}
