use std::str::FromStr;

use chrono::{Datelike, Days, NaiveDate};

use crate::model::*;

use super::EngineError;

/// Whether calendar exceptions take part in the booking-date gate and in
/// per-table hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionMode {
    /// `closed` dates are never bookable; `lunch_only`/`dinner_only` trim table hours.
    Enforce,
    /// Weekday settings only. Exceptions are informational.
    Ignore,
}

impl FromStr for ExceptionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "enforce" => Ok(ExceptionMode::Enforce),
            "ignore" => Ok(ExceptionMode::Ignore),
            other => Err(format!("unknown exception mode: {other} (expected enforce|ignore)")),
        }
    }
}

/// The override in effect for `date`, if any.
pub fn resolve_override(date: NaiveDate, exceptions: &[ExceptionDate]) -> Option<ExceptionKind> {
    exceptions.iter().find(|e| e.date == date).map(|e| e.kind)
}

pub fn is_day_available(
    date: NaiveDate,
    settings: &ReservationSettings,
    exceptions: &[ExceptionDate],
    mode: ExceptionMode,
) -> bool {
    if !settings.days_available.is_open(date.weekday()) {
        return false;
    }
    match mode {
        ExceptionMode::Enforce => resolve_override(date, exceptions) != Some(ExceptionKind::Closed),
        ExceptionMode::Ignore => true,
    }
}

/// Dates a guest may pick: `tomorrow ..= tomorrow + (advance_booking_days - 1)`,
/// filtered by [`is_day_available`]. Today is never offered.
pub fn bookable_dates(
    today: NaiveDate,
    settings: &ReservationSettings,
    exceptions: &[ExceptionDate],
    mode: ExceptionMode,
) -> Vec<NaiveDate> {
    (1..=settings.advance_booking_days as u64)
        .filter_map(|offset| today.checked_add_days(Days::new(offset)))
        .filter(|d| is_day_available(*d, settings, exceptions, mode))
        .collect()
}

/// Reject a date outside the booking window or closed by policy.
pub fn check_bookable(
    date: NaiveDate,
    today: NaiveDate,
    settings: &ReservationSettings,
    exceptions: &[ExceptionDate],
    mode: ExceptionMode,
) -> Result<(), EngineError> {
    let last = today.checked_add_days(Days::new(settings.advance_booking_days as u64));
    if date <= today || last.is_none_or(|last| date > last) {
        return Err(EngineError::InvalidInput("date outside booking window"));
    }
    if !is_day_available(date, settings, exceptions, mode) {
        return Err(EngineError::DayUnavailable(date));
    }
    Ok(())
}

/// Trim a table's hours to what the day's override allows.
/// Lunch service is everything before `dinner_starts_at`.
pub fn apply_override(
    hours: &[SlotTime],
    kind: Option<ExceptionKind>,
    dinner_starts_at: SlotTime,
) -> Vec<SlotTime> {
    match kind {
        None => hours.to_vec(),
        Some(ExceptionKind::Closed) => Vec::new(),
        Some(ExceptionKind::LunchOnly) => hours.iter().copied().filter(|h| *h < dinner_starts_at).collect(),
        Some(ExceptionKind::DinnerOnly) => hours.iter().copied().filter(|h| *h >= dinner_starts_at).collect(),
    }
}

/// Exception dates strictly before `today`.
pub fn past_exceptions(exceptions: &[ExceptionDate], today: NaiveDate) -> Vec<NaiveDate> {
    exceptions.iter().filter(|e| e.date < today).map(|e| e.date).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn t(s: &str) -> SlotTime {
        SlotTime::parse(s).unwrap()
    }

    fn exception(date: NaiveDate, kind: ExceptionKind) -> ExceptionDate {
        ExceptionDate { date, kind, reason: None }
    }

    // 2026-10-18 is a Sunday.
    fn today() -> NaiveDate {
        d(2026, 10, 18)
    }

    #[test]
    fn window_starts_tomorrow() {
        let settings = ReservationSettings {
            advance_booking_days: 3,
            ..Default::default()
        };
        let dates = bookable_dates(today(), &settings, &[], ExceptionMode::Enforce);
        assert_eq!(dates, vec![d(2026, 10, 19), d(2026, 10, 20), d(2026, 10, 21)]);
    }

    #[test]
    fn zero_window_is_empty() {
        let settings = ReservationSettings {
            advance_booking_days: 0,
            ..Default::default()
        };
        assert!(bookable_dates(today(), &settings, &[], ExceptionMode::Enforce).is_empty());
    }

    #[test]
    fn closed_weekday_is_skipped() {
        let mut settings = ReservationSettings {
            advance_booking_days: 7,
            ..Default::default()
        };
        settings.days_available.set(Weekday::Mon, false);
        settings.days_available.set(Weekday::Tue, false);
        let dates = bookable_dates(today(), &settings, &[], ExceptionMode::Enforce);
        assert_eq!(dates.len(), 5);
        assert!(dates.iter().all(|d| d.weekday() != Weekday::Mon && d.weekday() != Weekday::Tue));
    }

    #[test]
    fn closed_exception_respects_mode() {
        let settings = ReservationSettings {
            advance_booking_days: 3,
            ..Default::default()
        };
        let closed = [exception(d(2026, 10, 20), ExceptionKind::Closed)];

        let enforced = bookable_dates(today(), &settings, &closed, ExceptionMode::Enforce);
        assert_eq!(enforced, vec![d(2026, 10, 19), d(2026, 10, 21)]);

        let ignored = bookable_dates(today(), &settings, &closed, ExceptionMode::Ignore);
        assert_eq!(ignored.len(), 3);
    }

    #[test]
    fn lunch_only_does_not_close_the_day() {
        let settings = ReservationSettings::default();
        let lunch = [exception(d(2026, 10, 20), ExceptionKind::LunchOnly)];
        assert!(is_day_available(d(2026, 10, 20), &settings, &lunch, ExceptionMode::Enforce));
    }

    #[test]
    fn check_bookable_bounds() {
        let settings = ReservationSettings {
            advance_booking_days: 2,
            ..Default::default()
        };
        let mode = ExceptionMode::Enforce;
        assert!(check_bookable(today(), today(), &settings, &[], mode).is_err());
        assert!(check_bookable(d(2026, 10, 17), today(), &settings, &[], mode).is_err());
        assert!(check_bookable(d(2026, 10, 19), today(), &settings, &[], mode).is_ok());
        assert!(check_bookable(d(2026, 10, 20), today(), &settings, &[], mode).is_ok());
        assert_eq!(
            check_bookable(d(2026, 10, 21), today(), &settings, &[], mode),
            Err(EngineError::InvalidInput("date outside booking window"))
        );
    }

    #[test]
    fn check_bookable_closed_day() {
        let mut settings = ReservationSettings::default();
        settings.days_available.set(Weekday::Mon, false);
        assert_eq!(
            check_bookable(d(2026, 10, 19), today(), &settings, &[], ExceptionMode::Enforce),
            Err(EngineError::DayUnavailable(d(2026, 10, 19)))
        );
    }

    #[test]
    fn override_trims_hours() {
        let hours = vec![t("12:00"), t("13:30"), t("17:00"), t("19:00"), t("21:30")];
        let split = t("17:00");
        assert_eq!(apply_override(&hours, None, split), hours);
        assert!(apply_override(&hours, Some(ExceptionKind::Closed), split).is_empty());
        assert_eq!(
            apply_override(&hours, Some(ExceptionKind::LunchOnly), split),
            vec![t("12:00"), t("13:30")]
        );
        assert_eq!(
            apply_override(&hours, Some(ExceptionKind::DinnerOnly), split),
            vec![t("17:00"), t("19:00"), t("21:30")]
        );
    }

    #[test]
    fn resolve_and_prune() {
        let list = [
            exception(d(2026, 10, 10), ExceptionKind::Closed),
            exception(d(2026, 10, 18), ExceptionKind::DinnerOnly),
            exception(d(2026, 12, 25), ExceptionKind::Closed),
        ];
        assert_eq!(resolve_override(d(2026, 12, 25), &list), Some(ExceptionKind::Closed));
        assert_eq!(resolve_override(d(2026, 12, 24), &list), None);
        assert_eq!(past_exceptions(&list, today()), vec![d(2026, 10, 10)]);
    }

    #[test]
    fn mode_parse() {
        assert_eq!("ENFORCE".parse::<ExceptionMode>().unwrap(), ExceptionMode::Enforce);
        assert_eq!("ignore".parse::<ExceptionMode>().unwrap(), ExceptionMode::Ignore);
        assert!("sometimes".parse::<ExceptionMode>().is_err());
    }
}
