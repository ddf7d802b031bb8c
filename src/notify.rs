use std::fmt;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// A realtime change feed clients can LISTEN on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Tables,
    Settings,
    ExceptionDates,
    /// Reservation changes for one date.
    Reservations(NaiveDate),
}

impl Channel {
    pub fn for_event(event: &Event) -> Channel {
        match event {
            Event::TableCreated { .. } | Event::TableUpdated { .. } | Event::TableDeleted { .. } => {
                Channel::Tables
            }
            Event::ReservationCreated { reservation_date, .. }
            | Event::ReservationStatusChanged { reservation_date, .. } => {
                Channel::Reservations(*reservation_date)
            }
            Event::SettingsUpdated { .. } => Channel::Settings,
            Event::ExceptionDateSet { .. } | Event::ExceptionDateRemoved { .. } => {
                Channel::ExceptionDates
            }
        }
    }

    /// Parse a LISTEN channel name: `tables`, `settings`, `exception_dates`,
    /// or `reservations_YYYY-MM-DD`.
    pub fn parse(name: &str) -> Option<Channel> {
        match name {
            "tables" => Some(Channel::Tables),
            "settings" => Some(Channel::Settings),
            "exception_dates" => Some(Channel::ExceptionDates),
            other => {
                let date = other.strip_prefix("reservations_")?;
                NaiveDate::parse_from_str(date, "%Y-%m-%d")
                    .ok()
                    .map(Channel::Reservations)
            }
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Tables => f.write_str("tables"),
            Channel::Settings => f.write_str("settings"),
            Channel::ExceptionDates => f.write_str("exception_dates"),
            Channel::Reservations(date) => write!(f, "reservations_{}", date.format("%Y-%m-%d")),
        }
    }
}

/// Broadcast hub for LISTEN/NOTIFY per channel.
pub struct NotifyHub {
    channels: DashMap<Channel, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a channel. Creates it if needed.
    pub fn subscribe(&self, channel: Channel) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(channel)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an event on its channel. No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        if let Some(sender) = self.channels.get(&Channel::for_event(event)) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop channels nobody listens to any more.
    pub fn prune_idle(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(Channel::Tables);

        let event = Event::TableDeleted { id: Ulid::new() };
        hub.send(&event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn reservation_events_route_by_date() {
        let hub = NotifyHub::new();
        let mut on_date = hub.subscribe(Channel::Reservations(date()));
        let mut other_date = hub.subscribe(Channel::Reservations(date().succ_opt().unwrap()));

        let event = Event::ReservationStatusChanged {
            id: Ulid::new(),
            reservation_date: date(),
            status: crate::model::ReservationStatus::Confirmed,
        };
        hub.send(&event);

        assert_eq!(on_date.recv().await.unwrap(), event);
        assert!(other_date.try_recv().is_err());
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(&Event::ExceptionDateRemoved { date: date() });
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn channel_names_roundtrip() {
        for channel in [
            Channel::Tables,
            Channel::Settings,
            Channel::ExceptionDates,
            Channel::Reservations(date()),
        ] {
            assert_eq!(Channel::parse(&channel.to_string()), Some(channel));
        }
        assert_eq!(Channel::parse("reservations_2026-13-01"), None);
        assert_eq!(Channel::parse("resource_01ARZ3NDEKTSV4RRFFQ69G5FAV"), None);
    }

    #[test]
    fn prune_idle_drops_unlistened_channels() {
        let hub = NotifyHub::new();
        let rx = hub.subscribe(Channel::Settings);
        let _keep = hub.subscribe(Channel::Tables);
        drop(rx);
        hub.prune_idle();
        assert_eq!(hub.channel_count(), 1);
    }
}
