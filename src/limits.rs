//! Hard caps on every user-controlled size. Checked at the engine boundary
//! so a single tenant cannot grow memory or WAL without bound.

pub const MAX_TABLES_PER_TENANT: usize = 1_000;
pub const MAX_HOURS_PER_TABLE: usize = 24 * 60;
pub const MAX_TABLE_NUMBER: u32 = 100_000;
pub const MAX_SEATS: u32 = 500;
pub const MAX_PARTY_SIZE: u32 = 500;
pub const MAX_GUEST_NAME_LEN: usize = 200;
pub const MAX_REASON_LEN: usize = 500;
pub const MAX_RESERVATIONS_PER_DAY: usize = 10_000;
pub const MAX_ADVANCE_BOOKING_DAYS: u32 = 366;
pub const MAX_SLOT_CAP: u32 = 10_000;
pub const MAX_EXCEPTION_DATES: usize = 1_000;

pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 128;
pub const MAX_LISTEN_CHANNELS: usize = 64;
