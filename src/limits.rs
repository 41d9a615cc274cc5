// ── Business constants ───────────────────────────────────────────

/// Headcount ceiling for the booking/availability path when no override exists.
pub const DEFAULT_BOOKING_DAILY_LIMIT: i64 = 45;

/// Headcount ceiling for the modification cross-check path when no override exists.
pub const DEFAULT_MODIFICATION_DAILY_LIMIT: i64 = 100;

/// Days ahead (inclusive) a booking or modification may target.
pub const BOOKING_HORIZON_DAYS: i64 = 35;

/// Modifications allowed per booking before the guard refuses further changes.
pub const MAX_MODIFICATIONS_PER_BOOKING: u32 = 3;

/// Largest party a modification may move a booking to.
pub const MAX_MODIFIED_PARTY_SIZE: u32 = 8;

/// Minimum lead time, in hours, for modifying a reservation.
pub const MIN_MODIFICATION_LEAD_HOURS: i64 = 24;

/// Completion strictly above this is "full".
pub const FULL_THRESHOLD: f64 = 90.0;

/// Completion strictly above this (and not full) is "limited".
pub const LIMITED_THRESHOLD: f64 = 70.0;

/// Allowed drift from 100 when an hour allocation is saved.
pub const ALLOCATION_TOLERANCE: f64 = 0.1;

/// Month/day pairs blocked every year.
pub const BLACKOUT_DATES: [(u32, u32); 6] = [(12, 24), (12, 25), (12, 31), (1, 1), (1, 5), (1, 6)];

// ── Hard limits ──────────────────────────────────────────────────

pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 128;
pub const MAX_PARTY_SIZE: u32 = 500;
pub const MAX_DAILY_LIMIT: i64 = 100_000;
pub const MAX_SLOTS_PER_DAY: usize = 48;
pub const MAX_WINDOW_DAYS: u32 = 366;
pub const MAX_FIELD_VALUE_LEN: usize = 1_024;
pub const MAX_BOOKINGS_PER_TENANT: usize = 1_000_000;
