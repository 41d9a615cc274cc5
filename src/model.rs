use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::{DEFAULT_BOOKING_DAILY_LIMIT, DEFAULT_MODIFICATION_DAILY_LIMIT};

pub type BookingId = Ulid;

/// Per-slot percentage split of a daily limit.
pub type HourAllocation = BTreeMap<SlotTime, f64>;

/// Per-slot settings of a persisted hour configuration.
pub type HourConfiguration = BTreeMap<SlotTime, SlotSetting>;

// ── Slot time ────────────────────────────────────────────────────

/// A reservation time of day, always rendered as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotTime(NaiveTime);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid slot time: {0:?}")]
pub struct SlotParseError(pub String);

impl SlotTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    /// Accepts `HH:MM` or `HH:MM:SS`; seconds are dropped.
    pub fn parse(raw: &str) -> Result<Self, SlotParseError> {
        let trimmed = raw.trim();
        let hhmm = trimmed
            .get(..5)
            .ok_or_else(|| SlotParseError(raw.to_string()))?;
        NaiveTime::parse_from_str(hhmm, "%H:%M")
            .map(Self)
            .map_err(|_| SlotParseError(raw.to_string()))
    }

    pub fn as_time(&self) -> NaiveTime {
        self.0
    }
}

impl From<NaiveTime> for SlotTime {
    fn from(t: NaiveTime) -> Self {
        // Bookings are grouped by formatted HH:MM, so seconds never distinguish slots.
        Self(NaiveTime::from_hms_opt(
            chrono::Timelike::hour(&t),
            chrono::Timelike::minute(&t),
            0,
        )
        .unwrap_or(t))
    }
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

impl FromStr for SlotTime {
    type Err = SlotParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SlotTime {
    type Error = SlotParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<SlotTime> for String {
    fn from(s: SlotTime) -> Self {
        s.to_string()
    }
}

/// Build a slot list from `HH:MM` literals known to be valid.
pub(crate) fn slot_list(raw: &[(u32, u32)]) -> Vec<SlotTime> {
    raw.iter()
        .filter_map(|&(h, m)| SlotTime::new(h, m))
        .collect()
}

// ── Configuration selectors ──────────────────────────────────────

/// Which of the two independent daily-limit stores a call path reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ceiling {
    /// Booking and availability flows (default 45).
    Booking,
    /// Modification cross-validation flows (default 100).
    Modification,
}

impl Ceiling {
    pub fn default_limit(self) -> i64 {
        match self {
            Ceiling::Booking => DEFAULT_BOOKING_DAILY_LIMIT,
            Ceiling::Modification => DEFAULT_MODIFICATION_DAILY_LIMIT,
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            Ceiling::Booking => "daily_limits",
            Ceiling::Modification => "modification_limits",
        }
    }
}

/// Which default slot set applies when a date has no stored hour set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HourSetPath {
    /// Hour-percentage reporting: 13:30 through 15:30.
    Percentages,
    /// Slot capacity and availability: 13:30 through 15:00.
    SlotConfiguration,
}

impl HourSetPath {
    pub fn default_hours(self) -> Vec<SlotTime> {
        match self {
            HourSetPath::Percentages => {
                slot_list(&[(13, 30), (14, 0), (14, 30), (15, 0), (15, 30)])
            }
            HourSetPath::SlotConfiguration => slot_list(&[(13, 30), (14, 0), (14, 30), (15, 0)]),
        }
    }
}

/// Times an administrator may open for reservations.
pub fn permitted_slots() -> Vec<SlotTime> {
    let lunch = (13..=15).flat_map(|h| [(h, 0), (h, 30)]);
    let dinner = (19..=22).flat_map(|h| [(h, 0), (h, 30)]).chain([(23, 0)]);
    let all: Vec<(u32, u32)> = lunch.chain(dinner).collect();
    slot_list(&all)
}

// ── Slot settings ────────────────────────────────────────────────

/// Per-slot state in a persisted hour configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlotSetting {
    Open { percentage: f64 },
    Closed,
}

impl SlotSetting {
    pub fn percentage(&self) -> f64 {
        match self {
            SlotSetting::Open { percentage } => *percentage,
            SlotSetting::Closed => 0.0,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SlotSetting::Closed)
    }
}

/// On-disk shape of one slot in an hour configuration payload.
///
/// Derived fields written by older clients (capacity, bookings, completion)
/// are ignored on read. `status` is only honoured when it says `"closed"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSlot {
    #[serde(default)]
    pub percentage: f64,
    #[serde(default)]
    pub is_closed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl From<StoredSlot> for SlotSetting {
    fn from(s: StoredSlot) -> Self {
        let closed_status = s
            .status
            .as_deref()
            .is_some_and(|st| st.eq_ignore_ascii_case("closed"));
        if s.is_closed || closed_status {
            SlotSetting::Closed
        } else {
            SlotSetting::Open {
                percentage: s.percentage,
            }
        }
    }
}

impl From<SlotSetting> for StoredSlot {
    fn from(s: SlotSetting) -> Self {
        match s {
            SlotSetting::Open { percentage } => StoredSlot {
                percentage,
                is_closed: false,
                status: None,
            },
            SlotSetting::Closed => StoredSlot {
                percentage: 0.0,
                is_closed: true,
                status: Some("closed".into()),
            },
        }
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

/// A reservation as read by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub date: NaiveDate,
    pub time: SlotTime,
    pub party_size: u32,
    pub status: BookingStatus,
}

impl Booking {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.time.as_time())
    }

    pub fn is_active(&self) -> bool {
        self.status != BookingStatus::Cancelled
    }
}

/// Count and summed party size of non-cancelled bookings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookingAggregate {
    pub count: u32,
    pub party_total: i64,
}

impl BookingAggregate {
    pub fn add(&mut self, party_size: u32) {
        self.count += 1;
        self.party_total += i64::from(party_size);
    }
}

/// One row of the append-only modification audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationRecord {
    pub booking_id: BookingId,
    pub field: String,
    pub old_value: String,
    pub new_value: String,
    pub recorded_at: NaiveDateTime,
}

// ── WAL events ───────────────────────────────────────────────────

/// Flat event log record. Override payloads are the JSON text as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    DailyLimitSet {
        date: NaiveDate,
        ceiling: Ceiling,
        limit: i64,
    },
    DailyLimitCleared {
        date: NaiveDate,
        ceiling: Ceiling,
    },
    HourSetSaved {
        date: NaiveDate,
        payload: String,
    },
    HourSetCleared {
        date: NaiveDate,
    },
    HourAllocationSaved {
        date: NaiveDate,
        payload: String,
    },
    HourAllocationCleared {
        date: NaiveDate,
    },
    HourConfigurationSaved {
        date: NaiveDate,
        payload: String,
    },
    HourConfigurationCleared {
        date: NaiveDate,
    },
    DayOpenSet {
        date: NaiveDate,
        is_open: bool,
    },
    DayOverrideCleared {
        date: NaiveDate,
    },
    BookingRecorded {
        booking: Booking,
    },
    BookingCancelled {
        id: BookingId,
    },
    ModificationRecorded {
        record: ModificationRecord,
    },
}
