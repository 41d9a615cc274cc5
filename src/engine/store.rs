use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;

use crate::model::*;

use super::error::StoreError;

/// Read side of the booking and override tables.
///
/// `Ok(None)` means nothing is configured; `Err` means the read itself failed.
/// Callers must never treat an `Err` as "no bookings".
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Summed party size of non-cancelled bookings, grouped by slot.
    async fn booked_by_slot(&self, date: NaiveDate) -> Result<BTreeMap<SlotTime, i64>, StoreError>;

    /// Count and summed party size of non-cancelled bookings, optionally
    /// leaving one booking out.
    async fn booked_total(
        &self,
        date: NaiveDate,
        exclude: Option<BookingId>,
    ) -> Result<BookingAggregate, StoreError>;

    async fn daily_limit(&self, date: NaiveDate, ceiling: Ceiling) -> Result<Option<i64>, StoreError>;

    async fn hour_set_payload(&self, date: NaiveDate) -> Result<Option<String>, StoreError>;

    async fn hour_allocation_payload(&self, date: NaiveDate) -> Result<Option<String>, StoreError>;

    async fn hour_configuration_payload(&self, date: NaiveDate) -> Result<Option<String>, StoreError>;

    async fn day_override(&self, date: NaiveDate) -> Result<Option<bool>, StoreError>;

    async fn modification_count(&self, booking_id: BookingId) -> Result<u32, StoreError>;

    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;
}

/// DashMap-backed tables rebuilt from the WAL.
pub struct InMemoryStore {
    daily_limits: DashMap<(NaiveDate, Ceiling), i64>,
    hour_sets: DashMap<NaiveDate, String>,
    hour_allocations: DashMap<NaiveDate, String>,
    hour_configurations: DashMap<NaiveDate, String>,
    day_overrides: DashMap<NaiveDate, bool>,
    bookings: DashMap<BookingId, Booking>,
    bookings_by_date: DashMap<NaiveDate, Vec<BookingId>>,
    modifications: DashMap<BookingId, Vec<ModificationRecord>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            daily_limits: DashMap::new(),
            hour_sets: DashMap::new(),
            hour_allocations: DashMap::new(),
            hour_configurations: DashMap::new(),
            day_overrides: DashMap::new(),
            bookings: DashMap::new(),
            bookings_by_date: DashMap::new(),
            modifications: DashMap::new(),
        }
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    pub fn contains_booking(&self, id: &BookingId) -> bool {
        self.bookings.contains_key(id)
    }

    pub fn get_booking(&self, id: &BookingId) -> Option<Booking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    /// Bookings on `date`, or every booking, ordered by date, time and id.
    pub fn list_bookings(&self, date: Option<NaiveDate>) -> Vec<Booking> {
        let mut out = match date {
            Some(d) => self.bookings_on(d),
            None => self.bookings.iter().map(|e| e.value().clone()).collect(),
        };
        out.sort_by_key(|b| (b.date, b.time, b.id));
        out
    }

    pub fn modification_history(&self, booking_id: &BookingId) -> Vec<ModificationRecord> {
        self.modifications
            .get(booking_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    fn bookings_on(&self, date: NaiveDate) -> Vec<Booking> {
        let ids = self
            .bookings_by_date
            .get(&date)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get_booking(id)).collect()
    }

    // ── Event application ────────────────────────────────────

    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::DailyLimitSet { date, ceiling, limit } => {
                self.daily_limits.insert((*date, *ceiling), *limit);
            }
            Event::DailyLimitCleared { date, ceiling } => {
                self.daily_limits.remove(&(*date, *ceiling));
            }
            Event::HourSetSaved { date, payload } => {
                self.hour_sets.insert(*date, payload.clone());
            }
            Event::HourSetCleared { date } => {
                self.hour_sets.remove(date);
            }
            Event::HourAllocationSaved { date, payload } => {
                self.hour_allocations.insert(*date, payload.clone());
            }
            Event::HourAllocationCleared { date } => {
                self.hour_allocations.remove(date);
            }
            Event::HourConfigurationSaved { date, payload } => {
                self.hour_configurations.insert(*date, payload.clone());
            }
            Event::HourConfigurationCleared { date } => {
                self.hour_configurations.remove(date);
            }
            Event::DayOpenSet { date, is_open } => {
                self.day_overrides.insert(*date, *is_open);
            }
            Event::DayOverrideCleared { date } => {
                self.day_overrides.remove(date);
            }
            Event::BookingRecorded { booking } => {
                if let Some(prev) = self.bookings.insert(booking.id, booking.clone())
                    && let Some(mut ids) = self.bookings_by_date.get_mut(&prev.date)
                {
                    ids.retain(|id| *id != booking.id);
                }
                self.bookings_by_date
                    .entry(booking.date)
                    .or_default()
                    .push(booking.id);
            }
            Event::BookingCancelled { id } => {
                if let Some(mut b) = self.bookings.get_mut(id) {
                    b.status = BookingStatus::Cancelled;
                }
            }
            Event::ModificationRecorded { record } => {
                self.modifications
                    .entry(record.booking_id)
                    .or_default()
                    .push(record.clone());
            }
        }
    }

    /// Minimal event sequence that recreates the current tables.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        for e in self.daily_limits.iter() {
            let (date, ceiling) = *e.key();
            events.push(Event::DailyLimitSet {
                date,
                ceiling,
                limit: *e.value(),
            });
        }
        for e in self.hour_sets.iter() {
            events.push(Event::HourSetSaved {
                date: *e.key(),
                payload: e.value().clone(),
            });
        }
        for e in self.hour_allocations.iter() {
            events.push(Event::HourAllocationSaved {
                date: *e.key(),
                payload: e.value().clone(),
            });
        }
        for e in self.hour_configurations.iter() {
            events.push(Event::HourConfigurationSaved {
                date: *e.key(),
                payload: e.value().clone(),
            });
        }
        for e in self.day_overrides.iter() {
            events.push(Event::DayOpenSet {
                date: *e.key(),
                is_open: *e.value(),
            });
        }
        for e in self.bookings.iter() {
            events.push(Event::BookingRecorded {
                booking: e.value().clone(),
            });
        }
        for e in self.modifications.iter() {
            for record in e.value() {
                events.push(Event::ModificationRecorded {
                    record: record.clone(),
                });
            }
        }
        events
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn booked_by_slot(&self, date: NaiveDate) -> Result<BTreeMap<SlotTime, i64>, StoreError> {
        let mut by_slot = BTreeMap::new();
        for b in self.bookings_on(date).iter().filter(|b| b.is_active()) {
            *by_slot.entry(b.time).or_insert(0) += i64::from(b.party_size);
        }
        Ok(by_slot)
    }

    async fn booked_total(
        &self,
        date: NaiveDate,
        exclude: Option<BookingId>,
    ) -> Result<BookingAggregate, StoreError> {
        let mut agg = BookingAggregate::default();
        for b in self.bookings_on(date) {
            if b.is_active() && Some(b.id) != exclude {
                agg.add(b.party_size);
            }
        }
        Ok(agg)
    }

    async fn daily_limit(&self, date: NaiveDate, ceiling: Ceiling) -> Result<Option<i64>, StoreError> {
        Ok(self.daily_limits.get(&(date, ceiling)).map(|e| *e.value()))
    }

    async fn hour_set_payload(&self, date: NaiveDate) -> Result<Option<String>, StoreError> {
        Ok(self.hour_sets.get(&date).map(|e| e.value().clone()))
    }

    async fn hour_allocation_payload(&self, date: NaiveDate) -> Result<Option<String>, StoreError> {
        Ok(self.hour_allocations.get(&date).map(|e| e.value().clone()))
    }

    async fn hour_configuration_payload(&self, date: NaiveDate) -> Result<Option<String>, StoreError> {
        Ok(self.hour_configurations.get(&date).map(|e| e.value().clone()))
    }

    async fn day_override(&self, date: NaiveDate) -> Result<Option<bool>, StoreError> {
        Ok(self.day_overrides.get(&date).map(|e| *e.value()))
    }

    async fn modification_count(&self, booking_id: BookingId) -> Result<u32, StoreError> {
        let count = self.modifications.get(&booking_id).map_or(0, |e| e.value().len());
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.get_booking(&id))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A store whose every read fails, for fail-closed tests.
    pub struct UnreachableStore;

    #[async_trait]
    impl ReservationStore for UnreachableStore {
        async fn booked_by_slot(&self, _: NaiveDate) -> Result<BTreeMap<SlotTime, i64>, StoreError> {
            Err(StoreError::Unavailable)
        }
        async fn booked_total(
            &self,
            _: NaiveDate,
            _: Option<BookingId>,
        ) -> Result<BookingAggregate, StoreError> {
            Err(StoreError::Unavailable)
        }
        async fn daily_limit(&self, _: NaiveDate, c: Ceiling) -> Result<Option<i64>, StoreError> {
            Err(StoreError::Read {
                table: c.table(),
                detail: "connection refused".into(),
            })
        }
        async fn hour_set_payload(&self, _: NaiveDate) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable)
        }
        async fn hour_allocation_payload(&self, _: NaiveDate) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable)
        }
        async fn hour_configuration_payload(&self, _: NaiveDate) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable)
        }
        async fn day_override(&self, _: NaiveDate) -> Result<Option<bool>, StoreError> {
            Err(StoreError::Unavailable)
        }
        async fn modification_count(&self, _: BookingId) -> Result<u32, StoreError> {
            Err(StoreError::Unavailable)
        }
        async fn booking(&self, _: BookingId) -> Result<Option<Booking>, StoreError> {
            Err(StoreError::Unavailable)
        }
    }

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub fn slot(raw: &str) -> SlotTime {
        SlotTime::parse(raw).unwrap()
    }

    pub fn booking(date: NaiveDate, time: &str, party_size: u32) -> Booking {
        Booking {
            id: ulid::Ulid::new(),
            date,
            time: slot(time),
            party_size,
            status: BookingStatus::Confirmed,
        }
    }

    pub fn store_with(bookings: &[Booking]) -> InMemoryStore {
        let store = InMemoryStore::new();
        for b in bookings {
            store.apply_event(&Event::BookingRecorded { booking: b.clone() });
        }
        store
    }
}
