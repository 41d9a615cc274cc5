use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// `|Σ − 100| ≤ ALLOCATION_TOLERANCE`, else the observed total.
pub fn validate_allocation(percentages: &HourAllocation) -> Result<(), EngineError> {
    let total: f64 = percentages.values().sum();
    if percentages.values().any(|p| !p.is_finite() || *p < 0.0) || (total - 100.0).abs() > ALLOCATION_TOLERANCE {
        return Err(EngineError::InvalidAllocation { total });
    }
    Ok(())
}

fn validate_hour_set(hours: &[SlotTime]) -> Result<Vec<SlotTime>, EngineError> {
    if hours.is_empty() {
        return Err(EngineError::InvalidHourSet("no hours".into()));
    }
    let permitted = permitted_slots();
    let unique: BTreeSet<SlotTime> = hours.iter().copied().collect();
    if unique.len() > MAX_SLOTS_PER_DAY {
        return Err(EngineError::LimitExceeded("too many slots"));
    }
    if let Some(bad) = unique.iter().find(|h| !permitted.contains(h)) {
        return Err(EngineError::InvalidHourSet(format!("{bad} is not a reservation time")));
    }
    Ok(unique.into_iter().collect())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, EngineError> {
    serde_json::to_string(value).map_err(|e| EngineError::InvalidValue(e.to_string()))
}

impl Engine {
    // ── Daily limits ─────────────────────────────────────────

    pub async fn set_daily_limit(&self, date: NaiveDate, ceiling: Ceiling, limit: i64) -> Result<(), EngineError> {
        if !(0..=MAX_DAILY_LIMIT).contains(&limit) {
            return Err(EngineError::InvalidDailyLimit(limit));
        }
        let _guard = self.write_lock.lock().await;
        self.persist_and_apply(&Event::DailyLimitSet { date, ceiling, limit })
            .await
    }

    pub async fn clear_daily_limit(&self, date: NaiveDate, ceiling: Ceiling) -> Result<(), EngineError> {
        let _guard = self.write_lock.lock().await;
        self.persist_and_apply(&Event::DailyLimitCleared { date, ceiling })
            .await
    }

    // ── Hour sets, allocations, configurations ───────────────

    /// Replaces the date's hour set and drops its hour configuration,
    /// which was computed for the previous slots.
    pub async fn set_hour_set(&self, date: NaiveDate, hours: &[SlotTime]) -> Result<(), EngineError> {
        let hours = validate_hour_set(hours)?;
        let labels: Vec<String> = hours.iter().map(|h| h.to_string()).collect();
        let payload = to_json(&labels)?;

        let _guard = self.write_lock.lock().await;
        self.persist_and_apply(&Event::HourSetSaved { date, payload })
            .await?;
        self.persist_and_apply(&Event::HourConfigurationCleared { date })
            .await?;
        info!(tenant = %self.tenant, %date, slots = hours.len(), "hour set saved");
        Ok(())
    }

    pub async fn clear_hour_set(&self, date: NaiveDate) -> Result<(), EngineError> {
        let _guard = self.write_lock.lock().await;
        self.persist_and_apply(&Event::HourSetCleared { date }).await
    }

    pub async fn set_hour_allocation(&self, date: NaiveDate, percentages: &HourAllocation) -> Result<(), EngineError> {
        validate_allocation(percentages)?;
        let payload = to_json(percentages)?;
        let _guard = self.write_lock.lock().await;
        self.persist_and_apply(&Event::HourAllocationSaved { date, payload })
            .await
    }

    pub async fn clear_hour_allocation(&self, date: NaiveDate) -> Result<(), EngineError> {
        let _guard = self.write_lock.lock().await;
        self.persist_and_apply(&Event::HourAllocationCleared { date })
            .await
    }

    pub async fn save_hour_configuration(&self, date: NaiveDate, config: &HourConfiguration) -> Result<(), EngineError> {
        if config.len() > MAX_SLOTS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many slots"));
        }
        if let Some(p) = config
            .values()
            .map(SlotSetting::percentage)
            .find(|p| !p.is_finite() || *p < 0.0 || *p > 100.0)
        {
            return Err(EngineError::InvalidValue(format!("slot percentage {p}")));
        }
        let stored: BTreeMap<SlotTime, StoredSlot> = config.iter().map(|(k, v)| (*k, StoredSlot::from(*v))).collect();
        let payload = to_json(&stored)?;
        let _guard = self.write_lock.lock().await;
        self.persist_and_apply(&Event::HourConfigurationSaved { date, payload })
            .await
    }

    pub async fn clear_hour_configuration(&self, date: NaiveDate) -> Result<(), EngineError> {
        let _guard = self.write_lock.lock().await;
        self.persist_and_apply(&Event::HourConfigurationCleared { date })
            .await
    }

    // ── Day overrides ────────────────────────────────────────

    pub async fn set_day_open(&self, date: NaiveDate, is_open: bool) -> Result<(), EngineError> {
        let _guard = self.write_lock.lock().await;
        self.persist_and_apply(&Event::DayOpenSet { date, is_open })
            .await
    }

    pub async fn clear_day_override(&self, date: NaiveDate) -> Result<(), EngineError> {
        let _guard = self.write_lock.lock().await;
        self.persist_and_apply(&Event::DayOverrideCleared { date })
            .await
    }

    // ── Bookings ─────────────────────────────────────────────

    fn validate_booking(&self, booking: &Booking) -> Result<(), EngineError> {
        if booking.party_size == 0 || booking.party_size > MAX_PARTY_SIZE {
            return Err(EngineError::InvalidPartySize(i64::from(booking.party_size)));
        }
        if booking.status == BookingStatus::Cancelled {
            return Err(EngineError::InvalidValue("new bookings cannot be cancelled".into()));
        }
        if self.store.contains_booking(&booking.id) {
            return Err(EngineError::AlreadyExists(booking.id));
        }
        Ok(())
    }

    /// Intake only. Capacity is not re-checked here; callers check feasibility first.
    pub async fn record_booking(&self, booking: Booking) -> Result<(), EngineError> {
        let _guard = self.write_lock.lock().await;
        if self.store.booking_count() >= MAX_BOOKINGS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many bookings"));
        }
        self.validate_booking(&booking)?;
        self.persist_and_apply(&Event::BookingRecorded { booking })
            .await
    }

    /// All-or-nothing: every booking is validated, then the whole batch is
    /// written to the WAL as one unit before any of it is applied.
    pub async fn batch_record_bookings(&self, bookings: Vec<Booking>) -> Result<usize, EngineError> {
        let _guard = self.write_lock.lock().await;
        if self.store.booking_count() + bookings.len() > MAX_BOOKINGS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many bookings"));
        }
        let mut seen = BTreeSet::new();
        for b in &bookings {
            self.validate_booking(b)?;
            if !seen.insert(b.id) {
                return Err(EngineError::AlreadyExists(b.id));
            }
        }
        let events: Vec<Event> = bookings
            .into_iter()
            .map(|booking| Event::BookingRecorded { booking })
            .collect();
        let count = events.len();
        self.persist_and_apply_all(events).await?;
        Ok(count)
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let _guard = self.write_lock.lock().await;
        if !self.store.contains_booking(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_and_apply(&Event::BookingCancelled { id }).await
    }

    // ── Modification history ─────────────────────────────────

    pub async fn append_modification(
        &self,
        booking_id: Ulid,
        field: String,
        old_value: String,
        new_value: String,
    ) -> Result<(), EngineError> {
        if field.trim().is_empty() {
            return Err(EngineError::InvalidValue("empty field name".into()));
        }
        if [&field, &old_value, &new_value]
            .iter()
            .any(|v| v.len() > MAX_FIELD_VALUE_LEN)
        {
            return Err(EngineError::LimitExceeded("modification value too long"));
        }
        let _guard = self.write_lock.lock().await;
        if !self.store.contains_booking(&booking_id) {
            return Err(EngineError::NotFound(booking_id));
        }
        let record = ModificationRecord {
            booking_id,
            field,
            old_value,
            new_value,
            recorded_at: chrono::Local::now().naive_local(),
        };
        self.persist_and_apply(&Event::ModificationRecorded { record })
            .await
    }
}
