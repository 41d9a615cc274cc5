use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::debug;

use crate::limits::{MAX_MODIFICATIONS_PER_BOOKING, MAX_MODIFIED_PARTY_SIZE, MIN_MODIFICATION_LEAD_HOURS};
use crate::model::*;

use super::error::EngineError;
use super::resolver::CapacityConfigResolver;
use super::store::ReservationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IneligibleReason {
    Cancelled,
    PastDate,
    SameDay,
    NextDay,
    InsufficientTime,
    MaxModifications,
}

impl IneligibleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IneligibleReason::Cancelled => "cancelled",
            IneligibleReason::PastDate => "past_date",
            IneligibleReason::SameDay => "same_day",
            IneligibleReason::NextDay => "next_day",
            IneligibleReason::InsufficientTime => "insufficient_time",
            IneligibleReason::MaxModifications => "max_modifications",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Eligibility {
    pub modifiable: bool,
    pub reason: Option<IneligibleReason>,
    pub modifications_remaining: Option<u32>,
    pub hours_until_reservation: Option<i64>,
}

impl Eligibility {
    fn denied(reason: IneligibleReason) -> Self {
        Self {
            modifiable: false,
            reason: Some(reason),
            modifications_remaining: None,
            hours_until_reservation: None,
        }
    }
}

/// Time-based rules only. Returns whole hours until the reservation when
/// none of them apply.
pub fn time_window(booking: &Booking, now: NaiveDateTime) -> Result<i64, IneligibleReason> {
    if booking.status == BookingStatus::Cancelled {
        return Err(IneligibleReason::Cancelled);
    }
    let starts_at = booking.starts_at();
    if starts_at < now {
        return Err(IneligibleReason::PastDate);
    }
    let today = now.date();
    if booking.date == today {
        return Err(IneligibleReason::SameDay);
    }
    if booking.date == today + Duration::days(1) {
        return Err(IneligibleReason::NextDay);
    }
    let hours_until = (starts_at - now).num_hours();
    if hours_until < MIN_MODIFICATION_LEAD_HOURS {
        return Err(IneligibleReason::InsufficientTime);
    }
    Ok(hours_until)
}

/// Full rule chain; the first matching rule wins.
pub fn evaluate(booking: &Booking, now: NaiveDateTime, modification_count: u32) -> Eligibility {
    let hours_until = match time_window(booking, now) {
        Ok(h) => h,
        Err(reason) => return Eligibility::denied(reason),
    };
    if modification_count >= MAX_MODIFICATIONS_PER_BOOKING {
        return Eligibility {
            modifications_remaining: Some(0),
            ..Eligibility::denied(IneligibleReason::MaxModifications)
        };
    }
    Eligibility {
        modifiable: true,
        reason: None,
        modifications_remaining: Some(MAX_MODIFICATIONS_PER_BOOKING - modification_count),
        hours_until_reservation: Some(hours_until),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartySizeRejection {
    PartyTooLarge,
    CapacityExceeded,
}

impl PartySizeRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartySizeRejection::PartyTooLarge => "party_too_large",
            PartySizeRejection::CapacityExceeded => "capacity_exceeded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartySizeChange {
    pub accepted: bool,
    pub reason: Option<PartySizeRejection>,
    pub daily_limit: Option<i64>,
    pub current_total: Option<i64>,
    pub new_total: Option<i64>,
    pub people_difference: i64,
    pub spots_remaining: Option<i64>,
}

pub struct ModificationEligibilityGuard<'a> {
    store: &'a dyn ReservationStore,
}

impl<'a> ModificationEligibilityGuard<'a> {
    pub fn new(store: &'a dyn ReservationStore) -> Self {
        Self { store }
    }

    /// The audit count is only read once every time rule has passed.
    pub async fn check(&self, booking_id: BookingId, now: NaiveDateTime) -> Result<Eligibility, EngineError> {
        let booking = self
            .store
            .booking(booking_id)
            .await?
            .ok_or(EngineError::NotFound(booking_id))?;
        let verdict = match time_window(&booking, now) {
            Err(reason) => Eligibility::denied(reason),
            Ok(_) => {
                let count = self.store.modification_count(booking_id).await?;
                evaluate(&booking, now, count)
            }
        };
        debug!(
            booking = %booking_id,
            modifiable = verdict.modifiable,
            reason = verdict.reason.map_or("ok", |r| r.as_str()),
            "modification eligibility"
        );
        Ok(verdict)
    }

    /// Whether `booking_id` may move to `new_party_size` on `date` against
    /// the modification ceiling.
    pub async fn check_party_size_change(
        &self,
        date: NaiveDate,
        current_party_size: u32,
        new_party_size: u32,
        booking_id: BookingId,
    ) -> Result<PartySizeChange, EngineError> {
        if current_party_size == 0 {
            return Err(EngineError::InvalidPartySize(0));
        }
        if new_party_size == 0 {
            return Err(EngineError::InvalidPartySize(0));
        }
        let people_difference = i64::from(new_party_size) - i64::from(current_party_size);

        if new_party_size > MAX_MODIFIED_PARTY_SIZE {
            return Ok(PartySizeChange {
                accepted: false,
                reason: Some(PartySizeRejection::PartyTooLarge),
                daily_limit: None,
                current_total: None,
                new_total: None,
                people_difference,
                spots_remaining: None,
            });
        }

        let ceiling = CapacityConfigResolver::new(self.store)
            .daily_limit(date, Ceiling::Modification)
            .await?;
        let current_total = self
            .store
            .booked_total(date, Some(booking_id))
            .await?
            .party_total;
        let new_total = current_total + i64::from(new_party_size);
        let accepted = new_total <= ceiling;

        Ok(PartySizeChange {
            accepted,
            reason: (!accepted).then_some(PartySizeRejection::CapacityExceeded),
            daily_limit: Some(ceiling),
            current_total: Some(current_total),
            new_total: Some(new_total),
            people_difference,
            spots_remaining: Some(if accepted { ceiling - new_total } else { ceiling - current_total }),
        })
    }
}
