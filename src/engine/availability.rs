use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use crate::model::*;

use super::error::StoreError;
use super::resolver::CapacityConfigResolver;
use super::rules::{horizon, is_blackout, is_date_closed};
use super::slots::{SlotCapacityCalculator, SlotStatus};
use super::store::ReservationStore;

/// A slot with room for the requested party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableSlot {
    pub time: SlotTime,
    pub remaining: i64,
    pub total: i64,
    pub booked: i64,
    pub status: SlotStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeasibilityReason {
    SpecialHoliday,
    ClosedDay,
    TooFarFuture,
    DateOpen,
    NoHoursAvailable,
    CurrentTimeNotAvailable,
    CapacityExceededNewDate,
}

impl FeasibilityReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeasibilityReason::SpecialHoliday => "special_holiday",
            FeasibilityReason::ClosedDay => "closed_day",
            FeasibilityReason::TooFarFuture => "too_far_future",
            FeasibilityReason::DateOpen => "date_open",
            FeasibilityReason::NoHoursAvailable => "no_hours_available",
            FeasibilityReason::CurrentTimeNotAvailable => "current_time_not_available",
            FeasibilityReason::CapacityExceededNewDate => "capacity_exceeded_new_date",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeasibilityRequest {
    pub date: NaiveDate,
    /// `None` asks only whether the date is open at all.
    pub party_size: Option<u32>,
    /// `HH:MM` or `HH:MM:SS`; seconds are ignored.
    pub current_time: Option<String>,
    /// Set when re-checking for a modification of this booking.
    pub exclude_booking_id: Option<BookingId>,
}

/// Verdict of the feasibility pipeline. `reason` is `None` only when the
/// requested time is available.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateFeasibility {
    pub date: NaiveDate,
    pub feasible: bool,
    pub reason: Option<FeasibilityReason>,
    pub current_time_available: bool,
    pub available_slots: Vec<AvailableSlot>,
    pub formatted_slots: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_until: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_explicitly_opened: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_total: Option<i64>,
}

impl DateFeasibility {
    fn rejected(date: NaiveDate, reason: FeasibilityReason) -> Self {
        Self {
            date,
            feasible: false,
            reason: Some(reason),
            current_time_available: false,
            available_slots: Vec::new(),
            formatted_slots: String::new(),
            days_until: None,
            is_explicitly_opened: None,
            daily_limit: None,
            current_total: None,
        }
    }
}

/// Natural-language disjunction: `"A"`, `"A o B"`, `"A, B o C"`.
pub fn format_slot_list(slots: &[SlotTime]) -> String {
    let rendered: Vec<String> = slots.iter().map(ToString::to_string).collect();
    match rendered.as_slice() {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} o {}", init.join(", "), last),
    }
}

pub struct AvailabilityQueryService<'a> {
    store: &'a dyn ReservationStore,
}

impl<'a> AvailabilityQueryService<'a> {
    pub fn new(store: &'a dyn ReservationStore) -> Self {
        Self { store }
    }

    /// Open slots with at least `party_size` seats remaining, by time.
    pub async fn available_slots(
        &self,
        date: NaiveDate,
        party_size: u32,
    ) -> Result<Vec<AvailableSlot>, StoreError> {
        let slots = SlotCapacityCalculator::new(self.store).compute(date).await?;
        Ok(slots
            .into_iter()
            .filter(|(_, r)| !r.closed && r.status != SlotStatus::Closed)
            .filter(|(_, r)| r.remaining >= i64::from(party_size))
            .map(|(time, r)| AvailableSlot {
                time,
                remaining: r.remaining,
                total: r.total,
                booked: r.booked,
                status: r.status,
            })
            .collect())
    }

    /// Holiday, closed day, horizon, open-check, slot capacity, then the
    /// modification ceiling. The first failing step decides the verdict.
    pub async fn check_date_feasibility(
        &self,
        req: &FeasibilityRequest,
        today: NaiveDate,
    ) -> Result<DateFeasibility, StoreError> {
        let verdict = self.evaluate(req, today).await?;
        debug!(
            date = %req.date,
            feasible = verdict.feasible,
            reason = verdict.reason.map_or("ok", |r| r.as_str()),
            "date feasibility"
        );
        Ok(verdict)
    }

    async fn evaluate(&self, req: &FeasibilityRequest, today: NaiveDate) -> Result<DateFeasibility, StoreError> {
        let date = req.date;
        if is_blackout(date) {
            return Ok(DateFeasibility::rejected(date, FeasibilityReason::SpecialHoliday));
        }

        let open_override = self.store.day_override(date).await?;
        if is_date_closed(date, open_override) {
            return Ok(DateFeasibility::rejected(date, FeasibilityReason::ClosedDay));
        }

        let h = horizon(date, today);
        if h.too_far {
            let mut out = DateFeasibility::rejected(date, FeasibilityReason::TooFarFuture);
            out.days_until = Some(h.days_until);
            return Ok(out);
        }

        let Some(party_size) = req.party_size else {
            let mut out = DateFeasibility::rejected(date, FeasibilityReason::DateOpen);
            out.feasible = true;
            out.days_until = Some(h.days_until);
            out.is_explicitly_opened = Some(open_override == Some(true));
            return Ok(out);
        };

        let slots = self.available_slots(date, party_size).await?;
        if slots.is_empty() {
            let mut out = DateFeasibility::rejected(date, FeasibilityReason::NoHoursAvailable);
            out.days_until = Some(h.days_until);
            return Ok(out);
        }

        let requested = req
            .current_time
            .as_deref()
            .and_then(|t| SlotTime::parse(t).ok());
        let current_time_available = requested.is_some_and(|t| slots.iter().any(|s| s.time == t));

        if let Some(booking_id) = req.exclude_booking_id {
            let ceiling = CapacityConfigResolver::new(self.store)
                .daily_limit(date, Ceiling::Modification)
                .await?;
            let current_total = self
                .store
                .booked_total(date, Some(booking_id))
                .await?
                .party_total;
            if current_total + i64::from(party_size) > ceiling {
                let mut out = DateFeasibility::rejected(date, FeasibilityReason::CapacityExceededNewDate);
                out.days_until = Some(h.days_until);
                out.daily_limit = Some(ceiling);
                out.current_total = Some(current_total);
                return Ok(out);
            }
        }

        let times: Vec<SlotTime> = slots.iter().map(|s| s.time).collect();
        Ok(DateFeasibility {
            date,
            feasible: true,
            reason: (!current_time_available).then_some(FeasibilityReason::CurrentTimeNotAvailable),
            current_time_available,
            formatted_slots: format_slot_list(&times),
            available_slots: slots,
            days_until: Some(h.days_until),
            is_explicitly_opened: None,
            daily_limit: None,
            current_total: None,
        })
    }
}
