use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::warn;
use ulid::Ulid;

use crate::limits::BOOKING_HORIZON_DAYS;
use crate::model::*;
use crate::observability;

use super::availability::{AvailabilityQueryService, AvailableSlot, DateFeasibility, FeasibilityRequest};
use super::calendar::{BookingWindow, DayAvailabilityAggregator, DayStatus, MonthGrid};
use super::eligibility::{Eligibility, ModificationEligibilityGuard, PartySizeChange};
use super::error::StoreError;
use super::slots::{HourPercentages, SlotCapacityCalculator, SlotReport};
use super::{Engine, EngineError};

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

impl Engine {
    /// Count and log a failed store read before handing the error back.
    fn observe<T>(&self, result: Result<T, EngineError>) -> Result<T, EngineError> {
        if let Err(EngineError::Store(e)) = &result {
            let table = match e {
                StoreError::Read { table, .. } => *table,
                StoreError::Unavailable => "unavailable",
            };
            metrics::counter!(observability::STORE_READ_FAILURES_TOTAL, "table" => table).increment(1);
            warn!(tenant = %self.tenant, error = %e, "store read failed");
        }
        result
    }

    fn aggregator(&self) -> DayAvailabilityAggregator<'_> {
        DayAvailabilityAggregator::new(&*self.store).with_cache(&self.calendar, &self.tenant)
    }

    pub fn list_bookings(&self, date: Option<NaiveDate>) -> Vec<Booking> {
        self.store.list_bookings(date)
    }

    pub async fn slots(&self, date: NaiveDate) -> Result<BTreeMap<SlotTime, SlotReport>, EngineError> {
        let result = SlotCapacityCalculator::new(&*self.store)
            .compute(date)
            .await
            .map_err(EngineError::from);
        self.observe(result)
    }

    pub async fn available_slots(&self, date: NaiveDate, party_size: u32) -> Result<Vec<AvailableSlot>, EngineError> {
        if party_size == 0 {
            return Err(EngineError::InvalidPartySize(0));
        }
        let result = AvailabilityQueryService::new(&*self.store)
            .available_slots(date, party_size)
            .await
            .map_err(EngineError::from);
        self.observe(result)
    }

    pub async fn date_feasibility(&self, req: &FeasibilityRequest) -> Result<DateFeasibility, EngineError> {
        self.date_feasibility_on(req, today()).await
    }

    pub async fn date_feasibility_on(
        &self,
        req: &FeasibilityRequest,
        today: NaiveDate,
    ) -> Result<DateFeasibility, EngineError> {
        if req.party_size == Some(0) {
            return Err(EngineError::InvalidPartySize(0));
        }
        let result = AvailabilityQueryService::new(&*self.store)
            .check_date_feasibility(req, today)
            .await
            .map_err(EngineError::from);
        let verdict = self.observe(result)?;
        let reason = verdict.reason.map_or("feasible", |r| r.as_str());
        metrics::counter!(observability::FEASIBILITY_VERDICTS_TOTAL, "reason" => reason).increment(1);
        Ok(verdict)
    }

    pub async fn modification_eligibility(&self, booking_id: Ulid) -> Result<Eligibility, EngineError> {
        self.modification_eligibility_at(booking_id, now()).await
    }

    pub async fn modification_eligibility_at(
        &self,
        booking_id: Ulid,
        now: NaiveDateTime,
    ) -> Result<Eligibility, EngineError> {
        let result = ModificationEligibilityGuard::new(&*self.store)
            .check(booking_id, now)
            .await;
        let verdict = self.observe(result)?;
        let reason = verdict.reason.map_or("eligible", |r| r.as_str());
        metrics::counter!(observability::ELIGIBILITY_VERDICTS_TOTAL, "reason" => reason).increment(1);
        Ok(verdict)
    }

    pub async fn party_size_change(
        &self,
        date: NaiveDate,
        current_party_size: u32,
        new_party_size: u32,
        booking_id: Ulid,
    ) -> Result<PartySizeChange, EngineError> {
        let result = ModificationEligibilityGuard::new(&*self.store)
            .check_party_size_change(date, current_party_size, new_party_size, booking_id)
            .await;
        self.observe(result)
    }

    /// Window of `days` days after today (default: the booking horizon).
    pub async fn booking_window(&self, days: Option<u32>) -> Result<BookingWindow, EngineError> {
        self.booking_window_on(today(), days).await
    }

    pub async fn booking_window_on(&self, today: NaiveDate, days: Option<u32>) -> Result<BookingWindow, EngineError> {
        let days = days.unwrap_or(BOOKING_HORIZON_DAYS as u32);
        let result = self.aggregator().window_status(today, days).await;
        self.observe(result)
    }

    pub async fn month_grid(&self, year: i32, month: u32) -> Result<Arc<MonthGrid>, EngineError> {
        let result = self.aggregator().month_grid(year, month).await;
        self.observe(result)
    }

    pub async fn hour_percentages(&self, date: NaiveDate) -> Result<HourPercentages, EngineError> {
        let result = SlotCapacityCalculator::new(&*self.store)
            .hour_percentages(date)
            .await
            .map_err(EngineError::from);
        self.observe(result)
    }

    pub async fn day_status(&self, date: NaiveDate) -> Result<DayStatus, EngineError> {
        let result = self.aggregator().day_status(date).await;
        self.observe(result)
    }
}
