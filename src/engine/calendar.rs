use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

use crate::cache::TtlCache;
use crate::limits::MAX_WINDOW_DAYS;
use crate::model::*;
use crate::observability;

use super::error::EngineError;
use super::resolver::CapacityConfigResolver;
use super::rules::{is_date_closed, is_default_closed_weekday, weekday_name};
use super::store::ReservationStore;
use super::slots::round1;

/// Month grids keyed by (tenant, year, month).
pub type CalendarCache = TtlCache<(String, i32, u32), Arc<MonthGrid>>;

// ── Rolling window ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DayUnavailable {
    Closed,
    FullyBooked,
}

impl DayUnavailable {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayUnavailable::Closed => "closed",
            DayUnavailable::FullyBooked => "fully_booked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowDay {
    pub date: NaiveDate,
    pub available: bool,
    pub reason: Option<DayUnavailable>,
    /// Clamped at zero.
    pub free_seats: i64,
    pub total_capacity: i64,
    pub booked: i64,
    pub occupancy_percentage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSummary {
    pub total_days: u32,
    pub available_days: usize,
    pub unavailable_days: usize,
    pub closed_days: usize,
    pub booking_window_start: NaiveDate,
    pub booking_window_end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingWindow {
    pub days: Vec<WindowDay>,
    pub summary: WindowSummary,
}

// ── Month grid ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthDay {
    pub date: NaiveDate,
    pub booking_count: u32,
    pub total_people: i64,
    pub limit: i64,
    /// Not clamped; negative means overbooked.
    pub free_seats: i64,
    pub is_open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthGrid {
    pub year: i32,
    pub month: u32,
    pub days: Vec<MonthDay>,
}

/// Grid rule: an override if present, else the weekday default. Kept apart
/// from the feasibility closed-day check.
pub fn grid_is_open(date: NaiveDate, open_override: Option<bool>) -> bool {
    open_override.unwrap_or_else(|| !is_default_closed_weekday(date))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayStatus {
    pub date: NaiveDate,
    pub weekday: &'static str,
    pub is_open: bool,
    pub is_default_closed_day: bool,
    pub explicit_override: Option<bool>,
}

// ── Aggregator ───────────────────────────────────────────────────

pub struct DayAvailabilityAggregator<'a> {
    store: &'a dyn ReservationStore,
    cache: Option<(&'a CalendarCache, &'a str)>,
}

impl<'a> DayAvailabilityAggregator<'a> {
    pub fn new(store: &'a dyn ReservationStore) -> Self {
        Self { store, cache: None }
    }

    /// Serve month grids through `cache` under `tenant`'s key space.
    pub fn with_cache(mut self, cache: &'a CalendarCache, tenant: &'a str) -> Self {
        self.cache = Some((cache, tenant));
        self
    }

    /// Per-day status for `today ..= today + days`.
    pub async fn window_status(&self, today: NaiveDate, days: u32) -> Result<BookingWindow, EngineError> {
        if days > MAX_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("window too long"));
        }
        let resolver = CapacityConfigResolver::new(self.store);
        let end = today + Duration::days(i64::from(days));
        let mut out = Vec::with_capacity(days as usize + 1);

        for date in today.iter_days().take_while(|d| *d <= end) {
            let open_override = self.store.day_override(date).await?;
            if is_date_closed(date, open_override) {
                out.push(WindowDay {
                    date,
                    available: false,
                    reason: Some(DayUnavailable::Closed),
                    free_seats: 0,
                    total_capacity: 0,
                    booked: 0,
                    occupancy_percentage: None,
                });
                continue;
            }

            let limit = resolver.daily_limit(date, Ceiling::Booking).await?;
            let booked = self.store.booked_total(date, None).await?.party_total;
            let free = limit - booked;
            if free <= 0 {
                out.push(WindowDay {
                    date,
                    available: false,
                    reason: Some(DayUnavailable::FullyBooked),
                    free_seats: 0,
                    total_capacity: limit,
                    booked,
                    occupancy_percentage: None,
                });
            } else {
                out.push(WindowDay {
                    date,
                    available: true,
                    reason: None,
                    free_seats: free,
                    total_capacity: limit,
                    booked,
                    occupancy_percentage: Some(round1(booked as f64 / limit as f64 * 100.0)),
                });
            }
        }

        let available_days = out.iter().filter(|d| d.available).count();
        let closed_days = out
            .iter()
            .filter(|d| d.reason == Some(DayUnavailable::Closed))
            .count();
        Ok(BookingWindow {
            summary: WindowSummary {
                total_days: days,
                available_days,
                unavailable_days: out.len() - available_days,
                closed_days,
                booking_window_start: today,
                booking_window_end: end,
            },
            days: out,
        })
    }

    /// Calendar grid for one month, cached when a cache is attached.
    pub async fn month_grid(&self, year: i32, month: u32) -> Result<Arc<MonthGrid>, EngineError> {
        if !(2000..=2100).contains(&year) || !(1..=12).contains(&month) {
            return Err(EngineError::InvalidValue(format!("invalid month {year}-{month}")));
        }
        if let Some((cache, tenant)) = self.cache {
            let key = (tenant.to_string(), year, month);
            if let Some(grid) = cache.get(&key) {
                metrics::counter!(observability::CALENDAR_CACHE_TOTAL, "result" => "hit").increment(1);
                return Ok(grid);
            }
            metrics::counter!(observability::CALENDAR_CACHE_TOTAL, "result" => "miss").increment(1);
            let grid = Arc::new(self.build_month_grid(year, month).await?);
            cache.insert(key, grid.clone());
            return Ok(grid);
        }
        Ok(Arc::new(self.build_month_grid(year, month).await?))
    }

    async fn build_month_grid(&self, year: i32, month: u32) -> Result<MonthGrid, EngineError> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| EngineError::InvalidValue(format!("invalid month {year}-{month}")))?;
        let mut days = Vec::with_capacity(31);
        for date in first.iter_days().take_while(|d| d.month() == month) {
            let agg = self.store.booked_total(date, None).await?;
            let limit = self
                .store
                .daily_limit(date, Ceiling::Booking)
                .await?
                .unwrap_or_else(|| Ceiling::Booking.default_limit());
            let open_override = self.store.day_override(date).await?;
            days.push(MonthDay {
                date,
                booking_count: agg.count,
                total_people: agg.party_total,
                limit,
                free_seats: limit - agg.party_total,
                is_open: grid_is_open(date, open_override),
            });
        }
        Ok(MonthGrid { year, month, days })
    }

    pub async fn day_status(&self, date: NaiveDate) -> Result<DayStatus, EngineError> {
        let explicit_override = self.store.day_override(date).await?;
        let is_default_closed_day = is_default_closed_weekday(date);
        Ok(DayStatus {
            date,
            weekday: weekday_name(date),
            is_open: !is_date_closed(date, explicit_override),
            is_default_closed_day,
            explicit_override,
        })
    }
}
