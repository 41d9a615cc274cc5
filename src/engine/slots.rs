use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::limits::{FULL_THRESHOLD, LIMITED_THRESHOLD};
use crate::model::*;

use super::error::StoreError;
use super::resolver::{equal_split, CapacityConfigResolver};
use super::store::ReservationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Available,
    Limited,
    Full,
    Closed,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Available => "available",
            SlotStatus::Limited => "limited",
            SlotStatus::Full => "full",
            SlotStatus::Closed => "closed",
        }
    }
}

/// Derived occupancy of one slot. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotReport {
    pub status: SlotStatus,
    pub remaining: i64,
    pub total: i64,
    pub booked: i64,
    pub allocation_percentage: f64,
    pub completion_percentage: f64,
    pub closed: bool,
}

// ── Pure arithmetic ──────────────────────────────────────────────

pub fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// ceil(percentage/100 × limit). The epsilon absorbs float noise from
/// non-terminating shares such as 100/3.
pub fn slot_capacity(percentage: f64, daily_limit: i64) -> i64 {
    let raw = percentage / 100.0 * daily_limit as f64;
    (raw - 1e-9).ceil().max(0.0) as i64
}

/// booked/total × 100, capped at 100, then rounded to one decimal.
pub fn completion(booked: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let pct = booked as f64 / total as f64 * 100.0;
    round1(pct.min(100.0))
}

/// Strict thresholds: 90.0 is not yet full and 70.0 is not yet limited.
pub fn status_for(completion: f64) -> SlotStatus {
    if completion > FULL_THRESHOLD {
        SlotStatus::Full
    } else if completion > LIMITED_THRESHOLD {
        SlotStatus::Limited
    } else {
        SlotStatus::Available
    }
}

fn report(setting: SlotSetting, booked: i64, daily_limit: i64) -> SlotReport {
    match setting {
        SlotSetting::Closed => SlotReport {
            status: SlotStatus::Closed,
            remaining: -booked,
            total: 0,
            booked,
            allocation_percentage: 0.0,
            completion_percentage: 0.0,
            closed: true,
        },
        SlotSetting::Open { percentage } => {
            let total = slot_capacity(percentage, daily_limit);
            let completion = completion(booked, total);
            SlotReport {
                status: status_for(completion),
                remaining: total - booked,
                total,
                booked,
                allocation_percentage: percentage,
                completion_percentage: completion,
                closed: false,
            }
        }
    }
}

// ── Calculator ───────────────────────────────────────────────────

pub struct SlotCapacityCalculator<'a> {
    store: &'a dyn ReservationStore,
}

impl<'a> SlotCapacityCalculator<'a> {
    pub fn new(store: &'a dyn ReservationStore) -> Self {
        Self { store }
    }

    /// Per-slot occupancy for `date`, recomputed from live bookings.
    pub async fn compute(&self, date: NaiveDate) -> Result<BTreeMap<SlotTime, SlotReport>, StoreError> {
        let resolver = CapacityConfigResolver::new(self.store);
        let booked = self.store.booked_by_slot(date).await?;
        let daily_limit = resolver.daily_limit(date, Ceiling::Booking).await?;

        let settings: Vec<(SlotTime, SlotSetting)> = match resolver.hour_configuration(date).await? {
            Some(config) => config.into_iter().collect(),
            None => {
                let hours = resolver.hour_set(date, HourSetPath::SlotConfiguration).await?;
                equal_split(&hours)
                    .into_iter()
                    .map(|(slot, percentage)| (slot, SlotSetting::Open { percentage }))
                    .collect()
            }
        };

        Ok(settings
            .into_iter()
            .map(|(slot, setting)| {
                let b = booked.get(&slot).copied().unwrap_or(0);
                (slot, report(setting, b, daily_limit))
            })
            .collect())
    }

    /// Staff-facing percentage breakdown over the reporting hour set.
    pub async fn hour_percentages(&self, date: NaiveDate) -> Result<HourPercentages, StoreError> {
        let resolver = CapacityConfigResolver::new(self.store);
        let active_hours = resolver.hour_set(date, HourSetPath::Percentages).await?;
        let percentages = resolver.hour_allocation(date, &active_hours).await?;
        let booked = self.store.booked_by_slot(date).await?;
        let daily_limit = resolver.daily_limit(date, Ceiling::Booking).await?;
        let total_people = self.store.booked_total(date, None).await?.party_total;

        let mut out = HourPercentages {
            date,
            active_hours: active_hours.clone(),
            percentages: BTreeMap::new(),
            booked_by_slot: BTreeMap::new(),
            total_people,
            daily_limit,
            capacity_by_slot: BTreeMap::new(),
            completion_by_slot: BTreeMap::new(),
        };
        for slot in active_hours {
            let pct = percentages.get(&slot).copied().unwrap_or(0.0);
            let b = booked.get(&slot).copied().unwrap_or(0);
            // Capacity rounds up and completion keeps one decimal, as in `compute`.
            let capacity = slot_capacity(pct, daily_limit);
            out.percentages.insert(slot, pct);
            out.booked_by_slot.insert(slot, b);
            out.capacity_by_slot.insert(slot, capacity);
            out.completion_by_slot.insert(slot, completion(b, capacity));
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourPercentages {
    pub date: NaiveDate,
    pub active_hours: Vec<SlotTime>,
    pub percentages: BTreeMap<SlotTime, f64>,
    pub booked_by_slot: BTreeMap<SlotTime, i64>,
    pub total_people: i64,
    pub daily_limit: i64,
    pub capacity_by_slot: BTreeMap<SlotTime, i64>,
    pub completion_by_slot: BTreeMap<SlotTime, f64>,
}
