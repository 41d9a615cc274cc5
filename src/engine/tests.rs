use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use super::*;
use crate::model::*;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("tablecap_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn engine_at(path: &PathBuf) -> Engine {
    let cache = Arc::new(CalendarCache::new(Duration::from_secs(20)));
    Engine::new(path.clone(), "test", cache).unwrap()
}

fn new_engine(name: &str) -> Engine {
    engine_at(&test_wal_path(name))
}

/// Monday.
fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
}

fn at(date: NaiveDate, hh: u32, mm: u32) -> NaiveDateTime {
    date.and_hms_opt(hh, mm, 0).unwrap()
}

fn saturday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 24).unwrap()
}

fn tuesday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()
}

fn slot(raw: &str) -> SlotTime {
    SlotTime::parse(raw).unwrap()
}

fn booking(date: NaiveDate, time: &str, party_size: u32) -> Booking {
    Booking {
        id: Ulid::new(),
        date,
        time: slot(time),
        party_size,
        status: BookingStatus::Confirmed,
    }
}

fn five_slots() -> Vec<SlotTime> {
    ["13:30", "14:00", "14:30", "15:00", "15:30"]
        .iter()
        .map(|s| slot(s))
        .collect()
}

// ── Persistence ──────────────────────────────────────────────

#[tokio::test]
async fn replay_restores_every_table() {
    let path = test_wal_path("replay_all.wal");
    let kept = booking(saturday(), "14:00", 4);
    let cancelled = booking(saturday(), "13:30", 2);
    {
        let engine = engine_at(&path);
        engine.set_daily_limit(saturday(), Ceiling::Booking, 60).await.unwrap();
        engine.set_daily_limit(saturday(), Ceiling::Modification, 80).await.unwrap();
        engine.set_hour_set(saturday(), &five_slots()).await.unwrap();
        engine.set_day_open(tuesday(), true).await.unwrap();
        engine.record_booking(kept.clone()).await.unwrap();
        engine.record_booking(cancelled.clone()).await.unwrap();
        engine.cancel_booking(cancelled.id).await.unwrap();
        engine
            .append_modification(kept.id, "party_size".into(), "2".into(), "4".into())
            .await
            .unwrap();
    }

    let engine = engine_at(&path);
    let bookings = engine.list_bookings(Some(saturday()));
    assert_eq!(bookings.len(), 2);
    assert_eq!(
        engine.store.get_booking(&cancelled.id).unwrap().status,
        BookingStatus::Cancelled
    );
    assert_eq!(engine.store.modification_history(&kept.id).len(), 1);

    let slots = engine.slots(saturday()).await.unwrap();
    assert_eq!(slots.len(), 5);
    // ceil(20% of 60)
    assert_eq!(slots[&slot("14:00")].total, 12);
    assert_eq!(slots[&slot("14:00")].booked, 4);
    assert_eq!(slots[&slot("13:30")].booked, 0);

    let status = engine.day_status(tuesday()).await.unwrap();
    assert!(status.is_open);
    assert_eq!(status.explicit_override, Some(true));
}

#[tokio::test]
async fn compaction_keeps_state_and_resets_counter() {
    let path = test_wal_path("compact_state.wal");
    let b = booking(saturday(), "14:30", 3);
    {
        let engine = engine_at(&path);
        for limit in 1..=20 {
            engine.set_daily_limit(saturday(), Ceiling::Booking, limit).await.unwrap();
        }
        engine.set_day_open(tuesday(), false).await.unwrap();
        engine.clear_day_override(tuesday()).await.unwrap();
        engine.record_booking(b.clone()).await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 23);

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }

    let replayed = crate::wal::Wal::replay(&path).unwrap();
    assert_eq!(replayed.len(), 2);

    let engine = engine_at(&path);
    let window = engine.booking_window_on(saturday(), Some(0)).await.unwrap();
    assert_eq!(window.days[0].total_capacity, 20);
    assert_eq!(window.days[0].booked, 3);
    assert_eq!(engine.day_status(tuesday()).await.unwrap().explicit_override, None);
}

// ── Setters ──────────────────────────────────────────────────

#[tokio::test]
async fn invalid_writes_leave_no_trace() {
    let engine = new_engine("invalid_writes.wal");

    let skewed: HourAllocation = [(slot("13:30"), 60.0), (slot("14:00"), 30.0)].into_iter().collect();
    let err = engine.set_hour_allocation(saturday(), &skewed).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidAllocation { .. }));

    assert!(matches!(
        engine.set_daily_limit(saturday(), Ceiling::Booking, -1).await,
        Err(EngineError::InvalidDailyLimit(-1))
    ));
    assert!(matches!(
        engine.set_hour_set(saturday(), &[slot("17:00")]).await,
        Err(EngineError::InvalidHourSet(_))
    ));
    assert!(matches!(
        engine.record_booking(booking(saturday(), "14:00", 0)).await,
        Err(EngineError::InvalidPartySize(0))
    ));

    assert_eq!(engine.wal_appends_since_compact().await, 0);
}

#[tokio::test]
async fn zero_limit_override_falls_back_for_slots_but_not_for_the_grid() {
    let engine = new_engine("zero_limit.wal");
    assert_ok!(engine.set_daily_limit(saturday(), Ceiling::Booking, 0).await);

    let slots = engine.slots(saturday()).await.unwrap();
    // 45 split over four default slots
    assert!(slots.values().all(|r| r.total == 12));

    let grid = engine.month_grid(2026, 10).await.unwrap();
    assert_eq!(grid.days[23].limit, 0);
}

#[tokio::test]
async fn saving_an_hour_set_drops_the_configuration() {
    let engine = new_engine("hour_set_drops_config.wal");
    let config: HourConfiguration = [
        (slot("13:30"), SlotSetting::Open { percentage: 70.0 }),
        (slot("14:00"), SlotSetting::Closed),
    ]
    .into_iter()
    .collect();
    engine.save_hour_configuration(saturday(), &config).await.unwrap();

    let slots = engine.slots(saturday()).await.unwrap();
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[&slot("14:00")].status, SlotStatus::Closed);
    assert_eq!(slots[&slot("13:30")].total, 32);

    engine
        .set_hour_set(saturday(), &[slot("19:00"), slot("20:00"), slot("21:00")])
        .await
        .unwrap();
    let slots = engine.slots(saturday()).await.unwrap();
    let times: Vec<String> = slots.keys().map(ToString::to_string).collect();
    assert_eq!(times, ["19:00", "20:00", "21:00"]);
    assert!(slots.values().all(|r| r.status == SlotStatus::Available));
}

#[tokio::test]
async fn booking_lifecycle_errors() {
    let engine = new_engine("booking_errors.wal");
    let b = booking(saturday(), "14:00", 2);
    engine.record_booking(b.clone()).await.unwrap();

    assert!(matches!(
        engine.record_booking(b.clone()).await,
        Err(EngineError::AlreadyExists(id)) if id == b.id
    ));
    let unknown = Ulid::new();
    assert!(matches!(engine.cancel_booking(unknown).await, Err(EngineError::NotFound(_))));
    assert!(matches!(
        engine
            .append_modification(unknown, "time".into(), "14:00".into(), "14:30".into())
            .await,
        Err(EngineError::NotFound(_))
    ));
    assert_err!(
        engine
            .append_modification(b.id, "  ".into(), "a".into(), "b".into())
            .await
    );
}

#[tokio::test]
async fn batch_is_validated_before_writing() {
    let engine = new_engine("batch_validation.wal");
    let dup = booking(saturday(), "14:00", 2);
    let batch = vec![booking(saturday(), "13:30", 2), dup.clone(), dup];
    assert!(matches!(
        engine.batch_record_bookings(batch).await,
        Err(EngineError::AlreadyExists(_))
    ));
    assert!(engine.list_bookings(None).is_empty());

    let ok = vec![booking(saturday(), "13:30", 2), booking(saturday(), "14:00", 5)];
    assert_eq!(engine.batch_record_bookings(ok).await.unwrap(), 2);
    assert_eq!(engine.list_bookings(Some(saturday())).len(), 2);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn batch_is_not_applied_when_the_wal_write_fails() {
    let cache = Arc::new(CalendarCache::new(Duration::from_secs(20)));
    let engine = Engine::new(PathBuf::from("/dev/full"), "test", cache).unwrap();
    let batch = vec![
        booking(saturday(), "13:30", 2),
        booking(saturday(), "14:00", 3),
        booking(saturday(), "14:30", 4),
    ];
    assert!(matches!(
        engine.batch_record_bookings(batch).await,
        Err(EngineError::WalError(_))
    ));
    assert!(engine.list_bookings(None).is_empty());
    assert_eq!(engine.slots(saturday()).await.unwrap()[&slot("13:30")].booked, 0);
}

// ── Capacity scenarios ───────────────────────────────────────

#[tokio::test]
async fn five_slot_day_fills_one_slot() {
    let engine = new_engine("scenario_a.wal");
    engine.set_hour_set(saturday(), &five_slots()).await.unwrap();
    engine.record_booking(booking(saturday(), "14:30", 9)).await.unwrap();

    let slots = engine.slots(saturday()).await.unwrap();
    let full = &slots[&slot("14:30")];
    assert_eq!(full.total, 9);
    assert_eq!(full.completion_percentage, 100.0);
    assert_eq!(full.status, SlotStatus::Full);
    assert_eq!(full.remaining, 0);

    let open = engine.available_slots(saturday(), 1).await.unwrap();
    assert_eq!(open.len(), 4);
    assert!(open.iter().all(|s| s.time != slot("14:30")));
}

#[tokio::test]
async fn compute_is_deterministic() {
    let engine = new_engine("deterministic.wal");
    engine.record_booking(booking(saturday(), "14:00", 7)).await.unwrap();
    let first = engine.slots(saturday()).await.unwrap();
    let second = engine.slots(saturday()).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn hour_percentages_report() {
    let engine = new_engine("hour_percentages.wal");
    engine.record_booking(booking(saturday(), "14:00", 4)).await.unwrap();
    engine.record_booking(booking(saturday(), "19:00", 3)).await.unwrap();

    let report = engine.hour_percentages(saturday()).await.unwrap();
    assert_eq!(report.active_hours, five_slots());
    assert_eq!(report.daily_limit, 45);
    assert_eq!(report.total_people, 7);
    assert_eq!(report.capacity_by_slot[&slot("14:00")], 9);
    assert_eq!(report.completion_by_slot[&slot("14:00")], 44.4);
}

// ── Feasibility ──────────────────────────────────────────────

#[tokio::test]
async fn tuesday_is_closed_until_opened() {
    let engine = new_engine("scenario_b.wal");
    engine.set_daily_limit(tuesday(), Ceiling::Booking, 500).await.unwrap();

    let req = FeasibilityRequest {
        date: tuesday(),
        party_size: Some(2),
        ..Default::default()
    };
    let v = engine.date_feasibility_on(&req, today()).await.unwrap();
    assert!(!v.feasible);
    assert_eq!(v.reason, Some(FeasibilityReason::ClosedDay));

    engine.set_day_open(tuesday(), true).await.unwrap();
    let open_check = FeasibilityRequest { date: tuesday(), ..Default::default() };
    let v = engine.date_feasibility_on(&open_check, today()).await.unwrap();
    assert!(v.feasible);
    assert_eq!(v.reason, Some(FeasibilityReason::DateOpen));
    assert_eq!(v.is_explicitly_opened, Some(true));
}

#[tokio::test]
async fn christmas_is_always_blocked() {
    let engine = new_engine("scenario_f.wal");
    let christmas = NaiveDate::from_ymd_opt(2026, 12, 25).unwrap();
    engine.set_day_open(christmas, true).await.unwrap();
    engine.set_daily_limit(christmas, Ceiling::Booking, 200).await.unwrap();

    let req = FeasibilityRequest {
        date: christmas,
        party_size: Some(2),
        ..Default::default()
    };
    let near_christmas = NaiveDate::from_ymd_opt(2026, 12, 1).unwrap();
    let v = engine.date_feasibility_on(&req, near_christmas).await.unwrap();
    assert!(!v.feasible);
    assert_eq!(v.reason, Some(FeasibilityReason::SpecialHoliday));
}

#[tokio::test]
async fn requested_time_and_alternatives() {
    let engine = new_engine("requested_time.wal");
    engine.record_booking(booking(saturday(), "13:30", 11)).await.unwrap();

    let mut req = FeasibilityRequest {
        date: saturday(),
        party_size: Some(2),
        current_time: Some("14:00:00".into()),
        ..Default::default()
    };
    let v = engine.date_feasibility_on(&req, today()).await.unwrap();
    assert!(v.feasible && v.current_time_available);
    assert_eq!(v.reason, None);

    req.current_time = Some("13:30".into());
    let v = engine.date_feasibility_on(&req, today()).await.unwrap();
    assert!(v.feasible);
    assert!(!v.current_time_available);
    assert_eq!(v.reason, Some(FeasibilityReason::CurrentTimeNotAvailable));
    assert_eq!(v.formatted_slots, "14:00, 14:30 o 15:00");
}

#[tokio::test]
async fn modification_uses_the_second_ceiling() {
    let engine = new_engine("cross_check.wal");
    let moving = booking(saturday(), "14:00", 4);
    engine.record_booking(moving.clone()).await.unwrap();
    engine.record_booking(booking(saturday(), "13:30", 6)).await.unwrap();
    engine.set_daily_limit(saturday(), Ceiling::Modification, 10).await.unwrap();

    let req = FeasibilityRequest {
        date: saturday(),
        party_size: Some(5),
        exclude_booking_id: Some(moving.id),
        ..Default::default()
    };
    let v = engine.date_feasibility_on(&req, today()).await.unwrap();
    assert_eq!(v.reason, Some(FeasibilityReason::CapacityExceededNewDate));
    assert_eq!(v.daily_limit, Some(10));
    assert_eq!(v.current_total, Some(6));

    let req = FeasibilityRequest { party_size: Some(4), ..req };
    let v = engine.date_feasibility_on(&req, today()).await.unwrap();
    assert!(v.feasible);
}

// ── Eligibility ──────────────────────────────────────────────

#[tokio::test]
async fn same_day_reservation_is_locked() {
    let engine = new_engine("scenario_c.wal");
    let b = booking(today(), "21:00", 2);
    engine.record_booking(b.clone()).await.unwrap();

    let v = engine
        .modification_eligibility_at(b.id, at(today(), 10, 0))
        .await
        .unwrap();
    assert!(!v.modifiable);
    assert_eq!(v.reason, Some(IneligibleReason::SameDay));
}

#[tokio::test]
async fn third_modification_exhausts_the_budget() {
    let engine = new_engine("scenario_d.wal");
    let b = booking(saturday(), "14:00", 2);
    engine.record_booking(b.clone()).await.unwrap();
    let now = at(today(), 12, 0);

    for (old, new) in [("2", "3"), ("3", "4")] {
        engine
            .append_modification(b.id, "party_size".into(), old.into(), new.into())
            .await
            .unwrap();
    }
    let v = engine.modification_eligibility_at(b.id, now).await.unwrap();
    assert!(v.modifiable);
    assert_eq!(v.modifications_remaining, Some(1));
    assert_eq!(v.hours_until_reservation, Some(5 * 24 + 2));

    engine
        .append_modification(b.id, "time".into(), "14:00".into(), "14:30".into())
        .await
        .unwrap();
    let v = engine.modification_eligibility_at(b.id, now).await.unwrap();
    assert!(!v.modifiable);
    assert_eq!(v.reason, Some(IneligibleReason::MaxModifications));
    assert_eq!(v.modifications_remaining, Some(0));
}

#[tokio::test]
async fn cancelled_booking_cannot_change() {
    let engine = new_engine("eligibility_cancelled.wal");
    let b = booking(saturday(), "14:00", 2);
    engine.record_booking(b.clone()).await.unwrap();
    engine.cancel_booking(b.id).await.unwrap();

    let v = engine
        .modification_eligibility_at(b.id, at(today(), 12, 0))
        .await
        .unwrap();
    assert_eq!(v.reason, Some(IneligibleReason::Cancelled));
    assert!(matches!(
        engine.modification_eligibility_at(Ulid::new(), at(today(), 12, 0)).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn party_of_nine_is_refused_outright() {
    let engine = new_engine("scenario_e.wal");
    let b = booking(saturday(), "14:00", 4);
    engine.record_booking(b.clone()).await.unwrap();
    engine.set_daily_limit(saturday(), Ceiling::Modification, 10_000).await.unwrap();

    let v = engine.party_size_change(saturday(), 4, 9, b.id).await.unwrap();
    assert!(!v.accepted);
    assert_eq!(v.reason, Some(PartySizeRejection::PartyTooLarge));
    assert_eq!(v.people_difference, 5);

    let v = engine.party_size_change(saturday(), 4, 8, b.id).await.unwrap();
    assert!(v.accepted);
    assert_eq!(v.current_total, Some(0));
    assert_eq!(v.spots_remaining, Some(10_000 - 8));
}

// ── Calendar views ───────────────────────────────────────────

#[tokio::test]
async fn window_from_a_monday() {
    let engine = new_engine("window_monday.wal");
    engine.set_daily_limit(saturday(), Ceiling::Booking, 10).await.unwrap();
    engine.record_booking(booking(saturday(), "14:00", 10)).await.unwrap();
    engine.record_booking(booking(today() + chrono::Duration::days(4), "14:00", 9)).await.unwrap();

    let window = engine.booking_window_on(today(), None).await.unwrap();
    assert_eq!(window.days.len(), 36);
    assert_eq!(window.summary.total_days, 35);
    // Mon/Tue/Wed across five weeks, plus Monday 23 November.
    assert_eq!(window.summary.closed_days, 16);
    assert_eq!(window.summary.unavailable_days, 17);
    assert_eq!(window.summary.available_days, 19);

    let sat = window.days.iter().find(|d| d.date == saturday()).unwrap();
    assert_eq!(sat.reason, Some(DayUnavailable::FullyBooked));
    assert_eq!(sat.free_seats, 0);

    let fri = &window.days[4];
    assert!(fri.available);
    assert_eq!(fri.free_seats, 36);
    assert_eq!(fri.occupancy_percentage, Some(20.0));
}

#[tokio::test]
async fn month_grid_is_served_from_cache_until_expiry() {
    let engine = new_engine("grid_cache.wal");
    let first = engine.month_grid(2026, 10).await.unwrap();
    engine.set_daily_limit(saturday(), Ceiling::Booking, 5).await.unwrap();
    let second = engine.month_grid(2026, 10).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.days[23].limit, 45);
    assert!(matches!(engine.month_grid(2026, 13).await, Err(EngineError::InvalidValue(_))));
}

#[tokio::test]
async fn grid_surfaces_overbooking() {
    let engine = new_engine("grid_overbooking.wal");
    engine.set_daily_limit(saturday(), Ceiling::Booking, 5).await.unwrap();
    engine.record_booking(booking(saturday(), "14:00", 8)).await.unwrap();

    let grid = engine.month_grid(2026, 10).await.unwrap();
    let day = &grid.days[23];
    assert_eq!(day.booking_count, 1);
    assert_eq!(day.free_seats, -3);
    assert!(day.is_open);
    assert!(!grid.days[19].is_open, "Tuesday 20th defaults to closed");
}
