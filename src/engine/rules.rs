use chrono::{Datelike, NaiveDate, Weekday};

use crate::limits::{BLACKOUT_DATES, BOOKING_HORIZON_DAYS};

/// Fixed year-end dates closed to bookings regardless of configuration.
pub fn is_blackout(date: NaiveDate) -> bool {
    BLACKOUT_DATES.contains(&(date.month(), date.day()))
}

/// Monday through Wednesday are closed unless explicitly opened.
pub fn is_default_closed_weekday(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Mon | Weekday::Tue | Weekday::Wed)
}

/// An explicit override always wins; otherwise the weekday rule applies.
pub fn is_date_closed(date: NaiveDate, open_override: Option<bool>) -> bool {
    match open_override {
        Some(is_open) => !is_open,
        None => is_default_closed_weekday(date),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizon {
    pub too_far: bool,
    pub days_until: i64,
}

/// Whether `date` lies beyond today + 35. `days_until` is the absolute
/// whole-day distance, so past dates report a positive count too.
pub fn horizon(date: NaiveDate, today: NaiveDate) -> Horizon {
    let delta = (date - today).num_days();
    Horizon {
        too_far: delta > BOOKING_HORIZON_DAYS,
        days_until: delta.abs(),
    }
}

pub fn weekday_name(date: NaiveDate) -> &'static str {
    match date.weekday() {
        Weekday::Mon => "Lunes",
        Weekday::Tue => "Martes",
        Weekday::Wed => "Miércoles",
        Weekday::Thu => "Jueves",
        Weekday::Fri => "Viernes",
        Weekday::Sat => "Sábado",
        Weekday::Sun => "Domingo",
    }
}
