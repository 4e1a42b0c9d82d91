use chrono::{Datelike, Duration, NaiveDate};

/// One Gregorian month, with Monday-based weekday math for demand rows and
/// rule weeks.
#[derive(Clone, Copy, Debug)]
pub struct MonthCalendar {
    pub year: i32,
    pub month: u32,
    first: NaiveDate,
    days: u8,
    first_weekday: u8,
}

impl MonthCalendar {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)?
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)?
        };
        let days = next.signed_duration_since(first).num_days() as u8;
        Some(Self {
            year,
            month,
            first,
            days,
            first_weekday: first.weekday().num_days_from_monday() as u8,
        })
    }

    pub fn days_in_month(&self) -> u8 {
        self.days
    }

    /// Weekday of a 0-based day index, 0 = Monday.
    pub fn weekday(&self, day: usize) -> usize {
        (self.first_weekday as usize + day) % 7
    }

    pub fn date(&self, day: usize) -> NaiveDate {
        self.first + Duration::days(day as i64)
    }

    /// Inclusive 0-based day bounds of the rule week containing `day`, for a
    /// week beginning on weekday `week_start` (0 = Monday). Weeks clipped by
    /// the month edges keep their natural end.
    pub fn week_bounds(&self, day: usize, week_start: u8) -> (usize, usize) {
        let into_week = (self.weekday(day) + 7 - week_start as usize % 7) % 7;
        let natural_start = day as isize - into_week as isize;
        let start = natural_start.max(0) as usize;
        let end = ((natural_start + 6).min(self.days as isize - 1)) as usize;
        (start, end)
    }
}
