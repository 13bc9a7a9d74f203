use chrono::{Datelike, Days, NaiveDate};

use super::entry::Entry;
use super::key;

#[derive(Debug, Clone)]
pub struct WeekDay {
    pub date: NaiveDate,
    pub weekday: String,
    pub plans: Vec<Entry>,
}

/// Monday of the week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    let back = u64::from(date.weekday().num_days_from_monday());
    date.checked_sub_days(Days::new(back)).unwrap_or(date)
}

pub fn week_dates(start: NaiveDate, show_weekends: bool) -> Vec<NaiveDate> {
    let len = if show_weekends { 7 } else { 5 };
    start.iter_days().take(len).collect()
}

/// Grid order within a day: events, then periods, then start time.
fn grid_order(a: &Entry, b: &Entry) -> std::cmp::Ordering {
    a.category
        .cmp(&b.category)
        .then_with(|| a.payload.start_time.cmp(&b.payload.start_time))
        .then_with(|| key::compare(&a.key, &b.key))
}

pub fn build_week(entries: &[Entry], start: NaiveDate, show_weekends: bool) -> Vec<WeekDay> {
    week_dates(start, show_weekends)
        .into_iter()
        .map(|date| {
            let mut plans: Vec<Entry> = entries.iter().filter(|e| e.date == date).cloned().collect();
            plans.sort_by(grid_order);
            WeekDay {
                date,
                weekday: date.weekday().to_string(),
                plans,
            }
        })
        .collect()
}
