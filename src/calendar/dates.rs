use chrono::{Days, NaiveDate};

pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";
pub const MAX_SHIFT_DAYS: u32 = 3650;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "forward" | "+1" | "1" => Some(Self::Forward),
            "backward" | "-1" => Some(Self::Backward),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
        }
    }
}

/// `date + direction * count` in literal calendar days. `None` only when the
/// result falls outside the representable calendar.
pub fn shift_date(date: NaiveDate, direction: Direction, count: u32) -> Option<NaiveDate> {
    let days = Days::new(u64::from(count));
    match direction {
        Direction::Forward => date.checked_add_days(days),
        Direction::Backward => date.checked_sub_days(days),
    }
}

pub fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    // chrono accepts unpadded fields; the stored form is always zero-padded.
    if trimmed.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, ISO_DATE_FORMAT).ok()
}

pub fn format_iso_date(date: NaiveDate) -> String {
    date.format(ISO_DATE_FORMAT).to_string()
}

/// Day counts from the UI are never rejected: anything below one becomes one.
/// Larger counts pass through unchanged; `shift_date` reports the ones that
/// leave the calendar range.
pub fn clamp_count(raw: Option<i64>) -> u32 {
    match raw {
        Some(n) if n >= 1 => u32::try_from(n).unwrap_or(u32::MAX),
        _ => 1,
    }
}
