use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::HashSet;

use super::dates::format_iso_date;

pub const KEY_SEPARATOR: &str = "__";
const COPY_MARKER: &str = "copy";

/// `{owner}__{contextYear}__{category}__{yyyy-MM-dd}`. A missing category
/// composes as the empty string and still takes part in collisions.
pub fn compose(owner: &str, context_year: &str, category: Option<&str>, date: NaiveDate) -> String {
    [
        owner,
        context_year,
        category.unwrap_or(""),
        format_iso_date(date).as_str(),
    ]
    .join(KEY_SEPARATOR)
}

/// Returns `base` if it is free, otherwise the first free `base__copyN` with N >= 2.
pub fn dedupe(base: &str, existing: &HashSet<String>) -> String {
    if !existing.contains(base) {
        return base.to_string();
    }
    let mut n: u32 = 2;
    loop {
        let candidate = format!("{}{}{}{}", base, KEY_SEPARATOR, COPY_MARKER, n);
        if !existing.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Splits `base__copyN` into `(base, N)`. Keys without a copy suffix rank as 1.
fn copy_rank(key: &str) -> (&str, u32) {
    let marker = format!("{}{}", KEY_SEPARATOR, COPY_MARKER);
    if let Some(idx) = key.rfind(&marker) {
        let digits = &key[idx + marker.len()..];
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = digits.parse::<u32>() {
                return (&key[..idx], n);
            }
        }
    }
    (key, 1)
}

/// Key order with copies after their base in numeric order, so `copy2`
/// sorts before `copy10`.
pub fn compare(a: &str, b: &str) -> Ordering {
    let (base_a, rank_a) = copy_rank(a);
    let (base_b, rank_b) = copy_rank(b);
    base_a
        .cmp(base_b)
        .then(rank_a.cmp(&rank_b))
        .then_with(|| a.cmp(b))
}

/// Key components must be non-empty and free of the separator.
pub fn valid_component(value: &str) -> bool {
    !value.is_empty() && !value.contains(KEY_SEPARATOR)
}
