use super::entry::Entry;
use super::key;

/// Entries a push on `anchor` should move, ascending by date.
///
/// Cascade only applies to category-bound plans: an event has no series, so
/// it always moves alone.
pub fn select_affected<'a, I>(entries: I, anchor: &Entry, cascade: bool) -> Vec<Entry>
where
    I: IntoIterator<Item = &'a Entry>,
{
    if !cascade || anchor.is_event() {
        return vec![anchor.clone()];
    }
    let category = anchor.category.as_deref();

    let mut affected: Vec<Entry> = entries
        .into_iter()
        .filter(|e| {
            e.owner == anchor.owner
                && e.context_year == anchor.context_year
                && e.category.as_deref() == category
                && e.date >= anchor.date
        })
        .cloned()
        .collect();
    if !affected.iter().any(|e| e.key == anchor.key) {
        affected.push(anchor.clone());
    }
    affected.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| key::compare(&a.key, &b.key)));
    affected
}
