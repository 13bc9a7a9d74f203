use std::collections::HashSet;

use super::cache::EntryCache;
use super::cascade::select_affected;
use super::dates::{format_iso_date, shift_date, Direction};
use super::entry::{Entry, History, Scope};
use super::error::CalendarError;
use super::key::{compose, dedupe};
use super::store::{EntryQuery, EntryStore, WriteBatch};

#[derive(Debug, Clone, Copy)]
pub struct ShiftRequest<'a> {
    pub anchor_key: &'a str,
    pub direction: Direction,
    /// Already clamped to at least one day.
    pub count: u32,
    pub cascade: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChange {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone)]
pub struct ShiftOutcome {
    pub moved: Vec<Entry>,
    pub key_changes: Vec<KeyChange>,
    pub message: String,
}

impl ShiftOutcome {
    fn nothing_to_move() -> Self {
        Self {
            moved: Vec::new(),
            key_changes: Vec::new(),
            message: "nothing to move".to_string(),
        }
    }
}

pub fn confirmation_message(moved: usize, direction: Direction, count: u32) -> String {
    format!(
        "Moved {} {} {} by {} {}",
        moved,
        if moved == 1 { "plan" } else { "plans" },
        direction.as_str(),
        count,
        if count == 1 { "day" } else { "days" }
    )
}

/// Makes sure the anchor's scope is loaded into the working set.
pub fn ensure_hydrated(
    store: &dyn EntryStore,
    cache: &mut EntryCache,
    scope: &Scope,
) -> Result<(), CalendarError> {
    if cache.is_hydrated(scope) {
        return Ok(());
    }
    let entries = store
        .query(&EntryQuery::scope(scope.clone()))
        .map_err(CalendarError::StoreRead)?;
    cache.hydrate(scope, entries);
    Ok(())
}

/// Builds the create/delete batch for moving `affected`, in order, by the
/// requested offset. Old keys stay reserved while new keys are chosen.
pub fn stage_moves(
    affected: &[Entry],
    direction: Direction,
    count: u32,
    mut taken: HashSet<String>,
    now: &str,
) -> Result<WriteBatch, CalendarError> {
    let mut batch = WriteBatch::default();
    for e in affected {
        let new_date = shift_date(e.date, direction, count).ok_or_else(|| {
            CalendarError::DateOutOfRange {
                date: format_iso_date(e.date),
                count,
            }
        })?;
        let base = compose(&e.owner, &e.context_year, e.category.as_deref(), new_date);
        let new_key = dedupe(&base, &taken);
        taken.insert(new_key.clone());
        batch.creates.push(Entry {
            key: new_key,
            date: new_date,
            history: History {
                created_at: e.history.created_at.clone(),
                updated_at: now.to_string(),
                shifted_from_date: e.history.shifted_from_date.or(Some(e.date)),
            },
            ..e.clone()
        });
        batch.deletes.push(e.key.clone());
    }
    Ok(batch)
}

/// Pushes one entry, or its remaining same-period sequence, by `count` days.
///
/// The store applies the whole batch or nothing; the cache is only touched
/// after a successful commit.
pub fn reschedule(
    store: &dyn EntryStore,
    cache: &mut EntryCache,
    req: ShiftRequest<'_>,
    now: &str,
) -> Result<ShiftOutcome, CalendarError> {
    let anchor = match cache.get(req.anchor_key).cloned() {
        Some(e) => Some(e),
        None => store.get(req.anchor_key).map_err(CalendarError::StoreRead)?,
    };
    let Some(anchor) = anchor else {
        tracing::debug!(key = req.anchor_key, "shift anchor not found");
        return Ok(ShiftOutcome::nothing_to_move());
    };
    let scope = anchor.scope();
    ensure_hydrated(store, cache, &scope)?;

    let affected = select_affected(cache.entries_in_scope(&scope), &anchor, req.cascade);
    if affected.is_empty() {
        return Ok(ShiftOutcome::nothing_to_move());
    }

    let mut taken = store.keys_in_scope(&scope).map_err(CalendarError::StoreRead)?;
    taken.extend(cache.keys().cloned());
    let batch = stage_moves(&affected, req.direction, req.count, taken, now)?;

    if let Err(e) = store.commit_batch(&batch) {
        tracing::warn!(
            anchor = req.anchor_key,
            entries = batch.creates.len(),
            error = %format!("{e:#}"),
            "plan shift batch failed"
        );
        return Err(CalendarError::StoreWrite(e));
    }
    cache.apply_moves(&batch.deletes, &batch.creates);

    let key_changes: Vec<KeyChange> = batch
        .deletes
        .iter()
        .zip(batch.creates.iter())
        .map(|(from, to)| KeyChange {
            from: from.clone(),
            to: to.key.clone(),
        })
        .collect();
    let message = confirmation_message(batch.creates.len(), req.direction, req.count);
    tracing::info!(
        anchor = req.anchor_key,
        direction = req.direction.as_str(),
        count = req.count,
        cascade = req.cascade,
        moved = batch.creates.len(),
        "plans shifted"
    );
    Ok(ShiftOutcome {
        moved: batch.creates,
        key_changes,
        message,
    })
}

/// Rewrites `updated` under the key its date and period now call for and
/// deletes `original` in the same batch. Used for edits that change either.
pub fn relocate(
    store: &dyn EntryStore,
    cache: &mut EntryCache,
    original: &Entry,
    mut updated: Entry,
    now: &str,
) -> Result<Entry, CalendarError> {
    let mut taken = store
        .keys_in_scope(&original.scope())
        .map_err(CalendarError::StoreRead)?;
    taken.extend(cache.keys().cloned());
    let base = compose(
        &updated.owner,
        &updated.context_year,
        updated.category.as_deref(),
        updated.date,
    );
    updated.key = dedupe(&base, &taken);
    updated.history.updated_at = now.to_string();
    if updated.date != original.date {
        updated.history.shifted_from_date =
            original.history.shifted_from_date.or(Some(original.date));
    }

    let batch = WriteBatch {
        creates: vec![updated],
        deletes: vec![original.key.clone()],
    };
    store
        .commit_batch(&batch)
        .map_err(CalendarError::StoreWrite)?;
    cache.apply_moves(&batch.deletes, &batch.creates);
    let WriteBatch { mut creates, .. } = batch;
    creates.pop().ok_or_else(|| CalendarError::NotFound {
        key: original.key.clone(),
    })
}
