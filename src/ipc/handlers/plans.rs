use crate::calendar::dates::{
    clamp_count, format_iso_date, parse_iso_date, shift_date, MAX_SHIFT_DAYS,
};
use crate::calendar::entry::{category_from_wire, Attachment, History, Payload};
use crate::calendar::key::{compose, dedupe, valid_component};
use crate::calendar::reschedule::{relocate, reschedule, ShiftRequest};
use crate::calendar::store::{CategoryFilter, EntryQuery};
use crate::calendar::week::{build_week, week_start};
use crate::calendar::{
    CalendarError, Direction, Entry, EntryCache, EntryStore, Scope, SqliteStore,
};
use crate::ipc::error::ok;
use crate::ipc::handlers::setup::{load_calendar_setup, CalendarSetup};
use crate::ipc::helpers::{
    get_required_str, now_ts, parse_opt_bool, parse_opt_string, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::{Days, NaiveDate, NaiveTime};
use rusqlite::Connection;
use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashSet;
use uuid::Uuid;

fn workspace(state: &mut AppState) -> Result<(&Connection, &mut EntryCache), HandlerErr> {
    let AppState { db, cache, .. } = state;
    let conn = db.as_ref().ok_or_else(HandlerErr::no_workspace)?;
    Ok((conn, cache))
}

fn calendar_setup(conn: &Connection) -> Result<CalendarSetup, HandlerErr> {
    load_calendar_setup(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn component(params: &JsonValue, key: &str) -> Result<String, HandlerErr> {
    let value = get_required_str(params, key)?;
    if !valid_component(&value) {
        return Err(CalendarError::InvalidComponent {
            field: key.to_string(),
        }
        .into());
    }
    Ok(value)
}

fn scope_params(params: &JsonValue) -> Result<Scope, HandlerErr> {
    Ok(Scope::new(
        component(params, "teacherId")?,
        component(params, "schoolYearId")?,
    ))
}

/// `null`, missing and `""` all mean "no period".
fn period_param(v: Option<&JsonValue>, field: &str) -> Result<Option<String>, HandlerErr> {
    let raw = match v {
        None => return Ok(None),
        Some(v) if v.is_null() => return Ok(None),
        Some(v) => v
            .as_str()
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be string or null", field)))?,
    };
    let category = category_from_wire(Some(raw));
    if let Some(c) = &category {
        if !valid_component(c) {
            return Err(CalendarError::InvalidComponent {
                field: field.to_string(),
            }
            .into());
        }
    }
    Ok(category)
}

fn date_param(v: Option<&JsonValue>, field: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = v
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", field)))?;
    parse_iso_date(raw).ok_or_else(|| {
        CalendarError::InvalidDate {
            field: field.to_string(),
            value: raw.to_string(),
        }
        .into()
    })
}

fn opt_date_param(v: Option<&JsonValue>, field: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => date_param(Some(v), field).map(Some),
    }
}

fn text_field(v: &JsonValue, field: &str) -> Result<Option<String>, HandlerErr> {
    parse_opt_string(Some(v)).map_err(|m| HandlerErr::bad_params(format!("{} {}", field, m)))
}

fn time_field(v: &JsonValue, field: &str) -> Result<Option<String>, HandlerErr> {
    let value = text_field(v, field)?;
    if let Some(s) = &value {
        if NaiveTime::parse_from_str(s, "%H:%M").is_err() {
            return Err(HandlerErr::bad_params(format!("{} must be HH:MM", field)));
        }
    }
    Ok(value)
}

fn parse_attachments(v: &JsonValue, field: &str) -> Result<Vec<Attachment>, HandlerErr> {
    if v.is_null() {
        return Ok(Vec::new());
    }
    let arr = v
        .as_array()
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an array", field)))?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let Some(obj) = item.as_object() else {
            return Err(HandlerErr::bad_params(format!(
                "{} items must be objects",
                field
            )));
        };
        let name = obj
            .get("name")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HandlerErr::bad_params(format!("{} items need a name", field)))?;
        let url = obj
            .get("url")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        let id = obj
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        out.push(Attachment { id, name, url });
    }
    Ok(out)
}

fn apply_payload_patch(
    payload: &mut Payload,
    patch: &Map<String, JsonValue>,
    prefix: &str,
    handled_elsewhere: &[&str],
) -> Result<(), HandlerErr> {
    for (k, v) in patch {
        let field = format!("{}.{}", prefix, k);
        match k.as_str() {
            "name" => payload.name = text_field(v, &field)?,
            "startTime" => payload.start_time = time_field(v, &field)?,
            "endTime" => payload.end_time = time_field(v, &field)?,
            "topic" => payload.topic = text_field(v, &field)?,
            "objective" => payload.objective = text_field(v, &field)?,
            "resources" => payload.resources = text_field(v, &field)?,
            "assignments" => payload.assignments = text_field(v, &field)?,
            "homework" => payload.homework = text_field(v, &field)?,
            "notes" => payload.notes = text_field(v, &field)?,
            "standards" => payload.standards = text_field(v, &field)?,
            "attachments" => payload.attachments = parse_attachments(v, &field)?,
            "colorBg" => payload.color_bg = text_field(v, &field)?,
            "colorText" => payload.color_text = text_field(v, &field)?,
            other if handled_elsewhere.contains(&other) => {}
            _ => {
                return Err(HandlerErr::bad_params(format!(
                    "unknown {} field: {}",
                    prefix, k
                )))
            }
        }
    }
    Ok(())
}

fn taken_keys(
    store: &dyn EntryStore,
    cache: &EntryCache,
    scope: &Scope,
) -> Result<HashSet<String>, HandlerErr> {
    let mut taken = store
        .keys_in_scope(scope)
        .map_err(CalendarError::StoreRead)?;
    taken.extend(cache.keys().cloned());
    Ok(taken)
}

fn load_entry(store: &dyn EntryStore, key: &str) -> Result<Entry, HandlerErr> {
    store
        .get(key)
        .map_err(CalendarError::StoreRead)?
        .ok_or_else(|| {
            CalendarError::NotFound {
                key: key.to_string(),
            }
            .into()
        })
}

fn plans_list(state: &mut AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let (conn, cache) = workspace(state)?;
    let scope = scope_params(params)?;
    let category = match params.get("periodId") {
        None => CategoryFilter::Any,
        Some(v) if v.is_null() => CategoryFilter::Any,
        Some(v) => match period_param(Some(v), "periodId")? {
            None => CategoryFilter::Events,
            Some(p) => CategoryFilter::Period(p),
        },
    };
    let from = opt_date_param(params.get("from"), "from")?;
    let to = opt_date_param(params.get("to"), "to")?;
    if let (Some(f), Some(t)) = (from, to) {
        if f > t {
            return Err(HandlerErr::bad_params("from must not be after to"));
        }
    }
    let whole_scope = category == CategoryFilter::Any && from.is_none() && to.is_none();

    let store = SqliteStore::new(conn);
    let plans = store
        .query(&EntryQuery {
            scope: scope.clone(),
            category,
            from,
            to,
        })
        .map_err(CalendarError::StoreRead)?;
    if whole_scope {
        cache.hydrate(&scope, plans.clone());
    } else {
        for p in &plans {
            cache.upsert(p.clone());
        }
    }
    Ok(json!({ "plans": plans }))
}

fn plans_refresh(state: &mut AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let (conn, cache) = workspace(state)?;
    let scope = scope_params(params)?;
    let plans = SqliteStore::new(conn)
        .query(&EntryQuery::scope(scope.clone()))
        .map_err(CalendarError::StoreRead)?;
    let count = plans.len();
    cache.hydrate(&scope, plans);
    tracing::debug!(teacher = %scope.owner, year = %scope.context_year, count, cached = cache.len(), "plans refreshed");
    Ok(json!({ "count": count }))
}

fn plans_open(state: &mut AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let (conn, cache) = workspace(state)?;
    let key = get_required_str(params, "key")?;
    let plan = load_entry(&SqliteStore::new(conn), &key)?;
    cache.upsert(plan.clone());
    Ok(json!({ "plan": plan }))
}

fn plans_create(state: &mut AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let (conn, cache) = workspace(state)?;
    let scope = scope_params(params)?;
    let category = period_param(params.get("periodId"), "periodId")?;
    let date = date_param(params.get("date"), "date")?;
    let mut payload = Payload::default();
    if let Some(input) = params.get("input").filter(|v| !v.is_null()) {
        let obj = input
            .as_object()
            .ok_or_else(|| HandlerErr::bad_params("input must be an object"))?;
        apply_payload_patch(&mut payload, obj, "input", &[])?;
    }

    let store = SqliteStore::new(conn);
    let taken = taken_keys(&store, cache, &scope)?;
    let key = dedupe(
        &compose(&scope.owner, &scope.context_year, category.as_deref(), date),
        &taken,
    );
    let ts = now_ts();
    let entry = Entry {
        key,
        owner: scope.owner,
        context_year: scope.context_year,
        category,
        date,
        payload,
        history: History {
            created_at: ts.clone(),
            updated_at: ts,
            shifted_from_date: None,
        },
    };
    store
        .insert(&entry)
        .map_err(|e| HandlerErr::new("db_insert_failed", format!("{e:#}")))?;
    cache.upsert(entry.clone());
    Ok(json!({ "key": entry.key, "plan": entry }))
}

fn plans_update(state: &mut AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let (conn, cache) = workspace(state)?;
    let key = get_required_str(params, "key")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };

    let store = SqliteStore::new(conn);
    let original = load_entry(&store, &key)?;
    let mut updated = original.clone();
    apply_payload_patch(&mut updated.payload, patch, "patch", &["date", "periodId"])?;
    if let Some(v) = patch.get("date") {
        updated.date = date_param(Some(v), "patch.date")?;
    }
    if patch.contains_key("periodId") {
        updated.category = period_param(patch.get("periodId"), "patch.periodId")?;
    }

    let now = now_ts();
    // The key encodes date and period, so changing either is a move.
    let saved = if updated.date != original.date || updated.category != original.category {
        relocate(&store, cache, &original, updated, &now)?
    } else {
        updated.history.updated_at = now;
        let found = store
            .update(&updated)
            .map_err(|e| HandlerErr::new("db_update_failed", format!("{e:#}")))?;
        if !found {
            return Err(CalendarError::NotFound { key }.into());
        }
        cache.upsert(updated.clone());
        updated
    };
    Ok(json!({ "key": saved.key, "plan": saved }))
}

fn plans_delete(state: &mut AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let (conn, cache) = workspace(state)?;
    let key = get_required_str(params, "key")?;
    let deleted = SqliteStore::new(conn)
        .delete(&key)
        .map_err(|e| HandlerErr::new("db_delete_failed", format!("{e:#}")))?;
    cache.remove(&key);
    if !deleted {
        return Err(CalendarError::NotFound { key }.into());
    }
    tracing::info!(%key, "plan deleted");
    Ok(json!({ "ok": true }))
}

fn plans_duplicate(state: &mut AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let (conn, cache) = workspace(state)?;
    let key = get_required_str(params, "key")?;
    let explicit_date = opt_date_param(params.get("date"), "date")?;
    let max = i64::from(MAX_SHIFT_DAYS);
    let day_offset = match params.get("dayOffset") {
        None => 0,
        Some(v) if v.is_null() => 0,
        Some(v) => v
            .as_i64()
            .filter(|n| (-max..=max).contains(n))
            .ok_or_else(|| {
                HandlerErr::bad_params(format!("dayOffset must be in {}..={}", -max, max))
            })?,
    };
    if explicit_date.is_some() && day_offset != 0 {
        return Err(HandlerErr::bad_params("pass either date or dayOffset, not both"));
    }

    let store = SqliteStore::new(conn);
    let source = load_entry(&store, &key)?;
    let target = match explicit_date {
        Some(d) => d,
        None if day_offset == 0 => source.date,
        None => {
            let direction = if day_offset < 0 {
                Direction::Backward
            } else {
                Direction::Forward
            };
            let count = day_offset.unsigned_abs() as u32;
            shift_date(source.date, direction, count).ok_or_else(|| {
                CalendarError::DateOutOfRange {
                    date: format_iso_date(source.date),
                    count,
                }
            })?
        }
    };

    let taken = taken_keys(&store, cache, &source.scope())?;
    let ts = now_ts();
    let copy = Entry {
        key: dedupe(
            &compose(
                &source.owner,
                &source.context_year,
                source.category.as_deref(),
                target,
            ),
            &taken,
        ),
        date: target,
        history: History {
            created_at: ts.clone(),
            updated_at: ts,
            shifted_from_date: None,
        },
        ..source
    };
    store
        .insert(&copy)
        .map_err(|e| HandlerErr::new("db_insert_failed", format!("{e:#}")))?;
    cache.upsert(copy.clone());
    Ok(json!({ "key": copy.key, "plan": copy }))
}

fn count_param(v: Option<&JsonValue>, default: u32) -> u32 {
    match v {
        None => default,
        Some(v) if v.is_null() => default,
        Some(v) => clamp_count(
            v.as_i64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse::<i64>().ok())),
        ),
    }
}

fn plans_shift(state: &mut AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let (conn, cache) = workspace(state)?;
    let key = get_required_str(params, "key")?;
    let direction_raw = get_required_str(params, "direction")?;
    let Some(direction) = Direction::parse(&direction_raw) else {
        return Err(HandlerErr::bad_params(
            "direction must be one of: forward, backward",
        ));
    };
    let setup = calendar_setup(conn)?;
    let count = count_param(params.get("count"), setup.default_shift_days);
    let cascade = parse_opt_bool(params.get("cascade"))
        .map_err(|m| HandlerErr::bad_params(format!("cascade {}", m)))?
        .unwrap_or(setup.cascade_by_default);

    let store = SqliteStore::new(conn);
    let outcome = reschedule(
        &store,
        cache,
        ShiftRequest {
            anchor_key: &key,
            direction,
            count,
            cascade,
        },
        &now_ts(),
    )?;
    let key_changes: Vec<JsonValue> = outcome
        .key_changes
        .iter()
        .map(|c| json!({ "from": c.from, "to": c.to }))
        .collect();
    Ok(json!({
        "moved": outcome.moved.len(),
        "plans": outcome.moved,
        "keyChanges": key_changes,
        "message": outcome.message,
        "direction": direction.as_str(),
        "count": count,
        "cascade": cascade
    }))
}

fn plans_week(state: &mut AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let (conn, cache) = workspace(state)?;
    let scope = scope_params(params)?;
    let date = date_param(params.get("date"), "date")?;
    let setup = calendar_setup(conn)?;

    let start = week_start(date);
    let end = start.checked_add_days(Days::new(6)).unwrap_or(start);
    let plans = SqliteStore::new(conn)
        .query(&EntryQuery {
            scope,
            category: CategoryFilter::Any,
            from: Some(start),
            to: Some(end),
        })
        .map_err(CalendarError::StoreRead)?;
    for p in &plans {
        cache.upsert(p.clone());
    }
    let days: Vec<JsonValue> = build_week(&plans, start, setup.show_weekends)
        .into_iter()
        .map(|d| {
            json!({
                "date": format_iso_date(d.date),
                "weekday": d.weekday,
                "plans": d.plans
            })
        })
        .collect();
    Ok(json!({ "weekStart": format_iso_date(start), "days": days }))
}

fn run(
    state: &mut AppState,
    req: &Request,
    handler: fn(&mut AppState, &JsonValue) -> Result<JsonValue, HandlerErr>,
) -> JsonValue {
    match handler(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => {
            tracing::debug!(id = %req.id, method = %req.method, code = error.code, message = %error.message, "request failed");
            error.response(&req.id)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    let handler: fn(&mut AppState, &JsonValue) -> Result<JsonValue, HandlerErr> =
        match req.method.as_str() {
            "plans.list" => plans_list,
            "plans.refresh" => plans_refresh,
            "plans.open" => plans_open,
            "plans.create" => plans_create,
            "plans.update" => plans_update,
            "plans.delete" => plans_delete,
            "plans.duplicate" => plans_duplicate,
            "plans.shift" => plans_shift,
            "plans.week" => plans_week,
            _ => return None,
        };
    Some(run(state, req, handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_param_clamps_and_defaults() {
        assert_eq!(count_param(None, 3), 3);
        assert_eq!(count_param(Some(&JsonValue::Null), 3), 3);
        assert_eq!(count_param(Some(&json!(0)), 3), 1);
        assert_eq!(count_param(Some(&json!(-2)), 3), 1);
        assert_eq!(count_param(Some(&json!("4")), 3), 4);
        assert_eq!(count_param(Some(&json!("abc")), 3), 1);
        assert_eq!(count_param(Some(&json!(2.5)), 3), 1);
        assert_eq!(count_param(Some(&json!(5000)), 1), 5000);
    }

    #[test]
    fn period_param_treats_blank_as_event() {
        assert_eq!(period_param(Some(&json!("")), "periodId").ok(), Some(None));
        assert_eq!(period_param(Some(&JsonValue::Null), "periodId").ok(), Some(None));
        assert_eq!(
            period_param(Some(&json!("p1")), "periodId").ok(),
            Some(Some("p1".to_string()))
        );
        assert!(period_param(Some(&json!("p__1")), "periodId").is_err());
        assert!(period_param(Some(&json!(7)), "periodId").is_err());
    }

    #[test]
    fn payload_patch_validates_fields() {
        let mut payload = Payload::default();
        let patch = json!({
            "name": "  Fractions ",
            "startTime": "09:15",
            "notes": "",
            "attachments": [{ "name": "sheet.pdf", "url": "https://files.example/sheet.pdf" }]
        });
        apply_payload_patch(&mut payload, patch.as_object().expect("object"), "input", &[])
            .ok()
            .expect("valid patch");
        assert_eq!(payload.name.as_deref(), Some("Fractions"));
        assert_eq!(payload.start_time.as_deref(), Some("09:15"));
        assert_eq!(payload.notes, None);
        assert_eq!(payload.attachments.len(), 1);
        assert!(!payload.attachments[0].id.is_empty());

        let bad_time = json!({ "endTime": "9am" });
        assert!(apply_payload_patch(&mut payload, bad_time.as_object().expect("object"), "input", &[]).is_err());
        let unknown = json!({ "colour": "red" });
        assert!(apply_payload_patch(&mut payload, unknown.as_object().expect("object"), "input", &[]).is_err());
        let skipped = json!({ "date": "2024-03-01" });
        assert!(apply_payload_patch(&mut payload, skipped.as_object().expect("object"), "patch", &["date"]).is_ok());
    }
}
