use crate::calendar::dates::MAX_SHIFT_DAYS;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Calendar,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "calendar" => Some(Self::Calendar),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Calendar => "setup.calendar",
        }
    }
}

/// Calendar preferences as the plan handlers consume them.
#[derive(Clone, Debug, PartialEq)]
pub struct CalendarSetup {
    pub default_shift_days: u32,
    pub cascade_by_default: bool,
    pub show_weekends: bool,
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Calendar => json!({
            "defaultShiftDays": 1,
            "cascadeByDefault": false,
            "showWeekends": false
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Calendar => match k.as_str() {
                "defaultShiftDays" => {
                    obj.insert(
                        k.clone(),
                        Value::from(parse_i64_range(v, k, 1, i64::from(MAX_SHIFT_DAYS))?),
                    );
                }
                "cascadeByDefault" | "showWeekends" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown calendar field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values should not block the calendar.
            if let Err(msg) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.key(), %msg, "ignoring malformed saved setup");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

pub fn load_calendar_setup(conn: &Connection) -> anyhow::Result<CalendarSetup> {
    let v = load_section(conn, SetupSection::Calendar)?;
    Ok(CalendarSetup {
        default_shift_days: v
            .get("defaultShiftDays")
            .and_then(|n| n.as_u64())
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(1),
        cascade_by_default: v
            .get("cascadeByDefault")
            .and_then(|b| b.as_bool())
            .unwrap_or(false),
        show_weekends: v
            .get("showWeekends")
            .and_then(|b| b.as_bool())
            .unwrap_or(false),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let calendar = match load_section(conn, SetupSection::Calendar) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "calendar": calendar }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn defaults_apply_when_nothing_saved() {
        let c = conn();
        assert_eq!(
            load_calendar_setup(&c).expect("load"),
            CalendarSetup {
                default_shift_days: 1,
                cascade_by_default: false,
                show_weekends: false,
            }
        );
    }

    #[test]
    fn saved_values_merge_over_defaults() {
        let c = conn();
        db::settings_set_json(&c, "setup.calendar", &json!({ "cascadeByDefault": true }))
            .expect("save");
        let setup = load_calendar_setup(&c).expect("load");
        assert!(setup.cascade_by_default);
        assert_eq!(setup.default_shift_days, 1);
    }

    #[test]
    fn malformed_saved_values_fall_back_to_defaults() {
        let c = conn();
        db::settings_set_json(&c, "setup.calendar", &json!({ "defaultShiftDays": 0 }))
            .expect("save");
        assert_eq!(load_calendar_setup(&c).expect("load").default_shift_days, 1);
    }

    #[test]
    fn patch_validation_rejects_unknown_and_out_of_range() {
        let mut current = default_section(SetupSection::Calendar);
        let patch = json!({ "defaultShiftDays": 9999 });
        assert!(merge_section_patch(
            SetupSection::Calendar,
            &mut current,
            patch.as_object().expect("object")
        )
        .is_err());
        let patch = json!({ "weekStartsOn": "sunday" });
        assert!(merge_section_patch(
            SetupSection::Calendar,
            &mut current,
            patch.as_object().expect("object")
        )
        .is_err());
    }
}
