use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "planner.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS plan_entries(
            key TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            school_year_id TEXT NOT NULL,
            period_id TEXT,
            date TEXT NOT NULL,
            name TEXT,
            start_time TEXT,
            end_time TEXT,
            topic TEXT,
            objective TEXT,
            resources TEXT,
            assignments TEXT,
            homework TEXT,
            notes TEXT,
            standards TEXT,
            attachments_json TEXT NOT NULL DEFAULT '[]',
            color_bg TEXT,
            color_text TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            shifted_from_date TEXT
        )",
        [],
    )?;
    // Older workspaces predate shift history.
    ensure_plan_entries_shifted_from(conn)?;
    // Category-less events were once stored with an empty period id.
    conn.execute(
        "UPDATE plan_entries SET period_id = NULL WHERE period_id = ''",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_plan_entries_scope
         ON plan_entries(teacher_id, school_year_id, period_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_plan_entries_scope_date
         ON plan_entries(teacher_id, school_year_id, date)",
        [],
    )?;
    Ok(())
}

fn ensure_plan_entries_shifted_from(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "plan_entries", "shifted_from_date")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE plan_entries ADD COLUMN shifted_from_date TEXT",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        // A corrupt value reads as unset rather than failing the caller.
        Some(text) => Ok(serde_json::from_str(&text).ok()),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settings_round_trip_and_overwrite() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("schema");
        assert_eq!(settings_get_json(&conn, "setup.calendar").expect("get"), None);
        settings_set_json(&conn, "setup.calendar", &json!({ "cascadeByDefault": true })).expect("set");
        settings_set_json(&conn, "setup.calendar", &json!({ "cascadeByDefault": false })).expect("set");
        assert_eq!(
            settings_get_json(&conn, "setup.calendar").expect("get"),
            Some(json!({ "cascadeByDefault": false }))
        );
    }

    #[test]
    fn schema_init_is_idempotent_and_migrates_old_tables() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute(
            "CREATE TABLE plan_entries(
                key TEXT PRIMARY KEY,
                teacher_id TEXT NOT NULL,
                school_year_id TEXT NOT NULL,
                period_id TEXT,
                date TEXT NOT NULL,
                name TEXT, start_time TEXT, end_time TEXT, topic TEXT, objective TEXT,
                resources TEXT, assignments TEXT, homework TEXT, notes TEXT, standards TEXT,
                attachments_json TEXT NOT NULL DEFAULT '[]',
                color_bg TEXT, color_text TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .expect("legacy table");
        conn.execute(
            "INSERT INTO plan_entries(key, teacher_id, school_year_id, period_id, date, created_at, updated_at)
             VALUES('t1__y1____2024-03-01', 't1', 'y1', '', '2024-03-01', '1', '1')",
            [],
        )
        .expect("legacy row");

        init_schema(&conn).expect("migrate");
        init_schema(&conn).expect("migrate again");
        assert!(table_has_column(&conn, "plan_entries", "shifted_from_date").expect("pragma"));
        let period: Option<String> = conn
            .query_row("SELECT period_id FROM plan_entries", [], |r| r.get(0))
            .expect("row");
        assert_eq!(period, None);
    }
}
