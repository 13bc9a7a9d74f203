use anyhow::{bail, Context};
use chrono::NaiveDate;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashSet;

use super::entry::{Attachment, Entry, History, Payload, Scope};
use super::key;

/// Which categories a range query returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryFilter {
    Any,
    /// Only entries without a category (calendar events).
    Events,
    Period(String),
}

#[derive(Debug, Clone)]
pub struct EntryQuery {
    pub scope: Scope,
    pub category: CategoryFilter,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl EntryQuery {
    pub fn scope(scope: Scope) -> Self {
        Self {
            scope,
            category: CategoryFilter::Any,
            from: None,
            to: None,
        }
    }
}

/// Creates and deletes applied together or not at all.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub creates: Vec<Entry>,
    pub deletes: Vec<String>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.deletes.is_empty()
    }
}

/// Document store holding plan entries by composite key.
pub trait EntryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Entry>>;

    /// Entries matching `query`, ordered by date then key.
    fn query(&self, query: &EntryQuery) -> anyhow::Result<Vec<Entry>>;

    fn keys_in_scope(&self, scope: &Scope) -> anyhow::Result<HashSet<String>>;

    /// Fails if `entry.key` is already taken.
    fn insert(&self, entry: &Entry) -> anyhow::Result<()>;

    /// Rewrites the entry stored under `entry.key`. Returns false if absent.
    fn update(&self, entry: &Entry) -> anyhow::Result<bool>;

    fn delete(&self, key: &str) -> anyhow::Result<bool>;

    fn commit_batch(&self, batch: &WriteBatch) -> anyhow::Result<()>;
}

const ENTRY_COLUMNS: &str = "key, teacher_id, school_year_id, period_id, date, name, start_time, end_time, topic, objective, resources, assignments, homework, notes, standards, attachments_json, color_bg, color_text, created_at, updated_at, shifted_from_date";

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<Entry> {
    let attachments_raw: String = row.get(15)?;
    // A row whose attachments can't be read must not be rewritten without them.
    let attachments: Vec<Attachment> = serde_json::from_str(&attachments_raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(15, Type::Text, Box::new(e)))?;
    Ok(Entry {
        key: row.get(0)?,
        owner: row.get(1)?,
        context_year: row.get(2)?,
        category: row.get(3)?,
        date: row.get(4)?,
        payload: Payload {
            name: row.get(5)?,
            start_time: row.get(6)?,
            end_time: row.get(7)?,
            topic: row.get(8)?,
            objective: row.get(9)?,
            resources: row.get(10)?,
            assignments: row.get(11)?,
            homework: row.get(12)?,
            notes: row.get(13)?,
            standards: row.get(14)?,
            attachments,
            color_bg: row.get(16)?,
            color_text: row.get(17)?,
        },
        history: History {
            created_at: row.get(18)?,
            updated_at: row.get(19)?,
            shifted_from_date: row.get(20)?,
        },
    })
}

fn insert_entry(conn: &Connection, e: &Entry) -> anyhow::Result<()> {
    let attachments = serde_json::to_string(&e.payload.attachments)?;
    let p = &e.payload;
    conn.execute(
        &format!(
            "INSERT INTO plan_entries({}) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ENTRY_COLUMNS
        ),
        params![
            e.key,
            e.owner,
            e.context_year,
            e.category,
            e.date,
            p.name,
            p.start_time,
            p.end_time,
            p.topic,
            p.objective,
            p.resources,
            p.assignments,
            p.homework,
            p.notes,
            p.standards,
            attachments,
            p.color_bg,
            p.color_text,
            e.history.created_at,
            e.history.updated_at,
            e.history.shifted_from_date,
        ],
    )
    .with_context(|| format!("insert plan {}", e.key))?;
    Ok(())
}

impl EntryStore for SqliteStore<'_> {
    fn get(&self, key: &str) -> anyhow::Result<Option<Entry>> {
        let sql = format!("SELECT {} FROM plan_entries WHERE key = ?", ENTRY_COLUMNS);
        let entry = self
            .conn
            .query_row(&sql, [key], entry_from_row)
            .optional()
            .with_context(|| format!("read plan {}", key))?;
        Ok(entry)
    }

    fn query(&self, query: &EntryQuery) -> anyhow::Result<Vec<Entry>> {
        let mut where_clause = String::from("teacher_id = ? AND school_year_id = ?");
        let mut values: Vec<Value> = vec![
            Value::Text(query.scope.owner.clone()),
            Value::Text(query.scope.context_year.clone()),
        ];
        match &query.category {
            CategoryFilter::Any => {}
            CategoryFilter::Events => where_clause.push_str(" AND period_id IS NULL"),
            CategoryFilter::Period(id) => {
                where_clause.push_str(" AND period_id = ?");
                values.push(Value::Text(id.clone()));
            }
        }
        if let Some(from) = query.from {
            where_clause.push_str(" AND date >= ?");
            values.push(Value::Text(from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = query.to {
            where_clause.push_str(" AND date <= ?");
            values.push(Value::Text(to.format("%Y-%m-%d").to_string()));
        }
        let sql = format!(
            "SELECT {} FROM plan_entries WHERE {} ORDER BY date",
            ENTRY_COLUMNS, where_clause
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt
            .query_map(params_from_iter(values), entry_from_row)?
            .collect::<Result<Vec<_>, _>>()
            .context("query plans")?;
        // Copy suffixes sort numerically, which SQL text order can't do.
        rows.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| key::compare(&a.key, &b.key)));
        Ok(rows)
    }

    fn keys_in_scope(&self, scope: &Scope) -> anyhow::Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM plan_entries WHERE teacher_id = ? AND school_year_id = ?")?;
        let keys = stmt
            .query_map(params![scope.owner, scope.context_year], |r| r.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()
            .context("list plan keys")?;
        Ok(keys)
    }

    fn insert(&self, entry: &Entry) -> anyhow::Result<()> {
        insert_entry(self.conn, entry)
    }

    fn update(&self, entry: &Entry) -> anyhow::Result<bool> {
        let attachments = serde_json::to_string(&entry.payload.attachments)?;
        let p = &entry.payload;
        let changed = self
            .conn
            .execute(
                "UPDATE plan_entries SET
                    name = ?, start_time = ?, end_time = ?, topic = ?, objective = ?,
                    resources = ?, assignments = ?, homework = ?, notes = ?, standards = ?,
                    attachments_json = ?, color_bg = ?, color_text = ?,
                    updated_at = ?, shifted_from_date = ?
                 WHERE key = ?",
                params![
                    p.name,
                    p.start_time,
                    p.end_time,
                    p.topic,
                    p.objective,
                    p.resources,
                    p.assignments,
                    p.homework,
                    p.notes,
                    p.standards,
                    attachments,
                    p.color_bg,
                    p.color_text,
                    entry.history.updated_at,
                    entry.history.shifted_from_date,
                    entry.key,
                ],
            )
            .with_context(|| format!("update plan {}", entry.key))?;
        Ok(changed > 0)
    }

    fn delete(&self, key: &str) -> anyhow::Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM plan_entries WHERE key = ?", [key])
            .with_context(|| format!("delete plan {}", key))?;
        Ok(changed > 0)
    }

    fn commit_batch(&self, batch: &WriteBatch) -> anyhow::Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        // Dropping the transaction on an early return rolls it back.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("begin plan batch")?;
        for e in &batch.creates {
            insert_entry(&tx, e)?;
        }
        for key in &batch.deletes {
            let changed = tx
                .execute("DELETE FROM plan_entries WHERE key = ?", [key])
                .with_context(|| format!("delete plan {}", key))?;
            if changed == 0 {
                bail!("plan {} vanished before the batch committed", key);
            }
        }
        tx.commit().context("commit plan batch")?;
        Ok(())
    }
}
