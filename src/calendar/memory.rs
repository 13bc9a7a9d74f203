use anyhow::bail;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet};

use super::entry::{Entry, Scope};
use super::key;
use super::store::{CategoryFilter, EntryQuery, EntryStore, WriteBatch};

/// Map-backed store for exercising the rescheduler without SQLite.
#[derive(Default)]
pub struct MemoryStore {
    entries: RefCell<BTreeMap<String, Entry>>,
    fail_commits: Cell<bool>,
}

impl MemoryStore {
    pub fn with_entries(entries: impl IntoIterator<Item = Entry>) -> Self {
        let store = Self::default();
        for e in entries {
            store.entries.borrow_mut().insert(e.key.clone(), e);
        }
        store
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.set(fail);
    }

    pub fn snapshot(&self) -> BTreeMap<String, Entry> {
        self.entries.borrow().clone()
    }
}

impl EntryStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Entry>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn query(&self, query: &EntryQuery) -> anyhow::Result<Vec<Entry>> {
        let mut out: Vec<Entry> = self
            .entries
            .borrow()
            .values()
            .filter(|e| e.in_scope(&query.scope))
            .filter(|e| match &query.category {
                CategoryFilter::Any => true,
                CategoryFilter::Events => e.category.is_none(),
                CategoryFilter::Period(id) => e.category.as_deref() == Some(id.as_str()),
            })
            .filter(|e| query.from.map_or(true, |d| e.date >= d))
            .filter(|e| query.to.map_or(true, |d| e.date <= d))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| key::compare(&a.key, &b.key)));
        Ok(out)
    }

    fn keys_in_scope(&self, scope: &Scope) -> anyhow::Result<HashSet<String>> {
        Ok(self
            .entries
            .borrow()
            .values()
            .filter(|e| e.in_scope(scope))
            .map(|e| e.key.clone())
            .collect())
    }

    fn insert(&self, entry: &Entry) -> anyhow::Result<()> {
        let mut entries = self.entries.borrow_mut();
        if entries.contains_key(&entry.key) {
            bail!("duplicate key {}", entry.key);
        }
        entries.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    fn update(&self, entry: &Entry) -> anyhow::Result<bool> {
        let mut entries = self.entries.borrow_mut();
        match entries.get_mut(&entry.key) {
            Some(slot) => {
                *slot = entry.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.entries.borrow_mut().remove(key).is_some())
    }

    fn commit_batch(&self, batch: &WriteBatch) -> anyhow::Result<()> {
        if self.fail_commits.get() {
            bail!("store unreachable");
        }
        let mut staged = self.entries.borrow().clone();
        for e in &batch.creates {
            if staged.contains_key(&e.key) {
                bail!("duplicate key {}", e.key);
            }
            staged.insert(e.key.clone(), e.clone());
        }
        for key in &batch.deletes {
            if staged.remove(key).is_none() {
                bail!("missing key {}", key);
            }
        }
        *self.entries.borrow_mut() = staged;
        Ok(())
    }
}
