use std::collections::{BTreeMap, HashSet};

use super::entry::{Entry, Scope};

/// In-process working set of entries keyed by document key.
///
/// A scope is "hydrated" once it has been loaded from the store; until then
/// callers should load it before relying on `entries_in_scope`.
#[derive(Debug, Default)]
pub struct EntryCache {
    entries: BTreeMap<String, Entry>,
    hydrated: HashSet<Scope>,
}

impl EntryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_hydrated(&self, scope: &Scope) -> bool {
        self.hydrated.contains(scope)
    }

    /// Replaces everything cached for `scope` with `entries`.
    pub fn hydrate(&mut self, scope: &Scope, entries: Vec<Entry>) {
        self.entries.retain(|_, e| !e.in_scope(scope));
        for e in entries.into_iter().filter(|e| e.in_scope(scope)) {
            self.entries.insert(e.key.clone(), e);
        }
        self.hydrated.insert(scope.clone());
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn upsert(&mut self, entry: Entry) {
        self.entries.insert(entry.key.clone(), entry);
    }

    pub fn remove(&mut self, key: &str) -> Option<Entry> {
        self.entries.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn entries_in_scope<'a>(&'a self, scope: &'a Scope) -> impl Iterator<Item = &'a Entry> + 'a {
        self.entries.values().filter(move |e| e.in_scope(scope))
    }

    /// Swaps moved entries in: every `from` key is dropped before the new
    /// versions are inserted, so a chain of moves never loses an entry.
    pub fn apply_moves(&mut self, removed: &[String], created: &[Entry]) {
        for key in removed {
            self.entries.remove(key);
        }
        for e in created {
            self.entries.insert(e.key.clone(), e.clone());
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.hydrated.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::entry::{History, Payload};
    use chrono::NaiveDate;

    fn entry(key: &str, owner: &str, year: &str) -> Entry {
        Entry {
            key: key.to_string(),
            owner: owner.to_string(),
            context_year: year.to_string(),
            category: None,
            date: NaiveDate::from_ymd_opt(2024, 1, 8).expect("valid date"),
            payload: Payload::default(),
            history: History::default(),
        }
    }

    #[test]
    fn hydrate_replaces_only_its_scope() {
        let s1 = Scope::new("t1", "y1");
        let s2 = Scope::new("t1", "y2");
        let mut cache = EntryCache::new();
        cache.hydrate(&s1, vec![entry("a", "t1", "y1"), entry("b", "t1", "y1")]);
        cache.hydrate(&s2, vec![entry("c", "t1", "y2")]);
        assert_eq!(cache.len(), 3);

        cache.hydrate(&s1, vec![entry("d", "t1", "y1")]);
        let mut in_s1: Vec<&str> = cache.entries_in_scope(&s1).map(|e| e.key.as_str()).collect();
        in_s1.sort();
        assert_eq!(in_s1, vec!["d"]);
        assert!(cache.get("c").is_some());
        assert!(cache.is_hydrated(&s1) && cache.is_hydrated(&s2));
    }

    #[test]
    fn hydrate_ignores_entries_from_other_scopes() {
        let s1 = Scope::new("t1", "y1");
        let mut cache = EntryCache::new();
        cache.hydrate(&s1, vec![entry("a", "t1", "y1"), entry("x", "t9", "y1")]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn apply_moves_handles_chained_keys() {
        let mut cache = EntryCache::new();
        cache.upsert(entry("a", "t1", "y1"));
        cache.upsert(entry("b", "t1", "y1"));
        // a -> b and b -> c in one batch.
        cache.apply_moves(
            &["a".to_string(), "b".to_string()],
            &[entry("b", "t1", "y1"), entry("c", "t1", "y1")],
        );
        let keys: Vec<&String> = cache.keys().collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn clear_forgets_hydration() {
        let s1 = Scope::new("t1", "y1");
        let mut cache = EntryCache::new();
        cache.hydrate(&s1, vec![entry("a", "t1", "y1")]);
        cache.clear();
        assert!(!cache.is_hydrated(&s1));
        assert_eq!(cache.len(), 0);
    }
}
