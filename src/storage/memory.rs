use super::filter::{NodeFilter, NodeUpdate};
use super::node::Node;
use super::store::{apply_counter, database_missing, NodeStore};
use crate::error::DbResult;
use bql_core::CounterAction;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct Namespace {
    /// Insertion order is kept so unsorted queries are stable.
    nodes: Vec<Node>,
    counters: BTreeMap<String, i64>,
}

/// Node store kept entirely in memory; used by tests and `storage = "memory"`.
#[derive(Debug, Default)]
pub struct MemoryNodeStore {
    databases: RwLock<HashMap<String, Namespace>>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeStore for MemoryNodeStore {
    fn create_database(&self, db: &str) -> DbResult<()> {
        self.databases
            .write()
            .entry(db.to_string())
            .or_default();
        Ok(())
    }

    fn drop_database(&self, db: &str) -> DbResult<()> {
        self.databases
            .write()
            .remove(db)
            .map(|_| ())
            .ok_or_else(|| database_missing(db))
    }

    fn database_exists(&self, db: &str) -> DbResult<bool> {
        Ok(self.databases.read().contains_key(db))
    }

    fn list_databases(&self) -> DbResult<Vec<String>> {
        let mut names: Vec<String> = self.databases.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn clear_all(&self) -> DbResult<Vec<String>> {
        let mut databases = self.databases.write();
        let mut names: Vec<String> = databases.drain().map(|(name, _)| name).collect();
        names.sort();
        Ok(names)
    }

    fn find(&self, db: &str, filter: &NodeFilter) -> DbResult<Vec<Node>> {
        let databases = self.databases.read();
        let namespace = databases.get(db).ok_or_else(|| database_missing(db))?;
        let mut found = Vec::new();
        for node in &namespace.nodes {
            if filter.matches_node(node)? {
                found.push(node.clone());
            }
        }
        Ok(found)
    }

    fn insert(&self, db: &str, node: Node) -> DbResult<()> {
        let mut databases = self.databases.write();
        let namespace = databases.get_mut(db).ok_or_else(|| database_missing(db))?;
        namespace.nodes.push(node);
        Ok(())
    }

    fn update_many(&self, db: &str, filter: &NodeFilter, update: &NodeUpdate) -> DbResult<usize> {
        let mut databases = self.databases.write();
        let namespace = databases.get_mut(db).ok_or_else(|| database_missing(db))?;
        let mut updated = 0;
        for node in namespace.nodes.iter_mut() {
            if filter.matches_node(node)? {
                update.apply(node)?;
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn delete_many(&self, db: &str, filter: &NodeFilter) -> DbResult<usize> {
        let mut databases = self.databases.write();
        let namespace = databases.get_mut(db).ok_or_else(|| database_missing(db))?;
        let mut kept = Vec::with_capacity(namespace.nodes.len());
        let mut removed = 0;
        for node in namespace.nodes.drain(..) {
            if filter.matches_node(&node)? {
                removed += 1;
            } else {
                kept.push(node);
            }
        }
        namespace.nodes = kept;
        Ok(removed)
    }

    fn counter_apply(
        &self,
        db: &str,
        name: &str,
        action: CounterAction,
        value: i64,
    ) -> DbResult<Option<i64>> {
        let mut databases = self.databases.write();
        let namespace = databases.get_mut(db).ok_or_else(|| database_missing(db))?;
        Ok(namespace.counters.get_mut(name).map(|current| {
            *current = apply_counter(*current, action, value);
            *current
        }))
    }

    fn counter_create(
        &self,
        db: &str,
        name: &str,
        action: CounterAction,
        value: i64,
    ) -> DbResult<i64> {
        let mut databases = self.databases.write();
        let namespace = databases.get_mut(db).ok_or_else(|| database_missing(db))?;
        let current = namespace
            .counters
            .entry(name.to_string())
            .and_modify(|current| *current = apply_counter(*current, action, value))
            .or_insert(value);
        Ok(*current)
    }

    fn counter_list(&self, db: &str, regex: &Regex) -> DbResult<Vec<(String, i64)>> {
        let databases = self.databases.read();
        let namespace = databases.get(db).ok_or_else(|| database_missing(db))?;
        Ok(namespace
            .counters
            .iter()
            .filter(|(name, _)| regex.is_match(name))
            .map(|(name, value)| (name.clone(), *value))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::filter::HeaderChange;
    use serde_json::{json, Map};

    fn seeded() -> MemoryNodeStore {
        let store = MemoryNodeStore::new();
        store.create_database("db").unwrap();
        store.insert("db", Node::root()).unwrap();
        store.insert("db", Node::directory("a", "/")).unwrap();
        let mut content = Map::new();
        content.insert("tag".to_string(), json!("x"));
        store.insert("db", Node::file("f1", "/a", content.clone())).unwrap();
        store.insert("db", Node::file("f2", "/a", content)).unwrap();
        store
    }

    #[test]
    fn test_missing_database() {
        let store = MemoryNodeStore::new();
        let err = store.find("nope", &NodeFilter::new()).unwrap_err();
        assert_eq!(err.to_string(), "database 'nope' doesn't exist");
        assert!(store.drop_database("nope").is_err());
    }

    #[test]
    fn test_find_update_delete() {
        let store = seeded();
        let files = NodeFilter::new().parent("/a").files_only();
        assert_eq!(store.count("db", &files).unwrap(), 2);

        let changed = store
            .update_many(
                "db",
                &files,
                &NodeUpdate::new().header(HeaderChange::Public(true)),
            )
            .unwrap();
        assert_eq!(changed, 2);
        let f1 = store
            .find_one("db", &NodeFilter::new().at_path("/a/f1"))
            .unwrap()
            .unwrap();
        assert!(f1.header.ispublic);

        assert_eq!(store.distinct("db", &files, "content.tag").unwrap(), vec![json!("x")]);
        assert_eq!(store.delete_many("db", &files).unwrap(), 2);
        assert_eq!(store.count("db", &NodeFilter::new()).unwrap(), 2);
    }

    #[test]
    fn test_counters() {
        let store = seeded();
        assert_eq!(store.counter_apply("db", "hits", CounterAction::Incr, 1).unwrap(), None);
        assert_eq!(store.counter_create("db", "hits", CounterAction::Incr, 5).unwrap(), 5);
        // A second create on an existing counter applies the action.
        assert_eq!(store.counter_create("db", "hits", CounterAction::Incr, 1).unwrap(), 6);
        assert_eq!(
            store.counter_apply("db", "hits", CounterAction::Decr, 2).unwrap(),
            Some(4)
        );
        assert_eq!(
            store.counter_apply("db", "hits", CounterAction::Reset, 9).unwrap(),
            Some(9)
        );
        let all = store.counter_list("db", &Regex::new("^h").unwrap()).unwrap();
        assert_eq!(all, vec![("hits".to_string(), 9)]);
    }

    #[test]
    fn test_clear_all() {
        let store = seeded();
        store.create_database("other").unwrap();
        assert_eq!(store.clear_all().unwrap(), vec!["db", "other"]);
        assert!(store.list_databases().unwrap().is_empty());
    }
}
