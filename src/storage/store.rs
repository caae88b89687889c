use super::filter::{lookup, NodeFilter, NodeUpdate};
use super::node::Node;
use crate::error::{DbError, DbResult};
use bql_core::CounterAction;
use regex::Regex;
use serde_json::Value;

/// Backing collection of filesystem nodes and counters, one namespace per
/// database. Implementations must be safe to share between workers.
pub trait NodeStore: Send + Sync {
    fn create_database(&self, db: &str) -> DbResult<()>;
    fn drop_database(&self, db: &str) -> DbResult<()>;
    fn database_exists(&self, db: &str) -> DbResult<bool>;
    fn list_databases(&self) -> DbResult<Vec<String>>;
    /// Removes every database; returns the names that were dropped.
    fn clear_all(&self) -> DbResult<Vec<String>>;

    fn find(&self, db: &str, filter: &NodeFilter) -> DbResult<Vec<Node>>;
    fn insert(&self, db: &str, node: Node) -> DbResult<()>;
    /// Applies `update` to every match; returns the number of nodes changed.
    fn update_many(&self, db: &str, filter: &NodeFilter, update: &NodeUpdate) -> DbResult<usize>;
    fn delete_many(&self, db: &str, filter: &NodeFilter) -> DbResult<usize>;

    /// Atomic read-modify-write of an existing counter. `None` when the
    /// counter does not exist.
    fn counter_apply(
        &self,
        db: &str,
        name: &str,
        action: CounterAction,
        value: i64,
    ) -> DbResult<Option<i64>>;
    /// Creates the counter at `value`. When another writer created it in the
    /// meantime, `action` is applied to the stored value instead. Returns the
    /// resulting value.
    fn counter_create(
        &self,
        db: &str,
        name: &str,
        action: CounterAction,
        value: i64,
    ) -> DbResult<i64>;
    fn counter_list(&self, db: &str, regex: &Regex) -> DbResult<Vec<(String, i64)>>;

    fn find_one(&self, db: &str, filter: &NodeFilter) -> DbResult<Option<Node>> {
        Ok(self.find(db, filter)?.into_iter().next())
    }

    fn count(&self, db: &str, filter: &NodeFilter) -> DbResult<usize> {
        Ok(self.find(db, filter)?.len())
    }

    /// Distinct values of a dotted field over the matches, in first-seen
    /// order. Array fields contribute their elements.
    fn distinct(&self, db: &str, filter: &NodeFilter, field: &str) -> DbResult<Vec<Value>> {
        let mut values: Vec<Value> = Vec::new();
        for node in self.find(db, filter)? {
            let document = node.to_document()?;
            let items = match lookup(&document, field) {
                Some(Value::Array(items)) => items.clone(),
                Some(value) => vec![value.clone()],
                None => continue,
            };
            for item in items {
                if !values.contains(&item) {
                    values.push(item);
                }
            }
        }
        Ok(values)
    }
}

pub fn apply_counter(current: i64, action: CounterAction, value: i64) -> i64 {
    match action {
        CounterAction::Incr => current.saturating_add(value),
        CounterAction::Decr => current.saturating_sub(value),
        CounterAction::Reset => value,
    }
}

pub fn database_missing(db: &str) -> DbError {
    DbError::not_found(format!("database '{}' doesn't exist", db))
}
