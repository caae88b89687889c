//! BQL `select`, `set` and `unset` over file nodes.

use super::{path, Vfs};
use crate::error::{DbError, DbResult};
use crate::storage::filter::{lookup, sort_order, NodeFilter, NodeUpdate};
use bql_core::{SelectQuery, SetQuery, UnsetQuery, WhereClause, FIELD_PREFIX};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;

/// Files directly inside any of `paths`, narrowed by the optional where clause.
fn file_filter(paths: &[String], filter: Option<&WhereClause>) -> DbResult<NodeFilter> {
    let paths: Vec<String> = paths.iter().map(|p| path::clean(p)).collect();
    let base = NodeFilter::new().parent_in(&paths).files_only();
    match filter {
        Some(clause) => base.where_clause(clause),
        None => Ok(base),
    }
}

/// Copies the listed dotted fields of `content` into a new map, keeping
/// their nesting. Missing fields are skipped.
pub fn project(content: &Map<String, Value>, fields: &[String]) -> Map<String, Value> {
    let source = Value::Object(content.clone());
    let mut projected = Map::new();
    for field in fields {
        if let Some(value) = lookup(&source, field) {
            let segments: Vec<&str> = field.split('.').collect();
            insert_at(&mut projected, &segments, value.clone());
        }
    }
    projected
}

fn insert_at(map: &mut Map<String, Value>, segments: &[&str], value: Value) {
    match segments {
        [] => {}
        [last] => {
            map.insert(last.to_string(), value);
        }
        [first, rest @ ..] => {
            let entry = map
                .entry(first.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(inner) = entry {
                insert_at(inner, rest, value);
            }
        }
    }
}

fn compare_by_keys(a: &Value, b: &Value, keys: &[String]) -> Ordering {
    for key in keys {
        let (field, descending) = match key.strip_prefix('-') {
            Some(field) => (field, true),
            None => (key.as_str(), false),
        };
        let ordering = sort_order(lookup(a, field), lookup(b, field));
        let ordering = if descending { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

impl Vfs {
    /// Runs a `select`. `count` yields a number, `distinct` a list of values,
    /// everything else a list of `{path, content}` objects.
    pub fn select(&self, db: &str, query: &SelectQuery) -> DbResult<Value> {
        if query.fields.is_empty() && query.paths.is_empty() {
            return Err(DbError::validation(
                "Invalid select query: No fields or document paths.",
            ));
        }
        let filter = file_filter(&query.paths, query.filter.as_ref())?;

        if query.count {
            return Ok(json!(self.nodes.count(db, &filter)?));
        }
        if let Some(field) = &query.distinct {
            return Ok(Value::Array(self.nodes.distinct(db, &filter, field)?));
        }

        let mut documents = self
            .nodes
            .find(db, &filter)?
            .iter()
            .map(|node| node.to_document())
            .collect::<DbResult<Vec<Value>>>()?;

        // Sorting always happens before the limit is applied.
        if let Some(keys) = &query.sort {
            documents.sort_by(|a, b| compare_by_keys(a, b, keys));
        }
        if let Some(limit) = query.limit {
            if limit != 0 {
                documents.truncate(limit.unsigned_abs() as usize);
            }
        }

        let projection: Vec<String> = query
            .fields
            .iter()
            .map(|field| field.strip_prefix(FIELD_PREFIX).unwrap_or(field).to_string())
            .collect();

        let results = documents
            .into_iter()
            .map(|document| {
                let parent = lookup(&document, "__header__.parent")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let name = lookup(&document, "__header__.name")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let content = match document.get("content") {
                    Some(Value::Object(map)) if projection.is_empty() => map.clone(),
                    Some(Value::Object(map)) => project(map, &projection),
                    _ => Map::new(),
                };
                json!({"path": path::join(parent, name), "content": content})
            })
            .collect();
        Ok(Value::Array(results))
    }

    /// Bulk assignment and increment; returns the number of files updated.
    pub fn set(&self, db: &str, query: &SetQuery) -> DbResult<usize> {
        if query.assignments.is_empty() && query.increments.is_empty() && query.paths.is_empty() {
            return Err(DbError::validation(
                "Invalid set command: No fields or document paths.",
            ));
        }
        let filter = file_filter(&query.paths, query.filter.as_ref())?;
        let mut update = NodeUpdate::new();
        for (field, value) in &query.assignments {
            update = update.set(field.clone(), value.clone());
        }
        for (field, delta) in &query.increments {
            update = update.inc(field.clone(), delta.clone());
        }
        self.nodes.update_many(db, &filter, &update)
    }

    /// Bulk field removal; returns the number of files updated.
    pub fn unset(&self, db: &str, query: &UnsetQuery) -> DbResult<usize> {
        if query.fields.is_empty() && query.paths.is_empty() {
            return Err(DbError::validation(
                "Invalid unset command: No fields or document paths.",
            ));
        }
        let filter = file_filter(&query.paths, query.filter.as_ref())?;
        let update = query
            .fields
            .iter()
            .fold(NodeUpdate::new(), |update, field| update.unset(field.clone()));
        self.nodes.update_many(db, &filter, &update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryByteStore, MemoryNodeStore};
    use bql_core::{Action, Command};
    use std::sync::Arc;

    fn seeded() -> Vfs {
        let vfs = Vfs::new(Arc::new(MemoryNodeStore::new()), Arc::new(MemoryByteStore::new()));
        vfs.create_database("db").unwrap();
        vfs.new_dir("db", "/users").unwrap();
        vfs.new_dir("db", "/users/archive").unwrap();
        let users = [
            ("ann", json!({"name": "ann", "age": 30, "vip": false})),
            ("bob", json!({"name": "bob", "age": 12, "vip": true})),
            ("cid", json!({"name": "cid", "age": 17, "vip": false})),
            ("dee", json!({"name": "dee", "age": 45, "vip": true})),
        ];
        for (name, content) in users {
            let Value::Object(map) = content else { unreachable!() };
            vfs.new_file("db", &format!("/users/{}", name), map).unwrap();
        }
        let mut old = Map::new();
        old.insert("age".to_string(), json!(99));
        vfs.new_file("db", "/users/archive/old", old).unwrap();
        vfs
    }

    fn query(script: &str) -> Action {
        let commands: Vec<Command> = bql_core::parse(script).unwrap();
        commands.into_iter().next().unwrap().action
    }

    fn select(vfs: &Vfs, script: &str) -> Value {
        match query(script) {
            Action::Select(q) => vfs.select("db", &q).unwrap(),
            other => panic!("not a select: {:?}", other),
        }
    }

    fn paths(result: &Value) -> Vec<String> {
        let mut paths: Vec<String> = result
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["path"].as_str().unwrap().to_string())
            .collect();
        paths.sort();
        paths
    }

    #[test]
    fn test_select_or_bucket() {
        let vfs = seeded();
        let result = select(&vfs, r#"@db.select "name" in /users where "age" > 18 or "vip" == true;"#);
        assert_eq!(
            paths(&result),
            vec!["/users/ann", "/users/bob", "/users/dee"]
        );
        assert_eq!(result[0]["content"].as_object().unwrap().len(), 1);
    }

    #[test]
    fn test_select_sort_limit_count_distinct() {
        let vfs = seeded();
        let sorted = select(&vfs, r#"@db.select "age" in /users sort desc "age" limit 2;"#);
        let ages: Vec<Value> = sorted
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["content"]["age"].clone())
            .collect();
        assert_eq!(ages, vec![json!(45), json!(30)]);

        let count = select(&vfs, r#"@db.select "age" in /users /users/archive count;"#);
        assert_eq!(count, json!(5));

        let distinct = select(&vfs, r#"@db.select "vip" in /users distinct "vip";"#);
        assert_eq!(distinct, json!([false, true]));
    }

    #[test]
    fn test_set_and_unset() {
        let vfs = seeded();
        let Action::Set(set) = query(r#"@db.set "vip" = true "age" += 1 in /users where "age" < 18;"#) else {
            panic!("expected set");
        };
        assert_eq!(vfs.set("db", &set).unwrap(), 2);
        assert_eq!(vfs.read_json("db", "/users/cid", &[]).unwrap()["age"], json!(18));
        assert_eq!(vfs.read_json("db", "/users/cid", &[]).unwrap()["vip"], json!(true));

        let Action::Unset(unset) = query(r#"@db.unset "vip" in /users;"#) else {
            panic!("expected unset");
        };
        assert_eq!(vfs.unset("db", &unset).unwrap(), 4);
        assert!(vfs.read_json("db", "/users/ann", &[]).unwrap().get("vip").is_none());
    }

    #[test]
    fn test_project_nested_fields() {
        let Value::Object(content) = json!({"a": {"b": 1, "c": 2}, "d": 3}) else {
            unreachable!()
        };
        let projected = project(&content, &["a.b".to_string(), "missing".to_string()]);
        assert_eq!(Value::Object(projected), json!({"a": {"b": 1}}));
    }
}
