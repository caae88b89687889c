//! Query and update documents evaluated against the node document view
//! (`{_id, __header__, __bytes__, content}`).
//!
//! Both node stores share this evaluator so filter semantics do not depend
//! on the backend.

use super::node::{BytesHeader, Node};
use crate::error::{DbError, DbResult};
use bql_core::{CompareOp, Condition, Predicate, ValueType, WhereClause, FIELD_PREFIX};
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

pub const ID_FIELD: &str = "_id";
pub const NAME_FIELD: &str = "__header__.name";
pub const PARENT_FIELD: &str = "__header__.parent";
pub const TYPE_FIELD: &str = "__header__.type";

#[derive(Debug, Clone)]
pub enum Matcher {
    Compare(CompareOp, Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    TypeOf { value_type: ValueType, negate: bool },
    Exists(bool),
    Regex(Regex),
}

#[derive(Debug, Clone)]
pub enum Clause {
    Field { path: String, matcher: Matcher },
    And(Vec<Clause>),
    Or(Vec<Clause>),
}

/// Conjunction of clauses. An empty filter matches every node.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    clauses: Vec<Clause>,
}

impl NodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, path: impl Into<String>, matcher: Matcher) -> Self {
        self.clauses.push(Clause::Field {
            path: path.into(),
            matcher,
        });
        self
    }

    pub fn eq(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.field(path, Matcher::Compare(CompareOp::Eq, value.into()))
    }

    pub fn id(self, id: &str) -> Self {
        self.eq(ID_FIELD, id)
    }

    pub fn parent(self, parent: &str) -> Self {
        self.eq(PARENT_FIELD, parent)
    }

    pub fn files_only(self) -> Self {
        self.eq(TYPE_FIELD, "File")
    }

    pub fn dirs_only(self) -> Self {
        self.eq(TYPE_FIELD, "Directory")
    }

    pub fn parent_in(self, paths: &[String]) -> Self {
        let values = paths.iter().cloned().map(Value::String).collect();
        self.field(PARENT_FIELD, Matcher::In(values))
    }

    pub fn matches(self, path: impl Into<String>, regex: Regex) -> Self {
        self.field(path, Matcher::Regex(regex))
    }

    /// Exactly the node at `path`.
    pub fn at_path(self, path: &str) -> Self {
        if path == "/" {
            return self.parent("").eq(NAME_FIELD, "/");
        }
        self.parent(&crate::vfs::path::dir(path))
            .eq(NAME_FIELD, crate::vfs::path::base(path))
    }

    /// Every node below `path` at any depth, matched on the parent prefix.
    pub fn descendants_of(self, path: &str) -> DbResult<Self> {
        let pattern = if path == "/" {
            "^/".to_string()
        } else {
            format!("^{}($|/)", regex::escape(path))
        };
        Ok(self.matches(PARENT_FIELD, Regex::new(&pattern)?))
    }

    /// Appends the AND bucket as a `$and` group and the OR bucket as a `$or`
    /// group; empty buckets add nothing.
    pub fn where_clause(mut self, clause: &WhereClause) -> DbResult<Self> {
        if !clause.and.is_empty() {
            let group = clause
                .and
                .iter()
                .map(compile_condition)
                .collect::<DbResult<Vec<_>>>()?;
            self.clauses.push(Clause::And(group));
        }
        if !clause.or.is_empty() {
            let group = clause
                .or
                .iter()
                .map(compile_condition)
                .collect::<DbResult<Vec<_>>>()?;
            self.clauses.push(Clause::Or(group));
        }
        Ok(self)
    }

    pub fn matches_document(&self, document: &Value) -> bool {
        self.clauses.iter().all(|clause| clause.matches(document))
    }

    pub fn matches_node(&self, node: &Node) -> DbResult<bool> {
        Ok(self.matches_document(&node.to_document()?))
    }
}

impl Clause {
    fn matches(&self, document: &Value) -> bool {
        match self {
            Clause::Field { path, matcher } => matcher.matches(lookup(document, path)),
            Clause::And(clauses) => clauses.iter().all(|c| c.matches(document)),
            Clause::Or(clauses) => clauses.iter().any(|c| c.matches(document)),
        }
    }
}

impl Matcher {
    fn matches(&self, field: Option<&Value>) -> bool {
        match self {
            Matcher::Compare(CompareOp::Eq, target) => equals(field, target),
            Matcher::Compare(CompareOp::Ne, target) => !equals(field, target),
            Matcher::Compare(op, target) => ordered(field, target, *op),
            Matcher::In(values) => values.iter().any(|v| equals(field, v)),
            Matcher::NotIn(values) => !values.iter().any(|v| equals(field, v)),
            Matcher::TypeOf { value_type, negate } => {
                let is_type = match (field, value_type) {
                    (Some(v), ValueType::String) => v.is_string(),
                    (Some(v), ValueType::Int) => v.is_i64() || v.is_u64(),
                    _ => false,
                };
                is_type != *negate
            }
            Matcher::Exists(expected) => field.is_some() == *expected,
            Matcher::Regex(regex) => match field {
                Some(Value::String(s)) => regex.is_match(s),
                Some(Value::Array(items)) => items
                    .iter()
                    .any(|item| item.as_str().is_some_and(|s| regex.is_match(s))),
                _ => false,
            },
        }
    }
}

fn compile_condition(condition: &Condition) -> DbResult<Clause> {
    let matcher = match &condition.predicate {
        Predicate::Compare(op, value) => Matcher::Compare(*op, value.clone()),
        Predicate::In(values) => Matcher::In(values.clone()),
        Predicate::NotIn(values) => Matcher::NotIn(values.clone()),
        Predicate::TypeOf { value_type, negate } => Matcher::TypeOf {
            value_type: value_type.clone(),
            negate: *negate,
        },
        Predicate::Exists(expected) => Matcher::Exists(*expected),
        Predicate::Regex { pattern, options } => Matcher::Regex(compile_regex(pattern, options)?),
    };
    Ok(Clause::Field {
        path: condition.field.clone(),
        matcher,
    })
}

/// Builds a regex honouring the `i`, `m`, `s` and `x` option letters.
pub fn compile_regex(pattern: &str, options: &str) -> DbResult<Regex> {
    let mut builder = RegexBuilder::new(pattern);
    for option in options.chars() {
        match option {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => {
                return Err(DbError::validation(format!(
                    "invalid regex option '{}'",
                    other
                )))
            }
        };
    }
    Ok(builder.build()?)
}

/// Resolves a dotted path; numeric segments index into arrays.
pub fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(document, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Null matches a missing field; a scalar matches any element of an array field.
fn equals(field: Option<&Value>, target: &Value) -> bool {
    match (field, target) {
        (None, Value::Null) => true,
        (None, _) => false,
        (Some(Value::Array(items)), t) if !t.is_array() => items.iter().any(|i| same_value(i, t)),
        (Some(v), t) => same_value(v, t),
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn ordered(field: Option<&Value>, target: &Value, op: CompareOp) -> bool {
    let satisfies = |value: &Value| match compare_values(value, target) {
        Some(ordering) => match op {
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Lte => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Gte => ordering != Ordering::Less,
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
        },
        None => false,
    };
    match field {
        Some(Value::Array(items)) => items.iter().any(satisfies),
        Some(value) => satisfies(value),
        None => false,
    }
}

/// Sort comparator over document fields: missing sorts first, then null,
/// numbers, strings, then everything else.
pub fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Bool(_)) => 4,
            Some(_) => 5,
        }
    }
    match (a, b) {
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or_else(|| rank(a).cmp(&rank(b))),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[derive(Debug, Clone)]
pub enum HeaderChange {
    Name(String),
    Parent(String),
    Public(bool),
    Bytes(BytesHeader),
    Pointer(String),
    Content(Map<String, Value>),
}

/// Field mutations applied to every matching node.
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    set: Vec<(String, Value)>,
    inc: Vec<(String, Value)>,
    unset: Vec<String>,
    header: Vec<HeaderChange>,
}

impl NodeUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: Value) -> Self {
        self.set.push((path.into(), value));
        self
    }

    pub fn inc(mut self, path: impl Into<String>, delta: Value) -> Self {
        self.inc.push((path.into(), delta));
        self
    }

    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.unset.push(path.into());
        self
    }

    pub fn header(mut self, change: HeaderChange) -> Self {
        self.header.push(change);
        self
    }

    pub fn apply(&self, node: &mut Node) -> DbResult<()> {
        for change in &self.header {
            match change {
                HeaderChange::Name(name) => node.header.name = name.clone(),
                HeaderChange::Parent(parent) => node.header.parent = parent.clone(),
                HeaderChange::Public(public) => node.header.ispublic = *public,
                HeaderChange::Bytes(bytes) => node.bytes = bytes.clone(),
                HeaderChange::Pointer(pointer) => node.bytes.filepointer = pointer.clone(),
                HeaderChange::Content(content) => node.content = content.clone(),
            }
        }

        for (path, value) in &self.set {
            let segments = content_segments(path)?;
            set_path(&mut node.content, &segments, value.clone())?;
        }

        for (path, delta) in &self.inc {
            let segments = content_segments(path)?;
            let current = get_path(&node.content, &segments);
            let next = match current {
                None => delta.clone(),
                Some(Value::Number(n)) => add_numbers(n, delta).ok_or_else(|| {
                    DbError::validation(format!("Cannot increment '{}' by a non-numeric value", path))
                })?,
                Some(_) => {
                    return Err(DbError::validation(format!(
                        "Cannot apply increment to non-numeric field '{}'",
                        path
                    )))
                }
            };
            set_path(&mut node.content, &segments, next)?;
        }

        for path in &self.unset {
            let segments = content_segments(path)?;
            remove_path(&mut node.content, &segments);
        }

        Ok(())
    }
}

fn content_segments(path: &str) -> DbResult<Vec<&str>> {
    match path.strip_prefix(FIELD_PREFIX) {
        Some(rest) if !rest.is_empty() => Ok(rest.split('.').collect()),
        _ => Err(DbError::validation(format!(
            "field '{}' cannot be modified",
            path
        ))),
    }
}

/// Integer arithmetic is kept while both sides are whole numbers.
fn add_numbers(current: &Number, delta: &Value) -> Option<Value> {
    if let (Some(n), Some(d)) = (current.as_i64(), delta.as_i64()) {
        if let Some(sum) = n.checked_add(d) {
            return Some(Value::from(sum));
        }
    }
    let delta = delta.as_f64()?;
    if let Some(n) = current.as_i64() {
        if delta.fract() == 0.0 && delta.abs() < i64::MAX as f64 {
            return n.checked_add(delta as i64).map(Value::from);
        }
    }
    Number::from_f64(current.as_f64()? + delta).map(Value::Number)
}

fn get_path<'a>(map: &'a Map<String, Value>, segments: &[&str]) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    let value = map.get(*first)?;
    if rest.is_empty() {
        return Some(value);
    }
    match value {
        Value::Object(inner) => get_path(inner, rest),
        _ => None,
    }
}

fn set_path(map: &mut Map<String, Value>, segments: &[&str], value: Value) -> DbResult<()> {
    let Some((first, rest)) = segments.split_first() else {
        return Ok(());
    };
    if rest.is_empty() {
        map.insert(first.to_string(), value);
        return Ok(());
    }
    let entry = map
        .entry(first.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    match entry {
        Value::Object(inner) => set_path(inner, rest, value),
        _ => Err(DbError::validation(format!(
            "cannot create field '{}' inside a non-object value",
            rest.join(".")
        ))),
    }
}

fn remove_path(map: &mut Map<String, Value>, segments: &[&str]) {
    match segments {
        [] => {}
        [last] => {
            map.remove(*last);
        }
        [first, rest @ ..] => {
            if let Some(Value::Object(inner)) = map.get_mut(*first) {
                remove_path(inner, rest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(content: Value) -> Value {
        json!({
            "_id": "abc",
            "__header__": {"name": "f", "parent": "/users", "type": "File", "ispublic": false, "created": ""},
            "__bytes__": {"filepointer": "", "mime": "", "size": 0},
            "content": content,
        })
    }

    fn cond(field: &str, predicate: Predicate) -> Condition {
        Condition {
            field: field.to_string(),
            predicate,
        }
    }

    #[test]
    fn test_equality_semantics() {
        let d = doc(json!({"age": 18, "tags": ["a", "b"], "none": null}));
        let eq = |path: &str, v: Value| NodeFilter::new().eq(path, v).matches_document(&d);

        assert!(eq("content.age", json!(18.0)));
        assert!(eq("content.tags", json!("b")));
        assert!(!eq("content.tags", json!("c")));
        assert!(eq("content.missing", Value::Null));
        assert!(eq("content.none", Value::Null));
        assert!(!eq("content.missing", json!(1)));
        assert!(eq("__header__.parent", json!("/users")));
    }

    #[test]
    fn test_ordering_and_membership() {
        let d = doc(json!({"age": 21, "name": "bob"}));
        let check = |m: Matcher, path: &str| NodeFilter::new().field(path, m).matches_document(&d);

        assert!(check(Matcher::Compare(CompareOp::Gt, json!(18.0)), "content.age"));
        assert!(!check(Matcher::Compare(CompareOp::Lt, json!(18.0)), "content.age"));
        assert!(check(Matcher::Compare(CompareOp::Lte, json!(21)), "content.age"));
        assert!(!check(Matcher::Compare(CompareOp::Gt, json!("a")), "content.age"));
        assert!(check(Matcher::Compare(CompareOp::Gte, json!("bob")), "content.name"));
        assert!(check(Matcher::In(vec![json!("al"), json!("bob")]), "content.name"));
        assert!(check(Matcher::NotIn(vec![json!(1.0)]), "content.age"));
        assert!(!check(Matcher::Compare(CompareOp::Ne, json!(21.0)), "content.age"));
    }

    #[test]
    fn test_type_exists_regex() {
        let d = doc(json!({"age": 21, "ratio": 0.5, "name": "Bob"}));
        let check = |m: Matcher, path: &str| NodeFilter::new().field(path, m).matches_document(&d);

        let int = |negate| Matcher::TypeOf {
            value_type: ValueType::Int,
            negate,
        };
        assert!(check(int(false), "content.age"));
        assert!(!check(int(false), "content.ratio"));
        assert!(check(int(true), "content.ratio"));
        assert!(check(
            Matcher::TypeOf {
                value_type: ValueType::String,
                negate: false
            },
            "content.name"
        ));
        assert!(check(Matcher::Exists(true), "content.name"));
        assert!(check(Matcher::Exists(false), "content.email"));
        assert!(check(Matcher::Regex(compile_regex("^bo", "i").unwrap()), "content.name"));
        assert!(!check(Matcher::Regex(compile_regex("^bo", "").unwrap()), "content.name"));
    }

    #[test]
    fn test_where_buckets() {
        let clause = WhereClause {
            and: vec![cond("content.active", Predicate::Compare(CompareOp::Eq, json!(true)))],
            or: vec![
                cond("content.age", Predicate::Compare(CompareOp::Gt, json!(18.0))),
                cond("content.vip", Predicate::Compare(CompareOp::Eq, json!(true))),
            ],
        };
        let filter = NodeFilter::new().where_clause(&clause).unwrap();

        assert!(filter.matches_document(&doc(json!({"active": true, "age": 30}))));
        assert!(filter.matches_document(&doc(json!({"active": true, "age": 3, "vip": true}))));
        assert!(!filter.matches_document(&doc(json!({"active": true, "age": 3}))));
        assert!(!filter.matches_document(&doc(json!({"active": false, "age": 30}))));
    }

    #[test]
    fn test_descendants_prefix() {
        let filter = NodeFilter::new().descendants_of("/a").unwrap();
        let with_parent = |p: &str| {
            let mut d = doc(json!({}));
            d["__header__"]["parent"] = json!(p);
            filter.matches_document(&d)
        };
        assert!(with_parent("/a"));
        assert!(with_parent("/a/b/c"));
        assert!(!with_parent("/ab"));
        assert!(!with_parent("/"));
        // Names are case-sensitive, so a sibling differing in case is untouched.
        assert!(!with_parent("/A/b"));

        let dotted = NodeFilter::new().descendants_of("/v1.0").unwrap();
        let mut d = doc(json!({}));
        d["__header__"]["parent"] = json!("/v1x0");
        assert!(!dotted.matches_document(&d));
    }

    #[test]
    fn test_bad_regex_option() {
        assert!(matches!(compile_regex("a", "q"), Err(DbError::Validation(_))));
        assert!(matches!(compile_regex("(", ""), Err(DbError::Validation(_))));
    }

    #[test]
    fn test_update_set_inc_unset() {
        let mut content = Map::new();
        content.insert("views".to_string(), json!(2));
        content.insert("draft".to_string(), json!(true));
        let mut node = Node::file("f", "/", content);

        NodeUpdate::new()
            .set("content.meta.author", json!("ann"))
            .inc("content.views", json!(3.0))
            .inc("content.score", json!(-1.5))
            .unset("content.draft")
            .apply(&mut node)
            .unwrap();

        assert_eq!(node.content["meta"], json!({"author": "ann"}));
        assert_eq!(node.content["views"], json!(5));
        assert!(node.content["views"].is_i64());
        assert_eq!(node.content["score"], json!(-1.5));
        assert!(!node.content.contains_key("draft"));
    }

    #[test]
    fn test_update_rejects_non_content_and_non_numeric() {
        let mut content = Map::new();
        content.insert("title".to_string(), json!("x"));
        let mut node = Node::file("f", "/", content);

        assert!(NodeUpdate::new()
            .set("__header__.name", json!("g"))
            .apply(&mut node)
            .is_err());
        assert!(NodeUpdate::new()
            .inc("content.title", json!(1.0))
            .apply(&mut node)
            .is_err());
    }

    #[test]
    fn test_header_changes() {
        let mut node = Node::file("f", "/a", Map::new());
        NodeUpdate::new()
            .header(HeaderChange::Parent("/b".to_string()))
            .header(HeaderChange::Public(true))
            .apply(&mut node)
            .unwrap();
        assert_eq!(node.path(), "/b/f");
        assert!(node.header.ispublic);
    }
}
