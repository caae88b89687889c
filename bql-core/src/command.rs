//! Command model produced by the parser and consumed by the server's router.
//!
//! A [`Command`] keeps the routing envelope (name, database, admin flag,
//! raw `--name=value` options, output filter) while the operands live in a
//! strongly typed [`Action`].

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Prefix applied to user fields so they address the file content document.
pub const FIELD_PREFIX: &str = "content.";
/// Prefix for node header fields.
pub const HEADER_PREFIX: &str = "__header__.";
/// Prefix for attachment header fields.
pub const BYTES_PREFIX: &str = "__bytes__.";

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Canonical command name, e.g. `server.listdb` or `database.newdir`.
    pub name: String,
    /// Target database; empty for server and user commands.
    pub database: String,
    pub action: Action,
    /// Raw command options such as `--regex="^a"`.
    pub options: BTreeMap<String, String>,
    /// Name of the output filter requested with `>> name`.
    pub filter: Option<String>,
    pub is_admin: bool,
}

impl Command {
    pub fn new(name: impl Into<String>, action: Action) -> Self {
        Self {
            name: name.into(),
            database: String::new(),
            action,
            options: BTreeMap::new(),
            filter: None,
            is_admin: false,
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterAction {
    Incr,
    Decr,
    Reset,
}

impl CounterAction {
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "incr" => Some(CounterAction::Incr),
            "decr" => Some(CounterAction::Decr),
            "reset" => Some(CounterAction::Reset),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CounterAction::Incr => "incr",
            CounterAction::Decr => "decr",
            CounterAction::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLayer {
    Json,
    Bytes,
}

impl AccessLayer {
    pub fn parse(layer: &str) -> Option<Self> {
        match layer {
            "json" => Some(AccessLayer::Json),
            "bytes" => Some(AccessLayer::Bytes),
            _ => None,
        }
    }
}

/// One variant per executable command.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    // Session
    Login {
        username: String,
        password: String,
        duration: Option<i64>,
    },
    Whoami,

    // Server administration
    ListDatabases {
        regex: Option<String>,
    },
    NewDatabase {
        database: String,
    },
    InitServer,
    DropDatabase {
        database: String,
    },

    // User administration
    NewUser {
        username: String,
        password: String,
    },
    ListUsers {
        regex: Option<String>,
    },
    UserInfo {
        username: String,
    },
    DeleteUser {
        username: String,
    },
    ChangePassword {
        username: String,
        password: String,
    },
    UserAccess {
        username: String,
        grant: bool,
    },
    UserDatabaseAccess {
        username: String,
        database: String,
        grant: bool,
    },

    // Filesystem
    NewDir {
        path: String,
    },
    NewFile {
        path: String,
        content: Map<String, Value>,
    },
    ListDir {
        path: String,
        regex: Option<String>,
    },
    Rename {
        path: String,
        name: String,
    },
    Move {
        path: String,
        to: String,
        rename: Option<String>,
    },
    Copy {
        path: String,
        to: String,
        rename: Option<String>,
    },
    Delete {
        path: String,
    },
    Info {
        path: String,
    },
    MakePublic {
        path: String,
    },
    MakePrivate {
        path: String,
    },
    ReadFile {
        path: String,
        fields: Vec<String>,
    },
    UpdateFile {
        path: String,
        content: Map<String, Value>,
    },
    DeleteBytes {
        path: String,
    },
    Counter {
        name: String,
        action: CounterAction,
        value: i64,
    },
    ListCounters {
        regex: Option<String>,
    },

    // BQL queries
    Select(SelectQuery),
    Set(SetQuery),
    Unset(UnsetQuery),

    // Transport-issued commands
    UploadTicket {
        path: String,
        duration: Option<i64>,
    },
    WriteBytes {
        ticket: String,
        data: Vec<u8>,
    },
    ReadBytes {
        path: String,
    },
    /// Anonymous read of a public file; the database travels with the
    /// action so the envelope stays free of database access checks.
    DirectAccess {
        database: String,
        path: String,
        layer: AccessLayer,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectQuery {
    /// Projected fields, already prefixed with `content.`.
    pub fields: Vec<String>,
    pub paths: Vec<String>,
    pub filter: Option<WhereClause>,
    /// Sort keys; a leading `-` means descending.
    pub sort: Option<Vec<String>>,
    pub limit: Option<i64>,
    pub distinct: Option<String>,
    pub count: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SetQuery {
    pub assignments: Map<String, Value>,
    /// Increments with the sign of `+=` / `-=` folded into the magnitude.
    pub increments: Map<String, Value>,
    pub paths: Vec<String>,
    pub filter: Option<WhereClause>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnsetQuery {
    pub fields: Vec<String>,
    pub paths: Vec<String>,
    pub filter: Option<WhereClause>,
}

/// Two-bucket accumulator built by the `where` grammar.
///
/// A document matches when every condition in `and` holds and, if `or` is
/// non-empty, at least one condition in `or` holds. There is no operator
/// precedence beyond that.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WhereClause {
    pub and: Vec<Condition>,
    pub or: Vec<Condition>,
}

impl WhereClause {
    pub fn is_empty(&self) -> bool {
        self.and.is_empty() && self.or.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Dotted document path, e.g. `content.age` or `__header__.name`.
    pub field: String,
    pub predicate: Predicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    String,
    Int,
    /// Any other name; matches nothing.
    Unknown(String),
}

impl ValueType {
    pub fn from_name(name: &str) -> Self {
        match name {
            "string" => ValueType::String,
            "int" => ValueType::Int,
            other => ValueType::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare(CompareOp, Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    TypeOf { value_type: ValueType, negate: bool },
    Exists(bool),
    Regex { pattern: String, options: String },
}

/// Maps the `file_*` meta identifiers usable in `where` clauses to node fields.
pub fn meta_field(identifier: &str) -> Option<String> {
    match identifier.to_lowercase().as_str() {
        "file_name" => Some(format!("{}name", HEADER_PREFIX)),
        "file_mime" => Some(format!("{}mime", BYTES_PREFIX)),
        "file_size" => Some(format!("{}size", BYTES_PREFIX)),
        "file_ispublic" => Some(format!("{}ispublic", HEADER_PREFIX)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_fields() {
        assert_eq!(meta_field("file_name").as_deref(), Some("__header__.name"));
        assert_eq!(meta_field("FILE_SIZE").as_deref(), Some("__bytes__.size"));
        assert_eq!(meta_field("file_mime").as_deref(), Some("__bytes__.mime"));
        assert_eq!(
            meta_field("file_ispublic").as_deref(),
            Some("__header__.ispublic")
        );
        assert_eq!(meta_field("age"), None);
    }

    #[test]
    fn test_command_builders() {
        let cmd = Command::new("database.info", Action::Info { path: "/a".into() })
            .with_database("db")
            .with_filter("pretty");
        assert_eq!(cmd.database, "db");
        assert_eq!(cmd.filter.as_deref(), Some("pretty"));
        assert!(!cmd.is_admin);
        assert!(Command::new("server.init", Action::InitServer).admin().is_admin);
    }

    #[test]
    fn test_counter_action_keywords() {
        assert_eq!(CounterAction::from_keyword("incr"), Some(CounterAction::Incr));
        assert_eq!(CounterAction::from_keyword("reset"), Some(CounterAction::Reset));
        assert_eq!(CounterAction::from_keyword("double"), None);
        assert_eq!(CounterAction::Decr.as_str(), "decr");
    }
}
