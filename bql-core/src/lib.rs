//! BQL Core - storage-independent lexer, parser and command model for the BQL
//! content scripting language.
//!
//! A script is lexed into [`Token`]s, parsed into an ordered list of
//! [`Command`]s and handed to a router for execution. Nothing in this crate
//! touches storage, so it can be shared by the server and by clients that want
//! to validate scripts before sending them.
//!
//! # Example
//!
//! ```rust
//! use bql_core::{parse, Action};
//!
//! let commands = parse(r#"server.listdb --regex="^\w"; @blog.mkdir /posts"#).unwrap();
//! assert_eq!(commands.len(), 2);
//! assert_eq!(commands[0].name, "server.listdb");
//! assert_eq!(commands[0].option("regex"), Some("^\\w"));
//! assert_eq!(commands[1].action, Action::NewDir { path: "/posts".to_string() });
//! ```

pub mod command;
pub mod error;
pub mod lexer;
pub mod parser;

pub use command::{
    meta_field, AccessLayer, Action, Command, CompareOp, Condition, CounterAction, Predicate,
    SelectQuery, SetQuery, UnsetQuery, ValueType, WhereClause, BYTES_PREFIX, FIELD_PREFIX,
    HEADER_PREFIX,
};
pub use error::{BqlError, BqlResult};
pub use lexer::{Lexer, Spanned, Token};
pub use parser::{parse, CommandContext, ParseEntry, ParseFn, ParseRegistry, Parser, Prefix};
