//! Command routing: authorization, handler dispatch and output filters.
//!
//! An [`Engine`] owns handles to every backend plus the handler and filter
//! registries it was built with. Engines are cheap to clone; the worker pool
//! gives each worker its own instance.

pub mod filters;
pub mod handlers;

pub use filters::{FilterFn, FilterRegistry};
pub use handlers::{HandlerFn, HandlerRegistry};

use crate::auth::{Authentication, User};
use crate::error::{DbError, DbResult};
use crate::state::StateStore;
use crate::vfs::Vfs;
use bql_core::{Command, Parser};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_TICKET_TTL: Duration = Duration::from_secs(5 * 60);
/// Upper bound for a caller-supplied `--duration`.
pub const MAX_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Result of a single command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Data(Value),
    /// Raw attachment bytes, streamed back by the transport as-is.
    Bytes { data: Vec<u8>, mime: String },
}

impl Reply {
    /// JSON view of the reply. Attachments are summarised as `{mime, size}`.
    pub fn to_value(&self) -> Value {
        match self {
            Reply::Data(value) => value.clone(),
            Reply::Bytes { data, mime } => json!({"mime": mime, "size": data.len()}),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Reply::Data(value) => value,
            bytes => bytes.to_value(),
        }
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Data(value)
    }
}

/// Success envelope wrapped around command and script results.
pub fn ok_envelope(data: Value) -> Value {
    json!({"status": "ok", "data": data})
}

/// Backend handles an engine dispatches to.
#[derive(Clone)]
pub struct Backends {
    pub auth: Arc<dyn Authentication>,
    pub vfs: Vfs,
    pub state: Arc<dyn StateStore>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").field("vfs", &self.vfs).finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub struct Engine {
    backends: Backends,
    handlers: Arc<HandlerRegistry>,
    filters: Arc<FilterRegistry>,
    token_ttl: Duration,
    ticket_ttl: Duration,
}

impl Engine {
    pub fn new(backends: Backends, handlers: HandlerRegistry, filters: FilterRegistry) -> Self {
        Self {
            backends,
            handlers: Arc::new(handlers),
            filters: Arc::new(filters),
            token_ttl: DEFAULT_TOKEN_TTL,
            ticket_ttl: DEFAULT_TICKET_TTL,
        }
    }

    /// Engine with every built-in command and filter registered.
    pub fn standard(backends: Backends) -> Self {
        Self::new(backends, HandlerRegistry::standard(), FilterRegistry::standard())
    }

    /// Lifetime of login tokens and upload tickets when a command gives no
    /// `--duration`.
    pub fn with_ttls(mut self, token_ttl: Duration, ticket_ttl: Duration) -> Self {
        self.token_ttl = token_ttl;
        self.ticket_ttl = ticket_ttl;
        self
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    pub fn vfs(&self) -> &Vfs {
        &self.backends.vfs
    }

    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    pub fn ticket_ttl(&self) -> Duration {
        self.ticket_ttl
    }

    /// Resolves a session token. An empty token is an anonymous caller.
    pub fn check_user(&self, token: &str) -> DbResult<Option<User>> {
        if token.is_empty() {
            return Ok(None);
        }
        let username = self
            .backends
            .state
            .token_get(token)?
            .ok_or_else(|| DbError::Auth("invalid auth token".to_string()))?;
        self.backends.auth.user_info(&username).map(Some)
    }

    /// Authorizes and runs one command, then applies its output filter.
    pub fn route(&self, cmd: &Command, user: Option<&User>) -> DbResult<Reply> {
        let handler = self
            .handlers
            .get(&cmd.name)
            .ok_or_else(|| DbError::CommandNotFound(cmd.name.clone()))?;

        let is_root = user.is_some_and(|u| u.root);
        if cmd.is_admin && !is_root {
            tracing::warn!("Rejected admin command {} for non-root caller", cmd.name);
            return Err(DbError::Unauthorized);
        }
        if !cmd.database.is_empty() && !user.is_some_and(|u| u.can_access(&cmd.database)) {
            tracing::warn!(
                "Rejected {} on database {}: no access",
                cmd.name,
                cmd.database
            );
            return Err(DbError::Unauthorized);
        }

        tracing::debug!("Executing {} (database: {:?})", cmd.name, cmd.database);
        let reply = handler(self, cmd, user).inspect_err(|e| {
            tracing::warn!("Command {} failed: {}", cmd.name, e);
        })?;

        match &cmd.filter {
            Some(name) => {
                let filter = self
                    .filters
                    .get(name)
                    .ok_or_else(|| DbError::FilterNotFound(name.clone()))?;
                filter(reply)
            }
            None => Ok(reply),
        }
    }

    /// Parses and runs a script for an authenticated caller.
    ///
    /// Commands run in order and the first failure aborts the rest. Several
    /// results come back as a list; a single result is returned unwrapped.
    pub fn execute_script(&self, token: &str, script: &str) -> DbResult<Value> {
        let user = self.check_user(token)?.ok_or(DbError::AuthRequired)?;

        if script.trim().is_empty() {
            return Err(DbError::InvalidRequest("empty script".to_string()));
        }
        let commands = Parser::parse(script)?;
        if commands.is_empty() {
            return Err(DbError::InvalidRequest("no command found".to_string()));
        }

        let mut results = Vec::with_capacity(commands.len());
        for cmd in &commands {
            results.push(self.route(cmd, Some(&user))?.into_value());
        }

        if results.len() > 1 {
            Ok(Value::Array(results))
        } else {
            Ok(results.pop().unwrap_or(Value::Null))
        }
    }

    /// Runs one pre-built command. Anonymous callers are allowed; handlers
    /// that need a user check for one themselves.
    pub fn execute_command(&self, token: &str, cmd: &Command) -> DbResult<Reply> {
        let user = self.check_user(token)?;
        self.route(cmd, user.as_ref())
    }

    /// Creates a root account, used to bootstrap a fresh server.
    pub fn create_admin_user(&self, username: &str, password: &str) -> DbResult<()> {
        self.backends.auth.new_user(username, password, true)?;
        tracing::info!("Created admin user {}", username);
        Ok(())
    }

    /// Creates the root account unless the account store already holds it.
    /// Returns whether a new account was made.
    pub fn ensure_admin_user(&self, username: &str, password: &str) -> DbResult<bool> {
        match self.backends.auth.user_info(&username.to_lowercase()) {
            Ok(user) => {
                if !user.root {
                    tracing::warn!("Configured admin {} exists but is not root", username);
                }
                Ok(false)
            }
            Err(DbError::NotFound(_)) => self.create_admin_user(username, password).map(|_| true),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryAuth;
    use crate::state::MemoryStateStore;
    use crate::storage::{MemoryByteStore, MemoryNodeStore};
    use bql_core::Action;

    fn engine() -> Engine {
        let backends = Backends {
            auth: Arc::new(MemoryAuth::new()),
            vfs: Vfs::new(Arc::new(MemoryNodeStore::new()), Arc::new(MemoryByteStore::new())),
            state: Arc::new(MemoryStateStore::new()),
        };
        Engine::standard(backends)
    }

    fn login(engine: &Engine, username: &str, password: &str) -> String {
        let cmd = Command::new(
            "login",
            Action::Login {
                username: username.to_string(),
                password: password.to_string(),
                duration: None,
            },
        );
        match engine.execute_command("", &cmd).unwrap() {
            Reply::Data(Value::String(token)) => token,
            other => panic!("unexpected login reply: {:?}", other),
        }
    }

    #[test]
    fn test_script_requires_user() {
        let engine = engine();
        assert_eq!(
            engine.execute_script("", "server.listdb").unwrap_err(),
            DbError::AuthRequired
        );
        assert_eq!(
            engine.execute_script("nope", "server.listdb").unwrap_err().to_string(),
            "invalid auth token"
        );
    }

    #[test]
    fn test_script_results_and_errors() {
        let engine = engine();
        engine.create_admin_user("admin", "password1").unwrap();
        let token = login(&engine, "admin", "password1");

        assert_eq!(engine.execute_script(&token, "  ").unwrap_err().to_string(), "empty script");
        assert_eq!(engine.execute_script(&token, ";;").unwrap_err().to_string(), "no command found");

        let single = engine.execute_script(&token, r#"server.newdb "blog""#).unwrap();
        assert_eq!(single, json!(true));

        let many = engine
            .execute_script(&token, "@blog.newdir /a; @blog.listdir /")
            .unwrap();
        assert_eq!(many, json!([true, {"dirs": ["a"], "files": [], "bfiles": []}]));

        // Execution stops at the first failure; earlier commands stay applied.
        let err = engine
            .execute_script(&token, "@blog.newdir /b; @blog.newdir /a; @blog.newdir /c")
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
        let listing = engine.execute_script(&token, "@blog.listdir /").unwrap();
        assert_eq!(listing["dirs"], json!(["a", "b"]));
    }

    #[test]
    fn test_parse_error_carries_line() {
        let engine = engine();
        engine.create_admin_user("admin", "password1").unwrap();
        let token = login(&engine, "admin", "password1");
        let err = engine
            .execute_script(&token, "server.listdb;\n@blog.newdir")
            .unwrap_err();
        assert_eq!(err.line(), Some(2));
        assert!(err.to_string().starts_with("script parse error:"));
    }

    #[test]
    fn test_authorization_rules() {
        let engine = engine();
        engine.create_admin_user("admin", "password1").unwrap();
        let admin = login(&engine, "admin", "password1");
        engine
            .execute_script(&admin, r#"server.newdb "blog"; user.new "alice" "password1""#)
            .unwrap();
        let alice = login(&engine, "alice", "password1");

        assert_eq!(
            engine.execute_script(&alice, "server.listdb").unwrap_err(),
            DbError::Unauthorized
        );
        assert_eq!(
            engine.execute_script(&alice, "@blog.listdir /").unwrap_err(),
            DbError::Unauthorized
        );

        engine
            .execute_script(&admin, r#"user.db "alice" grant "blog""#)
            .unwrap();
        assert!(engine.execute_script(&alice, "@blog.listdir /").is_ok());

        let whoami = engine.execute_script(&alice, "whoami").unwrap();
        assert_eq!(
            whoami,
            json!({"username": "alice", "databases": ["blog"], "root": false})
        );
    }

    #[test]
    fn test_unknown_command_and_filter() {
        let engine = engine();
        let cmd = Command::new("database.format", Action::Whoami);
        assert_eq!(
            engine.route(&cmd, None).unwrap_err().to_string(),
            "Command 'database.format' not found"
        );

        let cmd = Command::new("user.whoami", Action::Whoami).with_filter("ugly");
        let user = User {
            username: "admin".to_string(),
            active: true,
            databases: vec![],
            root: true,
        };
        assert_eq!(
            engine.route(&cmd, Some(&user)).unwrap_err().to_string(),
            "Filter 'ugly' not found"
        );
    }

    #[test]
    fn test_pretty_filter() {
        let engine = engine();
        engine.create_admin_user("admin", "password1").unwrap();
        let token = login(&engine, "admin", "password1");
        let pretty = engine.execute_script(&token, "server.listdb >> pretty").unwrap();
        let text = pretty.as_str().unwrap();
        assert!(text.contains('\n'));
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed, json!({"status": "ok", "data": []}));
    }
}
