//! Command handlers keyed by canonical command name.
//!
//! Each handler destructures the [`Action`] variant it expects; anything else
//! means the command was built by hand with mismatched arguments.

use super::{Engine, Reply, MAX_TTL};
use crate::auth::{generate_token, User};
use crate::error::{DbError, DbResult};
use crate::storage::filter::compile_regex;
use crate::vfs::DirectContent;
use bql_core::{Action, Command};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

pub type HandlerFn = fn(&Engine, &Command, Option<&User>) -> DbResult<Reply>;

const MATCH_ALL: &str = ".";

#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerFn>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in command.
    pub fn standard() -> Self {
        let mut registry = Self::new();

        registry.register("login", login);
        registry.register("uploadticket", upload_ticket);
        registry.register("writebytes", write_bytes);
        registry.register("readbytes", read_bytes);
        registry.register("directaccess", direct_access);

        registry.register("user.new", user_new);
        registry.register("user.all", user_all);
        registry.register("user.about", user_about);
        registry.register("user.delete", user_delete);
        registry.register("user.passw", user_password);
        registry.register("user.access", user_access);
        registry.register("user.db", user_database_access);
        registry.register("user.whoami", user_whoami);

        registry.register("server.listdb", server_list_databases);
        registry.register("server.newdb", server_new_database);
        registry.register("server.init", server_init);
        registry.register("server.dropdb", server_drop_database);

        registry.register("database.newdir", database_new_dir);
        registry.register("database.newfile", database_new_file);
        registry.register("database.listdir", database_list_dir);
        registry.register("database.rename", database_rename);
        registry.register("database.move", database_move);
        registry.register("database.copy", database_copy);
        registry.register("database.delete", database_delete);
        registry.register("database.info", database_info);
        registry.register("database.makepublic", database_make_public);
        registry.register("database.makeprivate", database_make_private);
        registry.register("database.readfile", database_read_file);
        registry.register("database.updatefile", database_update_file);
        registry.register("database.deletebytes", database_delete_bytes);
        registry.register("database.counter", database_counter);
        registry.register("database.select", database_select);
        registry.register("database.set", database_set);
        registry.register("database.unset", database_unset);

        registry
    }

    /// Adds or replaces the handler for `name`.
    pub fn register(&mut self, name: &str, handler: HandlerFn) {
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<HandlerFn> {
        self.handlers.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

fn mismatch(cmd: &Command) -> DbError {
    DbError::InvalidRequest(format!("invalid arguments for {}", cmd.name))
}

fn ok_true() -> DbResult<Reply> {
    Ok(Reply::Data(Value::Bool(true)))
}

fn require_user(user: Option<&User>) -> DbResult<&User> {
    user.ok_or(DbError::AuthRequired)
}

/// Minutes from a `--duration` option, falling back to `default` and capped
/// at [`MAX_TTL`].
fn ttl_minutes(duration: Option<i64>, default: Duration) -> Duration {
    match duration {
        Some(minutes) if minutes > 0 => minutes
            .checked_mul(60)
            .map(|secs| Duration::from_secs(secs as u64))
            .map_or(MAX_TTL, |ttl| ttl.min(MAX_TTL)),
        _ => default,
    }
}

/// Value stored in the cache under an upload ticket.
#[derive(Debug, Serialize, Deserialize)]
struct TicketData {
    database: String,
    path: String,
}

// Session and transport commands

fn login(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::Login {
        username,
        password,
        duration,
    } = &cmd.action
    else {
        return Err(mismatch(cmd));
    };

    if !engine.backends.auth.authenticate(username, password) {
        tracing::warn!("Failed login for {}", username);
        return Err(DbError::Auth("Authentication failed".to_string()));
    }

    let token = generate_token();
    let ttl = ttl_minutes(*duration, engine.token_ttl);
    engine.backends.state.token_set(&token, username, ttl)?;
    Ok(Reply::Data(Value::String(token)))
}

fn upload_ticket(engine: &Engine, cmd: &Command, user: Option<&User>) -> DbResult<Reply> {
    let Action::UploadTicket { path, duration } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    require_user(user)?;

    engine.vfs().info(&cmd.database, path)?;

    let ticket = generate_token();
    let data = serde_json::to_string(&TicketData {
        database: cmd.database.clone(),
        path: path.clone(),
    })?;
    let ttl = ttl_minutes(*duration, engine.ticket_ttl);
    engine.backends.state.cache_set(&ticket, &data, ttl)?;
    Ok(Reply::Data(Value::String(ticket)))
}

fn write_bytes(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::WriteBytes { ticket, data } = &cmd.action else {
        return Err(mismatch(cmd));
    };

    let raw = engine
        .backends
        .state
        .cache_get(ticket)?
        .ok_or_else(|| DbError::Ticket("Invalid ticket".to_string()))?;
    let target: TicketData = serde_json::from_str(&raw)
        .map_err(|_| DbError::Ticket("Ticket data invalid".to_string()))?;

    let written = engine.vfs().write_bytes(&target.database, &target.path, data)?;
    Ok(Reply::Data(json!(written)))
}

fn read_bytes(engine: &Engine, cmd: &Command, user: Option<&User>) -> DbResult<Reply> {
    let Action::ReadBytes { path } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    require_user(user)?;

    let (data, mime) = engine.vfs().read_bytes(&cmd.database, path)?;
    Ok(Reply::Bytes { data, mime })
}

fn direct_access(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::DirectAccess {
        database,
        path,
        layer,
    } = &cmd.action
    else {
        return Err(mismatch(cmd));
    };

    match engine.vfs().direct_access(database, path, *layer)? {
        DirectContent::Json(content) => Ok(Reply::Data(Value::Object(content))),
        DirectContent::Bytes { data, mime } => Ok(Reply::Bytes { data, mime }),
    }
}

// User administration

fn user_new(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::NewUser { username, password } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    engine.backends.auth.new_user(username, password, false)?;
    ok_true()
}

fn user_all(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::ListUsers { regex } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    let pattern = compile_regex(regex.as_deref().unwrap_or(MATCH_ALL), "i")?;
    let users = engine.backends.auth.list_users(&pattern)?;
    Ok(Reply::Data(json!(users)))
}

fn user_about(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::UserInfo { username } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    let info = engine.backends.auth.user_info(username)?;
    Ok(Reply::Data(serde_json::to_value(info)?))
}

fn user_delete(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::DeleteUser { username } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    engine.backends.auth.remove_user(username)?;
    ok_true()
}

fn user_password(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::ChangePassword { username, password } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    engine.backends.auth.change_password(username, password)?;
    ok_true()
}

fn user_access(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::UserAccess { username, grant } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    engine.backends.auth.change_status(username, *grant)?;
    ok_true()
}

fn user_database_access(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::UserDatabaseAccess {
        username,
        database,
        grant,
    } = &cmd.action
    else {
        return Err(mismatch(cmd));
    };
    engine
        .backends
        .auth
        .change_db_access(username, database, *grant)?;
    ok_true()
}

fn user_whoami(_engine: &Engine, _cmd: &Command, user: Option<&User>) -> DbResult<Reply> {
    let user = require_user(user)?;
    Ok(Reply::Data(json!({
        "username": user.username,
        "databases": user.databases,
        "root": user.root,
    })))
}

// Server administration

fn server_list_databases(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::ListDatabases { regex } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    let databases = engine
        .vfs()
        .list_databases(regex.as_deref().unwrap_or(MATCH_ALL))?;
    Ok(Reply::Data(json!(databases)))
}

fn server_new_database(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::NewDatabase { database } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    engine.vfs().create_database(database)?;
    ok_true()
}

fn server_init(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::InitServer = &cmd.action else {
        return Err(mismatch(cmd));
    };
    engine.vfs().clear_all()?;
    ok_true()
}

fn server_drop_database(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::DropDatabase { database } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    engine.vfs().drop_database(database)?;
    ok_true()
}

// Filesystem

fn database_new_dir(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::NewDir { path } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    engine.vfs().new_dir(&cmd.database, path)?;
    ok_true()
}

fn database_new_file(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::NewFile { path, content } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    engine.vfs().new_file(&cmd.database, path, content.clone())?;
    ok_true()
}

fn database_list_dir(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::ListDir { path, regex } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    let listing = engine
        .vfs()
        .list_dir(&cmd.database, path, regex.as_deref().unwrap_or(MATCH_ALL))?;
    Ok(Reply::Data(listing))
}

fn database_rename(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::Rename { path, name } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    engine.vfs().rename(&cmd.database, path, name)?;
    ok_true()
}

fn database_move(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::Move { path, to, rename } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    engine
        .vfs()
        .move_node(&cmd.database, path, to, rename.as_deref())?;
    ok_true()
}

fn database_copy(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::Copy { path, to, rename } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    engine.vfs().copy(&cmd.database, path, to, rename.as_deref())?;
    ok_true()
}

fn database_delete(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::Delete { path } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    engine.vfs().delete(&cmd.database, path)?;
    ok_true()
}

fn database_info(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::Info { path } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    Ok(Reply::Data(engine.vfs().info(&cmd.database, path)?))
}

fn database_make_public(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::MakePublic { path } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    engine.vfs().set_public(&cmd.database, path, true)?;
    ok_true()
}

fn database_make_private(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::MakePrivate { path } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    engine.vfs().set_public(&cmd.database, path, false)?;
    ok_true()
}

fn database_read_file(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::ReadFile { path, fields } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    Ok(Reply::Data(engine.vfs().read_json(&cmd.database, path, fields)?))
}

fn database_update_file(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::UpdateFile { path, content } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    engine
        .vfs()
        .update_json(&cmd.database, path, content.clone())?;
    ok_true()
}

fn database_delete_bytes(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::DeleteBytes { path } = &cmd.action else {
        return Err(mismatch(cmd));
    };
    engine.vfs().delete_bytes(&cmd.database, path)?;
    ok_true()
}

fn database_counter(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    match &cmd.action {
        Action::Counter {
            name,
            action,
            value,
        } => {
            let current = engine
                .vfs()
                .set_counter(&cmd.database, name, *action, *value)?;
            Ok(Reply::Data(json!(current)))
        }
        Action::ListCounters { regex } => {
            let counters = engine
                .vfs()
                .list_counters(&cmd.database, regex.as_deref().unwrap_or(MATCH_ALL))?;
            Ok(Reply::Data(counters))
        }
        _ => Err(mismatch(cmd)),
    }
}

// BQL queries

fn database_select(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::Select(query) = &cmd.action else {
        return Err(mismatch(cmd));
    };
    Ok(Reply::Data(engine.vfs().select(&cmd.database, query)?))
}

fn database_set(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::Set(query) = &cmd.action else {
        return Err(mismatch(cmd));
    };
    let updated = engine.vfs().set(&cmd.database, query)?;
    Ok(Reply::Data(json!(updated)))
}

fn database_unset(engine: &Engine, cmd: &Command, _user: Option<&User>) -> DbResult<Reply> {
    let Action::Unset(query) = &cmd.action else {
        return Err(mismatch(cmd));
    };
    let updated = engine.vfs().unset(&cmd.database, query)?;
    Ok(Reply::Data(json!(updated)))
}
