//! Common test utilities for engine, pool and HTTP tests
//!
//! Provides shared helpers for:
//! - Building engines over the memory or RocksDB backends
//! - Logging in and running scripts
//! - Encoding form bodies

#![allow(dead_code)]

use bytengine::router::{Backends, Engine, Reply};
use bytengine::storage::{MemoryByteStore, MemoryNodeStore, RocksStore};
use bytengine::{MemoryAuth, MemoryStateStore, Vfs};
use bql_core::{Action, Command};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;

pub const ADMIN: &str = "admin";
pub const ADMIN_PASSWORD: &str = "password1";

pub fn memory_backends() -> Backends {
    Backends {
        auth: Arc::new(MemoryAuth::new()),
        vfs: Vfs::new(Arc::new(MemoryNodeStore::new()), Arc::new(MemoryByteStore::new())),
        state: Arc::new(MemoryStateStore::new()),
    }
}

pub fn rocks_backends() -> (Backends, TempDir) {
    let tmp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = RocksStore::open(tmp_dir.path()).expect("Failed to open rocksdb store");
    (rocks_backends_at(store), tmp_dir)
}

/// Backends whose content and accounts both live in `store`.
pub fn rocks_backends_at(store: RocksStore) -> Backends {
    Backends {
        auth: Arc::new(store.clone()),
        vfs: Vfs::new(Arc::new(store.clone()), Arc::new(store)),
        state: Arc::new(MemoryStateStore::new()),
    }
}

/// Engine with a root account, returning a session token for it.
pub fn admin_engine(backends: Backends) -> (Engine, String) {
    let engine = Engine::standard(backends);
    engine.create_admin_user(ADMIN, ADMIN_PASSWORD).unwrap();
    let token = login(&engine, ADMIN, ADMIN_PASSWORD);
    (engine, token)
}

pub fn login_command(username: &str, password: &str) -> Command {
    Command::new(
        "login",
        Action::Login {
            username: username.to_string(),
            password: password.to_string(),
            duration: None,
        },
    )
}

pub fn login(engine: &Engine, username: &str, password: &str) -> String {
    match engine
        .execute_command("", &login_command(username, password))
        .unwrap()
    {
        Reply::Data(Value::String(token)) => token,
        other => panic!("unexpected login reply: {:?}", other),
    }
}

/// Runs a script, panicking with the error message on failure.
pub fn run(engine: &Engine, token: &str, script: &str) -> Value {
    match engine.execute_script(token, script) {
        Ok(value) => value,
        Err(e) => panic!("script {:?} failed: {}", script, e),
    }
}

/// Runs a script that must fail and returns its error message.
pub fn run_err(engine: &Engine, token: &str, script: &str) -> String {
    match engine.execute_script(token, script) {
        Ok(value) => panic!("script {:?} unexpectedly succeeded: {}", script, value),
        Err(e) => e.to_string(),
    }
}

/// `application/x-www-form-urlencoded` body from key/value pairs.
pub fn form(pairs: &[(&str, &str)]) -> String {
    serde_urlencoded::to_string(pairs).expect("form pairs always encode")
}
