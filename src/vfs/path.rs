//! Slash-separated path helpers and node name grammars.
//!
//! Paths are lexical only: `clean` resolves `.`/`..` and duplicate slashes
//! without touching storage.

use crate::error::{DbError, DbResult};
use once_cell::sync::Lazy;
use regex::Regex;

static DIR_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_\-]*$").expect("valid directory regex"));
static FILE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9_\-]*(\.[a-zA-Z0-9]+)*$").expect("valid file regex")
});
static DB_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]{1,20}$").expect("valid database regex"));
static COUNTER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_\.\-]+$").expect("valid counter regex"));

/// Lexically normalises a path. Rooted paths stay rooted; an empty path
/// becomes `.`.
pub fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Joins path elements and cleans the result; empty elements are ignored.
pub fn join(base: &str, name: &str) -> String {
    match (base.is_empty(), name.is_empty()) {
        (true, true) => String::new(),
        (true, false) => clean(name),
        (false, true) => clean(base),
        (false, false) => clean(&format!("{}/{}", base, name)),
    }
}

/// Everything but the last element, cleaned. `dir("/a")` is `/`.
pub fn dir(path: &str) -> String {
    let head = match path.rfind('/') {
        Some(index) => &path[..=index],
        None => "",
    };
    clean(head)
}

/// Last element with trailing slashes removed. `base("/")` is `/`.
pub fn base(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    match trimmed.rfind('/') {
        Some(index) => trimmed[index + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

pub fn validate_dir_name(name: &str) -> DbResult<()> {
    if DIR_NAME.is_match(name) {
        Ok(())
    } else {
        Err(DbError::validation(format!("directory name '{}' isn't valid.", name)))
    }
}

pub fn validate_file_name(name: &str) -> DbResult<()> {
    if FILE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(DbError::validation(format!("file name '{}' isn't valid.", name)))
    }
}

/// Database names are checked case-insensitively.
pub fn validate_database_name(name: &str) -> DbResult<()> {
    if DB_NAME.is_match(&name.to_lowercase()) {
        Ok(())
    } else {
        Err(DbError::validation(format!("database name '{}' isn't valid.", name)))
    }
}

pub fn validate_counter_name(name: &str) -> DbResult<()> {
    if COUNTER_NAME.is_match(name) {
        Ok(())
    } else {
        Err(DbError::validation(format!("counter name '{}' isn't valid.", name)))
    }
}
