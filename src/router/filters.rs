//! Named output filters applied with `>> name`.

use super::{ok_envelope, Reply};
use crate::error::DbResult;
use serde_json::Value;
use std::collections::HashMap;

pub type FilterFn = fn(Reply) -> DbResult<Reply>;

#[derive(Debug, Clone, Default)]
pub struct FilterRegistry {
    filters: HashMap<String, FilterFn>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in filters.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register("pretty", pretty);
        registry
    }

    /// Adds or replaces a filter.
    pub fn register(&mut self, name: &str, filter: FilterFn) {
        self.filters.insert(name.to_string(), filter);
    }

    pub fn get(&self, name: &str) -> Option<FilterFn> {
        self.filters.get(name).copied()
    }
}

/// Indented JSON text of the success envelope around the reply.
fn pretty(reply: Reply) -> DbResult<Reply> {
    let text = serde_json::to_string_pretty(&ok_envelope(reply.into_value()))?;
    Ok(Reply::Data(Value::String(text)))
}
