//! Virtual filesystem over the flat node collection.
//!
//! Hierarchy is expressed only through each node's `parent` path string, so
//! every cascade (rename, move, copy, delete, access changes) is a
//! parent-prefix query followed by bulk updates. Cascades are not
//! transactional: a failing step leaves earlier steps applied.

pub mod path;
pub mod query;

use crate::error::{DbError, DbResult};
use crate::storage::filter::{compile_regex, HeaderChange, NodeFilter, NodeUpdate, NAME_FIELD};
use crate::storage::{BytesHeader, ByteStore, Node, NodeStore};
use bql_core::{AccessLayer, CounterAction};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Payload returned for anonymous reads of public files.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectContent {
    Json(Map<String, Value>),
    Bytes { data: Vec<u8>, mime: String },
}

#[derive(Clone)]
pub struct Vfs {
    nodes: Arc<dyn NodeStore>,
    blobs: Arc<dyn ByteStore>,
}

impl std::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vfs").finish_non_exhaustive()
    }
}

fn path_missing(path: &str) -> DbError {
    DbError::not_found(format!("path '{}' doesn't exist.", path))
}

fn files_only_error() -> DbError {
    DbError::validation("command only valid for files.")
}

impl Vfs {
    pub fn new(nodes: Arc<dyn NodeStore>, blobs: Arc<dyn ByteStore>) -> Self {
        Self { nodes, blobs }
    }

    pub fn node_store(&self) -> &Arc<dyn NodeStore> {
        &self.nodes
    }

    pub fn byte_store(&self) -> &Arc<dyn ByteStore> {
        &self.blobs
    }

    fn find_at(&self, db: &str, path: &str) -> DbResult<Option<Node>> {
        self.nodes.find_one(db, &NodeFilter::new().at_path(path))
    }

    fn node_at(&self, db: &str, path: &str) -> DbResult<Node> {
        self.find_at(db, path)?.ok_or_else(|| path_missing(path))
    }

    fn exists(&self, db: &str, path: &str) -> DbResult<bool> {
        Ok(self.nodes.count(db, &NodeFilter::new().at_path(path))? > 0)
    }

    fn update_node(&self, db: &str, node: &Node, update: NodeUpdate) -> DbResult<()> {
        self.nodes.update_many(db, &NodeFilter::new().id(&node.id), &update)?;
        Ok(())
    }

    /// Rewrites the parent string of every descendant of `from`, replacing
    /// the first occurrence of `from` with `to`. One bulk update per distinct
    /// parent.
    fn cascade_parents(&self, db: &str, from: &str, to: &str) -> DbResult<()> {
        let descendants = self.nodes.find(db, &NodeFilter::new().descendants_of(from)?)?;
        let parents: BTreeSet<String> = descendants
            .into_iter()
            .map(|node| node.header.parent)
            .collect();
        for parent in parents {
            let replaced = parent.replacen(from, to, 1);
            self.nodes.update_many(
                db,
                &NodeFilter::new().parent(&parent),
                &NodeUpdate::new().header(HeaderChange::Parent(replaced)),
            )?;
        }
        Ok(())
    }

    // Databases

    pub fn list_databases(&self, regex: &str) -> DbResult<Vec<String>> {
        let pattern = regex::Regex::new(regex)?;
        Ok(self
            .nodes
            .list_databases()?
            .into_iter()
            .filter(|name| pattern.is_match(name))
            .collect())
    }

    pub fn create_database(&self, db: &str) -> DbResult<()> {
        path::validate_database_name(db)?;
        if self.nodes.database_exists(db)? {
            return Err(DbError::validation(format!("database '{}' already exists", db)));
        }
        self.nodes.create_database(db)?;
        self.nodes.insert(db, Node::root())?;
        tracing::info!("Created database '{}'", db);
        Ok(())
    }

    pub fn drop_database(&self, db: &str) -> DbResult<()> {
        if !self.nodes.database_exists(db)? {
            return Err(DbError::not_found(format!("database '{}' doesn't exist", db)));
        }
        self.nodes.drop_database(db)?;
        self.blobs.drop_database(db)?;
        tracing::info!("Dropped database '{}'", db);
        Ok(())
    }

    /// Drops every database and its attachments; returns the dropped names.
    pub fn clear_all(&self) -> DbResult<Vec<String>> {
        let dropped = self.nodes.clear_all()?;
        for db in &dropped {
            self.blobs.drop_database(db)?;
        }
        tracing::info!("Cleared {} database(s)", dropped.len());
        Ok(dropped)
    }

    // Nodes

    pub fn new_dir(&self, db: &str, path: &str) -> DbResult<()> {
        let path = path::clean(path);
        if path == "/" {
            return Err(DbError::validation("root directory already exists"));
        }
        let name = path::base(&path);
        let parent = path::dir(&path);
        path::validate_dir_name(&name)?;

        let parent_node = self
            .find_at(db, &parent)?
            .ok_or_else(|| DbError::not_found("destination directory not found"))?;
        if !parent_node.is_dir() {
            return Err(DbError::validation(format!(
                "directory '{}' couldn't be created: destination isn't a directory.",
                path
            )));
        }
        if self.exists(db, &path)? {
            return Err(DbError::validation(format!("directory '{}' already exists", path)));
        }
        self.nodes.insert(db, Node::directory(name, parent))
    }

    pub fn new_file(&self, db: &str, path: &str, content: Map<String, Value>) -> DbResult<()> {
        let path = path::clean(path);
        let name = path::base(&path);
        let parent = path::dir(&path);
        path::validate_file_name(&name)?;

        let parent_node = self
            .find_at(db, &parent)?
            .ok_or_else(|| DbError::not_found("destination directory not found"))?;
        if !parent_node.is_dir() {
            return Err(DbError::validation("destination isn't a directory"));
        }
        if self.exists(db, &path)? {
            return Err(DbError::validation(format!("file '{}' already exists", path)));
        }
        self.nodes.insert(db, Node::file(name, parent, content))
    }

    /// Children of a directory split into `dirs`, `files` and `bfiles`
    /// (files carrying an attachment), each sorted by name.
    pub fn list_dir(&self, db: &str, path: &str, regex: &str) -> DbResult<Value> {
        let path = path::clean(path);
        if self.nodes.count(db, &NodeFilter::new().at_path(&path))? != 1 {
            return Err(path_missing(&path));
        }

        let filter = NodeFilter::new()
            .parent(&path)
            .matches(NAME_FIELD, compile_regex(regex, "i")?);
        let mut children = self.nodes.find(db, &filter)?;
        children.sort_by(|a, b| a.header.name.cmp(&b.header.name));

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut bfiles = Vec::new();
        for child in children {
            let name = child.header.name.clone();
            if child.is_dir() {
                dirs.push(name);
            } else if child.has_attachment() {
                bfiles.push(name);
            } else {
                files.push(name);
            }
        }
        Ok(json!({"dirs": dirs, "files": files, "bfiles": bfiles}))
    }

    /// JSON content of a file, optionally projected to the given dotted fields.
    pub fn read_json(&self, db: &str, path: &str, fields: &[String]) -> DbResult<Value> {
        let path = path::clean(path);
        let node = self
            .nodes
            .find_one(db, &NodeFilter::new().at_path(&path).files_only())?
            .ok_or_else(|| DbError::not_found(format!("file '{}' not found", path)))?;
        if fields.is_empty() {
            return Ok(Value::Object(node.content));
        }
        Ok(Value::Object(query::project(&node.content, fields)))
    }

    pub fn update_json(&self, db: &str, path: &str, content: Map<String, Value>) -> DbResult<()> {
        let path = path::clean(path);
        let updated = self.nodes.update_many(
            db,
            &NodeFilter::new().at_path(&path).files_only(),
            &NodeUpdate::new().header(HeaderChange::Content(content)),
        )?;
        if updated == 0 {
            return Err(DbError::not_found(format!("file '{}' not found", path)));
        }
        Ok(())
    }

    pub fn delete(&self, db: &str, path: &str) -> DbResult<()> {
        let path = path::clean(path);
        if path == "/" {
            return Err(DbError::validation("root directory cannot be deleted."));
        }
        let node = self.node_at(db, &path)?;

        if node.is_dir() {
            let descendants = NodeFilter::new().descendants_of(&path)?;
            let pointers: Vec<String> = self
                .nodes
                .find(db, &descendants)?
                .into_iter()
                .filter(|child| child.is_file() && child.has_attachment())
                .map(|child| child.bytes.filepointer)
                .collect();
            self.nodes.delete_many(db, &descendants)?;
            for pointer in &pointers {
                self.blobs.delete(db, pointer)?;
            }
        } else if node.has_attachment() {
            self.blobs.delete(db, &node.bytes.filepointer)?;
        }

        self.nodes.delete_many(db, &NodeFilter::new().id(&node.id))?;
        Ok(())
    }

    pub fn rename(&self, db: &str, path: &str, name: &str) -> DbResult<()> {
        let path = path::clean(path);
        if path == "/" {
            return Err(DbError::validation("root directory cannot be renamed."));
        }
        let node = self.node_at(db, &path)?;
        let kind = if node.is_dir() {
            path::validate_dir_name(name)?;
            "directory"
        } else {
            path::validate_file_name(name)?;
            "file"
        };

        let new_path = path::join(&path::dir(&path), name);
        if self.exists(db, &new_path)? {
            return Err(DbError::validation(format!("{} '{}' already exists", kind, new_path)));
        }
        if node.is_dir() {
            self.cascade_parents(db, &path, &new_path)?;
        }
        self.update_node(db, &node, NodeUpdate::new().header(HeaderChange::Name(name.to_string())))
    }

    /// Moves `from` into the directory `to`, optionally under a new name.
    pub fn move_node(&self, db: &str, from: &str, to: &str, rename: Option<&str>) -> DbResult<()> {
        let from = path::clean(from);
        let to = path::clean(to);
        if from == "/" {
            return Err(DbError::validation("root directory cannot be moved."));
        }
        // Literal prefix test: `/ab` counts as inside `/a`.
        if to.starts_with(&from) {
            return Err(DbError::validation("illegal move operation."));
        }

        let destination = self
            .find_at(db, &to)?
            .ok_or_else(|| DbError::not_found("Destination directory doesn't exist"))?;
        if !destination.is_dir() {
            return Err(DbError::validation("Destination must be a directory"));
        }
        let node = self.node_at(db, &from)?;

        let name = match rename {
            Some(name) => {
                if node.is_dir() {
                    path::validate_dir_name(name)?;
                } else {
                    path::validate_file_name(name)?;
                }
                name.to_string()
            }
            None => path::base(&from),
        };
        let new_path = path::join(&to, &name);
        let kind = if node.is_dir() { "directory" } else { "file" };
        if self.exists(db, &new_path)? {
            return Err(DbError::validation(format!("{} '{}' already exists", kind, new_path)));
        }

        if node.is_dir() {
            self.cascade_parents(db, &from, &new_path)?;
        }
        let mut update = NodeUpdate::new().header(HeaderChange::Parent(to));
        if rename.is_some() {
            update = update.header(HeaderChange::Name(name));
        }
        self.update_node(db, &node, update)
    }

    /// Copies `from` to the full destination path `to`, or to `to/<rename>`
    /// when a new name is given. Attachments are duplicated.
    pub fn copy(&self, db: &str, from: &str, to: &str, rename: Option<&str>) -> DbResult<()> {
        let from = path::clean(from);
        let from_parent = path::dir(&from);
        let to = match rename {
            Some(name) => path::join(to, name),
            None => path::clean(to),
        };
        let to_parent = path::dir(&to);
        let to_name = path::base(&to);

        if from == "/" {
            return Err(DbError::validation("root directory cannot be copied."));
        }
        if to_parent.starts_with(&from) {
            return Err(DbError::validation("illegal copy operation."));
        }

        let destination = self
            .find_at(db, &to_parent)?
            .ok_or_else(|| DbError::not_found("Destination directory doesn't exist"))?;
        if !destination.is_dir() {
            return Err(DbError::validation("Destination must be a directory"));
        }
        let source = self
            .find_at(db, &from)?
            .ok_or_else(|| DbError::not_found(format!("'{}' doesn't exist", from)))?;
        if self.exists(db, &to)? {
            return Err(DbError::validation(format!("'{}' already exists.", to)));
        }

        if source.is_dir() {
            path::validate_dir_name(&to_name)?;
        } else {
            path::validate_file_name(&to_name)?;
        }
        self.copy_node(db, &source, &from_parent, &to_parent, Some(&to_name))?;
        if source.is_file() {
            return Ok(());
        }

        let descendants = NodeFilter::new().descendants_of(&from)?;
        for child in self.nodes.find(db, &descendants.clone().dirs_only())? {
            self.copy_node(db, &child, &from, &to, None)?;
        }
        for child in self.nodes.find(db, &descendants.files_only())? {
            self.copy_node(db, &child, &from, &to, None)?;
        }
        Ok(())
    }

    fn copy_node(
        &self,
        db: &str,
        node: &Node,
        old_prefix: &str,
        new_prefix: &str,
        name: Option<&str>,
    ) -> DbResult<()> {
        let mut copy = node.duplicate();
        copy.header.parent = node.header.parent.replacen(old_prefix, new_prefix, 1);
        if let Some(name) = name {
            copy.header.name = name.to_string();
        }
        if node.has_attachment() {
            copy.bytes.filepointer = self.blobs.copy(db, &node.bytes.filepointer)?;
        }
        self.nodes.insert(db, copy)
    }

    pub fn info(&self, db: &str, path: &str) -> DbResult<Value> {
        let path = path::clean(path);
        let node = self.node_at(db, &path)?;
        let mut info = Map::new();
        info.insert("name".to_string(), json!(node.header.name));
        info.insert("created".to_string(), json!(node.header.created));
        info.insert("public".to_string(), json!(node.header.ispublic));
        info.insert("parent".to_string(), json!(node.header.parent));

        if node.is_dir() {
            let children = self.nodes.count(db, &NodeFilter::new().parent(&path))?;
            info.insert("type".to_string(), json!("directory"));
            info.insert("content_count".to_string(), json!(children));
        } else {
            info.insert("type".to_string(), json!("file"));
            if node.has_attachment() {
                info.insert("attachment".to_string(), json!(true));
            }
        }
        Ok(Value::Object(info))
    }

    /// Sets the public flag; directories cascade to every descendant.
    pub fn set_public(&self, db: &str, path: &str, public: bool) -> DbResult<()> {
        let path = path::clean(path);
        let node = self.node_at(db, &path)?;
        self.update_node(db, &node, NodeUpdate::new().header(HeaderChange::Public(public)))?;
        if node.is_dir() {
            self.nodes.update_many(
                db,
                &NodeFilter::new().descendants_of(&path)?,
                &NodeUpdate::new().header(HeaderChange::Public(public)),
            )?;
        }
        Ok(())
    }

    // Attachments

    /// Stores `data` as the file's attachment; returns the number of bytes written.
    pub fn write_bytes(&self, db: &str, path: &str, data: &[u8]) -> DbResult<u64> {
        let path = path::clean(path);
        let node = self.node_at(db, &path)?;
        if node.is_dir() {
            return Err(files_only_error());
        }

        let bytes = if node.has_attachment() {
            let info = self.blobs.update(db, &node.bytes.filepointer, data)?;
            BytesHeader {
                filepointer: node.bytes.filepointer.clone(),
                mime: info.mime,
                size: info.size,
            }
        } else {
            let info = self.blobs.add(db, data)?;
            BytesHeader {
                filepointer: info.pointer,
                mime: info.mime,
                size: info.size,
            }
        };
        let size = bytes.size;
        self.update_node(db, &node, NodeUpdate::new().header(HeaderChange::Bytes(bytes)))?;
        Ok(size)
    }

    /// Attachment bytes and MIME type of a file.
    pub fn read_bytes(&self, db: &str, path: &str) -> DbResult<(Vec<u8>, String)> {
        let path = path::clean(path);
        let node = self.node_at(db, &path)?;
        if node.is_dir() {
            return Err(files_only_error());
        }
        if !node.has_attachment() {
            return Err(DbError::not_found("byte layer is empty"));
        }
        let data = self.blobs.read(db, &node.bytes.filepointer)?;
        Ok((data, node.bytes.mime))
    }

    pub fn delete_bytes(&self, db: &str, path: &str) -> DbResult<()> {
        let path = path::clean(path);
        let node = self.node_at(db, &path)?;
        if node.is_dir() {
            return Err(files_only_error());
        }
        if node.has_attachment() {
            self.blobs.delete(db, &node.bytes.filepointer)?;
        }
        self.update_node(db, &node, NodeUpdate::new().header(HeaderChange::Pointer(String::new())))
    }

    /// Reads a public file without authentication.
    pub fn direct_access(&self, db: &str, path: &str, layer: AccessLayer) -> DbResult<DirectContent> {
        let path = path::clean(path);
        let node = self
            .find_at(db, &path)?
            .ok_or_else(|| DbError::not_found("file not found"))?;
        if node.is_dir() {
            return Err(files_only_error());
        }
        if !node.header.ispublic {
            return Err(DbError::validation("file isn't public"));
        }
        match layer {
            AccessLayer::Json => Ok(DirectContent::Json(node.content)),
            AccessLayer::Bytes => {
                if !node.has_attachment() {
                    return Err(DbError::not_found("byte layer is empty"));
                }
                let data = self.blobs.read(db, &node.bytes.filepointer)?;
                Ok(DirectContent::Bytes {
                    data,
                    mime: node.bytes.mime,
                })
            }
        }
    }

    // Counters

    /// Find-or-create. The magnitude of `value` is used regardless of its sign.
    pub fn set_counter(&self, db: &str, name: &str, action: CounterAction, value: i64) -> DbResult<i64> {
        let value = value.saturating_abs();
        if let Some(current) = self.nodes.counter_apply(db, name, action, value)? {
            return Ok(current);
        }
        path::validate_counter_name(name)?;
        self.nodes.counter_create(db, name, action, value)
    }

    pub fn list_counters(&self, db: &str, regex: &str) -> DbResult<Value> {
        let counters = self.nodes.counter_list(db, &compile_regex(regex, "i")?)?;
        let map: Map<String, Value> = counters
            .into_iter()
            .map(|(name, value)| (name, json!(value)))
            .collect();
        Ok(Value::Object(map))
    }
}
