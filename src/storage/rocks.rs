use super::blob::{blob_not_found, new_pointer, sniff_mime, BlobInfo, ByteStore};
use super::filter::{NodeFilter, NodeUpdate};
use super::node::Node;
use super::store::{apply_counter, database_missing, NodeStore};
use crate::auth::{Account, AccountStore};
use crate::error::{DbError, DbResult};
use bql_core::CounterAction;
use parking_lot::RwLock;
use regex::Regex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Column family prefix for content databases.
const DB_CF_PREFIX: &str = "db_";
/// Column family holding every attachment.
const BLOB_CF: &str = "_blobs";
/// Column family holding user accounts, keyed by username.
const AUTH_CF: &str = "_auth";
const NODE_PREFIX: &str = "node:";
const COUNTER_PREFIX: &str = "counter:";
const CHUNK_SIZE: usize = 256 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct BlobMeta {
    size: u64,
    mime: String,
    chunks: u32,
}

/// RocksDB-backed node, attachment and account storage sharing one database
/// handle. Each content database is a column family; attachments live chunked
/// in their own column family and accounts in another.
#[derive(Clone)]
pub struct RocksStore {
    db: Arc<RwLock<DB>>,
    path: PathBuf,
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.path)
            .finish()
    }
}

fn cf_name(db: &str) -> String {
    format!("{}{}", DB_CF_PREFIX, db)
}

fn node_key(id: &str) -> String {
    format!("{}{}", NODE_PREFIX, id)
}

fn counter_key(name: &str) -> String {
    format!("{}{}", COUNTER_PREFIX, name)
}

fn chunk_key(pointer: &str, index: u32) -> String {
    format!("{}/{:08}", pointer, index)
}

fn database_cf<'a>(db: &'a DB, name: &str) -> DbResult<&'a ColumnFamily> {
    db.cf_handle(&cf_name(name)).ok_or_else(|| database_missing(name))
}

fn blob_cf(db: &DB) -> DbResult<&ColumnFamily> {
    db.cf_handle(BLOB_CF)
        .ok_or_else(|| DbError::backend("blob column family is missing"))
}

fn auth_cf(db: &DB) -> DbResult<&ColumnFamily> {
    db.cf_handle(AUTH_CF)
        .ok_or_else(|| DbError::backend("account column family is missing"))
}

fn read_account(db: &DB, cf: &ColumnFamily, username: &str) -> DbResult<Option<Account>> {
    match db.get_cf(cf, username)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Every `(key, value)` pair whose key starts with `prefix`.
fn scan_prefix(db: &DB, cf: &ColumnFamily, prefix: &[u8]) -> DbResult<Vec<(Box<[u8]>, Box<[u8]>)>> {
    let mut entries = Vec::new();
    for item in db.prefix_iterator_cf(cf, prefix) {
        let (key, value) = item?;
        if !key.starts_with(prefix) {
            break;
        }
        entries.push((key, value));
    }
    Ok(entries)
}

fn load_nodes(db: &DB, cf: &ColumnFamily) -> DbResult<Vec<(Box<[u8]>, Node)>> {
    scan_prefix(db, cf, NODE_PREFIX.as_bytes())?
        .into_iter()
        .map(|(key, value)| Ok((key, Node::decode(&value)?)))
        .collect()
}

fn decode_counter(bytes: &[u8]) -> DbResult<i64> {
    String::from_utf8_lossy(bytes)
        .parse::<i64>()
        .map_err(|e| DbError::backend(format!("corrupt counter value: {}", e)))
}

impl RocksStore {
    pub fn open<P: AsRef<Path>>(data_dir: P) -> DbResult<Self> {
        let path = data_dir.as_ref().to_path_buf();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_keep_log_file_num(5);

        let mut cf_names = match DB::list_cf(&opts, &path) {
            Ok(cfs) => cfs,
            Err(_) => vec!["default".to_string()],
        };
        for system_cf in [BLOB_CF, AUTH_CF] {
            if !cf_names.iter().any(|name| name == system_cf) {
                cf_names.push(system_cf.to_string());
            }
        }

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = cf_names
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)
            .map_err(|e| DbError::backend(format!("Failed to open RocksDB: {}", e)))?;

        tracing::info!("Opened RocksDB store at {}", path.display());
        Ok(Self {
            db: Arc::new(RwLock::new(db)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes every column family's memtable to disk.
    pub fn flush(&self) -> DbResult<()> {
        let db = self.db.read();
        for name in DB::list_cf(&Options::default(), &self.path)? {
            if let Some(cf) = db.cf_handle(&name) {
                db.flush_cf(cf)?;
            }
        }
        Ok(())
    }

    fn write_chunks(&self, batch: &mut WriteBatch, db: &DB, pointer: &str, data: &[u8]) -> DbResult<BlobInfo> {
        let cf = blob_cf(db)?;
        for (key, _) in scan_prefix(db, cf, format!("{}/", pointer).as_bytes())? {
            batch.delete_cf(cf, key);
        }
        let mut chunks = 0u32;
        for (index, chunk) in data.chunks(CHUNK_SIZE).enumerate() {
            batch.put_cf(cf, chunk_key(pointer, index as u32), chunk);
            chunks += 1;
        }
        let meta = BlobMeta {
            size: data.len() as u64,
            mime: sniff_mime(data),
            chunks,
        };
        batch.put_cf(cf, pointer, serde_json::to_vec(&meta)?);
        Ok(BlobInfo {
            pointer: pointer.to_string(),
            size: meta.size,
            mime: meta.mime,
        })
    }
}

impl NodeStore for RocksStore {
    fn create_database(&self, db: &str) -> DbResult<()> {
        let mut handle = self.db.write();
        let name = cf_name(db);
        if handle.cf_handle(&name).is_some() {
            return Ok(());
        }
        handle.create_cf(&name, &Options::default())?;
        Ok(())
    }

    fn drop_database(&self, db: &str) -> DbResult<()> {
        let mut handle = self.db.write();
        let name = cf_name(db);
        if handle.cf_handle(&name).is_none() {
            return Err(database_missing(db));
        }
        handle.drop_cf(&name)?;
        Ok(())
    }

    fn database_exists(&self, db: &str) -> DbResult<bool> {
        Ok(self.db.read().cf_handle(&cf_name(db)).is_some())
    }

    fn list_databases(&self) -> DbResult<Vec<String>> {
        let handle = self.db.read();
        let mut names: Vec<String> = DB::list_cf(&Options::default(), &self.path)?
            .into_iter()
            .filter_map(|cf| cf.strip_prefix(DB_CF_PREFIX).map(str::to_string))
            // Families dropped in this session stay listed until reopen.
            .filter(|name| handle.cf_handle(&cf_name(name)).is_some())
            .collect();
        names.sort();
        Ok(names)
    }

    fn clear_all(&self) -> DbResult<Vec<String>> {
        let names = self.list_databases()?;
        let mut handle = self.db.write();
        for name in &names {
            handle.drop_cf(&cf_name(name))?;
        }
        Ok(names)
    }

    fn find(&self, db: &str, filter: &NodeFilter) -> DbResult<Vec<Node>> {
        let handle = self.db.read();
        let cf = database_cf(&handle, db)?;
        let mut found = Vec::new();
        for (_, node) in load_nodes(&handle, cf)? {
            if filter.matches_node(&node)? {
                found.push(node);
            }
        }
        Ok(found)
    }

    fn insert(&self, db: &str, node: Node) -> DbResult<()> {
        let handle = self.db.read();
        let cf = database_cf(&handle, db)?;
        handle.put_cf(cf, node_key(&node.id), node.encode()?)?;
        Ok(())
    }

    fn update_many(&self, db: &str, filter: &NodeFilter, update: &NodeUpdate) -> DbResult<usize> {
        let handle = self.db.write();
        let cf = database_cf(&handle, db)?;
        let mut batch = WriteBatch::default();
        let mut updated = 0;
        for (key, mut node) in load_nodes(&handle, cf)? {
            if filter.matches_node(&node)? {
                update.apply(&mut node)?;
                batch.put_cf(cf, key, node.encode()?);
                updated += 1;
            }
        }
        handle.write(batch)?;
        Ok(updated)
    }

    fn delete_many(&self, db: &str, filter: &NodeFilter) -> DbResult<usize> {
        let handle = self.db.write();
        let cf = database_cf(&handle, db)?;
        let mut batch = WriteBatch::default();
        let mut removed = 0;
        for (key, node) in load_nodes(&handle, cf)? {
            if filter.matches_node(&node)? {
                batch.delete_cf(cf, key);
                removed += 1;
            }
        }
        handle.write(batch)?;
        Ok(removed)
    }

    fn counter_apply(
        &self,
        db: &str,
        name: &str,
        action: CounterAction,
        value: i64,
    ) -> DbResult<Option<i64>> {
        // The write guard serialises read-modify-write cycles.
        let handle = self.db.write();
        let cf = database_cf(&handle, db)?;
        let key = counter_key(name);
        let Some(bytes) = handle.get_cf(cf, &key)? else {
            return Ok(None);
        };
        let next = apply_counter(decode_counter(&bytes)?, action, value);
        handle.put_cf(cf, &key, next.to_string())?;
        Ok(Some(next))
    }

    fn counter_create(
        &self,
        db: &str,
        name: &str,
        action: CounterAction,
        value: i64,
    ) -> DbResult<i64> {
        let handle = self.db.write();
        let cf = database_cf(&handle, db)?;
        let key = counter_key(name);
        let next = match handle.get_cf(cf, &key)? {
            Some(bytes) => apply_counter(decode_counter(&bytes)?, action, value),
            None => value,
        };
        handle.put_cf(cf, &key, next.to_string())?;
        Ok(next)
    }

    fn counter_list(&self, db: &str, regex: &Regex) -> DbResult<Vec<(String, i64)>> {
        let handle = self.db.read();
        let cf = database_cf(&handle, db)?;
        let mut counters = Vec::new();
        for (key, value) in scan_prefix(&handle, cf, COUNTER_PREFIX.as_bytes())? {
            let name = String::from_utf8_lossy(&key[COUNTER_PREFIX.len()..]).to_string();
            if regex.is_match(&name) {
                counters.push((name, decode_counter(&value)?));
            }
        }
        Ok(counters)
    }
}

impl ByteStore for RocksStore {
    fn add(&self, db: &str, data: &[u8]) -> DbResult<BlobInfo> {
        self.update(db, &new_pointer(db), data)
    }

    fn update(&self, _db: &str, pointer: &str, data: &[u8]) -> DbResult<BlobInfo> {
        let handle = self.db.write();
        let mut batch = WriteBatch::default();
        let info = self.write_chunks(&mut batch, &handle, pointer, data)?;
        handle.write(batch)?;
        Ok(info)
    }

    fn delete(&self, _db: &str, pointer: &str) -> DbResult<()> {
        let handle = self.db.write();
        let cf = blob_cf(&handle)?;
        let mut batch = WriteBatch::default();
        for (key, _) in scan_prefix(&handle, cf, format!("{}/", pointer).as_bytes())? {
            batch.delete_cf(cf, key);
        }
        batch.delete_cf(cf, pointer);
        handle.write(batch)?;
        Ok(())
    }

    fn read(&self, _db: &str, pointer: &str) -> DbResult<Vec<u8>> {
        let handle = self.db.read();
        let cf = blob_cf(&handle)?;
        let meta_bytes = handle
            .get_cf(cf, pointer)?
            .ok_or_else(|| blob_not_found(pointer))?;
        let meta: BlobMeta = serde_json::from_slice(&meta_bytes)?;

        let mut data = Vec::with_capacity(meta.size as usize);
        for index in 0..meta.chunks {
            let chunk = handle
                .get_cf(cf, chunk_key(pointer, index))?
                .ok_or_else(|| DbError::backend(format!("attachment '{}' is truncated", pointer)))?;
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }

    fn copy(&self, db: &str, pointer: &str) -> DbResult<String> {
        let data = self.read(db, pointer)?;
        Ok(self.add(db, &data)?.pointer)
    }

    fn drop_database(&self, db: &str) -> DbResult<()> {
        let handle = self.db.write();
        let cf = blob_cf(&handle)?;
        let mut batch = WriteBatch::default();
        for (key, _) in scan_prefix(&handle, cf, format!("{}-", db).as_bytes())? {
            batch.delete_cf(cf, key);
        }
        handle.write(batch)?;
        Ok(())
    }
}

impl AccountStore for RocksStore {
    fn account(&self, username: &str) -> DbResult<Option<Account>> {
        let handle = self.db.read();
        read_account(&handle, auth_cf(&handle)?, username)
    }

    fn insert_account(&self, account: Account) -> DbResult<bool> {
        let handle = self.db.write();
        let cf = auth_cf(&handle)?;
        let username = &account.user.username;
        if handle.get_cf(cf, username)?.is_some() {
            return Ok(false);
        }
        handle.put_cf(cf, username, serde_json::to_vec(&account)?)?;
        Ok(true)
    }

    fn modify_account(
        &self,
        username: &str,
        change: &mut dyn FnMut(&mut Account),
    ) -> DbResult<bool> {
        let handle = self.db.write();
        let cf = auth_cf(&handle)?;
        let Some(mut account) = read_account(&handle, cf, username)? else {
            return Ok(false);
        };
        change(&mut account);
        handle.put_cf(cf, username, serde_json::to_vec(&account)?)?;
        Ok(true)
    }

    fn remove_account(&self, username: &str) -> DbResult<bool> {
        let handle = self.db.write();
        let cf = auth_cf(&handle)?;
        if handle.get_cf(cf, username)?.is_none() {
            return Ok(false);
        }
        handle.delete_cf(cf, username)?;
        Ok(true)
    }

    fn account_names(&self) -> DbResult<Vec<String>> {
        let handle = self.db.read();
        let cf = auth_cf(&handle)?;
        let mut names = Vec::new();
        for item in handle.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            names.push(String::from_utf8_lossy(&key).to_string());
        }
        Ok(names)
    }

    fn clear_accounts(&self) -> DbResult<()> {
        let handle = self.db.write();
        let cf = auth_cf(&handle)?;
        let mut batch = WriteBatch::default();
        for item in handle.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            batch.delete_cf(cf, key);
        }
        handle.write(batch)?;
        Ok(())
    }
}
