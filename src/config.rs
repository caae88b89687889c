use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which backend family stores nodes and blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Rocksdb,
    Memory,
}

impl std::str::FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rocksdb" => Ok(StorageKind::Rocksdb),
            "memory" => Ok(StorageKind::Memory),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

/// Server configuration.
///
/// Sources, lowest precedence first: built-in defaults, an optional TOML
/// file, `BYTENGINE_*` environment variables (a `.env` file is honoured),
/// then command-line flags applied by the binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    /// Number of engine workers serving requests.
    pub workers: usize,
    pub storage: StorageKind,
    pub token_ttl_minutes: u64,
    pub ticket_ttl_minutes: u64,
    /// Largest accepted attachment upload, in KiB.
    pub max_upload_kb: usize,
    /// Root account created at startup when both are set.
    pub admin_user: Option<String>,
    pub admin_password: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8500,
            data_dir: PathBuf::from("./data"),
            workers: 4,
            storage: StorageKind::Rocksdb,
            token_ttl_minutes: 60,
            ticket_ttl_minutes: 5,
            max_upload_kb: 300,
            admin_user: None,
            admin_password: None,
        }
    }
}

impl Config {
    /// Reads the TOML file when given, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Applies `BYTENGINE_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(workers) = lookup("BYTENGINE_WORKERS") {
            self.workers = workers
                .parse()
                .map_err(|_| anyhow::anyhow!("BYTENGINE_WORKERS must be a number"))?;
        }
        if let Some(dir) = lookup("BYTENGINE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(port) = lookup("BYTENGINE_PORT") {
            self.port = port
                .parse()
                .map_err(|_| anyhow::anyhow!("BYTENGINE_PORT must be a port number"))?;
        }
        if let Some(storage) = lookup("BYTENGINE_STORAGE") {
            self.storage = storage.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        }
        if let Some(limit) = lookup("BYTENGINE_MAX_UPLOAD_KB") {
            self.max_upload_kb = limit
                .parse()
                .map_err(|_| anyhow::anyhow!("BYTENGINE_MAX_UPLOAD_KB must be a number"))?;
        }
        if let Some(user) = lookup("BYTENGINE_ADMIN_USER") {
            self.admin_user = Some(user);
        }
        if let Some(password) = lookup("BYTENGINE_ADMIN_PASSWORD") {
            self.admin_password = Some(password);
        }
        if self.workers == 0 {
            self.workers = 1;
        }
        Ok(())
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_kb.saturating_mul(1024)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_minutes.saturating_mul(60))
    }

    pub fn ticket_ttl(&self) -> Duration {
        Duration::from_secs(self.ticket_ttl_minutes.saturating_mul(60))
    }
}
