pub mod auth;
pub mod config;
pub mod error;
pub mod pool;
pub mod router;
pub mod server;
pub mod state;
pub mod storage;
pub mod vfs;

pub use auth::{Account, AccountStore, Authentication, MemoryAuth, User};
pub use config::{Config, StorageKind};
pub use error::{DbError, DbResult};
pub use pool::WorkerPool;
pub use router::{Backends, Engine, Reply};
pub use server::create_router;
pub use state::{MemoryStateStore, StateStore};
pub use vfs::Vfs;
