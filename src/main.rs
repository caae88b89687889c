use bytengine::{
    create_router,
    router::{Backends, Engine},
    storage::{MemoryByteStore, MemoryNodeStore, RocksStore},
    Authentication, Config, MemoryAuth, MemoryStateStore, StorageKind, Vfs, WorkerPool,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "bytengine")]
#[command(about = "Bytengine - a scriptable JSON and binary content server", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Data directory path (rocksdb storage)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Number of engine workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Storage backend: rocksdb or memory
    #[arg(long)]
    storage: Option<StorageKind>,

    /// Root account to create at startup
    #[arg(long, requires = "admin_password")]
    admin_user: Option<String>,

    #[arg(long, requires = "admin_user")]
    admin_password: Option<String>,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(workers) = self.workers {
            config.workers = workers.max(1);
        }
        if let Some(storage) = self.storage {
            config.storage = storage;
        }
        if self.admin_user.is_some() {
            config.admin_user = self.admin_user;
            config.admin_password = self.admin_password;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bytengine=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);

    // Node, attachment and account stores are shared by every worker
    let (vfs, auth, rocks) = match config.storage {
        StorageKind::Rocksdb => {
            let store = RocksStore::open(&config.data_dir)?;
            let vfs = Vfs::new(Arc::new(store.clone()), Arc::new(store.clone()));
            let auth: Arc<dyn Authentication> = Arc::new(store.clone());
            (vfs, auth, Some(store))
        }
        StorageKind::Memory => {
            tracing::info!("Using in-memory storage; content is lost on exit");
            let vfs = Vfs::new(Arc::new(MemoryNodeStore::new()), Arc::new(MemoryByteStore::new()));
            let auth: Arc<dyn Authentication> = Arc::new(MemoryAuth::new());
            (vfs, auth, None)
        }
    };

    let backends = Backends {
        auth,
        vfs,
        state: Arc::new(MemoryStateStore::new()),
    };
    let engine = Engine::standard(backends).with_ttls(config.token_ttl(), config.ticket_ttl());

    if let (Some(user), Some(password)) = (&config.admin_user, &config.admin_password) {
        if !engine.ensure_admin_user(user, password)? {
            tracing::info!("Admin user {} already present", user);
        }
    } else {
        tracing::warn!("No admin user configured; only public file access will work");
    }

    let (pool, _workers) = WorkerPool::start(config.workers, |_| engine.clone());
    let app = create_router(pool, config.max_upload_bytes());

    // Start server with graceful shutdown
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(rocks))
        .await?;

    Ok(())
}

async fn shutdown_signal(store: Option<RocksStore>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, flushing storage...");
    if let Some(store) = store {
        if let Err(e) = store.flush() {
            tracing::error!("Flush failed: {}", e);
        }
    }
    tracing::info!("Shutdown complete");
}
