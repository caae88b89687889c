//! Fixed pool of engine workers fed by two shared intakes.
//!
//! Scripts and single commands arrive on separate unbounded queues. Every
//! worker waits on both; whichever worker is idle claims the next request and
//! runs it to completion before taking another, so a script's commands never
//! interleave with other work on the same worker. The engine itself runs on
//! the blocking thread pool; a job that panics fails only its own request.

use crate::error::{DbError, DbResult};
use crate::router::{Engine, Reply};
use bql_core::Command;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

pub struct ScriptRequest {
    pub token: String,
    pub script: String,
    pub reply: oneshot::Sender<DbResult<Value>>,
}

pub struct CommandRequest {
    pub token: String,
    pub command: Command,
    pub reply: oneshot::Sender<DbResult<Reply>>,
}

type Intake<T> = Arc<Mutex<mpsc::UnboundedReceiver<T>>>;

/// Claims the next request from a shared intake. The lock is held while
/// waiting, which hands each request to exactly one worker.
async fn claim<T>(intake: &Intake<T>) -> Option<T> {
    intake.lock().await.recv().await
}

/// Handle for submitting work. Cloning shares the same workers; the workers
/// stop once every handle has been dropped.
#[derive(Clone)]
pub struct WorkerPool {
    scripts: mpsc::UnboundedSender<ScriptRequest>,
    commands: mpsc::UnboundedSender<CommandRequest>,
    size: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("size", &self.size).finish()
    }
}

impl WorkerPool {
    /// Spawns `size` workers (at least one), each with the engine returned by
    /// `build` for its index.
    pub fn start<F>(size: usize, build: F) -> (Self, Vec<JoinHandle<()>>)
    where
        F: Fn(usize) -> Engine,
    {
        let size = size.max(1);
        let (scripts, script_rx) = mpsc::unbounded_channel::<ScriptRequest>();
        let (commands, command_rx) = mpsc::unbounded_channel::<CommandRequest>();
        let script_rx: Intake<ScriptRequest> = Arc::new(Mutex::new(script_rx));
        let command_rx: Intake<CommandRequest> = Arc::new(Mutex::new(command_rx));

        tracing::info!("Starting engine pool with {} workers", size);
        let handles = (0..size)
            .map(|id| {
                let engine = build(id);
                let scripts = script_rx.clone();
                let commands = command_rx.clone();
                tokio::spawn(run_worker(id, engine, scripts, commands))
            })
            .collect();

        (
            Self {
                scripts,
                commands,
                size,
            },
            handles,
        )
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queues a script and waits for its result.
    pub async fn run_script(&self, token: &str, script: &str) -> DbResult<Value> {
        let (reply, result) = oneshot::channel();
        self.scripts
            .send(ScriptRequest {
                token: token.to_string(),
                script: script.to_string(),
                reply,
            })
            .map_err(|_| pool_closed())?;
        result.await.map_err(|_| pool_closed())?
    }

    /// Queues a single command and waits for its result.
    pub async fn run_command(&self, token: &str, command: Command) -> DbResult<Reply> {
        let (reply, result) = oneshot::channel();
        self.commands
            .send(CommandRequest {
                token: token.to_string(),
                command,
                reply,
            })
            .map_err(|_| pool_closed())?;
        result.await.map_err(|_| pool_closed())?
    }
}

fn pool_closed() -> DbError {
    DbError::backend("engine pool is not running")
}

/// Runs a synchronous engine call on the blocking pool.
async fn run_blocking<T, F>(job: F) -> DbResult<T>
where
    F: FnOnce() -> DbResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(job).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("Engine job failed: {}", e);
            Err(DbError::backend(format!("Task error: {}", e)))
        }
    }
}

async fn run_worker(
    id: usize,
    engine: Engine,
    scripts: Intake<ScriptRequest>,
    commands: Intake<CommandRequest>,
) {
    tracing::info!("Engine worker {} started", id);
    let mut scripts_open = true;
    let mut commands_open = true;

    loop {
        tokio::select! {
            request = claim(&scripts), if scripts_open => match request {
                Some(ScriptRequest { token, script, reply }) => {
                    let engine = engine.clone();
                    let result = run_blocking(move || engine.execute_script(&token, &script)).await;
                    // The caller may have gone away; nothing to do then.
                    let _ = reply.send(result);
                }
                None => scripts_open = false,
            },
            request = claim(&commands), if commands_open => match request {
                Some(CommandRequest { token, command, reply }) => {
                    let engine = engine.clone();
                    let result = run_blocking(move || engine.execute_command(&token, &command)).await;
                    let _ = reply.send(result);
                }
                None => commands_open = false,
            },
            else => break,
        }
    }

    tracing::info!("Engine worker {} stopped", id);
}
