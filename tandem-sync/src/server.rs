//! WebSocket sync server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                           ┌── persister task ── ProjectRepository
//!            ├── socket tasks ── Hub ────┤
//! Client B ──┘   (select! read / │       └── housekeeping task (sweep, daily backup)
//!                 outbound)      │
//!                                └────────── GET /health (axum)
//! ```
//!
//! Each socket task owns its WebSocket. Reads are handed to the hub under
//! its lock; frames the hub queues for the connection arrive on a bounded
//! channel and are written out by the same task. When the hub drops a
//! connection its channel closes and the task shuts the socket.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;

use tandem_core::{Clock, ProjectStore, SystemClock};

use crate::auth::{AuthPolicy, Authenticator, TokenAuthenticator};
use crate::broadcast::Outbound;
use crate::housekeeping::{HousekeepingTask, Scheduler};
use crate::hub::{HealthReport, Hub, SharedHub};
use crate::storage::{
    run_persister, JsonFileRepository, MemoryRepository, PersistHandle, PersistJob,
    PersistenceError, ProjectRepository,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address for WebSocket clients
    pub bind_addr: String,
    /// Address for the HTTP health endpoint (None = disabled)
    pub health_addr: Option<String>,
    /// Frames buffered per connection before it counts as saturated
    pub outbound_capacity: usize,
    /// Idle time after which a connection is dropped
    pub inactivity_timeout_secs: u64,
    /// How often idle connections are swept
    pub sweep_interval_secs: u64,
    /// How often a full backup is written
    pub backup_interval_secs: u64,
    /// Real-time tick of the housekeeping loop
    pub housekeeping_tick_ms: u64,
    /// Reject changes from unauthenticated connections
    pub require_auth: bool,
    /// Where projects are stored (None = in-memory only)
    pub data_dir: Option<PathBuf>,
    /// Backups retained in `data_dir/backups`
    pub max_backups: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            health_addr: None,
            outbound_capacity: 256,
            inactivity_timeout_secs: 30 * 60,
            sweep_interval_secs: 5 * 60,
            backup_interval_secs: 24 * 60 * 60,
            housekeeping_tick_ms: 1_000,
            require_auth: true,
            data_dir: None,
            max_backups: 10,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    hub: SharedHub,
    clock: Arc<dyn Clock>,
    repo: Arc<dyn ProjectRepository>,
    persist: PersistHandle,
    persist_rx: Mutex<Option<mpsc::UnboundedReceiver<PersistJob>>>,
}

impl SyncServer {
    /// Server with file storage if `data_dir` is set, no tokens, wall clock.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let repo: Arc<dyn ProjectRepository> = match &config.data_dir {
            Some(dir) => Arc::new(JsonFileRepository::new(dir).with_max_backups(config.max_backups)),
            None => Arc::new(MemoryRepository::new()),
        };
        Self::with_parts(config, repo, Arc::new(TokenAuthenticator::new()), Arc::new(SystemClock))
    }

    /// Load the stored collection and assemble the hub.
    pub fn with_parts(
        config: ServerConfig,
        repo: Arc<dyn ProjectRepository>,
        authenticator: Arc<dyn Authenticator>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServerError> {
        let projects = repo.load()?;
        log::info!("Starting with {} projects", projects.len());

        let (persist, persist_rx) = PersistHandle::channel();
        let hub = Hub::new(ProjectStore::from_map(projects), persist.clone(), Arc::clone(&clock))
            .with_authenticator(authenticator)
            .with_policy(AuthPolicy {
                require_auth_for_changes: config.require_auth,
            })
            .into_shared();

        Ok(Self {
            config,
            hub,
            clock,
            repo,
            persist,
            persist_rx: Mutex::new(Some(persist_rx)),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn hub(&self) -> SharedHub {
        Arc::clone(&self.hub)
    }

    pub fn persist_handle(&self) -> PersistHandle {
        self.persist.clone()
    }

    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        bind(&self.config.bind_addr).await
    }

    /// Bind and serve until the process ends.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener, std::future::pending()).await
    }

    /// Serve on `listener` until `shutdown` resolves, then flush pending saves.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        self.spawn_background().await?;
        match listener.local_addr() {
            Ok(addr) => log::info!("Sync server listening on {addr}"),
            Err(_) => log::info!("Sync server listening"),
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            log::warn!("Accept failed: {e}");
                            continue;
                        }
                    };
                    log::debug!("New TCP connection from {addr}");
                    let hub = Arc::clone(&self.hub);
                    let capacity = self.config.outbound_capacity;
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(hub, stream, addr, capacity).await {
                            log::error!("Connection error from {addr}: {e}");
                        }
                    });
                }
                _ = &mut shutdown => {
                    log::info!("Shutdown requested");
                    break;
                }
            }
        }

        self.persist.flush().await?;
        log::info!("Pending changes flushed");
        Ok(())
    }

    async fn spawn_background(&self) -> Result<(), ServerError> {
        match self.persist_rx.lock().await.take() {
            Some(rx) => {
                tokio::spawn(run_persister(Arc::clone(&self.repo), rx));
            }
            None => log::warn!("Persister already running"),
        }

        tokio::spawn(run_housekeeping(
            Arc::clone(&self.hub),
            Arc::clone(&self.clock),
            self.config.clone(),
        ));

        if let Some(addr) = &self.config.health_addr {
            let listener = bind(addr).await?;
            log::info!("Health endpoint on http://{addr}/health");
            let app = health_router(Arc::clone(&self.hub));
            tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app).await {
                    log::error!("Health endpoint stopped: {e}");
                }
            });
        }
        Ok(())
    }
}

async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    hub: SharedHub,
    stream: TcpStream,
    addr: SocketAddr,
    capacity: usize,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (tx, mut rx) = mpsc::channel::<Outbound>(capacity);
    let conn = hub.lock().await.open_connection(Some(addr), tx);

    let result = loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        hub.lock().await.handle_text(&conn, text.as_str());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let text = String::from_utf8_lossy(&data);
                        hub.lock().await.handle_text(&conn, &text);
                    }
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(e),
                }
            }
            out = rx.recv() => {
                match out {
                    Some(frame) => {
                        if let Err(e) = ws_sender.send(Message::Text(frame.to_string().into())).await {
                            break Err(e);
                        }
                    }
                    None => {
                        log::debug!("Hub released connection {conn}; closing socket");
                        let _ = ws_sender.close().await;
                        break Ok(());
                    }
                }
            }
        }
    };

    hub.lock().await.close_connection(&conn);
    result
}

/// Ten years; keeps scheduler arithmetic in range.
const MAX_INTERVAL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

async fn run_housekeeping(hub: SharedHub, clock: Arc<dyn Clock>, config: ServerConfig) {
    let secs = |s: u64| chrono::Duration::seconds(s.min(MAX_INTERVAL_SECS) as i64);
    let timeout = secs(config.inactivity_timeout_secs);
    let mut scheduler = Scheduler::new()
        .every(HousekeepingTask::SweepInactive, secs(config.sweep_interval_secs), clock.now())
        .every(HousekeepingTask::DailyBackup, secs(config.backup_interval_secs), clock.now());

    let mut ticker =
        tokio::time::interval(std::time::Duration::from_millis(config.housekeeping_tick_ms.max(1)));
    loop {
        ticker.tick().await;
        let now = clock.now();
        for task in scheduler.due(now) {
            log::debug!("Running housekeeping task {}", task.name());
            let mut hub = hub.lock().await;
            match task {
                HousekeepingTask::SweepInactive => {
                    let dropped = hub.sweep_inactive(now, timeout);
                    if !dropped.is_empty() {
                        log::info!("Swept {} inactive connections", dropped.len());
                    }
                }
                HousekeepingTask::DailyBackup => hub.request_backup(task.name()),
            }
        }
    }
}

fn health_router(hub: SharedHub) -> Router {
    Router::new().route("/health", get(health)).with_state(hub)
}

async fn health(State(hub): State<SharedHub>) -> Json<HealthReport> {
    Json(hub.lock().await.health())
}
