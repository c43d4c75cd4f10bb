//! Live-sync client — keeps a reconciled task view over the WebSocket
//! stream, with snapshot recovery and reconnect backoff.
//!
//! Transport failures never surface as errors: the client reconnects
//! with capped exponential backoff and re-fetches a full snapshot on
//! every (re)connect, so missed messages heal themselves. Embedders see
//! only a connection-state change, suitable for a transient
//! "disconnected" indicator.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::{Notify, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use super::notify::{Notification, NotificationDetector};
use super::view::TaskView;
use crate::error::SyncError;
use crate::tasks::model::{Task, TaskStreamMessage};

/// Connection state surfaced to the embedding UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Sync client configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Server base URL, e.g. `http://127.0.0.1:7878`.
    pub base_url: String,
    /// First reconnect delay; doubles per failed attempt.
    pub initial_backoff: Duration,
    /// Ceiling for the doubling backoff.
    pub max_backoff: Duration,
}

impl SyncConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }

    fn ws_url(&self) -> String {
        // http -> ws, https -> wss
        format!("{}/ws/tasks", self.base_url.replacen("http", "ws", 1))
    }

    fn snapshot_url(&self) -> String {
        format!("{}/tasks?scope=current", self.base_url)
    }
}

/// Handle to a running sync client.
///
/// One client per observer session; the view and detector it owns are
/// that session's state, passed around by this handle rather than held
/// in any global.
pub struct SyncClient {
    view: Arc<RwLock<TaskView>>,
    resync: Arc<Notify>,
    state_rx: watch::Receiver<ConnectionState>,
    handle: JoinHandle<()>,
}

impl SyncClient {
    /// Spawn the client loop. Returns the handle plus the stream of
    /// notification events detected from task updates.
    pub fn spawn(config: SyncConfig) -> (Self, mpsc::Receiver<Notification>) {
        let (notif_tx, notif_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let view = Arc::new(RwLock::new(TaskView::new()));
        let resync = Arc::new(Notify::new());

        let handle = tokio::spawn(run(
            config,
            Arc::clone(&view),
            state_tx,
            notif_tx,
            Arc::clone(&resync),
        ));

        (
            Self {
                view,
                resync,
                state_rx,
                handle,
            },
            notif_rx,
        )
    }

    /// All tasks in the reconciled view, newest first.
    pub async fn tasks(&self) -> Vec<Task> {
        self.view.read().await.tasks().to_vec()
    }

    /// Current-view tasks (active plus failed-like).
    pub async fn current(&self) -> Vec<Task> {
        self.view
            .read()
            .await
            .current()
            .into_iter()
            .cloned()
            .collect()
    }

    /// History-view tasks.
    pub async fn history(&self) -> Vec<Task> {
        self.view
            .read()
            .await
            .history()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Request an immediate snapshot re-fetch. Call on window refocus and
    /// on visibility regained — cheap self-healing independent of stream
    /// health.
    pub fn request_resync(&self) {
        self.resync.notify_one();
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch connection-state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Stop the client loop.
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

struct SessionState {
    view: Arc<RwLock<TaskView>>,
    detector: NotificationDetector,
    notif_tx: mpsc::Sender<Notification>,
    /// False until the first snapshot lands; that baseline never notifies.
    primed: bool,
}

impl SessionState {
    /// Replace the view wholesale from a snapshot, notifying for any item
    /// transitions discovered relative to the previous observation.
    async fn apply_snapshot(&mut self, tasks: Vec<Task>) {
        let live_ids: Vec<u64> = tasks.iter().map(|t| t.id).collect();

        let mut notifications = Vec::new();
        for task in &tasks {
            notifications.extend(self.detector.observe(task));
        }
        self.detector.retain(&live_ids);
        self.view.write().await.replace_all(tasks);

        if !self.primed {
            // First load is baseline, not news
            self.primed = true;
            return;
        }
        self.emit(notifications).await;
    }

    async fn apply_update(&mut self, task: Task) {
        let notifications = self.detector.observe(&task);
        self.view.write().await.apply(task);
        self.emit(notifications).await;
    }

    async fn emit(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            // Ok if the consumer dropped the receiver
            let _ = self.notif_tx.send(notification).await;
        }
    }
}

async fn run(
    config: SyncConfig,
    view: Arc<RwLock<TaskView>>,
    state_tx: watch::Sender<ConnectionState>,
    notif_tx: mpsc::Sender<Notification>,
    resync: Arc<Notify>,
) {
    let http = reqwest::Client::new();
    let mut session = SessionState {
        view,
        detector: NotificationDetector::new(),
        notif_tx,
        primed: false,
    };
    let mut backoff = config.initial_backoff;

    loop {
        let _ = state_tx.send(ConnectionState::Connecting);

        match connect_async(config.ws_url()).await {
            Ok((ws, _)) => {
                info!(url = %config.ws_url(), "Task stream connected");
                let _ = state_tx.send(ConnectionState::Connected);
                backoff = config.initial_backoff;

                // Direct fetch guards against events missed while
                // disconnected and against a missed initial stream event.
                if let Err(e) = fetch_snapshot(&http, &config, &mut session).await {
                    warn!(error = %e, "Snapshot fetch after connect failed");
                }

                if let Err(e) = drive(ws, &http, &config, &mut session, &resync).await {
                    warn!(error = %e, "Task stream lost");
                }
            }
            Err(e) => {
                warn!(error = %e, "Task stream connect failed");
            }
        }

        let _ = state_tx.send(ConnectionState::Disconnected);

        let delay = with_jitter(backoff);
        debug!(delay_ms = delay.as_millis() as u64, "Reconnecting after backoff");
        tokio::time::sleep(delay).await;
        backoff = (backoff * 2).min(config.max_backoff);
    }
}

/// Read the stream until it breaks, applying messages and handling
/// resync requests.
async fn drive(
    mut ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    http: &reqwest::Client,
    config: &SyncConfig,
    session: &mut SessionState,
    resync: &Notify,
) -> Result<(), SyncError> {
    loop {
        tokio::select! {
            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_message(&text, session).await,
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(SyncError::Stream {
                            reason: "server closed the stream".to_string(),
                        });
                    }
                    Some(Err(e)) => {
                        return Err(SyncError::Stream {
                            reason: e.to_string(),
                        });
                    }
                    // Ping/Pong/Binary frames carry no task state
                    Some(Ok(_)) => {}
                }
            }
            _ = resync.notified() => {
                debug!("Re-sync requested");
                if let Err(e) = fetch_snapshot(http, config, session).await {
                    warn!(error = %e, "Requested re-sync failed");
                }
            }
        }
    }
}

async fn handle_message(text: &str, session: &mut SessionState) {
    match serde_json::from_str::<TaskStreamMessage>(text) {
        Ok(TaskStreamMessage::Init { tasks }) => {
            debug!(tasks = tasks.len(), "Stream snapshot received");
            session.apply_snapshot(tasks).await;
        }
        Ok(TaskStreamMessage::TaskUpdate { task }) => {
            session.apply_update(task).await;
        }
        Err(e) => {
            // Unknown event kinds are ignored, not treated as errors
            debug!(error = %e, text = %text, "Ignoring unknown stream message");
        }
    }
}

async fn fetch_snapshot(
    http: &reqwest::Client,
    config: &SyncConfig,
    session: &mut SessionState,
) -> Result<(), SyncError> {
    let tasks: Vec<Task> = http
        .get(config.snapshot_url())
        .send()
        .await
        .map_err(|e| SyncError::Snapshot {
            reason: e.to_string(),
        })?
        .json()
        .await
        .map_err(|e| SyncError::Snapshot {
            reason: e.to_string(),
        })?;

    debug!(tasks = tasks.len(), "Snapshot fetched");
    session.apply_snapshot(tasks).await;
    Ok(())
}

/// Add up to 25% random jitter so reconnecting observers do not stampede.
fn with_jitter(base: Duration) -> Duration {
    let jitter_ms = base.as_millis() as u64 / 4;
    if jitter_ms == 0 {
        return base;
    }
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
}
