//! Connection manager for the downstream consumer.
//!
//! Owns a single outbound WebSocket and keeps it alive:
//!
//! ```text
//!   Uninitialized ──open──▶ Connecting ──handshake ok──▶ Open
//!                              │                          │
//!                        error │                          │ error / remote close
//!                              ▼                          ▼
//!                            Closed ◀─────────────────────┘
//!                              │
//!                              └── retry timer (fixed delay) ──▶ open
//! ```
//!
//! There is no backoff growth and no retry limit. At most one retry timer is
//! pending at any time, and it is cancelled as soon as the connection opens.
//! Must be used from within a Tokio runtime.

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, trace, warn};

/// Default delay between a close and the next connection attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(3000);

/// Default limit for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of frames queued towards the socket.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 100;

/// How long `shutdown` waits for the socket task to send its close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle of the consumer connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// `open` was never called
    #[default]
    Uninitialized,
    /// Handshake in progress
    Connecting,
    /// Frames can be sent
    Open,
    /// Shutting down
    Closing,
    /// Lost, refused, or shut down
    Closed,
}

impl ConnectionState {
    /// Check if frames can be sent in this state.
    pub fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Uninitialized => write!(f, "Uninitialized"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Sink for serialized messages.
///
/// Implemented by [`ConnectionManager`]; the publisher only sees this trait.
pub trait Transport: Send + Sync {
    /// Queue a text frame. Returns `false` without side effects when the
    /// transport cannot take it.
    fn send(&self, payload: String) -> bool;

    /// Current connection state.
    fn state(&self) -> ConnectionState;
}

/// Settings for [`ConnectionManager`].
#[derive(Clone, Copy, Debug)]
pub struct ConnectionConfig {
    pub retry_delay: Duration,
    pub connect_timeout: Duration,
    pub outbound_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

/// Counters describing the connection history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    /// Calls to `open`, explicit or from the retry timer
    pub attempts: u64,
    /// Successful handshakes
    pub opened: u64,
    /// Retry timers scheduled
    pub retries_scheduled: u64,
}

/// The socket task currently owned by the manager.
struct LiveConnection {
    generation: u64,
    outbound: mpsc::Sender<Message>,
    task: JoinHandle<()>,
}

struct RetryTimer {
    id: u64,
    handle: JoinHandle<()>,
}

struct Shared {
    state: ConnectionState,
    endpoint: Option<String>,
    /// Bumped by every `open`; socket tasks holding an older value are stale
    generation: u64,
    live: Option<LiveConnection>,
    retry: Option<RetryTimer>,
    next_retry_id: u64,
    shut_down: bool,
    stats: ConnectionStats,
}

struct Inner {
    config: ConnectionConfig,
    shared: Mutex<Shared>,
    state_tx: watch::Sender<ConnectionState>,
}

/// Maintains one logical connection to a fixed endpoint.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Uninitialized);
        Self {
            inner: Arc::new(Inner {
                config,
                shared: Mutex::new(Shared {
                    state: ConnectionState::Uninitialized,
                    endpoint: None,
                    generation: 0,
                    live: None,
                    retry: None,
                    next_retry_id: 0,
                    shut_down: false,
                    stats: ConnectionStats::default(),
                }),
                state_tx,
            }),
        }
    }

    /// Replace any existing connection with a fresh attempt to `endpoint`.
    ///
    /// Returns immediately; the outcome is observable through [`state`](Self::state)
    /// and [`subscribe`](Self::subscribe). Ignored after [`shutdown`](Self::shutdown).
    pub fn open(&self, endpoint: impl Into<String>) {
        self.inner.open(endpoint.into());
    }

    /// Queue a text frame if the connection is open.
    ///
    /// Never blocks and never fails loudly: returns `false` when the state is
    /// not [`ConnectionState::Open`] or the outbound buffer is full.
    pub fn send(&self, payload: impl Into<String>) -> bool {
        let shared = self.inner.shared.lock();
        if !shared.state.can_send() {
            trace!(state = %shared.state, "Dropping frame, connection not open");
            return false;
        }
        let Some(live) = shared.live.as_ref() else {
            return false;
        };
        match live.outbound.try_send(Message::text(payload.into())) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Outbound buffer full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    /// Watch state transitions, e.g. for a status display.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn endpoint(&self) -> Option<String> {
        self.inner.shared.lock().endpoint.clone()
    }

    /// Whether a retry timer is currently scheduled.
    pub fn retry_pending(&self) -> bool {
        self.inner.shared.lock().retry.is_some()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.inner.shared.lock().stats
    }

    /// Close the live connection, cancel any pending retry and stop reconnecting.
    pub async fn shutdown(&self) {
        let task = {
            let mut shared = self.inner.shared.lock();
            if shared.shut_down {
                return;
            }
            shared.shut_down = true;
            if let Some(retry) = shared.retry.take() {
                retry.handle.abort();
            }
            self.inner.set_state(&mut shared, ConnectionState::Closing);
            // Dropping the sender tells the socket task to send a close frame.
            shared.live.take().map(|live| live.task)
        };

        if let Some(task) = task {
            let abort = task.abort_handle();
            if tokio::time::timeout(CLOSE_TIMEOUT, task).await.is_err() {
                warn!("Connection task did not stop in time, aborting");
                abort.abort();
            }
        }

        let mut shared = self.inner.shared.lock();
        self.inner.set_state(&mut shared, ConnectionState::Closed);
        info!("Connection manager shut down");
    }
}

impl Transport for ConnectionManager {
    fn send(&self, payload: String) -> bool {
        ConnectionManager::send(self, payload)
    }

    fn state(&self) -> ConnectionState {
        ConnectionManager::state(self)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let mut shared = self.inner.shared.lock();
        shared.shut_down = true;
        if let Some(retry) = shared.retry.take() {
            retry.handle.abort();
        }
        if let Some(live) = shared.live.take() {
            live.task.abort();
        }
    }
}

impl Inner {
    fn set_state(&self, shared: &mut Shared, state: ConnectionState) {
        if shared.state != state {
            debug!(from = %shared.state, to = %state, "Connection state changed");
        }
        shared.state = state;
        self.state_tx.send_replace(state);
    }

    fn open(self: &Arc<Self>, endpoint: String) {
        let mut shared = self.shared.lock();
        if shared.shut_down {
            debug!("Ignoring open after shutdown");
            return;
        }

        // A fresh attempt supersedes both the old socket and any pending retry.
        if let Some(retry) = shared.retry.take() {
            retry.handle.abort();
        }
        if let Some(old) = shared.live.take() {
            debug!(generation = old.generation, "Discarding previous connection");
        }

        shared.generation += 1;
        shared.stats.attempts += 1;
        shared.endpoint = Some(endpoint.clone());
        let generation = shared.generation;
        self.set_state(&mut shared, ConnectionState::Connecting);

        let (outbound, outbound_rx) = mpsc::channel(self.config.outbound_buffer);
        let task = tokio::spawn(self.clone().run_connection(endpoint, generation, outbound_rx));
        shared.live = Some(LiveConnection {
            generation,
            outbound,
            task,
        });
    }

    async fn run_connection(
        self: Arc<Self>,
        endpoint: String,
        generation: u64,
        mut outbound_rx: mpsc::Receiver<Message>,
    ) {
        info!("Connecting to WebSocket: {}", endpoint);

        let connect =
            tokio::time::timeout(self.config.connect_timeout, connect_async(endpoint.as_str()));
        let mut stream = match connect.await {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                warn!("Connection failed: {}", e);
                self.on_closed(generation);
                return;
            }
            Err(_) => {
                warn!(
                    "Connection to {} timed out after {:?}",
                    endpoint, self.config.connect_timeout
                );
                self.on_closed(generation);
                return;
            }
        };

        if !self.on_open(generation) {
            let _ = stream.close(None).await;
            return;
        }
        info!("Connected to {}", endpoint);

        loop {
            tokio::select! {
                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(msg) => {
                            if let Err(e) = stream.send(msg).await {
                                error!("Failed to send frame: {}", e);
                                break;
                            }
                        }
                        None => {
                            // Superseded by a newer connection or shut down.
                            debug!(generation, "Closing discarded connection");
                            let _ = stream.close(None).await;
                            return;
                        }
                    }
                }

                inbound = stream.next() => {
                    match inbound {
                        Some(Ok(Message::Close(frame))) => {
                            info!("Consumer closed the connection: {:?}", frame);
                            break;
                        }
                        Some(Ok(_)) => {
                            trace!("Ignoring inbound frame");
                        }
                        Some(Err(e)) => {
                            error!("WebSocket error: {}", e);
                            break;
                        }
                        None => {
                            warn!("WebSocket stream closed");
                            break;
                        }
                    }
                }
            }
        }

        self.on_closed(generation);
    }

    /// Returns `false` when the attempt was superseded while handshaking.
    fn on_open(&self, generation: u64) -> bool {
        let mut shared = self.shared.lock();
        if shared.shut_down || shared.generation != generation {
            return false;
        }
        if let Some(retry) = shared.retry.take() {
            retry.handle.abort();
        }
        shared.stats.opened += 1;
        self.set_state(&mut shared, ConnectionState::Open);
        true
    }

    fn on_closed(self: &Arc<Self>, generation: u64) {
        let mut shared = self.shared.lock();
        if shared.shut_down || shared.generation != generation {
            return;
        }
        if shared
            .live
            .as_ref()
            .is_some_and(|live| live.generation == generation)
        {
            shared.live = None;
        }
        self.set_state(&mut shared, ConnectionState::Closed);
        self.schedule_retry(&mut shared);
    }

    fn schedule_retry(self: &Arc<Self>, shared: &mut Shared) {
        if shared.retry.is_some() {
            debug!("Retry already pending");
            return;
        }

        let id = shared.next_retry_id;
        shared.next_retry_id += 1;
        shared.stats.retries_scheduled += 1;

        let delay = self.config.retry_delay;
        info!("Reconnecting in {}ms", delay.as_millis());

        let inner = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire_retry(id);
        });
        shared.retry = Some(RetryTimer { id, handle });
    }

    fn fire_retry(self: &Arc<Self>, id: u64) {
        let endpoint = {
            let mut shared = self.shared.lock();
            // The timer may have been replaced or cancelled after its sleep ended.
            if !shared.retry.as_ref().is_some_and(|retry| retry.id == id) {
                return;
            }
            shared.retry = None;
            if shared.shut_down || shared.state == ConnectionState::Open {
                return;
            }
            match shared.endpoint.clone() {
                Some(endpoint) => endpoint,
                None => return,
            }
        };
        self.open(endpoint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(retry_delay: Duration) -> ConnectionConfig {
        ConnectionConfig {
            retry_delay,
            connect_timeout: Duration::from_secs(1),
            outbound_buffer: 8,
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Uninitialized.to_string(), "Uninitialized");
        assert_eq!(ConnectionState::Open.to_string(), "Open");
        assert!(ConnectionState::Open.can_send());
        assert!(!ConnectionState::Connecting.can_send());
        assert!(!ConnectionState::Closed.can_send());
    }

    #[tokio::test]
    async fn test_send_before_open_is_noop() {
        let manager = ConnectionManager::new(test_config(Duration::from_secs(60)));

        assert_eq!(manager.state(), ConnectionState::Uninitialized);
        assert!(!manager.send("{}"));
        assert!(!manager.retry_pending());
        assert_eq!(manager.stats(), ConnectionStats::default());
    }

    #[tokio::test]
    async fn test_repeated_close_schedules_single_retry() {
        let manager = ConnectionManager::new(test_config(Duration::from_secs(60)));

        for _ in 0..5 {
            manager.inner.on_closed(0);
        }

        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(manager.retry_pending());
        assert_eq!(manager.stats().retries_scheduled, 1);
        assert!(!manager.send("{}"));
    }

    #[tokio::test]
    async fn test_stale_close_is_ignored() {
        let manager = ConnectionManager::new(test_config(Duration::from_secs(60)));
        manager.inner.shared.lock().generation = 3;

        manager.inner.on_closed(2);

        assert_eq!(manager.state(), ConnectionState::Uninitialized);
        assert!(!manager.retry_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_reopens_after_delay() {
        let manager = ConnectionManager::new(test_config(Duration::from_millis(3000)));
        {
            let mut shared = manager.inner.shared.lock();
            shared.endpoint = Some("ws://127.0.0.1:1".to_string());
        }
        manager.inner.on_closed(0);
        assert_eq!(manager.stats().attempts, 0);

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(manager.stats().attempts, 0);
        assert!(manager.retry_pending());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(manager.stats().attempts, 1);

        // Nothing listens on port 1, so the reopened attempt fails and the
        // loop schedules the next retry.
        let mut states = manager.subscribe();
        states
            .wait_for(|state| *state == ConnectionState::Closed)
            .await
            .unwrap();
        assert_eq!(manager.stats().attempts, 1);
        assert_eq!(manager.stats().retries_scheduled, 2);
        assert!(manager.retry_pending());

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_on_open_cancels_retry() {
        let manager = ConnectionManager::new(test_config(Duration::from_secs(60)));
        manager.inner.on_closed(0);
        assert!(manager.retry_pending());

        assert!(manager.inner.on_open(0));
        assert_eq!(manager.state(), ConnectionState::Open);
        assert!(!manager.retry_pending());
        assert_eq!(manager.stats().opened, 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_retry_and_blocks_open() {
        let manager = ConnectionManager::new(test_config(Duration::from_secs(60)));
        let mut states = manager.subscribe();
        manager.inner.on_closed(0);
        assert!(manager.retry_pending());

        manager.shutdown().await;
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(!manager.retry_pending());
        assert_eq!(*states.borrow_and_update(), ConnectionState::Closed);

        manager.open("ws://127.0.0.1:1");
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(manager.stats().attempts, 0);
        assert!(manager.endpoint().is_none());
    }
}
