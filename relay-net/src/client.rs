//! Relay client: rebuilds the track table from a relay server's stream.
//!
//! The connection task walks `Connecting → Connected → Reconnecting` for the
//! life of the client, backing off between attempts and never giving up on
//! network errors. A separate cull task expires aircraft whose `last_seen`
//! falls outside the staleness window.
//!
//! Both tasks share the table behind an `RwLock` and take it only for short,
//! synchronous sections. An update and a cull racing on the same address
//! resolve in whichever order they take the lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use relay_core::config::ClientConfig;
use relay_core::reassembly::StreamReassembler;
use relay_core::tracker::{TrackRecord, TrackTable};
use relay_core::types::{unix_now, Icao, RelayError};

use crate::error::NetError;
use crate::task::PeriodicTask;

// ---------------------------------------------------------------------------
// Connection state and backoff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Exponential reconnect delay, doubled per failure and capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Backoff {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Back to the initial delay after a successful connect.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Counters exposed for status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub records_applied: u64,
    pub protocol_errors: u64,
    pub connects: u64,
    pub culled: u64,
}

struct Shared {
    table: RwLock<TrackTable>,
    state: RwLock<ConnectionState>,
    records_applied: AtomicU64,
    protocol_errors: AtomicU64,
    connects: AtomicU64,
    culled: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// Cheap, cloneable read access to a running client.
#[derive(Clone)]
pub struct ClientHandle {
    shared: Arc<Shared>,
}

impl ClientHandle {
    /// Point-in-time copy of the consumer-side track table.
    pub fn get_current_tracks(&self) -> HashMap<Icao, TrackRecord> {
        self.shared
            .table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    pub fn track_count(&self) -> usize {
        self.shared
            .table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Remove records not heard from within `window` of `now`. Returns count removed.
    pub fn cull_stale(&self, now: f64, window: Duration) -> usize {
        let removed = self
            .shared
            .table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .prune_stale(now, window.as_secs_f64());
        self.shared
            .culled
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            records_applied: self.shared.records_applied.load(Ordering::Relaxed),
            protocol_errors: self.shared.protocol_errors.load(Ordering::Relaxed),
            connects: self.shared.connects.load(Ordering::Relaxed),
            culled: self.shared.culled.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Relay client
// ---------------------------------------------------------------------------

pub struct RelayClient {
    handle: ClientHandle,
    shutdown: watch::Sender<bool>,
    connection: JoinHandle<()>,
    cull_task: PeriodicTask,
}

impl RelayClient {
    /// Start the connection and cull tasks. Must be called inside a tokio runtime.
    pub fn start(config: &ClientConfig) -> Self {
        let shared = Arc::new(Shared {
            table: RwLock::new(TrackTable::default()),
            state: RwLock::new(ConnectionState::Disconnected),
            records_applied: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            connects: AtomicU64::new(0),
            culled: AtomicU64::new(0),
        });
        let handle = ClientHandle { shared };
        let (shutdown, shutdown_rx) = watch::channel(false);

        let connection = tokio::spawn(run_connection(
            config.clone(),
            handle.clone(),
            shutdown_rx,
        ));

        let window = config.staleness_window;
        let cull_handle = handle.clone();
        let cull_task = PeriodicTask::start("cull", config.cull_interval, move || {
            let removed = cull_handle.cull_stale(unix_now(), window);
            if removed > 0 {
                info!(removed, remaining = cull_handle.track_count(), "culled stale aircraft");
            }
        });

        RelayClient {
            handle,
            shutdown,
            connection,
            cull_task,
        }
    }

    pub fn handle(&self) -> &ClientHandle {
        &self.handle
    }

    /// Stop both tasks and close the connection.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        self.cull_task.stop().await;
        let _ = self.connection.await;
    }
}

/// Why a connected session ended.
enum SessionEnd {
    Shutdown,
    Closed,
    Failed(NetError),
}

async fn run_connection(
    config: ClientConfig,
    handle: ClientHandle,
    mut shutdown: watch::Receiver<bool>,
) {
    let addr = format!("{}:{}", config.host, config.port);
    let shared = &handle.shared;
    let mut backoff = Backoff::new(config.backoff_initial, config.backoff_max);
    let mut reassembler = StreamReassembler::new();

    loop {
        shared.set_state(ConnectionState::Connecting);
        debug!(addr = %addr, "connecting to relay");

        let attempt = tokio::select! {
            _ = shutdown.changed() => break,
            r = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&addr)) => r,
        };

        let failure = match attempt {
            Ok(Ok(stream)) => {
                shared.set_state(ConnectionState::Connected);
                shared.connects.fetch_add(1, Ordering::Relaxed);
                backoff.reset();
                info!(addr = %addr, "connected to relay");

                reassembler.clear();
                match run_session(stream, &mut reassembler, shared, &mut shutdown).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Closed => NetError::Closed,
                    SessionEnd::Failed(e) => e,
                }
            }
            Ok(Err(e)) => e.into(),
            Err(_) => NetError::ConnectTimeout(addr.clone()),
        };

        shared.set_state(ConnectionState::Reconnecting);
        let delay = backoff.next_delay();
        warn!(addr = %addr, error = %failure, retry_ms = delay.as_millis() as u64, "relay connection down");

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.set_state(ConnectionState::Disconnected);
    debug!(addr = %addr, "relay client stopped");
}

async fn run_session(
    mut stream: TcpStream,
    reassembler: &mut StreamReassembler,
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    loop {
        let read = tokio::select! {
            _ = shutdown.changed() => return SessionEnd::Shutdown,
            r = stream.read_buf(reassembler.buffer_mut()) => r,
        };

        match read {
            Ok(0) => return SessionEnd::Closed,
            Ok(_) => {}
            Err(e) => return SessionEnd::Failed(e.into()),
        }

        if let Err(e) = apply_buffered(reassembler, shared) {
            return SessionEnd::Failed(e.into());
        }
    }
}

/// Apply every complete buffered record to the table.
///
/// Malformed but framed records are counted and skipped; a framing error is
/// returned so the caller drops the connection and resyncs.
fn apply_buffered(reassembler: &mut StreamReassembler, shared: &Shared) -> Result<usize, RelayError> {
    let mut updates = Vec::new();
    let mut desync = None;

    for item in reassembler.drain() {
        match item {
            Ok(update) => updates.push(update),
            Err(e) => {
                shared.protocol_errors.fetch_add(1, Ordering::Relaxed);
                if e.is_desync() {
                    desync = Some(e);
                } else {
                    debug!(error = %e, "dropping malformed record");
                }
            }
        }
    }

    if !updates.is_empty() {
        let mut table = shared.table.write().unwrap_or_else(PoisonError::into_inner);
        for update in &updates {
            table.apply_track_update(update);
        }
    }
    shared
        .records_applied
        .fetch_add(updates.len() as u64, Ordering::Relaxed);

    match desync {
        Some(e) => Err(e),
        None => Ok(updates.len()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
