//! Relay server: accepts consumers and broadcasts encoded track updates.
//!
//! Two tasks cooperate:
//! - the accept task polls the non-blocking listener every
//!   `accept_interval` and hands new sockets to the hub over a channel;
//! - the hub task owns the consumer set (`Broadcaster`) and is the only
//!   place it is mutated, writing each published record to every consumer
//!   and dropping the ones whose writes fail.
//!
//! Delivery is best-effort: no retries, no per-consumer queue beyond the
//! socket buffer. A consumer accepted while a record is in flight may miss
//! that record.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use relay_core::config::ServerConfig;

use crate::error::{NetError, Result};
use crate::task::PeriodicTask;

/// Records buffered between the ingest path and the hub.
const PUBLISH_QUEUE: usize = 1024;

// ---------------------------------------------------------------------------
// Broadcaster
// ---------------------------------------------------------------------------

struct Consumer<W> {
    peer: String,
    stream: W,
}

/// The set of live consumers and the write/prune policy.
pub struct Broadcaster<W> {
    consumers: Vec<Consumer<W>>,
    write_timeout: Duration,
    gauge: Arc<AtomicUsize>,
}

impl<W: AsyncWrite + Unpin> Broadcaster<W> {
    pub fn new(write_timeout: Duration) -> Self {
        Broadcaster {
            consumers: Vec::new(),
            write_timeout,
            gauge: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared live-consumer count, readable without touching the set.
    pub fn gauge(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.gauge)
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    pub fn add(&mut self, peer: impl Into<String>, stream: W) {
        self.consumers.push(Consumer {
            peer: peer.into(),
            stream,
        });
        self.gauge.store(self.consumers.len(), Ordering::Relaxed);
    }

    /// Write `record` to every consumer. Returns how many received it.
    ///
    /// A consumer whose write errors or exceeds the write timeout is removed
    /// and never retried; the rest still get the record.
    pub async fn broadcast(&mut self, record: &[u8]) -> usize {
        let mut alive = Vec::with_capacity(self.consumers.len());

        for mut consumer in self.consumers.drain(..) {
            match tokio::time::timeout(self.write_timeout, consumer.stream.write_all(record)).await
            {
                Ok(Ok(())) => alive.push(consumer),
                Ok(Err(e)) => {
                    warn!(peer = %consumer.peer, error = %e, "dropping consumer after write failure");
                }
                Err(_) => {
                    warn!(peer = %consumer.peer, "dropping consumer after write timeout");
                }
            }
        }

        let delivered = alive.len();
        self.consumers = alive;
        self.gauge.store(delivered, Ordering::Relaxed);
        if delivered > 0 {
            debug!(bytes = record.len(), consumers = delivered, "record broadcast");
        }
        delivered
    }

    /// Shut down and drop every consumer.
    pub async fn close_all(&mut self) {
        for mut consumer in self.consumers.drain(..) {
            let _ = consumer.stream.shutdown().await;
        }
        self.gauge.store(0, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Relay server
// ---------------------------------------------------------------------------

type NewConsumer = (TcpStream, SocketAddr);

pub struct RelayServer {
    local_addr: SocketAddr,
    updates: mpsc::Sender<Bytes>,
    consumers: Arc<AtomicUsize>,
    accept_task: PeriodicTask,
    hub: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl RelayServer {
    /// Bind the consumer listener and start the accept and hub tasks.
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let listener = std::net::TcpListener::bind((config.host.as_str(), config.port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "relay server listening");

        let (updates, updates_rx) = mpsc::channel(PUBLISH_QUEUE);
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let broadcaster = Broadcaster::new(config.write_timeout);
        let consumers = broadcaster.gauge();

        let hub = tokio::spawn(run_hub(broadcaster, updates_rx, conn_rx, shutdown_rx));
        let accept_task = PeriodicTask::start("accept", config.accept_interval, move || {
            accept_pending(&listener, &conn_tx);
        });

        Ok(RelayServer {
            local_addr,
            updates,
            consumers,
            accept_task,
            hub,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of consumers currently connected.
    pub fn consumer_count(&self) -> usize {
        self.consumers.load(Ordering::Relaxed)
    }

    /// Queue one encoded record for broadcast.
    pub async fn publish(&self, record: Bytes) -> Result<()> {
        self.updates.send(record).await.map_err(|_| NetError::Closed)
    }

    /// A sender that can publish from another task.
    pub fn publisher(&self) -> mpsc::Sender<Bytes> {
        self.updates.clone()
    }

    /// Stop accepting, close every consumer socket, and wait for both tasks.
    ///
    /// Records still queued at this point are dropped.
    pub async fn shutdown(self) {
        self.accept_task.stop().await;
        let _ = self.shutdown.send(true);
        let _ = self.hub.await;
        info!(addr = %self.local_addr, "relay server stopped");
    }
}

/// Accept every pending connection without blocking.
///
/// `WouldBlock` just means nobody is waiting.
fn accept_pending(
    listener: &std::net::TcpListener,
    conn_tx: &mpsc::UnboundedSender<NewConsumer>,
) -> usize {
    let mut accepted = 0;
    loop {
        match listener.accept() {
            Ok((stream, peer)) => match into_async(stream) {
                Ok(stream) => {
                    if conn_tx.send((stream, peer)).is_err() {
                        break;
                    }
                    accepted += 1;
                }
                Err(e) => warn!(peer = %peer, error = %e, "failed to configure consumer socket"),
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                debug!(error = %e, "accept failed");
                break;
            }
        }
    }
    accepted
}

fn into_async(stream: std::net::TcpStream) -> io::Result<TcpStream> {
    stream.set_nonblocking(true)?;
    stream.set_nodelay(true)?;
    TcpStream::from_std(stream)
}

async fn run_hub(
    mut broadcaster: Broadcaster<TcpStream>,
    mut updates: mpsc::Receiver<Bytes>,
    mut new_consumers: mpsc::UnboundedReceiver<NewConsumer>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            Some((stream, peer)) = new_consumers.recv() => {
                broadcaster.add(peer.to_string(), stream);
                info!(peer = %peer, consumers = broadcaster.len(), "consumer connected");
            }
            record = updates.recv() => match record {
                Some(record) => {
                    broadcaster.broadcast(&record).await;
                }
                None => break,
            },
        }
    }

    let remaining = broadcaster.len();
    broadcaster.close_all().await;
    debug!(consumers = remaining, "hub stopped, consumer sockets closed");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::types::{TrackUpdate, UpdatePayload};
    use relay_core::wire;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn record() -> Bytes {
        wire::encode(&TrackUpdate {
            icao: [0x48, 0x40, 0xD6],
            timestamp: 1_700_000_000.0,
            payload: UpdatePayload::Squawk { squawk: 7700 },
        })
    }

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            accept_interval: Duration::from_millis(10),
            write_timeout: Duration::from_secs(1),
            ..ServerConfig::default()
        }
    }

    async fn wait_for_consumers(server: &RelayServer, n: usize) {
        for _ in 0..200 {
            if server.consumer_count() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} consumers, have {}", server.consumer_count());
    }

    #[tokio::test]
    async fn test_broadcast_isolation() {
        let mut b: Broadcaster<DuplexStream> = Broadcaster::new(Duration::from_secs(1));
        let (a_tx, mut a_rx) = tokio::io::duplex(4096);
        let (b_tx, b_rx) = tokio::io::duplex(4096);
        let (c_tx, mut c_rx) = tokio::io::duplex(4096);
        b.add("a", a_tx);
        b.add("b", b_tx);
        b.add("c", c_tx);
        drop(b_rx);

        let first = record();
        assert_eq!(b.broadcast(&first).await, 2);
        assert_eq!(b.len(), 2);
        assert_eq!(b.gauge().load(Ordering::Relaxed), 2);

        let second = record();
        assert_eq!(b.broadcast(&second).await, 2);

        for rx in [&mut a_rx, &mut c_rx] {
            let mut got = vec![0u8; first.len() + second.len()];
            rx.read_exact(&mut got).await.unwrap();
            assert_eq!(&got[..first.len()], &first[..]);
            assert_eq!(&got[first.len()..], &second[..]);
        }
    }

    #[tokio::test]
    async fn test_slow_consumer_times_out() {
        let mut b: Broadcaster<DuplexStream> = Broadcaster::new(Duration::from_millis(50));
        // Room for less than one record and nobody reading.
        let (stuck_tx, _stuck_rx) = tokio::io::duplex(8);
        let (ok_tx, mut ok_rx) = tokio::io::duplex(4096);
        b.add("stuck", stuck_tx);
        b.add("ok", ok_tx);

        let rec = record();
        assert_eq!(b.broadcast(&rec).await, 1);
        assert_eq!(b.len(), 1);

        let mut got = vec![0u8; rec.len()];
        ok_rx.read_exact(&mut got).await.unwrap();
        assert_eq!(got, rec.to_vec());
    }

    #[tokio::test]
    async fn test_broadcast_with_no_consumers() {
        let mut b: Broadcaster<DuplexStream> = Broadcaster::new(Duration::from_secs(1));
        assert!(b.is_empty());
        assert_eq!(b.broadcast(&record()).await, 0);
    }

    #[tokio::test]
    async fn test_server_relays_to_tcp_consumers() {
        let server = RelayServer::bind(&test_config()).await.unwrap();
        let addr = server.local_addr();

        let mut one = TcpStream::connect(addr).await.unwrap();
        let mut two = TcpStream::connect(addr).await.unwrap();
        wait_for_consumers(&server, 2).await;

        let rec = record();
        server.publish(rec.clone()).await.unwrap();

        for sock in [&mut one, &mut two] {
            let mut got = vec![0u8; rec.len()];
            tokio::time::timeout(Duration::from_secs(2), sock.read_exact(&mut got))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(got, rec.to_vec());
        }

        server.shutdown().await;

        // Shutdown closes consumer sockets.
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(2), one.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_publish_after_shutdown_fails() {
        let server = RelayServer::bind(&test_config()).await.unwrap();
        let publisher = server.publisher();
        server.shutdown().await;
        assert!(publisher.send(record()).await.is_err());
    }
}
