//! Inbound filtered endpoint, one per peer
//!
//! A background reader keeps a subscription to one peer's publisher alive:
//! it connects, declares the topic, and forwards every matching message into
//! the peer's inbound queue. A missing or vanished peer is retried until the
//! subscriber is closed, so peers can start in any order.

use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Sender, TrySendError};
use socket2::SockRef;

use crate::constants::QUEUE_POLL_INTERVAL;
use crate::error::NetworkError;
use crate::network::framing::{write_subscription, MessageReader};
use crate::network::resolve;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const READ_CHUNK: usize = 16 * 1024;

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    dropped: AtomicU64,
    filtered: AtomicU64,
    connects: AtomicU64,
}

/// State shared between the handle and the reader thread
struct Link {
    remote: SocketAddr,
    topic: Bytes,
    reconnect_interval: Duration,
    max_message_size: usize,
    connected: AtomicBool,
    shutdown: AtomicBool,
    counters: Counters,
}

/// Handle to one peer subscription
pub struct Subscriber {
    address: String,
    link: Arc<Link>,
    thread: Option<JoinHandle<()>>,
}

impl Subscriber {
    /// Resolve `address` and start the background reader.
    ///
    /// Only an unresolvable address fails here; an unreachable peer is
    /// retried in the background.
    pub fn connect(
        address: &str,
        topic: Bytes,
        inbound: Sender<Bytes>,
        reconnect_interval: Duration,
        max_message_size: usize,
    ) -> Result<Self, NetworkError> {
        let remote = resolve(address)?;
        let link = Arc::new(Link {
            remote,
            topic,
            reconnect_interval,
            max_message_size,
            connected: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            counters: Counters::default(),
        });

        let reader_link = link.clone();
        let thread = thread::Builder::new()
            .name(format!("sub-{}", address))
            .spawn(move || reconnect_loop(&reader_link, &inbound))
            .map_err(|e| NetworkError::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            address: address.to_string(),
            link,
            thread: Some(thread),
        })
    }

    /// Address as configured
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Resolved remote endpoint
    pub fn remote(&self) -> SocketAddr {
        self.link.remote
    }

    /// Whether the subscription handshake with the peer has completed
    pub fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::Relaxed)
    }

    /// Get statistics
    pub fn stats(&self) -> SubscriberStats {
        let counters = &self.link.counters;
        SubscriberStats {
            messages_received: counters.received.load(Ordering::Relaxed),
            messages_dropped: counters.dropped.load(Ordering::Relaxed),
            messages_filtered: counters.filtered.load(Ordering::Relaxed),
            connects: counters.connects.load(Ordering::Relaxed),
        }
    }

    /// Stop the reader and wait for it. Idempotent.
    pub fn close(&mut self) {
        self.link.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
            tracing::debug!("Subscription to {} closed", self.address);
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.close();
    }
}

/// Subscriber statistics
#[derive(Debug, Clone, Default)]
pub struct SubscriberStats {
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub messages_filtered: u64,
    pub connects: u64,
}

fn reconnect_loop(link: &Link, inbound: &Sender<Bytes>) {
    while !link.shutdown.load(Ordering::Relaxed) {
        match TcpStream::connect_timeout(&link.remote, CONNECT_TIMEOUT) {
            Ok(stream) => {
                link.counters.connects.fetch_add(1, Ordering::Relaxed);
                let result = read_loop(stream, link, inbound);
                let was_connected = link.connected.swap(false, Ordering::Relaxed);
                match result {
                    Ok(ReadEnd::Closed) => return,
                    Ok(ReadEnd::PeerGone) if was_connected => {
                        tracing::info!("Peer {} disconnected", link.remote)
                    }
                    Ok(ReadEnd::PeerGone) => {}
                    Err(e) => tracing::debug!("Subscription to {} dropped: {}", link.remote, e),
                }
            }
            Err(e) => tracing::trace!("Connect to {} failed: {}", link.remote, e),
        }
        thread::sleep(link.reconnect_interval);
    }
}

enum ReadEnd {
    /// Shutdown requested or nobody consumes the inbound queue any more
    Closed,
    /// The peer closed the connection
    PeerGone,
}

fn read_loop(
    mut stream: TcpStream,
    link: &Link,
    inbound: &Sender<Bytes>,
) -> Result<ReadEnd, NetworkError> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(QUEUE_POLL_INTERVAL))?;
    SockRef::from(&stream).set_keepalive(true)?;
    write_subscription(&mut stream, &link.topic)?;

    link.connected.store(true, Ordering::Relaxed);
    tracing::info!("Subscribed to {}", link.remote);

    let mut reader = MessageReader::new(link.max_message_size);
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        if link.shutdown.load(Ordering::Relaxed) {
            return Ok(ReadEnd::Closed);
        }

        let n = match stream.read(&mut chunk) {
            Ok(0) => return Ok(ReadEnd::PeerGone),
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => return Err(e.into()),
        };

        reader.extend(&chunk[..n]);
        while let Some(message) = reader.next_message()? {
            if !message.starts_with(&link.topic) {
                link.counters.filtered.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            match inbound.try_send(message) {
                Ok(()) => {
                    link.counters.received.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    link.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!("Inbound queue for {} full, dropping message", link.remote);
                }
                Err(TrySendError::Disconnected(_)) => return Ok(ReadEnd::Closed),
            }
        }
    }
}
