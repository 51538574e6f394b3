//! Outbound broadcast endpoint
//!
//! Listens on the local bind address. Each connecting subscriber declares a
//! topic; [`Publisher::broadcast`] enqueues a message only for subscribers
//! whose topic prefixes it. Every subscriber has its own bounded queue and
//! writer thread, so a slow or absent subscriber only loses its own frames.

use std::io::{ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockRef, Socket, Type};

use crate::constants::QUEUE_POLL_INTERVAL;
use crate::error::NetworkError;
use crate::network::framing::{encode_message, read_subscription};
use crate::network::resolve;

const LISTEN_BACKLOG: i32 = 128;
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

struct SubscriberSlot {
    remote: SocketAddr,
    topic: Bytes,
    queue: Sender<Bytes>,
    alive: Arc<AtomicBool>,
}

struct Shared {
    subscribers: Mutex<Vec<SubscriberSlot>>,
    shutdown: AtomicBool,
    high_water_mark: usize,
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

/// Broadcast endpoint bound to the local address
pub struct Publisher {
    local_addr: SocketAddr,
    max_message_size: usize,
    shared: Arc<Shared>,
    accept_thread: Option<JoinHandle<()>>,
}

impl Publisher {
    /// Bind and start accepting subscribers.
    ///
    /// Failure here (address in use, unresolvable address) is returned to the
    /// caller; nothing can be published without this endpoint.
    pub fn bind(
        address: &str,
        high_water_mark: usize,
        max_message_size: usize,
    ) -> Result<Self, NetworkError> {
        let addr = resolve(address)?;
        let bind_failed = |source| NetworkError::BindFailed {
            address: address.to_string(),
            source,
        };

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(bind_failed)?;
        #[cfg(unix)]
        socket.set_reuse_address(true).map_err(bind_failed)?;
        socket.bind(&addr.into()).map_err(bind_failed)?;
        socket.listen(LISTEN_BACKLOG).map_err(bind_failed)?;

        let listener: TcpListener = socket.into();
        listener.set_nonblocking(true).map_err(bind_failed)?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(Shared {
            subscribers: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
            high_water_mark: high_water_mark.max(1),
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        });

        let accept_shared = shared.clone();
        let accept_thread = thread::Builder::new()
            .name("pub-accept".into())
            .spawn(move || accept_loop(listener, accept_shared))?;

        tracing::info!("Publishing on {}", local_addr);

        Ok(Self {
            local_addr,
            max_message_size,
            shared,
            accept_thread: Some(accept_thread),
        })
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Fire-and-forget send to every matching subscriber.
    ///
    /// Returns how many subscriber queues accepted the message. Subscribers
    /// whose queue is full miss this message.
    pub fn broadcast(&self, message: Bytes) -> Result<usize, NetworkError> {
        if self.shared.shutdown.load(Ordering::Relaxed) {
            return Err(NetworkError::Closed);
        }
        if message.len() > self.max_message_size {
            return Err(NetworkError::MessageTooLarge(message.len()));
        }

        let mut subscribers = self.shared.subscribers.lock();
        subscribers.retain(|slot| slot.alive.load(Ordering::Relaxed));

        let mut delivered = 0;
        for slot in subscribers.iter() {
            if !message.starts_with(&slot.topic) {
                continue;
            }
            match slot.queue.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.shared.messages_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!("Subscriber {} queue full, dropping message", slot.remote);
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
        Ok(delivered)
    }

    /// Number of subscribers that completed their handshake
    pub fn subscriber_count(&self) -> usize {
        self.shared
            .subscribers
            .lock()
            .iter()
            .filter(|slot| slot.alive.load(Ordering::Relaxed))
            .count()
    }

    /// Get statistics
    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            subscribers: self.subscriber_count(),
            messages_sent: self.shared.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.shared.messages_dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting, disconnect subscribers and join all threads. Idempotent.
    pub fn close(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
            tracing::debug!("Publisher on {} closed", self.local_addr);
        }
        self.shared.subscribers.lock().clear();
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.close();
    }
}

/// Publisher statistics
#[derive(Debug, Clone, Default)]
pub struct PublisherStats {
    pub subscribers: usize,
    pub messages_sent: u64,
    pub messages_dropped: u64,
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    let mut connections: Vec<JoinHandle<()>> = Vec::new();

    while !shared.shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, remote)) => {
                let conn_shared = shared.clone();
                let spawned = thread::Builder::new()
                    .name(format!("pub-{}", remote))
                    .spawn(move || serve_subscriber(stream, remote, conn_shared));
                match spawned {
                    Ok(handle) => connections.push(handle),
                    Err(e) => tracing::warn!("Failed to spawn writer for {}: {}", remote, e),
                }
                connections.retain(|handle| !handle.is_finished());
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }

    for handle in connections {
        let _ = handle.join();
    }
}

fn serve_subscriber(mut stream: TcpStream, remote: SocketAddr, shared: Arc<Shared>) {
    // accepted sockets inherit O_NONBLOCK on some platforms
    let setup = stream
        .set_nonblocking(false)
        .and_then(|_| stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)))
        .and_then(|_| stream.set_write_timeout(Some(WRITE_TIMEOUT)))
        .and_then(|_| stream.set_nodelay(true))
        .and_then(|_| SockRef::from(&stream).set_keepalive(true));
    if let Err(e) = setup {
        tracing::debug!("Dropping subscriber {}: {}", remote, e);
        return;
    }

    let topic = match read_subscription(&mut stream) {
        Ok(topic) => topic,
        Err(e) => {
            tracing::debug!("Subscriber {} sent no subscription: {}", remote, e);
            return;
        }
    };

    let (queue, outbound) = bounded::<Bytes>(shared.high_water_mark);
    let alive = Arc::new(AtomicBool::new(true));
    shared.subscribers.lock().push(SubscriberSlot {
        remote,
        topic: topic.clone(),
        queue,
        alive: alive.clone(),
    });
    tracing::info!(
        "Subscriber {} joined (topic {:?})",
        remote,
        String::from_utf8_lossy(&topic)
    );

    write_loop(&mut stream, remote, &outbound, &shared);

    alive.store(false, Ordering::Relaxed);
    let _ = stream.shutdown(Shutdown::Both);
    tracing::info!("Subscriber {} left", remote);
}

fn write_loop(stream: &mut TcpStream, remote: SocketAddr, outbound: &Receiver<Bytes>, shared: &Shared) {
    let mut buffer = BytesMut::new();

    while !shared.shutdown.load(Ordering::Relaxed) {
        match outbound.recv_timeout(QUEUE_POLL_INTERVAL) {
            Ok(message) => {
                buffer.clear();
                encode_message(&message, &mut buffer);
                if let Err(e) = stream.write_all(&buffer) {
                    tracing::debug!("Write to subscriber {} failed: {}", remote, e);
                    return;
                }
                shared.messages_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
