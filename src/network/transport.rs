//! Transport: the local publisher plus one filtered subscriber per peer

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::constants::{DEFAULT_HIGH_WATER_MARK, MAX_MESSAGE_SIZE, RECONNECT_INTERVAL};
use crate::error::NetworkError;
use crate::network::poller::{Poller, Token};
use crate::network::publisher::{Publisher, PublisherStats};
use crate::network::subscriber::{Subscriber, SubscriberStats};
use crate::protocol::RoomCode;

/// Tuning for queues and reconnection
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Outbound queue depth per subscriber
    pub send_high_water_mark: usize,
    /// Inbound queue depth per peer
    pub recv_high_water_mark: usize,
    /// Delay between attempts to reach an absent peer
    pub reconnect_interval: Duration,
    /// Largest message accepted in either direction
    pub max_message_size: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            send_high_water_mark: DEFAULT_HIGH_WATER_MARK,
            recv_high_water_mark: DEFAULT_HIGH_WATER_MARK,
            reconnect_interval: RECONNECT_INTERVAL,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

/// Handle identifying one peer within a [`Transport`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(usize);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// A remote participant's endpoint and its subscription
pub struct Peer {
    id: PeerId,
    subscriber: Subscriber,
    inbound: Receiver<Bytes>,
    // keeps the queue connected for the transport's lifetime
    _inbound_tx: Sender<Bytes>,
}

impl Peer {
    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn address(&self) -> &str {
        self.subscriber.address()
    }

    pub fn is_connected(&self) -> bool {
        self.subscriber.is_connected()
    }

    pub fn stats(&self) -> SubscriberStats {
        self.subscriber.stats()
    }

    /// Queue of messages received from this peer
    pub fn receiver(&self) -> &Receiver<Bytes> {
        &self.inbound
    }
}

/// Outbound broadcast endpoint plus inbound filtered endpoints
pub struct Transport {
    room: RoomCode,
    publisher: Publisher,
    peers: Vec<Peer>,
    closed: bool,
}

impl Transport {
    /// Bind the local endpoint and subscribe to every peer.
    ///
    /// A bind failure is returned. A peer whose address cannot be resolved
    /// is skipped with a warning and the others are still connected.
    pub fn open(
        local_address: &str,
        peer_addresses: &[String],
        room: &RoomCode,
        options: TransportOptions,
    ) -> Result<Self, NetworkError> {
        let publisher = Publisher::bind(
            local_address,
            options.send_high_water_mark,
            options.max_message_size,
        )?;

        let topic = Bytes::copy_from_slice(room.as_bytes());
        let mut peers = Vec::with_capacity(peer_addresses.len());
        for address in peer_addresses {
            let (tx, rx) = bounded(options.recv_high_water_mark.max(1));
            match Subscriber::connect(
                address,
                topic.clone(),
                tx.clone(),
                options.reconnect_interval,
                options.max_message_size,
            ) {
                Ok(subscriber) => {
                    let id = PeerId(peers.len());
                    tracing::debug!("{} -> {} (room {})", id, address, room);
                    peers.push(Peer {
                        id,
                        subscriber,
                        inbound: rx,
                        _inbound_tx: tx,
                    });
                }
                Err(e) => tracing::warn!("Skipping peer {}: {}", address, e),
            }
        }

        Ok(Self {
            room: room.clone(),
            publisher,
            peers,
            closed: false,
        })
    }

    pub fn room(&self) -> &RoomCode {
        &self.room
    }

    /// Address the publisher is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.publisher.local_addr()
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn peer(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(id.0)
    }

    /// Register every peer's inbound queue with `poller`
    pub fn register<'a>(&'a self, poller: &mut Poller<'a>) -> Vec<(Token, PeerId)> {
        self.peers
            .iter()
            .map(|peer| (poller.register(peer.receiver()), peer.id))
            .collect()
    }

    /// Peers with at least one pending message, waiting up to `timeout`
    pub fn poll_readable(&self, timeout: Duration) -> Vec<PeerId> {
        let mut poller = Poller::new();
        let tokens = self.register(&mut poller);
        let events = poller.poll(timeout);
        tokens
            .into_iter()
            .filter(|(token, _)| events.contains(*token))
            .map(|(_, id)| id)
            .collect()
    }

    /// Take at most one pending message from `peer`. Never blocks.
    pub fn receive_from(&self, peer: PeerId) -> Option<Bytes> {
        if self.closed {
            return None;
        }
        self.peer(peer)?.inbound.try_recv().ok()
    }

    /// Send `message` to every subscriber of the local endpoint
    pub fn broadcast(&self, message: Bytes) -> Result<usize, NetworkError> {
        if self.closed {
            return Err(NetworkError::Closed);
        }
        self.publisher.broadcast(message)
    }

    pub fn publisher_stats(&self) -> PublisherStats {
        self.publisher.stats()
    }

    /// Release every endpoint. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for peer in &mut self.peers {
            peer.subscriber.close();
        }
        self.publisher.close();
        tracing::info!("Transport closed");
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}
