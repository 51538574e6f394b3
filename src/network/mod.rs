//! Network subsystem: peer-to-peer pub/sub over TCP
//!
//! One [`Publisher`] fans the local stream out to every subscriber; one
//! [`Subscriber`] per configured peer pulls that peer's stream, filtered by
//! the room code. [`Transport`] owns both sides.

pub mod framing;
pub mod poller;
pub mod publisher;
pub mod subscriber;
pub mod transport;

pub use poller::{Events, Poller, Token};
pub use publisher::{Publisher, PublisherStats};
pub use subscriber::{Subscriber, SubscriberStats};
pub use transport::{Peer, PeerId, Transport, TransportOptions};

use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::NetworkError;

/// Resolve a `host:port` string to its first socket address
pub(crate) fn resolve(address: &str) -> Result<SocketAddr, NetworkError> {
    let invalid = |reason: String| NetworkError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    address
        .to_socket_addrs()
        .map_err(|e| invalid(e.to_string()))?
        .next()
        .ok_or_else(|| invalid("no addresses found".to_string()))
}
