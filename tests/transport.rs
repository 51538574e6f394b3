//! Transport behavior over real localhost sockets

use std::time::{Duration, Instant};

use bytes::Bytes;
use peerchat::error::NetworkError;
use peerchat::network::{Transport, TransportOptions};
use peerchat::protocol::{Frame, MediaType, RoomCode, Username};

const WAIT: Duration = Duration::from_secs(5);

fn room(code: &str) -> RoomCode {
    RoomCode::new(code).unwrap()
}

fn open(code: &str, peers: &[&Transport]) -> Transport {
    let peers: Vec<String> = peers.iter().map(|t| t.local_addr().to_string()).collect();
    Transport::open("127.0.0.1:0", &peers, &room(code), TransportOptions::default()).unwrap()
}

fn text(code: &str, user: &str, body: &'static str) -> Bytes {
    Frame::new(
        room(code),
        Username::new(user).unwrap(),
        MediaType::Text,
        body.as_bytes(),
    )
    .encode()
}

fn wait_for_subscribers(publisher: &Transport, count: usize) {
    let deadline = Instant::now() + WAIT;
    while publisher.publisher_stats().subscribers < count {
        assert!(Instant::now() < deadline, "subscribers never connected");
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Wait for one message from any peer of `transport`
fn receive_any(transport: &Transport, within: Duration) -> Option<Bytes> {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        for peer in transport.poll_readable(Duration::from_millis(50)) {
            if let Some(message) = transport.receive_from(peer) {
                return Some(message);
            }
        }
    }
    None
}

#[test]
fn room_code_filters_delivery() {
    let alice = open("aaaaa", &[]);
    let same_room = open("aaaaa", &[&alice]);
    let other_room = open("bbbbb", &[&alice]);
    wait_for_subscribers(&alice, 2);

    let delivered = alice.broadcast(text("aaaaa", "alice", "hi")).unwrap();
    assert_eq!(delivered, 1);

    let message = receive_any(&same_room, WAIT).expect("same room got nothing");
    let frame = Frame::decode(message).unwrap();
    assert_eq!(frame.username.as_str(), "alice");
    assert_eq!(&frame.payload[..], b"hi");

    assert!(receive_any(&other_room, Duration::from_millis(300)).is_none());
}

#[test]
fn inbound_merges_every_peer() {
    let alice = open("abcde", &[]);
    let bob = open("abcde", &[]);
    let carol = open("abcde", &[&alice, &bob]);
    wait_for_subscribers(&alice, 1);
    wait_for_subscribers(&bob, 1);

    alice.broadcast(text("abcde", "alice", "from alice")).unwrap();
    bob.broadcast(text("abcde", "bob", "from bob")).unwrap();

    let mut senders: Vec<String> = (0..2)
        .map(|_| {
            let message = receive_any(&carol, WAIT).expect("missing message");
            Frame::decode(message).unwrap().username.as_str().to_string()
        })
        .collect();
    senders.sort();
    assert_eq!(senders, vec!["alice", "bob"]);
}

#[test]
fn messages_from_one_peer_keep_order() {
    let alice = open("abcde", &[]);
    let bob = open("abcde", &[&alice]);
    wait_for_subscribers(&alice, 1);

    let bodies = ["one", "two", "three", "four"];
    for body in bodies {
        alice.broadcast(text("abcde", "alice", body)).unwrap();
    }

    for body in bodies {
        let frame = Frame::decode(receive_any(&bob, WAIT).unwrap()).unwrap();
        assert_eq!(&frame.payload[..], body.as_bytes());
    }
}

#[test]
fn bad_peer_does_not_stop_the_rest() {
    let alice = open("abcde", &[]);
    let peers = vec![
        "not an address".to_string(),
        alice.local_addr().to_string(),
        // resolvable but nobody listens; retried in the background
        "127.0.0.1:1".to_string(),
    ];
    let bob =
        Transport::open("127.0.0.1:0", &peers, &room("abcde"), TransportOptions::default()).unwrap();
    assert_eq!(bob.peers().len(), 2);

    wait_for_subscribers(&alice, 1);
    alice.broadcast(text("abcde", "alice", "still here")).unwrap();
    assert!(receive_any(&bob, WAIT).is_some());
    assert!(!bob.peers()[1].is_connected());
}

#[test]
fn subscriber_reconnects_when_peer_starts_late() {
    let placeholder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = placeholder.local_addr().unwrap().to_string();
    drop(placeholder);

    let bob = Transport::open(
        "127.0.0.1:0",
        &[address.clone()],
        &room("abcde"),
        TransportOptions::default(),
    )
    .unwrap();
    std::thread::sleep(Duration::from_millis(200));

    let alice =
        Transport::open(&address, &[], &room("abcde"), TransportOptions::default()).unwrap();
    wait_for_subscribers(&alice, 1);
    alice.broadcast(text("abcde", "alice", "late")).unwrap();
    assert!(receive_any(&bob, WAIT).is_some());
}

#[test]
fn bind_failures_are_reported() {
    let alice = open("abcde", &[]);
    let taken = alice.local_addr().to_string();

    let result = Transport::open(&taken, &[], &room("abcde"), TransportOptions::default());
    assert!(matches!(result, Err(NetworkError::BindFailed { .. })));

    let result = Transport::open("nowhere", &[], &room("abcde"), TransportOptions::default());
    assert!(matches!(result, Err(NetworkError::InvalidAddress { .. })));
}

#[test]
fn closed_transport_refuses_to_send() {
    let mut alice = open("abcde", &[]);
    alice.close();
    alice.close();
    assert!(matches!(
        alice.broadcast(text("abcde", "alice", "x")),
        Err(NetworkError::Closed)
    ));
}
