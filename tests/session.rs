//! Two sessions talking over localhost

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use crossbeam_channel::unbounded;
use parking_lot::Mutex;

use peerchat::audio::{AudioPipeline, NullBackend};
use peerchat::codec::{pack_samples, PcmEncoder};
use peerchat::config::AudioConfig;
use peerchat::network::{Transport, TransportOptions};
use peerchat::protocol::{Frame, Identity, MediaType, RoomCode, Username};
use peerchat::session::{Flow, InputEvent, Session};
use peerchat::ui::MessageSink;

type Shown = Arc<Mutex<Vec<(String, String)>>>;

struct Recorder(Shown);

impl MessageSink for Recorder {
    fn display_message(&mut self, username: &str, text: &str) {
        self.0.lock().push((username.to_string(), text.to_string()));
    }
}

fn identity(name: &str) -> Identity {
    Identity::new(Username::new(name).unwrap(), RoomCode::new("abcde").unwrap())
}

fn wait_for_subscriber(transport: &Transport) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while transport.publisher_stats().subscribers == 0 {
        assert!(Instant::now() < deadline, "peer never subscribed");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn typed_line_is_displayed_once_by_peer() {
    let alice_id = identity("alice");
    let alice_transport =
        Transport::open("127.0.0.1:0", &[], &alice_id.room, TransportOptions::default()).unwrap();
    let (alice_input, alice_rx) = unbounded();
    let mut alice = Session::new(
        alice_id,
        alice_transport,
        alice_rx,
        Box::new(Recorder(Shown::default())),
    )
    .with_poll_timeout(Duration::from_millis(50));

    let bob_id = identity("bob");
    let peers = vec![alice.transport().local_addr().to_string()];
    let bob_transport =
        Transport::open("127.0.0.1:0", &peers, &bob_id.room, TransportOptions::default()).unwrap();
    let shown = Shown::default();
    let (_bob_input, bob_rx) = unbounded::<InputEvent>();
    let mut bob = Session::new(bob_id, bob_transport, bob_rx, Box::new(Recorder(shown.clone())))
        .with_poll_timeout(Duration::from_millis(500));

    wait_for_subscriber(alice.transport());

    alice_input.send(InputEvent::Line("hello".into())).unwrap();
    assert_eq!(alice.poll_once(), Flow::Continue);
    assert_eq!(alice.stats().text_sent, 1);

    // one poll cycle picks the message up once it is in flight
    let deadline = Instant::now() + Duration::from_secs(5);
    while shown.lock().is_empty() && Instant::now() < deadline {
        assert_eq!(bob.poll_once(), Flow::Continue);
    }
    bob.poll_once();

    assert_eq!(
        *shown.lock(),
        vec![("alice".to_string(), "hello".to_string())]
    );
    assert_eq!(bob.stats().text_received, 1);

    alice_input.send(InputEvent::Quit).unwrap();
    assert_eq!(alice.poll_once(), Flow::Quit);
}

#[test]
fn audio_frames_reach_the_speaker_registry() {
    let sender_transport = Transport::open(
        "127.0.0.1:0",
        &[],
        &RoomCode::new("abcde").unwrap(),
        TransportOptions::default(),
    )
    .unwrap();

    let bob_id = identity("bob");
    let peers = vec![sender_transport.local_addr().to_string()];
    let bob_transport =
        Transport::open("127.0.0.1:0", &peers, &bob_id.room, TransportOptions::default()).unwrap();
    let (_bob_input, bob_rx) = unbounded::<InputEvent>();
    let mut bob = Session::new(bob_id, bob_transport, bob_rx, Box::new(Recorder(Shown::default())))
        .with_audio(AudioPipeline::start(
            &AudioConfig::default(),
            Arc::new(NullBackend),
        ))
        .with_poll_timeout(Duration::from_millis(100));

    wait_for_subscriber(&sender_transport);

    let mut packed = BytesMut::new();
    pack_samples(&[1, 2, 3, 4], &mut packed);
    let payload = PcmEncoder::new(6).encode(&packed).unwrap();
    for user in ["alice", "carol"] {
        let frame = Frame::new(
            RoomCode::new("abcde").unwrap(),
            Username::new(user).unwrap(),
            MediaType::Audio,
            payload.clone(),
        );
        sender_transport.broadcast(frame.encode()).unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while bob.stats().audio_received < 2 && Instant::now() < deadline {
        bob.poll_once();
    }

    let audio = bob.audio().unwrap();
    assert_eq!(audio.speakers(), vec!["alice", "carol"]);
    assert_eq!(bob.stats().malformed, 0);
}
