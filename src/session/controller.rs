//! The controller loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, TryRecvError};

use crate::audio::AudioPipeline;
use crate::constants::SESSION_POLL_TIMEOUT;
use crate::network::{PeerId, Poller, Transport};
use crate::protocol::{Frame, Identity, MediaType};
use crate::session::stats::SessionStats;
use crate::ui::{InputEvent, MessageSink, VideoSink};

/// Whether the loop should keep going after an iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Locally captured video frames and the sink for received ones
pub struct VideoChannel {
    pub frames: Receiver<Bytes>,
    pub sink: Box<dyn VideoSink>,
}

/// One participant's chat session
pub struct Session {
    identity: Identity,
    transport: Transport,
    input: Receiver<InputEvent>,
    display: Box<dyn MessageSink>,
    audio: Option<AudioPipeline>,
    video: Option<VideoChannel>,
    video_open: bool,
    poll_timeout: Duration,
    idle_timeout: Option<Duration>,
    shutdown: Arc<AtomicBool>,
    stats: SessionStats,
    closed: bool,
}

impl Session {
    pub fn new(
        identity: Identity,
        transport: Transport,
        input: Receiver<InputEvent>,
        display: Box<dyn MessageSink>,
    ) -> Self {
        Self {
            identity,
            transport,
            input,
            display,
            audio: None,
            video: None,
            video_open: false,
            poll_timeout: SESSION_POLL_TIMEOUT,
            idle_timeout: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            stats: SessionStats::default(),
            closed: false,
        }
    }

    pub fn with_audio(mut self, audio: AudioPipeline) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_video(mut self, video: VideoChannel) -> Self {
        self.video = Some(video);
        self.video_open = true;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Close speaker streams that stay silent for `timeout`
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn audio(&self) -> Option<&AudioPipeline> {
        self.audio.as_ref()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Flag that stops the loop within one poll timeout once set
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Loop until the user quits or shutdown is requested, then release
    /// audio and transport
    pub fn run(mut self) -> SessionStats {
        tracing::info!(
            "Joined room {} as {} ({} peers)",
            self.identity.room,
            self.identity.username,
            self.transport.peers().len()
        );

        while self.poll_once() == Flow::Continue {}

        self.close();
        tracing::info!("Session ended: {}", self.stats);
        std::mem::take(&mut self.stats)
    }

    /// Wait for readiness once and handle whatever became ready
    pub fn poll_once(&mut self) -> Flow {
        if self.shutdown.load(Ordering::Relaxed) {
            return Flow::Quit;
        }

        let mut poller = Poller::new();
        let peers = self.transport.register(&mut poller);
        let input_token = poller.register(&self.input);
        let audio_token = self.audio.as_ref().map(|a| poller.register(a.batches()));
        let video_token = match &self.video {
            Some(video) if self.video_open => Some(poller.register(&video.frames)),
            _ => None,
        };
        let events = poller.poll(self.poll_timeout);
        drop(poller);

        for (token, peer) in peers {
            if events.contains(token) {
                self.drain_peer(peer);
            }
        }

        if events.contains(input_token) {
            match self.input.try_recv() {
                Ok(InputEvent::Line(line)) => self.send_text(line),
                Ok(InputEvent::Quit) | Err(TryRecvError::Disconnected) => return Flow::Quit,
                Err(TryRecvError::Empty) => {}
            }
        }

        if audio_token.is_some_and(|t| events.contains(t)) {
            self.send_audio();
        }

        if video_token.is_some_and(|t| events.contains(t)) {
            self.send_video();
        }

        if let (Some(audio), Some(idle)) = (&self.audio, self.idle_timeout) {
            audio.reap_idle(idle);
        }

        if self.shutdown.load(Ordering::Relaxed) {
            Flow::Quit
        } else {
            Flow::Continue
        }
    }

    /// Release audio and transport. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(audio) = self.audio.as_mut() {
            audio.stop();
        }
        self.transport.close();
    }

    fn drain_peer(&mut self, peer: PeerId) {
        while let Some(message) = self.transport.receive_from(peer) {
            self.handle_message(message);
        }
    }

    fn handle_message(&mut self, message: Bytes) {
        self.stats.frames_received += 1;

        let frame = match Frame::decode(message) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.malformed += 1;
                tracing::trace!("Discarding malformed frame: {}", e);
                return;
            }
        };

        if frame.room != self.identity.room {
            self.stats.foreign_room += 1;
            tracing::trace!("Discarding frame for room {}", frame.room);
            return;
        }

        match frame.media_type {
            MediaType::Text => match std::str::from_utf8(&frame.payload) {
                Ok(text) => {
                    self.stats.text_received += 1;
                    self.display.display_message(frame.username.as_str(), text);
                }
                Err(_) => {
                    self.stats.malformed += 1;
                    tracing::trace!("Discarding non UTF-8 text from {}", frame.username);
                }
            },
            MediaType::Audio => {
                self.stats.audio_received += 1;
                if let Some(audio) = &self.audio {
                    if let Err(e) = audio.play(frame.username.as_str(), &frame.payload) {
                        self.stats.malformed += 1;
                        tracing::trace!("Discarding audio from {}: {}", frame.username, e);
                    }
                }
            }
            MediaType::Video => {
                self.stats.video_received += 1;
                if let Some(video) = self.video.as_mut() {
                    video.sink.display_frame(frame.username.as_str(), &frame.payload);
                }
            }
        }
    }

    fn send_text(&mut self, line: String) {
        if self.send(MediaType::Text, Bytes::from(line)) {
            self.stats.text_sent += 1;
        }
    }

    fn send_audio(&mut self) {
        let batches: Vec<Bytes> = match &self.audio {
            Some(audio) => audio.batches().try_iter().collect(),
            None => return,
        };
        for batch in batches {
            if self.send(MediaType::Audio, batch) {
                self.stats.audio_sent += 1;
            }
        }
    }

    fn send_video(&mut self) {
        let Some(video) = &self.video else { return };
        match video.frames.try_recv() {
            Ok(frame) => {
                if self.send(MediaType::Video, frame) {
                    self.stats.video_sent += 1;
                }
            }
            Err(TryRecvError::Disconnected) => {
                tracing::debug!("Video source closed");
                self.video_open = false;
            }
            Err(TryRecvError::Empty) => {}
        }
    }

    fn send(&mut self, media_type: MediaType, payload: Bytes) -> bool {
        let frame = Frame::new(
            self.identity.room.clone(),
            self.identity.username.clone(),
            media_type,
            payload,
        );
        match self.transport.broadcast(frame.encode()) {
            Ok(_) => {
                self.stats.frames_sent += 1;
                true
            }
            Err(e) => {
                self.stats.send_errors += 1;
                tracing::warn!("Failed to send {:?} frame: {}", media_type, e);
                false
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::TransportOptions;
    use crate::protocol::{RoomCode, Username};
    use crossbeam_channel::unbounded;
    use parking_lot::Mutex;

    type Shown = Arc<Mutex<Vec<(String, String)>>>;

    struct Recorder(Shown);

    impl MessageSink for Recorder {
        fn display_message(&mut self, username: &str, text: &str) {
            self.0.lock().push((username.to_string(), text.to_string()));
        }
    }

    fn identity(name: &str) -> Identity {
        Identity::new(
            Username::new(name).unwrap(),
            RoomCode::new("abcde").unwrap(),
        )
    }

    fn session() -> (Session, Shown, crossbeam_channel::Sender<InputEvent>) {
        let me = identity("bob");
        let transport =
            Transport::open("127.0.0.1:0", &[], &me.room, TransportOptions::default()).unwrap();
        let (tx, rx) = unbounded();
        let shown = Shown::default();
        let session = Session::new(me, transport, rx, Box::new(Recorder(shown.clone())))
            .with_poll_timeout(Duration::from_millis(20));
        (session, shown, tx)
    }

    fn frame(room: &str, user: &str, media_type: MediaType, payload: &'static [u8]) -> Bytes {
        Frame::new(
            RoomCode::new(room).unwrap(),
            Username::new(user).unwrap(),
            media_type,
            payload,
        )
        .encode()
    }

    #[test]
    fn test_text_reaches_display() {
        let (mut session, shown, _tx) = session();
        session.handle_message(frame("abcde", "alice", MediaType::Text, b"hello"));

        assert_eq!(
            *shown.lock(),
            vec![("alice".to_string(), "hello".to_string())]
        );
        assert_eq!(session.stats().text_received, 1);
    }

    #[test]
    fn test_bad_frames_are_counted_and_dropped() {
        let (mut session, shown, _tx) = session();
        session.handle_message(Bytes::from_static(b"abc"));
        session.handle_message(frame("abcde", "alice", MediaType::Text, b"\xff\xfe"));
        session.handle_message(frame("zzzzz", "alice", MediaType::Text, b"hi"));

        assert!(shown.lock().is_empty());
        let stats = session.stats();
        assert_eq!(stats.frames_received, 3);
        assert_eq!(stats.malformed, 2);
        assert_eq!(stats.foreign_room, 1);
    }

    #[test]
    fn test_audio_without_pipeline_is_ignored() {
        let (mut session, _shown, _tx) = session();
        session.handle_message(frame("abcde", "alice", MediaType::Audio, b"\x78\x9c"));
        assert_eq!(session.stats().audio_received, 1);
        assert_eq!(session.stats().malformed, 0);
    }

    type Frames = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

    struct FrameRecorder(Frames);

    impl VideoSink for FrameRecorder {
        fn display_frame(&mut self, username: &str, frame: &[u8]) {
            self.0.lock().push((username.to_string(), frame.to_vec()));
        }
    }

    #[test]
    fn test_video_routing() {
        let (session, _shown, _tx) = session();
        let (frames_tx, frames_rx) = unbounded();
        let received = Frames::default();
        let mut session = session.with_video(VideoChannel {
            frames: frames_rx,
            sink: Box::new(FrameRecorder(received.clone())),
        });

        session.handle_message(frame("abcde", "alice", MediaType::Video, b"jpg"));
        assert_eq!(
            *received.lock(),
            vec![("alice".to_string(), b"jpg".to_vec())]
        );
        assert_eq!(session.stats().video_received, 1);

        frames_tx.send(Bytes::from_static(b"local")).unwrap();
        assert_eq!(session.poll_once(), Flow::Continue);
        assert_eq!(session.stats().video_sent, 1);
        assert_eq!(session.stats().frames_sent, 1);

        // a closed source stops video but not the session
        drop(frames_tx);
        assert_eq!(session.poll_once(), Flow::Continue);
        assert!(!session.video_open);
        assert_eq!(session.poll_once(), Flow::Continue);
        assert_eq!(session.stats().video_sent, 1);
        assert_eq!(received.lock().len(), 1);
    }

    #[test]
    fn test_typed_line_is_broadcast() {
        let (mut session, _shown, tx) = session();
        tx.send(InputEvent::Line("hi all".into())).unwrap();

        assert_eq!(session.poll_once(), Flow::Continue);
        assert_eq!(session.stats().text_sent, 1);
        assert_eq!(session.stats().frames_sent, 1);
    }

    #[test]
    fn test_quit_ends_loop() {
        let (session, _shown, tx) = session();
        tx.send(InputEvent::Quit).unwrap();
        let stats = session.run();
        assert_eq!(stats.frames_sent, 0);
    }

    #[test]
    fn test_shutdown_handle_stops_run() {
        let (session, _shown, _tx) = session();
        let shutdown = session.shutdown_handle();
        let handle = std::thread::spawn(move || session.run());

        std::thread::sleep(Duration::from_millis(50));
        shutdown.store(true, Ordering::SeqCst);
        assert!(handle.join().is_ok());
    }
}
