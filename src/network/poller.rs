//! Readiness multiplexing across inbound queues
//!
//! Every source the controller waits on (peer subscriptions, console lines,
//! audio batches, video frames) is a `crossbeam_channel::Receiver`. A
//! [`Poller`] registers any mix of them, blocks until at least one has data
//! or the timeout elapses, and reports the ready set.

use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Select};

/// Identifies a registered source within one [`Poller`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(usize);

/// Set of ready sources returned by [`Poller::poll`]
#[derive(Debug, Clone, Default)]
pub struct Events {
    ready: Vec<Token>,
}

impl Events {
    pub fn contains(&self, token: Token) -> bool {
        self.ready.contains(&token)
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ready.len()
    }
}

/// Bounded-timeout readiness check over a set of receivers
pub struct Poller<'a> {
    select: Select<'a>,
    probes: Vec<Box<dyn Fn() -> bool + 'a>>,
}

impl<'a> Poller<'a> {
    pub fn new() -> Self {
        Self {
            select: Select::new(),
            probes: Vec::new(),
        }
    }

    /// Watch `receiver` for pending messages
    pub fn register<T>(&mut self, receiver: &'a Receiver<T>) -> Token {
        let index = self.select.recv(receiver);
        debug_assert_eq!(index, self.probes.len());
        self.probes.push(Box::new(move || !receiver.is_empty()));
        Token(index)
    }

    /// Block until a registered source is ready or `timeout` elapses.
    ///
    /// Returns immediately when something is already pending. A source whose
    /// senders are all gone is reported ready so the caller can observe the
    /// disconnection on its next `try_recv`.
    pub fn poll(&mut self, timeout: Duration) -> Events {
        if self.probes.is_empty() {
            thread::sleep(timeout);
            return Events::default();
        }

        let events = self.pending();
        if !events.is_empty() {
            return events;
        }

        match self.select.ready_timeout(timeout) {
            Ok(index) => {
                let mut events = self.pending();
                let token = Token(index);
                if !events.contains(token) {
                    events.ready.push(token);
                }
                events
            }
            Err(_) => Events::default(),
        }
    }

    fn pending(&self) -> Events {
        Events {
            ready: self
                .probes
                .iter()
                .enumerate()
                .filter(|(_, probe)| probe())
                .map(|(index, _)| Token(index))
                .collect(),
        }
    }
}

impl Default for Poller<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::time::Instant;

    #[test]
    fn test_poll_reports_only_ready_sources() {
        let (tx_a, rx_a) = unbounded::<u32>();
        let (_tx_b, rx_b) = unbounded::<String>();
        tx_a.send(1).unwrap();

        let mut poller = Poller::new();
        let a = poller.register(&rx_a);
        let b = poller.register(&rx_b);

        let events = poller.poll(Duration::from_millis(500));
        assert!(events.contains(a));
        assert!(!events.contains(b));
    }

    #[test]
    fn test_poll_times_out() {
        let (_tx, rx) = unbounded::<u32>();
        let mut poller = Poller::new();
        poller.register(&rx);

        let start = Instant::now();
        let events = poller.poll(Duration::from_millis(50));
        assert!(events.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_poll_wakes_on_send() {
        let (tx, rx) = unbounded::<u32>();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.send(7).unwrap();
            tx
        });

        let mut poller = Poller::new();
        let token = poller.register(&rx);
        let start = Instant::now();
        let events = poller.poll(Duration::from_secs(5));

        assert!(events.contains(token));
        assert!(start.elapsed() < Duration::from_secs(5));
        drop(handle.join());
    }

    #[test]
    fn test_disconnected_source_is_ready() {
        let (tx, rx) = unbounded::<u32>();
        drop(tx);

        let mut poller = Poller::new();
        let token = poller.register(&rx);
        assert!(poller.poll(Duration::from_secs(1)).contains(token));
    }
}
