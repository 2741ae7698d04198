//! Correlation of subscribe/unsubscribe acknowledgements
//!
//! MQTT acknowledges requests by packet id, which is only known once the
//! event loop actually sends the packet. Requests are queued with their
//! correlation key when issued, bound to a packet id on the matching
//! outgoing event, and resolved when the broker's ack arrives. The event
//! loop sends requests in issue order, so the queue is FIFO per kind.

use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Default)]
pub struct PendingAcks {
    queued: VecDeque<(AckKind, String)>,
    in_flight: HashMap<u16, (AckKind, String)>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request about to be handed to the client
    pub fn enqueue(&mut self, kind: AckKind, correlation_key: &str) {
        self.queued.push_back((kind, correlation_key.to_string()));
    }

    /// Forget the most recent queued request, used when handing it over failed
    pub fn cancel(&mut self, kind: AckKind, correlation_key: &str) -> bool {
        let position = self
            .queued
            .iter()
            .rposition(|(k, key)| *k == kind && key == correlation_key);
        position.and_then(|index| self.queued.remove(index)).is_some()
    }

    /// Attach the oldest queued request of `kind` to the packet id it was sent with
    pub fn bind(&mut self, kind: AckKind, pkid: u16) -> Option<&str> {
        let index = self.queued.iter().position(|(k, _)| *k == kind)?;
        let entry = self.queued.remove(index)?;
        self.in_flight.insert(pkid, entry);
        self.in_flight.get(&pkid).map(|(_, key)| key.as_str())
    }

    /// Take the request acknowledged by `pkid`
    pub fn resolve(&mut self, kind: AckKind, pkid: u16) -> Option<String> {
        match self.in_flight.get(&pkid) {
            Some((k, _)) if *k == kind => self.in_flight.remove(&pkid).map(|(_, key)| key),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.queued.len() + self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.queued.clear();
        self.in_flight.clear();
    }
}
