// ABOUTME: Listener registry and packet dispatch
// ABOUTME: Decodes inbound packets and routes each message to every matching listener

use crate::protocol::{decode_data, pattern_match, Message};
use crate::transport::ListenerFn;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::SocketAddr;

/// Default number of unmatched addresses remembered
pub const DEFAULT_DISREGARDED_LIMIT: usize = 1024;

/// Ordered table of `(pattern, listener)` pairs shared by a receiver and its
/// receive loops.
///
/// Listeners run on the receive task while the table is locked, so a
/// listener must not register or remove listeners on the same receiver.
pub struct Dispatcher {
    listeners: Mutex<Vec<(String, ListenerFn)>>,
    disregarded: Mutex<HashSet<String>>,
    disregarded_limit: usize,
}

impl Dispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self::with_disregarded_limit(DEFAULT_DISREGARDED_LIMIT)
    }

    /// Create an empty dispatcher remembering at most `limit` unmatched addresses
    pub fn with_disregarded_limit(limit: usize) -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            disregarded: Mutex::new(HashSet::new()),
            disregarded_limit: limit.max(1),
        }
    }

    /// Replace the listener for `address`, or append a new one
    pub fn set_listener(&self, address: impl Into<String>, listener: ListenerFn) {
        let address = address.into();
        let mut listeners = self.listeners.lock();
        match listeners.iter_mut().find(|(pattern, _)| *pattern == address) {
            Some(entry) => entry.1 = listener,
            None => listeners.push((address, listener)),
        }
    }

    /// Remove the listener registered for exactly `address`
    pub fn remove_listener(&self, address: &str) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(pattern, _)| pattern != address);
        before != listeners.len()
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Decode `data` and dispatch every message it contains.
    ///
    /// Decode errors are logged; messages decoded before the error are still
    /// dispatched. Returns the number of listener invocations.
    pub fn dispatch_methods(&self, data: &[u8], sender: SocketAddr) -> usize {
        let mut messages = Vec::new();
        if let Err(e) = decode_data(data, &mut messages, None) {
            log::error!("Problem parsing packet from {}: {}", sender, e);
        }
        messages
            .iter_mut()
            .map(|message| {
                message.set_sender(sender);
                self.dispatch_message(message)
            })
            .sum()
    }

    /// Run every listener whose pattern matches the message address, in
    /// registration order. Returns the number of listeners run.
    pub fn dispatch_message(&self, message: &Message) -> usize {
        let listeners = self.listeners.lock();
        let mut dispatched = 0;
        for (pattern, listener) in listeners.iter() {
            if pattern_match(message.address(), pattern) {
                listener(message);
                dispatched += 1;
            }
        }
        drop(listeners);

        if dispatched == 0 {
            self.disregard(message.address());
        }
        dispatched
    }

    fn disregard(&self, address: &str) {
        let mut disregarded = self.disregarded.lock();
        if disregarded.contains(address) {
            return;
        }
        if disregarded.len() >= self.disregarded_limit {
            disregarded.clear();
        }
        disregarded.insert(address.to_string());
        log::warn!("Message: {} doesn't have a listener. Disregarding.", address);
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let patterns: Vec<String> = self
            .listeners
            .lock()
            .iter()
            .map(|(pattern, _)| pattern.clone())
            .collect();
        f.debug_struct("Dispatcher")
            .field("patterns", &patterns)
            .field("disregarded_limit", &self.disregarded_limit)
            .finish()
    }
}
