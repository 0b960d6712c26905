//! # Deferred Message Registry
//!
//! Holds events a publisher failed to deliver, keyed by (client id, topic),
//! until the same client subscribes to the same topic again.
//!
//! ## Expiry
//!
//! - Every push refreshes the entry's deadline to `now + ttl`.
//! - An expired entry is never returned; [`DeferredRegistry::sweep`] drops
//!   expired entries and is run periodically by the publisher.
//! - Evicted events are logged and counted in
//!   `mesh_bus_deferred_evicted_total`. A client that lost events this way
//!   has to bootstrap from a snapshot.
//!
//! Only [`Event`]s can be deferred; the publisher's terminal marker is a
//! different type and never reaches this registry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use mesh_telemetry::{BUS_DEFERRED_EVICTED, BUS_EVENTS_DEFERRED};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::events::Event;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    client_id: String,
    topic: String,
}

#[derive(Debug)]
struct DeferredEntry {
    events: Vec<Event>,
    expires_at: Instant,
}

/// Time-bounded store of undelivered events.
#[derive(Debug)]
pub struct DeferredRegistry {
    entries: Mutex<HashMap<Key, DeferredEntry>>,
    ttl: Duration,
}

impl DeferredRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Appends an event for a client and refreshes the entry's deadline.
    pub fn push_message_for_client(&self, client_id: &str, topic: &str, event: Event) {
        self.push(client_id, topic, vec![event], false);
    }

    /// Appends several events, keeping their order.
    pub fn push_messages_for_client(&self, client_id: &str, topic: &str, events: Vec<Event>) {
        self.push(client_id, topic, events, false);
    }

    /// Inserts events ahead of anything already deferred for the client.
    ///
    /// Used when a failing stream hands back its unsent events: they are
    /// older than any event deferred for it since.
    pub fn prepend_messages_for_client(&self, client_id: &str, topic: &str, events: Vec<Event>) {
        self.push(client_id, topic, events, true);
    }

    fn push(&self, client_id: &str, topic: &str, mut events: Vec<Event>, front: bool) {
        if events.is_empty() {
            return;
        }
        let count = events.len();
        let now = Instant::now();
        let key = Key {
            client_id: client_id.to_string(),
            topic: topic.to_string(),
        };

        let mut entries = self.entries.lock();
        let entry = entries.entry(key).or_insert_with(|| DeferredEntry {
            events: Vec::new(),
            expires_at: now,
        });
        if entry.expires_at < now && !entry.events.is_empty() {
            evicted(client_id, topic, entry.events.len());
            entry.events.clear();
        }
        if front {
            events.append(&mut entry.events);
            entry.events = events;
        } else {
            entry.events.append(&mut events);
        }
        entry.expires_at = now + self.ttl;
        let pending = entry.events.len();
        drop(entries);

        BUS_EVENTS_DEFERRED
            .with_label_values(&[topic])
            .inc_by(count as f64);
        debug!(client_id, topic, count, pending, "Events deferred");
    }

    /// Removes and returns the events deferred for a client and topic.
    ///
    /// Returns `None` if nothing is deferred or the entry has expired.
    pub fn pop_messages(&self, client_id: &str, topic: &str) -> Option<Vec<Event>> {
        let key = Key {
            client_id: client_id.to_string(),
            topic: topic.to_string(),
        };
        let entry = self.entries.lock().remove(&key)?;
        if entry.expires_at < Instant::now() {
            evicted(client_id, topic, entry.events.len());
            return None;
        }
        if entry.events.is_empty() {
            return None;
        }
        Some(entry.events)
    }

    /// Drops every expired entry. Returns the number of events discarded.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.entries.lock().retain(|key, entry| {
            if entry.expires_at < now {
                expired.push((key.clone(), entry.events.len()));
                false
            } else {
                true
            }
        });

        let mut total = 0;
        for (key, count) in expired {
            evicted(&key.client_id, &key.topic, count);
            total += count;
        }
        total
    }

    /// Number of deferred events across all clients.
    pub fn len(&self) -> usize {
        self.entries.lock().values().map(|e| e.events.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

fn evicted(client_id: &str, topic: &str, count: usize) {
    if count == 0 {
        return;
    }
    BUS_DEFERRED_EVICTED.inc_by(count as f64);
    warn!(
        client_id,
        topic, count, "Deferred events expired before the client reconnected"
    );
}
