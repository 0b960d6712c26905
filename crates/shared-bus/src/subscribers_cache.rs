//! # Subscribers Cache
//!
//! Thread-safe registry mapping a topic to its ordered list of subscription
//! handles.
//!
//! ## Locking
//!
//! The outer map is guarded by one lock and is only write-locked to create a
//! topic entry. Each topic has its own lock: mutations take it exclusively,
//! iterations take it shared for the whole walk, so a callback always sees
//! one consistent list for that topic. Callbacks must not add or remove
//! handles on the topic they are iterating.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Identity of a subscription handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    /// Allocates a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A handle that can be stored in a [`SubscribersCache`].
///
/// Handles are compared by [`SubscriberHandle::handle_id`] on removal.
pub trait SubscriberHandle: Clone + Send + Sync {
    fn handle_id(&self) -> HandleId;
}

type TopicList<H> = Arc<RwLock<Vec<H>>>;

/// Topic → handles registry.
pub struct SubscribersCache<H> {
    topics: RwLock<HashMap<String, TopicList<H>>>,
    size: AtomicUsize,
}

impl<H: SubscriberHandle> SubscribersCache<H> {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            size: AtomicUsize::new(0),
        }
    }

    fn topic(&self, topic: &str) -> Option<TopicList<H>> {
        self.topics.read().get(topic).cloned()
    }

    fn topic_or_create(&self, topic: &str) -> TopicList<H> {
        if let Some(list) = self.topic(topic) {
            return list;
        }
        Arc::clone(self.topics.write().entry(topic.to_string()).or_default())
    }

    /// Appends a handle to a topic.
    pub fn add(&self, topic: &str, handle: H) {
        let list = self.topic_or_create(topic);
        list.write().push(handle);
        self.size.fetch_add(1, Ordering::AcqRel);
    }

    /// Removes a handle from a topic. Returns whether it was present.
    pub fn remove(&self, topic: &str, handle: &H) -> bool {
        let Some(list) = self.topic(topic) else {
            return false;
        };
        let mut handles = list.write();
        let id = handle.handle_id();
        match handles.iter().position(|h| h.handle_id() == id) {
            Some(pos) => {
                handles.remove(pos);
                self.size.fetch_sub(1, Ordering::AcqRel);
                true
            }
            None => false,
        }
    }

    /// Calls `f` for each handle of `topic` in registration order until it
    /// returns `false`.
    pub fn for_each_sub_in_topic(&self, topic: &str, mut f: impl FnMut(&H) -> bool) {
        let Some(list) = self.topic(topic) else {
            return;
        };
        let handles = list.read();
        for handle in handles.iter() {
            if !f(handle) {
                break;
            }
        }
    }

    /// Calls `f` for each handle of every topic until it returns `false`.
    pub fn for_each(&self, mut f: impl FnMut(&str, &H) -> bool) {
        let lists: Vec<(String, TopicList<H>)> = self
            .topics
            .read()
            .iter()
            .map(|(t, l)| (t.clone(), Arc::clone(l)))
            .collect();
        for (topic, list) in lists {
            let handles = list.read();
            for handle in handles.iter() {
                if !f(&topic, handle) {
                    return;
                }
            }
        }
    }

    /// Copy of a topic's handles, for callers that must not hold the lock
    /// across an `.await`.
    pub fn snapshot_topic(&self, topic: &str) -> Vec<H> {
        self.topic(topic)
            .map(|list| list.read().clone())
            .unwrap_or_default()
    }

    /// Copy of every handle with its topic.
    pub fn snapshot_all(&self) -> Vec<(String, H)> {
        let mut all = Vec::with_capacity(self.len());
        self.for_each(|topic, handle| {
            all.push((topic.to_string(), handle.clone()));
            true
        });
        all
    }

    /// Total number of handles across topics.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn topic_len(&self, topic: &str) -> usize {
        self.topic(topic).map_or(0, |list| list.read().len())
    }
}

impl<H: SubscriberHandle> Default for SubscribersCache<H> {
    fn default() -> Self {
        Self::new()
    }
}
