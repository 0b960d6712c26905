//! # Internal Bus
//!
//! Single-process pub/sub. Every node runs one, whatever its role, so local
//! components receive the same notifications on master and followers.
//! Handlers run synchronously on the publishing task.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::events::BusMessage;
use crate::subscribers_cache::{HandleId, SubscriberHandle, SubscribersCache};

/// Callback invoked for every message on a subscribed topic.
pub type Handler = Arc<dyn Fn(BusMessage) + Send + Sync>;

/// A handler registered on the internal bus.
#[derive(Clone)]
pub struct LocalSubscription {
    id: HandleId,
    handler: Handler,
}

impl SubscriberHandle for LocalSubscription {
    fn handle_id(&self) -> HandleId {
        self.id
    }
}

impl fmt::Debug for LocalSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSubscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// In-process event bus.
#[derive(Default)]
pub struct InternalBus {
    subscribers: SubscribersCache<LocalSubscription>,
}

impl InternalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler; keep the returned value to unsubscribe.
    pub fn subscribe(&self, topic: &str, handler: Handler) -> LocalSubscription {
        let subscription = LocalSubscription {
            id: HandleId::next(),
            handler,
        };
        self.subscribers.add(topic, subscription.clone());
        subscription
    }

    pub fn unsubscribe(&self, topic: &str, subscription: &LocalSubscription) -> bool {
        self.subscribers.remove(topic, subscription)
    }

    /// Delivers a message to every handler of the topic, in registration
    /// order. Returns the number of handlers called.
    ///
    /// Handlers are called on a copy of the topic's list, so they may
    /// subscribe or unsubscribe themselves.
    pub fn publish(&self, topic: &str, message: &BusMessage) -> usize {
        let handlers = self.subscribers.snapshot_topic(topic);
        for subscription in &handlers {
            (subscription.handler)(message.clone());
        }
        trace!(topic, kind = message.kind_name(), handlers = handlers.len(), "Published locally");
        handlers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{topics, LocalNotice};
    use parking_lot::Mutex;
    use shared_types::{ChangeSet, NodeRole};

    fn recorder() -> (Handler, Arc<Mutex<Vec<BusMessage>>>) {
        let seen = Arc::new(Mutex::new(Vec::<BusMessage>::new()));
        let sink = Arc::clone(&seen);
        let handler: Handler = Arc::new(move |m: BusMessage| sink.lock().push(m));
        (handler, seen)
    }

    #[test]
    fn test_publish_reaches_only_topic_handlers() {
        let bus = InternalBus::new();
        let (changes, changes_seen) = recorder();
        let (reload, reload_seen) = recorder();
        bus.subscribe(topics::CHANGES, changes);
        bus.subscribe(topics::FULL_RELOAD, reload);

        let message = BusMessage::Change(ChangeSet::default());
        assert_eq!(bus.publish(topics::CHANGES, &message), 1);

        assert_eq!(*changes_seen.lock(), vec![message]);
        assert!(reload_seen.lock().is_empty());
    }

    #[test]
    fn test_unsubscribe() {
        let bus = InternalBus::new();
        let (handler, seen) = recorder();
        let sub = bus.subscribe(topics::ROLE_CHANGES, handler);
        assert!(bus.unsubscribe(topics::ROLE_CHANGES, &sub));

        let notice = BusMessage::Local(LocalNotice::RoleChanged(NodeRole::Slave));
        assert_eq!(bus.publish(topics::ROLE_CHANGES, &notice), 0);
        assert!(seen.lock().is_empty());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_handler_may_subscribe_during_publish() {
        let bus = Arc::new(InternalBus::new());
        let inner = Arc::clone(&bus);
        bus.subscribe(
            "t",
            Arc::new(move |_: BusMessage| {
                inner.subscribe("t", Arc::new(|_: BusMessage| {}));
            }),
        );
        assert_eq!(bus.publish("t", &BusMessage::Snapshot(Vec::new())), 1);
        assert_eq!(bus.subscriber_count(), 2);
    }
}
