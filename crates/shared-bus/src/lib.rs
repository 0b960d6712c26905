//! # Shared Bus - Change Replication Between Replicas
//!
//! Carries change notifications from the master's RAM store to every
//! follower, and to local components on every node.
//!
//! ```text
//!            master                                   follower
//! ┌───────────────────────────┐          ┌───────────────────────────┐
//! │   EventBusAggregator      │          │   EventBusAggregator      │
//! │  ┌──────────┐ ┌─────────┐ │   TCP    │ ┌──────────┐ ┌──────────┐ │
//! │  │ Internal │ │ Network │─┼─────────▶┼─│ Network  │ │ Internal │ │
//! │  │   Bus    │ │Publisher│ │ frames   │ │Subscriber│ │   Bus    │ │
//! │  └──────────┘ └────┬────┘ │          │ └────┬─────┘ └──────────┘ │
//! │                    │      │          │      ▼                    │
//! │        DeferredRegistry   │          │   apply handler           │
//! └───────────────────────────┘          └───────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Topic isolation:** a subscriber only sees events of its topic.
//! - **Per-stream order:** events reach a connected subscriber in publish
//!   order, without duplicates or gaps.
//! - **Deferred redelivery:** events a stream failed to send are replayed,
//!   ahead of newer events, when the same client subscribes again within
//!   the deferral TTL.
//! - **Backpressure:** publishing waits on a full subscription queue.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod aggregator;
pub mod config;
pub mod deferred;
pub mod errors;
pub mod events;
pub mod internal;
pub mod publisher;
pub mod subscriber;
pub mod subscribers_cache;
pub mod wire;

pub use aggregator::EventBusAggregator;
pub use config::{BusConfig, DialPolicy};
pub use deferred::DeferredRegistry;
pub use errors::{BusError, SubscribeError};
pub use events::{topics, BusMessage, Event, EventKind, LocalNotice};
pub use internal::{Handler, InternalBus, LocalSubscription};
pub use publisher::{NetworkPublisher, SnapshotSource};
pub use subscriber::NetworkSubscriber;
pub use subscribers_cache::{HandleId, SubscriberHandle, SubscribersCache};
