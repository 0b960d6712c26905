//! # Deferred Redelivery
//!
//! A client whose stream failed gets the events deferred for it before any
//! live event once it subscribes again, while connected clients are served
//! immediately.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use shared_bus::{
        topics, BusConfig, BusMessage, Event, Handler, NetworkPublisher, NetworkSubscriber,
    };
    use shared_types::{ChangeRecord, ChangeSet};

    use crate::integration::{eventually, route};

    fn recorder() -> (Handler, Arc<Mutex<Vec<BusMessage>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (Arc::new(move |m: BusMessage| sink.lock().push(m)), seen)
    }

    fn routes_change(ids: &[&str]) -> BusMessage {
        BusMessage::Change(ChangeSet::new(
            ids.iter()
                .map(|id| ChangeRecord::insert(route(id, "l-1", "c-1", &format!("/{id}"))))
                .collect(),
        ))
    }

    async fn received(seen: &Arc<Mutex<Vec<BusMessage>>>, count: usize) -> bool {
        let seen = Arc::clone(seen);
        eventually(|| {
            let seen = Arc::clone(&seen);
            async move { seen.lock().len() >= count }
        })
        .await
    }

    #[tokio::test]
    async fn test_connected_clients_live_and_returning_client_deferred_first() {
        let config = BusConfig::for_tests();
        let publisher = NetworkPublisher::bind("127.0.0.1:0".parse().unwrap(), config.clone(), None)
            .await
            .unwrap();
        let addr = publisher.local_addr();

        let (handler_a, seen_a) = recorder();
        let (handler_b, seen_b) = recorder();
        let client_a = NetworkSubscriber::new(addr, "client-a", config.clone());
        let client_b = NetworkSubscriber::new(addr, "client-b", config.clone());
        client_a.subscribe(topics::CHANGES, handler_a).unwrap();
        client_b.subscribe(topics::CHANGES, handler_b).unwrap();
        let p = &publisher;
        assert!(eventually(|| async move { p.subscriber_count(topics::CHANGES) == 2 }).await);

        // client-c lost its stream while this event was in flight.
        let missed = routes_change(&["r-1", "r-2", "r-3"]);
        if let Some(event) = Event::encode(&missed).unwrap() {
            publisher
                .deferred()
                .push_message_for_client("client-c", topics::CHANGES, event);
        }
        assert_eq!(publisher.publish(topics::CHANGES, &missed).await.unwrap(), 2);
        assert!(received(&seen_a, 1).await);
        assert!(received(&seen_b, 1).await);
        assert_eq!(seen_a.lock()[0], missed);
        assert_eq!(seen_b.lock()[0], missed);

        let (handler_c, seen_c) = recorder();
        let client_c = NetworkSubscriber::new(addr, "client-c", config);
        client_c.subscribe(topics::CHANGES, handler_c).unwrap();
        assert!(received(&seen_c, 1).await);
        assert!(publisher.deferred().is_empty());

        let live = routes_change(&["r-4"]);
        publisher.publish(topics::CHANGES, &live).await.unwrap();
        assert!(received(&seen_c, 2).await);
        assert_eq!(*seen_c.lock(), vec![missed.clone(), live.clone()]);

        // Nobody saw anything twice.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(seen_a.lock().len(), 2);
        assert_eq!(seen_b.lock().len(), 2);

        client_a.shutdown().await;
        client_b.shutdown().await;
        client_c.shutdown().await;
        publisher.shutdown().await;
    }

    #[tokio::test]
    async fn test_topics_are_isolated_over_the_wire() {
        let config = BusConfig::for_tests();
        let publisher = NetworkPublisher::bind("127.0.0.1:0".parse().unwrap(), config.clone(), None)
            .await
            .unwrap();
        let (changes, seen_changes) = recorder();
        let (reloads, seen_reloads) = recorder();
        let client = NetworkSubscriber::new(publisher.local_addr(), "client-a", config);
        client.subscribe(topics::CHANGES, changes).unwrap();
        client.subscribe(topics::FULL_RELOAD, reloads).unwrap();
        let p = &publisher;
        assert!(
            eventually(|| async move {
                p.subscriber_count(topics::CHANGES) == 1
                    && p.subscriber_count(topics::FULL_RELOAD) == 1
            })
            .await
        );

        let reload = BusMessage::Reload(ChangeSet::default());
        publisher.publish(topics::FULL_RELOAD, &reload).await.unwrap();
        assert!(received(&seen_reloads, 1).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(seen_changes.lock().is_empty());
        assert_eq!(seen_reloads.lock()[0], reload);

        client.shutdown().await;
        publisher.shutdown().await;
    }
}
