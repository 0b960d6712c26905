//! # Network Publisher
//!
//! Runs on the master. Accepts subscription streams from followers and fans
//! published events out to them.
//!
//! ## Per-subscription flow
//!
//! 1. Register a bounded queue for the stream in the subscribers cache.
//! 2. Send the events deferred for this client and topic, if any.
//! 3. Forward queued events until a terminal marker arrives (shutdown), the
//!    peer goes away, or a write fails.
//!
//! On a write failure the failed event and everything still queued for the
//! stream are deferred for the client, in order, and the stream ends with
//! an error.
//!
//! ## Backpressure
//!
//! [`NetworkPublisher::publish`] waits while a subscription's queue is full.
//! A slow follower therefore slows the publisher down.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mesh_telemetry::{BUS_EVENTS_PUBLISHED, BUS_LIVE_SUBSCRIPTIONS};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::BusConfig;
use crate::deferred::DeferredRegistry;
use crate::errors::BusError;
use crate::events::{BusMessage, Event};
use crate::subscribers_cache::{HandleId, SubscriberHandle, SubscribersCache};
use crate::wire::{read_frame, write_frame, Request, Response, MAX_REQUEST_BYTES};

/// Supplies the full state for `GetSnapshot` requests.
pub trait SnapshotSource: Send + Sync {
    /// Serialized state, sent to the follower as a raw snapshot event.
    fn snapshot(&self) -> Result<Vec<u8>, BusError>;
}

enum Outbound {
    Event(Event),
    Terminate,
}

#[derive(Clone)]
struct StreamHandle {
    id: HandleId,
    client_id: Arc<str>,
    tx: mpsc::Sender<Outbound>,
}

impl SubscriberHandle for StreamHandle {
    fn handle_id(&self) -> HandleId {
        self.id
    }
}

/// Destination of one subscription stream.
#[async_trait]
pub(crate) trait EventSink: Send {
    async fn send(&mut self, event: &Event) -> Result<(), BusError>;

    /// Resolves once the receiving side is gone.
    async fn closed(&mut self) -> BusError;
}

/// State shared by the accept loop and every connection task.
pub(crate) struct PublisherShared {
    config: BusConfig,
    subscribers: SubscribersCache<StreamHandle>,
    deferred: DeferredRegistry,
    snapshot: Option<Arc<dyn SnapshotSource>>,
    closing: AtomicBool,
}

impl PublisherShared {
    pub(crate) fn new(config: BusConfig, snapshot: Option<Arc<dyn SnapshotSource>>) -> Self {
        Self {
            deferred: DeferredRegistry::new(config.deferred_ttl),
            config,
            subscribers: SubscribersCache::new(),
            snapshot,
            closing: AtomicBool::new(false),
        }
    }

    pub(crate) async fn publish(&self, topic: &str, message: &BusMessage) -> Result<usize, BusError> {
        let Some(event) = Event::encode(message)? else {
            trace!(topic, kind = message.kind_name(), "No wire form, not published");
            return Ok(0);
        };
        if self.closing.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        let mut enqueued = 0;
        for handle in self.subscribers.snapshot_topic(topic) {
            match handle.tx.send(Outbound::Event(event.clone())).await {
                Ok(()) => enqueued += 1,
                Err(mpsc::error::SendError(Outbound::Event(event))) => {
                    // Stream is winding down; its client gets this on reconnect.
                    self.deferred
                        .push_message_for_client(&handle.client_id, topic, event);
                }
                Err(_) => {}
            }
        }

        BUS_EVENTS_PUBLISHED
            .with_label_values(&[topic])
            .inc_by(enqueued as f64);
        trace!(
            topic,
            kind = message.kind_name(),
            bytes = event.payload_len(),
            subscribers = enqueued,
            "Event published"
        );
        Ok(enqueued)
    }

    /// Serves one subscription stream until it ends.
    pub(crate) async fn serve<S: EventSink>(
        &self,
        topic: &str,
        client_id: &str,
        sink: &mut S,
    ) -> Result<(), BusError> {
        let (tx, mut rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let handle = StreamHandle {
            id: HandleId::next(),
            client_id: Arc::from(client_id),
            tx,
        };
        self.subscribers.add(topic, handle.clone());
        BUS_LIVE_SUBSCRIPTIONS.inc();

        let result = if self.closing.load(Ordering::SeqCst) {
            Ok(())
        } else {
            self.stream(topic, client_id, sink, &mut rx).await
        };

        // Close first so concurrent publishers defer instead of enqueueing,
        // then hand back what is still queued ahead of those.
        rx.close();
        let (outcome, mut unsent) = match result {
            Ok(()) => (Ok(()), Vec::new()),
            Err((e, unsent)) => (Err(e), unsent),
        };
        while let Ok(outbound) = rx.try_recv() {
            if let Outbound::Event(event) = outbound {
                unsent.push(event);
            }
        }
        if !unsent.is_empty() {
            debug!(topic, client_id, count = unsent.len(), "Deferring unsent events");
            self.deferred
                .prepend_messages_for_client(client_id, topic, unsent);
        }

        self.subscribers.remove(topic, &handle);
        BUS_LIVE_SUBSCRIPTIONS.dec();
        outcome
    }

    async fn stream<S: EventSink>(
        &self,
        topic: &str,
        client_id: &str,
        sink: &mut S,
        rx: &mut mpsc::Receiver<Outbound>,
    ) -> Result<(), (BusError, Vec<Event>)> {
        if let Some(pending) = self.deferred.pop_messages(client_id, topic) {
            debug!(topic, client_id, count = pending.len(), "Redelivering deferred events");
            for (i, event) in pending.iter().enumerate() {
                if let Err(e) = sink.send(event).await {
                    return Err((e, pending[i..].to_vec()));
                }
            }
        }

        loop {
            let next = tokio::select! {
                biased;
                next = rx.recv() => next,
                err = sink.closed() => return Err((err, Vec::new())),
            };
            match next {
                Some(Outbound::Event(event)) => {
                    if let Err(e) = sink.send(&event).await {
                        return Err((e, vec![event]));
                    }
                }
                Some(Outbound::Terminate) | None => return Ok(()),
            }
        }
    }

    fn snapshot_response(&self) -> Response {
        let Some(source) = &self.snapshot else {
            return Response::Error("snapshot not available on this node".to_string());
        };
        let event = source
            .snapshot()
            .and_then(|bytes| Event::encode(&BusMessage::Snapshot(bytes)));
        match event {
            Ok(Some(event)) => Response::Event(event),
            Ok(None) => Response::Error("snapshot has no wire form".to_string()),
            Err(e) => Response::Error(e.to_string()),
        }
    }

    async fn terminate_all(&self) {
        for (topic, handle) in self.subscribers.snapshot_all() {
            if handle.tx.send(Outbound::Terminate).await.is_err() {
                trace!(topic = %topic, client_id = %handle.client_id, "Stream already closed");
            }
        }
    }
}

struct TcpSink {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    max_frame: usize,
}

#[async_trait]
impl EventSink for TcpSink {
    async fn send(&mut self, event: &Event) -> Result<(), BusError> {
        write_frame(&mut self.writer, &Response::Event(event.clone()), self.max_frame).await
    }

    async fn closed(&mut self) -> BusError {
        let mut buf = [0u8; 64];
        loop {
            match self.reader.read(&mut buf).await {
                Ok(0) => return BusError::PeerClosed,
                Ok(_) => continue,
                Err(e) => return BusError::Io(e),
            }
        }
    }
}

/// The master's side of the network bus.
pub struct NetworkPublisher {
    shared: Arc<PublisherShared>,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NetworkPublisher {
    /// Binds the listener and starts accepting subscriptions.
    pub async fn bind(
        addr: SocketAddr,
        config: BusConfig,
        snapshot: Option<Arc<dyn SnapshotSource>>,
    ) -> Result<Self, BusError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let sweep_every = config.deferred_sweep_interval;
        let shared = Arc::new(PublisherShared::new(config, snapshot));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let accept = tokio::spawn(accept_loop(
            Arc::clone(&shared),
            listener,
            shutdown_rx.clone(),
        ));
        let sweeper = tokio::spawn(sweep_loop(Arc::clone(&shared), sweep_every, shutdown_rx));

        info!(%local_addr, "Network publisher listening");
        Ok(Self {
            shared,
            local_addr,
            shutdown,
            tasks: Mutex::new(vec![accept, sweeper]),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Enqueues a message to every live subscription of `topic`.
    ///
    /// Messages without a wire form are skipped. Returns the number of
    /// subscriptions the event was enqueued to.
    pub async fn publish(&self, topic: &str, message: &BusMessage) -> Result<usize, BusError> {
        self.shared.publish(topic, message).await
    }

    /// Live subscriptions on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.shared.subscribers.topic_len(topic)
    }

    pub fn deferred(&self) -> &DeferredRegistry {
        &self.shared.deferred
    }

    /// Stops accepting, lets every stream send what is queued, then waits
    /// for all connection tasks to finish.
    pub async fn shutdown(&self) {
        if !self.shared.closing.swap(true, Ordering::SeqCst) {
            info!(local_addr = %self.local_addr, "Network publisher shutting down");
        }
        let _ = self.shutdown.send(true);
        self.shared.terminate_all().await;

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Publisher task ended abnormally");
            }
        }
        debug!(local_addr = %self.local_addr, "Network publisher stopped");
    }
}

impl Drop for NetworkPublisher {
    fn drop(&mut self) {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);
        for (_, handle) in self.shared.subscribers.snapshot_all() {
            let _ = handle.tx.try_send(Outbound::Terminate);
        }
    }
}

async fn accept_loop(
    shared: Arc<PublisherShared>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(handle_connection(
                        Arc::clone(&shared),
                        stream,
                        peer,
                        shutdown.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "Accept failed"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    drop(listener);

    while connections.join_next().await.is_some() {}
}

async fn sweep_loop(
    shared: Arc<PublisherShared>,
    every: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let evicted = shared.deferred.sweep();
                if evicted > 0 {
                    debug!(evicted, "Deferred registry swept");
                }
            }
        }
    }
}

async fn handle_connection(
    shared: Arc<PublisherShared>,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: watch::Receiver<bool>,
) {
    match serve_connection(&shared, stream, peer, shutdown).await {
        Ok(()) => trace!(%peer, "Connection closed"),
        Err(BusError::PeerClosed) => debug!(%peer, "Peer went away"),
        Err(e) => warn!(%peer, error = %e, "Connection ended with error"),
    }
}

async fn serve_connection(
    shared: &PublisherShared,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), BusError> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();
    let max_frame = shared.config.max_frame_bytes;
    let max_request = max_frame.min(MAX_REQUEST_BYTES);

    if *shutdown.borrow() {
        return Ok(());
    }
    let request: Request = tokio::select! {
        read = timeout(shared.config.request_timeout, read_frame(&mut reader, max_request)) => {
            read.map_err(|_| BusError::Timeout("request"))??
                .ok_or(BusError::PeerClosed)?
        }
        _ = shutdown.changed() => return Ok(()),
    };

    match request {
        Request::GetSnapshot { metadata } => {
            debug!(%peer, client_id = ?metadata.client_id(), "Snapshot requested");
            write_frame(&mut writer, &shared.snapshot_response(), max_frame).await?;
            writer.shutdown().await?;
            Ok(())
        }
        Request::Subscribe { topic, metadata } => {
            let Some(client_id) = metadata.client_id().map(str::to_string) else {
                let refusal = Response::Error("missing client-id metadata".to_string());
                write_frame(&mut writer, &refusal, max_frame).await?;
                return Ok(());
            };
            info!(%peer, topic = %topic, client_id = %client_id, "Subscription opened");

            let mut sink = TcpSink {
                reader,
                writer,
                max_frame,
            };
            let result = shared.serve(&topic, &client_id, &mut sink).await;
            let _ = sink.writer.shutdown().await;
            info!(%peer, topic = %topic, client_id = %client_id, ok = result.is_ok(), "Subscription closed");
            result
        }
    }
}
