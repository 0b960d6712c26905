//! # Network Subscriber
//!
//! Runs on followers. Each [`NetworkSubscriber::subscribe`] call starts a
//! supervised stream from the master that survives master restarts:
//!
//! ```text
//!  ┌─────────┐   dial (DialPolicy)   ┌───────────┐   frames   ┌─────────┐
//!  │supervise│──────────────────────▶│run_stream │───────────▶│ handler │
//!  └────▲────┘                       └─────┬─────┘            └─────────┘
//!       │   Transient: sleep retry_delay   │
//!       └──────────────────────────────────┘
//!           ShutdownRequested: exit
//! ```
//!
//! A stream the master ends cleanly is treated like a failure: the master
//! only closes streams when it stops, and a new master may come up at the
//! same address.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mesh_telemetry::BUS_SUBSCRIBER_RECONNECTS;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::{BusConfig, DialPolicy};
use crate::errors::{is_transient, BusError, SubscribeError};
use crate::events::BusMessage;
use crate::internal::Handler;
use crate::wire::{read_frame, write_frame, Metadata, Request, Response};

struct StreamContext {
    master_addr: SocketAddr,
    client_id: String,
    config: BusConfig,
}

impl StreamContext {
    fn metadata(&self) -> Metadata {
        Metadata::with_client_id(&self.client_id)
    }
}

/// A follower's connection to the master's network bus.
pub struct NetworkSubscriber {
    ctx: Arc<StreamContext>,
    active: AtomicBool,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NetworkSubscriber {
    pub fn new(master_addr: SocketAddr, client_id: impl Into<String>, config: BusConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            ctx: Arc::new(StreamContext {
                master_addr,
                client_id: client_id.into(),
                config,
            }),
            active: AtomicBool::new(true),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn master_addr(&self) -> SocketAddr {
        self.ctx.master_addr
    }

    pub fn client_id(&self) -> &str {
        &self.ctx.client_id
    }

    /// False once [`NetworkSubscriber::shutdown`] has been called.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Starts a supervised stream for `topic`, calling `handler` for every
    /// event in the order the master sent them.
    pub fn subscribe(&self, topic: &str, handler: Handler) -> Result<(), BusError> {
        if !self.is_active() {
            return Err(BusError::Closed);
        }
        let task = tokio::spawn(supervise(
            Arc::clone(&self.ctx),
            topic.to_string(),
            handler,
            self.shutdown.subscribe(),
        ));
        self.tasks.lock().push(task);
        debug!(master = %self.ctx.master_addr, topic, "Network subscription started");
        Ok(())
    }

    /// Pulls the master's full state, retrying up to the configured number
    /// of attempts.
    ///
    /// [`NetworkSubscriber::shutdown`] cancels a pull in flight with
    /// [`BusError::Closed`].
    pub async fn get_snapshot(&self) -> Result<Vec<u8>, BusError> {
        let attempts = self.ctx.config.snapshot_attempts.max(1);
        let mut shutdown = self.shutdown.subscribe();
        let mut last = String::new();
        for attempt in 1..=attempts {
            if !self.is_active() {
                return Err(BusError::Closed);
            }
            let result = tokio::select! {
                result = fetch_snapshot(&self.ctx) => result,
                _ = shutdown.changed() => return Err(BusError::Closed),
            };
            match result {
                Ok(bytes) => {
                    info!(master = %self.ctx.master_addr, bytes = bytes.len(), attempt, "Snapshot received");
                    return Ok(bytes);
                }
                Err(e) => {
                    warn!(master = %self.ctx.master_addr, attempt, error = %e, "Snapshot request failed");
                    last = e.to_string();
                }
            }
            if attempt < attempts {
                tokio::select! {
                    _ = sleep(self.ctx.config.snapshot_retry_delay) => {}
                    _ = shutdown.changed() => return Err(BusError::Closed),
                }
            }
        }
        Err(BusError::SnapshotUnavailable { attempts, last })
    }

    /// Stops every stream and waits for the supervising tasks to exit.
    pub async fn shutdown(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.shutdown.send_replace(true);

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Subscription task ended abnormally");
            }
        }
        debug!(master = %self.ctx.master_addr, "Network subscriber stopped");
    }
}

impl Drop for NetworkSubscriber {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        self.shutdown.send_replace(true);
    }
}

async fn supervise(
    ctx: Arc<StreamContext>,
    topic: String,
    handler: Handler,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let outcome = tokio::select! {
            result = run_stream(&ctx, &topic, &handler) => match result {
                Ok(()) => SubscribeError::Transient("stream ended by master".to_string()),
                Err(e) => SubscribeError::from(e),
            },
            _ = shutdown.changed() => SubscribeError::ShutdownRequested,
        };

        match outcome {
            SubscribeError::ShutdownRequested => break,
            SubscribeError::Transient(reason) => {
                BUS_SUBSCRIBER_RECONNECTS.with_label_values(&[&topic]).inc();
                warn!(master = %ctx.master_addr, topic = %topic, reason = %reason, "Subscription interrupted, retrying");
            }
        }

        tokio::select! {
            _ = sleep(ctx.config.retry_delay) => {}
            _ = shutdown.changed() => break,
        }
    }
    debug!(topic = %topic, "Subscription supervisor exiting");
}

/// One stream attempt. Returns when the master closes the stream.
async fn run_stream(ctx: &StreamContext, topic: &str, handler: &Handler) -> Result<(), BusError> {
    let max_frame = ctx.config.max_frame_bytes;
    let mut stream = dial(ctx.master_addr, ctx.config.dial).await?;
    let request = Request::Subscribe {
        topic: topic.to_string(),
        metadata: ctx.metadata(),
    };
    write_frame(&mut stream, &request, max_frame).await?;
    info!(master = %ctx.master_addr, topic, "Subscription stream open");

    while let Some(response) = read_frame::<_, Response>(&mut stream, max_frame).await? {
        match response {
            Response::Event(event) => handler(event.decode()?),
            Response::Error(message) => return Err(BusError::Remote(message)),
        }
    }
    Ok(())
}

async fn fetch_snapshot(ctx: &StreamContext) -> Result<Vec<u8>, BusError> {
    let max_frame = ctx.config.max_frame_bytes;
    let mut stream = dial(ctx.master_addr, ctx.config.dial).await?;
    let request = Request::GetSnapshot {
        metadata: ctx.metadata(),
    };
    write_frame(&mut stream, &request, max_frame).await?;

    let response: Response = timeout(ctx.config.request_timeout, read_frame(&mut stream, max_frame))
        .await
        .map_err(|_| BusError::Timeout("snapshot response"))??
        .ok_or(BusError::PeerClosed)?;
    match response {
        Response::Event(event) => match event.decode()? {
            BusMessage::Snapshot(bytes) => Ok(bytes),
            other => Err(BusError::MalformedEvent(format!(
                "expected snapshot, got {}",
                other.kind_name()
            ))),
        },
        Response::Error(message) => Err(BusError::Remote(message)),
    }
}

/// Connects to `addr`, retrying transient failures per `policy`.
pub(crate) async fn dial(addr: SocketAddr, policy: DialPolicy) -> Result<TcpStream, BusError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) if is_transient(e.kind()) && attempt < max_attempts => {
                sleep(policy.backoff).await;
            }
            Err(source) => {
                return Err(BusError::Unreachable {
                    addr,
                    attempts: attempt,
                    source,
                })
            }
        }
    }
}
