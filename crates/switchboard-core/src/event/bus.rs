//! Ordered, per-kind pub/sub for bot event delivery.
//!
//! Subscriptions are `(bot_id, kind)` pairs kept in insertion order. A bot
//! attaches one handler; a subscription without an attached handler is
//! skipped. Each delivery is isolated: a handler error, panic or timeout
//! is recorded as an `Error` audit event and delivery moves on.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use switchboard_types::event::{BackendEvent, EventKind};

use crate::audit::AuditLog;

/// Per-bot delivery callback.
pub type EventHandler =
    Arc<dyn Fn(BackendEvent) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// Wrap an async closure as an [`EventHandler`].
pub fn handler_fn<F, Fut>(f: F) -> EventHandler
where
    F: Fn(BackendEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    Arc::new(move |event| f(event).boxed())
}

/// Outcome of one synchronous publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

struct BusInner {
    subscriptions: RwLock<Vec<(String, EventKind)>>,
    handlers: RwLock<HashMap<String, EventHandler>>,
    audit: Arc<AuditLog>,
    delivery_timeout: Duration,
    queue: OnceLock<mpsc::UnboundedSender<BackendEvent>>,
}

/// Cloning the bus shares the subscription table.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(audit: Arc<AuditLog>, delivery_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscriptions: RwLock::new(Vec::new()),
                handlers: RwLock::new(HashMap::new()),
                audit,
                delivery_timeout,
                queue: OnceLock::new(),
            }),
        }
    }

    /// Subscribe `bot_id` to `kind`. Subscribing twice is a no-op.
    pub fn subscribe(&self, bot_id: &str, kind: EventKind) {
        let mut subs = write(&self.inner.subscriptions);
        if !subs.iter().any(|(b, k)| b == bot_id && *k == kind) {
            subs.push((bot_id.to_string(), kind));
            tracing::debug!(bot_id, %kind, "subscribed");
        }
    }

    pub fn unsubscribe(&self, bot_id: &str, kind: EventKind) {
        write(&self.inner.subscriptions).retain(|(b, k)| !(b == bot_id && *k == kind));
    }

    pub fn unsubscribe_all(&self, bot_id: &str) {
        write(&self.inner.subscriptions).retain(|(b, _)| b != bot_id);
    }

    /// Subscribers of `kind`, in subscription order.
    pub fn subscribers(&self, kind: EventKind) -> Vec<String> {
        read(&self.inner.subscriptions)
            .iter()
            .filter(|(_, k)| *k == kind)
            .map(|(b, _)| b.clone())
            .collect()
    }

    /// Event kinds `bot_id` is subscribed to.
    pub fn subscriptions_of(&self, bot_id: &str) -> Vec<EventKind> {
        read(&self.inner.subscriptions)
            .iter()
            .filter(|(b, _)| b == bot_id)
            .map(|(_, k)| *k)
            .collect()
    }

    /// Attach the delivery handler for `bot_id`, replacing any previous one.
    pub fn attach(&self, bot_id: &str, handler: EventHandler) {
        write(&self.inner.handlers).insert(bot_id.to_string(), handler);
    }

    pub fn detach(&self, bot_id: &str) {
        write(&self.inner.handlers).remove(bot_id);
    }

    /// Deliver `event` to every current subscriber of its kind, in order,
    /// and return once all deliveries have finished.
    pub async fn publish(&self, event: BackendEvent) -> DeliveryReport {
        self.inner.publish(event).await
    }

    /// Queue `event` for delivery on a background worker and return at once.
    ///
    /// Events queued from one task are delivered in the order queued. Must
    /// be called from within a tokio runtime.
    pub fn publish_async(&self, event: BackendEvent) {
        let tx = self.inner.queue.get_or_init(|| {
            let (tx, mut rx) = mpsc::unbounded_channel::<BackendEvent>();
            let weak = Arc::downgrade(&self.inner);
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    let Some(inner) = weak.upgrade() else { break };
                    inner.publish(event).await;
                }
                tracing::debug!("event bus worker stopped");
            });
            tx
        });
        if tx.send(event).is_err() {
            tracing::warn!("event bus worker is gone, event dropped");
        }
    }
}

impl BusInner {
    async fn publish(&self, event: BackendEvent) -> DeliveryReport {
        let kind = event.kind();
        let targets: Vec<(String, EventHandler)> = {
            let subs = read(&self.subscriptions);
            let handlers = read(&self.handlers);
            subs.iter()
                .filter(|(_, k)| *k == kind)
                .filter_map(|(b, _)| handlers.get(b).map(|h| (b.clone(), Arc::clone(h))))
                .collect()
        };

        let mut report = DeliveryReport::default();
        for (bot_id, handler) in targets {
            match self.deliver(&handler, event.clone()).await {
                Ok(()) => report.delivered += 1,
                Err(reason) => {
                    report.failed += 1;
                    tracing::warn!(bot_id, %kind, reason, "event delivery failed");
                    self.audit
                        .record_error(&format!("event delivery to bot '{bot_id}' ({kind})"), &reason)
                        .await;
                }
            }
        }
        report
    }

    async fn deliver(&self, handler: &EventHandler, event: BackendEvent) -> Result<(), String> {
        let fut = std::panic::catch_unwind(AssertUnwindSafe(|| handler(event)))
            .map_err(|_| "handler panicked".to_string())?;
        match tokio::time::timeout(self.delivery_timeout, AssertUnwindSafe(fut).catch_unwind())
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err("handler panicked".to_string()),
            Err(_) => Err(format!("handler timed out after {:?}", self.delivery_timeout)),
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
