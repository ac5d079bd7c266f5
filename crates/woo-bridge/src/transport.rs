// crates/woo-bridge/src/transport.rs
//
// In-process messaging transport connecting simulated domains.
//
// `send` only enqueues; `deliver_pending` pumps the queue into the handler
// registered for each destination domain. Delivery is at-least-once: a
// message whose handler is missing or fails with a retryable error goes
// back on the queue, so handlers must be idempotent. Non-retryable
// rejections are dropped and reported to the caller.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use woo_core::error::StakingError;
use woo_core::traits::{MessageHandler, MessageTransport};
use woo_core::types::{Address, DomainId};

/// A message in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub source: DomainId,
    pub sender: Address,
    pub dest: DomainId,
    pub payload: Vec<u8>,
    /// Delivery attempts so far.
    pub attempts: u32,
}

impl Envelope {
    pub fn new(source: DomainId, sender: Address, dest: DomainId, payload: Vec<u8>) -> Self {
        Self {
            source,
            sender,
            dest,
            payload,
            attempts: 0,
        }
    }
}

/// Outcome of one pump of the queue.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub requeued: usize,
    pub rejected: Vec<(Envelope, StakingError)>,
}

impl DeliveryReport {
    fn absorb(&mut self, other: DeliveryReport) {
        self.delivered += other.delivered;
        self.requeued = other.requeued;
        self.rejected.extend(other.rejected);
    }
}

#[derive(Default)]
struct Inner {
    queue: Mutex<VecDeque<Envelope>>,
    handlers: RwLock<HashMap<DomainId, Weak<dyn MessageHandler>>>,
    failing: AtomicBool,
}

/// Cloneable handle; clones share the same queue and handler table.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    inner: Arc<Inner>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route messages for `domain` to `handler`. Only a weak reference is
    /// kept; the caller owns the handler.
    pub async fn register(&self, domain: DomainId, handler: Arc<dyn MessageHandler>) {
        self.inner
            .handlers
            .write()
            .await
            .insert(domain, Arc::downgrade(&handler));
        debug!("transport: handler registered for domain {}", domain);
    }

    /// Refuse every subsequent `send` (simulates an unavailable channel).
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn pending(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    /// Snapshot of the queued messages, oldest first.
    pub async fn queued(&self) -> Vec<Envelope> {
        self.inner.queue.lock().await.iter().cloned().collect()
    }

    /// Remove and return every queued message, oldest first.
    pub async fn take_queued(&self) -> Vec<Envelope> {
        self.inner.queue.lock().await.drain(..).collect()
    }

    /// Put an envelope on the queue as-is, bypassing `send`.
    pub async fn inject(&self, envelope: Envelope) {
        self.inner.queue.lock().await.push_back(envelope);
    }

    /// Deliver every message queued at call time. Replies enqueued by the
    /// handlers wait for the next pump.
    pub async fn deliver_pending(&self) -> DeliveryReport {
        let batch: Vec<Envelope> = self.inner.queue.lock().await.drain(..).collect();
        let mut report = DeliveryReport::default();
        let mut retry = Vec::new();

        for mut envelope in batch {
            let handler = self
                .inner
                .handlers
                .read()
                .await
                .get(&envelope.dest)
                .and_then(Weak::upgrade);
            let Some(handler) = handler else {
                warn!("transport: no handler for domain {}, requeueing", envelope.dest);
                retry.push(envelope);
                continue;
            };

            envelope.attempts += 1;
            match handler
                .on_receive(envelope.source, envelope.sender, &envelope.payload)
                .await
            {
                Ok(()) => report.delivered += 1,
                Err(e) if e.is_retryable() => {
                    warn!(
                        "transport: delivery {} -> {} failed (attempt {}): {}",
                        envelope.source, envelope.dest, envelope.attempts, e
                    );
                    retry.push(envelope);
                }
                Err(e) => {
                    warn!(
                        "transport: message {} -> {} from {} rejected: {}",
                        envelope.source, envelope.dest, envelope.sender, e
                    );
                    report.rejected.push((envelope, e));
                }
            }
        }

        report.requeued = retry.len();
        if !retry.is_empty() {
            let mut queue = self.inner.queue.lock().await;
            for envelope in retry.into_iter().rev() {
                queue.push_front(envelope);
            }
        }
        report
    }

    /// Pump until the queue drains, nothing more gets delivered, or
    /// `max_rounds` pumps have run.
    pub async fn deliver_until_idle(&self, max_rounds: usize) -> DeliveryReport {
        let mut total = DeliveryReport::default();
        for _ in 0..max_rounds {
            if self.pending().await == 0 {
                break;
            }
            let round = self.deliver_pending().await;
            let progressed = round.delivered > 0 || !round.rejected.is_empty();
            total.absorb(round);
            if !progressed {
                break;
            }
        }
        total
    }
}

#[async_trait]
impl MessageTransport for InMemoryTransport {
    async fn send(&self, source: DomainId, sender: Address, dest: DomainId, payload: Vec<u8>) -> Result<(), StakingError> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(StakingError::ExternalCallFailed(format!(
                "transport unavailable for {} -> {}",
                source, dest
            )));
        }
        self.inner
            .queue
            .lock()
            .await
            .push_back(Envelope::new(source, sender, dest, payload));
        Ok(())
    }
}
