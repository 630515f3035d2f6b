//! Offline queue for outbound requests that could not be sent immediately.
//!
//! A maintenance pass makes exactly one delivery attempt per queued request
//! and removes it afterwards, whatever the outcome. Passes exclude each
//! other through a single-permit semaphore; a pass that cannot acquire it
//! within the lock timeout is skipped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{oneshot, Semaphore};

use ocpp_core::{Action, Failure, FailureCode, Request, Response, Transport};

/// Outcome of one delivery attempt.
pub type Delivery = Result<Response, Failure>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    New,
    Processing,
    Finished,
}

/// A signed request waiting for the channel.
#[derive(Debug)]
pub struct EnqueuedRequest {
    pub id: u64,
    pub action: Action,
    pub request: Request,
    pub enqueued_at: DateTime<Utc>,
    status: Mutex<RequestStatus>,
    reply: Mutex<Option<oneshot::Sender<Delivery>>>,
}

impl EnqueuedRequest {
    pub fn status(&self) -> RequestStatus {
        *self.status.lock()
    }

    fn set_status(&self, status: RequestStatus) {
        *self.status.lock() = status;
    }

    /// Resolve the continuation. Later calls are ignored.
    fn resolve(&self, delivery: Delivery) {
        if let Some(reply) = self.reply.lock().take() {
            // Caller may have timed out and dropped the receiver.
            let _ = reply.send(delivery);
        }
    }
}

/// Result of a maintenance pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Another pass held the guard past the lock timeout.
    Skipped,
    Completed { attempted: usize, delivered: usize },
}

pub struct OfflineQueue {
    items: Mutex<VecDeque<Arc<EnqueuedRequest>>>,
    pass_guard: Semaphore,
    lock_timeout: Duration,
    delivery_timeout: Duration,
    next_id: AtomicU64,
}

impl OfflineQueue {
    pub fn new(lock_timeout: Duration, delivery_timeout: Duration) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            pass_guard: Semaphore::new(1),
            lock_timeout,
            delivery_timeout,
            next_id: AtomicU64::new(1),
        }
    }

    /// Queue a signed request; the receiver resolves after its delivery attempt.
    pub fn enqueue(&self, request: Request, now: DateTime<Utc>) -> oneshot::Receiver<Delivery> {
        let (tx, rx) = oneshot::channel();
        let item = Arc::new(EnqueuedRequest {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            action: request.action,
            request,
            enqueued_at: now,
            status: Mutex::new(RequestStatus::New),
            reply: Mutex::new(Some(tx)),
        });
        tracing::debug!(id = item.id, action = %item.action, "request queued");
        self.items.lock().push_back(item);
        rx
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Currently queued requests, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<EnqueuedRequest>> {
        self.items.lock().iter().cloned().collect()
    }

    /// Attempt each currently queued request once over `transport`.
    pub async fn run_pass(&self, transport: Option<Arc<dyn Transport>>) -> PassOutcome {
        let _permit = match tokio::time::timeout(self.lock_timeout, self.pass_guard.acquire()).await {
            Ok(Ok(permit)) => permit,
            _ => {
                tracing::debug!("maintenance pass skipped: previous pass still running");
                return PassOutcome::Skipped;
            }
        };

        let batch = self.snapshot();
        let mut delivered = 0;

        for item in &batch {
            item.set_status(RequestStatus::Processing);
            let delivery = self.deliver(transport.as_deref(), &item.request).await;
            if delivery.is_ok() {
                delivered += 1;
            } else {
                tracing::warn!(id = item.id, action = %item.action, "queued request dropped after failed attempt");
            }
            item.resolve(delivery);
            item.set_status(RequestStatus::Finished);
            self.items.lock().retain(|queued| !Arc::ptr_eq(queued, item));
        }

        if !batch.is_empty() {
            tracing::info!(attempted = batch.len(), delivered, "maintenance pass finished");
        }
        PassOutcome::Completed {
            attempted: batch.len(),
            delivered,
        }
    }

    async fn deliver(&self, transport: Option<&dyn Transport>, request: &Request) -> Delivery {
        let transport = transport
            .ok_or_else(|| Failure::new(FailureCode::Unreachable, "no transport attached"))?;

        match tokio::time::timeout(self.delivery_timeout, transport.send(request.clone())).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(Failure::new(FailureCode::Unreachable, e.to_string())),
            Err(_) => Err(Failure::new(FailureCode::Timeout, "no response within call timeout")),
        }
    }
}
