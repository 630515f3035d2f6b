//! Ordered exchange observers with isolated failure handling.
//!
//! Observers are awaited one after another in registration order. A failing
//! or panicking observer is reported to the error sink and the chain moves
//! on; observation never changes the outcome of an exchange.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;

use ocpp_core::{Failure, FailureCode, OcppResult, Request, Response};

/// A point in an exchange's life.
#[derive(Debug, Clone)]
pub enum ExchangeEvent {
    /// Inbound request, before any validation.
    RequestReceived { request: Request },
    /// Inbound request answered.
    ResponseProduced {
        request: Request,
        response: Response,
        elapsed: Duration,
    },
    /// Outbound request about to be signed and sent.
    RequestSent { request: Request },
    /// Outbound request answered, remotely or locally.
    ResponseReceived {
        request: Request,
        response: Response,
        elapsed: Duration,
    },
}

impl ExchangeEvent {
    pub fn request(&self) -> &Request {
        match self {
            Self::RequestReceived { request }
            | Self::ResponseProduced { request, .. }
            | Self::RequestSent { request }
            | Self::ResponseReceived { request, .. } => request,
        }
    }
}

#[async_trait]
pub trait ExchangeObserver: Send + Sync {
    fn name(&self) -> &str {
        "observer"
    }

    async fn observe(&self, event: &ExchangeEvent) -> OcppResult<()>;
}

/// Receives observer failures.
pub trait ErrorSink: Send + Sync {
    fn report(&self, observer: &str, failure: Failure);
}

/// Sink that logs failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn report(&self, observer: &str, failure: Failure) {
        tracing::error!(observer, code = %failure.code, "observer failed: {}", failure.detail);
    }
}

/// Observer that logs each exchange at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

#[async_trait]
impl ExchangeObserver for TracingObserver {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn observe(&self, event: &ExchangeEvent) -> OcppResult<()> {
        match event {
            ExchangeEvent::RequestReceived { request } => {
                tracing::debug!(action = %request.action, id = request.message_id, "inbound request");
            }
            ExchangeEvent::ResponseProduced { response, elapsed, .. } => {
                tracing::debug!(
                    action = %response.action,
                    id = response.message_id,
                    completed = response.outcome.is_completed(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "inbound response"
                );
            }
            ExchangeEvent::RequestSent { request } => {
                tracing::debug!(action = %request.action, id = request.message_id, "outbound request");
            }
            ExchangeEvent::ResponseReceived { response, elapsed, .. } => {
                tracing::debug!(
                    action = %response.action,
                    id = response.message_id,
                    completed = response.outcome.is_completed(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "outbound response"
                );
            }
        }
        Ok(())
    }
}

/// Registration-ordered observer list.
pub struct ObserverChain {
    observers: RwLock<Vec<Arc<dyn ExchangeObserver>>>,
    sink: Arc<dyn ErrorSink>,
}

impl Default for ObserverChain {
    fn default() -> Self {
        Self::new(Arc::new(LogSink))
    }
}

impl ObserverChain {
    pub fn new(sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            sink,
        }
    }

    pub fn register(&self, observer: Arc<dyn ExchangeObserver>) {
        self.observers.write().push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Run every observer in order, reporting failures to the sink.
    pub async fn notify(&self, event: &ExchangeEvent) {
        let observers = self.observers.read().clone();

        for observer in observers {
            let outcome = AssertUnwindSafe(observer.observe(event)).catch_unwind().await;
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => Failure::new(FailureCode::GenericServerError, e.to_string()),
                Err(_) => Failure::new(FailureCode::GenericServerError, "observer panicked"),
            };
            self.sink.report(observer.name(), failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ocpp_core::{Action, OcppError};
    use parking_lot::Mutex;

    struct Recording {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl ExchangeObserver for Recording {
        async fn observe(&self, _event: &ExchangeEvent) -> OcppResult<()> {
            self.log.lock().push(self.label);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl ExchangeObserver for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn observe(&self, _event: &ExchangeEvent) -> OcppResult<()> {
            Err(OcppError::Protocol("nope".to_string()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl ExchangeObserver for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn observe(&self, _event: &ExchangeEvent) -> OcppResult<()> {
            panic!("observer bug")
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        reports: Mutex<Vec<(String, Failure)>>,
    }

    impl ErrorSink for CollectingSink {
        fn report(&self, observer: &str, failure: Failure) {
            self.reports.lock().push((observer.to_string(), failure));
        }
    }

    fn event() -> ExchangeEvent {
        ExchangeEvent::RequestReceived {
            request: Request::new(1, Action::Reset, "CS-1", serde_json::json!({}), Utc::now()),
        }
    }

    #[tokio::test]
    async fn runs_in_order_and_isolates_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::new(CollectingSink::default());
        let chain = ObserverChain::new(sink.clone());

        chain.register(Arc::new(Recording { label: "first", log: log.clone() }));
        chain.register(Arc::new(Failing));
        chain.register(Arc::new(Panicking));
        chain.register(Arc::new(Recording { label: "last", log: log.clone() }));
        assert_eq!(chain.len(), 4);

        chain.notify(&event()).await;

        assert_eq!(*log.lock(), vec!["first", "last"]);
        let reports = sink.reports.lock();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].0, "failing");
        assert_eq!(reports[1].0, "panicking");
        assert!(reports
            .iter()
            .all(|(_, f)| f.code == FailureCode::GenericServerError));
    }

    #[tokio::test]
    async fn tracing_observer_accepts_every_event() {
        let chain = ObserverChain::default();
        chain.register(Arc::new(TracingObserver));
        chain.notify(&event()).await;
    }
}
