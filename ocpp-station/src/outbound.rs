//! Station-originated calls: sign, send or queue, verify, observe.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde_json::Value;

use ocpp_core::{Action, Command, Failure, FailureCode, OcppError, Outcome, Request, Response, Transport};

use crate::observer::{ExchangeEvent, ObserverChain};
use crate::queue::OfflineQueue;
use crate::station::Station;

/// Outbound envelope shared by follow-ups, timers and the offline queue.
pub struct Outbound {
    station: Arc<Station>,
    observers: Arc<ObserverChain>,
    queue: Arc<OfflineQueue>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    next_id: AtomicU64,
}

impl Outbound {
    pub fn new(station: Arc<Station>, observers: Arc<ObserverChain>, queue: Arc<OfflineQueue>) -> Self {
        Self {
            station,
            observers,
            queue,
            transport: RwLock::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn attach(&self, transport: Arc<dyn Transport>) {
        *self.transport.write() = Some(transport);
        tracing::info!(station = %self.station.id(), "transport attached");
    }

    pub fn detach(&self) {
        if self.transport.write().take().is_some() {
            tracing::info!(station = %self.station.id(), "transport detached");
        }
    }

    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().clone()
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    /// Send a command and return its typed response.
    pub async fn call<C: Command>(&self, payload: &C::Request) -> Result<C::Response, Failure> {
        let payload = serde_json::to_value(payload).map_err(|e| Failure::from(OcppError::from(e)))?;
        let response = self.call_raw(C::ACTION, payload).await;

        match response.outcome {
            Outcome::Completed(body) => serde_json::from_value(body).map_err(|e| {
                Failure::new(
                    FailureCode::FormatViolation,
                    format!("invalid {} response: {}", C::ACTION, e),
                )
            }),
            Outcome::Failed(failure) => Err(failure),
        }
    }

    /// Send a command. Never fails: problems come back as a locally
    /// synthesized failed response.
    pub async fn call_raw(&self, action: Action, payload: Value) -> Response {
        let started = Instant::now();
        let mut request = Request::new(
            self.next_id.fetch_add(1, Ordering::Relaxed),
            action,
            self.station.id(),
            payload,
            self.station.now(),
        );

        let Some(transport) = self.transport() else {
            tracing::debug!(%action, "no transport attached");
            return self.local_failure(&request, FailureCode::Unreachable, "no transport attached");
        };

        self.observers
            .notify(&ExchangeEvent::RequestSent {
                request: request.clone(),
            })
            .await;

        let check = self.station.signatures().sign_request(&mut request);
        if !check.ok {
            self.station.record_signing_failure();
            tracing::warn!(%action, "outbound request not signed: {}", check.detail);
            return self.finish(request, FailureCode::SignatureError, check.detail, started).await;
        }

        let call_timeout = self.station.config().call_timeout;
        let delivery = if transport.is_connected() {
            match tokio::time::timeout(call_timeout, transport.send(request.clone())).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(e)) => Err(Failure::new(FailureCode::Unreachable, e.to_string())),
                Err(_) => Err(Failure::new(FailureCode::Timeout, "no response within call timeout")),
            }
        } else {
            tracing::debug!(%action, id = request.message_id, "transport disconnected, queueing");
            let continuation = self.queue.enqueue(request.clone(), self.station.now());
            match tokio::time::timeout(call_timeout, continuation).await {
                Ok(Ok(delivery)) => delivery,
                Ok(Err(_)) => Err(Failure::new(FailureCode::Unreachable, "queued request dropped")),
                Err(_) => Err(Failure::new(FailureCode::Timeout, "queued request not delivered in time")),
            }
        };

        let response = match delivery {
            Ok(response) => {
                let verified = self.station.signatures().verify_response(&response);
                if !verified.ok {
                    self.station.record_verification_failure();
                    tracing::warn!(%action, id = response.message_id, "response signature rejected: {}", verified.detail);
                }
                response
            }
            Err(failure) => {
                tracing::warn!(%action, code = %failure.code, "outbound call failed: {}", failure.detail);
                Response::local_failure(&request, failure, self.station.now())
            }
        };

        self.observers
            .notify(&ExchangeEvent::ResponseReceived {
                request,
                response: response.clone(),
                elapsed: started.elapsed(),
            })
            .await;
        response
    }

    fn local_failure(&self, request: &Request, code: FailureCode, detail: impl Into<String>) -> Response {
        Response::local_failure(request, Failure::new(code, detail), self.station.now())
    }

    async fn finish(&self, request: Request, code: FailureCode, detail: String, started: Instant) -> Response {
        let response = self.local_failure(&request, code, detail);
        self.observers
            .notify(&ExchangeEvent::ResponseReceived {
                request,
                response: response.clone(),
                elapsed: started.elapsed(),
            })
            .await;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{self, MockTransport};
    use ocpp_core::command::{BootNotification, Heartbeat};
    use ocpp_core::payloads::{BootReason, Empty, RegistrationStatus};
    use ocpp_core::{OcppResult, SignaturePolicy};
    use std::time::Duration;

    fn outbound() -> Outbound {
        Outbound::new(
            Arc::new(testkit::station()),
            Arc::new(ObserverChain::default()),
            Arc::new(OfflineQueue::new(Duration::from_millis(100), Duration::from_secs(5))),
        )
    }

    #[tokio::test]
    async fn unreachable_without_transport() {
        let outbound = outbound();
        let response = outbound.call_raw(Action::Heartbeat, serde_json::json!({})).await;
        assert_eq!(response.outcome.failure_code(), Some(FailureCode::Unreachable));
        assert_eq!(response.station_id, "CS-1");
    }

    #[tokio::test]
    async fn typed_call_decodes_response() {
        let outbound = outbound();
        let (transport, mut sent) = MockTransport::new();
        outbound.attach(transport);

        let station = testkit::station();
        let boot = outbound
            .call::<BootNotification>(&station.boot_request(BootReason::PowerUp))
            .await
            .unwrap();
        assert_eq!(boot.status, RegistrationStatus::Accepted);
        assert_eq!(boot.interval, 60);

        outbound.call::<Heartbeat>(&Empty {}).await.unwrap();

        let first = sent.try_recv().unwrap();
        let second = sent.try_recv().unwrap();
        assert_eq!(first.action, Action::BootNotification);
        assert!(second.message_id > first.message_id);
    }

    #[tokio::test]
    async fn malformed_response_is_format_violation() {
        let outbound = outbound();
        let (transport, _sent) = MockTransport::new();
        transport.respond_with(|_| serde_json::json!({"interval": "soon"}));
        outbound.attach(transport);

        let err = outbound
            .call::<BootNotification>(&testkit::station().boot_request(BootReason::PowerUp))
            .await
            .unwrap_err();
        assert_eq!(err.code, FailureCode::FormatViolation);
    }

    #[tokio::test]
    async fn transport_error_is_unreachable() {
        let outbound = outbound();
        let (transport, _sent) = MockTransport::new();
        transport.fail_sends(true);
        outbound.attach(transport);

        let response = outbound.call_raw(Action::Heartbeat, serde_json::json!({})).await;
        assert_eq!(response.outcome.failure_code(), Some(FailureCode::Unreachable));
    }

    #[tokio::test]
    async fn disconnected_transport_queues_until_maintenance() {
        let outbound = Arc::new(outbound());
        let (transport, mut sent) = MockTransport::new();
        transport.set_connected(false);
        outbound.attach(transport.clone());

        let caller = {
            let outbound = outbound.clone();
            tokio::spawn(async move { outbound.call_raw(Action::Heartbeat, serde_json::json!({})).await })
        };

        while outbound.queue().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(sent.try_recv().is_err());

        outbound.queue().run_pass(outbound.transport()).await;
        let response = caller.await.unwrap();
        assert!(response.outcome.is_completed());
        assert_eq!(sent.try_recv().unwrap().action, Action::Heartbeat);
    }

    struct BrokenSigner;

    impl SignaturePolicy for BrokenSigner {
        fn name(&self) -> &str {
            "Broken"
        }

        fn sign(&self, _canonical: &str) -> OcppResult<Option<String>> {
            Err(OcppError::Crypto("key unavailable".to_string()))
        }

        fn verify(&self, _canonical: &str, _signature: Option<&str>) -> OcppResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn signing_failure_skips_network() {
        let station = Arc::new(testkit::station_with_policy(Arc::new(BrokenSigner)));
        let outbound = Outbound::new(
            station.clone(),
            Arc::new(ObserverChain::default()),
            Arc::new(OfflineQueue::new(Duration::from_millis(100), Duration::from_secs(5))),
        );
        let (transport, mut sent) = MockTransport::new();
        outbound.attach(transport);

        let response = outbound.call_raw(Action::Heartbeat, serde_json::json!({})).await;
        assert_eq!(response.outcome.failure_code(), Some(FailureCode::SignatureError));
        assert!(sent.try_recv().is_err());
        assert_eq!(station.signing_failures(), 1);
    }
}
