//! Inbound command pipeline.
//!
//! Every inbound request runs the same phases and produces exactly one
//! response:
//!
//! 1. "request received" observers
//! 2. identity check against the station id
//! 3. signature verification under the active policy
//! 4. the kind's business handler; follow-ups are spawned, not awaited
//! 5. response signing (failures are counted, never fatal)
//! 6. "response produced" observers
//!
//! A failure in phase 2 or 3 skips straight to phase 5.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use ocpp_core::{FailureCode, InboundHandler, Outcome, Request, Response};

use crate::clock::deadline_after;
use crate::handlers::{FollowUp, HandlerRegistry};
use crate::observer::{ExchangeEvent, ObserverChain};
use crate::outbound::Outbound;
use crate::station::Station;

pub struct Dispatcher {
    station: Arc<Station>,
    registry: HandlerRegistry,
    observers: Arc<ObserverChain>,
    outbound: Arc<Outbound>,
    /// Completion signal of the latest follow-up batch per lane.
    lanes: Mutex<HashMap<String, oneshot::Receiver<()>>>,
}

impl Dispatcher {
    pub fn new(
        station: Arc<Station>,
        registry: HandlerRegistry,
        observers: Arc<ObserverChain>,
        outbound: Arc<Outbound>,
    ) -> Self {
        Self {
            station,
            registry,
            observers,
            outbound,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    /// Run the pipeline for one inbound request.
    pub async fn dispatch(&self, request: Request) -> Response {
        let started = Instant::now();

        self.observers
            .notify(&ExchangeEvent::RequestReceived {
                request: request.clone(),
            })
            .await;

        let outcome = self.process(&request);
        let mut response = Response::to_request(&request, self.station.id(), outcome, self.station.now());

        let signed = self.station.signatures().sign_response(&mut response);
        if !signed.ok {
            self.station.record_signing_failure();
            tracing::warn!(action = %request.action, id = request.message_id, "response not signed: {}", signed.detail);
        }

        self.observers
            .notify(&ExchangeEvent::ResponseProduced {
                request,
                response: response.clone(),
                elapsed: started.elapsed(),
            })
            .await;
        response
    }

    fn process(&self, request: &Request) -> Outcome {
        if request.station_id != self.station.id() {
            tracing::warn!(
                action = %request.action,
                target = %request.station_id,
                "command addressed to another station"
            );
            return Outcome::failed(
                FailureCode::IdentityMismatch,
                format!("command addressed to {}, this station is {}", request.station_id, self.station.id()),
            );
        }

        let verified = self.station.signatures().verify_request(request);
        if !verified.ok {
            self.station.record_verification_failure();
            tracing::warn!(action = %request.action, id = request.message_id, "request signature rejected: {}", verified.detail);
            return Outcome::failed(FailureCode::SignatureError, verified.detail);
        }

        match self
            .registry
            .invoke(&self.station, request.action, request.payload.clone())
        {
            Ok(dispatched) => {
                self.spawn_follow_ups(dispatched.follow_ups);
                Outcome::Completed(dispatched.body)
            }
            Err(failure) => {
                tracing::debug!(action = %request.action, code = %failure.code, "handler failed: {}", failure.detail);
                Outcome::Failed(failure)
            }
        }
    }

    /// Deliver one handler's follow-ups in order from a single task, after
    /// any earlier batch that shares a lane with them.
    fn spawn_follow_ups(&self, follow_ups: Vec<FollowUp>) {
        if follow_ups.is_empty() {
            return;
        }

        // Deadlines are fixed before the task starts so virtual time that
        // advances meanwhile still counts.
        let now = self.station.now();
        let scheduled: Vec<(DateTime<Utc>, FollowUp)> = follow_ups
            .into_iter()
            .map(|follow_up| (deadline_after(now, follow_up.delay), follow_up))
            .collect();
        let (predecessors, done) = self.enter_lanes(scheduled.iter().filter_map(|(_, f)| f.lane.as_deref()));
        let clock = self.station.clock().clone();
        let outbound = self.outbound.clone();

        tokio::spawn(async move {
            for previous in predecessors {
                // A dropped sender means the earlier batch ended either way.
                let _ = previous.await;
            }
            for (wake_at, follow_up) in scheduled {
                clock.sleep_until(wake_at).await;
                let action = follow_up.action;
                let response = outbound.call_raw(action, follow_up.payload).await;
                if let Outcome::Failed(failure) = &response.outcome {
                    tracing::warn!(%action, code = %failure.code, "follow-up not delivered: {}", failure.detail);
                }
            }
            drop(done);
        });
    }

    /// Become the tail of each lane. Returns the batches to wait for and the
    /// senders whose drop releases the next batch.
    fn enter_lanes<'a>(
        &self,
        lanes: impl Iterator<Item = &'a str>,
    ) -> (Vec<oneshot::Receiver<()>>, Vec<oneshot::Sender<()>>) {
        let mut predecessors = Vec::new();
        let mut done = Vec::new();
        let mut tails = self.lanes.lock();
        let mut seen = HashSet::new();

        for lane in lanes {
            if !seen.insert(lane) {
                continue;
            }
            let (tx, rx) = oneshot::channel();
            if let Some(previous) = tails.insert(lane.to_string(), rx) {
                predecessors.push(previous);
            }
            done.push(tx);
        }
        (predecessors, done)
    }
}

#[async_trait]
impl InboundHandler for Dispatcher {
    async fn on_request(&self, request: Request) -> Response {
        self.dispatch(request).await
    }
}
