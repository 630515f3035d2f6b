//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use ocpp_core::{
    Action, OcppError, OcppResult, Outcome, Request, Response, SignatureCoordinator, SignaturePolicy,
    Transport,
};

use crate::clock::{ManualClock, SystemClock};
use crate::config::StationConfig;
use crate::station::Station;

/// Station "CS-1" with EVSEs "1" and "2".
pub fn config() -> StationConfig {
    StationConfig::default()
}

pub fn station() -> Station {
    station_from(config())
}

pub fn station_from(config: StationConfig) -> Station {
    Station::new(config, SignatureCoordinator::new(), Arc::new(SystemClock))
}

pub fn station_with_policy(policy: Arc<dyn SignaturePolicy>) -> Station {
    Station::new(
        config(),
        SignatureCoordinator::new().with_policy(policy),
        Arc::new(SystemClock),
    )
}

/// Station on virtual time starting at 2026-01-01T00:00:00Z.
pub fn station_with_clock() -> (Station, Arc<ManualClock>) {
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now);
    let clock = Arc::new(ManualClock::new(start));
    let station = Station::new(config(), SignatureCoordinator::new(), clock.clone());
    (station, clock)
}

/// Self-signed PEM certificate with the given serial.
pub fn certificate_pem(serial: Vec<u8>) -> String {
    let mut params = rcgen::CertificateParams::new(vec!["csms.local".to_string()]).unwrap();
    params.serial_number = Some(rcgen::SerialNumber::from(serial));
    let key_pair = rcgen::KeyPair::generate().unwrap();
    params.self_signed(&key_pair).unwrap().pem()
}

type Responder = Box<dyn Fn(&Request) -> Value + Send + Sync>;

/// In-memory CSMS: records every request and answers it immediately.
pub struct MockTransport {
    connected: AtomicBool,
    failing: AtomicBool,
    responder: Mutex<Option<Responder>>,
    sent: mpsc::UnboundedSender<Request>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Request>) {
        let (sent, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            connected: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            responder: Mutex::new(None),
            sent,
        });
        (transport, rx)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn respond_with(&self, responder: impl Fn(&Request) -> Value + Send + Sync + 'static) {
        *self.responder.lock() = Some(Box::new(responder));
    }

    fn default_body(request: &Request) -> Value {
        match request.action {
            Action::BootNotification => serde_json::json!({
                "currentTime": Utc::now(),
                "interval": 60,
                "status": "Accepted",
            }),
            Action::Heartbeat => serde_json::json!({ "currentTime": Utc::now() }),
            _ => serde_json::json!({}),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, request: Request) -> OcppResult<Response> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(OcppError::Transport("connection refused".to_string()));
        }

        let body = match self.responder.lock().as_ref() {
            Some(responder) => responder(&request),
            None => Self::default_body(&request),
        };
        let response = Response::to_request(&request, "CSMS", Outcome::Completed(body), Utc::now());
        let _ = self.sent.send(request);
        Ok(response)
    }
}
