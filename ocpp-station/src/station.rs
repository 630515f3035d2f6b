//! Station identity and the shared context every handler runs against.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use ocpp_core::payloads::{BootNotificationRequest, BootReason, ChargingStation};
use ocpp_core::SignatureCoordinator;

use crate::clock::Clock;
use crate::config::{StationConfig, MIN_HEARTBEAT_INTERVAL};
use crate::store::{StationStore, VariableKey};

pub const HEARTBEAT_COMPONENT: &str = "HeartbeatCtrlr";
pub const HEARTBEAT_VARIABLE: &str = "Interval";

/// A charging station: immutable identity plus its mutable state.
pub struct Station {
    config: StationConfig,
    store: StationStore,
    signatures: SignatureCoordinator,
    clock: Arc<dyn Clock>,
    heartbeat_interval_ms: AtomicU64,
    signing_failures: AtomicU64,
    verification_failures: AtomicU64,
}

impl Station {
    pub fn new(config: StationConfig, signatures: SignatureCoordinator, clock: Arc<dyn Clock>) -> Self {
        let store = StationStore::new(&config.evses);
        let heartbeat = config.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL);

        store.insert_variable(
            VariableKey::new(HEARTBEAT_COMPONENT, HEARTBEAT_VARIABLE),
            heartbeat.as_secs().to_string(),
        );
        store.insert_variable(
            VariableKey::new("SecurityCtrlr", "Identity"),
            config.station_id.clone(),
        );
        store.insert_variable(
            VariableKey::new("OCPPCommCtrlr", "MessageTimeout"),
            config.call_timeout.as_secs().to_string(),
        );

        tracing::info!(
            station = %config.station_id,
            evses = store.evses().len(),
            policy = signatures.active().name(),
            "station created"
        );

        Self {
            heartbeat_interval_ms: AtomicU64::new(heartbeat.as_millis() as u64),
            config,
            store,
            signatures,
            clock,
            signing_failures: AtomicU64::new(0),
            verification_failures: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.station_id
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn store(&self) -> &StationStore {
        &self.store
    }

    pub fn signatures(&self) -> &SignatureCoordinator {
        &self.signatures
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Current heartbeat period.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.load(Ordering::Relaxed))
    }

    /// Re-arm the heartbeat period, clamped to the 5s floor. Returns the
    /// interval actually applied.
    pub fn set_heartbeat_interval(&self, interval: Duration) -> Duration {
        let applied = interval.max(MIN_HEARTBEAT_INTERVAL);
        self.heartbeat_interval_ms
            .store(applied.as_millis() as u64, Ordering::Relaxed);
        self.store.insert_variable(
            VariableKey::new(HEARTBEAT_COMPONENT, HEARTBEAT_VARIABLE),
            applied.as_secs().to_string(),
        );
        tracing::info!(interval_secs = applied.as_secs(), "heartbeat interval set");
        applied
    }

    pub fn record_signing_failure(&self) {
        self.signing_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn signing_failures(&self) -> u64 {
        self.signing_failures.load(Ordering::Relaxed)
    }

    pub fn record_verification_failure(&self) {
        self.verification_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn verification_failures(&self) -> u64 {
        self.verification_failures.load(Ordering::Relaxed)
    }

    /// Boot notification payload describing this station.
    pub fn boot_request(&self, reason: BootReason) -> BootNotificationRequest {
        BootNotificationRequest {
            charging_station: ChargingStation {
                model: self.config.model.clone(),
                vendor_name: self.config.vendor.clone(),
                serial_number: self.config.serial_number.clone(),
                firmware_version: self.config.firmware_version.clone(),
            },
            reason,
        }
    }
}
