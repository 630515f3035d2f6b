//! Station configuration.

use std::time::Duration;

use ocpp_core::{ConnectorId, EvseId};

/// Minimum heartbeat interval accepted from a boot handshake.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Station configuration.
#[derive(Debug, Clone)]
pub struct StationConfig {
    /// Station identity; inbound commands addressed elsewhere are refused.
    pub station_id: String,
    pub vendor: String,
    pub model: String,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
    /// EVSEs and their connectors, fixed for the station's lifetime.
    pub evses: Vec<EvseConfig>,
    /// Heartbeat period until a boot handshake advises another.
    pub heartbeat_interval: Duration,
    /// Offline queue maintenance period.
    pub maintenance_interval: Duration,
    /// How long a maintenance pass waits for the pass guard.
    pub maintenance_lock_timeout: Duration,
    /// Bound on every outbound call.
    pub call_timeout: Duration,
    /// Delay between an accepted remote start and its Started event.
    pub settle_delay: Duration,
    pub heartbeat_disabled: bool,
    pub maintenance_disabled: bool,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            station_id: "CS-1".to_string(),
            vendor: "OpenCharge".to_string(),
            model: "AC-22".to_string(),
            serial_number: None,
            firmware_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            evses: vec![EvseConfig::new("1", [1]), EvseConfig::new("2", [1])],
            heartbeat_interval: Duration::from_secs(30),
            maintenance_interval: Duration::from_secs(1),
            maintenance_lock_timeout: Duration::from_millis(100),
            call_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_secs(1),
            heartbeat_disabled: false,
            maintenance_disabled: false,
        }
    }
}

impl StationConfig {
    /// Create a new config with a custom station id.
    pub fn with_id(station_id: impl Into<String>) -> Self {
        Self {
            station_id: station_id.into(),
            ..Default::default()
        }
    }

    /// Replace the EVSE layout.
    pub fn with_evses(mut self, evses: Vec<EvseConfig>) -> Self {
        self.evses = evses;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Disable both periodic loops (tests drive passes by hand).
    pub fn without_timers(mut self) -> Self {
        self.heartbeat_disabled = true;
        self.maintenance_disabled = true;
        self
    }
}

/// One EVSE and its connectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvseConfig {
    pub id: EvseId,
    pub connectors: Vec<ConnectorId>,
}

impl EvseConfig {
    pub fn new(id: impl Into<String>, connectors: impl IntoIterator<Item = ConnectorId>) -> Self {
        Self {
            id: EvseId::new(id),
            connectors: connectors.into_iter().collect(),
        }
    }
}
