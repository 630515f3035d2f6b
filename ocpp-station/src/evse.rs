//! EVSE records and their per-EVSE session state.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};

use ocpp_core::payloads::{ChargingProfile, ConnectorStatus, IdToken, OperationalStatus};
use ocpp_core::{ChargingEvent, ChargingState, ConnectorId, EvseId, OcppError, OcppResult};

/// Mutable state of one EVSE. Only reachable through [`Evse::lock`].
#[derive(Debug, Clone, PartialEq)]
pub struct EvseState {
    pub admin_status: OperationalStatus,
    pub connector_status: ConnectorStatus,
    pub reservation_id: Option<i32>,
    pub charging: ChargingState,
    pub transaction_id: Option<String>,
    pub remote_start_id: Option<i32>,
    pub charging_profiles: Vec<ChargingProfile>,
    pub meter_start: Option<f64>,
    pub meter_stop: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub id_token: Option<IdToken>,
    pub group_id_token: Option<IdToken>,
}

impl Default for EvseState {
    fn default() -> Self {
        Self {
            admin_status: OperationalStatus::Operative,
            connector_status: ConnectorStatus::Available,
            reservation_id: None,
            charging: ChargingState::Idle,
            transaction_id: None,
            remote_start_id: None,
            charging_profiles: Vec::new(),
            meter_start: None,
            meter_stop: None,
            started_at: None,
            stopped_at: None,
            id_token: None,
            group_id_token: None,
        }
    }
}

impl EvseState {
    pub fn is_charging(&self) -> bool {
        self.charging.is_charging()
    }

    /// Apply a charging event, refusing transitions the automaton forbids.
    pub fn transition(&mut self, event: ChargingEvent) -> OcppResult<()> {
        let new_state = event.target();
        if self.charging.can_transition_to(new_state) {
            tracing::debug!("Charging transition: {:?} -> {:?}", self.charging, new_state);
            self.charging = new_state;
            Ok(())
        } else {
            Err(OcppError::Protocol(format!(
                "Invalid charging transition: {:?} -> {:?}",
                self.charging, new_state
            )))
        }
    }

    /// Operational status the connectors report when nothing overrides it.
    pub fn derived_connector_status(&self) -> ConnectorStatus {
        if self.admin_status == OperationalStatus::Inoperative {
            ConnectorStatus::Unavailable
        } else if self.is_charging() {
            ConnectorStatus::Occupied
        } else if self.reservation_id.is_some() {
            ConnectorStatus::Reserved
        } else {
            ConnectorStatus::Available
        }
    }

    /// Recompute the connector status after a mutation.
    pub fn refresh_connector_status(&mut self) {
        if self.connector_status != ConnectorStatus::Faulted {
            self.connector_status = self.derived_connector_status();
        }
    }
}

/// An EVSE with a fixed connector set.
#[derive(Debug)]
pub struct Evse {
    id: EvseId,
    connectors: Vec<ConnectorId>,
    state: Mutex<EvseState>,
}

impl Evse {
    pub fn new(id: EvseId, connectors: Vec<ConnectorId>) -> Self {
        Self {
            id,
            connectors,
            state: Mutex::new(EvseState::default()),
        }
    }

    pub fn id(&self) -> &EvseId {
        &self.id
    }

    pub fn connectors(&self) -> &[ConnectorId] {
        &self.connectors
    }

    pub fn has_connector(&self, connector: ConnectorId) -> bool {
        self.connectors.contains(&connector)
    }

    /// Serialize access to this EVSE's state.
    pub fn lock(&self) -> MutexGuard<'_, EvseState> {
        self.state.lock()
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> EvseState {
        self.state.lock().clone()
    }

    pub fn is_charging(&self) -> bool {
        self.state.lock().is_charging()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charging_transitions_are_validated() {
        let mut state = EvseState::default();
        state.transition(ChargingEvent::StartAccepted).unwrap();
        assert!(state.is_charging());
        assert!(state.transition(ChargingEvent::StartAccepted).is_err());
        state.transition(ChargingEvent::StopAccepted).unwrap();
        assert!(!state.is_charging());
    }

    #[test]
    fn connector_status_follows_state() {
        let evse = Evse::new(EvseId::from("1"), vec![1, 2]);
        assert!(evse.has_connector(2));
        assert!(!evse.has_connector(3));

        {
            let mut state = evse.lock();
            state.reservation_id = Some(4);
            state.refresh_connector_status();
        }
        assert_eq!(evse.snapshot().connector_status, ConnectorStatus::Reserved);

        {
            let mut state = evse.lock();
            state.admin_status = OperationalStatus::Inoperative;
            state.refresh_connector_status();
        }
        assert_eq!(evse.snapshot().connector_status, ConnectorStatus::Unavailable);
    }
}
