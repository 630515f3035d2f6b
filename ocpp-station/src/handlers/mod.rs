//! Business handlers and the registry that erases them to JSON.
//!
//! A handler is a synchronous function `(station, typed request) ->
//! (typed response, follow-ups)`. Mutations happen inside the handler under
//! the affected EVSE's lock; follow-ups are outbound commands the dispatcher
//! sends later, after their delay on the station clock. A handler's
//! follow-ups go out in the order it scheduled them; follow-ups sharing a
//! lane also wait for every earlier batch in that lane.

mod certificate;
mod charging;
mod device;
mod display;
mod reservation;
mod transaction;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use ocpp_core::command::{self, Command};
use ocpp_core::{Action, EvseId, Failure, FailureCode, OcppError};

use crate::station::Station;

/// An outbound command scheduled by a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUp {
    pub delay: Duration,
    pub action: Action,
    pub payload: Value,
    pub lane: Option<String>,
}

impl FollowUp {
    pub fn new<C: Command>(delay: Duration, payload: &C::Request) -> Result<Self, Failure> {
        Ok(Self {
            delay,
            action: C::ACTION,
            payload: to_json(payload)?,
            lane: None,
        })
    }

    pub fn immediate<C: Command>(payload: &C::Request) -> Result<Self, Failure> {
        Self::new::<C>(Duration::ZERO, payload)
    }

    /// Deliver only after earlier follow-ups in `lane` have been sent.
    pub fn in_lane(mut self, lane: impl Into<String>) -> Self {
        self.lane = Some(lane.into());
        self
    }

    /// Lane shared by every event about one EVSE.
    pub fn evse_lane(evse: &EvseId) -> String {
        format!("evse/{}", evse)
    }
}

/// A handler's typed response plus the follow-ups it scheduled.
#[derive(Debug)]
pub struct Handled<T> {
    pub response: T,
    pub follow_ups: Vec<FollowUp>,
}

impl<T> Handled<T> {
    pub fn reply(response: T) -> Self {
        Self {
            response,
            follow_ups: Vec::new(),
        }
    }

    pub fn then(mut self, follow_up: FollowUp) -> Self {
        self.follow_ups.push(follow_up);
        self
    }
}

pub type HandlerResult<T> = Result<Handled<T>, Failure>;

/// Output of an erased handler.
#[derive(Debug)]
pub struct Dispatched {
    pub body: Value,
    pub follow_ups: Vec<FollowUp>,
}

type ErasedHandler = Box<dyn Fn(&Station, Value) -> Result<Dispatched, Failure> + Send + Sync>;

fn to_json<T: Serialize>(value: &T) -> Result<Value, Failure> {
    serde_json::to_value(value).map_err(|e| Failure::from(OcppError::from(e)))
}

/// Per-kind handler table.
pub struct HandlerRegistry {
    handlers: HashMap<Action, ErasedHandler>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for command kind `C`, replacing any previous one.
    pub fn register<C, F>(&mut self, handler: F)
    where
        C: Command,
        F: Fn(&Station, C::Request) -> HandlerResult<C::Response> + Send + Sync + 'static,
    {
        let erased: ErasedHandler = Box::new(move |station, payload| {
            let request: C::Request = serde_json::from_value(payload).map_err(|e| {
                Failure::new(
                    FailureCode::FormatViolation,
                    format!("invalid {} payload: {}", C::ACTION, e),
                )
            })?;
            let handled = handler(station, request)?;
            Ok(Dispatched {
                body: to_json(&handled.response)?,
                follow_ups: handled.follow_ups,
            })
        });
        self.handlers.insert(C::ACTION, erased);
    }

    pub fn contains(&self, action: Action) -> bool {
        self.handlers.contains_key(&action)
    }

    pub fn actions(&self) -> Vec<Action> {
        self.handlers.keys().copied().collect()
    }

    /// Run the handler for `action`. Panics are contained and reported as
    /// `GenericServerError`.
    pub fn invoke(&self, station: &Station, action: Action, payload: Value) -> Result<Dispatched, Failure> {
        let handler = self.handlers.get(&action).ok_or_else(|| {
            Failure::new(
                FailureCode::NotImplemented,
                format!("no handler registered for {}", action),
            )
        })?;

        match catch_unwind(AssertUnwindSafe(|| handler(station, payload))) {
            Ok(result) => result,
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                tracing::error!(%action, "handler panicked: {}", detail);
                Err(Failure::new(FailureCode::GenericServerError, detail))
            }
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry with every inbound kind the station answers.
pub fn station_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    registry.register::<command::RequestStartTransaction, _>(transaction::request_start);
    registry.register::<command::RequestStopTransaction, _>(transaction::request_stop);
    registry.register::<command::GetTransactionStatus, _>(transaction::get_status);
    registry.register::<command::CostUpdated, _>(transaction::cost_updated);

    registry.register::<command::ReserveNow, _>(reservation::reserve_now);
    registry.register::<command::CancelReservation, _>(reservation::cancel);

    registry.register::<command::SetDisplayMessage, _>(display::set);
    registry.register::<command::GetDisplayMessages, _>(display::get);
    registry.register::<command::ClearDisplayMessage, _>(display::clear);

    registry.register::<command::InstallCertificate, _>(certificate::install);
    registry.register::<command::DeleteCertificate, _>(certificate::delete);
    registry.register::<command::GetInstalledCertificateIds, _>(certificate::installed_ids);

    registry.register::<command::SetChargingProfile, _>(charging::set_profile);
    registry.register::<command::ClearChargingProfile, _>(charging::clear_profile);
    registry.register::<command::GetChargingProfiles, _>(charging::get_profiles);

    registry.register::<command::Reset, _>(device::reset);
    registry.register::<command::ChangeAvailability, _>(device::change_availability);
    registry.register::<command::UnlockConnector, _>(device::unlock_connector);
    registry.register::<command::TriggerMessage, _>(device::trigger_message);
    registry.register::<command::GetVariables, _>(device::get_variables);
    registry.register::<command::SetVariables, _>(device::set_variables);
    registry.register::<command::DataTransfer, _>(device::data_transfer);
    registry.register::<command::ClearCache, _>(device::clear_cache);
    registry.register::<command::GetLocalListVersion, _>(device::local_list_version);
    registry.register::<command::SendLocalList, _>(device::send_local_list);

    registry.register::<command::CertificateSigned, _>(device::acknowledge);
    registry.register::<command::ClearVariableMonitoring, _>(device::acknowledge);
    registry.register::<command::CustomerInformation, _>(device::acknowledge);
    registry.register::<command::GetBaseReport, _>(device::acknowledge);
    registry.register::<command::GetCompositeSchedule, _>(device::acknowledge);
    registry.register::<command::GetLog, _>(device::acknowledge);
    registry.register::<command::GetMonitoringReport, _>(device::acknowledge);
    registry.register::<command::GetReport, _>(device::acknowledge);
    registry.register::<command::PublishFirmware, _>(device::acknowledge);
    registry.register::<command::SetMonitoringBase, _>(device::acknowledge);
    registry.register::<command::SetMonitoringLevel, _>(device::acknowledge);
    registry.register::<command::SetNetworkProfile, _>(device::acknowledge);
    registry.register::<command::SetVariableMonitoring, _>(device::acknowledge);
    registry.register::<command::UnpublishFirmware, _>(device::acknowledge);
    registry.register::<command::UpdateFirmware, _>(device::acknowledge);
    registry.register::<command::AFRRSignal, _>(device::acknowledge);
    registry.register::<command::AdjustPeriodicEventStream, _>(device::acknowledge);
    registry.register::<command::ChangeTransactionTariff, _>(device::acknowledge);
    registry.register::<command::ClearDERControl, _>(device::acknowledge);
    registry.register::<command::ClearTariffs, _>(device::acknowledge);
    registry.register::<command::GetDERControl, _>(device::acknowledge);
    registry.register::<command::GetPeriodicEventStream, _>(device::acknowledge);
    registry.register::<command::GetTariffs, _>(device::acknowledge);
    registry.register::<command::NotifyAllowedEnergyTransfer, _>(device::acknowledge);
    registry.register::<command::NotifyWebPaymentStarted, _>(device::acknowledge);
    registry.register::<command::RequestBatterySwap, _>(device::acknowledge);
    registry.register::<command::SetDERControl, _>(device::acknowledge);
    registry.register::<command::SetDefaultTariff, _>(device::acknowledge);
    registry.register::<command::UpdateDynamicSchedule, _>(device::acknowledge);
    registry.register::<command::UsePriorityCharging, _>(device::acknowledge);

    registry
}
