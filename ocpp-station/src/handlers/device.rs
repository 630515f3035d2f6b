use std::time::Duration;

use serde_json::Value;

use ocpp_core::command::{BootNotification, Heartbeat, StatusNotification};
use ocpp_core::payloads::{
    BootReason, ChangeAvailabilityRequest, ChangeAvailabilityResponse, ChangeAvailabilityStatus,
    DataTransferRequest, DataTransferResponse, DataTransferStatus, Empty,
    GetLocalListVersionResponse, GetVariableResult, GetVariableStatus, GetVariablesRequest,
    GetVariablesResponse, MessageTrigger, ResetRequest, ResetResponse, ResetStatus,
    SendLocalListRequest, SendLocalListResponse, SendLocalListStatus, SetVariableResult,
    SetVariableStatus, SetVariablesRequest, SetVariablesResponse, StatusInfo,
    StatusNotificationRequest, StatusResponse, TriggerMessageRequest, TriggerMessageResponse,
    TriggerMessageStatus, UnlockConnectorRequest, UnlockConnectorResponse, UnlockStatus,
    UpdateType,
};

use super::{FollowUp, Handled, HandlerResult};
use crate::evse::Evse;
use crate::station::{Station, HEARTBEAT_COMPONENT, HEARTBEAT_VARIABLE};
use crate::store::VariableKey;

/// A targeted EVSE must exist; a station-wide reset is always accepted.
pub fn reset(station: &Station, request: ResetRequest) -> HandlerResult<ResetResponse> {
    let known = request
        .evse_id
        .as_ref()
        .map_or(true, |id| station.store().evse(id).is_some());

    tracing::info!(reset = ?request.reset_type, evse = ?request.evse_id, known, "reset requested");
    Ok(Handled::reply(ResetResponse {
        status: if known {
            ResetStatus::Accepted
        } else {
            ResetStatus::Rejected
        },
        status_info: (!known).then(|| StatusInfo::reason("UnknownEvse")).flatten(),
    }))
}

/// Charging EVSEs record the new status but answer Scheduled.
pub fn change_availability(
    station: &Station,
    request: ChangeAvailabilityRequest,
) -> HandlerResult<ChangeAvailabilityResponse> {
    let targets: Vec<_> = match &request.evse {
        None => station.store().evses().to_vec(),
        Some(target) => match station.store().evse(&target.id) {
            Some(evse) if target.connector_id.map_or(true, |c| evse.has_connector(c)) => vec![evse],
            _ => {
                return Ok(Handled::reply(ChangeAvailabilityResponse {
                    status: ChangeAvailabilityStatus::Rejected,
                    status_info: StatusInfo::reason("UnknownEvse"),
                }))
            }
        },
    };

    let mut scheduled = false;
    for evse in &targets {
        let mut state = evse.lock();
        state.admin_status = request.operational_status;
        state.refresh_connector_status();
        scheduled |= state.is_charging();
    }

    Ok(Handled::reply(ChangeAvailabilityResponse {
        status: if scheduled {
            ChangeAvailabilityStatus::Scheduled
        } else {
            ChangeAvailabilityStatus::Accepted
        },
        status_info: None,
    }))
}

pub fn unlock_connector(
    station: &Station,
    request: UnlockConnectorRequest,
) -> HandlerResult<UnlockConnectorResponse> {
    let status = match station.store().connector(&request.evse_id, request.connector_id) {
        None => UnlockStatus::UnknownConnector,
        Some(evse) if evse.is_charging() => UnlockStatus::OngoingAuthorizedTransaction,
        Some(_) => UnlockStatus::Unlocked,
    };
    Ok(Handled::reply(UnlockConnectorResponse {
        status,
        status_info: None,
    }))
}

pub fn trigger_message(
    station: &Station,
    request: TriggerMessageRequest,
) -> HandlerResult<TriggerMessageResponse> {
    let reply = |status| {
        Handled::reply(TriggerMessageResponse {
            status,
            status_info: None,
        })
    };

    let targets: Vec<_> = match &request.evse {
        None => station.store().evses().to_vec(),
        Some(target) => match station.store().evse(&target.id) {
            Some(evse) if target.connector_id.map_or(true, |c| evse.has_connector(c)) => vec![evse],
            _ => return Ok(reply(TriggerMessageStatus::Rejected)),
        },
    };

    match request.requested_message {
        MessageTrigger::BootNotification => {
            let boot = station.boot_request(BootReason::Triggered);
            Ok(reply(TriggerMessageStatus::Accepted)
                .then(FollowUp::immediate::<BootNotification>(&boot)?))
        }
        MessageTrigger::Heartbeat => Ok(reply(TriggerMessageStatus::Accepted)
            .then(FollowUp::immediate::<Heartbeat>(&Empty {})?)),
        MessageTrigger::StatusNotification => {
            let connector = request.evse.as_ref().and_then(|t| t.connector_id);
            let mut handled = reply(TriggerMessageStatus::Accepted);
            for notification in status_notifications(station, &targets, connector) {
                handled = handled.then(FollowUp::immediate::<StatusNotification>(&notification)?);
            }
            Ok(handled)
        }
        other => {
            tracing::debug!(trigger = ?other, "trigger not supported");
            Ok(reply(TriggerMessageStatus::NotImplemented))
        }
    }
}

fn status_notifications(
    station: &Station,
    evses: &[std::sync::Arc<Evse>],
    only: Option<u32>,
) -> Vec<StatusNotificationRequest> {
    let now = station.now();
    evses
        .iter()
        .flat_map(|evse| {
            let status = evse.snapshot().connector_status;
            evse.connectors()
                .iter()
                .filter(move |c| only.map_or(true, |o| o == **c))
                .map(move |connector| StatusNotificationRequest {
                    timestamp: now,
                    connector_status: status,
                    evse_id: evse.id().clone(),
                    connector_id: *connector,
                })
        })
        .collect()
}

pub fn get_variables(station: &Station, request: GetVariablesRequest) -> HandlerResult<GetVariablesResponse> {
    let results = request
        .get_variable_data
        .into_iter()
        .map(|data| {
            let key = VariableKey::new(data.component.name.clone(), data.variable.name.clone());
            let value = station.store().variable(&key);
            GetVariableResult {
                attribute_status: if value.is_some() {
                    GetVariableStatus::Accepted
                } else {
                    GetVariableStatus::UnknownVariable
                },
                attribute_value: value,
                component: data.component,
                variable: data.variable,
            }
        })
        .collect();

    Ok(Handled::reply(GetVariablesResponse {
        get_variable_result: results,
    }))
}

/// Setting the heartbeat interval re-arms the heartbeat loop.
pub fn set_variables(station: &Station, request: SetVariablesRequest) -> HandlerResult<SetVariablesResponse> {
    let results = request
        .set_variable_data
        .into_iter()
        .map(|data| {
            let key = VariableKey::new(data.component.name.clone(), data.variable.name.clone());
            let status = if key.component == HEARTBEAT_COMPONENT && key.variable == HEARTBEAT_VARIABLE {
                match data.attribute_value.trim().parse::<u64>() {
                    Ok(secs) => {
                        station.set_heartbeat_interval(Duration::from_secs(secs));
                        SetVariableStatus::Accepted
                    }
                    Err(_) => SetVariableStatus::Rejected,
                }
            } else if station.store().set_variable(&key, data.attribute_value.clone()) {
                SetVariableStatus::Accepted
            } else {
                SetVariableStatus::UnknownVariable
            };
            SetVariableResult {
                attribute_status: status,
                component: data.component,
                variable: data.variable,
            }
        })
        .collect();

    Ok(Handled::reply(SetVariablesResponse {
        set_variable_result: results,
    }))
}

/// No vendor extensions are recognised.
pub fn data_transfer(_station: &Station, request: DataTransferRequest) -> HandlerResult<DataTransferResponse> {
    tracing::debug!(vendor = %request.vendor_id, "data transfer for unknown vendor");
    Ok(Handled::reply(DataTransferResponse {
        status: DataTransferStatus::UnknownVendorId,
        data: None,
    }))
}

pub fn clear_cache(_station: &Station, _request: Empty) -> HandlerResult<StatusResponse> {
    Ok(Handled::reply(StatusResponse::accepted()))
}

pub fn local_list_version(station: &Station, _request: Empty) -> HandlerResult<GetLocalListVersionResponse> {
    Ok(Handled::reply(GetLocalListVersionResponse {
        version_number: station.store().local_list_version(),
    }))
}

pub fn send_local_list(station: &Station, request: SendLocalListRequest) -> HandlerResult<SendLocalListResponse> {
    let status = match request.update_type {
        UpdateType::Full => {
            station
                .store()
                .replace_local_list(request.version_number, &request.local_authorization_list);
            SendLocalListStatus::Accepted
        }
        UpdateType::Differential => {
            if station
                .store()
                .update_local_list(request.version_number, &request.local_authorization_list)
            {
                SendLocalListStatus::Accepted
            } else {
                SendLocalListStatus::VersionMismatch
            }
        }
    };
    Ok(Handled::reply(SendLocalListResponse {
        status,
        status_info: None,
    }))
}

/// Acknowledge kinds the station has no logic for.
pub fn acknowledge(_station: &Station, _request: Value) -> HandlerResult<StatusResponse> {
    Ok(Handled::reply(StatusResponse::accepted()))
}
