//! Per-EVSE charging session lifecycle.
//!
//! Start and stop run entirely under the target EVSE's lock, so concurrent
//! commands against the same EVSE observe each other's effects in order.
//! Meter readings are synthetic: a session starts at [`METER_START_WH`] and
//! stops at [`METER_STOP_WH`].

use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use ocpp_core::payloads::{
    ChargingStateKind, EvseTarget, Measurand, MeterValue, ReadingContext,
    RequestStartTransactionRequest, SampledValue, SignedMeterValue, StopReason,
    TransactionEventRequest, TransactionEventType, TransactionInfo, TriggerReason,
};
use ocpp_core::{canonicalize_json, ChargingEvent, EvseId, TransactionState};

use crate::station::Station;
use crate::store::TransactionRecord;

pub const METER_START_WH: f64 = 0.0;
pub const METER_STOP_WH: f64 = 12_500.0;

/// Why a start was declined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRejection {
    NoTarget,
    UnknownEvse,
    AlreadyCharging,
}

impl StartRejection {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::NoTarget => "MissingEvseId",
            Self::UnknownEvse => "UnknownEvse",
            Self::AlreadyCharging => "TxInProgress",
        }
    }
}

/// Why a stop was declined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRejection {
    UnknownTransaction,
    NotCharging,
}

impl StopRejection {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::UnknownTransaction => "UnknownTransaction",
            Self::NotCharging => "TxNotFound",
        }
    }
}

/// An accepted start and the event announcing it.
#[derive(Debug, Clone)]
pub struct Started {
    pub record: TransactionRecord,
    pub event: TransactionEventRequest,
}

/// An accepted stop and the event announcing it.
#[derive(Debug, Clone)]
pub struct Ended {
    pub transaction_id: String,
    pub evse_id: EvseId,
    pub time_spent_charging: i64,
    pub event: TransactionEventRequest,
}

/// Idle -> Charging on the requested EVSE.
pub fn start(
    station: &Station,
    request: &RequestStartTransactionRequest,
) -> Result<Started, StartRejection> {
    let evse_id = request.evse_id.as_ref().ok_or(StartRejection::NoTarget)?;
    let evse = station
        .store()
        .evse(evse_id)
        .ok_or(StartRejection::UnknownEvse)?;
    let now = station.now();
    let transaction_id = Uuid::new_v4().to_string();

    let mut state = evse.lock();
    state
        .transition(ChargingEvent::StartAccepted)
        .map_err(|_| StartRejection::AlreadyCharging)?;

    if let Some(reservation) = state.reservation_id.take() {
        station.store().remove_reservation(reservation);
        tracing::debug!(evse = %evse_id, reservation, "reservation consumed by start");
    }
    state.transaction_id = Some(transaction_id.clone());
    state.remote_start_id = Some(request.remote_start_id);
    state.id_token = Some(request.id_token.clone());
    state.group_id_token = request.group_id_token.clone();
    state.meter_start = Some(METER_START_WH);
    state.meter_stop = None;
    state.started_at = Some(now);
    state.stopped_at = None;
    if let Some(profile) = &request.charging_profile {
        state.charging_profiles.retain(|p| p.id != profile.id);
        state.charging_profiles.push(profile.clone());
    }
    state.refresh_connector_status();
    drop(state);

    let record = TransactionRecord {
        id: transaction_id.clone(),
        evse_id: evse_id.clone(),
        state: TransactionState::Started,
        remote_start_id: Some(request.remote_start_id),
        meter_start: METER_START_WH,
        meter_stop: None,
        started_at: now,
        stopped_at: None,
        stop_reason: None,
        total_cost: None,
    };
    station.store().insert_transaction(record.clone());

    let event = TransactionEventRequest {
        event_type: TransactionEventType::Started,
        timestamp: now,
        trigger_reason: TriggerReason::RemoteStart,
        seq_no: 0,
        transaction_info: TransactionInfo {
            transaction_id: transaction_id.clone(),
            charging_state: Some(ChargingStateKind::Charging),
            time_spent_charging: None,
            stopped_reason: None,
            remote_start_id: Some(request.remote_start_id),
        },
        evse: Some(evse_target(evse_id, evse.connectors().first().copied())),
        id_token: Some(request.id_token.clone()),
        meter_value: vec![meter_sample(
            station,
            &transaction_id,
            METER_START_WH,
            now,
            ReadingContext::TransactionBegin,
        )],
    };

    tracing::info!(evse = %evse_id, transaction = %transaction_id, "transaction started");
    Ok(Started { record, event })
}

/// Charging -> Idle on the EVSE bound to `transaction_id`.
pub fn stop(station: &Station, transaction_id: &str) -> Result<Ended, StopRejection> {
    let evse = station
        .store()
        .evse_by_transaction(transaction_id)
        .ok_or(StopRejection::UnknownTransaction)?;
    let now = station.now();

    let mut state = evse.lock();
    if state.transaction_id.as_deref() != Some(transaction_id) {
        return Err(StopRejection::UnknownTransaction);
    }
    state
        .transition(ChargingEvent::StopAccepted)
        .map_err(|_| StopRejection::NotCharging)?;
    state.meter_stop = Some(METER_STOP_WH);
    state.stopped_at = Some(now);
    let started_at = state.started_at.unwrap_or(now);
    let remote_start_id = state.remote_start_id;
    let id_token = state.id_token.clone();
    state.refresh_connector_status();
    drop(state);

    if let Err(e) = station
        .store()
        .finish_transaction(transaction_id, METER_STOP_WH, now, StopReason::Remote)
    {
        tracing::warn!(transaction = %transaction_id, "transaction record not finalized: {}", e);
    }

    let time_spent_charging = (now - started_at).num_seconds();
    let event = TransactionEventRequest {
        event_type: TransactionEventType::Ended,
        timestamp: now,
        trigger_reason: TriggerReason::RemoteStop,
        seq_no: 1,
        transaction_info: TransactionInfo {
            transaction_id: transaction_id.to_string(),
            charging_state: Some(ChargingStateKind::Idle),
            time_spent_charging: Some(time_spent_charging),
            stopped_reason: Some(StopReason::Remote),
            remote_start_id,
        },
        evse: Some(evse_target(evse.id(), evse.connectors().first().copied())),
        id_token,
        meter_value: vec![meter_sample(
            station,
            transaction_id,
            METER_STOP_WH,
            now,
            ReadingContext::TransactionEnd,
        )],
    };

    tracing::info!(
        evse = %evse.id(),
        transaction = %transaction_id,
        seconds = time_spent_charging,
        "transaction ended"
    );
    Ok(Ended {
        transaction_id: transaction_id.to_string(),
        evse_id: evse.id().clone(),
        time_spent_charging,
        event,
    })
}

fn evse_target(id: &EvseId, connector_id: Option<u32>) -> EvseTarget {
    EvseTarget {
        id: id.clone(),
        connector_id,
    }
}

/// Energy register sample signed under the active policy.
fn meter_sample(
    station: &Station,
    transaction_id: &str,
    value: f64,
    timestamp: DateTime<Utc>,
    context: ReadingContext,
) -> MeterValue {
    let data = json!({
        "transactionId": transaction_id,
        "timestamp": timestamp,
        "value": value,
    });
    let check = station.signatures().sign(&canonicalize_json(&data));
    if !check.ok {
        station.record_signing_failure();
        tracing::warn!(transaction = %transaction_id, "meter sample not signed: {}", check.detail);
    }
    let envelope = json!({ "data": data, "signature": check.signature });
    let policy = station.signatures().active();

    MeterValue {
        timestamp,
        sampled_value: vec![SampledValue {
            value,
            context: Some(context),
            measurand: Some(Measurand::EnergyActiveImportRegister),
            signed_meter_value: Some(SignedMeterValue {
                signed_meter_data: base64::engine::general_purpose::STANDARD
                    .encode(canonicalize_json(&envelope)),
                signing_method: policy.name().to_string(),
                encoding_method: "JCS".to_string(),
                public_key: policy.public_key(),
            }),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;
    use ocpp_core::payloads::{ConnectorStatus, IdToken};
    use std::time::Duration;

    fn start_request(evse: Option<&str>) -> RequestStartTransactionRequest {
        RequestStartTransactionRequest {
            evse_id: evse.map(EvseId::from),
            remote_start_id: 42,
            id_token: IdToken {
                id_token: "TOKEN".to_string(),
                token_type: "ISO14443".to_string(),
            },
            charging_profile: None,
            group_id_token: None,
        }
    }

    #[test]
    fn start_binds_transaction() {
        let station = testkit::station();
        let started = start(&station, &start_request(Some("1"))).unwrap();

        let evse = station.store().evse(&EvseId::from("1")).unwrap();
        let state = evse.snapshot();
        assert!(state.is_charging());
        assert_eq!(state.transaction_id.as_deref(), Some(started.record.id.as_str()));
        assert_eq!(state.meter_start, Some(METER_START_WH));
        assert_eq!(state.connector_status, ConnectorStatus::Occupied);

        let sample = &started.event.meter_value[0].sampled_value[0];
        assert_eq!(sample.value, METER_START_WH);
        assert_eq!(
            sample.signed_meter_value.as_ref().unwrap().signing_method,
            "Unsigned"
        );
    }

    #[test]
    fn start_rejections() {
        let station = testkit::station();
        assert_eq!(
            start(&station, &start_request(None)).unwrap_err(),
            StartRejection::NoTarget
        );
        assert_eq!(
            start(&station, &start_request(Some("9"))).unwrap_err(),
            StartRejection::UnknownEvse
        );

        let first = start(&station, &start_request(Some("1"))).unwrap();
        assert_eq!(
            start(&station, &start_request(Some("1"))).unwrap_err(),
            StartRejection::AlreadyCharging
        );
        let state = station.store().evse(&EvseId::from("1")).unwrap().snapshot();
        assert_eq!(state.transaction_id, Some(first.record.id));
    }

    #[test]
    fn start_consumes_reservation() {
        let station = testkit::station();
        let evse = station.store().evse(&EvseId::from("2")).unwrap();
        station.store().insert_reservation(5);
        evse.lock().reservation_id = Some(5);

        start(&station, &start_request(Some("2"))).unwrap();
        assert!(!station.store().has_reservation(5));
        assert!(evse.snapshot().reservation_id.is_none());
    }

    #[test]
    fn stop_reports_duration() {
        let (station, clock) = testkit::station_with_clock();
        let started = start(&station, &start_request(Some("1"))).unwrap();

        clock.advance(Duration::from_secs(90));
        let ended = stop(&station, &started.record.id).unwrap();
        assert_eq!(ended.time_spent_charging, 90);
        assert_eq!(
            ended.event.transaction_info.stopped_reason,
            Some(StopReason::Remote)
        );

        let record = station.store().transaction(&started.record.id).unwrap();
        assert_eq!(record.state, TransactionState::Ended);
        assert_eq!(record.meter_stop, Some(METER_STOP_WH));

        assert_eq!(
            stop(&station, &started.record.id).unwrap_err(),
            StopRejection::NotCharging
        );
        assert_eq!(
            stop(&station, "missing").unwrap_err(),
            StopRejection::UnknownTransaction
        );
    }
}
