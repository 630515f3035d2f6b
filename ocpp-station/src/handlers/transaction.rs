use ocpp_core::command::TransactionEvent;
use ocpp_core::payloads::{
    CostUpdatedRequest, Empty, GetTransactionStatusRequest, GetTransactionStatusResponse,
    RequestStartStopStatus, RequestStartTransactionRequest, RequestStartTransactionResponse,
    RequestStopTransactionRequest, RequestStopTransactionResponse, StatusInfo,
};
use ocpp_core::Failure;

use super::{FollowUp, Handled, HandlerResult};
use crate::station::Station;
use crate::transaction;

pub fn request_start(
    station: &Station,
    request: RequestStartTransactionRequest,
) -> HandlerResult<RequestStartTransactionResponse> {
    match transaction::start(station, &request) {
        Ok(started) => {
            let event = FollowUp::new::<TransactionEvent>(station.config().settle_delay, &started.event)?
                .in_lane(FollowUp::evse_lane(&started.record.evse_id));
            Ok(Handled::reply(RequestStartTransactionResponse {
                status: RequestStartStopStatus::Accepted,
                transaction_id: Some(started.record.id),
                status_info: None,
            })
            .then(event))
        }
        Err(rejection) => Ok(Handled::reply(RequestStartTransactionResponse {
            status: RequestStartStopStatus::Rejected,
            transaction_id: None,
            status_info: StatusInfo::reason(rejection.reason_code()),
        })),
    }
}

pub fn request_stop(
    station: &Station,
    request: RequestStopTransactionRequest,
) -> HandlerResult<RequestStopTransactionResponse> {
    match transaction::stop(station, &request.transaction_id) {
        Ok(ended) => {
            let event = FollowUp::immediate::<TransactionEvent>(&ended.event)?
                .in_lane(FollowUp::evse_lane(&ended.evse_id));
            Ok(Handled::reply(RequestStopTransactionResponse {
                status: RequestStartStopStatus::Accepted,
                status_info: None,
            })
            .then(event))
        }
        Err(rejection) => Ok(Handled::reply(RequestStopTransactionResponse {
            status: RequestStartStopStatus::Rejected,
            status_info: StatusInfo::reason(rejection.reason_code()),
        })),
    }
}

/// Always reports an ongoing transaction and an empty queue.
pub fn get_status(
    _station: &Station,
    _request: GetTransactionStatusRequest,
) -> HandlerResult<GetTransactionStatusResponse> {
    Ok(Handled::reply(GetTransactionStatusResponse {
        ongoing_indicator: Some(true),
        messages_in_queue: false,
    }))
}

pub fn cost_updated(station: &Station, request: CostUpdatedRequest) -> HandlerResult<Empty> {
    station
        .store()
        .update_cost(&request.transaction_id, request.total_cost)
        .map_err(Failure::from)?;
    Ok(Handled::reply(Empty {}))
}
