use ocpp_core::payloads::{
    CancelReservationRequest, CancelReservationResponse, GenericStatus, OperationalStatus,
    ReserveNowRequest, ReserveNowResponse, ReserveNowStatus, StatusInfo,
};

use super::{Handled, HandlerResult};
use crate::station::Station;

pub fn reserve_now(station: &Station, request: ReserveNowRequest) -> HandlerResult<ReserveNowResponse> {
    let reply = |status, reason: Option<&str>| {
        Ok(Handled::reply(ReserveNowResponse {
            status,
            status_info: reason.and_then(StatusInfo::reason),
        }))
    };

    let Some(evse) = request.evse_id.as_ref().and_then(|id| station.store().evse(id)) else {
        return reply(ReserveNowStatus::Rejected, Some("UnknownEvse"));
    };

    let mut state = evse.lock();
    if state.admin_status == OperationalStatus::Inoperative {
        return reply(ReserveNowStatus::Unavailable, None);
    }
    if state.is_charging() || state.reservation_id.is_some() {
        return reply(ReserveNowStatus::Occupied, None);
    }
    if !station.store().insert_reservation(request.id) {
        return reply(ReserveNowStatus::Rejected, Some("DuplicateReservation"));
    }
    state.reservation_id = Some(request.id);
    state.refresh_connector_status();

    tracing::info!(evse = %evse.id(), reservation = request.id, "reservation accepted");
    reply(ReserveNowStatus::Accepted, None)
}

/// Always accepted, whether or not the reservation existed. The id leaves
/// the reservation set under the lock of the EVSE holding it, so a
/// concurrent ReserveNow reusing the id keeps its own binding.
pub fn cancel(
    station: &Station,
    request: CancelReservationRequest,
) -> HandlerResult<CancelReservationResponse> {
    let id = request.reservation_id;
    let mut existed = false;

    for evse in station.store().evses() {
        let mut state = evse.lock();
        if state.reservation_id == Some(id) {
            state.reservation_id = None;
            state.refresh_connector_status();
            existed = station.store().remove_reservation(id);
            tracing::debug!(evse = %evse.id(), reservation = id, "reservation cancelled");
            break;
        }
    }

    if !existed {
        tracing::debug!(reservation = id, "no reservation to cancel");
    }
    Ok(Handled::reply(CancelReservationResponse {
        status: GenericStatus::Accepted,
        status_info: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;
    use chrono::Utc;
    use ocpp_core::payloads::{ConnectorStatus, IdToken};
    use ocpp_core::EvseId;

    fn reserve(id: i32, evse: &str) -> ReserveNowRequest {
        ReserveNowRequest {
            id,
            expiry_date_time: Utc::now(),
            connector_type: None,
            id_token: IdToken {
                id_token: "TOKEN".to_string(),
                token_type: "ISO14443".to_string(),
            },
            evse_id: Some(EvseId::from(evse)),
            group_id_token: None,
        }
    }

    #[test]
    fn reserve_and_cancel() {
        let station = testkit::station();

        let status = reserve_now(&station, reserve(1, "1")).unwrap().response.status;
        assert_eq!(status, ReserveNowStatus::Accepted);
        let evse = station.store().evse(&EvseId::from("1")).unwrap();
        assert_eq!(evse.snapshot().connector_status, ConnectorStatus::Reserved);

        let status = reserve_now(&station, reserve(2, "1")).unwrap().response.status;
        assert_eq!(status, ReserveNowStatus::Occupied);

        let status = reserve_now(&station, reserve(1, "2")).unwrap().response.status;
        assert_eq!(status, ReserveNowStatus::Rejected);

        let status = cancel(&station, CancelReservationRequest { reservation_id: 1 })
            .unwrap()
            .response
            .status;
        assert_eq!(status, GenericStatus::Accepted);
        assert!(evse.snapshot().reservation_id.is_none());
        assert!(!station.store().has_reservation(1));
    }

    #[test]
    fn cancel_racing_reserve_keeps_set_and_bindings_in_step() {
        let station = testkit::station();

        for _ in 0..200 {
            let status = reserve_now(&station, reserve(1, "1")).unwrap().response.status;
            assert_eq!(status, ReserveNowStatus::Accepted);

            std::thread::scope(|scope| {
                scope.spawn(|| {
                    let _ = cancel(&station, CancelReservationRequest { reservation_id: 1 });
                });
                scope.spawn(|| {
                    let _ = reserve_now(&station, reserve(1, "2"));
                });
            });

            let bound = station
                .store()
                .evses()
                .iter()
                .filter(|evse| evse.snapshot().reservation_id == Some(1))
                .count();
            assert!(bound <= 1);
            assert_eq!(station.store().has_reservation(1), bound == 1);

            cancel(&station, CancelReservationRequest { reservation_id: 1 }).unwrap();
            assert!(!station.store().has_reservation(1));
        }
    }

    #[test]
    fn cancel_of_absent_reservation_is_accepted() {
        let station = testkit::station();
        let status = cancel(&station, CancelReservationRequest { reservation_id: 99 })
            .unwrap()
            .response
            .status;
        assert_eq!(status, GenericStatus::Accepted);
    }

    #[test]
    fn unknown_or_inoperative_evse() {
        let station = testkit::station();
        let status = reserve_now(&station, reserve(1, "missing")).unwrap().response.status;
        assert_eq!(status, ReserveNowStatus::Rejected);

        let evse = station.store().evse(&EvseId::from("2")).unwrap();
        evse.lock().admin_status = OperationalStatus::Inoperative;
        let status = reserve_now(&station, reserve(1, "2")).unwrap().response.status;
        assert_eq!(status, ReserveNowStatus::Unavailable);
    }
}
