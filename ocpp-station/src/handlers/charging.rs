use ocpp_core::command::ReportChargingProfiles;
use ocpp_core::payloads::{
    ChargingProfileStatus, ClearChargingProfileRequest, ClearChargingProfileResponse,
    ClearChargingProfileStatus, GetChargingProfileStatus, GetChargingProfilesRequest,
    GetChargingProfilesResponse, ReportChargingProfilesRequest, SetChargingProfileRequest,
    SetChargingProfileResponse, StatusInfo,
};

use super::{FollowUp, Handled, HandlerResult};
use crate::station::Station;

/// Replaces any profile with the same id on the target EVSE.
pub fn set_profile(
    station: &Station,
    request: SetChargingProfileRequest,
) -> HandlerResult<SetChargingProfileResponse> {
    let Some(evse) = station.store().evse(&request.evse_id) else {
        return Ok(Handled::reply(SetChargingProfileResponse {
            status: ChargingProfileStatus::Rejected,
            status_info: StatusInfo::reason("UnknownEvse"),
        }));
    };

    let profile = request.charging_profile;
    let mut state = evse.lock();
    state.charging_profiles.retain(|p| p.id != profile.id);
    tracing::debug!(evse = %evse.id(), profile = profile.id, "charging profile set");
    state.charging_profiles.push(profile);

    Ok(Handled::reply(SetChargingProfileResponse {
        status: ChargingProfileStatus::Accepted,
        status_info: None,
    }))
}

/// Removes by id and/or criteria; with neither, clears every profile.
pub fn clear_profile(
    station: &Station,
    request: ClearChargingProfileRequest,
) -> HandlerResult<ClearChargingProfileResponse> {
    let criteria = request.charging_profile_criteria.as_ref();
    let mut removed = 0;

    for evse in station.store().evses() {
        if let Some(target) = criteria.and_then(|c| c.evse_id.as_ref()) {
            if target != evse.id() {
                continue;
            }
        }

        let mut state = evse.lock();
        let before = state.charging_profiles.len();
        state.charging_profiles.retain(|profile| {
            let id_matches = request.charging_profile_id.map_or(true, |id| profile.id == id);
            let criteria_match = criteria.map_or(true, |c| {
                c.charging_profile_purpose
                    .map_or(true, |purpose| profile.charging_profile_purpose == purpose)
                    && c.stack_level.map_or(true, |level| profile.stack_level == level)
            });
            !(id_matches && criteria_match)
        });
        removed += before - state.charging_profiles.len();
    }

    Ok(Handled::reply(ClearChargingProfileResponse {
        status: if removed > 0 {
            ClearChargingProfileStatus::Accepted
        } else {
            ClearChargingProfileStatus::Unknown
        },
        status_info: None,
    }))
}

/// Profiles are reported asynchronously, one report per EVSE.
pub fn get_profiles(
    station: &Station,
    request: GetChargingProfilesRequest,
) -> HandlerResult<GetChargingProfilesResponse> {
    let reports: Vec<ReportChargingProfilesRequest> = station
        .store()
        .evses()
        .iter()
        .filter(|evse| request.evse_id.as_ref().map_or(true, |id| id == evse.id()))
        .filter_map(|evse| {
            let profiles = evse.lock().charging_profiles.clone();
            (!profiles.is_empty()).then(|| ReportChargingProfilesRequest {
                request_id: request.request_id,
                charging_limit_source: "CSO".to_string(),
                evse_id: evse.id().clone(),
                charging_profile: profiles,
                tbc: false,
            })
        })
        .collect();

    if reports.is_empty() {
        return Ok(Handled::reply(GetChargingProfilesResponse {
            status: GetChargingProfileStatus::NoProfiles,
            status_info: None,
        }));
    }

    let last = reports.len() - 1;
    let mut handled = Handled::reply(GetChargingProfilesResponse {
        status: GetChargingProfileStatus::Accepted,
        status_info: None,
    });
    for (index, mut report) in reports.into_iter().enumerate() {
        report.tbc = index < last;
        handled = handled.then(FollowUp::immediate::<ReportChargingProfiles>(&report)?);
    }
    Ok(handled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;
    use ocpp_core::payloads::{
        ChargingProfile, ChargingProfileKind, ChargingProfilePurpose, ChargingRateUnit,
        ChargingSchedule, ChargingSchedulePeriod, ClearChargingProfileCriteria,
    };
    use ocpp_core::EvseId;

    fn profile(id: i32, purpose: ChargingProfilePurpose, stack_level: i32) -> ChargingProfile {
        ChargingProfile {
            id,
            stack_level,
            charging_profile_purpose: purpose,
            charging_profile_kind: ChargingProfileKind::Absolute,
            charging_schedule: vec![ChargingSchedule {
                id: 1,
                charging_rate_unit: ChargingRateUnit::A,
                charging_schedule_period: vec![ChargingSchedulePeriod {
                    start_period: 0,
                    limit: 16.0,
                    number_phases: None,
                }],
                start_schedule: None,
                duration: None,
            }],
            transaction_id: None,
        }
    }

    fn set(station: &Station, evse: &str, profile: ChargingProfile) -> ChargingProfileStatus {
        set_profile(
            station,
            SetChargingProfileRequest {
                evse_id: EvseId::from(evse),
                charging_profile: profile,
            },
        )
        .unwrap()
        .response
        .status
    }

    #[test]
    fn set_replaces_same_id() {
        let station = testkit::station();
        assert_eq!(
            set(&station, "1", profile(1, ChargingProfilePurpose::TxDefaultProfile, 0)),
            ChargingProfileStatus::Accepted
        );
        assert_eq!(
            set(&station, "1", profile(1, ChargingProfilePurpose::TxDefaultProfile, 3)),
            ChargingProfileStatus::Accepted
        );
        assert_eq!(
            set(&station, "7", profile(1, ChargingProfilePurpose::TxDefaultProfile, 0)),
            ChargingProfileStatus::Rejected
        );

        let profiles = station
            .store()
            .evse(&EvseId::from("1"))
            .unwrap()
            .snapshot()
            .charging_profiles;
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].stack_level, 3);
    }

    #[test]
    fn get_reports_per_evse() {
        let station = testkit::station();
        let none = get_profiles(&station, GetChargingProfilesRequest { request_id: 1, evse_id: None }).unwrap();
        assert_eq!(none.response.status, GetChargingProfileStatus::NoProfiles);

        set(&station, "1", profile(1, ChargingProfilePurpose::TxDefaultProfile, 0));
        set(&station, "2", profile(2, ChargingProfilePurpose::ChargingStationMaxProfile, 0));

        let all = get_profiles(&station, GetChargingProfilesRequest { request_id: 5, evse_id: None }).unwrap();
        assert_eq!(all.response.status, GetChargingProfileStatus::Accepted);
        assert_eq!(all.follow_ups.len(), 2);
        assert_eq!(all.follow_ups[0].payload["tbc"], true);
        assert_eq!(all.follow_ups[1].payload["tbc"], false);

        let one = get_profiles(
            &station,
            GetChargingProfilesRequest {
                request_id: 6,
                evse_id: Some(EvseId::from("2")),
            },
        )
        .unwrap();
        assert_eq!(one.follow_ups.len(), 1);
        assert_eq!(one.follow_ups[0].payload["evseId"], "2");
    }

    #[test]
    fn clear_by_id_and_criteria() {
        let station = testkit::station();
        set(&station, "1", profile(1, ChargingProfilePurpose::TxDefaultProfile, 0));
        set(&station, "1", profile(2, ChargingProfilePurpose::TxProfile, 1));
        set(&station, "2", profile(3, ChargingProfilePurpose::TxProfile, 1));

        let by_id = clear_profile(
            &station,
            ClearChargingProfileRequest {
                charging_profile_id: Some(1),
                charging_profile_criteria: None,
            },
        )
        .unwrap();
        assert_eq!(by_id.response.status, ClearChargingProfileStatus::Accepted);

        let by_criteria = clear_profile(
            &station,
            ClearChargingProfileRequest {
                charging_profile_id: None,
                charging_profile_criteria: Some(ClearChargingProfileCriteria {
                    evse_id: Some(EvseId::from("2")),
                    charging_profile_purpose: Some(ChargingProfilePurpose::TxProfile),
                    stack_level: None,
                }),
            },
        )
        .unwrap();
        assert_eq!(by_criteria.response.status, ClearChargingProfileStatus::Accepted);

        let remaining = station
            .store()
            .evse(&EvseId::from("1"))
            .unwrap()
            .snapshot()
            .charging_profiles;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, 2);

        let nothing = clear_profile(
            &station,
            ClearChargingProfileRequest {
                charging_profile_id: Some(42),
                charging_profile_criteria: None,
            },
        )
        .unwrap();
        assert_eq!(nothing.response.status, ClearChargingProfileStatus::Unknown);
    }
}
