use ocpp_core::payloads::{
    DeleteCertificateRequest, DeleteCertificateResponse, DeleteCertificateStatus,
    GetInstalledCertificateIdsRequest, GetInstalledCertificateIdsResponse,
    GetInstalledCertificateStatus, InstallCertificateRequest, InstallCertificateResponse,
    InstallCertificateStatus, StatusInfo,
};

use super::{Handled, HandlerResult};
use crate::station::Station;
use crate::store::InstalledCertificate;

pub fn install(station: &Station, request: InstallCertificateRequest) -> HandlerResult<InstallCertificateResponse> {
    let response = match InstalledCertificate::parse(request.certificate_type, &request.certificate) {
        Ok(certificate) => {
            tracing::info!(
                usage = ?request.certificate_type,
                serial = %certificate.hash_data.serial_number,
                "certificate installed"
            );
            station.store().upsert_certificate(certificate);
            InstallCertificateResponse {
                status: InstallCertificateStatus::Accepted,
                status_info: None,
            }
        }
        Err(e) => {
            tracing::warn!(usage = ?request.certificate_type, "certificate rejected: {}", e);
            InstallCertificateResponse {
                status: InstallCertificateStatus::Rejected,
                status_info: StatusInfo::reason("InvalidCertificate"),
            }
        }
    };
    Ok(Handled::reply(response))
}

pub fn delete(station: &Station, request: DeleteCertificateRequest) -> HandlerResult<DeleteCertificateResponse> {
    let removed = station
        .store()
        .remove_certificate_by_serial(&request.certificate_hash_data.serial_number);

    Ok(Handled::reply(DeleteCertificateResponse {
        status: if removed {
            DeleteCertificateStatus::Accepted
        } else {
            DeleteCertificateStatus::NotFound
        },
        status_info: None,
    }))
}

pub fn installed_ids(
    station: &Station,
    request: GetInstalledCertificateIdsRequest,
) -> HandlerResult<GetInstalledCertificateIdsResponse> {
    let chain = station.store().certificate_hashes(&request.certificate_type);
    Ok(Handled::reply(GetInstalledCertificateIdsResponse {
        status: if chain.is_empty() {
            GetInstalledCertificateStatus::NotFound
        } else {
            GetInstalledCertificateStatus::Accepted
        },
        certificate_hash_data_chain: chain,
    }))
}
