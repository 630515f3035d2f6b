//! Per-kind typing of the command catalogue.
//!
//! Each command kind is a zero-sized marker implementing [`Command`], which
//! ties the [`Action`] to its request and response payload types. The
//! dispatcher and the outbound envelope are generic over this trait.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::message::Action;
use crate::payloads::*;

/// A command kind with typed payloads.
pub trait Command: Send + Sync + 'static {
    const ACTION: Action;
    type Request: Serialize + DeserializeOwned + Send + 'static;
    type Response: Serialize + DeserializeOwned + Send + 'static;
}

macro_rules! commands {
    ($($name:ident: $req:ty => $resp:ty;)*) => {
        $(
            #[derive(Debug, Clone, Copy, Default)]
            pub struct $name;

            impl Command for $name {
                const ACTION: Action = Action::$name;
                type Request = $req;
                type Response = $resp;
            }
        )*
    };
}

// CSMS -> station, with station-side logic.
commands! {
    Reset: ResetRequest => ResetResponse;
    RequestStartTransaction: RequestStartTransactionRequest => RequestStartTransactionResponse;
    RequestStopTransaction: RequestStopTransactionRequest => RequestStopTransactionResponse;
    GetTransactionStatus: GetTransactionStatusRequest => GetTransactionStatusResponse;
    ReserveNow: ReserveNowRequest => ReserveNowResponse;
    CancelReservation: CancelReservationRequest => CancelReservationResponse;
    SetDisplayMessage: SetDisplayMessageRequest => SetDisplayMessageResponse;
    GetDisplayMessages: GetDisplayMessagesRequest => GetDisplayMessagesResponse;
    ClearDisplayMessage: ClearDisplayMessageRequest => ClearDisplayMessageResponse;
    InstallCertificate: InstallCertificateRequest => InstallCertificateResponse;
    DeleteCertificate: DeleteCertificateRequest => DeleteCertificateResponse;
    GetInstalledCertificateIds: GetInstalledCertificateIdsRequest => GetInstalledCertificateIdsResponse;
    CostUpdated: CostUpdatedRequest => Empty;
    ChangeAvailability: ChangeAvailabilityRequest => ChangeAvailabilityResponse;
    UnlockConnector: UnlockConnectorRequest => UnlockConnectorResponse;
    SetChargingProfile: SetChargingProfileRequest => SetChargingProfileResponse;
    ClearChargingProfile: ClearChargingProfileRequest => ClearChargingProfileResponse;
    GetChargingProfiles: GetChargingProfilesRequest => GetChargingProfilesResponse;
    TriggerMessage: TriggerMessageRequest => TriggerMessageResponse;
    GetVariables: GetVariablesRequest => GetVariablesResponse;
    SetVariables: SetVariablesRequest => SetVariablesResponse;
    ClearCache: Empty => StatusResponse;
    GetLocalListVersion: Empty => GetLocalListVersionResponse;
    SendLocalList: SendLocalListRequest => SendLocalListResponse;
    DataTransfer: DataTransferRequest => DataTransferResponse;
}

// CSMS -> station, acknowledged without station-side logic.
commands! {
    CertificateSigned: Value => StatusResponse;
    ClearVariableMonitoring: Value => StatusResponse;
    CustomerInformation: Value => StatusResponse;
    GetBaseReport: Value => StatusResponse;
    GetCompositeSchedule: Value => StatusResponse;
    GetLog: Value => StatusResponse;
    GetMonitoringReport: Value => StatusResponse;
    GetReport: Value => StatusResponse;
    PublishFirmware: Value => StatusResponse;
    SetMonitoringBase: Value => StatusResponse;
    SetMonitoringLevel: Value => StatusResponse;
    SetNetworkProfile: Value => StatusResponse;
    SetVariableMonitoring: Value => StatusResponse;
    UnpublishFirmware: Value => StatusResponse;
    UpdateFirmware: Value => StatusResponse;
    AFRRSignal: Value => StatusResponse;
    AdjustPeriodicEventStream: Value => StatusResponse;
    ChangeTransactionTariff: Value => StatusResponse;
    ClearDERControl: Value => StatusResponse;
    ClearTariffs: Value => StatusResponse;
    GetDERControl: Value => StatusResponse;
    GetPeriodicEventStream: Value => StatusResponse;
    GetTariffs: Value => StatusResponse;
    NotifyAllowedEnergyTransfer: Value => StatusResponse;
    NotifyWebPaymentStarted: Value => StatusResponse;
    RequestBatterySwap: Value => StatusResponse;
    SetDERControl: Value => StatusResponse;
    SetDefaultTariff: Value => StatusResponse;
    UpdateDynamicSchedule: Value => StatusResponse;
    UsePriorityCharging: Value => StatusResponse;
}

// Station -> CSMS.
commands! {
    BootNotification: BootNotificationRequest => BootNotificationResponse;
    Heartbeat: Empty => HeartbeatResponse;
    StatusNotification: StatusNotificationRequest => Empty;
    TransactionEvent: TransactionEventRequest => TransactionEventResponse;
    MeterValues: MeterValuesRequest => Empty;
    Authorize: AuthorizeRequest => AuthorizeResponse;
    NotifyDisplayMessages: NotifyDisplayMessagesRequest => Empty;
    ReportChargingProfiles: ReportChargingProfilesRequest => Empty;
    ReservationStatusUpdate: ReservationStatusUpdateRequest => Empty;
    SecurityEventNotification: SecurityEventNotificationRequest => Empty;
}

// Station -> CSMS, payloads passed through as JSON.
commands! {
    BatterySwap: Value => Value;
    ClearedChargingLimit: Value => Value;
    ClosePeriodicEventStream: Value => Value;
    FirmwareStatusNotification: Value => Value;
    Get15118EVCertificate: Value => Value;
    GetCertificateChainStatus: Value => Value;
    GetCertificateStatus: Value => Value;
    LogStatusNotification: Value => Value;
    NotifyChargingLimit: Value => Value;
    NotifyCustomerInformation: Value => Value;
    NotifyDERAlarm: Value => Value;
    NotifyDERStartStop: Value => Value;
    NotifyEVChargingNeeds: Value => Value;
    NotifyEVChargingSchedule: Value => Value;
    NotifyEvent: Value => Value;
    NotifyMonitoringReport: Value => Value;
    NotifyPeriodicEventStream: Value => Value;
    NotifyPriorityCharging: Value => Value;
    NotifyQRCodeScanned: Value => Value;
    NotifyReport: Value => Value;
    NotifySettlement: Value => Value;
    OpenPeriodicEventStream: Value => Value;
    PublishFirmwareStatusNotification: Value => Value;
    PullDynamicScheduleUpdate: Value => Value;
    ReportDERControl: Value => Value;
    SignCertificate: Value => Value;
    VatNumberValidation: Value => Value;
}
