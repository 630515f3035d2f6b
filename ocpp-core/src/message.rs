//! Wire envelopes and the command catalogue.
//!
//! Every exchange is a `Request` answered by exactly one `Response` of the
//! same `action`, correlated by `message_id`. Both travel inside a `Frame`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Failure, FailureCode, OcppError};

/// Which side originates a command kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// CSMS -> station.
    Inbound,
    /// Station -> CSMS.
    Outbound,
    /// Either side may originate.
    Both,
}

macro_rules! actions {
    ($($direction:ident => [$($name:ident),* $(,)?]);* $(;)?) => {
        /// Command kinds exchanged between the station and the CSMS.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Action {
            $($($name,)*)*
        }

        impl Action {
            /// Every known command kind.
            pub const ALL: &'static [Action] = &[$($(Action::$name,)*)*];

            /// Originating side of this kind.
            pub fn direction(&self) -> Direction {
                match self {
                    $($(Self::$name => Direction::$direction,)*)*
                }
            }
        }

        impl std::str::FromStr for Action {
            type Err = OcppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($(stringify!($name) => Ok(Self::$name),)*)*
                    _ => Err(OcppError::Protocol(format!("unknown action: {}", s))),
                }
            }
        }
    };
}

actions! {
    Inbound => [
        AdjustPeriodicEventStream,
        AFRRSignal,
        CancelReservation,
        CertificateSigned,
        ChangeAvailability,
        ChangeTransactionTariff,
        ClearCache,
        ClearChargingProfile,
        ClearDERControl,
        ClearDisplayMessage,
        ClearTariffs,
        ClearVariableMonitoring,
        CostUpdated,
        CustomerInformation,
        DeleteCertificate,
        GetBaseReport,
        GetChargingProfiles,
        GetCompositeSchedule,
        GetDERControl,
        GetDisplayMessages,
        GetInstalledCertificateIds,
        GetLocalListVersion,
        GetLog,
        GetMonitoringReport,
        GetPeriodicEventStream,
        GetReport,
        GetTariffs,
        GetTransactionStatus,
        GetVariables,
        InstallCertificate,
        NotifyAllowedEnergyTransfer,
        NotifyWebPaymentStarted,
        PublishFirmware,
        RequestBatterySwap,
        RequestStartTransaction,
        RequestStopTransaction,
        ReserveNow,
        Reset,
        SendLocalList,
        SetChargingProfile,
        SetDefaultTariff,
        SetDERControl,
        SetDisplayMessage,
        SetMonitoringBase,
        SetMonitoringLevel,
        SetNetworkProfile,
        SetVariableMonitoring,
        SetVariables,
        TriggerMessage,
        UnlockConnector,
        UnpublishFirmware,
        UpdateDynamicSchedule,
        UpdateFirmware,
        UsePriorityCharging,
    ];
    Outbound => [
        Authorize,
        BatterySwap,
        BootNotification,
        ClearedChargingLimit,
        ClosePeriodicEventStream,
        FirmwareStatusNotification,
        Get15118EVCertificate,
        GetCertificateChainStatus,
        GetCertificateStatus,
        Heartbeat,
        LogStatusNotification,
        MeterValues,
        NotifyChargingLimit,
        NotifyCustomerInformation,
        NotifyDERAlarm,
        NotifyDERStartStop,
        NotifyDisplayMessages,
        NotifyEVChargingNeeds,
        NotifyEVChargingSchedule,
        NotifyEvent,
        NotifyMonitoringReport,
        NotifyPeriodicEventStream,
        NotifyPriorityCharging,
        NotifyQRCodeScanned,
        NotifyReport,
        NotifySettlement,
        OpenPeriodicEventStream,
        PublishFirmwareStatusNotification,
        PullDynamicScheduleUpdate,
        ReportChargingProfiles,
        ReportDERControl,
        ReservationStatusUpdate,
        SecurityEventNotification,
        SignCertificate,
        StatusNotification,
        TransactionEvent,
        VatNumberValidation,
    ];
    Both => [DataTransfer];
}

impl Action {
    /// Whether the CSMS may send this kind to the station.
    pub fn is_inbound(&self) -> bool {
        matches!(self.direction(), Direction::Inbound | Direction::Both)
    }

    /// Whether the station may send this kind to the CSMS.
    pub fn is_outbound(&self) -> bool {
        matches!(self.direction(), Direction::Outbound | Direction::Both)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Command request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub message_id: u64,
    pub action: Action,
    /// Station the command is addressed to (inbound) or sent from (outbound).
    pub station_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Request {
    /// Create an unsigned request.
    pub fn new(
        message_id: u64,
        action: Action,
        station_id: impl Into<String>,
        payload: Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id,
            action,
            station_id: station_id.into(),
            timestamp,
            payload,
            signature: None,
        }
    }
}

/// Result carried by a response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed(Value),
    Failed(Failure),
}

impl Outcome {
    pub fn failed(code: FailureCode, detail: impl Into<String>) -> Self {
        Self::Failed(Failure::new(code, detail))
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Failure code, if this outcome is a failure.
    pub fn failure_code(&self) -> Option<FailureCode> {
        match self {
            Self::Completed(_) => None,
            Self::Failed(failure) => Some(failure.code),
        }
    }
}

/// Command response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub message_id: u64,
    pub action: Action,
    /// Identity of the responder.
    pub station_id: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Response {
    /// Create an unsigned response to a request.
    pub fn to_request(
        request: &Request,
        responder: impl Into<String>,
        outcome: Outcome,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: request.message_id,
            action: request.action,
            station_id: responder.into(),
            timestamp,
            outcome,
            signature: None,
        }
    }

    /// Synthesize a response locally, without any network exchange.
    pub fn local_failure(request: &Request, failure: Failure, timestamp: DateTime<Utc>) -> Self {
        Self::to_request(
            request,
            request.station_id.clone(),
            Outcome::Failed(failure),
            timestamp,
        )
    }
}

/// Unit exchanged on the duplex channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Frame {
    Request(Request),
    Response(Response),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> Request {
        Request::new(
            7,
            Action::Reset,
            "CS-1",
            serde_json::json!({"type": "Immediate"}),
            Utc::now(),
        )
    }

    #[test]
    fn request_serialization() {
        let req = sample_request();

        let json = serde_json::to_string_pretty(&req).unwrap();
        assert!(json.contains("\"action\": \"Reset\""));
        assert!(json.contains("\"station_id\": \"CS-1\""));
        assert!(!json.contains("signature"));

        let parsed: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn action_directions() {
        assert!(Action::Reset.is_inbound());
        assert!(!Action::Reset.is_outbound());
        assert!(Action::Heartbeat.is_outbound());
        assert!(Action::DataTransfer.is_inbound());
        assert!(Action::DataTransfer.is_outbound());
        assert!(Action::GetTariffs.is_inbound());
        assert!(Action::NotifyAllowedEnergyTransfer.is_inbound());
        assert!(Action::NotifySettlement.is_outbound());
        assert!(!Action::BatterySwap.is_inbound());
        assert_eq!("AFRRSignal".parse::<Action>().unwrap(), Action::AFRRSignal);

        let inbound = Action::ALL.iter().filter(|a| a.is_inbound()).count();
        let outbound = Action::ALL.iter().filter(|a| a.is_outbound()).count();
        assert_eq!(inbound, 55);
        assert_eq!(outbound, 38);
    }

    #[test]
    fn action_parse() {
        assert_eq!("TransactionEvent".parse::<Action>().unwrap(), Action::TransactionEvent);
        assert!("NoSuchThing".parse::<Action>().is_err());
        assert_eq!(Action::Get15118EVCertificate.to_string(), "Get15118EVCertificate");
    }

    #[test]
    fn response_creation() {
        let req = sample_request();
        let resp = Response::to_request(
            &req,
            "CS-1",
            Outcome::failed(FailureCode::IdentityMismatch, "wrong station"),
            Utc::now(),
        );

        assert_eq!(resp.message_id, req.message_id);
        assert_eq!(resp.action, req.action);
        assert_eq!(resp.outcome.failure_code(), Some(FailureCode::IdentityMismatch));
    }

    #[test]
    fn frame_tagging() {
        let frame = Frame::Request(sample_request());
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["kind"], "request");
        assert_eq!(json["body"]["message_id"], 7);

        let outcome = serde_json::to_value(Outcome::Completed(serde_json::json!({}))).unwrap();
        assert!(outcome.get("completed").is_some());
    }
}
