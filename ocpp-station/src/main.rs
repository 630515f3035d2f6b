//! Station engine binary: connects to a CSMS, boots, and serves commands.
//!
//! Usage: `ocpp-station [CSMS_ADDR] [STATION_ID]`
//!
//! Environment:
//! - `OCPP_STATION_SIGNING_KEY` / `OCPP_CSMS_PUBLIC_KEY`: base64 Ed25519 keys;
//!   when both are set envelopes are signed and verified, otherwise unsigned.
//! - `OCPP_CSMS_CA`: PEM CA bundle; enables TLS.
//! - `OCPP_CSMS_SERVER_NAME`: TLS server name (default "localhost").

use std::net::SocketAddr;
use std::sync::Arc;

use ocpp_core::payloads::BootReason;
use ocpp_core::{Ed25519Policy, OcppError, OcppResult, SignatureCoordinator};
use ocpp_link::{ConnectionConfig, Link};
use ocpp_station::{StationConfig, StationRuntime};

fn signatures() -> OcppResult<SignatureCoordinator> {
    let signing = std::env::var("OCPP_STATION_SIGNING_KEY").ok();
    let peer = std::env::var("OCPP_CSMS_PUBLIC_KEY").ok();

    match (signing, peer) {
        (Some(signing), Some(peer)) => {
            let policy = Ed25519Policy::from_base64(&signing, &peer)?;
            Ok(SignatureCoordinator::new().with_policy(Arc::new(policy)))
        }
        (None, None) => Ok(SignatureCoordinator::new()),
        _ => Err(OcppError::Crypto(
            "set both OCPP_STATION_SIGNING_KEY and OCPP_CSMS_PUBLIC_KEY, or neither".to_string(),
        )),
    }
}

fn connection_config(addr: SocketAddr) -> ConnectionConfig {
    match std::env::var("OCPP_CSMS_CA") {
        Ok(ca) => {
            let server_name =
                std::env::var("OCPP_CSMS_SERVER_NAME").unwrap_or_else(|_| "localhost".to_string());
            ConnectionConfig::tls(addr, server_name).with_ca_bundle(ca)
        }
        Err(_) => ConnectionConfig::plaintext(addr),
    }
}

#[tokio::main]
async fn main() -> OcppResult<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let csms_addr: SocketAddr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:9000".to_string())
        .parse()
        .map_err(|e| OcppError::Transport(format!("Invalid CSMS address: {}", e)))?;
    let station_id = args.next().unwrap_or_else(|| "CS-1".to_string());

    let mut runtime = StationRuntime::new(StationConfig::with_id(station_id), signatures()?);
    tracing::info!(
        station = %runtime.station().id(),
        protocol = ocpp_core::PROTOCOL_VERSION,
        policy = runtime.station().signatures().active().name(),
        "starting station"
    );

    let link = Link::connect(&connection_config(csms_addr), runtime.inbound_handler()).await?;
    runtime.attach_transport(link.clone());

    match runtime.boot(BootReason::PowerUp).await {
        Ok(boot) => tracing::info!(status = ?boot.status, "boot notification answered"),
        Err(failure) => tracing::warn!(code = %failure.code, "boot notification failed: {}", failure.detail),
    }
    runtime.start_timers();

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| OcppError::Transport(format!("Signal handler failed: {}", e)))?;

    tracing::info!("shutting down");
    runtime.stop_timers();
    link.close();
    Ok(())
}
