//! # ocpp-core
//!
//! Core library for the station-side charging protocol engine.
//!
//! This crate provides the wire envelopes, the command catalogue and typed
//! payloads, signature handling, session state machines, and the collaborator
//! traits shared by the station engine and its transports.

pub mod command;
pub mod error;
pub mod message;
pub mod payloads;
pub mod security;
pub mod state;
pub mod transport;

pub use command::Command;
pub use error::{Failure, FailureCode, OcppError, OcppResult};
pub use message::{Action, Direction, Frame, Outcome, Request, Response};
pub use payloads::{ConnectorId, EvseId};
pub use security::{
    canonical_form, canonicalize_json, Ed25519Policy, SignatureCheck, SignatureCoordinator,
    SignaturePolicy, UnsignedPolicy,
};
pub use state::{ChargingEvent, ChargingState, TransactionState};
pub use transport::{InboundHandler, Transport};

/// Protocol version
pub const PROTOCOL_VERSION: &str = "2.1";
