//! Collaborator traits between the station engine and the duplex channel.

use async_trait::async_trait;

use crate::error::OcppResult;
use crate::message::{Request, Response};

/// Outbound side of the duplex channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the channel can currently deliver.
    fn is_connected(&self) -> bool;

    /// Send a request and await the response correlated to it.
    async fn send(&self, request: Request) -> OcppResult<Response>;
}

/// Callback the transport invokes once per inbound request.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Produce the single response to an inbound request.
    async fn on_request(&self, request: Request) -> Response;
}
