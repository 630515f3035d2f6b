//! # ocpp-link
//!
//! Reference duplex transport for the station engine: length-prefixed JSON
//! frames over TCP or TLS. Outbound requests are correlated with their
//! responses by `message_id`; inbound requests are handed to an
//! [`InboundHandler`] and answered on the same stream.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ocpp_link::{ConnectionConfig, Link};
//! # async fn run(handler: Arc<dyn ocpp_core::InboundHandler>) -> ocpp_core::OcppResult<()> {
//! let config = ConnectionConfig::plaintext("127.0.0.1:9000".parse().unwrap());
//! let link = Link::connect(&config, handler).await?;
//! # Ok(())
//! # }
//! ```

mod connection;

pub use connection::{
    read_frame, write_frame, Connection, ConnectionConfig, FrameReader, FrameWriter,
    DEFAULT_MAX_MESSAGE_SIZE,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use ocpp_core::{Frame, InboundHandler, OcppError, OcppResult, Request, Response, Transport};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

/// An open duplex channel to the CSMS.
pub struct Link {
    outgoing: mpsc::UnboundedSender<Frame>,
    pending: Pending,
    connected: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Link {
    /// Connect to the CSMS and start serving the stream.
    pub async fn connect(config: &ConnectionConfig, inbound: Arc<dyn InboundHandler>) -> OcppResult<Arc<Self>> {
        let connection = Connection::connect(config).await?;
        tracing::info!(addr = %config.csms_addr, tls = config.use_tls, "connected to CSMS");
        let (reader, writer) = connection.split();
        Ok(Self::from_split(reader, writer, config.max_message_size, inbound))
    }

    /// Serve an already established stream.
    pub fn from_stream<S>(stream: S, max_message_size: usize, inbound: Arc<dyn InboundHandler>) -> Arc<Self>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_split(Box::new(reader), Box::new(writer), max_message_size, inbound)
    }

    fn from_split(
        reader: FrameReader,
        writer: FrameWriter,
        max_message_size: usize,
        inbound: Arc<dyn InboundHandler>,
    ) -> Arc<Self> {
        let (outgoing, queue) = mpsc::unbounded_channel();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let write_task = tokio::spawn(Self::write_loop(writer, queue, max_message_size, connected.clone()));
        let read_task = tokio::spawn(Self::read_loop(
            reader,
            max_message_size,
            inbound,
            outgoing.clone(),
            pending.clone(),
            connected.clone(),
        ));

        Arc::new(Self {
            outgoing,
            pending,
            connected,
            tasks: Mutex::new(vec![write_task, read_task]),
        })
    }

    /// Stop both directions. Pending calls fail with `ConnectionClosed`.
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.pending.lock().clear();
    }

    async fn write_loop(
        mut writer: FrameWriter,
        mut queue: mpsc::UnboundedReceiver<Frame>,
        max_message_size: usize,
        connected: Arc<AtomicBool>,
    ) {
        while let Some(frame) = queue.recv().await {
            match write_frame(&mut writer, &frame, max_message_size).await {
                Ok(()) => {}
                Err(OcppError::Validation(detail)) => {
                    tracing::error!("dropping outgoing frame: {}", detail);
                }
                Err(e) => {
                    tracing::error!("write failed: {}", e);
                    break;
                }
            }
        }
        connected.store(false, Ordering::SeqCst);
    }

    async fn read_loop(
        mut reader: FrameReader,
        max_message_size: usize,
        inbound: Arc<dyn InboundHandler>,
        outgoing: mpsc::UnboundedSender<Frame>,
        pending: Pending,
        connected: Arc<AtomicBool>,
    ) {
        loop {
            match read_frame(&mut reader, max_message_size).await {
                Ok(Some(Frame::Response(response))) => {
                    let waiter = pending.lock().remove(&response.message_id);
                    match waiter {
                        Some(waiter) => {
                            let _ = waiter.send(response);
                        }
                        None => tracing::warn!(
                            id = response.message_id,
                            action = %response.action,
                            "response with no pending request"
                        ),
                    }
                }
                Ok(Some(Frame::Request(request))) => {
                    let inbound = inbound.clone();
                    let outgoing = outgoing.clone();
                    tokio::spawn(async move {
                        let response = inbound.on_request(request).await;
                        if outgoing.send(Frame::Response(response)).is_err() {
                            tracing::debug!("link closed before response could be written");
                        }
                    });
                }
                Ok(None) => {
                    tracing::info!("CSMS closed the connection");
                    break;
                }
                Err(e) => {
                    tracing::error!("read failed: {}", e);
                    break;
                }
            }
        }
        connected.store(false, Ordering::SeqCst);
        // Dropping the senders wakes every waiter with ConnectionClosed.
        pending.lock().clear();
    }
}

/// Removes a pending entry if the caller gives up before the response.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

#[async_trait]
impl Transport for Link {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, request: Request) -> OcppResult<Response> {
        if !self.is_connected() {
            return Err(OcppError::ConnectionClosed);
        }

        let id = request.message_id;
        let (tx, rx) = oneshot::channel();
        if self.pending.lock().insert(id, tx).is_some() {
            tracing::warn!(id, "replacing pending request with duplicate id");
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };
        // The reader may have closed between the check and the insert.
        if !self.is_connected() {
            return Err(OcppError::ConnectionClosed);
        }

        self.outgoing
            .send(Frame::Request(request))
            .map_err(|_| OcppError::ConnectionClosed)?;
        rx.await.map_err(|_| OcppError::ConnectionClosed)
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ocpp_core::{Action, Outcome};
    use tokio::net::TcpListener;

    /// Echoes the payload back as the completed body.
    struct Echo(&'static str);

    #[async_trait]
    impl InboundHandler for Echo {
        async fn on_request(&self, request: Request) -> Response {
            let body = request.payload.clone();
            Response::to_request(&request, self.0, Outcome::Completed(body), Utc::now())
        }
    }

    fn request(id: u64, payload: serde_json::Value) -> Request {
        Request::new(id, Action::DataTransfer, "CS-1", payload, Utc::now())
    }

    #[tokio::test]
    async fn correlates_responses_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            Link::from_stream(stream, DEFAULT_MAX_MESSAGE_SIZE, Arc::new(Echo("CSMS")))
        });

        let client = Link::connect(&ConnectionConfig::plaintext(addr), Arc::new(Echo("CS-1")))
            .await
            .unwrap();
        let csms = server.await.unwrap();
        assert!(client.is_connected());

        let (first, second) = tokio::join!(
            client.send(request(1, serde_json::json!({"n": 1}))),
            client.send(request(2, serde_json::json!({"n": 2}))),
        );
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(first.message_id, 1);
        assert_eq!(first.outcome, Outcome::Completed(serde_json::json!({"n": 1})));
        assert_eq!(second.outcome, Outcome::Completed(serde_json::json!({"n": 2})));
        assert_eq!(second.station_id, "CSMS");

        // The CSMS side can originate requests on the same stream.
        let inbound = csms.send(request(40, serde_json::json!({"from": "csms"}))).await.unwrap();
        assert_eq!(inbound.station_id, "CS-1");
        assert_eq!(inbound.message_id, 40);
    }

    #[tokio::test]
    async fn closed_peer_fails_pending_calls() {
        let (near, far) = tokio::io::duplex(4096);
        let link = Link::from_stream(near, DEFAULT_MAX_MESSAGE_SIZE, Arc::new(Echo("CS-1")));

        let call = {
            let link = link.clone();
            tokio::spawn(async move { link.send(request(1, serde_json::json!({}))).await })
        };
        tokio::task::yield_now().await;
        drop(far);

        assert!(matches!(call.await.unwrap(), Err(OcppError::ConnectionClosed)));
        while link.is_connected() {
            tokio::task::yield_now().await;
        }
        assert!(matches!(
            link.send(request(2, serde_json::json!({}))).await,
            Err(OcppError::ConnectionClosed)
        ));
    }
}
