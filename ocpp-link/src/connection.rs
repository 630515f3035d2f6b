//! TCP/TLS connection to the CSMS and the length-prefixed frame codec.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use ocpp_core::{Frame, OcppError, OcppResult};

/// Default cap on a single frame body.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Link configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// CSMS address.
    pub csms_addr: SocketAddr,
    /// CSMS hostname for TLS (if different from IP).
    pub server_name: Option<String>,
    pub use_tls: bool,
    /// PEM bundle of trusted CA certificates for TLS.
    pub ca_bundle: Option<PathBuf>,
    pub max_message_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            csms_addr: SocketAddr::from(([127, 0, 0, 1], 9000)),
            server_name: None,
            use_tls: false,
            ca_bundle: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ConnectionConfig {
    pub fn plaintext(addr: SocketAddr) -> Self {
        Self {
            csms_addr: addr,
            use_tls: false,
            ..Default::default()
        }
    }

    pub fn tls(addr: SocketAddr, server_name: impl Into<String>) -> Self {
        Self {
            csms_addr: addr,
            server_name: Some(server_name.into()),
            use_tls: true,
            ..Default::default()
        }
    }

    pub fn with_ca_bundle(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_bundle = Some(path.into());
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}

/// Established stream to the CSMS.
pub enum Connection {
    Tcp(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

/// Boxed halves of a split connection.
pub type FrameReader = Box<dyn AsyncRead + Send + Unpin>;
pub type FrameWriter = Box<dyn AsyncWrite + Send + Unpin>;

impl Connection {
    pub async fn connect(config: &ConnectionConfig) -> OcppResult<Self> {
        let stream = TcpStream::connect(&config.csms_addr)
            .await
            .map_err(|e| OcppError::Transport(format!("Connection failed: {}", e)))?;

        if !config.use_tls {
            return Ok(Self::Tcp(stream));
        }

        let connector = Self::create_tls_connector(config)?;
        let server_name: ServerName<'static> = config
            .server_name
            .clone()
            .unwrap_or_else(|| "localhost".to_string())
            .try_into()
            .map_err(|_| OcppError::Transport("Invalid server name".to_string()))?;

        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| OcppError::Transport(format!("TLS handshake failed: {}", e)))?;

        Ok(Self::Tls(Box::new(tls_stream)))
    }

    /// TLS connector trusting the configured CA bundle.
    fn create_tls_connector(config: &ConnectionConfig) -> OcppResult<TlsConnector> {
        use rustls_pemfile::certs;
        use std::fs::File;
        use std::io::BufReader;

        let mut root_store = rustls::RootCertStore::empty();
        if let Some(path) = &config.ca_bundle {
            let file = File::open(path)
                .map_err(|e| OcppError::Transport(format!("Failed to open CA bundle: {}", e)))?;
            for cert in certs(&mut BufReader::new(file)) {
                let cert = cert.map_err(|e| OcppError::Transport(format!("Bad CA certificate: {}", e)))?;
                root_store
                    .add(cert)
                    .map_err(|e| OcppError::Transport(format!("Rejected CA certificate: {}", e)))?;
            }
        }
        if root_store.is_empty() {
            tracing::warn!("TLS enabled without trusted roots; handshakes will fail");
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Ok(TlsConnector::from(Arc::new(tls_config)))
    }

    pub fn split(self) -> (FrameReader, FrameWriter) {
        match self {
            Self::Tcp(stream) => {
                let (reader, writer) = tokio::io::split(stream);
                (Box::new(reader), Box::new(writer))
            }
            Self::Tls(stream) => {
                let (reader, writer) = tokio::io::split(*stream);
                (Box::new(reader), Box::new(writer))
            }
        }
    }
}

/// Write one frame: 4-byte big-endian length, then the JSON body.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame, max_message_size: usize) -> OcppResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let json = serde_json::to_vec(frame)?;
    if json.len() > max_message_size {
        return Err(OcppError::Validation(format!(
            "frame of {} bytes exceeds limit of {}",
            json.len(),
            max_message_size
        )));
    }
    let len = json.len() as u32;

    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| OcppError::Transport(format!("Write error: {}", e)))?;
    writer
        .write_all(&json)
        .await
        .map_err(|e| OcppError::Transport(format!("Write error: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| OcppError::Transport(format!("Flush error: {}", e)))?;
    Ok(())
}

/// Read one frame. `None` means the peer closed cleanly between frames.
pub async fn read_frame<R>(reader: &mut R, max_message_size: usize) -> OcppResult<Option<Frame>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(OcppError::Transport(format!("Read error: {}", e))),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_message_size {
        return Err(OcppError::Validation(format!(
            "frame of {} bytes exceeds limit of {}",
            len, max_message_size
        )));
    }

    let mut msg_buf = vec![0u8; len];
    reader
        .read_exact(&mut msg_buf)
        .await
        .map_err(|e| OcppError::Transport(format!("Read error: {}", e)))?;

    Ok(Some(serde_json::from_slice(&msg_buf)?))
}
