//! Transports: a dialer contract plus the byte-stream halves the reader and
//! writer loops own.

pub mod tcp;
pub mod tls;
pub mod websocket;

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use mqtt3_protocol::{MqttError, Result};

use websocket::{WsReadHalf, WsWriteHalf};

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// An established bidirectional byte stream to the broker.
pub enum TransportType {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    WebSocket(Box<WebSocketStream<MaybeTlsStream<TcpStream>>>),
}

impl TransportType {
    /// Splits into the reader-owned and writer-owned halves.
    pub fn into_split(self) -> (UnifiedReader, UnifiedWriter) {
        match self {
            TransportType::Tcp(stream) => {
                let (r, w) = stream.into_split();
                (UnifiedReader::Tcp(r), UnifiedWriter::Tcp(w))
            }
            TransportType::Tls(stream) => {
                let (r, w) = tokio::io::split(*stream);
                (UnifiedReader::Tls(r), UnifiedWriter::Tls(w))
            }
            TransportType::WebSocket(stream) => {
                let (read, write) = websocket::split(*stream);
                (UnifiedReader::WebSocket(read), UnifiedWriter::WebSocket(write))
            }
        }
    }
}

/// Read side of the connection; the reader loop is its sole owner.
pub enum UnifiedReader {
    Tcp(OwnedReadHalf),
    Tls(tokio::io::ReadHalf<TlsStream<TcpStream>>),
    WebSocket(WsReadHalf),
}

impl UnifiedReader {
    /// Appends available bytes to `buf`. Returns 0 at end of stream.
    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> std::io::Result<usize> {
        match self {
            UnifiedReader::Tcp(r) => r.read_buf(buf).await,
            UnifiedReader::Tls(r) => r.read_buf(buf).await,
            UnifiedReader::WebSocket(r) => r.read_buf(buf).await,
        }
    }
}

/// Write side of the connection; the writer loop is its sole owner.
pub enum UnifiedWriter {
    Tcp(OwnedWriteHalf),
    Tls(tokio::io::WriteHalf<TlsStream<TcpStream>>),
    WebSocket(WsWriteHalf),
}

impl UnifiedWriter {
    /// Writes as much of `data` as the transport accepts.
    ///
    /// Byte streams may write partially; the WebSocket half sends the whole
    /// slice as one binary frame.
    pub async fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        match self {
            UnifiedWriter::Tcp(w) => w.write(data).await,
            UnifiedWriter::Tls(w) => w.write(data).await,
            UnifiedWriter::WebSocket(w) => w.write_frame(data).await,
        }
    }

    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            UnifiedWriter::Tcp(w) => w.shutdown().await,
            UnifiedWriter::Tls(w) => w.shutdown().await,
            UnifiedWriter::WebSocket(w) => w.shutdown().await,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Tcp,
    Tls,
    Ws,
    Wss,
}

/// Connection establishment contract: `dial(timeout)` opens a bidirectional
/// byte stream to the configured address.
#[derive(Clone)]
pub struct Dialer {
    scheme: Scheme,
    host: String,
    port: u16,
    url: Url,
    tls_config: Option<Arc<rustls::ClientConfig>>,
}

impl Dialer {
    /// Parses a broker address.
    ///
    /// Recognized schemes: `mqtt`/`tcp` (plain), `mqtts`/`ssl`/`tls` (TLS),
    /// `ws`, `wss`. A bare `host` or `host:port` dials plain TCP. Missing
    /// ports default to 1883, or 8883 for the TLS schemes.
    pub fn new(address: &str) -> Result<Self> {
        let with_scheme = if address.contains("://") {
            address.to_string()
        } else {
            format!("mqtt://{address}")
        };
        let mut url = Url::parse(&with_scheme)
            .map_err(|e| MqttError::Io(format!("broker address {address:?}: {e}")))?;

        let scheme = match url.scheme() {
            "mqtt" | "tcp" => Scheme::Tcp,
            "mqtts" | "ssl" | "tls" => Scheme::Tls,
            "ws" => Scheme::Ws,
            "wss" => Scheme::Wss,
            other => {
                return Err(MqttError::Io(format!("unknown scheme {other:?}")));
            }
        };

        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| MqttError::Io(format!("broker address {address:?} has no host")))?
            .to_string();
        let port = url.port().unwrap_or(match scheme {
            Scheme::Tcp | Scheme::Ws => DEFAULT_PORT,
            Scheme::Tls | Scheme::Wss => DEFAULT_TLS_PORT,
        });
        // carry the effective port so the WebSocket handshake sees it too
        let _ = url.set_port(Some(port));

        Ok(Self {
            scheme,
            host,
            port,
            url,
            tls_config: None,
        })
    }

    /// Replaces the TLS client configuration (trust anchors, client certs).
    pub fn with_tls_config(mut self, config: Arc<rustls::ClientConfig>) -> Self {
        self.tls_config = Some(config);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Opens the transport, bounded by `timeout`.
    pub async fn dial(&self, timeout: Duration) -> Result<TransportType> {
        match self.scheme {
            Scheme::Tcp => {
                let stream = tcp::connect(&self.host, self.port, timeout).await?;
                Ok(TransportType::Tcp(stream))
            }
            Scheme::Tls => {
                let config = self
                    .tls_config
                    .clone()
                    .unwrap_or_else(tls::default_client_config);
                let stream = tls::connect(&self.host, self.port, config, timeout).await?;
                Ok(TransportType::Tls(Box::new(stream)))
            }
            Scheme::Ws | Scheme::Wss => {
                let stream = websocket::connect(&self.url, timeout).await?;
                Ok(TransportType::WebSocket(Box::new(stream)))
            }
        }
    }
}
