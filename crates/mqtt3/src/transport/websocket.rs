//! WebSocket framing: the session rides binary frames under the `mqtt`
//! sub-protocol, any origin acceptable.

use std::io;
use std::time::Duration;

use bytes::BytesMut;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use mqtt3_protocol::{MqttError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn connect(url: &Url, timeout: Duration) -> Result<WsStream> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| MqttError::Io(format!("websocket request {url}: {e}")))?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("mqtt"));

    let (stream, _response) = tokio::time::timeout(timeout, connect_async(request))
        .await
        .map_err(|_| MqttError::Io(format!("websocket handshake with {url} timed out")))?
        .map_err(|e| MqttError::Io(format!("websocket handshake with {url}: {e}")))?;
    Ok(stream)
}

pub fn split(stream: WsStream) -> (WsReadHalf, WsWriteHalf) {
    let (sink, stream) = stream.split();
    (WsReadHalf { stream }, WsWriteHalf { sink })
}

pub struct WsReadHalf {
    stream: SplitStream<WsStream>,
}

impl WsReadHalf {
    /// Appends the next binary frame to `buf`. Returns 0 once the peer
    /// closes, mirroring end-of-stream on a plain socket.
    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        loop {
            match self.stream.next().await {
                None | Some(Ok(Message::Close(_))) => return Ok(0),
                Some(Ok(Message::Binary(data))) => {
                    if data.is_empty() {
                        continue;
                    }
                    buf.extend_from_slice(&data);
                    return Ok(data.len());
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Text(_))) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "text frame on an MQTT websocket",
                    ));
                }
                Some(Err(e)) => return Err(io::Error::new(io::ErrorKind::Other, e)),
            }
        }
    }
}

pub struct WsWriteHalf {
    sink: SplitSink<WsStream, Message>,
}

impl WsWriteHalf {
    /// Sends `data` as a single binary frame; never writes partially.
    pub async fn write_frame(&mut self, data: &[u8]) -> io::Result<usize> {
        self.sink
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(data.len())
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        let _ = self.sink.send(Message::Close(None)).await;
        self.sink
            .close()
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}
