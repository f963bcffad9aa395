use std::time::Duration;

use tokio::net::TcpStream;

use mqtt3_protocol::{MqttError, Result};

pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| MqttError::Io(format!("connect to {host}:{port} timed out")))?
        .map_err(MqttError::from)?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
