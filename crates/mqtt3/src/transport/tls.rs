use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use mqtt3_protocol::{MqttError, Result};

/// Client configuration trusting the bundled web PKI roots.
pub fn default_client_config() -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

/// Client configuration trusting only the certificate authorities in the
/// given PEM file.
pub fn client_config_with_ca(pem: &[u8]) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    let mut reader = std::io::BufReader::new(pem);
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| MqttError::Io(format!("CA bundle: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| MqttError::Io(format!("CA bundle: {e}")))?;
    }
    if roots.is_empty() {
        return Err(MqttError::Io("CA bundle holds no certificates".to_string()));
    }
    Ok(Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    ))
}

pub async fn connect(
    host: &str,
    port: u16,
    config: Arc<ClientConfig>,
    timeout: Duration,
) -> Result<TlsStream<TcpStream>> {
    let tcp = super::tcp::connect(host, port, timeout).await?;

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| MqttError::Io(format!("server name {host:?}: {e}")))?;
    let connector = TlsConnector::from(config);

    tokio::time::timeout(timeout, connector.connect(server_name, tcp))
        .await
        .map_err(|_| MqttError::Io(format!("TLS handshake with {host}:{port} timed out")))?
        .map_err(MqttError::from)
}
