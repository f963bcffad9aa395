pub mod parsers;
pub mod ping_cmd;
pub mod pub_cmd;
pub mod sub_cmd;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;

use mqtt3::transport::tls;
use mqtt3::{ConnectOptions, Dialer, FileStore, MemoryStore, MqttClient, Store};

/// Connection flags shared by every subcommand.
#[derive(Args)]
pub struct ConnectArgs {
    /// Broker address: host[:port], or a mqtt://, mqtts://, ws:// or wss:// URL
    pub address: String,

    /// Client identifier; generated when omitted
    #[arg(long, short = 'c')]
    pub client_id: Option<String>,

    /// User name for broker authentication
    #[arg(long, short = 'u')]
    pub username: Option<String>,

    /// Read the password from a file
    #[arg(long, value_name = "FILE")]
    pub pass_file: Option<PathBuf>,

    /// Secure the connection with TLS
    #[arg(long)]
    pub tls: bool,

    /// Amend the trusted certificate authorities with a PEM file
    #[arg(long, value_name = "FILE", requires = "tls")]
    pub ca: Option<PathBuf>,

    /// Resume broker session state instead of starting clean
    #[arg(long)]
    pub resume_session: bool,

    /// Network operation expiry, e.g. 4s or 500ms
    #[arg(long, default_value = "4s", value_parser = parsers::parse_duration)]
    pub timeout: Duration,

    /// PINGREQ period in seconds; 0 disables the keepalive
    #[arg(long, default_value_t = 60)]
    pub keep_alive: u16,

    /// Persist inflight exchanges under this directory for resumption
    #[arg(long, value_name = "DIR")]
    pub session_dir: Option<PathBuf>,
}

impl ConnectArgs {
    pub fn build_client(&self) -> anyhow::Result<MqttClient> {
        let client_id = self
            .client_id
            .clone()
            .unwrap_or_else(parsers::generated_client_id);

        let mut options = ConnectOptions::new(client_id)
            .with_clean_session(!self.resume_session)
            .with_keep_alive(Duration::from_secs(u64::from(self.keep_alive)))
            .with_wire_timeout(self.timeout)
            .with_pause_timeout(self.timeout);

        if let Some(username) = &self.username {
            let password = match &self.pass_file {
                Some(path) => fs::read(path)
                    .with_context(|| format!("password file {}", path.display()))?,
                None => Vec::new(),
            };
            options = options.with_credentials(username, password);
        }

        let address = if self.address.contains("://") {
            self.address.clone()
        } else if self.tls {
            format!("mqtts://{}", self.address)
        } else {
            format!("mqtt://{}", self.address)
        };
        let mut dialer = Dialer::new(&address)?;
        if let Some(ca) = &self.ca {
            let pem =
                fs::read(ca).with_context(|| format!("CA bundle {}", ca.display()))?;
            dialer = dialer.with_tls_config(tls::client_config_with_ca(&pem)?);
        }

        let store: Arc<dyn Store> = match &self.session_dir {
            Some(dir) => Arc::new(FileStore::open(dir)?),
            None => Arc::new(MemoryStore::new()),
        };

        Ok(MqttClient::new(options, store, dialer))
    }
}
