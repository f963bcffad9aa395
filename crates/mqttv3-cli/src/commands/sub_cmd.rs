use std::future::pending;
use std::io::Write;

use anyhow::bail;
use clap::Args;
use tracing::{info, warn};

use mqtt3::{InboundMessage, MqttError, QoS};

use super::{parsers, ConnectArgs};

#[derive(Args)]
pub struct SubCommand {
    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Topic filter to listen with; repeatable
    #[arg(long = "filter", short = 'f', required = true)]
    pub filters: Vec<String>,

    /// Maximum delivery quality of service requested for every filter
    #[arg(long, short, value_parser = parsers::parse_qos, default_value = "0")]
    pub qos: QoS,

    /// Print the topic ahead of each message
    #[arg(long, short)]
    pub topic: bool,

    /// Print topics and messages as quoted strings
    #[arg(long)]
    pub quote: bool,

    /// Print a string before each message
    #[arg(long, default_value = "")]
    pub prefix: String,

    /// Print a string after each message
    #[arg(long, default_value = "\n")]
    pub suffix: String,
}

impl SubCommand {
    pub async fn execute(self) -> anyhow::Result<()> {
        let client = self.connect.build_client()?;
        client.connect().await?;

        let requests: Vec<(&str, QoS)> = self
            .filters
            .iter()
            .map(|filter| (filter.as_str(), self.qos))
            .collect();
        let results = client.subscribe(pending(), &requests).await?;

        let mut granted = 0;
        for result in &results {
            match &result.grant {
                Ok(qos) => {
                    granted += 1;
                    info!(filter = %result.filter, granted = ?qos, "subscribed");
                }
                Err(err) => warn!(filter = %result.filter, "{err}"),
            }
        }
        if granted == 0 {
            bail!("every subscription was denied");
        }

        // print until interrupted
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("disconnecting on interrupt");
                    client.disconnect(pending()).await?;
                    return Ok(());
                }
                inbound = client.read_slices() => match inbound {
                    Ok(InboundMessage::Slices { message, topic }) => {
                        self.print_message(&message, &topic)?;
                    }
                    Ok(InboundMessage::Big(big)) => {
                        let topic = big.topic.clone();
                        let message = big.read_all().await?;
                        self.print_message(&message, &topic)?;
                    }
                    Err(MqttError::Closed) => return Ok(()),
                    Err(err) => return Err(err.into()),
                },
            }
        }
    }

    fn print_message(&self, message: &[u8], topic: &[u8]) -> anyhow::Result<()> {
        let mut out = std::io::stdout().lock();
        let message = String::from_utf8_lossy(message);
        let topic = String::from_utf8_lossy(topic);
        match (self.topic, self.quote) {
            (true, true) => write!(out, "{topic:?}{}{message:?}{}", self.prefix, self.suffix)?,
            (true, false) => write!(out, "{topic}{}{message}{}", self.prefix, self.suffix)?,
            (false, true) => write!(out, "{}{message:?}{}", self.prefix, self.suffix)?,
            (false, false) => write!(out, "{}{message}{}", self.prefix, self.suffix)?,
        }
        out.flush()?;
        Ok(())
    }
}
