use std::future::pending;
use std::io::Read;

use clap::Args;
use tracing::info;

use mqtt3::QoS;

use super::{parsers, ConnectArgs};

#[derive(Args)]
pub struct PubCommand {
    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Topic to publish to
    #[arg(long, short)]
    pub topic: String,

    /// Message payload; read from standard input when omitted
    #[arg(long, short)]
    pub message: Option<String>,

    /// Delivery quality of service (0, 1 or 2)
    #[arg(long, short, value_parser = parsers::parse_qos, default_value = "0")]
    pub qos: QoS,

    /// Ask the broker to retain the message for future subscribers
    #[arg(long, short)]
    pub retain: bool,
}

impl PubCommand {
    pub async fn execute(self) -> anyhow::Result<()> {
        let payload = match self.message {
            Some(message) => message.into_bytes(),
            None => {
                let mut payload = Vec::new();
                std::io::stdin().read_to_end(&mut payload)?;
                payload
            }
        };

        let client = self.connect.build_client()?;
        client.connect().await?;

        match (self.qos, self.retain) {
            (QoS::AtMostOnce, false) => client.publish(pending(), &payload, &self.topic).await?,
            (QoS::AtMostOnce, true) => {
                client
                    .publish_retained(pending(), &payload, &self.topic)
                    .await?;
            }
            (QoS::AtLeastOnce, false) => {
                client
                    .publish_at_least_once(&payload, &self.topic)
                    .await?
                    .wait()
                    .await?;
            }
            (QoS::AtLeastOnce, true) => {
                client
                    .publish_at_least_once_retained(&payload, &self.topic)
                    .await?
                    .wait()
                    .await?;
            }
            (QoS::ExactlyOnce, false) => {
                client
                    .publish_exactly_once(&payload, &self.topic)
                    .await?
                    .wait()
                    .await?;
            }
            (QoS::ExactlyOnce, true) => {
                client
                    .publish_exactly_once_retained(&payload, &self.topic)
                    .await?
                    .wait()
                    .await?;
            }
        }
        info!(
            topic = %self.topic,
            bytes = payload.len(),
            qos = ?self.qos,
            "published"
        );

        client.disconnect(pending()).await?;
        Ok(())
    }
}
