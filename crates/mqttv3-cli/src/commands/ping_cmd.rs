use std::future::pending;
use std::time::Instant;

use clap::Args;
use tracing::info;

use super::ConnectArgs;

#[derive(Args)]
pub struct PingCommand {
    #[command(flatten)]
    pub connect: ConnectArgs,
}

impl PingCommand {
    pub async fn execute(self) -> anyhow::Result<()> {
        let client = self.connect.build_client()?;
        client.connect().await?;

        let start = Instant::now();
        client.ping(pending()).await?;
        info!(roundtrip = ?start.elapsed(), "pong");

        client.disconnect(pending()).await?;
        Ok(())
    }
}
