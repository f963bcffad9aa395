use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mqtt3::MqttError;

mod commands;

use commands::ping_cmd::PingCommand;
use commands::pub_cmd::PubCommand;
use commands::sub_cmd::SubCommand;

#[derive(Parser)]
#[command(
    name = "mqttv3",
    version,
    about = "MQTT 3.1.1 broker access",
    after_help = "When the address does not specify a port, 1883 is used for plain \
                  connections and 8883 for TLS.\n\nExit status: 0 no error, 1 MQTT \
                  operational error, 2 illegal invocation, 5-9 connect refusals."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a message to a topic
    Pub(PubCommand),
    /// Listen with topic filters and print inbound messages
    Sub(SubCommand),
    /// Make a roundtrip to validate the connection
    Ping(PingCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Pub(cmd) => cmd.execute().await,
        Command::Sub(cmd) => cmd.execute().await,
        Command::Ping(cmd) => cmd.execute().await,
    };

    if let Err(err) = result {
        tracing::error!("{err:#}");
        std::process::exit(exit_code(&err));
    }
}

/// Connect refusals get distinct exit codes so scripts can tell a broken
/// credential from a broker outage.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<MqttError>() {
        Some(MqttError::ProtocolLevel) => 5,
        Some(MqttError::ClientId) => 6,
        Some(MqttError::Unavailable) => 7,
        Some(MqttError::AuthBad) => 8,
        Some(MqttError::Auth) => 9,
        _ => 1,
    }
}
