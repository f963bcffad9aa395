//! MQTT 3.1.1 client.
//!
//! The session engine persists every QoS ≥ 1 exchange in a [`Store`] before
//! it touches the wire, so deliveries survive process restarts; a reconnect
//! replays the stored stage of each exchange. Per connection, one reader task
//! owns the read half and all inbound state transitions, and one writer task
//! owns the write half, draining acknowledgements ahead of application
//! traffic and keeping the session alive with PINGREQ.
//!
//! ```rust,no_run
//! use mqtt3::{Dialer, MqttClient};
//!
//! #[tokio::main]
//! async fn main() -> mqtt3::Result<()> {
//!     let client = MqttClient::volatile_session("demo", Dialer::new("localhost:1883")?);
//!     client.connect().await?;
//!
//!     let ack = client.publish_at_least_once(b"hello", "greetings").await?;
//!     ack.wait().await?;
//!
//!     client.disconnect(std::future::pending()).await
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_lossless)]

pub mod client;
mod session;
pub mod store;
pub mod transport;

pub use client::{BigMessage, InboundMessage, MqttClient, PublishAck, SubscribeResult};
pub use mqtt3_protocol::{
    topic_matches_filter, validate_topic_filter, validate_topic_name, ConnectOptions,
    ConnectResult, MqttError, QoS, Result, Will,
};
pub use store::{FileStore, MemoryStore, Store, StoreKey};
pub use transport::{Dialer, TransportType};
