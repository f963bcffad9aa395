//! MQTT 3.1.1 wire protocol support for the `mqtt3` client.
//!
//! This crate is free of I/O: it covers the packet codec (fixed headers,
//! variable-length remaining-length integers, length-prefixed strings), the
//! 16-bit packet-identifier register, topic validation, and the shared
//! configuration and error types. The `mqtt3` crate layers transports and the
//! session engine on top.

#![warn(clippy::pedantic)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_lossless)]

pub mod encoding;
pub mod error;
pub mod packet;
pub mod packet_id;
pub mod types;
pub mod validation;

pub use error::{MqttError, Result};
pub use packet::{FixedHeader, Packet, PacketType};
pub use packet_id::PacketIdRegister;
pub use types::{ConnectOptions, ConnectResult, QoS, Will};
pub use validation::{topic_matches_filter, validate_topic_filter, validate_topic_name};
