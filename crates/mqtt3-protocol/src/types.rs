use std::time::Duration;

use crate::error::{MqttError, Result};

/// Delivery quality-of-service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = MqttError;

    /// Wire value 3 is reserved and a protocol violation on receipt.
    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(MqttError::Protocol(format!("reserved QoS {other}"))),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos as u8
    }
}

/// Message the broker publishes on the client's behalf when the connection
/// closes without a DISCONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub message: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl Will {
    pub fn new(topic: impl Into<String>, message: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            message: message.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

/// Session configuration, immutable once the client connects.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Session identity sent in CONNECT; 1 to 65535 bytes of UTF-8.
    pub client_id: String,
    /// Request a fresh session, discarding state stored on the broker.
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub will: Option<Will>,
    /// PINGREQ period; zero disables server-side idle disconnection.
    pub keep_alive: Duration,
    /// Deadline for each individual socket read/write attempt.
    pub wire_timeout: Duration,
    /// Sleep between retries on temporary network errors.
    pub retry_delay: Duration,
    /// Maximum concurrent inflight packet identifiers, clamped to [1, 65536].
    pub request_limit: usize,
    /// Inbound packets above this size are framed out and discarded.
    pub in_size_limit: usize,
    /// Inbound payloads above this size are delivered as a streamed
    /// [`BigMessage`](../mqtt3/struct.BigMessage.html) instead of in-memory
    /// slices.
    pub big_message_limit: usize,
    /// Aggregate timeout for client-initiated operations.
    pub pause_timeout: Duration,
}

impl ConnectOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            clean_session: true,
            username: None,
            password: None,
            will: None,
            keep_alive: Duration::from_secs(60),
            wire_timeout: Duration::from_secs(4),
            retry_delay: Duration::from_secs(1),
            request_limit: crate::packet_id::REQUEST_MAX,
            in_size_limit: 1 << 20,
            big_message_limit: 64 << 10,
            pause_timeout: Duration::from_secs(4),
        }
    }

    pub fn with_clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl AsRef<[u8]>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.as_ref().to_vec());
        self
    }

    pub fn with_will(mut self, will: Will) -> Self {
        self.will = Some(will);
        self
    }

    pub fn with_keep_alive(mut self, period: Duration) -> Self {
        self.keep_alive = period;
        self
    }

    pub fn with_wire_timeout(mut self, timeout: Duration) -> Self {
        self.wire_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_request_limit(mut self, limit: usize) -> Self {
        self.request_limit = limit;
        self
    }

    pub fn with_in_size_limit(mut self, limit: usize) -> Self {
        self.in_size_limit = limit;
        self
    }

    pub fn with_big_message_limit(mut self, limit: usize) -> Self {
        self.big_message_limit = limit;
        self
    }

    pub fn with_pause_timeout(mut self, timeout: Duration) -> Self {
        self.pause_timeout = timeout;
        self
    }

    /// CONNECT requires a client identifier of 1 to 65535 bytes.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() || self.client_id.len() > crate::encoding::STRING_MAX {
            return Err(MqttError::ClientId);
        }
        if let Some(will) = &self.will {
            crate::validation::validate_topic_name(&will.topic)?;
        }
        Ok(())
    }
}

/// Outcome of an accepted connect handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectResult {
    /// The broker resumed prior state for this client identifier.
    pub session_present: bool,
}
