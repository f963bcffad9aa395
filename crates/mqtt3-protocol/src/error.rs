use thiserror::Error;

pub type Result<T> = std::result::Result<T, MqttError>;

/// Every failure the client stack can surface.
///
/// The first block are session sentinels matched by applications to drive
/// retry/backoff decisions; the connect refusals mirror the CONNACK return
/// codes 1 through 5.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MqttError {
    #[error("client closed")]
    Closed,

    #[error("no connection to the broker")]
    Down,

    #[error("operation canceled by the caller")]
    Canceled,

    #[error("connection lost while awaiting acknowledgement")]
    Abandoned,

    #[error("packet identifier request limit reached")]
    RequestLimit,

    #[error("invalid topic name: {0:?}")]
    TopicName(String),

    #[error("invalid topic filter: {0:?}")]
    TopicFilter(String),

    #[error("message of {size} bytes exceeds the {max} byte limit")]
    MessageSize { size: usize, max: usize },

    #[error("subscribe denied for filter {0:?}")]
    SubscribeDenied(String),

    #[error("connection refused: unacceptable protocol version")]
    ProtocolLevel,

    #[error("connection refused: client identifier rejected")]
    ClientId,

    #[error("connection refused: server unavailable")]
    Unavailable,

    #[error("connection refused: bad user name or password")]
    AuthBad,

    #[error("connection refused: not authorized")]
    Auth,

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("ping roundtrip already pending")]
    PingPending,

    #[error("storage malfunction: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl MqttError {
    /// Maps a non-zero CONNACK return code to its refusal error.
    pub fn connect_refusal(code: u8) -> Self {
        match code {
            1 => MqttError::ProtocolLevel,
            2 => MqttError::ClientId,
            3 => MqttError::Unavailable,
            4 => MqttError::AuthBad,
            5 => MqttError::Auth,
            other => MqttError::Protocol(format!("reserved connect return code {other}")),
        }
    }

    /// True for failures that clear up once a connection is re-established.
    pub fn is_transient(&self) -> bool {
        matches!(self, MqttError::Down | MqttError::Abandoned)
    }
}

impl From<std::io::Error> for MqttError {
    fn from(err: std::io::Error) -> Self {
        MqttError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MqttError::TopicName("bad/+/topic".to_string());
        assert_eq!(err.to_string(), "invalid topic name: \"bad/+/topic\"");

        let err = MqttError::MessageSize {
            size: 1000,
            max: 500,
        };
        assert_eq!(
            err.to_string(),
            "message of 1000 bytes exceeds the 500 byte limit"
        );
    }

    #[test]
    fn test_connect_refusal_mapping() {
        assert_eq!(MqttError::connect_refusal(1), MqttError::ProtocolLevel);
        assert_eq!(MqttError::connect_refusal(2), MqttError::ClientId);
        assert_eq!(MqttError::connect_refusal(3), MqttError::Unavailable);
        assert_eq!(MqttError::connect_refusal(4), MqttError::AuthBad);
        assert_eq!(MqttError::connect_refusal(5), MqttError::Auth);
        assert!(matches!(
            MqttError::connect_refusal(6),
            MqttError::Protocol(_)
        ));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: MqttError = io_err.into();
        match err {
            MqttError::Io(msg) => assert!(msg.contains("reset")),
            _ => panic!("expected Io error"),
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(MqttError::Down.is_transient());
        assert!(MqttError::Abandoned.is_transient());
        assert!(!MqttError::Closed.is_transient());
        assert!(!MqttError::Auth.is_transient());
    }
}
