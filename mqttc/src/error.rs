//! Error types for mqttc.

use std::io;
use std::time::Duration;

use crate::types::{ConnectionState, QoS, RejectReason};

/// Result type alias for mqttc.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for mqttc operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Byte-stream failure while connecting, reading or writing.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// Broker answered CONNECT with a refusal code.
    #[error("connection rejected: {0}")]
    ConnectionRejected(RejectReason),

    /// Protocol violation, closed stream or timeout before CONNACK.
    #[error("handshake error: {0}")]
    Handshake(String),

    /// Malformed packet on the wire.
    #[error("decode error: {0}")]
    Decode(String),

    /// Outbound packet could not be encoded (e.g. exceeds max packet size).
    #[error("encode error: {0}")]
    Encode(String),

    /// No PINGRESP within the grace window.
    #[error("keepalive timeout: no PINGRESP for {0:?}")]
    WatchdogTimeout(Duration),

    /// Connection closed by peer or watchdog.
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation attempted from the wrong connection state.
    #[error("invalid state: cannot {op} while {state}")]
    InvalidState {
        op: &'static str,
        state: ConnectionState,
    },

    /// Topic name or filter rejected before sending.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// QoS level this client does not implement.
    #[error("unsupported qos: {0:?}")]
    UnsupportedQoS(QoS),

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl From<rumqttc::mqttbytes::Error> for Error {
    fn from(e: rumqttc::mqttbytes::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ConnectionRejected(RejectReason::BadUsernamePassword);
        assert_eq!(
            err.to_string(),
            "connection rejected: bad user name or password"
        );

        let err = Error::InvalidState {
            op: "publish",
            state: ConnectionState::Disconnected,
        };
        assert_eq!(
            err.to_string(),
            "invalid state: cannot publish while disconnected"
        );
    }

    #[test]
    fn test_error_from_io() {
        let err: Error = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(err.to_string(), "transport error: pipe");
    }

    #[test]
    fn test_validation_error_display() {
        let err = Error::InvalidTopic("a/#/b".to_string());
        assert_eq!(err.to_string(), "invalid topic: a/#/b");
        assert_eq!(
            Error::UnsupportedQoS(QoS::ExactlyOnce).to_string(),
            "unsupported qos: ExactlyOnce"
        );
    }
}
