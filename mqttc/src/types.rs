//! Common types for mqttc.

use std::fmt;

use bytes::Bytes;
use rumqttc::mqttbytes::v4::ConnectReturnCode;

/// MQTT Quality of Service level.
///
/// Outbound operations support QoS 0 and 1. `ExactlyOnce` is kept so inbound
/// packets can be represented faithfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
#[repr(u8)]
pub enum QoS {
    /// At most once delivery (fire and forget).
    #[default]
    AtMostOnce = 0,
    /// At least once delivery (acknowledged with PUBACK).
    AtLeastOnce = 1,
    /// Exactly once delivery.
    ExactlyOnce = 2,
}

impl From<QoS> for rumqttc::mqttbytes::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::mqttbytes::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::mqttbytes::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::mqttbytes::QoS::ExactlyOnce,
        }
    }
}

impl From<rumqttc::mqttbytes::QoS> for QoS {
    fn from(qos: rumqttc::mqttbytes::QoS) -> Self {
        match qos {
            rumqttc::mqttbytes::QoS::AtMostOnce => QoS::AtMostOnce,
            rumqttc::mqttbytes::QoS::AtLeastOnce => QoS::AtLeastOnce,
            rumqttc::mqttbytes::QoS::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(other),
        }
    }
}

/// A message delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Topic name.
    pub topic: String,
    /// Message payload.
    pub payload: Bytes,
    /// Delivery QoS.
    pub qos: QoS,
    /// Retain flag.
    pub retain: bool,
    /// Packet identifier, present for QoS > 0.
    pub pkid: Option<u16>,
}

impl Message {
    /// Create a QoS 0 message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            pkid: None,
        }
    }

    /// Payload decoded as UTF-8, replacing invalid sequences.
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Split into `(payload, topic)`.
    pub fn into_parts(self) -> (Bytes, String) {
        (self.payload, self.topic)
    }
}

/// Lifecycle state of a [`Client`](crate::Client).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// Options for publishing a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// QoS level.
    pub qos: QoS,
    /// Retain flag.
    pub retain: bool,
}

impl PublishOptions {
    /// Set QoS level.
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Set retain flag.
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

/// Reason a broker refused a CONNECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadUsernamePassword,
    NotAuthorized,
}

impl RejectReason {
    /// Map a CONNACK return code. `None` means the connection was accepted.
    pub fn from_return_code(code: ConnectReturnCode) -> Option<Self> {
        match code {
            ConnectReturnCode::Success => None,
            ConnectReturnCode::RefusedProtocolVersion => Some(Self::UnacceptableProtocolVersion),
            ConnectReturnCode::BadClientId => Some(Self::IdentifierRejected),
            ConnectReturnCode::ServiceUnavailable => Some(Self::ServerUnavailable),
            ConnectReturnCode::BadUserNamePassword => Some(Self::BadUsernamePassword),
            ConnectReturnCode::NotAuthorized => Some(Self::NotAuthorized),
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::UnacceptableProtocolVersion => "unacceptable protocol version",
            RejectReason::IdentifierRejected => "identifier rejected",
            RejectReason::ServerUnavailable => "server unavailable",
            RejectReason::BadUsernamePassword => "bad user name or password",
            RejectReason::NotAuthorized => "not authorized",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_conversions() {
        for qos in [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce] {
            let wire: rumqttc::mqttbytes::QoS = qos.into();
            assert_eq!(QoS::from(wire), qos);
            assert_eq!(QoS::try_from(qos as u8), Ok(qos));
        }
        assert_eq!(QoS::try_from(3), Err(3));
    }

    #[test]
    fn test_reject_reason_from_return_code() {
        let accepted = RejectReason::from_return_code(ConnectReturnCode::Success);
        assert_eq!(accepted, None);
        assert_eq!(
            RejectReason::from_return_code(ConnectReturnCode::NotAuthorized),
            Some(RejectReason::NotAuthorized)
        );
        assert_eq!(
            RejectReason::from_return_code(ConnectReturnCode::BadClientId),
            Some(RejectReason::IdentifierRejected)
        );
    }

    #[test]
    fn test_message_into_parts() {
        let msg = Message::new("/test", "hi");
        assert_eq!(msg.payload_str(), "hi");

        let (payload, topic) = msg.into_parts();
        assert_eq!(payload.as_ref(), b"hi");
        assert_eq!(topic, "/test");
    }

    #[test]
    fn test_publish_options() {
        let opts = PublishOptions::default()
            .with_qos(QoS::AtLeastOnce)
            .with_retain(true);
        assert_eq!(opts.qos, QoS::AtLeastOnce);
        assert!(opts.retain);
    }
}
