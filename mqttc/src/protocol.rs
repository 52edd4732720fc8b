//! MQTT 3.1.1 packet codec.
//!
//! Packet encoding and decoding is delegated to `rumqttc::mqttbytes::v4`.
//! This module adds the blocking framing on top of a [`Transport`] and the
//! constructors for every packet the client sends.

use bytes::BytesMut;
use tracing::warn;

use crate::config::{ClientConfig, Will};
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::types::{PublishOptions, QoS};

pub use rumqttc::mqttbytes::v4::{
    ConnAck, Connect, ConnectReturnCode, LastWill, Packet, PubAck, Publish, SubAck, Subscribe,
    SubscribeFilter, SubscribeReasonCode, UnsubAck, Unsubscribe,
};

const READ_CHUNK: usize = 4096;

/// Encode a packet into a single contiguous buffer.
pub fn encode(packet: &Packet, max_size: usize) -> Result<BytesMut> {
    let mut buf = BytesMut::with_capacity(packet.size());
    packet
        .write(&mut buf, max_size)
        .map_err(|e| Error::Encode(e.to_string()))?;
    Ok(buf)
}

/// Encode a packet and hand it to the transport in one write.
pub fn write_packet(transport: &dyn Transport, packet: &Packet, max_size: usize) -> Result<()> {
    let buf = encode(packet, max_size)?;
    transport.write_all(&buf)?;
    Ok(())
}

/// Short name of a packet kind, for logs and errors.
pub fn packet_name(packet: &Packet) -> &'static str {
    match packet {
        Packet::Connect(_) => "Connect",
        Packet::ConnAck(_) => "ConnAck",
        Packet::Publish(_) => "Publish",
        Packet::PubAck(_) => "PubAck",
        Packet::PubRec(_) => "PubRec",
        Packet::PubRel(_) => "PubRel",
        Packet::PubComp(_) => "PubComp",
        Packet::Subscribe(_) => "Subscribe",
        Packet::SubAck(_) => "SubAck",
        Packet::Unsubscribe(_) => "Unsubscribe",
        Packet::UnsubAck(_) => "UnsubAck",
        Packet::PingReq => "PingReq",
        Packet::PingResp => "PingResp",
        Packet::Disconnect => "Disconnect",
    }
}

/// Decodes packets from a transport, keeping bytes that belong to the next packet.
pub struct PacketReader {
    buf: BytesMut,
    max_size: usize,
}

impl PacketReader {
    /// Create a reader that refuses packets larger than `max_size`.
    pub fn new(max_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_CHUNK),
            max_size,
        }
    }

    /// Block until the next full packet is available.
    ///
    /// End of stream is reported as [`Error::ConnectionClosed`].
    pub fn read_packet(&mut self, transport: &dyn Transport) -> Result<Packet> {
        loop {
            if !self.buf.is_empty() {
                match Packet::read(&mut self.buf, self.max_size) {
                    Ok(packet) => return Ok(packet),
                    Err(rumqttc::mqttbytes::Error::InsufficientBytes(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }

            let mut tmp = [0u8; READ_CHUNK];
            let n = match transport.read(&mut tmp) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.buf.extend_from_slice(&tmp[..n]);
        }
    }

    /// Bytes received but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Create a CONNECT packet.
pub fn create_connect(config: &ClientConfig, will: Option<&Will>) -> Packet {
    let mut connect = Connect::new(config.client_id.as_str());
    connect.keep_alive = config.keep_alive;
    connect.clean_session = config.clean_session;

    if let Some(user) = config.username.as_deref() {
        let pass = config.password.as_deref().unwrap_or_default();
        let pass_str = std::str::from_utf8(pass).unwrap_or_else(|_| {
            warn!(
                "Password contains non-UTF8 bytes for client {}, using empty string",
                config.client_id
            );
            ""
        });
        connect.set_login(user, pass_str);
    }

    if let Some(will) = will {
        connect.last_will = Some(LastWill::new(
            will.topic.as_str(),
            will.payload.to_vec(),
            will.qos.into(),
            will.retain,
        ));
    }

    Packet::Connect(connect)
}

/// Create a PUBLISH packet. `pkid` is ignored for QoS 0.
pub fn create_publish(topic: &str, payload: &[u8], opts: PublishOptions, pkid: u16) -> Packet {
    let mut publish = Publish::new(topic, opts.qos.into(), payload.to_vec());
    publish.retain = opts.retain;
    if opts.qos != QoS::AtMostOnce {
        publish.pkid = pkid;
    }
    Packet::Publish(publish)
}

/// Create a PUBACK packet.
pub fn create_puback(pkid: u16) -> Packet {
    Packet::PubAck(PubAck::new(pkid))
}

/// Create a SUBSCRIBE packet.
pub fn create_subscribe(pkid: u16, filters: &[(String, QoS)]) -> Packet {
    let filters: Vec<SubscribeFilter> = filters
        .iter()
        .map(|(path, qos)| SubscribeFilter::new(path.clone(), (*qos).into()))
        .collect();

    let mut subscribe = Subscribe::new_many(filters);
    subscribe.pkid = pkid;
    Packet::Subscribe(subscribe)
}

/// Create an UNSUBSCRIBE packet.
pub fn create_unsubscribe(pkid: u16, topics: Vec<String>) -> Packet {
    Packet::Unsubscribe(Unsubscribe { pkid, topics })
}

/// Create a PINGREQ packet.
pub fn create_pingreq() -> Packet {
    Packet::PingReq
}

/// Create a DISCONNECT packet.
pub fn create_disconnect() -> Packet {
    Packet::Disconnect
}
