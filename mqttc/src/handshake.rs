//! CONNECT / CONNACK exchange.

use std::io;

use tracing::{debug, trace};

use crate::config::{ClientConfig, Will};
use crate::error::{Error, Result};
use crate::protocol::{self, Packet, PacketReader};
use crate::transport::Transport;
use crate::types::RejectReason;

/// Result of an accepted handshake.
pub(crate) struct Accepted {
    /// Reader holding any bytes that arrived after the CONNACK.
    pub(crate) reader: PacketReader,
    pub(crate) session_present: bool,
}

/// Send CONNECT and wait for exactly one reply, which must be a CONNACK.
///
/// The reply read is bounded by `config.connect_timeout`; the transport is
/// left without a read timeout afterwards.
pub(crate) fn handshake(
    transport: &dyn Transport,
    config: &ClientConfig,
    will: Option<&Will>,
) -> Result<Accepted> {
    let connect = protocol::create_connect(config, will);
    protocol::write_packet(transport, &connect, config.max_packet_size)?;
    trace!("Connect sent for {}", config.client_id);

    transport.set_read_timeout(Some(config.connect_timeout))?;
    let mut reader = PacketReader::new(config.max_packet_size);
    let reply = reader.read_packet(transport);
    let reset = transport.set_read_timeout(None);

    let packet = reply.map_err(|e| match e {
        Error::ConnectionClosed => Error::Handshake("connection closed before CONNACK".to_string()),
        Error::Transport(e)
            if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
        {
            Error::Handshake(format!("no CONNACK within {:?}", config.connect_timeout))
        }
        Error::Decode(msg) => Error::Handshake(format!("malformed reply: {}", msg)),
        other => other,
    })?;
    reset?;

    match packet {
        Packet::ConnAck(connack) => match RejectReason::from_return_code(connack.code) {
            None => {
                debug!(
                    "Connection accepted for {} (session_present={})",
                    config.client_id, connack.session_present
                );
                Ok(Accepted {
                    reader,
                    session_present: connack.session_present,
                })
            }
            Some(reason) => {
                debug!("Connection rejected for {}: {}", config.client_id, reason);
                Err(Error::ConnectionRejected(reason))
            }
        },
        other => Err(Error::Handshake(format!(
            "unexpected packet before CONNACK: {}",
            protocol::packet_name(&other)
        ))),
    }
}
