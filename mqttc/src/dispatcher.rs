//! Inbound packet loop.
//!
//! Runs on its own thread for the lifetime of a connection and routes every
//! decoded packet:
//! - `PingResp` refreshes the keep-alive clock
//! - `Publish` goes to the delivery queue, QoS 1 is answered with `PubAck`
//! - everything else is ignored
//!
//! On exit the transport is closed, the watchdog is signalled and the
//! delivery queue is closed so blocked consumers see the end of the stream.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::keepalive::{KeepaliveClock, StopSignal};
use crate::protocol::{self, Packet, PacketReader, Publish};
use crate::queue::DeliveryQueue;
use crate::transport::Transport;
use crate::types::{Message, QoS};

pub(crate) struct Dispatcher {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) reader: PacketReader,
    pub(crate) queue: DeliveryQueue<Message>,
    pub(crate) clock: Arc<KeepaliveClock>,
    pub(crate) stop: Arc<StopSignal>,
    pub(crate) max_packet_size: usize,
}

impl Dispatcher {
    /// Run the loop on a named thread.
    pub(crate) fn spawn(self, name: String) -> io::Result<JoinHandle<()>> {
        thread::Builder::new().name(name).spawn(move || self.run())
    }

    pub(crate) fn run(mut self) {
        debug!("Dispatcher started");

        loop {
            let packet = match self.reader.read_packet(&*self.transport) {
                Ok(packet) => packet,
                Err(e) => {
                    self.log_exit(&e);
                    break;
                }
            };

            if let Err(e) = self.handle(packet) {
                debug!("Dispatcher write failed: {}", e);
                break;
            }
        }

        if let Err(e) = self.transport.close() {
            debug!("Close after dispatcher exit failed: {}", e);
        }
        self.stop.stop();
        self.queue.close();
        debug!("Dispatcher stopped");
    }

    fn log_exit(&self, err: &Error) {
        if self.stop.is_stopped() {
            trace!("Dispatcher cancelled");
            return;
        }
        match err {
            Error::ConnectionClosed => debug!("Connection closed"),
            Error::Decode(_) => warn!("Dropping connection after {}", err),
            _ => debug!("Read failed: {}", err),
        }
    }

    fn handle(&self, packet: Packet) -> Result<()> {
        match packet {
            Packet::PingResp => {
                trace!("PingResp received");
                self.clock.touch();
            }
            Packet::Publish(publish) => self.deliver(publish)?,
            Packet::PubAck(ack) => trace!("PubAck received for {}", ack.pkid),
            other => trace!("Ignoring {}", protocol::packet_name(&other)),
        }
        Ok(())
    }

    fn deliver(&self, publish: Publish) -> Result<()> {
        let qos = QoS::from(publish.qos);
        let pkid = publish.pkid;
        trace!(
            "Received message on {} ({} bytes, {:?})",
            publish.topic,
            publish.payload.len(),
            qos
        );

        let message = Message {
            topic: publish.topic,
            payload: publish.payload,
            qos,
            retain: publish.retain,
            pkid: (qos != QoS::AtMostOnce).then_some(pkid),
        };
        if self.queue.push(message).is_err() {
            debug!("Delivery queue closed, dropping message");
        }

        match qos {
            QoS::AtMostOnce => {}
            QoS::AtLeastOnce => {
                let ack = protocol::create_puback(pkid);
                protocol::write_packet(&*self.transport, &ack, self.max_packet_size)?;
                trace!("PubAck sent for {}", pkid);
            }
            QoS::ExactlyOnce => {
                warn!("QoS 2 publish {} delivered without acknowledgment", pkid);
            }
        }
        Ok(())
    }
}
