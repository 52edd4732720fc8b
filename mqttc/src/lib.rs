//! Blocking MQTT 3.1.1 client with a background dispatcher and keep-alive watchdog.
//!
//! A connection is shared by three threads:
//!
//! - **Application**: drives [`Client`] (connect, subscribe, publish, disconnect)
//!   and drains delivered messages
//! - **Dispatcher**: decodes inbound packets, queues publishes, answers QoS 1
//!   with PUBACK
//! - **Watchdog**: sends PINGREQ every keep-alive interval and closes the
//!   connection after two intervals without PINGRESP
//!
//! QoS 0 and 1 are supported. Packet encoding reuses `rumqttc::mqttbytes::v4`.
//!
//! ## Example
//!
//! ```no_run
//! use giztoy_mqttc::{Client, ClientConfig, PublishOptions, QoS};
//!
//! fn main() -> giztoy_mqttc::Result<()> {
//!     let client = Client::new(ClientConfig::new().with_address("127.0.0.1", 1883));
//!     client.connect(None)?;
//!
//!     client.subscribe([("/test", QoS::AtMostOnce)])?;
//!     client.publish("/test", "hi", PublishOptions::default())?;
//!
//!     if let Some(msg) = client.get_message() {
//!         println!("{}: {}", msg.topic, msg.payload_str());
//!     }
//!
//!     client.disconnect()
//! }
//! ```

mod client;
mod config;
mod dispatcher;
mod error;
mod handshake;
mod keepalive;
pub mod protocol;
pub mod queue;
pub mod topic;
pub mod transport;
mod types;

pub use client::{Client, Messages};
pub use config::{ClientConfig, DEFAULT_PORT, MAX_PACKET_SIZE, Will};
pub use error::{Error, Result};
pub use queue::{DeliveryQueue, Done};
pub use transport::{TcpTransport, Transport};
pub use types::{ConnectionState, Message, PublishOptions, QoS, RejectReason};
