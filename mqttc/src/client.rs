//! Blocking MQTT 3.1.1 client (mqttc).
//!
//! A connected client owns two background threads: the dispatcher, which
//! reads every inbound packet, and the keep-alive watchdog. The application
//! thread drives the connection through [`Client`] and drains delivered
//! messages with [`Client::get_message`] or [`Client::messages`].

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::{ClientConfig, Will};
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::handshake;
use crate::keepalive::{KeepaliveClock, StopSignal, Watchdog};
use crate::protocol;
use crate::queue::{DeliveryQueue, Done};
use crate::topic::{validate_topic_filter, validate_topic_name};
use crate::transport::{TcpTransport, Transport};
use crate::types::{ConnectionState, Message, PublishOptions, QoS};

/// Per-connection resources, guarded by the client mutex.
#[derive(Default)]
struct Inner {
    state: ConnectionState,
    transport: Option<Arc<dyn Transport>>,
    stop: Option<Arc<StopSignal>>,
    threads: Vec<JoinHandle<()>>,
    /// Kept after disconnect so consumers observe the end of the stream.
    queue: Option<DeliveryQueue<Message>>,
}

/// Synchronous MQTT client.
///
/// All methods take `&self`, so one client can be shared between a thread
/// that consumes messages and threads that publish.
pub struct Client {
    config: ClientConfig,
    inner: Mutex<Inner>,
    next_pkid: AtomicU16,
}

impl Client {
    /// Create a disconnected client.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
            next_pkid: AtomicU16::new(1),
        }
    }

    /// Connection settings.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Get the client ID.
    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Whether a transport exists and reports open.
    ///
    /// A point-in-time observation: it may race with a watchdog close or a
    /// concurrent [`disconnect`](Self::disconnect).
    pub fn is_connected(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == ConnectionState::Connected
            && inner.transport.as_ref().is_some_and(|t| t.is_open())
    }

    /// Open a TCP connection to the configured broker and run the handshake.
    ///
    /// On success the dispatcher and watchdog threads are running.
    pub fn connect(&self, will: Option<Will>) -> Result<()> {
        self.run_connect(will.as_ref(), || {
            debug!(
            "Connecting to {} as {}",
            self.config.addr(),
            self.config.client_id
        );
            let transport: Arc<dyn Transport> = Arc::new(TcpTransport::connect(
                &self.config.host,
                self.config.port,
                self.config.connect_timeout,
            )?);
            Ok(transport)
        })
    }

    /// Run the connection lifecycle over a caller-supplied transport.
    pub fn connect_with(&self, transport: Arc<dyn Transport>, will: Option<Will>) -> Result<()> {
        debug!(
            "Connecting {} over supplied transport",
            self.config.client_id
        );
        self.run_connect(will.as_ref(), || Ok(transport))
    }

    fn run_connect<F>(&self, will: Option<&Will>, dial: F) -> Result<()>
    where
        F: FnOnce() -> Result<Arc<dyn Transport>>,
    {
        self.config.validate()?;
        if let Some(will) = will {
            validate_topic_name(&will.topic)?;
            check_outbound_qos(will.qos)?;
        }

        {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Disconnected {
                return Err(Error::InvalidState {
                    op: "connect",
                    state: inner.state,
                });
            }
            inner.state = ConnectionState::Connecting;
        }

        let result = dial().and_then(|transport| self.establish(transport, will));
        if result.is_err() {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Connecting {
                inner.state = ConnectionState::Disconnected;
                inner.transport = None;
            }
        }
        result
    }

    fn establish(&self, transport: Arc<dyn Transport>, will: Option<&Will>) -> Result<()> {
        // Publish the transport so a concurrent disconnect can abort the handshake.
        self.install_transport(&transport)?;

        let accepted = match handshake::handshake(&*transport, &self.config, will) {
            Ok(accepted) => accepted,
            Err(e) => {
                close_quietly(&*transport);
                if self.inner.lock().state != ConnectionState::Connecting {
                    debug!("Handshake aborted by disconnect: {}", e);
                    return Err(Error::ConnectionClosed);
                }
                return Err(e);
            }
        };

        let queue = DeliveryQueue::new();
        let clock = Arc::new(KeepaliveClock::new());
        let stop = Arc::new(StopSignal::new());

        let dispatcher = Dispatcher {
            transport: transport.clone(),
            reader: accepted.reader,
            queue: queue.clone(),
            clock: clock.clone(),
            stop: stop.clone(),
            max_packet_size: self.config.max_packet_size,
        };
        let watchdog = Watchdog {
            transport: transport.clone(),
            clock,
            stop: stop.clone(),
            interval: self.config.keep_alive_interval(),
            max_packet_size: self.config.max_packet_size,
        };

        let mut threads = Vec::with_capacity(2);
        let spawned = dispatcher
            .spawn(format!("mqttc-dispatcher-{}", self.config.client_id))
            .and_then(|handle| {
                threads.push(handle);
                watchdog.spawn(format!("mqttc-keepalive-{}", self.config.client_id))
            });
        match spawned {
            Ok(handle) => threads.push(handle),
            Err(e) => {
                stop.stop();
                close_quietly(&*transport);
                join_all(threads);
                return Err(e.into());
            }
        }

        let mut inner = self.inner.lock();
        if inner.state != ConnectionState::Connecting {
            // Disconnected while the handshake was in flight.
            drop(inner);
            stop.stop();
            close_quietly(&*transport);
            join_all(threads);
            return Err(Error::ConnectionClosed);
        }
        inner.state = ConnectionState::Connected;
        inner.stop = Some(stop);
        inner.threads = threads;
        inner.queue = Some(queue);
        drop(inner);

        debug!(
            "Connected as {} (session_present={})",
            self.config.client_id, accepted.session_present
        );
        Ok(())
    }

    fn install_transport(&self, transport: &Arc<dyn Transport>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != ConnectionState::Connecting {
            drop(inner);
            close_quietly(&**transport);
            return Err(Error::ConnectionClosed);
        }
        inner.transport = Some(transport.clone());
        Ok(())
    }

    /// Subscribe to topic filters with their maximum QoS.
    ///
    /// All filters go out in one SUBSCRIBE packet. A filter listed twice keeps
    /// its position and the last QoS given for it. The call does not wait for
    /// SUBACK.
    pub fn subscribe<I, S>(&self, topics: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, QoS)>,
        S: Into<String>,
    {
        let transport = self.live_transport("subscribe")?;

        let mut filters: Vec<(String, QoS)> = Vec::new();
        for (filter, qos) in topics {
            let filter = filter.into();
            validate_topic_filter(&filter)?;
            check_outbound_qos(qos)?;
            match filters.iter_mut().find(|(f, _)| *f == filter) {
                Some(existing) => existing.1 = qos,
                None => filters.push((filter, qos)),
            }
        }
        if filters.is_empty() {
            return Ok(());
        }

        let pkid = self.next_pkid();
        debug!("Subscribing to {:?} with pkid={}", filters, pkid);
        let packet = protocol::create_subscribe(pkid, &filters);
        protocol::write_packet(&*transport, &packet, self.config.max_packet_size)
    }

    /// Subscribe to a single filter at QoS 0.
    pub fn subscribe_topic(&self, filter: impl Into<String>) -> Result<()> {
        self.subscribe([(filter.into(), QoS::AtMostOnce)])
    }

    /// Unsubscribe from topic filters with one UNSUBSCRIBE packet.
    pub fn unsubscribe<I, S>(&self, filters: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let transport = self.live_transport("unsubscribe")?;

        let mut topics: Vec<String> = Vec::new();
        for filter in filters {
            let filter = filter.into();
            validate_topic_filter(&filter)?;
            if !topics.contains(&filter) {
                topics.push(filter);
            }
        }
        if topics.is_empty() {
            return Ok(());
        }

        let pkid = self.next_pkid();
        debug!("Unsubscribing from {:?} with pkid={}", topics, pkid);
        let packet = protocol::create_unsubscribe(pkid, topics);
        protocol::write_packet(&*transport, &packet, self.config.max_packet_size)
    }

    /// Publish a message.
    ///
    /// Returns once the packet is written; QoS 1 acknowledgments are not awaited.
    pub fn publish(
        &self,
        topic: &str,
        payload: impl AsRef<[u8]>,
        opts: PublishOptions,
    ) -> Result<()> {
        let transport = self.live_transport("publish")?;
        validate_topic_name(topic)?;
        check_outbound_qos(opts.qos)?;

        let payload = payload.as_ref();
        let pkid = match opts.qos {
            QoS::AtMostOnce => 0,
            _ => self.next_pkid(),
        };
        trace!(
            "Publishing to {} ({} bytes, {:?})",
            topic,
            payload.len(),
            opts.qos
        );

        let packet = protocol::create_publish(topic, payload, opts, pkid);
        protocol::write_packet(&*transport, &packet, self.config.max_packet_size)
    }

    /// Gracefully close the connection.
    ///
    /// Sends DISCONNECT, cancels both background threads, closes the
    /// transport and discards undelivered messages. Afterwards
    /// [`get_message`](Self::get_message) returns `None` without blocking.
    pub fn disconnect(&self) -> Result<()> {
        let (transport, stop, threads, queue) = {
            let mut inner = self.inner.lock();
            match inner.state {
                ConnectionState::Connected | ConnectionState::Connecting => {}
                state => {
                    return Err(Error::InvalidState {
                        op: "disconnect",
                        state,
                    });
                }
            }
            inner.state = ConnectionState::Disconnecting;
            (
                inner.transport.take(),
                inner.stop.take(),
                mem::take(&mut inner.threads),
                inner.queue.clone(),
            )
        };

        debug!("Disconnecting {}", self.config.client_id);

        if let Some(transport) = &transport {
            if transport.is_open() {
                let packet = protocol::create_disconnect();
                match protocol::write_packet(&**transport, &packet, self.config.max_packet_size) {
                    Ok(()) => trace!("Disconnect sent"),
                    Err(e) => debug!("Disconnect packet not sent: {}", e),
                }
            }
        }

        if let Some(stop) = &stop {
            stop.stop();
        }
        if let Some(transport) = &transport {
            close_quietly(&**transport);
        }
        join_all(threads);

        if let Some(queue) = queue {
            let dropped = queue.discard();
            if dropped > 0 {
                debug!("Discarded {} undelivered messages", dropped);
            }
        }

        self.inner.lock().state = ConnectionState::Disconnected;
        debug!("Disconnected {}", self.config.client_id);
        Ok(())
    }

    /// Block until the next delivered message.
    ///
    /// Returns `None` once the connection has ended and every queued message
    /// was consumed, or immediately if the client never connected.
    pub fn get_message(&self) -> Option<Message> {
        self.current_queue()?.pop().ok()
    }

    /// Like [`get_message`](Self::get_message) but gives up after `timeout`.
    ///
    /// `Ok(None)` means the timeout elapsed; the end of the stream is
    /// [`Error::ConnectionClosed`].
    pub fn get_message_timeout(&self, timeout: Duration) -> Result<Option<Message>> {
        let queue = self.current_queue().ok_or(Error::ConnectionClosed)?;
        queue.pop_timeout(timeout).map_err(|Done| Error::ConnectionClosed)
    }

    /// Iterate over delivered messages until the connection ends.
    pub fn messages(&self) -> Messages<'_> {
        Messages { client: self }
    }

    fn current_queue(&self) -> Option<DeliveryQueue<Message>> {
        self.inner.lock().queue.clone()
    }

    fn live_transport(&self, op: &'static str) -> Result<Arc<dyn Transport>> {
        let inner = self.inner.lock();
        if inner.state != ConnectionState::Connected {
            return Err(Error::InvalidState {
                op,
                state: inner.state,
            });
        }
        match &inner.transport {
            Some(transport) if transport.is_open() => Ok(transport.clone()),
            _ => Err(Error::ConnectionClosed),
        }
    }

    fn next_pkid(&self) -> u16 {
        loop {
            let pkid = self.next_pkid.fetch_add(1, Ordering::Relaxed);
            if pkid != 0 {
                return pkid;
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let state = self.inner.get_mut().state;
        if matches!(state, ConnectionState::Connected | ConnectionState::Connecting) {
            if let Err(e) = self.disconnect() {
                debug!("Disconnect on drop failed: {}", e);
            }
        }
    }
}

/// Blocking iterator over delivered messages, see [`Client::messages`].
pub struct Messages<'a> {
    client: &'a Client,
}

impl Iterator for Messages<'_> {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        self.client.get_message()
    }
}

fn check_outbound_qos(qos: QoS) -> Result<()> {
    match qos {
        QoS::AtMostOnce | QoS::AtLeastOnce => Ok(()),
        QoS::ExactlyOnce => Err(Error::UnsupportedQoS(qos)),
    }
}

fn close_quietly(transport: &dyn Transport) {
    if let Err(e) = transport.close() {
        debug!("Transport close failed: {}", e);
    }
}

fn join_all(threads: Vec<JoinHandle<()>>) {
    for handle in threads {
        let name = handle.thread().name().unwrap_or("mqttc").to_string();
        if handle.join().is_err() {
            warn!("Background thread {} panicked", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;
    use crate::protocol::{ConnAck, ConnectReturnCode, Packet, Publish};
    use crate::transport::memory::MemoryTransport;

    fn client() -> Client {
        Client::new(
            ClientConfig::new()
                .with_client_id("unit-client")
                .with_keep_alive(0)
                .with_connect_timeout(Duration::from_millis(200)),
        )
    }

    fn accepted_transport() -> Arc<MemoryTransport> {
        let transport = MemoryTransport::new();
        transport.feed(&Packet::ConnAck(ConnAck::new(ConnectReturnCode::Success, false)));
        transport
    }

    #[test]
    fn test_operations_require_connection() {
        let client = client();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());

        let err = client
            .publish("/test", "hi", PublishOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { op: "publish", .. }));
        assert!(matches!(
            client.subscribe_topic("/test"),
            Err(Error::InvalidState { op: "subscribe", .. })
        ));
        assert!(matches!(
            client.unsubscribe(["/test"]),
            Err(Error::InvalidState { op: "unsubscribe", .. })
        ));
        assert!(matches!(client.disconnect(), Err(Error::InvalidState { .. })));

        // Never connected: no blocking.
        assert!(client.get_message().is_none());
        assert!(matches!(
            client.get_message_timeout(Duration::from_millis(10)),
            Err(Error::ConnectionClosed)
        ));
    }

    #[test]
    fn test_connect_and_disconnect() {
        let client = client();
        let transport = accepted_transport();

        client.connect_with(transport.clone(), None).unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(client.is_connected());

        let err = client.connect_with(accepted_transport(), None).unwrap_err();
        assert!(matches!(err, Error::InvalidState { op: "connect", .. }));

        client.disconnect().unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
        assert!(client.get_message().is_none());

        let written = transport.written_packets();
        assert!(matches!(written.first(), Some(Packet::Connect(_))));
        assert!(matches!(written.last(), Some(Packet::Disconnect)));
    }

    #[test]
    fn test_disconnect_during_handshake() {
        let client = Arc::new(Client::new(
            ClientConfig::new()
                .with_client_id("unit-client")
                .with_keep_alive(0)
                .with_connect_timeout(Duration::from_secs(5)),
        ));
        // No CONNACK: the handshake stays in flight until the transport closes.
        let transport = MemoryTransport::new();

        let connecting = {
            let client = client.clone();
            let transport = transport.clone();
            thread::spawn(move || client.connect_with(transport, None))
        };

        let start = Instant::now();
        while transport.written_packets().is_empty() {
            assert!(start.elapsed() < Duration::from_secs(2));
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(client.state(), ConnectionState::Connecting);
        assert!(!client.is_connected());

        client.disconnect().unwrap();

        let result = connecting.join().unwrap();
        assert!(matches!(result, Err(Error::ConnectionClosed)));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
        assert!(!transport.is_open());

        let written = transport.written_packets();
        assert!(matches!(written.first(), Some(Packet::Connect(_))));
        assert!(matches!(written.last(), Some(Packet::Disconnect)));

        // The aborted attempt leaves the client reusable.
        client.connect_with(accepted_transport(), None).unwrap();
        assert!(client.is_connected());
    }

    #[test]
    fn test_rejected_connect_returns_to_disconnected() {
        let client = client();
        let transport = MemoryTransport::new();
        transport.feed(&Packet::ConnAck(ConnAck::new(ConnectReturnCode::NotAuthorized, false)));

        let err = client.connect_with(transport.clone(), None).unwrap_err();
        assert!(matches!(err, Error::ConnectionRejected(_)));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!transport.is_open());
    }

    #[test]
    fn test_subscribe_merges_duplicates() {
        let client = client();
        let transport = accepted_transport();
        client.connect_with(transport.clone(), None).unwrap();

        client
            .subscribe([
                ("/a", QoS::AtMostOnce),
                ("/b", QoS::AtMostOnce),
                ("/a", QoS::AtLeastOnce),
            ])
            .unwrap();
        client.subscribe(Vec::<(String, QoS)>::new()).unwrap();

        let subscribes: Vec<_> = transport
            .written_packets()
            .into_iter()
            .filter_map(|p| match p {
                Packet::Subscribe(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(subscribes.len(), 1);

        let filters = &subscribes[0].filters;
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].path, "/a");
        assert_eq!(QoS::from(filters[0].qos), QoS::AtLeastOnce);
        assert_eq!(filters[1].path, "/b");
    }

    #[test]
    fn test_validation_happens_before_write() {
        let client = client();
        let transport = accepted_transport();
        client.connect_with(transport.clone(), None).unwrap();
        let before = transport.written_packets().len();

        assert!(matches!(
            client.publish("a/+/b", "x", PublishOptions::default()),
            Err(Error::InvalidTopic(_))
        ));
        let qos2 = PublishOptions::default().with_qos(QoS::ExactlyOnce);
        assert!(matches!(
            client.publish("/q2", "x", qos2),
            Err(Error::UnsupportedQoS(QoS::ExactlyOnce))
        ));
        assert!(matches!(
            client.subscribe([("a/#/b", QoS::AtMostOnce)]),
            Err(Error::InvalidTopic(_))
        ));

        assert_eq!(transport.written_packets().len(), before);
    }

    #[test]
    fn test_qos1_publish_uses_nonzero_pkids() {
        let client = client();
        let transport = accepted_transport();
        client.connect_with(transport.clone(), None).unwrap();

        let opts = PublishOptions::default().with_qos(QoS::AtLeastOnce);
        client.publish("/q", "1", opts).unwrap();
        client.publish("/q", "2", opts).unwrap();

        let pkids: Vec<u16> = transport
            .written_packets()
            .into_iter()
            .filter_map(|p| match p {
                Packet::Publish(p) => Some(p.pkid),
                _ => None,
            })
            .collect();
        assert_eq!(pkids.len(), 2);
        assert!(pkids.iter().all(|&id| id != 0));
        assert_ne!(pkids[0], pkids[1]);
    }

    #[test]
    fn test_pkid_skips_zero() {
        let client = client();
        client.next_pkid.store(u16::MAX, Ordering::Relaxed);
        assert_eq!(client.next_pkid(), u16::MAX);
        assert_eq!(client.next_pkid(), 1);
    }

    #[test]
    fn test_peer_close_ends_message_stream() {
        let client = client();
        let transport = accepted_transport();
        client.connect_with(transport.clone(), None).unwrap();

        transport.feed(&Packet::Publish(Publish::new(
            "/test",
            rumqttc::mqttbytes::QoS::AtMostOnce,
            b"hi".to_vec(),
        )));
        transport.finish();

        let received: Vec<Message> = client.messages().collect();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].payload_str(), "hi");

        assert!(!client.is_connected());
        assert!(matches!(
            client.publish("/test", "x", PublishOptions::default()),
            Err(Error::ConnectionClosed)
        ));

        // Teardown still works on a dead connection, then reconnect is allowed.
        client.disconnect().unwrap();
        client.connect_with(accepted_transport(), None).unwrap();
        assert!(client.is_connected());
    }

    #[test]
    fn test_disconnect_wakes_blocked_consumer() {
        let client = Arc::new(client());
        client.connect_with(accepted_transport(), None).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let consumer = {
            let client = client.clone();
            thread::spawn(move || {
                let msg = client.get_message();
                let _ = tx.send(());
                msg
            })
        };

        // Give the consumer time to block on the empty queue.
        thread::sleep(Duration::from_millis(50));
        assert!(rx.try_recv().is_err());

        let start = Instant::now();
        client.disconnect().unwrap();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(consumer.join().unwrap().is_none());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_will_is_validated() {
        let client = client();
        let will = Will::new("status/#", "gone");
        let err = client
            .connect_with(accepted_transport(), Some(will))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTopic(_)));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
