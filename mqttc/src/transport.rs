//! Transport layer abstraction for MQTT connections.
//!
//! A transport is an ordered, reliable byte stream shared by three threads:
//! the application (publish/subscribe/disconnect), the dispatcher (reads and
//! PUBACK writes) and the keep-alive watchdog (PINGREQ writes and forced close).

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

/// Byte stream contract used by the client.
///
/// Implementations must be safe to use from several threads at once:
/// `write_all` must put each buffer on the wire without interleaving it with
/// other writers, and `close` must unblock a `read` in progress elsewhere.
pub trait Transport: Send + Sync {
    /// Read available bytes. `Ok(0)` means end of stream.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the whole buffer as one unit.
    fn write_all(&self, buf: &[u8]) -> io::Result<()>;

    /// Close both directions. Idempotent.
    fn close(&self) -> io::Result<()>;

    /// Whether `close` has not been called and no failure closed the stream.
    fn is_open(&self) -> bool;

    /// Bound blocking reads. `None` blocks indefinitely.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

/// Plain TCP transport.
pub struct TcpTransport {
    reader: TcpStream,
    writer: Mutex<TcpStream>,
    peer: SocketAddr,
    open: AtomicBool,
}

impl TcpTransport {
    /// Resolve `host` and connect to the first address that accepts within `timeout`.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> io::Result<Self> {
        let mut last_err = None;

        for addr in (host, port).to_socket_addrs()? {
            trace!("Dialing {}", addr);
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Self::from_stream(stream),
                Err(e) => {
                    debug!("Dial {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no address resolved for {}:{}", host, port),
            )
        }))
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let writer = stream.try_clone()?;

        Ok(Self {
            reader: stream,
            writer: Mutex::new(writer),
            peer,
            open: AtomicBool::new(true),
        })
    }

    fn mark_closed(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            // Shutdown wakes a reader blocked on the other handle.
            if let Err(e) = self.reader.shutdown(Shutdown::Both) {
                if e.kind() != io::ErrorKind::NotConnected {
                    debug!("Shutdown of {} failed: {}", self.peer, e);
                }
            }
        }
    }
}

impl Transport for TcpTransport {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.is_open() {
            return Ok(0);
        }
        match (&self.reader).read(buf) {
            Ok(0) => {
                self.mark_closed();
                Ok(0)
            }
            Ok(n) => Ok(n),
            // Timeouts and signals leave the stream usable.
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Err(e)
            }
            Err(e) => {
                self.mark_closed();
                Err(e)
            }
        }
    }

    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        if !self.is_open() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed"));
        }
        let mut writer = self.writer.lock();
        let result = writer.write_all(buf).and_then(|_| writer.flush());
        drop(writer);

        if result.is_err() {
            self.mark_closed();
        }
        result
    }

    fn close(&self) -> io::Result<()> {
        self.mark_closed();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.reader.set_read_timeout(timeout)
    }
}
