//! Keep-alive watchdog.
//!
//! The watchdog sends PINGREQ every keep-alive interval and closes the
//! transport once no PINGRESP has been seen for twice that interval. The
//! dispatcher refreshes the shared [`KeepaliveClock`] on every PINGRESP.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::protocol;
use crate::transport::Transport;

/// Time of the last observed PINGRESP.
///
/// Lock free: one writer (dispatcher), one reader (watchdog).
#[derive(Debug)]
pub(crate) struct KeepaliveClock {
    base: Instant,
    last_ms: AtomicU64,
}

impl Default for KeepaliveClock {
    fn default() -> Self {
        Self::new()
    }
}

impl KeepaliveClock {
    /// Create a clock that was last touched now.
    pub(crate) fn new() -> Self {
        Self {
            base: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    /// Record a PINGRESP at the current time.
    pub(crate) fn touch(&self) {
        let now = self.base.elapsed().as_millis() as u64;
        self.last_ms.store(now, Ordering::Release);
    }

    /// Time since the last [`touch`](Self::touch).
    pub(crate) fn elapsed(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Acquire));
        self.base.elapsed().saturating_sub(last)
    }
}

/// One-shot cancellation flag that sleeping threads can wait on.
#[derive(Debug, Default)]
pub(crate) struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake all waiters. Idempotent.
    pub(crate) fn stop(&self) {
        let mut stopped = self.stopped.lock();
        *stopped = true;
        self.cond.notify_all();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleep for `timeout` or until stopped. Returns true if stopped.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.cond.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }

    /// Block until stopped.
    pub(crate) fn wait(&self) {
        let mut stopped = self.stopped.lock();
        while !*stopped {
            self.cond.wait(&mut stopped);
        }
    }
}

/// Background PINGREQ sender and liveness check for one connection.
pub(crate) struct Watchdog {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) clock: Arc<KeepaliveClock>,
    pub(crate) stop: Arc<StopSignal>,
    pub(crate) interval: Duration,
    pub(crate) max_packet_size: usize,
}

impl Watchdog {
    /// Run the watchdog on a named thread.
    pub(crate) fn spawn(self, name: String) -> io::Result<JoinHandle<()>> {
        thread::Builder::new().name(name).spawn(move || self.run())
    }

    pub(crate) fn run(self) {
        if self.interval.is_zero() {
            debug!("Keep-alive disabled, watchdog idle");
            self.stop.wait();
            return;
        }

        debug!("Watchdog started (interval={:?})", self.interval);
        let grace = self.interval * 2;

        loop {
            if self.stop.is_stopped() || !self.transport.is_open() {
                break;
            }

            let ping = protocol::create_pingreq();
            if let Err(e) = protocol::write_packet(&*self.transport, &ping, self.max_packet_size) {
                debug!("Keepalive ping failed: {}", e);
                break;
            }
            trace!("Keepalive ping sent");

            if self.stop.wait_timeout(self.interval) {
                break;
            }

            let elapsed = self.clock.elapsed();
            if elapsed > grace {
                warn!("{}, closing connection", Error::WatchdogTimeout(elapsed));
                if let Err(e) = self.transport.close() {
                    debug!("Close after keepalive timeout failed: {}", e);
                }
                break;
            }
        }

        debug!("Watchdog stopped");
    }
}
