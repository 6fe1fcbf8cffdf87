//! TCP readiness probing
//!
//! Polls an endpoint until it accepts a connection or the overall deadline
//! passes. Used as a proxy for "the guest is up enough to accept SSH".

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

/// Timing for one readiness wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Overall deadline for the wait
    pub timeout: Duration,
    /// Pause between failed attempts
    pub interval: Duration,
    /// Upper bound for a single connection attempt
    pub attempt_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

impl ProbeConfig {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }
}

/// Something that can wait for a port to open
pub trait PortProber: Send + Sync {
    /// Block until `host:port` accepts a connection (true) or the deadline
    /// in `config` passes (false)
    fn wait_for_port(&self, host: &str, port: u16, config: &ProbeConfig) -> bool;
}

/// Prober that opens real TCP connections
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

impl PortProber for TcpProber {
    fn wait_for_port(&self, host: &str, port: u16, config: &ProbeConfig) -> bool {
        wait_for_port(host, port, config)
    }
}

/// Poll `host:port` until a connect succeeds or `config.timeout` elapses
///
/// Returns true right after the first successful connect. A false result
/// is reported no earlier than `timeout` and no later than
/// `timeout + attempt_timeout`. Name resolution runs on every attempt and
/// is not covered by `attempt_timeout`, so that upper bound only holds
/// for literal addresses or a responsive resolver.
pub fn wait_for_port(host: &str, port: u16, config: &ProbeConfig) -> bool {
    info!("Waiting for {}:{} (timeout {:?})", host, port, config.timeout);
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match try_connect(host, port, config.attempt_timeout) {
            Ok(()) => {
                info!("{}:{} is accepting connections", host, port);
                return true;
            }
            Err(e) => debug!("Probe {} of {}:{} failed: {}", attempts, host, port, e),
        }

        let elapsed = started.elapsed();
        if elapsed >= config.timeout {
            warn!(
                "{}:{} still unreachable after {} attempts ({:?})",
                host, port, attempts, elapsed
            );
            return false;
        }

        std::thread::sleep(config.interval.min(config.timeout.saturating_sub(elapsed)));
    }
}

/// One short-lived connection attempt; the stream is dropped immediately
fn try_connect(host: &str, port: u16, attempt_timeout: Duration) -> io::Result<()> {
    let deadline = Instant::now().checked_add(attempt_timeout);
    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses");

    for addr in (host, port).to_socket_addrs()? {
        let remaining = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => attempt_timeout,
        };
        if remaining.is_zero() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "attempt timed out"));
        }
        match TcpStream::connect_timeout(&addr, remaining) {
            Ok(stream) => {
                drop(stream);
                return Ok(());
            }
            Err(e) => last_err = e,
        }
    }

    Err(last_err)
}
