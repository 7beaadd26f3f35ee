//! Retry timing and accept-error classification shared by the listeners

use rand::Rng;
use std::io;
use std::time::Duration;

/// First and largest drain poll interval in `Server::shutdown`
pub(crate) const SHUTDOWN_POLL_INTERVAL_MIN: Duration = Duration::from_millis(1);
pub(crate) const SHUTDOWN_POLL_INTERVAL_MAX: Duration = Duration::from_millis(500);

/// First and largest pause after an accept failure caused by resource exhaustion
pub(crate) const ACCEPT_RETRY_DELAY_MIN: Duration = Duration::from_millis(5);
pub(crate) const ACCEPT_RETRY_DELAY_MAX: Duration = Duration::from_secs(1);

/// Exponential interval: doubles each round up to `max`, plus up to 10% jitter
#[derive(Debug)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    base: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            base: initial,
        }
    }

    pub(crate) fn next_interval(&mut self) -> Duration {
        let jitter = rand::thread_rng().gen_range(Duration::ZERO..=self.base / 10);
        let interval = self.base + jitter;
        self.base = (self.base * 2).min(self.max);
        interval
    }

    /// Start over from the initial interval
    pub(crate) fn reset(&mut self) {
        self.base = self.initial;
    }
}

/// How an accept loop reacts to a failed `accept`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcceptError {
    /// Only the pending connection is affected; accept again right away
    Connection,
    /// The process is out of descriptors, buffers or memory; pause, then accept again
    Exhausted,
    /// The listener itself is broken
    Fatal,
}

#[cfg(unix)]
mod errno {
    pub const ENOMEM: i32 = 12;
    pub const ENFILE: i32 = 23;
    pub const EMFILE: i32 = 24;
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub const ENOBUFS: i32 = 105;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub const ENOBUFS: i32 = 55;

    pub const EXHAUSTED: [i32; 4] = [ENOMEM, ENFILE, EMFILE, ENOBUFS];
}

#[cfg(windows)]
mod errno {
    const WSAEMFILE: i32 = 10024;
    const WSAENOBUFS: i32 = 10055;

    pub const EXHAUSTED: [i32; 2] = [WSAEMFILE, WSAENOBUFS];
}

#[cfg(not(any(unix, windows)))]
mod errno {
    pub const EXHAUSTED: [i32; 0] = [];
}

pub(crate) fn classify_accept_error(e: &io::Error) -> AcceptError {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::TimedOut => AcceptError::Connection,
        io::ErrorKind::OutOfMemory => AcceptError::Exhausted,
        _ if e
            .raw_os_error()
            .is_some_and(|code| errno::EXHAUSTED.contains(&code)) =>
        {
            AcceptError::Exhausted
        }
        _ => AcceptError::Fatal,
    }
}
