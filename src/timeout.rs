//! Timeout primitives for the relay's I/O phases.
//!
//! [`Watchdog`] bounds one in-flight operation at a time (the resolver
//! lookup, a single connect attempt, one handshake read or write);
//! [`Deadline`] is the shared idle limit both transfer directions keep
//! pushing forward while bytes move.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

/// Rearmable one-shot timeout for a single I/O operation.
///
/// Arm it, then run the operation through [`Watchdog::watch`]: if the armed
/// interval elapses first, the operation future is dropped and `None` comes
/// back with [`Watchdog::is_expired`] set. Rearming before the next
/// operation replaces the deadline and clears the flag.
#[derive(Debug)]
pub struct Watchdog {
    deadline: Instant,
    expired: bool,
}

impl Watchdog {
    /// Creates an unarmed watchdog; call [`Watchdog::arm`] before watching.
    pub fn new() -> Self {
        Self {
            deadline: Instant::now(),
            expired: false,
        }
    }

    /// Clears the expired flag and schedules the deadline `interval` from now.
    pub fn arm(&mut self, interval: Duration) {
        self.expired = false;
        self.deadline = Instant::now() + interval;
    }

    /// Races `fut` against the armed deadline.
    ///
    /// Returns `None` when the deadline fires first; the losing operation is
    /// cancelled by dropping its future.
    pub async fn watch<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        match tokio::time::timeout_at(self.deadline, fut).await {
            Ok(output) => Some(output),
            Err(_) => {
                self.expired = true;
                None
            }
        }
    }

    /// True when the most recently armed interval elapsed during a watch.
    pub fn is_expired(&self) -> bool {
        self.expired
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared idle deadline for the transfer phase.
///
/// Both directions push it forward before every read and every write; the
/// supervisor sleeps on it and only completes once it truly elapsed. The
/// lock is held for plain loads and stores, never across an await.
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Arc<Mutex<Instant>>,
}

impl Deadline {
    /// Creates an already-elapsed deadline; push it before waiting on it.
    pub fn new() -> Self {
        Self {
            at: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Moves the deadline to `interval` from now.
    pub fn expires_after(&self, interval: Duration) {
        *self.at.lock().expect("deadline lock poisoned") = Instant::now() + interval;
    }

    /// The current deadline.
    pub fn time_point(&self) -> Instant {
        *self.at.lock().expect("deadline lock poisoned")
    }

    /// True once the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.time_point()
    }

    /// Completes once the deadline elapses for real.
    ///
    /// A wake-up that finds the deadline pushed further out goes back to
    /// sleep on the new time point.
    pub async fn expired(&self) {
        while !self.is_expired() {
            tokio::time::sleep_until(self.time_point()).await;
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::new()
    }
}
