//! A poller is a function registered on a reactor that is invoked every
//! reactor iteration (continuous, `period_us == 0`) or once an interval has
//! elapsed (timed). Pollers are only ever registered and run from their
//! owning reactor; unregistration is asynchronous and completes by firing a
//! caller-supplied [`Event`](crate::core::event::Event) once the poller's
//! function is guaranteed not to fire again.

use std::{
    fmt,
    time::{Duration, Instant},
};

/// Monotonically increasing id, unique within a process. Used only for
/// `Debug` output and to let a reactor find "its" poller in the unregister
/// path without requiring `PartialEq` on the boxed closure.
static NEXT_POLLER_ID: std::sync::atomic::AtomicU64 =
    std::sync::atomic::AtomicU64::new(1);

pub type PollerId = u64;

/// A single registered poller. Owned by the `Reactor` it was registered on;
/// never sent across cores.
pub struct Poller {
    id: PollerId,
    name: String,
    func: Box<dyn FnMut() -> i32>,
    /// `None` means continuous (fires every reactor iteration).
    period: Option<Duration>,
    next_deadline: Instant,
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("period", &self.period)
            .finish()
    }
}

impl Poller {
    pub(crate) fn new(
        name: impl Into<String>,
        period_us: u64,
        func: impl FnMut() -> i32 + 'static,
    ) -> Self {
        let period = if period_us == 0 {
            None
        } else {
            Some(Duration::from_micros(period_us))
        };
        Self {
            id: NEXT_POLLER_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            name: name.into(),
            func: Box::new(func),
            period,
            next_deadline: Instant::now(),
        }
    }

    pub fn id(&self) -> PollerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `true` when this poller's fn should run on this tick, given `now`.
    fn is_due(&self, now: Instant) -> bool {
        match self.period {
            None => true,
            Some(_) => now >= self.next_deadline,
        }
    }

    /// Run the poller's function if due, rearming a timed poller's deadline.
    /// Returns `true` if the function was invoked.
    pub(crate) fn tick(&mut self, now: Instant) -> bool {
        if !self.is_due(now) {
            return false;
        }
        (self.func)();
        if let Some(period) = self.period {
            self.next_deadline = now + period;
        }
        true
    }
}

/// Builder for a [`Poller`], mirroring the construction style used
/// throughout this crate for multi-field objects with optional knobs.
pub struct Builder {
    name: Option<String>,
    period_us: u64,
    poll_fn: Option<Box<dyn FnMut() -> i32>>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self {
            name: None,
            period_us: 0,
            poll_fn: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Interval in microseconds; `0` registers a continuous poller.
    pub fn with_interval(mut self, period_us: u64) -> Self {
        self.period_us = period_us;
        self
    }

    pub fn with_poll_fn(mut self, poll_fn: impl FnMut() -> i32 + 'static) -> Self {
        self.poll_fn = Some(Box::new(poll_fn));
        self
    }

    pub(crate) fn build(self) -> Poller {
        let poll_fn = self
            .poll_fn
            .expect("cannot start a poller without a poll function");
        let name = self.name.unwrap_or_else(|| "<unnamed>".to_string());
        Poller::new(name, self.period_us, poll_fn)
    }
}
