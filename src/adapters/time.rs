//! Clock adapters.
//!
//! - [`SystemClock`] uses `std::time::Instant` for the monotonic clock and
//!   `SystemTime` for the RTC, for the host simulation.
//! - [`ManualClock`] is advanced explicitly; tests and the simulated peer
//!   share one instance through cheap clones.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::ports::Clock;

/// Host clock.
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn rtc_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs())
    }
}

#[derive(Debug, Default)]
struct ManualInner {
    ms: Cell<u64>,
    /// RTC seconds minus elapsed monotonic seconds; negative when the RTC
    /// was set below the time already elapsed.
    rtc_offset: Cell<i64>,
}

/// Clock that only moves when told to.  Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    inner: Rc<ManualInner>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance_ms(&self, ms: u64) {
        self.inner.ms.set(self.inner.ms.get().saturating_add(ms));
    }

    /// Set the RTC to `secs` at the current monotonic time.  The RTC then
    /// advances with `advance_ms`.
    pub fn set_rtc(&self, secs: u64) {
        let secs = i64::try_from(secs).unwrap_or(i64::MAX);
        self.inner
            .rtc_offset
            .set(secs.saturating_sub(self.elapsed_secs()));
    }

    fn elapsed_secs(&self) -> i64 {
        i64::try_from(self.inner.ms.get() / 1000).unwrap_or(i64::MAX)
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.inner.ms.get()
    }

    fn rtc_secs(&self) -> u64 {
        let secs = self.elapsed_secs().saturating_add(self.inner.rtc_offset.get());
        u64::try_from(secs).unwrap_or(0)
    }
}
