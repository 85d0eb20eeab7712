//! Port traits: the boundary between the run loop and the board.
//!
//! ```text
//!   Board adapter ──▶ Port trait ──▶ RunLoop (core)
//! ```
//!
//! Board code implements these traits; the run loop consumes them as
//! trait objects, so the core never touches clocks or GPIO directly.

use crate::runloop::Scheduler;

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Time source for timers (monotonic) and scheduled tasks (wall clock).
pub trait Clock {
    /// Milliseconds since boot.  Must never go backwards.
    fn now_ms(&self) -> u64;

    /// Wall-clock seconds from the RTC.
    fn rtc_secs(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Board hooks
// ───────────────────────────────────────────────────────────────

/// Per-iteration board hooks run before the task list.
///
/// Every method has a no-op default so boards only override what they
/// have.
pub trait Board {
    /// Whether the host asked for a reset over the serial line.
    fn serial_reset_requested(&mut self) -> bool {
        false
    }

    /// Perform the serial reset (usually jumps to the bootloader).
    fn serial_reset(&mut self) {}

    /// Poll the touch controller, if the board has one.
    fn poll_touch(&mut self, _sched: &mut Scheduler) {}
}

/// A board with no serial-reset line and no touch panel.
#[derive(Debug, Default)]
pub struct NoBoard;

impl Board for NoBoard {}
