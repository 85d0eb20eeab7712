//! Power-layer flag pair.
//!
//! The deferred interrupt source and the scheduled-task layer set these
//! flags; the power layer reads them before halting the CPU.
//!
//! - `should_wake`: something happened that needs the full run loop
//!   (a promoted interrupt, a due task that may not run in sleep).
//! - `busy_sleep`: work ran while polling from sleep; poll again
//!   before entering the low-power halt.
//!
//! Both are atomics so an ISR can set them without a critical section.

use core::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct PowerFlags {
    should_wake: AtomicBool,
    busy_sleep: AtomicBool,
}

impl PowerFlags {
    pub const fn new() -> Self {
        Self {
            should_wake: AtomicBool::new(false),
            busy_sleep: AtomicBool::new(false),
        }
    }

    /// Safe to call from interrupt context.
    pub fn request_wake(&self) {
        self.should_wake.store(true, Ordering::Release);
    }

    pub fn should_wake(&self) -> bool {
        self.should_wake.load(Ordering::Acquire)
    }

    /// Read and clear the wake request.
    pub fn take_wake(&self) -> bool {
        self.should_wake.swap(false, Ordering::AcqRel)
    }

    pub fn set_busy_sleep(&self, busy: bool) {
        self.busy_sleep.store(busy, Ordering::Release);
    }

    pub fn busy_sleep(&self) -> bool {
        self.busy_sleep.load(Ordering::Acquire)
    }

    /// True when nothing prevents the power layer from halting.
    pub fn may_halt(&self) -> bool {
        !self.should_wake() && !self.busy_sleep()
    }
}
