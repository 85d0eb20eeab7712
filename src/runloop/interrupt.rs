//! Deferred interrupt source.
//!
//! The ISR half ([`InterruptLine::on_edge`]) only captures a timestamp and
//! the pin level into atomics.  Debouncing and delivery happen later, from
//! the run loop, in [`DeferredInterrupt`]:
//!
//! ```text
//!            edge                 level still asserted
//!   Idle ─────────▶ Debouncing ───────────────────────▶ Pending ──take──▶ Idle
//!     │                 │  level dropped (transient)       ▲
//!     │                 └──────────────────────────▶ Idle  │
//!     └──────── edge, debounce_ms == 0 ────────────────────┘
//! ```
//!
//! With `deactivate_until_handled`, edges arriving while the line is not
//! idle are counted and dropped, which bounds duplicate delivery during
//! bursts.  Timestamps are u32 milliseconds compared with `wrapping_sub`.

use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::Arc;

use embedded_hal::digital::InputPin;
use log::{trace, warn};

use super::{Scheduler, Task, TaskStatus};
use crate::config::InputConfig;
use crate::power::PowerFlags;

const IDLE: u8 = 0;
const DEBOUNCING: u8 = 1;
const PENDING: u8 = 2;

/// A delivered edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    /// Timestamp captured in the ISR.
    pub at_ms: u32,
    /// Pin level captured in the ISR.
    pub level: bool,
}

/// ISR-shared state of one interrupt line.
#[derive(Debug)]
pub struct InterruptLine {
    state: AtomicU8,
    edge_ms: AtomicU32,
    level: AtomicBool,
    suppressed: AtomicU32,
    debounce_ms: u32,
    deactivate_until_handled: bool,
    wake: Option<Arc<PowerFlags>>,
}

impl InterruptLine {
    pub fn new(cfg: &InputConfig) -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            edge_ms: AtomicU32::new(0),
            level: AtomicBool::new(false),
            suppressed: AtomicU32::new(0),
            debounce_ms: cfg.debounce_ms,
            deactivate_until_handled: cfg.deactivate_until_handled,
            wake: None,
        }
    }

    /// Request a wake from sleep whenever an edge is promoted to pending.
    pub fn with_wake(mut self, power: Arc<PowerFlags>) -> Self {
        self.wake = Some(power);
        self
    }

    /// ISR entry point.  Lock-free.
    pub fn on_edge(&self, now_ms: u32, level: bool) {
        let state = self.state.load(Ordering::Acquire);
        if self.deactivate_until_handled && state != IDLE {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.edge_ms.store(now_ms, Ordering::Relaxed);
        self.level.store(level, Ordering::Relaxed);

        if state == PENDING {
            // Not yet handled: the newer edge replaces the stamp.
            return;
        }
        if self.debounce_ms > 0 {
            self.state.store(DEBOUNCING, Ordering::Release);
        } else {
            self.promote();
        }
    }

    fn promote(&self) {
        self.state.store(PENDING, Ordering::Release);
        if let Some(power) = &self.wake {
            power.request_wake();
        }
    }

    /// Debounce timeout fired.  Promote if the level is still asserted,
    /// otherwise drop the edge as a transient.
    pub fn on_debounce_timeout(&self, asserted: bool) {
        if self.state.load(Ordering::Acquire) != DEBOUNCING {
            return;
        }
        if asserted {
            self.promote();
        } else {
            trace!("Irq: transient rejected");
            self.state.store(IDLE, Ordering::Release);
        }
    }

    /// Whether a debouncing edge has waited its full debounce window.
    pub fn debounce_expired(&self, now_ms: u32) -> bool {
        self.state.load(Ordering::Acquire) == DEBOUNCING
            && now_ms.wrapping_sub(self.edge_ms.load(Ordering::Relaxed)) >= self.debounce_ms
    }

    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }

    /// Consume the pending edge, returning the line to idle.
    pub fn take(&self) -> Option<EdgeEvent> {
        let event = EdgeEvent {
            at_ms: self.edge_ms.load(Ordering::Relaxed),
            level: self.level.load(Ordering::Relaxed),
        };
        self.state
            .compare_exchange(PENDING, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| event)
    }

    /// Edges dropped while the line was deactivated.
    pub fn suppressed_edges(&self) -> u32 {
        self.suppressed.load(Ordering::Relaxed)
    }
}

/// Run-loop task delivering an [`InterruptLine`]'s edges to a handler.
///
/// The debounce "hardware timeout" is the deadline check made on each
/// poll; the pin is sampled when it expires.
pub struct DeferredInterrupt<P, F> {
    line: Arc<InterruptLine>,
    pin: P,
    active_low: bool,
    handler: F,
}

impl<P, F> DeferredInterrupt<P, F>
where
    P: InputPin,
    F: FnMut(EdgeEvent, &mut Scheduler),
{
    pub fn new(line: Arc<InterruptLine>, pin: P, active_low: bool, handler: F) -> Self {
        Self {
            line,
            pin,
            active_low,
            handler,
        }
    }

    pub fn line(&self) -> &Arc<InterruptLine> {
        &self.line
    }

    fn asserted(&mut self) -> bool {
        let level = if self.active_low {
            self.pin.is_low()
        } else {
            self.pin.is_high()
        };
        match level {
            Ok(asserted) => asserted,
            Err(e) => {
                warn!("Irq: pin read failed: {:?}", e);
                false
            }
        }
    }
}

impl<P, F> Task for DeferredInterrupt<P, F>
where
    P: InputPin,
    F: FnMut(EdgeEvent, &mut Scheduler),
{
    fn poll(&mut self, sched: &mut Scheduler) -> TaskStatus {
        let now = sched.now_ms() as u32;
        if self.line.debounce_expired(now) {
            let asserted = self.asserted();
            self.line.on_debounce_timeout(asserted);
        }
        if let Some(event) = self.line.take() {
            trace!("Irq: delivering edge stamped {} ms", event.at_ms);
            (self.handler)(event, sched);
        }
        TaskStatus::Pending
    }
}
