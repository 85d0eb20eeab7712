//! Outbound queue and the in-flight slot.
//!
//! ```text
//!   commit_async ──▶ FrameQueue (FIFO, bounded) ──transmit──▶ InFlight (≤ 1)
//!                        │ abort: unlink                          │ abort: neutralize
//!                        ▼                                        ▼
//!                     dropped                      response / timeout ──▶ Completion
//! ```
//!
//! The in-flight side is an `Option`, not a queue: the bus is half-duplex
//! and the module answers one command at a time.

use std::collections::VecDeque;

use super::codec::{FrameHeader, FrameKind};
use super::frame::Frame;

/// Handle returned by `commit_async`, used to abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub(crate) u32);

/// What `abort` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortOutcome {
    /// Still queued: unlinked and dropped; its hook never fires.
    Unqueued,
    /// Already transmitted: hooks cleared, but the frame stays in flight
    /// until its response or timeout retires it.
    Neutralized,
    /// Not queued and not in flight (finished, or never committed).
    NotFound,
}

/// Bounded FIFO of frames waiting to be transmitted.
pub struct FrameQueue {
    items: VecDeque<(FrameId, Frame)>,
    capacity: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, handing the frame back when the queue is full.
    pub fn push(&mut self, id: FrameId, frame: Frame) -> Result<(), Frame> {
        if self.is_full() {
            return Err(frame);
        }
        self.items.push_back((id, frame));
        Ok(())
    }

    pub fn pop(&mut self) -> Option<(FrameId, Frame)> {
        self.items.pop_front()
    }

    pub fn remove(&mut self, id: FrameId) -> Option<Frame> {
        let pos = self.items.iter().position(|(i, _)| *i == id)?;
        self.items.remove(pos).map(|(_, f)| f)
    }

    pub fn contains(&self, id: FrameId) -> bool {
        self.items.iter().any(|(i, _)| *i == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }
}

/// How an inbound frame relates to the in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Correlation {
    /// Management frame answering the request.
    Response,
    /// Data frame belonging to the request's command.
    Data,
    /// Belongs to some other command.
    Mismatch { expected: u16, got: u16 },
}

/// The transmitted frame awaiting its response.
pub(crate) struct InFlight {
    pub id: FrameId,
    pub frame: Frame,
    pub sent_at_ms: u64,
}

impl InFlight {
    pub fn correlate(&self, header: &FrameHeader) -> Correlation {
        let expected = self.frame.command_id();
        if header.command_id != expected {
            return Correlation::Mismatch {
                expected,
                got: header.command_id,
            };
        }
        match header.kind {
            FrameKind::Management => Correlation::Response,
            FrameKind::Data => Correlation::Data,
        }
    }

    pub fn expired(&self, now_ms: u64, timeout_ms: u32) -> bool {
        now_ms.saturating_sub(self.sent_at_ms) >= u64::from(timeout_ms)
    }
}
