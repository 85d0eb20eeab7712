//! Module link engine: request/response queueing and correlation.
//!
//! [`WifiModule`] owns the byte channel, the outbound queue and the single
//! in-flight slot.  It does not own a clock or a scheduler: the link
//! driver task feeds it the time on every iteration and fires the
//! completions it returns once the module borrow is released.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  WifiModule::poll(now)                                       │
//! │                                                              │
//! │  1. deliver one frame buffered during a blocking commit      │
//! │  2. input pending? read one frame                            │
//! │       nothing in flight  → Unsolicited                       │
//! │       other command      → Unsolicited (warn)                │
//! │       data frame         → in-flight on_data hook            │
//! │       response           → on_response; Last → Completed     │
//! │  3. in-flight past response_timeout_ms → Completed(timeout)  │
//! │  4. nothing in flight → transmit next outbound frame         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two commit paths exist.  `commit_async` never blocks; `commit` is the
//! bounded busy-wait used at explicit blocking call sites and refuses to
//! run while asynchronous work is pending.

pub mod codec;
pub mod frame;
pub mod queue;
pub mod transport;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use log::{debug, error, info, warn};

use crate::config::{LINK_MAX_PAYLOAD, LinkConfig};
use crate::error::{Error, ProtocolError, ResourceError, Result, StateError};
use crate::runloop::{Scheduler, Task, TaskId, TaskStatus};

use codec::{Codec, FrameHeader, HEADER_LEN};
use queue::{Correlation, FrameQueue, InFlight};

pub use frame::{Chunk, Completion, Direction, Finished, Frame, FrameKind};
pub use queue::{AbortOutcome, FrameId};
pub use transport::{ByteChannel, IrqSignal, NullChannel};

/// Output of one [`WifiModule::poll`].
#[derive(Debug)]
pub enum LinkEvent {
    /// A committed frame finished; fire it after releasing the module.
    Completed(Finished),
    /// A frame nobody was waiting for.
    Unsolicited(Frame),
}

/// At most one buffered frame, one inbound frame, one timeout and one
/// failed transmit per poll.
pub type LinkEvents = heapless::Vec<LinkEvent, 4>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub sent: u32,
    pub received: u32,
    pub completed: u32,
    pub failed: u32,
    pub timeouts: u32,
    pub unsolicited: u32,
}

/// The co-processor link.
pub struct WifiModule<C> {
    chan: C,
    codec: Codec,
    cfg: LinkConfig,
    outbound: FrameQueue,
    in_flight: Option<InFlight>,
    /// Unrelated frames read during a blocking commit.
    deferred: VecDeque<Frame>,
    rx_buf: [u8; HEADER_LEN + LINK_MAX_PAYLOAD],
    next_id: u32,
    network_ready: bool,
    stats: LinkStats,
}

impl<C: ByteChannel> WifiModule<C> {
    pub fn new(chan: C, cfg: LinkConfig) -> Self {
        info!(
            "Link: up (max payload {}, queue {}, timeout {} ms)",
            cfg.max_payload, cfg.outbound_capacity, cfg.response_timeout_ms
        );
        Self {
            chan,
            codec: Codec::new(&cfg),
            outbound: FrameQueue::new(cfg.outbound_capacity),
            cfg,
            in_flight: None,
            deferred: VecDeque::new(),
            rx_buf: [0; HEADER_LEN + LINK_MAX_PAYLOAD],
            next_id: 0,
            network_ready: false,
            stats: LinkStats::default(),
        }
    }

    pub fn channel(&self) -> &C {
        &self.chan
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.chan
    }

    pub fn config(&self) -> &LinkConfig {
        &self.cfg
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Set once the module reports an association; network clients refuse
    /// to start while it is false.
    pub fn set_network_ready(&mut self, ready: bool) {
        if ready != self.network_ready {
            info!("Link: network {}", if ready { "ready" } else { "down" });
        }
        self.network_ready = ready;
    }

    pub fn is_network_ready(&self) -> bool {
        self.network_ready
    }

    pub fn queued(&self) -> usize {
        self.outbound.len()
    }

    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Whether nothing is queued, in flight or buffered.
    pub fn is_idle(&self) -> bool {
        self.outbound.is_empty() && self.in_flight.is_none() && self.deferred.is_empty()
    }

    fn check_outbound(&self, frame: &Frame) -> Result<()> {
        if frame.direction() != Direction::Tx {
            return Err(StateError::WrongDirection.into());
        }
        if frame.payload().len() > self.codec.max_payload() {
            return Err(ResourceError::PayloadTooLarge(frame.payload().len()).into());
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════
    //  Asynchronous path
    // ═══════════════════════════════════════════════════════════

    /// Queue a frame for transmission.  A rejected frame is dropped
    /// without firing its hook; an accepted one fires it exactly once,
    /// unless aborted.
    pub fn commit_async(&mut self, frame: Frame) -> Result<FrameId> {
        self.check_outbound(&frame)?;
        let id = FrameId(self.next_id);
        let command_id = frame.command_id();
        if self.outbound.push(id, frame).is_err() {
            warn!("Link: outbound queue full, rejecting cmd 0x{:04x}", command_id);
            return Err(ResourceError::QueueFull.into());
        }
        self.next_id = self.next_id.wrapping_add(1);
        debug!("Link: {:?} queued (cmd 0x{:04x})", id, command_id);
        Ok(id)
    }

    /// Cancel a committed frame.
    pub fn abort(&mut self, id: FrameId) -> AbortOutcome {
        if let Some(mut frame) = self.outbound.remove(id) {
            frame.neutralize();
            info!("Link: {:?} unqueued", id);
            return AbortOutcome::Unqueued;
        }
        match self.in_flight.as_mut() {
            Some(inf) if inf.id == id => {
                inf.frame.neutralize();
                info!("Link: {:?} in flight, callback neutralized", id);
                AbortOutcome::Neutralized
            }
            _ => AbortOutcome::NotFound,
        }
    }

    /// Run one protocol step.
    pub fn poll(&mut self, now_ms: u64) -> LinkEvents {
        let mut events = LinkEvents::new();

        if let Some(frame) = self.deferred.pop_front() {
            self.stats.unsolicited += 1;
            let _ = events.push(LinkEvent::Unsolicited(frame));
        }

        if self.chan.has_input() {
            if let Some(event) = self.receive() {
                let _ = events.push(event);
            }
        }

        if let Some(event) = self.check_timeout(now_ms) {
            let _ = events.push(event);
        }

        if self.in_flight.is_none() {
            if let Some(event) = self.transmit_next(now_ms) {
                let _ = events.push(event);
            }
        }

        events
    }

    fn receive(&mut self) -> Option<LinkEvent> {
        let (header, len) = match self.codec.read_frame(&mut self.chan, &mut self.rx_buf) {
            Ok(read) => read,
            Err(e) => {
                error!("Link: inbound read failed: {}", e);
                // The response we were waiting for may be the one lost.
                return self
                    .in_flight
                    .take()
                    .map(|inf| LinkEvent::Completed(self.retire(inf.frame, Err(e))));
            }
        };
        self.stats.received += 1;
        let payload = &self.rx_buf[HEADER_LEN..HEADER_LEN + len];

        match self.in_flight.as_ref().map(|inf| inf.correlate(&header)) {
            None => {
                debug!(
                    "Link: {} for cmd 0x{:04x}, delivering as unsolicited",
                    StateError::NothingInFlight,
                    header.command_id
                );
                unsolicited(&mut self.stats, &header, payload)
            }
            Some(Correlation::Mismatch { expected, got }) => {
                warn!("Link: {}", Error::from(ProtocolError::CommandMismatch { expected, got }));
                unsolicited(&mut self.stats, &header, payload)
            }
            Some(Correlation::Data) => {
                if let Some(inf) = self.in_flight.as_mut() {
                    inf.frame.handle_data(payload);
                }
                None
            }
            Some(Correlation::Response) => {
                let inf = self.in_flight.as_mut()?;
                inf.frame.set_status(header.status);
                let result = if header.status != 0 {
                    Err(Error::Status(header.status))
                } else if inf.frame.handle_response(payload) == Chunk::Last {
                    Ok(())
                } else {
                    return None;
                };
                let inf = self.in_flight.take()?;
                Some(LinkEvent::Completed(self.retire(inf.frame, result)))
            }
        }
    }

    fn check_timeout(&mut self, now_ms: u64) -> Option<LinkEvent> {
        if !self
            .in_flight
            .as_ref()
            .is_some_and(|inf| inf.expired(now_ms, self.cfg.response_timeout_ms))
        {
            return None;
        }
        let inf = self.in_flight.take()?;
        warn!(
            "Link: {:?} (cmd 0x{:04x}) unanswered after {} ms",
            inf.id,
            inf.frame.command_id(),
            self.cfg.response_timeout_ms
        );
        self.stats.timeouts += 1;
        Some(LinkEvent::Completed(
            self.retire(inf.frame, Err(StateError::ResponseTimeout.into())),
        ))
    }

    fn transmit_next(&mut self, now_ms: u64) -> Option<LinkEvent> {
        let (id, frame) = self.outbound.pop()?;
        match self.transmit(&frame) {
            Ok(()) => {
                debug!("Link: {:?} in flight (cmd 0x{:04x})", id, frame.command_id());
                self.in_flight = Some(InFlight {
                    id,
                    frame,
                    sent_at_ms: now_ms,
                });
                None
            }
            Err(e) => {
                error!("Link: {:?} transmit failed: {}", id, e);
                Some(LinkEvent::Completed(self.retire(frame, Err(e))))
            }
        }
    }

    fn transmit(&mut self, frame: &Frame) -> Result<()> {
        self.codec
            .write_frame(&mut self.chan, &frame.header(), frame.payload())?;
        self.stats.sent += 1;
        Ok(())
    }

    fn retire(&mut self, frame: Frame, result: Result<()>) -> Finished {
        match result {
            Ok(()) => {
                self.stats.completed += 1;
                info!("Link: cmd 0x{:04x} completed", frame.command_id());
            }
            Err(e) => {
                self.stats.failed += 1;
                info!("Link: cmd 0x{:04x} failed: {}", frame.command_id(), e);
            }
        }
        frame.finish(result)
    }

    // ═══════════════════════════════════════════════════════════
    //  Blocking path
    // ═══════════════════════════════════════════════════════════

    /// Transmit and wait for the response with bounded polling.
    ///
    /// Fires the frame's hook exactly once before returning, unless the
    /// frame is rejected up front.  Frames for other commands that arrive
    /// meanwhile are delivered by the next [`poll`](Self::poll).
    pub fn commit(&mut self, mut frame: Frame) -> Result<()> {
        self.check_outbound(&frame)?;
        if !self.outbound.is_empty() || self.in_flight.is_some() {
            return Err(StateError::LinkBusy.into());
        }

        if let Err(e) = self.transmit(&frame) {
            error!("Link: blocking commit transmit failed: {}", e);
            return self.retire(frame, Err(e)).fire();
        }

        let result = self.await_response(&mut frame);
        self.retire(frame, result).fire()
    }

    fn await_response(&mut self, frame: &mut Frame) -> Result<()> {
        for _ in 0..self.cfg.sync_poll_budget() {
            if !self.chan.has_input() {
                self.chan.backoff_us(self.cfg.sync_poll_interval_us);
                continue;
            }
            let (header, len) = self.codec.read_frame(&mut self.chan, &mut self.rx_buf)?;
            self.stats.received += 1;
            let payload = &self.rx_buf[HEADER_LEN..HEADER_LEN + len];

            if header.command_id != frame.command_id() {
                debug!(
                    "Link: buffering cmd 0x{:04x} during blocking commit",
                    header.command_id
                );
                match Frame::inbound(&header, payload) {
                    Ok(other) => self.deferred.push_back(other),
                    Err(e) => warn!("Link: dropping inbound frame: {}", e),
                }
                continue;
            }
            match header.kind {
                FrameKind::Data => frame.handle_data(payload),
                FrameKind::Management => {
                    frame.set_status(header.status);
                    if header.status != 0 {
                        return Err(Error::Status(header.status));
                    }
                    if frame.handle_response(payload) == Chunk::Last {
                        return Ok(());
                    }
                }
            }
        }
        warn!("Link: blocking commit cmd 0x{:04x} timed out", frame.command_id());
        self.stats.timeouts += 1;
        Err(StateError::ResponseTimeout.into())
    }
}

fn unsolicited(stats: &mut LinkStats, header: &FrameHeader, payload: &[u8]) -> Option<LinkEvent> {
    match Frame::inbound(header, payload) {
        Ok(frame) => {
            stats.unsolicited += 1;
            Some(LinkEvent::Unsolicited(frame))
        }
        Err(e) => {
            warn!("Link: dropping inbound cmd 0x{:04x}: {}", header.command_id, e);
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Run-loop driver
// ═══════════════════════════════════════════════════════════════

/// Run-loop task polling a shared [`WifiModule`] once per iteration.
pub struct LinkDriver<C, U> {
    module: Rc<RefCell<WifiModule<C>>>,
    on_unsolicited: U,
}

impl<C, U> Task for LinkDriver<C, U>
where
    C: ByteChannel,
    U: FnMut(Frame, &mut Scheduler),
{
    fn poll(&mut self, sched: &mut Scheduler) -> TaskStatus {
        let now = sched.now_ms();
        // Released before any hook runs, so hooks may commit again.
        let events = self.module.borrow_mut().poll(now);
        for event in events {
            match event {
                LinkEvent::Completed(finished) => {
                    let _ = finished.fire();
                }
                LinkEvent::Unsolicited(frame) => (self.on_unsolicited)(frame, sched),
            }
        }
        TaskStatus::Pending
    }
}

/// Register the link driver with the run loop.
pub fn spawn_driver<C, U>(
    sched: &mut Scheduler,
    module: Rc<RefCell<WifiModule<C>>>,
    on_unsolicited: U,
) -> TaskId
where
    C: ByteChannel + 'static,
    U: FnMut(Frame, &mut Scheduler) + 'static,
{
    sched.add(LinkDriver {
        module,
        on_unsolicited,
    })
}
