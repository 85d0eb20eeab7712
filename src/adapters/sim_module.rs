//! Simulated WiFi co-processor.
//!
//! A byte-level model of the peer firmware's side of the link, used by the
//! host binary and the test suites in place of real SPI hardware.  It
//! answers control steps, streams queued frames through the descriptor /
//! START_TOKEN read sequence and collects the frames the host writes.
//!
//! ```text
//!   Idle ──C1──▶ AwaitC2 ──C2──▶ (AwaitC3 ──▶ AwaitC4) ──status──┬─▶ Streaming ─▶ Idle
//!                                                              └─▶ Receiving ─▶ Idle
//! ```
//!
//! Knobs:
//! - `set_busy(n)`: answer the next `n` control steps with BUSY
//! - `set_token_delay(n)`: dummy polls before START_TOKEN
//! - `set_dummy_bytes(n)`: alignment bytes declared in each descriptor
//! - `fail_next_control(status)`: answer one control step with `status`
//! - `set_responder(f)`: called for every frame the host writes

use std::collections::VecDeque;

use log::{debug, trace, warn};

use crate::link::codec::{
    BUSY, ControlPrefix, FAILURE, FrameDescriptor, FrameHeader, FrameKind, HEADER_LEN,
    START_TOKEN, SUCCESS, c2, pad4,
};
use crate::link::transport::ByteChannel;

/// A frame the host wrote to the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFrame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

type Responder = Box<dyn FnMut(&ReceivedFrame, &mut SimulatedModule)>;

enum Phase {
    Idle,
    AwaitC2 { c1: u8 },
    AwaitC3 { c1: u8, c2: u8 },
    AwaitC4 { c1: u8, c2: u8, lo: u8 },
    Streaming {
        out: VecDeque<u8>,
        token_wait: u16,
        started: bool,
        pops_frame: bool,
    },
    Receiving { remaining: usize, buf: Vec<u8> },
}

pub struct SimulatedModule {
    phase: Phase,
    busy_budget: u32,
    fail_next: Option<u8>,
    token_delay: u16,
    dummy_bytes: u8,
    /// Wire images (header + padded payload) waiting for the host.
    outbound: VecDeque<Vec<u8>>,
    received: Vec<ReceivedFrame>,
    responder: Option<Responder>,
    control_steps: u32,
    backoffs: u32,
}

impl Default for SimulatedModule {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedModule {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            busy_budget: 0,
            fail_next: None,
            token_delay: 0,
            dummy_bytes: 0,
            outbound: VecDeque::new(),
            received: Vec::new(),
            responder: None,
            control_steps: 0,
            backoffs: 0,
        }
    }

    pub fn set_busy(&mut self, steps: u32) {
        self.busy_budget = steps;
    }

    pub fn set_token_delay(&mut self, polls: u16) {
        self.token_delay = polls;
    }

    pub fn set_dummy_bytes(&mut self, n: u8) {
        self.dummy_bytes = n;
    }

    pub fn fail_next_control(&mut self, status: u8) {
        self.fail_next = Some(status);
    }

    pub fn set_responder<F>(&mut self, f: F)
    where
        F: FnMut(&ReceivedFrame, &mut SimulatedModule) + 'static,
    {
        self.responder = Some(Box::new(f));
    }

    /// Queue a management response.
    pub fn queue_response(&mut self, command_id: u16, status: u16, payload: &[u8]) {
        self.queue_frame(FrameKind::Management, command_id, status, payload);
    }

    /// Queue a data frame.
    pub fn queue_data(&mut self, command_id: u16, payload: &[u8]) {
        self.queue_frame(FrameKind::Data, command_id, 0, payload);
    }

    fn queue_frame(&mut self, kind: FrameKind, command_id: u16, status: u16, payload: &[u8]) {
        let header = FrameHeader {
            kind,
            length: payload.len() as u16,
            command_id,
            status,
        };
        let mut wire = header.encode().to_vec();
        wire.extend_from_slice(payload);
        wire.resize(HEADER_LEN + pad4(payload.len()), 0);
        self.queue_raw(wire);
    }

    /// Queue an arbitrary wire image (at least a header's worth).
    pub fn queue_raw(&mut self, wire: Vec<u8>) {
        trace!("Sim: queued {} byte frame", wire.len());
        self.outbound.push_back(wire);
    }

    pub fn pending_frames(&self) -> usize {
        self.outbound.len()
    }

    pub fn received(&self) -> &[ReceivedFrame] {
        &self.received
    }

    pub fn take_received(&mut self) -> Vec<ReceivedFrame> {
        std::mem::take(&mut self.received)
    }

    /// Control steps answered so far (BUSY answers included).
    pub fn control_steps(&self) -> u32 {
        self.control_steps
    }

    pub fn backoffs(&self) -> u32 {
        self.backoffs
    }

    /// Drop any transfer in progress.
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
    }

    fn finish_control(&mut self, c1: u8, c2_byte: u8, length: Option<u16>) -> u8 {
        self.control_steps += 1;
        self.phase = Phase::Idle;
        if self.busy_budget > 0 {
            self.busy_budget -= 1;
            return BUSY;
        }
        if let Some(status) = self.fail_next.take() {
            return status;
        }
        let Some(prefix) = ControlPrefix::decode(c1, c2_byte, length) else {
            warn!("Sim: malformed control prefix {:02x} {:02x}", c1, c2_byte);
            return FAILURE;
        };

        match (prefix.is_read(), prefix.register(), prefix.length) {
            (true, c2::FRAME_DESCRIPTOR, None) => {
                let Some(front) = self.outbound.front() else {
                    return FAILURE;
                };
                let desc = FrameDescriptor {
                    wire_len: front.len() as u16,
                    dummy: self.dummy_bytes,
                };
                self.stream(desc.encode().to_vec(), false);
                SUCCESS
            }
            (true, c2::FRAME_DATA, Some(len)) => {
                let Some(front) = self.outbound.front() else {
                    return FAILURE;
                };
                let expected = front.len() + usize::from(self.dummy_bytes);
                if usize::from(len) != expected {
                    warn!("Sim: frame read of {} bytes, expected {}", len, expected);
                    return FAILURE;
                }
                let mut out = vec![0u8; usize::from(self.dummy_bytes)];
                out.extend_from_slice(front);
                self.stream(out, true);
                SUCCESS
            }
            (false, c2::FRAME_DATA, Some(len)) if len > 0 => {
                self.phase = Phase::Receiving {
                    remaining: usize::from(len),
                    buf: Vec::with_capacity(usize::from(len)),
                };
                SUCCESS
            }
            _ => FAILURE,
        }
    }

    fn stream(&mut self, bytes: Vec<u8>, pops_frame: bool) {
        self.phase = Phase::Streaming {
            out: bytes.into(),
            token_wait: self.token_delay,
            started: false,
            pops_frame,
        };
    }

    fn frame_written(&mut self, buf: &[u8]) {
        let header = match FrameHeader::decode(buf) {
            Ok(h) => h,
            Err(e) => {
                warn!("Sim: host wrote undecodable frame: {}", e);
                return;
            }
        };
        let end = (HEADER_LEN + usize::from(header.length)).min(buf.len());
        let frame = ReceivedFrame {
            header,
            payload: buf[HEADER_LEN..end].to_vec(),
        };
        debug!(
            "Sim: received cmd 0x{:04x} ({} bytes)",
            header.command_id,
            frame.payload.len()
        );
        if let Some(mut responder) = self.responder.take() {
            responder(&frame, self);
            if self.responder.is_none() {
                self.responder = Some(responder);
            }
        }
        self.received.push(frame);
    }
}

impl ByteChannel for SimulatedModule {
    type Error = core::convert::Infallible;

    fn write_byte(&mut self, value: u8) -> Result<u8, Self::Error> {
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        let reply = match phase {
            Phase::Idle => {
                self.phase = Phase::AwaitC2 { c1: value };
                0
            }
            Phase::AwaitC2 { c1 } => {
                if ControlPrefix::needs_length(c1) {
                    self.phase = Phase::AwaitC3 { c1, c2: value };
                    0
                } else {
                    self.finish_control(c1, value, None)
                }
            }
            Phase::AwaitC3 { c1, c2 } => {
                self.phase = Phase::AwaitC4 { c1, c2, lo: value };
                0
            }
            Phase::AwaitC4 { c1, c2, lo } => {
                self.finish_control(c1, c2, Some(u16::from_le_bytes([lo, value])))
            }
            Phase::Streaming {
                mut out,
                token_wait,
                started,
                pops_frame,
            } => {
                if !started {
                    self.phase = if token_wait > 0 {
                        Phase::Streaming {
                            out,
                            token_wait: token_wait - 1,
                            started: false,
                            pops_frame,
                        }
                    } else {
                        Phase::Streaming {
                            out,
                            token_wait: 0,
                            started: true,
                            pops_frame,
                        }
                    };
                    return Ok(if token_wait > 0 { 0 } else { START_TOKEN });
                }
                let byte = out.pop_front().unwrap_or(0);
                if out.is_empty() {
                    if pops_frame {
                        self.outbound.pop_front();
                    }
                } else {
                    self.phase = Phase::Streaming {
                        out,
                        token_wait,
                        started,
                        pops_frame,
                    };
                }
                byte
            }
            Phase::Receiving { remaining, mut buf } => {
                buf.push(value);
                if remaining <= 1 {
                    self.frame_written(&buf);
                } else {
                    self.phase = Phase::Receiving {
                        remaining: remaining - 1,
                        buf,
                    };
                }
                0
            }
        };
        Ok(reply)
    }

    fn has_input(&mut self) -> bool {
        matches!(self.phase, Phase::Idle) && !self.outbound.is_empty()
    }

    fn backoff_us(&mut self, _us: u32) {
        self.backoffs += 1;
    }
}
