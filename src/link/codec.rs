//! Command framing codec for the module link.
//!
//! Every transfer starts with a control prefix, answered by the peer with
//! a status byte echoed on the last prefix byte:
//!
//! ```text
//!  C1  ┌───┬───┬───┬───┬───┬───┬───────┐
//!      │ - │cmd│ rd│reg│frm│len│ fixed │   bit6..bit0
//!      └───┴───┴───┴───┴───┴───┴───────┘
//!  C2  ┌───┬───┬───────────────────────┐
//!      │ - │wrd│   register select     │
//!      └───┴───┴───────────────────────┘
//!  C3/C4  explicit length, LE (only when C1.len is set)
//! ```
//!
//! followed by a 16-byte frame header and a payload padded to 4 bytes:
//!
//! ```text
//! ┌────────────┬───────────┬──────────────┬────────┬──────────┐
//! │ LengthType │ CommandId │ reserved (8) │ status │ rsvd (2) │
//! │ u16 LE     │ u16 LE    │              │ u16 LE │          │
//! └────────────┴───────────┴──────────────┴────────┴──────────┘
//!   LengthType: low 12 bits = unpadded payload length,
//!               top nibble  = 0x4 management / 0x5 data
//! ```
//!
//! Read path: descriptor read (C1/C2), START_TOKEN, 4-byte descriptor,
//! frame read (C1..C4), START_TOKEN, dummy bytes, frame bytes.
//! Write path: C1..C4 declaring the padded size, then header and payload
//! as little-endian words.  Any non-success control status aborts.

use log::{debug, error, trace, warn};

use super::transport::ByteChannel;
use crate::config::LinkConfig;
use crate::error::{Error, ProtocolError, ResourceError, Result, TransportError};

// ═══════════════════════════════════════════════════════════════
//  Wire constants
// ═══════════════════════════════════════════════════════════════

/// Control step accepted.
pub const SUCCESS: u8 = 0x58;
/// Control step rejected.
pub const FAILURE: u8 = 0x52;
/// Peer is ready to stream the requested bytes.
pub const START_TOKEN: u8 = 0x55;
/// Peer cannot accept the step yet; retry after backoff.
pub const BUSY: u8 = 0x54;

/// Frame header size on the wire.
pub const HEADER_LEN: usize = 16;
/// Frame descriptor size on the wire.
pub const DESCRIPTOR_LEN: usize = 4;

const TYPE_MANAGEMENT: u16 = 0x4;
const TYPE_DATA: u16 = 0x5;
const LENGTH_MASK: u16 = 0x0FFF;

/// C1 bits.
pub mod c1 {
    pub const COMMAND: u8 = 1 << 6;
    pub const READ: u8 = 1 << 5;
    pub const REGISTER: u8 = 1 << 4;
    pub const FRAME: u8 = 1 << 3;
    pub const LENGTH_SELECT: u8 = 1 << 2;
    pub const FIXED_LEN_MASK: u8 = 0b11;
}

/// C2 bits and registers.
pub mod c2 {
    pub const WORD: u8 = 1 << 6;
    pub const REGISTER_MASK: u8 = 0x3F;

    pub const FRAME_DESCRIPTOR: u8 = 0x01;
    pub const FRAME_DATA: u8 = 0x02;
}

/// Byte count encoded by the C1 fixed-length code.
pub const fn fixed_len(code: u8) -> usize {
    match code & c1::FIXED_LEN_MASK {
        0 => 1,
        1 => 2,
        2 => 4,
        _ => 16,
    }
}

/// Round up to the 4-byte wire boundary.
pub const fn pad4(len: usize) -> usize {
    (len + 3) & !3
}

// ═══════════════════════════════════════════════════════════════
//  Control prefix
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlPrefix {
    pub c1: u8,
    pub c2: u8,
    /// C3/C4; present exactly when `c1` has `LENGTH_SELECT`.
    pub length: Option<u16>,
}

impl ControlPrefix {
    /// Register read of the 4-byte frame descriptor.
    pub const fn read_descriptor() -> Self {
        Self {
            c1: c1::COMMAND | c1::READ | c1::REGISTER | 2,
            c2: c2::FRAME_DESCRIPTOR,
            length: None,
        }
    }

    /// Byte-granular frame read of `len` bytes (dummy bytes included).
    pub const fn read_frame(len: u16) -> Self {
        Self {
            c1: c1::COMMAND | c1::READ | c1::FRAME | c1::LENGTH_SELECT,
            c2: c2::FRAME_DATA,
            length: Some(len),
        }
    }

    /// Word-granular frame write of `len` bytes (a multiple of 4).
    pub const fn write_frame(len: u16) -> Self {
        Self {
            c1: c1::COMMAND | c1::FRAME | c1::LENGTH_SELECT,
            c2: c2::WORD | c2::FRAME_DATA,
            length: Some(len),
        }
    }

    pub fn is_read(&self) -> bool {
        self.c1 & c1::READ != 0
    }

    pub fn register(&self) -> u8 {
        self.c2 & c2::REGISTER_MASK
    }

    /// Bytes the step transfers after the prefix.
    pub fn transfer_len(&self) -> usize {
        match self.length {
            Some(len) => usize::from(len),
            None => fixed_len(self.c1),
        }
    }

    pub fn encode(&self) -> heapless::Vec<u8, 4> {
        let mut out = heapless::Vec::new();
        // Capacity 4 always fits.
        let _ = out.push(self.c1);
        let _ = out.push(self.c2);
        if let Some(len) = self.length {
            let _ = out.extend_from_slice(&len.to_le_bytes());
        }
        out
    }

    /// Parse C1 and C2; the caller supplies C3/C4 if `needs_length`.
    pub fn decode(c1_byte: u8, c2_byte: u8, length: Option<u16>) -> Option<Self> {
        if c1_byte & c1::COMMAND == 0 {
            return None;
        }
        if Self::needs_length(c1_byte) != length.is_some() {
            return None;
        }
        Some(Self {
            c1: c1_byte,
            c2: c2_byte,
            length,
        })
    }

    pub fn needs_length(c1_byte: u8) -> bool {
        c1_byte & c1::LENGTH_SELECT != 0
    }
}

// ═══════════════════════════════════════════════════════════════
//  Frame header and descriptor
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Management,
    Data,
}

impl FrameKind {
    const fn nibble(self) -> u16 {
        match self {
            Self::Management => TYPE_MANAGEMENT,
            Self::Data => TYPE_DATA,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    /// Unpadded payload length.
    pub length: u16,
    pub command_id: u16,
    pub status: u16,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let length_type = (self.kind.nibble() << 12) | (self.length & LENGTH_MASK);
        out[0..2].copy_from_slice(&length_type.to_le_bytes());
        out[2..4].copy_from_slice(&self.command_id.to_le_bytes());
        out[12..14].copy_from_slice(&self.status.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(ResourceError::BufferTooSmall {
                needed: HEADER_LEN,
                available: bytes.len(),
            }
            .into());
        }
        let length_type = u16::from_le_bytes([bytes[0], bytes[1]]);
        let kind = match length_type >> 12 {
            TYPE_MANAGEMENT => FrameKind::Management,
            TYPE_DATA => FrameKind::Data,
            other => return Err(ProtocolError::BadFrameType(other as u8).into()),
        };
        Ok(Self {
            kind,
            length: length_type & LENGTH_MASK,
            command_id: u16::from_le_bytes([bytes[2], bytes[3]]),
            status: u16::from_le_bytes([bytes[12], bytes[13]]),
        })
    }
}

/// Announces the size of the next inbound frame.
///
/// `[wire_len lo, wire_len hi, dummy, 0]`: `wire_len` covers header and
/// padded payload; `dummy` alignment bytes precede them in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub wire_len: u16,
    pub dummy: u8,
}

impl FrameDescriptor {
    pub fn encode(&self) -> [u8; DESCRIPTOR_LEN] {
        let [lo, hi] = self.wire_len.to_le_bytes();
        [lo, hi, self.dummy, 0]
    }

    pub fn decode(bytes: [u8; DESCRIPTOR_LEN]) -> Result<Self> {
        let wire_len = u16::from_le_bytes([bytes[0], bytes[1]]);
        if usize::from(wire_len) < HEADER_LEN {
            return Err(ProtocolError::BadDescriptor.into());
        }
        Ok(Self {
            wire_len,
            dummy: bytes[2],
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Codec
// ═══════════════════════════════════════════════════════════════

fn bus<E: core::fmt::Debug>(e: E) -> Error {
    error!("Codec: bus error: {:?}", e);
    TransportError::Bus.into()
}

/// Drives the control steps and frame transfers over a [`ByteChannel`].
#[derive(Debug, Clone)]
pub struct Codec {
    busy_retry_limit: u16,
    busy_backoff_us: u32,
    start_token_retries: u16,
    max_payload: usize,
}

impl Codec {
    pub fn new(cfg: &LinkConfig) -> Self {
        Self {
            busy_retry_limit: cfg.busy_retry_limit,
            busy_backoff_us: cfg.busy_backoff_us,
            start_token_retries: cfg.start_token_retries,
            max_payload: cfg.max_payload,
        }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Send C1/C2 and return the number of BUSY retries it took.
    pub fn send_c1c2<C: ByteChannel>(&self, ch: &mut C, c1: u8, c2: u8) -> Result<u16> {
        self.exchange(ch, &[c1, c2])
    }

    /// Send a full control prefix; the status is checked on its last byte.
    pub fn send_control<C: ByteChannel>(&self, ch: &mut C, prefix: &ControlPrefix) -> Result<u16> {
        self.exchange(ch, &prefix.encode())
    }

    fn exchange<C: ByteChannel>(&self, ch: &mut C, bytes: &[u8]) -> Result<u16> {
        let mut retries = 0u16;
        loop {
            let mut status = 0;
            for &b in bytes {
                status = ch.write_byte(b).map_err(bus)?;
            }
            match status {
                SUCCESS => {
                    if retries > 0 {
                        debug!("Codec: control step accepted after {} BUSY", retries);
                    }
                    return Ok(retries);
                }
                BUSY => {
                    if retries >= self.busy_retry_limit {
                        warn!("Codec: peer BUSY past {} retries", self.busy_retry_limit);
                        return Err(TransportError::BusyRetriesExhausted.into());
                    }
                    retries += 1;
                    ch.backoff_us(self.busy_backoff_us);
                }
                other => {
                    warn!("Codec: control step answered 0x{:02x}", other);
                    return Err(TransportError::BadStatus(other).into());
                }
            }
        }
    }

    /// Clock dummy bytes until the peer answers START_TOKEN.
    pub fn await_start_token<C: ByteChannel>(&self, ch: &mut C) -> Result<u16> {
        for attempt in 0..self.start_token_retries {
            if ch.write_byte(0x00).map_err(bus)? == START_TOKEN {
                trace!("Codec: START_TOKEN after {} polls", attempt);
                return Ok(attempt);
            }
        }
        warn!("Codec: no START_TOKEN in {} polls", self.start_token_retries);
        Err(TransportError::StartTokenTimeout.into())
    }

    fn read_into<C: ByteChannel>(ch: &mut C, buf: &mut [u8]) -> Result<()> {
        for b in buf.iter_mut() {
            *b = ch.write_byte(0x00).map_err(bus)?;
        }
        Ok(())
    }

    pub fn read_descriptor<C: ByteChannel>(&self, ch: &mut C) -> Result<FrameDescriptor> {
        self.send_control(ch, &ControlPrefix::read_descriptor())?;
        self.await_start_token(ch)?;
        let mut raw = [0u8; DESCRIPTOR_LEN];
        Self::read_into(ch, &mut raw)?;
        FrameDescriptor::decode(raw)
    }

    /// Read one inbound frame into `buf` (header followed by payload).
    /// Returns the header and the unpadded payload length; the payload is
    /// `buf[HEADER_LEN..HEADER_LEN + len]`.
    pub fn read_frame<C: ByteChannel>(
        &self,
        ch: &mut C,
        buf: &mut [u8],
    ) -> Result<(FrameHeader, usize)> {
        let desc = self.read_descriptor(ch)?;
        let wire_len = usize::from(desc.wire_len);
        let total = desc.wire_len.saturating_add(u16::from(desc.dummy));
        self.send_control(ch, &ControlPrefix::read_frame(total))?;
        self.await_start_token(ch)?;

        if wire_len > buf.len() {
            // The peer only drops a frame once it is clocked out.
            warn!(
                "Codec: discarding {} byte frame, buffer holds {}",
                wire_len,
                buf.len()
            );
            for _ in 0..total {
                ch.write_byte(0x00).map_err(bus)?;
            }
            return Err(ResourceError::BufferTooSmall {
                needed: wire_len,
                available: buf.len(),
            }
            .into());
        }

        for _ in 0..desc.dummy {
            ch.write_byte(0x00).map_err(bus)?;
        }
        Self::read_into(ch, &mut buf[..wire_len])?;

        let header = FrameHeader::decode(&buf[..HEADER_LEN])?;
        let len = usize::from(header.length);
        if HEADER_LEN + len > wire_len {
            return Err(ProtocolError::BadDescriptor.into());
        }
        trace!(
            "Codec: read frame cmd=0x{:04x} len={} status={}",
            header.command_id, len, header.status
        );
        Ok((header, len))
    }

    /// Write one outbound frame.  `header.length` is taken from `payload`.
    pub fn write_frame<C: ByteChannel>(
        &self,
        ch: &mut C,
        header: &FrameHeader,
        payload: &[u8],
    ) -> Result<()> {
        if payload.len() > self.max_payload {
            return Err(ResourceError::PayloadTooLarge(payload.len()).into());
        }
        let header = FrameHeader {
            length: payload.len() as u16,
            ..*header
        };
        let wire_len = HEADER_LEN + pad4(payload.len());
        self.send_control(ch, &ControlPrefix::write_frame(wire_len as u16))?;

        for word in header.encode().chunks_exact(4) {
            ch.write_word(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
                .map_err(bus)?;
        }
        for chunk in payload.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            ch.write_word(u32::from_le_bytes(word)).map_err(bus)?;
        }
        trace!(
            "Codec: wrote frame cmd=0x{:04x} len={}",
            header.command_id, header.length
        );
        Ok(())
    }
}
