//! Transport byte channel: the narrow synchronous capability the link
//! needs from the physical bus.
//!
//! The bus is full-duplex at the wire level and half-duplex at the
//! protocol level: every byte written clocks one byte back.  During
//! control steps the returned byte is the peer's status; during a read
//! the link writes dummy bytes and keeps what comes back.
//!
//! Implementations:
//! - [`crate::adapters::spi::SpiChannel`]: `embedded-hal` SPI device
//! - [`crate::adapters::sim_module::SimulatedModule`]: in-process peer model

use core::sync::atomic::{AtomicBool, Ordering};

/// Synchronous byte/word exchange with the module.
pub trait ByteChannel {
    /// Error type for this channel.
    type Error: core::fmt::Debug;

    /// Clock one byte out and return the byte clocked in.
    fn write_byte(&mut self, value: u8) -> Result<u8, Self::Error>;

    /// Clock one little-endian 32-bit word out and return the word
    /// clocked in.
    fn write_word(&mut self, value: u32) -> Result<u32, Self::Error> {
        let mut echoed = [0u8; 4];
        for (out, b) in echoed.iter_mut().zip(value.to_le_bytes()) {
            *out = self.write_byte(b)?;
        }
        Ok(u32::from_le_bytes(echoed))
    }

    /// Whether the module has a frame ready for us.
    fn has_input(&mut self) -> bool;

    /// Wait before retrying after a BUSY status.
    fn backoff_us(&mut self, us: u32);
}

/// A channel with no peer: echoes zeros and never has input.
pub struct NullChannel;

impl ByteChannel for NullChannel {
    type Error = ();

    fn write_byte(&mut self, _value: u8) -> Result<u8, ()> {
        Ok(0)
    }

    fn has_input(&mut self) -> bool {
        false
    }

    fn backoff_us(&mut self, _us: u32) {}
}

/// Data-ready flag raised by the module's SPI interrupt.
///
/// The ISR only sets the flag; protocol work happens on the next run-loop
/// iteration when the link driver consumes it.
#[derive(Debug, Default)]
pub struct IrqSignal {
    raised: AtomicBool,
}

impl IrqSignal {
    pub const fn new() -> Self {
        Self {
            raised: AtomicBool::new(false),
        }
    }

    /// ISR entry point.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    /// Read and clear.
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::AcqRel)
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}
