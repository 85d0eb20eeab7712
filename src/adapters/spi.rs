//! SPI byte channel.
//!
//! Implements [`ByteChannel`] over any `embedded-hal` 1.0 `SpiDevice`, a
//! data-ready `InputPin` and a `DelayNs` for BUSY backoff.  The device owns
//! chip select: every byte or word exchange is one transaction, framed by
//! CS.  Input is pending when the module's IRQ flag was raised or the
//! data-ready line is asserted.

use std::sync::Arc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::InputPin;
use embedded_hal::spi::SpiDevice;
use log::warn;

use crate::link::transport::{ByteChannel, IrqSignal};

pub struct SpiChannel<S, P, D> {
    spi: S,
    data_ready: P,
    delay: D,
    /// Data-ready line is asserted low.
    active_low: bool,
    irq: Option<Arc<IrqSignal>>,
}

impl<S, P, D> SpiChannel<S, P, D>
where
    S: SpiDevice<u8>,
    P: InputPin,
    D: DelayNs,
{
    pub fn new(spi: S, data_ready: P, delay: D, active_low: bool) -> Self {
        Self {
            spi,
            data_ready,
            delay,
            active_low,
            irq: None,
        }
    }

    /// Also treat a raised IRQ flag as pending input.
    pub fn with_irq(mut self, irq: Arc<IrqSignal>) -> Self {
        self.irq = Some(irq);
        self
    }

    pub fn release(self) -> (S, P, D) {
        (self.spi, self.data_ready, self.delay)
    }

    fn data_ready(&mut self) -> bool {
        let level = if self.active_low {
            self.data_ready.is_low()
        } else {
            self.data_ready.is_high()
        };
        level.unwrap_or_else(|e| {
            warn!("Link: data-ready read failed: {:?}", e);
            false
        })
    }
}

impl<S, P, D> ByteChannel for SpiChannel<S, P, D>
where
    S: SpiDevice<u8>,
    P: InputPin,
    D: DelayNs,
{
    type Error = S::Error;

    fn write_byte(&mut self, value: u8) -> Result<u8, S::Error> {
        let mut buf = [value];
        self.spi.transfer_in_place(&mut buf)?;
        Ok(buf[0])
    }

    fn write_word(&mut self, value: u32) -> Result<u32, S::Error> {
        let mut buf = value.to_le_bytes();
        self.spi.transfer_in_place(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn has_input(&mut self) -> bool {
        let irq = self.irq.as_ref().is_some_and(|irq| irq.take());
        irq || self.data_ready()
    }

    fn backoff_us(&mut self, us: u32) {
        self.delay.delay_us(us);
    }
}
