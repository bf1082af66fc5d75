//! Bus access seam: paged 16-bit register addressing and board power hooks.

use alloc::vec::Vec;

use embedded_hal::digital::OutputPin;

use crate::registers::{DEFAULT_I2C_ADDRESS, PAGE_SELECT_REGISTER};

/// Byte-range access at 16-bit RMI addresses (`page << 8 | offset`).
pub trait Transport {
    type Error: core::fmt::Debug;

    fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error>;

    fn write(&mut self, addr: u16, data: &[u8]) -> Result<(), Self::Error>;

    /// Forget any cached page selection; the next access re-selects.
    fn invalidate_page(&mut self) {}
}

impl<T: Transport + ?Sized> Transport for &mut T {
    type Error = T::Error;

    fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        (**self).read(addr, buf)
    }

    fn write(&mut self, addr: u16, data: &[u8]) -> Result<(), Self::Error> {
        (**self).write(addr, data)
    }

    fn invalidate_page(&mut self) {
        (**self).invalidate_page()
    }
}

/// RMI over I2C: an 8-bit register pointer plus a page-select register.
pub struct I2cTransport<I2C> {
    i2c: I2C,
    address: u8,
    page: Option<u8>,
}

impl<I2C> I2cTransport<I2C> {
    /// Create a transport at the default address (0x20).
    pub fn new(i2c: I2C) -> Self {
        Self::with_address(i2c, DEFAULT_I2C_ADDRESS)
    }

    pub fn with_address(i2c: I2C, address: u8) -> Self {
        Self {
            i2c,
            address,
            page: None,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Page the device is believed to have selected, if known.
    pub fn current_page(&self) -> Option<u8> {
        self.page
    }

    /// Release the underlying bus.
    pub fn free(self) -> I2C {
        self.i2c
    }
}

impl<I2C> I2cTransport<I2C>
where
    I2C: embedded_hal::i2c::I2c,
{
    fn select_page(&mut self, addr: u16) -> Result<(), I2C::Error> {
        let page = (addr >> 8) as u8;
        if self.page == Some(page) {
            return Ok(());
        }
        match self.i2c.write(self.address, &[PAGE_SELECT_REGISTER, page]) {
            Ok(()) => {
                self.page = Some(page);
                Ok(())
            }
            Err(e) => {
                self.page = None;
                Err(e)
            }
        }
    }
}

impl<I2C> Transport for I2cTransport<I2C>
where
    I2C: embedded_hal::i2c::I2c,
{
    type Error = I2C::Error;

    fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.select_page(addr)?;
        self.i2c.write_read(self.address, &[addr as u8], buf)
    }

    fn write(&mut self, addr: u16, data: &[u8]) -> Result<(), Self::Error> {
        self.select_page(addr)?;
        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.push(addr as u8);
        frame.extend_from_slice(data);
        self.i2c.write(self.address, &frame)
    }

    fn invalidate_page(&mut self) {
        self.page = None;
    }
}

/// Board hooks for rails, the reset line and interrupt wake.
pub trait PowerControl {
    fn set_power(&mut self, _on: bool) {}

    /// Drive the reset line; `true` holds the controller in reset.
    fn set_reset(&mut self, _asserted: bool) {}

    /// Let the attention interrupt wake the host while suspended.
    fn set_irq_wake(&mut self, _enabled: bool) {}
}

/// Boards where power and reset are handled elsewhere.
impl PowerControl for () {}

/// Active-low reset line on a GPIO.
pub struct ResetPin<P>(pub P);

impl<P: OutputPin> PowerControl for ResetPin<P> {
    fn set_reset(&mut self, asserted: bool) {
        let res = if asserted { self.0.set_low() } else { self.0.set_high() };
        if res.is_err() {
            log::warn!("failed to drive reset line (asserted={})", asserted);
        }
    }
}
