//! F01: device control. Status, interrupt enables, sleep, soft reset and identity.

use alloc::string::String;

use embedded_hal::delay::DelayNs;

use super::{read_reg, read_regs, write_reg, write_regs, BaseAddresses};
use crate::bus::Transport;
use crate::data_types::DeviceIdentity;
use crate::error::Error;
use crate::registers::{
    sleep_control, DeviceControl, DeviceStatus, F01_BUILD_ID_OFFSET, F01_CMD_RESET, F01_PRODUCT_ID_OFFSET,
    F01_STD_QUERY_LEN, MANUFACTURER_SYNAPTICS, MAX_INTR_REGISTERS, PRODUCT_ID_SIZE, STATUS_POLL_INTERVAL_MS,
};

/// Status byte plus interrupt-source registers as read by the dispatcher.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InterruptStatus {
    pub status: DeviceStatus,
    pub sources: [u8; MAX_INTR_REGISTERS],
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct F01 {
    base: BaseAddresses,
}

impl F01 {
    pub fn new(base: BaseAddresses) -> Self {
        Self { base }
    }

    pub fn base(&self) -> BaseAddresses {
        self.base
    }

    pub fn device_control_addr(&self) -> u16 {
        self.base.control
    }

    /// Interrupt enable register `index` (follows device control).
    pub fn interrupt_enable_addr(&self, index: usize) -> u16 {
        self.base.control + 1 + index as u16
    }

    pub fn read_status<T: Transport>(&self, bus: &mut T) -> Result<DeviceStatus, Error<T::Error>> {
        read_reg(bus, self.base.data).map(DeviceStatus)
    }

    /// Poll while the firmware is recomputing its CRC.
    ///
    /// Returns the settled status and whether any wait was needed; a wait means the
    /// device came out of its bootloader and any layout read so far is stale.
    pub fn check_status<T: Transport, D: DelayNs>(
        &self,
        bus: &mut T,
        delay: &mut D,
        timeout_ms: u32,
    ) -> Result<(DeviceStatus, bool), Error<T::Error>> {
        let mut status = self.read_status(bus)?;
        let mut remaining = timeout_ms;
        let mut waited = false;
        while status.crc_in_progress() {
            if remaining == 0 {
                log::error!("device stuck computing CRC");
                return Err(Error::DeviceUnresponsive);
            }
            delay.delay_ms(STATUS_POLL_INTERVAL_MS);
            remaining = remaining.saturating_sub(STATUS_POLL_INTERVAL_MS);
            waited = true;
            status = self.read_status(bus)?;
        }
        if waited {
            log::info!("device exited bootloader mode");
        }
        Ok((status, waited))
    }

    /// Read status and `registers` interrupt-source bytes in one transaction.
    pub fn read_interrupt_status<T: Transport>(
        &self,
        bus: &mut T,
        registers: usize,
    ) -> Result<InterruptStatus, Error<T::Error>> {
        let mut buf = [0u8; 1 + MAX_INTR_REGISTERS];
        let len = 1 + registers.min(MAX_INTR_REGISTERS);
        read_regs(bus, self.base.data, &mut buf[..len])?;
        let mut sources = [0u8; MAX_INTR_REGISTERS];
        sources.copy_from_slice(&buf[1..]);
        Ok(InterruptStatus {
            status: DeviceStatus(buf[0]),
            sources,
        })
    }

    /// Write `values` to every interrupt-enable register that has a source claimed in `claimed`.
    pub fn write_interrupt_enables<T: Transport>(
        &self,
        bus: &mut T,
        claimed: &[u8],
        values: &[u8],
    ) -> Result<(), Error<T::Error>> {
        for (index, (mask, value)) in claimed.iter().zip(values).enumerate() {
            if *mask == 0 {
                continue;
            }
            write_reg(bus, self.interrupt_enable_addr(index), *value)?;
        }
        Ok(())
    }

    /// Read-modify-write of interrupt-enable bits of a single function.
    pub fn update_interrupt_enable<T: Transport>(
        &self,
        bus: &mut T,
        index: usize,
        mask: u8,
        enable: bool,
    ) -> Result<(), Error<T::Error>> {
        let addr = self.interrupt_enable_addr(index);
        let cur = read_reg(bus, addr)?;
        let new = if enable { cur | mask } else { cur & !mask };
        write_reg(bus, addr, new)
    }

    pub fn read_control<T: Transport>(&self, bus: &mut T) -> Result<u8, Error<T::Error>> {
        read_reg(bus, self.base.control)
    }

    /// Read-modify-write of device control.
    pub fn update_control<T: Transport>(&self, bus: &mut T, mask: u8, value: u8) -> Result<(), Error<T::Error>> {
        let cur = self.read_control(bus)?;
        write_reg(bus, self.base.control, (cur & !mask) | (value & mask))
    }

    /// Tell the firmware the host has configured it, which starts interrupt generation.
    pub fn set_configured<T: Transport>(&self, bus: &mut T) -> Result<(), Error<T::Error>> {
        let bit = DeviceControl::CONFIGURED.bits();
        self.update_control(bus, bit, bit)
    }

    pub fn set_sleep<T: Transport>(&self, bus: &mut T, sleep: bool, no_sleep: bool) -> Result<(), Error<T::Error>> {
        let cur = self.read_control(bus)?;
        write_reg(bus, self.base.control, sleep_control(cur, sleep, no_sleep))
    }

    pub fn set_charger<T: Transport>(&self, bus: &mut T, connected: bool) -> Result<(), Error<T::Error>> {
        let bit = DeviceControl::CHARGER.bits();
        self.update_control(bus, bit, if connected { bit } else { 0 })
    }

    /// Issue the soft-reset command; caller waits for the device to settle.
    pub fn soft_reset<T: Transport>(&self, bus: &mut T) -> Result<(), Error<T::Error>> {
        write_regs(bus, self.base.command, &[F01_CMD_RESET])
    }

    pub fn read_identity<T: Transport>(&self, bus: &mut T) -> Result<DeviceIdentity, Error<T::Error>> {
        let mut query = [0u8; F01_STD_QUERY_LEN];
        read_regs(bus, self.base.query, &mut query)?;
        let mut build_id = [0u8; 3];
        read_regs(bus, self.base.query + F01_BUILD_ID_OFFSET, &mut build_id)?;

        let raw_id = &query[F01_PRODUCT_ID_OFFSET..F01_PRODUCT_ID_OFFSET + PRODUCT_ID_SIZE];
        let product_id: String = raw_id
            .iter()
            .take_while(|b| **b != 0)
            .map(|b| *b as char)
            .collect();

        let identity = DeviceIdentity {
            manufacturer_id: query[0],
            product_props: query[1],
            product_info: [query[2], query[3]],
            product_id,
            firmware_id: u32::from_le_bytes([build_id[0], build_id[1], build_id[2], 0]),
            flash_prog: false,
        };
        if identity.manufacturer_id != MANUFACTURER_SYNAPTICS {
            log::warn!("non-Synaptics device, manufacturer id {}", identity.manufacturer_id);
        }
        Ok(identity)
    }
}
