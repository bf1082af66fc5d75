//! F1A: 0-D capacitive buttons.

use alloc::vec::Vec;

use super::{alloc_buffer, read_regs, BaseAddresses, ReportContext};
use crate::bus::Transport;
use crate::data_types::Config;
use crate::error::Error;
use crate::event::{Event, Frame};
use crate::registers::{ButtonCaps, F1A_QUERY_LEN};

#[derive(Debug)]
pub struct F1a {
    base: BaseAddresses,
    max_count: u8,
    caps: ButtonCaps,
    valid_count: u8,
    map: Vec<u16>,
    tx_rx_map: Vec<u8>,
    bitmap: Vec<u8>,
    /// Last state read from the device, per button.
    raw: Vec<bool>,
    /// Last state delivered to the sink, per button.
    delivered: Vec<bool>,
}

impl F1a {
    pub fn init<T: Transport>(bus: &mut T, base: BaseAddresses, config: &Config) -> Result<Self, Error<T::Error>> {
        let mut query = [0u8; F1A_QUERY_LEN];
        read_regs(bus, base.query, &mut query)?;
        let max_count = (query[0] & 0x07) + 1;
        let caps = ButtonCaps::from_bits_truncate(query[1]);

        let tx_rx_map = if caps.contains(ButtonCaps::TX_RX_MAP) {
            let offset = [ButtonCaps::GENERAL_CONTROL, ButtonCaps::INTERRUPT_ENABLE, ButtonCaps::MULTIBUTTON]
                .iter()
                .filter(|cap| caps.contains(**cap))
                .count() as u16;
            let mut map = alloc_buffer(max_count as usize * 2)?;
            read_regs(bus, base.control + offset, &mut map)?;
            map
        } else {
            Vec::new()
        };

        if config.button_map.is_empty() {
            log::error!("F1A present but no button map configured");
            return Err(Error::InvalidConfig);
        }
        if config.button_map.len() != max_count as usize {
            log::warn!(
                "F1A reports {} buttons, {} mapped",
                max_count,
                config.button_map.len()
            );
        }
        let valid_count = max_count.min(config.button_map.len() as u8);
        let mut map = Vec::new();
        map.try_reserve_exact(valid_count as usize)
            .map_err(|_| Error::AllocationFailure)?;
        map.extend_from_slice(&config.button_map[..valid_count as usize]);

        let bitmap = alloc_buffer((max_count as usize).div_ceil(8))?;
        let mut raw = Vec::new();
        raw.try_reserve_exact(valid_count as usize)
            .map_err(|_| Error::AllocationFailure)?;
        raw.resize(valid_count as usize, false);
        let delivered = raw.clone();

        Ok(Self {
            base,
            max_count,
            caps,
            valid_count,
            map,
            tx_rx_map,
            bitmap,
            raw,
            delivered,
        })
    }

    pub fn max_count(&self) -> u8 {
        self.max_count
    }

    pub fn valid_count(&self) -> u8 {
        self.valid_count
    }

    pub fn capabilities(&self) -> ButtonCaps {
        self.caps
    }

    /// Sensor TX/RX electrode pairs per button, empty when not advertised.
    pub fn tx_rx_map(&self) -> &[u8] {
        &self.tx_rx_map
    }

    pub fn codes(&self) -> &[u16] {
        &self.map
    }

    fn deliver(&mut self, button: usize, pressed: bool, frame: &mut Frame) {
        log::debug!("button {} (code {}) -> {}", button, self.map[button], pressed);
        frame.push(Event::Key {
            code: self.map[button],
            pressed,
        });
        self.delivered[button] = pressed;
    }

    pub fn report<T: Transport>(
        &mut self,
        bus: &mut T,
        ctx: &mut ReportContext<'_>,
        frame: &mut Frame,
    ) -> Result<u8, Error<T::Error>> {
        if !ctx.flags.buttons_enabled {
            return Ok(0);
        }
        read_regs(bus, self.base.data, &mut self.bitmap)?;

        let hold_back = ctx.config.suppress_buttons_during_touch && ctx.flags.fingers_on_2d;
        let mut count = 0;
        for button in 0..self.valid_count as usize {
            let status = self.bitmap[button / 8] & (1 << (button % 8)) != 0;
            if self.raw[button] == status {
                continue;
            }
            self.raw[button] = status;

            if hold_back {
                // Releases of keys the host saw pressed still go out.
                if !status && self.delivered[button] {
                    self.deliver(button, false, frame);
                    count += 1;
                }
            } else if self.delivered[button] != status {
                self.deliver(button, status, frame);
                count += 1;
            }
        }
        if count > 0 {
            frame.sync();
        }
        Ok(count)
    }

    /// Deliver transitions held back while fingers were on the 2-D sensor.
    pub fn flush_deferred(&mut self, frame: &mut Frame) -> u8 {
        let mut count = 0;
        for button in 0..self.valid_count as usize {
            if self.raw[button] != self.delivered[button] {
                let pressed = self.raw[button];
                self.deliver(button, pressed, frame);
                count += 1;
            }
        }
        if count > 0 {
            frame.sync();
        }
        count
    }

    /// Forget held-back transitions without delivering them.
    pub fn clear_deferred(&mut self) {
        self.raw.copy_from_slice(&self.delivered);
    }

    /// Release every button the host believes is pressed.
    pub fn release_all(&mut self, frame: &mut Frame) {
        let mut any = false;
        for button in 0..self.valid_count as usize {
            if self.delivered[button] {
                self.deliver(button, false, frame);
                any = true;
            }
        }
        self.raw.iter_mut().for_each(|s| *s = false);
        if any {
            frame.sync();
        }
    }
}
