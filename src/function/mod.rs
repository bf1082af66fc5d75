//! RMI functions: descriptors, interrupt assignment and the handler registry.

pub mod f01;
pub mod f11;
pub mod f12;
pub mod f1a;

use alloc::vec::Vec;

use crate::bus::Transport;
use crate::data_types::{Config, PalmPolicy, SensorGeometry};
use crate::error::{Error, ProtocolError};
use crate::event::{Contact, ContactStatus, Frame, ToolType};
use crate::registers::{function, MAX_INTR_REGISTERS};

pub use f01::F01;
pub use f11::F11;
pub use f12::F12;
pub use f1a::F1a;

/// Read a register block, mapping transport failures.
pub(crate) fn read_regs<T: Transport>(bus: &mut T, addr: u16, buf: &mut [u8]) -> Result<(), Error<T::Error>> {
    bus.read(addr, buf).map_err(Error::Transport)
}

pub(crate) fn read_reg<T: Transport>(bus: &mut T, addr: u16) -> Result<u8, Error<T::Error>> {
    let mut buf = [0u8; 1];
    read_regs(bus, addr, &mut buf)?;
    Ok(buf[0])
}

pub(crate) fn write_regs<T: Transport>(bus: &mut T, addr: u16, data: &[u8]) -> Result<(), Error<T::Error>> {
    bus.write(addr, data).map_err(Error::Transport)
}

pub(crate) fn write_reg<T: Transport>(bus: &mut T, addr: u16, value: u8) -> Result<(), Error<T::Error>> {
    write_regs(bus, addr, &[value])
}

/// Zeroed scratch buffer, reporting reservation failure instead of aborting.
pub(crate) fn alloc_buffer<E>(len: usize) -> Result<Vec<u8>, Error<E>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| Error::AllocationFailure)?;
    buf.resize(len, 0);
    Ok(buf)
}

/// One 6-byte Page Description Table entry.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FunctionDescriptor {
    pub number: u8,
    pub version: u8,
    pub intr_src_count: u8,
    pub query_base: u8,
    pub command_base: u8,
    pub control_base: u8,
    pub data_base: u8,
    pub page: u8,
}

impl FunctionDescriptor {
    pub const SIZE: usize = 6;

    /// Decode `[query, command, control, data, count|version, number]`.
    pub fn parse(raw: &[u8; Self::SIZE], page: u8) -> Self {
        Self {
            query_base: raw[0],
            command_base: raw[1],
            control_base: raw[2],
            data_base: raw[3],
            intr_src_count: raw[4] & 0x07,
            version: (raw[4] >> 5) & 0x03,
            number: raw[5],
            page,
        }
    }

    pub fn addresses(&self) -> BaseAddresses {
        let page = (self.page as u16) << 8;
        BaseAddresses {
            query: page | self.query_base as u16,
            command: page | self.command_base as u16,
            control: page | self.control_base as u16,
            data: page | self.data_base as u16,
        }
    }
}

/// Absolute (page-qualified) register bases of one function.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BaseAddresses {
    pub query: u16,
    pub command: u16,
    pub control: u16,
    pub data: u16,
}

/// Contiguous run of interrupt-source bits claimed by one function.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InterruptAssignment {
    /// Absolute bit index across all interrupt registers.
    pub first_bit: u8,
    pub count: u8,
}

impl InterruptAssignment {
    /// Assign `count` sources after `cumulative` sources already claimed.
    pub fn new(cumulative: u8, count: u8) -> Result<Self, ProtocolError> {
        if cumulative as usize + count as usize > MAX_INTR_REGISTERS * 8 {
            return Err(ProtocolError::InterruptOverflow);
        }
        Ok(Self {
            first_bit: cumulative,
            count,
        })
    }

    pub fn register_index(&self) -> usize {
        self.first_bit as usize / 8
    }

    /// Mask within the first register of the run.
    pub fn mask(&self) -> u8 {
        self.masks().next().map(|(_, m)| m).unwrap_or(0)
    }

    /// `(register, mask)` for every register the run touches.
    pub fn masks(&self) -> impl Iterator<Item = (usize, u8)> + '_ {
        let first = self.first_bit as u32;
        let end = first + self.count as u32;
        let first_reg = first / 8;
        let last_reg = if self.count == 0 { first_reg } else { (end - 1) / 8 + 1 };
        (first_reg..last_reg).map(move |reg| {
            let lo = first.max(reg * 8);
            let hi = end.min(reg * 8 + 8);
            let width = hi - lo;
            let bits = ((1u16 << width) - 1) as u8;
            (reg as usize, bits << (lo - reg * 8))
        })
    }

    /// True when any of this function's sources is set in `sources`.
    pub fn is_asserted(&self, sources: &[u8]) -> bool {
        self.masks()
            .any(|(reg, mask)| sources.get(reg).is_some_and(|s| s & mask != 0))
    }
}

/// Device-wide flags the handlers read and update during a report cycle.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TouchFlags {
    /// Suspended with the touch function in gesture-only mode.
    pub suspended: bool,
    pub wakeup_gesture: bool,
    pub fingers_on_2d: bool,
    /// A palm key has been sent during this wake epoch.
    pub palm_latched: bool,
    pub palm_detection: bool,
    pub buttons_enabled: bool,
}

impl Default for TouchFlags {
    fn default() -> Self {
        Self {
            suspended: false,
            wakeup_gesture: false,
            fingers_on_2d: false,
            palm_latched: false,
            palm_detection: true,
            buttons_enabled: true,
        }
    }
}

/// Everything a handler needs besides the bus while decoding one report.
pub struct ReportContext<'a> {
    pub config: &'a Config,
    pub geometry: SensorGeometry,
    pub flags: &'a mut TouchFlags,
}

/// Apply a palm policy after the sensor flagged a palm covering it.
pub(crate) fn palm_event(policy: PalmPolicy, slots: u8, ctx: &mut ReportContext<'_>, frame: &mut Frame) {
    match policy {
        PalmPolicy::Suppress => {}
        PalmPolicy::Key { code } => {
            if ctx.flags.palm_detection && !ctx.flags.palm_latched {
                log::info!("palm detected");
                frame.key_tap(code);
                ctx.flags.palm_latched = true;
            }
        }
        PalmPolicy::SyntheticContact => {
            frame.release_all(slots, false);
            frame.contact(Contact {
                slot: 0,
                status: ContactStatus::Present,
                tool: ToolType::Finger,
                x: ctx.geometry.max_x / 2,
                y: ctx.geometry.max_y / 2,
                major: ctx.geometry.max_touch_width,
                minor: ctx.geometry.max_touch_width,
                pressure: None,
            });
            frame.sync();
            frame.contact(Contact::lifted(0));
            frame.sync();
        }
    }
}

#[derive(Debug)]
pub enum FunctionKind {
    DeviceControl(F01),
    Touch2dLegacy(F11),
    Touch2d(F12),
    Buttons(F1a),
}

/// One discovered function with its negotiated state.
#[derive(Debug)]
pub struct FunctionHandler {
    pub number: u8,
    pub version: u8,
    pub base: BaseAddresses,
    pub interrupts: InterruptAssignment,
    pub kind: FunctionKind,
}

impl FunctionHandler {
    pub fn is_touch(&self) -> bool {
        matches!(self.kind, FunctionKind::Touch2dLegacy(_) | FunctionKind::Touch2d(_))
    }

    /// Decode this function's report into `frame`, returning the number of active contacts.
    pub fn report<T: Transport>(
        &mut self,
        bus: &mut T,
        ctx: &mut ReportContext<'_>,
        frame: &mut Frame,
    ) -> Result<u8, Error<T::Error>> {
        match &mut self.kind {
            // Status and interrupt bytes were already consumed by the dispatcher.
            FunctionKind::DeviceControl(_) => Ok(0),
            FunctionKind::Touch2dLegacy(f11) => f11.report(bus, ctx, frame),
            FunctionKind::Touch2d(f12) => f12.report(bus, ctx, frame),
            FunctionKind::Buttons(f1a) => f1a.report(bus, ctx, frame),
        }
    }

    /// Slots this function reports on (0 for non-touch functions).
    pub fn contact_slots(&self) -> u8 {
        match &self.kind {
            FunctionKind::Touch2dLegacy(f11) => f11.max_contacts(),
            FunctionKind::Touch2d(f12) => f12.max_contacts(),
            _ => 0,
        }
    }

    /// Forget per-contact tracking after all contacts were released.
    pub fn clear_tracking(&mut self) {
        match &mut self.kind {
            FunctionKind::Touch2d(f12) => f12.clear_tracking(),
            FunctionKind::Buttons(f1a) => f1a.clear_deferred(),
            _ => {}
        }
    }
}

/// Summary of a registered function, for diagnostics and comparisons across resets.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FunctionSummary {
    pub number: u8,
    pub base: BaseAddresses,
    pub interrupts: InterruptAssignment,
}

/// Active functions in discovery order plus the interrupt mask table derived from them.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    handlers: Vec<FunctionHandler>,
    intr_mask: [u8; MAX_INTR_REGISTERS],
    intr_registers: usize,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handler: FunctionHandler) {
        for (reg, mask) in handler.interrupts.masks() {
            if let Some(slot) = self.intr_mask.get_mut(reg) {
                *slot |= mask;
            }
        }
        self.handlers.push(handler);
    }

    /// Record how many interrupt registers the device exposes (`ceil(sources / 8)`).
    pub fn set_interrupt_sources(&mut self, sources: u8) {
        self.intr_registers = (sources as usize).div_ceil(8).min(MAX_INTR_REGISTERS);
    }

    pub fn interrupt_registers(&self) -> usize {
        self.intr_registers
    }

    /// Per-register OR of every handler's mask.
    pub fn interrupt_masks(&self) -> &[u8] {
        &self.intr_mask[..self.intr_registers]
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionHandler> {
        self.handlers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FunctionHandler> {
        self.handlers.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn find(&self, number: u8) -> Option<&FunctionHandler> {
        self.handlers.iter().find(|h| h.number == number)
    }

    pub fn find_mut(&mut self, number: u8) -> Option<&mut FunctionHandler> {
        self.handlers.iter_mut().find(|h| h.number == number)
    }

    pub fn f01(&self) -> Option<&F01> {
        self.handlers.iter().find_map(|h| match &h.kind {
            FunctionKind::DeviceControl(f01) => Some(f01),
            _ => None,
        })
    }

    pub fn f11(&self) -> Option<&F11> {
        self.handlers.iter().find_map(|h| match &h.kind {
            FunctionKind::Touch2dLegacy(f11) => Some(f11),
            _ => None,
        })
    }

    pub fn f12(&self) -> Option<&F12> {
        self.handlers.iter().find_map(|h| match &h.kind {
            FunctionKind::Touch2d(f12) => Some(f12),
            _ => None,
        })
    }

    pub fn buttons(&self) -> Option<&F1a> {
        self.handlers.iter().find_map(|h| match &h.kind {
            FunctionKind::Buttons(f1a) => Some(f1a),
            _ => None,
        })
    }

    /// The button function's registry entry, with its base addresses and interrupt bits.
    pub fn buttons_handler(&self) -> Option<&FunctionHandler> {
        self.find(function::BUTTONS)
    }

    pub fn buttons_mut(&mut self) -> Option<&mut F1a> {
        self.handlers.iter_mut().find_map(|h| match &mut h.kind {
            FunctionKind::Buttons(f1a) => Some(f1a),
            _ => None,
        })
    }

    /// True when a touch function can be switched to wake-gesture reporting.
    pub fn has_wakeup_gesture(&self) -> bool {
        self.handlers.iter().any(|h| match &h.kind {
            FunctionKind::Touch2dLegacy(f11) => f11.has_wakeup_gesture(),
            FunctionKind::Touch2d(f12) => f12.has_wakeup_gesture(),
            _ => false,
        })
    }

    /// Switch every gesture-capable touch function in or out of wake-gesture mode.
    pub fn set_wakeup_mode<T: Transport>(&self, bus: &mut T, wakeup: bool) -> Result<(), Error<T::Error>> {
        for handler in &self.handlers {
            match &handler.kind {
                FunctionKind::Touch2dLegacy(f11) if f11.has_wakeup_gesture() => f11.set_wakeup_mode(bus, wakeup)?,
                FunctionKind::Touch2d(f12) => f12.set_wakeup_mode(bus, wakeup)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Largest slot count over the touch functions.
    pub fn contact_slots(&self) -> u8 {
        self.handlers.iter().map(FunctionHandler::contact_slots).max().unwrap_or(0)
    }

    pub fn summary(&self) -> Vec<FunctionSummary> {
        self.handlers
            .iter()
            .map(|h| FunctionSummary {
                number: h.number,
                base: h.base,
                interrupts: h.interrupts,
            })
            .collect()
    }
}
