//! Controller handle: owns the bus, the function registry and the event sink, and
//! dispatches attention interrupts to the function handlers.
//!
//! Every method takes `&self`; state is split over three `spin::Mutex`es (reset, report,
//! io) that are always taken in that order, plus the expansion list which is only ever
//! taken last.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use embedded_hal::delay::DelayNs;
use spin::Mutex;

use crate::bus::{PowerControl, Transport};
use crate::data_types::{Config, DeviceIdentity, Lifecycle, SensorGeometry};
use crate::error::Error;
use crate::event::{EventSink, Frame};
use crate::expansion::{ExpansionContext, ExpansionFeature, ExpansionRegistry};
use crate::function::{FunctionKind, FunctionRegistry, FunctionSummary, ReportContext, TouchFlags, F01};
use crate::registers::MAX_INTR_REGISTERS;
use crate::scan::{self, Discovery};

/// Bus-side resources, guarded by the io lock.
pub(crate) struct Io<T, D, P> {
    pub(crate) bus: T,
    pub(crate) delay: D,
    pub(crate) power: P,
}

/// Report-side state, guarded by the report lock.
pub(crate) struct Engine<S> {
    pub(crate) sink: S,
    pub(crate) registry: FunctionRegistry,
    pub(crate) flags: TouchFlags,
    pub(crate) geometry: SensorGeometry,
    pub(crate) identity: DeviceIdentity,
    pub(crate) state: Lifecycle,
    pub(crate) charger_connected: bool,
    pub(crate) frame: Frame,
}

impl<S: EventSink> Engine<S> {
    pub(crate) fn f01(&self) -> Option<F01> {
        self.registry.f01().copied()
    }

    /// Interrupt-enable values: every claimed source, minus the buttons while they are disabled.
    pub(crate) fn enabled_masks(&self) -> [u8; MAX_INTR_REGISTERS] {
        let mut masks = [0u8; MAX_INTR_REGISTERS];
        let claimed = self.registry.interrupt_masks();
        masks[..claimed.len()].copy_from_slice(claimed);
        if !self.flags.buttons_enabled {
            if let Some(buttons) = self.registry.buttons_handler() {
                for (reg, mask) in buttons.interrupts.masks() {
                    if let Some(m) = masks.get_mut(reg) {
                        *m &= !mask;
                    }
                }
            }
        }
        masks
    }

    /// Lift every contact, the stylus and every pressed button, and forget tracking.
    pub(crate) fn release_contacts(&mut self) {
        self.frame.clear();
        for handler in self.registry.iter_mut() {
            match &mut handler.kind {
                FunctionKind::Touch2dLegacy(f11) => self.frame.release_all(f11.max_contacts(), false),
                FunctionKind::Touch2d(f12) => self.frame.release_all(f12.max_contacts(), f12.stylus_enabled()),
                FunctionKind::Buttons(f1a) => f1a.release_all(&mut self.frame),
                FunctionKind::DeviceControl(_) => {}
            }
            handler.clear_tracking();
        }
        self.flags.fingers_on_2d = false;
        self.frame.flush(&mut self.sink);
    }

    pub(crate) fn install(&mut self, discovery: Discovery) {
        log::info!(
            "{} functions registered, sensor {}x{}",
            discovery.registry.len(),
            discovery.geometry.max_x,
            discovery.geometry.max_y
        );
        self.registry = discovery.registry;
        self.identity = discovery.identity;
        self.geometry = discovery.geometry;
        self.state = if discovery.bootloader {
            Lifecycle::BootloaderMode
        } else {
            Lifecycle::Active
        };
    }
}

pub(crate) const WORK_REBUILD: u8 = 1 << 0;
pub(crate) const WORK_RECOVERY: u8 = 1 << 1;

/// RMI4 touch controller.
pub struct Controller<T, D, S, P = ()> {
    pub(crate) io: Mutex<Io<T, D, P>>,
    pub(crate) reset_lock: Mutex<()>,
    pub(crate) engine: Mutex<Engine<S>>,
    pub(crate) dispatch_enabled: AtomicBool,
    pub(crate) pending: AtomicU8,
    pub(crate) recovery_attempts: AtomicU8,
    pub(crate) expansions: Arc<ExpansionRegistry<T>>,
    pub(crate) config: Config,
}

impl<T, D, S, P> Controller<T, D, S, P>
where
    T: Transport,
    D: DelayNs,
    S: EventSink,
    P: PowerControl,
{
    /// Create a handle; nothing touches the bus until [`probe`](Self::probe).
    pub fn new(bus: T, delay: D, power: P, sink: S, config: Config, expansions: Arc<ExpansionRegistry<T>>) -> Self {
        let flags = TouchFlags {
            wakeup_gesture: config.wakeup_gesture,
            ..TouchFlags::default()
        };
        Self {
            io: Mutex::new(Io { bus, delay, power }),
            reset_lock: Mutex::new(()),
            engine: Mutex::new(Engine {
                sink,
                registry: FunctionRegistry::new(),
                flags,
                geometry: SensorGeometry::default(),
                identity: DeviceIdentity::default(),
                state: Lifecycle::Resetting,
                charger_connected: false,
                frame: Frame::new(),
            }),
            dispatch_enabled: AtomicBool::new(false),
            pending: AtomicU8::new(0),
            recovery_attempts: AtomicU8::new(0),
            expansions,
            config,
        }
    }

    /// Power the sensor, discover its functions and start dispatching.
    pub fn probe(&self) -> Result<(), Error<T::Error>> {
        let _reset = self.reset_lock.lock();
        let mut engine = self.engine.lock();
        let mut io = self.io.lock();
        let io = &mut *io;
        io.power.set_power(true);
        io.power.set_reset(false);

        let discovery = scan::discover(&mut io.bus, &mut io.delay, &self.config)?;
        engine.install(discovery);
        self.enable_dispatch(&engine, io)?;
        self.expansions.request_drain();
        Ok(())
    }

    /// Service one attention interrupt. Returns the number of active touch contacts.
    pub fn service(&self) -> Result<u8, Error<T::Error>> {
        if !self.dispatch_enabled.load(Ordering::Acquire) {
            return Ok(0);
        }

        let status = {
            let engine = self.engine.lock();
            if !self.dispatch_enabled.load(Ordering::Acquire) {
                return Ok(0);
            }
            let f01 = engine.f01().ok_or(Error::NotReady)?;
            let mut io = self.io.lock();
            let io = &mut *io;
            let mut status = f01.read_interrupt_status(&mut io.bus, engine.registry.interrupt_registers())?;
            if status.status.crc_in_progress() {
                let (settled, _) = f01.check_status(&mut io.bus, &mut io.delay, self.config.status_timeout_ms)?;
                status.status = settled;
            }
            status
        };

        if status.status.spontaneous_reset() {
            log::warn!("spontaneous reset detected, re-arming");
            self.reinit()?;
        }

        let mut engine = self.engine.lock();
        if !self.dispatch_enabled.load(Ordering::Acquire) {
            return Ok(0);
        }
        let engine = &mut *engine;
        let mut io = self.io.lock();
        let io = &mut *io;

        engine.frame.clear();
        let mut contacts = 0;
        let mut fingers_cleared = false;
        {
            let mut ctx = ReportContext {
                config: &self.config,
                geometry: engine.geometry,
                flags: &mut engine.flags,
            };
            for handler in engine.registry.iter_mut() {
                if !handler.interrupts.is_asserted(&status.sources) {
                    continue;
                }
                let mark = engine.frame.len();
                match handler.report(&mut io.bus, &mut ctx, &mut engine.frame) {
                    Ok(count) if handler.is_touch() => {
                        contacts = count;
                        ctx.flags.fingers_on_2d = count > 0;
                        fingers_cleared |= count == 0;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("F{:02x} report failed: {}", handler.number, e);
                        engine.frame.truncate(mark);
                    }
                }
            }
        }
        if fingers_cleared {
            if let Some(f1a) = engine.registry.buttons_mut() {
                f1a.flush_deferred(&mut engine.frame);
            }
        }
        engine.frame.flush(&mut engine.sink);

        let sources = status.sources[0];
        self.notify(io, &engine.identity, |feature, ctx| feature.attention(ctx, sources));
        Ok(contacts)
    }

    /// Mask every source, clear whatever is pending, then unmask the claimed sources.
    pub(crate) fn enable_dispatch(&self, engine: &Engine<S>, io: &mut Io<T, D, P>) -> Result<(), Error<T::Error>> {
        // Bootloader-only devices have nothing to dispatch.
        let Some(f01) = engine.f01() else {
            return Ok(());
        };
        let claimed = engine.registry.interrupt_masks();
        f01.write_interrupt_enables(&mut io.bus, claimed, &[0; MAX_INTR_REGISTERS])?;
        f01.read_interrupt_status(&mut io.bus, engine.registry.interrupt_registers())?;
        f01.write_interrupt_enables(&mut io.bus, claimed, &engine.enabled_masks())?;
        self.dispatch_enabled.store(true, Ordering::Release);
        Ok(())
    }

    pub(crate) fn disable_dispatch(&self, engine: &Engine<S>, io: &mut Io<T, D, P>) -> Result<(), Error<T::Error>> {
        self.dispatch_enabled.store(false, Ordering::Release);
        if let Some(f01) = engine.f01() {
            f01.write_interrupt_enables(&mut io.bus, engine.registry.interrupt_masks(), &[0; MAX_INTR_REGISTERS])?;
        }
        Ok(())
    }

    /// Invoke `f` on every attached expansion feature.
    pub(crate) fn notify(
        &self,
        io: &mut Io<T, D, P>,
        identity: &DeviceIdentity,
        mut f: impl FnMut(&mut (dyn ExpansionFeature<T> + Send), &mut ExpansionContext<'_, T>),
    ) {
        let mut ctx = ExpansionContext {
            bus: &mut io.bus,
            delay: &mut io.delay,
            identity,
        };
        self.expansions.for_each_attached(|feature| f(feature, &mut ctx));
    }

    pub fn state(&self) -> Lifecycle {
        self.engine.lock().state
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.engine.lock().identity.clone()
    }

    pub fn geometry(&self) -> SensorGeometry {
        self.engine.lock().geometry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn expansions(&self) -> &Arc<ExpansionRegistry<T>> {
        &self.expansions
    }

    pub fn is_dispatch_enabled(&self) -> bool {
        self.dispatch_enabled.load(Ordering::Acquire)
    }

    /// Registered functions in discovery order.
    pub fn functions(&self) -> Vec<FunctionSummary> {
        self.engine.lock().registry.summary()
    }

    /// Contact slots the host should allocate: the widest touch function.
    pub fn contact_slots(&self) -> u8 {
        self.engine.lock().registry.contact_slots()
    }

    /// Claimed interrupt mask per interrupt register.
    pub fn interrupt_masks(&self) -> Vec<u8> {
        self.engine.lock().registry.interrupt_masks().to_vec()
    }

    /// Raw register read, for diagnostics and vendor extensions.
    pub fn read_register(&self, addr: u16, buf: &mut [u8]) -> Result<(), Error<T::Error>> {
        self.io.lock().bus.read(addr, buf).map_err(Error::Transport)
    }

    pub fn write_register(&self, addr: u16, data: &[u8]) -> Result<(), Error<T::Error>> {
        self.io.lock().bus.write(addr, data).map_err(Error::Transport)
    }

    /// Tear down the handle and give back the bus, delay, sink and power hooks.
    pub fn release(self) -> (T, D, S, P) {
        let io = self.io.into_inner();
        let engine = self.engine.into_inner();
        (io.bus, io.delay, engine.sink, io.power)
    }
}
