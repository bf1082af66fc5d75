//! Reset, re-arm and power transitions, plus the deferred work runner.

use core::sync::atomic::Ordering;

use embedded_hal::delay::DelayNs;

use crate::bus::{PowerControl, Transport};
use crate::data_types::{Lifecycle, SuspendMode};
use crate::driver::{Controller, Engine, Io, WORK_REBUILD, WORK_RECOVERY};
use crate::error::Error;
use crate::event::EventSink;
use crate::expansion::ExpansionContext;
use crate::function::FunctionRegistry;
use crate::registers::{POWER_SETTLE_MS, RESET_PULSE_MS};
use crate::scan;

impl<T, D, S, P> Controller<T, D, S, P>
where
    T: Transport,
    D: DelayNs,
    S: EventSink,
    P: PowerControl,
{
    /// Reset the device and rebuild the function registry.
    ///
    /// With `rebuild` the work is only queued for [`run_pending_work`](Self::run_pending_work),
    /// after the rebuild settle delay; requests made before it runs coalesce.
    pub fn reset(&self, rebuild: bool) -> Result<(), Error<T::Error>> {
        if rebuild {
            self.request_rebuild();
            return Ok(());
        }
        let _reset = self.reset_lock.lock();
        self.reset_locked(false)
    }

    /// Queue a full rebuild. Returns false when one was already queued.
    pub fn request_rebuild(&self) -> bool {
        let queued = self.pending.fetch_or(WORK_REBUILD, Ordering::AcqRel) & WORK_REBUILD == 0;
        if queued {
            log::info!("rebuild scheduled");
        }
        queued
    }

    /// Caller holds the reset lock.
    pub(crate) fn reset_locked(&self, rebuild: bool) -> Result<(), Error<T::Error>> {
        self.dispatch_enabled.store(false, Ordering::Release);
        let mut engine = self.engine.lock();
        let engine = &mut *engine;
        let previous = engine.state;
        engine.state = Lifecycle::Resetting;

        let mut io = self.io.lock();
        let result = self.reset_device(engine, &mut io, rebuild);
        if let Err(e) = &result {
            log::error!("reset failed: {}", e);
            engine.state = previous;
        }
        result
    }

    fn reset_device(&self, engine: &mut Engine<S>, io: &mut Io<T, D, P>, rebuild: bool) -> Result<(), Error<T::Error>> {
        let f01 = engine.f01();
        if rebuild {
            self.notify(io, &engine.identity, |feature, ctx| feature.remove(ctx));
            engine.release_contacts();
            engine.registry = FunctionRegistry::new();
        }
        if let Some(f01) = f01 {
            f01.soft_reset(&mut io.bus)?;
            io.delay.delay_ms(self.config.reset_delay_ms);
        }
        if !rebuild {
            engine.release_contacts();
        }

        let discovery = scan::discover(&mut io.bus, &mut io.delay, &self.config)?;
        engine.install(discovery);

        if rebuild {
            self.notify(io, &engine.identity, |feature, ctx| feature.init(ctx));
        } else {
            self.notify(io, &engine.identity, |feature, ctx| feature.reset(ctx));
        }
        self.enable_dispatch(engine, io)
    }

    /// Light re-arm after the firmware reset itself: the layout is unchanged but the
    /// volatile configuration is gone.
    pub fn reinit(&self) -> Result<(), Error<T::Error>> {
        let _reset = self.reset_lock.lock();
        let mut engine = self.engine.lock();
        let engine = &mut *engine;
        let mut io = self.io.lock();
        let io = &mut *io;

        engine.release_contacts();
        if let Some(f12) = engine.registry.f12() {
            f12.write_report_enables(&mut io.bus)?;
        }
        self.enable_dispatch(engine, io)?;
        self.notify(io, &engine.identity, |feature, ctx| feature.reinit(ctx));
        if let Some(f01) = engine.f01() {
            f01.set_configured(&mut io.bus)?;
        }
        Ok(())
    }

    /// Enter suspend, sequencing the power rails and reset line.
    pub fn suspend(&self) -> Result<(), Error<T::Error>> {
        self.enter_suspend(true)
    }

    /// Suspend without touching the power rails.
    pub fn early_suspend(&self) -> Result<(), Error<T::Error>> {
        self.enter_suspend(false)
    }

    pub fn resume(&self) -> Result<(), Error<T::Error>> {
        self.leave_suspend(true)
    }

    pub fn late_resume(&self) -> Result<(), Error<T::Error>> {
        self.leave_suspend(false)
    }

    fn enter_suspend(&self, rails: bool) -> Result<(), Error<T::Error>> {
        let _reset = self.reset_lock.lock();
        let mut engine = self.engine.lock();
        let engine = &mut *engine;
        if matches!(engine.state, Lifecycle::Suspended(_)) {
            return Ok(());
        }
        let mut io = self.io.lock();
        let io = &mut *io;

        if engine.flags.wakeup_gesture && engine.registry.has_wakeup_gesture() {
            engine.registry.set_wakeup_mode(&mut io.bus, true)?;
            io.power.set_irq_wake(true);
            engine.flags.suspended = true;
            engine.state = Lifecycle::Suspended(SuspendMode::WakeupArmed);
            log::info!("suspended with wake gesture armed");
        } else {
            self.disable_dispatch(engine, io)?;
            if let Some(f01) = engine.f01() {
                f01.set_sleep(&mut io.bus, true, self.config.no_sleep)?;
            }
            engine.release_contacts();
            if rails {
                io.power.set_reset(true);
                io.power.set_power(false);
            }
            engine.state = Lifecycle::Suspended(SuspendMode::PowerDown);
            log::info!("suspended, sensor powered down");
        }

        if rails {
            self.notify(io, &engine.identity, |feature, ctx| feature.suspend(ctx));
        } else {
            self.notify(io, &engine.identity, |feature, ctx| feature.early_suspend(ctx));
        }
        self.recovery_attempts.store(0, Ordering::Release);
        engine.flags.palm_latched = true;
        Ok(())
    }

    fn leave_suspend(&self, rails: bool) -> Result<(), Error<T::Error>> {
        let _reset = self.reset_lock.lock();
        {
            let mut engine = self.engine.lock();
            let engine = &mut *engine;
            let mut io = self.io.lock();
            let io = &mut *io;
            match engine.state {
                Lifecycle::Suspended(SuspendMode::WakeupArmed) => {
                    engine.registry.set_wakeup_mode(&mut io.bus, false)?;
                    io.power.set_irq_wake(false);
                    engine.flags.suspended = false;
                }
                Lifecycle::Suspended(SuspendMode::PowerDown) => {
                    io.bus.invalidate_page();
                    if rails {
                        io.power.set_power(true);
                        io.power.set_reset(false);
                    }
                    io.delay.delay_ms(POWER_SETTLE_MS);
                    if let Some(f01) = engine.f01() {
                        f01.set_sleep(&mut io.bus, false, self.config.no_sleep)?;
                    }
                    self.enable_dispatch(engine, io)?;
                }
                _ => return Ok(()),
            }
        }

        self.reset_locked(false)?;

        let mut engine = self.engine.lock();
        let engine = &mut *engine;
        let mut io = self.io.lock();
        let io = &mut *io;
        engine.flags.palm_latched = false;
        if engine.charger_connected {
            if let Some(f01) = engine.f01() {
                f01.set_charger(&mut io.bus, true)?;
            }
        }
        if rails {
            self.notify(io, &engine.identity, |feature, ctx| feature.resume(ctx));
        } else {
            self.notify(io, &engine.identity, |feature, ctx| feature.late_resume(ctx));
        }
        log::info!("resumed");
        Ok(())
    }

    /// Queue a reset-line pulse followed by a soft reset and rediscovery.
    ///
    /// Returns false once the attempts allowed per suspend cycle are used up.
    pub fn schedule_recovery(&self) -> bool {
        let attempts = self.recovery_attempts.load(Ordering::Acquire);
        if attempts >= self.config.max_recovery_attempts {
            log::warn!("recovery attempts exhausted ({})", attempts);
            return false;
        }
        if self.pending.fetch_or(WORK_RECOVERY, Ordering::AcqRel) & WORK_RECOVERY == 0 {
            self.recovery_attempts.fetch_add(1, Ordering::AcqRel);
            log::info!("recovery scheduled (attempt {})", attempts + 1);
        }
        true
    }

    pub fn recovery_attempts(&self) -> u8 {
        self.recovery_attempts.load(Ordering::Acquire)
    }

    /// True when [`run_pending_work`](Self::run_pending_work) has something to do.
    pub fn has_pending_work(&self) -> bool {
        self.pending.load(Ordering::Acquire) != 0 || self.expansions.drain_pending()
    }

    /// Run queued rebuild, recovery and expansion drain work.
    ///
    /// Settle delays are spent on `delay`, without holding any lock.
    pub fn run_pending_work(&self, delay: &mut impl DelayNs) -> Result<(), Error<T::Error>> {
        if self.pending.load(Ordering::Acquire) & WORK_REBUILD != 0 {
            delay.delay_ms(self.config.rebuild_delay_ms);
            if self.pending.fetch_and(!WORK_REBUILD, Ordering::AcqRel) & WORK_REBUILD != 0 {
                log::info!("rebuilding function registry");
                let _reset = self.reset_lock.lock();
                self.reset_locked(true)?;
            }
        }

        if self.pending.fetch_and(!WORK_RECOVERY, Ordering::AcqRel) & WORK_RECOVERY != 0 {
            log::warn!("recovering device with a reset pulse");
            self.io.lock().power.set_reset(true);
            delay.delay_ms(RESET_PULSE_MS);
            self.io.lock().power.set_reset(false);
            self.reset(false)?;
        }

        if self.expansions.drain_pending() {
            delay.delay_ms(self.config.expansion_delay_ms);
            if self.expansions.take_drain_request() {
                let _reset = self.reset_lock.lock();
                let engine = self.engine.lock();
                let mut io = self.io.lock();
                let io = &mut *io;
                let mut ctx = ExpansionContext {
                    bus: &mut io.bus,
                    delay: &mut io.delay,
                    identity: &engine.identity,
                };
                self.expansions.drain(&mut ctx);
            }
        }
        Ok(())
    }

    /// Arm or disarm wake-gesture reporting for the next suspend.
    ///
    /// Returns whether a touch function can honour it.
    pub fn set_wakeup_gesture(&self, enabled: bool) -> bool {
        let mut engine = self.engine.lock();
        engine.flags.wakeup_gesture = enabled;
        engine.registry.has_wakeup_gesture()
    }

    /// Mask or unmask the 0-D buttons.
    pub fn set_buttons_enabled(&self, enabled: bool) -> Result<(), Error<T::Error>> {
        let _reset = self.reset_lock.lock();
        let mut engine = self.engine.lock();
        engine.flags.buttons_enabled = enabled;
        let (Some(f01), Some(buttons)) = (engine.f01(), engine.registry.buttons_handler()) else {
            return Ok(());
        };
        if !self.dispatch_enabled.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut io = self.io.lock();
        for (reg, mask) in buttons.interrupts.masks() {
            f01.update_interrupt_enable(&mut io.bus, reg, mask, enabled)?;
        }
        Ok(())
    }

    /// Tell the firmware a charger is attached; re-applied on every resume.
    pub fn set_charger_connected(&self, connected: bool) -> Result<(), Error<T::Error>> {
        let mut engine = self.engine.lock();
        engine.charger_connected = connected;
        if engine.state != Lifecycle::Active {
            return Ok(());
        }
        let Some(f01) = engine.f01() else {
            return Ok(());
        };
        f01.set_charger(&mut self.io.lock().bus, connected)
    }

    pub fn set_palm_detection(&self, enabled: bool) {
        self.engine.lock().flags.palm_detection = enabled;
    }
}
