use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction as PinTrans};
use rmi4_touch::{PowerControl, ResetPin};

#[test]
fn reset_line_is_active_low() {
    let expectations = [PinTrans::set(State::Low), PinTrans::set(State::High)];
    let mut reset = ResetPin(PinMock::new(&expectations));
    reset.set_reset(true);
    reset.set_reset(false);
    // rails and wake are not wired to the pin
    reset.set_power(false);
    reset.set_irq_wake(true);
    let ResetPin(mut pin) = reset;
    pin.done();
}

#[test]
fn unit_hooks_do_nothing() {
    let mut hooks = ();
    hooks.set_power(true);
    hooks.set_reset(true);
    hooks.set_irq_wake(false);
}
