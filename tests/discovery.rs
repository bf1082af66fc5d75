mod common;

use rmi4_touch::error::{Error, ProtocolError};
use rmi4_touch::function::FunctionKind;
use rmi4_touch::scan::discover;
use rmi4_touch::{Config, Lifecycle};

use common::*;

#[test]
fn discovers_reference_layout() {
    let mut dev = reference_device();
    let mut delay = RecordingDelay::default();
    let found = discover(&mut dev, &mut delay, &reference_config()).unwrap();

    let numbers: Vec<_> = found.registry.iter().map(|h| h.number).collect();
    assert_eq!(numbers, vec![0x01, 0x12, 0x1A]);
    assert!(!found.bootloader);
    assert_eq!(found.geometry.max_x, F12_MAX_X);
    assert_eq!(found.geometry.max_y, F12_MAX_Y);

    assert_eq!(found.identity.manufacturer_id, 1);
    assert_eq!(found.identity.product_id, "TM3080");
    assert_eq!(found.identity.product_info, [0x22, 0x33]);
    assert_eq!(found.identity.firmware_id, 0x012345);

    // CONFIGURED set on F01 control 0
    assert_eq!(dev.get(F01_CONTROL) & 0x80, 0x80);
    // report enables programmed with Z and widths
    assert_eq!(dev.block(F12_CTRL28), vec![0xFF]);
    assert!(delay.waits().is_empty());
}

#[test]
fn f12_negotiation_reads_sparse_layout() {
    let mut dev = reference_device();
    let mut delay = RecordingDelay::default();
    let found = discover(&mut dev, &mut delay, &reference_config()).unwrap();
    let f12 = found.registry.f12().unwrap();
    assert_eq!(f12.max_contacts(), 10);
    assert!(f12.stylus_enabled());
    assert!(f12.eraser_enabled());
    assert!(f12.reports_pressure());
    assert!(f12.has_wakeup_gesture());
    assert!(!f12.is_wedge_sensor());
}

#[test]
fn f12_contact_count_is_capped_and_zero_drops_function() {
    let dev = FakeDevice::new();
    install_f01(&dev, 0);
    install_f12(&dev, 1, 16, 0x00);
    let mut bus = dev.clone();
    let found = discover(&mut bus, &mut RecordingDelay::default(), &Config::default()).unwrap();
    assert_eq!(found.registry.f12().unwrap().max_contacts(), 10);
    assert!(!found.registry.f12().unwrap().stylus_enabled());

    dev.set_block(F12_CTRL23, &[0x01, 0x00, 0x00, 0x00, 0x00]);
    let found = discover(&mut bus, &mut RecordingDelay::default(), &Config::default()).unwrap();
    assert!(found.registry.f12().is_none());
    // its interrupt sources are still counted
    assert_eq!(found.registry.interrupt_registers(), 1);
    assert_eq!(found.registry.interrupt_masks(), &[0x01]);
}

#[test]
fn fatal_function_errors_abort_discovery() {
    let mut dev = FakeDevice::new();
    install_f01(&dev, 0);
    install_f12(&dev, 1, 0, 0x00);
    let config = Config {
        fatal_function_errors: true,
        ..Config::default()
    };
    let err = discover(&mut dev, &mut RecordingDelay::default(), &config).unwrap_err();
    assert!(matches!(err, Error::Protocol(ProtocolError::NoContacts)));
}

#[test]
fn wedge_sensor_uses_control_31() {
    let mut dev = reference_device();
    // drop control 8, add control 31 after control 28
    dev.set_block(TOUCH_QUERY + 5, &[10, 0x00, 0x00, 0x90, 0x98]);
    dev.set_block(
        TOUCH_QUERY + 6,
        &[0x03, 0x01, 0x05, 0x1F, 0x01, 0x01, 0x01, 0x01, 0x0C, 0x01],
    );
    let mut ctrl31 = [0u8; 12];
    ctrl31[..4].copy_from_slice(&[0x00, 0x04, 0x00, 0x08]);
    // controls 20, 23, 27, 28, 31 at offsets 0..5
    dev.set_block(TOUCH_CONTROL, &[0, 0, 0]);
    dev.set_block(TOUCH_CONTROL + 1, &[0x01, 10, 0x00, 0x00, 0x00]);
    dev.set_block(TOUCH_CONTROL + 4, &ctrl31);

    let found = discover(&mut dev, &mut RecordingDelay::default(), &reference_config()).unwrap();
    let f12 = found.registry.f12().unwrap();
    assert!(f12.is_wedge_sensor());
    assert_eq!(f12.geometry().max_x, 0x0400);
    assert_eq!(f12.geometry().max_y, 0x0800);
}

#[test]
fn missing_geometry_controls_drop_f12() {
    let mut dev = reference_device();
    // only controls 23 and 28
    dev.set_block(TOUCH_QUERY + 5, &[4, 0x00, 0x00, 0x80, 0x10]);
    dev.set_block(TOUCH_QUERY + 6, &[0x05, 0x1F, 0x01, 0x01]);
    dev.set_block(TOUCH_CONTROL, &[0x01, 10, 0x00, 0x00, 0x00]);
    let found = discover(&mut dev, &mut RecordingDelay::default(), &reference_config()).unwrap();
    assert!(found.registry.f12().is_none());
    assert!(found.registry.buttons().is_some());
}

#[test]
fn legacy_sensor_geometry_and_swap() {
    let mut dev = legacy_device();
    let config = Config {
        orientation: rmi4_touch::Orientation {
            swap_axes: true,
            flip_x: false,
            flip_y: false,
        },
        ..Config::default()
    };
    let found = discover(&mut dev, &mut RecordingDelay::default(), &config).unwrap();
    let f11 = found.registry.f11().unwrap();
    assert_eq!(f11.max_contacts(), 2);
    assert!(f11.has_wakeup_gesture());
    assert_eq!(found.geometry.max_x, F11_MAX_Y);
    assert_eq!(found.geometry.max_y, F11_MAX_X);
    assert_eq!(found.geometry.max_touch_width, 15);
}

#[test]
fn empty_button_map_drops_buttons_only() {
    let mut dev = reference_device();
    let found = discover(&mut dev, &mut RecordingDelay::default(), &Config::default()).unwrap();
    assert!(found.registry.buttons().is_none());
    assert!(found.registry.f12().is_some());
    // F01 bit 0 and F12 bits 1-2 remain claimed; F1A bit 3 is not
    assert_eq!(found.registry.interrupt_masks(), &[0x07]);
}

#[test]
fn button_map_longer_than_device_is_truncated() {
    let mut dev = reference_device();
    let mut config = reference_config();
    config.button_map.push(200);
    let found = discover(&mut dev, &mut RecordingDelay::default(), &config).unwrap();
    let f1a = found.registry.buttons().unwrap();
    assert_eq!(f1a.max_count(), 3);
    assert_eq!(f1a.valid_count(), 3);
    assert!(matches!(found.registry.buttons_handler().unwrap().kind, FunctionKind::Buttons(_)));
}

#[test]
fn crc_wait_restarts_scan() {
    let mut dev = reference_device();
    // CRC in progress twice, then settled
    dev.script_status(F01_DATA, &[0x06, 0x06, 0x00]);
    let mut delay = RecordingDelay::default();
    let found = discover(&mut dev, &mut delay, &reference_config()).unwrap();
    assert_eq!(found.registry.len(), 3);
    assert_eq!(delay.waits(), vec![20, 20]);
    // the first page-0 entry was read once per scan
    let pdt_reads = dev.0.borrow().reads.iter().filter(|(a, _)| *a == pdt_addr(0, 0)).count();
    assert_eq!(pdt_reads, 2);
}

#[test]
fn device_stuck_in_crc_is_unresponsive() {
    let mut dev = reference_device();
    dev.script_status(F01_DATA, &[0x06; 16]);
    let err = discover(&mut dev, &mut RecordingDelay::default(), &reference_config()).unwrap_err();
    assert!(matches!(err, Error::DeviceUnresponsive));
}

#[test]
fn repeated_reboots_exhaust_restarts() {
    let mut dev = reference_device();
    // every scan sees one CRC wait
    dev.script_status(F01_DATA, &[0x06, 0x00, 0x06, 0x00, 0x06, 0x00, 0x06, 0x00]);
    let err = discover(&mut dev, &mut RecordingDelay::default(), &reference_config()).unwrap_err();
    assert!(matches!(err, Error::DeviceUnresponsive));
}

#[test]
fn flash_prog_stops_scan() {
    let mut dev = reference_device();
    dev.set(F01_DATA, &[0x40]);
    let found = discover(&mut dev, &mut RecordingDelay::default(), &reference_config()).unwrap();
    assert!(found.bootloader);
    assert!(found.identity.flash_prog);
    assert_eq!(found.registry.len(), 1);
    assert_eq!(found.registry.interrupt_masks(), &[0x01]);
}

#[test]
fn bootloader_only_device() {
    let mut dev = FakeDevice::new();
    dev.set(pdt_addr(0, 0), &descriptor(0x00, 0x00, 0x10, 0x20, 0, 0x35));
    let found = discover(&mut dev, &mut RecordingDelay::default(), &Config::default()).unwrap();
    assert!(found.bootloader);
    assert!(found.registry.is_empty());

    let r = rig(dev, Config::default());
    r.ctl.probe().unwrap();
    assert_eq!(r.ctl.state(), Lifecycle::BootloaderMode);
    assert!(!r.ctl.is_dispatch_enabled());
    assert_eq!(r.ctl.service().unwrap(), 0);
}

#[test]
fn empty_table_fails_discovery() {
    let mut dev = FakeDevice::new();
    let err = discover(&mut dev, &mut RecordingDelay::default(), &Config::default()).unwrap_err();
    assert!(matches!(err, Error::DiscoveryFailed));
}

#[test]
fn transport_errors_abort_discovery() {
    let mut dev = reference_device();
    dev.fail_reads_at(Some(TOUCH_QUERY + 5));
    let err = discover(&mut dev, &mut RecordingDelay::default(), &reference_config()).unwrap_err();
    assert!(matches!(err, Error::Transport(BusFault)));
}

#[test]
fn functions_on_later_pages_are_page_qualified() {
    let mut dev = FakeDevice::new();
    install_f01(&dev, 0);
    // F1A on page 1
    dev.set(pdt_addr(1, 0), &descriptor(0x00, 0x00, 0x10, 0x20, 1, 0x1A));
    dev.set(0x0100, &[0x01, 0x00]);
    let found = discover(&mut dev, &mut RecordingDelay::default(), &reference_config()).unwrap();
    let buttons = found.registry.buttons_handler().unwrap();
    assert_eq!(buttons.base.query, 0x0100);
    assert_eq!(buttons.base.data, 0x0120);
    assert_eq!(buttons.interrupts.first_bit, 1);
}

#[test]
fn contact_slots_follow_the_touch_function() {
    let r = rig(reference_device(), reference_config());
    assert_eq!(r.ctl.contact_slots(), 0);
    r.ctl.probe().unwrap();
    assert_eq!(r.ctl.contact_slots(), 10);

    let r = rig(legacy_device(), reference_config());
    r.ctl.probe().unwrap();
    assert_eq!(r.ctl.contact_slots(), 2);
}
