#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

use embedded_hal::delay::DelayNs;
use rmi4_touch::event::{Event, EventSink};
use rmi4_touch::registers::keys;
use rmi4_touch::{Config, Controller, ExpansionRegistry, PowerControl, Transport};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BusFault;

#[derive(Default)]
pub struct Image {
    /// Flat 64 KiB register space.
    pub flat: Vec<u8>,
    /// Multi-byte registers that live at a single RMI address.
    pub blocks: BTreeMap<u16, Vec<u8>>,
    pub writes: Vec<(u16, Vec<u8>)>,
    pub reads: Vec<(u16, usize)>,
    /// Values returned for successive reads of the status register.
    pub status_script: VecDeque<u8>,
    pub status_addr: Option<u16>,
    pub fail_reads_at: Option<u16>,
    pub fail_all: bool,
    pub page_invalidations: usize,
}

/// Register-map fake shared between the controller and the test body.
#[derive(Clone)]
pub struct FakeDevice(pub Rc<RefCell<Image>>);

impl FakeDevice {
    pub fn new() -> Self {
        FakeDevice(Rc::new(RefCell::new(Image {
            flat: vec![0; 0x1_0000],
            ..Image::default()
        })))
    }

    pub fn set(&self, addr: u16, bytes: &[u8]) {
        let mut img = self.0.borrow_mut();
        let start = addr as usize;
        img.flat[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn set_block(&self, addr: u16, bytes: &[u8]) {
        self.0.borrow_mut().blocks.insert(addr, bytes.to_vec());
    }

    pub fn get(&self, addr: u16) -> u8 {
        let img = self.0.borrow();
        match img.blocks.get(&addr) {
            Some(block) => block.first().copied().unwrap_or(0),
            None => img.flat[addr as usize],
        }
    }

    pub fn block(&self, addr: u16) -> Vec<u8> {
        self.0.borrow().blocks.get(&addr).cloned().unwrap_or_default()
    }

    pub fn script_status(&self, addr: u16, values: &[u8]) {
        let mut img = self.0.borrow_mut();
        img.status_addr = Some(addr);
        img.status_script.extend(values.iter().copied());
    }

    pub fn writes(&self) -> Vec<(u16, Vec<u8>)> {
        self.0.borrow().writes.clone()
    }

    pub fn writes_to(&self, addr: u16) -> Vec<Vec<u8>> {
        self.0
            .borrow()
            .writes
            .iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, d)| d.clone())
            .collect()
    }

    pub fn clear_log(&self) {
        let mut img = self.0.borrow_mut();
        img.writes.clear();
        img.reads.clear();
    }

    pub fn fail_reads_at(&self, addr: Option<u16>) {
        self.0.borrow_mut().fail_reads_at = addr;
    }

    pub fn fail_all(&self, fail: bool) {
        self.0.borrow_mut().fail_all = fail;
    }
}

impl Transport for FakeDevice {
    type Error = BusFault;

    fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), BusFault> {
        let mut img = self.0.borrow_mut();
        if img.fail_all || img.fail_reads_at == Some(addr) {
            return Err(BusFault);
        }
        img.reads.push((addr, buf.len()));
        if let Some(block) = img.blocks.get(&addr) {
            buf.fill(0);
            let n = block.len().min(buf.len());
            buf[..n].copy_from_slice(&block[..n]);
        } else {
            let start = addr as usize;
            buf.copy_from_slice(&img.flat[start..start + buf.len()]);
        }
        if img.status_addr == Some(addr) {
            if let Some(status) = img.status_script.pop_front() {
                buf[0] = status;
            }
        }
        Ok(())
    }

    fn write(&mut self, addr: u16, data: &[u8]) -> Result<(), BusFault> {
        let mut img = self.0.borrow_mut();
        if img.fail_all {
            return Err(BusFault);
        }
        img.writes.push((addr, data.to_vec()));
        if let Some(block) = img.blocks.get_mut(&addr) {
            if block.len() < data.len() {
                block.resize(data.len(), 0);
            }
            block[..data.len()].copy_from_slice(data);
        } else {
            let start = addr as usize;
            img.flat[start..start + data.len()].copy_from_slice(data);
        }
        Ok(())
    }

    fn invalidate_page(&mut self) {
        self.0.borrow_mut().page_invalidations += 1;
    }
}

/// Delay that records every millisecond wait instead of sleeping.
#[derive(Clone, Default)]
pub struct RecordingDelay(pub Rc<RefCell<Vec<u32>>>);

impl RecordingDelay {
    pub fn waits(&self) -> Vec<u32> {
        self.0.borrow().clone()
    }

    pub fn total_ms(&self) -> u32 {
        self.0.borrow().iter().sum()
    }
}

impl DelayNs for RecordingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.0.borrow_mut().push(ns / 1_000_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.0.borrow_mut().push(ms);
    }
}

#[derive(Clone, Default)]
pub struct SharedSink(pub Rc<RefCell<Vec<Event>>>);

impl SharedSink {
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

impl EventSink for SharedSink {
    fn emit(&mut self, event: Event) {
        self.0.borrow_mut().push(event);
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PowerOp {
    Power(bool),
    Reset(bool),
    IrqWake(bool),
}

#[derive(Clone, Default)]
pub struct RecordingPower(pub Rc<RefCell<Vec<PowerOp>>>);

impl RecordingPower {
    pub fn ops(&self) -> Vec<PowerOp> {
        self.0.borrow().clone()
    }
}

impl PowerControl for RecordingPower {
    fn set_power(&mut self, on: bool) {
        self.0.borrow_mut().push(PowerOp::Power(on));
    }

    fn set_reset(&mut self, asserted: bool) {
        self.0.borrow_mut().push(PowerOp::Reset(asserted));
    }

    fn set_irq_wake(&mut self, enabled: bool) {
        self.0.borrow_mut().push(PowerOp::IrqWake(enabled));
    }
}

// Reference layout on page 0.
pub const F01_QUERY: u16 = 0x00;
pub const F01_COMMAND: u16 = 0x30;
pub const F01_CONTROL: u16 = 0x31;
pub const F01_DATA: u16 = 0x36;
pub const F01_INT_ENABLE: u16 = F01_CONTROL + 1;

pub const TOUCH_QUERY: u16 = 0x40;
pub const TOUCH_CONTROL: u16 = 0x60;
pub const TOUCH_DATA: u16 = 0x80;

pub const F1A_QUERY: u16 = 0xA0;
pub const F1A_CONTROL: u16 = 0xB0;
pub const F1A_DATA: u16 = 0xC0;

// F12 sparse registers in the reference layout.
pub const F12_CTRL8: u16 = TOUCH_CONTROL;
pub const F12_CTRL20: u16 = TOUCH_CONTROL + 1;
pub const F12_CTRL23: u16 = TOUCH_CONTROL + 2;
pub const F12_CTRL28: u16 = TOUCH_CONTROL + 4;
pub const F12_DATA1: u16 = TOUCH_DATA;
pub const F12_DATA4: u16 = TOUCH_DATA + 1;
pub const F12_DATA15: u16 = TOUCH_DATA + 2;
pub const F12_DATA23: u16 = TOUCH_DATA + 3;

pub const F12_MAX_X: u16 = 1079;
pub const F12_MAX_Y: u16 = 1919;
pub const F11_MAX_X: u16 = 1000;
pub const F11_MAX_Y: u16 = 2000;

/// F11 data 38 for two fingers without optional data: status byte + two records.
pub const F11_DATA38: u16 = TOUCH_DATA + 11;

/// PDT entry `index` (0 = first) of `page`.
pub fn pdt_addr(page: u8, index: u16) -> u16 {
    ((page as u16) << 8) | (0xE9 - 6 * index)
}

/// `[query, command, control, data, count | version << 5, number]`
pub fn descriptor(query: u16, command: u16, control: u16, data: u16, intr: u8, number: u8) -> [u8; 6] {
    [query as u8, command as u8, control as u8, data as u8, intr, number]
}

pub fn install_f01(dev: &FakeDevice, index: u16) {
    dev.set(
        pdt_addr(0, index),
        &descriptor(F01_QUERY, F01_COMMAND, F01_CONTROL, F01_DATA, 1, 0x01),
    );
    let mut query = [0u8; 21];
    query[0] = 1;
    query[1] = 0x01;
    query[2] = 0x22;
    query[3] = 0x33;
    query[11..17].copy_from_slice(b"TM3080");
    dev.set(F01_QUERY, &query);
    // build id 0x012345 little endian at query + 18
    dev.set(F01_QUERY + 18, &[0x45, 0x23, 0x01]);
}

/// F12 with controls 8, 20, 23, 27, 28 and data 1, 4, 15, 23 present.
pub fn install_f12(dev: &FakeDevice, index: u16, max_objects: u8, extended: u8) {
    dev.set(
        pdt_addr(0, index),
        &descriptor(TOUCH_QUERY, 0, TOUCH_CONTROL, TOUCH_DATA, 2, 0x12),
    );
    let query6 = [0x0E, 0x01, 0x03, 0x01, 0x05, 0x1F, 0x01, 0x01, 0x01, 0x01];
    dev.set_block(TOUCH_QUERY + 5, &[query6.len() as u8, 0x00, 0x01, 0x90, 0x18]);
    dev.set_block(TOUCH_QUERY + 6, &query6);
    dev.set_block(TOUCH_QUERY + 7, &[4]);
    dev.set_block(TOUCH_QUERY + 8, &[0x00, 0x12, 0x80, 0x80]);

    let mut ctrl8 = [0u8; 14];
    ctrl8[..2].copy_from_slice(&F12_MAX_X.to_le_bytes());
    ctrl8[2..4].copy_from_slice(&F12_MAX_Y.to_le_bytes());
    dev.set_block(F12_CTRL8, &ctrl8);
    dev.set_block(F12_CTRL20, &[0x00, 0x00, 0x00]);
    dev.set_block(F12_CTRL23, &[0x01, max_objects, 0x00, extended, 0x00]);
    dev.set_block(TOUCH_CONTROL + 3, &[0x00]);
    dev.set_block(F12_CTRL28, &[0x00]);

    dev.set_block(F12_DATA1, &[]);
    dev.set_block(F12_DATA4, &[0; 5]);
    dev.set_block(F12_DATA15, &[0, 0]);
    dev.set_block(F12_DATA23, &[]);
}

/// F11 with two fingers, absolute reporting and the wake-gesture capability.
pub fn install_f11(dev: &FakeDevice, index: u16) {
    dev.set(
        pdt_addr(0, index),
        &descriptor(TOUCH_QUERY, 0, TOUCH_CONTROL, TOUCH_DATA, 1, 0x11),
    );
    dev.set(TOUCH_QUERY, &[0x40, 0x11, 0, 0, 0, 0]);
    dev.set(TOUCH_QUERY + 6, &[0x10]);
    let [xl, xh] = F11_MAX_X.to_le_bytes();
    let [yl, yh] = F11_MAX_Y.to_le_bytes();
    dev.set(TOUCH_CONTROL + 6, &[xl, xh, yl, yh]);
}

pub fn install_f1a(dev: &FakeDevice, index: u16, buttons: u8) {
    dev.set(
        pdt_addr(0, index),
        &descriptor(F1A_QUERY, 0, F1A_CONTROL, F1A_DATA, 1, 0x1A),
    );
    dev.set(F1A_QUERY, &[buttons - 1, 0x00]);
}

/// F01 + F12 (stylus and eraser enabled) + F1A with three buttons.
pub fn reference_device() -> FakeDevice {
    let dev = FakeDevice::new();
    install_f01(&dev, 0);
    install_f12(&dev, 1, 10, 0x06);
    install_f1a(&dev, 2, 3);
    dev
}

/// F01 + F11.
pub fn legacy_device() -> FakeDevice {
    let dev = FakeDevice::new();
    install_f01(&dev, 0);
    install_f11(&dev, 1);
    dev
}

pub fn reference_config() -> Config {
    Config {
        button_map: vec![keys::KEY_MENU, keys::KEY_HOMEPAGE, keys::KEY_BACK],
        ..Config::default()
    }
}

/// F12 object record with Z and both widths enabled (8 bytes).
pub fn f12_record(object: u8, x: u16, y: u16, z: u8, wx: u8, wy: u8) -> Vec<u8> {
    let [xl, xh] = x.to_le_bytes();
    let [yl, yh] = y.to_le_bytes();
    vec![object, xl, xh, yl, yh, z, wx, wy]
}

pub type TestController = Controller<FakeDevice, RecordingDelay, SharedSink, RecordingPower>;

pub struct Rig {
    pub dev: FakeDevice,
    pub delay: RecordingDelay,
    pub sink: SharedSink,
    pub power: RecordingPower,
    pub expansions: Arc<ExpansionRegistry<FakeDevice>>,
    pub ctl: TestController,
}

pub fn rig(dev: FakeDevice, config: Config) -> Rig {
    rig_with(dev, config, Arc::new(ExpansionRegistry::new()))
}

pub fn rig_with(dev: FakeDevice, config: Config, expansions: Arc<ExpansionRegistry<FakeDevice>>) -> Rig {
    let delay = RecordingDelay::default();
    let sink = SharedSink::default();
    let power = RecordingPower::default();
    let ctl = Controller::new(
        dev.clone(),
        delay.clone(),
        power.clone(),
        sink.clone(),
        config,
        expansions.clone(),
    );
    Rig {
        dev,
        delay,
        sink,
        power,
        expansions,
        ctl,
    }
}

/// Raise the interrupt-source bits in `sources` for the next status read.
pub fn assert_irq(dev: &FakeDevice, sources: u8) {
    dev.set(F01_DATA, &[0x00, sources]);
}
