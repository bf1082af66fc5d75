//! F12: current 2D sensor.
//!
//! Control and data registers are sparse: query 5 and query 8 carry presence bitmaps,
//! query 6 describes control subpackets. Per-object records are reported with a type
//! byte so fingers, palms and styli share one slot space.

use alloc::vec::Vec;

use super::{alloc_buffer, palm_event, read_reg, read_regs, write_regs, BaseAddresses, ReportContext};
use crate::bus::Transport;
use crate::data_types::{Config, ObjectType, PalmPolicy, SensorGeometry};
use crate::error::{Error, ProtocolError};
use crate::event::{Contact, ContactStatus, Event, Frame, StylusState, StylusTool, ToolType};
use crate::query::{count_subpackets, PresenceMap};
use crate::registers::{
    f12_ctrl, f12_data, ExtendedObjectEnable, ObjectEnable, ReportEnable, F12_CONTINUOUS_MODE, F12_CTRL20_LEN,
    F12_CTRL31_LEN, F12_CTRL8_LEN, F12_CTRL_PRESENCE_LEN, F12_DATA_PRESENCE_MAX, F12_FINGERS_TO_SUPPORT,
    F12_GESTURE_DETECTION_LEN, F12_QUERY_5_OFFSET, F12_QUERY_6_OFFSET, F12_QUERY_7_OFFSET, F12_QUERY_8_OFFSET,
    F12_UDG_DETECT, F12_WAKEUP_GESTURE_MODE, MAX_F12_TOUCH_WIDTH,
};

/// Number of leading slots that carry objects this cycle, from the object-presence bitmap.
///
/// The scan starts at the highest slot and walks down; the first set bit fixes the count.
pub fn fingers_to_process(presence: &[u8], max_contacts: u8) -> u8 {
    if presence.is_empty() || max_contacts == 0 {
        return max_contacts;
    }
    let mut index = presence.len() - 1;
    let mut bit = (max_contacts - 1) % 8;
    let mut count = max_contacts;
    loop {
        if presence[index] & (1 << bit) != 0 {
            break;
        }
        if bit > 0 {
            bit -= 1;
        } else if index > 0 {
            index -= 1;
            bit = 7;
        }
        count -= 1;
        if count == 0 {
            break;
        }
    }
    count
}

/// Report enables for the configured optional fields.
pub fn report_enables(config: &Config) -> ReportEnable {
    let mut enable = ReportEnable::DEFAULT;
    if config.report_z {
        enable |= ReportEnable::Z;
    }
    if config.report_width {
        enable |= ReportEnable::WX | ReportEnable::WY;
    }
    enable
}

/// Decoded per-object record laid out according to the report enables.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ObjectRecord {
    pub object: ObjectType,
    pub x: u16,
    pub y: u16,
    pub z: Option<u8>,
    pub wx: u8,
    pub wy: u8,
}

impl ObjectRecord {
    pub fn parse(raw: &[u8], enables: ReportEnable) -> Self {
        let mut i = 5;
        let mut z = None;
        if enables.contains(ReportEnable::Z) {
            z = Some(raw[i]);
            i += 1;
        }
        let (wx, wy) = if enables.contains(ReportEnable::WX | ReportEnable::WY) {
            (raw[i], raw[i + 1])
        } else {
            (0, 0)
        };
        Self {
            object: ObjectType::from_raw(raw[0]),
            x: u16::from_le_bytes([raw[1], raw[2]]),
            y: u16::from_le_bytes([raw[3], raw[4]]),
            z,
            wx,
            wy,
        }
    }
}

/// Slot tracking carried between report cycles.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Tracking {
    pub fingers_active: bool,
    /// Slot that owns the stylus pointer.
    pub stylus_slot: Option<u8>,
    /// Objects processed last cycle; guards against a stale presence bitmap.
    pub objects_already_present: u8,
}

#[derive(Debug)]
pub struct F12 {
    base: BaseAddresses,
    max_contacts: u8,
    geometry: SensorGeometry,
    wedge_sensor: bool,
    objects: ObjectEnable,
    stylus: bool,
    eraser: bool,
    report_enable: ReportEnable,
    record_size: usize,
    ctrl20_addr: Option<u16>,
    ctrl28_addr: u16,
    data1_offset: u16,
    data4_offset: Option<u16>,
    data15_offset: Option<u16>,
    data23_offset: Option<u16>,
    records: Vec<u8>,
    presence: Vec<u8>,
    pressure: Vec<u8>,
    tracking: Tracking,
}

impl F12 {
    /// Negotiate the sparse register layout and program the report enables.
    pub fn init<T: Transport>(bus: &mut T, base: BaseAddresses, config: &Config) -> Result<Self, Error<T::Error>> {
        let mut query5 = [0u8; 1 + F12_CTRL_PRESENCE_LEN];
        read_regs(bus, base.query + F12_QUERY_5_OFFSET, &mut query5)?;
        let ctrl = PresenceMap::new(&query5[1..]);

        let mut query6 = alloc_buffer(query5[0] as usize)?;
        read_regs(bus, base.query + F12_QUERY_6_OFFSET, &mut query6)?;

        let ctrl23_size = 2 + count_subpackets(&ctrl, &query6, f12_ctrl::OBJECT_REPORT, 2..5)? as usize;
        let mut ctrl23 = [0u8; 5];
        read_regs(
            bus,
            base.control + ctrl.offset_of(f12_ctrl::OBJECT_REPORT),
            &mut ctrl23[..ctrl23_size],
        )?;
        let objects = ObjectEnable::from_bits_truncate(ctrl23[0]);
        let max_contacts = ctrl23[1].min(F12_FINGERS_TO_SUPPORT);
        if max_contacts == 0 {
            return Err(ProtocolError::NoContacts.into());
        }
        let extended = ExtendedObjectEnable::from_bits_truncate(ctrl23[3]);
        let stylus = config.stylus && extended.contains(ExtendedObjectEnable::STYLUS);
        let eraser = stylus && extended.contains(ExtendedObjectEnable::ERASER);

        let query8_size = read_reg(bus, base.query + F12_QUERY_7_OFFSET)? as usize;
        let mut query8 = alloc_buffer(query8_size)?;
        read_regs(bus, base.query + F12_QUERY_8_OFFSET, &mut query8)?;
        let presence_end = query8_size.min(1 + F12_DATA_PRESENCE_MAX);
        let data = PresenceMap::new(query8.get(1..presence_end).unwrap_or(&[]));

        let data1_offset = data.offset_of(f12_data::FINGER_DATA);
        let data15_offset = (query8_size >= 3)
            .then(|| data.locate(f12_data::OBJECT_PRESENCE))
            .flatten();
        let data23_offset = (query8_size >= 4)
            .then(|| data.locate(f12_data::PRESSURE))
            .flatten();

        let report_enable = report_enables(config);
        let record_size = report_enable.bits().count_ones() as usize;
        let ctrl28_addr = base.control + ctrl.offset_of(f12_ctrl::REPORT_ENABLE);
        write_regs(bus, ctrl28_addr, &[report_enable.bits()])?;

        let (mut geometry, wedge_sensor) = if ctrl.is_present(f12_ctrl::SENSOR_TUNING) {
            let mut ctrl8 = [0u8; F12_CTRL8_LEN];
            read_regs(bus, base.control + ctrl.offset_of(f12_ctrl::SENSOR_TUNING), &mut ctrl8)?;
            (Self::max_position(&ctrl8), false)
        } else if ctrl.is_present(f12_ctrl::WEDGE_TUNING) {
            let mut ctrl31 = [0u8; F12_CTRL31_LEN];
            read_regs(bus, base.control + ctrl.offset_of(f12_ctrl::WEDGE_TUNING), &mut ctrl31)?;
            (Self::max_position(&ctrl31), true)
        } else {
            return Err(ProtocolError::RegisterAbsent {
                register: f12_ctrl::WEDGE_TUNING,
            }
            .into());
        };
        log::debug!(
            "F12 max objects {}, sensor {}x{}{}",
            max_contacts,
            geometry.max_x,
            geometry.max_y,
            if wedge_sensor { " (wedge)" } else { "" }
        );
        if config.orientation.swap_axes {
            core::mem::swap(&mut geometry.max_x, &mut geometry.max_y);
        }

        let (ctrl20_addr, data4_offset) = if ctrl.is_present(f12_ctrl::GESTURE_ENABLE) {
            (
                Some(base.control + ctrl.offset_of(f12_ctrl::REPORT_MODE)),
                Some(data.offset_of(f12_data::GESTURE_DETECTION)),
            )
        } else {
            (None, None)
        };

        let records = alloc_buffer(record_size * max_contacts as usize)?;
        let presence = match data15_offset {
            Some(_) => alloc_buffer((max_contacts as usize).div_ceil(8))?,
            None => Vec::new(),
        };
        let pressure = match data23_offset {
            Some(_) => alloc_buffer(max_contacts as usize)?,
            None => Vec::new(),
        };

        Ok(Self {
            base,
            max_contacts,
            geometry,
            wedge_sensor,
            objects,
            stylus,
            eraser,
            report_enable,
            record_size,
            ctrl20_addr,
            ctrl28_addr,
            data1_offset,
            data4_offset,
            data15_offset,
            data23_offset,
            records,
            presence,
            pressure,
            tracking: Tracking::default(),
        })
    }

    fn max_position(raw: &[u8]) -> SensorGeometry {
        SensorGeometry {
            max_x: u16::from_le_bytes([raw[0], raw[1]]),
            max_y: u16::from_le_bytes([raw[2], raw[3]]),
            max_touch_width: MAX_F12_TOUCH_WIDTH,
        }
    }

    pub fn max_contacts(&self) -> u8 {
        self.max_contacts
    }

    pub fn geometry(&self) -> SensorGeometry {
        self.geometry
    }

    pub fn is_wedge_sensor(&self) -> bool {
        self.wedge_sensor
    }

    pub fn object_enables(&self) -> ObjectEnable {
        self.objects
    }

    pub fn stylus_enabled(&self) -> bool {
        self.stylus
    }

    pub fn eraser_enabled(&self) -> bool {
        self.eraser
    }

    pub fn reports_pressure(&self) -> bool {
        self.data23_offset.is_some()
    }

    pub fn has_wakeup_gesture(&self) -> bool {
        self.ctrl20_addr.is_some()
    }

    pub fn report_enable(&self) -> ReportEnable {
        self.report_enable
    }

    pub fn tracking(&self) -> Tracking {
        self.tracking
    }

    pub fn clear_tracking(&mut self) {
        self.tracking = Tracking::default();
    }

    /// Rewrite control 28; the firmware forgets it across a spontaneous reset.
    pub fn write_report_enables<T: Transport>(&self, bus: &mut T) -> Result<(), Error<T::Error>> {
        write_regs(bus, self.ctrl28_addr, &[self.report_enable.bits()])
    }

    pub fn set_wakeup_mode<T: Transport>(&self, bus: &mut T, wakeup: bool) -> Result<(), Error<T::Error>> {
        let Some(addr) = self.ctrl20_addr else {
            return Ok(());
        };
        let mut ctrl20 = [0u8; F12_CTRL20_LEN];
        read_regs(bus, addr, &mut ctrl20)?;
        ctrl20[2] = if wakeup { F12_WAKEUP_GESTURE_MODE } else { F12_CONTINUOUS_MODE };
        write_regs(bus, addr, &ctrl20)
    }

    pub fn report<T: Transport>(
        &mut self,
        bus: &mut T,
        ctx: &mut ReportContext<'_>,
        frame: &mut Frame,
    ) -> Result<u8, Error<T::Error>> {
        if ctx.flags.suspended && ctx.flags.wakeup_gesture {
            return self.report_gesture(bus, ctx, frame);
        }

        if let Some(flag_addr) = ctx.config.palm.flag_register {
            if ctx.flags.palm_detection && !ctx.flags.palm_latched && read_reg(bus, flag_addr)? != 0 {
                palm_event(ctx.config.palm.policy, self.max_contacts, ctx, frame);
                return Ok(0);
            }
        }

        let mut count = self.max_contacts;
        if let Some(offset) = self.data15_offset {
            read_regs(bus, self.base.data + offset, &mut self.presence)?;
            count = fingers_to_process(&self.presence, self.max_contacts);
        }
        count = count.max(self.tracking.objects_already_present);

        if count == 0 {
            frame.release_all(self.max_contacts, self.stylus);
            self.tracking = Tracking::default();
            return Ok(0);
        }

        let len = count as usize * self.record_size;
        read_regs(bus, self.base.data + self.data1_offset, &mut self.records[..len])?;
        if let Some(offset) = self.data23_offset {
            read_regs(bus, self.base.data + offset, &mut self.pressure[..count as usize])?;
        }

        let mut touch_count = 0;
        for slot in 0..count {
            let start = slot as usize * self.record_size;
            let rec = ObjectRecord::parse(&self.records[start..start + self.record_size], self.report_enable);
            self.tracking.objects_already_present = slot + 1;

            let (wx, wy) = if ctx.config.orientation.swap_axes { (rec.wy, rec.wx) } else { (rec.wx, rec.wy) };
            let (x, y) = ctx
                .config
                .orientation
                .apply(rec.x, rec.y, ctx.geometry.max_x, ctx.geometry.max_y);

            match rec.object {
                ObjectType::Finger | ObjectType::GlovedFinger => {
                    if self.tracking.stylus_slot.is_some() {
                        continue;
                    }
                    if ctx.config.x_band.is_some_and(|band| !band.contains(x)) {
                        frame.contact(Contact::lifted(slot));
                        continue;
                    }
                    let (major, minor) = if self.wedge_sensor { (wx, wx) } else { (wx.max(wy), wx.min(wy)) };
                    frame.contact(Contact {
                        slot,
                        status: ContactStatus::Present,
                        tool: if rec.object == ObjectType::GlovedFinger {
                            ToolType::GlovedFinger
                        } else {
                            ToolType::Finger
                        },
                        x,
                        y,
                        major,
                        minor,
                        pressure: self.data23_offset.map(|_| self.pressure[slot as usize]),
                    });
                    self.tracking.fingers_active = true;
                    touch_count += 1;
                }
                ObjectType::Palm => {
                    frame.contact(Contact::lifted(slot));
                    if let PalmPolicy::Key { .. } = ctx.config.palm.policy {
                        palm_event(ctx.config.palm.policy, self.max_contacts, ctx, frame);
                    }
                }
                ObjectType::Stylus | ObjectType::Eraser if self.stylus => {
                    if self.tracking.fingers_active {
                        frame.release_all(self.max_contacts, false);
                        self.tracking.fingers_active = false;
                    }
                    if self.tracking.stylus_slot.is_some_and(|owner| owner != slot) {
                        continue;
                    }
                    let tool = if rec.object == ObjectType::Eraser && self.eraser {
                        StylusTool::Eraser
                    } else {
                        StylusTool::Pen
                    };
                    frame.push(Event::Stylus(StylusState::Down { tool, x, y }));
                    self.tracking.stylus_slot = Some(slot);
                    touch_count += 1;
                }
                _ => frame.contact(Contact::lifted(slot)),
            }
        }

        if touch_count == 0 {
            self.tracking = Tracking::default();
            frame.release_all(self.max_contacts, self.stylus);
        } else {
            frame.sync();
        }
        Ok(touch_count)
    }

    fn report_gesture<T: Transport>(
        &self,
        bus: &mut T,
        ctx: &mut ReportContext<'_>,
        frame: &mut Frame,
    ) -> Result<u8, Error<T::Error>> {
        let Some(offset) = self.data4_offset else {
            return Ok(0);
        };
        let mut detection = [0u8; F12_GESTURE_DETECTION_LEN];
        read_regs(bus, self.base.data + offset, &mut detection)?;
        let gesture = detection[0];
        if gesture != 0 && gesture != F12_UDG_DETECT {
            log::info!("F12 wake gesture {:#04x} detected", gesture);
            frame.key_tap(ctx.config.wake_key);
        }
        Ok(0)
    }
}
