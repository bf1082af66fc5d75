//! F11: legacy 2D sensor.
//!
//! Reports are a 2-bit-per-finger status bitmap followed by a fixed 5-byte record per
//! finger. The register chain after query 5 is conditional on capability bits; it is
//! walked only to find the wake-gesture flag (data 38).

use alloc::vec::Vec;

use super::{alloc_buffer, palm_event, read_reg, read_regs, write_reg, BaseAddresses, ReportContext};
use crate::bus::Transport;
use crate::data_types::{Orientation, SensorGeometry};
use crate::error::{Error, ProtocolError};
use crate::event::{Contact, ContactStatus, Frame, ToolType};
use crate::registers::{
    f11_contact_count, f11_max_position, F11_CONTINUOUS_MODE, F11_CTRL_MAX_POSITION_OFFSET, F11_QUERY_0_5_LEN,
    F11_RECORD_SIZE, F11_REPORT_MODE_MASK, F11_WAKEUP_GESTURE_MODE, MAX_F11_TOUCH_WIDTH,
};

/// Capability bits of queries 0-5.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Query0to5(pub [u8; F11_QUERY_0_5_LEN]);

impl Query0to5 {
    pub fn has_query_9(&self) -> bool {
        self.0[0] & (1 << 3) != 0
    }
    pub fn has_query_11(&self) -> bool {
        self.0[0] & (1 << 4) != 0
    }
    pub fn has_query_12(&self) -> bool {
        self.0[0] & (1 << 5) != 0
    }
    pub fn has_query_27(&self) -> bool {
        self.0[0] & (1 << 6) != 0
    }
    pub fn finger_code(&self) -> u8 {
        self.0[1] & 0x07
    }
    pub fn has_rel(&self) -> bool {
        self.0[1] & (1 << 3) != 0
    }
    pub fn has_abs(&self) -> bool {
        self.0[1] & (1 << 4) != 0
    }
    pub fn has_gestures(&self) -> bool {
        self.0[1] & (1 << 5) != 0
    }
    pub fn has_bending_correction(&self) -> bool {
        self.0[5] & (1 << 5) != 0
    }
    pub fn has_large_object_suppression(&self) -> bool {
        self.0[5] & (1 << 6) != 0
    }
    pub fn has_jitter_filter(&self) -> bool {
        self.0[5] & (1 << 7) != 0
    }
}

/// Gesture capability bytes (queries 7 and 8).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Query7to8(pub [u8; 2]);

impl Query7to8 {
    fn bit(&self, byte: usize, bit: u8) -> bool {
        self.0[byte] & (1 << bit) != 0
    }
    pub fn has_flick(&self) -> bool {
        self.bit(0, 4)
    }
    pub fn has_pinch(&self) -> bool {
        self.bit(0, 6)
    }
    pub fn has_chiral_scroll(&self) -> bool {
        self.bit(0, 7)
    }
    pub fn has_rotate(&self) -> bool {
        self.bit(1, 1)
    }
    pub fn has_touch_shapes(&self) -> bool {
        self.bit(1, 2)
    }
    pub fn has_scroll_zones(&self) -> bool {
        self.bit(1, 3)
    }
    pub fn individual_scroll_zones(&self) -> bool {
        self.bit(1, 4)
    }
    pub fn has_multi_finger_scroll(&self) -> bool {
        self.bit(1, 5)
    }
}

/// Optional capability queries the data-register chain depends on.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OptionalQueries {
    pub q0_5: Query0to5,
    pub q7_8: Query7to8,
    pub q9: u8,
    pub q12: u8,
    pub q27: u8,
}

impl OptionalQueries {
    fn has_contact_geometry(&self) -> bool {
        self.q0_5.has_query_9() && self.q9 & (1 << 5) != 0
    }
    fn has_pen_hover_discrimination(&self) -> bool {
        self.q0_5.has_query_9() && self.q9 & (1 << 6) != 0
    }
    fn has_small_object_tuning(&self) -> bool {
        self.q0_5.has_query_12() && self.q12 & (1 << 1) != 0
    }
    fn has_8bit_w(&self) -> bool {
        self.q0_5.has_query_12() && self.q12 & (1 << 2) != 0
    }
    fn has_general_information_2(&self) -> bool {
        self.q0_5.has_query_12() && self.q12 & (1 << 4) != 0
    }
    fn has_physical_properties(&self) -> bool {
        self.q0_5.has_query_12() && self.q12 & (1 << 5) != 0
    }
    fn q27_b0(&self) -> bool {
        self.q0_5.has_query_27() && self.q27 & 1 != 0
    }
    pub fn has_wakeup_gesture(&self) -> bool {
        self.q0_5.has_query_27() && self.q27 & (1 << 4) != 0
    }
    fn has_data_37(&self) -> bool {
        self.q0_5.has_query_27() && self.q27 & (1 << 6) != 0
    }

    /// Offset of data 38 (the wake-gesture flag) from the data base.
    pub fn data38_offset(&self, fingers: u8) -> u16 {
        let q = &self.q0_5;
        let g = &self.q7_8;
        let n = fingers as u16;
        let gestures = q.has_gestures();

        // data 0: finger status, data 1-5: finger records
        let mut offset = n.div_ceil(4) + 5 * n;
        // data 6-7
        if q.has_rel() {
            offset += 2 * n;
        }
        // data 8
        if gestures && g.0[0] != 0 {
            offset += 1;
        }
        // data 9
        if gestures && (g.0[0] != 0 || g.0[1] != 0) {
            offset += 1;
        }
        // data 10
        if gestures && (g.has_pinch() || g.has_flick()) {
            offset += 1;
        }
        // data 11-12
        if gestures && (g.has_flick() || g.has_rotate()) {
            offset += 2;
        }
        // data 13
        if gestures && g.has_touch_shapes() {
            offset += n.div_ceil(4);
        }
        // data 14-15
        if gestures && (g.has_scroll_zones() || g.has_multi_finger_scroll() || g.has_chiral_scroll()) {
            offset += 2;
        }
        // data 16-17
        if gestures && g.has_scroll_zones() && g.individual_scroll_zones() {
            offset += 2;
        }
        // data 18-27
        if self.has_contact_geometry() {
            offset += 10 * n;
        }
        // data 28
        if q.has_bending_correction() || q.has_large_object_suppression() {
            offset += 1;
        }
        // data 29-31
        if self.has_pen_hover_discrimination() {
            offset += 3;
        }
        // data 32
        if self.has_small_object_tuning() {
            offset += 1;
        }
        // data 33-34
        if self.q27_b0() {
            offset += 2;
        }
        // data 35
        if self.has_8bit_w() {
            offset += n;
        }
        // data 36
        if q.has_bending_correction() {
            offset += 1;
        }
        // data 37
        if self.has_data_37() {
            offset += 1;
        }
        offset
    }
}

/// Decoded 5-byte finger record.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FingerRecord {
    pub x: u16,
    pub y: u16,
    pub wx: u8,
    pub wy: u8,
    pub z: u8,
}

impl FingerRecord {
    pub fn parse(raw: &[u8]) -> Self {
        Self {
            x: ((raw[0] as u16) << 4) | (raw[2] & 0x0F) as u16,
            y: ((raw[1] as u16) << 4) | (raw[2] >> 4) as u16,
            wx: raw[3] & 0x0F,
            wy: raw[3] >> 4,
            z: raw[4],
        }
    }
}

/// 2-bit status of `finger` from the status bitmap.
pub fn finger_status(status: &[u8], finger: u8) -> ContactStatus {
    let byte = status.get(finger as usize / 4).copied().unwrap_or(0);
    match (byte >> ((finger % 4) * 2)) & 0x03 {
        0 => ContactStatus::Absent,
        2 => ContactStatus::Inaccurate,
        // 3 is reserved and reported as present
        _ => ContactStatus::Present,
    }
}

#[derive(Debug)]
pub struct F11 {
    base: BaseAddresses,
    max_contacts: u8,
    geometry: SensorGeometry,
    queries: OptionalQueries,
    data38_offset: Option<u16>,
    /// Status bitmap plus all finger records, read in one transaction.
    buffer: Vec<u8>,
}

impl F11 {
    /// Negotiate the layout advertised by the query registers.
    pub fn init<T: Transport>(
        bus: &mut T,
        base: BaseAddresses,
        orientation: &Orientation,
    ) -> Result<Self, Error<T::Error>> {
        let mut q = [0u8; F11_QUERY_0_5_LEN];
        read_regs(bus, base.query, &mut q)?;
        let q0_5 = Query0to5(q);
        let max_contacts =
            f11_contact_count(q0_5.finger_code()).ok_or(ProtocolError::UnsupportedContactCount(q0_5.finger_code()))?;

        let mut ctrl = [0u8; 4];
        read_regs(bus, base.control + F11_CTRL_MAX_POSITION_OFFSET, &mut ctrl)?;
        let mut geometry = SensorGeometry {
            max_x: f11_max_position(ctrl[0], ctrl[1]),
            max_y: f11_max_position(ctrl[2], ctrl[3]),
            max_touch_width: MAX_F11_TOUCH_WIDTH,
        };
        log::debug!(
            "F11 max contacts {}, sensor {}x{}",
            max_contacts,
            geometry.max_x,
            geometry.max_y
        );
        if orientation.swap_axes {
            core::mem::swap(&mut geometry.max_x, &mut geometry.max_y);
        }

        let queries = Self::read_optional_queries(bus, base, q0_5)?;
        let data38_offset = queries
            .has_wakeup_gesture()
            .then(|| queries.data38_offset(max_contacts));

        let status_len = (max_contacts as usize).div_ceil(4);
        let buffer = alloc_buffer(status_len + F11_RECORD_SIZE * max_contacts as usize)?;

        Ok(Self {
            base,
            max_contacts,
            geometry,
            queries,
            data38_offset,
            buffer,
        })
    }

    fn read_optional_queries<T: Transport>(
        bus: &mut T,
        base: BaseAddresses,
        q0_5: Query0to5,
    ) -> Result<OptionalQueries, Error<T::Error>> {
        let mut out = OptionalQueries {
            q0_5,
            ..OptionalQueries::default()
        };
        let mut offset = F11_QUERY_0_5_LEN as u16;
        // query 6
        if q0_5.has_rel() {
            offset += 1;
        }
        // queries 7-8
        if q0_5.has_gestures() {
            read_regs(bus, base.query + offset, &mut out.q7_8.0)?;
            offset += 2;
        }
        // query 9
        if q0_5.has_query_9() {
            out.q9 = read_reg(bus, base.query + offset)?;
            offset += 1;
        }
        // query 10
        if q0_5.has_gestures() && out.q7_8.has_touch_shapes() {
            offset += 1;
        }
        // query 11
        if q0_5.has_query_11() {
            offset += 1;
        }
        // query 12
        if q0_5.has_query_12() {
            out.q12 = read_reg(bus, base.query + offset)?;
            offset += 1;
        }
        // query 13
        if q0_5.has_jitter_filter() {
            offset += 1;
        }
        // query 14
        if out.has_general_information_2() {
            offset += 1;
        }
        // queries 15-26
        if out.has_physical_properties() {
            offset += 12;
        }
        // query 27
        if q0_5.has_query_27() {
            out.q27 = read_reg(bus, base.query + offset)?;
        }
        Ok(out)
    }

    pub fn max_contacts(&self) -> u8 {
        self.max_contacts
    }

    pub fn geometry(&self) -> SensorGeometry {
        self.geometry
    }

    pub fn queries(&self) -> &OptionalQueries {
        &self.queries
    }

    pub fn has_wakeup_gesture(&self) -> bool {
        self.data38_offset.is_some()
    }

    pub fn data38_offset(&self) -> Option<u16> {
        self.data38_offset
    }

    /// Switch between continuous reporting and wake-gesture-only reporting.
    pub fn set_wakeup_mode<T: Transport>(&self, bus: &mut T, wakeup: bool) -> Result<(), Error<T::Error>> {
        let mode = if wakeup { F11_WAKEUP_GESTURE_MODE } else { F11_CONTINUOUS_MODE };
        let cur = read_reg(bus, self.base.control)?;
        write_reg(bus, self.base.control, (cur & !F11_REPORT_MODE_MASK) | mode)
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

        if let Some(flag_addr) = ctx.config.legacy_palm.flag_register {
            if read_reg(bus, flag_addr)? != 0 {
                palm_event(ctx.config.legacy_palm.policy, self.max_contacts, ctx, frame);
                return Ok(0);
            }
        }

        read_regs(bus, self.base.data, &mut self.buffer)?;
        let status_len = (self.max_contacts as usize).div_ceil(4);
        let (status, records) = self.buffer.split_at(status_len);

        let mut touch_count = 0;
        for finger in 0..self.max_contacts {
            let state = finger_status(status, finger);
            if state == ContactStatus::Absent {
                frame.contact(Contact::lifted(finger));
                continue;
            }
            let start = finger as usize * F11_RECORD_SIZE;
            let rec = FingerRecord::parse(&records[start..start + F11_RECORD_SIZE]);
            let (x, y) = ctx
                .config
                .orientation
                .apply(rec.x, rec.y, ctx.geometry.max_x, ctx.geometry.max_y);

            if ctx.config.x_band.is_some_and(|band| !band.contains(x)) {
                frame.contact(Contact::lifted(finger));
                continue;
            }

            frame.contact(Contact {
                slot: finger,
                status: state,
                tool: ToolType::Finger,
                x,
                y,
                major: rec.wx.max(rec.wy),
                minor: rec.wx.min(rec.wy),
                pressure: None,
            });
            touch_count += 1;
        }
        frame.sync();
        Ok(touch_count)
    }

    /// One wake key per detection; later reports decode contacts again.
    fn report_gesture<T: Transport>(
        &self,
        bus: &mut T,
        ctx: &mut ReportContext<'_>,
        frame: &mut Frame,
    ) -> Result<u8, Error<T::Error>> {
        let Some(offset) = self.data38_offset else {
            return Ok(0);
        };
        if read_reg(bus, self.base.data + offset)? != 0 {
            log::info!("F11 wake gesture detected");
            frame.key_tap(ctx.config.wake_key);
            ctx.flags.suspended = false;
        }
        Ok(0)
    }
}
