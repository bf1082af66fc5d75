//! Data types for the RMI4 touch driver: board configuration, device identity and
//! lifecycle state.

use alloc::string::String;
use alloc::vec::Vec;

use crate::registers::{
    keys, CHECK_STATUS_TIMEOUT_MS, EXP_FN_WORK_DELAY_MS, MAX_RECOVERY_ATTEMPTS, REBUILD_WORK_DELAY_MS,
    RESET_DELAY_MS,
};

/// Operating state of the controller handle.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Lifecycle {
    Active,
    /// Registry is being (re)built; also the state before the first probe.
    Resetting,
    Suspended(SuspendMode),
    /// Device answered from its bootloader; no touch functions are serviced.
    BootloaderMode,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SuspendMode {
    /// Sensor stays powered in gesture-only reporting; interrupt wakes the host.
    WakeupArmed,
    /// Sensor asleep, interrupts off, rails released.
    PowerDown,
}

/// Axis transformation applied to every decoded position.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Orientation {
    pub swap_axes: bool,
    pub flip_x: bool,
    pub flip_y: bool,
}

impl Orientation {
    /// Swap first, then flip against the post-swap maxima.
    pub fn apply(&self, x: u16, y: u16, max_x: u16, max_y: u16) -> (u16, u16) {
        let (mut x, mut y) = if self.swap_axes { (y, x) } else { (x, y) };
        if self.flip_x {
            x = max_x.saturating_sub(x);
        }
        if self.flip_y {
            y = max_y.saturating_sub(y);
        }
        (x, y)
    }
}

/// Inclusive X range outside of which contacts are reported lifted.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CoordinateBand {
    pub min: u16,
    pub max: u16,
}

impl CoordinateBand {
    pub fn contains(&self, x: u16) -> bool {
        (self.min..=self.max).contains(&x)
    }
}

/// What to do when the sensor classifies a contact as a palm.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PalmPolicy {
    /// Drop palm contacts without any side effect.
    Suppress,
    /// Emit one press/release of `code`, at most once per wake epoch.
    Key { code: u16 },
    /// Release every contact, then tap and release a synthetic contact at the sensor centre.
    SyntheticContact,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PalmConfig {
    pub policy: PalmPolicy,
    /// Vendor register that latches non-zero while a palm covers the sensor.
    pub flag_register: Option<u16>,
}

impl Default for PalmConfig {
    fn default() -> Self {
        Self {
            policy: PalmPolicy::Suppress,
            flag_register: None,
        }
    }
}

/// Virtual key zone, carried for the host and never decoded here.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VirtualKey {
    pub code: u16,
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

/// Static board configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub orientation: Orientation,
    /// Logical code per F1A button bit, in bit order.
    pub button_map: Vec<u16>,
    pub virtual_keys: Vec<VirtualKey>,
    /// Arm the wake gesture on suspend when the touch function supports it.
    pub wakeup_gesture: bool,
    pub wake_key: u16,
    pub x_band: Option<CoordinateBand>,
    /// Palm handling for the legacy 2D function.
    pub legacy_palm: PalmConfig,
    /// Palm handling for the current 2D function.
    pub palm: PalmConfig,
    /// Hold back 0D button transitions while fingers are on the 2D sensor.
    pub suppress_buttons_during_touch: bool,
    /// Route stylus/eraser objects to the stylus pointer when the firmware enables them.
    pub stylus: bool,
    pub report_z: bool,
    pub report_width: bool,
    /// Board wants the no-sleep bit set while awake.
    pub no_sleep: bool,
    /// Any function negotiation failure aborts discovery.
    pub fatal_function_errors: bool,
    pub reset_delay_ms: u32,
    pub rebuild_delay_ms: u32,
    pub expansion_delay_ms: u32,
    pub status_timeout_ms: u32,
    pub max_recovery_attempts: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            orientation: Orientation::default(),
            button_map: Vec::new(),
            virtual_keys: Vec::new(),
            wakeup_gesture: false,
            wake_key: keys::KEY_WAKEUP,
            x_band: None,
            legacy_palm: PalmConfig::default(),
            palm: PalmConfig::default(),
            suppress_buttons_during_touch: true,
            stylus: true,
            report_z: true,
            report_width: true,
            no_sleep: false,
            fatal_function_errors: false,
            reset_delay_ms: RESET_DELAY_MS,
            rebuild_delay_ms: REBUILD_WORK_DELAY_MS,
            expansion_delay_ms: EXP_FN_WORK_DELAY_MS,
            status_timeout_ms: CHECK_STATUS_TIMEOUT_MS,
            max_recovery_attempts: MAX_RECOVERY_ATTEMPTS,
        }
    }
}

/// Identity read from the device control function after discovery.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceIdentity {
    pub manufacturer_id: u8,
    pub product_props: u8,
    pub product_info: [u8; 2],
    pub product_id: String,
    pub firmware_id: u32,
    /// Device reported flash-programming mode during discovery.
    pub flash_prog: bool,
}

/// Sensor extents after axis swap.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SensorGeometry {
    pub max_x: u16,
    pub max_y: u16,
    pub max_touch_width: u8,
}

/// Object classification reported per slot by the current 2D function.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ObjectType {
    None,
    Finger,
    Stylus,
    Palm,
    Unclassified,
    HoveringFinger,
    GlovedFinger,
    NarrowObject,
    HandEdge,
    Cover,
    Eraser,
    SmallObject,
    Unknown(u8),
}

impl ObjectType {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x00 => ObjectType::None,
            0x01 => ObjectType::Finger,
            0x02 => ObjectType::Stylus,
            0x03 => ObjectType::Palm,
            0x04 => ObjectType::Unclassified,
            0x05 => ObjectType::HoveringFinger,
            0x06 => ObjectType::GlovedFinger,
            0x07 => ObjectType::NarrowObject,
            0x08 => ObjectType::HandEdge,
            0x0A => ObjectType::Cover,
            0x0B => ObjectType::Eraser,
            0x0C => ObjectType::SmallObject,
            other => ObjectType::Unknown(other),
        }
    }
}
