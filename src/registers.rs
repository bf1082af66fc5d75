//! Register map and constants for RMI4 devices.
//! Function-relative layouts are negotiated at runtime; only fixed locations and bit
//! definitions live here.

/// Common 7-bit I2C address for RMI4 touch controllers.
pub const DEFAULT_I2C_ADDRESS: u8 = 0x20;

/// Register that selects the active 256-byte page on paged transports.
pub const PAGE_SELECT_REGISTER: u8 = 0xFF;
/// Page Description Table: first (highest) entry address within a page.
pub const PDT_START: u16 = 0x00E9;
/// Page Description Table: entries must lie strictly above this address.
pub const PDT_END: u16 = 0x00D0;
pub const PDT_ENTRY_SIZE: u16 = 6;
/// Number of pages walked during discovery.
pub const PAGES_TO_SERVICE: u8 = 10;
/// Interrupt status/enable registers supported (8 sources each).
pub const MAX_INTR_REGISTERS: usize = 4;

/// Function numbers found in the descriptor table.
pub mod function {
    pub const DEVICE_CONTROL: u8 = 0x01;
    pub const TOUCH_2D_LEGACY: u8 = 0x11;
    pub const TOUCH_2D: u8 = 0x12;
    pub const BUTTONS: u8 = 0x1A;
    /// Microbootloader, present when the application firmware is missing.
    pub const BOOTLOADER: u8 = 0x35;
}

/// F01 device status codes (low nibble of data register 0).
pub mod status {
    pub const NO_ERROR: u8 = 0x00;
    pub const RESET_OCCURRED: u8 = 0x01;
    pub const INVALID_CONFIG: u8 = 0x02;
    pub const DEVICE_FAILURE: u8 = 0x03;
    pub const CONFIG_CRC_FAILURE: u8 = 0x04;
    pub const FIRMWARE_CRC_FAILURE: u8 = 0x05;
    pub const CRC_IN_PROGRESS: u8 = 0x06;
}

/// Logical key codes (Linux input numbering) used by default.
pub mod keys {
    pub const KEY_F9: u16 = 67;
    pub const KEY_MENU: u16 = 139;
    pub const KEY_WAKEUP: u16 = 143;
    pub const KEY_BACK: u16 = 158;
    pub const KEY_HOMEPAGE: u16 = 172;
}

/// F01 layout.
pub const F01_STD_QUERY_LEN: usize = 21;
pub const F01_PRODUCT_ID_OFFSET: usize = 11;
pub const PRODUCT_ID_SIZE: usize = 10;
pub const F01_BUILD_ID_OFFSET: u16 = 18;
/// Written to the F01 command register to soft-reset the controller.
pub const F01_CMD_RESET: u8 = 0x01;
/// Manufacturer id reported by Synaptics parts.
pub const MANUFACTURER_SYNAPTICS: u8 = 1;

/// F11 layout.
pub const F11_QUERY_0_5_LEN: usize = 6;
pub const F11_CTRL_MAX_POSITION_OFFSET: u16 = 6;
pub const F11_RECORD_SIZE: usize = 5;
pub const F11_CONTINUOUS_MODE: u8 = 0x00;
pub const F11_WAKEUP_GESTURE_MODE: u8 = 0x04;
pub const F11_REPORT_MODE_MASK: u8 = 0x07;
pub const MAX_F11_TOUCH_WIDTH: u8 = 15;

/// F12 layout.
pub const F12_QUERY_5_OFFSET: u16 = 5;
pub const F12_QUERY_6_OFFSET: u16 = 6;
pub const F12_QUERY_7_OFFSET: u16 = 7;
pub const F12_QUERY_8_OFFSET: u16 = 8;
/// Bytes of control-register presence in query 5 (after its size byte).
pub const F12_CTRL_PRESENCE_LEN: usize = 4;
/// Upper bound on data-register presence bytes kept from query 8.
pub const F12_DATA_PRESENCE_MAX: usize = 3;
pub const F12_CTRL8_LEN: usize = 14;
pub const F12_CTRL31_LEN: usize = 12;
pub const F12_CTRL20_LEN: usize = 3;
pub const F12_CONTINUOUS_MODE: u8 = 0x00;
pub const F12_WAKEUP_GESTURE_MODE: u8 = 0x02;
/// Gesture type reported while the gesture engine is merely armed.
pub const F12_UDG_DETECT: u8 = 0x0F;
pub const F12_GESTURE_DETECTION_LEN: usize = 5;
pub const F12_FINGERS_TO_SUPPORT: u8 = 10;
pub const MAX_F12_TOUCH_WIDTH: u8 = 255;
pub const MAX_F12_TOUCH_PRESSURE: u8 = 255;

/// F12 control register numbers used during negotiation.
pub mod f12_ctrl {
    pub const SENSOR_TUNING: u8 = 8;
    pub const REPORT_MODE: u8 = 20;
    pub const OBJECT_REPORT: u8 = 23;
    pub const GESTURE_ENABLE: u8 = 27;
    pub const REPORT_ENABLE: u8 = 28;
    pub const WEDGE_TUNING: u8 = 31;
}

/// F12 data register numbers used during negotiation.
pub mod f12_data {
    pub const FINGER_DATA: u8 = 1;
    pub const GESTURE_DETECTION: u8 = 4;
    pub const OBJECT_PRESENCE: u8 = 15;
    pub const PRESSURE: u8 = 23;
}

/// F1A layout.
pub const F1A_QUERY_LEN: usize = 2;

/// Default timings (milliseconds).
pub const RESET_DELAY_MS: u32 = 100;
pub const REBUILD_WORK_DELAY_MS: u32 = 500;
pub const EXP_FN_WORK_DELAY_MS: u32 = 500;
pub const CHECK_STATUS_TIMEOUT_MS: u32 = 100;
pub const STATUS_POLL_INTERVAL_MS: u32 = 20;
pub const POWER_SETTLE_MS: u32 = 20;
pub const RESET_PULSE_MS: u32 = 10;
/// Discovery restarts tolerated when the device keeps rebooting mid-scan.
pub const MAX_SCAN_RESTARTS: u8 = 3;
pub const MAX_RECOVERY_ATTEMPTS: u8 = 10;

bitflags::bitflags! {
    /// F01 control 0 (device control).
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct DeviceControl: u8 {
        /// Bit 0: force sensor sleep.
        const SENSOR_SLEEP = 1 << 0;
        const SLEEP_MODE1  = 1 << 1;
        /// Bit 2: keep the sensor from dozing.
        const NO_SLEEP     = 1 << 2;
        /// Bit 5: charger connected (noise mitigation).
        const CHARGER      = 1 << 5;
        const REPORT_RATE  = 1 << 6;
        /// Bit 7: host has configured the device.
        const CONFIGURED   = 1 << 7;
    }

    /// F12 control 28 report enables.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct ReportEnable: u8 {
        const TYPE  = 1 << 0;
        const X_LSB = 1 << 1;
        const X_MSB = 1 << 2;
        const Y_LSB = 1 << 3;
        const Y_MSB = 1 << 4;
        const Z     = 1 << 5;
        const WX    = 1 << 6;
        const WY    = 1 << 7;
        const DEFAULT = Self::TYPE.bits() | Self::X_LSB.bits() | Self::X_MSB.bits()
            | Self::Y_LSB.bits() | Self::Y_MSB.bits();
    }

    /// F12 control 23 byte 0: object types the firmware classifies.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct ObjectEnable: u8 {
        const FINGER        = 1 << 0;
        const ACTIVE_STYLUS = 1 << 1;
        const PALM          = 1 << 2;
        const UNCLASSIFIED  = 1 << 3;
        const HOVERING      = 1 << 4;
        const GLOVED        = 1 << 5;
    }

    /// F12 control 23 byte 3: extended object enables.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct ExtendedObjectEnable: u8 {
        const COVER        = 1 << 0;
        const STYLUS       = 1 << 1;
        const ERASER       = 1 << 2;
        const SMALL_OBJECT = 1 << 3;
    }

    /// F1A query 1 capability bits.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct ButtonCaps: u8 {
        const GENERAL_CONTROL   = 1 << 0;
        const INTERRUPT_ENABLE  = 1 << 1;
        const MULTIBUTTON       = 1 << 2;
        const TX_RX_MAP         = 1 << 3;
        const PERBUTTON_THRESH  = 1 << 4;
        const RELEASE_THRESH    = 1 << 5;
        const HYSTERESIS        = 1 << 6;
        const FILTER_STRENGTH   = 1 << 7;
    }
}

/// Sleep-mode field of F01 control 0 (bits 0-2).
pub const SLEEP_MODE_MASK: u8 = 0x07;

/// F01 data 0, decoded with explicit accessors.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DeviceStatus(pub u8);

impl DeviceStatus {
    pub fn code(self) -> u8 {
        self.0 & 0x0F
    }

    /// Bit 6: device is running its bootloader.
    pub fn flash_prog(self) -> bool {
        self.0 & (1 << 6) != 0
    }

    /// Bit 7: device lost its host configuration (it has reset).
    pub fn unconfigured(self) -> bool {
        self.0 & (1 << 7) != 0
    }

    pub fn crc_in_progress(self) -> bool {
        self.code() == status::CRC_IN_PROGRESS
    }

    /// Unconfigured outside of bootloader mode: the controller reset on its own.
    pub fn spontaneous_reset(self) -> bool {
        self.unconfigured() && !self.flash_prog()
    }
}

/// Decode the F11 query-1 finger count field into a contact count.
pub fn f11_contact_count(code: u8) -> Option<u8> {
    match code & 0x07 {
        n @ 0..=4 => Some(n + 1),
        5 => Some(10),
        _ => None,
    }
}

/// Decode a 12-bit F11 position stored as low byte plus high nibble.
pub fn f11_max_position(lsb: u8, msb: u8) -> u16 {
    lsb as u16 | (((msb & 0x0F) as u16) << 8)
}

/// Control 0 value for the given sleep state, preserving the other bits.
/// Sleeping always clears no-sleep; waking restores the board's no-sleep choice.
pub fn sleep_control(current: u8, sleep: bool, no_sleep: bool) -> u8 {
    let mode = if sleep {
        DeviceControl::SENSOR_SLEEP
    } else if no_sleep {
        DeviceControl::NO_SLEEP
    } else {
        DeviceControl::empty()
    };
    (current & !SLEEP_MODE_MASK) | mode.bits()
}
