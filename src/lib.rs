//! Synaptics RMI4 touch controller driver core.
//!
//! `no_std` (with `alloc`) protocol engine for the Register-Mapped Interface:
//! Page Description Table discovery, F01 device control, F11/F12 2-D touch reports,
//! F1A capacitive buttons, the reset/suspend lifecycle and an expansion registry for
//! auxiliary features. The bus is reached through [`Transport`]; an
//! `embedded_hal::i2c::I2c` implementation with page selection is provided.

#![no_std]

extern crate alloc;

pub mod bus;
pub mod data_types;
pub mod driver;
pub mod error;
pub mod event;
pub mod expansion;
pub mod function;
mod lifecycle;
pub mod query;
pub mod registers;
pub mod scan;

pub use bus::{I2cTransport, PowerControl, ResetPin, Transport};
pub use data_types::{Config, DeviceIdentity, Lifecycle, Orientation, SensorGeometry, SuspendMode};
pub use driver::Controller;
pub use error::{Error, ProtocolError};
pub use event::{Contact, Event, EventSink};
pub use expansion::{ExpansionContext, ExpansionFeature, ExpansionRegistry, FeatureKind};
pub use registers::DEFAULT_I2C_ADDRESS;
