//! Error definitions for the RMI4 touch driver.

/// Reasons a negotiated register layout could not be trusted.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProtocolError {
    /// Register number beyond what the presence bitmap can describe.
    RegisterOutOfRange { register: u8 },
    /// Register required for negotiation is not advertised as present.
    RegisterAbsent { register: u8 },
    /// Descriptor block ended before the walk found what it needed.
    DescriptorTruncated,
    /// Legacy 2D query reported a finger count encoding we do not know.
    UnsupportedContactCount(u8),
    /// Current 2D control reported zero reportable objects.
    NoContacts,
    /// Interrupt sources would exceed the available interrupt registers.
    InterruptOverflow,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug)]
pub enum Error<E> {
    /// Underlying bus read or write failed.
    Transport(E),
    /// Register layout advertised by the device is inconsistent.
    Protocol(ProtocolError),
    /// Status polling exceeded its bound.
    DeviceUnresponsive,
    /// Buffer reservation for a function handler failed.
    AllocationFailure,
    /// Neither the device control function nor a bootloader was found.
    DiscoveryFailed,
    /// Board configuration cannot drive the device.
    InvalidConfig,
    /// Operation requires a discovered device control function.
    NotReady,
}

impl<E> From<ProtocolError> for Error<E> {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl<E> Error<E> {
    /// True for errors that only invalidate the function being negotiated.
    pub fn is_function_local(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_) | Error::AllocationFailure | Error::InvalidConfig
        )
    }
}

impl core::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ProtocolError::RegisterOutOfRange { register } => {
                write!(f, "register {} beyond presence bitmap", register)
            }
            ProtocolError::RegisterAbsent { register } => write!(f, "register {} not present", register),
            ProtocolError::DescriptorTruncated => write!(f, "descriptor block truncated"),
            ProtocolError::UnsupportedContactCount(n) => write!(f, "unsupported contact count code {}", n),
            ProtocolError::NoContacts => write!(f, "function reports zero objects"),
            ProtocolError::InterruptOverflow => write!(f, "interrupt sources exceed register bank"),
        }
    }
}

impl<E: core::fmt::Debug> core::fmt::Display for Error<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Transport(e) => write!(f, "transport error: {:?}", e),
            Error::Protocol(p) => write!(f, "protocol inconsistency: {}", p),
            Error::DeviceUnresponsive => write!(f, "device unresponsive"),
            Error::AllocationFailure => write!(f, "allocation failure"),
            Error::DiscoveryFailed => write!(f, "no device control or bootloader function found"),
            Error::InvalidConfig => write!(f, "invalid board configuration"),
            Error::NotReady => write!(f, "device not discovered"),
        }
    }
}
