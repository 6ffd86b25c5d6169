//! Error handling for the mboxid library.
//!
//! Two very different things can go wrong during Modbus communication and
//! they must not be conflated:
//!
//! - **Modbus exceptions** are values carried on the wire. A server answers
//!   a malformed or unserviceable request with a two byte exception PDU,
//!   and a client surfaces that PDU as [`ModbusError::Exception`]. The
//!   connection remains usable afterwards.
//! - **Native errors** are faults of the transport or of the program
//!   itself: timeouts, closed connections, parse failures, address
//!   resolution problems. They unwind the current operation; depending on
//!   the kind the connection may have to be abandoned.
//!
//! [`ModbusError::is_modbus_exception`] tells the two classes apart.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias used throughout the library.
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Modbus exception codes as defined by the application protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    NegativeAcknowledge = 0x07,
    MemoryParityError = 0x08,
    NotDefined = 0x09,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetFailedToRespond = 0x0B,
}

impl ModbusException {
    /// Convert from a wire byte. Returns `None` for codes outside the
    /// exception range.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ModbusException::IllegalFunction),
            0x02 => Some(ModbusException::IllegalDataAddress),
            0x03 => Some(ModbusException::IllegalDataValue),
            0x04 => Some(ModbusException::ServerDeviceFailure),
            0x05 => Some(ModbusException::Acknowledge),
            0x06 => Some(ModbusException::ServerDeviceBusy),
            0x07 => Some(ModbusException::NegativeAcknowledge),
            0x08 => Some(ModbusException::MemoryParityError),
            0x09 => Some(ModbusException::NotDefined),
            0x0A => Some(ModbusException::GatewayPathUnavailable),
            0x0B => Some(ModbusException::GatewayTargetFailedToRespond),
            _ => None,
        }
    }

    /// Convert to the wire byte.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable description from the protocol specification.
    pub fn description(self) -> &'static str {
        match self {
            ModbusException::IllegalFunction => "illegal function",
            ModbusException::IllegalDataAddress => "illegal data address",
            ModbusException::IllegalDataValue => "illegal data value",
            ModbusException::ServerDeviceFailure => "server device failure",
            ModbusException::Acknowledge => "acknowledge",
            ModbusException::ServerDeviceBusy => "server device busy",
            ModbusException::NegativeAcknowledge => "negative acknowledge",
            ModbusException::MemoryParityError => "memory parity error",
            ModbusException::NotDefined => "not defined",
            ModbusException::GatewayPathUnavailable => "gateway path unavailable",
            ModbusException::GatewayTargetFailedToRespond => {
                "gateway target device failed to respond"
            }
        }
    }
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.description(), self.to_u8())
    }
}

/// Errors raised by the mboxid library.
///
/// The variants cover the Modbus exception range as a single
/// [`Exception`](ModbusError::Exception) carrying the code, and the native
/// error kinds of the transport and protocol layers.
#[derive(Error, Debug, Clone)]
pub enum ModbusError {
    /// A Modbus exception received from (or produced for) the peer.
    #[error("modbus exception: {0}")]
    Exception(ModbusException),

    /// An argument failed validation before any I/O took place.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// An internal invariant was violated; indicates a bug.
    #[error("logic error: {message}")]
    LogicError { message: String },

    /// Host name or service resolution failed.
    #[error("address resolution failed: {message}")]
    AddrResolution { message: String },

    /// The server could not bind or listen on any resolved endpoint.
    #[error("passive open failed: {message}")]
    PassiveOpen { message: String },

    /// The client could not connect to any resolved endpoint.
    #[error("active open failed: {message}")]
    ActiveOpen { message: String },

    /// Received bytes violate the framing or PDU rules.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// An operation exceeded its deadline.
    #[error("timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The client has no established connection.
    #[error("not connected")]
    NotConnected,

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// An operating system level I/O failure.
    #[error("I/O error: {message}")]
    Io { message: String, errno: Option<i32> },
}

impl ModbusError {
    /// Create an exception error from a code.
    pub fn exception(code: ModbusException) -> Self {
        Self::Exception(code)
    }

    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    pub fn logic<S: Into<String>>(message: S) -> Self {
        Self::LogicError { message: message.into() }
    }

    pub fn addr_resolution<S: Into<String>>(message: S) -> Self {
        Self::AddrResolution { message: message.into() }
    }

    pub fn passive_open<S: Into<String>>(message: S) -> Self {
        Self::PassiveOpen { message: message.into() }
    }

    pub fn active_open<S: Into<String>>(message: S) -> Self {
        Self::ActiveOpen { message: message.into() }
    }

    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse { message: message.into() }
    }

    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout { operation: operation.into(), timeout_ms }
    }

    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into(), errno: None }
    }

    /// `true` if this error is a Modbus protocol exception, i.e. a value
    /// carried on the wire rather than a fault of the transport.
    pub fn is_modbus_exception(&self) -> bool {
        matches!(self, Self::Exception(_))
    }

    /// `true` for errors of the transport underneath the protocol.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::NotConnected
                | Self::ConnectionClosed
                | Self::Io { .. }
        )
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::Io { message: err.to_string(), errno: err.raw_os_error() }
    }
}
