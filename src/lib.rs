//! # mboxid — Modbus TCP/IP server and client library
//!
//! An implementation of the Modbus Application Protocol v1.1b3 over TCP,
//! built on Tokio. The crate provides both sides of the wire:
//!
//! - a **server** ([`ModbusTcpServer`]) dispatching requests to a
//!   user-supplied [`ModbusBackend`] capability, and
//! - a **client** ([`ModbusTcpClient`]) with one operation per supported
//!   function code.
//!
//! ## Supported function codes
//!
//! | Code | Function | Client | Server |
//! |------|----------|--------|--------|
//! | 0x01 | Read Coils | ✅ | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ | ✅ |
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x04 | Read Input Registers | ✅ | ✅ |
//! | 0x05 | Write Single Coil | ✅ | ✅ |
//! | 0x06 | Write Single Register | ✅ | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ | ✅ |
//! | 0x16 | Mask Write Register | ✅ | ✅ |
//! | 0x17 | Read/Write Multiple Registers | ✅ | ✅ |
//! | 0x2B | Read Device Identification (basic) | ✅ | ✅ |
//!
//! Serial Modbus (RTU/ASCII) and Modbus over TLS are out of scope; the
//! secure default port is reserved but unused.
//!
//! ## Server example
//!
//! ```rust,no_run
//! use mboxid::{ModbusTcpServer, ModbusRegisterBank, IpVersion};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> mboxid::ModbusResult<()> {
//!     let bank = Arc::new(ModbusRegisterBank::new());
//!
//!     let mut server = ModbusTcpServer::new();
//!     server.set_server_addr("localhost", "1502", IpVersion::Any);
//!     server.set_backend(bank);
//!     server.run().await
//! }
//! ```
//!
//! ## Client example
//!
//! ```rust,no_run
//! use mboxid::{ModbusTcpClient, IpVersion};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> mboxid::ModbusResult<()> {
//!     let mut client = ModbusTcpClient::new();
//!     client
//!         .connect_to_server("localhost", "1502", IpVersion::Any,
//!                            Some(Duration::from_secs(3)))
//!         .await?;
//!
//!     client.write_single_register(100, 0x1234).await?;
//!     let values = client.read_holding_registers(100, 1).await?;
//!     assert_eq!(values, vec![0x1234]);
//!     Ok(())
//! }
//! ```

/// Error taxonomy: Modbus exceptions as values, native faults as errors.
pub mod error;

/// MBAP framing and the bit/register array codecs.
pub mod frame;

/// Server dispatch engine and client request/response codecs.
pub mod pdu;

/// The backend capability consumed by the server.
pub mod backend;

/// In-memory storage backend.
pub mod register_bank;

/// Endpoint resolution.
pub mod net;

/// Modbus TCP server.
pub mod server;

/// Modbus TCP client.
pub mod client;

/// Pluggable logging.
pub mod logging;

pub use backend::{ClientId, DefaultBackend, DeviceIdentification, ModbusBackend};
pub use client::ModbusTcpClient;
pub use error::{ModbusError, ModbusException, ModbusResult};
pub use frame::{MbapHeader, MAX_ADU_SIZE, MAX_PDU_SIZE, MBAP_HEADER_SIZE};
pub use logging::{install_logger, LogFacade, Logger, StandardLogger};
pub use net::IpVersion;
pub use pdu::{server_engine, ModbusFunction};
pub use register_bank::ModbusRegisterBank;
pub use server::{ModbusTcpServer, ServerHandle};

/// Default Modbus TCP port.
pub const SERVER_DEFAULT_PORT: &str = "502";

/// Default port for Modbus over TLS. Reserved; TLS is not implemented.
pub const SECURE_SERVER_DEFAULT_PORT: &str = "802";

/// Vendor name reported via device identification.
pub const VENDOR: &str = "mboxid";

/// Product name reported via device identification.
pub const PRODUCT_NAME: &str = "libmboxid";

/// Library version as `MAJOR.MINOR.PATCH`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version as a `(major, minor, patch)` triple.
pub fn version_triple() -> (u32, u32, u32) {
    let mut parts = VERSION.split('.').map(|p| p.parse().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

/// Verbose version string.
pub fn verbose_version() -> String {
    format!("{PRODUCT_NAME} v{VERSION}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_strings() {
        let (major, minor, patch) = version_triple();
        assert_eq!(VERSION, format!("{major}.{minor}.{patch}"));
        assert_eq!(verbose_version(), format!("libmboxid v{VERSION}"));
    }
}
