//! The backend capability consumed by the server.
//!
//! A backend owns the application data (coils, registers, identification
//! strings) and the connection policy. The server invokes it from its
//! processing tasks, so implementations must stay responsive: a callback
//! that blocks for more than a few milliseconds stalls the connection it
//! runs on.
//!
//! Every data operation defaults to `Exception(IllegalFunction)`, so an
//! unconfigured backend produces correct Modbus exceptions instead of
//! native errors. Returning any other [`ModbusException`] from a data
//! operation serializes that code into the response; returning a native
//! error aborts the dispatch and closes the connection.

use async_trait::async_trait;
use std::net::SocketAddr;

use crate::error::{ModbusError, ModbusException, ModbusResult};
use crate::{PRODUCT_NAME, VENDOR, VERSION};

/// Opaque identifier of an accepted client connection.
///
/// Minted by the server on accept; used to correlate
/// [`disconnect`](ModbusBackend::disconnect) and
/// `close_client_connection` calls with a connection.
pub type ClientId = u64;

/// The three basic device identification objects (function 0x2B).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentification {
    pub vendor: String,
    pub product: String,
    pub version: String,
}

impl Default for DeviceIdentification {
    fn default() -> Self {
        Self {
            vendor: VENDOR.to_string(),
            product: PRODUCT_NAME.to_string(),
            version: VERSION.to_string(),
        }
    }
}

/// Server backend: application storage and connection policy.
#[async_trait]
pub trait ModbusBackend: Send + Sync {
    /// Invoked once per accepted TCP connection before any traffic.
    /// Returning `false` closes the connection immediately.
    async fn authorize(&self, _id: ClientId, _remote_addr: &SocketAddr) -> bool {
        true
    }

    /// Invoked after the connection ends, for whatever reason.
    async fn disconnect(&self, _id: ClientId) {}

    /// Invoked after each successfully processed request.
    async fn alive(&self, _id: ClientId) {}

    /// Invoked approximately once per second while the server runs.
    ///
    /// May be used to implement per-client inactivity policies or health
    /// monitoring.
    async fn ticker(&self) {}

    async fn read_coils(&self, _addr: u16, _cnt: u16) -> ModbusResult<Vec<bool>> {
        Err(ModbusError::exception(ModbusException::IllegalFunction))
    }

    async fn read_discrete_inputs(&self, _addr: u16, _cnt: u16) -> ModbusResult<Vec<bool>> {
        Err(ModbusError::exception(ModbusException::IllegalFunction))
    }

    async fn read_holding_registers(&self, _addr: u16, _cnt: u16) -> ModbusResult<Vec<u16>> {
        Err(ModbusError::exception(ModbusException::IllegalFunction))
    }

    async fn read_input_registers(&self, _addr: u16, _cnt: u16) -> ModbusResult<Vec<u16>> {
        Err(ModbusError::exception(ModbusException::IllegalFunction))
    }

    async fn write_coils(&self, _addr: u16, _bits: &[bool]) -> ModbusResult<()> {
        Err(ModbusError::exception(ModbusException::IllegalFunction))
    }

    async fn write_holding_registers(&self, _addr: u16, _regs: &[u16]) -> ModbusResult<()> {
        Err(ModbusError::exception(ModbusException::IllegalFunction))
    }

    /// Write `regs` at `wr_addr`, then read `rd_cnt` registers at
    /// `rd_addr`, as one atomic operation.
    async fn write_read_holding_registers(
        &self,
        _wr_addr: u16,
        _regs: &[u16],
        _rd_addr: u16,
        _rd_cnt: u16,
    ) -> ModbusResult<Vec<u16>> {
        Err(ModbusError::exception(ModbusException::IllegalFunction))
    }

    async fn get_basic_device_identification(&self) -> ModbusResult<DeviceIdentification> {
        Err(ModbusError::exception(ModbusException::IllegalFunction))
    }
}

/// Backend with nothing configured; every data operation raises
/// `IllegalFunction`.
#[derive(Debug, Default)]
pub struct DefaultBackend;

#[async_trait]
impl ModbusBackend for DefaultBackend {}
