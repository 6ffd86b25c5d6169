//! Modbus TCP client.
//!
//! A [`ModbusTcpClient`] owns one connection and serializes its traffic:
//! every operation sends a single request and waits for the matching
//! response, correlated by transaction and unit id. Instances are single
//! owners; for concurrent traffic create one client per connection.
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
//!     client.set_response_timeout(Some(Duration::from_secs(1)));
//!
//!     let registers = client.read_holding_registers(0x6B, 3).await?;
//!     println!("registers: {registers:?}");
//!
//!     client.disconnect();
//!     Ok(())
//! }
//! ```

use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};

use crate::backend::DeviceIdentification;
use crate::error::{ModbusError, ModbusResult};
use crate::frame::{MbapHeader, MAX_PDU_SIZE, MBAP_HEADER_SIZE};
use crate::logging::{hex_dump, log_debug, log_error};
use crate::net::{resolve_endpoints, IpVersion};
use crate::pdu::{
    build_mask_write_register_request, build_read_bits_request,
    build_read_device_identification_request, build_read_registers_request,
    build_read_write_registers_request, build_write_multiple_coils_request,
    build_write_multiple_registers_request, build_write_single_coil_request,
    build_write_single_register_request, parse_echo_response,
    parse_read_bits_response, parse_read_device_identification_response,
    parse_read_registers_response, parse_read_write_registers_response,
    parse_write_multiple_response, ModbusFunction,
};
use crate::{SECURE_SERVER_DEFAULT_PORT, SERVER_DEFAULT_PORT};

/// Default unit identifier for Modbus TCP devices addressed directly.
const DEFAULT_UNIT_ID: u8 = 0xFF;

fn map_io(err: std::io::Error) -> ModbusError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => {
            ModbusError::ConnectionClosed
        }
        _ => err.into(),
    }
}

/// Modbus TCP client with serialized request/response handling.
pub struct ModbusTcpClient {
    stream: Option<TcpStream>,
    transaction_id: u16,
    unit_id: u8,
    response_timeout: Option<Duration>,
    // TLS support is reserved; only the default port selection honors it
    use_tls: bool,
}

impl ModbusTcpClient {
    pub fn new() -> Self {
        Self {
            stream: None,
            transaction_id: 0,
            unit_id: DEFAULT_UNIT_ID,
            response_timeout: None,
            use_tls: false,
        }
    }

    /// Connect to a server, trying each resolved endpoint in order.
    ///
    /// `connect_timeout` bounds every individual attempt; `None` leaves the
    /// operating system's limit in place. Individual failures are logged;
    /// only when every endpoint fails does this return `ActiveOpen`.
    pub async fn connect_to_server(
        &mut self,
        host: &str,
        service: &str,
        ip_version: IpVersion,
        connect_timeout: Option<Duration>,
    ) -> ModbusResult<()> {
        let default_port = if self.use_tls {
            SECURE_SERVER_DEFAULT_PORT
        } else {
            SERVER_DEFAULT_PORT
        };

        let endpoints = resolve_endpoints(host, service, ip_version, default_port).await?;

        for endpoint in endpoints {
            let attempt = match connect_timeout {
                Some(duration) => match timeout(duration, TcpStream::connect(endpoint)).await {
                    Ok(result) => result,
                    Err(_) => Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "Connection timed out",
                    )),
                },
                None => TcpStream::connect(endpoint).await,
            };

            match attempt {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => log_error(format!("failed to connect to {endpoint}: {e}")),
            }
        }

        Err(ModbusError::active_open(format!(
            "failed to connect to [{host}]:{}",
            if service.is_empty() { default_port } else { service }
        )))
    }

    /// Drop the connection. Subsequent operations fail `NotConnected`.
    pub fn disconnect(&mut self) {
        self.stream = None;
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Bound the wait for a response. `None` waits indefinitely.
    pub fn set_response_timeout(&mut self, timeout: Option<Duration>) {
        self.response_timeout = timeout;
    }

    /// Set the unit identifier placed in every request.
    pub fn set_unit_id(&mut self, unit_id: u8) {
        self.unit_id = unit_id;
    }

    /// Send a request PDU and receive the matching response PDU.
    ///
    /// The transaction id is incremented per request; the response header
    /// must echo it and the unit id, otherwise the response is rejected
    /// with `Parse`. On a closed connection the stream is dropped so that
    /// subsequent calls fail `NotConnected`.
    pub async fn send_receive_pdu(&mut self, req_pdu: &[u8]) -> ModbusResult<Vec<u8>> {
        if req_pdu.is_empty() || req_pdu.len() > MAX_PDU_SIZE {
            return Err(ModbusError::invalid_argument("request pdu size invalid"));
        }

        let mut stream = self.stream.take().ok_or(ModbusError::NotConnected)?;
        self.transaction_id = self.transaction_id.wrapping_add(1);

        let result = Self::transact(
            &mut stream,
            self.transaction_id,
            self.unit_id,
            self.response_timeout,
            req_pdu,
        )
        .await;

        // a closed connection is gone for good; everything else leaves the
        // channel with the caller
        if !matches!(result, Err(ModbusError::ConnectionClosed)) {
            self.stream = Some(stream);
        }
        result
    }

    async fn transact(
        stream: &mut TcpStream,
        transaction_id: u16,
        unit_id: u8,
        response_timeout: Option<Duration>,
        req_pdu: &[u8],
    ) -> ModbusResult<Vec<u8>> {
        let header = MbapHeader::for_pdu_size(transaction_id, unit_id, req_pdu.len());
        let mut adu = BytesMut::with_capacity(MBAP_HEADER_SIZE + req_pdu.len());
        header.serialize(&mut adu);
        adu.extend_from_slice(req_pdu);

        log_debug(format!("send frame: {}", hex_dump(&adu)));

        stream.write_all(&adu).await.map_err(map_io)?;

        let deadline = response_timeout.map(|t| Instant::now() + t);

        let mut rsp_header_buf = [0u8; MBAP_HEADER_SIZE];
        Self::receive_exact(stream, &mut rsp_header_buf, deadline, response_timeout).await?;

        let rsp_header = MbapHeader::parse(&rsp_header_buf)?;
        if rsp_header.transaction_id != transaction_id || rsp_header.unit_id != unit_id {
            return Err(ModbusError::parse("response header does not match request"));
        }

        let mut rsp_pdu = vec![0u8; rsp_header.pdu_size()];
        Self::receive_exact(stream, &mut rsp_pdu, deadline, response_timeout).await?;

        log_debug(format!(
            "received frame: {}{}",
            hex_dump(&rsp_header_buf),
            hex_dump(&rsp_pdu)
        ));

        Ok(rsp_pdu)
    }

    async fn receive_exact(
        stream: &mut TcpStream,
        buf: &mut [u8],
        deadline: Option<Instant>,
        response_timeout: Option<Duration>,
    ) -> ModbusResult<()> {
        let result = match deadline {
            Some(deadline) => timeout_at(deadline, stream.read_exact(buf))
                .await
                .map_err(|_| {
                    ModbusError::timeout(
                        "receive response",
                        response_timeout.unwrap_or_default().as_millis() as u64,
                    )
                })?,
            None => stream.read_exact(buf).await,
        };
        result.map(|_| ()).map_err(map_io)
    }

    /// Read coils (function code 0x01).
    pub async fn read_coils(&mut self, addr: u16, cnt: u16) -> ModbusResult<Vec<bool>> {
        let req = build_read_bits_request(ModbusFunction::ReadCoils, addr, cnt)?;
        let rsp = self.send_receive_pdu(&req).await?;
        parse_read_bits_response(&rsp, ModbusFunction::ReadCoils, cnt)
    }

    /// Read discrete inputs (function code 0x02).
    pub async fn read_discrete_inputs(&mut self, addr: u16, cnt: u16) -> ModbusResult<Vec<bool>> {
        let req = build_read_bits_request(ModbusFunction::ReadDiscreteInputs, addr, cnt)?;
        let rsp = self.send_receive_pdu(&req).await?;
        parse_read_bits_response(&rsp, ModbusFunction::ReadDiscreteInputs, cnt)
    }

    /// Read holding registers (function code 0x03).
    pub async fn read_holding_registers(&mut self, addr: u16, cnt: u16) -> ModbusResult<Vec<u16>> {
        let req = build_read_registers_request(ModbusFunction::ReadHoldingRegisters, addr, cnt)?;
        let rsp = self.send_receive_pdu(&req).await?;
        parse_read_registers_response(&rsp, ModbusFunction::ReadHoldingRegisters, cnt)
    }

    /// Read input registers (function code 0x04).
    pub async fn read_input_registers(&mut self, addr: u16, cnt: u16) -> ModbusResult<Vec<u16>> {
        let req = build_read_registers_request(ModbusFunction::ReadInputRegisters, addr, cnt)?;
        let rsp = self.send_receive_pdu(&req).await?;
        parse_read_registers_response(&rsp, ModbusFunction::ReadInputRegisters, cnt)
    }

    /// Write a single coil (function code 0x05).
    pub async fn write_single_coil(&mut self, addr: u16, on: bool) -> ModbusResult<()> {
        let req = build_write_single_coil_request(addr, on);
        let rsp = self.send_receive_pdu(&req).await?;
        parse_echo_response(&rsp, &req, "write single coil")
    }

    /// Write a single holding register (function code 0x06).
    pub async fn write_single_register(&mut self, addr: u16, value: u16) -> ModbusResult<()> {
        let req = build_write_single_register_request(addr, value);
        let rsp = self.send_receive_pdu(&req).await?;
        parse_echo_response(&rsp, &req, "write single register")
    }

    /// Write multiple coils (function code 0x0F).
    pub async fn write_multiple_coils(&mut self, addr: u16, bits: &[bool]) -> ModbusResult<()> {
        let req = build_write_multiple_coils_request(addr, bits)?;
        let rsp = self.send_receive_pdu(&req).await?;
        parse_write_multiple_response(
            &rsp,
            ModbusFunction::WriteMultipleCoils,
            addr,
            bits.len() as u16,
        )
    }

    /// Write multiple holding registers (function code 0x10).
    pub async fn write_multiple_registers(&mut self, addr: u16, regs: &[u16]) -> ModbusResult<()> {
        let req = build_write_multiple_registers_request(addr, regs)?;
        let rsp = self.send_receive_pdu(&req).await?;
        parse_write_multiple_response(
            &rsp,
            ModbusFunction::WriteMultipleRegisters,
            addr,
            regs.len() as u16,
        )
    }

    /// Modify a holding register with AND/OR masks (function code 0x16).
    ///
    /// The device computes `(current & and_mask) | (or_mask & !and_mask)`.
    pub async fn mask_write_register(
        &mut self,
        addr: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> ModbusResult<()> {
        let req = build_mask_write_register_request(addr, and_mask, or_mask);
        let rsp = self.send_receive_pdu(&req).await?;
        parse_echo_response(&rsp, &req, "mask write register")
    }

    /// Write then read holding registers in one transaction (function
    /// code 0x17).
    pub async fn read_write_multiple_registers(
        &mut self,
        wr_addr: u16,
        regs: &[u16],
        rd_addr: u16,
        rd_cnt: u16,
    ) -> ModbusResult<Vec<u16>> {
        let req = build_read_write_registers_request(wr_addr, regs, rd_addr, rd_cnt)?;
        let rsp = self.send_receive_pdu(&req).await?;
        parse_read_write_registers_response(&rsp, rd_cnt)
    }

    /// Read the basic device identification objects (function code 0x2B).
    pub async fn read_device_identification(&mut self) -> ModbusResult<DeviceIdentification> {
        let req = build_read_device_identification_request();
        let rsp = self.send_receive_pdu(&req).await?;
        parse_read_device_identification_response(&rsp)
    }
}

impl Default for ModbusTcpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_not_connected() {
        let mut client = ModbusTcpClient::new();
        let err = client.read_coils(0, 1).await.unwrap_err();
        assert!(matches!(err, ModbusError::NotConnected));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_argument_validation_before_io() {
        let mut client = ModbusTcpClient::new();

        // count out of range is rejected before the missing connection is
        // even noticed
        let err = client.read_coils(0, 2001).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidArgument { .. }));

        let err = client.write_multiple_registers(0, &[]).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let mut client = ModbusTcpClient::new();
        let err = client
            .connect_to_server("127.0.0.1", "1", IpVersion::V4, Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::ActiveOpen { .. }));
    }
}
