//! PDU engines: the server-side request dispatcher and the client-side
//! request builders / response parsers.
//!
//! Both sides operate on bare PDUs (function code byte onward); MBAP
//! framing is handled by [`crate::frame`] and the transports.
//!
//! Server side: [`server_engine`] transforms one request PDU into one
//! response PDU, invoking the backend. Protocol-level faults (bad length,
//! quantity out of range, backend exceptions) are encoded as two byte
//! exception PDUs and the connection stays up; native backend errors
//! propagate and make the caller close the connection.
//!
//! Client side: one builder and one parser per function. Builders validate
//! arguments before producing any bytes. Parsers first check for the
//! exception shape and raise the carried code, then validate byte counts
//! and echoed fields exactly.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::backend::{DeviceIdentification, ModbusBackend};
use crate::error::{ModbusError, ModbusException, ModbusResult};
use crate::frame::{
    bit_to_byte_count, bytes_to_registers, pack_bits, registers_to_bytes, unpack_bits,
    MAX_PDU_SIZE, MAX_RDWR_READ_REGISTERS, MAX_RDWR_WRITE_REGISTERS, MAX_READ_BITS,
    MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS, SINGLE_COIL_OFF, SINGLE_COIL_ON,
};

/// High bit marking an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Size of an exception response PDU.
pub const EXCEPTION_RSP_SIZE: usize = 2;

/// MEI type for encapsulated device identification transport.
const MEI_TYPE_MODBUS: u8 = 0x0E;

/// Read-device-id code for the basic object set.
const READ_DEVICE_ID_BASIC: u8 = 0x01;

/// Object ids of the basic device identification set.
const OBJECT_ID_VENDOR_NAME: u8 = 0x00;
const OBJECT_ID_PRODUCT_CODE: u8 = 0x01;
const OBJECT_ID_MAJOR_MINOR_REVISION: u8 = 0x02;

/// Modbus function codes supported by this library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    WriteMultipleCoils = 0x0F,
    WriteMultipleRegisters = 0x10,
    MaskWriteRegister = 0x16,
    ReadWriteMultipleRegisters = 0x17,
    ReadDeviceIdentification = 0x2B,
}

impl ModbusFunction {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ModbusFunction::ReadCoils),
            0x02 => Some(ModbusFunction::ReadDiscreteInputs),
            0x03 => Some(ModbusFunction::ReadHoldingRegisters),
            0x04 => Some(ModbusFunction::ReadInputRegisters),
            0x05 => Some(ModbusFunction::WriteSingleCoil),
            0x06 => Some(ModbusFunction::WriteSingleRegister),
            0x0F => Some(ModbusFunction::WriteMultipleCoils),
            0x10 => Some(ModbusFunction::WriteMultipleRegisters),
            0x16 => Some(ModbusFunction::MaskWriteRegister),
            0x17 => Some(ModbusFunction::ReadWriteMultipleRegisters),
            0x2B => Some(ModbusFunction::ReadDeviceIdentification),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusFunction::ReadCoils => "Read Coils",
            ModbusFunction::ReadDiscreteInputs => "Read Discrete Inputs",
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::ReadInputRegisters => "Read Input Registers",
            ModbusFunction::WriteSingleCoil => "Write Single Coil",
            ModbusFunction::WriteSingleRegister => "Write Single Register",
            ModbusFunction::WriteMultipleCoils => "Write Multiple Coils",
            ModbusFunction::WriteMultipleRegisters => "Write Multiple Registers",
            ModbusFunction::MaskWriteRegister => "Mask Write Register",
            ModbusFunction::ReadWriteMultipleRegisters => "Read/Write Multiple Registers",
            ModbusFunction::ReadDeviceIdentification => "Read Device Identification",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

fn be16(src: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([src[offset], src[offset + 1]])
}

/// Write a two byte exception PDU into `rsp`.
fn exception_response(rsp: &mut [u8], fc: u8, code: ModbusException) -> usize {
    rsp[0] = fc | EXCEPTION_FLAG;
    rsp[1] = code.to_u8();
    EXCEPTION_RSP_SIZE
}

/// Map a backend result: Modbus exceptions become exception PDUs, native
/// errors propagate to the caller.
macro_rules! backend_call {
    ($rsp:expr, $fc:expr, $call:expr) => {
        match $call {
            Ok(value) => value,
            Err(ModbusError::Exception(code)) => {
                return Ok(exception_response($rsp, $fc, code));
            }
            Err(err) => return Err(err),
        }
    };
}

async fn process_read_bits(
    backend: &dyn ModbusBackend,
    req: &[u8],
    rsp: &mut [u8],
) -> ModbusResult<usize> {
    let fc = req[0];

    if req.len() != 5 {
        return Ok(exception_response(rsp, fc, ModbusException::IllegalDataValue));
    }

    let addr = be16(req, 1);
    let cnt = be16(req, 3);

    if !(1..=MAX_READ_BITS).contains(&cnt) {
        return Ok(exception_response(rsp, fc, ModbusException::IllegalDataValue));
    }

    let bits = if fc == ModbusFunction::ReadCoils.to_u8() {
        backend_call!(rsp, fc, backend.read_coils(addr, cnt).await)
    } else {
        backend_call!(rsp, fc, backend.read_discrete_inputs(addr, cnt).await)
    };

    if bits.len() != cnt as usize {
        return Err(ModbusError::logic("backend returned wrong number of bits"));
    }

    let packed = pack_bits(&bits);
    rsp[0] = fc;
    rsp[1] = packed.len() as u8;
    rsp[2..2 + packed.len()].copy_from_slice(&packed);
    Ok(2 + packed.len())
}

async fn process_read_registers(
    backend: &dyn ModbusBackend,
    req: &[u8],
    rsp: &mut [u8],
) -> ModbusResult<usize> {
    let fc = req[0];

    if req.len() != 5 {
        return Ok(exception_response(rsp, fc, ModbusException::IllegalDataValue));
    }

    let addr = be16(req, 1);
    let cnt = be16(req, 3);

    if !(1..=MAX_READ_REGISTERS).contains(&cnt) {
        return Ok(exception_response(rsp, fc, ModbusException::IllegalDataValue));
    }

    let regs = if fc == ModbusFunction::ReadHoldingRegisters.to_u8() {
        backend_call!(rsp, fc, backend.read_holding_registers(addr, cnt).await)
    } else {
        backend_call!(rsp, fc, backend.read_input_registers(addr, cnt).await)
    };

    if regs.len() != cnt as usize {
        return Err(ModbusError::logic("backend returned wrong number of registers"));
    }

    let bytes = registers_to_bytes(&regs);
    rsp[0] = fc;
    rsp[1] = bytes.len() as u8;
    rsp[2..2 + bytes.len()].copy_from_slice(&bytes);
    Ok(2 + bytes.len())
}

async fn process_write_single_coil(
    backend: &dyn ModbusBackend,
    req: &[u8],
    rsp: &mut [u8],
) -> ModbusResult<usize> {
    let fc = req[0];

    if req.len() != 5 {
        return Ok(exception_response(rsp, fc, ModbusException::IllegalDataValue));
    }

    let addr = be16(req, 1);
    let val = be16(req, 3);

    if val != SINGLE_COIL_OFF && val != SINGLE_COIL_ON {
        return Ok(exception_response(rsp, fc, ModbusException::IllegalDataValue));
    }

    backend_call!(rsp, fc, backend.write_coils(addr, &[val == SINGLE_COIL_ON]).await);

    rsp[..5].copy_from_slice(&req[..5]);
    Ok(5)
}

async fn process_write_single_register(
    backend: &dyn ModbusBackend,
    req: &[u8],
    rsp: &mut [u8],
) -> ModbusResult<usize> {
    let fc = req[0];

    if req.len() != 5 {
        return Ok(exception_response(rsp, fc, ModbusException::IllegalDataValue));
    }

    let addr = be16(req, 1);
    let val = be16(req, 3);

    backend_call!(rsp, fc, backend.write_holding_registers(addr, &[val]).await);

    rsp[..5].copy_from_slice(&req[..5]);
    Ok(5)
}

async fn process_write_multiple_coils(
    backend: &dyn ModbusBackend,
    req: &[u8],
    rsp: &mut [u8],
) -> ModbusResult<usize> {
    let fc = req[0];

    if req.len() < 7 {
        return Ok(exception_response(rsp, fc, ModbusException::IllegalDataValue));
    }

    let addr = be16(req, 1);
    let cnt = be16(req, 3);
    let byte_cnt = req[5] as usize;

    if !(1..=MAX_WRITE_COILS).contains(&cnt)
        || byte_cnt != bit_to_byte_count(cnt as usize)
        || req.len() < 6 + byte_cnt
    {
        return Ok(exception_response(rsp, fc, ModbusException::IllegalDataValue));
    }

    let bits = unpack_bits(&req[6..], cnt as usize)?;
    backend_call!(rsp, fc, backend.write_coils(addr, &bits).await);

    rsp[..5].copy_from_slice(&req[..5]);
    Ok(5)
}

async fn process_write_multiple_registers(
    backend: &dyn ModbusBackend,
    req: &[u8],
    rsp: &mut [u8],
) -> ModbusResult<usize> {
    let fc = req[0];

    if req.len() < 8 {
        return Ok(exception_response(rsp, fc, ModbusException::IllegalDataValue));
    }

    let addr = be16(req, 1);
    let cnt = be16(req, 3);
    let byte_cnt = req[5] as usize;

    if !(1..=MAX_WRITE_REGISTERS).contains(&cnt)
        || byte_cnt != cnt as usize * 2
        || req.len() < 6 + byte_cnt
    {
        return Ok(exception_response(rsp, fc, ModbusException::IllegalDataValue));
    }

    let regs = bytes_to_registers(&req[6..], cnt as usize)?;
    backend_call!(rsp, fc, backend.write_holding_registers(addr, &regs).await);

    rsp[..5].copy_from_slice(&req[..5]);
    Ok(5)
}

async fn process_mask_write_register(
    backend: &dyn ModbusBackend,
    req: &[u8],
    rsp: &mut [u8],
) -> ModbusResult<usize> {
    let fc = req[0];

    if req.len() != 7 {
        return Ok(exception_response(rsp, fc, ModbusException::IllegalDataValue));
    }

    let addr = be16(req, 1);
    let and_mask = be16(req, 3);
    let or_mask = be16(req, 5);

    let regs = backend_call!(rsp, fc, backend.read_holding_registers(addr, 1).await);
    if regs.len() != 1 {
        return Err(ModbusError::logic("backend returned wrong number of registers"));
    }

    let value = (regs[0] & and_mask) | (or_mask & !and_mask);
    backend_call!(rsp, fc, backend.write_holding_registers(addr, &[value]).await);

    rsp[..7].copy_from_slice(&req[..7]);
    Ok(7)
}

async fn process_read_write_multiple_registers(
    backend: &dyn ModbusBackend,
    req: &[u8],
    rsp: &mut [u8],
) -> ModbusResult<usize> {
    let fc = req[0];

    if req.len() < 12 {
        return Ok(exception_response(rsp, fc, ModbusException::IllegalDataValue));
    }

    let rd_addr = be16(req, 1);
    let rd_cnt = be16(req, 3);
    let wr_addr = be16(req, 5);
    let wr_cnt = be16(req, 7);
    let byte_cnt = req[9] as usize;

    if !(1..=MAX_RDWR_READ_REGISTERS).contains(&rd_cnt)
        || !(1..=MAX_RDWR_WRITE_REGISTERS).contains(&wr_cnt)
        || byte_cnt != wr_cnt as usize * 2
        || req.len() < 10 + byte_cnt
    {
        return Ok(exception_response(rsp, fc, ModbusException::IllegalDataValue));
    }

    let regs_wr = bytes_to_registers(&req[10..], wr_cnt as usize)?;
    let regs_rd = backend_call!(
        rsp,
        fc,
        backend
            .write_read_holding_registers(wr_addr, &regs_wr, rd_addr, rd_cnt)
            .await
    );

    if regs_rd.len() != rd_cnt as usize {
        return Err(ModbusError::logic("backend returned wrong number of registers"));
    }

    let bytes = registers_to_bytes(&regs_rd);
    rsp[0] = fc;
    rsp[1] = bytes.len() as u8;
    rsp[2..2 + bytes.len()].copy_from_slice(&bytes);
    Ok(2 + bytes.len())
}

async fn process_read_device_identification(
    backend: &dyn ModbusBackend,
    req: &[u8],
    rsp: &mut [u8],
) -> ModbusResult<usize> {
    let fc = req[0];

    if req.len() != 4 {
        return Ok(exception_response(rsp, fc, ModbusException::IllegalDataValue));
    }

    let mei = req[1];
    let id_code = req[2];
    let object_id = req[3];

    if mei != MEI_TYPE_MODBUS || id_code != READ_DEVICE_ID_BASIC {
        return Ok(exception_response(rsp, fc, ModbusException::IllegalDataValue));
    }
    if object_id != OBJECT_ID_VENDOR_NAME {
        return Ok(exception_response(rsp, fc, ModbusException::IllegalDataAddress));
    }

    let ident = backend_call!(rsp, fc, backend.get_basic_device_identification().await);

    let objects = [
        (OBJECT_ID_VENDOR_NAME, ident.vendor.as_bytes()),
        (OBJECT_ID_PRODUCT_CODE, ident.product.as_bytes()),
        (OBJECT_ID_MAJOR_MINOR_REVISION, ident.version.as_bytes()),
    ];

    // All three objects must fit a single PDU; oversized identification
    // strings are a configuration fault, not something to truncate.
    let total: usize = 7 + objects.iter().map(|(_, s)| 2 + s.len()).sum::<usize>();
    if total > MAX_PDU_SIZE || objects.iter().any(|(_, s)| s.len() > u8::MAX as usize) {
        return Ok(exception_response(rsp, fc, ModbusException::IllegalDataValue));
    }

    rsp[0] = fc;
    rsp[1] = MEI_TYPE_MODBUS;
    rsp[2] = READ_DEVICE_ID_BASIC;
    rsp[3] = READ_DEVICE_ID_BASIC; // conformity level
    rsp[4] = 0x00; // more follows: no
    rsp[5] = 0x00; // next object id
    rsp[6] = objects.len() as u8;

    let mut pos = 7;
    for (id, bytes) in objects {
        rsp[pos] = id;
        rsp[pos + 1] = bytes.len() as u8;
        rsp[pos + 2..pos + 2 + bytes.len()].copy_from_slice(bytes);
        pos += 2 + bytes.len();
    }

    Ok(pos)
}

/// Transform one request PDU into one response PDU.
///
/// `req` starts at the function code; the response is written into `rsp`,
/// which must hold at least [`MAX_PDU_SIZE`] bytes. Returns the number of
/// response bytes produced. Errors returned from this function are native
/// faults; the caller is expected to drop the connection.
pub async fn server_engine(
    backend: &dyn ModbusBackend,
    req: &[u8],
    rsp: &mut [u8],
) -> ModbusResult<usize> {
    if req.is_empty() {
        return Err(ModbusError::parse("empty request pdu"));
    }

    match ModbusFunction::from_u8(req[0]) {
        Some(ModbusFunction::ReadCoils) | Some(ModbusFunction::ReadDiscreteInputs) => {
            process_read_bits(backend, req, rsp).await
        }
        Some(ModbusFunction::ReadHoldingRegisters)
        | Some(ModbusFunction::ReadInputRegisters) => {
            process_read_registers(backend, req, rsp).await
        }
        Some(ModbusFunction::WriteSingleCoil) => {
            process_write_single_coil(backend, req, rsp).await
        }
        Some(ModbusFunction::WriteSingleRegister) => {
            process_write_single_register(backend, req, rsp).await
        }
        Some(ModbusFunction::WriteMultipleCoils) => {
            process_write_multiple_coils(backend, req, rsp).await
        }
        Some(ModbusFunction::WriteMultipleRegisters) => {
            process_write_multiple_registers(backend, req, rsp).await
        }
        Some(ModbusFunction::MaskWriteRegister) => {
            process_mask_write_register(backend, req, rsp).await
        }
        Some(ModbusFunction::ReadWriteMultipleRegisters) => {
            process_read_write_multiple_registers(backend, req, rsp).await
        }
        Some(ModbusFunction::ReadDeviceIdentification) => {
            process_read_device_identification(backend, req, rsp).await
        }
        None => Ok(exception_response(rsp, req[0], ModbusException::IllegalFunction)),
    }
}

// --- client side -----------------------------------------------------------

fn validate_count(cnt: u16, min: u16, max: u16, what: &str) -> ModbusResult<()> {
    if !(min..=max).contains(&cnt) {
        return Err(ModbusError::invalid_argument(format!(
            "{what}: count {cnt} outside [{min}, {max}]"
        )));
    }
    Ok(())
}

/// Check a response PDU for the exception shape and raise the carried code.
///
/// An exception response is exactly two bytes with the high bit of the
/// function code set. The unmasked function code must match the request and
/// the exception code must be valid, otherwise the response is unparsable.
pub fn check_exception(rsp: &[u8], fc: ModbusFunction) -> ModbusResult<()> {
    if rsp.len() != EXCEPTION_RSP_SIZE || rsp[0] & EXCEPTION_FLAG == 0 {
        return Ok(());
    }

    if rsp[0] & !EXCEPTION_FLAG != fc.to_u8() {
        return Err(ModbusError::parse("modbus exception: function code mismatch"));
    }

    match ModbusException::from_u8(rsp[1]) {
        Some(code) => Err(ModbusError::exception(code)),
        None => Err(ModbusError::parse("modbus exception: invalid exception code")),
    }
}

pub fn build_read_bits_request(
    fc: ModbusFunction,
    addr: u16,
    cnt: u16,
) -> ModbusResult<Vec<u8>> {
    validate_count(cnt, 1, MAX_READ_BITS, "read bits")?;

    let mut pdu = Vec::with_capacity(5);
    pdu.push(fc.to_u8());
    pdu.extend_from_slice(&addr.to_be_bytes());
    pdu.extend_from_slice(&cnt.to_be_bytes());
    Ok(pdu)
}

pub fn parse_read_bits_response(
    rsp: &[u8],
    fc: ModbusFunction,
    cnt: u16,
) -> ModbusResult<Vec<bool>> {
    check_exception(rsp, fc)?;

    let byte_cnt = bit_to_byte_count(cnt as usize);
    if rsp.len() != 2 + byte_cnt {
        return Err(ModbusError::parse("read bits: response length invalid"));
    }
    if rsp[0] != fc.to_u8() {
        return Err(ModbusError::parse("read bits: function code invalid"));
    }
    if rsp[1] as usize != byte_cnt {
        return Err(ModbusError::parse("read bits: byte count invalid"));
    }

    unpack_bits(&rsp[2..], cnt as usize)
}

pub fn build_read_registers_request(
    fc: ModbusFunction,
    addr: u16,
    cnt: u16,
) -> ModbusResult<Vec<u8>> {
    validate_count(cnt, 1, MAX_READ_REGISTERS, "read registers")?;

    let mut pdu = Vec::with_capacity(5);
    pdu.push(fc.to_u8());
    pdu.extend_from_slice(&addr.to_be_bytes());
    pdu.extend_from_slice(&cnt.to_be_bytes());
    Ok(pdu)
}

pub fn parse_read_registers_response(
    rsp: &[u8],
    fc: ModbusFunction,
    cnt: u16,
) -> ModbusResult<Vec<u16>> {
    check_exception(rsp, fc)?;

    let byte_cnt = cnt as usize * 2;
    if rsp.len() != 2 + byte_cnt {
        return Err(ModbusError::parse("read registers: response length invalid"));
    }
    if rsp[0] != fc.to_u8() {
        return Err(ModbusError::parse("read registers: function code invalid"));
    }
    if rsp[1] as usize != byte_cnt {
        return Err(ModbusError::parse("read registers: byte count invalid"));
    }

    bytes_to_registers(&rsp[2..], cnt as usize)
}

pub fn build_write_single_coil_request(addr: u16, on: bool) -> Vec<u8> {
    let val = if on { SINGLE_COIL_ON } else { SINGLE_COIL_OFF };
    let mut pdu = Vec::with_capacity(5);
    pdu.push(ModbusFunction::WriteSingleCoil.to_u8());
    pdu.extend_from_slice(&addr.to_be_bytes());
    pdu.extend_from_slice(&val.to_be_bytes());
    pdu
}

pub fn build_write_single_register_request(addr: u16, val: u16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(5);
    pdu.push(ModbusFunction::WriteSingleRegister.to_u8());
    pdu.extend_from_slice(&addr.to_be_bytes());
    pdu.extend_from_slice(&val.to_be_bytes());
    pdu
}

/// Write responses echo the request PDU byte for byte.
pub fn parse_echo_response(rsp: &[u8], req: &[u8], what: &str) -> ModbusResult<()> {
    let fc = ModbusFunction::from_u8(req[0])
        .ok_or_else(|| ModbusError::logic("echo check on unknown function code"))?;
    check_exception(rsp, fc)?;

    if rsp != req {
        return Err(ModbusError::parse(format!("{what}: response is not an echo")));
    }
    Ok(())
}

pub fn build_write_multiple_coils_request(addr: u16, bits: &[bool]) -> ModbusResult<Vec<u8>> {
    validate_count(bits.len().try_into().unwrap_or(u16::MAX), 1, MAX_WRITE_COILS, "write coils")?;

    let packed = pack_bits(bits);
    let mut pdu = Vec::with_capacity(6 + packed.len());
    pdu.push(ModbusFunction::WriteMultipleCoils.to_u8());
    pdu.extend_from_slice(&addr.to_be_bytes());
    pdu.extend_from_slice(&(bits.len() as u16).to_be_bytes());
    pdu.push(packed.len() as u8);
    pdu.extend_from_slice(&packed);
    Ok(pdu)
}

pub fn parse_write_multiple_response(
    rsp: &[u8],
    fc: ModbusFunction,
    addr: u16,
    cnt: u16,
) -> ModbusResult<()> {
    check_exception(rsp, fc)?;

    if rsp.len() != 5 {
        return Err(ModbusError::parse("write multiple: response length invalid"));
    }
    if rsp[0] != fc.to_u8() {
        return Err(ModbusError::parse("write multiple: function code invalid"));
    }
    if be16(rsp, 1) != addr || be16(rsp, 3) != cnt {
        return Err(ModbusError::parse("write multiple: echoed fields invalid"));
    }
    Ok(())
}

pub fn build_write_multiple_registers_request(addr: u16, regs: &[u16]) -> ModbusResult<Vec<u8>> {
    validate_count(
        regs.len().try_into().unwrap_or(u16::MAX),
        1,
        MAX_WRITE_REGISTERS,
        "write registers",
    )?;

    let bytes = registers_to_bytes(regs);
    let mut pdu = Vec::with_capacity(6 + bytes.len());
    pdu.push(ModbusFunction::WriteMultipleRegisters.to_u8());
    pdu.extend_from_slice(&addr.to_be_bytes());
    pdu.extend_from_slice(&(regs.len() as u16).to_be_bytes());
    pdu.push(bytes.len() as u8);
    pdu.extend_from_slice(&bytes);
    Ok(pdu)
}

pub fn build_mask_write_register_request(addr: u16, and_mask: u16, or_mask: u16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(7);
    pdu.push(ModbusFunction::MaskWriteRegister.to_u8());
    pdu.extend_from_slice(&addr.to_be_bytes());
    pdu.extend_from_slice(&and_mask.to_be_bytes());
    pdu.extend_from_slice(&or_mask.to_be_bytes());
    pdu
}

pub fn build_read_write_registers_request(
    wr_addr: u16,
    regs: &[u16],
    rd_addr: u16,
    rd_cnt: u16,
) -> ModbusResult<Vec<u8>> {
    validate_count(rd_cnt, 1, MAX_RDWR_READ_REGISTERS, "read/write registers: read")?;
    validate_count(
        regs.len().try_into().unwrap_or(u16::MAX),
        1,
        MAX_RDWR_WRITE_REGISTERS,
        "read/write registers: write",
    )?;

    let bytes = registers_to_bytes(regs);
    let mut pdu = Vec::with_capacity(10 + bytes.len());
    pdu.push(ModbusFunction::ReadWriteMultipleRegisters.to_u8());
    pdu.extend_from_slice(&rd_addr.to_be_bytes());
    pdu.extend_from_slice(&rd_cnt.to_be_bytes());
    pdu.extend_from_slice(&wr_addr.to_be_bytes());
    pdu.extend_from_slice(&(regs.len() as u16).to_be_bytes());
    pdu.push(bytes.len() as u8);
    pdu.extend_from_slice(&bytes);
    Ok(pdu)
}

pub fn parse_read_write_registers_response(rsp: &[u8], rd_cnt: u16) -> ModbusResult<Vec<u16>> {
    parse_read_registers_response(rsp, ModbusFunction::ReadWriteMultipleRegisters, rd_cnt)
}

pub fn build_read_device_identification_request() -> Vec<u8> {
    vec![
        ModbusFunction::ReadDeviceIdentification.to_u8(),
        MEI_TYPE_MODBUS,
        READ_DEVICE_ID_BASIC,
        OBJECT_ID_VENDOR_NAME,
    ]
}

pub fn parse_read_device_identification_response(
    rsp: &[u8],
) -> ModbusResult<DeviceIdentification> {
    check_exception(rsp, ModbusFunction::ReadDeviceIdentification)?;

    if rsp.len() < 7 {
        return Err(ModbusError::parse("device identification: response too short"));
    }
    if rsp[0] != ModbusFunction::ReadDeviceIdentification.to_u8()
        || rsp[1] != MEI_TYPE_MODBUS
        || rsp[2] != READ_DEVICE_ID_BASIC
    {
        return Err(ModbusError::parse("device identification: response header invalid"));
    }
    if rsp[6] != 3 {
        return Err(ModbusError::parse("device identification: object count invalid"));
    }

    let expected_ids = [
        OBJECT_ID_VENDOR_NAME,
        OBJECT_ID_PRODUCT_CODE,
        OBJECT_ID_MAJOR_MINOR_REVISION,
    ];
    let mut strings = Vec::with_capacity(3);
    let mut pos = 7;

    for expected_id in expected_ids {
        if rsp.len() < pos + 2 {
            return Err(ModbusError::parse("device identification: object truncated"));
        }
        let id = rsp[pos];
        let len = rsp[pos + 1] as usize;
        if id != expected_id {
            return Err(ModbusError::parse("device identification: object id invalid"));
        }
        if rsp.len() < pos + 2 + len {
            return Err(ModbusError::parse("device identification: object truncated"));
        }
        strings.push(String::from_utf8_lossy(&rsp[pos + 2..pos + 2 + len]).into_owned());
        pos += 2 + len;
    }

    if pos != rsp.len() {
        return Err(ModbusError::parse("device identification: trailing bytes"));
    }

    let mut it = strings.into_iter();
    Ok(DeviceIdentification {
        vendor: it.next().unwrap(),
        product: it.next().unwrap(),
        version: it.next().unwrap(),
    })
}
