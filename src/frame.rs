//! Modbus TCP framing: the MBAP header and the bit/register array codecs.
//!
//! Every ADU on the wire is a 7 byte MBAP header followed by a PDU of 1 to
//! 253 bytes. All multi-byte fields are big-endian. Bit arrays are packed
//! LSB-first within each byte; register arrays are a plain sequence of
//! big-endian `u16` values.

use bytes::BufMut;

use crate::error::{ModbusError, ModbusResult};

/// Size of the MBAP header in bytes.
pub const MBAP_HEADER_SIZE: usize = 7;

/// Smallest possible PDU (a bare function code).
pub const MIN_PDU_SIZE: usize = 1;

/// Largest possible PDU.
pub const MAX_PDU_SIZE: usize = 253;

/// Largest possible ADU (MBAP header + PDU).
pub const MAX_ADU_SIZE: usize = MBAP_HEADER_SIZE + MAX_PDU_SIZE;

/// Quantity of coils or discrete inputs readable in one request.
pub const MIN_READ_BITS: u16 = 1;
pub const MAX_READ_BITS: u16 = 2000;

/// Quantity of holding or input registers readable in one request.
pub const MIN_READ_REGISTERS: u16 = 1;
pub const MAX_READ_REGISTERS: u16 = 125;

/// Quantity of coils writable in one request.
pub const MIN_WRITE_COILS: u16 = 1;
pub const MAX_WRITE_COILS: u16 = 1968;

/// Quantity of holding registers writable in one request.
pub const MIN_WRITE_REGISTERS: u16 = 1;
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Read/write-multiple-registers quantity bounds.
pub const MAX_RDWR_READ_REGISTERS: u16 = 125;
pub const MAX_RDWR_WRITE_REGISTERS: u16 = 121;

/// Wire encodings of a single coil value.
pub const SINGLE_COIL_OFF: u16 = 0x0000;
pub const SINGLE_COIL_ON: u16 = 0xFF00;

/// MBAP header preceding every PDU on a Modbus TCP connection.
///
/// The `length` field counts the unit identifier plus the PDU, so a valid
/// header always satisfies `length ∈ [2, 254]` and the full ADU occupies
/// `MBAP_HEADER_SIZE + length - 1` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    /// Build a header for a PDU of `pdu_size` bytes.
    pub fn for_pdu_size(transaction_id: u16, unit_id: u8, pdu_size: usize) -> Self {
        Self {
            transaction_id,
            protocol_id: 0,
            length: (pdu_size + 1) as u16,
            unit_id,
        }
    }

    /// Parse a header from the first 7 bytes of `src`.
    pub fn parse(src: &[u8]) -> ModbusResult<Self> {
        if src.len() < MBAP_HEADER_SIZE {
            return Err(ModbusError::parse("incomplete mbap header"));
        }

        let header = Self {
            transaction_id: u16::from_be_bytes([src[0], src[1]]),
            protocol_id: u16::from_be_bytes([src[2], src[3]]),
            length: u16::from_be_bytes([src[4], src[5]]),
            unit_id: src[6],
        };

        if header.protocol_id != 0 {
            return Err(ModbusError::parse("mbap header: protocol identifier invalid"));
        }
        if (header.length as usize) < MIN_PDU_SIZE + 1
            || (header.length as usize) > MAX_PDU_SIZE + 1
        {
            return Err(ModbusError::parse("mbap header: length field invalid"));
        }

        Ok(header)
    }

    /// Serialize the header into `dst`.
    pub fn serialize<B: BufMut>(&self, dst: &mut B) {
        dst.put_u16(self.transaction_id);
        dst.put_u16(self.protocol_id);
        dst.put_u16(self.length);
        dst.put_u8(self.unit_id);
    }

    /// Number of PDU bytes announced by this header.
    pub fn pdu_size(&self) -> usize {
        self.length as usize - 1
    }

    /// Number of ADU bytes announced by this header.
    pub fn adu_size(&self) -> usize {
        MBAP_HEADER_SIZE + self.pdu_size()
    }
}

/// Number of bytes needed to hold `bit_count` packed bits.
pub fn bit_to_byte_count(bit_count: usize) -> usize {
    (bit_count + 7) / 8
}

/// Pack boolean values into bytes, LSB-first within each byte.
///
/// Surplus bits in the final byte are zero.
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bit_to_byte_count(bits.len())];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Unpack `bit_count` boolean values from packed bytes.
///
/// Fails `Parse` if `src` holds fewer than `bit_to_byte_count(bit_count)`
/// bytes. Surplus bits in the final byte are ignored.
pub fn unpack_bits(src: &[u8], bit_count: usize) -> ModbusResult<Vec<bool>> {
    if src.len() < bit_to_byte_count(bit_count) {
        return Err(ModbusError::parse("bit field: too few bytes"));
    }

    let mut bits = Vec::with_capacity(bit_count);
    for i in 0..bit_count {
        bits.push(src[i / 8] & (1 << (i % 8)) != 0);
    }
    Ok(bits)
}

/// Serialize registers as big-endian `u16` values.
pub fn registers_to_bytes(regs: &[u16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(regs.len() * 2);
    for &reg in regs {
        bytes.put_u16(reg);
    }
    bytes
}

/// Parse `count` big-endian registers from `src`.
pub fn bytes_to_registers(src: &[u8], count: usize) -> ModbusResult<Vec<u16>> {
    if src.len() < count * 2 {
        return Err(ModbusError::parse("register field: too few bytes"));
    }

    Ok(src[..count * 2]
        .chunks_exact(2)
        .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
        .collect())
}
