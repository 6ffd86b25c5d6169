//! In-memory data storage implementing the server backend.
//!
//! Useful as-is for simulators and tests, and as a starting point for real
//! backends. All four data tables live behind `RwLock`s so the bank can be
//! shared between the server and the application.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::RwLock;

use crate::backend::{ClientId, DeviceIdentification, ModbusBackend};
use crate::error::{ModbusError, ModbusException, ModbusResult};

const DEFAULT_TABLE_SIZE: usize = 10000;

/// Thread-safe register bank holding coils, discrete inputs, holding
/// registers and input registers.
#[derive(Debug)]
pub struct ModbusRegisterBank {
    coils: RwLock<Vec<bool>>,
    discrete_inputs: RwLock<Vec<bool>>,
    holding_registers: RwLock<Vec<u16>>,
    input_registers: RwLock<Vec<u16>>,
    identification: DeviceIdentification,
}

impl ModbusRegisterBank {
    /// Create a bank with the default table sizes.
    pub fn new() -> Self {
        Self::with_sizes(
            DEFAULT_TABLE_SIZE,
            DEFAULT_TABLE_SIZE,
            DEFAULT_TABLE_SIZE,
            DEFAULT_TABLE_SIZE,
        )
    }

    /// Create a bank with custom table sizes.
    pub fn with_sizes(
        coils_size: usize,
        discrete_inputs_size: usize,
        holding_registers_size: usize,
        input_registers_size: usize,
    ) -> Self {
        Self {
            coils: RwLock::new(vec![false; coils_size]),
            discrete_inputs: RwLock::new(vec![false; discrete_inputs_size]),
            holding_registers: RwLock::new(vec![0u16; holding_registers_size]),
            input_registers: RwLock::new(vec![0u16; input_registers_size]),
            identification: DeviceIdentification::default(),
        }
    }

    /// Replace the device identification strings reported via function 0x2B.
    pub fn with_identification(mut self, identification: DeviceIdentification) -> Self {
        self.identification = identification;
        self
    }

    fn check_range(len: usize, addr: u16, cnt: usize) -> ModbusResult<()> {
        if addr as usize + cnt > len {
            return Err(ModbusError::exception(ModbusException::IllegalDataAddress));
        }
        Ok(())
    }

    fn read_bit_table(
        table: &RwLock<Vec<bool>>,
        addr: u16,
        cnt: u16,
    ) -> ModbusResult<Vec<bool>> {
        let bits = table.read().unwrap();
        Self::check_range(bits.len(), addr, cnt as usize)?;
        Ok(bits[addr as usize..addr as usize + cnt as usize].to_vec())
    }

    fn read_register_table(
        table: &RwLock<Vec<u16>>,
        addr: u16,
        cnt: u16,
    ) -> ModbusResult<Vec<u16>> {
        let regs = table.read().unwrap();
        Self::check_range(regs.len(), addr, cnt as usize)?;
        Ok(regs[addr as usize..addr as usize + cnt as usize].to_vec())
    }

    /// Set a discrete input, e.g. from a simulated process.
    pub fn set_discrete_input(&self, addr: u16, value: bool) -> ModbusResult<()> {
        let mut inputs = self.discrete_inputs.write().unwrap();
        Self::check_range(inputs.len(), addr, 1)?;
        inputs[addr as usize] = value;
        Ok(())
    }

    /// Set an input register, e.g. from a simulated process.
    pub fn set_input_register(&self, addr: u16, value: u16) -> ModbusResult<()> {
        let mut regs = self.input_registers.write().unwrap();
        Self::check_range(regs.len(), addr, 1)?;
        regs[addr as usize] = value;
        Ok(())
    }

    /// Read holding registers directly, bypassing the protocol path.
    pub fn get_holding_registers(&self, addr: u16, cnt: u16) -> ModbusResult<Vec<u16>> {
        Self::read_register_table(&self.holding_registers, addr, cnt)
    }

    /// Read coils directly, bypassing the protocol path.
    pub fn get_coils(&self, addr: u16, cnt: u16) -> ModbusResult<Vec<bool>> {
        Self::read_bit_table(&self.coils, addr, cnt)
    }
}

impl Default for ModbusRegisterBank {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModbusBackend for ModbusRegisterBank {
    async fn authorize(&self, _id: ClientId, _remote_addr: &SocketAddr) -> bool {
        true
    }

    async fn read_coils(&self, addr: u16, cnt: u16) -> ModbusResult<Vec<bool>> {
        Self::read_bit_table(&self.coils, addr, cnt)
    }

    async fn read_discrete_inputs(&self, addr: u16, cnt: u16) -> ModbusResult<Vec<bool>> {
        Self::read_bit_table(&self.discrete_inputs, addr, cnt)
    }

    async fn read_holding_registers(&self, addr: u16, cnt: u16) -> ModbusResult<Vec<u16>> {
        Self::read_register_table(&self.holding_registers, addr, cnt)
    }

    async fn read_input_registers(&self, addr: u16, cnt: u16) -> ModbusResult<Vec<u16>> {
        Self::read_register_table(&self.input_registers, addr, cnt)
    }

    async fn write_coils(&self, addr: u16, bits: &[bool]) -> ModbusResult<()> {
        let mut coils = self.coils.write().unwrap();
        Self::check_range(coils.len(), addr, bits.len())?;
        coils[addr as usize..addr as usize + bits.len()].copy_from_slice(bits);
        Ok(())
    }

    async fn write_holding_registers(&self, addr: u16, regs: &[u16]) -> ModbusResult<()> {
        let mut table = self.holding_registers.write().unwrap();
        Self::check_range(table.len(), addr, regs.len())?;
        table[addr as usize..addr as usize + regs.len()].copy_from_slice(regs);
        Ok(())
    }

    async fn write_read_holding_registers(
        &self,
        wr_addr: u16,
        regs: &[u16],
        rd_addr: u16,
        rd_cnt: u16,
    ) -> ModbusResult<Vec<u16>> {
        // write before read, under one lock so the pair is atomic
        let mut table = self.holding_registers.write().unwrap();
        Self::check_range(table.len(), wr_addr, regs.len())?;
        Self::check_range(table.len(), rd_addr, rd_cnt as usize)?;
        table[wr_addr as usize..wr_addr as usize + regs.len()].copy_from_slice(regs);
        Ok(table[rd_addr as usize..rd_addr as usize + rd_cnt as usize].to_vec())
    }

    async fn get_basic_device_identification(&self) -> ModbusResult<DeviceIdentification> {
        Ok(self.identification.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_write_coils() {
        let bank = ModbusRegisterBank::new();

        bank.write_coils(10, &[true]).await.unwrap();
        assert_eq!(bank.read_coils(10, 1).await.unwrap(), vec![true]);

        bank.write_coils(20, &[true, false, true]).await.unwrap();
        assert_eq!(
            bank.read_coils(20, 3).await.unwrap(),
            vec![true, false, true]
        );
    }

    #[tokio::test]
    async fn test_read_write_registers() {
        let bank = ModbusRegisterBank::new();

        bank.write_holding_registers(5, &[0xABCD]).await.unwrap();
        assert_eq!(bank.read_holding_registers(5, 1).await.unwrap(), vec![0xABCD]);

        bank.write_holding_registers(100, &[0x1111, 0x2222, 0x3333])
            .await
            .unwrap();
        assert_eq!(
            bank.read_holding_registers(100, 3).await.unwrap(),
            vec![0x1111, 0x2222, 0x3333]
        );
    }

    #[tokio::test]
    async fn test_write_read_is_write_then_read() {
        let bank = ModbusRegisterBank::new();

        let read = bank
            .write_read_holding_registers(0, &[7, 8], 1, 2)
            .await
            .unwrap();
        assert_eq!(read, vec![8, 0]);
    }

    #[tokio::test]
    async fn test_out_of_range_raises_illegal_data_address() {
        let bank = ModbusRegisterBank::with_sizes(8, 8, 8, 8);

        let err = bank.read_coils(7, 2).await.unwrap_err();
        assert!(matches!(
            err,
            ModbusError::Exception(ModbusException::IllegalDataAddress)
        ));

        let err = bank.write_holding_registers(8, &[1]).await.unwrap_err();
        assert!(matches!(
            err,
            ModbusError::Exception(ModbusException::IllegalDataAddress)
        ));
    }

    #[tokio::test]
    async fn test_simulation_setters() {
        let bank = ModbusRegisterBank::new();

        bank.set_discrete_input(3, true).unwrap();
        assert_eq!(
            bank.read_discrete_inputs(3, 1).await.unwrap(),
            vec![true]
        );

        bank.set_input_register(4, 0x5678).unwrap();
        assert_eq!(bank.read_input_registers(4, 1).await.unwrap(), vec![0x5678]);
    }
}
