/// Modbus data model for server-side storage
///
/// This module provides the four addressable Modbus tables (coils, discrete
/// inputs, holding registers, input registers) together with the diagnostics
/// state that function codes 0x07 and 0x08 read and reset.
///
/// The model itself is a plain owned value. Servers share it as
/// `Arc<Mutex<DataModel>>` and hold the lock only while a command is applied.

use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::{ModbusError, ModbusResult};
use crate::frame::ASCII_DEFAULT_DELIMITER;
use crate::protocol::{DiagnosticsCode, ModbusAddress, ModbusException};

/// Largest table a 16-bit address space can index
pub const MAX_TABLE_SIZE: usize = 65536;

/// Configured size of each table
///
/// Addresses `0..size` are valid; anything at or beyond the bound yields
/// `ILLEGAL_DATA_ADDRESS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterTableBounds {
    pub coils: usize,
    pub discrete_inputs: usize,
    pub holding_registers: usize,
    pub input_registers: usize,
}

impl RegisterTableBounds {
    /// Same size for all four tables
    pub fn uniform(size: usize) -> Self {
        Self {
            coils: size,
            discrete_inputs: size,
            holding_registers: size,
            input_registers: size,
        }
    }

    /// Reject tables larger than the 16-bit address space
    pub fn validate(&self) -> ModbusResult<()> {
        let tables = [
            ("coils", self.coils),
            ("discrete_inputs", self.discrete_inputs),
            ("holding_registers", self.holding_registers),
            ("input_registers", self.input_registers),
        ];

        for (name, size) in tables {
            if size > MAX_TABLE_SIZE {
                return Err(ModbusError::configuration(format!(
                    "{} table size {} exceeds {}", name, size, MAX_TABLE_SIZE
                )));
            }
        }
        Ok(())
    }
}

impl Default for RegisterTableBounds {
    fn default() -> Self {
        Self::uniform(MAX_TABLE_SIZE)
    }
}

/// Counters reported by the Diagnostics "return count" sub-functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCounter {
    /// Frames that passed framing and checksum checks
    BusMessage,
    /// Frames dropped for framing or checksum errors
    BusCommunicationError,
    /// Exception responses built by this server
    BusExceptionError,
    /// Messages addressed to this server, broadcast included
    SlaveMessage,
    /// Addressed messages that were processed but not answered
    SlaveNoResponse,
    SlaveNak,
    SlaveBusy,
    /// Characters lost by the transport; reported by the transport collaborator
    BusCharacterOverrun,
}

impl DiagnosticCounter {
    const COUNT: usize = 8;

    /// Counter reported by a Diagnostics sub-function, if any
    pub fn from_code(code: DiagnosticsCode) -> Option<Self> {
        match code {
            DiagnosticsCode::ReturnBusMessageCount => Some(Self::BusMessage),
            DiagnosticsCode::ReturnBusCommunicationErrorCount => Some(Self::BusCommunicationError),
            DiagnosticsCode::ReturnBusExceptionErrorCount => Some(Self::BusExceptionError),
            DiagnosticsCode::ReturnSlaveMessageCount => Some(Self::SlaveMessage),
            DiagnosticsCode::ReturnSlaveNoResponseCount => Some(Self::SlaveNoResponse),
            DiagnosticsCode::ReturnSlaveNakCount => Some(Self::SlaveNak),
            DiagnosticsCode::ReturnSlaveBusyCount => Some(Self::SlaveBusy),
            DiagnosticsCode::ReturnBusCharacterOverrunCount => Some(Self::BusCharacterOverrun),
            _ => None,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Diagnostic counter table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticCounters {
    values: [u64; DiagnosticCounter::COUNT],
}

impl DiagnosticCounters {
    pub fn get(&self, counter: DiagnosticCounter) -> u64 {
        self.values[counter.index()]
    }

    /// Value as reported on the wire, saturated to 16 bits
    pub fn wire_value(&self, counter: DiagnosticCounter) -> u16 {
        self.get(counter).min(u16::MAX as u64) as u16
    }

    pub fn increment(&mut self, counter: DiagnosticCounter) {
        let slot = &mut self.values[counter.index()];
        *slot = slot.saturating_add(1);
    }

    pub fn clear(&mut self) {
        self.values = [0; DiagnosticCounter::COUNT];
    }

    pub fn reset(&mut self, counter: DiagnosticCounter) {
        self.values[counter.index()] = 0;
    }
}

/// Modbus data model: four bounded tables plus diagnostics state
#[derive(Debug, Clone)]
pub struct DataModel {
    bounds: RegisterTableBounds,
    /// Coils (read/write) - 1 bit each
    coils: Vec<bool>,
    /// Discrete inputs (read-only on the wire) - 1 bit each
    discrete_inputs: Vec<bool>,
    /// Holding registers (read/write) - 16 bits each
    holding_registers: Vec<u16>,
    /// Input registers (read-only on the wire) - 16 bits each
    input_registers: Vec<u16>,
    counters: DiagnosticCounters,
    diagnostic_register: u16,
    exception_status: u8,
    ascii_delimiter: u8,
}

impl DataModel {
    /// Create a zero-initialised model with the given table sizes
    pub fn new(bounds: RegisterTableBounds) -> ModbusResult<Self> {
        bounds.validate()?;
        Ok(Self::zeroed(bounds))
    }

    fn zeroed(bounds: RegisterTableBounds) -> Self {
        Self {
            bounds,
            coils: vec![false; bounds.coils],
            discrete_inputs: vec![false; bounds.discrete_inputs],
            holding_registers: vec![0; bounds.holding_registers],
            input_registers: vec![0; bounds.input_registers],
            counters: DiagnosticCounters::default(),
            diagnostic_register: 0,
            exception_status: 0,
            ascii_delimiter: ASCII_DEFAULT_DELIMITER,
        }
    }

    pub fn bounds(&self) -> RegisterTableBounds {
        self.bounds
    }

    /// Index range for `quantity` items from `address`, if it fits the table
    fn range(table_len: usize, address: ModbusAddress, quantity: usize) -> Result<Range<usize>, ModbusException> {
        let start = address as usize;
        let end = start + quantity;
        if end > table_len || start >= table_len {
            return Err(ModbusException::IllegalDataAddress);
        }
        Ok(start..end)
    }

    /// Read coils starting at address (function code 0x01)
    pub fn read_coils(&self, address: ModbusAddress, quantity: u16) -> Result<Vec<bool>, ModbusException> {
        let range = Self::range(self.coils.len(), address, quantity as usize)?;
        Ok(self.coils[range].to_vec())
    }

    /// Read discrete inputs starting at address (function code 0x02)
    pub fn read_discrete_inputs(&self, address: ModbusAddress, quantity: u16) -> Result<Vec<bool>, ModbusException> {
        let range = Self::range(self.discrete_inputs.len(), address, quantity as usize)?;
        Ok(self.discrete_inputs[range].to_vec())
    }

    /// Read holding registers starting at address (function code 0x03)
    pub fn read_holding_registers(&self, address: ModbusAddress, quantity: u16) -> Result<Vec<u16>, ModbusException> {
        let range = Self::range(self.holding_registers.len(), address, quantity as usize)?;
        Ok(self.holding_registers[range].to_vec())
    }

    /// Read input registers starting at address (function code 0x04)
    pub fn read_input_registers(&self, address: ModbusAddress, quantity: u16) -> Result<Vec<u16>, ModbusException> {
        let range = Self::range(self.input_registers.len(), address, quantity as usize)?;
        Ok(self.input_registers[range].to_vec())
    }

    /// Write single coil (function code 0x05)
    pub fn write_coil(&mut self, address: ModbusAddress, value: bool) -> Result<(), ModbusException> {
        let range = Self::range(self.coils.len(), address, 1)?;
        self.coils[range.start] = value;
        Ok(())
    }

    /// Write multiple coils (function code 0x0F)
    ///
    /// The whole range is checked before anything is written.
    pub fn write_coils(&mut self, address: ModbusAddress, values: &[bool]) -> Result<(), ModbusException> {
        let range = Self::range(self.coils.len(), address, values.len())?;
        self.coils[range].copy_from_slice(values);
        Ok(())
    }

    /// Write single register (function code 0x06)
    pub fn write_holding_register(&mut self, address: ModbusAddress, value: u16) -> Result<(), ModbusException> {
        let range = Self::range(self.holding_registers.len(), address, 1)?;
        self.holding_registers[range.start] = value;
        Ok(())
    }

    /// Write multiple registers (function code 0x10)
    pub fn write_holding_registers(&mut self, address: ModbusAddress, values: &[u16]) -> Result<(), ModbusException> {
        let range = Self::range(self.holding_registers.len(), address, values.len())?;
        self.holding_registers[range].copy_from_slice(values);
        Ok(())
    }

    /// Set discrete input value (process side / simulation)
    pub fn set_discrete_input(&mut self, address: ModbusAddress, value: bool) -> Result<(), ModbusException> {
        let range = Self::range(self.discrete_inputs.len(), address, 1)?;
        self.discrete_inputs[range.start] = value;
        Ok(())
    }

    /// Set input register value (process side / simulation)
    pub fn set_input_register(&mut self, address: ModbusAddress, value: u16) -> Result<(), ModbusException> {
        let range = Self::range(self.input_registers.len(), address, 1)?;
        self.input_registers[range.start] = value;
        Ok(())
    }

    pub fn counters(&self) -> &DiagnosticCounters {
        &self.counters
    }

    pub fn increment_counter(&mut self, counter: DiagnosticCounter) {
        self.counters.increment(counter);
    }

    /// Clear every counter and the diagnostic register
    pub fn clear_diagnostics(&mut self) {
        self.counters.clear();
        self.diagnostic_register = 0;
    }

    pub fn clear_overrun(&mut self) {
        self.counters.reset(DiagnosticCounter::BusCharacterOverrun);
    }

    pub fn diagnostic_register(&self) -> u16 {
        self.diagnostic_register
    }

    pub fn set_diagnostic_register(&mut self, value: u16) {
        self.diagnostic_register = value;
    }

    /// Exception status byte returned by function code 0x07
    pub fn exception_status(&self) -> u8 {
        self.exception_status
    }

    pub fn set_exception_status(&mut self, status: u8) {
        self.exception_status = status;
    }

    /// ASCII end-of-frame delimiter set by Diagnostics 0x03
    pub fn ascii_delimiter(&self) -> u8 {
        self.ascii_delimiter
    }

    pub fn set_ascii_delimiter(&mut self, delimiter: u8) {
        self.ascii_delimiter = delimiter;
    }

    /// Get data model statistics
    pub fn get_stats(&self) -> DataModelStats {
        DataModelStats {
            coils_count: self.coils.len(),
            discrete_inputs_count: self.discrete_inputs.len(),
            holding_registers_count: self.holding_registers.len(),
            input_registers_count: self.input_registers.len(),
            coils_set: self.coils.iter().filter(|&&c| c).count(),
        }
    }
}

impl Default for DataModel {
    fn default() -> Self {
        Self::zeroed(RegisterTableBounds::default())
    }
}

/// Data model statistics
#[derive(Debug, Clone)]
pub struct DataModelStats {
    pub coils_count: usize,
    pub discrete_inputs_count: usize,
    pub holding_registers_count: usize,
    pub input_registers_count: usize,
    pub coils_set: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_model() -> DataModel {
        DataModel::new(RegisterTableBounds::uniform(8)).unwrap()
    }

    #[test]
    fn test_coil_operations() {
        let mut model = small_model();

        model.write_coil(2, true).unwrap();
        assert_eq!(model.read_coils(2, 1).unwrap(), vec![true]);

        model.write_coils(4, &[true, false, true]).unwrap();
        assert_eq!(model.read_coils(4, 3).unwrap(), vec![true, false, true]);
        assert_eq!(model.get_stats().coils_set, 3);
    }

    #[test]
    fn test_register_operations() {
        let mut model = small_model();

        model.write_holding_register(5, 42).unwrap();
        assert_eq!(model.read_holding_registers(5, 1).unwrap(), vec![42]);

        model.write_holding_registers(0, &[100, 200, 300]).unwrap();
        assert_eq!(model.read_holding_registers(0, 3).unwrap(), vec![100, 200, 300]);

        model.set_input_register(7, 0xBEEF).unwrap();
        assert_eq!(model.read_input_registers(6, 2).unwrap(), vec![0, 0xBEEF]);
    }

    #[test]
    fn test_out_of_range_access() {
        let mut model = small_model();

        assert_eq!(model.read_coils(8, 1), Err(ModbusException::IllegalDataAddress));
        assert_eq!(model.read_coils(7, 2), Err(ModbusException::IllegalDataAddress));
        assert_eq!(model.read_holding_registers(0xFFFF, 1), Err(ModbusException::IllegalDataAddress));
        assert_eq!(model.write_coil(8, true), Err(ModbusException::IllegalDataAddress));
        assert_eq!(model.set_discrete_input(100, true), Err(ModbusException::IllegalDataAddress));

        // A rejected multi-write leaves the table untouched
        assert_eq!(model.write_holding_registers(6, &[1, 2, 3]), Err(ModbusException::IllegalDataAddress));
        assert_eq!(model.read_holding_registers(6, 2).unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_full_address_space() {
        let mut model = DataModel::default();
        model.write_holding_register(0xFFFF, 7).unwrap();
        assert_eq!(model.read_holding_registers(0xFFFF, 1).unwrap(), vec![7]);
        assert_eq!(model.read_holding_registers(0xFFFF, 2), Err(ModbusException::IllegalDataAddress));
    }

    #[test]
    fn test_bounds_validation() {
        assert!(RegisterTableBounds::uniform(MAX_TABLE_SIZE).validate().is_ok());

        let too_big = RegisterTableBounds {
            holding_registers: MAX_TABLE_SIZE + 1,
            ..RegisterTableBounds::uniform(10)
        };
        let err = DataModel::new(too_big).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_default_matches_new() {
        let default = DataModel::default();
        let built = DataModel::new(RegisterTableBounds::default()).unwrap();

        assert_eq!(default.bounds(), built.bounds());
        assert_eq!(default.get_stats().holding_registers_count, MAX_TABLE_SIZE);
        assert_eq!(default.ascii_delimiter(), built.ascii_delimiter());
        assert_eq!(default.counters(), built.counters());
        assert_eq!(default.read_coils(65535, 1), Ok(vec![false]));
    }

    #[test]
    fn test_diagnostic_counters() {
        let mut model = small_model();
        model.increment_counter(DiagnosticCounter::BusMessage);
        model.increment_counter(DiagnosticCounter::BusMessage);
        model.increment_counter(DiagnosticCounter::BusCharacterOverrun);
        model.set_diagnostic_register(0x0101);

        let counter = DiagnosticCounter::from_code(DiagnosticsCode::ReturnBusMessageCount).unwrap();
        assert_eq!(model.counters().get(counter), 2);

        model.clear_overrun();
        assert_eq!(model.counters().get(DiagnosticCounter::BusCharacterOverrun), 0);
        assert_eq!(model.counters().get(DiagnosticCounter::BusMessage), 2);

        model.clear_diagnostics();
        assert_eq!(model.counters().get(DiagnosticCounter::BusMessage), 0);
        assert_eq!(model.diagnostic_register(), 0);
    }

    #[test]
    fn test_counter_wire_value_saturates() {
        let mut counters = DiagnosticCounters::default();
        for _ in 0..70_000 {
            counters.increment(DiagnosticCounter::SlaveMessage);
        }
        assert_eq!(counters.get(DiagnosticCounter::SlaveMessage), 70_000);
        assert_eq!(counters.wire_value(DiagnosticCounter::SlaveMessage), 0xFFFF);
    }
}
