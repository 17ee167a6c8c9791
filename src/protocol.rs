/// Modbus protocol definitions and data structures
///
/// This module contains the code tables shared by every layer of the stack:
/// function codes, exception codes, diagnostics sub-function codes, and the
/// bit/register packing helpers used by the command set.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Modbus address type (0-65535)
pub type ModbusAddress = u16;

/// Modbus slave/unit identifier (0 = broadcast, 1-247 = device)
pub type SlaveId = u8;

/// Broadcast unit address on a serial line
pub const BROADCAST_ADDRESS: SlaveId = 0;

/// Highest assignable serial unit address
pub const MAX_UNIT_ADDRESS: SlaveId = 247;

/// Bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Coil value encoding ON for function code 0x05
pub const COIL_ON: u16 = 0xFF00;

/// Coil value encoding OFF for function code 0x05
pub const COIL_OFF: u16 = 0x0000;

/// Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Read Exception Status (0x07)
    ReadExceptionStatus = 0x07,
    /// Diagnostics (0x08)
    Diagnostics = 0x08,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
}

impl ModbusFunction {
    /// Convert from u8 to ModbusFunction
    ///
    /// Unknown codes map to `ILLEGAL_FUNCTION`, which is exactly what a server
    /// answers for them.
    pub fn from_u8(value: u8) -> Result<Self, ModbusException> {
        match value {
            0x01 => Ok(ModbusFunction::ReadCoils),
            0x02 => Ok(ModbusFunction::ReadDiscreteInputs),
            0x03 => Ok(ModbusFunction::ReadHoldingRegisters),
            0x04 => Ok(ModbusFunction::ReadInputRegisters),
            0x05 => Ok(ModbusFunction::WriteSingleCoil),
            0x06 => Ok(ModbusFunction::WriteSingleRegister),
            0x07 => Ok(ModbusFunction::ReadExceptionStatus),
            0x08 => Ok(ModbusFunction::Diagnostics),
            0x0F => Ok(ModbusFunction::WriteMultipleCoils),
            0x10 => Ok(ModbusFunction::WriteMultipleRegisters),
            _ => Err(ModbusException::IllegalFunction),
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable function name
    pub fn name(self) -> &'static str {
        match self {
            ModbusFunction::ReadCoils => "Read Coils",
            ModbusFunction::ReadDiscreteInputs => "Read Discrete Inputs",
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::ReadInputRegisters => "Read Input Registers",
            ModbusFunction::WriteSingleCoil => "Write Single Coil",
            ModbusFunction::WriteSingleRegister => "Write Single Register",
            ModbusFunction::ReadExceptionStatus => "Read Exception Status",
            ModbusFunction::Diagnostics => "Diagnostics",
            ModbusFunction::WriteMultipleCoils => "Write Multiple Coils",
            ModbusFunction::WriteMultipleRegisters => "Write Multiple Registers",
        }
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), *self as u8)
    }
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
    Acknowledge = 0x05,
    SlaveDeviceBusy = 0x06,
    NegativeAcknowledgment = 0x07,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

impl ModbusException {
    /// Convert from u8 to ModbusException
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ModbusException::IllegalFunction),
            0x02 => Some(ModbusException::IllegalDataAddress),
            0x03 => Some(ModbusException::IllegalDataValue),
            0x04 => Some(ModbusException::SlaveDeviceFailure),
            0x05 => Some(ModbusException::Acknowledge),
            0x06 => Some(ModbusException::SlaveDeviceBusy),
            0x07 => Some(ModbusException::NegativeAcknowledgment),
            0x08 => Some(ModbusException::MemoryParityError),
            0x0A => Some(ModbusException::GatewayPathUnavailable),
            0x0B => Some(ModbusException::GatewayTargetDeviceFailedToRespond),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get human-readable description
    pub fn description(self) -> &'static str {
        match self {
            ModbusException::IllegalFunction => "The function code received in the query is not an allowable action for the server",
            ModbusException::IllegalDataAddress => "The data address received in the query is not an allowable address for the server",
            ModbusException::IllegalDataValue => "A value contained in the query data field is not an allowable value for server",
            ModbusException::SlaveDeviceFailure => "An unrecoverable error occurred while the server was attempting to perform the requested action",
            ModbusException::Acknowledge => "The server has accepted the request and is processing it, but a long duration of time will be required to do so",
            ModbusException::SlaveDeviceBusy => "The server is engaged in processing a long-duration program command",
            ModbusException::NegativeAcknowledgment => "The server cannot perform the program function received in the query",
            ModbusException::MemoryParityError => "The server attempted to read record file, but detected a parity error in the memory",
            ModbusException::GatewayPathUnavailable => "Gateway was unable to allocate an internal communication path",
            ModbusException::GatewayTargetDeviceFailedToRespond => "No response was obtained from the target device",
        }
    }
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus Exception 0x{:02X}: {}", self.to_u8(), self.description())
    }
}

impl std::error::Error for ModbusException {}

/// Diagnostics (0x08) sub-function codes
///
/// 0x05-0x09 and 0x13 are reserved by the Modbus standard and have no
/// variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum DiagnosticsCode {
    ReturnQueryData = 0x0000,
    RestartCommunicationsOption = 0x0001,
    ReturnDiagnosticRegister = 0x0002,
    ChangeAsciiInputDelimiter = 0x0003,
    ForceListenOnlyMode = 0x0004,
    ClearCountersAndDiagnosticRegister = 0x000A,
    ReturnBusMessageCount = 0x000B,
    ReturnBusCommunicationErrorCount = 0x000C,
    ReturnBusExceptionErrorCount = 0x000D,
    ReturnSlaveMessageCount = 0x000E,
    ReturnSlaveNoResponseCount = 0x000F,
    ReturnSlaveNakCount = 0x0010,
    ReturnSlaveBusyCount = 0x0011,
    ReturnBusCharacterOverrunCount = 0x0012,
    ClearOverrunCounterAndFlag = 0x0014,
}

impl DiagnosticsCode {
    /// Convert from u16 to DiagnosticsCode
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0000 => Some(DiagnosticsCode::ReturnQueryData),
            0x0001 => Some(DiagnosticsCode::RestartCommunicationsOption),
            0x0002 => Some(DiagnosticsCode::ReturnDiagnosticRegister),
            0x0003 => Some(DiagnosticsCode::ChangeAsciiInputDelimiter),
            0x0004 => Some(DiagnosticsCode::ForceListenOnlyMode),
            0x000A => Some(DiagnosticsCode::ClearCountersAndDiagnosticRegister),
            0x000B => Some(DiagnosticsCode::ReturnBusMessageCount),
            0x000C => Some(DiagnosticsCode::ReturnBusCommunicationErrorCount),
            0x000D => Some(DiagnosticsCode::ReturnBusExceptionErrorCount),
            0x000E => Some(DiagnosticsCode::ReturnSlaveMessageCount),
            0x000F => Some(DiagnosticsCode::ReturnSlaveNoResponseCount),
            0x0010 => Some(DiagnosticsCode::ReturnSlaveNakCount),
            0x0011 => Some(DiagnosticsCode::ReturnSlaveBusyCount),
            0x0012 => Some(DiagnosticsCode::ReturnBusCharacterOverrunCount),
            0x0014 => Some(DiagnosticsCode::ClearOverrunCounterAndFlag),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Human-readable sub-function name
    pub fn name(self) -> &'static str {
        match self {
            DiagnosticsCode::ReturnQueryData => "Return Query Data",
            DiagnosticsCode::RestartCommunicationsOption => "Restart Communications Option",
            DiagnosticsCode::ReturnDiagnosticRegister => "Return Diagnostic Register",
            DiagnosticsCode::ChangeAsciiInputDelimiter => "Change ASCII Input Delimiter",
            DiagnosticsCode::ForceListenOnlyMode => "Force Listen Only Mode",
            DiagnosticsCode::ClearCountersAndDiagnosticRegister => "Clear Counters and Diagnostic Register",
            DiagnosticsCode::ReturnBusMessageCount => "Return Bus Message Count",
            DiagnosticsCode::ReturnBusCommunicationErrorCount => "Return Bus Communication Error Count",
            DiagnosticsCode::ReturnBusExceptionErrorCount => "Return Bus Exception Error Count",
            DiagnosticsCode::ReturnSlaveMessageCount => "Return Slave Message Count",
            DiagnosticsCode::ReturnSlaveNoResponseCount => "Return Slave No Response Count",
            DiagnosticsCode::ReturnSlaveNakCount => "Return Slave NAK Count",
            DiagnosticsCode::ReturnSlaveBusyCount => "Return Slave Busy Count",
            DiagnosticsCode::ReturnBusCharacterOverrunCount => "Return Bus Character Overrun Count",
            DiagnosticsCode::ClearOverrunCounterAndFlag => "Clear Overrun Counter and Flag",
        }
    }
}

impl fmt::Display for DiagnosticsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:04X})", self.name(), self.to_u16())
    }
}

/// Data conversion utilities
pub mod data_utils {
    /// Convert register values to bytes (big-endian)
    pub fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(registers.len() * 2);
        for &register in registers {
            bytes.extend_from_slice(&register.to_be_bytes());
        }
        bytes
    }

    /// Convert bytes to register values (big-endian)
    ///
    /// A trailing odd byte is ignored; callers validate the byte count first.
    pub fn bytes_to_registers(bytes: &[u8]) -> Vec<u16> {
        bytes.chunks_exact(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect()
    }

    /// Pack boolean values into bytes, LSB first
    pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
        let byte_count = (bits.len() + 7) / 8;
        let mut bytes = vec![0u8; byte_count];

        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                let byte_index = i / 8;
                let bit_index = i % 8;
                bytes[byte_index] |= 1 << bit_index;
            }
        }

        bytes
    }

    /// Unpack bytes into boolean values
    pub fn unpack_bits(bytes: &[u8], bit_count: usize) -> Vec<bool> {
        let mut bits = Vec::with_capacity(bit_count);

        for i in 0..bit_count {
            let byte_index = i / 8;
            let bit_index = i % 8;

            if byte_index < bytes.len() {
                let bit_value = (bytes[byte_index] & (1 << bit_index)) != 0;
                bits.push(bit_value);
            } else {
                bits.push(false);
            }
        }

        bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_conversion() {
        assert_eq!(ModbusFunction::from_u8(0x03).unwrap(), ModbusFunction::ReadHoldingRegisters);
        assert_eq!(ModbusFunction::from_u8(0x08).unwrap(), ModbusFunction::Diagnostics);
        assert_eq!(ModbusFunction::ReadHoldingRegisters.to_u8(), 0x03);
        assert_eq!(ModbusFunction::WriteMultipleCoils.to_u8(), 0x0F);

        assert_eq!(ModbusFunction::from_u8(0x2B), Err(ModbusException::IllegalFunction));
        assert_eq!(ModbusFunction::from_u8(0x00), Err(ModbusException::IllegalFunction));
    }

    #[test]
    fn test_exception_conversion() {
        assert_eq!(ModbusException::from_u8(0x02).unwrap(), ModbusException::IllegalDataAddress);
        assert_eq!(ModbusException::from_u8(0x07).unwrap(), ModbusException::NegativeAcknowledgment);
        assert_eq!(ModbusException::IllegalDataAddress.to_u8(), 0x02);
        assert_eq!(ModbusException::GatewayTargetDeviceFailedToRespond.to_u8(), 0x0B);
        assert!(ModbusException::from_u8(0x09).is_none());
    }

    #[test]
    fn test_diagnostics_code_conversion() {
        assert_eq!(DiagnosticsCode::from_u16(0x0004), Some(DiagnosticsCode::ForceListenOnlyMode));
        assert_eq!(DiagnosticsCode::from_u16(0x0014), Some(DiagnosticsCode::ClearOverrunCounterAndFlag));
        assert_eq!(DiagnosticsCode::ReturnBusCharacterOverrunCount.to_u16(), 0x0012);

        for reserved in [0x0005, 0x0009, 0x0013, 0x0015, 0xFFFF] {
            assert!(DiagnosticsCode::from_u16(reserved).is_none());
        }
    }

    #[test]
    fn test_data_utils() {
        let registers = vec![0x1234, 0x5678];
        let bytes = data_utils::registers_to_bytes(&registers);
        assert_eq!(bytes, vec![0x12, 0x34, 0x56, 0x78]);
        assert_eq!(data_utils::bytes_to_registers(&bytes), registers);

        let bits = vec![true, false, true, true, false, false, false, false, true];
        let packed = data_utils::pack_bits(&bits);
        assert_eq!(packed, vec![0b0000_1101, 0b0000_0001]);
        assert_eq!(data_utils::unpack_bits(&packed, bits.len()), bits);
    }
}
