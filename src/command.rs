//! # Modbus Command Set
//!
//! One [`Command`] variant per supported function code. A command is decoded
//! from a request PDU, applied to a [`DataModel`], and turns the outcome of
//! that application back into a response PDU.
//!
//! Validation happens in two places:
//!
//! - [`Command::decode`] rejects payloads whose shape is wrong (length, byte
//!   count, coil value) with `ILLEGAL_DATA_VALUE`, and unknown function codes
//!   with `ILLEGAL_FUNCTION`.
//! - [`Command::apply`] checks quantities against protocol limits first
//!   (`ILLEGAL_DATA_VALUE`) and then the address range against the table
//!   bounds (`ILLEGAL_DATA_ADDRESS`).
//!
//! ## Usage Example
//!
//! ```rust
//! use voltage_modbus_slave::command::Command;
//! use voltage_modbus_slave::data_model::{DataModel, RegisterTableBounds};
//!
//! let mut model = DataModel::new(RegisterTableBounds::uniform(16)).unwrap();
//! model.write_holding_registers(0, &[0x1234, 0x5678]).unwrap();
//!
//! let command = Command::decode(&[0x03, 0x00, 0x00, 0x00, 0x02]).unwrap();
//! let result = command.apply(&mut model);
//! assert_eq!(
//!     command.encode_response(&result),
//!     vec![0x03, 0x04, 0x12, 0x34, 0x56, 0x78]
//! );
//! ```

use std::fmt;

use crate::data_model::{DataModel, DiagnosticCounter};
use crate::protocol::{
    data_utils, DiagnosticsCode, ModbusAddress, ModbusException, ModbusFunction, COIL_OFF, COIL_ON,
    EXCEPTION_FLAG,
};

/// Maximum coils/discrete inputs per read request
pub const MAX_READ_BITS: u16 = 2000;

/// Maximum registers per read request
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum coils per write multiple coils request
pub const MAX_WRITE_COILS: u16 = 1968;

/// Maximum registers per write multiple registers request
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Diagnostics data value that restarts communications and clears counters
const RESTART_CLEAR_LOG: u16 = 0xFF00;

/// Decoded Modbus request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ReadCoils { address: ModbusAddress, quantity: u16 },
    ReadDiscreteInputs { address: ModbusAddress, quantity: u16 },
    ReadHoldingRegisters { address: ModbusAddress, quantity: u16 },
    ReadInputRegisters { address: ModbusAddress, quantity: u16 },
    WriteSingleCoil { address: ModbusAddress, value: bool },
    WriteSingleRegister { address: ModbusAddress, value: u16 },
    ReadExceptionStatus,
    Diagnostics { sub_function: u16, data: Vec<u8> },
    WriteMultipleCoils { address: ModbusAddress, values: Vec<bool> },
    WriteMultipleRegisters { address: ModbusAddress, values: Vec<u16> },
}

/// Successful outcome of [`Command::apply`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePayload {
    /// Bit values, sent as byte count + packed bits
    Bits(Vec<bool>),
    /// Register values, sent as byte count + big-endian words
    Registers(Vec<u16>),
    /// Echo of a single write: address and the value as it appeared on the wire
    SingleWrite { address: ModbusAddress, value: u16 },
    /// Start address and quantity of a multiple write
    MultipleWrite { address: ModbusAddress, quantity: u16 },
    ExceptionStatus(u8),
    Diagnostic { sub_function: u16, data: Vec<u8> },
}

/// Change of the server's listen-only state requested by a Diagnostics command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenOnlyTransition {
    Enter,
    Leave,
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

fn check_quantity(quantity: u16, max: u16) -> Result<(), ModbusException> {
    if quantity == 0 || quantity > max {
        return Err(ModbusException::IllegalDataValue);
    }
    Ok(())
}

/// Exception PDU for `function_code`
///
/// Used directly when a request cannot even be decoded into a [`Command`].
pub fn exception_response(function_code: u8, exception: ModbusException) -> Vec<u8> {
    vec![function_code | EXCEPTION_FLAG, exception.to_u8()]
}

impl Command {
    /// Decode a request PDU (function code followed by payload)
    pub fn decode(pdu: &[u8]) -> Result<Self, ModbusException> {
        let (&code, payload) = pdu.split_first().ok_or(ModbusException::IllegalFunction)?;
        let function = ModbusFunction::from_u8(code)?;

        match function {
            ModbusFunction::ReadCoils
            | ModbusFunction::ReadDiscreteInputs
            | ModbusFunction::ReadHoldingRegisters
            | ModbusFunction::ReadInputRegisters => {
                if payload.len() != 4 {
                    return Err(ModbusException::IllegalDataValue);
                }
                let address = read_u16(payload, 0);
                let quantity = read_u16(payload, 2);

                Ok(match function {
                    ModbusFunction::ReadCoils => Command::ReadCoils { address, quantity },
                    ModbusFunction::ReadDiscreteInputs => Command::ReadDiscreteInputs { address, quantity },
                    ModbusFunction::ReadHoldingRegisters => Command::ReadHoldingRegisters { address, quantity },
                    _ => Command::ReadInputRegisters { address, quantity },
                })
            }
            ModbusFunction::WriteSingleCoil => {
                if payload.len() != 4 {
                    return Err(ModbusException::IllegalDataValue);
                }
                let value = match read_u16(payload, 2) {
                    COIL_ON => true,
                    COIL_OFF => false,
                    _ => return Err(ModbusException::IllegalDataValue),
                };
                Ok(Command::WriteSingleCoil { address: read_u16(payload, 0), value })
            }
            ModbusFunction::WriteSingleRegister => {
                if payload.len() != 4 {
                    return Err(ModbusException::IllegalDataValue);
                }
                Ok(Command::WriteSingleRegister {
                    address: read_u16(payload, 0),
                    value: read_u16(payload, 2),
                })
            }
            ModbusFunction::ReadExceptionStatus => {
                if !payload.is_empty() {
                    return Err(ModbusException::IllegalDataValue);
                }
                Ok(Command::ReadExceptionStatus)
            }
            ModbusFunction::Diagnostics => {
                if payload.len() < 2 {
                    return Err(ModbusException::IllegalDataValue);
                }
                Ok(Command::Diagnostics {
                    sub_function: read_u16(payload, 0),
                    data: payload[2..].to_vec(),
                })
            }
            ModbusFunction::WriteMultipleCoils => {
                let (address, quantity, data) = Self::split_multiple_write(payload)?;
                if data.len() != (quantity as usize + 7) / 8 {
                    return Err(ModbusException::IllegalDataValue);
                }
                Ok(Command::WriteMultipleCoils {
                    address,
                    values: data_utils::unpack_bits(data, quantity as usize),
                })
            }
            ModbusFunction::WriteMultipleRegisters => {
                let (address, quantity, data) = Self::split_multiple_write(payload)?;
                if data.len() != quantity as usize * 2 {
                    return Err(ModbusException::IllegalDataValue);
                }
                Ok(Command::WriteMultipleRegisters {
                    address,
                    values: data_utils::bytes_to_registers(data),
                })
            }
        }
    }

    /// Split `address, quantity, byte count, data` and check the byte count
    fn split_multiple_write(payload: &[u8]) -> Result<(ModbusAddress, u16, &[u8]), ModbusException> {
        if payload.len() < 5 {
            return Err(ModbusException::IllegalDataValue);
        }
        let byte_count = payload[4] as usize;
        let data = &payload[5..];
        if data.len() != byte_count {
            return Err(ModbusException::IllegalDataValue);
        }
        Ok((read_u16(payload, 0), read_u16(payload, 2), data))
    }

    /// Function code of this command
    pub fn function(&self) -> ModbusFunction {
        match self {
            Command::ReadCoils { .. } => ModbusFunction::ReadCoils,
            Command::ReadDiscreteInputs { .. } => ModbusFunction::ReadDiscreteInputs,
            Command::ReadHoldingRegisters { .. } => ModbusFunction::ReadHoldingRegisters,
            Command::ReadInputRegisters { .. } => ModbusFunction::ReadInputRegisters,
            Command::WriteSingleCoil { .. } => ModbusFunction::WriteSingleCoil,
            Command::WriteSingleRegister { .. } => ModbusFunction::WriteSingleRegister,
            Command::ReadExceptionStatus => ModbusFunction::ReadExceptionStatus,
            Command::Diagnostics { .. } => ModbusFunction::Diagnostics,
            Command::WriteMultipleCoils { .. } => ModbusFunction::WriteMultipleCoils,
            Command::WriteMultipleRegisters { .. } => ModbusFunction::WriteMultipleRegisters,
        }
    }

    /// Execute the command against the data model
    pub fn apply(&self, model: &mut DataModel) -> Result<ResponsePayload, ModbusException> {
        match self {
            Command::ReadCoils { address, quantity } => {
                check_quantity(*quantity, MAX_READ_BITS)?;
                model.read_coils(*address, *quantity).map(ResponsePayload::Bits)
            }
            Command::ReadDiscreteInputs { address, quantity } => {
                check_quantity(*quantity, MAX_READ_BITS)?;
                model.read_discrete_inputs(*address, *quantity).map(ResponsePayload::Bits)
            }
            Command::ReadHoldingRegisters { address, quantity } => {
                check_quantity(*quantity, MAX_READ_REGISTERS)?;
                model.read_holding_registers(*address, *quantity).map(ResponsePayload::Registers)
            }
            Command::ReadInputRegisters { address, quantity } => {
                check_quantity(*quantity, MAX_READ_REGISTERS)?;
                model.read_input_registers(*address, *quantity).map(ResponsePayload::Registers)
            }
            Command::WriteSingleCoil { address, value } => {
                model.write_coil(*address, *value)?;
                Ok(ResponsePayload::SingleWrite {
                    address: *address,
                    value: if *value { COIL_ON } else { COIL_OFF },
                })
            }
            Command::WriteSingleRegister { address, value } => {
                model.write_holding_register(*address, *value)?;
                Ok(ResponsePayload::SingleWrite { address: *address, value: *value })
            }
            Command::ReadExceptionStatus => Ok(ResponsePayload::ExceptionStatus(model.exception_status())),
            Command::Diagnostics { sub_function, data } => Self::apply_diagnostics(*sub_function, data, model),
            Command::WriteMultipleCoils { address, values } => {
                let quantity = values.len().min(u16::MAX as usize) as u16;
                check_quantity(quantity, MAX_WRITE_COILS)?;
                model.write_coils(*address, values)?;
                Ok(ResponsePayload::MultipleWrite { address: *address, quantity })
            }
            Command::WriteMultipleRegisters { address, values } => {
                let quantity = values.len().min(u16::MAX as usize) as u16;
                check_quantity(quantity, MAX_WRITE_REGISTERS)?;
                model.write_holding_registers(*address, values)?;
                Ok(ResponsePayload::MultipleWrite { address: *address, quantity })
            }
        }
    }

    fn apply_diagnostics(
        sub_function: u16,
        data: &[u8],
        model: &mut DataModel,
    ) -> Result<ResponsePayload, ModbusException> {
        let code = DiagnosticsCode::from_u16(sub_function).ok_or(ModbusException::IllegalFunction)?;
        let echo = || ResponsePayload::Diagnostic { sub_function, data: data.to_vec() };
        let word = |value: u16| ResponsePayload::Diagnostic {
            sub_function,
            data: value.to_be_bytes().to_vec(),
        };

        // Every sub-function except Return Query Data carries exactly one word
        if code != DiagnosticsCode::ReturnQueryData && data.len() != 2 {
            return Err(ModbusException::IllegalDataValue);
        }

        match code {
            DiagnosticsCode::ReturnQueryData => Ok(echo()),
            DiagnosticsCode::RestartCommunicationsOption => match read_u16(data, 0) {
                0x0000 => Ok(echo()),
                RESTART_CLEAR_LOG => {
                    model.clear_diagnostics();
                    Ok(echo())
                }
                _ => Err(ModbusException::IllegalDataValue),
            },
            DiagnosticsCode::ChangeAsciiInputDelimiter => {
                if data[1] != 0x00 {
                    return Err(ModbusException::IllegalDataValue);
                }
                model.set_ascii_delimiter(data[0]);
                Ok(echo())
            }
            _ if read_u16(data, 0) != 0x0000 => Err(ModbusException::IllegalDataValue),
            DiagnosticsCode::ReturnDiagnosticRegister => Ok(word(model.diagnostic_register())),
            DiagnosticsCode::ForceListenOnlyMode => Ok(echo()),
            DiagnosticsCode::ClearCountersAndDiagnosticRegister => {
                model.clear_diagnostics();
                Ok(echo())
            }
            DiagnosticsCode::ClearOverrunCounterAndFlag => {
                model.clear_overrun();
                Ok(echo())
            }
            counter_code => match DiagnosticCounter::from_code(counter_code) {
                Some(counter) => Ok(word(model.counters().wire_value(counter))),
                None => Err(ModbusException::IllegalFunction),
            },
        }
    }

    /// Listen-only change this command requests once applied successfully
    pub fn listen_only_transition(&self) -> Option<ListenOnlyTransition> {
        match self {
            Command::Diagnostics { sub_function, .. } => match DiagnosticsCode::from_u16(*sub_function)? {
                DiagnosticsCode::ForceListenOnlyMode => Some(ListenOnlyTransition::Enter),
                DiagnosticsCode::RestartCommunicationsOption => Some(ListenOnlyTransition::Leave),
                _ => None,
            },
            _ => None,
        }
    }

    /// Build the response PDU for the outcome of [`Command::apply`]
    pub fn encode_response(&self, result: &Result<ResponsePayload, ModbusException>) -> Vec<u8> {
        let function_code = self.function().to_u8();

        let payload = match result {
            Ok(payload) => payload,
            Err(exception) => return exception_response(function_code, *exception),
        };

        let mut pdu = vec![function_code];
        match payload {
            ResponsePayload::Bits(bits) => {
                let packed = data_utils::pack_bits(bits);
                pdu.push(packed.len() as u8);
                pdu.extend_from_slice(&packed);
            }
            ResponsePayload::Registers(registers) => {
                pdu.push((registers.len() * 2) as u8);
                pdu.extend_from_slice(&data_utils::registers_to_bytes(registers));
            }
            ResponsePayload::SingleWrite { address, value } => {
                pdu.extend_from_slice(&address.to_be_bytes());
                pdu.extend_from_slice(&value.to_be_bytes());
            }
            ResponsePayload::MultipleWrite { address, quantity } => {
                pdu.extend_from_slice(&address.to_be_bytes());
                pdu.extend_from_slice(&quantity.to_be_bytes());
            }
            ResponsePayload::ExceptionStatus(status) => pdu.push(*status),
            ResponsePayload::Diagnostic { sub_function, data } => {
                pdu.extend_from_slice(&sub_function.to_be_bytes());
                pdu.extend_from_slice(data);
            }
        }
        pdu
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::ReadCoils { address, quantity }
            | Command::ReadDiscreteInputs { address, quantity }
            | Command::ReadHoldingRegisters { address, quantity }
            | Command::ReadInputRegisters { address, quantity } => {
                write!(f, "{} addr={} qty={}", self.function().name(), address, quantity)
            }
            Command::WriteSingleCoil { address, value } => {
                write!(f, "{} addr={} value={}", self.function().name(), address, if *value { "ON" } else { "OFF" })
            }
            Command::WriteSingleRegister { address, value } => {
                write!(f, "{} addr={} value=0x{:04X}", self.function().name(), address, value)
            }
            Command::ReadExceptionStatus => f.write_str(self.function().name()),
            Command::Diagnostics { sub_function, data } => match DiagnosticsCode::from_u16(*sub_function) {
                Some(code) => write!(f, "Diagnostics {} data={}", code, hex::encode_upper(data)),
                None => write!(f, "Diagnostics reserved 0x{:04X}", sub_function),
            },
            Command::WriteMultipleCoils { address, values } => {
                write!(f, "{} addr={} qty={}", self.function().name(), address, values.len())
            }
            Command::WriteMultipleRegisters { address, values } => {
                write!(f, "{} addr={} qty={}", self.function().name(), address, values.len())
            }
        }
    }
}
