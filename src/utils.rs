/// Utility functions and helpers for Modbus server operations
///
/// This module contains configuration validation, formatting helpers for logs
/// and the test logger setup.

use std::time::Duration;
use crate::error::{ModbusError, ModbusResult};
use crate::frame::FramingVariant;

/// Data validation utilities
pub mod validation {
    use super::*;
    use crate::protocol::{BROADCAST_ADDRESS, MAX_UNIT_ADDRESS};

    /// Validate a server unit address
    ///
    /// Serial servers need an address in 1-247; 0 is the broadcast address.
    /// TCP servers may also use 0, as the unit id is usually ignored there.
    pub fn validate_unit_address(unit_address: u8, framing: FramingVariant) -> ModbusResult<()> {
        if unit_address > MAX_UNIT_ADDRESS {
            return Err(ModbusError::configuration(
                format!("Invalid unit address: {} (must be at most {})", unit_address, MAX_UNIT_ADDRESS)
            ));
        }
        if unit_address == BROADCAST_ADDRESS && framing.is_serial() {
            return Err(ModbusError::configuration(
                format!("Unit address 0 is reserved for broadcast on {} lines", framing)
            ));
        }
        Ok(())
    }

    /// Validate a serial baud rate
    pub fn validate_baud_rate(baud_rate: u32) -> ModbusResult<()> {
        if baud_rate == 0 {
            return Err(ModbusError::configuration("Baud rate must be greater than zero"));
        }
        Ok(())
    }
}

/// Formatting and display utilities
pub mod format {
    use super::*;

    /// Format byte array as hex string
    pub fn bytes_to_hex(bytes: &[u8]) -> String {
        bytes.iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Format register values as hex
    pub fn registers_to_hex(registers: &[u16]) -> String {
        registers.iter()
            .map(|r| format!("{:04X}", r))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Format duration in a human-readable way
    pub fn format_duration(duration: Duration) -> String {
        let millis = duration.as_millis();
        if millis < 1000 {
            format!("{}ms", millis)
        } else if millis < 60_000 {
            format!("{:.2}s", duration.as_secs_f64())
        } else {
            let mins = millis / 60_000;
            let secs = (millis % 60_000) as f64 / 1000.0;
            format!("{}m {:.1}s", mins, secs)
        }
    }
}

/// Logging utilities
pub mod logging {
    /// Initialize simple logger for testing
    pub fn init_test_logger() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .try_init();
    }
}
