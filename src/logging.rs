use std::sync::Arc;

use crate::command::Command;
use crate::protocol::{data_utils, DiagnosticsCode, ModbusException, ModbusFunction, COIL_ON, EXCEPTION_FLAG};

/// Log levels for the callback logging system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Error messages
    Error,
    /// Warning messages
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
}

/// Logging mode for traffic display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// Show raw unit + PDU bytes only
    Raw,
    /// Show decoded fields
    Interpreted,
    /// Decoded fields at info, raw bytes at debug
    Both,
}

impl LogLevel {
    /// Convert log level to string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Type alias for log callback functions
///
/// The callback receives a log level and message string
pub type LogCallback = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Logger for server traffic that forwards to a user callback
///
/// Servers carry a disabled logger by default. Install one with
/// `ModbusBaseServer::set_logger` to see every accepted request and every
/// response that goes out on the wire.
#[derive(Clone)]
pub struct CallbackLogger {
    callback: Option<Arc<LogCallback>>,
    min_level: LogLevel,
    mode: LoggingMode,
}

impl CallbackLogger {
    /// Create a new callback logger
    pub fn new(callback: Option<LogCallback>, min_level: LogLevel) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
            mode: LoggingMode::Interpreted,
        }
    }

    /// Create a new callback logger with specific mode
    pub fn with_mode(callback: Option<LogCallback>, min_level: LogLevel, mode: LoggingMode) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
            mode,
        }
    }

    /// Create a logger with timestamped console output
    pub fn console() -> Self {
        let callback: LogCallback = Box::new(|level, message| {
            let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
            match level {
                LogLevel::Error | LogLevel::Warn => eprintln!("[{}] {}: {}", timestamp, level.as_str(), message),
                LogLevel::Info | LogLevel::Debug => println!("[{}] {}: {}", timestamp, level.as_str(), message),
            }
        });
        Self::new(Some(callback), LogLevel::Info)
    }

    /// Create a logger that outputs nothing (disabled)
    pub fn disabled() -> Self {
        Self::new(None, LogLevel::Error)
    }

    pub fn is_enabled(&self) -> bool {
        self.callback.is_some()
    }

    /// Set logging mode
    pub fn set_mode(&mut self, mode: LoggingMode) {
        self.mode = mode;
    }

    /// Get current logging mode
    pub fn get_mode(&self) -> LoggingMode {
        self.mode
    }

    /// Log a message at the specified level
    pub fn log(&self, level: LogLevel, message: &str) {
        if self.should_log(level) {
            if let Some(ref callback) = self.callback {
                callback(level, message);
            }
        }
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn should_log(&self, level: LogLevel) -> bool {
        self.callback.is_some() && level as u8 <= self.min_level as u8
    }

    /// Log an accepted request
    pub fn log_request(&self, unit_id: u8, pdu: &[u8]) {
        self.log_traffic("Modbus Request ->", unit_id, pdu, interpret_request);
    }

    /// Log a response about to be sent
    pub fn log_response(&self, unit_id: u8, pdu: &[u8]) {
        self.log_traffic("Modbus Response <-", unit_id, pdu, interpret_response);
    }

    fn log_traffic(&self, prefix: &str, unit_id: u8, pdu: &[u8], interpret: fn(&[u8]) -> String) {
        if !self.should_log(LogLevel::Info) {
            return;
        }

        let raw = || {
            let mut packet = Vec::with_capacity(pdu.len() + 1);
            packet.push(unit_id);
            packet.extend_from_slice(pdu);
            format!("{} Raw: {}", prefix, crate::utils::format::bytes_to_hex(&packet))
        };
        let interpreted = || format!("{} Unit: {}, {}", prefix, unit_id, interpret(pdu));

        match self.mode {
            LoggingMode::Raw => self.info(&raw()),
            LoggingMode::Interpreted => self.info(&interpreted()),
            LoggingMode::Both => {
                self.info(&interpreted());
                self.debug(&raw());
            }
        }
    }
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

fn function_label(function_code: u8) -> String {
    match ModbusFunction::from_u8(function_code) {
        Ok(function) => function.to_string(),
        Err(_) => format!("Unknown Function (0x{:02X})", function_code),
    }
}

/// Describe a request PDU
fn interpret_request(pdu: &[u8]) -> String {
    let Some(&function_code) = pdu.first() else {
        return "Empty PDU".to_string();
    };

    match Command::decode(pdu) {
        Ok(command) => format!("Function: {}, {}", function_label(function_code), command),
        Err(exception) => format!(
            "Function: {}, Undecodable ({:?}), Data: {}",
            function_label(function_code),
            exception,
            hex::encode(&pdu[1..])
        ),
    }
}

/// Describe a response PDU
fn interpret_response(pdu: &[u8]) -> String {
    let Some((&function_code, data)) = pdu.split_first() else {
        return "Empty PDU".to_string();
    };

    if function_code & EXCEPTION_FLAG != 0 {
        let original = function_label(function_code & !EXCEPTION_FLAG);
        return match data.first().and_then(|&code| ModbusException::from_u8(code)) {
            Some(exception) => format!("Function: {}, {}", original, exception),
            None => format!("Function: {}, Exception data: {}", original, hex::encode(data)),
        };
    }

    format!("Function: {}, {}", function_label(function_code), interpret_response_data(function_code, data))
}

/// Interpret response data based on function code
fn interpret_response_data(function_code: u8, data: &[u8]) -> String {
    if data.is_empty() {
        return "No data".to_string();
    }

    match function_code {
        0x01 | 0x02 => {
            // Coils or discrete inputs
            let byte_count = data[0] as usize;
            let bits = data_utils::unpack_bits(&data[1..], byte_count.min(data.len() - 1) * 8);
            format!("Byte count: {}, Bits: {:?}", byte_count, &bits[..bits.len().min(16)])
        }
        0x03 | 0x04 => {
            // Holding registers or input registers
            let byte_count = data[0];
            let registers = data_utils::bytes_to_registers(&data[1..]);
            format!("Byte count: {}, Registers: {:?}", byte_count, &registers[..registers.len().min(8)])
        }
        0x05 if data.len() >= 4 => {
            let address = u16::from_be_bytes([data[0], data[1]]);
            let value = u16::from_be_bytes([data[2], data[3]]);
            format!("Address: {}, Value: 0x{:04X} ({})", address, value, if value == COIL_ON { "ON" } else { "OFF" })
        }
        0x06 if data.len() >= 4 => {
            let address = u16::from_be_bytes([data[0], data[1]]);
            let value = u16::from_be_bytes([data[2], data[3]]);
            format!("Address: {}, Value: {} (0x{:04X})", address, value, value)
        }
        0x07 => format!("Exception status: 0b{:08b}", data[0]),
        0x08 if data.len() >= 2 => {
            let sub_function = u16::from_be_bytes([data[0], data[1]]);
            let name = DiagnosticsCode::from_u16(sub_function)
                .map(|code| code.name())
                .unwrap_or("Reserved");
            format!("Sub-function: {} (0x{:04X}), Data: {}", name, sub_function, hex::encode(&data[2..]))
        }
        0x0F | 0x10 if data.len() >= 4 => {
            let address = u16::from_be_bytes([data[0], data[1]]);
            let quantity = u16::from_be_bytes([data[2], data[3]]);
            format!("Address: {}, Quantity: {}", address, quantity)
        }
        _ => format!("Data: {}", hex::encode(data)),
    }
}

/// Convenience macro for creating a simple console logger
#[macro_export]
macro_rules! console_logger {
    () => {
        $crate::logging::CallbackLogger::console()
    };
}

/// Convenience macro for creating a custom logger
#[macro_export]
macro_rules! custom_logger {
    ($callback:expr) => {
        $crate::logging::CallbackLogger::new(Some($callback), $crate::logging::LogLevel::Info)
    };
    ($callback:expr, $level:expr) => {
        $crate::logging::CallbackLogger::new(Some($callback), $level)
    };
    ($callback:expr, $level:expr, $mode:expr) => {
        $crate::logging::CallbackLogger::with_mode(Some($callback), $level, $mode)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn capturing_logger(level: LogLevel, mode: LoggingMode) -> (CallbackLogger, Arc<Mutex<Vec<(LogLevel, String)>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let callback: LogCallback = Box::new(move |level, message| {
            sink.lock().unwrap().push((level, message.to_string()));
        });
        (crate::custom_logger!(callback, level, mode), lines)
    }

    #[test]
    fn test_disabled_logger_is_silent() {
        let logger = CallbackLogger::default();
        assert!(!logger.is_enabled());
        logger.log_request(1, &[0x03, 0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn test_level_filtering() {
        let (logger, lines) = capturing_logger(LogLevel::Warn, LoggingMode::Interpreted);
        logger.error("e");
        logger.warn("w");
        logger.info("i");
        logger.debug("d");

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].0, LogLevel::Error);
        assert_eq!(lines[1].0, LogLevel::Warn);
    }

    #[test]
    fn test_interpreted_request() {
        let (logger, lines) = capturing_logger(LogLevel::Info, LoggingMode::Interpreted);
        logger.log_request(17, &[0x03, 0x00, 0x6B, 0x00, 0x03]);

        let lines = lines.lock().unwrap();
        assert_eq!(
            lines[0].1,
            "Modbus Request -> Unit: 17, Function: Read Holding Registers (0x03), Read Holding Registers addr=107 qty=3"
        );
    }

    #[test]
    fn test_raw_response() {
        let (logger, lines) = capturing_logger(LogLevel::Info, LoggingMode::Raw);
        logger.log_response(1, &[0x03, 0x04, 0x12, 0x34, 0x56, 0x78]);

        let lines = lines.lock().unwrap();
        assert_eq!(lines[0].1, "Modbus Response <- Raw: 01 03 04 12 34 56 78");
    }

    #[test]
    fn test_both_mode_logs_raw_at_debug() {
        let (logger, lines) = capturing_logger(LogLevel::Debug, LoggingMode::Both);
        logger.log_response(1, &[0x83, 0x02]);

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].0, LogLevel::Info);
        assert!(lines[0].1.contains("Modbus Exception 0x02"));
        assert_eq!(lines[1], (LogLevel::Debug, "Modbus Response <- Raw: 01 83 02".to_string()));
    }

    #[test]
    fn test_interpret_response_data() {
        assert_eq!(
            interpret_response_data(0x01, &[0x01, 0x55]),
            "Byte count: 1, Bits: [true, false, true, false, true, false, true, false]"
        );
        assert_eq!(interpret_response_data(0x05, &[0x00, 0x05, 0xFF, 0x00]), "Address: 5, Value: 0xFF00 (ON)");
        assert_eq!(interpret_response_data(0x07, &[0x05]), "Exception status: 0b00000101");
        assert_eq!(
            interpret_response_data(0x08, &[0x00, 0x0B, 0x00, 0x03]),
            "Sub-function: Return Bus Message Count (0x000B), Data: 0003"
        );
        assert_eq!(interpret_response_data(0x10, &[0x00, 0x01, 0x00, 0x02]), "Address: 1, Quantity: 2");
    }

    #[test]
    fn test_console_logger_macro() {
        let logger = crate::console_logger!();
        assert!(logger.is_enabled());
        assert_eq!(logger.get_mode(), LoggingMode::Interpreted);
    }
}
