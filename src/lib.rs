//! # Voltage Modbus Slave - Modbus RTU/ASCII/TCP Server Stack
//!
//! **Author:** Evan Liu <evan.liu@voltageenergy.com>
//! **Version:** 0.1.0
//! **License:** MIT
//!
//! A Modbus server (slave) implementation in pure Rust: frame codecs for the
//! three Modbus transports, the request/response command set, a bounded
//! in-memory data model with diagnostic counters, and async serve loops for
//! serial lines and TCP.
//!
//! ## Features
//!
//! - **🔧 Three Framings**: RTU (CRC16), ASCII (LRC) and TCP (MBAP)
//! - **🩺 Diagnostics**: Function code 0x08 with listen-only mode and bus counters
//! - **🛡️ Never Panics on Input**: every length and range is checked before use
//! - **🔄 Concurrent Clients**: one data model shared by any number of connections
//! - **📊 Built-in Monitoring**: traffic statistics and a callback traffic logger
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Server |
//! |------|----------|--------|
//! | 0x01 | Read Coils | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ |
//! | 0x03 | Read Holding Registers | ✅ |
//! | 0x04 | Read Input Registers | ✅ |
//! | 0x05 | Write Single Coil | ✅ |
//! | 0x06 | Write Single Register | ✅ |
//! | 0x07 | Read Exception Status | ✅ |
//! | 0x08 | Diagnostics | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ |
//!
//! ## Quick Start
//!
//! ### Byte-level Pipeline
//!
//! ```rust
//! use voltage_modbus_slave::{ModbusBaseServer, ServerConfig};
//! use voltage_modbus_slave::frame::FramingVariant;
//!
//! let server = ModbusBaseServer::new(ServerConfig::new(1, FramingVariant::Rtu)).unwrap();
//! server.data_model().lock().unwrap().write_holding_registers(0, &[0x1234, 0x5678]).unwrap();
//!
//! let response = server.handle_request(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]);
//! assert_eq!(response, Some(vec![0x01, 0x03, 0x04, 0x12, 0x34, 0x56, 0x78, 0x81, 0x07]));
//! ```
//!
//! ### TCP Server
//!
//! ```rust,no_run
//! use voltage_modbus_slave::{ModbusServer, ModbusTcpServer, ModbusTcpServerConfig, ServerConfig};
//! use voltage_modbus_slave::frame::FramingVariant;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ModbusTcpServerConfig {
//!         bind_address: "127.0.0.1:502".parse()?,
//!         max_connections: 50,
//!         request_timeout: Duration::from_secs(30),
//!     };
//!
//!     let mut server = ModbusTcpServer::with_config(config, ServerConfig::new(1, FramingVariant::Tcp))?;
//!     server.start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  ModbusTcpServer   /   ModbusRtuServer  │  serve loops, connections
//! └─────────────────────────────────────────┘
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │   Transport     │    │ ModbusBaseServer│  handle_request pipeline
//! │ (frame reader)  │───►│                 │
//! └─────────────────┘    └─────────────────┘
//!                          │             │
//!                 ┌─────────────┐ ┌─────────────┐
//!                 │ Frame       │ │ Command     │
//!                 │ (RTU/ASCII/ │ │ (decode /   │
//!                 │  TCP)       │ │  apply)     │
//!                 └─────────────┘ └─────────────┘
//!                                        │
//!                                 ┌─────────────┐
//!                                 │ DataModel   │
//!                                 └─────────────┘
//! ```

/// Core error types and result handling
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod error;

/// Modbus code tables and data packing helpers
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod protocol;

/// CRC16 and LRC checksums
pub mod checksum;

/// RTU, ASCII and TCP framing
pub mod frame;

/// Request decoding, execution and response encoding
pub mod command;

/// Register tables and diagnostics state
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod data_model;

/// Stream transports that delimit frames for the serve loops
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod transport;

/// Modbus server implementations
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod server;

/// Validation and formatting helpers
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod utils;

/// Traffic logging for servers
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod logging;

// Re-export main types for convenience
pub use error::{FrameError, ModbusError, ModbusResult};
pub use protocol::{DiagnosticsCode, ModbusException, ModbusFunction};
pub use frame::{Frame, FramingVariant};
pub use command::{Command, ResponsePayload};
pub use data_model::{DataModel, DataModelStats, RegisterTableBounds};
pub use transport::{AsciiTransport, FrameTransport, RtuTransport, TcpTransport, TransportStats};
pub use server::{
    ModbusBaseServer, ModbusRtuServer, ModbusServer, ModbusTcpServer, ModbusTcpServerConfig, ServerConfig,
    ServerStats,
};
pub use logging::{CallbackLogger, LogCallback, LogLevel, LoggingMode};

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Voltage Modbus Slave v{} - Modbus RTU/ASCII/TCP server stack by Evan Liu", VERSION)
}
