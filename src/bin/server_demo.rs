/// Voltage Modbus Slave Server Demo
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
/// Runs a Modbus server (TCP, RTU or ASCII) over a seeded data model until Ctrl+C.
///
/// Usage:
///   server_demo [config.json|config.yaml] [bind_address|serial_port] [baud_rate]

use std::sync::{Arc, Mutex};
use std::time::Duration;
use anyhow::{bail, Context};
use tokio::signal;
use tokio::time::interval;
use log::{info, error};

use voltage_modbus_slave::{
    AsciiTransport, DataModel, FramingVariant, ModbusBaseServer, ModbusRtuServer, ModbusServer,
    ModbusTcpServer, ModbusTcpServerConfig, RtuTransport, ServerConfig,
};
use voltage_modbus_slave::utils::format;

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5020";
const DEFAULT_BAUD_RATE: u32 = 9600;

/// Fill the first addresses of every table with recognisable values
fn seed_data_model(model: &Arc<Mutex<DataModel>>) -> anyhow::Result<()> {
    let mut model = model.lock().map_err(|_| anyhow::anyhow!("data model lock poisoned"))?;
    let bounds = model.bounds();

    for i in 0..50u16 {
        if (i as usize) < bounds.holding_registers {
            model.write_holding_register(i, 0x1000 + i)?;
        }
        if (i as usize) < bounds.coils {
            model.write_coil(i, i % 3 == 0)?;
        }
        if (i as usize) < bounds.input_registers {
            model.set_input_register(i, 0x2000 + i)?;
        }
        if (i as usize) < bounds.discrete_inputs {
            model.set_discrete_input(i, i % 2 == 0)?;
        }
    }
    model.set_exception_status(0b0000_0001);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();
    tracing::subscriber::set_global_default(tracing_subscriber::fmt().finish())
        .context("installing tracing subscriber")?;

    let args: Vec<String> = std::env::args().collect();
    let config = match args.get(1) {
        Some(path) => ServerConfig::from_file(path).with_context(|| format!("loading {}", path))?,
        None => ServerConfig::new(1, FramingVariant::Tcp),
    };

    println!("🚀 {}", voltage_modbus_slave::info());
    println!("=============================");
    println!("Unit address: {}", config.unit_address);
    println!("Framing:      {}", config.framing);
    println!();

    let base = Arc::new(ModbusBaseServer::new(config.clone())?);
    let data_model = base.data_model();

    info!("🔧 Initializing test data...");
    seed_data_model(&data_model)?;

    let mut server: Box<dyn ModbusServer> = match config.framing {
        FramingVariant::Tcp => {
            let bind = args.get(2).map(String::as_str).unwrap_or(DEFAULT_BIND_ADDRESS);
            let tcp_config = ModbusTcpServerConfig {
                bind_address: bind.parse().with_context(|| format!("invalid bind address {}", bind))?,
                max_connections: 50,
                request_timeout: Duration::from_secs(30),
            };
            Box::new(ModbusTcpServer::from_base(tcp_config, base.clone())?)
        }
        FramingVariant::Rtu | FramingVariant::Ascii => {
            let Some(port) = args.get(2) else {
                bail!("serial framing needs a port argument, e.g. /dev/ttyUSB0");
            };
            let baud_rate = match args.get(3) {
                Some(baud) => baud.parse().with_context(|| format!("invalid baud rate {}", baud))?,
                None => DEFAULT_BAUD_RATE,
            };

            if config.framing == FramingVariant::Rtu {
                Box::new(ModbusRtuServer::from_base(base.clone(), RtuTransport::open(port, baud_rate)?)?)
            } else {
                Box::new(ModbusRtuServer::from_base(base.clone(), AsciiTransport::open(port, baud_rate)?)?)
            }
        }
    };

    server.start().await?;
    info!("✅ Server started successfully!");

    // Simulated process values on addresses 50-59
    let simulation_model = data_model.clone();
    tokio::spawn(async move {
        let mut counter = 0u16;
        let mut interval = interval(Duration::from_secs(5));

        loop {
            interval.tick().await;

            if let Ok(mut model) = simulation_model.lock() {
                for i in 50..60u16 {
                    let _ = model.set_input_register(i, 0x3000u16.wrapping_add(counter).wrapping_add(i));
                    let _ = model.set_discrete_input(i, (counter + i) % 4 == 0);
                }
                if let Ok(values) = model.read_input_registers(50, 4) {
                    info!("🔄 Data simulation update: counter = {}, IR50.. = {}", counter, format::registers_to_hex(&values));
                }
            }
            counter = counter.wrapping_add(1);
        }
    });

    println!("\n📋 Server running...");
    println!("💡 Addresses 0-49 hold fixed test data, 50-59 change every 5 seconds");
    println!("   Press Ctrl+C to stop the server");
    println!();

    match signal::ctrl_c().await {
        Ok(()) => info!("🛑 Received interrupt signal, stopping server..."),
        Err(err) => error!("❌ Failed to listen for interrupt signal: {}", err),
    }

    server.stop().await?;

    let final_stats = server.get_stats();
    info!("📊 Final server statistics:");
    info!("   Total connections: {}", final_stats.connections_count);
    info!("   Total requests: {}", final_stats.total_requests);
    info!("   Responses sent: {}", final_stats.responses_sent);
    info!("   Exception responses: {}", final_stats.exception_responses);
    info!("   Dropped frames: {}", final_stats.dropped_frames);
    info!("   Bytes received: {} bytes", final_stats.bytes_received);
    info!("   Bytes sent: {} bytes", final_stats.bytes_sent);
    info!("   Uptime: {}", format::format_duration(Duration::from_secs(final_stats.uptime_seconds)));

    println!("\n✅ Server stopped safely");
    Ok(())
}
