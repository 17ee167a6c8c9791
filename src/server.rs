/// Modbus server implementations
///
/// This module provides the transport-agnostic request pipeline
/// ([`ModbusBaseServer`]) and the two servers built on it: a serial line
/// server for RTU/ASCII ([`ModbusRtuServer`]) and a multi-client TCP server
/// ([`ModbusTcpServer`]).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use log::{info, error, debug, warn};

use crate::command::{exception_response, Command, ListenOnlyTransition};
use crate::data_model::{DataModel, DataModelStats, DiagnosticCounter, RegisterTableBounds};
use crate::error::{ModbusError, ModbusResult};
use crate::frame::{Frame, FramingVariant, ASCII_DEFAULT_DELIMITER};
use crate::logging::CallbackLogger;
use crate::protocol::{ModbusException, SlaveId, BROADCAST_ADDRESS, EXCEPTION_FLAG};
use crate::transport::{FrameTransport, RtuTransport, TcpTransport};
use crate::utils::{format, validation};

/// Unit id a TCP gateway uses to address the device itself
const TCP_DIRECT_UNIT_ID: SlaveId = 0xFF;

/// Modbus server trait
#[async_trait]
pub trait ModbusServer: Send {
    /// Start the server
    async fn start(&mut self) -> ModbusResult<()>;

    /// Stop the server
    async fn stop(&mut self) -> ModbusResult<()>;

    /// Check if server is running
    fn is_running(&self) -> bool;

    /// Get server statistics
    fn get_stats(&self) -> ServerStats;

    /// Get the shared data model
    fn get_data_model(&self) -> Arc<Mutex<DataModel>>;
}

/// Server statistics
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub connections_count: u64,
    /// Raw frames handed to the pipeline
    pub total_requests: u64,
    pub responses_sent: u64,
    pub exception_responses: u64,
    /// Frames dropped for framing errors or a foreign unit address
    pub dropped_frames: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub uptime_seconds: u64,
    pub data_model_stats: Option<DataModelStats>,
}

#[derive(Debug, Default)]
struct TrafficCounters {
    connections: AtomicU64,
    requests: AtomicU64,
    responses: AtomicU64,
    exceptions: AtomicU64,
    dropped: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
}

impl TrafficCounters {
    fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }
}

/// Server configuration
///
/// # Examples
///
/// ```rust
/// use voltage_modbus_slave::ServerConfig;
/// use voltage_modbus_slave::frame::FramingVariant;
///
/// let config = ServerConfig::from_yaml_str("unit_address: 17\nframing: ascii\n").unwrap();
/// assert_eq!(config.unit_address, 17);
/// assert_eq!(config.framing, FramingVariant::Ascii);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unit address this server answers to
    pub unit_address: SlaveId,
    pub framing: FramingVariant,
    #[serde(default)]
    pub bounds: RegisterTableBounds,
}

impl ServerConfig {
    pub fn new(unit_address: SlaveId, framing: FramingVariant) -> Self {
        Self {
            unit_address,
            framing,
            bounds: RegisterTableBounds::default(),
        }
    }

    pub fn with_bounds(mut self, bounds: RegisterTableBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Check unit address and table bounds
    pub fn validate(&self) -> ModbusResult<()> {
        validation::validate_unit_address(self.unit_address, self.framing)?;
        self.bounds.validate()
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> ModbusResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a YAML configuration
    pub fn from_yaml_str(yaml: &str) -> ModbusResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file; `.yaml`/`.yml` is read as YAML, anything else as JSON
    pub fn from_file<P: AsRef<Path>>(path: P) -> ModbusResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ModbusError::configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&contents),
            _ => Self::from_json_str(&contents),
        }
    }
}

/// Transport-agnostic Modbus server
///
/// Turns raw request frames into raw response frames. Owns the shared data
/// model, the listen-only flag and the traffic statistics. The data model lock
/// is held only while a command is applied and the diagnostic counters are
/// updated; no I/O ever happens under it.
pub struct ModbusBaseServer {
    config: ServerConfig,
    data_model: Arc<Mutex<DataModel>>,
    listen_only: AtomicBool,
    counters: TrafficCounters,
    logger: CallbackLogger,
    start_time: Instant,
}

impl ModbusBaseServer {
    /// Create a server with a fresh, zeroed data model
    ///
    /// Fails with a configuration error for an invalid unit address or table bounds.
    pub fn new(config: ServerConfig) -> ModbusResult<Self> {
        config.validate()?;
        let data_model = DataModel::new(config.bounds)?;
        Self::with_data_model(config, Arc::new(Mutex::new(data_model)))
    }

    /// Create a server sharing an existing data model
    pub fn with_data_model(config: ServerConfig, data_model: Arc<Mutex<DataModel>>) -> ModbusResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            data_model,
            listen_only: AtomicBool::new(false),
            counters: TrafficCounters::default(),
            logger: CallbackLogger::disabled(),
            start_time: Instant::now(),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn data_model(&self) -> Arc<Mutex<DataModel>> {
        self.data_model.clone()
    }

    /// Install a traffic logger
    pub fn set_logger(&mut self, logger: CallbackLogger) {
        self.logger = logger;
    }

    pub fn is_listen_only(&self) -> bool {
        self.listen_only.load(Ordering::SeqCst)
    }

    fn lock_model(&self) -> Result<MutexGuard<'_, DataModel>, ModbusException> {
        self.data_model.lock().map_err(|_| {
            error!("❌ Data model lock poisoned");
            ModbusException::SlaveDeviceFailure
        })
    }

    /// Current ASCII input delimiter
    pub fn ascii_delimiter(&self) -> u8 {
        self.lock_model()
            .map(|model| model.ascii_delimiter())
            .unwrap_or(ASCII_DEFAULT_DELIMITER)
    }

    /// Count a frame that could not be delimited or decoded
    pub fn record_frame_error(&self) {
        TrafficCounters::add(&self.counters.dropped, 1);
        if let Ok(mut model) = self.lock_model() {
            model.increment_counter(DiagnosticCounter::BusCommunicationError);
        }
    }

    fn record_connection(&self) {
        TrafficCounters::add(&self.counters.connections, 1);
    }

    fn is_addressed(&self, unit_id: SlaveId) -> bool {
        if unit_id == self.config.unit_address || unit_id == BROADCAST_ADDRESS {
            return true;
        }
        self.config.framing == FramingVariant::Tcp && unit_id == TCP_DIRECT_UNIT_ID
    }

    /// Process one raw request frame
    ///
    /// Returns the raw response frame, or `None` when nothing must be sent:
    /// framing errors, foreign unit addresses, serial broadcasts, listen-only
    /// mode and Force Listen Only Mode itself.
    pub fn handle_request(&self, raw: &[u8]) -> Option<Vec<u8>> {
        TrafficCounters::add(&self.counters.requests, 1);
        TrafficCounters::add(&self.counters.bytes_received, raw.len() as u64);

        let delimiter = match self.config.framing {
            FramingVariant::Ascii => self.ascii_delimiter(),
            _ => ASCII_DEFAULT_DELIMITER,
        };

        let frame = match Frame::decode_with_delimiter(self.config.framing, raw, delimiter) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Dropping {} frame: {}", self.config.framing, e);
                self.record_frame_error();
                return None;
            }
        };

        let unit_id = frame.unit_id();
        let pdu = frame.pdu();
        let broadcast = self.config.framing.is_serial() && unit_id == BROADCAST_ADDRESS;
        let was_listen_only = self.is_listen_only();

        // Address filter and message counters
        {
            let mut model = match self.lock_model() {
                Ok(model) => model,
                Err(exception) => {
                    if !self.is_addressed(unit_id) {
                        return None;
                    }
                    return self.device_failure(&frame, exception, broadcast || was_listen_only);
                }
            };

            model.increment_counter(DiagnosticCounter::BusMessage);
            if !self.is_addressed(unit_id) {
                drop(model);
                debug!("Ignoring request for unit {} (this is unit {})", unit_id, self.config.unit_address);
                TrafficCounters::add(&self.counters.dropped, 1);
                return None;
            }
            model.increment_counter(DiagnosticCounter::SlaveMessage);
        }

        // Logger callbacks may lock the data model themselves
        self.logger.log_request(unit_id, pdu);
        let command = Command::decode(pdu);
        if let Ok(command) = &command {
            debug!("Unit {} <- {}", unit_id, command);
        }

        let mut model = match self.lock_model() {
            Ok(model) => model,
            Err(exception) => return self.device_failure(&frame, exception, broadcast || was_listen_only),
        };

        let (response, transition) = match &command {
            Ok(command) => {
                let result = command.apply(&mut model);
                let transition = match result {
                    Ok(_) => command.listen_only_transition(),
                    Err(_) => None,
                };
                (command.encode_response(&result), transition)
            }
            Err(exception) => (exception_response(pdu[0], *exception), None),
        };

        if response[0] & EXCEPTION_FLAG != 0 {
            model.increment_counter(DiagnosticCounter::BusExceptionError);
            TrafficCounters::add(&self.counters.exceptions, 1);
        }

        let leaving = transition == Some(ListenOnlyTransition::Leave) && was_listen_only;
        match transition {
            Some(ListenOnlyTransition::Enter) => self.listen_only.store(true, Ordering::SeqCst),
            Some(ListenOnlyTransition::Leave) if leaving => self.listen_only.store(false, Ordering::SeqCst),
            _ => {}
        }

        let silenced = was_listen_only && transition != Some(ListenOnlyTransition::Leave);
        let suppressed = broadcast || silenced || transition == Some(ListenOnlyTransition::Enter);
        if suppressed {
            model.increment_counter(DiagnosticCounter::SlaveNoResponse);
        }
        drop(model);

        if transition == Some(ListenOnlyTransition::Enter) {
            info!("🔇 Unit {} entering listen-only mode", self.config.unit_address);
        } else if leaving {
            info!("🔊 Unit {} leaving listen-only mode", self.config.unit_address);
        }

        if suppressed {
            return None;
        }
        Some(self.send(&frame, response))
    }

    /// SLAVE_DEVICE_FAILURE reply for a poisoned data model, unless the request must stay unanswered
    fn device_failure(&self, request: &Frame, exception: ModbusException, silent: bool) -> Option<Vec<u8>> {
        if silent {
            return None;
        }
        Some(self.send(request, exception_response(request.pdu()[0], exception)))
    }

    fn send(&self, request: &Frame, pdu: Vec<u8>) -> Vec<u8> {
        self.logger.log_response(request.unit_id(), &pdu);
        let reply = request.reply(pdu).encode();
        TrafficCounters::add(&self.counters.responses, 1);
        TrafficCounters::add(&self.counters.bytes_sent, reply.len() as u64);
        reply
    }

    /// Serve requests from `transport` until it fails or closes
    pub async fn serve<T>(&self, transport: &mut T) -> ModbusResult<()>
    where
        T: FrameTransport + ?Sized,
    {
        self.serve_connection(transport, None).await
    }

    /// Serve requests, ending the connection after `idle_timeout` without a frame
    pub async fn serve_connection<T>(&self, transport: &mut T, idle_timeout: Option<Duration>) -> ModbusResult<()>
    where
        T: FrameTransport + ?Sized,
    {
        if transport.variant() != self.config.framing {
            return Err(ModbusError::configuration(format!(
                "{} transport cannot serve a {} server", transport.variant(), self.config.framing
            )));
        }
        transport.set_ascii_delimiter(self.ascii_delimiter());

        loop {
            let read = match idle_timeout {
                Some(limit) => match timeout(limit, transport.read_frame()).await {
                    Ok(read) => read,
                    Err(_) => {
                        return Err(ModbusError::timeout("Waiting for request", limit.as_millis() as u64));
                    }
                },
                None => transport.read_frame().await,
            };

            let raw = match read {
                Ok(raw) => raw,
                Err(ModbusError::Frame(e)) => {
                    warn!("⚠️ Discarding undelimited frame: {}", e);
                    self.record_frame_error();
                    continue;
                }
                Err(ModbusError::Timeout { operation, .. }) => {
                    debug!("Discarding partial frame: {}", operation);
                    self.record_frame_error();
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(reply) = self.handle_request(&raw) {
                transport.write_frame(&reply).await?;
            }

            if self.config.framing == FramingVariant::Ascii {
                transport.set_ascii_delimiter(self.ascii_delimiter());
            }
        }
    }

    /// Get server statistics
    pub fn get_stats(&self) -> ServerStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        ServerStats {
            connections_count: load(&self.counters.connections),
            total_requests: load(&self.counters.requests),
            responses_sent: load(&self.counters.responses),
            exception_responses: load(&self.counters.exceptions),
            dropped_frames: load(&self.counters.dropped),
            bytes_received: load(&self.counters.bytes_received),
            bytes_sent: load(&self.counters.bytes_sent),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            data_model_stats: self.lock_model().ok().map(|model| model.get_stats()),
        }
    }
}

/// Modbus serial line server (RTU or ASCII)
///
/// Owns one serial transport. [`ModbusRtuServer::run`] serves in the current
/// task; [`ModbusServer::start`] moves the transport onto a spawned task, after
/// which the server can be stopped but not started again.
pub struct ModbusRtuServer {
    server: Arc<ModbusBaseServer>,
    transport: Option<Box<dyn FrameTransport>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    task: Option<JoinHandle<()>>,
    is_running: Arc<AtomicBool>,
}

impl ModbusRtuServer {
    /// Open a serial port and create an RTU server for `unit_address`
    pub fn open(port: &str, baud_rate: u32, unit_address: SlaveId, bounds: RegisterTableBounds) -> ModbusResult<Self> {
        let config = ServerConfig::new(unit_address, FramingVariant::Rtu).with_bounds(bounds);
        let server = ModbusBaseServer::new(config)?;
        let transport = RtuTransport::open(port, baud_rate)?;
        info!("🔌 Opened {} at {} baud for unit {}", port, baud_rate, unit_address);
        Self::with_transport(server, transport)
    }

    /// Create a server over an already opened transport
    pub fn with_transport<T>(server: ModbusBaseServer, transport: T) -> ModbusResult<Self>
    where
        T: FrameTransport + 'static,
    {
        Self::from_base(Arc::new(server), transport)
    }

    /// Share a base server (and its data model) with another server
    pub fn from_base<T>(server: Arc<ModbusBaseServer>, transport: T) -> ModbusResult<Self>
    where
        T: FrameTransport + 'static,
    {
        if !server.config().framing.is_serial() {
            return Err(ModbusError::configuration("Serial server requires RTU or ASCII framing"));
        }

        Ok(Self {
            server,
            transport: Some(Box::new(transport)),
            shutdown_tx: None,
            task: None,
            is_running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn base(&self) -> &Arc<ModbusBaseServer> {
        &self.server
    }

    /// Serve in the current task until the transport fails
    pub async fn run(&mut self) -> ModbusResult<()> {
        let transport = self.transport.as_mut()
            .ok_or_else(|| ModbusError::internal("Serial transport already handed to a running task"))?;

        self.is_running.store(true, Ordering::SeqCst);
        let result = self.server.serve(transport.as_mut()).await;
        self.is_running.store(false, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl ModbusServer for ModbusRtuServer {
    async fn start(&mut self) -> ModbusResult<()> {
        if self.is_running() {
            return Err(ModbusError::internal("Server is already running"));
        }
        let mut transport = self.transport.take()
            .ok_or_else(|| ModbusError::internal("Serial transport already consumed"))?;

        info!("🚀 Starting Modbus {} server for unit {}", self.server.config().framing, self.server.config().unit_address);

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        let server = self.server.clone();
        let is_running = self.is_running.clone();
        is_running.store(true, Ordering::SeqCst);

        self.task = Some(tokio::spawn(async move {
            tokio::select! {
                result = server.serve(transport.as_mut()) => {
                    if let Err(e) = result {
                        error!("Serial server stopped: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("Shutdown signal received for serial server");
                }
            }
            is_running.store(false, Ordering::SeqCst);
        }));

        Ok(())
    }

    async fn stop(&mut self) -> ModbusResult<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.await.map_err(|e| ModbusError::internal(format!("Serial server task failed: {}", e)))?;
        }
        self.is_running.store(false, Ordering::SeqCst);

        info!("⏹️  Modbus serial server stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    fn get_stats(&self) -> ServerStats {
        self.server.get_stats()
    }

    fn get_data_model(&self) -> Arc<Mutex<DataModel>> {
        self.server.data_model()
    }
}

/// Modbus TCP server configuration
#[derive(Debug, Clone)]
pub struct ModbusTcpServerConfig {
    pub bind_address: SocketAddr,
    pub max_connections: usize,
    /// Idle time after which a client connection is closed
    pub request_timeout: Duration,
}

impl Default for ModbusTcpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], crate::DEFAULT_TCP_PORT)),
            max_connections: 100,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Modbus TCP server implementation
pub struct ModbusTcpServer {
    config: ModbusTcpServerConfig,
    server: Arc<ModbusBaseServer>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    is_running: Arc<AtomicBool>,
    active_connections: Arc<AtomicUsize>,
    local_addr: Option<SocketAddr>,
}

impl ModbusTcpServer {
    /// Create a new TCP server for `unit_address` with default table bounds
    pub fn new(bind_address: &str, unit_address: SlaveId) -> ModbusResult<Self> {
        let bind_address = bind_address.parse()
            .map_err(|e| ModbusError::configuration(format!("Invalid bind address: {}", e)))?;

        let config = ModbusTcpServerConfig {
            bind_address,
            ..Default::default()
        };

        Self::with_config(config, ServerConfig::new(unit_address, FramingVariant::Tcp))
    }

    /// Create a new TCP server with custom configuration
    pub fn with_config(config: ModbusTcpServerConfig, server_config: ServerConfig) -> ModbusResult<Self> {
        Self::from_base(config, Arc::new(ModbusBaseServer::new(server_config)?))
    }

    /// Share a base server (and its data model) with another server
    pub fn from_base(config: ModbusTcpServerConfig, server: Arc<ModbusBaseServer>) -> ModbusResult<Self> {
        if server.config().framing != FramingVariant::Tcp {
            return Err(ModbusError::configuration("TCP server requires TCP framing"));
        }
        if config.max_connections == 0 {
            return Err(ModbusError::configuration("max_connections must be at least 1"));
        }

        Ok(Self {
            config,
            server,
            shutdown_tx: None,
            is_running: Arc::new(AtomicBool::new(false)),
            active_connections: Arc::new(AtomicUsize::new(0)),
            local_addr: None,
        })
    }

    pub fn base(&self) -> &Arc<ModbusBaseServer> {
        &self.server
    }

    /// Address actually bound, available once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Handle client connection
    async fn handle_client(
        stream: TcpStream,
        server: Arc<ModbusBaseServer>,
        mut shutdown_rx: broadcast::Receiver<()>,
        request_timeout: Duration,
    ) {
        let peer_addr = stream.peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        info!("📡 New client connected: {}", peer_addr);

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
        }
        let mut transport = TcpTransport::new(stream);

        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Shutdown signal received for client {}", peer_addr);
            }
            result = server.serve_connection(&mut transport, Some(request_timeout)) => {
                match result {
                    Err(ModbusError::Timeout { .. }) => warn!("Idle timeout from {}", peer_addr),
                    Err(ModbusError::Connection { message }) => debug!("Client {}: {}", peer_addr, message),
                    Err(e) => error!("Error serving {}: {}", peer_addr, e),
                    Ok(()) => {}
                }
            }
        }

        info!("🔌 Client {} disconnected", peer_addr);
    }
}

#[async_trait]
impl ModbusServer for ModbusTcpServer {
    async fn start(&mut self) -> ModbusResult<()> {
        if self.is_running() {
            return Err(ModbusError::internal("Server is already running"));
        }

        info!("🚀 Starting Modbus TCP server on {}", self.config.bind_address);

        let listener = TcpListener::bind(self.config.bind_address).await
            .map_err(|e| ModbusError::connection(format!("Failed to bind to {}: {}", self.config.bind_address, e)))?;
        self.local_addr = Some(listener.local_addr()?);

        let (shutdown_tx, _) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());
        self.is_running.store(true, Ordering::SeqCst);

        info!("✅ Modbus TCP server started successfully");
        info!("📊 Server configuration:");
        info!("   - Bind address: {}", self.config.bind_address);
        info!("   - Unit address: {}", self.server.config().unit_address);
        info!("   - Max connections: {}", self.config.max_connections);
        info!("   - Request timeout: {}", format::format_duration(self.config.request_timeout));

        let server = self.server.clone();
        let request_timeout = self.config.request_timeout;
        let max_connections = self.config.max_connections;
        let active_connections = self.active_connections.clone();
        let is_running = self.is_running.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                if active_connections.load(Ordering::SeqCst) >= max_connections {
                                    warn!("Rejecting {}: {} connections already open", addr, max_connections);
                                    drop(stream);
                                    continue;
                                }
                                debug!("Accepted connection from {}", addr);

                                server.record_connection();
                                active_connections.fetch_add(1, Ordering::SeqCst);

                                let server = server.clone();
                                let active_connections = active_connections.clone();
                                let shutdown_rx = shutdown_tx.subscribe();

                                tokio::spawn(async move {
                                    Self::handle_client(stream, server, shutdown_rx, request_timeout).await;
                                    active_connections.fetch_sub(1, Ordering::SeqCst);
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Shutdown signal received, stopping server");
                        break;
                    }
                }
            }

            is_running.store(false, Ordering::SeqCst);
        });

        Ok(())
    }

    async fn stop(&mut self) -> ModbusResult<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        self.is_running.store(false, Ordering::SeqCst);

        info!("⏹️  Modbus TCP server stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    fn get_stats(&self) -> ServerStats {
        self.server.get_stats()
    }

    fn get_data_model(&self) -> Arc<Mutex<DataModel>> {
        self.server.data_model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{AsciiFrame, RtuFrame, TcpFrame};

    fn rtu_server(unit: SlaveId) -> ModbusBaseServer {
        let config = ServerConfig::new(unit, FramingVariant::Rtu).with_bounds(RegisterTableBounds::uniform(100));
        ModbusBaseServer::new(config).unwrap()
    }

    fn counter(server: &ModbusBaseServer, counter: DiagnosticCounter) -> u64 {
        server.data_model().lock().unwrap().counters().get(counter)
    }

    #[test]
    fn test_config_validation() {
        assert!(ServerConfig::new(1, FramingVariant::Rtu).validate().is_ok());
        assert!(ServerConfig::new(247, FramingVariant::Ascii).validate().is_ok());
        assert!(ServerConfig::new(0, FramingVariant::Tcp).validate().is_ok());

        assert!(ServerConfig::new(0, FramingVariant::Rtu).validate().unwrap_err().is_fatal());
        assert!(ServerConfig::new(248, FramingVariant::Tcp).validate().is_err());

        let too_big = ServerConfig::new(1, FramingVariant::Rtu).with_bounds(RegisterTableBounds::uniform(70_000));
        assert!(ModbusBaseServer::new(too_big).is_err());
    }

    #[test]
    fn test_config_parsing() {
        let config = ServerConfig::from_json_str(
            r#"{"unit_address": 3, "framing": "rtu", "bounds": {"coils": 16, "holding_registers": 32}}"#,
        ).unwrap();
        assert_eq!(config.unit_address, 3);
        assert_eq!(config.bounds.coils, 16);
        assert_eq!(config.bounds.holding_registers, 32);
        assert_eq!(config.bounds.input_registers, RegisterTableBounds::default().input_registers);

        assert!(matches!(
            ServerConfig::from_json_str(r#"{"unit_address": 3, "framing": "udp"}"#),
            Err(ModbusError::Configuration { .. })
        ));
        assert!(matches!(
            ServerConfig::from_yaml_str("unit_address: 250\nframing: rtu\n"),
            Err(ModbusError::Configuration { .. })
        ));
    }

    #[test]
    fn test_handle_read_request() {
        let server = rtu_server(1);
        server.data_model().lock().unwrap().write_holding_registers(0, &[0x1234, 0x5678]).unwrap();

        let response = server.handle_request(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]);
        assert_eq!(response, Some(vec![0x01, 0x03, 0x04, 0x12, 0x34, 0x56, 0x78, 0x81, 0x07]));

        let stats = server.get_stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.responses_sent, 1);
        assert_eq!(stats.bytes_sent, 9);
    }

    #[test]
    fn test_corrupted_frame_counted() {
        let server = rtu_server(1);
        assert_eq!(server.handle_request(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0C]), None);
        assert_eq!(server.handle_request(&[0x01, 0x03]), None);

        assert_eq!(counter(&server, DiagnosticCounter::BusCommunicationError), 2);
        assert_eq!(counter(&server, DiagnosticCounter::BusMessage), 0);
        assert_eq!(server.get_stats().dropped_frames, 2);
    }

    #[test]
    fn test_foreign_unit_ignored() {
        let server = rtu_server(3);
        let request = RtuFrame::wrap(7, &[0x03, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(server.handle_request(&request), None);
        assert_eq!(counter(&server, DiagnosticCounter::BusMessage), 1);
        assert_eq!(counter(&server, DiagnosticCounter::SlaveMessage), 0);
    }

    #[test]
    fn test_broadcast_applied_silently() {
        let server = rtu_server(3);
        let request = RtuFrame::wrap(0, &[0x06, 0x00, 0x02, 0x12, 0x34]);
        assert_eq!(server.handle_request(&request), None);

        assert_eq!(server.data_model().lock().unwrap().read_holding_registers(2, 1).unwrap(), vec![0x1234]);
        assert_eq!(counter(&server, DiagnosticCounter::SlaveMessage), 1);
        assert_eq!(counter(&server, DiagnosticCounter::SlaveNoResponse), 1);
    }

    #[test]
    fn test_exception_response_counted() {
        let server = rtu_server(1);
        let response = server.handle_request(&RtuFrame::wrap(1, &[0x03, 0x00, 0x64, 0x00, 0x01])).unwrap();
        assert_eq!(RtuFrame::unwrap(&response).unwrap(), (1, vec![0x83, 0x02]));

        let response = server.handle_request(&RtuFrame::wrap(1, &[0x2B, 0x0E])).unwrap();
        assert_eq!(RtuFrame::unwrap(&response).unwrap(), (1, vec![0xAB, 0x01]));

        assert_eq!(counter(&server, DiagnosticCounter::BusExceptionError), 2);
        assert_eq!(server.get_stats().exception_responses, 2);
    }

    #[test]
    fn test_listen_only_cycle() {
        let server = rtu_server(1);

        let force = RtuFrame::wrap(1, &[0x08, 0x00, 0x04, 0x00, 0x00]);
        assert_eq!(server.handle_request(&force), None);
        assert!(server.is_listen_only());

        // Requests are still applied but never answered
        let write = RtuFrame::wrap(1, &[0x06, 0x00, 0x01, 0x00, 0x2A]);
        assert_eq!(server.handle_request(&write), None);
        assert_eq!(server.data_model().lock().unwrap().read_holding_registers(1, 1).unwrap(), vec![0x2A]);

        let restart = RtuFrame::wrap(1, &[0x08, 0x00, 0x01, 0x00, 0x00]);
        let response = server.handle_request(&restart).unwrap();
        assert_eq!(RtuFrame::unwrap(&response).unwrap(), (1, vec![0x08, 0x00, 0x01, 0x00, 0x00]));
        assert!(!server.is_listen_only());

        assert_eq!(counter(&server, DiagnosticCounter::SlaveNoResponse), 2);
    }

    #[test]
    fn test_slave_message_count_includes_query() {
        let server = rtu_server(1);
        server.handle_request(&RtuFrame::wrap(1, &[0x03, 0x00, 0x00, 0x00, 0x01]));

        let response = server.handle_request(&RtuFrame::wrap(1, &[0x08, 0x00, 0x0E, 0x00, 0x00])).unwrap();
        assert_eq!(RtuFrame::unwrap(&response).unwrap().1, vec![0x08, 0x00, 0x0E, 0x00, 0x02]);
    }

    #[test]
    fn test_ascii_delimiter_change() {
        let config = ServerConfig::new(1, FramingVariant::Ascii).with_bounds(RegisterTableBounds::uniform(10));
        let server = ModbusBaseServer::new(config).unwrap();

        let change = AsciiFrame::wrap(1, &[0x08, 0x00, 0x03, b'!', 0x00]);
        assert!(server.handle_request(&change).is_some());
        assert_eq!(server.ascii_delimiter(), b'!');

        // LF-terminated frames no longer parse
        let read = AsciiFrame::wrap(1, &[0x03, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(server.handle_request(&read), None);

        let mut custom = read.clone();
        let last = custom.len() - 1;
        custom[last] = b'!';
        assert!(server.handle_request(&custom).is_some());
    }

    #[test]
    fn test_tcp_unit_filtering() {
        let config = ServerConfig::new(5, FramingVariant::Tcp).with_bounds(RegisterTableBounds::uniform(10));
        let server = ModbusBaseServer::new(config).unwrap();
        let pdu = [0x03, 0x00, 0x00, 0x00, 0x01];

        for unit in [5u8, 0, 0xFF] {
            let response = server.handle_request(&TcpFrame::wrap(9, unit, &pdu)).unwrap();
            assert_eq!(response, vec![0x00, 0x09, 0x00, 0x00, 0x00, 0x05, unit, 0x03, 0x02, 0x00, 0x00]);
        }
        assert_eq!(server.handle_request(&TcpFrame::wrap(9, 6, &pdu)), None);
    }

    #[test]
    fn test_poisoned_model_reports_device_failure() {
        let server = Arc::new(rtu_server(1));
        let model = server.data_model();
        let _ = std::thread::spawn(move || {
            let _guard = model.lock().unwrap();
            panic!("poison the lock");
        }).join();

        let response = server.handle_request(&RtuFrame::wrap(1, &[0x03, 0x00, 0x00, 0x00, 0x01])).unwrap();
        assert_eq!(RtuFrame::unwrap(&response).unwrap(), (1, vec![0x83, 0x04]));
        assert!(server.get_stats().data_model_stats.is_none());
    }

    #[test]
    fn test_logger_runs_without_model_lock() {
        let model = Arc::new(Mutex::new(DataModel::new(RegisterTableBounds::uniform(16)).unwrap()));
        let mut server = ModbusBaseServer::with_data_model(ServerConfig::new(1, FramingVariant::Rtu), model.clone()).unwrap();

        let lock_states = Arc::new(Mutex::new(Vec::new()));
        let states = lock_states.clone();
        let callback: crate::logging::LogCallback = Box::new(move |_, message| {
            if message.starts_with("Modbus Re") {
                states.lock().unwrap().push(model.try_lock().is_ok());
            }
        });
        server.set_logger(CallbackLogger::new(Some(callback), crate::logging::LogLevel::Info));

        assert!(server.handle_request(&RtuFrame::wrap(1, &[0x03, 0x00, 0x00, 0x00, 0x01])).is_some());
        assert!(server.handle_request(&RtuFrame::wrap(1, &[0x03, 0x00, 0x20, 0x00, 0x01])).is_some());

        let states = lock_states.lock().unwrap();
        assert_eq!(states.len(), 4);
        assert!(states.iter().all(|unlocked| *unlocked));
    }

    #[test]
    fn test_server_framing_mismatch() {
        let config = ServerConfig::new(1, FramingVariant::Rtu);
        let base = ModbusBaseServer::new(config).unwrap();
        assert!(ModbusTcpServer::from_base(ModbusTcpServerConfig::default(), Arc::new(base)).is_err());
    }
}
