//! # Modbus Transport Layer
//!
//! This module splits a byte stream into raw Modbus frames and writes raw
//! replies back. It knows how each framing variant is delimited on the wire
//! but does not validate checksums or interpret PDUs; that is the job of
//! [`crate::frame`] and the server pipeline.
//!
//! ## Supported Transports
//!
//! ### Modbus RTU (`RtuTransport`)
//! - Serial port communication (RS-232, RS-485)
//! - Frames delimited by 3.5 character times of line silence
//! - Silence interval computed from the baud rate, fixed at 1.75 ms above 19200 baud
//!
//! ### Modbus ASCII (`AsciiTransport`)
//! - Frames start at ':' and end at CR followed by the input delimiter
//! - Input delimiter defaults to LF and follows Diagnostics 0x03
//! - Inter-character timeout aborts half-received frames
//!
//! ### Modbus TCP (`TcpTransport`)
//! - Frames delimited by the MBAP length field
//! - Pipelined requests on one connection are read one at a time
//!
//! Every transport is generic over `AsyncRead + AsyncWrite`, so the same code
//! drives a serial port, a TCP socket or an in-memory `tokio::io::duplex` pipe.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use voltage_modbus_slave::transport::{FrameTransport, RtuTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut transport = RtuTransport::open("/dev/ttyUSB0", 9600)?;
//!
//!     let request = transport.read_frame().await?;
//!     println!("received {} bytes", request.len());
//!
//!     let stats = transport.get_stats();
//!     println!("Frames received: {}", stats.frames_received);
//!     Ok(())
//! }
//! ```

use std::time::Duration;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::SerialStream;
use tracing::info;

use crate::error::{FrameError, ModbusError, ModbusResult};
use crate::frame::{
    FramingVariant, MbapHeader, ASCII_CR, ASCII_DEFAULT_DELIMITER, ASCII_START, MAX_ASCII_FRAME_SIZE,
    MAX_RTU_FRAME_SIZE, MAX_TCP_FRAME_SIZE,
};
use crate::utils::{format, validation};

/// Baud rate above which the RTU silence interval is fixed
const FIXED_GAP_BAUD_THRESHOLD: u32 = 19200;

/// Fixed RTU silence interval for high baud rates
const FIXED_FRAME_GAP: Duration = Duration::from_micros(1750);

/// Default ASCII inter-character timeout
const DEFAULT_INTER_CHAR_TIMEOUT: Duration = Duration::from_secs(1);

/// Log packet with direction and format
fn log_packet(direction: &str, data: &[u8], variant: FramingVariant) {
    info!("[MODBUS-{}] {} {}", variant.tag(), direction, format::bytes_to_hex(data));
}

/// Open a serial port with explicit line settings
pub fn open_serial(
    port: &str,
    baud_rate: u32,
    data_bits: tokio_serial::DataBits,
    stop_bits: tokio_serial::StopBits,
    parity: tokio_serial::Parity,
) -> ModbusResult<SerialStream> {
    validation::validate_baud_rate(baud_rate)?;

    let builder = tokio_serial::new(port, baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity);

    SerialStream::open(&builder)
        .map_err(|e| ModbusError::connection(format!("Failed to open serial port {}: {}", port, e)))
}

/// RTU inter-frame silence for `baud_rate`
///
/// 3.5 character times of 11 bits each, or a fixed 1.75 ms above 19200 baud.
pub fn rtu_frame_gap(baud_rate: u32) -> Duration {
    if baud_rate > FIXED_GAP_BAUD_THRESHOLD {
        return FIXED_FRAME_GAP;
    }
    let char_time_us = 11_000_000 / baud_rate.max(1) as u64;
    Duration::from_micros(char_time_us * 35 / 10)
}

/// Server-side frame transport
///
/// A transport hands complete raw frames to the server and writes raw replies.
/// Implementations must be `Send` so serve loops can run on spawned tasks.
///
/// ## Error Handling
///
/// - End of stream is reported as `ModbusError::Connection`
/// - A frame that cannot be delimited (oversized, interrupted) is reported as
///   `ModbusError::Frame` or `ModbusError::Timeout`; the stream stays usable
/// - Other read and write failures are reported as `ModbusError::Io`
#[async_trait]
pub trait FrameTransport: Send {
    /// Wait for the next complete frame
    async fn read_frame(&mut self) -> ModbusResult<Vec<u8>>;

    /// Write one complete frame
    async fn write_frame(&mut self, frame: &[u8]) -> ModbusResult<()>;

    /// Framing variant this transport delimits
    fn variant(&self) -> FramingVariant;

    /// Change the ASCII end-of-frame delimiter; other framings ignore it
    fn set_ascii_delimiter(&mut self, _delimiter: u8) {}

    /// Get transport statistics
    fn get_stats(&self) -> TransportStats;
}

/// Transport layer statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub frames_received: u64,
    pub frames_sent: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Shared write path: write, flush, count, log
async fn write_all_counted<S>(
    stream: &mut S,
    frame: &[u8],
    stats: &mut TransportStats,
    packet_logging: bool,
    variant: FramingVariant,
) -> ModbusResult<()>
where
    S: AsyncWrite + Unpin + Send,
{
    if packet_logging {
        log_packet("send", frame, variant);
    }

    if let Err(e) = stream.write_all(frame).await {
        stats.errors += 1;
        return Err(e.into());
    }
    if let Err(e) = stream.flush().await {
        stats.errors += 1;
        return Err(e.into());
    }

    stats.frames_sent += 1;
    stats.bytes_sent += frame.len() as u64;
    Ok(())
}

/// Modbus RTU transport
pub struct RtuTransport<S> {
    stream: S,
    /// Line silence that ends a frame
    frame_gap: Duration,
    stats: TransportStats,
    /// Enable packet logging for debugging
    packet_logging: bool,
}

impl RtuTransport<SerialStream> {
    /// Open a serial port with 8 data bits, no parity, 1 stop bit
    pub fn open(port: &str, baud_rate: u32) -> ModbusResult<Self> {
        Self::open_with_config(
            port,
            baud_rate,
            tokio_serial::DataBits::Eight,
            tokio_serial::StopBits::One,
            tokio_serial::Parity::None,
        )
    }

    /// Open a serial port with full line configuration
    pub fn open_with_config(
        port: &str,
        baud_rate: u32,
        data_bits: tokio_serial::DataBits,
        stop_bits: tokio_serial::StopBits,
        parity: tokio_serial::Parity,
    ) -> ModbusResult<Self> {
        let stream = open_serial(port, baud_rate, data_bits, stop_bits, parity)?;
        Ok(Self::new(stream, baud_rate))
    }
}

impl<S> RtuTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already opened byte stream running at `baud_rate`
    pub fn new(stream: S, baud_rate: u32) -> Self {
        Self {
            stream,
            frame_gap: rtu_frame_gap(baud_rate),
            stats: TransportStats::default(),
            packet_logging: false,
        }
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    pub fn frame_gap(&self) -> Duration {
        self.frame_gap
    }
}

#[async_trait]
impl<S> FrameTransport for RtuTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_frame(&mut self) -> ModbusResult<Vec<u8>> {
        let mut frame = Vec::new();
        let mut buffer = [0u8; MAX_RTU_FRAME_SIZE];
        let mut overflow = false;

        // First byte: wait as long as it takes
        let n = self.stream.read(&mut buffer).await?;
        if n == 0 {
            return Err(ModbusError::connection("Serial stream closed"));
        }
        frame.extend_from_slice(&buffer[..n]);

        // Following bytes: a silent gap ends the frame
        loop {
            match timeout(self.frame_gap, self.stream.read(&mut buffer)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => {
                    if frame.len() + n > MAX_RTU_FRAME_SIZE {
                        overflow = true;
                    } else {
                        frame.extend_from_slice(&buffer[..n]);
                    }
                }
                Ok(Err(e)) => {
                    self.stats.errors += 1;
                    return Err(ModbusError::io(format!("Serial read error: {}", e)));
                }
                Err(_) => break,
            }
        }

        if overflow {
            self.stats.errors += 1;
            return Err(FrameError::malformed(format!(
                "RTU frame exceeds {} bytes", MAX_RTU_FRAME_SIZE
            )).into());
        }

        self.stats.frames_received += 1;
        self.stats.bytes_received += frame.len() as u64;
        if self.packet_logging {
            log_packet("recv", &frame, FramingVariant::Rtu);
        }
        Ok(frame)
    }

    async fn write_frame(&mut self, frame: &[u8]) -> ModbusResult<()> {
        write_all_counted(&mut self.stream, frame, &mut self.stats, self.packet_logging, FramingVariant::Rtu).await
    }

    fn variant(&self) -> FramingVariant {
        FramingVariant::Rtu
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// Modbus ASCII transport
///
/// ASCII frames are hex text, which makes them human-readable and tolerant of
/// slow or irregular links. Bytes before the ':' start character are noise and
/// are skipped; a ':' inside a frame restarts it.
pub struct AsciiTransport<S> {
    stream: S,
    /// Character expected after CR at end of frame
    delimiter: u8,
    /// Maximum time between characters in a frame
    inter_char_timeout: Duration,
    stats: TransportStats,
    packet_logging: bool,
}

impl AsciiTransport<SerialStream> {
    /// Open a serial port with 7 data bits, even parity, 1 stop bit
    pub fn open(port: &str, baud_rate: u32) -> ModbusResult<Self> {
        Self::open_with_config(
            port,
            baud_rate,
            tokio_serial::DataBits::Seven,  // ASCII standard
            tokio_serial::StopBits::One,
            tokio_serial::Parity::Even,     // Recommended for ASCII
        )
    }

    /// Open a serial port with full line configuration
    pub fn open_with_config(
        port: &str,
        baud_rate: u32,
        data_bits: tokio_serial::DataBits,
        stop_bits: tokio_serial::StopBits,
        parity: tokio_serial::Parity,
    ) -> ModbusResult<Self> {
        let stream = open_serial(port, baud_rate, data_bits, stop_bits, parity)?;
        Ok(Self::new(stream))
    }
}

impl<S> AsciiTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            delimiter: ASCII_DEFAULT_DELIMITER,
            inter_char_timeout: DEFAULT_INTER_CHAR_TIMEOUT,
            stats: TransportStats::default(),
            packet_logging: false,
        }
    }

    pub fn with_inter_char_timeout(mut self, inter_char_timeout: Duration) -> Self {
        self.inter_char_timeout = inter_char_timeout;
        self
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    async fn read_byte(&mut self) -> ModbusResult<u8> {
        let mut byte = [0u8; 1];
        self.stream.read_exact(&mut byte).await?;
        Ok(byte[0])
    }
}

#[async_trait]
impl<S> FrameTransport for AsciiTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_frame(&mut self) -> ModbusResult<Vec<u8>> {
        // Skip noise until a start character
        while self.read_byte().await? != ASCII_START {}

        let mut frame = vec![ASCII_START];
        loop {
            let byte = match timeout(self.inter_char_timeout, self.read_byte()).await {
                Ok(result) => result?,
                Err(_) => {
                    self.stats.timeouts += 1;
                    return Err(ModbusError::timeout(
                        "Incomplete ASCII frame",
                        self.inter_char_timeout.as_millis() as u64,
                    ));
                }
            };

            if byte == ASCII_START {
                frame.truncate(1);
                continue;
            }

            frame.push(byte);

            let len = frame.len();
            if len >= 3 && frame[len - 2] == ASCII_CR && frame[len - 1] == self.delimiter {
                break;
            }

            if len > MAX_ASCII_FRAME_SIZE {
                self.stats.errors += 1;
                return Err(FrameError::malformed(format!(
                    "ASCII frame exceeds {} characters", MAX_ASCII_FRAME_SIZE
                )).into());
            }
        }

        self.stats.frames_received += 1;
        self.stats.bytes_received += frame.len() as u64;
        if self.packet_logging {
            log_packet("recv", &frame, FramingVariant::Ascii);
        }
        Ok(frame)
    }

    async fn write_frame(&mut self, frame: &[u8]) -> ModbusResult<()> {
        write_all_counted(&mut self.stream, frame, &mut self.stats, self.packet_logging, FramingVariant::Ascii).await
    }

    fn variant(&self) -> FramingVariant {
        FramingVariant::Ascii
    }

    fn set_ascii_delimiter(&mut self, delimiter: u8) {
        self.delimiter = delimiter;
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// Modbus TCP transport
pub struct TcpTransport<S> {
    stream: S,
    stats: TransportStats,
    packet_logging: bool,
}

impl<S> TcpTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            stats: TransportStats::default(),
            packet_logging: false,
        }
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }
}

#[async_trait]
impl<S> FrameTransport for TcpTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_frame(&mut self) -> ModbusResult<Vec<u8>> {
        let mut frame = vec![0u8; MbapHeader::SIZE];
        self.stream.read_exact(&mut frame).await?;

        let header = MbapHeader::parse(&frame)?;
        let remaining = (header.length as usize).saturating_sub(1);

        // Without a sane length there is no way to find the next frame boundary
        if remaining == 0 || MbapHeader::SIZE + remaining > MAX_TCP_FRAME_SIZE {
            self.stats.errors += 1;
            return Err(ModbusError::connection(format!(
                "Invalid MBAP length field: {}", header.length
            )));
        }

        frame.resize(MbapHeader::SIZE + remaining, 0);
        self.stream.read_exact(&mut frame[MbapHeader::SIZE..]).await?;

        self.stats.frames_received += 1;
        self.stats.bytes_received += frame.len() as u64;
        if self.packet_logging {
            log_packet("recv", &frame, FramingVariant::Tcp);
        }
        Ok(frame)
    }

    async fn write_frame(&mut self, frame: &[u8]) -> ModbusResult<()> {
        write_all_counted(&mut self.stream, frame, &mut self.stats, self.packet_logging, FramingVariant::Tcp).await
    }

    fn variant(&self) -> FramingVariant {
        FramingVariant::Tcp
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{AsciiFrame, RtuFrame, TcpFrame};
    use tokio::io::duplex;

    #[test]
    fn test_rtu_frame_gap() {
        // 9600 baud: 1145us per character, 3.5 characters
        assert_eq!(rtu_frame_gap(9600), Duration::from_micros(4007));
        assert_eq!(rtu_frame_gap(19200), Duration::from_micros(2002));
        assert_eq!(rtu_frame_gap(38400), Duration::from_micros(1750));
        assert_eq!(rtu_frame_gap(115200), Duration::from_micros(1750));
    }

    #[tokio::test]
    async fn test_rtu_read_frame() {
        let (mut client, server) = duplex(1024);
        let mut transport = RtuTransport::new(server, 9600);

        let request = RtuFrame::wrap(0x01, &[0x03, 0x00, 0x00, 0x00, 0x02]);
        client.write_all(&request).await.unwrap();

        assert_eq!(transport.read_frame().await.unwrap(), request);

        transport.write_frame(&[0x01, 0x02]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x01, 0x02]);

        let stats = transport.get_stats();
        assert_eq!(stats.frames_received, 1);
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(stats.bytes_received, 8);
    }

    #[tokio::test]
    async fn test_packet_logging_keeps_frames_intact() {
        let (mut client, server) = duplex(1024);
        let mut transport = TcpTransport::new(server);
        transport.set_packet_logging(true);

        let request = TcpFrame::wrap(3, 0x01, &[0x07]);
        client.write_all(&request).await.unwrap();
        assert_eq!(transport.read_frame().await.unwrap(), request);
        assert_eq!(format::bytes_to_hex(&request), "00 03 00 00 00 02 01 07");

        transport.write_frame(&request).await.unwrap();
        let mut echo = vec![0u8; request.len()];
        client.read_exact(&mut echo).await.unwrap();
        assert_eq!(echo, request);
    }

    #[tokio::test]
    async fn test_rtu_split_frame_within_gap() {
        let (mut client, server) = duplex(1024);
        let mut transport = RtuTransport::new(server, 9600);
        let request = RtuFrame::wrap(0x01, &[0x03, 0x00, 0x00, 0x00, 0x02]);

        let writer = tokio::spawn(async move {
            client.write_all(&request[..3]).await.unwrap();
            tokio::time::sleep(Duration::from_micros(500)).await;
            client.write_all(&request[3..]).await.unwrap();
            client
        });

        let frame = transport.read_frame().await.unwrap();
        assert_eq!(frame.len(), 8);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_rtu_oversized_frame() {
        let (mut client, server) = duplex(4096);
        let mut transport = RtuTransport::new(server, 9600);

        client.write_all(&[0x55; MAX_RTU_FRAME_SIZE + 10]).await.unwrap();
        assert!(matches!(transport.read_frame().await, Err(ModbusError::Frame(_))));
    }

    #[tokio::test]
    async fn test_rtu_closed_stream() {
        let (client, server) = duplex(64);
        let mut transport = RtuTransport::new(server, 9600);
        drop(client);
        assert!(matches!(transport.read_frame().await, Err(ModbusError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_ascii_read_frame_skips_noise() {
        let (mut client, server) = duplex(1024);
        let mut transport = AsciiTransport::new(server);

        let request = AsciiFrame::wrap(0x01, &[0x03, 0x00, 0x00, 0x00, 0x02]);
        client.write_all(b"\x00\xFFgarbage").await.unwrap();
        client.write_all(&request).await.unwrap();

        assert_eq!(transport.read_frame().await.unwrap(), request);
    }

    #[tokio::test]
    async fn test_ascii_restart_on_start_character() {
        let (mut client, server) = duplex(1024);
        let mut transport = AsciiTransport::new(server);

        client.write_all(b":0103").await.unwrap();
        client.write_all(b":010300000002FA\r\n").await.unwrap();

        assert_eq!(transport.read_frame().await.unwrap(), b":010300000002FA\r\n".to_vec());
    }

    #[tokio::test]
    async fn test_ascii_custom_delimiter() {
        let (mut client, server) = duplex(1024);
        let mut transport = AsciiTransport::new(server);
        transport.set_ascii_delimiter(b'!');

        client.write_all(b":010300000002FA\r!").await.unwrap();
        assert_eq!(transport.read_frame().await.unwrap(), b":010300000002FA\r!".to_vec());
    }

    #[tokio::test]
    async fn test_ascii_inter_char_timeout() {
        let (mut client, server) = duplex(1024);
        let mut transport = AsciiTransport::new(server).with_inter_char_timeout(Duration::from_millis(20));

        client.write_all(b":0103").await.unwrap();
        assert!(matches!(transport.read_frame().await, Err(ModbusError::Timeout { .. })));
        assert_eq!(transport.get_stats().timeouts, 1);
        drop(client);
    }

    #[tokio::test]
    async fn test_tcp_pipelined_frames() {
        let (mut client, server) = duplex(1024);
        let mut transport = TcpTransport::new(server);

        let first = TcpFrame::wrap(1, 1, &[0x03, 0x00, 0x00, 0x00, 0x01]);
        let second = TcpFrame::wrap(2, 1, &[0x06, 0x00, 0x01, 0x00, 0x03]);
        let mut both = first.clone();
        both.extend_from_slice(&second);
        client.write_all(&both).await.unwrap();

        assert_eq!(transport.read_frame().await.unwrap(), first);
        assert_eq!(transport.read_frame().await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_tcp_invalid_length() {
        let (mut client, server) = duplex(1024);
        let mut transport = TcpTransport::new(server);

        client.write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x01]).await.unwrap();
        assert!(matches!(transport.read_frame().await, Err(ModbusError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_tcp_closed_mid_frame() {
        let (mut client, server) = duplex(1024);
        let mut transport = TcpTransport::new(server);

        client.write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03]).await.unwrap();
        drop(client);
        assert!(matches!(transport.read_frame().await, Err(ModbusError::Connection { .. })));
    }
}
