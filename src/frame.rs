//! # Modbus Framing
//!
//! Wraps and unwraps PDUs for the three Modbus transports. The protocol core
//! only ever sees already-delimited byte slices; inter-frame timing and stream
//! reassembly live in [`crate::transport`].
//!
//! ## Frame Layouts
//!
//! ```text
//! RTU    [unit:1][PDU:N][CRC16 LE:2]
//! ASCII  ':' HEX([unit:1][PDU:N][LRC:1]) CR LF
//! TCP    [transaction:2 BE][protocol=0:2 BE][length:2 BE][unit:1][PDU:N]
//! ```
//!
//! Every unwrap checks the variant's minimum length before reading any field,
//! so hostile input can never cause an out-of-bounds read.
//!
//! ## Usage Example
//!
//! ```rust
//! use voltage_modbus_slave::frame::{Frame, FramingVariant, RtuFrame};
//!
//! let raw = RtuFrame::wrap(0x01, &[0x03, 0x00, 0x00, 0x00, 0x02]);
//! assert_eq!(raw, vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]);
//!
//! let frame = Frame::decode(FramingVariant::Rtu, &raw).unwrap();
//! assert_eq!(frame.unit_id(), 0x01);
//! assert_eq!(frame.pdu(), &[0x03, 0x00, 0x00, 0x00, 0x02]);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::checksum;
use crate::error::FrameError;

/// Maximum Modbus PDU size (RS485 ADU of 256 bytes minus address and CRC)
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum Modbus RTU frame size (address + PDU + CRC)
pub const MAX_RTU_FRAME_SIZE: usize = 1 + MAX_PDU_SIZE + 2;

/// Maximum Modbus ASCII frame size (':' + hex of address, PDU and LRC + CR LF)
pub const MAX_ASCII_FRAME_SIZE: usize = 1 + 2 * (1 + MAX_PDU_SIZE + 1) + 2;

/// Maximum Modbus TCP frame size (MBAP header + PDU)
pub const MAX_TCP_FRAME_SIZE: usize = MbapHeader::SIZE + MAX_PDU_SIZE;

/// ASCII start character
pub const ASCII_START: u8 = b':';

/// ASCII carriage return preceding the delimiter
pub const ASCII_CR: u8 = 0x0D;

/// Default ASCII end-of-frame delimiter (line feed)
pub const ASCII_DEFAULT_DELIMITER: u8 = 0x0A;

/// Transport framing used by a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramingVariant {
    /// Binary serial framing with CRC16
    Rtu,
    /// Hex-encoded serial framing with LRC
    Ascii,
    /// MBAP framing over TCP, no checksum
    Tcp,
}

impl FramingVariant {
    /// Serial line variants share broadcast and address filtering rules
    pub fn is_serial(self) -> bool {
        matches!(self, FramingVariant::Rtu | FramingVariant::Ascii)
    }

    /// Short protocol tag used in logs
    pub fn tag(self) -> &'static str {
        match self {
            FramingVariant::Rtu => "RTU",
            FramingVariant::Ascii => "ASCII",
            FramingVariant::Tcp => "TCP",
        }
    }
}

impl fmt::Display for FramingVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Modbus RTU frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtuFrame {
    pub unit_id: u8,
    pub pdu: Vec<u8>,
}

impl RtuFrame {
    /// Address (1) + function code (1) + CRC (2)
    pub const MIN_SIZE: usize = 4;

    /// Build the raw RTU bytes for `pdu`
    pub fn wrap(unit_id: u8, pdu: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(pdu.len() + 3);
        frame.push(unit_id);
        frame.extend_from_slice(pdu);

        let crc = checksum::crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes()); // CRC is little-endian in RTU
        frame
    }

    /// Split raw RTU bytes into unit address and PDU
    pub fn unwrap(raw: &[u8]) -> Result<(u8, Vec<u8>), FrameError> {
        let frame = Self::decode(raw)?;
        Ok((frame.unit_id, frame.pdu))
    }

    /// Decode and validate an RTU frame
    pub fn decode(raw: &[u8]) -> Result<Self, FrameError> {
        if raw.len() < Self::MIN_SIZE {
            return Err(FrameError::truncated(raw.len(), Self::MIN_SIZE));
        }
        if raw.len() > MAX_RTU_FRAME_SIZE {
            return Err(FrameError::malformed(format!(
                "RTU frame of {} bytes exceeds {}", raw.len(), MAX_RTU_FRAME_SIZE
            )));
        }

        let data_len = raw.len() - 2;
        let received_crc = u16::from_le_bytes([raw[data_len], raw[data_len + 1]]);
        if !checksum::verify_crc16(&raw[..data_len], received_crc) {
            return Err(FrameError::checksum_mismatch(
                checksum::crc16(&raw[..data_len]),
                received_crc,
            ));
        }

        Ok(Self {
            unit_id: raw[0],
            pdu: raw[1..data_len].to_vec(),
        })
    }

    /// Encode to raw RTU bytes
    pub fn encode(&self) -> Vec<u8> {
        Self::wrap(self.unit_id, &self.pdu)
    }
}

/// Modbus ASCII frame
///
/// ASCII frame format: `:AAFFDDD...LLCRLF`
/// - `:` - Start character
/// - `AA` - Address (2 ASCII chars)
/// - `FF` - Function code (2 ASCII chars)
/// - `DDD...` - Data (variable length ASCII chars)
/// - `LL` - LRC checksum (2 ASCII chars)
/// - `CRLF` - End characters; the LF is configurable on input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsciiFrame {
    pub unit_id: u8,
    pub pdu: Vec<u8>,
}

impl AsciiFrame {
    /// Minimum frame: `:AAFFLL` CR LF
    pub const MIN_SIZE: usize = 9;

    /// Build the raw ASCII bytes for `pdu`
    pub fn wrap(unit_id: u8, pdu: &[u8]) -> Vec<u8> {
        let mut raw_data = Vec::with_capacity(pdu.len() + 2);
        raw_data.push(unit_id);
        raw_data.extend_from_slice(pdu);
        raw_data.push(checksum::lrc(&raw_data));

        let mut frame = Vec::with_capacity(raw_data.len() * 2 + 3);
        frame.push(ASCII_START);
        frame.extend_from_slice(hex::encode_upper(&raw_data).as_bytes());
        frame.push(ASCII_CR);
        frame.push(ASCII_DEFAULT_DELIMITER);
        frame
    }

    /// Split raw ASCII bytes into unit address and PDU
    pub fn unwrap(raw: &[u8]) -> Result<(u8, Vec<u8>), FrameError> {
        let frame = Self::decode(raw, ASCII_DEFAULT_DELIMITER)?;
        Ok((frame.unit_id, frame.pdu))
    }

    /// Like [`AsciiFrame::unwrap`] with a non-default end-of-frame delimiter
    pub fn unwrap_with_delimiter(raw: &[u8], delimiter: u8) -> Result<(u8, Vec<u8>), FrameError> {
        let frame = Self::decode(raw, delimiter)?;
        Ok((frame.unit_id, frame.pdu))
    }

    /// Decode and validate an ASCII frame terminated by CR + `delimiter`
    pub fn decode(raw: &[u8], delimiter: u8) -> Result<Self, FrameError> {
        if raw.len() < Self::MIN_SIZE {
            return Err(FrameError::truncated(raw.len(), Self::MIN_SIZE));
        }
        if raw.len() > MAX_ASCII_FRAME_SIZE {
            return Err(FrameError::malformed(format!(
                "ASCII frame of {} bytes exceeds {}", raw.len(), MAX_ASCII_FRAME_SIZE
            )));
        }

        if raw[0] != ASCII_START {
            return Err(FrameError::malformed("Invalid ASCII frame start character"));
        }

        let len = raw.len();
        if raw[len - 2] != ASCII_CR || raw[len - 1] != delimiter {
            return Err(FrameError::malformed("Invalid ASCII frame end characters"));
        }

        // Each byte is two hex characters
        let ascii_data = &raw[1..len - 2];
        if ascii_data.len() % 2 != 0 {
            return Err(FrameError::malformed("Invalid ASCII frame length"));
        }

        let mut raw_data = hex::decode(ascii_data)
            .map_err(|e| FrameError::malformed(format!("Invalid ASCII hex: {}", e)))?;

        // MIN_SIZE guarantees address, function code and LRC
        let received_lrc = match raw_data.pop() {
            Some(lrc) => lrc,
            None => return Err(FrameError::truncated(0, 3)),
        };
        if !checksum::verify_lrc(&raw_data, received_lrc) {
            return Err(FrameError::checksum_mismatch(
                checksum::lrc(&raw_data) as u16,
                received_lrc as u16,
            ));
        }

        let pdu = raw_data.split_off(1);
        Ok(Self { unit_id: raw_data[0], pdu })
    }

    /// Encode to raw ASCII bytes (always CR LF terminated)
    pub fn encode(&self) -> Vec<u8> {
        Self::wrap(self.unit_id, &self.pdu)
    }
}

/// Modbus Application Protocol header used by Modbus TCP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Byte count of unit id + PDU
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    /// Transaction (2) + protocol (2) + length (2) + unit (1)
    pub const SIZE: usize = 7;

    /// Header for a PDU of `pdu_len` bytes
    pub fn new(transaction_id: u16, unit_id: u8, pdu_len: usize) -> Self {
        Self {
            transaction_id,
            protocol_id: 0,
            length: (pdu_len + 1) as u16,
            unit_id,
        }
    }

    /// Parse the first seven bytes of `raw`
    pub fn parse(raw: &[u8]) -> Result<Self, FrameError> {
        if raw.len() < Self::SIZE {
            return Err(FrameError::truncated(raw.len(), Self::SIZE));
        }

        Ok(Self {
            transaction_id: u16::from_be_bytes([raw[0], raw[1]]),
            protocol_id: u16::from_be_bytes([raw[2], raw[3]]),
            length: u16::from_be_bytes([raw[4], raw[5]]),
            unit_id: raw[6],
        })
    }

    /// Serialize to wire order
    pub fn to_bytes(&self) -> [u8; 7] {
        let mut bytes = [0u8; 7];
        bytes[0..2].copy_from_slice(&self.transaction_id.to_be_bytes());
        bytes[2..4].copy_from_slice(&self.protocol_id.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.length.to_be_bytes());
        bytes[6] = self.unit_id;
        bytes
    }
}

/// Modbus TCP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpFrame {
    pub header: MbapHeader,
    pub pdu: Vec<u8>,
}

impl TcpFrame {
    /// MBAP header (7) + function code (1)
    pub const MIN_SIZE: usize = MbapHeader::SIZE + 1;

    /// Build the raw MBAP bytes for `pdu`
    pub fn wrap(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
        let header = MbapHeader::new(transaction_id, unit_id, pdu.len());
        let mut frame = Vec::with_capacity(MbapHeader::SIZE + pdu.len());
        frame.extend_from_slice(&header.to_bytes());
        frame.extend_from_slice(pdu);
        frame
    }

    /// Split raw MBAP bytes into unit id and PDU
    pub fn unwrap(raw: &[u8]) -> Result<(u8, Vec<u8>), FrameError> {
        let frame = Self::decode(raw)?;
        Ok((frame.header.unit_id, frame.pdu))
    }

    /// Decode and validate a TCP frame
    pub fn decode(raw: &[u8]) -> Result<Self, FrameError> {
        if raw.len() < Self::MIN_SIZE {
            return Err(FrameError::truncated(raw.len(), Self::MIN_SIZE));
        }
        if raw.len() > MAX_TCP_FRAME_SIZE {
            return Err(FrameError::malformed(format!(
                "TCP frame of {} bytes exceeds {}", raw.len(), MAX_TCP_FRAME_SIZE
            )));
        }

        let header = MbapHeader::parse(raw)?;
        if header.protocol_id != 0 {
            return Err(FrameError::malformed(format!(
                "Invalid protocol ID: {}", header.protocol_id
            )));
        }

        let following = raw.len() - (MbapHeader::SIZE - 1);
        if header.length as usize != following {
            return Err(FrameError::malformed(format!(
                "MBAP length {} does not match {} received bytes", header.length, following
            )));
        }

        Ok(Self {
            header,
            pdu: raw[MbapHeader::SIZE..].to_vec(),
        })
    }

    /// Encode to raw MBAP bytes, recomputing the length field
    pub fn encode(&self) -> Vec<u8> {
        let header = MbapHeader {
            length: (self.pdu.len() + 1) as u16,
            ..self.header
        };
        let mut frame = Vec::with_capacity(MbapHeader::SIZE + self.pdu.len());
        frame.extend_from_slice(&header.to_bytes());
        frame.extend_from_slice(&self.pdu);
        frame
    }
}

/// A decoded frame of any variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Rtu(RtuFrame),
    Ascii(AsciiFrame),
    Tcp(TcpFrame),
}

impl Frame {
    /// Decode `raw` using the given framing
    pub fn decode(variant: FramingVariant, raw: &[u8]) -> Result<Self, FrameError> {
        Self::decode_with_delimiter(variant, raw, ASCII_DEFAULT_DELIMITER)
    }

    /// Decode `raw`, terminating ASCII frames with CR + `ascii_delimiter`
    pub fn decode_with_delimiter(
        variant: FramingVariant,
        raw: &[u8],
        ascii_delimiter: u8,
    ) -> Result<Self, FrameError> {
        match variant {
            FramingVariant::Rtu => RtuFrame::decode(raw).map(Frame::Rtu),
            FramingVariant::Ascii => AsciiFrame::decode(raw, ascii_delimiter).map(Frame::Ascii),
            FramingVariant::Tcp => TcpFrame::decode(raw).map(Frame::Tcp),
        }
    }

    pub fn variant(&self) -> FramingVariant {
        match self {
            Frame::Rtu(_) => FramingVariant::Rtu,
            Frame::Ascii(_) => FramingVariant::Ascii,
            Frame::Tcp(_) => FramingVariant::Tcp,
        }
    }

    /// Unit address (RTU/ASCII) or unit id (TCP)
    pub fn unit_id(&self) -> u8 {
        match self {
            Frame::Rtu(frame) => frame.unit_id,
            Frame::Ascii(frame) => frame.unit_id,
            Frame::Tcp(frame) => frame.header.unit_id,
        }
    }

    pub fn pdu(&self) -> &[u8] {
        match self {
            Frame::Rtu(frame) => &frame.pdu,
            Frame::Ascii(frame) => &frame.pdu,
            Frame::Tcp(frame) => &frame.pdu,
        }
    }

    /// Frame carrying `pdu` back to the sender of `self`
    ///
    /// Same variant and unit; TCP replies keep the transaction id.
    pub fn reply(&self, pdu: Vec<u8>) -> Frame {
        match self {
            Frame::Rtu(frame) => Frame::Rtu(RtuFrame { unit_id: frame.unit_id, pdu }),
            Frame::Ascii(frame) => Frame::Ascii(AsciiFrame { unit_id: frame.unit_id, pdu }),
            Frame::Tcp(frame) => Frame::Tcp(TcpFrame {
                header: MbapHeader::new(frame.header.transaction_id, frame.header.unit_id, pdu.len()),
                pdu,
            }),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Frame::Rtu(frame) => frame.encode(),
            Frame::Ascii(frame) => frame.encode(),
            Frame::Tcp(frame) => frame.encode(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtu_wrap_unwrap() {
        let pdu = vec![0x03, 0x00, 0x6B, 0x00, 0x03];
        for unit in [0u8, 1, 17, 247, 255] {
            let raw = RtuFrame::wrap(unit, &pdu);
            assert_eq!(raw.len(), pdu.len() + 3);
            assert_eq!(RtuFrame::unwrap(&raw).unwrap(), (unit, pdu.clone()));
        }
    }

    #[test]
    fn test_rtu_single_bit_flip_detected() {
        let raw = RtuFrame::wrap(0x11, &[0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]);

        for byte in 0..raw.len() {
            for bit in 0..8 {
                let mut corrupted = raw.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(
                    matches!(RtuFrame::unwrap(&corrupted), Err(FrameError::ChecksumMismatch { .. })),
                    "flip of byte {} bit {} went undetected", byte, bit
                );
            }
        }
    }

    #[test]
    fn test_rtu_too_short() {
        assert_eq!(RtuFrame::unwrap(&[]), Err(FrameError::truncated(0, 4)));
        assert_eq!(RtuFrame::unwrap(&[0x01, 0x03, 0xC4]), Err(FrameError::truncated(3, 4)));
        assert!(matches!(
            RtuFrame::unwrap(&[0x01, 0x01, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00]),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_ascii_frame_encoding() {
        let frame = AsciiFrame::wrap(0x01, &[0x03, 0x00, 0x00, 0x00, 0x02]);
        assert_eq!(frame, b":010300000002FA\r\n".to_vec());
        assert_eq!(frame[0], b':');
        assert_eq!(frame[frame.len() - 2], 0x0D);
        assert_eq!(frame[frame.len() - 1], 0x0A);
    }

    #[test]
    fn test_ascii_frame_decoding() {
        let (unit, pdu) = AsciiFrame::unwrap(b":010300000002FA\r\n").unwrap();
        assert_eq!(unit, 0x01);
        assert_eq!(pdu, vec![0x03, 0x00, 0x00, 0x00, 0x02]);

        // Lowercase hex is accepted
        let (_, pdu) = AsciiFrame::unwrap(b":01030400ab00cd80\r\n").unwrap();
        assert_eq!(pdu, vec![0x03, 0x04, 0x00, 0xAB, 0x00, 0xCD]);
    }

    #[test]
    fn test_ascii_error_handling() {
        assert!(matches!(AsciiFrame::unwrap(b":0103\r\n"), Err(FrameError::Truncated { .. })));
        assert!(matches!(AsciiFrame::unwrap(b"X010300000002FA\r\n"), Err(FrameError::Malformed { .. })));
        assert!(matches!(AsciiFrame::unwrap(b":010300000002FA\r\r"), Err(FrameError::Malformed { .. })));
        assert!(matches!(AsciiFrame::unwrap(b":01030000002FA\r\n"), Err(FrameError::Malformed { .. })));
        assert!(matches!(AsciiFrame::unwrap(b":0103000000G2FA\r\n"), Err(FrameError::Malformed { .. })));
        assert!(matches!(AsciiFrame::unwrap(b":010300000002FF\r\n"), Err(FrameError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_ascii_custom_delimiter() {
        let raw = b":010300000002FA\r!";
        assert!(AsciiFrame::unwrap(raw).is_err());
        let (unit, _) = AsciiFrame::unwrap_with_delimiter(raw, b'!').unwrap();
        assert_eq!(unit, 0x01);
    }

    #[test]
    fn test_mbap_header() {
        let raw = TcpFrame::wrap(0x1234, 0x07, &[0x03, 0x00, 0x00, 0x00, 0x0A]);
        assert_eq!(&raw[..7], &[0x12, 0x34, 0x00, 0x00, 0x00, 0x06, 0x07]);

        let header = MbapHeader::parse(&raw).unwrap();
        assert_eq!(header.transaction_id, 0x1234);
        assert_eq!(header.protocol_id, 0);
        assert_eq!(header.length, 6);
        assert_eq!(header.unit_id, 7);
        assert_eq!(header.to_bytes(), [0x12, 0x34, 0x00, 0x00, 0x00, 0x06, 0x07]);
    }

    #[test]
    fn test_tcp_frame_validation() {
        let raw = TcpFrame::wrap(1, 1, &[0x03, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(TcpFrame::unwrap(&raw).unwrap(), (1, vec![0x03, 0x00, 0x00, 0x00, 0x01]));

        // Too short to hold header and function code
        assert!(matches!(TcpFrame::unwrap(&raw[..7]), Err(FrameError::Truncated { .. })));

        // Wrong protocol id
        let mut bad_protocol = raw.clone();
        bad_protocol[3] = 0x01;
        assert!(matches!(TcpFrame::unwrap(&bad_protocol), Err(FrameError::Malformed { .. })));

        // Length field disagrees with payload
        let mut bad_length = raw.clone();
        bad_length[5] = 0x09;
        assert!(matches!(TcpFrame::unwrap(&bad_length), Err(FrameError::Malformed { .. })));
        assert!(matches!(TcpFrame::unwrap(&raw[..raw.len() - 1]), Err(FrameError::Malformed { .. })));
    }

    #[test]
    fn test_pdu_size_limit() {
        assert_eq!(MAX_RTU_FRAME_SIZE, 256);
        assert_eq!(MAX_ASCII_FRAME_SIZE, 513);
        assert_eq!(MAX_TCP_FRAME_SIZE, 260);

        let largest = vec![0x10; MAX_PDU_SIZE];
        let oversized = vec![0x10; MAX_PDU_SIZE + 1];

        assert_eq!(Frame::decode(FramingVariant::Rtu, &RtuFrame::wrap(1, &largest)).unwrap().pdu(), &largest[..]);
        assert_eq!(Frame::decode(FramingVariant::Ascii, &AsciiFrame::wrap(1, &largest)).unwrap().pdu(), &largest[..]);
        assert_eq!(Frame::decode(FramingVariant::Tcp, &TcpFrame::wrap(1, 1, &largest)).unwrap().pdu(), &largest[..]);

        for (variant, raw) in [
            (FramingVariant::Rtu, RtuFrame::wrap(1, &oversized)),
            (FramingVariant::Ascii, AsciiFrame::wrap(1, &oversized)),
            (FramingVariant::Tcp, TcpFrame::wrap(1, 1, &oversized)),
        ] {
            assert!(matches!(Frame::decode(variant, &raw), Err(FrameError::Malformed { .. })), "{}", variant);
        }
    }

    #[test]
    fn test_frame_reply_keeps_addressing() {
        let request = TcpFrame::wrap(0xBEEF, 0x05, &[0x06, 0x00, 0x01, 0x00, 0x03]);
        let frame = Frame::decode(FramingVariant::Tcp, &request).unwrap();
        let reply = frame.reply(vec![0x86, 0x02]).encode();
        assert_eq!(reply, vec![0xBE, 0xEF, 0x00, 0x00, 0x00, 0x03, 0x05, 0x86, 0x02]);

        let frame = Frame::decode(FramingVariant::Ascii, b":010300000002FA\r\n").unwrap();
        assert_eq!(frame.variant(), FramingVariant::Ascii);
        assert_eq!(frame.reply(vec![0x83, 0x02]).encode(), AsciiFrame::wrap(0x01, &[0x83, 0x02]));
    }
}
