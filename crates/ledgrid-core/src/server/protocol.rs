//! Wire framing of the control protocol.
//!
//! Every message starts with a 10-byte header: 4 bytes magic `"LEDS"`,
//! one version byte, a big-endian u32 count/length, and one type byte.
//! Versions 1 and 2 stream pixel frames (the u32 is a pixel count, the
//! type byte a pixel format); version 3 is a request/response command
//! plane (the u32 is the payload length, the type byte a command id).

/// Message magic.
pub const MAGIC: [u8; 4] = *b"LEDS";
/// Total header length in bytes.
pub const HEADER_LEN: usize = 10;
/// Single-byte acknowledgment sent after a v2 frame.
pub const ACK: u8 = 0x06;

pub const PROTOCOL_V1: u8 = 1;
pub const PROTOCOL_V2: u8 = 2;
pub const PROTOCOL_V3: u8 = 3;

/// Set on the type byte of every v3 response.
pub const RESPONSE_FLAG: u8 = 0x80;

/// Default control protocol port.
pub const DEFAULT_PORT: u16 = 7777;

/// Payload bytes of a QUERY_DEFAULT_SHADER response (after the status).
pub const QUERY_PAYLOAD_LEN: usize = 20;

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    /// Pixel count (v1/v2) or payload length (v3), big-endian on the wire.
    pub count: u32,
    /// Pixel format (v1/v2) or command id (v3).
    pub kind: u8,
}

impl Header {
    /// Parse a raw header; `None` when the magic does not match.
    pub fn parse(bytes: &[u8; HEADER_LEN]) -> Option<Header> {
        if bytes[..4] != MAGIC {
            return None;
        }
        let count = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
        Some(Header {
            version: bytes[4],
            count,
            kind: bytes[9],
        })
    }
}

/// Header of a v3 response carrying `payload_len` bytes after the status
/// byte (the wire length field includes the status).
pub fn encode_v3_response_header(response_type: u8, payload_len: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(&MAGIC);
    header[4] = PROTOCOL_V3;
    header[5..9].copy_from_slice(&(payload_len + 1).to_be_bytes());
    header[9] = response_type;
    header
}

/// v3 command ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    UploadBytecode = 1,
    ActivateShader = 2,
    SetDefaultShader = 3,
    ClearDefaultShader = 4,
    QueryDefaultShader = 5,
    UploadFirmware = 6,
    ActivateNativeShader = 7,
    StopShader = 8,
}

impl Command {
    pub fn from_wire(value: u8) -> Option<Command> {
        match value {
            1 => Some(Self::UploadBytecode),
            2 => Some(Self::ActivateShader),
            3 => Some(Self::SetDefaultShader),
            4 => Some(Self::ClearDefaultShader),
            5 => Some(Self::QueryDefaultShader),
            6 => Some(Self::UploadFirmware),
            7 => Some(Self::ActivateNativeShader),
            8 => Some(Self::StopShader),
            _ => None,
        }
    }
}

/// Status byte of a v3 response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdStatus {
    Ok = 0,
    InvalidArg = 1,
    UnsupportedCmd = 2,
    TooLarge = 3,
    NotReady = 4,
    VmError = 5,
    Internal = 6,
}

impl CmdStatus {
    pub fn wire(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CmdStatus::Ok => "ok",
            CmdStatus::InvalidArg => "invalid_arg",
            CmdStatus::UnsupportedCmd => "unsupported_cmd",
            CmdStatus::TooLarge => "too_large",
            CmdStatus::NotReady => "not_ready",
            CmdStatus::VmError => "vm_error",
            CmdStatus::Internal => "internal",
        }
    }
}
