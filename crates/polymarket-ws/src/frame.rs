//! RFC 6455 frame codec
//!
//! Pure encode/decode of single WebSocket frames. Fragmented messages are not
//! reassembled: every decoded frame is handed up as-is.
//!
//! # Wire layout (RFC 6455 Section 5.2)
//! ```text
//! byte 0: FIN | RSV1-3 | opcode (4 bits)
//! byte 1: MASK | payload len (7 bits: literal, 126 => u16 follows, 127 => u64 follows)
//! [extended length] [masking key, 4 bytes if MASK] [payload]
//! ```
//!
//! # Source
//! - RFC 6455: https://www.rfc-editor.org/rfc/rfc6455#section-5.2

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Default upper bound on a single frame payload (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

// ============================================================================
// Opcode / CloseCode
// ============================================================================

/// Frame opcode (4 bits on the wire)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// Reserved opcode, raw value preserved
    Other(u8),
}

impl Opcode {
    /// True for Close, Ping and Pong
    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

impl From<u8> for Opcode {
    fn from(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            other => Opcode::Other(other),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> Self {
        match opcode {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
            Opcode::Other(value) => value & 0x0F,
        }
    }
}

/// Close status codes (RFC 6455 Section 7.4.1)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000
    Normal,
    /// 1001
    Away,
    /// 1002
    Protocol,
    /// 1003
    Unsupported,
    /// 1004
    Reserved,
    /// 1005, never sent on the wire
    NoStatus,
    /// 1006, never sent on the wire
    Abnormal,
    /// 1007
    InvalidPayload,
    /// 1008
    PolicyViolation,
    /// 1009
    MessageTooBig,
    /// 1010
    MandatoryExtension,
    /// 1011
    InternalError,
    Other(u16),
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::Away,
            1002 => CloseCode::Protocol,
            1003 => CloseCode::Unsupported,
            1004 => CloseCode::Reserved,
            1005 => CloseCode::NoStatus,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Reserved => 1004,
            CloseCode::NoStatus => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::Other(other) => other,
        }
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A single decoded WebSocket frame. Payload is always held unmasked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(fin: bool, opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self { fin, opcode, payload: payload.into() }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(true, Opcode::Text, text.into().into_bytes())
    }

    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(true, Opcode::Binary, payload)
    }

    pub fn ping(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(true, Opcode::Ping, payload)
    }

    pub fn pong(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(true, Opcode::Pong, payload)
    }

    /// Close frame: 2-byte big-endian status followed by the UTF-8 reason.
    /// `NoStatus` produces an empty payload.
    pub fn close(code: CloseCode, reason: &str) -> Self {
        let payload = if code == CloseCode::NoStatus {
            Vec::new()
        } else {
            let mut buf = Vec::with_capacity(2 + reason.len());
            buf.extend_from_slice(&u16::from(code).to_be_bytes());
            buf.extend_from_slice(reason.as_bytes());
            buf
        };
        Self::new(true, Opcode::Close, payload)
    }

    /// Status code carried by a Close frame (`NoStatus` if the payload is empty)
    pub fn close_code(&self) -> Option<CloseCode> {
        if self.opcode != Opcode::Close {
            return None;
        }
        match self.payload.as_slice() {
            [hi, lo, ..] => Some(CloseCode::from(u16::from_be_bytes([*hi, *lo]))),
            _ => Some(CloseCode::NoStatus),
        }
    }

    /// Reason text carried by a Close frame
    pub fn close_reason(&self) -> Option<String> {
        if self.opcode != Opcode::Close || self.payload.len() <= 2 {
            return None;
        }
        Some(String::from_utf8_lossy(&self.payload[2..]).into_owned())
    }

    /// Payload as a string; invalid UTF-8 is replaced rather than rejected
    pub fn payload_string(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// XOR `payload` in place with the 4-byte key repeated cyclically.
/// Applying it twice with the same key restores the input.
pub fn apply_mask(key: [u8; 4], payload: &mut [u8]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Encode a frame, masking it with a fresh random key when `mask` is set.
/// Client-to-server frames must always be masked.
pub fn encode(frame: &Frame, mask: bool) -> Vec<u8> {
    let key = if mask { Some(rand::random::<[u8; 4]>()) } else { None };
    encode_with_key(frame, key)
}

/// Encode a frame with an explicit masking key (`None` = unmasked)
pub fn encode_with_key(frame: &Frame, key: Option<[u8; 4]>) -> Vec<u8> {
    let len = frame.payload.len();
    let mut out = Vec::with_capacity(14 + len);

    let fin_bit = if frame.fin { 0x80 } else { 0x00 };
    out.push(fin_bit | u8::from(frame.opcode));

    let mask_bit = if key.is_some() { 0x80 } else { 0x00 };
    if len < 126 {
        out.push(mask_bit | len as u8);
    } else if len < 65536 {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | 127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match key {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(&frame.payload);
            apply_mask(key, &mut out[start..]);
        }
        None => out.extend_from_slice(&frame.payload),
    }

    out
}

// ============================================================================
// Decoding
// ============================================================================

/// Read exactly one frame from `reader`.
///
/// A clean end-of-stream before the first header byte yields
/// [`Error::ConnectionClosed`]. EOF anywhere inside a frame is an I/O error:
/// a truncated frame is never recovered from. Declared lengths above
/// `max_payload` are rejected before the payload is read.
pub async fn decode<R>(reader: &mut R, max_payload: usize) -> Result<Frame>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; 2];
    if reader.read(&mut header[..1]).await? == 0 {
        return Err(Error::ConnectionClosed);
    }
    reader.read_exact(&mut header[1..]).await?;

    let fin = header[0] & 0x80 != 0;
    let opcode = Opcode::from(header[0]);
    let masked = header[1] & 0x80 != 0;

    let len = match header[1] & 0x7F {
        126 => u64::from(reader.read_u16().await?),
        127 => reader.read_u64().await?,
        n => u64::from(n),
    };
    if len > max_payload as u64 {
        return Err(Error::FrameTooLarge { len, max: max_payload });
    }

    let key = if masked {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key).await?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    if let Some(key) = key {
        apply_mask(key, &mut payload);
    }

    Ok(Frame { fin, opcode, payload })
}
