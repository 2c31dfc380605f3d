//! Eddystone-TLM style frame decoder.
//!
//! The emitting firmware sometimes drops the leading frame type byte, so the
//! same logical frame arrives in two layouts. The layout is chosen from the
//! payload length alone and each layout is described by a [`FieldMap`] of
//! big-endian field offsets.
//!
//! | length | layout                                   |
//! |--------|------------------------------------------|
//! | 0      | [`DecodeError::Empty`]                   |
//! | 1..=11 | [`DecodeError::TooShort`]                |
//! | 12     | [`Layout::Short`], frame type assumed    |
//! | 13     | [`DecodeError::UnexpectedLength`]        |
//! | 14..   | [`Layout::Long`], trailing bytes ignored |

use crate::telemetry::TelemetryFrame;
use thiserror::Error;

/// Frame type assumed for payloads that omit the frame type byte.
pub const TLM_FRAME_TYPE: u8 = 0x20;

/// Payload length of the short layout.
pub const SHORT_LAYOUT_LEN: usize = 12;

/// Minimum payload length of the long layout.
pub const LONG_LAYOUT_LEN: usize = 14;

/// Divisor applied to the humidity field (stored in the battery voltage slot).
const HUMIDITY_DIVISOR: f64 = 33.0;

/// Scale of the signed 8.8 fixed point temperature field.
const TEMPERATURE_SCALE: f64 = 256.0;

/// Uptime is transmitted in deciseconds.
const UPTIME_DIVISOR: f64 = 10.0;

/// Error types for decoding telemetry frames.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload has no bytes at all
    #[error("Empty payload")]
    Empty,
    /// Payload is shorter than the smallest known layout
    #[error("Payload too short: {got} bytes, need at least {min}")]
    TooShort { got: usize, min: usize },
    /// Payload length falls between the two known layouts
    #[error("Unexpected payload length: {got} bytes")]
    UnexpectedLength { got: usize },
}

/// Wire layout of a telemetry frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// 12 bytes, frame type byte omitted, 3-byte uptime
    Short,
    /// 14 or more bytes, frame type byte present, 4-byte uptime
    Long,
}

/// Byte offsets of each field within a layout. All multi-byte fields are big-endian.
#[derive(Debug)]
pub struct FieldMap {
    /// Offset of the frame type byte, `None` when the layout omits it
    pub frame_type: Option<usize>,
    pub version: usize,
    pub humidity: usize,
    pub temperature: usize,
    pub advertisement_count: usize,
    pub uptime: usize,
    /// Number of uptime bytes present on the wire (at most 4)
    pub uptime_width: usize,
}

const SHORT_FIELDS: FieldMap = FieldMap {
    frame_type: None,
    version: 0,
    humidity: 1,
    temperature: 3,
    advertisement_count: 5,
    uptime: 9,
    uptime_width: 3,
};

const LONG_FIELDS: FieldMap = FieldMap {
    frame_type: Some(0),
    version: 1,
    humidity: 2,
    temperature: 4,
    advertisement_count: 6,
    uptime: 10,
    uptime_width: 4,
};

impl Layout {
    /// Pick the layout for a payload of `len` bytes.
    pub fn classify(len: usize) -> Result<Self, DecodeError> {
        match len {
            0 => Err(DecodeError::Empty),
            n if n < SHORT_LAYOUT_LEN => Err(DecodeError::TooShort {
                got: n,
                min: SHORT_LAYOUT_LEN,
            }),
            SHORT_LAYOUT_LEN => Ok(Layout::Short),
            n if n < LONG_LAYOUT_LEN => Err(DecodeError::UnexpectedLength { got: n }),
            _ => Ok(Layout::Long),
        }
    }

    /// Field offsets for this layout.
    pub fn fields(self) -> &'static FieldMap {
        match self {
            Layout::Short => &SHORT_FIELDS,
            Layout::Long => &LONG_FIELDS,
        }
    }
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Read a big-endian uptime of `width` bytes, zero padded on the right to 4 bytes.
///
/// A 3-byte field `00 35 c7` therefore reads as `0x0035c700`. Existing
/// emitters depend on this padding, so it is kept even though it shifts the
/// value by one byte.
fn read_padded_u32(data: &[u8], offset: usize, width: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes[..width].copy_from_slice(&data[offset..offset + width]);
    u32::from_be_bytes(bytes)
}

/// Decode an Eddystone-TLM style service data payload into a [`TelemetryFrame`].
///
/// The layout is selected from the payload length (see the module docs).
/// Decoding is pure: it never logs and never mutates `data`.
///
/// # Errors
/// Returns a [`DecodeError`] when the length matches neither layout. Once a
/// layout is selected every field is in bounds, so no other step can fail.
pub fn decode(data: &[u8]) -> Result<TelemetryFrame, DecodeError> {
    let layout = Layout::classify(data.len())?;
    let fields = layout.fields();

    let frame_type = fields
        .frame_type
        .map_or(TLM_FRAME_TYPE, |offset| data[offset]);
    let humidity_raw = read_u16(data, fields.humidity);
    let temperature_raw = read_u16(data, fields.temperature);
    let uptime_raw = read_padded_u32(data, fields.uptime, fields.uptime_width);

    Ok(TelemetryFrame {
        frame_type,
        version: data[fields.version],
        // The raw bits are signed 8.8 fixed point
        temperature_celsius: f64::from(temperature_raw as i16) / TEMPERATURE_SCALE,
        humidity_percent: f64::from(humidity_raw) / HUMIDITY_DIVISOR,
        advertisement_count: read_u32(data, fields.advertisement_count),
        uptime_seconds: f64::from(uptime_raw) / UPTIME_DIVISOR,
    })
}
