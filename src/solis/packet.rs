use crate::prelude::*;

use bytes::{BufMut, BytesMut};

pub const START_BYTE: u8 = 0xA5;
pub const END_BYTE: u8 = 0x15;

/// Length of the one frame layout we know how to decode, in bytes and in
/// hex-text characters. Data-logger firmware V2 sends 103-byte frames.
pub const FRAME_LEN: usize = 103;
pub const FRAME_HEX_LEN: usize = 2 * FRAME_LEN;

/// One fixed-offset extraction rule against the frame's hex projection.
///
/// Offsets address hex-text characters, not raw bytes: the byte at buffer
/// index i spans characters [2i, 2i+2). Half-open [start, end), base 16.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub start: usize,
    pub end: usize,
    pub divisor: f64,
}

/// Fields confirmed against captured frames. Extending the decoder to new
/// fields or layouts means adding rows here, nothing else.
///
/// Offsets for serial number, temperature, AC voltage, cumulative energy and
/// per-string DC values are not in this table yet; they have not been
/// validated against a real capture.
pub const FIELD_SPECS: &[FieldSpec] = &[
    FieldSpec { name: "current_power_apo_t1_W", start: 118, end: 122, divisor: 1.0 },
    FieldSpec { name: "dv1", start: 66, end: 70, divisor: 10.0 },
    FieldSpec { name: "dv2", start: 70, end: 74, divisor: 10.0 },
    FieldSpec { name: "a_fo1", start: 114, end: 118, divisor: 100.0 },
];

/// Additive checksum with 8-bit wraparound: the low byte of the byte sum.
pub fn checksum(buffer: &[u8]) -> u8 {
    buffer.iter().fold(0u8, |lrc, b| lrc.wrapping_add(*b))
}

/// Render a buffer as lowercase hex text, the addressing unit for FieldSpecs.
pub fn hex_projection(raw: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut hex = String::with_capacity(raw.len() * 2);
    for b in raw {
        let _ = write!(hex, "{:02x}", b);
    }
    hex
}

/// Decode one raw frame into a snapshot of named field values.
///
/// Pure function, no I/O. Any frame whose hex projection is not exactly
/// FRAME_HEX_LEN characters is unrecognized and yields no snapshot. A field
/// that fails to parse aborts the whole decode; callers must never publish a
/// partial snapshot.
pub fn decode_frame(raw: &[u8]) -> Result<Snapshot, DecodeError> {
    let hexdata = hex_projection(raw);

    if hexdata.len() != FRAME_HEX_LEN {
        return Err(DecodeError::UnrecognizedFrameSize(hexdata.len()));
    }

    let mut snapshot = Snapshot::new();
    for spec in FIELD_SPECS {
        let slice = &hexdata[spec.start..spec.end];
        let value = u32::from_str_radix(slice, 16).map_err(|source| {
            DecodeError::FieldExtraction {
                field: spec.name,
                start: spec.start,
                end: spec.end,
                source,
            }
        })?;
        snapshot.insert(spec.name, value as f64 / spec.divisor);
    }

    Ok(snapshot)
}

// AckHeader {{{
/// Header fields echoed back in the defensive acknowledgement. Anything the
/// request didn't carry falls back to the defaults.
#[derive(Debug, Clone, Copy)]
pub struct AckHeader {
    pub msg_type: u8,
    pub req_idx: u8,
    pub serialno: u32,
}

impl Default for AckHeader {
    fn default() -> Self {
        Self {
            msg_type: 0x30,
            req_idx: 0,
            serialno: 0,
        }
    }
} // }}}

/// Build the fixed-length acknowledgement frame for a request that did not
/// match the telemetry shape: an 11-byte header, a 10-byte payload and a
/// 2-byte trailer. Total, never fails: defaults substitute for missing
/// header fields and an empty request echoes 0x00.
pub fn build_acknowledgement(header: AckHeader, request: &[u8]) -> Vec<u8> {
    let unix_time = chrono::Utc::now().timestamp() as u32;
    let first_byte = request.first().copied().unwrap_or(0x00);

    let mut payload = BytesMut::with_capacity(10);
    payload.put_u8(first_byte);
    payload.put_u8(0x01);
    payload.put_u32_le(unix_time);
    payload.put_u8(0xAA);
    payload.put_u8(0xAA);
    payload.put_u8(0x00);
    payload.put_u8(0x00);

    let resp_type = header.msg_type.wrapping_sub(0x30);

    let mut message = BytesMut::with_capacity(11 + payload.len() + 2);
    message.put_u8(START_BYTE);
    message.put_u16_le(payload.len() as u16);
    message.put_u8(0x10);
    message.put_u8(resp_type);
    message.put_u8(header.req_idx);
    message.put_u8(header.req_idx);
    message.put_u32_le(header.serialno);
    message.put_slice(&payload);

    // Trailer checksum covers everything after the start byte.
    let trailer = checksum(&message[1..]);
    message.put_u8(trailer);
    message.put_u8(END_BYTE);

    message.to_vec()
}
