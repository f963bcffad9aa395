//! Primitive wire encodings shared by every packet type.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MqttError, Result};

/// Largest value a remaining-length field can carry (4 bytes of 7 bits).
pub const REMAINING_LENGTH_MAX: u32 = 268_435_455;

/// Longest string or binary chunk a 16-bit length prefix can describe.
pub const STRING_MAX: usize = 65_535;

/// Appends `value` as a variable-length integer, least-significant 7-bit
/// group first, high bit as continuation. Always the shortest encoding.
pub fn write_variable_int(buf: &mut BytesMut, mut value: u32) {
    debug_assert!(value <= REMAINING_LENGTH_MAX);
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decodes a variable-length integer from the front of `data`.
///
/// Returns `Ok(None)` when the continuation bit runs past the available
/// bytes, and `(value, consumed)` once a full group terminates. More than
/// 4 encoded bytes is a protocol violation.
pub fn read_variable_int(data: &[u8]) -> Result<Option<(u32, usize)>> {
    let mut value = 0u32;
    for i in 0..4 {
        let Some(&byte) = data.get(i) else {
            return Ok(None);
        };
        value |= u32::from(byte & 0x7F) << (7 * i as u32);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    Err(MqttError::Protocol(
        "remaining length encoded in more than 4 bytes".to_string(),
    ))
}

/// Appends a 16-bit big-endian length prefix followed by the string bytes.
pub fn write_string(buf: &mut BytesMut, s: &str) {
    write_binary(buf, s.as_bytes());
}

pub fn write_binary(buf: &mut BytesMut, data: &[u8]) {
    debug_assert!(data.len() <= STRING_MAX);
    buf.put_u16(data.len() as u16);
    buf.put_slice(data);
}

/// Splits a length-prefixed chunk off the front of `body` without copying.
pub fn read_binary(body: &mut Bytes) -> Result<Bytes> {
    let len = read_u16(body)? as usize;
    if body.remaining() < len {
        return Err(MqttError::Protocol(format!(
            "length prefix {len} exceeds {} remaining bytes",
            body.remaining()
        )));
    }
    Ok(body.split_to(len))
}

pub fn read_string(body: &mut Bytes) -> Result<String> {
    let raw = read_binary(body)?;
    String::from_utf8(raw.to_vec())
        .map_err(|_| MqttError::Protocol("string is not valid UTF-8".to_string()))
}

pub fn read_u16(body: &mut Bytes) -> Result<u16> {
    if body.remaining() < 2 {
        return Err(MqttError::Protocol(
            "truncated 16-bit integer".to_string(),
        ));
    }
    Ok(body.get_u16())
}
