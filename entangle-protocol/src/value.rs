//! Narrowing conversions from decoded dynamic values to concrete types.
//!
//! Every field parse in the protocol routes through these primitives; they
//! are the sole input validation for incoming messages. Each conversion
//! fails with [`ProtocolError::Deserialization`] when the source value has
//! an incompatible type or lies outside the destination's representable
//! range.

use crate::error::ProtocolError;
use rmpv::Value;

fn as_i64(input: &Value) -> Result<i64, ProtocolError> {
    match input {
        Value::Integer(n) => n.as_i64().ok_or(ProtocolError::Deserialization),
        _ => Err(ProtocolError::Deserialization),
    }
}

fn as_u64(input: &Value) -> Result<u64, ProtocolError> {
    match input {
        Value::Integer(n) => n.as_u64().ok_or(ProtocolError::Deserialization),
        _ => Err(ProtocolError::Deserialization),
    }
}

/// Deserializes a string. Only text values with valid UTF-8 are accepted.
pub fn deserialize_string(input: &Value) -> Result<String, ProtocolError> {
    match input {
        Value::String(s) => s
            .as_str()
            .map(str::to_owned)
            .ok_or(ProtocolError::Deserialization),
        _ => Err(ProtocolError::Deserialization),
    }
}

/// Deserializes a boolean.
pub fn deserialize_bool(input: &Value) -> Result<bool, ProtocolError> {
    match input {
        Value::Boolean(b) => Ok(*b),
        _ => Err(ProtocolError::Deserialization),
    }
}

/// Deserializes a byte sequence.
///
/// Accepts a binary value or a text value, taking the text's raw byte
/// representation.
pub fn deserialize_binary(input: &Value) -> Result<Vec<u8>, ProtocolError> {
    match input {
        Value::Binary(bytes) => Ok(bytes.clone()),
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        _ => Err(ProtocolError::Deserialization),
    }
}

/// Deserializes a signed 8-bit integer from any integer in range.
pub fn deserialize_i8(input: &Value) -> Result<i8, ProtocolError> {
    i8::try_from(as_i64(input)?).map_err(|_| ProtocolError::Deserialization)
}

/// Deserializes a signed 16-bit integer from any integer in range.
pub fn deserialize_i16(input: &Value) -> Result<i16, ProtocolError> {
    i16::try_from(as_i64(input)?).map_err(|_| ProtocolError::Deserialization)
}

/// Deserializes a signed 32-bit integer from any integer in range.
pub fn deserialize_i32(input: &Value) -> Result<i32, ProtocolError> {
    i32::try_from(as_i64(input)?).map_err(|_| ProtocolError::Deserialization)
}

/// Deserializes a signed 64-bit integer from any integer in range.
pub fn deserialize_i64(input: &Value) -> Result<i64, ProtocolError> {
    as_i64(input)
}

/// Deserializes an unsigned 8-bit integer from any non-negative integer in
/// range.
pub fn deserialize_u8(input: &Value) -> Result<u8, ProtocolError> {
    u8::try_from(as_u64(input)?).map_err(|_| ProtocolError::Deserialization)
}

/// Deserializes an unsigned 16-bit integer from any non-negative integer in
/// range.
pub fn deserialize_u16(input: &Value) -> Result<u16, ProtocolError> {
    u16::try_from(as_u64(input)?).map_err(|_| ProtocolError::Deserialization)
}

/// Deserializes an unsigned 32-bit integer from any non-negative integer in
/// range.
pub fn deserialize_u32(input: &Value) -> Result<u32, ProtocolError> {
    u32::try_from(as_u64(input)?).map_err(|_| ProtocolError::Deserialization)
}

/// Deserializes an unsigned 64-bit integer from any non-negative integer.
pub fn deserialize_u64(input: &Value) -> Result<u64, ProtocolError> {
    as_u64(input)
}

/// Deserializes a 64-bit float. Widening from a 32-bit float is exact.
pub fn deserialize_f64(input: &Value) -> Result<f64, ProtocolError> {
    match input {
        Value::F32(n) => Ok(f64::from(*n)),
        Value::F64(n) => Ok(*n),
        _ => Err(ProtocolError::Deserialization),
    }
}

/// Deserializes a 32-bit float. Narrowing from a 64-bit float is a
/// standard-rounding cast without a range check.
pub fn deserialize_f32(input: &Value) -> Result<f32, ProtocolError> {
    match input {
        Value::F32(n) => Ok(*n),
        Value::F64(n) => Ok(*n as f32),
        _ => Err(ProtocolError::Deserialization),
    }
}
