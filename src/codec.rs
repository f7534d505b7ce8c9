//! Register and JSON codecs
//!
//! Modbus devices expose big-endian 16-bit registers; HTTP devices expose
//! JSON documents. Both are turned into a typed [`Value`] according to the
//! [`DataKind`] a resource declares.

use crate::error::{GatewayError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared width/type of a device resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// Raw register block, returned as-is
    #[default]
    Raw,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
    Bool,
    String,
    /// JSON document (HTTP devices)
    Json,
}

impl DataKind {
    /// Registers needed to hold one value of this kind, if fixed
    pub fn register_width(self) -> Option<u16> {
        match self {
            DataKind::U16 | DataKind::I16 | DataKind::Bool => Some(1),
            DataKind::U32 | DataKind::I32 | DataKind::F32 => Some(2),
            DataKind::F64 => Some(4),
            DataKind::Raw | DataKind::String | DataKind::Json => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DataKind::U16
                | DataKind::I16
                | DataKind::U32
                | DataKind::I32
                | DataKind::F32
                | DataKind::F64
        )
    }
}

/// Typed payload produced by (or handed to) a device operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Writes without a payload in the response
    Unit,
    Bool(bool),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
    F64(f64),
    Text(String),
    Registers(Vec<u16>),
    Json(serde_json::Value),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "ok"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
            Value::Registers(regs) => {
                let parts: Vec<String> = regs.iter().map(|r| format!("0x{:04X}", r)).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Json(v) => write!(f, "{}", v),
        }
    }
}

impl Value {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::U16(v) => Some(f64::from(*v)),
            Value::I16(v) => Some(f64::from(*v)),
            Value::U32(v) => Some(f64::from(*v)),
            Value::I32(v) => Some(f64::from(*v)),
            Value::F32(v) => Some(f64::from(*v)),
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }
}

fn require(registers: &[u16], needed: usize, what: &str) -> Result<()> {
    if registers.len() < needed {
        return Err(GatewayError::decoding(format!(
            "Insufficient registers for {}: need {}, got {}",
            what,
            needed,
            registers.len()
        )));
    }
    Ok(())
}

fn be_bytes(registers: &[u16]) -> Vec<u8> {
    registers.iter().flat_map(|r| r.to_be_bytes()).collect()
}

/// Decode 32-bit unsigned integer from two 16-bit registers (big-endian)
pub fn decode_u32(registers: &[u16]) -> Result<u32> {
    require(registers, 2, "32-bit integer")?;
    Ok((u32::from(registers[0]) << 16) | u32::from(registers[1]))
}

/// Decode 32-bit float from two 16-bit registers (big-endian)
pub fn decode_32bit_float(registers: &[u16]) -> Result<f32> {
    require(registers, 2, "32-bit float")?;
    Ok(f32::from_bits(decode_u32(registers)?))
}

/// Decode 64-bit float from four 16-bit registers (big-endian)
pub fn decode_64bit_float(registers: &[u16]) -> Result<f64> {
    require(registers, 4, "64-bit float")?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&be_bytes(&registers[..4]));
    Ok(f64::from_be_bytes(bytes))
}

/// Decode string from registers
pub fn decode_string(registers: &[u16], max_length: Option<usize>) -> Result<String> {
    let string = String::from_utf8(be_bytes(registers))
        .map_err(|e| GatewayError::decoding(format!("Invalid UTF-8 string: {}", e)))?;

    // Remove null terminators and trailing whitespace
    let string = string.trim_matches('\0').trim();

    match max_length {
        Some(max_len) => Ok(string.chars().take(max_len).collect()),
        None => Ok(string.to_string()),
    }
}

/// Encode 32-bit float to two 16-bit registers (big-endian)
pub fn encode_32bit_float(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    [(bits >> 16) as u16, (bits & 0xFFFF) as u16]
}

/// Encode 64-bit float to four 16-bit registers (big-endian)
pub fn encode_64bit_float(value: f64) -> [u16; 4] {
    let b = value.to_be_bytes();
    [
        u16::from_be_bytes([b[0], b[1]]),
        u16::from_be_bytes([b[2], b[3]]),
        u16::from_be_bytes([b[4], b[5]]),
        u16::from_be_bytes([b[6], b[7]]),
    ]
}

/// Encode a string into `count` registers, NUL padded
pub fn encode_string(value: &str, count: u16) -> Result<Vec<u16>> {
    let capacity = usize::from(count) * 2;
    let bytes = value.as_bytes();
    if bytes.len() > capacity {
        return Err(GatewayError::invalid_request(format!(
            "String of {} bytes does not fit in {} registers",
            bytes.len(),
            count
        )));
    }
    let mut padded = bytes.to_vec();
    padded.resize(capacity, 0);
    Ok(padded
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect())
}

fn apply_scale(raw: f64, scale: Option<f64>) -> f64 {
    match scale {
        Some(s) => raw * s,
        None => raw,
    }
}

/// Decode a register block into a typed value
pub fn decode_registers(kind: DataKind, registers: &[u16], scale: Option<f64>) -> Result<Value> {
    let value = match kind {
        DataKind::Raw => return Ok(Value::Registers(registers.to_vec())),
        DataKind::U16 => {
            require(registers, 1, "16-bit integer")?;
            Value::U16(registers[0])
        }
        DataKind::I16 => {
            require(registers, 1, "16-bit integer")?;
            Value::I16(registers[0] as i16)
        }
        DataKind::Bool => {
            require(registers, 1, "bool")?;
            return Ok(Value::Bool(registers[0] != 0));
        }
        DataKind::U32 => Value::U32(decode_u32(registers)?),
        DataKind::I32 => Value::I32(decode_u32(registers)? as i32),
        DataKind::F32 => Value::F32(decode_32bit_float(registers)?),
        DataKind::F64 => Value::F64(decode_64bit_float(registers)?),
        DataKind::String => {
            return Ok(Value::Text(decode_string(registers, None)?));
        }
        DataKind::Json => {
            return Err(GatewayError::decoding(
                "JSON resources cannot be decoded from registers",
            ));
        }
    };
    match (scale, value.as_f64()) {
        (Some(_), Some(raw)) => Ok(Value::F64(apply_scale(raw, scale))),
        _ => Ok(value),
    }
}

fn unscale(value: f64, scale: Option<f64>) -> Result<f64> {
    match scale {
        Some(s) if s == 0.0 => Err(GatewayError::config("Resource scale must not be zero")),
        Some(s) => Ok(value / s),
        None => Ok(value),
    }
}

fn integer_in<T: TryFrom<i64>>(value: f64, what: &str) -> Result<T> {
    let rounded = value.round();
    if !rounded.is_finite() {
        return Err(GatewayError::invalid_request(format!(
            "Value {} is not a valid {}",
            value, what
        )));
    }
    T::try_from(rounded as i64)
        .map_err(|_| GatewayError::invalid_request(format!("Value {} out of range for {}", value, what)))
}

/// Encode a typed value into registers for a resource of `kind` spanning `count` registers
pub fn encode_registers(kind: DataKind, value: &Value, count: u16, scale: Option<f64>) -> Result<Vec<u16>> {
    if let Value::Registers(regs) = value {
        return Ok(regs.clone());
    }
    match kind {
        DataKind::Raw => Err(GatewayError::invalid_request(
            "Raw resources accept register arrays only",
        )),
        DataKind::Bool => match value {
            Value::Bool(b) => Ok(vec![u16::from(*b)]),
            other => match other.as_f64() {
                Some(v) => Ok(vec![u16::from(v != 0.0)]),
                None => Err(GatewayError::invalid_request("Expected a boolean value")),
            },
        },
        DataKind::String => match value {
            Value::Text(s) => encode_string(s, count),
            _ => Err(GatewayError::invalid_request("Expected a string value")),
        },
        DataKind::Json => Err(GatewayError::invalid_request(
            "JSON resources cannot be written as registers",
        )),
        numeric => {
            let raw = value
                .as_f64()
                .ok_or_else(|| GatewayError::invalid_request("Expected a numeric value"))?;
            let raw = unscale(raw, scale)?;
            match numeric {
                DataKind::U16 => Ok(vec![integer_in::<u16>(raw, "u16")?]),
                DataKind::I16 => Ok(vec![integer_in::<i16>(raw, "i16")? as u16]),
                DataKind::U32 => {
                    let v = integer_in::<u32>(raw, "u32")?;
                    Ok(vec![(v >> 16) as u16, (v & 0xFFFF) as u16])
                }
                DataKind::I32 => {
                    let v = integer_in::<i32>(raw, "i32")? as u32;
                    Ok(vec![(v >> 16) as u16, (v & 0xFFFF) as u16])
                }
                DataKind::F32 => Ok(encode_32bit_float(raw as f32).to_vec()),
                _ => Ok(encode_64bit_float(raw).to_vec()),
            }
        }
    }
}

/// Extract a typed value out of a JSON document
pub fn decode_json(
    kind: DataKind,
    document: &serde_json::Value,
    pointer: Option<&str>,
    scale: Option<f64>,
) -> Result<Value> {
    let node = match pointer {
        Some(p) => document.pointer(p).ok_or_else(|| {
            GatewayError::unknown_response(format!("Response has no field at '{}'", p))
        })?,
        None => document,
    };
    let mismatch = || {
        GatewayError::decoding(format!(
            "Expected {:?} but response field is {}",
            kind, node
        ))
    };
    match kind {
        DataKind::Json | DataKind::Raw => Ok(Value::Json(node.clone())),
        DataKind::Bool => node.as_bool().map(Value::Bool).ok_or_else(mismatch),
        DataKind::String => node
            .as_str()
            .map(|s| Value::Text(s.to_string()))
            .ok_or_else(mismatch),
        _ => {
            let number = node.as_f64().ok_or_else(mismatch)?;
            match scale {
                Some(_) => Ok(Value::F64(apply_scale(number, scale))),
                None => match kind {
                    DataKind::U16 => node
                        .as_u64()
                        .and_then(|v| u16::try_from(v).ok())
                        .map(Value::U16)
                        .ok_or_else(mismatch),
                    DataKind::I16 => node
                        .as_i64()
                        .and_then(|v| i16::try_from(v).ok())
                        .map(Value::I16)
                        .ok_or_else(mismatch),
                    DataKind::U32 => node
                        .as_u64()
                        .and_then(|v| u32::try_from(v).ok())
                        .map(Value::U32)
                        .ok_or_else(mismatch),
                    DataKind::I32 => node
                        .as_i64()
                        .and_then(|v| i32::try_from(v).ok())
                        .map(Value::I32)
                        .ok_or_else(mismatch),
                    DataKind::F32 => Ok(Value::F32(number as f32)),
                    _ => Ok(Value::F64(number)),
                },
            }
        }
    }
}

/// Turn a typed value into the JSON body sent to an HTTP device
pub fn encode_json(value: &Value, scale: Option<f64>) -> Result<serde_json::Value> {
    match value {
        Value::Json(v) => Ok(v.clone()),
        other => match (scale, other.as_f64()) {
            (Some(_), Some(raw)) => Ok(serde_json::json!(unscale(raw, scale)?)),
            _ => Ok(serde_json::to_value(other)?),
        },
    }
}

/// Parse a textual value (CLI argument, query string) for a resource kind
pub fn parse_value(kind: DataKind, text: &str) -> Result<Value> {
    let text = text.trim();
    let bad = |e: String| GatewayError::invalid_request(format!("Cannot parse '{}' as {:?}: {}", text, kind, e));
    match kind {
        DataKind::U16 => text.parse().map(Value::U16).map_err(|e| bad(e.to_string())),
        DataKind::I16 => text.parse().map(Value::I16).map_err(|e| bad(e.to_string())),
        DataKind::U32 => text.parse().map(Value::U32).map_err(|e| bad(e.to_string())),
        DataKind::I32 => text.parse().map(Value::I32).map_err(|e| bad(e.to_string())),
        DataKind::F32 => text.parse().map(Value::F32).map_err(|e| bad(e.to_string())),
        DataKind::F64 => text.parse().map(Value::F64).map_err(|e| bad(e.to_string())),
        DataKind::Bool => match text.to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "yes" => Ok(Value::Bool(true)),
            "0" | "false" | "off" | "no" => Ok(Value::Bool(false)),
            _ => Err(bad("expected true/false".to_string())),
        },
        DataKind::String => Ok(Value::Text(text.to_string())),
        DataKind::Json => serde_json::from_str(text)
            .map(Value::Json)
            .map_err(|e| bad(e.to_string())),
        DataKind::Raw => parse_register_list(text).map(Value::Registers),
    }
}

/// Interpret a JSON request body value for a resource kind
pub fn value_from_json(kind: DataKind, json: &serde_json::Value) -> Result<Value> {
    use serde_json::Value as Json;
    match (kind, json) {
        (DataKind::Json, doc) => Ok(Value::Json(doc.clone())),
        (_, Json::String(text)) => parse_value(kind, text),
        (_, Json::Number(n)) => parse_value(kind, &n.to_string()),
        (_, Json::Bool(b)) => Ok(Value::Bool(*b)),
        (_, Json::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|v| u16::try_from(v).ok())
                    .ok_or_else(|| {
                        GatewayError::invalid_request(format!("Invalid register value {}", item))
                    })
            })
            .collect::<Result<Vec<u16>>>()
            .map(Value::Registers),
        (_, other) => Err(GatewayError::invalid_request(format!(
            "Cannot use {} as a {:?} value",
            other, kind
        ))),
    }
}

/// Parse "1,2,0x10" or "1 2 16" into registers
pub fn parse_register_list(text: &str) -> Result<Vec<u16>> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(parse_register)
        .collect()
}

/// Parse a single register value, decimal or 0x-prefixed hex
pub fn parse_register(text: &str) -> Result<u16> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => text.parse::<u16>(),
    };
    parsed.map_err(|e| GatewayError::invalid_request(format!("Invalid register value '{}': {}", text, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_32bit_float() {
        let registers = [0x3F80, 0x0000]; // 1.0 in big-endian
        let result = decode_32bit_float(&registers).unwrap();
        assert!((result - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_decode_64bit_float() {
        let registers = [0x3FF0, 0x0000, 0x0000, 0x0000]; // 1.0 in big-endian
        let result = decode_64bit_float(&registers).unwrap();
        assert!((result - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_encode_32bit_float() {
        assert_eq!(encode_32bit_float(1.0f32), [0x3F80, 0x0000]);
    }

    #[test]
    fn test_decode_string() {
        let registers = [0x0041, 0x0042, 0x0043]; // "\0A\0B\0C"
        let result = decode_string(&registers, None).unwrap();
        assert_eq!(result.replace('\0', ""), "ABC");
    }

    #[test]
    fn test_decode_registers_signed_and_scaled() {
        assert_eq!(
            decode_registers(DataKind::I16, &[0xFFFE], None).unwrap(),
            Value::I16(-2)
        );
        assert_eq!(
            decode_registers(DataKind::U16, &[2305], Some(0.1)).unwrap(),
            Value::F64(2305.0 * 0.1)
        );
        assert_eq!(
            decode_registers(DataKind::I32, &[0xFFFF, 0xFFFF], None).unwrap(),
            Value::I32(-1)
        );
    }

    #[test]
    fn test_short_register_block_is_decoding_error() {
        let err = decode_registers(DataKind::F64, &[0, 0], None).unwrap_err();
        assert!(matches!(err, GatewayError::Decoding { .. }));
    }

    #[test]
    fn test_encode_scaled_u16() {
        let regs = encode_registers(DataKind::U16, &Value::F64(23.5), 1, Some(0.1)).unwrap();
        assert_eq!(regs, vec![235]);
    }

    #[test]
    fn test_encode_out_of_range_rejected() {
        let err = encode_registers(DataKind::U16, &Value::I32(-1), 1, None).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest { .. }));
    }

    #[test]
    fn test_encode_string_padding() {
        assert_eq!(encode_string("AB", 2).unwrap(), vec![0x4142, 0x0000]);
        assert!(encode_string("ABCDE", 2).is_err());
    }

    #[test]
    fn test_decode_json_pointer() {
        let doc = serde_json::json!({"data": {"temp": 21.5, "name": "attic"}});
        assert_eq!(
            decode_json(DataKind::F64, &doc, Some("/data/temp"), None).unwrap(),
            Value::F64(21.5)
        );
        let missing = decode_json(DataKind::F64, &doc, Some("/data/humidity"), None).unwrap_err();
        assert!(matches!(missing, GatewayError::UnknownResponse { .. }));
        let mismatch = decode_json(DataKind::F64, &doc, Some("/data/name"), None).unwrap_err();
        assert!(matches!(mismatch, GatewayError::Decoding { .. }));
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value(DataKind::U16, " 42 ").unwrap(), Value::U16(42));
        assert_eq!(parse_value(DataKind::Bool, "on").unwrap(), Value::Bool(true));
        assert_eq!(
            parse_value(DataKind::Raw, "1, 0x10 3").unwrap(),
            Value::Registers(vec![1, 16, 3])
        );
        assert!(parse_value(DataKind::I16, "40000").is_err());
    }

    #[test]
    fn json_bodies_follow_the_resource_kind() {
        use serde_json::json;
        assert_eq!(value_from_json(DataKind::U16, &json!(12)).unwrap(), Value::U16(12));
        assert_eq!(value_from_json(DataKind::F32, &json!("1.5")).unwrap(), Value::F32(1.5));
        assert_eq!(
            value_from_json(DataKind::Raw, &json!([1, 2])).unwrap(),
            Value::Registers(vec![1, 2])
        );
        assert_eq!(
            value_from_json(DataKind::Json, &json!({"a": 1})).unwrap(),
            Value::Json(json!({"a": 1}))
        );
        assert!(value_from_json(DataKind::Raw, &json!([70000])).is_err());
        assert!(value_from_json(DataKind::U16, &json!(null)).is_err());
    }
}
