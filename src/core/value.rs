//! Scalar and sequence payload values
//!
//! Fixed-width kinds are little-endian. Arrays and slices hold i64 elements
//! behind a u32 element count; an empty sequence is an empty payload.

use crate::error::{FormatError, Result};
use crate::types::DataType;
use crate::util::binary::{read_i64, read_u16, read_u32, read_u64, write_i64, write_u32};

/// A decoded non-protobuf payload
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Bytes(Vec<u8>),
  String(String),
  Int(i64),
  I8(i8),
  I16(i16),
  I32(i32),
  I64(i64),
  Uint(u64),
  U8(u8),
  U16(u16),
  U32(u32),
  U64(u64),
  F32(f32),
  F64(f64),
  Array(Vec<i64>),
  Slice(Vec<i64>),
}

impl Value {
  pub fn kind(&self) -> DataType {
    match self {
      Value::Bytes(_) => DataType::Bytes,
      Value::String(_) => DataType::String,
      Value::Int(_) => DataType::Int,
      Value::I8(_) => DataType::Int8,
      Value::I16(_) => DataType::Int16,
      Value::I32(_) => DataType::Int32,
      Value::I64(_) => DataType::Int64,
      Value::Uint(_) => DataType::Uint,
      Value::U8(_) => DataType::Uint8,
      Value::U16(_) => DataType::Uint16,
      Value::U32(_) => DataType::Uint32,
      Value::U64(_) => DataType::Uint64,
      Value::F32(_) => DataType::Float32,
      Value::F64(_) => DataType::Float64,
      Value::Array(_) => DataType::Array,
      Value::Slice(_) => DataType::Slice,
    }
  }

  pub fn encode(&self) -> (DataType, Vec<u8>) {
    let bytes = match self {
      Value::Bytes(v) => v.clone(),
      Value::String(v) => v.as_bytes().to_vec(),
      Value::Int(v) | Value::I64(v) => v.to_le_bytes().to_vec(),
      Value::I8(v) => v.to_le_bytes().to_vec(),
      Value::I16(v) => v.to_le_bytes().to_vec(),
      Value::I32(v) => v.to_le_bytes().to_vec(),
      Value::Uint(v) | Value::U64(v) => v.to_le_bytes().to_vec(),
      Value::U8(v) => vec![*v],
      Value::U16(v) => v.to_le_bytes().to_vec(),
      Value::U32(v) => v.to_le_bytes().to_vec(),
      Value::F32(v) => v.to_le_bytes().to_vec(),
      Value::F64(v) => v.to_le_bytes().to_vec(),
      Value::Array(items) | Value::Slice(items) => encode_sequence(items),
    };
    (self.kind(), bytes)
  }

  /// Decode `bytes` tagged `kind`; protobuf payloads are not values
  pub fn decode(kind: DataType, bytes: &[u8]) -> Result<Value> {
    if let Some(width) = kind.fixed_width() {
      if bytes.len() < width {
        return Err(
          FormatError::InvalidPayload(format!(
            "{kind:?} needs {width} bytes, got {}",
            bytes.len()
          ))
          .into(),
        );
      }
    }
    let value = match kind {
      DataType::Protobuf => {
        return Err(
          FormatError::InvalidPayload("protobuf payload needs a registered type".to_string())
            .into(),
        )
      }
      DataType::Bytes => Value::Bytes(bytes.to_vec()),
      DataType::String => Value::String(
        String::from_utf8(bytes.to_vec())
          .map_err(|_| FormatError::InvalidPayload("string payload is not UTF-8".to_string()))?,
      ),
      DataType::Int => Value::Int(read_i64(bytes, 0)),
      DataType::Int8 => Value::I8(bytes[0] as i8),
      DataType::Int16 => Value::I16(read_u16(bytes, 0) as i16),
      DataType::Int32 => Value::I32(read_u32(bytes, 0) as i32),
      DataType::Int64 => Value::I64(read_i64(bytes, 0)),
      DataType::Uint => Value::Uint(read_u64(bytes, 0)),
      DataType::Uint8 => Value::U8(bytes[0]),
      DataType::Uint16 => Value::U16(read_u16(bytes, 0)),
      DataType::Uint32 => Value::U32(read_u32(bytes, 0)),
      DataType::Uint64 => Value::U64(read_u64(bytes, 0)),
      DataType::Float32 => Value::F32(f32::from_bits(read_u32(bytes, 0))),
      DataType::Float64 => Value::F64(f64::from_bits(read_u64(bytes, 0))),
      DataType::Array => Value::Array(decode_sequence(bytes)?),
      DataType::Slice => Value::Slice(decode_sequence(bytes)?),
    };
    Ok(value)
  }

  /// Numeric view used for edge costs; non-numeric values have none
  pub fn as_f32(&self) -> Option<f32> {
    match self {
      Value::Int(v) | Value::I64(v) => Some(*v as f32),
      Value::I8(v) => Some(*v as f32),
      Value::I16(v) => Some(*v as f32),
      Value::I32(v) => Some(*v as f32),
      Value::Uint(v) | Value::U64(v) => Some(*v as f32),
      Value::U8(v) => Some(*v as f32),
      Value::U16(v) => Some(*v as f32),
      Value::U32(v) => Some(*v as f32),
      Value::F32(v) => Some(*v),
      Value::F64(v) => Some(*v as f32),
      _ => None,
    }
  }
}

fn encode_sequence(items: &[i64]) -> Vec<u8> {
  if items.is_empty() {
    return Vec::new();
  }
  let mut buf = vec![0u8; 4 + items.len() * 8];
  write_u32(&mut buf, 0, items.len() as u32);
  for (i, item) in items.iter().enumerate() {
    write_i64(&mut buf, 4 + i * 8, *item);
  }
  buf
}

fn decode_sequence(bytes: &[u8]) -> Result<Vec<i64>> {
  if bytes.is_empty() {
    return Ok(Vec::new());
  }
  if bytes.len() < 4 {
    return Err(FormatError::InvalidPayload("sequence length prefix truncated".to_string()).into());
  }
  let count = read_u32(bytes, 0) as usize;
  let needed = 4 + count * 8;
  if bytes.len() < needed {
    return Err(
      FormatError::InvalidPayload(format!(
        "sequence of {count} elements needs {needed} bytes, got {}",
        bytes.len()
      ))
      .into(),
    );
  }
  Ok((0..count).map(|i| read_i64(bytes, 4 + i * 8)).collect())
}

impl From<f32> for Value {
  fn from(value: f32) -> Self {
    Value::F32(value)
  }
}

impl From<f64> for Value {
  fn from(value: f64) -> Self {
    Value::F64(value)
  }
}

impl From<i64> for Value {
  fn from(value: i64) -> Self {
    Value::I64(value)
  }
}

impl From<&str> for Value {
  fn from(value: &str) -> Self {
    Value::String(value.to_string())
  }
}

impl From<String> for Value {
  fn from(value: String) -> Self {
    Value::String(value)
  }
}
