//! Data section: variable-length tagged entries
//!
//! Entry layout: u32 payload length, u8 data-type tag, u16 type-name length,
//! type-name bytes, payload bytes.

use prost::Message;

use crate::constants::*;
use crate::core::storage::MappedStorage;
use crate::core::value::Value;
use crate::error::{FormatError, GraphError, Result};
use crate::types::DataType;
use crate::util::binary::{read_u16, read_u32, write_u16, write_u32};

// ============================================================================
// Payload
// ============================================================================

/// An entry payload together with its tag and type name
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
  pub kind: DataType,
  pub type_name: String,
  pub bytes: Vec<u8>,
}

impl Payload {
  pub fn new(kind: DataType, type_name: impl Into<String>, bytes: Vec<u8>) -> Self {
    Self {
      kind,
      type_name: type_name.into(),
      bytes,
    }
  }

  /// Raw bytes with no type name
  pub fn raw(bytes: Vec<u8>) -> Self {
    Self::new(DataType::Bytes, "", bytes)
  }

  /// Encode a scalar or sequence value with its natural tag
  pub fn value(value: Value) -> Self {
    let (kind, bytes) = value.encode();
    Self::new(kind, "", bytes)
  }

  /// Encode a protobuf message under `type_name`
  pub fn message<M: Message>(type_name: impl Into<String>, message: &M) -> Self {
    Self::new(DataType::Protobuf, type_name, message.encode_to_vec())
  }

  /// Decode a non-protobuf payload
  pub fn decode_value(&self) -> Result<Value> {
    Value::decode(self.kind, &self.bytes)
  }

  /// Decode a protobuf payload as `M`
  pub fn decode_message<M: Message + Default>(&self) -> Result<M> {
    if self.kind != DataType::Protobuf {
      return Err(GraphError::InvalidArgument(format!(
        "payload of kind {:?} is not a protobuf message",
        self.kind
      )));
    }
    M::decode(self.bytes.as_slice())
      .map_err(|e| FormatError::InvalidPayload(format!("{}: {e}", self.type_name)).into())
  }

  /// Entry size on disk, header included
  pub fn entry_len(&self) -> u64 {
    (ENTRY_HEADER_SIZE + self.type_name.len() + self.bytes.len()) as u64
  }

  /// Reject payloads the entry header cannot describe
  pub fn validate(&self) -> Result<()> {
    if self.type_name.len() > MAX_TYPE_NAME_LEN {
      return Err(GraphError::InvalidArgument(format!(
        "type name is {} bytes, limit is {MAX_TYPE_NAME_LEN}",
        self.type_name.len()
      )));
    }
    if self.bytes.len() as u64 > u32::MAX as u64 {
      return Err(GraphError::InvalidArgument(format!(
        "payload is {} bytes, limit is {}",
        self.bytes.len(),
        u32::MAX
      )));
    }
    Ok(())
  }
}

// ============================================================================
// Entry codec
// ============================================================================

/// Serialize a payload into its on-disk entry
pub fn encode_entry(payload: &Payload) -> Result<Vec<u8>> {
  payload.validate()?;
  let mut buf = vec![0u8; payload.entry_len() as usize];
  write_u32(&mut buf, 0, payload.bytes.len() as u32);
  buf[4] = payload.kind.tag();
  write_u16(&mut buf, 5, payload.type_name.len() as u16);
  let name_end = ENTRY_HEADER_SIZE + payload.type_name.len();
  buf[ENTRY_HEADER_SIZE..name_end].copy_from_slice(payload.type_name.as_bytes());
  buf[name_end..].copy_from_slice(&payload.bytes);
  Ok(buf)
}

struct EntryHeader {
  payload_len: u64,
  tag: u8,
  name_len: u64,
}

impl EntryHeader {
  fn total(&self) -> u64 {
    ENTRY_HEADER_SIZE as u64 + self.name_len + self.payload_len
  }
}

fn read_entry_header(storage: &dyn MappedStorage, offset: u64) -> Result<EntryHeader> {
  if offset < HEADER_SIZE as u64 {
    return Err(FormatError::OffsetInHeader { offset }.into());
  }
  let size = storage.size()?;
  let header_end = offset.saturating_add(ENTRY_HEADER_SIZE as u64);
  if header_end > size {
    return Err(
      FormatError::TruncatedEntry {
        offset,
        needed: ENTRY_HEADER_SIZE as u64,
        size,
      }
      .into(),
    );
  }
  let region = storage.map(offset, ENTRY_HEADER_SIZE as u64)?;
  let bytes = region.bytes();
  let header = EntryHeader {
    payload_len: read_u32(bytes, 0) as u64,
    tag: bytes[4],
    name_len: read_u16(bytes, 5) as u64,
  };
  if offset + header.total() > size {
    return Err(
      FormatError::TruncatedEntry {
        offset,
        needed: header.total(),
        size,
      }
      .into(),
    );
  }
  Ok(header)
}

/// Read and copy the entry at `offset`
pub fn read_entry(storage: &dyn MappedStorage, offset: u64) -> Result<Payload> {
  let header = read_entry_header(storage, offset)?;
  let kind = DataType::from_tag(header.tag)?;
  let region = storage.map(offset, header.total())?;
  let bytes = region.bytes();
  let name_end = ENTRY_HEADER_SIZE + header.name_len as usize;
  let type_name = std::str::from_utf8(&bytes[ENTRY_HEADER_SIZE..name_end])
    .map_err(|_| FormatError::InvalidPayload(format!("type name at {offset} is not UTF-8")))?
    .to_string();
  Ok(Payload {
    kind,
    type_name,
    bytes: bytes[name_end..].to_vec(),
  })
}

/// Total on-disk size of the entry at `offset`
pub fn entry_total_size(storage: &dyn MappedStorage, offset: u64) -> Result<u64> {
  Ok(read_entry_header(storage, offset)?.total())
}

/// Write an encoded entry at `tail`, growing the file; returns its offset
pub fn append_entry(storage: &dyn MappedStorage, tail: u64, entry: &[u8]) -> Result<u64> {
  let end = tail + entry.len() as u64;
  if storage.size()? < end {
    storage.grow(end)?;
  }
  storage.write_at(tail, entry)?;
  Ok(tail)
}

/// Rewrite an entry in place; the new entry must not be longer than the old one
pub fn overwrite_entry(storage: &dyn MappedStorage, offset: u64, entry: &[u8]) -> Result<()> {
  let existing = entry_total_size(storage, offset)?;
  if entry.len() as u64 > existing {
    return Err(GraphError::InvalidArgument(format!(
      "entry of {} bytes does not fit in {existing} bytes at offset {offset}",
      entry.len()
    )));
  }
  storage.write_at(offset, entry)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::codec::encode_data_header;
  use crate::core::storage::MemoryStorage;
  use crate::types::DataHeader;

  fn data_storage() -> MemoryStorage {
    MemoryStorage::from_bytes(encode_data_header(&DataHeader::default()).to_vec())
  }

  #[test]
  fn test_entry_layout() {
    let payload = Payload::new(DataType::String, "name", b"hello".to_vec());
    let entry = encode_entry(&payload).unwrap();
    assert_eq!(entry.len(), 7 + 4 + 5);
    assert_eq!(read_u32(&entry, 0), 5);
    assert_eq!(entry[4], 2);
    assert_eq!(read_u16(&entry, 5), 4);
    assert_eq!(&entry[7..11], b"name");
  }

  #[test]
  fn test_append_and_read() {
    let storage = data_storage();
    let payload = Payload::value(Value::F32(1.5));
    let offset = append_entry(&storage, 64, &encode_entry(&payload).unwrap()).unwrap();
    assert_eq!(offset, 64);
    let read = read_entry(&storage, offset).unwrap();
    assert_eq!(read.kind, DataType::Float32);
    assert_eq!(read.decode_value().unwrap(), Value::F32(1.5));
    assert_eq!(entry_total_size(&storage, offset).unwrap(), payload.entry_len());
  }

  #[test]
  fn test_truncated_entry() {
    let storage = data_storage();
    let entry = encode_entry(&Payload::raw(vec![1; 10])).unwrap();
    append_entry(&storage, 64, &entry[..12]).unwrap();
    assert!(matches!(
      read_entry(&storage, 64),
      Err(GraphError::Format(FormatError::TruncatedEntry { .. }))
    ));
    assert!(matches!(
      read_entry(&storage, 70),
      Err(GraphError::Format(FormatError::TruncatedEntry { .. }))
    ));
    assert!(matches!(
      read_entry(&storage, 8),
      Err(GraphError::Format(FormatError::OffsetInHeader { offset: 8 }))
    ));
  }

  #[test]
  fn test_unknown_tag() {
    let storage = data_storage();
    let mut entry = encode_entry(&Payload::raw(vec![1])).unwrap();
    entry[4] = 99;
    append_entry(&storage, 64, &entry).unwrap();
    assert!(matches!(
      read_entry(&storage, 64),
      Err(GraphError::Format(FormatError::UnknownTag(99)))
    ));
  }

  #[test]
  fn test_overwrite_in_place_only_when_it_fits() {
    let storage = data_storage();
    let long = encode_entry(&Payload::raw(vec![1; 8])).unwrap();
    append_entry(&storage, 64, &long).unwrap();
    let short = encode_entry(&Payload::raw(vec![2; 3])).unwrap();
    overwrite_entry(&storage, 64, &short).unwrap();
    assert_eq!(read_entry(&storage, 64).unwrap().bytes, vec![2; 3]);

    let longer = encode_entry(&Payload::raw(vec![3; 20])).unwrap();
    assert!(matches!(
      overwrite_entry(&storage, 64, &longer),
      Err(GraphError::InvalidArgument(_))
    ));
  }

  #[test]
  fn test_oversized_type_name_rejected() {
    let payload = Payload::new(DataType::Bytes, "x".repeat(MAX_TYPE_NAME_LEN + 1), vec![]);
    assert!(matches!(
      encode_entry(&payload),
      Err(GraphError::InvalidArgument(_))
    ));
  }
}
