//! Byte codec for headers and records
//!
//! Everything is little-endian and fixed width. No I/O happens here.

use crate::constants::*;
use crate::error::{FormatError, Result};
use crate::types::{
  DataHeader, EdgeRecord, NodeRecord, RecordFile, RecordFlags, RecordHeader,
};
use crate::util::binary::{read_i64, read_u32, read_u64, write_i64, write_u32, write_u64};

// ============================================================================
// Checksum
// ============================================================================

/// Wrapping sum of every header byte, with the checksum field read as zero
pub fn header_checksum(bytes: &[u8; HEADER_SIZE]) -> u64 {
  bytes
    .iter()
    .enumerate()
    .filter(|(i, _)| !(OFFSET_CHECKSUM..OFFSET_CHECKSUM + 8).contains(i))
    .fold(0u64, |acc, (_, b)| acc.wrapping_add(*b as u64))
}

fn ensure_len(buf: &[u8], needed: usize) -> Result<()> {
  if buf.len() < needed {
    return Err(
      FormatError::ShortBuffer {
        needed,
        available: buf.len(),
      }
      .into(),
    );
  }
  Ok(())
}

fn check_version(found: u32) -> Result<()> {
  if found != FORMAT_VERSION {
    return Err(
      FormatError::UnsupportedVersion {
        found,
        supported: FORMAT_VERSION,
      }
      .into(),
    );
  }
  Ok(())
}

// ============================================================================
// Node / edge headers
// ============================================================================

/// Encode a record-file header, filling in its checksum
fn encode_record_header(file: RecordFile, header: &RecordHeader) -> [u8; HEADER_SIZE] {
  let mut buf = [0u8; HEADER_SIZE];
  buf[OFFSET_MAGIC..OFFSET_MAGIC + 8].copy_from_slice(&file.magic());
  write_u32(&mut buf, OFFSET_VERSION, header.version);
  write_i64(&mut buf, OFFSET_MAX_ID, header.max_id);
  write_u64(&mut buf, OFFSET_COUNT, header.count);
  write_u64(&mut buf, OFFSET_DATA_FILE_OFFSET, header.data_file_offset);
  buf[OFFSET_RESERVED..].copy_from_slice(&header.reserved);
  let checksum = header_checksum(&buf);
  write_u64(&mut buf, OFFSET_CHECKSUM, checksum);
  buf
}

fn decode_record_header(file: RecordFile, buf: &[u8]) -> Result<RecordHeader> {
  ensure_len(buf, HEADER_SIZE)?;
  if buf[OFFSET_MAGIC..OFFSET_MAGIC + 8] != file.magic() {
    return Err(FormatError::BadMagic { file: file.name() }.into());
  }
  let version = read_u32(buf, OFFSET_VERSION);
  check_version(version)?;

  let mut bytes = [0u8; HEADER_SIZE];
  bytes.copy_from_slice(&buf[..HEADER_SIZE]);
  let stored = read_u64(buf, OFFSET_CHECKSUM);
  let computed = header_checksum(&bytes);
  if stored != computed {
    return Err(FormatError::ChecksumMismatch { stored, computed }.into());
  }

  let mut reserved = [0u8; HEADER_RESERVED_SIZE];
  reserved.copy_from_slice(&buf[OFFSET_RESERVED..HEADER_SIZE]);
  Ok(RecordHeader {
    version,
    max_id: read_i64(buf, OFFSET_MAX_ID),
    count: read_u64(buf, OFFSET_COUNT),
    data_file_offset: read_u64(buf, OFFSET_DATA_FILE_OFFSET),
    checksum: stored,
    reserved,
  })
}

pub fn encode_node_header(header: &RecordHeader) -> [u8; HEADER_SIZE] {
  encode_record_header(RecordFile::Nodes, header)
}

pub fn encode_edge_header(header: &RecordHeader) -> [u8; HEADER_SIZE] {
  encode_record_header(RecordFile::Edges, header)
}

pub fn decode_node_header(buf: &[u8]) -> Result<RecordHeader> {
  decode_record_header(RecordFile::Nodes, buf)
}

pub fn decode_edge_header(buf: &[u8]) -> Result<RecordHeader> {
  decode_record_header(RecordFile::Edges, buf)
}

/// Encode either record-file header by role
pub fn encode_header(file: RecordFile, header: &RecordHeader) -> [u8; HEADER_SIZE] {
  encode_record_header(file, header)
}

/// Decode either record-file header by role
pub fn decode_header(file: RecordFile, buf: &[u8]) -> Result<RecordHeader> {
  decode_record_header(file, buf)
}

// ============================================================================
// Data header
// ============================================================================

pub fn encode_data_header(header: &DataHeader) -> [u8; HEADER_SIZE] {
  let mut buf = [0u8; HEADER_SIZE];
  buf[0..8].copy_from_slice(&MAGIC_DATA);
  write_u32(&mut buf, 8, header.version);
  write_u64(&mut buf, 12, header.entry_count);
  buf[20..].copy_from_slice(&header.reserved);
  buf
}

pub fn decode_data_header(buf: &[u8]) -> Result<DataHeader> {
  ensure_len(buf, HEADER_SIZE)?;
  if buf[0..8] != MAGIC_DATA {
    return Err(FormatError::BadMagic { file: "data" }.into());
  }
  let version = read_u32(buf, 8);
  check_version(version)?;
  let mut reserved = [0u8; DATA_HEADER_RESERVED_SIZE];
  reserved.copy_from_slice(&buf[20..HEADER_SIZE]);
  Ok(DataHeader {
    version,
    entry_count: read_u64(buf, 12),
    reserved,
  })
}

// ============================================================================
// Records
// ============================================================================

pub fn encode_node_record(record: &NodeRecord) -> [u8; NODE_RECORD_SIZE] {
  let mut buf = [0u8; NODE_RECORD_SIZE];
  write_i64(&mut buf, 0, record.id);
  write_u64(&mut buf, 8, record.data_offset);
  buf[16] = record.flags.bits();
  buf[17..].copy_from_slice(&record.reserved);
  buf
}

pub fn decode_node_record(buf: &[u8]) -> Result<NodeRecord> {
  ensure_len(buf, NODE_RECORD_SIZE)?;
  let mut reserved = [0u8; NODE_RECORD_RESERVED_SIZE];
  reserved.copy_from_slice(&buf[17..NODE_RECORD_SIZE]);
  Ok(NodeRecord {
    id: read_i64(buf, 0),
    data_offset: read_u64(buf, 8),
    flags: RecordFlags::from_bits_retain(buf[16]),
    reserved,
  })
}

pub fn encode_edge_record(record: &EdgeRecord) -> [u8; EDGE_RECORD_SIZE] {
  let mut buf = [0u8; EDGE_RECORD_SIZE];
  write_i64(&mut buf, 0, record.from);
  write_i64(&mut buf, 8, record.to);
  write_u32(&mut buf, 16, record.data_offset);
  buf[20] = record.flags.bits();
  buf[21..].copy_from_slice(&record.reserved);
  buf
}

pub fn decode_edge_record(buf: &[u8]) -> Result<EdgeRecord> {
  ensure_len(buf, EDGE_RECORD_SIZE)?;
  let mut reserved = [0u8; EDGE_RECORD_RESERVED_SIZE];
  reserved.copy_from_slice(&buf[21..EDGE_RECORD_SIZE]);
  Ok(EdgeRecord {
    from: read_i64(buf, 0),
    to: read_i64(buf, 8),
    data_offset: read_u32(buf, 16),
    flags: RecordFlags::from_bits_retain(buf[20]),
    reserved,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::GraphError;
  use crate::types::GraphKind;

  fn sample_header() -> RecordHeader {
    let mut header = RecordHeader::new(GraphKind::DecisionTree);
    header.max_id = 3;
    header.count = 3;
    header.data_file_offset = 120;
    header
  }

  #[test]
  fn test_node_header_layout() {
    let bytes = encode_node_header(&sample_header());
    assert_eq!(&bytes[0..8], b"GRAPHND1");
    assert_eq!(read_u32(&bytes, 8), 1);
    assert_eq!(read_i64(&bytes, 12), 3);
    assert_eq!(read_u64(&bytes, 28), 120);
    assert_eq!(bytes[44], GraphKind::DecisionTree.as_byte());
    assert!(bytes[45..].iter().all(|b| *b == 0));
    assert_eq!(read_u64(&bytes, 36), header_checksum(&bytes));

    let decoded = decode_node_header(&bytes).unwrap();
    assert_eq!(decoded.kind(), GraphKind::DecisionTree);
    assert_eq!(decoded.max_id, 3);
  }

  #[test]
  fn test_checksum_ignores_its_own_field() {
    let mut bytes = encode_edge_header(&sample_header());
    let before = header_checksum(&bytes);
    bytes[36..44].copy_from_slice(&[0xff; 8]);
    assert_eq!(header_checksum(&bytes), before);
  }

  #[test]
  fn test_short_buffer() {
    let err = decode_node_header(&[0u8; 10]).unwrap_err();
    assert!(matches!(
      err,
      GraphError::Format(FormatError::ShortBuffer { needed: 64, .. })
    ));
  }

  #[test]
  fn test_magic_is_role_specific() {
    let bytes = encode_edge_header(&sample_header());
    let err = decode_node_header(&bytes).unwrap_err();
    assert!(matches!(
      err,
      GraphError::Format(FormatError::BadMagic { file: "node" })
    ));
  }

  #[test]
  fn test_unsupported_version() {
    let mut header = sample_header();
    header.version = 2;
    let bytes = encode_node_header(&header);
    let err = decode_node_header(&bytes).unwrap_err();
    assert!(matches!(
      err,
      GraphError::Format(FormatError::UnsupportedVersion { found: 2, .. })
    ));
  }

  #[test]
  fn test_corrupted_header_fails_checksum() {
    let mut bytes = encode_node_header(&sample_header());
    bytes[20] ^= 0x01;
    let err = decode_node_header(&bytes).unwrap_err();
    assert!(matches!(
      err,
      GraphError::Format(FormatError::ChecksumMismatch { .. })
    ));
  }

  #[test]
  fn test_reserved_bytes_survive_read_modify_write() {
    let mut header = sample_header();
    header.reserved[7] = 0xab;
    let mut decoded = decode_node_header(&encode_node_header(&header)).unwrap();
    decoded.count = 2;
    let again = decode_node_header(&encode_node_header(&decoded)).unwrap();
    assert_eq!(again.reserved[7], 0xab);
  }

  #[test]
  fn test_record_layouts() {
    let node = NodeRecord::new(7, 64);
    let bytes = encode_node_record(&node);
    assert_eq!(read_i64(&bytes, 0), 7);
    assert_eq!(bytes[16], RecordFlags::ACTIVE.bits());
    assert_eq!(decode_node_record(&bytes).unwrap(), node);

    let mut edge = EdgeRecord::new(1, 2, 71);
    edge.flags = RecordFlags::DELETED;
    let bytes = encode_edge_record(&edge);
    assert_eq!(read_u32(&bytes, 16), 71);
    assert_eq!(bytes[20], 0x01);
    assert!(!decode_edge_record(&bytes).unwrap().is_live());
  }

  #[test]
  fn test_data_header_layout() {
    let header = DataHeader {
      entry_count: 5,
      ..DataHeader::default()
    };
    let bytes = encode_data_header(&header);
    assert_eq!(&bytes[0..8], b"GRAPHDT1");
    assert_eq!(read_u64(&bytes, 12), 5);
    assert_eq!(decode_data_header(&bytes).unwrap(), header);
  }
}
