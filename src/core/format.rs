//! Format layer: headers and record arrays over a storage handle
//!
//! Records start right after the 64-byte header, 32 bytes each. The committed
//! extent of the node array is the leading run of records whose id is
//! non-zero and no greater than MaxID; bytes past it are leftovers of an
//! interrupted commit. The edge array extent is the edge MaxID, since an edge
//! id is its 1-based position.

use crate::constants::*;
use crate::core::codec::{
  decode_data_header, decode_edge_record, decode_header, decode_node_record, encode_data_header,
  encode_header,
};
use crate::core::storage::{MappedStorage, Region};
use crate::error::{FormatError, GraphError, Result};
use crate::types::{DataHeader, EdgeRecord, NodeRecord, RecordFile, RecordHeader};
use crate::util::binary::read_i64;

/// Header plus the committed record array of a node or edge file
#[derive(Debug, Clone)]
pub struct RecordSection {
  pub file: RecordFile,
  pub header: RecordHeader,
  pub records: Region,
  /// Number of physical records (live and soft-deleted)
  pub len: usize,
}

impl RecordSection {
  fn record_bytes(&self, index: usize) -> Result<&[u8]> {
    if index >= self.len {
      return Err(GraphError::InvalidArgument(format!(
        "{} record index {index} out of range ({} records)",
        self.file.name(),
        self.len
      )));
    }
    let start = index * NODE_RECORD_SIZE;
    Ok(&self.records.bytes()[start..start + NODE_RECORD_SIZE])
  }

  pub fn node(&self, index: usize) -> Result<NodeRecord> {
    decode_node_record(self.record_bytes(index)?)
  }

  pub fn edge(&self, index: usize) -> Result<EdgeRecord> {
    decode_edge_record(self.record_bytes(index)?)
  }

  /// Byte offset just past the last committed record
  pub fn tail(&self) -> u64 {
    record_offset(self.len)
  }
}

/// Absolute offset of record `index`
pub fn record_offset(index: usize) -> u64 {
  (HEADER_SIZE + index * NODE_RECORD_SIZE) as u64
}

fn read_record_header(storage: &dyn MappedStorage, file: RecordFile) -> Result<RecordHeader> {
  let size = storage.size()?;
  if size < HEADER_SIZE as u64 {
    return Err(
      FormatError::ShortBuffer {
        needed: HEADER_SIZE,
        available: size as usize,
      }
      .into(),
    );
  }
  let region = storage.map(0, HEADER_SIZE as u64)?;
  decode_header(file, region.bytes())
}

/// Open the node file: validate the header and locate the committed records
pub fn open_node_file(storage: &dyn MappedStorage) -> Result<RecordSection> {
  let header = read_record_header(storage, RecordFile::Nodes)?;
  let size = storage.size()?;
  let physical = ((size - HEADER_SIZE as u64) / NODE_RECORD_SIZE as u64) as usize;
  if physical == 0 {
    return Ok(RecordSection {
      file: RecordFile::Nodes,
      header,
      records: Region::empty(),
      len: 0,
    });
  }

  let all = storage.map(HEADER_SIZE as u64, (physical * NODE_RECORD_SIZE) as u64)?;
  let bytes = all.bytes();
  let len = (0..physical)
    .take_while(|&i| {
      let id = read_i64(bytes, i * NODE_RECORD_SIZE);
      id != 0 && id <= header.max_id
    })
    .count();

  Ok(RecordSection {
    file: RecordFile::Nodes,
    header,
    records: all.slice(0, len * NODE_RECORD_SIZE),
    len,
  })
}

/// Open the edge file: validate the header and map `MaxID` records
pub fn open_edge_file(storage: &dyn MappedStorage) -> Result<RecordSection> {
  let header = read_record_header(storage, RecordFile::Edges)?;
  if header.max_id < 0 {
    return Err(FormatError::Metadata(format!("negative edge MaxID {}", header.max_id)).into());
  }
  let len = header.max_id as usize;
  let needed = record_offset(len);
  let size = storage.size()?;
  if needed > size {
    return Err(
      FormatError::TruncatedRecords {
        file: "edge",
        needed,
        size,
      }
      .into(),
    );
  }
  let records = if len == 0 {
    Region::empty()
  } else {
    storage.map(HEADER_SIZE as u64, (len * EDGE_RECORD_SIZE) as u64)?
  };
  Ok(RecordSection {
    file: RecordFile::Edges,
    header,
    records,
    len,
  })
}

/// Open the data file header
pub fn open_data_file(storage: &dyn MappedStorage) -> Result<DataHeader> {
  let size = storage.size()?;
  if size < HEADER_SIZE as u64 {
    return Err(
      FormatError::ShortBuffer {
        needed: HEADER_SIZE,
        available: size as usize,
      }
      .into(),
    );
  }
  let region = storage.map(0, HEADER_SIZE as u64)?;
  decode_data_header(region.bytes())
}

/// Read node record `index` straight from storage
pub fn read_node_record(storage: &dyn MappedStorage, index: usize) -> Result<NodeRecord> {
  let region = storage.map(record_offset(index), NODE_RECORD_SIZE as u64)?;
  decode_node_record(region.bytes())
}

/// Read edge record `index` straight from storage
pub fn read_edge_record(storage: &dyn MappedStorage, index: usize) -> Result<EdgeRecord> {
  let region = storage.map(record_offset(index), EDGE_RECORD_SIZE as u64)?;
  decode_edge_record(region.bytes())
}

/// Overwrite the 64-byte prefix with a node or edge header in one write
pub fn write_header(
  storage: &dyn MappedStorage,
  file: RecordFile,
  header: &RecordHeader,
  sync: bool,
) -> Result<()> {
  storage.write_at(0, &encode_header(file, header))?;
  if sync {
    storage.sync()?;
  }
  Ok(())
}

/// Overwrite the 64-byte prefix of the data file
pub fn write_data_header(storage: &dyn MappedStorage, header: &DataHeader, sync: bool) -> Result<()> {
  storage.write_at(0, &encode_data_header(header))?;
  if sync {
    storage.sync()?;
  }
  Ok(())
}

/// Write pre-encoded records contiguously starting at record `first`, growing as needed
pub fn append_records(
  storage: &dyn MappedStorage,
  first: usize,
  records: &[[u8; NODE_RECORD_SIZE]],
) -> Result<()> {
  if records.is_empty() {
    return Ok(());
  }
  let start = record_offset(first);
  let end = record_offset(first + records.len());
  if storage.size()? < end {
    storage.grow(end)?;
  }
  let bytes: Vec<u8> = records.iter().flatten().copied().collect();
  storage.write_at(start, &bytes)
}

/// Rewrite record `index` in place
pub fn write_record(
  storage: &dyn MappedStorage,
  index: usize,
  record: &[u8; NODE_RECORD_SIZE],
) -> Result<()> {
  storage.write_at(record_offset(index), record)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::codec::{encode_edge_record, encode_node_header, encode_node_record};
  use crate::core::storage::MemoryStorage;
  use crate::types::GraphKind;

  fn node_file(max_id: i64, ids: &[i64], garbage: usize) -> MemoryStorage {
    let mut header = RecordHeader::new(GraphKind::Generic);
    header.max_id = max_id;
    header.count = ids.len() as u64;
    let mut bytes = encode_node_header(&header).to_vec();
    for id in ids {
      bytes.extend_from_slice(&encode_node_record(&NodeRecord::new(*id, 0)));
    }
    bytes.extend(std::iter::repeat(0u8).take(garbage));
    MemoryStorage::from_bytes(bytes)
  }

  #[test]
  fn test_open_node_file_reads_records() {
    let storage = node_file(3, &[1, 2, 3], 0);
    let section = open_node_file(&storage).unwrap();
    assert_eq!(section.len, 3);
    assert_eq!(section.node(2).unwrap().id, 3);
    assert_eq!(section.tail(), 64 + 3 * 32);
    assert!(section.node(3).is_err());
  }

  #[test]
  fn test_uncommitted_tail_is_ignored() {
    // a grown-but-unflipped commit leaves zeroed or above-MaxID records behind
    let storage = node_file(2, &[1, 2, 3], 64);
    let section = open_node_file(&storage).unwrap();
    assert_eq!(section.len, 2);
  }

  #[test]
  fn test_empty_and_short_files() {
    let storage = MemoryStorage::new();
    assert!(matches!(
      open_node_file(&storage),
      Err(GraphError::Format(FormatError::ShortBuffer { .. }))
    ));
    let storage = node_file(0, &[], 0);
    assert_eq!(open_node_file(&storage).unwrap().len, 0);
  }

  #[test]
  fn test_edge_file_must_hold_max_id_records() {
    let mut header = RecordHeader::new(GraphKind::Generic);
    header.max_id = 2;
    header.count = 2;
    let mut bytes = encode_header(RecordFile::Edges, &header).to_vec();
    bytes.extend_from_slice(&encode_edge_record(&EdgeRecord::new(1, 2, 0)));
    let storage = MemoryStorage::from_bytes(bytes.clone());
    assert!(matches!(
      open_edge_file(&storage),
      Err(GraphError::Format(FormatError::TruncatedRecords { .. }))
    ));

    bytes.extend_from_slice(&encode_edge_record(&EdgeRecord::new(2, 3, 0)));
    let storage = MemoryStorage::from_bytes(bytes);
    let section = open_edge_file(&storage).unwrap();
    assert_eq!(section.edge(1).unwrap().to, 3);
    assert_eq!(read_edge_record(&storage, 0).unwrap().from, 1);
  }

  #[test]
  fn test_append_then_rewrite_record() {
    let storage = node_file(1, &[1], 0);
    let appended = [encode_node_record(&NodeRecord::new(2, 99))];
    append_records(&storage, 1, &appended).unwrap();
    assert_eq!(storage.size().unwrap(), 64 + 2 * 32);
    assert_eq!(read_node_record(&storage, 1).unwrap().data_offset, 99);

    let mut record = read_node_record(&storage, 0).unwrap();
    record.data_offset = 7;
    write_record(&storage, 0, &encode_node_record(&record)).unwrap();
    assert_eq!(read_node_record(&storage, 0).unwrap().data_offset, 7);
  }
}
