//! Core type definitions shared by the codec, format and graph layers

use bitflags::bitflags;

use crate::constants::*;
use crate::error::{FormatError, Result};

/// Node identifier
pub type NodeId = i64;

// ============================================================================
// Graph kind
// ============================================================================

/// Specialized role a stored graph was written with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum GraphKind {
  #[default]
  Generic = 0,
  Tree = 1,
  DecisionTree = 2,
  ExpressionGraph = 3,
}

impl GraphKind {
  /// Decode the kind byte; unknown values fall back to generic
  pub fn from_byte(value: u8) -> Self {
    match value {
      1 => GraphKind::Tree,
      2 => GraphKind::DecisionTree,
      3 => GraphKind::ExpressionGraph,
      _ => GraphKind::Generic,
    }
  }

  pub fn as_byte(self) -> u8 {
    self as u8
  }

  pub fn name(self) -> &'static str {
    match self {
      GraphKind::Generic => "generic",
      GraphKind::Tree => "tree",
      GraphKind::DecisionTree => "decision_tree",
      GraphKind::ExpressionGraph => "expression_graph",
    }
  }
}

// ============================================================================
// Data type tags
// ============================================================================

/// Serialization kind of a data entry payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
  Protobuf = 0,
  Bytes = 1,
  String = 2,
  Int = 3,
  Int8 = 4,
  Int16 = 5,
  Int32 = 6,
  Int64 = 7,
  Uint = 8,
  Uint8 = 9,
  Uint16 = 10,
  Uint32 = 11,
  Uint64 = 12,
  Float32 = 13,
  Float64 = 14,
  Array = 15,
  Slice = 16,
}

impl DataType {
  pub fn from_tag(tag: u8) -> Result<Self> {
    let kind = match tag {
      0 => DataType::Protobuf,
      1 => DataType::Bytes,
      2 => DataType::String,
      3 => DataType::Int,
      4 => DataType::Int8,
      5 => DataType::Int16,
      6 => DataType::Int32,
      7 => DataType::Int64,
      8 => DataType::Uint,
      9 => DataType::Uint8,
      10 => DataType::Uint16,
      11 => DataType::Uint32,
      12 => DataType::Uint64,
      13 => DataType::Float32,
      14 => DataType::Float64,
      15 => DataType::Array,
      16 => DataType::Slice,
      other => return Err(FormatError::UnknownTag(other).into()),
    };
    Ok(kind)
  }

  pub fn tag(self) -> u8 {
    self as u8
  }

  /// Fixed payload width for scalar kinds
  pub fn fixed_width(self) -> Option<usize> {
    match self {
      DataType::Int8 | DataType::Uint8 => Some(1),
      DataType::Int16 | DataType::Uint16 => Some(2),
      DataType::Int32 | DataType::Uint32 | DataType::Float32 => Some(4),
      DataType::Int
      | DataType::Int64
      | DataType::Uint
      | DataType::Uint64
      | DataType::Float64 => Some(8),
      _ => None,
    }
  }
}

// ============================================================================
// Record flags
// ============================================================================

bitflags! {
  /// Flags byte carried by node and edge records
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
  pub struct RecordFlags: u8 {
    const DELETED = 0x01;
    const ACTIVE = 0x02;
  }
}

impl RecordFlags {
  /// A record is live unless it carries the deleted bit (no bits at all still reads as live)
  pub fn is_live(self) -> bool {
    !self.contains(RecordFlags::DELETED)
  }

  /// Flags for a soft-deleted record
  pub fn deleted() -> Self {
    RecordFlags::DELETED
  }
}

// ============================================================================
// Records
// ============================================================================

/// Fixed 32-byte node record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
  pub id: NodeId,
  pub data_offset: u64,
  pub flags: RecordFlags,
  pub reserved: [u8; NODE_RECORD_RESERVED_SIZE],
}

impl NodeRecord {
  pub fn new(id: NodeId, data_offset: u64) -> Self {
    Self {
      id,
      data_offset,
      flags: RecordFlags::ACTIVE,
      reserved: [0; NODE_RECORD_RESERVED_SIZE],
    }
  }

  pub fn is_live(&self) -> bool {
    self.flags.is_live()
  }
}

/// Fixed 32-byte edge record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRecord {
  pub from: NodeId,
  pub to: NodeId,
  pub data_offset: u32,
  pub flags: RecordFlags,
  pub reserved: [u8; EDGE_RECORD_RESERVED_SIZE],
}

impl EdgeRecord {
  pub fn new(from: NodeId, to: NodeId, data_offset: u32) -> Self {
    Self {
      from,
      to,
      data_offset,
      flags: RecordFlags::ACTIVE,
      reserved: [0; EDGE_RECORD_RESERVED_SIZE],
    }
  }

  pub fn is_live(&self) -> bool {
    self.flags.is_live()
  }
}

// ============================================================================
// Headers
// ============================================================================

/// Which record file a header belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFile {
  Nodes,
  Edges,
}

impl RecordFile {
  pub fn magic(self) -> [u8; 8] {
    match self {
      RecordFile::Nodes => MAGIC_NODES,
      RecordFile::Edges => MAGIC_EDGES,
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      RecordFile::Nodes => "node",
      RecordFile::Edges => "edge",
    }
  }
}

/// Header shared by the node and edge files
///
/// `count` is NodeCount or EdgeCount depending on the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
  pub version: u32,
  pub max_id: i64,
  pub count: u64,
  pub data_file_offset: u64,
  pub checksum: u64,
  pub reserved: [u8; HEADER_RESERVED_SIZE],
}

impl RecordHeader {
  pub fn new(kind: GraphKind) -> Self {
    let mut reserved = [0; HEADER_RESERVED_SIZE];
    reserved[0] = kind.as_byte();
    Self {
      version: FORMAT_VERSION,
      max_id: 0,
      count: 0,
      data_file_offset: 0,
      checksum: 0,
      reserved,
    }
  }

  pub fn kind(&self) -> GraphKind {
    GraphKind::from_byte(self.reserved[0])
  }

  pub fn set_kind(&mut self, kind: GraphKind) {
    self.reserved[0] = kind.as_byte();
  }
}

/// Header of the data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataHeader {
  pub version: u32,
  pub entry_count: u64,
  pub reserved: [u8; DATA_HEADER_RESERVED_SIZE],
}

impl Default for DataHeader {
  fn default() -> Self {
    Self {
      version: FORMAT_VERSION,
      entry_count: 0,
      reserved: [0; DATA_HEADER_RESERVED_SIZE],
    }
  }
}

/// Result of an integrity check
#[derive(Debug, Clone, Default)]
pub struct CheckResult {
  pub valid: bool,
  pub errors: Vec<String>,
  pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_flags_without_bits_read_as_live() {
    assert!(RecordFlags::empty().is_live());
    assert!(RecordFlags::ACTIVE.is_live());
    assert!(!RecordFlags::DELETED.is_live());
    assert!(!(RecordFlags::DELETED | RecordFlags::ACTIVE).is_live());
  }

  #[test]
  fn test_unknown_kind_byte_is_generic() {
    assert_eq!(GraphKind::from_byte(2), GraphKind::DecisionTree);
    assert_eq!(GraphKind::from_byte(42), GraphKind::Generic);
  }

  #[test]
  fn test_unknown_tag_is_format_error() {
    assert_eq!(DataType::from_tag(13).unwrap(), DataType::Float32);
    assert!(DataType::from_tag(17).is_err());
  }
}
