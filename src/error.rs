//! Error types for graph storage

use std::io;

use thiserror::Error;

use crate::types::NodeId;

/// Errors raised while decoding the on-disk format
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
  #[error("short buffer: need {needed} bytes, have {available}")]
  ShortBuffer { needed: usize, available: usize },

  #[error("bad magic for {file} file")]
  BadMagic { file: &'static str },

  #[error("unsupported version {found} (supported {supported})")]
  UnsupportedVersion { found: u32, supported: u32 },

  #[error("header checksum mismatch: stored {stored:#x}, computed {computed:#x}")]
  ChecksumMismatch { stored: u64, computed: u64 },

  #[error("truncated entry at offset {offset}: needs {needed} bytes, file has {size}")]
  TruncatedEntry { offset: u64, needed: u64, size: u64 },

  #[error("entry offset {offset} lies inside the data header")]
  OffsetInHeader { offset: u64 },

  #[error("unknown data type tag {0}")]
  UnknownTag(u8),

  #[error("record array truncated: {file} file needs {needed} bytes, has {size}")]
  TruncatedRecords {
    file: &'static str,
    needed: u64,
    size: u64,
  },

  #[error("invalid payload: {0}")]
  InvalidPayload(String),

  #[error("invalid metadata: {0}")]
  Metadata(String),
}

/// Main error type for graph storage operations
#[derive(Error, Debug)]
pub enum GraphError {
  #[error("format error: {0}")]
  Format(#[from] FormatError),

  #[error("storage error during {op}: {source}")]
  Storage {
    op: &'static str,
    #[source]
    source: io::Error,
  },

  #[error("storage is read-only: {0}")]
  ReadOnly(String),

  #[error("storage is closed")]
  Closed,

  #[error("node not found: {0}")]
  NodeNotFound(NodeId),

  #[error("edge not found: {from} -> {to}")]
  EdgeNotFound { from: NodeId, to: NodeId },

  #[error("edge index out of range: {0}")]
  EdgeIndexNotFound(usize),

  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  #[error("unregistered operation: {name}")]
  UnregisteredOperation { name: String },

  #[error("unregistered protobuf type: {0}")]
  UnregisteredType(String),

  #[error("transaction is closed")]
  ClosedTransaction,

  #[error("transaction already in progress")]
  TransactionInProgress,

  #[error("inconsistent state: {0}")]
  InconsistentState(String),

  #[error("no decision path for input {input_index}")]
  NoPath { input_index: usize },

  #[error("evaluation failed: {0}")]
  Evaluation(String),
}

impl GraphError {
  /// Wrap an I/O failure with the storage primitive that raised it
  pub fn storage(op: &'static str, source: io::Error) -> Self {
    GraphError::Storage { op, source }
  }
}

impl From<prost::DecodeError> for GraphError {
  fn from(err: prost::DecodeError) -> Self {
    GraphError::Format(FormatError::Metadata(err.to_string()))
  }
}

/// Result type alias for graph storage operations
pub type Result<T> = std::result::Result<T, GraphError>;
