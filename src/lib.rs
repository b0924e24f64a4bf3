//! graphfile - persistent graph storage over three memory-mapped files
//!
//! # Architecture
//!
//! A graph lives in three little-endian files:
//!
//! - **Node file**: 64-byte header plus fixed 32-byte node records
//! - **Edge file**: 64-byte header plus fixed 32-byte edge records
//! - **Data file**: 64-byte header plus variable-length payload entries,
//!   including the protobuf metadata entry that names the graph kind, its
//!   root and its operation wiring
//!
//! Commits append new content past the committed tails, sync it, and become
//! visible with a single header write per file.
//!
//! # Features
//!
//! - Zero-copy reads via mmap, or through an in-memory or tar archive provider
//! - Single-writer transactions with soft deletes and size-aware updates
//! - Defragmentation that reclaims soft-deleted records and payload holes
//! - Tree, decision-tree and expression-graph views over stored metadata

#![deny(clippy::all)]

// Core modules
pub mod constants;
pub mod error;
pub mod types;
pub mod util;

// Storage layer: codecs, mapped storage, format, data section
pub mod core;

// Stored views, transactions, maintenance
pub mod graph;

// Integrity checks
pub mod check;

// Specialized views
pub mod views;

// High-level API
pub mod api;

pub use api::{GraphMarshaller, OpenedGraph};
pub use crate::core::data::Payload;
pub use crate::core::metadata::GraphMetadata;
pub use crate::core::storage::{MappedStorage, MemoryProvider, StorageProvider};
#[cfg(not(target_arch = "wasm32"))]
pub use crate::core::storage::{ArchiveProvider, FileProvider};
pub use crate::core::value::Value;
pub use error::{FormatError, GraphError, Result};
pub use graph::{
  DataValue, GraphBuilder, GraphPaths, GraphStore, NodeHandle, StoreOptions, StoredGraph,
  SyncMode, Transaction, TypeRegistry,
};
pub use types::{DataType, GraphKind, NodeId, RecordFile};
pub use views::{Operations, StoredDecisionTree, StoredExpressionGraph, StoredTree};
