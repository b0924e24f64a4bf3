//! Mapped storage capability
//!
//! A storage handle exposes read-only mapped regions of a byte range, plus
//! optional growth, positional writes and durability for writable backends.

#[cfg(not(target_arch = "wasm32"))]
pub mod archive;
#[cfg(not(target_arch = "wasm32"))]
pub mod file;
pub mod memory;

use std::fmt;
use std::sync::Arc;

#[cfg(not(target_arch = "wasm32"))]
use memmap2::Mmap;

use crate::error::{GraphError, Result};

#[cfg(not(target_arch = "wasm32"))]
pub use archive::ArchiveProvider;
#[cfg(not(target_arch = "wasm32"))]
pub use file::{FileProvider, FileStorage};
pub use memory::{MemoryProvider, MemoryStorage};

// ============================================================================
// Regions
// ============================================================================

#[derive(Clone)]
enum Backing {
  Empty,
  #[cfg(not(target_arch = "wasm32"))]
  Mapped(Arc<Mmap>),
  Shared(Arc<Vec<u8>>),
}

/// An immutable view of a byte range
///
/// The region keeps its backing alive, so it stays readable after the
/// storage grows, is replaced, or is closed.
#[derive(Clone)]
pub struct Region {
  backing: Backing,
  start: usize,
  len: usize,
}

impl Region {
  pub fn empty() -> Self {
    Self {
      backing: Backing::Empty,
      start: 0,
      len: 0,
    }
  }

  #[cfg(not(target_arch = "wasm32"))]
  pub(crate) fn mapped(map: Arc<Mmap>, start: usize, len: usize) -> Self {
    Self {
      backing: Backing::Mapped(map),
      start,
      len,
    }
  }

  pub(crate) fn shared(buffer: Arc<Vec<u8>>, start: usize, len: usize) -> Self {
    Self {
      backing: Backing::Shared(buffer),
      start,
      len,
    }
  }

  pub fn bytes(&self) -> &[u8] {
    let all: &[u8] = match &self.backing {
      Backing::Empty => &[],
      #[cfg(not(target_arch = "wasm32"))]
      Backing::Mapped(map) => &map[..],
      Backing::Shared(buffer) => buffer.as_slice(),
    };
    &all[self.start..self.start + self.len]
  }

  /// A narrower view over the same backing (`start` is relative to this region)
  pub fn slice(&self, start: usize, len: usize) -> Region {
    debug_assert!(start + len <= self.len);
    Region {
      backing: self.backing.clone(),
      start: self.start + start,
      len,
    }
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }
}

impl fmt::Debug for Region {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Region")
      .field("start", &self.start)
      .field("len", &self.len)
      .finish()
  }
}

/// Resolve `(offset, length)` against `size`; `length == 0` means "to the end"
pub(crate) fn resolve_range(offset: u64, length: u64, size: u64) -> Result<(usize, usize)> {
  let end = if length == 0 {
    size
  } else {
    offset.checked_add(length).ok_or_else(|| {
      GraphError::InvalidArgument(format!("range overflow at offset {offset}"))
    })?
  };
  if offset > size || end > size {
    return Err(GraphError::storage(
      "map",
      std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("range {offset}..{end} exceeds storage size {size}"),
      ),
    ));
  }
  Ok((offset as usize, (end - offset) as usize))
}

// ============================================================================
// Storage traits
// ============================================================================

/// A byte store that can be mapped read-only and, when writable, grown and written
pub trait MappedStorage: Send + Sync {
  /// Map `length` bytes at `offset` (`length == 0` maps to the end)
  fn map(&self, offset: u64, length: u64) -> Result<Region>;

  /// Current size in bytes
  fn size(&self) -> Result<u64>;

  /// Release the handle; calling it again is a no-op
  fn close(&self) -> Result<()>;

  fn is_read_only(&self) -> bool;

  /// Extend the store to `new_size` bytes (never shrinks)
  fn grow(&self, _new_size: u64) -> Result<()> {
    Err(GraphError::ReadOnly("grow".to_string()))
  }

  /// Write `bytes` at `offset`; the range must lie within the current size
  fn write_at(&self, _offset: u64, _bytes: &[u8]) -> Result<()> {
    Err(GraphError::ReadOnly("write".to_string()))
  }

  /// Flush written bytes to durable storage
  fn sync(&self) -> Result<()> {
    Err(GraphError::ReadOnly("sync".to_string()))
  }

  /// Stage a complete replacement of the contents without touching the live bytes
  fn stage_replacement(&self, _contents: &[u8]) -> Result<()> {
    Err(GraphError::ReadOnly("replace".to_string()))
  }

  /// Swap the staged contents in
  fn commit_replacement(&self) -> Result<()> {
    Err(GraphError::ReadOnly("replace".to_string()))
  }

  /// Drop staged contents; a no-op when nothing is staged
  fn discard_replacement(&self) -> Result<()> {
    Ok(())
  }
}

/// Opens storages by logical path
pub trait StorageProvider: Send + Sync {
  fn open(&self, path: &str, read_only: bool) -> Result<Arc<dyn MappedStorage>>;
}

/// Replace the whole contents of `storage` (stage then commit)
pub fn replace_contents(storage: &dyn MappedStorage, contents: &[u8]) -> Result<()> {
  storage.stage_replacement(contents)?;
  storage.commit_replacement()
}
