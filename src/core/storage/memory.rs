//! In-process storage backend, mostly for tests
//!
//! Writes are copy-on-write against outstanding regions, so a mapped region is
//! a stable snapshot of the bytes at map time.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{resolve_range, MappedStorage, Region, StorageProvider};
use crate::error::{GraphError, Result};

type SharedBuffer = Arc<RwLock<Arc<Vec<u8>>>>;

/// A byte buffer behind the storage interface
pub struct MemoryStorage {
  buffer: SharedBuffer,
  staged: Mutex<Option<Vec<u8>>>,
  read_only: bool,
  closed: AtomicBool,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::from_bytes(Vec::new())
  }

  pub fn from_bytes(bytes: Vec<u8>) -> Self {
    Self::with_buffer(Arc::new(RwLock::new(Arc::new(bytes))), false)
  }

  fn with_buffer(buffer: SharedBuffer, read_only: bool) -> Self {
    Self {
      buffer,
      staged: Mutex::new(None),
      read_only,
      closed: AtomicBool::new(false),
    }
  }

  /// Copy of the current contents
  pub fn to_vec(&self) -> Vec<u8> {
    self.buffer.read().as_ref().clone()
  }

  fn ensure_open(&self) -> Result<()> {
    if self.closed.load(Ordering::Acquire) {
      return Err(GraphError::Closed);
    }
    Ok(())
  }

  fn ensure_writable(&self, op: &str) -> Result<()> {
    self.ensure_open()?;
    if self.read_only {
      return Err(GraphError::ReadOnly(op.to_string()));
    }
    Ok(())
  }
}

impl Default for MemoryStorage {
  fn default() -> Self {
    Self::new()
  }
}

impl MappedStorage for MemoryStorage {
  fn map(&self, offset: u64, length: u64) -> Result<Region> {
    self.ensure_open()?;
    let buffer = self.buffer.read().clone();
    let (start, len) = resolve_range(offset, length, buffer.len() as u64)?;
    if len == 0 {
      return Ok(Region::empty());
    }
    Ok(Region::shared(buffer, start, len))
  }

  fn size(&self) -> Result<u64> {
    self.ensure_open()?;
    Ok(self.buffer.read().len() as u64)
  }

  fn close(&self) -> Result<()> {
    self.closed.store(true, Ordering::Release);
    Ok(())
  }

  fn is_read_only(&self) -> bool {
    self.read_only
  }

  fn grow(&self, new_size: u64) -> Result<()> {
    self.ensure_writable("grow")?;
    let mut guard = self.buffer.write();
    if new_size > guard.len() as u64 {
      Arc::make_mut(&mut *guard).resize(new_size as usize, 0);
    }
    Ok(())
  }

  fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
    self.ensure_writable("write")?;
    let mut guard = self.buffer.write();
    let (start, _) = resolve_range(offset, bytes.len() as u64, guard.len() as u64)
      .map_err(|_| {
        GraphError::storage(
          "write",
          io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("write past end at offset {offset}"),
          ),
        )
      })?;
    Arc::make_mut(&mut *guard)[start..start + bytes.len()].copy_from_slice(bytes);
    Ok(())
  }

  fn sync(&self) -> Result<()> {
    self.ensure_writable("sync")
  }

  fn stage_replacement(&self, contents: &[u8]) -> Result<()> {
    self.ensure_writable("replace")?;
    *self.staged.lock() = Some(contents.to_vec());
    Ok(())
  }

  fn commit_replacement(&self) -> Result<()> {
    self.ensure_writable("replace")?;
    let staged = self.staged.lock().take().ok_or_else(|| {
      GraphError::InvalidArgument("no staged replacement to commit".to_string())
    })?;
    *self.buffer.write() = Arc::new(staged);
    Ok(())
  }

  fn discard_replacement(&self) -> Result<()> {
    self.staged.lock().take();
    Ok(())
  }
}

/// Provider that keeps named buffers alive across opens
///
/// Opening the same path twice yields handles over the same bytes.
#[derive(Default)]
pub struct MemoryProvider {
  files: Mutex<HashMap<String, SharedBuffer>>,
}

impl MemoryProvider {
  pub fn new() -> Self {
    Self::default()
  }

  /// Seed a path with raw contents
  pub fn insert(&self, path: &str, bytes: Vec<u8>) {
    self
      .files
      .lock()
      .insert(path.to_string(), Arc::new(RwLock::new(Arc::new(bytes))));
  }

  /// Copy of the bytes stored under `path`
  pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
    self
      .files
      .lock()
      .get(path)
      .map(|buffer| buffer.read().as_ref().clone())
  }
}

impl StorageProvider for MemoryProvider {
  fn open(&self, path: &str, read_only: bool) -> Result<Arc<dyn MappedStorage>> {
    let mut files = self.files.lock();
    let buffer = match files.get(path) {
      Some(buffer) => buffer.clone(),
      None if read_only => {
        return Err(GraphError::storage(
          "open",
          io::Error::new(io::ErrorKind::NotFound, path.to_string()),
        ))
      }
      None => {
        let buffer: SharedBuffer = Arc::new(RwLock::new(Arc::new(Vec::new())));
        files.insert(path.to_string(), buffer.clone());
        buffer
      }
    };
    Ok(Arc::new(MemoryStorage::with_buffer(buffer, read_only)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_grow_write_map() {
    let storage = MemoryStorage::new();
    storage.grow(8).unwrap();
    storage.write_at(2, &[7, 8]).unwrap();
    assert_eq!(storage.map(0, 0).unwrap().bytes(), &[0, 0, 7, 8, 0, 0, 0, 0]);
    assert!(storage.write_at(7, &[1, 2]).is_err());
  }

  #[test]
  fn test_region_is_snapshot() {
    let storage = MemoryStorage::from_bytes(vec![1, 2, 3]);
    let region = storage.map(0, 3).unwrap();
    storage.write_at(0, &[9]).unwrap();
    assert_eq!(region.bytes(), &[1, 2, 3]);
    assert_eq!(storage.map(0, 1).unwrap().bytes(), &[9]);
  }

  #[test]
  fn test_map_beyond_size_fails() {
    let storage = MemoryStorage::from_bytes(vec![0; 4]);
    assert!(matches!(
      storage.map(2, 4),
      Err(GraphError::Storage { op: "map", .. })
    ));
  }

  #[test]
  fn test_close_is_idempotent() {
    let storage = MemoryStorage::new();
    storage.close().unwrap();
    storage.close().unwrap();
    assert!(matches!(storage.size(), Err(GraphError::Closed)));
  }

  #[test]
  fn test_provider_shares_bytes_between_opens() {
    let provider = MemoryProvider::new();
    let first = provider.open("g.nodes.graph", false).unwrap();
    first.grow(4).unwrap();
    first.write_at(0, b"abcd").unwrap();
    first.close().unwrap();

    let second = provider.open("g.nodes.graph", true).unwrap();
    assert_eq!(second.map(0, 0).unwrap().bytes(), b"abcd");
    assert!(matches!(second.grow(8), Err(GraphError::ReadOnly(_))));
    assert!(provider.open("missing", true).is_err());
  }

  #[test]
  fn test_replacement_swaps_contents() {
    let storage = MemoryStorage::from_bytes(vec![1; 8]);
    let before = storage.map(0, 0).unwrap();
    storage.stage_replacement(&[2, 2]).unwrap();
    assert_eq!(storage.size().unwrap(), 8);
    storage.commit_replacement().unwrap();
    assert_eq!(storage.size().unwrap(), 2);
    assert_eq!(before.len(), 8);
  }
}
