//! Read-only storage over entries of a tar or tar.gz archive
//!
//! Plain tar entries are mapped straight out of the archive file; gzip
//! archives are detected by magic and decompressed into memory.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flate2::read::GzDecoder;
use memmap2::MmapOptions;
use tracing::debug;

use super::file::FileStorage;
use super::{resolve_range, MappedStorage, Region, StorageProvider};
use crate::error::{GraphError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One archive entry exposed as an immutable region
pub struct ArchiveStorage {
  name: String,
  contents: Region,
  closed: AtomicBool,
}

impl ArchiveStorage {
  pub fn name(&self) -> &str {
    &self.name
  }

  fn ensure_open(&self) -> Result<()> {
    if self.closed.load(Ordering::Acquire) {
      return Err(GraphError::Closed);
    }
    Ok(())
  }
}

impl MappedStorage for ArchiveStorage {
  fn map(&self, offset: u64, length: u64) -> Result<Region> {
    self.ensure_open()?;
    let (start, len) = resolve_range(offset, length, self.contents.len() as u64)?;
    if len == 0 {
      return Ok(Region::empty());
    }
    Ok(self.contents.slice(start, len))
  }

  fn size(&self) -> Result<u64> {
    self.ensure_open()?;
    Ok(self.contents.len() as u64)
  }

  fn close(&self) -> Result<()> {
    self.closed.store(true, Ordering::Release);
    Ok(())
  }

  fn is_read_only(&self) -> bool {
    true
  }
}

/// Opens logical paths as entries of one archive
#[derive(Debug, Clone)]
pub struct ArchiveProvider {
  archive: PathBuf,
}

impl ArchiveProvider {
  pub fn new(archive: impl AsRef<Path>) -> Self {
    Self {
      archive: archive.as_ref().to_path_buf(),
    }
  }

  fn is_gzip(&self) -> Result<bool> {
    let mut file = File::open(&self.archive).map_err(|e| GraphError::storage("open", e))?;
    let mut head = [0u8; 2];
    match file.read_exact(&mut head) {
      Ok(()) => Ok(head == GZIP_MAGIC),
      Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
      Err(e) => Err(GraphError::storage("open", e)),
    }
  }

  /// List `(normalized name, data position, size)` for every regular entry
  fn list_entries(&self, gzip: bool) -> Result<Vec<(String, u64, u64)>> {
    let file = File::open(&self.archive).map_err(|e| GraphError::storage("open", e))?;
    let reader: Box<dyn Read> = if gzip {
      Box::new(GzDecoder::new(file))
    } else {
      Box::new(file)
    };
    let mut archive = tar::Archive::new(reader);
    let mut entries = Vec::new();
    for entry in archive
      .entries()
      .map_err(|e| GraphError::storage("read archive", e))?
    {
      let entry = entry.map_err(|e| GraphError::storage("read archive", e))?;
      if !entry.header().entry_type().is_file() {
        continue;
      }
      let path = entry
        .path()
        .map_err(|e| GraphError::storage("read archive", e))?;
      let name = normalize(&path.to_string_lossy());
      entries.push((name, entry.raw_file_position(), entry.size()));
    }
    Ok(entries)
  }

  fn read_gzip_entry(&self, wanted: &str) -> Result<Vec<u8>> {
    let file = File::open(&self.archive).map_err(|e| GraphError::storage("open", e))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    for entry in archive
      .entries()
      .map_err(|e| GraphError::storage("read archive", e))?
    {
      let mut entry = entry.map_err(|e| GraphError::storage("read archive", e))?;
      let path = entry
        .path()
        .map_err(|e| GraphError::storage("read archive", e))?;
      if normalize(&path.to_string_lossy()) != wanted {
        continue;
      }
      let mut bytes = Vec::with_capacity(entry.size() as usize);
      entry
        .read_to_end(&mut bytes)
        .map_err(|e| GraphError::storage("read archive", e))?;
      return Ok(bytes);
    }
    Err(not_found(wanted))
  }

  fn map_plain_entry(&self, position: u64, size: u64) -> Result<Region> {
    if size == 0 {
      return Ok(Region::empty());
    }
    let file = File::open(&self.archive).map_err(|e| GraphError::storage("open", e))?;
    // SAFETY: the archive is opened read-only and the mapping is never written.
    let map = unsafe {
      MmapOptions::new()
        .offset(position)
        .len(size as usize)
        .map(&file)
    }
    .map_err(|e| GraphError::storage("map", e))?;
    Ok(Region::mapped(Arc::new(map), 0, size as usize))
  }
}

fn normalize(path: &str) -> String {
  let unified = path.replace('\\', "/");
  let mut trimmed = unified.as_str();
  loop {
    if let Some(rest) = trimmed.strip_prefix("./") {
      trimmed = rest;
    } else if let Some(rest) = trimmed.strip_prefix('/') {
      trimmed = rest;
    } else {
      break;
    }
  }
  trimmed.to_string()
}

fn base_name(path: &str) -> &str {
  path.rsplit('/').next().unwrap_or(path)
}

fn not_found(path: &str) -> GraphError {
  GraphError::storage(
    "open",
    io::Error::new(
      io::ErrorKind::NotFound,
      format!("archive entry not found: {path}"),
    ),
  )
}

impl StorageProvider for ArchiveProvider {
  fn open(&self, path: &str, _read_only: bool) -> Result<Arc<dyn MappedStorage>> {
    if Path::new(path).is_file() {
      debug!(path, "archive provider opening plain file");
      return Ok(Arc::new(FileStorage::open(path, true, false)?));
    }

    let wanted = normalize(path);
    let gzip = self.is_gzip()?;
    let entries = self.list_entries(gzip)?;
    let (name, position, size) = entries
      .iter()
      .find(|(name, _, _)| *name == wanted)
      .or_else(|| {
        let base = base_name(&wanted);
        entries.iter().find(|(name, _, _)| base_name(name) == base)
      })
      .cloned()
      .ok_or_else(|| not_found(path))?;

    let contents = if gzip {
      let bytes = self.read_gzip_entry(&name)?;
      let len = bytes.len();
      Region::shared(Arc::new(bytes), 0, len)
    } else {
      self.map_plain_entry(position, size)?
    };
    debug!(archive = %self.archive.display(), entry = %name, size, gzip, "opened archive entry");
    Ok(Arc::new(ArchiveStorage {
      name,
      contents,
      closed: AtomicBool::new(false),
    }))
  }
}
