//! File-backed storage using OS memory mapping
//!
//! Reads go through a shared read-only mapping; writes go through the file
//! handle so mapped regions are never aliased mutably.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::Mutex;
use tracing::trace;

use super::{resolve_range, MappedStorage, Region, StorageProvider};
use crate::constants::EXT_STAGED;
use crate::error::{GraphError, Result};

struct FileInner {
  file: Option<File>,
  size: u64,
  map: Option<Arc<Mmap>>,
  staged: Option<PathBuf>,
}

/// A single memory-mapped file
pub struct FileStorage {
  path: PathBuf,
  read_only: bool,
  lock_files: bool,
  inner: Mutex<FileInner>,
}

impl FileStorage {
  /// Open (or create, when writable) the file at `path`
  pub fn open(path: impl AsRef<Path>, read_only: bool, lock_files: bool) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    let file = open_file(&path, read_only)?;
    if lock_files {
      lock_file(&file, read_only)?;
    }
    let size = file
      .metadata()
      .map_err(|e| GraphError::storage("open", e))?
      .len();
    Ok(Self {
      path,
      read_only,
      lock_files,
      inner: Mutex::new(FileInner {
        file: Some(file),
        size,
        map: None,
        staged: None,
      }),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn staged_path(&self) -> PathBuf {
    let mut name: OsString = self.path.as_os_str().to_owned();
    name.push(EXT_STAGED);
    PathBuf::from(name)
  }

  fn ensure_writable(&self, op: &str) -> Result<()> {
    if self.read_only {
      return Err(GraphError::ReadOnly(format!(
        "{op} on {}",
        self.path.display()
      )));
    }
    Ok(())
  }
}

fn open_file(path: &Path, read_only: bool) -> Result<File> {
  let result = if read_only {
    File::open(path)
  } else {
    OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(path)
  };
  result.map_err(|e| GraphError::storage("open", e))
}

fn lock_file(file: &File, shared: bool) -> Result<()> {
  let locked = if shared {
    fs2::FileExt::try_lock_shared(file)
  } else {
    fs2::FileExt::try_lock_exclusive(file)
  };
  locked.map_err(|e| GraphError::storage("lock", e))
}

impl MappedStorage for FileStorage {
  fn map(&self, offset: u64, length: u64) -> Result<Region> {
    let mut guard = self.inner.lock();
    let inner = &mut *guard;
    let size = inner.size;
    let (start, len) = resolve_range(offset, length, size)?;
    if len == 0 {
      if inner.file.is_none() {
        return Err(GraphError::Closed);
      }
      return Ok(Region::empty());
    }
    let map = match &inner.map {
      Some(map) if map.len() as u64 == size => map.clone(),
      _ => {
        let file = inner.file.as_ref().ok_or(GraphError::Closed)?;
        // SAFETY: the mapping is read-only and all mutation goes through the
        // file handle, which only extends the file or rewrites bytes in place.
        let map = unsafe { Mmap::map(file) }.map_err(|e| GraphError::storage("map", e))?;
        let map = Arc::new(map);
        inner.map = Some(map.clone());
        map
      }
    };
    Ok(Region::mapped(map, start, len))
  }

  fn size(&self) -> Result<u64> {
    let inner = self.inner.lock();
    if inner.file.is_none() {
      return Err(GraphError::Closed);
    }
    Ok(inner.size)
  }

  fn close(&self) -> Result<()> {
    let mut inner = self.inner.lock();
    inner.map = None;
    inner.file = None;
    if let Some(staged) = inner.staged.take() {
      let _ = fs::remove_file(staged);
    }
    Ok(())
  }

  fn is_read_only(&self) -> bool {
    self.read_only
  }

  fn grow(&self, new_size: u64) -> Result<()> {
    self.ensure_writable("grow")?;
    let mut guard = self.inner.lock();
    let inner = &mut *guard;
    if new_size <= inner.size {
      return Ok(());
    }
    let file = inner.file.as_ref().ok_or(GraphError::Closed)?;
    file
      .set_len(new_size)
      .map_err(|e| GraphError::storage("grow", e))?;
    trace!(path = %self.path.display(), from = inner.size, to = new_size, "grew file");
    inner.size = new_size;
    inner.map = None;
    Ok(())
  }

  fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
    self.ensure_writable("write")?;
    let mut guard = self.inner.lock();
    let inner = &mut *guard;
    let end = offset + bytes.len() as u64;
    if end > inner.size {
      return Err(GraphError::storage(
        "write",
        io::Error::new(
          io::ErrorKind::UnexpectedEof,
          format!("write {offset}..{end} past end {}", inner.size),
        ),
      ));
    }
    let file = inner.file.as_mut().ok_or(GraphError::Closed)?;
    file
      .seek(SeekFrom::Start(offset))
      .and_then(|_| file.write_all(bytes))
      .map_err(|e| GraphError::storage("write", e))
  }

  fn sync(&self) -> Result<()> {
    self.ensure_writable("sync")?;
    let inner = self.inner.lock();
    let file = inner.file.as_ref().ok_or(GraphError::Closed)?;
    file.sync_all().map_err(|e| GraphError::storage("sync", e))
  }

  fn stage_replacement(&self, contents: &[u8]) -> Result<()> {
    self.ensure_writable("replace")?;
    let mut inner = self.inner.lock();
    if inner.file.is_none() {
      return Err(GraphError::Closed);
    }
    let staged = self.staged_path();
    let mut file = File::create(&staged).map_err(|e| GraphError::storage("stage", e))?;
    file
      .write_all(contents)
      .and_then(|_| file.sync_all())
      .map_err(|e| GraphError::storage("stage", e))?;
    inner.staged = Some(staged);
    Ok(())
  }

  fn commit_replacement(&self) -> Result<()> {
    self.ensure_writable("replace")?;
    let mut inner = self.inner.lock();
    let staged = inner.staged.take().ok_or_else(|| {
      GraphError::InvalidArgument("no staged replacement to commit".to_string())
    })?;
    fs::rename(&staged, &self.path).map_err(|e| GraphError::storage("rename", e))?;

    let file = open_file(&self.path, false)?;
    if self.lock_files {
      lock_file(&file, false)?;
    }
    inner.size = file
      .metadata()
      .map_err(|e| GraphError::storage("open", e))?
      .len();
    inner.file = Some(file);
    inner.map = None;
    Ok(())
  }

  fn discard_replacement(&self) -> Result<()> {
    if let Some(staged) = self.inner.lock().staged.take() {
      fs::remove_file(staged).map_err(|e| GraphError::storage("discard", e))?;
    }
    Ok(())
  }
}

/// Provider opening real files
#[derive(Debug, Clone, Default)]
pub struct FileProvider {
  lock_files: bool,
}

impl FileProvider {
  pub fn new() -> Self {
    Self::default()
  }

  /// Take advisory locks: exclusive for writable opens, shared for read-only ones
  pub fn lock_files(mut self, value: bool) -> Self {
    self.lock_files = value;
    self
  }
}

impl StorageProvider for FileProvider {
  fn open(&self, path: &str, read_only: bool) -> Result<Arc<dyn MappedStorage>> {
    Ok(Arc::new(FileStorage::open(path, read_only, self.lock_files)?))
  }
}
