//! Companion compressed-archive files left on disk by the download path,
//! keyed by the hex form of a layer's diff ID. The cache never creates
//! these files; it only stats and unlinks them.

use std::io;
use std::path::{Path, PathBuf};
use std::{env, fs};

use crate::image::DiffId;

#[derive(Debug, Clone)]
pub struct ArchiveStore {
  dir: PathBuf,
}

impl ArchiveStore {
  /// A store rooted at the OS temp directory, where the download path
  /// leaves layer archives.
  pub fn new() -> Self {
    Self {
      dir: env::temp_dir(),
    }
  }

  /// A store rooted at an explicit directory.
  pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn path_for(&self, diff_id: &DiffId) -> PathBuf {
    self.dir.join(diff_id.hex())
  }

  /// Size of the archive for `diff_id`, or 0 when no archive exists.
  /// Temp cleaners may remove archives behind the cache's back, so a
  /// missing file is a normal state, not an error.
  pub fn size_of(&self, diff_id: &DiffId) -> io::Result<i64> {
    match fs::metadata(self.path_for(diff_id)) {
      Ok(meta) => Ok(meta.len() as i64),
      Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(0),
      Err(err) => Err(err),
    }
  }

  /// Removes the archive for `diff_id`; a missing file is not an error.
  pub fn remove(&self, diff_id: &DiffId) -> io::Result<()> {
    match fs::remove_file(self.path_for(diff_id)) {
      Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
      other => other,
    }
  }
}

impl Default for ArchiveStore {
  fn default() -> Self {
    Self::new()
  }
}
