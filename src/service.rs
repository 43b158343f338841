//! The contract the cache consumes from the backing image service and its
//! image/layer stores.

use thiserror::Error;

use crate::image::{ChainId, DiffId, Image};

/// Error surfaced by the backing image service.
///
/// Store errors cross this boundary as messages; the cache classifies them
/// by content (see [`crate::error`]) rather than by variant, matching the
/// stringly-typed errors the stores actually produce.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ServiceError(String);

impl ServiceError {
  pub fn new(message: impl Into<String>) -> Self {
    Self(message.into())
  }

  pub fn message(&self) -> &str {
    &self.0
  }
}

/// A refcounted reference to a read-only layer in the backing layer store.
///
/// Acquiring a handle bumps the layer's reference count; releasing it may
/// or may not destroy the underlying layer depending on the remaining
/// references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerHandle {
  chain_id: ChainId,
  diff_id: DiffId,
  diff_size: i64,
  size: i64,
}

impl LayerHandle {
  pub fn new(chain_id: ChainId, diff_id: DiffId, diff_size: i64, size: i64) -> Self {
    Self {
      chain_id,
      diff_id,
      diff_size,
      size,
    }
  }

  pub fn chain_id(&self) -> &ChainId {
    &self.chain_id
  }

  pub fn diff_id(&self) -> &DiffId {
    &self.diff_id
  }

  /// Size of this layer's own uncompressed diff.
  pub fn diff_size(&self) -> i64 {
    self.diff_size
  }

  /// Cumulative size of the layer and everything below it.
  pub fn size(&self) -> i64 {
    self.size
  }
}

/// A layer whose reference count truly reached zero during a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedLayer {
  pub chain_id: ChainId,
  pub diff_id: DiffId,
  pub diff_size: i64,
}

/// One entry of an image deletion response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteRecord {
  pub deleted: Option<String>,
  pub untagged: Option<String>,
}

/// The operations the cache consumes from the daemon's image service.
///
/// The stores behind this trait are shared mutable state owned elsewhere
/// and are assumed internally thread-safe; calls may take arbitrary time.
pub trait ImageService: Send + Sync {
  /// Resolves a reference or ID to an image.
  fn get_image(&self, ref_or_id: &str) -> Result<Image, ServiceError>;

  /// Deletes an image. The error message may contain `"conflict"` (the
  /// image is in use) or `"no such image"` (already gone).
  fn image_delete(
    &self,
    image_ref: &str,
    force: bool,
    prune: bool,
  ) -> Result<Vec<DeleteRecord>, ServiceError>;

  /// Acquires a read-only handle for `chain_id`, bumping its refcount.
  fn get_read_only_layer(&self, chain_id: &ChainId, os: &str) -> Result<LayerHandle, ServiceError>;

  /// Drops one reference to `layer` and returns the layers whose count
  /// reached zero. The error message may contain `"layer not retained"`
  /// when the count was already zero on entry.
  fn release_read_only_layer(
    &self,
    layer: &LayerHandle,
    os: &str,
  ) -> Result<Vec<ReleasedLayer>, ServiceError>;

  /// Enumerates the image store's current contents, for warm-load.
  fn images(&self) -> Vec<Image>;
}
