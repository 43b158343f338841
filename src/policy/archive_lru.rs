use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::archive::ArchiveStore;
use crate::base::CacheBase;
use crate::error::{is_conflict, is_no_such_image, is_not_retained};
use crate::image::{ChainId, Image, ImageId};
use crate::metrics::{bump, MetricsSnapshot};
use crate::policy::recency::RecencyList;
use crate::policy::{ImageCache, MAX_EVICTION_RETRIES};
use crate::service::{ImageService, LayerHandle, ReleasedLayer};

/// A resident layer plus the size of its companion compressed archive.
/// `compact_size` is informational; eviction accounts the diff size.
#[derive(Debug, Clone)]
struct ArchiveLayer {
  layer: LayerHandle,
  size: i64,
  compact_size: i64,
  images: Vec<ImageId>,
  os: String,
}

/// Per-layer LRU that also manages the compressed archive files the
/// download path leaves on disk: an archive bigger than its own diff is
/// deleted on admission, and archives are unlinked whenever their layer
/// leaves the cache. Requires archive mode to be enabled.
pub struct ArchiveLruCache {
  base: CacheBase,
  archives: ArchiveStore,
  inner: RwLock<ArchiveLruInner>,
}

struct ArchiveLruInner {
  level: i64,
  images: HashMap<ImageId, Image, ahash::RandomState>,
  layers: RecencyList<ChainId, ArchiveLayer>,
}

impl ArchiveLruCache {
  pub fn new(capacity: i64, service: Arc<dyn ImageService>) -> Self {
    Self::with_archive_store(capacity, service, ArchiveStore::new())
  }

  /// An engine whose archives live under an explicit directory instead of
  /// the OS temp dir.
  pub fn with_archive_store(
    capacity: i64,
    service: Arc<dyn ImageService>,
    archives: ArchiveStore,
  ) -> Self {
    Self {
      base: CacheBase::new(capacity, service),
      archives,
      inner: RwLock::new(ArchiveLruInner {
        level: 0,
        images: HashMap::default(),
        layers: RecencyList::new(),
      }),
    }
  }

  fn put_layer(&self, inner: &mut ArchiveLruInner, chain_id: &ChainId, img: &Image) {
    let old = inner.layers.remove(chain_id);
    if let Some(old) = &old {
      inner.level -= old.size;
    }

    let fresh = self
      .base
      .service
      .get_read_only_layer(chain_id, img.operating_system());
    if let Some(old) = &old {
      if let Err(err) = self.base.service.release_read_only_layer(&old.layer, &old.os) {
        warn!(layer = %chain_id, error = %err, "error releasing stale layer handle");
      }
    }
    let layer = match fresh {
      Ok(layer) => layer,
      Err(err) => {
        error!(layer = %chain_id, error = %err, "error getting layer");
        self.evict(inner);
        return;
      }
    };

    let size = layer.diff_size();
    let mut compact_size = match self.archives.size_of(layer.diff_id()) {
      Ok(compact_size) => compact_size,
      Err(err) => {
        error!(layer = %chain_id, error = %err, "error getting layer archive info");
        0
      }
    };
    if compact_size > 0 {
      info!(layer = %chain_id, "layer full size: {}, compact size: {}", size, compact_size);
    }
    if compact_size > size {
      // A compressed copy larger than the diff it would save is dead
      // weight.
      if let Err(err) = self.archives.remove(layer.diff_id()) {
        error!(layer = %chain_id, error = %err, "error deleting layer archive");
      }
      compact_size = 0;
    }

    let mut images = old.map(|old| old.images).unwrap_or_default();
    if !images.contains(img.id()) {
      images.push(img.id().clone());
    }

    inner.layers.push_front(
      chain_id.clone(),
      ArchiveLayer {
        layer,
        size,
        compact_size,
        images,
        os: img.operating_system().to_owned(),
      },
    );
    inner.level += size;
    info!(
      layer = %chain_id,
      "put layer, {}/{} ({:.3})",
      inner.level,
      self.base.capacity,
      self.base.percent(inner.level)
    );
    self.evict(inner);
  }

  fn update_layer(&self, inner: &mut ArchiveLruInner, chain_id: &ChainId, img: &Image) {
    let Some(record) = inner.layers.get_mut(chain_id) else {
      debug!(layer = %chain_id, "layer is not in cache");
      self.evict(inner);
      return;
    };
    if !record.images.contains(img.id()) {
      record.images.push(img.id().clone());
    }
    inner.layers.move_to_front(chain_id);
    info!(
      layer = %chain_id,
      "updated layer, {}/{} ({:.3})",
      inner.level,
      self.base.capacity,
      self.base.percent(inner.level)
    );
    self.evict(inner);
  }

  fn remove_layer(&self, inner: &mut ArchiveLruInner, chain_id: &ChainId, img_id: &ImageId) {
    let Some(record) = inner.layers.get_mut(chain_id) else {
      debug!(layer = %chain_id, "layer is not in cache");
      return;
    };
    record.images.retain(|id| id != img_id);
    let (layer, os) = (record.layer.clone(), record.os.clone());

    let released = match self.base.service.release_read_only_layer(&layer, &os) {
      Ok(released) => released,
      Err(err) => {
        error!(layer = %chain_id, error = %err, "error releasing layer");
        return;
      }
    };
    self.purge_released(inner, &released, false);
  }

  /// Drops every truly-released layer from the index, the level, and the
  /// archive directory.
  fn purge_released(&self, inner: &mut ArchiveLruInner, released: &[ReleasedLayer], evicting: bool) {
    for layer in released {
      if inner.layers.remove(&layer.chain_id).is_none() {
        warn!(layer = %layer.chain_id, "layer is not in cache");
        continue;
      }
      inner.level -= layer.diff_size;
      if let Err(err) = self.archives.remove(&layer.diff_id) {
        warn!(layer = %layer.chain_id, error = %err, "error deleting layer archive");
      }
      if evicting {
        bump(&self.base.metrics.evicted_layers);
      }
      info!(
        layer = %layer.chain_id,
        "{} layer, {}/{} ({:.3})",
        if evicting { "evicted" } else { "removed" },
        inner.level,
        self.base.capacity,
        self.base.percent(inner.level)
      );
    }
  }

  fn evict(&self, inner: &mut ArchiveLruInner) {
    if inner.layers.is_empty() {
      debug!("empty cache, nothing to evict");
      return;
    }

    let mut checkboard: HashMap<ChainId, u32, ahash::RandomState> = HashMap::default();

    while inner.level > self.base.capacity {
      let Some((chain_id, record)) = inner
        .layers
        .back()
        .map(|(chain_id, record)| (chain_id.clone(), record.clone()))
      else {
        break;
      };

      info!(
        layer = %chain_id,
        compact_size = record.compact_size,
        "evicting layer, {}/{} ({:.3})",
        inner.level,
        self.base.capacity,
        self.base.percent(inner.level)
      );

      let mut conflict = false;
      for img_id in &record.images {
        if let Err(err) = self.base.service.image_delete(img_id.as_str(), false, false) {
          if is_conflict(&err) {
            conflict = true;
            break;
          }
          if !is_no_such_image(&err) {
            error!(error = %err, "error deleting image");
            bump(&self.base.metrics.eviction_aborts);
            return;
          }
        }
      }

      if conflict {
        debug!(layer = %chain_id, "image deletion conflict detected, skip");
        inner.layers.move_to_front(&chain_id);
        if self.bump_retries(&mut checkboard, &chain_id) {
          return;
        }
        continue;
      }

      let released = match self.release_for_eviction(&chain_id, &record) {
        Some(released) => released,
        None => return,
      };

      if released.is_empty() {
        info!(layer = %chain_id, "layer seems to be in use, skip");
        inner.layers.move_to_front(&chain_id);
        if self.bump_retries(&mut checkboard, &chain_id) {
          return;
        }
        continue;
      }

      self.purge_released(inner, &released, true);
    }
  }

  fn release_for_eviction(
    &self,
    chain_id: &ChainId,
    record: &ArchiveLayer,
  ) -> Option<Vec<ReleasedLayer>> {
    let mut layer = record.layer.clone();
    let mut attempts = 0;
    loop {
      match self.base.service.release_read_only_layer(&layer, &record.os) {
        Ok(released) => return Some(released),
        Err(err) if is_not_retained(&err) => {
          attempts += 1;
          if attempts > MAX_EVICTION_RETRIES {
            warn!(layer = %chain_id, "exceeding the max release retries, abort");
            bump(&self.base.metrics.eviction_aborts);
            return None;
          }
          match self.base.service.get_read_only_layer(chain_id, &record.os) {
            Ok(fresh) => layer = fresh,
            Err(err) => {
              error!(layer = %chain_id, error = %err, "error getting layer");
              bump(&self.base.metrics.eviction_aborts);
              return None;
            }
          }
        }
        Err(err) => {
          error!(layer = %chain_id, error = %err, "error releasing layer");
          bump(&self.base.metrics.eviction_aborts);
          return None;
        }
      }
    }
  }

  fn bump_retries(
    &self,
    checkboard: &mut HashMap<ChainId, u32, ahash::RandomState>,
    chain_id: &ChainId,
  ) -> bool {
    let tries = checkboard.entry(chain_id.clone()).or_insert(0);
    *tries += 1;
    if *tries > MAX_EVICTION_RETRIES {
      warn!(layer = %chain_id, "exceeding the max eviction retries, abort");
      bump(&self.base.metrics.eviction_aborts);
      return true;
    }
    false
  }
}

impl ImageCache for ArchiveLruCache {
  fn capacity(&self) -> i64 {
    self.base.capacity
  }

  fn level(&self) -> i64 {
    self.inner.read().level
  }

  fn put_image(&self, img: Option<&Image>) {
    let Some(img) = img else {
      return;
    };
    let mut inner = self.inner.write();

    if let Err(err) = self.base.check_image_size(img) {
      warn!(error = %err, "error putting image in cache");
      bump(&self.base.metrics.rejected_puts);
      return;
    }

    inner.images.insert(img.id().clone(), img.clone());
    let mut chain_ids = img.rootfs().chain_ids();
    chain_ids.reverse();
    for chain_id in &chain_ids {
      self.put_layer(&mut inner, chain_id, img);
    }
    bump(&self.base.metrics.puts);
  }

  fn update_image(&self, ref_or_id: &str) {
    let mut inner = self.inner.write();

    let img = match self.base.service.get_image(ref_or_id) {
      Ok(img) => img,
      Err(err) => {
        warn!(error = %err, "error getting image");
        return;
      }
    };

    let mut chain_ids = img.rootfs().chain_ids();
    chain_ids.reverse();
    if chain_ids.iter().any(|chain_id| inner.layers.contains(chain_id)) {
      inner.images.insert(img.id().clone(), img.clone());
    }
    for chain_id in &chain_ids {
      self.update_layer(&mut inner, chain_id, &img);
    }
    bump(&self.base.metrics.updates);
  }

  fn remove_image(&self, img_id: &ImageId) {
    let mut inner = self.inner.write();

    let Some(img) = inner.images.remove(img_id) else {
      return;
    };
    for chain_id in img.rootfs().chain_ids() {
      self.remove_layer(&mut inner, &chain_id, img_id);
    }
    bump(&self.base.metrics.removes);
  }

  fn metrics(&self) -> MetricsSnapshot {
    self.base.metrics.snapshot()
  }
}
