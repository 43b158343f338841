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

/// One resident layer: the store handle, its accounted diff size, and the
/// images that reference it.
#[derive(Debug, Clone)]
struct CacheLayer {
  layer: LayerHandle,
  size: i64,
  images: Vec<ImageId>,
  os: String,
}

/// Per-layer LRU: one recency node per chain ID, sized by the layer's own
/// diff. Images sharing layers share nodes, so shared base layers are
/// accounted once and stay hot as long as any referencing image is used.
pub struct LayerLruCache {
  base: CacheBase,
  archives: ArchiveStore,
  inner: RwLock<LayerLruInner>,
}

struct LayerLruInner {
  level: i64,
  images: HashMap<ImageId, Image, ahash::RandomState>,
  layers: RecencyList<ChainId, CacheLayer>,
}

impl LayerLruCache {
  pub fn new(capacity: i64, service: Arc<dyn ImageService>) -> Self {
    Self {
      base: CacheBase::new(capacity, service),
      archives: ArchiveStore::new(),
      inner: RwLock::new(LayerLruInner {
        level: 0,
        images: HashMap::default(),
        layers: RecencyList::new(),
      }),
    }
  }

  fn put_layer(&self, inner: &mut LayerLruInner, chain_id: &ChainId, img: &Image) {
    // A stale entry is rebuilt: the newly fetched size is authoritative,
    // and the prior sharers are carried over.
    let old = inner.layers.remove(chain_id);
    if let Some(old) = &old {
      inner.level -= old.size;
    }

    let fresh = self
      .base
      .service
      .get_read_only_layer(chain_id, img.operating_system());
    if let Some(old) = &old {
      // Dropped only after the fresh acquisition touched the refcount, so
      // the store cannot destroy a layer the cache still wants.
      if let Err(err) = self.base.service.release_read_only_layer(&old.layer, &old.os) {
        warn!(layer = %chain_id, error = %err, "error releasing stale layer handle");
      }
    }
    let layer = match fresh {
      Ok(layer) => layer,
      Err(err) => {
        error!(layer = %chain_id, error = %err, "error getting layer");
        self.evict(inner, Some(img.id()));
        return;
      }
    };

    let size = layer.diff_size();
    let mut images = old.map(|old| old.images).unwrap_or_default();
    if !images.contains(img.id()) {
      images.push(img.id().clone());
    }

    inner.layers.push_front(
      chain_id.clone(),
      CacheLayer {
        layer,
        size,
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
    self.evict(inner, Some(img.id()));
  }

  fn update_layer(&self, inner: &mut LayerLruInner, chain_id: &ChainId, img: &Image) {
    let Some(record) = inner.layers.get_mut(chain_id) else {
      debug!(layer = %chain_id, "layer is not in cache");
      self.evict(inner, None);
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
    self.evict(inner, None);
  }

  fn remove_layer(&self, inner: &mut LayerLruInner, chain_id: &ChainId, img_id: &ImageId) {
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

  /// Drops every truly-released layer from the index and the level.
  fn purge_released(&self, inner: &mut LayerLruInner, released: &[ReleasedLayer], evicting: bool) {
    for layer in released {
      if inner.layers.remove(&layer.chain_id).is_none() {
        warn!(layer = %layer.chain_id, "layer is not in cache");
        continue;
      }
      inner.level -= layer.diff_size;
      if evicting {
        bump(&self.base.metrics.evicted_layers);
      } else if let Err(err) = self.archives.remove(&layer.diff_id) {
        warn!(layer = %layer.chain_id, error = %err, "error deleting layer archive");
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

  fn evict(&self, inner: &mut LayerLruInner, current: Option<&ImageId>) {
    if inner.layers.is_empty() {
      debug!("empty cache, nothing to evict");
      return;
    }

    // Scoped to this pass; keyed by chain ID because a candidate can
    // resurface after a move-to-front.
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
        "evicting layer, {}/{} ({:.3})",
        inner.level,
        self.base.capacity,
        self.base.percent(inner.level)
      );

      let mut conflict = false;
      for img_id in &record.images {
        if Some(img_id) == current {
          // The image being admitted must not be evicted by its own
          // admission.
          conflict = true;
          break;
        }
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

  /// Releases the cache's reference to an eviction candidate. A drained
  /// refcount ("layer not retained") is recovered by re-acquiring a handle
  /// and retrying, a bounded number of times. `None` aborts the pass.
  fn release_for_eviction(
    &self,
    chain_id: &ChainId,
    record: &CacheLayer,
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
          // Bump the reference count back into a valid range so the layer
          // data can be cleaned up.
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

impl ImageCache for LayerLruCache {
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
    // Top-down, most specific layer first.
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
      // Track the image so a later remove_image can walk its chains.
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
    // Bottom-up, base layer first.
    for chain_id in img.rootfs().chain_ids() {
      self.remove_layer(&mut inner, &chain_id, img_id);
    }
    bump(&self.base.metrics.removes);
  }

  fn metrics(&self) -> MetricsSnapshot {
    self.base.metrics.snapshot()
  }
}
