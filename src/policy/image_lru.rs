use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::base::CacheBase;
use crate::error::{is_conflict, is_no_such_image};
use crate::image::{Image, ImageId};
use crate::metrics::{bump, MetricsSnapshot};
use crate::policy::recency::RecencyList;
use crate::policy::ImageCache;
use crate::service::ImageService;

/// Whole-image LRU: one recency node per image, sized by the cumulative
/// size of its top layer. The default policy.
pub struct ImageLruCache {
  base: CacheBase,
  inner: RwLock<ImageLruInner>,
}

struct ImageLruInner {
  level: i64,
  images: RecencyList<ImageId, Image>,
}

impl ImageLruCache {
  pub fn new(capacity: i64, service: Arc<dyn ImageService>) -> Self {
    Self {
      base: CacheBase::new(capacity, service),
      inner: RwLock::new(ImageLruInner {
        level: 0,
        images: RecencyList::new(),
      }),
    }
  }

  fn evict(&self, inner: &mut ImageLruInner) {
    if inner.images.is_empty() {
      debug!("empty cache, nothing to evict");
      return;
    }

    // Candidates that conflicted this pass; eviction walks past them
    // instead of retrying the same back node.
    let mut skipped: Vec<ImageId> = Vec::new();

    while inner.level > self.base.capacity {
      let candidate = inner
        .images
        .iter_rev()
        .find(|(id, _)| !skipped.contains(*id))
        .map(|(id, img)| (id.clone(), img.clone()));
      let Some((img_id, img)) = candidate else {
        warn!("every eviction candidate is conflicted, abort");
        bump(&self.base.metrics.eviction_aborts);
        return;
      };

      let size = match self.base.image_size(&img) {
        Ok(size) => size,
        Err(err) => {
          error!(image = %img_id, error = %err, "error sizing eviction candidate");
          bump(&self.base.metrics.eviction_aborts);
          return;
        }
      };

      info!(image = %img_id, "evicting image");

      if let Err(err) = self.base.service.image_delete(img.image_id(), true, false) {
        if is_conflict(&err) {
          debug!(image = %img_id, "image deletion conflict detected, skip");
          skipped.push(img_id);
          continue;
        }
        if !is_no_such_image(&err) {
          error!(error = %err, "error deleting image");
          bump(&self.base.metrics.eviction_aborts);
          return;
        }
        warn!(image = %img_id, "image no longer exists");
      }

      inner.images.remove(&img_id);
      inner.level -= size;
      bump(&self.base.metrics.evicted_images);
      info!(
        image = %img_id,
        "evicted image, {}/{} ({:.3})",
        inner.level,
        self.base.capacity,
        self.base.percent(inner.level)
      );
    }
  }
}

impl ImageCache for ImageLruCache {
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

    if inner.images.move_to_front(img.id()) {
      return;
    }

    let size = match self.base.image_size(img) {
      Ok(size) => size,
      Err(err) => {
        warn!(image = %img.id(), error = %err, "error sizing image");
        bump(&self.base.metrics.rejected_puts);
        return;
      }
    };

    inner.images.push_front(img.id().clone(), img.clone());
    inner.level += size;
    bump(&self.base.metrics.puts);
    info!(
      image = %img.id(),
      "put image, {}/{} ({:.3})",
      inner.level,
      self.base.capacity,
      self.base.percent(inner.level)
    );
    self.evict(&mut inner);
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

    if inner.images.move_to_front(img.id()) {
      bump(&self.base.metrics.updates);
      info!(
        image = %img.id(),
        "updated image, {}/{} ({:.3})",
        inner.level,
        self.base.capacity,
        self.base.percent(inner.level)
      );
      return;
    }
    // Images created without a prior pull are never admitted here; only
    // the pull path feeds this policy.
    info!(image = %img.id(), "image is not in cache");
  }

  fn remove_image(&self, img_id: &ImageId) {
    let mut inner = self.inner.write();

    let Some(img) = inner.images.get(img_id).cloned() else {
      warn!(image = %img_id, "image is not in cache");
      return;
    };
    let size = match self.base.image_size(&img) {
      Ok(size) => size,
      Err(err) => {
        error!(image = %img_id, error = %err, "error sizing removed image");
        return;
      }
    };

    inner.images.remove(img_id);
    inner.level -= size;
    bump(&self.base.metrics.removes);
    info!(
      image = %img_id,
      "removed image, {}/{} ({:.3})",
      inner.level,
      self.base.capacity,
      self.base.percent(inner.level)
    );
  }

  fn metrics(&self) -> MetricsSnapshot {
    self.base.metrics.snapshot()
  }
}
