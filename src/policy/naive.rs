use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::base::CacheBase;
use crate::image::{Image, ImageId};
use crate::metrics::{bump, MetricsSnapshot};
use crate::policy::ImageCache;
use crate::service::ImageService;

/// Emergency-reclaim fallback with no recency order: when the level
/// crosses the capacity, one pass force-deletes every image except the one
/// currently being admitted. Accounting is dropped even when a delete
/// fails.
pub struct NaiveCache {
  base: CacheBase,
  inner: RwLock<NaiveInner>,
}

struct NaiveInner {
  level: i64,
  images: HashMap<String, i64, ahash::RandomState>,
}

impl NaiveCache {
  pub fn new(capacity: i64, service: Arc<dyn ImageService>) -> Self {
    Self {
      base: CacheBase::new(capacity, service),
      inner: RwLock::new(NaiveInner {
        level: 0,
        images: HashMap::default(),
      }),
    }
  }

  fn evict(&self, inner: &mut NaiveInner, current: Option<&str>) {
    if inner.level <= self.base.capacity {
      return;
    }

    let victims: Vec<(String, i64)> = inner
      .images
      .iter()
      .filter(|(id, _)| Some(id.as_str()) != current)
      .map(|(id, size)| (id.clone(), *size))
      .collect();
    for (img_id, size) in victims {
      if let Err(err) = self.base.service.image_delete(&img_id, true, true) {
        error!(image = %img_id, error = %err, "error deleting image");
      }
      inner.images.remove(&img_id);
      inner.level -= size;
      bump(&self.base.metrics.evicted_images);
    }
    info!(
      "evicted images, {}/{} ({:.3})",
      inner.level,
      self.base.capacity,
      self.base.percent(inner.level)
    );
  }
}

impl ImageCache for NaiveCache {
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

    if inner.images.contains_key(img.image_id()) {
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

    inner.images.insert(img.image_id().to_owned(), size);
    inner.level += size;
    bump(&self.base.metrics.puts);
    info!(
      image = %img.id(),
      "put image, {}/{} ({:.3})",
      inner.level,
      self.base.capacity,
      self.base.percent(inner.level)
    );
    self.evict(&mut inner, Some(img.image_id()));
  }

  fn update_image(&self, _ref_or_id: &str) {
    let mut inner = self.inner.write();
    bump(&self.base.metrics.updates);
    self.evict(&mut inner, None);
  }

  fn remove_image(&self, img_id: &ImageId) {
    let mut inner = self.inner.write();

    let Some(size) = inner.images.remove(img_id.as_str()) else {
      return;
    };
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
