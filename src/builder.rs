//! Factory: policy selection, capacity parsing, and warm-load.

use std::sync::Arc;

use tracing::{info, warn};

use crate::capacity::{parse_size, DEFAULT_CAPACITY, DEFAULT_CAPACITY_BYTES};
use crate::config::{
  CacheConfig, POLICY_ARCHIVE_LRU, POLICY_IMAGE_LRU, POLICY_LAYER_LRU, POLICY_NAIVE,
};
use crate::error::BuildError;
use crate::policy::archive_lru::ArchiveLruCache;
use crate::policy::image_lru::ImageLruCache;
use crate::policy::layer_lru::LayerLruCache;
use crate::policy::naive::NaiveCache;
use crate::policy::ImageCache;
use crate::service::ImageService;

/// Builds the configured cache engine and warm-loads the image store's
/// current contents into it.
pub fn new_image_cache(
  cfg: &CacheConfig,
  service: Arc<dyn ImageService>,
) -> Result<Arc<dyn ImageCache>, BuildError> {
  let capacity = match parse_size(&cfg.capacity) {
    Ok(capacity) => capacity,
    Err(err) => {
      warn!(
        error = %err,
        "failed to parse the cache capacity, falling back to the default ({DEFAULT_CAPACITY})"
      );
      DEFAULT_CAPACITY_BYTES
    }
  };

  let cache: Arc<dyn ImageCache> = match cfg.policy.to_lowercase().as_str() {
    POLICY_LAYER_LRU => Arc::new(LayerLruCache::new(capacity, service.clone())),
    POLICY_ARCHIVE_LRU => {
      if !cfg.archive {
        return Err(BuildError::ArchiveDisabled);
      }
      Arc::new(ArchiveLruCache::new(capacity, service.clone()))
    }
    POLICY_NAIVE => Arc::new(NaiveCache::new(capacity, service.clone())),
    POLICY_IMAGE_LRU => Arc::new(ImageLruCache::new(capacity, service.clone())),
    other => {
      info!(policy = other, "unknown cache policy, defaulting to {POLICY_IMAGE_LRU}");
      Arc::new(ImageLruCache::new(capacity, service.clone()))
    }
  };
  info!(policy = %cfg.policy, capacity, "image cache ready");

  warm_load(cache.as_ref(), service.as_ref());
  Ok(cache)
}

/// Admits everything already present in the image store. Per-image
/// admission failures are logged by the engine and skipped.
fn warm_load(cache: &dyn ImageCache, service: &dyn ImageService) {
  let images = service.images();
  info!(count = images.len(), "loading existing images into cache");
  for img in &images {
    cache.put_image(Some(img));
  }
}
