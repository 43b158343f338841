use std::sync::Arc;

use tracing::warn;

use crate::image::Image;
use crate::metrics::Metrics;
use crate::service::{ImageService, ServiceError};

/// Bookkeeping shared by every policy engine.
///
/// Each engine embeds one of these next to its locked state; the mutable
/// level lives inside the engine's lock so level and index always move in
/// the same critical section.
pub(crate) struct CacheBase {
  pub(crate) service: Arc<dyn ImageService>,
  pub(crate) capacity: i64,
  pub(crate) metrics: Arc<Metrics>,
}

impl CacheBase {
  pub(crate) fn new(capacity: i64, service: Arc<dyn ImageService>) -> Self {
    Self {
      service,
      capacity,
      metrics: Arc::new(Metrics::default()),
    }
  }

  /// Rejects images whose top layer alone cannot fit in the cache. This
  /// runs before any eviction is attempted.
  pub(crate) fn check_image_size(&self, img: &Image) -> Result<(), ServiceError> {
    let size = self.image_size(img)?;
    if size > self.capacity {
      return Err(ServiceError::new(format!(
        "image {} ({} bytes) is larger than the cache capacity ({} bytes)",
        img.image_id(),
        size,
        self.capacity
      )));
    }
    Ok(())
  }

  /// Cumulative size of the image's top layer. The probe handle is
  /// released on every exit path.
  pub(crate) fn image_size(&self, img: &Image) -> Result<i64, ServiceError> {
    let chain_id = img
      .rootfs()
      .chain_id()
      .ok_or_else(|| ServiceError::new(format!("image {} has no layers", img.image_id())))?;
    let layer = self
      .service
      .get_read_only_layer(&chain_id, img.operating_system())?;
    let size = layer.size();
    if let Err(err) = self
      .service
      .release_read_only_layer(&layer, img.operating_system())
    {
      warn!(layer = %chain_id, error = %err, "failed to release size-probe layer handle");
    }
    Ok(size)
  }

  /// Fill ratio, used only for logging.
  pub(crate) fn percent(&self, level: i64) -> f64 {
    level as f64 / self.capacity as f64
  }
}
