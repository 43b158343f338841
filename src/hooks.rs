//! Integration points for the daemon's image event paths.
//!
//! The daemon wires these into the tail of its pull, container-create, and
//! image-delete handlers; each translates the event into the matching cache
//! call. Cache-initiated deletions do not come back through here; the
//! cache talks to the service directly and adjusts its own accounting.

use tracing::error;

use crate::image::ImageId;
use crate::policy::ImageCache;
use crate::service::{DeleteRecord, ImageService};

/// Admits a freshly pulled image into the cache.
pub fn image_pulled(cache: &dyn ImageCache, service: &dyn ImageService, reference: &str) {
  match service.get_image(reference) {
    Ok(img) => cache.put_image(Some(&img)),
    Err(err) => error!(reference, error = %err, "error getting pulled image"),
  }
}

/// Marks the image backing a new container as recently used.
pub fn container_created(cache: &dyn ImageCache, image_ref: &str) {
  cache.update_image(image_ref);
}

/// Drops cache accounting for every image a client-initiated delete
/// actually removed.
pub fn images_deleted(cache: &dyn ImageCache, records: &[DeleteRecord]) {
  for record in records {
    if let Some(deleted) = record.deleted.as_deref() {
      if !deleted.is_empty() {
        cache.remove_image(&ImageId::from(deleted));
      }
    }
  }
}
