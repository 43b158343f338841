use serde::Deserialize;

use crate::capacity::DEFAULT_CAPACITY;

pub const POLICY_IMAGE_LRU: &str = "image-lru";
pub const POLICY_LAYER_LRU: &str = "layer-lru";
pub const POLICY_ARCHIVE_LRU: &str = "archive-lru";
pub const POLICY_NAIVE: &str = "naive";

/// Cache construction options, embeddable in a daemon configuration file.
/// Every field has a default, so an empty table is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
  /// Eviction policy: `image-lru` (the default), `layer-lru`,
  /// `archive-lru`, or `naive`. Matched case-insensitively; unknown names
  /// fall back to `image-lru`.
  pub policy: String,
  /// Byte capacity as a size string with unit suffix (`512M`, `4GiB`).
  pub capacity: String,
  /// Enables companion-archive handling; required for `archive-lru`.
  pub archive: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      policy: POLICY_IMAGE_LRU.to_owned(),
      capacity: DEFAULT_CAPACITY.to_owned(),
      archive: false,
    }
  }
}
