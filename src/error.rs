use thiserror::Error;

use crate::service::ServiceError;

/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// The `archive-lru` policy was requested without archive mode enabled.
  #[error(r#"the "archive-lru" cache policy requires archive mode to be enabled"#)]
  ArchiveDisabled,
}

/// The image is in use and cannot be deleted right now.
pub(crate) fn is_conflict(err: &ServiceError) -> bool {
  contains_ci(err.message(), "conflict")
}

/// The image is already gone; success for eviction's purposes.
pub(crate) fn is_no_such_image(err: &ServiceError) -> bool {
  contains_ci(err.message(), "no such image")
}

/// The layer's reference count was zero on entry to a release.
pub(crate) fn is_not_retained(err: &ServiceError) -> bool {
  contains_ci(err.message(), "layer not retained")
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
  haystack.to_lowercase().contains(needle)
}
