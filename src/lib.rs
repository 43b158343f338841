//! Capacity-bounded image cache for a container daemon.
//!
//! `stowage` sits between the daemon's image event paths and its persistent
//! image/layer stores. Each pull, container-create, and image-delete event
//! notifies the cache; the cache tracks the bytes of resident images and,
//! when the configured capacity is exceeded, asks the backing service to
//! delete least-recently-used images and release their layer references.
//!
//! Four interchangeable policies implement the [`ImageCache`] contract:
//! whole-image LRU (the default), per-layer LRU, per-layer LRU with
//! companion-archive management, and a naive emergency-reclaim fallback.
//! The [`builder::new_image_cache`] factory selects one from a
//! [`CacheConfig`] and warm-loads the image store into it.
//!
//! The cache does not persist its own state across daemon restarts and is
//! not a content-addressed store; it rebuilds by enumerating the image
//! store on start.

pub mod archive;
pub mod builder;
pub mod capacity;
pub mod config;
pub mod error;
pub mod hooks;
pub mod image;
pub mod metrics;
pub mod policy;
pub mod service;

mod base;

pub use builder::new_image_cache;
pub use config::CacheConfig;
pub use error::BuildError;
pub use image::{create_chain_id, ChainId, DiffId, Image, ImageId, RootFs};
pub use metrics::MetricsSnapshot;
pub use policy::ImageCache;
pub use service::{DeleteRecord, ImageService, LayerHandle, ReleasedLayer, ServiceError};
