use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

pub(crate) fn bump(counter: &AtomicU64) {
  counter.fetch_add(1, Ordering::Relaxed);
}

/// Lock-free operation counters shared by every engine.
#[derive(Debug, Default)]
pub(crate) struct Metrics {
  pub(crate) puts: CachePadded<AtomicU64>,
  pub(crate) rejected_puts: CachePadded<AtomicU64>,
  pub(crate) updates: CachePadded<AtomicU64>,
  pub(crate) removes: CachePadded<AtomicU64>,
  pub(crate) evicted_images: CachePadded<AtomicU64>,
  pub(crate) evicted_layers: CachePadded<AtomicU64>,
  pub(crate) eviction_aborts: CachePadded<AtomicU64>,
}

impl Metrics {
  /// Creates a point-in-time snapshot of the current counters.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    MetricsSnapshot {
      puts: self.puts.load(Ordering::Relaxed),
      rejected_puts: self.rejected_puts.load(Ordering::Relaxed),
      updates: self.updates.load(Ordering::Relaxed),
      removes: self.removes.load(Ordering::Relaxed),
      evicted_images: self.evicted_images.load(Ordering::Relaxed),
      evicted_layers: self.evicted_layers.load(Ordering::Relaxed),
      eviction_aborts: self.eviction_aborts.load(Ordering::Relaxed),
    }
  }
}

/// A point-in-time, public-facing snapshot of the cache's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
  /// Images admitted into the cache.
  pub puts: u64,
  /// Admissions rejected by the size precheck or a failed size probe.
  pub rejected_puts: u64,
  /// Update events that touched resident state.
  pub updates: u64,
  /// Client-driven removals that dropped accounting.
  pub removes: u64,
  /// Images the cache asked the service to delete, successfully.
  pub evicted_images: u64,
  /// Layer records dropped by eviction.
  pub evicted_layers: u64,
  /// Eviction passes abandoned after retry exhaustion or a store error.
  pub eviction_aborts: u64,
}
