mod common;

use std::sync::Arc;

use common::MockImageService;
use stowage::policy::image_lru::ImageLruCache;
use stowage::{ImageCache, ImageId};

fn cache_with(capacity: i64, service: &Arc<MockImageService>) -> ImageLruCache {
  ImageLruCache::new(capacity, service.clone())
}

#[test]
fn put_then_remove_restores_level() {
  common::init_logging();
  let service = MockImageService::new();
  let img = service.seed("a", &[("aa", 50)]);
  let cache = cache_with(100, &service);

  cache.put_image(Some(&img));
  assert_eq!(cache.level(), 50);

  cache.remove_image(img.id());
  assert_eq!(cache.level(), 0);
  assert_eq!(cache.metrics().removes, 1);
}

#[test]
fn double_put_does_not_double_account() {
  let service = MockImageService::new();
  let img = service.seed("a", &[("aa", 50)]);
  let cache = cache_with(100, &service);

  cache.put_image(Some(&img));
  cache.put_image(Some(&img));
  assert_eq!(cache.level(), 50);
  assert_eq!(cache.metrics().puts, 1);
}

#[test]
fn put_of_absent_image_is_a_noop() {
  let service = MockImageService::new();
  let cache = cache_with(100, &service);

  cache.put_image(None);
  assert_eq!(cache.level(), 0);
  assert_eq!(cache.metrics().puts, 0);
}

#[test]
fn admitting_over_capacity_evicts_the_back_image() {
  // Capacity 100, admit A(50) then B(60): the level hits 110 and the
  // least-recently-used image A is deleted, leaving 60.
  let service = MockImageService::new();
  let a = service.seed("a", &[("aa", 50)]);
  let b = service.seed("b", &[("bb", 60)]);
  let cache = cache_with(100, &service);

  cache.put_image(Some(&a));
  cache.put_image(Some(&b));

  assert_eq!(cache.level(), 60);
  assert_eq!(service.deleted(), vec!["sha256:a".to_owned()]);
  assert!(service.has_image(&b));
  assert_eq!(cache.metrics().evicted_images, 1);
  // Cache-driven deletes are forced but never prune.
  assert!(service
    .delete_calls()
    .iter()
    .any(|call| call == &("sha256:a".to_owned(), true, false)));
}

#[test]
fn update_refreshes_recency_before_eviction() {
  let service = MockImageService::new();
  let a = service.seed("a", &[("aa", 50)]);
  let b = service.seed("b", &[("bb", 60)]);
  let c = service.seed("c", &[("cc", 11)]);
  let cache = cache_with(120, &service);

  cache.put_image(Some(&a));
  cache.put_image(Some(&b));
  assert_eq!(cache.level(), 110);

  // Touch A so B becomes the eviction candidate.
  cache.update_image(a.image_id());
  assert_eq!(cache.level(), 110, "updates do not change the level");
  assert_eq!(cache.metrics().updates, 1);

  cache.put_image(Some(&c));
  assert_eq!(cache.level(), 61);
  assert_eq!(service.deleted(), vec!["sha256:b".to_owned()]);
  assert!(service.has_image(&a));
}

#[test]
fn conflicted_candidates_are_stepped_past() {
  let service = MockImageService::new();
  let a = service.seed("a", &[("aa", 50)]);
  let b = service.seed("b", &[("bb", 60)]);
  let cache = cache_with(100, &service);

  cache.put_image(Some(&a));
  service.set_conflict(&a);
  cache.put_image(Some(&b));

  // A is the back candidate but conflicted, so eviction steps past it and
  // takes B; image-lru does not protect the image being admitted.
  assert_eq!(cache.level(), 50);
  assert_eq!(service.deleted(), vec!["sha256:b".to_owned()]);
  assert!(service.has_image(&a));
}

#[test]
fn vanished_images_are_dropped_as_evicted() {
  let service = MockImageService::new();
  let a = service.seed("a", &[("aa", 50)]);
  let b = service.seed("b", &[("bb", 60)]);
  let cache = cache_with(100, &service);

  cache.put_image(Some(&a));
  service.forget_image(&a);
  cache.put_image(Some(&b));

  // The delete comes back "no such image"; the stale entry is dropped and
  // the level adjusted as if the eviction had succeeded.
  assert_eq!(cache.level(), 60);
  assert_eq!(service.deleted(), Vec::<String>::new());
  assert_eq!(cache.metrics().evicted_images, 1);
}

#[test]
fn images_larger_than_the_capacity_are_rejected() {
  let service = MockImageService::new();
  let img = service.seed("a", &[("aa", 150)]);
  let cache = cache_with(100, &service);

  cache.put_image(Some(&img));
  assert_eq!(cache.level(), 0);
  assert_eq!(cache.metrics().rejected_puts, 1);
  assert!(service.has_image(&img));
}

#[test]
fn update_never_admits_unseen_images() {
  let service = MockImageService::new();
  let img = service.seed("a", &[("aa", 50)]);
  let cache = cache_with(100, &service);

  cache.update_image(img.image_id());
  assert_eq!(cache.level(), 0);
  assert_eq!(cache.metrics().updates, 0);
}

#[test]
fn removing_an_unknown_image_changes_nothing() {
  let service = MockImageService::new();
  let img = service.seed("a", &[("aa", 50)]);
  let cache = cache_with(100, &service);
  cache.put_image(Some(&img));

  cache.remove_image(&ImageId::from("sha256:unknown"));
  assert_eq!(cache.level(), 50);
  assert_eq!(cache.metrics().removes, 0);
}

#[test]
fn concurrent_puts_account_each_image_once() {
  let service = MockImageService::new();
  let images: Vec<_> = (0..8)
    .map(|i| {
      let diff = format!("d{i}");
      service.seed(&format!("img{i}"), &[(diff.as_str(), 10)])
    })
    .collect();
  let cache = cache_with(1 << 20, &service);

  std::thread::scope(|scope| {
    for _ in 0..4 {
      scope.spawn(|| {
        for img in &images {
          cache.put_image(Some(img));
        }
      });
    }
  });

  assert_eq!(cache.level(), 80);
  assert_eq!(cache.metrics().puts, 8);
}
