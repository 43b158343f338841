#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use stowage::{
  ChainId, DeleteRecord, DiffId, Image, ImageService, LayerHandle, ReleasedLayer, RootFs,
  ServiceError,
};

/// Installs a fmt subscriber honoring `RUST_LOG`, once per test binary.
pub fn init_logging() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

#[derive(Debug)]
struct MockLayer {
  diff_id: DiffId,
  diff_size: i64,
  parent: Option<ChainId>,
  refs: u32,
}

#[derive(Default)]
struct State {
  images: HashMap<String, Image>,
  layers: HashMap<ChainId, MockLayer>,
  conflicts: HashSet<String>,
  fail_layer_gets: HashSet<ChainId>,
  deleted: Vec<String>,
  delete_calls: Vec<(String, bool, bool)>,
}

/// A scripted image service: a refcounted layer store in miniature, with
/// conflict and failure injection plus call recording. Every registered
/// image holds one store reference per chain in its stack, and every layer
/// holds one reference on its parent, so releases cascade the way the real
/// layer store's do.
#[derive(Default)]
pub struct MockImageService {
  state: Mutex<State>,
}

impl MockImageService {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// Registers an image built from `(diff hex, diff size)` pairs, creating
  /// its layers in the store as needed.
  pub fn seed(&self, id: &str, diffs: &[(&str, i64)]) -> Image {
    let diff_ids: Vec<DiffId> = diffs
      .iter()
      .map(|(hex, _)| DiffId::from(format!("sha256:{hex}")))
      .collect();
    let img = Image::new(
      format!("sha256:{id}"),
      "linux",
      RootFs::new(diff_ids.clone()),
    );
    let chain_ids = img.rootfs().chain_ids();

    let mut state = self.state.lock();
    for (i, chain_id) in chain_ids.iter().enumerate() {
      if !state.layers.contains_key(chain_id) {
        let parent = (i > 0).then(|| chain_ids[i - 1].clone());
        state.layers.insert(
          chain_id.clone(),
          MockLayer {
            diff_id: diff_ids[i].clone(),
            diff_size: diffs[i].1,
            parent,
            refs: 0,
          },
        );
        if i > 0 {
          state.layers.get_mut(&chain_ids[i - 1]).unwrap().refs += 1;
        }
      }
      state.layers.get_mut(chain_id).unwrap().refs += 1;
    }
    state.images.insert(img.image_id().to_owned(), img.clone());
    img
  }

  /// Image deletions for `img` fail with a conflict until cleared.
  pub fn set_conflict(&self, img: &Image) {
    self
      .state
      .lock()
      .conflicts
      .insert(img.image_id().to_owned());
  }

  pub fn clear_conflict(&self, img: &Image) {
    self.state.lock().conflicts.remove(img.image_id());
  }

  /// Layer acquisitions for `chain_id` fail until the end of the test.
  pub fn fail_layer_get(&self, chain_id: &ChainId) {
    self.state.lock().fail_layer_gets.insert(chain_id.clone());
  }

  /// Simulates the image disappearing behind the cache's back, leaving its
  /// layers (and their references) in place.
  pub fn forget_image(&self, img: &Image) {
    self.state.lock().images.remove(img.image_id());
  }

  /// Drains a layer's reference count to zero, as a concurrent release
  /// storm would.
  pub fn drain_refs(&self, chain_id: &ChainId) {
    self.state.lock().layers.get_mut(chain_id).unwrap().refs = 0;
  }

  /// Image IDs successfully deleted, in order.
  pub fn deleted(&self) -> Vec<String> {
    self.state.lock().deleted.clone()
  }

  /// Every `image_delete` call as `(ref, force, prune)`, in order.
  pub fn delete_calls(&self) -> Vec<(String, bool, bool)> {
    self.state.lock().delete_calls.clone()
  }

  pub fn has_image(&self, img: &Image) -> bool {
    self.state.lock().images.contains_key(img.image_id())
  }

  pub fn has_layer(&self, chain_id: &ChainId) -> bool {
    self.state.lock().layers.contains_key(chain_id)
  }

  pub fn layer_refs(&self, chain_id: &ChainId) -> Option<u32> {
    self.state.lock().layers.get(chain_id).map(|layer| layer.refs)
  }
}

fn cumulative_size(state: &State, chain_id: &ChainId) -> i64 {
  let mut total = 0;
  let mut cursor = Some(chain_id.clone());
  while let Some(chain) = cursor {
    let Some(layer) = state.layers.get(&chain) else {
      break;
    };
    total += layer.diff_size;
    cursor = layer.parent.clone();
  }
  total
}

fn destroy_if_unreferenced(
  state: &mut State,
  chain_id: &ChainId,
  released: &mut Vec<ReleasedLayer>,
) {
  if !state
    .layers
    .get(chain_id)
    .map_or(false, |layer| layer.refs == 0)
  {
    return;
  }
  let layer = state.layers.remove(chain_id).unwrap();
  released.push(ReleasedLayer {
    chain_id: chain_id.clone(),
    diff_id: layer.diff_id,
    diff_size: layer.diff_size,
  });
  if let Some(parent) = layer.parent {
    if let Some(entry) = state.layers.get_mut(&parent) {
      entry.refs -= 1;
    }
    destroy_if_unreferenced(state, &parent, released);
  }
}

impl ImageService for MockImageService {
  fn get_image(&self, ref_or_id: &str) -> Result<Image, ServiceError> {
    self
      .state
      .lock()
      .images
      .get(ref_or_id)
      .cloned()
      .ok_or_else(|| ServiceError::new(format!("no such image: {ref_or_id}")))
  }

  fn image_delete(
    &self,
    image_ref: &str,
    force: bool,
    prune: bool,
  ) -> Result<Vec<DeleteRecord>, ServiceError> {
    let mut state = self.state.lock();
    state.delete_calls.push((image_ref.to_owned(), force, prune));
    if state.conflicts.contains(image_ref) {
      return Err(ServiceError::new(format!(
        "conflict: unable to delete {image_ref} (image is being used)"
      )));
    }
    let Some(img) = state.images.remove(image_ref) else {
      return Err(ServiceError::new(format!("no such image: {image_ref}")));
    };
    state.deleted.push(image_ref.to_owned());
    for chain_id in img.rootfs().chain_ids() {
      if let Some(layer) = state.layers.get_mut(&chain_id) {
        layer.refs = layer.refs.saturating_sub(1);
      }
      let mut released = Vec::new();
      destroy_if_unreferenced(&mut state, &chain_id, &mut released);
    }
    Ok(vec![DeleteRecord {
      deleted: Some(image_ref.to_owned()),
      untagged: None,
    }])
  }

  fn get_read_only_layer(&self, chain_id: &ChainId, _os: &str) -> Result<LayerHandle, ServiceError> {
    let mut state = self.state.lock();
    if state.fail_layer_gets.contains(chain_id) {
      return Err(ServiceError::new(format!(
        "layer store failure for {chain_id}"
      )));
    }
    let size = cumulative_size(&state, chain_id);
    let Some(layer) = state.layers.get_mut(chain_id) else {
      return Err(ServiceError::new(format!("layer does not exist: {chain_id}")));
    };
    layer.refs += 1;
    Ok(LayerHandle::new(
      chain_id.clone(),
      layer.diff_id.clone(),
      layer.diff_size,
      size,
    ))
  }

  fn release_read_only_layer(
    &self,
    layer: &LayerHandle,
    _os: &str,
  ) -> Result<Vec<ReleasedLayer>, ServiceError> {
    let mut state = self.state.lock();
    let chain_id = layer.chain_id().clone();
    match state.layers.get_mut(&chain_id) {
      Some(entry) if entry.refs > 0 => entry.refs -= 1,
      _ => {
        return Err(ServiceError::new(format!("layer not retained: {chain_id}")));
      }
    }
    let mut released = Vec::new();
    destroy_if_unreferenced(&mut state, &chain_id, &mut released);
    Ok(released)
  }

  fn images(&self) -> Vec<Image> {
    self.state.lock().images.values().cloned().collect()
  }
}
