use std::fmt;

use sha2::{Digest, Sha256};

/// Content identifier of a whole image, in `sha256:<hex>` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(String);

/// Content hash of a single uncompressed layer diff.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiffId(String);

/// Cumulative content hash of a layer stack up to and including a given
/// layer. Chain IDs are unique per distinct stacking; images sharing a
/// prefix of diffs share a prefix of chain IDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(String);

macro_rules! impl_digest_id {
  ($name:ident) => {
    impl $name {
      pub fn as_str(&self) -> &str {
        &self.0
      }

      /// The hex part of the digest, without the algorithm prefix.
      pub fn hex(&self) -> &str {
        self.0.split_once(':').map(|(_, hex)| hex).unwrap_or(&self.0)
      }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
      }
    }

    impl From<&str> for $name {
      fn from(value: &str) -> Self {
        Self(value.to_owned())
      }
    }

    impl From<String> for $name {
      fn from(value: String) -> Self {
        Self(value)
      }
    }
  };
}

impl_digest_id!(ImageId);
impl_digest_id!(DiffId);
impl_digest_id!(ChainId);

/// Chain ID of a diff stack: `chain_0 = diff_0`,
/// `chain_i = sha256(chain_(i-1) + " " + diff_i)`. Empty stacks have no
/// chain ID.
pub fn create_chain_id(diff_ids: &[DiffId]) -> Option<ChainId> {
  let (first, rest) = diff_ids.split_first()?;
  let mut chain = first.as_str().to_owned();
  for diff in rest {
    let mut hasher = Sha256::new();
    hasher.update(chain.as_bytes());
    hasher.update(b" ");
    hasher.update(diff.as_str().as_bytes());
    chain = format!("sha256:{:x}", hasher.finalize());
  }
  Some(ChainId(chain))
}

/// The ordered layer diffs an image is built from, base layer first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootFs {
  diff_ids: Vec<DiffId>,
}

impl RootFs {
  pub fn new(diff_ids: Vec<DiffId>) -> Self {
    Self { diff_ids }
  }

  pub fn diff_ids(&self) -> &[DiffId] {
    &self.diff_ids
  }

  /// Chain ID of the topmost layer, `None` for an empty rootfs.
  pub fn chain_id(&self) -> Option<ChainId> {
    create_chain_id(&self.diff_ids)
  }

  /// Cumulative chain IDs for every prefix of the stack, base layer first.
  pub fn chain_ids(&self) -> Vec<ChainId> {
    let mut chain_ids = Vec::with_capacity(self.diff_ids.len());
    for end in 1..=self.diff_ids.len() {
      if let Some(chain_id) = create_chain_id(&self.diff_ids[..end]) {
        chain_ids.push(chain_id);
      }
    }
    chain_ids
  }
}

/// An image as the backing image store describes it: identity, target
/// operating system, and the rootfs diff stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
  id: ImageId,
  os: String,
  rootfs: RootFs,
}

impl Image {
  pub fn new(id: impl Into<ImageId>, os: impl Into<String>, rootfs: RootFs) -> Self {
    Self {
      id: id.into(),
      os: os.into(),
      rootfs,
    }
  }

  pub fn id(&self) -> &ImageId {
    &self.id
  }

  /// The identifier in string form, as the image service's delete and
  /// lookup operations expect it.
  pub fn image_id(&self) -> &str {
    self.id.as_str()
  }

  pub fn operating_system(&self) -> &str {
    &self.os
  }

  pub fn rootfs(&self) -> &RootFs {
    &self.rootfs
  }
}
