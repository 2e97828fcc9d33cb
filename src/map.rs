//! Hash map keyed by format tags, used for O(1) loader dispatch.

use std::collections::HashMap;
use std::hash::BuildHasher;
use twox_hash::XxHash64;

/// Builds seeded `XxHash64` hashers. Tags are trusted strings written by this
/// crate, so a fast non-keyed hash is enough.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagHasher;

impl BuildHasher for TagHasher {
    type Hasher = XxHash64;

    fn build_hasher(&self) -> XxHash64 {
        XxHash64::with_seed(0)
    }
}

/// Map from format tag to `V`.
pub type TagMap<V> = HashMap<String, V, TagHasher>;

/// Creates an empty [`TagMap`].
pub fn tag_map<V>() -> TagMap<V> {
    HashMap::with_hasher(TagHasher)
}
