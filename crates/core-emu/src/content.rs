//! Refcounted storage for inline content (OSC 1337 File payloads).
//!
//! Content is keyed by a 64-bit hash of its bytes. Image regions hold one
//! reference each; eviction decrements and the entry is dropped lazily when
//! the count reaches zero.

use std::collections::HashMap;
use std::sync::Arc;

use core_cells::ContentId;

/// FNV-1a, the stable 64-bit content hash.
pub fn content_hash(bytes: &[u8]) -> ContentId {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    // Zero is the invalid id
    if hash == 0 { 1 } else { hash }
}

#[derive(Debug)]
struct ContentRec {
    data: Arc<Vec<u8>>,
    refcount: u32,
}

#[derive(Debug, Default)]
pub struct ContentMap {
    map: HashMap<ContentId, ContentRec>,
}

impl ContentMap {
    pub fn new() -> Self {
        ContentMap::default()
    }

    /// Store (or re-reference) content, returning its id.
    pub fn insert(&mut self, data: Vec<u8>) -> ContentId {
        let id = content_hash(&data);
        self.map
            .entry(id)
            .and_modify(|rec| rec.refcount += 1)
            .or_insert_with(|| ContentRec {
                data: Arc::new(data),
                refcount: 1,
            });
        id
    }

    pub fn get(&self, id: ContentId) -> Option<Arc<Vec<u8>>> {
        self.map.get(&id).map(|rec| rec.data.clone())
    }

    /// Drop one reference; destruction is lazy.
    pub fn put(&mut self, id: ContentId) {
        if let Some(rec) = self.map.get_mut(&id) {
            rec.refcount -= 1;
            if rec.refcount == 0 {
                self.map.remove(&id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}
