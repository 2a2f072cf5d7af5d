use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};

use parking_lot::Mutex;

use crate::common::MAX_GLOBAL_DEPTH;

/// A bucket of key/value entries with a local depth. Every key in the bucket
/// agrees with the bucket's canonical prefix on the low `depth` hash bits.
#[derive(Debug)]
struct Bucket<K, V> {
    depth: usize,
    items: Vec<(K, V)>,
}

impl<K: Eq, V> Bucket<K, V> {
    fn new(depth: usize, capacity: usize) -> Self {
        Self {
            depth,
            items: Vec::with_capacity(capacity),
        }
    }

    fn find(&self, key: &K) -> Option<&V> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn remove(&mut self, key: &K) -> bool {
        if let Some(pos) = self.items.iter().position(|(k, _)| k == key) {
            self.items.swap_remove(pos);
            true
        } else {
            false
        }
    }

    /// Upserts into the bucket. Returns false when the key is new and the
    /// bucket has no room, leaving the bucket unchanged.
    fn insert(&mut self, key: K, value: V, capacity: usize) -> bool {
        if let Some((_, v)) = self.items.iter_mut().find(|(k, _)| *k == key) {
            *v = value;
            return true;
        }
        if self.items.len() >= capacity {
            return false;
        }
        self.items.push((key, value));
        true
    }
}

/// Directory state: slots map to buckets in an arena. Several slots may share
/// one bucket while its local depth is below the global depth.
#[derive(Debug)]
struct Directory<K, V> {
    global_depth: usize,
    dir: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

/// In-memory extendible hash table mapping keys to values.
///
/// The directory doubles when a full bucket's local depth reaches the global
/// depth; full buckets split on the next hash bit until the pending insert
/// fits. Buckets are never merged back. All public operations serialize on a
/// single coarse mutex - the table sits on the buffer pool's slow path, where
/// contention is not the bottleneck.
///
/// The hasher is injectable so tests can pin hash values; production use goes
/// through `new`, which picks the standard `RandomState`.
pub struct ExtendibleHashTable<K, V, S = RandomState> {
    bucket_size: usize,
    hasher: S,
    inner: Mutex<Directory<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> ExtendibleHashTable<K, V, RandomState> {
    /// Creates a table whose buckets hold up to `bucket_size` entries.
    pub fn new(bucket_size: usize) -> Self {
        Self::with_hasher(bucket_size, RandomState::new())
    }
}

impl<K: Hash + Eq + Clone, V: Clone, S: BuildHasher> ExtendibleHashTable<K, V, S> {
    pub fn with_hasher(bucket_size: usize, hasher: S) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        Self {
            bucket_size,
            hasher,
            inner: Mutex::new(Directory {
                global_depth: 0,
                dir: vec![0],
                buckets: vec![Bucket::new(0, bucket_size)],
            }),
        }
    }

    fn hash_of(&self, key: &K) -> u64 {
        self.hasher.hash_one(key)
    }

    /// Directory slot for `key` at the given global depth.
    fn index_of(&self, key: &K, global_depth: usize) -> usize {
        (self.hash_of(key) as usize) & ((1 << global_depth) - 1)
    }

    /// Returns the value bound to `key`, if any.
    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let idx = self.index_of(key, inner.global_depth);
        inner.buckets[inner.dir[idx]].find(key).cloned()
    }

    /// Inserts or overwrites the binding for `key`, splitting buckets (and
    /// doubling the directory) until the entry fits.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();

        loop {
            let idx = self.index_of(&key, inner.global_depth);
            let bucket_idx = inner.dir[idx];

            if inner.buckets[bucket_idx].insert(key.clone(), value.clone(), self.bucket_size) {
                return;
            }

            // Bucket is full. Grow the directory first if the bucket already
            // uses every directory bit.
            if inner.buckets[bucket_idx].depth == inner.global_depth {
                assert!(
                    inner.global_depth < MAX_GLOBAL_DEPTH,
                    "extendible hash directory depth overflow: degenerate hash distribution"
                );
                let old_len = inner.dir.len();
                for i in 0..old_len {
                    let mirrored = inner.dir[i];
                    inner.dir.push(mirrored);
                }
                inner.global_depth += 1;
            }

            self.split_bucket(&mut inner, bucket_idx);
        }
    }

    /// Splits `bucket_idx` on its next hash bit, redistributing entries and
    /// re-aiming the directory slots that move to the new bucket.
    fn split_bucket(&self, inner: &mut Directory<K, V>, bucket_idx: usize) {
        let old_depth = inner.buckets[bucket_idx].depth;
        inner.buckets[bucket_idx].depth += 1;

        let items = std::mem::take(&mut inner.buckets[bucket_idx].items);
        let mut stay = Vec::with_capacity(items.len());
        let mut moved = Vec::with_capacity(items.len());
        for (k, v) in items {
            if (self.hash_of(&k) >> old_depth) & 1 == 1 {
                moved.push((k, v));
            } else {
                stay.push((k, v));
            }
        }
        inner.buckets[bucket_idx].items = stay;

        let new_idx = inner.buckets.len();
        let mut new_bucket = Bucket::new(old_depth + 1, self.bucket_size);
        new_bucket.items = moved;
        inner.buckets.push(new_bucket);

        for slot in 0..inner.dir.len() {
            if inner.dir[slot] == bucket_idx && (slot >> old_depth) & 1 == 1 {
                inner.dir[slot] = new_idx;
            }
        }
    }

    /// Removes the binding for `key`. Returns whether a binding existed.
    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let idx = self.index_of(key, inner.global_depth);
        let bucket_idx = inner.dir[idx];
        inner.buckets[bucket_idx].remove(key)
    }

    pub fn global_depth(&self) -> usize {
        self.inner.lock().global_depth
    }

    /// Local depth of the bucket referenced by directory slot `dir_index`.
    pub fn local_depth(&self, dir_index: usize) -> usize {
        let inner = self.inner.lock();
        assert!(dir_index < inner.dir.len(), "directory index out of range");
        inner.buckets[inner.dir[dir_index]].depth
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.lock().buckets.len()
    }

    /// Total number of entries across all buckets.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.buckets.iter().map(|b| b.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_find() {
        let table = ExtendibleHashTable::<u32, String>::new(4);

        table.insert(1, "a".to_string());
        table.insert(2, "b".to_string());
        table.insert(3, "c".to_string());

        assert_eq!(table.find(&1), Some("a".to_string()));
        assert_eq!(table.find(&2), Some("b".to_string()));
        assert_eq!(table.find(&3), Some("c".to_string()));
        assert_eq!(table.find(&4), None);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_insert_overwrites() {
        let table = ExtendibleHashTable::<u32, u32>::new(4);

        table.insert(7, 100);
        table.insert(7, 200);

        assert_eq!(table.find(&7), Some(200));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove() {
        let table = ExtendibleHashTable::<u32, u32>::new(4);

        table.insert(1, 10);
        assert!(table.remove(&1));
        assert!(!table.remove(&1));
        assert_eq!(table.find(&1), None);
    }

    #[test]
    fn test_split_preserves_entries() {
        let table = ExtendibleHashTable::<u32, u32>::new(2);

        for i in 0..64 {
            table.insert(i, i * 10);
        }

        for i in 0..64 {
            assert_eq!(table.find(&i), Some(i * 10), "lost key {}", i);
        }
        assert!(table.num_buckets() > 1);
        assert!(table.global_depth() >= 1);
    }

    #[test]
    fn test_local_depth_bounded_by_global() {
        let table = ExtendibleHashTable::<u32, u32>::new(2);

        for i in 0..128 {
            table.insert(i, i);
        }

        let global = table.global_depth();
        for slot in 0..(1usize << global) {
            assert!(table.local_depth(slot) <= global);
        }
    }
}
