//! Integration tests for the extendible hash directory

use std::hash::{BuildHasher, Hasher};
use std::sync::Arc;
use std::thread;

use corten::common::{FrameId, PageId};
use corten::container::ExtendibleHashTable;

/// Hashes u64 keys to themselves so directory splits are predictable.
#[derive(Default, Clone)]
struct IdentityState;

struct IdentityHasher(u64);

impl Hasher for IdentityHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        let mut buf = [0u8; 8];
        let n = bytes.len().min(8);
        buf[..n].copy_from_slice(&bytes[..n]);
        self.0 = u64::from_le_bytes(buf);
    }

    fn write_u64(&mut self, value: u64) {
        self.0 = value;
    }
}

impl BuildHasher for IdentityState {
    type Hasher = IdentityHasher;

    fn build_hasher(&self) -> IdentityHasher {
        IdentityHasher(0)
    }
}

#[test]
fn test_directory_growth_on_colliding_prefixes() {
    // Keys 0b000, 0b010, 0b100 share the low bit, so a two-entry bucket
    // must split twice before the third key fits.
    let table: ExtendibleHashTable<u64, u64, _> =
        ExtendibleHashTable::with_hasher(2, IdentityState);

    table.insert(0b000, 10);
    table.insert(0b010, 20);
    assert_eq!(table.global_depth(), 0);
    assert_eq!(table.num_buckets(), 1);

    table.insert(0b100, 30);
    assert_eq!(table.global_depth(), 2);
    assert_eq!(table.num_buckets(), 3);

    assert_eq!(table.find(&0b000), Some(10));
    assert_eq!(table.find(&0b010), Some(20));
    assert_eq!(table.find(&0b100), Some(30));
}

#[test]
fn test_directory_slots_respect_prefixes() {
    let table: ExtendibleHashTable<u64, u64, _> =
        ExtendibleHashTable::with_hasher(2, IdentityState);

    for key in 0..32u64 {
        table.insert(key, key + 1000);
    }

    let global = table.global_depth();
    for slot in 0..(1usize << global) {
        assert!(table.local_depth(slot) <= global);
    }
    for key in 0..32u64 {
        assert_eq!(table.find(&key), Some(key + 1000));
    }
}

#[test]
fn test_upsert_semantics() {
    let table = ExtendibleHashTable::<u32, String>::new(4);

    table.insert(1, "first".to_string());
    table.insert(1, "second".to_string());
    assert_eq!(table.find(&1), Some("second".to_string()));
    assert_eq!(table.len(), 1);
}

#[test]
fn test_remove_returns_existence() {
    let table = ExtendibleHashTable::<u32, u32>::new(4);

    table.insert(8, 80);
    assert!(table.remove(&8));
    assert!(!table.remove(&8));
    assert!(!table.remove(&9));
    assert!(table.is_empty());
}

#[test]
fn test_page_table_usage() {
    // The buffer pool maps page ids to frame ids through this table.
    let table = ExtendibleHashTable::<PageId, FrameId>::new(8);

    for i in 0..64u32 {
        table.insert(PageId::new(i), FrameId::new(i % 16));
    }
    assert_eq!(table.find(&PageId::new(40)), Some(FrameId::new(8)));
    assert!(table.remove(&PageId::new(40)));
    assert_eq!(table.find(&PageId::new(40)), None);
}

#[test]
fn test_concurrent_insert_and_find() {
    let table = Arc::new(ExtendibleHashTable::<u64, u64>::new(4));

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for i in 0..256u64 {
                    let key = t * 1000 + i;
                    table.insert(key, key * 2);
                    assert_eq!(table.find(&key), Some(key * 2));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(table.len(), 4 * 256);
    for t in 0..4u64 {
        for i in 0..256u64 {
            let key = t * 1000 + i;
            assert_eq!(table.find(&key), Some(key * 2));
        }
    }
}
