use std::sync::Arc;

use corten::buffer::BufferPoolManager;
use corten::common::{PageId, RecordId, SlotId};
use corten::index::{BPlusTree, IndexKey, IntegerComparator};
use corten::storage::disk::DiskManager;

fn main() {
    env_logger::init();

    println!("Corten - storage-engine core demo");
    println!("=================================\n");

    let db_path = "demo.db";
    let disk_manager = Arc::new(DiskManager::new(db_path).expect("failed to open database file"));
    println!("Opened database file: {}", db_path);

    let bpm = Arc::new(BufferPoolManager::new(16, 2, disk_manager));
    println!("Created buffer pool with 16 frames, LRU-2 replacement\n");

    let tree = BPlusTree::new("demo_index", Arc::clone(&bpm), IntegerComparator, 8, 8);

    for key in [42u64, 7, 19, 3, 88, 51, 64, 25, 11, 30] {
        let rid = RecordId::new(PageId::new(100 + key as u32), SlotId::new(0));
        tree.insert(&IndexKey::from_u64(key), rid)
            .expect("insert failed");
        println!("Inserted key {}", key);
    }

    println!("\nPoint lookup for key 19:");
    match tree.get_value(&IndexKey::from_u64(19)).expect("lookup failed") {
        Some(rid) => println!("  found {}", rid),
        None => println!("  not found"),
    }

    println!("\nRange scan from key 20:");
    let iter = tree
        .iter_from(&IndexKey::from_u64(20))
        .expect("scan failed");
    for entry in iter {
        let (key, rid) = entry.expect("scan step failed");
        println!("  {} -> {}", key, rid);
    }

    tree.remove(&IndexKey::from_u64(42)).expect("remove failed");
    println!("\nRemoved key 42; lookup now yields {:?}",
        tree.get_value(&IndexKey::from_u64(42)).expect("lookup failed"));

    bpm.flush_all_pages().expect("flush failed");
    println!("Flushed all pages to disk");

    std::fs::remove_file(db_path).ok();
    println!("\nDemo completed successfully!");
}
