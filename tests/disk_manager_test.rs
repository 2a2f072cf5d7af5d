//! Integration tests for the disk layer

use std::sync::Arc;

use corten::common::{PageId, PAGE_SIZE};
use corten::storage::disk::{DiskManager, DiskScheduler};

#[test]
fn test_read_write_round_trip() {
    let temp_dir = tempfile::tempdir().unwrap();
    let dm = DiskManager::new(temp_dir.path().join("test.db")).unwrap();

    let mut data = [0u8; PAGE_SIZE];
    data[0] = 42;
    data[100] = 255;
    data[PAGE_SIZE - 1] = 128;
    dm.write_page(PageId::new(0), &data).unwrap();

    let mut out = [0u8; PAGE_SIZE];
    dm.read_page(PageId::new(0), &mut out).unwrap();
    assert_eq!(out[0], 42);
    assert_eq!(out[100], 255);
    assert_eq!(out[PAGE_SIZE - 1], 128);
}

#[test]
fn test_sparse_reads_zero_fill() {
    let temp_dir = tempfile::tempdir().unwrap();
    let dm = DiskManager::new(temp_dir.path().join("sparse.db")).unwrap();

    let data = [7u8; PAGE_SIZE];
    dm.write_page(PageId::new(2), &data).unwrap();

    // Pages 5 and beyond were never written.
    let mut out = [0xEEu8; PAGE_SIZE];
    dm.read_page(PageId::new(5), &mut out).unwrap();
    assert!(out.iter().all(|&b| b == 0));
}

#[test]
fn test_io_counters() {
    let temp_dir = tempfile::tempdir().unwrap();
    let dm = DiskManager::new(temp_dir.path().join("count.db")).unwrap();

    let data = [1u8; PAGE_SIZE];
    dm.write_page(PageId::new(0), &data).unwrap();
    dm.write_page(PageId::new(1), &data).unwrap();
    let mut out = [0u8; PAGE_SIZE];
    dm.read_page(PageId::new(0), &mut out).unwrap();

    assert_eq!(dm.num_writes(), 2);
    assert_eq!(dm.num_reads(), 1);
    assert_eq!(dm.num_pages(), 2);
}

#[test]
fn test_reopen_preserves_pages() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("reopen.db");

    {
        let dm = DiskManager::new(&path).unwrap();
        let mut data = [0u8; PAGE_SIZE];
        data[0] = 123;
        dm.write_page(PageId::new(3), &data).unwrap();
        dm.sync().unwrap();
    }
    {
        let dm = DiskManager::new(&path).unwrap();
        assert_eq!(dm.num_pages(), 4);
        let mut data = [0u8; PAGE_SIZE];
        dm.read_page(PageId::new(3), &mut data).unwrap();
        assert_eq!(data[0], 123);
    }
}

#[test]
fn test_scheduler_round_trip() {
    let temp_dir = tempfile::tempdir().unwrap();
    let dm = Arc::new(DiskManager::new(temp_dir.path().join("sched.db")).unwrap());
    let scheduler = DiskScheduler::new(Arc::clone(&dm));

    let mut write_data = [0u8; PAGE_SIZE];
    write_data[9] = 9;
    scheduler
        .schedule_write_sync(PageId::new(4), &write_data)
        .unwrap();

    let mut read_data = [0u8; PAGE_SIZE];
    scheduler
        .schedule_read_sync(PageId::new(4), &mut read_data)
        .unwrap();
    assert_eq!(read_data[9], 9);
    assert_eq!(dm.num_writes(), 1);
}

#[test]
fn test_scheduler_interleaved_requests() {
    let temp_dir = tempfile::tempdir().unwrap();
    let dm = Arc::new(DiskManager::new(temp_dir.path().join("inter.db")).unwrap());
    let scheduler = DiskScheduler::new(dm);

    for i in 0..32u8 {
        let data = [i; PAGE_SIZE];
        scheduler
            .schedule_write_sync(PageId::new(i as u32), &data)
            .unwrap();

        let mut out = [0u8; PAGE_SIZE];
        scheduler
            .schedule_read_sync(PageId::new(i as u32), &mut out)
            .unwrap();
        assert_eq!(out[0], i);
    }
}
