//! Concurrency tests for the B+tree index

use std::sync::Arc;
use std::thread;

use oxbow::buffer::BufferPoolManager;
use oxbow::common::{PageId, RecordId, SlotId};
use oxbow::index::{BPlusTree, UnsignedComparator};
use oxbow::storage::disk::DiskManager;

use tempfile::NamedTempFile;

fn create_tree(
    pool_size: usize,
    max_size: usize,
) -> (Arc<BPlusTree<UnsignedComparator>>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, 2, disk_manager));
    let tree = Arc::new(BPlusTree::new(
        "concurrent",
        bpm,
        UnsignedComparator,
        max_size,
        max_size,
    ));
    (tree, temp_file)
}

fn rid(key: u64) -> RecordId {
    RecordId::new(PageId::new(key as u32), SlotId::new(0))
}

#[test]
fn test_concurrent_disjoint_inserts_with_reader() {
    const RANGE: u64 = 10_000;
    let (tree, _temp) = create_tree(256, 64);

    let writer_low = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for key in 0..RANGE {
                assert!(tree.insert(key, rid(key)).unwrap());
            }
        })
    };
    let writer_high = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for key in RANGE..2 * RANGE {
                assert!(tree.insert(key, rid(key)).unwrap());
            }
        })
    };
    let reader = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            // Point lookups race the writers; a hit must carry the right
            // record, a miss is fine.
            for round in 0..20 {
                for key in (0..2 * RANGE).step_by(97) {
                    if let Some(value) = tree.get_value(key).unwrap() {
                        assert_eq!(value, rid(key));
                    }
                }
                let _ = round;
            }
        })
    };

    writer_low.join().unwrap();
    writer_high.join().unwrap();
    reader.join().unwrap();

    for key in 0..2 * RANGE {
        assert_eq!(tree.get_value(key).unwrap(), Some(rid(key)), "key {} lost", key);
    }

    let mut expected = 0u64;
    for entry in tree.begin().unwrap() {
        let (key, _) = entry.unwrap();
        assert_eq!(key, expected);
        expected += 1;
    }
    assert_eq!(expected, 2 * RANGE);
}

#[test]
fn test_concurrent_interleaved_inserts() {
    const THREADS: u64 = 4;
    const PER_THREAD: u64 = 2_000;
    let (tree, _temp) = create_tree(128, 16);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                // Stripe the key space so neighboring keys come from
                // different threads and leaf contention is constant.
                for i in 0..PER_THREAD {
                    let key = i * THREADS + t;
                    assert!(tree.insert(key, rid(key)).unwrap());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    for key in 0..THREADS * PER_THREAD {
        assert_eq!(tree.get_value(key).unwrap(), Some(rid(key)));
    }
}

#[test]
fn test_concurrent_inserts_and_removes() {
    const RANGE: u64 = 4_000;
    let (tree, _temp) = create_tree(128, 16);

    // Pre-populate the lower half, then remove it while the upper half is
    // being inserted.
    for key in 0..RANGE {
        tree.insert(key, rid(key)).unwrap();
    }

    let remover = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for key in 0..RANGE {
                tree.remove(key).unwrap();
            }
        })
    };
    let inserter = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for key in RANGE..2 * RANGE {
                assert!(tree.insert(key, rid(key)).unwrap());
            }
        })
    };

    remover.join().unwrap();
    inserter.join().unwrap();

    for key in 0..RANGE {
        assert_eq!(tree.get_value(key).unwrap(), None);
    }
    for key in RANGE..2 * RANGE {
        assert_eq!(tree.get_value(key).unwrap(), Some(rid(key)));
    }
}

#[test]
fn test_concurrent_readers_share_pages() {
    let (tree, _temp) = create_tree(64, 16);

    for key in 0..2_000u64 {
        tree.insert(key, rid(key)).unwrap();
    }

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for key in 0..2_000u64 {
                    assert_eq!(tree.get_value(key).unwrap(), Some(rid(key)));
                }
                let count = tree.begin().unwrap().count();
                assert_eq!(count, 2_000);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}
