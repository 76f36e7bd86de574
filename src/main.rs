use std::sync::Arc;

use oxbow::buffer::BufferPoolManager;
use oxbow::common::{PageId, RecordId, SlotId};
use oxbow::index::{BPlusTree, UnsignedComparator};
use oxbow::storage::disk::DiskManager;

fn main() {
    println!("Oxbow - a disk-oriented storage engine in Rust");
    println!("==============================================\n");

    let db_path = "demo.db";

    let disk_manager = Arc::new(DiskManager::new(db_path).expect("Failed to create disk manager"));
    println!("Created disk manager for: {}", db_path);

    let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
    println!("Created buffer pool with 64 frames\n");

    let tree = BPlusTree::new("demo_index", bpm.clone(), UnsignedComparator, 32, 32);

    for key in (1..=100u64).rev() {
        let rid = RecordId::new(PageId::new(key as u32), SlotId::new(0));
        tree.insert(key, rid).expect("Failed to insert");
    }
    println!("Inserted keys 1..=100 in reverse order");
    println!("Root page: {}", tree.root_page_id());

    let value = tree.get_value(42).expect("Lookup failed");
    println!("Lookup 42 -> {:?}", value);

    print!("First ten keys in order:");
    for entry in tree.begin().expect("Begin failed").take(10) {
        let (key, _) = entry.expect("Iteration failed");
        print!(" {}", key);
    }
    println!();

    for key in 1..=50u64 {
        tree.remove(key).expect("Remove failed");
    }
    println!("Removed keys 1..=50");

    let remaining = tree
        .begin()
        .expect("Begin failed")
        .count();
    println!("Remaining entries: {}", remaining);

    bpm.flush_all_pages().expect("Flush failed");
    println!("Flushed all pages");

    std::fs::remove_file(db_path).ok();
    println!("\nDemo completed successfully!");
}
