//! Integration tests for the LRU-K replacer

use oxbow::buffer::LruKReplacer;
use oxbow::common::FrameId;

#[test]
fn test_history_group_eviction_order() {
    let replacer = LruKReplacer::new(2, 7);

    // Frames 1..=6 each get a single access; 1..=5 become evictable.
    for i in 1..=6 {
        replacer.record_access(FrameId::new(i));
    }
    for i in 1..=5 {
        replacer.set_evictable(FrameId::new(i), true);
    }
    replacer.set_evictable(FrameId::new(6), false);

    assert_eq!(replacer.size(), 5);

    // Every candidate has infinite k-distance, so the earliest first
    // access (frame 1) goes first.
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.size(), 4);

    // Give the survivors a second access; they move to the cache group in
    // first-access order, which then dictates eviction order.
    for i in 2..=5 {
        replacer.record_access(FrameId::new(i));
    }
    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
    assert_eq!(replacer.evict(), Some(FrameId::new(3)));
    assert_eq!(replacer.evict(), Some(FrameId::new(4)));
    assert_eq!(replacer.evict(), Some(FrameId::new(5)));

    // Frame 6 is pinned and must survive.
    assert_eq!(replacer.evict(), None);
    assert_eq!(replacer.size(), 0);
}

#[test]
fn test_infinite_distance_beats_finite() {
    let replacer = LruKReplacer::new(2, 10);

    // Frame 0: one access. Frames 1 and 2: two accesses each.
    replacer.record_access(FrameId::new(0));
    replacer.record_access(FrameId::new(1));
    replacer.record_access(FrameId::new(1));
    replacer.record_access(FrameId::new(2));
    replacer.record_access(FrameId::new(2));

    for i in 0..3 {
        replacer.set_evictable(FrameId::new(i), true);
    }

    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
}

#[test]
fn test_history_ring_keeps_k_entries() {
    let replacer = LruKReplacer::new(2, 10);

    // Many accesses to frame 0; only the two most recent matter.
    for _ in 0..10 {
        replacer.record_access(FrameId::new(0));
    }
    replacer.record_access(FrameId::new(1));
    replacer.record_access(FrameId::new(1));

    replacer.set_evictable(FrameId::new(0), true);
    replacer.set_evictable(FrameId::new(1), true);

    // Frame 0's k-th most recent access is older than frame 1's.
    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
}

#[test]
fn test_set_evictable_does_not_reorder() {
    let replacer = LruKReplacer::new(2, 10);

    replacer.record_access(FrameId::new(0));
    replacer.record_access(FrameId::new(1));

    // Toggling evictability must not touch the access ordering.
    replacer.set_evictable(FrameId::new(1), true);
    replacer.set_evictable(FrameId::new(0), true);
    replacer.set_evictable(FrameId::new(0), false);
    replacer.set_evictable(FrameId::new(0), true);

    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
}

#[test]
fn test_size_tracks_evictable_count() {
    let replacer = LruKReplacer::new(3, 10);

    for i in 0..6 {
        replacer.record_access(FrameId::new(i));
    }
    assert_eq!(replacer.size(), 0);

    for i in 0..6 {
        replacer.set_evictable(FrameId::new(i), true);
    }
    assert_eq!(replacer.size(), 6);

    replacer.set_evictable(FrameId::new(0), false);
    replacer.set_evictable(FrameId::new(1), false);
    assert_eq!(replacer.size(), 4);

    replacer.remove(FrameId::new(2)).unwrap();
    assert_eq!(replacer.size(), 3);
}

#[test]
fn test_remove_pinned_frame_is_rejected() {
    let replacer = LruKReplacer::new(2, 10);

    replacer.record_access(FrameId::new(0));
    assert!(replacer.remove(FrameId::new(0)).is_err());

    // An untracked frame is simply a no-op.
    replacer.remove(FrameId::new(5)).unwrap();

    replacer.set_evictable(FrameId::new(0), true);
    replacer.remove(FrameId::new(0)).unwrap();
    assert_eq!(replacer.evict(), None);
}

#[test]
fn test_evicted_frame_history_is_purged() {
    let replacer = LruKReplacer::new(2, 10);

    replacer.record_access(FrameId::new(0));
    replacer.record_access(FrameId::new(0));
    replacer.set_evictable(FrameId::new(0), true);
    assert_eq!(replacer.evict(), Some(FrameId::new(0)));

    // The frame comes back with a clean history: one access puts it in the
    // history group, ahead of a frame with a full history.
    replacer.record_access(FrameId::new(1));
    replacer.record_access(FrameId::new(1));
    replacer.record_access(FrameId::new(0));

    replacer.set_evictable(FrameId::new(0), true);
    replacer.set_evictable(FrameId::new(1), true);

    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
}

#[test]
fn test_concurrent_access() {
    use std::sync::Arc;
    use std::thread;

    let replacer = Arc::new(LruKReplacer::new(2, 100));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let replacer = Arc::clone(&replacer);
            thread::spawn(move || {
                for i in 0..25 {
                    let frame_id = FrameId::new((t * 25 + i) as u32);
                    replacer.record_access(frame_id);
                    replacer.set_evictable(frame_id, true);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(replacer.size(), 100);
    for _ in 0..100 {
        assert!(replacer.evict().is_some());
    }
    assert_eq!(replacer.evict(), None);
}
