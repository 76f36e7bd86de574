use std::collections::{BTreeMap, HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::{FrameId, OxbowError, Result, Timestamp};

/// Access history for a single frame
#[derive(Debug)]
struct FrameRecord {
    /// Up to k most recent access timestamps, oldest at the front
    history: VecDeque<Timestamp>,
    /// Whether this frame may currently be evicted
    evictable: bool,
}

impl FrameRecord {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            evictable: false,
        }
    }
}

/// All replacer state lives under one latch, including the logical clock.
struct ReplacerState {
    records: HashMap<FrameId, FrameRecord>,
    /// Frames with fewer than k accesses, keyed by first-access time
    history_queue: BTreeMap<Timestamp, FrameId>,
    /// Frames with k or more accesses, keyed by the k-th most recent access
    cache_queue: BTreeMap<Timestamp, FrameId>,
    current_ts: Timestamp,
    num_evictable: usize,
}

/// LRU-K replacement policy.
///
/// The replacer evicts the frame whose backward k-distance (the age of its
/// k-th most recent access) is largest. Frames with fewer than k accesses
/// have infinite k-distance and take priority, broken by earliest first
/// access - classic LRU among young frames.
///
/// The two priorities are kept as two ordered groups: a history queue of
/// frames still short of k accesses, ordered by first-access time, and a
/// cache queue of frames with a full history, ordered by the timestamp of
/// their k-th most recent access. Eviction scans the history queue first,
/// then the cache queue, oldest entry first, skipping frames that are not
/// evictable.
///
/// Time is a logical counter incremented under the replacer latch; wall
/// clock time is never consulted.
pub struct LruKReplacer {
    k: usize,
    /// Number of frames in the pool; frame ids at or above this are ignored
    num_frames: usize,
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    /// Creates a new LRU-K replacer tracking up to `num_frames` frames.
    pub fn new(k: usize, num_frames: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            k,
            num_frames,
            state: Mutex::new(ReplacerState {
                records: HashMap::new(),
                history_queue: BTreeMap::new(),
                cache_queue: BTreeMap::new(),
                current_ts: 0,
                num_evictable: 0,
            }),
        }
    }

    /// Evicts the evictable frame with the largest backward k-distance and
    /// purges its access history. Returns None if no frame is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        if state.num_evictable == 0 {
            return None;
        }

        let victim = state
            .history_queue
            .iter()
            .chain(state.cache_queue.iter())
            .find(|(_, frame_id)| state.records[frame_id].evictable)
            .map(|(_, frame_id)| *frame_id)?;

        self.purge(&mut state, victim);
        Some(victim)
    }

    /// Records an access to `frame_id` at the current logical time and
    /// repositions the frame in its group.
    pub fn record_access(&self, frame_id: FrameId) {
        if frame_id.as_usize() >= self.num_frames {
            return;
        }

        let mut state = self.state.lock();
        let ts = state.current_ts;
        state.current_ts += 1;

        let ReplacerState {
            records,
            history_queue,
            cache_queue,
            ..
        } = &mut *state;

        let record = records.entry(frame_id).or_insert_with(FrameRecord::new);

        // The front of the history is the group ordering key in both groups:
        // first-access time below k accesses, k-th most recent at or above.
        if let Some(&old_key) = record.history.front() {
            if record.history.len() < self.k {
                history_queue.remove(&old_key);
            } else {
                cache_queue.remove(&old_key);
            }
        }

        record.history.push_back(ts);
        if record.history.len() > self.k {
            record.history.pop_front();
        }

        let new_key = record.history.front().copied().unwrap_or(ts);
        if record.history.len() < self.k {
            history_queue.insert(new_key, frame_id);
        } else {
            cache_queue.insert(new_key, frame_id);
        }
    }

    /// Marks a frame as evictable or pinned. Untracked frames are ignored.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut state = self.state.lock();
        let ReplacerState {
            records,
            num_evictable,
            ..
        } = &mut *state;

        if let Some(record) = records.get_mut(&frame_id) {
            if record.evictable != evictable {
                if evictable {
                    *num_evictable += 1;
                } else {
                    *num_evictable -= 1;
                }
                record.evictable = evictable;
            }
        }
    }

    /// Removes a frame and its history from the replacer.
    ///
    /// Untracked frames are a no-op. Removing a frame that is tracked but
    /// not evictable is a caller bug and is rejected.
    pub fn remove(&self, frame_id: FrameId) -> Result<()> {
        let mut state = self.state.lock();
        let evictable = match state.records.get(&frame_id) {
            None => return Ok(()),
            Some(record) => record.evictable,
        };
        if !evictable {
            return Err(OxbowError::FrameNotEvictable(frame_id));
        }
        self.purge(&mut state, frame_id);
        Ok(())
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().num_evictable
    }

    /// Returns the k value of this replacer.
    pub fn k(&self) -> usize {
        self.k
    }

    fn purge(&self, state: &mut ReplacerState, frame_id: FrameId) {
        if let Some(record) = state.records.remove(&frame_id) {
            if let Some(&key) = record.history.front() {
                if record.history.len() < self.k {
                    state.history_queue.remove(&key);
                } else {
                    state.cache_queue.remove(&key);
                }
            }
            if record.evictable {
                state.num_evictable -= 1;
            }
        }
    }
}
