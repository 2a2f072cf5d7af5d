use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::{FrameId, Timestamp};

/// Access history for a single frame
#[derive(Debug)]
struct FrameRecord {
    /// Up to the `k` most recent access timestamps, newest at the back
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

    /// Backward k-distance at `now`: None stands for +inf (fewer than `k`
    /// recorded accesses), otherwise the distance to the k-th most recent
    /// access.
    fn k_distance(&self, now: Timestamp, k: usize) -> Option<Timestamp> {
        if self.history.len() < k {
            None
        } else {
            Some(now - self.history[self.history.len() - k])
        }
    }

    fn first_access(&self) -> Timestamp {
        *self
            .history
            .front()
            .expect("frame record always holds at least one access")
    }
}

#[derive(Debug)]
struct ReplacerState {
    records: HashMap<FrameId, FrameRecord>,
    /// Number of records whose evictable flag is set
    curr_size: usize,
    /// Monotonic clock, bumped on every recorded access
    current_timestamp: Timestamp,
}

/// LRU-K replacement policy.
///
/// The victim is the evictable frame with the largest backward k-distance:
/// the gap between now and its k-th most recent access. Frames with fewer
/// than `k` recorded accesses count as infinitely distant and are preferred;
/// ties (both the infinite kind and equal finite distances) go to the frame
/// with the earliest first access, which degenerates to plain LRU.
pub struct LruKReplacer {
    k: usize,
    /// Frame ids must fall in `[0, capacity)`
    capacity: usize,
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    pub fn new(k: usize, capacity: usize) -> Self {
        assert!(k >= 1, "LRU-K requires k >= 1");
        Self {
            k,
            capacity,
            state: Mutex::new(ReplacerState {
                records: HashMap::new(),
                curr_size: 0,
                current_timestamp: 0,
            }),
        }
    }

    /// Selects, removes, and returns the frame with the largest backward
    /// k-distance, or None when nothing is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        if state.curr_size == 0 {
            return None;
        }

        let now = state.current_timestamp;
        let mut victim: Option<(FrameId, Option<Timestamp>, Timestamp)> = None;

        for (&frame_id, record) in &state.records {
            if !record.evictable {
                continue;
            }
            let dist = record.k_distance(now, self.k);
            let first = record.first_access();

            let better = match &victim {
                None => true,
                Some((_, best_dist, best_first)) => match (best_dist, &dist) {
                    // +inf beats any finite distance
                    (None, Some(_)) => false,
                    (Some(_), None) => true,
                    // both +inf: earliest first access wins
                    (None, None) => first < *best_first,
                    (Some(bd), Some(d)) => d > bd || (d == bd && first < *best_first),
                },
            };
            if better {
                victim = Some((frame_id, dist, first));
            }
        }

        let (frame_id, _, _) = victim.expect("curr_size > 0 implies an evictable record");
        state.records.remove(&frame_id);
        state.curr_size -= 1;
        Some(frame_id)
    }

    /// Stamps an access for `frame_id`, creating its record on first sight.
    /// New records start out non-evictable.
    pub fn record_access(&self, frame_id: FrameId) {
        assert!(
            frame_id.as_usize() < self.capacity,
            "frame id {} out of range for replacer of capacity {}",
            frame_id,
            self.capacity
        );

        let mut state = self.state.lock();
        state.current_timestamp += 1;
        let timestamp = state.current_timestamp;

        let record = state.records.entry(frame_id).or_insert_with(FrameRecord::new);
        record.history.push_back(timestamp);
        while record.history.len() > self.k {
            record.history.pop_front();
        }
    }

    /// Toggles whether `frame_id` may be evicted, maintaining the evictable
    /// count. No-op for unknown frames or unchanged state.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        assert!(
            frame_id.as_usize() < self.capacity,
            "frame id {} out of range for replacer of capacity {}",
            frame_id,
            self.capacity
        );

        let mut state = self.state.lock();
        let Some(record) = state.records.get_mut(&frame_id) else {
            return;
        };
        if record.evictable == evictable {
            return;
        }
        record.evictable = evictable;
        if evictable {
            state.curr_size += 1;
        } else {
            state.curr_size -= 1;
        }
    }

    /// Drops the record for `frame_id` entirely (the page was deleted).
    /// No-op for unknown frames; removing a pinned frame is a caller bug.
    pub fn remove(&self, frame_id: FrameId) {
        assert!(
            frame_id.as_usize() < self.capacity,
            "frame id {} out of range for replacer of capacity {}",
            frame_id,
            self.capacity
        );

        let mut state = self.state.lock();
        let Some(record) = state.records.get(&frame_id) else {
            return;
        };
        assert!(
            record.evictable,
            "cannot remove non-evictable frame {}",
            frame_id
        );
        state.records.remove(&frame_id);
        state.curr_size -= 1;
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().curr_size
    }

    pub fn k(&self) -> usize {
        self.k
    }
}
