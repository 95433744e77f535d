use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::{FrameId, Timestamp};

/// Tracks access history for a single frame
#[derive(Debug)]
struct FrameAccessInfo {
    /// History of access timestamps (most recent at back), at most k entries
    history: VecDeque<Timestamp>,
    /// Whether this frame is currently evictable
    is_evictable: bool,
}

impl FrameAccessInfo {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }

    fn record_access(&mut self, timestamp: Timestamp, k: usize) {
        self.history.push_back(timestamp);
        while self.history.len() > k {
            self.history.pop_front();
        }
    }

    /// Backward k-distance at `now`. None means fewer than k recorded
    /// accesses, i.e. +inf.
    fn k_distance(&self, now: Timestamp, k: usize) -> Option<Timestamp> {
        if self.history.len() < k {
            None
        } else {
            Some(now - self.history[self.history.len() - k])
        }
    }

    fn earliest_timestamp(&self) -> Option<Timestamp> {
        self.history.front().copied()
    }
}

struct ReplacerInner {
    /// Access information for each tracked frame
    frame_info: HashMap<FrameId, FrameAccessInfo>,
    /// Number of evictable frames
    num_evictable: usize,
    /// Monotonically increasing logical clock
    current_timestamp: Timestamp,
}

/// LRU-K Replacement Policy
///
/// The LRU-K algorithm evicts the frame whose backward k-distance is the
/// maximum over all evictable frames. Backward k-distance is the difference
/// between the current timestamp and the timestamp of the kth previous
/// access.
///
/// A frame with fewer than k recorded accesses has +inf backward k-distance.
/// Among +inf frames the one with the earliest first access is evicted;
/// among finite frames, ties fall back to the earliest recorded timestamp.
pub struct LruKReplacer {
    /// K value for the LRU-K algorithm
    k: usize,
    /// Maximum number of frames the replacer can track
    max_frames: usize,
    inner: Mutex<ReplacerInner>,
}

impl LruKReplacer {
    /// Creates a new LRU-K replacer with the given k value and maximum frame
    /// count.
    pub fn new(k: usize, max_frames: usize) -> Self {
        assert!(k > 0);
        Self {
            k,
            max_frames,
            inner: Mutex::new(ReplacerInner {
                frame_info: HashMap::new(),
                num_evictable: 0,
                current_timestamp: 0,
            }),
        }
    }

    /// Evicts the frame with the largest backward k-distance, clearing its
    /// access record. Returns None if there are no evictable frames.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();

        if inner.num_evictable == 0 {
            return None;
        }

        let now = inner.current_timestamp;

        let mut victim: Option<FrameId> = None;
        let mut victim_k_dist: Option<Timestamp> = None;
        let mut victim_earliest: Option<Timestamp> = None;

        for (frame_id, info) in inner.frame_info.iter() {
            if !info.is_evictable {
                continue;
            }

            let k_dist = info.k_distance(now, self.k);
            let earliest = info.earliest_timestamp();

            let should_replace = match (victim_k_dist, k_dist) {
                // Current victim is +inf, candidate is finite: keep victim
                (None, Some(_)) => false,
                // Candidate is +inf, current victim is finite: take it
                (Some(_), None) => true,
                // Both +inf: earliest first access wins
                (None, None) => match (victim_earliest, earliest) {
                    (Some(v_ts), Some(c_ts)) => c_ts < v_ts,
                    (None, Some(_)) => true,
                    _ => false,
                },
                // Both finite: larger distance wins, earliest access breaks ties
                (Some(v_dist), Some(c_dist)) => {
                    c_dist > v_dist || (c_dist == v_dist && earliest < victim_earliest)
                }
            };

            if victim.is_none() || should_replace {
                victim = Some(*frame_id);
                victim_k_dist = k_dist;
                victim_earliest = earliest;
            }
        }

        if let Some(frame_id) = victim {
            inner.frame_info.remove(&frame_id);
            inner.num_evictable -= 1;
        }

        victim
    }

    /// Records that the given frame was accessed now.
    pub fn record_access(&self, frame_id: FrameId) {
        assert!(
            frame_id.as_usize() < self.max_frames,
            "frame id {} out of range",
            frame_id
        );

        let mut inner = self.inner.lock();
        inner.current_timestamp += 1;
        let timestamp = inner.current_timestamp;

        let k = self.k;
        inner
            .frame_info
            .entry(frame_id)
            .or_insert_with(FrameAccessInfo::new)
            .record_access(timestamp, k);
    }

    /// Sets whether a frame is evictable, adjusting the evictable count.
    pub fn set_evictable(&self, frame_id: FrameId, is_evictable: bool) {
        assert!(
            frame_id.as_usize() < self.max_frames,
            "frame id {} out of range",
            frame_id
        );

        let mut inner = self.inner.lock();
        if let Some(info) = inner.frame_info.get_mut(&frame_id) {
            if info.is_evictable != is_evictable {
                info.is_evictable = is_evictable;
                if is_evictable {
                    inner.num_evictable += 1;
                } else {
                    inner.num_evictable -= 1;
                }
            }
        }
    }

    /// Removes a frame's access record entirely. Called when a page is
    /// deleted from the buffer pool; removing a non-evictable frame is a
    /// contract violation.
    pub fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if let Some(info) = inner.frame_info.remove(&frame_id) {
            assert!(info.is_evictable, "removing a non-evictable frame");
            inner.num_evictable -= 1;
        }
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().num_evictable
    }

    /// Returns the k value of this replacer.
    pub fn k(&self) -> usize {
        self.k
    }
}
