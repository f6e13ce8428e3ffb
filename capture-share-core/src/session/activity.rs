use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Weight of the newest sample in the rolling average; recent samples
/// dominate the history.
const EWMA_WEIGHT: f32 = 0.7;

pub const DEFAULT_DECAY_WINDOW: Duration = Duration::from_secs(30);

/// Snapshot of one process's recent audio activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessActivity {
    pub pid: u32,
    pub avg_rms: f32,
    pub sample_count: u64,
    pub idle_ms: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    last_seen: Instant,
    avg_rms: f32,
    sample_count: u64,
}

/// Decaying per-process record of recent audio loudness, used to rank
/// targets by "currently making sound".
///
/// Entries are created on the first gated-in sample from a process and
/// purged lazily: only a read that would expose stale data evicts them,
/// never a background timer.
#[derive(Debug)]
pub struct ActivityCache {
    entries: HashMap<u32, Entry>,
    decay_window: Duration,
}

impl ActivityCache {
    pub fn new(decay_window: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            decay_window,
        }
    }

    /// Record one gated-in sample for `pid`.
    pub fn record(&mut self, pid: u32, rms: f32) {
        self.record_at(pid, rms, Instant::now());
    }

    pub(crate) fn record_at(&mut self, pid: u32, rms: f32, now: Instant) {
        match self.entries.get_mut(&pid) {
            Some(entry) => {
                entry.avg_rms = rms * EWMA_WEIGHT + entry.avg_rms * (1.0 - EWMA_WEIGHT);
                entry.sample_count += 1;
                entry.last_seen = now;
            }
            None => {
                self.entries.insert(
                    pid,
                    Entry {
                        last_seen: now,
                        avg_rms: rms,
                        sample_count: 1,
                    },
                );
            }
        }
    }

    /// Current activity, loudest first. Purges entries older than the
    /// decay window before reading.
    pub fn snapshot(&mut self) -> Vec<ProcessActivity> {
        self.snapshot_at(Instant::now())
    }

    pub(crate) fn snapshot_at(&mut self, now: Instant) -> Vec<ProcessActivity> {
        let decay = self.decay_window;
        self.entries
            .retain(|_, entry| now.duration_since(entry.last_seen) <= decay);

        let mut activity: Vec<ProcessActivity> = self
            .entries
            .iter()
            .map(|(&pid, entry)| ProcessActivity {
                pid,
                avg_rms: entry.avg_rms,
                sample_count: entry.sample_count,
                idle_ms: now.duration_since(entry.last_seen).as_millis() as u64,
            })
            .collect();
        activity.sort_by(|a, b| b.avg_rms.total_cmp(&a.avg_rms));
        activity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ActivityCache {
    fn default() -> Self {
        Self::new(DEFAULT_DECAY_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn first_sample_seeds_the_average() {
        let mut cache = ActivityCache::default();
        cache.record(42, 0.5);

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].pid, 42);
        assert_relative_eq!(snapshot[0].avg_rms, 0.5, epsilon = 1e-6);
        assert_eq!(snapshot[0].sample_count, 1);
    }

    #[test]
    fn recent_samples_dominate_the_average() {
        let mut cache = ActivityCache::default();
        cache.record(1, 0.1);
        cache.record(1, 0.9);

        let snapshot = cache.snapshot();
        // 0.9 * 0.7 + 0.1 * 0.3
        assert_relative_eq!(snapshot[0].avg_rms, 0.66, epsilon = 1e-6);
        assert_eq!(snapshot[0].sample_count, 2);
    }

    #[test]
    fn snapshot_orders_loudest_first() {
        let mut cache = ActivityCache::default();
        cache.record(1, 0.2);
        cache.record(2, 0.8);
        cache.record(3, 0.5);

        let pids: Vec<u32> = cache.snapshot().iter().map(|a| a.pid).collect();
        assert_eq!(pids, vec![2, 3, 1]);
    }

    #[test]
    fn stale_entries_purged_on_read() {
        let mut cache = ActivityCache::new(Duration::from_secs(10));
        let start = Instant::now();
        cache.record_at(1, 0.5, start);
        cache.record_at(2, 0.5, start + Duration::from_secs(8));

        let snapshot = cache.snapshot_at(start + Duration::from_secs(15));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].pid, 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn no_purge_before_window_elapses() {
        let mut cache = ActivityCache::new(Duration::from_secs(10));
        let start = Instant::now();
        cache.record_at(1, 0.5, start);

        assert_eq!(cache.snapshot_at(start + Duration::from_secs(9)).len(), 1);
    }

    #[test]
    fn clear_drops_everything() {
        let mut cache = ActivityCache::default();
        cache.record(1, 0.5);
        cache.clear();
        assert!(cache.is_empty());
    }
}
