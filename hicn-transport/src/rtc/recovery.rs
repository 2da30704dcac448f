//! Loss detection bookkeeping and retransmission scheduling.
//!
//! Gaps in the received suffix sequence become loss ranges; adjacent
//! ranges merge, recovered suffixes split them. Each range carries its own
//! retransmission clock: a suffix is re-requested at most `max_rtx` times
//! with a minimum interval between attempts, after which it is abandoned.

use hicn_io::Timestamp;
use std::time::Duration;

/// Inclusive range of lost suffixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LossRange {
    pub start: u32,
    pub end: u32,
}

impl LossRange {
    pub fn new(start: u32, end: u32) -> Self {
        LossRange { start, end }
    }

    pub fn single(suffix: u32) -> Self {
        LossRange {
            start: suffix,
            end: suffix,
        }
    }

    pub fn contains(&self, suffix: u32) -> bool {
        suffix >= self.start && suffix <= self.end
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    /// Merge overlapping or adjacent ranges.
    pub fn try_merge(&self, other: &LossRange) -> Option<LossRange> {
        let touches = other.start <= self.end.saturating_add(1)
            && other.end.saturating_add(1) >= self.start;
        if touches {
            Some(LossRange {
                start: self.start.min(other.start),
                end: self.end.max(other.end),
            })
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
struct LossEntry {
    range: LossRange,
    detected_at: Timestamp,
    last_rtx: Option<Timestamp>,
    rtx_count: u32,
}

/// Losses awaiting recovery, sorted by suffix.
pub struct RecoveryList {
    losses: Vec<LossEntry>,
    max_rtx: u32,
    rtx_interval: Duration,
}

impl RecoveryList {
    pub fn new(max_rtx: u32, rtx_interval: Duration) -> Self {
        RecoveryList {
            losses: Vec::new(),
            max_rtx,
            rtx_interval,
        }
    }

    pub fn add(&mut self, suffix: u32) {
        self.add_range(LossRange::single(suffix));
    }

    pub fn add_range(&mut self, range: LossRange) {
        let mut merged = LossEntry {
            range,
            detected_at: Timestamp::now(),
            last_rtx: None,
            rtx_count: 0,
        };
        let mut rebuilt = Vec::with_capacity(self.losses.len() + 1);

        for existing in self.losses.drain(..) {
            if let Some(union) = merged.range.try_merge(&existing.range) {
                merged.range = union;
                if existing.detected_at < merged.detected_at {
                    merged.detected_at = existing.detected_at;
                }
                merged.rtx_count = merged.rtx_count.max(existing.rtx_count);
                merged.last_rtx = match (merged.last_rtx, existing.last_rtx) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
            } else if existing.range.start < merged.range.start {
                rebuilt.push(existing);
            } else {
                rebuilt.push(merged);
                merged = existing;
            }
        }

        rebuilt.push(merged);
        self.losses = rebuilt;
    }

    /// A suffix was recovered (or abandoned): split its range around it.
    pub fn remove(&mut self, suffix: u32) {
        let mut rebuilt = Vec::with_capacity(self.losses.len() + 1);

        for entry in self.losses.drain(..) {
            if !entry.range.contains(suffix) {
                rebuilt.push(entry);
                continue;
            }
            if entry.range.is_single() {
                continue;
            }
            if suffix == entry.range.start {
                rebuilt.push(LossEntry {
                    range: LossRange::new(entry.range.start + 1, entry.range.end),
                    ..entry
                });
            } else if suffix == entry.range.end {
                rebuilt.push(LossEntry {
                    range: LossRange::new(entry.range.start, entry.range.end - 1),
                    ..entry
                });
            } else {
                rebuilt.push(LossEntry {
                    range: LossRange::new(entry.range.start, suffix - 1),
                    detected_at: entry.detected_at,
                    last_rtx: entry.last_rtx,
                    rtx_count: entry.rtx_count,
                });
                rebuilt.push(LossEntry {
                    range: LossRange::new(suffix + 1, entry.range.end),
                    detected_at: entry.detected_at,
                    last_rtx: entry.last_rtx,
                    rtx_count: entry.rtx_count,
                });
            }
        }

        self.losses = rebuilt;
    }

    /// Forget every loss below `suffix` (catch-up jump).
    pub fn remove_below(&mut self, suffix: u32) {
        if suffix == 0 {
            return;
        }
        self.losses.retain(|entry| entry.range.end >= suffix);
        if let Some(first) = self.losses.first_mut() {
            if first.range.start < suffix {
                first.range.start = suffix;
            }
        }
    }

    /// Suffixes due for retransmission now, plus those whose budget ran
    /// out (removed from the list, reported once as abandoned).
    pub fn due_retransmissions(&mut self, now: Timestamp) -> (Vec<u32>, Vec<u32>) {
        let mut due = Vec::new();
        let mut abandoned = Vec::new();

        self.losses.retain_mut(|entry| {
            if entry.rtx_count >= self.max_rtx {
                for suffix in entry.range.start..=entry.range.end {
                    abandoned.push(suffix);
                }
                return false;
            }

            let ready = match entry.last_rtx {
                None => true,
                Some(last) => now.duration_since(last) >= self.rtx_interval,
            };
            if ready {
                for suffix in entry.range.start..=entry.range.end {
                    due.push(suffix);
                }
                entry.last_rtx = Some(now);
                entry.rtx_count += 1;
            }
            true
        });

        (due, abandoned)
    }

    pub fn contains(&self, suffix: u32) -> bool {
        self.losses.iter().any(|e| e.range.contains(suffix))
    }

    pub fn ranges(&self) -> Vec<LossRange> {
        self.losses.iter().map(|e| e.range).collect()
    }

    pub fn len(&self) -> usize {
        self.losses.iter().map(|e| e.range.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.losses.is_empty()
    }

    pub fn clear(&mut self) {
        self.losses.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_merge() {
        let a = LossRange::new(10, 15);
        let b = LossRange::new(16, 20);
        let merged = a.try_merge(&b).unwrap();
        assert_eq!(merged, LossRange::new(10, 20));

        let c = LossRange::new(25, 30);
        assert!(a.try_merge(&c).is_none());
    }

    #[test]
    fn test_add_merges_adjacent() {
        let mut list = RecoveryList::new(3, Duration::from_millis(10));
        list.add(10);
        list.add(12);
        list.add(11);

        let ranges = list.ranges();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0], LossRange::new(10, 12));
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_remove_splits() {
        let mut list = RecoveryList::new(3, Duration::from_millis(10));
        list.add_range(LossRange::new(10, 14));
        list.remove(12);

        let ranges = list.ranges();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0], LossRange::new(10, 11));
        assert_eq!(ranges[1], LossRange::new(13, 14));
        assert!(!list.contains(12));
    }

    #[test]
    fn test_remove_below() {
        let mut list = RecoveryList::new(3, Duration::from_millis(10));
        list.add_range(LossRange::new(5, 8));
        list.add_range(LossRange::new(20, 22));

        list.remove_below(7);
        assert!(!list.contains(5));
        assert!(list.contains(7));
        assert!(list.contains(21));
    }

    #[test]
    fn test_rtx_scheduling_and_interval() {
        let mut list = RecoveryList::new(3, Duration::from_millis(50));
        list.add(7);

        let now = Timestamp::now();
        let (due, abandoned) = list.due_retransmissions(now);
        assert_eq!(due, vec![7]);
        assert!(abandoned.is_empty());

        // Too soon for the next attempt.
        let (due, _) = list.due_retransmissions(now + Duration::from_millis(10));
        assert!(due.is_empty());

        let (due, _) = list.due_retransmissions(now + Duration::from_millis(60));
        assert_eq!(due, vec![7]);
    }

    #[test]
    fn test_rtx_budget_abandons() {
        let mut list = RecoveryList::new(2, Duration::from_millis(0));
        list.add(3);

        let now = Timestamp::now();
        assert_eq!(list.due_retransmissions(now).0, vec![3]);
        assert_eq!(
            list.due_retransmissions(now + Duration::from_millis(1)).0,
            vec![3]
        );

        let (due, abandoned) = list.due_retransmissions(now + Duration::from_millis(2));
        assert!(due.is_empty());
        assert_eq!(abandoned, vec![3]);
        assert!(list.is_empty());
    }
}
