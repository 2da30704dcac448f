//! Pending-interest table.
//!
//! Tracks in-flight interests by suffix with per-entry deadlines. A content
//! object arrival removes the entry before reassembly; a deadline expiry
//! drives retransmission or, past the retransmission budget, a loss report.

use hicn_io::Timestamp;
use std::collections::HashMap;
use thiserror::Error;

/// PIT errors
#[derive(Error, Debug)]
pub enum PitError {
    #[error("duplicate pending interest for suffix {0}")]
    Duplicate(u32),

    #[error("no pending interest for suffix {0}")]
    NotFound(u32),
}

/// One in-flight interest.
#[derive(Debug, Clone)]
pub struct PitEntry {
    pub suffix: u32,
    /// When the interest (or its latest retransmission) left the portal.
    pub sent_at: Timestamp,
    pub deadline: Timestamp,
    pub retx_count: u32,
}

impl PitEntry {
    /// RTT samples are only taken from first transmissions.
    pub fn is_retransmitted(&self) -> bool {
        self.retx_count > 0
    }
}

/// Outstanding interests keyed by suffix.
///
/// Invariant: at most one live entry per suffix. The consumer protocol is
/// the only writer.
#[derive(Default)]
pub struct PendingInterestTable {
    entries: HashMap<u32, PitEntry>,
}

impl PendingInterestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly sent interest.
    pub fn insert(
        &mut self,
        suffix: u32,
        sent_at: Timestamp,
        deadline: Timestamp,
    ) -> Result<(), PitError> {
        if self.entries.contains_key(&suffix) {
            return Err(PitError::Duplicate(suffix));
        }
        self.entries.insert(
            suffix,
            PitEntry {
                suffix,
                sent_at,
                deadline,
                retx_count: 0,
            },
        );
        Ok(())
    }

    /// Satisfy (or cancel) an entry, returning it for RTT bookkeeping.
    pub fn remove(&mut self, suffix: u32) -> Option<PitEntry> {
        self.entries.remove(&suffix)
    }

    pub fn contains(&self, suffix: u32) -> bool {
        self.entries.contains_key(&suffix)
    }

    pub fn get(&self, suffix: u32) -> Option<&PitEntry> {
        self.entries.get(&suffix)
    }

    /// Suffixes whose deadline has passed, smallest first.
    pub fn expired(&self, now: Timestamp) -> Vec<u32> {
        let mut expired: Vec<u32> = self
            .entries
            .values()
            .filter(|e| e.deadline <= now)
            .map(|e| e.suffix)
            .collect();
        expired.sort_unstable();
        expired
    }

    /// Mark an entry retransmitted: bump its counter, restart its clock.
    pub fn mark_retransmitted(
        &mut self,
        suffix: u32,
        sent_at: Timestamp,
        deadline: Timestamp,
    ) -> Result<u32, PitError> {
        let entry = self
            .entries
            .get_mut(&suffix)
            .ok_or(PitError::NotFound(suffix))?;
        entry.retx_count += 1;
        entry.sent_at = sent_at;
        entry.deadline = deadline;
        Ok(entry.retx_count)
    }

    /// The earliest deadline across all entries.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.entries.values().map(|e| e.deadline).min()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything (consumer stop / drain).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_insert_remove() {
        let mut pit = PendingInterestTable::new();
        let now = Timestamp::now();

        pit.insert(5, now, now + Duration::from_millis(100)).unwrap();
        assert!(pit.contains(5));
        assert_eq!(pit.len(), 1);

        let entry = pit.remove(5).unwrap();
        assert_eq!(entry.suffix, 5);
        assert_eq!(entry.retx_count, 0);
        assert!(pit.is_empty());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut pit = PendingInterestTable::new();
        let now = Timestamp::now();

        pit.insert(5, now, now + Duration::from_millis(100)).unwrap();
        assert!(matches!(
            pit.insert(5, now, now + Duration::from_millis(100)),
            Err(PitError::Duplicate(5))
        ));
        assert_eq!(pit.len(), 1);
    }

    #[test]
    fn test_expiry_ordering() {
        let mut pit = PendingInterestTable::new();
        let now = Timestamp::now();

        pit.insert(9, now, now + Duration::from_millis(1)).unwrap();
        pit.insert(2, now, now + Duration::from_millis(1)).unwrap();
        pit.insert(7, now, now + Duration::from_secs(60)).unwrap();

        let later = now + Duration::from_millis(10);
        assert_eq!(pit.expired(later), vec![2, 9]);
    }

    #[test]
    fn test_retransmission_bookkeeping() {
        let mut pit = PendingInterestTable::new();
        let now = Timestamp::now();

        pit.insert(3, now, now + Duration::from_millis(1)).unwrap();
        let later = now + Duration::from_millis(5);
        let count = pit
            .mark_retransmitted(3, later, later + Duration::from_millis(100))
            .unwrap();

        assert_eq!(count, 1);
        let entry = pit.get(3).unwrap();
        assert!(entry.is_retransmitted());
        assert!(pit.expired(later).is_empty());
    }

    #[test]
    fn test_next_deadline() {
        let mut pit = PendingInterestTable::new();
        assert!(pit.next_deadline().is_none());

        let now = Timestamp::now();
        pit.insert(1, now, now + Duration::from_millis(50)).unwrap();
        pit.insert(2, now, now + Duration::from_millis(10)).unwrap();

        assert_eq!(pit.next_deadline(), Some(now + Duration::from_millis(10)));
    }
}
