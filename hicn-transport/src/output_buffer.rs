//! Producer output buffer.
//!
//! A bounded suffix → content-object store. Eviction is FIFO by production
//! order; entries whose expiry elapsed are dropped lazily on lookup.
//! Serving from the buffer never re-signs: objects are stored fully
//! encoded-ready, signature included.

use crate::packet::ContentObject;
use hicn_io::Timestamp;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

struct StoredObject {
    content: ContentObject,
    produced_at: Timestamp,
}

/// Bounded FIFO store of produced content objects.
pub struct OutputBuffer {
    entries: HashMap<u32, StoredObject>,
    production_order: VecDeque<u32>,
    limit: usize,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        OutputBuffer {
            entries: HashMap::new(),
            production_order: VecDeque::new(),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
        self.evict_over_limit();
    }

    fn evict_over_limit(&mut self) {
        while self.limit > 0 && self.entries.len() > self.limit {
            match self.production_order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Store a produced object. With a zero limit nothing is retained
    /// (virtual producers keep no cache).
    pub fn insert(&mut self, content: ContentObject) {
        if self.limit == 0 {
            return;
        }

        let suffix = content.suffix();
        if self.entries.contains_key(&suffix) {
            // Re-production overwrites in place, keeping its original
            // position in the eviction order.
            self.entries.insert(
                suffix,
                StoredObject {
                    content,
                    produced_at: Timestamp::now(),
                },
            );
            return;
        }

        self.production_order.push_back(suffix);
        self.entries.insert(
            suffix,
            StoredObject {
                content,
                produced_at: Timestamp::now(),
            },
        );
        self.evict_over_limit();
    }

    /// Look up a suffix, dropping the entry if its expiry elapsed.
    pub fn get(&mut self, suffix: u32) -> Option<&ContentObject> {
        let expired = match self.entries.get(&suffix) {
            Some(stored) => {
                let expiry = Duration::from_millis(stored.content.expiry_ms() as u64);
                stored.produced_at.elapsed() > expiry
            }
            None => return None,
        };

        if expired {
            self.entries.remove(&suffix);
            self.production_order.retain(|s| *s != suffix);
            return None;
        }
        self.entries.get(&suffix).map(|s| &s.content)
    }

    pub fn contains(&self, suffix: u32) -> bool {
        self.entries.contains_key(&suffix)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.production_order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::Prefix;
    use bytes::Bytes;

    fn object(suffix: u32) -> ContentObject {
        let prefix: Prefix = "b001::/64".parse().unwrap();
        ContentObject::new(prefix.name(suffix), Bytes::from_static(b"seg"))
    }

    #[test]
    fn test_insert_get() {
        let mut buffer = OutputBuffer::new(8);
        buffer.insert(object(3));

        assert!(buffer.contains(3));
        assert_eq!(buffer.get(3).unwrap().suffix(), 3);
        assert!(buffer.get(4).is_none());
    }

    #[test]
    fn test_fifo_eviction() {
        let mut buffer = OutputBuffer::new(3);
        for suffix in 0..5 {
            buffer.insert(object(suffix));
        }

        // 0 and 1 were produced first and got evicted first.
        assert_eq!(buffer.len(), 3);
        assert!(!buffer.contains(0));
        assert!(!buffer.contains(1));
        assert!(buffer.contains(2));
        assert!(buffer.contains(4));
    }

    #[test]
    fn test_zero_limit_stores_nothing() {
        let mut buffer = OutputBuffer::new(0);
        buffer.insert(object(0));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_expired_entry_dropped_on_lookup() {
        let mut buffer = OutputBuffer::new(8);
        let mut content = object(1);
        content.set_expiry_ms(0);
        buffer.insert(content);

        std::thread::sleep(Duration::from_millis(2));
        assert!(buffer.get(1).is_none());
        assert!(!buffer.contains(1));
    }

    #[test]
    fn test_shrinking_limit_evicts() {
        let mut buffer = OutputBuffer::new(8);
        for suffix in 0..6 {
            buffer.insert(object(suffix));
        }
        buffer.set_limit(2);
        assert_eq!(buffer.len(), 2);
        assert!(buffer.contains(4));
        assert!(buffer.contains(5));
    }
}
