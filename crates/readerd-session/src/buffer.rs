//! Tag buffer: last read per tag plus an audit trail of every read.
//!
//! The buffer is two views over the same stream of reads:
//!
//! - a map from tag id to the newest read of that tag, ordered by tag id
//! - the ordered sequence of all reads, including the ones the map
//!   overwrote
//!
//! All methods take `&self`; a single mutex guards both views so `clear`
//! is atomic with respect to concurrent `record` calls. Readers clone under
//! the lock and never hold it while the caller works on the result.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use readerd_core::{TagEvent, TagId};
use serde::Serialize;

/// Aggregate view of one tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagSummary {
    /// Newest read of the tag.
    pub last: TagEvent,

    /// Reads of the tag since the last clear.
    pub reads: u64,

    /// Earliest read timestamp since the last clear.
    pub first_seen: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    latest: BTreeMap<TagId, TagSummary>,
    audit: Vec<TagEvent>,
}

/// Accumulates tag reads.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use readerd_core::{AntennaId, TagEvent, TagId};
/// use readerd_session::TagBuffer;
///
/// let buffer = TagBuffer::new();
/// let at = |s| Utc.timestamp_opt(s, 0).unwrap();
/// let read = |id: &str, s| TagEvent::new(TagId::from_hex(id).unwrap(), AntennaId::new(1), at(s));
///
/// buffer.record(read("AA", 1));
/// buffer.record(read("BB", 2));
/// buffer.record(read("AA", 3));
///
/// let snapshot = buffer.snapshot();
/// assert_eq!(snapshot.len(), 2);
/// assert_eq!(snapshot[0].timestamp(), at(3));
/// assert_eq!(buffer.audit_len(), 3);
/// ```
#[derive(Debug, Default)]
pub struct TagBuffer {
    inner: Mutex<Inner>,
}

impl TagBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Inner is plain data; a panic elsewhere cannot leave it half-written.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record one read.
    ///
    /// The read always lands in the audit trail. It replaces the tag's entry
    /// unless that entry is strictly newer; on equal timestamps the later
    /// call wins.
    pub fn record(&self, event: TagEvent) {
        let mut inner = self.lock();
        inner.audit.push(event.clone());

        match inner.latest.entry(event.tag_id().clone()) {
            Entry::Vacant(slot) => {
                slot.insert(TagSummary {
                    first_seen: event.timestamp(),
                    last: event,
                    reads: 1,
                });
            }
            Entry::Occupied(mut slot) => {
                let summary = slot.get_mut();
                summary.reads += 1;
                summary.first_seen = summary.first_seen.min(event.timestamp());
                if event.timestamp() >= summary.last.timestamp() {
                    summary.last = event;
                }
            }
        }
    }

    /// Newest read per tag, ordered by tag id.
    pub fn snapshot(&self) -> Vec<TagEvent> {
        self.lock()
            .latest
            .values()
            .map(|summary| summary.last.clone())
            .collect()
    }

    /// Per-tag aggregates, ordered by tag id.
    pub fn summary(&self) -> Vec<TagSummary> {
        self.lock().latest.values().cloned().collect()
    }

    /// Every recorded read, oldest first.
    pub fn audit(&self) -> Vec<TagEvent> {
        self.lock().audit.clone()
    }

    /// Empty both views.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.latest.clear();
        inner.audit.clear();
    }

    /// Number of distinct tags.
    pub fn len(&self) -> usize {
        self.lock().latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().latest.is_empty()
    }

    /// Number of recorded reads.
    pub fn audit_len(&self) -> usize {
        self.lock().audit.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use readerd_core::AntennaId;
    use std::sync::Arc;

    fn read(id: u8, secs: i64) -> TagEvent {
        TagEvent::new(
            TagId::new(vec![id]).unwrap(),
            AntennaId::new(1),
            Utc.timestamp_opt(secs, 0).unwrap(),
        )
    }

    #[test]
    fn test_last_write_wins_per_tag() {
        let buffer = TagBuffer::new();
        buffer.record(read(0xA, 1));
        buffer.record(read(0xB, 2));
        buffer.record(read(0xA, 3));

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot, vec![read(0xA, 3), read(0xB, 2)]);
        assert_eq!(buffer.audit().len(), 3);
    }

    #[test]
    fn test_older_read_does_not_replace_newer() {
        let buffer = TagBuffer::new();
        buffer.record(read(1, 10));
        buffer.record(read(1, 5));

        assert_eq!(buffer.snapshot(), vec![read(1, 10)]);
        assert_eq!(buffer.audit(), vec![read(1, 10), read(1, 5)]);
    }

    #[test]
    fn test_equal_timestamp_later_call_wins() {
        let buffer = TagBuffer::new();
        buffer.record(read(1, 7).with_rssi(-70));
        buffer.record(read(1, 7).with_rssi(-40));

        assert_eq!(buffer.snapshot()[0].rssi(), Some(-40));
    }

    #[test]
    fn test_snapshot_ordered_by_tag_id() {
        let buffer = TagBuffer::new();
        for id in [9, 3, 7, 1] {
            buffer.record(read(id, 1));
        }

        let ids: Vec<u8> = buffer
            .snapshot()
            .iter()
            .map(|e| e.tag_id().as_bytes()[0])
            .collect();
        assert_eq!(ids, vec![1, 3, 7, 9]);
    }

    #[test]
    fn test_summary_counts_and_first_seen() {
        let buffer = TagBuffer::new();
        buffer.record(read(1, 5));
        buffer.record(read(1, 2));
        buffer.record(read(1, 9));

        let summary = buffer.summary();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].reads, 3);
        assert_eq!(summary[0].first_seen, Utc.timestamp_opt(2, 0).unwrap());
        assert_eq!(summary[0].last, read(1, 9));
    }

    #[test]
    fn test_clear_empties_both_views() {
        let buffer = TagBuffer::new();
        buffer.record(read(1, 1));
        buffer.record(read(2, 1));

        buffer.clear();
        assert!(buffer.snapshot().is_empty());
        assert!(buffer.is_empty());
        assert_eq!(buffer.audit_len(), 0);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let buffer = TagBuffer::new();
        buffer.record(read(1, 1));
        let snapshot = buffer.snapshot();

        buffer.record(read(2, 1));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_concurrent_record() {
        let buffer = Arc::new(TagBuffer::new());
        let threads: Vec<_> = (0..4u8)
            .map(|t| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        buffer.record(read(t, i));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.audit_len(), 400);
        assert!(buffer.snapshot().iter().all(|e| e.timestamp().timestamp() == 99));
    }
}
