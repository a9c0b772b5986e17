use std::cmp::Reverse;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

use crate::types::{FireEvent, JobId};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    due_at: DateTime<Utc>,
    /// Registration order; breaks ties between jobs due at the same instant.
    seq: u64,
    job_id: JobId,
}

/// Min-heap of pending fire times.
///
/// Entries are never removed on unregister; the engine skips entries whose
/// job no longer exists when they surface.
#[derive(Debug, Default)]
pub(crate) struct FireQueue {
    heap: BinaryHeap<Reverse<Entry>>,
}

impl FireQueue {
    pub(crate) fn push(&mut self, job_id: JobId, seq: u64, due_at: DateTime<Utc>) {
        self.heap.push(Reverse(Entry { due_at, seq, job_id }));
    }

    /// Earliest due time, if any.
    pub(crate) fn peek_due(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|Reverse(entry)| entry.due_at)
    }

    /// Remove and return every entry due at or before `now`, earliest first.
    pub(crate) fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<FireEvent> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|Reverse(entry)| entry.due_at <= now) {
            if let Some(Reverse(entry)) = self.heap.pop() {
                due.push(FireEvent { job_id: entry.job_id, seq: entry.seq, due_at: entry.due_at });
            }
        }
        due
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, s).unwrap()
    }

    #[test]
    fn pops_only_due_entries_in_time_order() {
        let mut queue = FireQueue::default();
        queue.push(JobId::from("c"), 2, t(30));
        queue.push(JobId::from("a"), 0, t(10));
        queue.push(JobId::from("b"), 1, t(20));

        assert_eq!(queue.peek_due(), Some(t(10)));
        let due: Vec<_> = queue.pop_due(t(20)).into_iter().map(|e| e.job_id).collect();
        assert_eq!(due, vec![JobId::from("a"), JobId::from("b")]);
        assert_eq!(queue.len(), 1);
        assert!(queue.pop_due(t(29)).is_empty());
    }

    #[test]
    fn same_instant_ties_break_by_registration_order() {
        let mut queue = FireQueue::default();
        // Ids sort opposite to registration order.
        queue.push(JobId::from("z-first"), 0, t(5));
        queue.push(JobId::from("a-second"), 1, t(5));
        queue.push(JobId::from("m-third"), 2, t(5));

        let due: Vec<_> = queue.pop_due(t(5)).into_iter().map(|e| e.job_id).collect();
        assert_eq!(
            due,
            vec![JobId::from("z-first"), JobId::from("a-second"), JobId::from("m-third")]
        );
    }
}
