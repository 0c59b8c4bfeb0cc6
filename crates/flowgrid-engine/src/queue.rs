//! Min-heap of next-due schedule instants.
//!
//! The poller asks "what's due?" instead of scanning every active
//! automation each tick. Entries are lazily invalidated: popping returns
//! candidates, and the caller re-checks the automation's current state and
//! `next_run_at` before triggering — a paused or rescheduled automation
//! simply drops out.

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// One queued occurrence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DueEntry {
    pub due_at: DateTime<Utc>,
    pub automation_id: String,
}

/// Min-heap keyed on `due_at` (ties broken by automation id).
#[derive(Debug, Default)]
pub struct ScheduleQueue {
    heap: BinaryHeap<Reverse<DueEntry>>,
}

impl ScheduleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an occurrence. Duplicates are fine — stale entries are
    /// filtered by the caller's re-check at pop time.
    pub fn push(&mut self, automation_id: &str, due_at: DateTime<Utc>) {
        self.heap.push(Reverse(DueEntry {
            due_at,
            automation_id: automation_id.to_string(),
        }));
    }

    /// Pop every entry due at or before `now`.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<DueEntry> {
        let mut due = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.due_at > now {
                break;
            }
            if let Some(Reverse(entry)) = self.heap.pop() {
                due.push(entry);
            }
        }
        due
    }

    /// When the earliest queued occurrence is due, if any.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|Reverse(e)| e.due_at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 6, h, m, 0).unwrap()
    }

    #[test]
    fn test_pops_in_due_order() {
        let mut queue = ScheduleQueue::new();
        queue.push("c", at(12, 0));
        queue.push("a", at(9, 0));
        queue.push("b", at(10, 30));

        let due = queue.pop_due(at(13, 0));
        let ids: Vec<&str> = due.iter().map(|e| e.automation_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_only_due_entries_pop() {
        let mut queue = ScheduleQueue::new();
        queue.push("early", at(9, 0));
        queue.push("late", at(18, 0));

        let due = queue.pop_due(at(9, 0));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].automation_id, "early");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_due(), Some(at(18, 0)));
    }

    #[test]
    fn test_empty_queue() {
        let mut queue = ScheduleQueue::new();
        assert!(queue.pop_due(Utc::now()).is_empty());
        assert_eq!(queue.next_due(), None);
    }

    #[test]
    fn test_duplicate_entries_both_surface() {
        // Re-activation can queue the same automation twice; the caller's
        // next_run_at re-check discards the stale one.
        let mut queue = ScheduleQueue::new();
        queue.push("a", at(9, 0));
        queue.push("a", at(9, 0) + Duration::hours(1));
        let due = queue.pop_due(at(11, 0));
        assert_eq!(due.len(), 2);
    }
}
