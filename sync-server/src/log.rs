//! In-memory action log.
//!
//! Processed actions land here in meta order, so late insertions from
//! slow producers end up at the position their time and id dictate rather
//! than at the tail.

use std::sync::Mutex;
use sync_types::{Action, Meta};

/// One synchronized action with its meta.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// The action payload.
    pub action: Action,
    /// The meta record under which it was logged.
    pub meta: Meta,
}

/// In-memory log of processed actions, kept in meta order.
#[derive(Debug, Default)]
pub struct ActionLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl ActionLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an action, preserving meta order. Duplicate metas are
    /// ignored.
    pub fn add(&self, action: Action, meta: Meta) {
        let mut entries = self.entries.lock().unwrap();
        if entries.iter().any(|entry| entry.meta == meta) {
            tracing::debug!(id = %meta.id(), "duplicate action ignored");
            return;
        }
        let position = entries.partition_point(|entry| entry.meta <= meta);
        entries.insert(position, LogEntry { action, meta });
    }

    /// Number of logged actions.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// A snapshot of all entries in log order.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, time: i64) -> (Action, Meta) {
        (Action::new("x"), Meta::new(id, time).unwrap())
    }

    #[test]
    fn entries_come_out_in_meta_order() {
        let log = ActionLog::new();
        let (a2, m2) = entry("200 1:a 0", 200);
        let (a1, m1) = entry("100 1:a 0", 100);
        let (a3, m3) = entry("300 1:a 0", 300);
        log.add(a2, m2);
        log.add(a1, m1);
        log.add(a3, m3);

        let times: Vec<i64> = log.entries().iter().map(|e| e.meta.time()).collect();
        assert_eq!(times, vec![100, 200, 300]);
    }

    #[test]
    fn same_time_is_ordered_by_id() {
        let log = ActionLog::new();
        let (ab, mb) = entry("100 1:b 0", 100);
        let (aa, ma) = entry("100 1:a 0", 100);
        log.add(ab, mb);
        log.add(aa, ma);

        let ids: Vec<String> = log
            .entries()
            .iter()
            .map(|e| e.meta.id().raw().to_string())
            .collect();
        assert_eq!(ids, vec!["100 1:a 0", "100 1:b 0"]);
    }

    #[test]
    fn duplicates_are_ignored() {
        let log = ActionLog::new();
        let (a, m) = entry("100 1:a 0", 100);
        log.add(a.clone(), m.clone());
        log.add(a, m);
        assert_eq!(log.len(), 1);
    }
}
