use crate::Record;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Records waiting for the next seal. Safe to feed from many producers.
#[derive(Debug, Default)]
pub struct PendingBuffer {
    records: Mutex<Vec<Record>>,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Record>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, records: Vec<Record>) {
        self.lock().extend(records);
    }

    /// Takes everything buffered so far and leaves the buffer empty.
    pub fn drain_all(&self) -> Vec<Record> {
        std::mem::take(&mut *self.lock())
    }

    /// Puts drained records back ahead of anything added since the drain.
    pub fn restore(&self, mut records: Vec<Record>) {
        if records.is_empty() {
            return;
        }
        let mut buf = self.lock();
        records.append(&mut *buf);
        *buf = records;
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(prefix: &str, n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record {
                url: format!("https://{prefix}.example/{i}"),
                content_type: "text/html".into(),
                page: String::new(),
                additional_urls: vec![],
                timestamp: 1_600_000_000 + i as u64,
            })
            .collect()
    }

    #[test]
    fn drain_returns_everything_and_empties() {
        let buf = PendingBuffer::new();
        buf.add(records("a", 5));
        assert_eq!(buf.len(), 5);
        let drained = buf.drain_all();
        assert_eq!(drained, records("a", 5));
        assert!(buf.is_empty());
        assert!(buf.drain_all().is_empty());
    }

    #[test]
    fn restore_keeps_drained_records_first() {
        let buf = PendingBuffer::new();
        buf.add(records("old", 2));
        let drained = buf.drain_all();
        buf.add(records("new", 1));
        buf.restore(drained);
        let urls: Vec<_> = buf.drain_all().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://old.example/0",
                "https://old.example/1",
                "https://new.example/0"
            ]
        );
    }

    #[test]
    fn concurrent_adds_are_all_drained() {
        let buf = PendingBuffer::new();
        std::thread::scope(|s| {
            s.spawn(|| buf.add(records("three", 3)));
            s.spawn(|| buf.add(records("four", 4)));
        });
        let drained = buf.drain_all();
        assert_eq!(drained.len(), 7);
        // each batch lands contiguously
        let first_three = drained.iter().position(|r| r.url.contains("three")).unwrap();
        assert!(drained[first_three..first_three + 3]
            .iter()
            .all(|r| r.url.contains("three")));
    }

    #[test]
    fn adds_racing_a_drain_are_never_lost() {
        let buf = PendingBuffer::new();
        let mut drained = Vec::new();
        std::thread::scope(|s| {
            let producer = s.spawn(|| {
                for i in 0..100 {
                    buf.add(records(&format!("p{i}"), 1));
                }
            });
            while !producer.is_finished() {
                drained.extend(buf.drain_all());
            }
        });
        drained.extend(buf.drain_all());
        assert_eq!(drained.len(), 100);
    }
}
