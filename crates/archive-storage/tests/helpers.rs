#![allow(dead_code)]

use std::fs;

use archive_core::{ChainBlock, ChainState, Participant, Record, Roster};
use archive_storage::SledSnapshotStore;
use tempfile::{tempdir, TempDir};

pub fn create_temp_store() -> (TempDir, SledSnapshotStore) {
    // Create a temporary directory for the sled database
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().to_path_buf();
    (
        temp_dir,
        SledSnapshotStore::open(&db_path).expect("Failed to open SledSnapshotStore"),
    )
}

pub fn teardown_store(temp_dir: TempDir, store: SledSnapshotStore) {
    let db_path = temp_dir.path().to_path_buf();
    store.clear().expect("Failed to clear the store");
    drop(store);
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&db_path);
    assert!(!db_path.exists(), "Database directory should be removed");
}

pub fn roster() -> Roster {
    Roster::new(vec![
        Participant::new("node-0", "tcp://127.0.0.1:7000"),
        Participant::new("node-1", "tcp://127.0.0.1:7002"),
        Participant::new("node-2", "tcp://127.0.0.1:7004"),
    ])
}

/// A contiguous chain of `len` blocks, each holding `per_block` records.
pub fn chain_state(len: usize, per_block: usize) -> ChainState {
    let mut segment = vec![ChainBlock::genesis(roster(), vec![], 1_600_000_000, 0)];
    for i in 1..len {
        let records = (0..per_block)
            .map(|j| Record {
                url: format!("https://example.org/{i}/{j}"),
                content_type: "text/html".to_string(),
                page: format!("body-{i}-{j}"),
                additional_urls: vec![format!("https://example.org/{i}/{j}.css")],
                timestamp: 1_600_000_000 + i as u64,
            })
            .collect();
        let block = ChainBlock::child(&segment[i - 1], roster(), records, 1_600_000_000 + i as u64);
        segment.push(block);
    }
    ChainState {
        latest: segment.last().map(|b| b.id),
        segment,
    }
}
