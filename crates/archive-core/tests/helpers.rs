#![allow(dead_code)]

use archive_core::client::InMemoryChainClient;
use archive_core::{
    DrainPolicy, Maintainer, MaintainerConfig, MemorySnapshotStore, Participant, Record, Roster,
};
use std::sync::Arc;
use std::time::Duration;

pub type TestMaintainer = Maintainer<InMemoryChainClient, MemorySnapshotStore>;

pub fn roster_of(n: usize) -> Roster {
    Roster::new(
        (0..n)
            .map(|i| {
                Participant::new(
                    format!("node-{i}"),
                    format!("tcp://127.0.0.1:{}", 7000 + 2 * i),
                )
            })
            .collect(),
    )
}

pub fn records(prefix: &str, n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| Record {
            url: format!("https://{prefix}.example/{i}"),
            content_type: "text/html".to_string(),
            page: format!("page-{i}"),
            additional_urls: vec![format!("https://{prefix}.example/{i}/style.css")],
            timestamp: 1_600_000_000 + i as u64,
        })
        .collect()
}

pub fn setup(
    policy: DrainPolicy,
    interval: Duration,
) -> (
    Arc<InMemoryChainClient>,
    Arc<MemorySnapshotStore>,
    TestMaintainer,
) {
    let client = Arc::new(InMemoryChainClient::new());
    let snapshots = Arc::new(MemorySnapshotStore::new());
    let config = MaintainerConfig {
        seal_interval: interval,
        drain_policy: policy,
        ..MaintainerConfig::default()
    };
    let maintainer = Maintainer::new(client.clone(), snapshots.clone(), config);
    (client, snapshots, maintainer)
}

/// Polls `cond` every 10ms for up to two seconds.
pub async fn wait_for(cond: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
