use super::{ChainClient, ClientError, GenesisParams};
use crate::{now_secs, BlockId, ChainBlock, Participant, Record, Roster};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// In-process stand-in for the consensus service. Blocks are linked by
/// sha256 ids and kept in memory. Failures and latency can be injected.
#[derive(Debug, Default)]
pub struct InMemoryChainClient {
    chains: Mutex<Vec<Vec<ChainBlock>>>,
    fail_genesis: AtomicBool,
    fetch_failures: AtomicUsize,
    store_failures: AtomicUsize,
    fetch_calls: AtomicUsize,
    store_calls: AtomicUsize,
    latency: Duration,
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl InMemoryChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every fetch and store call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn chains(&self) -> MutexGuard<'_, Vec<Vec<ChainBlock>>> {
        self.chains.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_genesis(&self, fail: bool) {
        self.fail_genesis.store(fail, Ordering::SeqCst);
    }

    pub fn fail_next_fetches(&self, n: usize) {
        self.fetch_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_stores(&self, n: usize) {
        self.store_failures.store(n, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn store_calls(&self) -> usize {
        self.store_calls.load(Ordering::SeqCst)
    }

    /// Every block of the chain rooted at `genesis`, oldest first.
    pub fn blocks(&self, genesis: BlockId) -> Vec<ChainBlock> {
        self.chains()
            .iter()
            .find(|c| c.first().map(|b| b.id) == Some(genesis))
            .cloned()
            .unwrap_or_default()
    }

    /// Appends a block as if another node had sealed it.
    pub fn extend_externally(
        &self,
        parent: BlockId,
        records: Vec<Record>,
    ) -> Result<ChainBlock, ClientError> {
        self.append(parent, None, records)
    }

    fn append(
        &self,
        parent: BlockId,
        roster: Option<&Roster>,
        records: Vec<Record>,
    ) -> Result<ChainBlock, ClientError> {
        let mut chains = self.chains();
        let chain = chains
            .iter_mut()
            .find(|c| c.iter().any(|b| b.id == parent))
            .ok_or(ClientError::UnknownBlock(parent))?;
        let tip = chain.last().ok_or(ClientError::UnknownBlock(parent))?;
        if tip.id != parent {
            return Err(ClientError::StaleParent(parent));
        }
        let roster = roster.cloned().unwrap_or_else(|| tip.roster.clone());
        let block = ChainBlock::child(tip, roster, records, now_secs());
        chain.push(block.clone());
        Ok(block)
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl ChainClient for InMemoryChainClient {
    async fn create_genesis(
        &self,
        roster: &Roster,
        params: GenesisParams,
        initial_records: &[Record],
    ) -> Result<ChainBlock, ClientError> {
        if self.fail_genesis.load(Ordering::SeqCst) {
            return Err(ClientError::Unreachable("genesis failure injected".into()));
        }
        if roster.is_empty() {
            return Err(ClientError::Rejected("roster is empty".into()));
        }
        if params.consensus_count as usize > roster.len() {
            return Err(ClientError::Rejected(format!(
                "consensus count {} exceeds roster of {}",
                params.consensus_count,
                roster.len()
            )));
        }
        let mut chains = self.chains();
        let genesis = ChainBlock::genesis(
            roster.clone(),
            initial_records.to_vec(),
            now_secs(),
            chains.len() as u64,
        );
        debug!(genesis = %genesis.id, "created genesis");
        chains.push(vec![genesis.clone()]);
        Ok(genesis)
    }

    async fn fetch_updates(
        &self,
        _roster: &Roster,
        since: BlockId,
    ) -> Result<Vec<ChainBlock>, ClientError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if take_one(&self.fetch_failures) {
            return Err(ClientError::Unreachable("fetch failure injected".into()));
        }
        let chains = self.chains();
        for chain in chains.iter() {
            if let Some(pos) = chain.iter().position(|b| b.id == since) {
                return Ok(chain[pos..].to_vec());
            }
        }
        Err(ClientError::UnknownBlock(since))
    }

    async fn store_block(
        &self,
        parent: &ChainBlock,
        roster: &Roster,
        records: &[Record],
    ) -> Result<ChainBlock, ClientError> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if take_one(&self.store_failures) {
            return Err(ClientError::Unreachable("store failure injected".into()));
        }
        self.append(parent.id, Some(roster), records.to_vec())
    }

    async fn list_chains(
        &self,
        participant: &Participant,
    ) -> Result<Vec<ChainBlock>, ClientError> {
        Ok(self
            .chains()
            .iter()
            .filter_map(|c| c.first())
            .filter(|g| g.roster.contains(&participant.id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> Roster {
        Roster::new(vec![
            Participant::new("a", "tcp://10.0.0.1:7000"),
            Participant::new("b", "tcp://10.0.0.2:7000"),
            Participant::new("c", "tcp://10.0.0.3:7000"),
        ])
    }

    #[tokio::test]
    async fn genesis_then_store_builds_linked_chain() {
        let client = InMemoryChainClient::new();
        let g = client
            .create_genesis(&roster(), GenesisParams::default(), &[])
            .await
            .unwrap();
        let b1 = client
            .store_block(&g, &roster(), &[Record::new("https://x", "text/html", "")])
            .await
            .unwrap();
        assert!(b1.follows(&g));
        assert_eq!(client.blocks(g.id), vec![g.clone(), b1.clone()]);

        let updates = client.fetch_updates(&roster(), g.id).await.unwrap();
        assert_eq!(updates, vec![g, b1]);
    }

    #[tokio::test]
    async fn genesis_rejects_small_roster() {
        let client = InMemoryChainClient::new();
        let solo = Roster::new(vec![Participant::new("a", "tcp://10.0.0.1:7000")]);
        let err = client
            .create_genesis(&solo, GenesisParams::default(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Rejected(_)));
    }

    #[tokio::test]
    async fn separate_genesis_calls_get_distinct_ids() {
        let client = InMemoryChainClient::new();
        let a = client
            .create_genesis(&roster(), GenesisParams::default(), &[])
            .await
            .unwrap();
        let b = client
            .create_genesis(&roster(), GenesisParams::default(), &[])
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
        let listed = client.list_chains(&roster().participants[1]).await.unwrap();
        assert_eq!(listed.len(), 2);
        let stranger = Participant::new("z", "tcp://10.9.9.9:7000");
        assert!(client.list_chains(&stranger).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn storing_on_old_parent_is_stale() {
        let client = InMemoryChainClient::new();
        let g = client
            .create_genesis(&roster(), GenesisParams::default(), &[])
            .await
            .unwrap();
        client.extend_externally(g.id, vec![]).unwrap();
        let err = client.store_block(&g, &roster(), &[]).await.unwrap_err();
        assert_eq!(err, ClientError::StaleParent(g.id));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let client = InMemoryChainClient::new();
        let g = client
            .create_genesis(&roster(), GenesisParams::default(), &[])
            .await
            .unwrap();
        client.fail_next_fetches(2);
        assert!(client.fetch_updates(&roster(), g.id).await.is_err());
        assert!(client.fetch_updates(&roster(), g.id).await.is_err());
        assert!(client.fetch_updates(&roster(), g.id).await.is_ok());
        assert_eq!(client.fetch_calls(), 3);

        client.fail_next_stores(1);
        assert!(client.store_block(&g, &roster(), &[]).await.is_err());
        assert!(client.store_block(&g, &roster(), &[]).await.is_ok());
        assert_eq!(client.store_calls(), 2);
    }

    #[tokio::test]
    async fn unknown_block_is_reported() {
        let client = InMemoryChainClient::new();
        let missing = BlockId([7u8; 32]);
        assert_eq!(
            client.fetch_updates(&roster(), missing).await.unwrap_err(),
            ClientError::UnknownBlock(missing)
        );
    }
}
