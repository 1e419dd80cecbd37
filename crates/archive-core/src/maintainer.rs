//! Periodic chain maintainer.
//!
//! Once started, a background task repeats one seal cycle per interval:
//!
//! ```text
//! 1. FETCH: pull blocks after our latest pointer, splice them in
//! 2. PARENT: take the current latest block
//! 3. DRAIN: take every pending record (empty seals are still attempted)
//! 4. STORE: ask the consensus service for a new block
//! 5. SAVE: persist the snapshot after a successful store
//! 6. SLEEP: wait `seal_interval`, or until stopped
//! ```
//!
//! Failures inside the loop are logged and retried on the next cycle.
//! Callers of `start`, `stop` and `add_records` never see them: delivery is
//! fire-and-forget and eventually consistent.

use crate::chain::{ChainError, ChainState, ChainStore};
use crate::client::{ChainClient, ClientError, GenesisParams};
use crate::constants::DEFAULT_SEAL_INTERVAL_SECS;
use crate::pending::PendingBuffer;
use crate::snapshot::SnapshotStore;
use crate::{BlockId, ChainBlock, Record, RecordSelector, Roster};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What happens to drained records when storing the block fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainPolicy {
    /// Drop them. They are lost for good.
    Discard,
    /// Put them back so the next cycle seals them.
    #[default]
    Restore,
}

impl FromStr for DrainPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discard" => Ok(DrainPolicy::Discard),
            "restore" => Ok(DrainPolicy::Restore),
            other => Err(format!(
                "unknown drain policy `{other}` (expected `discard` or `restore`)"
            )),
        }
    }
}

impl fmt::Display for DrainPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrainPolicy::Discard => f.write_str("discard"),
            DrainPolicy::Restore => f.write_str("restore"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MaintainerConfig {
    pub seal_interval: Duration,
    pub drain_policy: DrainPolicy,
    pub genesis: GenesisParams,
}

impl Default for MaintainerConfig {
    fn default() -> Self {
        Self {
            seal_interval: Duration::from_secs(DEFAULT_SEAL_INTERVAL_SECS),
            drain_policy: DrainPolicy::default(),
            genesis: GenesisParams::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintainerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum MaintainerError {
    #[error("roster is empty")]
    EmptyRoster,
    #[error("maintainer is {0:?}, stop it first")]
    Busy(MaintainerState),
    #[error("genesis creation failed: {0}")]
    Genesis(ClientError),
    #[error("listing chains failed: {0}")]
    Listing(ClientError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("looking up records by {selector} is not implemented ({chains} chains listed)")]
    NotImplemented { selector: String, chains: usize },
}

/// Outcome of a single seal cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub fetched: usize,
    pub fetch_failed: bool,
    pub sealed: Option<BlockId>,
    pub records_sealed: usize,
    pub records_restored: usize,
    pub records_dropped: usize,
}

struct Control {
    state: MaintainerState,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

struct Inner<C: ?Sized, S: ?Sized> {
    client: Arc<C>,
    snapshots: Arc<S>,
    config: MaintainerConfig,
    chain: ChainStore,
    pending: PendingBuffer,
    control: Mutex<Control>,
}

/// Keeps a local view of one chain and periodically seals pending records
/// into it. Cheap to clone; clones share the same chain and loop. The client
/// and snapshot store may be trait objects.
pub struct Maintainer<C: ?Sized, S: ?Sized> {
    inner: Arc<Inner<C, S>>,
}

impl<C: ?Sized, S: ?Sized> Clone for Maintainer<C, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C, S> Maintainer<C, S>
where
    C: ChainClient + ?Sized + 'static,
    S: SnapshotStore + ?Sized + 'static,
{
    /// Builds a maintainer and restores the last snapshot, if any. A snapshot
    /// that cannot be loaded is logged and the maintainer starts empty.
    pub fn new(client: Arc<C>, snapshots: Arc<S>, config: MaintainerConfig) -> Self {
        let chain = ChainStore::new();
        match snapshots.load() {
            Ok(Some(state)) => {
                let height = state.height();
                match chain.restore(state) {
                    Ok(()) => info!(height, latest = ?chain.latest(), "restored chain snapshot"),
                    Err(e) => warn!(error = %e, "chain snapshot is inconsistent, starting empty"),
                }
            }
            Ok(None) => info!("no chain snapshot found, starting fresh"),
            Err(e) => warn!(error = %e, "failed to load chain snapshot, starting empty"),
        }

        Self {
            inner: Arc::new(Inner {
                client,
                snapshots,
                config,
                chain,
                pending: PendingBuffer::new(),
                control: Mutex::new(Control {
                    state: MaintainerState::Idle,
                    shutdown: None,
                    task: None,
                }),
            }),
        }
    }

    pub fn config(&self) -> &MaintainerConfig {
        &self.inner.config
    }

    pub fn chain(&self) -> ChainState {
        self.inner.chain.read()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn state(&self) -> MaintainerState {
        self.inner.control().state
    }

    /// Creates the genesis block and makes it the whole local chain.
    /// Refused while the seal loop is active.
    pub async fn bootstrap(&self, roster: &Roster) -> Result<ChainBlock, MaintainerError> {
        if roster.is_empty() {
            return Err(MaintainerError::EmptyRoster);
        }
        self.inner.ensure_inactive()?;
        info!(participants = roster.len(), "creating genesis block");
        let genesis = self
            .inner
            .client
            .create_genesis(roster, self.inner.config.genesis, &[])
            .await
            .map_err(MaintainerError::Genesis)?;
        self.inner.ensure_inactive()?;
        self.inner.chain.reset_to_genesis(genesis.clone())?;
        self.inner.persist();
        info!(genesis = %genesis.id, "chain bootstrapped");
        Ok(genesis)
    }

    /// Spawns the seal loop on the chain rooted at `genesis` and returns at
    /// once. A local chain with a different root is replaced by `genesis`.
    /// Must be called from within a tokio runtime. Ignored while a loop is
    /// already active.
    pub fn start(&self, roster: Roster, genesis: ChainBlock) {
        let mut control = self.inner.control();
        if matches!(
            control.state,
            MaintainerState::Running | MaintainerState::Stopping
        ) {
            warn!(state = ?control.state, "maintainer already active, ignoring start");
            return;
        }
        let genesis_id = genesis.id;
        if !genesis.is_genesis() {
            warn!(block = %genesis_id, "cannot start without a genesis block");
            return;
        }
        match self.inner.chain.genesis_id() {
            None => {
                if let Err(e) = self.inner.chain.seed_genesis(genesis) {
                    warn!(error = %e, "seeding genesis failed");
                    return;
                }
                info!(genesis = %genesis_id, "seeded empty chain with genesis");
            }
            Some(local) if local == genesis_id => {
                debug!(genesis = %genesis_id, "chain already known, genesis not needed")
            }
            Some(local) => {
                warn!(
                    local = %local,
                    requested = %genesis_id,
                    "local chain has a different root, switching to the requested chain"
                );
                if let Err(e) = self.inner.chain.reset_to_genesis(genesis) {
                    warn!(error = %e, "switching chains failed");
                    return;
                }
                self.inner.persist();
            }
        }

        let (tx, rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        control.task = Some(tokio::spawn(inner.run(roster, rx)));
        control.shutdown = Some(tx);
        control.state = MaintainerState::Running;
    }

    /// Asks the loop to stop and returns without waiting for it.
    pub fn stop(&self) {
        let mut control = self.inner.control();
        if control.state != MaintainerState::Running {
            debug!(state = ?control.state, "stop requested while not running");
            return;
        }
        if let Some(tx) = &control.shutdown {
            let _ = tx.send(true);
        }
        control.state = MaintainerState::Stopping;
        info!("maintainer stop requested");
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let task = self.inner.control().task.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "maintainer task ended abnormally");
            }
        }
    }

    /// Buffers records for the next seal. Returns how many are pending now.
    pub fn add_records(&self, records: Vec<Record>) -> usize {
        let added = records.len();
        self.inner.pending.add(records);
        let pending = self.inner.pending.len();
        debug!(added, pending, "records buffered");
        pending
    }

    /// Lists the chains a random roster member knows. Resolving the selector
    /// against them is not implemented, which is reported as an error so an
    /// empty result is never mistaken for "no records".
    pub async fn get_records(
        &self,
        roster: &Roster,
        selector: &RecordSelector,
    ) -> Result<Vec<Record>, MaintainerError> {
        let participant = roster
            .random_participant()
            .ok_or(MaintainerError::EmptyRoster)?;
        let chains = self
            .inner
            .client
            .list_chains(participant)
            .await
            .map_err(MaintainerError::Listing)?;
        debug!(chains = chains.len(), %selector, participant = %participant.id, "listed chains");
        Err(MaintainerError::NotImplemented {
            selector: selector.to_string(),
            chains: chains.len(),
        })
    }

    /// Runs exactly one seal cycle on the caller's task.
    pub async fn run_cycle(&self, roster: &Roster) -> CycleReport {
        self.inner.run_cycle(roster).await
    }
}

impl<C, S> Inner<C, S>
where
    C: ChainClient + ?Sized + 'static,
    S: SnapshotStore + ?Sized + 'static,
{
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_inactive(&self) -> Result<(), MaintainerError> {
        match self.control().state {
            state @ (MaintainerState::Running | MaintainerState::Stopping) => {
                Err(MaintainerError::Busy(state))
            }
            _ => Ok(()),
        }
    }

    async fn run(self: Arc<Self>, roster: Roster, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.seal_interval.as_secs(),
            policy = %self.config.drain_policy,
            "maintainer loop started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }

            let report = self.run_cycle(&roster).await;
            debug!(?report, "seal cycle finished");

            tokio::select! {
                _ = tokio::time::sleep(self.config.seal_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("stop signal received while sleeping");
                        break;
                    }
                }
            }
        }

        let mut control = self.control();
        control.state = MaintainerState::Stopped;
        control.shutdown = None;
        info!("maintainer loop stopped");
    }

    async fn run_cycle(&self, roster: &Roster) -> CycleReport {
        let mut report = CycleReport::default();

        let Some(latest) = self.chain.latest() else {
            warn!("no chain to maintain, skipping cycle");
            return report;
        };
        match self.client.fetch_updates(roster, latest).await {
            Ok(blocks) if blocks.is_empty() => debug!("consensus service returned no updates"),
            Ok(blocks) => {
                let n = blocks.len();
                match self.chain.append_updates(blocks) {
                    Ok(()) => report.fetched = n,
                    Err(e) => warn!(error = %e, "discarding chain update"),
                }
            }
            Err(e) => {
                report.fetch_failed = true;
                warn!(error = %e, "fetching chain updates failed, sealing on local state");
            }
        }

        let Some(parent) = self.chain.latest_block() else {
            return report;
        };
        let records = self.pending.drain_all();

        match self.client.store_block(&parent, roster, &records).await {
            Ok(block) => {
                let id = block.id;
                report.sealed = Some(id);
                report.records_sealed = records.len();
                match self.chain.advance(block) {
                    Ok(()) => self.persist(),
                    Err(e) => warn!(
                        error = %e,
                        block = %id,
                        "sealed block does not extend local tail, next fetch will reconcile"
                    ),
                }
                info!(block = %id, records = report.records_sealed, "sealed pending records");
            }
            Err(e) => {
                warn!(error = %e, records = records.len(), "storing block failed");
                match self.config.drain_policy {
                    DrainPolicy::Restore => {
                        report.records_restored = records.len();
                        self.pending.restore(records);
                    }
                    DrainPolicy::Discard => {
                        report.records_dropped = records.len();
                        if !records.is_empty() {
                            warn!(dropped = records.len(), "pending records discarded");
                        }
                    }
                }
            }
        }
        report
    }

    fn persist(&self) {
        let state = self.chain.read();
        if let Err(e) = self.snapshots.save(&state) {
            warn!(error = %e, height = state.height(), "failed to save chain snapshot");
        }
    }
}
