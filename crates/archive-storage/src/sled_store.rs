use anyhow::{bail, Context, Result};
use archive_core::constants::SNAPSHOT_KEY;
use archive_core::{ChainState, SnapshotStore};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::path::Path;
use tracing::{debug, info};

const TREE_SNAPSHOTS: &str = "snapshots";
const SNAPSHOT_KIND: &str = "chain_state";
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope {
    kind: String,
    version: u32,
    state: ChainState,
}

#[derive(Clone)]
pub struct SledSnapshotStore {
    db: Db,
    snapshots: Tree,
}

impl SledSnapshotStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path)
            .with_context(|| format!("opening sled store at {}", path.display()))?;
        let snapshots = db.open_tree(TREE_SNAPSHOTS)?;
        info!(path = %path.display(), "sled snapshot store opened");
        Ok(Self { db, snapshots })
    }

    pub fn has_snapshot(&self) -> Result<bool> {
        Ok(self.snapshots.contains_key(SNAPSHOT_KEY)?)
    }

    /// Removes the saved snapshot, if any.
    pub fn clear(&self) -> Result<()> {
        self.snapshots.remove(SNAPSHOT_KEY)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl SnapshotStore for SledSnapshotStore {
    fn load(&self) -> Result<Option<ChainState>> {
        let Some(bytes) = self.snapshots.get(SNAPSHOT_KEY)? else {
            return Ok(None);
        };
        let envelope: Envelope = bincode::deserialize(&bytes)
            .with_context(|| format!("snapshot `{SNAPSHOT_KEY}` is corrupt"))?;
        if envelope.kind != SNAPSHOT_KIND {
            bail!(
                "snapshot `{SNAPSHOT_KEY}` holds data of the wrong type: {}",
                envelope.kind
            );
        }
        if envelope.version != SNAPSHOT_VERSION {
            bail!(
                "snapshot `{SNAPSHOT_KEY}` has unsupported version {}",
                envelope.version
            );
        }
        debug!(height = envelope.state.height(), "snapshot loaded");
        Ok(Some(envelope.state))
    }

    fn save(&self, state: &ChainState) -> Result<()> {
        let envelope = Envelope {
            kind: SNAPSHOT_KIND.to_string(),
            version: SNAPSHOT_VERSION,
            state: state.clone(),
        };
        let bytes = bincode::serialize(&envelope)?;
        self.snapshots.insert(SNAPSHOT_KEY, bytes)?;
        self.db.flush()?;
        debug!(height = state.height(), "snapshot saved");
        Ok(())
    }
}
