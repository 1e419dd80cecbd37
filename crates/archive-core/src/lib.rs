//! Core types and the periodic chain maintainer for the web archive.

use rand::seq::SliceRandom;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod chain;
pub mod client;
pub mod constants;
pub mod maintainer;
pub mod pending;
pub mod snapshot;

pub use chain::{ChainError, ChainState, ChainStore};
pub use client::{ChainClient, ClientError, GenesisParams, VerificationPolicy};
pub use maintainer::{
    CycleReport, DrainPolicy, Maintainer, MaintainerConfig, MaintainerError, MaintainerState,
};
pub use pending::PendingBuffer;
pub use snapshot::{MemorySnapshotStore, SnapshotStore};

use constants::{HASH_HEX_SIZE, HASH_SIZE};

pub type Hash = [u8; HASH_SIZE];

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn sha256(bytes: &[u8]) -> Hash {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&digest[..]);
    out
}

/// Content hash identifying a block. Hex-encoded wherever it is serialized.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockId(pub Hash);

impl BlockId {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", &self.to_hex()[..12])
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BlockIdError {
    #[error("block id must be 64 hex characters, got {0}")]
    Length(usize),
    #[error("block id is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl FromStr for BlockId {
    type Err = BlockIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HASH_HEX_SIZE {
            return Err(BlockIdError::Length(s.len()));
        }
        let mut out = [0u8; HASH_SIZE];
        hex::decode_to_slice(s, &mut out)?;
        Ok(BlockId(out))
    }
}

impl Serialize for BlockId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlockId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One archived web resource awaiting (or holding) its place in a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub url: String,
    pub content_type: String,
    /// Opaque page payload, typically base64 of the captured body.
    pub page: String,
    #[serde(default)]
    pub additional_urls: Vec<String>,
    pub timestamp: u64,
}

impl Record {
    pub fn new(
        url: impl Into<String>,
        content_type: impl Into<String>,
        page: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            content_type: content_type.into(),
            page: page.into(),
            additional_urls: Vec::new(),
            timestamp: now_secs(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub address: String,
}

impl Participant {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

/// The set of nodes that extend and verify a chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    pub participants: Vec<Participant>,
}

impl Roster {
    pub fn new(participants: Vec<Participant>) -> Self {
        Self { participants }
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.participants.iter().any(|p| p.id == id)
    }

    pub fn random_participant(&self) -> Option<&Participant> {
        self.participants.choose(&mut rand::thread_rng())
    }

    fn digest(&self) -> Hash {
        let mut hasher = Sha256::new();
        for p in &self.participants {
            hasher.update(p.id.as_bytes());
            hasher.update([0u8]);
        }
        let digest = hasher.finalize();
        let mut out = [0u8; HASH_SIZE];
        out.copy_from_slice(&digest[..]);
        out
    }
}

/// How a record query picks what to return.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum RecordSelector {
    Url { url: String },
    TimeRange { from: u64, to: u64 },
    Block { id: BlockId },
}

impl fmt::Display for RecordSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordSelector::Url { url } => write!(f, "url {url}"),
            RecordSelector::TimeRange { from, to } => write!(f, "time range {from}..{to}"),
            RecordSelector::Block { id } => write!(f, "block {id}"),
        }
    }
}

/// A block of the external hash-chain. `back_link` is `None` only for genesis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBlock {
    pub id: BlockId,
    pub index: u64,
    pub back_link: Option<BlockId>,
    pub roster: Roster,
    pub records: Vec<Record>,
    pub timestamp: u64,
    /// Creation sequence assigned by the consensus service. Separates chains
    /// whose genesis blocks share a roster and a timestamp; zero past genesis.
    pub seq: u64,
}

impl ChainBlock {
    /// Builds a genesis block and derives its id.
    pub fn genesis(roster: Roster, records: Vec<Record>, timestamp: u64, seq: u64) -> Self {
        let id = block_id(0, None, &roster, &records, timestamp, seq);
        Self {
            id,
            index: 0,
            back_link: None,
            roster,
            records,
            timestamp,
            seq,
        }
    }

    /// Builds the block that follows `parent` and derives its id.
    pub fn child(parent: &ChainBlock, roster: Roster, records: Vec<Record>, timestamp: u64) -> Self {
        let index = parent.index + 1;
        let back_link = Some(parent.id);
        let id = block_id(index, back_link, &roster, &records, timestamp, 0);
        Self {
            id,
            index,
            back_link,
            roster,
            records,
            timestamp,
            seq: 0,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.back_link.is_none()
    }

    pub fn follows(&self, parent: &ChainBlock) -> bool {
        self.back_link == Some(parent.id)
    }
}

/// Header layout: index | back link (zeros for genesis) | merkle root | roster digest | timestamp | seq.
pub fn block_id(
    index: u64,
    back_link: Option<BlockId>,
    roster: &Roster,
    records: &[Record],
    timestamp: u64,
    seq: u64,
) -> BlockId {
    let mut bytes = Vec::with_capacity(8 + 32 + 32 + 32 + 8 + 8);
    bytes.extend_from_slice(&index.to_le_bytes());
    bytes.extend_from_slice(&back_link.unwrap_or_default().0);
    bytes.extend_from_slice(&merkle_root(records));
    bytes.extend_from_slice(&roster.digest());
    bytes.extend_from_slice(&timestamp.to_le_bytes());
    bytes.extend_from_slice(&seq.to_le_bytes());
    BlockId(sha256(&bytes))
}

pub fn merkle_root(records: &[Record]) -> Hash {
    if records.is_empty() {
        return [0u8; HASH_SIZE];
    }
    let mut level: Vec<Hash> = records
        .iter()
        .map(|r| sha256(&serde_json::to_vec(r).unwrap_or_default()))
        .collect();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let (a, b) = if pair.len() == 2 {
                (pair[0], pair[1])
            } else {
                (pair[0], pair[0])
            };
            let mut hasher = Sha256::new();
            hasher.update(a);
            hasher.update(b);
            let digest = hasher.finalize();
            let mut out = [0u8; HASH_SIZE];
            out.copy_from_slice(&digest[..]);
            next.push(out);
        }
        level = next;
    }
    level[0]
}
