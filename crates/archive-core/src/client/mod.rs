//! The narrow interface to the external consensus service.
//!
//! Every call is a network round-trip that can fail. The maintainer treats
//! failures as transient, except genesis creation which is surfaced to the
//! caller of `bootstrap`.

use crate::constants::{DEFAULT_ACK_COUNT, DEFAULT_CONSENSUS_COUNT};
use crate::{BlockId, ChainBlock, Participant, Record, Roster};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod memory;

pub use memory::InMemoryChainClient;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationPolicy {
    None,
    #[default]
    Standard,
    Strict,
}

impl FromStr for VerificationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(VerificationPolicy::None),
            "standard" => Ok(VerificationPolicy::Standard),
            "strict" => Ok(VerificationPolicy::Strict),
            other => Err(format!(
                "unknown verification policy `{other}` (expected `none`, `standard` or `strict`)"
            )),
        }
    }
}

impl fmt::Display for VerificationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationPolicy::None => f.write_str("none"),
            VerificationPolicy::Standard => f.write_str("standard"),
            VerificationPolicy::Strict => f.write_str("strict"),
        }
    }
}

/// Parameters for a new chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisParams {
    /// Participants that must acknowledge a block.
    pub ack_count: u32,
    /// Participants that must agree before a block is final.
    pub consensus_count: u32,
    pub verification: VerificationPolicy,
}

impl Default for GenesisParams {
    fn default() -> Self {
        Self {
            ack_count: DEFAULT_ACK_COUNT,
            consensus_count: DEFAULT_CONSENSUS_COUNT,
            verification: VerificationPolicy::Standard,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("consensus service unreachable: {0}")]
    Unreachable(String),
    #[error("consensus service rejected the request: {0}")]
    Rejected(String),
    #[error("unknown block {0}")]
    UnknownBlock(BlockId),
    #[error("parent {0} is no longer the chain tip")]
    StaleParent(BlockId),
    #[error("malformed response from consensus service: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn create_genesis(
        &self,
        roster: &Roster,
        params: GenesisParams,
        initial_records: &[Record],
    ) -> Result<ChainBlock, ClientError>;

    /// Returns `since` re-confirmed, followed by every block after it.
    async fn fetch_updates(
        &self,
        roster: &Roster,
        since: BlockId,
    ) -> Result<Vec<ChainBlock>, ClientError>;

    /// Extends the chain after `parent` and returns the new latest block.
    async fn store_block(
        &self,
        parent: &ChainBlock,
        roster: &Roster,
        records: &[Record],
    ) -> Result<ChainBlock, ClientError>;

    /// Genesis blocks of every chain `participant` knows about.
    async fn list_chains(&self, participant: &Participant)
        -> Result<Vec<ChainBlock>, ClientError>;
}
