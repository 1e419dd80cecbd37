use crate::{BlockId, ChainBlock};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("update list is empty")]
    EmptyUpdate,
    #[error("block {block} at position {position} does not link to its predecessor")]
    Discontiguous { position: usize, block: BlockId },
    #[error("latest pointer {given} does not match last block {last}")]
    LatestMismatch { given: BlockId, last: BlockId },
    #[error("block {0} is not a genesis block")]
    NotGenesis(BlockId),
    #[error("chain has no blocks")]
    Empty,
}

/// The locally known chain segment and its latest pointer. This is also the
/// persisted snapshot image.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    pub latest: Option<BlockId>,
    pub segment: Vec<ChainBlock>,
}

impl ChainState {
    pub fn height(&self) -> usize {
        self.segment.len()
    }

    pub fn genesis(&self) -> Option<&ChainBlock> {
        self.segment.first()
    }

    /// Checks the segment starts at genesis, every block links to the one
    /// before it, and `latest` names the last block.
    pub fn validate(&self) -> Result<(), ChainError> {
        check_links(None, &self.segment, 0)?;
        match (self.latest, self.segment.last()) {
            (None, None) => Ok(()),
            (Some(given), Some(last)) if given == last.id => Ok(()),
            (Some(given), Some(last)) => Err(ChainError::LatestMismatch {
                given,
                last: last.id,
            }),
            (Some(_), None) => Err(ChainError::Empty),
            (None, Some(last)) => Err(ChainError::LatestMismatch {
                given: BlockId::default(),
                last: last.id,
            }),
        }
    }
}

fn check_links<'a>(
    mut prev: Option<&'a ChainBlock>,
    blocks: &'a [ChainBlock],
    offset: usize,
) -> Result<(), ChainError> {
    for (i, block) in blocks.iter().enumerate() {
        let linked = match prev {
            Some(p) => block.follows(p),
            None => block.is_genesis(),
        };
        if !linked {
            return Err(ChainError::Discontiguous {
                position: offset + i,
                block: block.id,
            });
        }
        prev = Some(block);
    }
    Ok(())
}

/// Thread-safe holder of the chain segment. Every operation takes the lock
/// for its whole duration and either applies fully or not at all.
#[derive(Debug, Default)]
pub struct ChainStore {
    inner: Mutex<ChainState>,
}

impl ChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: ChainState) -> Result<Self, ChainError> {
        state.validate()?;
        Ok(Self {
            inner: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn read(&self) -> ChainState {
        self.lock().clone()
    }

    pub fn latest(&self) -> Option<BlockId> {
        self.lock().latest
    }

    pub fn latest_block(&self) -> Option<ChainBlock> {
        self.lock().segment.last().cloned()
    }

    pub fn genesis_id(&self) -> Option<BlockId> {
        self.lock().segment.first().map(|b| b.id)
    }

    pub fn len(&self) -> usize {
        self.lock().segment.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().segment.is_empty()
    }

    /// Replaces the whole state, e.g. with a loaded snapshot.
    pub fn restore(&self, state: ChainState) -> Result<(), ChainError> {
        state.validate()?;
        *self.lock() = state;
        Ok(())
    }

    /// Starts over from a freshly created genesis block.
    pub fn reset_to_genesis(&self, genesis: ChainBlock) -> Result<(), ChainError> {
        if !genesis.is_genesis() {
            return Err(ChainError::NotGenesis(genesis.id));
        }
        let mut state = self.lock();
        state.latest = Some(genesis.id);
        state.segment = vec![genesis];
        Ok(())
    }

    /// Installs `genesis` only when nothing is known yet. Returns whether it
    /// was installed.
    pub fn seed_genesis(&self, genesis: ChainBlock) -> Result<bool, ChainError> {
        if !genesis.is_genesis() {
            return Err(ChainError::NotGenesis(genesis.id));
        }
        let mut state = self.lock();
        if !state.segment.is_empty() {
            return Ok(false);
        }
        state.latest = Some(genesis.id);
        state.segment.push(genesis);
        Ok(true)
    }

    /// Merges a fetched update list. The list re-confirms our last block
    /// first, so it replaces the tail instead of being appended after it.
    pub fn append_updates(&self, blocks: Vec<ChainBlock>) -> Result<(), ChainError> {
        let new_latest = blocks.last().map(|b| b.id).ok_or(ChainError::EmptyUpdate)?;
        self.replace_tail_and_advance(blocks, new_latest)
    }

    pub fn replace_tail_and_advance(
        &self,
        blocks: Vec<ChainBlock>,
        new_latest: BlockId,
    ) -> Result<(), ChainError> {
        let last = blocks.last().ok_or(ChainError::EmptyUpdate)?;
        if last.id != new_latest {
            return Err(ChainError::LatestMismatch {
                given: new_latest,
                last: last.id,
            });
        }

        let mut state = self.lock();
        let keep = state.segment.len().saturating_sub(1);
        check_links(state.segment[..keep].last(), &blocks, keep)?;

        state.segment.truncate(keep);
        state.segment.extend(blocks);
        state.latest = Some(new_latest);
        Ok(())
    }

    /// Appends a newly sealed block that must extend the current tail.
    pub fn advance(&self, block: ChainBlock) -> Result<(), ChainError> {
        let mut state = self.lock();
        let tail = state.segment.last().ok_or(ChainError::Empty)?;
        if !block.follows(tail) {
            return Err(ChainError::Discontiguous {
                position: state.segment.len(),
                block: block.id,
            });
        }
        state.latest = Some(block.id);
        state.segment.push(block);
        Ok(())
    }
}
