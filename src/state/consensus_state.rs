/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The authoritative consensus state: the block tree, the current canonical path through it, and the
//! sets that the canonical path produces.
//!
//! # Fork choice
//!
//! The canonical chain is the chain with the greatest cumulative [weight](crate::types::data_types::BlockWeight).
//! When two chains have the same cumulative weight, the one seen first stays canonical. A block whose
//! arrival does not make its chain strictly heavier than the canonical chain is recorded in the block
//! map, but does not change the sets, and [`accept_block`](ConsensusState::accept_block) returns
//! [`AcceptBlockError::NonExtending`].
//!
//! # Reorgs
//!
//! When a block makes a side branch the heaviest, the state:
//! 1. Walks back from the new block to the fork point, the most recent block that is on both branches.
//! 2. Reverts the recorded diff of every canonical block above the fork point, tip first, collecting those
//!    diffs into [`ConsensusChange::inverted_blocks`].
//! 3. Applies every block of the new branch above the fork point, lowest first, collecting their diffs
//!    into [`ConsensusChange::applied_blocks`]. A block that has been applied before reuses its recorded
//!    diff; otherwise its diff is generated.
//!
//! A plain extension of the canonical chain is the special case where the fork point is the current tip.
//!
//! # Fatal faults
//!
//! If any diff fails to commit, every diff committed while handling the block is rolled back, the faulty
//! block (and its descendants) are forgotten, and the state halts: every later call to `accept_block`
//! returns [`AcceptBlockError::Halted`].

use std::fmt::{self, Display, Formatter};

use crate::types::block::Block;
use crate::types::data_types::{BlockHeight, BlockID, BlockWeight};
use crate::types::diffs::{BlockDiff, ConsensusChange, DiffDirection};

use super::block_map::{BlockMap, BlockNode};
use super::diff_generation::generate_and_apply_block_diff;
use super::sets::{ConsensusSets, ConsistencyError};

pub(crate) struct ConsensusState {
    sets: ConsensusSets,
    block_map: BlockMap,
    /// IDs of the blocks on the canonical chain. `current_path[h]` is the canonical block at height `h`.
    current_path: Vec<BlockID>,
    halted: bool,
}

/// Lifecycle and block acceptance.
impl ConsensusState {
    /// Create a state whose canonical chain consists only of `genesis`.
    pub(crate) fn new(genesis: Block) -> Result<ConsensusState, ConsistencyError> {
        let mut sets = ConsensusSets::new();
        let genesis_diff = generate_and_apply_block_diff(&mut sets, &genesis, BlockHeight::genesis())?;
        let genesis_id = genesis.id();

        Ok(ConsensusState {
            sets,
            block_map: BlockMap::new(genesis, genesis_diff),
            current_path: vec![genesis_id],
            halted: false,
        })
    }

    /// Record `block` and, if it makes its chain the heaviest, move the canonical chain onto it.
    ///
    /// Returns the [`ConsensusChange`] describing the move. By the time this returns `Ok`, the change has
    /// been fully committed to the sets.
    pub(crate) fn accept_block(&mut self, block: Block) -> Result<ConsensusChange, AcceptBlockError> {
        if self.halted {
            return Err(AcceptBlockError::Halted);
        }

        let block_id = block.id();
        if self.block_map.contains(&block_id) {
            return Err(AcceptBlockError::BlockKnown { block: block_id });
        }

        let parent = block.parent;
        self.block_map
            .insert_child(block)
            .ok_or(AcceptBlockError::UnknownParent { block: block_id, parent })?;

        let new_weight = self
            .node(&block_id)
            .map(|node| node.cumulative_weight)
            .map_err(|err| self.halt(block_id, err))?;
        let current_weight = self.current_weight().map_err(|err| self.halt(block_id, err))?;
        if new_weight <= current_weight {
            return Err(AcceptBlockError::NonExtending { block: block_id });
        }

        self.fork_to(block_id)
    }

    /// Move the canonical chain so that its tip is `new_tip`.
    fn fork_to(&mut self, new_tip: BlockID) -> Result<ConsensusChange, AcceptBlockError> {
        let (fork_point, new_branch) = self.backtrack_to_canonical(new_tip).map_err(|err| self.halt(new_tip, err))?;

        let mut change = ConsensusChange::default();

        while self.current_block() != fork_point {
            let reverted = self.current_block();
            if let Err(err) = self.revert_current_block(&mut change) {
                self.restore(&change);
                return Err(self.halt(reverted, err));
            }
        }

        for block_id in new_branch {
            if let Err(err) = self.apply_block(block_id, &mut change) {
                self.restore(&change);
                self.block_map.remove_subtree(&block_id);
                return Err(self.halt(block_id, err));
            }
        }

        Ok(change)
    }

    /// Walk back from `block` until reaching a block on the canonical chain.
    ///
    /// Returns the fork point and the non-canonical blocks passed on the way, lowest first.
    fn backtrack_to_canonical(&self, block: BlockID) -> Result<(BlockID, Vec<BlockID>), ConsistencyError> {
        let mut branch = Vec::new();
        let mut cursor = block;
        loop {
            let node = self.node(&cursor)?;
            if self.is_canonical(&cursor, node.height) {
                break;
            }
            branch.push(cursor);
            cursor = node.parent();
        }
        branch.reverse();
        Ok((cursor, branch))
    }

    fn revert_current_block(&mut self, change: &mut ConsensusChange) -> Result<(), ConsistencyError> {
        let block_id = self.current_block();
        let diff = self.recorded_diff(&block_id)?.clone();
        self.sets.commit_block_diff(&diff, DiffDirection::Revert)?;
        self.current_path.pop();
        change.inverted_blocks.push(diff);
        Ok(())
    }

    fn apply_block(&mut self, block_id: BlockID, change: &mut ConsensusChange) -> Result<(), ConsistencyError> {
        let node = self
            .block_map
            .get(&block_id)
            .ok_or(ConsistencyError::BlockExpectedButNotFound { block: block_id })?;

        let diff = match &node.diff {
            Some(diff) => {
                self.sets.commit_block_diff(diff, DiffDirection::Apply)?;
                diff.clone()
            }
            None => {
                let diff = generate_and_apply_block_diff(&mut self.sets, &node.block, node.height)?;
                if let Some(node) = self.block_map.get_mut(&block_id) {
                    node.diff = Some(diff.clone());
                }
                diff
            }
        };

        self.current_path.push(block_id);
        change.applied_blocks.push(diff);
        Ok(())
    }

    /// Undo the part of `change` that has been committed so far, returning the sets and the canonical
    /// path to where they were before the change started.
    fn restore(&mut self, change: &ConsensusChange) {
        for diff in change.applied_blocks.iter().rev() {
            self.sets.rollback_block_diff(diff, DiffDirection::Apply);
            self.current_path.pop();
        }
        for diff in change.inverted_blocks.iter().rev() {
            self.sets.rollback_block_diff(diff, DiffDirection::Revert);
            self.current_path.push(diff.catalyst_block);
        }
    }

    fn halt(&mut self, block: BlockID, error: ConsistencyError) -> AcceptBlockError {
        log::error!("Halting block acceptance after block {}: {}", block, error);
        self.halted = true;
        AcceptBlockError::Fatal { block, error }
    }
}

/// State getters.
impl ConsensusState {
    pub(crate) fn sets(&self) -> &ConsensusSets {
        &self.sets
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.halted
    }

    /// Height of the canonical tip.
    pub(crate) fn height(&self) -> BlockHeight {
        BlockHeight::new(self.current_path.len() as u64 - 1)
    }

    /// ID of the canonical tip.
    pub(crate) fn current_block(&self) -> BlockID {
        // Safety: the current path always contains at least the genesis block.
        self.current_path[self.current_path.len() - 1]
    }

    pub(crate) fn genesis_block(&self) -> BlockID {
        self.current_path[0]
    }

    pub(crate) fn block_at_height(&self, height: BlockHeight) -> Option<BlockID> {
        self.current_path.get(height.int() as usize).copied()
    }

    pub(crate) fn block(&self, block: &BlockID) -> Option<&Block> {
        self.block_map.get(block).map(|node| &node.block)
    }

    pub(crate) fn block_height(&self, block: &BlockID) -> Option<BlockHeight> {
        self.block_map.get(block).map(|node| node.height)
    }

    /// The recorded forward diff of `block`, if it has ever been applied.
    pub(crate) fn block_diff(&self, block: &BlockID) -> Option<&BlockDiff> {
        self.block_map.get(block).and_then(|node| node.diff.as_ref())
    }

    /// Number of blocks known, canonical or not.
    pub(crate) fn known_blocks(&self) -> usize {
        self.block_map.len()
    }

    fn is_canonical(&self, block: &BlockID, height: BlockHeight) -> bool {
        self.block_at_height(height).as_ref() == Some(block)
    }

    fn node(&self, block: &BlockID) -> Result<&BlockNode, ConsistencyError> {
        self.block_map
            .get(block)
            .ok_or(ConsistencyError::BlockExpectedButNotFound { block: *block })
    }

    fn recorded_diff(&self, block: &BlockID) -> Result<&BlockDiff, ConsistencyError> {
        self.node(block)?
            .diff
            .as_ref()
            .ok_or(ConsistencyError::BlockExpectedButNotFound { block: *block })
    }

    fn current_weight(&self) -> Result<BlockWeight, ConsistencyError> {
        Ok(self.node(&self.current_block())?.cumulative_weight)
    }
}

/// Reasons why [`accept_block`](ConsensusState::accept_block) did not produce a [`ConsensusChange`].
///
/// Only [`Fatal`](AcceptBlockError::Fatal) and [`Halted`](AcceptBlockError::Halted) indicate a problem
/// with the consensus set itself. The other variants are ordinary outcomes of receiving blocks from an
/// unreliable network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcceptBlockError {
    /// The block's parent has not been accepted. The block was not recorded.
    UnknownParent { block: BlockID, parent: BlockID },

    /// The block has already been accepted.
    BlockKnown { block: BlockID },

    /// The block was recorded, but its chain is not heavier than the canonical chain.
    NonExtending { block: BlockID },

    /// A previous block caused a fatal fault. No further blocks are accepted.
    Halted,

    /// Committing the diffs caused by `block` violated the consistency of the sets. The sets were restored
    /// to their state before the block was accepted, and the consensus set has halted.
    Fatal { block: BlockID, error: ConsistencyError },
}

impl AcceptBlockError {
    /// Whether this error means the consensus set can no longer accept blocks.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AcceptBlockError::Fatal { .. } | AcceptBlockError::Halted)
    }
}

impl Display for AcceptBlockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AcceptBlockError::UnknownParent { block, parent } => {
                write!(f, "parent {} of block {} is unknown", parent, block)
            }
            AcceptBlockError::BlockKnown { block } => write!(f, "block {} is already known", block),
            AcceptBlockError::NonExtending { block } => {
                write!(f, "block {} does not extend the heaviest chain", block)
            }
            AcceptBlockError::Halted => write!(f, "consensus set has halted after a fatal fault"),
            AcceptBlockError::Fatal { block, error } => {
                write!(f, "fatal consistency fault while accepting block {}: {}", block, error)
            }
        }
    }
}

impl std::error::Error for AcceptBlockError {}
