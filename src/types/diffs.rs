/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The diff model: how applying or reverting blocks mutates the unspent output set and the open
//! contract set.
//!
//! A [`BlockDiff`] is bi-directional. Committing it in [`DiffDirection::Apply`] transforms a state `A`
//! into a state `B`, and committing the same diff in [`DiffDirection::Revert`] transforms `B` back into
//! exactly `A`. Reverting swaps `new` on every contained [`OutputDiff`] and [`ContractDiff`] and reverses
//! every ordering:
//!
//! |Direction|Order|
//! |---|---|
//! |Apply|`transaction_diffs[0..n]`, then `block_changes`|
//! |Revert|`block_changes`, then `transaction_diffs[n..0]`|
//!
//! The elements of a single [`TransactionDiff`] have no inter-dependencies, so they can be committed in
//! any order with the same outcome. The transaction diffs of a block, however, must be committed in
//! order, since transactions in a block may spend each other's outputs.
//!
//! All diff types are immutable value objects once published. The notifier hands them to subscribers
//! behind an [`Arc`](std::sync::Arc).

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::block::{FileContract, Output};
use crate::types::data_types::{BlockID, ContractID, OutputID};

/// Which way a diff is being committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffDirection {
    Apply,
    Revert,
}

impl DiffDirection {
    /// Whether an element with `new` set should be inserted (`true`) or removed (`false`) when committed
    /// in this direction.
    pub(crate) fn inserts(self, new: bool) -> bool {
        match self {
            DiffDirection::Apply => new,
            DiffDirection::Revert => !new,
        }
    }
}

/// An output that was either added to (`new == true`) or removed from (`new == false`) the unspent output
/// set when the block containing it was applied.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct OutputDiff {
    pub new: bool,
    pub id: OutputID,
    pub output: Output,
}

impl OutputDiff {
    pub fn created(id: OutputID, output: Output) -> OutputDiff {
        OutputDiff { new: true, id, output }
    }

    pub fn spent(id: OutputID, output: Output) -> OutputDiff {
        OutputDiff { new: false, id, output }
    }

    pub fn inverse(&self) -> OutputDiff {
        OutputDiff {
            new: !self.new,
            ..self.clone()
        }
    }
}

/// The open contract set analogue of [`OutputDiff`].
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ContractDiff {
    pub new: bool,
    pub contract_id: ContractID,
    pub contract: FileContract,
}

impl ContractDiff {
    pub fn created(contract_id: ContractID, contract: FileContract) -> ContractDiff {
        ContractDiff { new: true, contract_id, contract }
    }

    pub fn terminated(contract_id: ContractID, contract: FileContract) -> ContractDiff {
        ContractDiff { new: false, contract_id, contract }
    }

    pub fn inverse(&self) -> ContractDiff {
        ContractDiff {
            new: !self.new,
            ..self.clone()
        }
    }
}

/// The diff produced by one transaction, or by the effects of a block itself (subsidies and contract
/// maintenance).
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TransactionDiff {
    pub output_diffs: Vec<OutputDiff>,
    pub contract_diffs: Vec<ContractDiff>,
}

impl TransactionDiff {
    pub fn new() -> TransactionDiff {
        TransactionDiff::default()
    }

    pub fn is_empty(&self) -> bool {
        self.output_diffs.is_empty() && self.contract_diffs.is_empty()
    }

    /// The diff that undoes this one: every element flipped, every ordering reversed.
    ///
    /// `inverse` is its own inverse: `diff.inverse().inverse() == diff`.
    pub fn inverse(&self) -> TransactionDiff {
        TransactionDiff {
            output_diffs: self.output_diffs.iter().rev().map(OutputDiff::inverse).collect(),
            contract_diffs: self.contract_diffs.iter().rev().map(ContractDiff::inverse).collect(),
        }
    }
}

/// The full effect of one block transition.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockDiff {
    /// The block that these diffs were derived from.
    pub catalyst_block: BlockID,
    /// One diff per transaction, in block order.
    pub transaction_diffs: Vec<TransactionDiff>,
    /// Changes specific to the block being in place: miner payouts and contract maintenance.
    pub block_changes: TransactionDiff,
}

impl BlockDiff {
    pub fn new(catalyst_block: BlockID) -> BlockDiff {
        BlockDiff {
            catalyst_block,
            transaction_diffs: Vec::new(),
            block_changes: TransactionDiff::new(),
        }
    }

    /// The transaction diffs of this block in the order they must be committed in `direction`, each
    /// already inverted when reverting.
    pub fn ordered(&self, direction: DiffDirection) -> Vec<TransactionDiff> {
        match direction {
            DiffDirection::Apply => self
                .transaction_diffs
                .iter()
                .chain(std::iter::once(&self.block_changes))
                .cloned()
                .collect(),
            DiffDirection::Revert => std::iter::once(&self.block_changes)
                .chain(self.transaction_diffs.iter().rev())
                .map(TransactionDiff::inverse)
                .collect(),
        }
    }
}

/// A change of the canonical chain, as delivered to subscribers.
///
/// Replaying a `ConsensusChange` against the state it was produced from means reverting every diff in
/// `inverted_blocks`, in the order given, then applying every diff in `applied_blocks`, in the order
/// given.
///
/// `inverted_blocks` holds the forward diffs recorded for the blocks that left the canonical chain,
/// ordered from the old tip down to (but excluding) the fork point, so the most recently applied block is
/// reverted first. `applied_blocks` holds the forward diffs of the blocks that joined the canonical chain,
/// ordered from just above the fork point up to the new tip.
///
/// If both lists are non-empty the change is a reorg. If only `applied_blocks` is non-empty, the change
/// is a plain extension of the chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ConsensusChange {
    pub inverted_blocks: Vec<BlockDiff>,
    pub applied_blocks: Vec<BlockDiff>,
}

impl ConsensusChange {
    pub fn is_reorg(&self) -> bool {
        !self.inverted_blocks.is_empty()
    }

    /// The new canonical tip, if this change applied any block.
    pub fn new_tip(&self) -> Option<BlockID> {
        self.applied_blocks.last().map(|diff| diff.catalyst_block)
    }

    pub fn inverted_block_ids(&self) -> Vec<BlockID> {
        self.inverted_blocks.iter().map(|diff| diff.catalyst_block).collect()
    }

    pub fn applied_block_ids(&self) -> Vec<BlockID> {
        self.applied_blocks.iter().map(|diff| diff.catalyst_block).collect()
    }
}
