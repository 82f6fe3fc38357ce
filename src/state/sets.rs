/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The unspent output set and the open contract set, and the checked application of diffs to them.
//!
//! Every commit method here is atomic: either the whole diff is committed, or the sets are left exactly
//! as they were and a [`ConsistencyError`] is returned. A `ConsistencyError` means a diff referenced an
//! element that should exist but doesn't, or created an element that already exists. Since only valid
//! blocks reach the consensus set, this can only happen if the validation pipeline and the consensus set
//! disagree about the state, which the consensus set treats as fatal.

use std::collections::{BTreeMap, HashSet};
use std::fmt::{self, Display, Formatter};

use crate::types::block::{FileContract, Output};
use crate::types::data_types::{BlockHeight, BlockID, ContractID, OutputID};
use crate::types::diffs::{BlockDiff, ConsensusChange, ContractDiff, DiffDirection, OutputDiff, TransactionDiff};

/// The two sets that blocks mutate.
///
/// Both sets are ordered maps, so iteration over them (and therefore every diff derived by iterating
/// them) is deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsensusSets {
    unspent_outputs: BTreeMap<OutputID, Output>,
    open_contracts: BTreeMap<ContractID, FileContract>,
}

impl ConsensusSets {
    pub fn new() -> ConsensusSets {
        ConsensusSets::default()
    }

    pub fn output(&self, id: &OutputID) -> Option<&Output> {
        self.unspent_outputs.get(id)
    }

    pub fn contract(&self, id: &ContractID) -> Option<&FileContract> {
        self.open_contracts.get(id)
    }

    pub fn unspent_outputs(&self) -> &BTreeMap<OutputID, Output> {
        &self.unspent_outputs
    }

    pub fn open_contracts(&self) -> &BTreeMap<ContractID, FileContract> {
        &self.open_contracts
    }

    /// Open contracts whose proof window closes at `height`, in ID order.
    pub fn contracts_expiring_at(&self, height: BlockHeight) -> impl Iterator<Item = (&ContractID, &FileContract)> {
        self.open_contracts
            .iter()
            .filter(move |(_, contract)| contract.window_end == height)
    }

    /// Commit every diff in a [`ConsensusChange`]: revert `inverted_blocks` in order, then apply
    /// `applied_blocks` in order.
    ///
    /// This is what a subscriber keeping its own copy of the sets does with each change it receives. If
    /// any block diff fails, the blocks committed so far by this call are rolled back before returning.
    pub fn commit_consensus_change(&mut self, change: &ConsensusChange) -> Result<(), ConsistencyError> {
        let steps = change
            .inverted_blocks
            .iter()
            .map(|diff| (diff, DiffDirection::Revert))
            .chain(change.applied_blocks.iter().map(|diff| (diff, DiffDirection::Apply)));

        let mut committed: Vec<(&BlockDiff, DiffDirection)> = Vec::new();
        for (diff, direction) in steps {
            if let Err(err) = self.commit_block_diff(diff, direction) {
                for (diff, direction) in committed.into_iter().rev() {
                    self.rollback_block_diff(diff, direction);
                }
                return Err(err);
            }
            committed.push((diff, direction));
        }
        Ok(())
    }

    /// Commit a block diff in `direction`, following the ordering described in [`crate::types::diffs`].
    pub fn commit_block_diff(&mut self, diff: &BlockDiff, direction: DiffDirection) -> Result<(), ConsistencyError> {
        let ordered = diff.ordered(direction);
        for (i, transaction_diff) in ordered.iter().enumerate() {
            if let Err(err) = self.commit_transaction_diff(transaction_diff, DiffDirection::Apply) {
                for committed in ordered[..i].iter().rev() {
                    self.rollback_transaction_diff(committed, DiffDirection::Apply);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Commit a single transaction diff in `direction`.
    ///
    /// The whole diff is checked against the current sets before anything is mutated, so the elements
    /// can then be committed in any order.
    pub fn commit_transaction_diff(
        &mut self,
        diff: &TransactionDiff,
        direction: DiffDirection,
    ) -> Result<(), ConsistencyError> {
        self.check_transaction_diff(diff, direction)?;

        for output_diff in &diff.output_diffs {
            self.commit_output_diff_unchecked(output_diff, direction);
        }
        for contract_diff in &diff.contract_diffs {
            self.commit_contract_diff_unchecked(contract_diff, direction);
        }
        Ok(())
    }

    /// Commit a single output diff in `direction`.
    pub fn commit_output_diff(&mut self, diff: &OutputDiff, direction: DiffDirection) -> Result<(), ConsistencyError> {
        self.check_output_diff(diff, direction)?;
        self.commit_output_diff_unchecked(diff, direction);
        Ok(())
    }

    /// Commit a single contract diff in `direction`.
    pub fn commit_contract_diff(
        &mut self,
        diff: &ContractDiff,
        direction: DiffDirection,
    ) -> Result<(), ConsistencyError> {
        self.check_contract_diff(diff, direction)?;
        self.commit_contract_diff_unchecked(diff, direction);
        Ok(())
    }

    fn check_transaction_diff(&self, diff: &TransactionDiff, direction: DiffDirection) -> Result<(), ConsistencyError> {
        // Elements of one transaction diff are independent, so no id may appear twice in it.
        let mut touched_outputs = HashSet::new();
        for output_diff in &diff.output_diffs {
            if !touched_outputs.insert(output_diff.id) {
                return Err(ConsistencyError::RepeatedOutput { output: output_diff.id });
            }
            self.check_output_diff(output_diff, direction)?;
        }

        let mut touched_contracts = HashSet::new();
        for contract_diff in &diff.contract_diffs {
            if !touched_contracts.insert(contract_diff.contract_id) {
                return Err(ConsistencyError::RepeatedContract { contract: contract_diff.contract_id });
            }
            self.check_contract_diff(contract_diff, direction)?;
        }

        Ok(())
    }

    fn check_output_diff(&self, diff: &OutputDiff, direction: DiffDirection) -> Result<(), ConsistencyError> {
        let exists = self.unspent_outputs.contains_key(&diff.id);
        if direction.inserts(diff.new) && exists {
            Err(ConsistencyError::DuplicateOutput { output: diff.id })
        } else if !direction.inserts(diff.new) && !exists {
            Err(ConsistencyError::MissingOutput { output: diff.id })
        } else {
            Ok(())
        }
    }

    fn check_contract_diff(&self, diff: &ContractDiff, direction: DiffDirection) -> Result<(), ConsistencyError> {
        let exists = self.open_contracts.contains_key(&diff.contract_id);
        if direction.inserts(diff.new) && exists {
            Err(ConsistencyError::DuplicateContract { contract: diff.contract_id })
        } else if !direction.inserts(diff.new) && !exists {
            Err(ConsistencyError::MissingContract { contract: diff.contract_id })
        } else {
            Ok(())
        }
    }

    fn commit_output_diff_unchecked(&mut self, diff: &OutputDiff, direction: DiffDirection) {
        if direction.inserts(diff.new) {
            self.unspent_outputs.insert(diff.id, diff.output.clone());
        } else {
            self.unspent_outputs.remove(&diff.id);
        }
    }

    fn commit_contract_diff_unchecked(&mut self, diff: &ContractDiff, direction: DiffDirection) {
        if direction.inserts(diff.new) {
            self.open_contracts.insert(diff.contract_id, diff.contract.clone());
        } else {
            self.open_contracts.remove(&diff.contract_id);
        }
    }

    /// Undo a transaction diff that was just committed in `direction`.
    pub(crate) fn rollback_transaction_diff(&mut self, diff: &TransactionDiff, direction: DiffDirection) {
        let opposite = opposite(direction);
        for output_diff in &diff.output_diffs {
            self.commit_output_diff_unchecked(output_diff, opposite);
        }
        for contract_diff in &diff.contract_diffs {
            self.commit_contract_diff_unchecked(contract_diff, opposite);
        }
    }

    /// Undo a block diff that was just committed in `direction`.
    pub(crate) fn rollback_block_diff(&mut self, diff: &BlockDiff, direction: DiffDirection) {
        if let Err(err) = self.commit_block_diff(diff, opposite(direction)) {
            log::error!("Failed to roll back block {}: {}", diff.catalyst_block, err);
        }
    }
}

fn opposite(direction: DiffDirection) -> DiffDirection {
    match direction {
        DiffDirection::Apply => DiffDirection::Revert,
        DiffDirection::Revert => DiffDirection::Apply,
    }
}

/// Internal consistency faults. Each of these means an invalid block reached the consensus set, or the
/// consensus set's records have been corrupted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsistencyError {
    /// A diff removes an output that is not in the unspent output set.
    MissingOutput { output: OutputID },

    /// A diff creates an output that is already in the unspent output set.
    DuplicateOutput { output: OutputID },

    /// A diff removes a contract that is not in the open contract set.
    MissingContract { contract: ContractID },

    /// A diff creates a contract that is already in the open contract set.
    DuplicateContract { contract: ContractID },

    /// The same output appears twice in a single transaction diff.
    RepeatedOutput { output: OutputID },

    /// The same contract appears twice in a single transaction diff.
    RepeatedContract { contract: ContractID },

    /// A contract's proof window is empty or has already opened at the height it is created.
    InvalidContractWindow { contract: ContractID, height: BlockHeight },

    /// A block the consensus set's records say should exist could not be found.
    BlockExpectedButNotFound { block: BlockID },
}

impl Display for ConsistencyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyError::MissingOutput { output } => write!(f, "output {} is not in the unspent output set", output),
            ConsistencyError::DuplicateOutput { output } => write!(f, "output {} is already in the unspent output set", output),
            ConsistencyError::MissingContract { contract } => write!(f, "contract {} is not in the open contract set", contract),
            ConsistencyError::DuplicateContract { contract } => write!(f, "contract {} is already in the open contract set", contract),
            ConsistencyError::RepeatedOutput { output } => write!(f, "output {} appears twice in one transaction diff", output),
            ConsistencyError::RepeatedContract { contract } => write!(f, "contract {} appears twice in one transaction diff", contract),
            ConsistencyError::InvalidContractWindow { contract, height } => {
                write!(f, "contract {} has an invalid proof window at height {}", contract, height)
            }
            ConsistencyError::BlockExpectedButNotFound { block } => write!(f, "block {} expected but not found", block),
        }
    }
}

impl std::error::Error for ConsistencyError {}
