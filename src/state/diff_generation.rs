/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Deriving the forward [`BlockDiff`] of a block from its transaction list and the current sets.
//!
//! Diff generation and application are interleaved: transaction `i + 1` may spend outputs created by
//! transaction `i`, so each transaction diff is committed before the next one is derived.

use crate::types::block::{Block, Transaction};
use crate::types::data_types::{BlockHeight, BlockID};
use crate::types::diffs::{BlockDiff, ContractDiff, DiffDirection, OutputDiff, TransactionDiff};

use super::sets::{ConsensusSets, ConsistencyError};

/// Derive the diff of `block` at `height`, committing it to `sets` along the way.
///
/// On error, `sets` is left exactly as it was before the call.
pub(crate) fn generate_and_apply_block_diff(
    sets: &mut ConsensusSets,
    block: &Block,
    height: BlockHeight,
) -> Result<BlockDiff, ConsistencyError> {
    let mut diff = BlockDiff::new(block.id());
    match apply_block_effects(sets, block, height, &mut diff) {
        Ok(()) => Ok(diff),
        Err(err) => {
            for transaction_diff in diff.transaction_diffs.iter().rev() {
                sets.rollback_transaction_diff(transaction_diff, DiffDirection::Apply);
            }
            Err(err)
        }
    }
}

fn apply_block_effects(
    sets: &mut ConsensusSets,
    block: &Block,
    height: BlockHeight,
    diff: &mut BlockDiff,
) -> Result<(), ConsistencyError> {
    for transaction in &block.transactions {
        let transaction_diff = transaction_diff(sets, transaction, height)?;
        sets.commit_transaction_diff(&transaction_diff, DiffDirection::Apply)?;
        diff.transaction_diffs.push(transaction_diff);
    }

    let block_changes = block_changes(sets, block, &diff.catalyst_block, height);
    sets.commit_transaction_diff(&block_changes, DiffDirection::Apply)?;
    diff.block_changes = block_changes;

    Ok(())
}

/// The diff of a single transaction against the current sets. Does not mutate `sets`.
pub(crate) fn transaction_diff(
    sets: &ConsensusSets,
    transaction: &Transaction,
    height: BlockHeight,
) -> Result<TransactionDiff, ConsistencyError> {
    let mut diff = TransactionDiff::new();

    for output_id in &transaction.spent_outputs {
        let output = sets
            .output(output_id)
            .ok_or(ConsistencyError::MissingOutput { output: *output_id })?;
        diff.output_diffs.push(OutputDiff::spent(*output_id, output.clone()));
    }

    for (i, output) in transaction.outputs.iter().enumerate() {
        diff.output_diffs
            .push(OutputDiff::created(transaction.output_id(i as u64), output.clone()));
    }

    for (i, contract) in transaction.file_contracts.iter().enumerate() {
        let contract_id = transaction.file_contract_id(i as u64);
        if contract.window_start <= height || contract.window_end <= contract.window_start {
            return Err(ConsistencyError::InvalidContractWindow { contract: contract_id, height });
        }
        diff.contract_diffs.push(ContractDiff::created(contract_id, contract.clone()));
    }

    for contract_id in &transaction.storage_proofs {
        let contract = sets
            .contract(contract_id)
            .ok_or(ConsistencyError::MissingContract { contract: *contract_id })?;
        diff.output_diffs.push(OutputDiff::created(
            contract_id.valid_proof_output_id(),
            contract.valid_proof_output(),
        ));
        diff.contract_diffs.push(ContractDiff::terminated(*contract_id, contract.clone()));
    }

    Ok(diff)
}

/// The changes caused by `block` itself: its miner payouts, and the expiry of every contract whose proof
/// window closes at `height`. Must be derived after the block's transactions have been committed, so
/// that contracts proven in this block do not also expire.
pub(crate) fn block_changes(
    sets: &ConsensusSets,
    block: &Block,
    block_id: &BlockID,
    height: BlockHeight,
) -> TransactionDiff {
    let mut diff = TransactionDiff::new();

    for (i, payout) in block.miner_payouts.iter().enumerate() {
        diff.output_diffs
            .push(OutputDiff::created(Block::miner_payout_id(block_id, i as u64), payout.clone()));
    }

    for (contract_id, contract) in sets.contracts_expiring_at(height) {
        diff.output_diffs.push(OutputDiff::created(
            contract_id.missed_proof_output_id(),
            contract.missed_proof_output(),
        ));
        diff.contract_diffs.push(ContractDiff::terminated(*contract_id, contract.clone()));
    }

    diff
}
