/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'block' type, the transactions it carries, and the outputs and file contracts
//! those transactions create.
//!
//! Blocks reach this crate already validated. Nothing here checks signatures, proofs of work, or fees;
//! this module only defines the shapes and how identifiers are derived from them.
//!
//! ## Identifier derivation
//!
//! Every identifier is the SHA256 hash of the borsh serialization of a tuple:
//!
//! |Identifier|Preimage|
//! |---|---|
//! |[`BlockID`]|the whole [`Block`]|
//! |[`TransactionID`]|the whole [`Transaction`]|
//! |Output `i` of a transaction|`("transaction output", transaction_id, i)`|
//! |Contract `i` of a transaction|`("file contract", transaction_id, i)`|
//! |Miner payout `i` of a block|`("miner payout", block_id, i)`|
//! |Output paid out by a storage proof|`("storage proof valid", contract_id)`|
//! |Output paid out by a missed proof|`("storage proof missed", contract_id)`|
//!
//! Because the identifiers of everything a transaction creates depend on the transaction's own ID, a
//! transaction cannot spend an output that it creates.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::data_types::*;

const TRANSACTION_OUTPUT_SPECIFIER: &str = "transaction output";
const FILE_CONTRACT_SPECIFIER: &str = "file contract";
const MINER_PAYOUT_SPECIFIER: &str = "miner payout";
const STORAGE_PROOF_VALID_SPECIFIER: &str = "storage proof valid";
const STORAGE_PROOF_MISSED_SPECIFIER: &str = "storage proof missed";

/// A unit of value: an amount and the hash of the conditions required to spend it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct Output {
    pub value: Currency,
    pub unlock_hash: UnlockHash,
}

impl Output {
    pub fn new(value: Currency, unlock_hash: UnlockHash) -> Output {
        Output { value, unlock_hash }
    }
}

/// An agreement to store a file between `window_start` and `window_end`.
///
/// If a storage proof for the contract is submitted before the window closes, `payout` goes to
/// `valid_proof_unlock_hash`. Otherwise, when the chain reaches `window_end`, the contract expires and
/// `payout` goes to `missed_proof_unlock_hash`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct FileContract {
    pub file_size: u64,
    pub file_merkle_root: CryptoHash,
    pub window_start: BlockHeight,
    pub window_end: BlockHeight,
    pub payout: Currency,
    pub valid_proof_unlock_hash: UnlockHash,
    pub missed_proof_unlock_hash: UnlockHash,
}

impl FileContract {
    /// The output created when a storage proof for this contract is accepted.
    pub fn valid_proof_output(&self) -> Output {
        Output::new(self.payout, self.valid_proof_unlock_hash)
    }

    /// The output created when this contract expires without a storage proof.
    pub fn missed_proof_output(&self) -> Output {
        Output::new(self.payout, self.missed_proof_unlock_hash)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Transaction {
    /// Outputs consumed by this transaction. Each must be in the unspent output set.
    pub spent_outputs: Vec<OutputID>,
    /// Outputs created by this transaction.
    pub outputs: Vec<Output>,
    /// File contracts opened by this transaction.
    pub file_contracts: Vec<FileContract>,
    /// Open file contracts that this transaction submits a storage proof for.
    pub storage_proofs: Vec<ContractID>,
    pub arbitrary_data: Vec<Vec<u8>>,
}

impl Transaction {
    pub fn id(&self) -> TransactionID {
        TransactionID::new(CryptoHash::of(self))
    }

    /// The ID of the `index`-th output created by this transaction.
    pub fn output_id(&self, index: u64) -> OutputID {
        OutputID::new(CryptoHash::of(&(TRANSACTION_OUTPUT_SPECIFIER, self.id(), index)))
    }

    /// The ID of the `index`-th file contract opened by this transaction.
    pub fn file_contract_id(&self, index: u64) -> ContractID {
        ContractID::new(CryptoHash::of(&(FILE_CONTRACT_SPECIFIER, self.id(), index)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub parent: BlockID,
    /// Work contributed by this block, decided by the external validity oracle.
    pub weight: BlockWeight,
    pub timestamp: u64,
    /// Subsidy and fee outputs paid to the producer of this block.
    pub miner_payouts: Vec<Output>,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create a block with no transactions and no payouts on top of `parent`.
    pub fn empty(parent: BlockID, weight: BlockWeight, timestamp: u64) -> Block {
        Block {
            parent,
            weight,
            timestamp,
            miner_payouts: Vec::new(),
            transactions: Vec::new(),
        }
    }

    pub fn id(&self) -> BlockID {
        BlockID::new(CryptoHash::of(self))
    }

    /// The ID of the output created by the `index`-th miner payout of the block identified by `block`.
    pub fn miner_payout_id(block: &BlockID, index: u64) -> OutputID {
        OutputID::new(CryptoHash::of(&(MINER_PAYOUT_SPECIFIER, *block, index)))
    }
}

impl ContractID {
    /// The ID of the output created when a storage proof for this contract is accepted.
    pub fn valid_proof_output_id(&self) -> OutputID {
        OutputID::new(CryptoHash::of(&(STORAGE_PROOF_VALID_SPECIFIER, *self)))
    }

    /// The ID of the output created when this contract expires without a storage proof.
    pub fn missed_proof_output_id(&self) -> OutputID {
        OutputID::new(CryptoHash::of(&(STORAGE_PROOF_MISSED_SPECIFIER, *self)))
    }
}
