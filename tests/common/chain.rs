//! Deterministic generation of valid blocks, and the sets that chains of them are expected to produce.
//!
//! The expected sets are derived here from the blocks alone, without asking the consensus set, so tests
//! can compare what the consensus set committed against a recomputation from genesis.

use std::collections::HashMap;

use consensus_diffs::state::ConsensusSets;
use consensus_diffs::types::{
    block::{Block, FileContract, Output, Transaction},
    data_types::{BlockHeight, BlockID, BlockWeight, ContractID, CryptoHash, Currency, OutputID, UnlockHash},
    diffs::{ContractDiff, DiffDirection, OutputDiff, TransactionDiff},
};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

pub(crate) fn unlock_hash(owner: u8) -> UnlockHash {
    UnlockHash::new(CryptoHash::new([owner; 32]))
}

pub(crate) fn output(value: u128, owner: u8) -> Output {
    Output::new(Currency::new(value), unlock_hash(owner))
}

/// A genesis block paying out four outputs, so that the first blocks have something to spend.
pub(crate) fn genesis_block() -> Block {
    Block {
        parent: BlockID::default(),
        weight: BlockWeight::new(1),
        timestamp: 0,
        miner_payouts: (0..4).map(|i| output(1_000 + i as u128, i)).collect(),
        transactions: Vec::new(),
    }
}

/// A block on top of `parent` carrying `transactions` and no payouts.
pub(crate) fn block_with(parent: BlockID, weight: u128, timestamp: u64, transactions: Vec<Transaction>) -> Block {
    Block {
        parent,
        weight: BlockWeight::new(weight),
        timestamp,
        miner_payouts: Vec::new(),
        transactions,
    }
}

/// Apply the effects of `block` at `height` to `sets`.
pub(crate) fn apply_expected_effects(sets: &mut ConsensusSets, block: &Block, height: BlockHeight) {
    for transaction in &block.transactions {
        let diff = expected_transaction_diff(sets, transaction);
        sets.commit_transaction_diff(&diff, DiffDirection::Apply).unwrap();
    }

    let block_id = block.id();
    let mut block_changes = TransactionDiff::new();
    for (i, payout) in block.miner_payouts.iter().enumerate() {
        block_changes.output_diffs.push(OutputDiff::created(
            Block::miner_payout_id(&block_id, i as u64),
            payout.clone(),
        ));
    }
    let expiring: Vec<(ContractID, FileContract)> = sets
        .open_contracts()
        .iter()
        .filter(|(_, contract)| contract.window_end == height)
        .map(|(id, contract)| (*id, contract.clone()))
        .collect();
    for (id, contract) in expiring {
        block_changes
            .output_diffs
            .push(OutputDiff::created(id.missed_proof_output_id(), contract.missed_proof_output()));
        block_changes.contract_diffs.push(ContractDiff::terminated(id, contract));
    }
    sets.commit_transaction_diff(&block_changes, DiffDirection::Apply).unwrap();
}

/// The sets produced by `chain`, which starts with the genesis block.
pub(crate) fn recompute(chain: &[Block]) -> ConsensusSets {
    let mut sets = ConsensusSets::new();
    for (height, block) in chain.iter().enumerate() {
        apply_expected_effects(&mut sets, block, BlockHeight::new(height as u64));
    }
    sets
}

fn expected_transaction_diff(sets: &ConsensusSets, transaction: &Transaction) -> TransactionDiff {
    let mut diff = TransactionDiff::new();
    for id in &transaction.spent_outputs {
        diff.output_diffs
            .push(OutputDiff::spent(*id, sets.output(id).unwrap().clone()));
    }
    for (i, output) in transaction.outputs.iter().enumerate() {
        diff.output_diffs
            .push(OutputDiff::created(transaction.output_id(i as u64), output.clone()));
    }
    for (i, contract) in transaction.file_contracts.iter().enumerate() {
        diff.contract_diffs
            .push(ContractDiff::created(transaction.file_contract_id(i as u64), contract.clone()));
    }
    for id in &transaction.storage_proofs {
        let contract = sets.contract(id).unwrap().clone();
        diff.output_diffs
            .push(OutputDiff::created(id.valid_proof_output_id(), contract.valid_proof_output()));
        diff.contract_diffs.push(ContractDiff::terminated(*id, contract));
    }
    diff
}

/// Generates random, valid blocks from a seed. Any block it has generated can be extended, so it can
/// build arbitrary trees of forks.
pub(crate) struct ChainGenerator {
    rng: StdRng,
    genesis: Block,
    // Height of every generated block, and the sets produced by the chain ending at it.
    generated: HashMap<BlockID, (BlockHeight, ConsensusSets)>,
    timestamp: u64,
}

impl ChainGenerator {
    pub(crate) fn new(seed: u64) -> ChainGenerator {
        let genesis = genesis_block();
        let mut sets = ConsensusSets::new();
        apply_expected_effects(&mut sets, &genesis, BlockHeight::genesis());

        let mut generated = HashMap::new();
        generated.insert(genesis.id(), (BlockHeight::genesis(), sets));

        ChainGenerator {
            rng: StdRng::seed_from_u64(seed),
            genesis,
            generated,
            timestamp: 0,
        }
    }

    pub(crate) fn genesis(&self) -> Block {
        self.genesis.clone()
    }

    /// The sets expected once `block` is the canonical tip.
    pub(crate) fn sets_after(&self, block: &BlockID) -> &ConsensusSets {
        &self.generated[block].1
    }

    /// A random valid block on top of `parent`.
    pub(crate) fn child(&mut self, parent: &BlockID, weight: u128) -> Block {
        let (parent_height, parent_sets) = self.generated[parent].clone();
        let height = parent_height + 1;

        let mut sets = parent_sets.clone();
        let mut transactions = Vec::new();
        for _ in 0..self.rng.gen_range(0, 4) {
            let transaction = self.transaction(&sets, height);
            let diff = expected_transaction_diff(&sets, &transaction);
            sets.commit_transaction_diff(&diff, DiffDirection::Apply).unwrap();
            transactions.push(transaction);
        }

        self.timestamp += 1;
        let block = Block {
            parent: *parent,
            weight: BlockWeight::new(weight),
            timestamp: self.timestamp,
            miner_payouts: vec![output(self.rng.gen_range(1, 100), self.rng.gen())],
            transactions,
        };

        let mut resulting = parent_sets;
        apply_expected_effects(&mut resulting, &block, height);
        self.generated.insert(block.id(), (height, resulting));
        block
    }

    /// `length` random blocks, each extending the one before, starting on top of `parent`.
    pub(crate) fn branch(&mut self, parent: &BlockID, length: usize, weight: u128) -> Vec<Block> {
        let mut blocks: Vec<Block> = Vec::with_capacity(length);
        let mut tip = *parent;
        for _ in 0..length {
            let block = self.child(&tip, weight);
            tip = block.id();
            blocks.push(block);
        }
        blocks
    }

    fn transaction(&mut self, sets: &ConsensusSets, height: BlockHeight) -> Transaction {
        let spendable: Vec<OutputID> = sets.unspent_outputs().keys().copied().collect();
        let spent_outputs: Vec<OutputID> = spendable
            .into_iter()
            .filter(|_| self.rng.gen_bool(0.3))
            .take(2)
            .collect();

        let outputs = (0..self.rng.gen_range(1, 3))
            .map(|_| output(self.rng.gen_range(1, 500), self.rng.gen()))
            .collect();

        let file_contracts = if self.rng.gen_bool(0.3) {
            let window_start = height + self.rng.gen_range(1, 3);
            vec![FileContract {
                file_size: self.rng.gen_range(1, 1 << 20),
                file_merkle_root: CryptoHash::new(self.rng.gen()),
                window_start,
                window_end: window_start + self.rng.gen_range(1, 4),
                payout: Currency::new(self.rng.gen_range(1, 500)),
                valid_proof_unlock_hash: unlock_hash(self.rng.gen()),
                missed_proof_unlock_hash: unlock_hash(self.rng.gen()),
            }]
        } else {
            Vec::new()
        };

        let open_contracts: Vec<ContractID> = sets.open_contracts().keys().copied().collect();
        let storage_proofs = if self.rng.gen_bool(0.3) {
            open_contracts.choose(&mut self.rng).copied().into_iter().collect()
        } else {
            Vec::new()
        };

        Transaction {
            spent_outputs,
            outputs,
            file_contracts,
            storage_proofs,
            // Keeps transactions with otherwise identical contents distinct.
            arbitrary_data: vec![self.rng.gen::<u64>().to_le_bytes().to_vec()],
        }
    }
}
