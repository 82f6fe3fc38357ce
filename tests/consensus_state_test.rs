//! Tests of block acceptance: fork choice, reorgs, file contract maintenance, and halting on fatal
//! consistency faults.

use std::sync::mpsc;

use consensus_diffs::{
    config::Configuration,
    consensus::{ConsensusSet, ConsensusSetSpec},
    state::{AcceptBlockError, ConsistencyError},
    types::{
        block::{Block, FileContract, Transaction},
        data_types::{BlockHeight, BlockID, BlockWeight, CryptoHash, Currency, OutputID},
        diffs::{DiffDirection, OutputDiff, TransactionDiff},
    },
};
use log::LevelFilter;
use rand::{rngs::StdRng, Rng, SeedableRng};

mod common;

use crate::common::{
    chain::{block_with, genesis_block, output, recompute, unlock_hash, ChainGenerator},
    logging::setup_logger,
    replay::{canonical_chain, follow, WAIT},
};

fn start(genesis: Block) -> ConsensusSet {
    ConsensusSetSpec::builder()
        .genesis(genesis)
        .configuration(Configuration::builder().subscriber_backlog(1024).build())
        .build()
        .start()
        .unwrap()
}

/// A transaction with a single output, spending `spent_outputs`.
fn transfer(spent_outputs: Vec<OutputID>, value: u128, owner: u8) -> Transaction {
    Transaction {
        spent_outputs,
        outputs: vec![output(value, owner)],
        ..Default::default()
    }
}

#[test]
fn competing_block_that_wins_the_fork_inverts_the_old_tip() {
    setup_logger(LevelFilter::Debug);

    let genesis = genesis_block();
    let consensus_set = start(genesis.clone());
    let genesis_id = genesis.id();

    // B1 creates O1 with amount 10.
    let b1_transaction = transfer(Vec::new(), 10, 1);
    let o1 = b1_transaction.output_id(0);
    let b1 = block_with(genesis_id, 1, 1, vec![b1_transaction.clone()]);
    let b1_id = b1.id();

    let change = consensus_set.accept_block(b1).unwrap();
    assert!(change.inverted_blocks.is_empty());
    assert_eq!(change.applied_blocks.len(), 1);
    let b1_diff = &change.applied_blocks[0];
    assert_eq!(b1_diff.catalyst_block, b1_id);
    assert_eq!(
        b1_diff.transaction_diffs,
        vec![TransactionDiff {
            output_diffs: vec![OutputDiff::created(o1, output(10, 1))],
            contract_diffs: Vec::new(),
        }]
    );
    assert!(b1_diff.block_changes.is_empty());
    assert_eq!(consensus_set.output(&o1), Some(output(10, 1)));

    // B1' competes with B1 at the same height, and is heavier.
    let b1_prime_transaction = transfer(Vec::new(), 20, 2);
    let o1_prime = b1_prime_transaction.output_id(0);
    let b1_prime = block_with(genesis_id, 2, 2, vec![b1_prime_transaction]);
    let b1_prime_id = b1_prime.id();

    let change = consensus_set.accept_block(b1_prime.clone()).unwrap();
    assert!(change.is_reorg());
    assert_eq!(change.inverted_block_ids(), vec![b1_id]);
    assert_eq!(change.applied_block_ids(), vec![b1_prime_id]);
    assert_eq!(&change.inverted_blocks[0], consensus_set.block_diff(&b1_id).as_ref().unwrap());

    assert_eq!(consensus_set.current_block(), b1_prime_id);
    assert_eq!(consensus_set.height(), BlockHeight::new(1));
    assert_eq!(consensus_set.output(&o1), None);
    assert_eq!(consensus_set.output(&o1_prime), Some(output(20, 2)));
    assert_eq!(consensus_set.sets(), recompute(&[genesis, b1_prime]));
}

#[test]
fn blocks_that_do_not_extend_the_heaviest_chain_are_rejected() {
    setup_logger(LevelFilter::Debug);

    let mut generator = ChainGenerator::new(21);
    let consensus_set = start(generator.genesis());
    let genesis_id = consensus_set.genesis_block();

    let a1 = generator.child(&genesis_id, 2);
    let a1_id = a1.id();
    consensus_set.accept_block(a1.clone()).unwrap();

    // Already known.
    assert_eq!(consensus_set.accept_block(a1), Err(AcceptBlockError::BlockKnown { block: a1_id }));

    // Parent never seen.
    let orphan = Block::empty(BlockID::new(CryptoHash::new([9; 32])), BlockWeight::new(5), 9);
    assert_eq!(
        consensus_set.accept_block(orphan.clone()),
        Err(AcceptBlockError::UnknownParent {
            block: orphan.id(),
            parent: orphan.parent
        })
    );
    assert_eq!(consensus_set.block(&orphan.id()), None);

    // As heavy as the canonical chain, so the canonical chain stays.
    let b1 = generator.child(&genesis_id, 2);
    let b1_id = b1.id();
    let sets = consensus_set.sets();
    assert_eq!(consensus_set.accept_block(b1), Err(AcceptBlockError::NonExtending { block: b1_id }));
    assert_eq!(consensus_set.current_block(), a1_id);
    assert_eq!(consensus_set.sets(), sets);
    assert_eq!(consensus_set.block_height(&b1_id), Some(BlockHeight::new(1)));
    assert_eq!(consensus_set.block_diff(&b1_id), None);
    assert_eq!(consensus_set.known_blocks(), 3);

    // The side branch overtakes once a block on it makes it heavier.
    let b2 = generator.child(&b1_id, 1);
    let b2_id = b2.id();
    let change = consensus_set.accept_block(b2).unwrap();
    assert_eq!(change.inverted_block_ids(), vec![a1_id]);
    assert_eq!(change.applied_block_ids(), vec![b1_id, b2_id]);
    assert_eq!(consensus_set.current_block(), b2_id);
    assert_eq!(&consensus_set.sets(), generator.sets_after(&b2_id));
    assert!(consensus_set.block_diff(&b1_id).is_some());
    assert!(!consensus_set.is_halted());
}

#[test]
fn replaying_changes_matches_recomputing_from_genesis() {
    setup_logger(LevelFilter::Debug);

    let mut rng = StdRng::seed_from_u64(5);
    let mut generator = ChainGenerator::new(5);
    let consensus_set = start(generator.genesis());
    let receiver = consensus_set.subscribe();
    let mut follower = consensus_set.sets();

    // Grow a tree of forks. Every block is offered as soon as it is generated.
    let mut tips = vec![consensus_set.genesis_block()];
    let mut changes = 0;
    let mut reorgs = 0;
    for _ in 0..120 {
        let parent = tips[rng.gen_range(0, tips.len())];
        let block = generator.child(&parent, rng.gen_range(1, 4));
        let block_id = block.id();
        let before = consensus_set.sets();

        match consensus_set.accept_block(block) {
            Ok(change) => {
                changes += 1;
                if change.is_reorg() {
                    reorgs += 1;
                }
                assert_eq!(change.new_tip(), Some(block_id));

                // Replaying the change against the state before it yields the state after it.
                let mut replayed = before.clone();
                replayed.commit_consensus_change(&change).unwrap();
                assert_eq!(replayed, consensus_set.sets());

                // Reverting the applied blocks then applying the inverted blocks undoes it.
                for diff in change.applied_blocks.iter().rev() {
                    replayed.commit_block_diff(diff, DiffDirection::Revert).unwrap();
                }
                for diff in change.inverted_blocks.iter().rev() {
                    replayed.commit_block_diff(diff, DiffDirection::Apply).unwrap();
                }
                assert_eq!(replayed, before);
            }
            Err(AcceptBlockError::NonExtending { block }) => {
                assert_eq!(block, block_id);
                assert_eq!(consensus_set.sets(), before);
            }
            Err(err) => panic!("unexpected error: {}", err),
        }

        assert_eq!(consensus_set.sets(), recompute(&canonical_chain(&consensus_set)));
        assert_eq!(&consensus_set.sets(), generator.sets_after(&consensus_set.current_block()));
        tips.push(block_id);
    }
    assert!(reorgs > 0);

    follow(&receiver, &mut follower, changes);
    assert_eq!(follower, consensus_set.sets());
    assert_eq!(receiver.try_recv().unwrap(), None);
}

#[test]
fn file_contracts_are_proven_or_expire() {
    setup_logger(LevelFilter::Debug);

    let genesis = genesis_block();
    let genesis_id = genesis.id();
    let payout = Block::miner_payout_id(&genesis_id, 0);
    let consensus_set = start(genesis);

    let contract = |window_start: u64, window_end: u64, payout: u128| FileContract {
        file_size: 1024,
        file_merkle_root: CryptoHash::new([7; 32]),
        window_start: BlockHeight::new(window_start),
        window_end: BlockHeight::new(window_end),
        payout: Currency::new(payout),
        valid_proof_unlock_hash: unlock_hash(10),
        missed_proof_unlock_hash: unlock_hash(11),
    };

    // Height 1: open two contracts.
    let opening = Transaction {
        spent_outputs: vec![payout],
        file_contracts: vec![contract(2, 4, 300), contract(2, 3, 400)],
        ..Default::default()
    };
    let proven = opening.file_contract_id(0);
    let missed = opening.file_contract_id(1);
    let b1 = block_with(genesis_id, 1, 1, vec![opening]);
    let b1_id = b1.id();
    consensus_set.accept_block(b1).unwrap();
    assert_eq!(consensus_set.output(&payout), None);
    assert_eq!(consensus_set.open_contracts().len(), 2);

    // Height 2: prove the first contract.
    let proof = Transaction {
        storage_proofs: vec![proven],
        ..Default::default()
    };
    let b2 = block_with(b1_id, 1, 2, vec![proof]);
    let b2_id = b2.id();
    let change = consensus_set.accept_block(b2).unwrap();
    assert_eq!(consensus_set.contract(&proven), None);
    assert_eq!(
        consensus_set.output(&proven.valid_proof_output_id()),
        Some(output(300, 10))
    );
    assert_eq!(change.applied_blocks[0].transaction_diffs[0].contract_diffs.len(), 1);
    assert!(!change.applied_blocks[0].transaction_diffs[0].contract_diffs[0].new);

    // Height 3: the second contract's window closes unproven.
    let b3 = Block::empty(b2_id, BlockWeight::new(1), 3);
    let b3_id = b3.id();
    let change = consensus_set.accept_block(b3).unwrap();
    assert_eq!(consensus_set.contract(&missed), None);
    assert_eq!(
        consensus_set.output(&missed.missed_proof_output_id()),
        Some(output(400, 11))
    );
    let block_changes = &change.applied_blocks[0].block_changes;
    assert_eq!(block_changes.contract_diffs.len(), 1);
    assert_eq!(block_changes.contract_diffs[0].contract_id, missed);
    assert!(consensus_set.open_contracts().is_empty());

    // Replacing the block at the expiry height expires the contract on the new branch as well.
    let b3_prime = Block::empty(b2_id, BlockWeight::new(1), 4);
    consensus_set.accept_block(b3_prime.clone()).unwrap_err();
    let b4_prime = Block::empty(b3_prime.id(), BlockWeight::new(1), 5);
    let change = consensus_set.accept_block(b4_prime).unwrap();
    assert_eq!(change.inverted_block_ids(), vec![b3_id]);
    assert_eq!(consensus_set.output(&missed.missed_proof_output_id()), Some(output(400, 11)));
    assert_eq!(consensus_set.open_contracts().len(), 0);
    assert_eq!(consensus_set.height(), BlockHeight::new(4));
}

#[test]
fn inconsistent_block_halts_the_consensus_set() {
    setup_logger(LevelFilter::Debug);

    let (halts, halt_receiver) = mpsc::channel();
    let mut generator = ChainGenerator::new(13);
    let consensus_set = ConsensusSetSpec::builder()
        .genesis(generator.genesis())
        .on_halt(move |halt_event| {
            let _ = halts.send((halt_event.block, halt_event.error.clone()));
        })
        .build()
        .start()
        .unwrap();
    let genesis_id = consensus_set.genesis_block();

    // The canonical chain is A1. B1 is a lighter side branch.
    let a1 = generator.child(&genesis_id, 2);
    let a1_id = a1.id();
    consensus_set.accept_block(a1).unwrap();
    let b1 = generator.child(&genesis_id, 1);
    let b1_id = b1.id();
    consensus_set.accept_block(b1).unwrap_err();
    let sets = consensus_set.sets();

    // B2 makes the side branch heavier, but spends an output that does not exist. The reorg is undone.
    let missing = OutputID::new(CryptoHash::new([0xEE; 32]));
    let b2 = block_with(b1_id, 5, 1_000, vec![transfer(vec![missing], 1, 1)]);
    let b2_id = b2.id();
    assert_eq!(
        consensus_set.accept_block(b2),
        Err(AcceptBlockError::Fatal {
            block: b2_id,
            error: ConsistencyError::MissingOutput { output: missing }
        })
    );
    assert!(consensus_set.is_halted());
    assert_eq!(consensus_set.sets(), sets);
    assert_eq!(consensus_set.current_block(), a1_id);
    assert_eq!(consensus_set.block(&b2_id), None);
    assert_eq!(
        halt_receiver.recv_timeout(WAIT).unwrap(),
        (b2_id, ConsistencyError::MissingOutput { output: missing })
    );

    // Nothing is accepted once halted.
    let a2 = generator.child(&a1_id, 1);
    assert_eq!(consensus_set.accept_block(a2), Err(AcceptBlockError::Halted));
    assert_eq!(consensus_set.sets(), sets);
}

#[test]
fn contract_with_invalid_window_is_fatal() {
    setup_logger(LevelFilter::Debug);

    let genesis = genesis_block();
    let genesis_id = genesis.id();
    let consensus_set = start(genesis);
    let sets = consensus_set.sets();

    let opening = Transaction {
        file_contracts: vec![FileContract {
            file_size: 1,
            file_merkle_root: CryptoHash::new([1; 32]),
            window_start: BlockHeight::new(1),
            window_end: BlockHeight::new(5),
            payout: Currency::new(1),
            valid_proof_unlock_hash: unlock_hash(1),
            missed_proof_unlock_hash: unlock_hash(2),
        }],
        ..Default::default()
    };
    let contract = opening.file_contract_id(0);
    let b1 = block_with(genesis_id, 1, 1, vec![transfer(Vec::new(), 3, 3), opening]);
    let b1_id = b1.id();

    let err = consensus_set.accept_block(b1).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(
        err,
        AcceptBlockError::Fatal {
            block: b1_id,
            error: ConsistencyError::InvalidContractWindow {
                contract,
                height: BlockHeight::new(1)
            }
        }
    );
    assert_eq!(consensus_set.sets(), sets);
    assert_eq!(consensus_set.current_block(), genesis_id);
}
