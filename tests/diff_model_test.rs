//! Tests of the diff model against the diffs that a consensus set actually produces: applying then
//! reverting a block diff is the identity, the elements of a transaction diff commute, and committing
//! diffs is atomic.

use consensus_diffs::{
    config::Configuration,
    consensus::{ConsensusSet, ConsensusSetSpec},
    state::ConsistencyError,
    types::{
        block::Block,
        data_types::{BlockWeight, CryptoHash, OutputID},
        diffs::{BlockDiff, ConsensusChange, DiffDirection, OutputDiff, TransactionDiff},
    },
};
use log::LevelFilter;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

mod common;

use crate::common::{
    chain::{output, ChainGenerator},
    logging::setup_logger,
};

fn start(generator: &ChainGenerator) -> ConsensusSet {
    ConsensusSetSpec::builder()
        .genesis(generator.genesis())
        .configuration(Configuration::builder().log_events(false).build())
        .build()
        .start()
        .unwrap()
}

#[test]
fn reverting_an_applied_block_diff_restores_the_sets() {
    setup_logger(LevelFilter::Debug);

    let mut generator = ChainGenerator::new(7);
    let consensus_set = start(&generator);
    let blocks = generator.branch(&consensus_set.genesis_block(), 40, 1);

    for block in blocks {
        let block_id = block.id();
        let before = consensus_set.sets();

        let change = consensus_set.accept_block(block).unwrap();
        assert!(!change.is_reorg());
        assert_eq!(change.applied_block_ids(), vec![block_id]);
        assert_eq!(&consensus_set.sets(), generator.sets_after(&block_id));

        let diff = &change.applied_blocks[0];
        let mut sets = before.clone();
        sets.commit_block_diff(diff, DiffDirection::Apply).unwrap();
        assert_eq!(sets, consensus_set.sets());
        sets.commit_block_diff(diff, DiffDirection::Revert).unwrap();
        assert_eq!(sets, before);
    }
}

#[test]
fn elements_of_a_transaction_diff_commute() {
    setup_logger(LevelFilter::Debug);

    let mut rng = StdRng::seed_from_u64(99);
    let mut generator = ChainGenerator::new(11);
    let consensus_set = start(&generator);
    let blocks = generator.branch(&consensus_set.genesis_block(), 30, 1);

    let mut sets = consensus_set.sets();
    for block in blocks {
        let change = consensus_set.accept_block(block).unwrap();
        for transaction_diff in change.applied_blocks[0].ordered(DiffDirection::Apply) {
            assert_eq!(transaction_diff.inverse().inverse(), transaction_diff);

            let mut committed_whole = sets.clone();
            committed_whole
                .commit_transaction_diff(&transaction_diff, DiffDirection::Apply)
                .unwrap();

            for _ in 0..4 {
                let mut output_diffs = transaction_diff.output_diffs.clone();
                let mut contract_diffs = transaction_diff.contract_diffs.clone();
                output_diffs.shuffle(&mut rng);
                contract_diffs.shuffle(&mut rng);

                let mut committed_piecewise = sets.clone();
                for contract_diff in &contract_diffs {
                    committed_piecewise
                        .commit_contract_diff(contract_diff, DiffDirection::Apply)
                        .unwrap();
                }
                for output_diff in &output_diffs {
                    committed_piecewise
                        .commit_output_diff(output_diff, DiffDirection::Apply)
                        .unwrap();
                }
                assert_eq!(committed_piecewise, committed_whole);
            }

            sets = committed_whole;
        }
        assert_eq!(sets, consensus_set.sets());
    }
}

#[test]
fn failed_commits_leave_the_sets_untouched() {
    setup_logger(LevelFilter::Debug);

    let mut generator = ChainGenerator::new(3);
    let consensus_set = start(&generator);
    let genesis_sets = consensus_set.sets();

    let block = generator.child(&consensus_set.genesis_block(), 1);
    let block_id = block.id();
    let good = consensus_set.accept_block(block).unwrap().applied_blocks[0].clone();

    let missing = OutputID::new(CryptoHash::new([0xAB; 32]));
    let mut bad = BlockDiff::new(Block::empty(block_id, BlockWeight::new(1), 100).id());
    bad.block_changes
        .output_diffs
        .push(OutputDiff::spent(missing, output(5, 5)));

    // A change whose second block diff is inconsistent commits nothing.
    let change = ConsensusChange {
        inverted_blocks: Vec::new(),
        applied_blocks: vec![good, bad],
    };
    let mut sets = genesis_sets.clone();
    assert_eq!(
        sets.commit_consensus_change(&change),
        Err(ConsistencyError::MissingOutput { output: missing })
    );
    assert_eq!(sets, genesis_sets);

    // The same output may not appear twice in one transaction diff.
    let created = OutputID::new(CryptoHash::new([0xCD; 32]));
    let repeated = TransactionDiff {
        output_diffs: vec![
            OutputDiff::created(created, output(1, 1)),
            OutputDiff::spent(created, output(1, 1)),
        ],
        contract_diffs: Vec::new(),
    };
    assert_eq!(
        sets.commit_transaction_diff(&repeated, DiffDirection::Apply),
        Err(ConsistencyError::RepeatedOutput { output: created })
    );
    assert_eq!(sets, genesis_sets);

    // Creating an output that already exists.
    let (existing, existing_output) = genesis_sets.unspent_outputs().iter().next().unwrap();
    assert_eq!(
        sets.commit_output_diff(
            &OutputDiff::created(*existing, existing_output.clone()),
            DiffDirection::Apply
        ),
        Err(ConsistencyError::DuplicateOutput { output: *existing })
    );
    assert_eq!(sets, genesis_sets);
}
