use std::{sync::Arc, time::Duration};

use consensus_diffs::{
    consensus::ConsensusSet,
    state::ConsensusSets,
    subscriptions::ConsensusChangeReceiver,
    types::{block::Block, data_types::BlockHeight, diffs::ConsensusChange},
};

/// How long a test waits for something the notifier is expected to do promptly.
pub(crate) const WAIT: Duration = Duration::from_secs(5);

/// Receive `count` changes from `receiver`, committing each to `sets` in the order received.
pub(crate) fn follow(
    receiver: &ConsensusChangeReceiver,
    sets: &mut ConsensusSets,
    count: usize,
) -> Vec<Arc<ConsensusChange>> {
    (0..count)
        .map(|_| {
            let change = receiver
                .recv_timeout(WAIT)
                .unwrap()
                .expect("timed out waiting for a consensus change");
            sets.commit_consensus_change(&change).unwrap();
            change
        })
        .collect()
}

/// The blocks of the canonical chain, genesis first.
pub(crate) fn canonical_chain(consensus_set: &ConsensusSet) -> Vec<Block> {
    (0..=consensus_set.height().int())
        .map(|height| {
            let block = consensus_set.block_at_height(BlockHeight::new(height)).unwrap();
            consensus_set.block(&block).unwrap()
        })
        .collect()
}
