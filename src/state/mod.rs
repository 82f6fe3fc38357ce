/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state maintained by the consensus set.
//!
//! - [`sets`]: the unspent output set and the open contract set, and the checked, atomic application of
//!   diffs to them. Subscribers that maintain their own copy of the sets use [`ConsensusSets`] too.
//! - `block_map`: every accepted block, canonical or on a side branch, with its recorded diff.
//! - `diff_generation`: deriving the diff of a block from its transactions.
//! - `consensus_state`: fork choice, reorgs, and halting on fatal faults.

pub mod sets;
pub use sets::{ConsensusSets, ConsistencyError};

pub(crate) mod block_map;

pub(crate) mod diff_generation;

pub(crate) mod consensus_state;
pub use consensus_state::AcceptBlockError;
