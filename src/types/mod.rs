/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that are used across multiple components of this crate.
//!
//! - [`data_types`]: identifiers and amounts.
//! - [`block`]: the blocks and transactions handed to the consensus set by the validation pipeline.
//! - [`diffs`]: the diff model describing how blocks mutate the consensus sets, and the
//!   [`ConsensusChange`](diffs::ConsensusChange) delivered to subscribers.

pub mod data_types;

pub mod block;

pub mod diffs;
