/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tracks the canonical chain of a blockchain node, maintains the unspent output and open file contract
//! sets it produces, and streams every change to those sets to subscribers.
//!
//! Blocks that have already passed validation are handed to a running [`ConsensusSet`](consensus::ConsensusSet)
//! with [`accept_block`](consensus::ConsensusSet::accept_block). Each accepted block yields a
//! [`ConsensusChange`](types::diffs::ConsensusChange): the diffs of the blocks that left the canonical
//! chain, and the diffs of the blocks that joined it. Replaying changes in order against a copy of the
//! sets reproduces the consensus set's own sets exactly.
//!
//! ## Modules
//!
//! - [`consensus`]: building, starting, and querying a consensus set.
//! - [`config`]: user-defined parameters.
//! - [`types`]: blocks, identifiers, and the diff model.
//! - [`state`]: the sets, fork choice, and reorgs.
//! - [`subscriptions`]: the receiving ends of full-diff and poke subscriptions.
//! - [`events`] and [`logging`]: what the consensus set reports, and how it is logged.

pub mod config;

pub mod consensus;

pub mod events;

pub mod logging;

pub mod state;

pub mod subscriptions;

pub mod types;

pub(crate) mod event_bus;

pub(crate) mod notifier;
