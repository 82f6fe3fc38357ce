/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events emitted by the consensus set, for event handling and logging.
//!
//! Note: an event for a given action indicates that the action has been completed. Events are handled on
//! the [event bus](crate::event_bus) thread, after the state transition they describe has been committed
//! and fanned out to subscribers, so handlers never delay block acceptance or delivery.
//!
//! Handlers are registered on the [`ConsensusSetSpec`](crate::consensus::ConsensusSetSpec) builder.
//! If [logging](crate::logging) is enabled in the [configuration](crate::config::Configuration), every
//! event is also logged.

use std::time::SystemTime;

use crate::state::{AcceptBlockError, ConsistencyError};
use crate::subscriptions::{SubscriberID, SubscriberKind};
use crate::types::data_types::{BlockHeight, BlockID};

pub enum Event {
    // Events that change the canonical chain.
    AcceptBlock(AcceptBlockEvent),
    Reorg(ReorgEvent),
    // Events where a block did not change the canonical chain.
    RejectBlock(RejectBlockEvent),
    Halt(HaltEvent),
    // Events that change the set of subscribers.
    Subscribe(SubscribeEvent),
    RevokeSubscriber(RevokeSubscriberEvent),
}

/// A block was accepted and is now the canonical tip.
pub struct AcceptBlockEvent {
    pub timestamp: SystemTime,
    pub block: BlockID,
    pub height: BlockHeight,
    pub inverted_blocks: usize,
    pub applied_blocks: usize,
}

/// Accepting a block replaced part of the canonical chain. Always followed by an [`AcceptBlockEvent`]
/// for the same block.
pub struct ReorgEvent {
    pub timestamp: SystemTime,
    /// Blocks that left the canonical chain, old tip first.
    pub inverted_blocks: Vec<BlockID>,
    /// Blocks that joined the canonical chain, lowest first.
    pub applied_blocks: Vec<BlockID>,
}

/// A block did not change the canonical chain, for a reason other than a fatal fault.
pub struct RejectBlockEvent {
    pub timestamp: SystemTime,
    pub block: BlockID,
    pub reason: AcceptBlockError,
}

/// A block caused a fatal consistency fault and the consensus set stopped accepting blocks.
pub struct HaltEvent {
    pub timestamp: SystemTime,
    pub block: BlockID,
    pub error: ConsistencyError,
}

pub struct SubscribeEvent {
    pub timestamp: SystemTime,
    pub subscriber: SubscriberID,
    pub kind: SubscriberKind,
}

/// A subscriber was removed, either because it asked to be, or because it fell too far behind.
pub struct RevokeSubscriberEvent {
    pub timestamp: SystemTime,
    pub subscriber: SubscriberID,
    pub kind: SubscriberKind,
}
