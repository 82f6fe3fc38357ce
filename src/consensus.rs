/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build, run, and query a consensus set.
//!
//! A consensus set tracks the canonical chain of a block tree, the [sets](crate::state::ConsensusSets) of
//! unspent outputs and open file contracts that the canonical chain produces, and the subscribers that
//! want to hear about every change to those sets.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the consensus set](ConsensusSetSpec)
//!   with:
//!   1. `ConsensusSetSpec::builder` to construct a `ConsensusSetSpecBuilder`,
//!   2. The setters of the `ConsensusSetSpecBuilder`, and
//!   3. The `ConsensusSetSpecBuilder::build` method to construct a [ConsensusSetSpec],
//! - The function to [start](ConsensusSetSpec::start) a [ConsensusSet] given its specification,
//! - [The type](ConsensusSet) which keeps the consensus set alive.
//!
//! ## Starting a consensus set
//!
//! ```ignore
//! let consensus_set =
//!     ConsensusSetSpec::builder()
//!     .genesis(genesis_block)
//!     .configuration(configuration)
//!     .on_accept_block(accept_block_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! ### Required setters
//! - `.genesis(...)`
//!
//! ### Optional setters
//! - `.configuration(...)`, which defaults to [`Configuration::default`].
//! - One `.on_<event>(...)` setter per [event](crate::events), to register a handler for that event.
//!
//! ## Concurrency
//!
//! A [ConsensusSet] can be shared between threads (for example in an `Arc`). Accepting a block, registering
//! a subscriber, and reading the state all take the same lock, so:
//! - Changes are committed one at a time, and every subscriber receives them in commit order.
//! - A subscriber registered concurrently with a commit either receives that commit's change or does not,
//!   and then receives every later change.
//! - A reader never observes a half-committed change.
//!
//! Nothing done while holding the lock waits on a subscriber. Committed changes are passed to the
//! [notifier](crate::notifier) thread, which delivers them after the lock is released. Event handlers run
//! on a third thread, the [event bus](crate::event_bus), so a slow or panicking handler never holds up
//! delivery.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::SystemTime;

use typed_builder::TypedBuilder;

use crate::config::Configuration;
use crate::event_bus::{start_event_bus, EventHandlers, HandlerPtr};
use crate::events::*;
use crate::notifier::{start_notifier, NotifierMessage};
use crate::state::consensus_state::ConsensusState;
use crate::state::{AcceptBlockError, ConsensusSets, ConsistencyError};
use crate::subscriptions::registry::{SubscriberID, SubscriberKind, SubscriberRegistry};
use crate::subscriptions::{ConsensusChangeReceiver, PokeReceiver};
use crate::types::block::{Block, FileContract, Output};
use crate::types::data_types::{BlockHeight, BlockID, ContractID, OutputID};
use crate::types::diffs::{BlockDiff, ConsensusChange};

/// Stores all necessary parameters and event handlers required to start a [ConsensusSet].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ConsensusSetSpec]. On the builder call the following methods to construct a valid [ConsensusSetSpec].

    Required:
    - `.genesis(...)`

    Optional:
    - `.configuration(...)`
    - `.on_accept_block(...)`
    - `.on_reorg(...)`
    - `.on_reject_block(...)`
    - `.on_halt(...)`
    - `.on_subscribe(...)`
    - `.on_revoke_subscriber(...)`
"))]
pub struct ConsensusSetSpec {
    // Required parameters
    #[builder(setter(doc = "Set the genesis block, the root of the block tree. Its parent is never looked up. Required."))]
    genesis: Block,
    // Optional parameters
    #[builder(default, setter(doc = "Set the [configuration](Configuration). Optional."))]
    configuration: Configuration,
    #[builder(default, setter(transform = |handler: impl Fn(&AcceptBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AcceptBlockEvent>),
    doc = "Register a handler closure to be invoked after a block becomes the canonical tip. Optional."))]
    on_accept_block: Option<HandlerPtr<AcceptBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReorgEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReorgEvent>),
    doc = "Register a handler closure to be invoked after blocks are removed from the canonical chain. Optional."))]
    on_reorg: Option<HandlerPtr<ReorgEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RejectBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RejectBlockEvent>),
    doc = "Register a handler closure to be invoked after a block fails to change the canonical chain. Optional."))]
    on_reject_block: Option<HandlerPtr<RejectBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&HaltEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<HaltEvent>),
    doc = "Register a handler closure to be invoked after a fatal fault stops block acceptance. Optional."))]
    on_halt: Option<HandlerPtr<HaltEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SubscribeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SubscribeEvent>),
    doc = "Register a handler closure to be invoked after a subscriber is registered. Optional."))]
    on_subscribe: Option<HandlerPtr<SubscribeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RevokeSubscriberEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RevokeSubscriberEvent>),
    doc = "Register a handler closure to be invoked after a subscriber is removed or revoked. Optional."))]
    on_revoke_subscriber: Option<HandlerPtr<RevokeSubscriberEvent>>,
}

impl ConsensusSetSpec {
    /// Apply the genesis block, start the notifier and event bus threads, and return the handle to the running consensus
    /// set.
    ///
    /// Fails if the genesis block's own diff is inconsistent, for example if it spends an output.
    pub fn start(self) -> Result<ConsensusSet, ConsistencyError> {
        let state = ConsensusState::new(self.genesis)?;

        let event_handlers = EventHandlers::new(
            self.configuration.log_events,
            self.on_accept_block,
            self.on_reorg,
            self.on_reject_block,
            self.on_halt,
            self.on_subscribe,
            self.on_revoke_subscriber,
        );

        let (event_publisher, event_subscriber) = mpsc::channel();
        let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
        let event_bus = start_event_bus(
            event_handlers,
            event_subscriber,
            event_bus_shutdown_receiver,
            self.configuration.notifier_poll_interval,
        );

        let (notifier_sender, notifier_receiver) = mpsc::channel();
        let (notifier_shutdown, notifier_shutdown_receiver) = mpsc::channel();
        let notifier = start_notifier(
            event_publisher,
            notifier_receiver,
            notifier_shutdown_receiver,
            self.configuration.notifier_poll_interval,
        );

        Ok(ConsensusSet {
            guarded: Mutex::new(Guarded {
                state,
                registry: SubscriberRegistry::new(self.configuration.subscriber_backlog),
                notifier: notifier_sender,
            }),
            notifier: Some(notifier),
            notifier_shutdown,
            event_bus: Some(event_bus),
            event_bus_shutdown,
        })
    }
}

/// A handle to a running consensus set. When this value is dropped, the notifier thread is shut down
/// gracefully after delivering every change that was already committed, and then the event bus thread
/// after running the handlers of every event already emitted.
pub struct ConsensusSet {
    guarded: Mutex<Guarded>,
    notifier: Option<JoinHandle<()>>,
    notifier_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Sender<()>,
}

// Everything that must change together when a block is accepted.
struct Guarded {
    state: ConsensusState,
    registry: SubscriberRegistry,
    notifier: Sender<NotifierMessage>,
}

/// Block acceptance.
impl ConsensusSet {
    /// Offer `block` to the consensus set.
    ///
    /// If the block makes its chain the heaviest, the canonical chain moves onto it, the resulting
    /// [`ConsensusChange`] is committed to the sets, and the change is returned. The same change is
    /// delivered to every subscriber registered at the moment of the commit.
    ///
    /// Otherwise an [`AcceptBlockError`] says why nothing changed. Only
    /// [`AcceptBlockError::Fatal`] and [`AcceptBlockError::Halted`] indicate a fault in the consensus set.
    pub fn accept_block(&self, block: Block) -> Result<Arc<ConsensusChange>, AcceptBlockError> {
        let block_id = block.id();

        // A thread that panicked while holding the lock may have left the state half-committed.
        let mut guarded = self.guarded.lock().map_err(|_| AcceptBlockError::Halted)?;
        prune_revoked(&mut guarded);
        let Guarded {
            state,
            registry,
            notifier,
        } = &mut *guarded;

        let result = state.accept_block(block);
        match result {
            Ok(change) => {
                let change = Arc::new(change);

                // Handed over under the lock so that the notifier sees changes in commit order. The events
                // follow the change, so handlers run after the change has been fanned out.
                NotifierMessage::publish(
                    notifier,
                    NotifierMessage::Change {
                        change: change.clone(),
                        subscribers: registry.snapshot(),
                    },
                );

                if change.is_reorg() {
                    NotifierMessage::publish(
                        notifier,
                        NotifierMessage::Event(Event::Reorg(ReorgEvent {
                            timestamp: SystemTime::now(),
                            inverted_blocks: change.inverted_block_ids(),
                            applied_blocks: change.applied_block_ids(),
                        })),
                    );
                }
                NotifierMessage::publish(
                    notifier,
                    NotifierMessage::Event(Event::AcceptBlock(AcceptBlockEvent {
                        timestamp: SystemTime::now(),
                        block: block_id,
                        height: state.height(),
                        inverted_blocks: change.inverted_blocks.len(),
                        applied_blocks: change.applied_blocks.len(),
                    })),
                );

                Ok(change)
            }

            Err(AcceptBlockError::Fatal { block, error }) => {
                NotifierMessage::publish(
                    notifier,
                    NotifierMessage::Event(Event::Halt(HaltEvent {
                        timestamp: SystemTime::now(),
                        block,
                        error: error.clone(),
                    })),
                );
                Err(AcceptBlockError::Fatal { block, error })
            }

            Err(reason) => {
                NotifierMessage::publish(
                    notifier,
                    NotifierMessage::Event(Event::RejectBlock(RejectBlockEvent {
                        timestamp: SystemTime::now(),
                        block: block_id,
                        reason: reason.clone(),
                    })),
                );
                Err(reason)
            }
        }
    }
}

/// Subscriptions.
impl ConsensusSet {
    /// Register a full-diff subscriber. The returned receiver yields every change committed after this call
    /// returns, in commit order.
    pub fn subscribe(&self) -> ConsensusChangeReceiver {
        let mut guarded = self.lock();
        prune_revoked(&mut guarded);
        let receiver = guarded.registry.subscribe();
        publish_subscribe(&guarded.notifier, receiver.id(), SubscriberKind::Full);
        receiver
    }

    /// Register a poke subscriber. The returned receiver holds a token whenever at least one change was
    /// committed since the owner last took one.
    pub fn subscribe_poke(&self) -> PokeReceiver {
        let mut guarded = self.lock();
        prune_revoked(&mut guarded);
        let receiver = guarded.registry.subscribe_poke();
        publish_subscribe(&guarded.notifier, receiver.id(), SubscriberKind::Poke);
        receiver
    }

    /// Remove a subscriber. Returns `false` if it was not registered or was already revoked.
    ///
    /// A full-diff subscriber may still receive changes that were handed to its worker before this call.
    pub fn unsubscribe(&self, subscriber: SubscriberID) -> bool {
        let mut guarded = self.lock();
        // A subscriber the notifier already revoked has had its revocation reported.
        prune_revoked(&mut guarded);
        match guarded.registry.unsubscribe(&subscriber) {
            Some(kind) => {
                NotifierMessage::publish(
                    &guarded.notifier,
                    NotifierMessage::Event(Event::RevokeSubscriber(RevokeSubscriberEvent {
                        timestamp: SystemTime::now(),
                        subscriber,
                        kind,
                    })),
                );
                true
            }
            None => false,
        }
    }

    /// Number of live (full-diff, poke) subscribers.
    pub fn subscriber_count(&self) -> (usize, usize) {
        let mut guarded = self.lock();
        prune_revoked(&mut guarded);
        (guarded.registry.full_count(), guarded.registry.poke_count())
    }
}

/// State getters.
impl ConsensusSet {
    /// Height of the canonical tip. The genesis block is at height 0.
    pub fn height(&self) -> BlockHeight {
        self.lock().state.height()
    }

    pub fn current_block(&self) -> BlockID {
        self.lock().state.current_block()
    }

    pub fn genesis_block(&self) -> BlockID {
        self.lock().state.genesis_block()
    }

    /// The canonical block at `height`, if the canonical chain is that long.
    pub fn block_at_height(&self, height: BlockHeight) -> Option<BlockID> {
        self.lock().state.block_at_height(height)
    }

    /// Any accepted block, canonical or not.
    pub fn block(&self, block: &BlockID) -> Option<Block> {
        self.lock().state.block(block).cloned()
    }

    pub fn block_height(&self, block: &BlockID) -> Option<BlockHeight> {
        self.lock().state.block_height(block)
    }

    /// The diff applying `block` caused, if `block` has ever been on the canonical chain.
    pub fn block_diff(&self, block: &BlockID) -> Option<BlockDiff> {
        self.lock().state.block_diff(block).cloned()
    }

    pub fn known_blocks(&self) -> usize {
        self.lock().state.known_blocks()
    }

    pub fn output(&self, output: &OutputID) -> Option<Output> {
        self.lock().state.sets().output(output).cloned()
    }

    pub fn contract(&self, contract: &ContractID) -> Option<FileContract> {
        self.lock().state.sets().contract(contract).cloned()
    }

    pub fn unspent_outputs(&self) -> Vec<(OutputID, Output)> {
        self.lock()
            .state
            .sets()
            .unspent_outputs()
            .iter()
            .map(|(id, output)| (*id, output.clone()))
            .collect()
    }

    pub fn open_contracts(&self) -> Vec<(ContractID, FileContract)> {
        self.lock()
            .state
            .sets()
            .open_contracts()
            .iter()
            .map(|(id, contract)| (*id, contract.clone()))
            .collect()
    }

    /// A copy of the sets as of the last committed change.
    pub fn sets(&self) -> ConsensusSets {
        self.lock().state.sets().clone()
    }

    pub fn is_halted(&self) -> bool {
        match self.guarded.lock() {
            Ok(guarded) => guarded.state.is_halted(),
            Err(_) => true,
        }
    }

    // Readers tolerate a poisoned lock, since every commit is atomic with respect to the sets.
    fn lock(&self) -> MutexGuard<'_, Guarded> {
        self.guarded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ConsensusSet {
    fn drop(&mut self) {
        // The notifier goes first, since it forwards events to the event bus. Either thread may already
        // have exited if its channel was disconnected.
        let _ = self.notifier_shutdown.send(());
        if let Some(notifier) = self.notifier.take() {
            if notifier.join().is_err() {
                log::error!("Notifier thread panicked");
            }
        }

        let _ = self.event_bus_shutdown.send(());
        if let Some(event_bus) = self.event_bus.take() {
            if event_bus.join().is_err() {
                log::error!("Event bus thread panicked in an event handler");
            }
        }
    }
}

fn prune_revoked(guarded: &mut Guarded) {
    for (subscriber, kind) in guarded.registry.prune_revoked() {
        log::debug!("Pruned revoked {:?} subscriber {}", kind, subscriber);
        NotifierMessage::publish(
            &guarded.notifier,
            NotifierMessage::Event(Event::RevokeSubscriber(RevokeSubscriberEvent {
                timestamp: SystemTime::now(),
                subscriber,
                kind,
            })),
        );
    }
}

fn publish_subscribe(notifier: &Sender<NotifierMessage>, subscriber: SubscriberID, kind: SubscriberKind) {
    NotifierMessage::publish(
        notifier,
        NotifierMessage::Event(Event::Subscribe(SubscribeEvent {
            timestamp: SystemTime::now(),
            subscriber,
            kind,
        })),
    );
}
